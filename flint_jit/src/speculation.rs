//! Speculation tokens and the log of failed speculations.
//!
//! A speculative guard carries a [`Speculation`]. When it deoptimizes, the
//! runtime reports the token back through [`SpeculationLog::record_failure`];
//! the next compilation of the same method asks [`SpeculationLog::speculate`]
//! before making the same assumption and gets `None`.
//!
//! The log is shared between compilations of one method, which may run on
//! different threads, so it is internally synchronized.

use parking_lot::RwLock;
use rustc_hash::FxHashSet;
use std::fmt;

/// What a speculation assumes. Equal reasons are the same assumption.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SpeculationReason {
    /// Kind of assumption, e.g. `"counted-loop-overflow"`.
    pub group: &'static str,
    /// Distinguishes assumptions of one group within a method.
    pub key: u64,
}

impl SpeculationReason {
    pub const fn new(group: &'static str, key: u64) -> Self {
        SpeculationReason { group, key }
    }
}

impl fmt::Display for SpeculationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.group, self.key)
    }
}

/// Token attached to a speculative guard or deoptimization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Speculation {
    reason: SpeculationReason,
}

impl Speculation {
    pub fn reason(&self) -> SpeculationReason {
        self.reason
    }
}

/// Failed speculations of one method.
#[derive(Debug, Default)]
pub struct SpeculationLog {
    failed: RwLock<FxHashSet<SpeculationReason>>,
}

impl SpeculationLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Token for `reason`, or `None` if that assumption already failed.
    pub fn speculate(&self, reason: SpeculationReason) -> Option<Speculation> {
        if self.failed.read().contains(&reason) {
            tracing::trace!(%reason, "speculation refused");
            return None;
        }
        Some(Speculation { reason })
    }

    pub fn maybe_speculate(&self, reason: SpeculationReason) -> bool {
        !self.failed.read().contains(&reason)
    }

    /// Remember that `speculation` failed; returns `false` if already known.
    pub fn record_failure(&self, speculation: Speculation) -> bool {
        let fresh = self.failed.write().insert(speculation.reason);
        if fresh {
            tracing::debug!(reason = %speculation.reason, "speculation failed");
        }
        fresh
    }

    pub fn failure_count(&self) -> usize {
        self.failed.read().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_failed_speculation_is_refused() {
        let log = SpeculationLog::new();
        let reason = SpeculationReason::new("test", 1);
        let s = log.speculate(reason).unwrap();
        assert!(log.record_failure(s));
        assert!(!log.record_failure(s));
        assert!(log.speculate(reason).is_none());
        assert!(log.speculate(SpeculationReason::new("test", 2)).is_some());
    }

    #[test]
    fn test_log_shared_across_threads() {
        let log = Arc::new(SpeculationLog::new());
        let handles: Vec<_> = (0..4)
            .map(|i| {
                let log = Arc::clone(&log);
                std::thread::spawn(move || {
                    let s = log.speculate(SpeculationReason::new("t", i)).unwrap();
                    log.record_failure(s);
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(log.failure_count(), 4);
    }
}
