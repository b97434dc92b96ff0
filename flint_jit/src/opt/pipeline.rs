//! Optimization Pipeline.
//!
//! Runs the phases in a fixed order and schedules the result:
//!
//! 1. **Canonicalization**: folding, simplification, value numbering
//! 2. **Loops**: counted-loop detection and loop-limit guards
//! 3. **Conditional elimination**: dominator facts fold branches and guards
//! 4. **Cleanup**: canonicalization of what the earlier phases exposed
//!
//! Each phase runs inside a `debug_span!` named after it. With
//! [`PipelineConfig::verify`] set, the graph is verified after every phase
//! and a violation aborts the compilation.

use std::time::{Duration, Instant};

use super::canonicalize::{Canonicalizer, CanonicalizerConfig};
use super::conditional_elimination::ConditionalElimination;
use super::loops::CountedLoops;
use super::schedule::{Schedule, SchedulePolicy};
use super::{Phase, PhaseContext};
use crate::error::{Bailout, CompileResult};
use crate::ir::graph::Graph;
use crate::providers::DefaultProviders;
use crate::speculation::SpeculationLog;

// =============================================================================
// Pass Phase
// =============================================================================

/// Phase of the optimization pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum PassPhase {
    Canonicalization,
    Loops,
    ConditionalElimination,
    Cleanup,
}

// =============================================================================
// Pass Entry
// =============================================================================

struct PassEntry {
    pass: Box<dyn Phase>,
    phase: PassPhase,
    runs: usize,
    changes: usize,
    time: Duration,
    nodes_before: usize,
    nodes_after: usize,
}

impl PassEntry {
    fn new<P: Phase + 'static>(pass: P, phase: PassPhase) -> Self {
        Self {
            pass: Box::new(pass),
            phase,
            runs: 0,
            changes: 0,
            time: Duration::ZERO,
            nodes_before: 0,
            nodes_after: 0,
        }
    }
}

// =============================================================================
// Pipeline Configuration
// =============================================================================

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub canonicalize: bool,
    pub conditional_elimination: bool,
    pub counted_loops: bool,

    /// Bound on canonicalizer passes per run.
    pub max_canonicalizer_passes: usize,

    pub schedule_policy: SchedulePolicy,

    /// Verify the graph after every phase.
    pub verify: bool,

    /// Larger input graphs bail out permanently.
    pub max_graph_size: usize,

    /// Recompilations allowed after retryable bailouts.
    pub max_recompiles: usize,

    pub collect_timing: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            canonicalize: true,
            conditional_elimination: true,
            counted_loops: true,
            max_canonicalizer_passes: 8,
            schedule_policy: SchedulePolicy::LatestWithGuardOrder,
            verify: cfg!(debug_assertions),
            max_graph_size: 100_000,
            max_recompiles: 4,
            collect_timing: true,
        }
    }
}

impl PipelineConfig {
    /// Canonicalization only, fewer passes.
    pub fn minimal() -> Self {
        Self {
            conditional_elimination: false,
            counted_loops: false,
            max_canonicalizer_passes: 2,
            schedule_policy: SchedulePolicy::Earliest,
            collect_timing: false,
            ..Default::default()
        }
    }

    /// Every phase, a higher pass bound and verification between phases.
    pub fn full() -> Self {
        Self {
            max_canonicalizer_passes: 16,
            verify: true,
            ..Default::default()
        }
    }

    fn canonicalizer(&self) -> Canonicalizer {
        Canonicalizer::with_config(CanonicalizerConfig {
            max_passes: self.max_canonicalizer_passes,
            ..CanonicalizerConfig::default()
        })
    }
}

// =============================================================================
// Optimization Pipeline
// =============================================================================

pub struct OptPipeline {
    config: PipelineConfig,
    passes: Vec<PassEntry>,
    total_time: Duration,
}

/// Output of a pipeline run.
#[derive(Debug, Clone)]
pub struct PipelineResult {
    pub schedule: Schedule,
    pub stats: PipelineStats,
}

impl OptPipeline {
    pub fn new() -> Self {
        Self::with_config(PipelineConfig::default())
    }

    pub fn with_config(config: PipelineConfig) -> Self {
        let mut pipeline = Self {
            config,
            passes: Vec::new(),
            total_time: Duration::ZERO,
        };
        pipeline.register_default_passes();
        pipeline
    }

    fn register_default_passes(&mut self) {
        if self.config.canonicalize {
            self.register(self.config.canonicalizer(), PassPhase::Canonicalization);
        }
        if self.config.counted_loops {
            self.register(CountedLoops::new(), PassPhase::Loops);
        }
        if self.config.conditional_elimination {
            self.register(ConditionalElimination::new(), PassPhase::ConditionalElimination);
        }
        if self.config.canonicalize {
            self.register(self.config.canonicalizer(), PassPhase::Cleanup);
        }
    }

    /// Append a phase; phases run in registration order.
    pub fn register<P: Phase + 'static>(&mut self, pass: P, phase: PassPhase) {
        self.passes.push(PassEntry::new(pass, phase));
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Optimize and schedule `graph`.
    pub fn run(&mut self, graph: &mut Graph, ctx: &PhaseContext<'_>) -> CompileResult<PipelineResult> {
        let start = Instant::now();
        let initial_size = graph.len();
        if initial_size > self.config.max_graph_size {
            tracing::warn!(nodes = initial_size, limit = self.config.max_graph_size, "graph too large");
            return Err(Bailout::permanent(format!(
                "graph has {initial_size} nodes, limit is {}",
                self.config.max_graph_size
            ))
            .into());
        }
        if self.config.verify {
            graph.verify()?;
        }

        for entry in &mut self.passes {
            let name = entry.pass.name();
            let span = tracing::debug_span!("phase", name);
            let _enter = span.enter();

            let timer = self.config.collect_timing.then(Instant::now);
            let before = graph.len();
            let changed = entry.pass.run(graph, ctx)?;
            if let Some(timer) = timer {
                entry.time += timer.elapsed();
            }
            entry.runs += 1;
            entry.changes += usize::from(changed);
            entry.nodes_before = before;
            entry.nodes_after = graph.len();
            tracing::debug!(phase = name, changed, before, after = graph.len(), "phase finished");

            if self.config.verify {
                graph.verify()?;
            }
        }

        let policy = self.config.schedule_policy;
        let (schedule, dead_removed) = {
            let span = tracing::debug_span!("phase", name = "schedule");
            let _enter = span.enter();
            let schedule = Schedule::compute(graph, policy)?;
            let removed = schedule.remove_dead(graph);
            if removed > 0 {
                (Schedule::compute(graph, policy)?, removed)
            } else {
                (schedule, 0)
            }
        };

        self.total_time = start.elapsed();
        let stats = PipelineStats {
            passes: self.pass_stats(),
            total_time: self.total_time,
            initial_size,
            final_size: graph.len(),
            scheduled_nodes: schedule.len(),
            dead_removed,
        };
        tracing::debug!(
            initial = initial_size,
            final_size = stats.final_size,
            dead_removed,
            "pipeline finished"
        );
        Ok(PipelineResult { schedule, stats })
    }

    pub fn pass_stats(&self) -> Vec<PassStat> {
        self.passes
            .iter()
            .map(|e| PassStat {
                name: e.pass.name(),
                phase: e.phase,
                runs: e.runs,
                changes: e.changes,
                time: e.time,
                nodes_before: e.nodes_before,
                nodes_after: e.nodes_after,
            })
            .collect()
    }

    #[inline]
    pub fn total_time(&self) -> Duration {
        self.total_time
    }
}

impl Default for OptPipeline {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Statistics
// =============================================================================

/// Statistics from a single phase.
#[derive(Debug, Clone)]
pub struct PassStat {
    pub name: &'static str,
    pub phase: PassPhase,
    pub runs: usize,
    /// Runs that changed the graph.
    pub changes: usize,
    pub time: Duration,
    pub nodes_before: usize,
    pub nodes_after: usize,
}

#[derive(Debug, Clone, Default)]
pub struct PipelineStats {
    pub passes: Vec<PassStat>,
    pub total_time: Duration,
    pub initial_size: usize,
    pub final_size: usize,
    pub scheduled_nodes: usize,
    /// Dead floating nodes deleted after scheduling.
    pub dead_removed: usize,
}

impl PipelineStats {
    /// Final size over initial size.
    pub fn size_reduction(&self) -> f64 {
        if self.initial_size == 0 {
            1.0
        } else {
            self.final_size as f64 / self.initial_size as f64
        }
    }
}

// =============================================================================
// Quick Optimize Functions
// =============================================================================

fn run_with(config: PipelineConfig, graph: &mut Graph) -> CompileResult<PipelineResult> {
    let log = SpeculationLog::new();
    let ctx = PhaseContext::new(&DefaultProviders, &log);
    OptPipeline::with_config(config).run(graph, &ctx)
}

/// Default pipeline without runtime knowledge.
pub fn optimize(graph: &mut Graph) -> CompileResult<PipelineResult> {
    run_with(PipelineConfig::default(), graph)
}

pub fn optimize_minimal(graph: &mut Graph) -> CompileResult<PipelineResult> {
    run_with(PipelineConfig::minimal(), graph)
}

pub fn optimize_full(graph: &mut Graph) -> CompileResult<PipelineResult> {
    run_with(PipelineConfig::full(), graph)
}

// =============================================================================
// Tests
// =============================================================================
