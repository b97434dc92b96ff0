//! Compilation driver.
//!
//! [`Compiler::compile`] asks a [`GraphSource`] for a fresh graph, runs the
//! optimization pipeline on it and schedules the result. A retryable bailout
//! marks its speculation as failed in the method's [`SpeculationLog`] and
//! starts over, so the next graph is built without that assumption. Errors
//! are classified by [`CompileError::kind`]:
//!
//! | Kind        | Driver reaction                                     |
//! |-------------|-----------------------------------------------------|
//! | `Retryable` | record the speculation, rebuild, run again          |
//! | `Permanent` | return the error; the caller uses a lower tier      |
//! | `Fatal`     | return the error; the graph broke an invariant      |
//!
//! Retries are bounded by [`PipelineConfig::max_recompiles`]; running out
//! turns the last retryable bailout into a permanent one.

use std::sync::Arc;

use crate::error::{Bailout, BailoutKind, CompileError, CompileResult, ErrorKind};
use crate::ir::graph::Graph;
use crate::opt::loops::{LoopsData, LoopsSummary};
use crate::opt::pipeline::{OptPipeline, PipelineConfig, PipelineResult, PipelineStats};
use crate::opt::schedule::Schedule;
use crate::opt::PhaseContext;
use crate::providers::{DefaultProviders, Providers};
use crate::speculation::SpeculationLog;

// =============================================================================
// Graph Source
// =============================================================================

/// Builds the graph of one method. Called once per attempt.
pub trait GraphSource {
    /// Build a fresh graph, speculating only where `log` allows it.
    fn build(&self, log: &SpeculationLog) -> CompileResult<Graph>;
}

impl<F> GraphSource for F
where
    F: Fn(&SpeculationLog) -> Graph,
{
    fn build(&self, log: &SpeculationLog) -> CompileResult<Graph> {
        Ok(self(log))
    }
}

// =============================================================================
// Compiler
// =============================================================================

/// Optimized, scheduled graph of one method.
#[derive(Debug, Clone)]
pub struct CompilationResult {
    pub graph: Graph,
    pub schedule: Schedule,
    pub loops: LoopsSummary,
    pub stats: PipelineStats,
    /// Pipeline runs, the successful one included.
    pub attempts: usize,
}

#[derive(Clone)]
pub struct Compiler {
    config: PipelineConfig,
    providers: Arc<dyn Providers>,
}

impl Compiler {
    pub fn new(config: PipelineConfig, providers: Arc<dyn Providers>) -> Self {
        Compiler { config, providers }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn compile(&self, source: &dyn GraphSource, log: &SpeculationLog) -> CompileResult<CompilationResult> {
        let mut attempts = 0;
        loop {
            attempts += 1;
            let mut graph = source.build(log)?;
            let ctx = PhaseContext::new(self.providers.as_ref(), log);
            let mut pipeline = OptPipeline::with_config(self.config.clone());

            let bailout = match pipeline.run(&mut graph, &ctx) {
                Ok(PipelineResult { schedule, stats }) => {
                    let loops = LoopsData::compute(&graph).summary(&graph);
                    tracing::debug!(attempts, nodes = graph.len(), loops = loops.loops, "compiled");
                    return Ok(CompilationResult {
                        graph,
                        schedule,
                        loops,
                        stats,
                        attempts,
                    });
                }
                Err(CompileError::Bailout(b)) if b.kind == BailoutKind::Retryable => b,
                Err(err) => {
                    if err.kind() == ErrorKind::Permanent {
                        tracing::warn!(%err, attempts, "permanent bailout");
                    } else {
                        tracing::warn!(%err, attempts, "compilation aborted");
                    }
                    return Err(err);
                }
            };

            if let Some(speculation) = bailout.speculation {
                if !log.record_failure(speculation) {
                    // The rebuilt graph made the same assumption again.
                    tracing::warn!(reason = %bailout.reason, "speculation failed twice");
                    return Err(Bailout::permanent(format!("speculation failed twice: {}", bailout.reason)).into());
                }
            }
            if attempts > self.config.max_recompiles {
                tracing::warn!(attempts, reason = %bailout.reason, "recompile limit reached");
                return Err(Bailout::permanent(format!(
                    "gave up after {attempts} attempts: {}",
                    bailout.reason
                ))
                .into());
            }
            tracing::warn!(attempt = attempts, reason = %bailout.reason, "recompiling after failed speculation");
        }
    }
}

impl Default for Compiler {
    fn default() -> Self {
        Compiler::new(PipelineConfig::default(), Arc::new(DefaultProviders))
    }
}

impl std::fmt::Debug for Compiler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Compiler").field("config", &self.config).finish_non_exhaustive()
    }
}
