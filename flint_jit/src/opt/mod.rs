//! Optimization phases.
//!
//! # Phases
//!
//! - **Canonicalization** (`canonicalize/`): local rewrites to a fixed point
//! - **Counted loops** (`loops/`): induction variables, trip counts and
//!   overflow guards
//! - **Conditional elimination** (`conditional_elimination/`): dominator
//!   facts fold branches and guards
//! - **Scheduling** (`schedule.rs`): blocks and order for every node
//!
//! The [`pipeline`] runs them in that order.

pub mod canonicalize;
pub mod conditional_elimination;
pub mod loops;
pub mod pipeline;
pub mod schedule;

pub use canonicalize::{Canonicalizer, CanonicalizerConfig};
pub use conditional_elimination::ConditionalElimination;
pub use loops::{CountedLoopInfo, CountedLoops, LoopEx, LoopsData};
pub use pipeline::{optimize, OptPipeline, PipelineConfig, PipelineResult, PipelineStats};
pub use schedule::{Schedule, SchedulePolicy};

use crate::error::CompileResult;
use crate::ir::condition::Condition;
use crate::ir::graph::Graph;
use crate::ir::node::NodeId;
use crate::ir::operators::Operator;
use crate::providers::Providers;
use crate::speculation::SpeculationLog;

// =============================================================================
// Phase Interface
// =============================================================================

/// Shared, read-only state of one compilation.
#[derive(Clone, Copy)]
pub struct PhaseContext<'a> {
    pub providers: &'a dyn Providers,
    pub speculation_log: &'a SpeculationLog,
}

impl<'a> PhaseContext<'a> {
    pub fn new(providers: &'a dyn Providers, speculation_log: &'a SpeculationLog) -> Self {
        PhaseContext {
            providers,
            speculation_log,
        }
    }
}

/// A graph transformation.
pub trait Phase {
    fn name(&self) -> &'static str;

    /// Transform `graph`; `Ok(true)` if anything changed.
    fn run(&mut self, graph: &mut Graph, ctx: &PhaseContext<'_>) -> CompileResult<bool>;
}

// =============================================================================
// Relations
// =============================================================================

/// An integer comparison `x condition y` read off a logic node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Relation {
    pub x: NodeId,
    pub y: NodeId,
    pub condition: Condition,
}

impl Relation {
    /// The relation asserted by `cond` (or its negation when `holds` is false).
    pub fn of(graph: &Graph, cond: NodeId, holds: bool) -> Option<Relation> {
        match graph.op(cond) {
            Operator::IntCmp(op) => {
                let inputs = graph.inputs(cond);
                let condition = if holds { op.condition() } else { op.condition().negate() };
                Some(Relation {
                    x: inputs[0],
                    y: inputs[1],
                    condition,
                })
            }
            Operator::LogicNot => Self::of(graph, graph.inputs(cond)[0], !holds),
            _ => None,
        }
    }

    /// The same relation with `value` on the left, if it is an operand.
    pub fn oriented(self, value: NodeId) -> Option<Relation> {
        if self.x == value {
            Some(self)
        } else if self.y == value {
            Some(Relation {
                x: self.y,
                y: self.x,
                condition: self.condition.mirror(),
            })
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::builder::{ArithmeticBuilder, GraphBuilder};

    #[test]
    fn test_relation_of_canonical_compare() {
        let mut b = GraphBuilder::with_int_parameters(2);
        let x = b.parameter(0).unwrap();
        let y = b.parameter(1).unwrap();
        let le = b.int_le(x, y);
        let g = b.finish();

        let r = Relation::of(&g, le, true).unwrap();
        assert_eq!((r.x, r.y, r.condition), (y, x, Condition::Ge));
        assert_eq!(r.oriented(x).map(|r| r.condition), Some(Condition::Le));
        assert_eq!(Relation::of(&g, le, false).and_then(|r| r.oriented(x)).map(|r| r.condition), Some(Condition::Gt));
    }
}
