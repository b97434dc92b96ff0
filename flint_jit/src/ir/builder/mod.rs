//! IR graph builder.
//!
//! The builder tracks a current control position and appends fixed nodes
//! there; floating nodes are uniqued and stamped as they are created.
//! Operations are split by family into extension traits, all implemented
//! for [`GraphBuilder`]:
//! - [`ArithmeticBuilder`]: constants, arithmetic, bitwise ops, comparisons
//! - [`ControlBuilder`]: branches, merges, loops, returns
//! - [`GuardBuilder`]: guards, pis and deoptimization
//! - [`MemoryBuilder`]: field and static accesses, calls

use crate::ir::graph::Graph;
use crate::ir::infer::infer_stamp;
use crate::ir::node::NodeId;
use crate::ir::operators::Operator;
use crate::ir::stamp::Stamp;

pub mod arithmetic;
pub mod control;
pub mod guards;
pub mod memory;

#[cfg(test)]
mod tests;

pub use arithmetic::ArithmeticBuilder;
pub use control::ControlBuilder;
pub use guards::GuardBuilder;
pub use memory::MemoryBuilder;

// =============================================================================
// Graph Builder
// =============================================================================

pub struct GraphBuilder {
    pub(crate) graph: Graph,
    /// Last fixed node on the current path.
    control: NodeId,
    parameters: Vec<NodeId>,
}

impl GraphBuilder {
    /// Builder for a method whose parameters have the given stamps.
    pub fn new(parameter_stamps: &[Stamp]) -> Self {
        let mut graph = Graph::new();
        let parameters = parameter_stamps
            .iter()
            .enumerate()
            .map(|(i, stamp)| graph.add(Operator::Parameter(i as u16), &[], stamp.clone()))
            .collect();
        let control = graph.start();
        GraphBuilder {
            graph,
            control,
            parameters,
        }
    }

    /// Builder for `count` 32-bit integer parameters.
    pub fn with_int_parameters(count: usize) -> Self {
        Self::new(&vec![Stamp::int(32); count])
    }

    pub fn finish(self) -> Graph {
        self.graph
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    pub fn graph_mut(&mut self) -> &mut Graph {
        &mut self.graph
    }

    pub fn parameter(&self, index: usize) -> Option<NodeId> {
        self.parameters.get(index).copied()
    }

    /// Current control position.
    pub fn control(&self) -> NodeId {
        self.control
    }

    pub fn set_control(&mut self, control: NodeId) {
        self.control = control;
    }

    /// The current path ended in a return or deoptimization.
    pub fn is_terminated(&self) -> bool {
        self.graph.op(self.control).is_terminator()
    }

    // =========================================================================
    // Node creation
    // =========================================================================

    /// Uniqued floating node with an inferred stamp.
    pub(crate) fn value(&mut self, op: Operator, inputs: &[NodeId]) -> NodeId {
        let stamp = infer_stamp(&self.graph, &op, inputs).unwrap_or(Stamp::Void);
        self.graph.unique(op, inputs, stamp)
    }

    /// Append a fixed node at the current position and move past it.
    pub(crate) fn append(&mut self, op: Operator, inputs: &[NodeId], stamp: Stamp) -> NodeId {
        let mut all = Vec::with_capacity(inputs.len() + 1);
        all.push(self.control);
        all.extend_from_slice(inputs);
        let node = self.graph.add(op, &all, stamp);
        self.control = node;
        node
    }
}

impl std::fmt::Debug for GraphBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphBuilder")
            .field("control", &self.control)
            .field("parameters", &self.parameters)
            .field("nodes", &self.graph.len())
            .finish()
    }
}
