use super::GraphBuilder;
use crate::ir::node::NodeId;
use crate::ir::operators::{ControlOp, Operator};
use crate::ir::stamp::Stamp;

/// Builder trait for control flow.
pub trait ControlBuilder {
    // Basic Control Flow
    /// Split on `condition`; returns `(if_true, if_false)` and continues on
    /// the true path.
    fn branch(&mut self, condition: NodeId) -> (NodeId, NodeId);
    /// Merge the given path ends and continue after the merge.
    fn merge(&mut self, ends: &[NodeId]) -> NodeId;
    fn return_value(&mut self, value: NodeId) -> NodeId;
    fn return_void(&mut self) -> NodeId;

    // Loops
    /// Open a loop at the current position and continue in its header.
    fn loop_begin(&mut self) -> NodeId;
    /// Close the current path as a back edge of `header`.
    fn loop_end(&mut self, header: NodeId);

    // Phi Nodes
    fn phi(&mut self, merge: NodeId, values: &[NodeId]) -> NodeId;
    fn loop_phi(&mut self, header: NodeId, initial: NodeId) -> NodeId;
    fn set_loop_phi_back(&mut self, phi: NodeId, back_value: NodeId);
}

impl ControlBuilder for GraphBuilder {
    fn branch(&mut self, condition: NodeId) -> (NodeId, NodeId) {
        let if_node = self.append(Operator::Control(ControlOp::If), &[condition], Stamp::Void);
        let if_true = self.graph.add(Operator::Control(ControlOp::IfTrue), &[if_node], Stamp::Void);
        let if_false = self.graph.add(Operator::Control(ControlOp::IfFalse), &[if_node], Stamp::Void);
        self.set_control(if_true);
        (if_true, if_false)
    }

    fn merge(&mut self, ends: &[NodeId]) -> NodeId {
        let region = self.graph.add(Operator::Control(ControlOp::Region), ends, Stamp::Void);
        self.set_control(region);
        region
    }

    fn return_value(&mut self, value: NodeId) -> NodeId {
        self.append(Operator::Control(ControlOp::Return), &[value], Stamp::Void)
    }

    fn return_void(&mut self) -> NodeId {
        self.append(Operator::Control(ControlOp::Return), &[], Stamp::Void)
    }

    fn loop_begin(&mut self) -> NodeId {
        let entry = self.control();
        let header = self.graph.add(Operator::Control(ControlOp::Loop), &[entry], Stamp::Void);
        self.set_control(header);
        header
    }

    fn loop_end(&mut self, header: NodeId) {
        let end = self.control();
        self.graph.add_input(header, end);
    }

    fn phi(&mut self, merge: NodeId, values: &[NodeId]) -> NodeId {
        let stamp = values
            .iter()
            .fold(Stamp::Empty, |acc, &v| acc.join(self.graph.stamp(v)));
        let mut inputs = Vec::with_capacity(values.len() + 1);
        inputs.push(merge);
        inputs.extend_from_slice(values);
        self.graph.add(Operator::Phi, &inputs, stamp)
    }

    fn loop_phi(&mut self, header: NodeId, initial: NodeId) -> NodeId {
        // Back values are not known yet.
        let stamp = self.graph.stamp(initial).unrestricted();
        self.graph.add(Operator::Phi, &[header, initial], stamp)
    }

    fn set_loop_phi_back(&mut self, phi: NodeId, back_value: NodeId) {
        self.graph.add_input(phi, back_value);
    }
}
