//! Induction Variable Detection.
//!
//! A basic induction variable is a loop phi whose every back-edge value is
//! the phi plus or minus a nonzero constant:
//!
//! ```text
//!   i = Phi(loop, init, i + stride, i + stride, ...)
//! ```
//!
//! The canonicalizer rewrites `i - c` as `i + (-c)`; both shapes are
//! accepted here.

use crate::ir::graph::Graph;
use crate::ir::node::NodeId;
use crate::ir::operators::{ArithOp, Operator};
use crate::ir::stamp::{wrap, IntegerStamp};

// =============================================================================
// Induction Variable Types
// =============================================================================

/// Direction of iteration, from the sign of the stride.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Up,
    Down,
}

/// `phi = init; phi = phi + stride` on every back edge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InductionVariable {
    /// The loop phi.
    pub phi: NodeId,
    /// Value on loop entry.
    pub init: NodeId,
    /// Nonzero, already wrapped to the phi's width.
    pub stride: i64,
    /// The add or sub producing the back-edge value.
    pub update: NodeId,
    pub direction: Direction,
}

impl InductionVariable {
    #[inline]
    pub fn is_increasing(&self) -> bool {
        self.direction == Direction::Up
    }

    /// Magnitude of the stride.
    #[inline]
    pub fn step(&self) -> u64 {
        self.stride.unsigned_abs()
    }

    /// Constant initial value, if any.
    pub fn constant_init(&self, graph: &Graph) -> Option<i64> {
        graph[self.init].as_int()
    }

    pub fn bits(&self, graph: &Graph) -> Option<u32> {
        graph.stamp(self.phi).as_integer().map(IntegerStamp::bits)
    }
}

// =============================================================================
// Induction Variable Detector
// =============================================================================

/// Finds the basic induction variables of one loop header.
#[derive(Debug)]
pub struct InductionDetector<'g> {
    graph: &'g Graph,
}

impl<'g> InductionDetector<'g> {
    #[inline]
    pub fn new(graph: &'g Graph) -> Self {
        Self { graph }
    }

    /// All basic induction variables of `header`, in phi id order.
    pub fn find_induction_variables(&self, header: NodeId) -> Vec<InductionVariable> {
        self.graph
            .phis(header)
            .into_iter()
            .filter_map(|phi| self.analyze_phi(header, phi))
            .collect()
    }

    fn analyze_phi(&self, header: NodeId, phi: NodeId) -> Option<InductionVariable> {
        let g = self.graph;
        let bits = g.stamp(phi).as_integer()?.bits();
        let inputs = g.inputs(phi);
        // [header, entry value, back values...]
        if inputs.len() < 3 || inputs.len() != g.inputs(header).len() + 1 {
            return None;
        }
        let init = inputs[1];
        let update = inputs[2];
        if inputs[3..].iter().any(|&v| v != update) {
            return None;
        }
        let stride = self.stride_of(phi, update, bits)?;
        let direction = if stride > 0 { Direction::Up } else { Direction::Down };
        tracing::trace!(%phi, stride, "induction variable");
        Some(InductionVariable {
            phi,
            init,
            stride,
            update,
            direction,
        })
    }

    /// Constant added to `phi` by `update`.
    fn stride_of(&self, phi: NodeId, update: NodeId, bits: u32) -> Option<i64> {
        let g = self.graph;
        let ops = g.inputs(update);
        let stride = match *g.op(update) {
            Operator::IntOp(ArithOp::Add) if ops[0] == phi => g[ops[1]].as_int()?,
            Operator::IntOp(ArithOp::Add) if ops[1] == phi => g[ops[0]].as_int()?,
            Operator::IntOp(ArithOp::Sub) if ops[0] == phi => {
                let c = g[ops[1]].as_int()?;
                let negated = wrap(c.wrapping_neg(), bits);
                // -MIN wraps back to MIN
                if negated == c && c != 0 {
                    return None;
                }
                negated
            }
            _ => return None,
        };
        (stride != 0).then_some(stride)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::builder::{ArithmeticBuilder, ControlBuilder, GraphBuilder};

    /// for (i = init; i < n; i = update(i)) {}
    fn counting_loop(update: impl FnOnce(&mut GraphBuilder, NodeId) -> NodeId) -> (Graph, NodeId, NodeId) {
        let mut b = GraphBuilder::with_int_parameters(1);
        let n = b.parameter(0).unwrap();
        let zero = b.const_int(0);
        let header = b.loop_begin();
        let i = b.loop_phi(header, zero);
        let cond = b.int_lt(i, n);
        let (_, exit) = b.branch(cond);
        let next = update(&mut b, i);
        b.set_loop_phi_back(i, next);
        b.loop_end(header);
        b.set_control(exit);
        b.return_value(i);
        (b.finish(), header, i)
    }

    #[test]
    fn test_detect_increment() {
        let (g, header, i) = counting_loop(|b, i| {
            let one = b.const_int(1);
            b.int_add(i, one)
        });
        let ivs = InductionDetector::new(&g).find_induction_variables(header);
        assert_eq!(ivs.len(), 1);
        assert_eq!(ivs[0].phi, i);
        assert_eq!(ivs[0].stride, 1);
        assert_eq!(ivs[0].constant_init(&g), Some(0));
        assert!(ivs[0].is_increasing());
    }

    #[test]
    fn test_detect_decrement_by_sub() {
        let (g, header, _) = counting_loop(|b, i| {
            let three = b.const_int(3);
            b.int_sub(i, three)
        });
        let ivs = InductionDetector::new(&g).find_induction_variables(header);
        assert_eq!(ivs[0].stride, -3);
        assert_eq!(ivs[0].direction, Direction::Down);
        assert_eq!(ivs[0].step(), 3);
    }

    #[test]
    fn test_non_constant_stride_rejected() {
        let (g, header, _) = counting_loop(|b, i| b.int_add(i, i));
        assert!(InductionDetector::new(&g).find_induction_variables(header).is_empty());
    }

    #[test]
    fn test_sub_of_min_rejected() {
        let (g, header, _) = counting_loop(|b, i| {
            let min = b.const_int(i32::MIN);
            b.int_sub(i, min)
        });
        assert!(InductionDetector::new(&g).find_induction_variables(header).is_empty());
    }
}
