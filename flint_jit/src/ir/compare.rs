//! Structural graph equality.
//!
//! Two graphs are equal when a bijection between their reachable nodes maps
//! `Start` to `Start`, preserves operators and input order, and preserves
//! control successors. Node ids and unreachable garbage are ignored.

use rustc_hash::FxHashMap;

use super::graph::Graph;
use super::node::NodeId;

pub fn structurally_equal(a: &Graph, b: &Graph) -> bool {
    let mut forward: FxHashMap<NodeId, NodeId> = FxHashMap::default();
    let mut backward: FxHashMap<NodeId, NodeId> = FxHashMap::default();
    let mut work = vec![(a.start(), b.start())];

    while let Some((x, y)) = work.pop() {
        match (forward.get(&x), backward.get(&y)) {
            (Some(&mx), Some(&my)) if mx == y && my == x => continue,
            (None, None) => {}
            _ => {
                tracing::trace!(%x, %y, "graphs differ: inconsistent mapping");
                return false;
            }
        }
        forward.insert(x, y);
        backward.insert(y, x);

        if a.op(x) != b.op(y) || a.inputs(x).len() != b.inputs(y).len() {
            tracing::trace!(%x, %y, "graphs differ: {:?} vs {:?}", a.op(x), b.op(y));
            return false;
        }
        work.extend(a.inputs(x).iter().copied().zip(b.inputs(y).iter().copied()));

        let sx = a.control_successors(x);
        let sy = b.control_successors(y);
        if sx.len() != sy.len() {
            return false;
        }
        work.extend(sx.into_iter().zip(sy));
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::builder::{ArithmeticBuilder, ControlBuilder, GraphBuilder};

    fn add_one(order_swapped: bool) -> Graph {
        let mut b = GraphBuilder::with_int_parameters(1);
        let a = b.parameter(0).unwrap();
        // Allocate an unrelated constant first to shift ids.
        if order_swapped {
            b.const_int(99);
        }
        let one = b.const_int(1);
        let sum = b.int_add(a, one);
        b.return_value(sum);
        b.finish()
    }

    #[test]
    fn test_equal_modulo_ids() {
        assert!(structurally_equal(&add_one(false), &add_one(true)));
    }

    #[test]
    fn test_operand_order_matters() {
        let g = add_one(false);
        let mut b = GraphBuilder::with_int_parameters(1);
        let a = b.parameter(0).unwrap();
        let one = b.const_int(1);
        let sum = b.int_add(one, a);
        b.return_value(sum);
        assert!(!structurally_equal(&g, &b.finish()));
    }
}
