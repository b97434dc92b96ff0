//! Comparison and logic rules.

use super::arith::{add_constant, int_bits, int_value};
use super::{Canonical, Tool};
use crate::ir::fold;
use crate::ir::graph::Graph;
use crate::ir::node::NodeId;
use crate::ir::operators::{ArithOp, CmpOp, Constant, Operator};
use crate::ir::stamp::{max_value, min_value, wrap, TypeRef};

pub(super) fn canonicalize(tool: &mut Tool<'_>, node: NodeId) -> Canonical {
    let graph = &mut *tool.graph;
    match graph.op(node).clone() {
        Operator::IntCmp(op) => int_compare(graph, node, op),
        Operator::FloatCmp(op) => float_compare(graph, node, op),
        Operator::LogicNot => logic_not(graph, node),
        Operator::IsNull => is_null(graph, node),
        Operator::InstanceOf(ty) => instance_of(graph, node, &ty),
        Operator::Conditional => conditional(graph, node),
        _ => Canonical::Keep,
    }
}

fn logic(graph: &mut Graph, value: bool) -> Canonical {
    Canonical::Replace(graph.logic_const(value))
}

// =============================================================================
// Integer Comparisons
// =============================================================================

fn int_compare(graph: &mut Graph, node: NodeId, op: CmpOp) -> Canonical {
    let (x, y) = (graph.inputs(node)[0], graph.inputs(node)[1]);
    let bits = int_bits(graph, x);

    if let (Some(a), Some(b)) = (int_value(graph, x), int_value(graph, y)) {
        return logic(graph, fold::int_compare(op, bits, a, b));
    }
    if x == y {
        return logic(graph, op == CmpOp::Eq);
    }
    if let (Some(sx), Some(sy)) = (graph.stamp(x).as_integer(), graph.stamp(y).as_integer()) {
        if let Some(result) = op.condition().fold_stamps(sx, sy) {
            return logic(graph, result);
        }
    }

    match op {
        CmpOp::Eq => {
            if int_value(graph, x).is_some() {
                graph.swap_inputs(node, 0, 1);
                return Canonical::Changed;
            }
            // a + c1 == c2  ->  a == c2 - c1
            if let (Some((a, c1)), Some(c2)) = (add_constant(graph, x), int_value(graph, y)) {
                let c = graph.int_const(bits, wrap(c2.wrapping_sub(c1), bits));
                return Canonical::Replace(graph.unique_value(Operator::IntCmp(CmpOp::Eq), &[a, c]));
            }
            // a - b == 0  ->  a == b
            if *graph.op(x) == Operator::IntOp(ArithOp::Sub) && int_value(graph, y) == Some(0) {
                let (a, b) = (graph.inputs(x)[0], graph.inputs(x)[1]);
                return Canonical::Replace(graph.unique_value(Operator::IntCmp(CmpOp::Eq), &[a, b]));
            }
        }
        CmpOp::Lt => {
            if let Some(rewritten) = overflow_check(graph, bits, x, y) {
                return Canonical::Replace(rewritten);
            }
            if let Some(rewritten) = reassociate(graph, bits, x, y) {
                return Canonical::Replace(rewritten);
            }
        }
        CmpOp::Below => {}
    }
    Canonical::Keep
}

/// `a + c < a` holds exactly when the addition wraps.
fn overflow_check(graph: &mut Graph, bits: u32, x: NodeId, y: NodeId) -> Option<NodeId> {
    let (a, c) = add_constant(graph, x)?;
    if a != y || c == 0 {
        return None;
    }
    let lt = if c > 0 {
        // wraps iff a > MAX - c
        let bound = graph.int_const(bits, max_value(bits) - c);
        graph.unique_value(Operator::IntCmp(CmpOp::Lt), &[bound, a])
    } else {
        // holds iff a >= MIN - c
        let bound = graph.int_const(bits, min_value(bits) - c);
        let below = graph.unique_value(Operator::IntCmp(CmpOp::Lt), &[a, bound]);
        graph.unique_value(Operator::LogicNot, &[below])
    };
    Some(lt)
}

/// `a + c1 < c2` as `a < c2 - c1` (and mirrored) when neither side can wrap.
fn reassociate(graph: &mut Graph, bits: u32, x: NodeId, y: NodeId) -> Option<NodeId> {
    let fits = |v: i128| v >= min_value(bits) as i128 && v <= max_value(bits) as i128;
    let no_wrap = |graph: &Graph, a: NodeId, c: i64| {
        graph
            .stamp(a)
            .as_integer()
            .is_some_and(|s| fits(s.lower() as i128 + c as i128) && fits(s.upper() as i128 + c as i128))
    };

    if let (Some((a, c1)), Some(c2)) = (add_constant(graph, x), int_value(graph, y)) {
        let bound = c2 as i128 - c1 as i128;
        if no_wrap(graph, a, c1) && fits(bound) {
            let b = graph.int_const(bits, bound as i64);
            return Some(graph.unique_value(Operator::IntCmp(CmpOp::Lt), &[a, b]));
        }
    }
    if let (Some(c2), Some((a, c1))) = (int_value(graph, x), add_constant(graph, y)) {
        let bound = c2 as i128 - c1 as i128;
        if no_wrap(graph, a, c1) && fits(bound) {
            let b = graph.int_const(bits, bound as i64);
            return Some(graph.unique_value(Operator::IntCmp(CmpOp::Lt), &[b, a]));
        }
    }
    None
}

// =============================================================================
// Other Logic
// =============================================================================

fn float_compare(graph: &mut Graph, node: NodeId, op: CmpOp) -> Canonical {
    let (x, y) = (graph.inputs(node)[0], graph.inputs(node)[1]);
    match (graph[x].as_constant(), graph[y].as_constant()) {
        (Some(Constant::Float { bits, raw: a }), Some(Constant::Float { raw: b, .. })) => {
            logic(graph, fold::float_compare(op, bits, a, b))
        }
        _ => Canonical::Keep,
    }
}

fn logic_not(graph: &mut Graph, node: NodeId) -> Canonical {
    let x = graph.inputs(node)[0];
    match *graph.op(x) {
        Operator::LogicNot => Canonical::Replace(graph.inputs(x)[0]),
        Operator::LogicConst(b) => logic(graph, !b),
        _ => Canonical::Keep,
    }
}

fn is_null(graph: &mut Graph, node: NodeId) -> Canonical {
    let x = graph.inputs(node)[0];
    match graph.stamp(x).as_object() {
        Some(s) if s.is_always_null() => logic(graph, true),
        Some(s) if s.is_non_null() => logic(graph, false),
        _ => Canonical::Keep,
    }
}

fn instance_of(graph: &mut Graph, node: NodeId, ty: &TypeRef) -> Canonical {
    let x = graph.inputs(node)[0];
    match graph.stamp(x).as_object() {
        Some(s) if s.is_always_null() || s.is_disjoint_from(ty) => logic(graph, false),
        Some(s) if s.is_non_null() && s.is_subtype_of(ty) => logic(graph, true),
        _ => Canonical::Keep,
    }
}

fn conditional(graph: &mut Graph, node: NodeId) -> Canonical {
    let inputs = graph.inputs(node);
    let (c, t, f) = (inputs[0], inputs[1], inputs[2]);
    if t == f {
        return Canonical::Replace(t);
    }
    match *graph.op(c) {
        Operator::LogicConst(b) => Canonical::Replace(if b { t } else { f }),
        Operator::LogicNot => {
            let inner = graph.inputs(c)[0];
            Canonical::Replace(graph.unique_value(Operator::Conditional, &[inner, f, t]))
        }
        _ => Canonical::Keep,
    }
}
