//! Arithmetic and bitwise rules.

use super::{Canonical, Tool};
use crate::ir::fold;
use crate::ir::graph::Graph;
use crate::ir::node::NodeId;
use crate::ir::operators::{ArithOp, BitwiseOp, Constant, Operator, ReinterpretKind};
use crate::ir::stamp::{sign_extend, width_mask, wrap};

pub(super) fn canonicalize(tool: &mut Tool<'_>, node: NodeId) -> Canonical {
    match tool.graph.op(node).clone() {
        Operator::IntOp(op) => int_op(tool.graph, node, op),
        Operator::Bitwise(op) => bitwise(tool.graph, node, op),
        Operator::FloatOp(op) => float_op(tool.graph, node, op),
        Operator::Reinterpret(kind) => reinterpret(tool.graph, node, kind),
        _ => Canonical::Keep,
    }
}

// =============================================================================
// Helpers
// =============================================================================

/// Width of an integer value node.
pub(super) fn int_bits(graph: &Graph, node: NodeId) -> u32 {
    graph.stamp(node).as_integer().map_or(32, |s| s.bits())
}

pub(super) fn int_value(graph: &Graph, node: NodeId) -> Option<i64> {
    graph[node].as_int()
}

fn is_op(graph: &Graph, node: NodeId, op: Operator) -> bool {
    *graph.op(node) == op
}

/// `(a, c)` when `node` is `a + c` with a constant `c`.
pub(super) fn add_constant(graph: &Graph, node: NodeId) -> Option<(NodeId, i64)> {
    if !is_op(graph, node, Operator::IntOp(ArithOp::Add)) {
        return None;
    }
    let inputs = graph.inputs(node);
    int_value(graph, inputs[1]).map(|c| (inputs[0], c))
}

fn all_ones(graph: &Graph, node: NodeId, bits: u32) -> bool {
    int_value(graph, node) == Some(wrap(-1, bits))
}

/// Move a lone constant operand of a commutative operator to the right.
fn normalize_operands(graph: &mut Graph, node: NodeId) -> bool {
    let inputs = graph.inputs(node);
    let (x, y) = (inputs[0], inputs[1]);
    if graph.op(node).is_commutative() && graph[x].as_constant().is_some() && graph[y].as_constant().is_none() {
        graph.swap_inputs(node, 0, 1);
        return true;
    }
    false
}

fn value(graph: &mut Graph, op: Operator, inputs: &[NodeId]) -> Canonical {
    Canonical::Replace(graph.unique_value(op, inputs))
}

fn int(graph: &mut Graph, bits: u32, v: i64) -> Canonical {
    Canonical::Replace(graph.int_const(bits, v))
}

// =============================================================================
// Integer Arithmetic
// =============================================================================

fn int_op(graph: &mut Graph, node: NodeId, op: ArithOp) -> Canonical {
    let bits = int_bits(graph, node);
    let inputs = graph.inputs(node).to_vec();
    let x = inputs[0];

    if op == ArithOp::Neg {
        if let Some(c) = int_value(graph, x) {
            return int(graph, bits, wrap(c.wrapping_neg(), bits));
        }
        return match graph.op(x).clone() {
            Operator::IntOp(ArithOp::Neg) => Canonical::Replace(graph.inputs(x)[0]),
            Operator::IntOp(ArithOp::Sub) => {
                let (a, b) = (graph.inputs(x)[0], graph.inputs(x)[1]);
                value(graph, Operator::IntOp(ArithOp::Sub), &[b, a])
            }
            _ => Canonical::Keep,
        };
    }

    let y = inputs[1];
    if let (Some(a), Some(b)) = (int_value(graph, x), int_value(graph, y)) {
        // Division by zero stays in the graph.
        return match fold::int_arith(op, bits, a, b) {
            Some(v) => int(graph, bits, v),
            None => Canonical::Keep,
        };
    }
    if normalize_operands(graph, node) {
        return Canonical::Changed;
    }

    let cy = int_value(graph, y);
    match op {
        ArithOp::Add => {
            if cy == Some(0) {
                return Canonical::Replace(x);
            }
            if let (Some((a, c1)), Some(c2)) = (add_constant(graph, x), cy) {
                let c = graph.int_const(bits, wrap(c1.wrapping_add(c2), bits));
                return value(graph, Operator::IntOp(ArithOp::Add), &[a, c]);
            }
            // (a - b) + b
            if is_op(graph, x, Operator::IntOp(ArithOp::Sub)) && graph.inputs(x)[1] == y {
                return Canonical::Replace(graph.inputs(x)[0]);
            }
            if is_op(graph, y, Operator::IntOp(ArithOp::Sub)) && graph.inputs(y)[1] == x {
                return Canonical::Replace(graph.inputs(y)[0]);
            }
            if is_op(graph, y, Operator::IntOp(ArithOp::Neg)) {
                let b = graph.inputs(y)[0];
                return value(graph, Operator::IntOp(ArithOp::Sub), &[x, b]);
            }
        }
        ArithOp::Sub => {
            if x == y {
                return int(graph, bits, 0);
            }
            if let Some(c) = cy {
                if c == 0 {
                    return Canonical::Replace(x);
                }
                let negated = graph.int_const(bits, wrap(c.wrapping_neg(), bits));
                return value(graph, Operator::IntOp(ArithOp::Add), &[x, negated]);
            }
            if int_value(graph, x) == Some(0) {
                return value(graph, Operator::IntOp(ArithOp::Neg), &[y]);
            }
            if is_op(graph, x, Operator::IntOp(ArithOp::Add)) {
                let (a, b) = (graph.inputs(x)[0], graph.inputs(x)[1]);
                if b == y {
                    return Canonical::Replace(a);
                }
                if a == y {
                    return Canonical::Replace(b);
                }
            }
        }
        ArithOp::Mul => match cy {
            Some(0) => return int(graph, bits, 0),
            Some(1) => return Canonical::Replace(x),
            Some(c) if c == wrap(-1, bits) => return value(graph, Operator::IntOp(ArithOp::Neg), &[x]),
            Some(c) if c > 1 && (c as u64).is_power_of_two() => {
                let shift = graph.int_const(32, c.trailing_zeros() as i64);
                return value(graph, Operator::Bitwise(BitwiseOp::Shl), &[x, shift]);
            }
            _ => {}
        },
        ArithOp::Div => match cy {
            Some(1) => return Canonical::Replace(x),
            Some(c) if c == wrap(-1, bits) => return value(graph, Operator::IntOp(ArithOp::Neg), &[x]),
            _ => {}
        },
        ArithOp::UnsignedDiv => match cy.map(|c| c as u64 & width_mask(bits)) {
            Some(1) => return Canonical::Replace(x),
            Some(d) if d.is_power_of_two() => {
                let shift = graph.int_const(32, d.trailing_zeros() as i64);
                return value(graph, Operator::Bitwise(BitwiseOp::UShr), &[x, shift]);
            }
            _ => {}
        },
        ArithOp::Neg => {}
    }
    Canonical::Keep
}

// =============================================================================
// Bitwise
// =============================================================================

fn bitwise(graph: &mut Graph, node: NodeId, op: BitwiseOp) -> Canonical {
    let bits = int_bits(graph, node);
    let inputs = graph.inputs(node).to_vec();
    let x = inputs[0];

    if op == BitwiseOp::Not {
        if let Some(c) = int_value(graph, x) {
            return int(graph, bits, fold::bitwise(op, bits, c, 0));
        }
        if is_op(graph, x, Operator::Bitwise(BitwiseOp::Not)) {
            return Canonical::Replace(graph.inputs(x)[0]);
        }
        return Canonical::Keep;
    }

    let y = inputs[1];
    if let (Some(a), Some(b)) = (int_value(graph, x), int_value(graph, y)) {
        return int(graph, bits, fold::bitwise(op, bits, a, b));
    }
    if op.is_shift() {
        return shift(graph, node, op, bits, x, y);
    }
    if normalize_operands(graph, node) {
        return Canonical::Changed;
    }

    let cy = int_value(graph, y);
    let not_of = |g: &Graph, n: NodeId| is_op(g, n, Operator::Bitwise(BitwiseOp::Not)).then(|| g.inputs(n)[0]);
    let complementary = not_of(graph, x) == Some(y) || not_of(graph, y) == Some(x);

    match op {
        BitwiseOp::And => {
            if cy == Some(0) || complementary {
                return int(graph, bits, 0);
            }
            if all_ones(graph, y, bits) || x == y {
                return Canonical::Replace(x);
            }
            if let Some(mask) = cy {
                let may = graph.stamp(x).as_integer().map_or(width_mask(bits), |s| s.may_be_set());
                if may & !(mask as u64) & width_mask(bits) == 0 {
                    return Canonical::Replace(x);
                }
                if may & (mask as u64) & width_mask(bits) == 0 {
                    return int(graph, bits, 0);
                }
                if let Some(rewritten) = shifted_mask(graph, bits, x, mask) {
                    return Canonical::Replace(rewritten);
                }
            }
            // ~a & ~b  ->  ~(a | b)
            if let (Some(a), Some(b)) = (not_of(graph, x), not_of(graph, y)) {
                let or = graph.unique_value(Operator::Bitwise(BitwiseOp::Or), &[a, b]);
                return value(graph, Operator::Bitwise(BitwiseOp::Not), &[or]);
            }
        }
        BitwiseOp::Or => {
            if cy == Some(0) || x == y {
                return Canonical::Replace(x);
            }
            if all_ones(graph, y, bits) || complementary {
                return int(graph, bits, -1);
            }
            if let (Some(a), Some(b)) = (not_of(graph, x), not_of(graph, y)) {
                let and = graph.unique_value(Operator::Bitwise(BitwiseOp::And), &[a, b]);
                return value(graph, Operator::Bitwise(BitwiseOp::Not), &[and]);
            }
        }
        BitwiseOp::Xor => {
            if x == y {
                return int(graph, bits, 0);
            }
            if cy == Some(0) {
                return Canonical::Replace(x);
            }
            if all_ones(graph, y, bits) {
                return value(graph, Operator::Bitwise(BitwiseOp::Not), &[x]);
            }
            if complementary {
                return int(graph, bits, -1);
            }
        }
        _ => {}
    }
    Canonical::Keep
}

/// `(a << k) & mask` as `(a & (mask >>> k)) << k`.
fn shifted_mask(graph: &mut Graph, bits: u32, x: NodeId, mask: i64) -> Option<NodeId> {
    if !is_op(graph, x, Operator::Bitwise(BitwiseOp::Shl)) {
        return None;
    }
    let (a, amount) = (graph.inputs(x)[0], graph.inputs(x)[1]);
    let k = int_value(graph, amount)?;
    if k <= 0 || k >= bits as i64 {
        return None;
    }
    let narrowed = sign_extend(((mask as u64) & width_mask(bits)) >> k, bits);
    let m = graph.int_const(bits, narrowed);
    let and = graph.unique_value(Operator::Bitwise(BitwiseOp::And), &[a, m]);
    Some(graph.unique_value(Operator::Bitwise(BitwiseOp::Shl), &[and, amount]))
}

fn shift(graph: &mut Graph, node: NodeId, op: BitwiseOp, bits: u32, x: NodeId, y: NodeId) -> Canonical {
    let Some(amount) = int_value(graph, y) else {
        return Canonical::Keep;
    };
    let masked = amount & fold::shift_mask(bits) as i64;
    if masked == 0 {
        return Canonical::Replace(x);
    }
    if masked != amount || int_bits(graph, y) != 32 {
        let canonical = graph.int_const(32, masked);
        graph.replace_input(node, 1, canonical);
        return Canonical::Changed;
    }
    // (a << c1) << c2  ->  a << (c1 + c2)
    if is_op(graph, x, Operator::Bitwise(op)) && op != BitwiseOp::Shr {
        let (a, inner) = (graph.inputs(x)[0], graph.inputs(x)[1]);
        if let Some(c1) = int_value(graph, inner) {
            let total = (c1 & fold::shift_mask(bits) as i64) + masked;
            if total < bits as i64 && total <= fold::shift_mask(bits) as i64 {
                let s = graph.int_const(32, total);
                return value(graph, Operator::Bitwise(op), &[a, s]);
            }
            if bits >= 32 {
                return int(graph, bits, 0);
            }
        }
    }
    Canonical::Keep
}

// =============================================================================
// Floats and reinterpretation
// =============================================================================

fn float_const(graph: &Graph, node: NodeId) -> Option<(u32, u64)> {
    match graph[node].as_constant()? {
        Constant::Float { bits, raw } => Some((bits, raw)),
        _ => None,
    }
}

fn float_op(graph: &mut Graph, node: NodeId, op: ArithOp) -> Canonical {
    let inputs = graph.inputs(node).to_vec();
    let x = inputs[0];
    if op == ArithOp::Neg {
        if let Some((bits, raw)) = float_const(graph, x) {
            let raw = fold::float_arith(op, bits, raw, 0);
            return Canonical::Replace(graph.constant(Constant::Float { bits, raw }));
        }
        if is_op(graph, x, Operator::FloatOp(ArithOp::Neg)) {
            return Canonical::Replace(graph.inputs(x)[0]);
        }
        return Canonical::Keep;
    }
    match (float_const(graph, x), float_const(graph, inputs[1])) {
        (Some((bits, a)), Some((_, b))) => {
            let raw = fold::float_arith(op, bits, a, b);
            Canonical::Replace(graph.constant(Constant::Float { bits, raw }))
        }
        _ => Canonical::Keep,
    }
}

fn reinterpret(graph: &mut Graph, node: NodeId, kind: ReinterpretKind) -> Canonical {
    let x = graph.inputs(node)[0];
    let inverse = match kind {
        ReinterpretKind::FloatToInt => ReinterpretKind::IntToFloat,
        ReinterpretKind::IntToFloat => ReinterpretKind::FloatToInt,
    };
    if is_op(graph, x, Operator::Reinterpret(inverse)) {
        return Canonical::Replace(graph.inputs(x)[0]);
    }
    let folded = match (kind, graph[x].as_constant()) {
        (ReinterpretKind::FloatToInt, Some(Constant::Float { bits, raw })) => Constant::Int {
            bits,
            value: sign_extend(raw, bits),
        },
        (ReinterpretKind::IntToFloat, Some(Constant::Int { bits, value })) => Constant::Float {
            bits,
            raw: value as u64 & width_mask(bits),
        },
        _ => return Canonical::Keep,
    };
    Canonical::Replace(graph.constant(folded))
}
