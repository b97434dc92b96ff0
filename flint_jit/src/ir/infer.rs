//! Stamp inference from operator and input stamps.
//!
//! Used when nodes are built and again by the canonicalizer, which only
//! ever replaces a stamp by its meet with the inferred one.

use super::graph::Graph;
use super::node::NodeId;
use super::operators::{ArithOp, BitwiseOp, Operator, ReinterpretKind};
use super::stamp::{IntegerStamp, Stamp};

/// Stamp implied by `op` applied to `inputs`, or `None` if the operator's
/// stamp is not derived from its inputs.
pub fn infer_stamp(graph: &Graph, op: &Operator, inputs: &[NodeId]) -> Option<Stamp> {
    let stamp = |i: usize| graph.stamp(inputs[i]);
    let stamp = match op {
        Operator::Const(c) => Stamp::for_constant(c),
        Operator::IntOp(arith) => {
            let Some(x) = stamp(0).as_integer() else {
                return empty_or(stamp(0));
            };
            if arith.is_unary() {
                Stamp::Integer(x.neg())
            } else {
                let Some(y) = stamp(1).as_integer() else {
                    return empty_or(stamp(1));
                };
                Stamp::Integer(int_arith(*arith, x, y))
            }
        }
        Operator::Bitwise(bitwise) => {
            let Some(x) = stamp(0).as_integer() else {
                return empty_or(stamp(0));
            };
            if bitwise.is_unary() {
                Stamp::Integer(x.not())
            } else {
                let Some(y) = stamp(1).as_integer() else {
                    return empty_or(stamp(1));
                };
                Stamp::Integer(int_bitwise(*bitwise, x, y))
            }
        }
        Operator::FloatOp(arith) => {
            let Some(x) = stamp(0).as_float() else {
                return empty_or(stamp(0));
            };
            match arith {
                ArithOp::Neg => Stamp::Float(x.neg()),
                _ => Stamp::float(x.bits()),
            }
        }
        Operator::Reinterpret(ReinterpretKind::FloatToInt) => match stamp(0) {
            Stamp::Float(f) => Stamp::int(f.bits()),
            other => return empty_or(other),
        },
        Operator::Reinterpret(ReinterpretKind::IntToFloat) => match stamp(0) {
            Stamp::Integer(i) => Stamp::float(i.bits()),
            other => return empty_or(other),
        },
        Operator::ArrayLength => Stamp::positive_int(),
        Operator::Conditional => stamp(1).join(stamp(2)),
        Operator::Phi => inputs[1..]
            .iter()
            .fold(Stamp::Empty, |acc, &v| acc.join(graph.stamp(v))),
        Operator::LogicConst(_)
        | Operator::IntCmp(_)
        | Operator::FloatCmp(_)
        | Operator::IsNull
        | Operator::InstanceOf(_)
        | Operator::LogicNot
        | Operator::Guard(_) => Stamp::Void,
        Operator::Pi
        | Operator::Parameter(_)
        | Operator::Control(_)
        | Operator::Memory(..)
        | Operator::Invoke(_) => return None,
    };
    Some(stamp)
}

/// Stamp of a value node recomputed from its current inputs.
pub fn infer_node(graph: &Graph, id: NodeId) -> Option<Stamp> {
    let node = &graph[id];
    match node.op {
        Operator::Pi => Some(graph.stamp(node.input(0)).meet(&node.stamp)),
        _ => infer_stamp(graph, &node.op, node.inputs()),
    }
}

fn empty_or(stamp: &Stamp) -> Option<Stamp> {
    stamp.is_empty().then_some(Stamp::Empty)
}

fn int_arith(op: ArithOp, x: &IntegerStamp, y: &IntegerStamp) -> IntegerStamp {
    match op {
        ArithOp::Add => x.add(y),
        ArithOp::Sub => x.sub(y),
        ArithOp::Mul => x.mul(y),
        ArithOp::Div => x.div(y),
        ArithOp::UnsignedDiv => x.unsigned_div(y),
        ArithOp::Neg => x.neg(),
    }
}

fn int_bitwise(op: BitwiseOp, x: &IntegerStamp, y: &IntegerStamp) -> IntegerStamp {
    match op {
        BitwiseOp::And => x.and(y),
        BitwiseOp::Or => x.or(y),
        BitwiseOp::Xor => x.xor(y),
        BitwiseOp::Not => x.not(),
        BitwiseOp::Shl => x.shl(y),
        BitwiseOp::Shr => x.shr(y),
        BitwiseOp::UShr => x.ushr(y),
    }
}
