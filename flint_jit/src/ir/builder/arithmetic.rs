use super::GraphBuilder;
use crate::ir::condition::Condition;
use crate::ir::node::NodeId;
use crate::ir::operators::{ArithOp, BitwiseOp, CmpOp, Constant, Operator, ReinterpretKind};
use crate::ir::stamp::{Stamp, TypeRef};

/// Builder trait for constants, arithmetic and logic.
pub trait ArithmeticBuilder {
    // Constants
    fn const_int(&mut self, value: i32) -> NodeId;
    fn const_long(&mut self, value: i64) -> NodeId;
    fn const_float(&mut self, value: f32) -> NodeId;
    fn const_double(&mut self, value: f64) -> NodeId;
    /// Float constant from raw bits, preserving NaN payloads.
    fn const_float_bits(&mut self, bits: u32, raw: u64) -> NodeId;
    fn const_null(&mut self) -> NodeId;
    fn const_bool(&mut self, value: bool) -> NodeId;

    // Integer Arithmetic
    fn int_add(&mut self, lhs: NodeId, rhs: NodeId) -> NodeId;
    fn int_sub(&mut self, lhs: NodeId, rhs: NodeId) -> NodeId;
    fn int_mul(&mut self, lhs: NodeId, rhs: NodeId) -> NodeId;
    /// Division by a non-zero constant.
    fn int_div(&mut self, lhs: NodeId, divisor: i64) -> NodeId;
    fn int_neg(&mut self, value: NodeId) -> NodeId;

    // Bitwise
    fn and(&mut self, lhs: NodeId, rhs: NodeId) -> NodeId;
    fn or(&mut self, lhs: NodeId, rhs: NodeId) -> NodeId;
    fn xor(&mut self, lhs: NodeId, rhs: NodeId) -> NodeId;
    fn not(&mut self, value: NodeId) -> NodeId;
    fn shl(&mut self, value: NodeId, shift: NodeId) -> NodeId;
    fn shr(&mut self, value: NodeId, shift: NodeId) -> NodeId;
    fn ushr(&mut self, value: NodeId, shift: NodeId) -> NodeId;

    // Float Arithmetic
    fn float_add(&mut self, lhs: NodeId, rhs: NodeId) -> NodeId;
    fn float_sub(&mut self, lhs: NodeId, rhs: NodeId) -> NodeId;
    fn float_mul(&mut self, lhs: NodeId, rhs: NodeId) -> NodeId;
    fn float_div(&mut self, lhs: NodeId, rhs: NodeId) -> NodeId;
    fn float_neg(&mut self, value: NodeId) -> NodeId;
    fn float_to_raw_bits(&mut self, value: NodeId) -> NodeId;
    fn raw_bits_to_float(&mut self, value: NodeId) -> NodeId;

    // Comparisons and logic
    /// `lhs cond rhs` in canonical form.
    fn compare(&mut self, cond: Condition, lhs: NodeId, rhs: NodeId) -> NodeId;
    fn int_eq(&mut self, lhs: NodeId, rhs: NodeId) -> NodeId;
    fn int_ne(&mut self, lhs: NodeId, rhs: NodeId) -> NodeId;
    fn int_lt(&mut self, lhs: NodeId, rhs: NodeId) -> NodeId;
    fn int_le(&mut self, lhs: NodeId, rhs: NodeId) -> NodeId;
    fn int_gt(&mut self, lhs: NodeId, rhs: NodeId) -> NodeId;
    fn int_ge(&mut self, lhs: NodeId, rhs: NodeId) -> NodeId;
    fn below(&mut self, lhs: NodeId, rhs: NodeId) -> NodeId;
    /// Ordered float equality; false if either side is NaN.
    fn float_eq(&mut self, lhs: NodeId, rhs: NodeId) -> NodeId;
    /// Ordered float less-than; false if either side is NaN.
    fn float_lt(&mut self, lhs: NodeId, rhs: NodeId) -> NodeId;
    fn is_null(&mut self, value: NodeId) -> NodeId;
    fn instance_of(&mut self, value: NodeId, ty: TypeRef) -> NodeId;
    fn logic_not(&mut self, condition: NodeId) -> NodeId;
    /// `condition ? if_true : if_false`
    fn conditional(&mut self, condition: NodeId, if_true: NodeId, if_false: NodeId) -> NodeId;
}

impl ArithmeticBuilder for GraphBuilder {
    fn const_int(&mut self, value: i32) -> NodeId {
        self.graph.constant(Constant::int(value))
    }

    fn const_long(&mut self, value: i64) -> NodeId {
        self.graph.constant(Constant::long(value))
    }

    fn const_float(&mut self, value: f32) -> NodeId {
        self.const_float_bits(32, value.to_bits() as u64)
    }

    fn const_double(&mut self, value: f64) -> NodeId {
        self.const_float_bits(64, value.to_bits())
    }

    fn const_float_bits(&mut self, bits: u32, raw: u64) -> NodeId {
        self.graph.constant(Constant::Float { bits, raw })
    }

    fn const_null(&mut self) -> NodeId {
        self.graph.null_const()
    }

    fn const_bool(&mut self, value: bool) -> NodeId {
        self.graph.logic_const(value)
    }

    fn int_add(&mut self, lhs: NodeId, rhs: NodeId) -> NodeId {
        self.value(Operator::IntOp(ArithOp::Add), &[lhs, rhs])
    }

    fn int_sub(&mut self, lhs: NodeId, rhs: NodeId) -> NodeId {
        self.value(Operator::IntOp(ArithOp::Sub), &[lhs, rhs])
    }

    fn int_mul(&mut self, lhs: NodeId, rhs: NodeId) -> NodeId {
        self.value(Operator::IntOp(ArithOp::Mul), &[lhs, rhs])
    }

    fn int_div(&mut self, lhs: NodeId, divisor: i64) -> NodeId {
        debug_assert_ne!(divisor, 0, "division by constant zero");
        let bits = self.graph.stamp(lhs).as_integer().map_or(32, |s| s.bits());
        let d = self.graph.int_const(bits, divisor);
        self.value(Operator::IntOp(ArithOp::Div), &[lhs, d])
    }

    fn int_neg(&mut self, value: NodeId) -> NodeId {
        self.value(Operator::IntOp(ArithOp::Neg), &[value])
    }

    fn and(&mut self, lhs: NodeId, rhs: NodeId) -> NodeId {
        self.value(Operator::Bitwise(BitwiseOp::And), &[lhs, rhs])
    }

    fn or(&mut self, lhs: NodeId, rhs: NodeId) -> NodeId {
        self.value(Operator::Bitwise(BitwiseOp::Or), &[lhs, rhs])
    }

    fn xor(&mut self, lhs: NodeId, rhs: NodeId) -> NodeId {
        self.value(Operator::Bitwise(BitwiseOp::Xor), &[lhs, rhs])
    }

    fn not(&mut self, value: NodeId) -> NodeId {
        self.value(Operator::Bitwise(BitwiseOp::Not), &[value])
    }

    fn shl(&mut self, value: NodeId, shift: NodeId) -> NodeId {
        self.value(Operator::Bitwise(BitwiseOp::Shl), &[value, shift])
    }

    fn shr(&mut self, value: NodeId, shift: NodeId) -> NodeId {
        self.value(Operator::Bitwise(BitwiseOp::Shr), &[value, shift])
    }

    fn ushr(&mut self, value: NodeId, shift: NodeId) -> NodeId {
        self.value(Operator::Bitwise(BitwiseOp::UShr), &[value, shift])
    }

    fn float_add(&mut self, lhs: NodeId, rhs: NodeId) -> NodeId {
        self.value(Operator::FloatOp(ArithOp::Add), &[lhs, rhs])
    }

    fn float_sub(&mut self, lhs: NodeId, rhs: NodeId) -> NodeId {
        self.value(Operator::FloatOp(ArithOp::Sub), &[lhs, rhs])
    }

    fn float_mul(&mut self, lhs: NodeId, rhs: NodeId) -> NodeId {
        self.value(Operator::FloatOp(ArithOp::Mul), &[lhs, rhs])
    }

    fn float_div(&mut self, lhs: NodeId, rhs: NodeId) -> NodeId {
        self.value(Operator::FloatOp(ArithOp::Div), &[lhs, rhs])
    }

    fn float_neg(&mut self, value: NodeId) -> NodeId {
        self.value(Operator::FloatOp(ArithOp::Neg), &[value])
    }

    fn float_to_raw_bits(&mut self, value: NodeId) -> NodeId {
        self.value(Operator::Reinterpret(ReinterpretKind::FloatToInt), &[value])
    }

    fn raw_bits_to_float(&mut self, value: NodeId) -> NodeId {
        self.value(Operator::Reinterpret(ReinterpretKind::IntToFloat), &[value])
    }

    fn compare(&mut self, cond: Condition, lhs: NodeId, rhs: NodeId) -> NodeId {
        let (op, swap, negate) = cond.canonical();
        let (a, b) = if swap { (rhs, lhs) } else { (lhs, rhs) };
        let cmp = self.value(Operator::IntCmp(op), &[a, b]);
        if negate {
            self.logic_not(cmp)
        } else {
            cmp
        }
    }

    fn int_eq(&mut self, lhs: NodeId, rhs: NodeId) -> NodeId {
        self.compare(Condition::Eq, lhs, rhs)
    }

    fn int_ne(&mut self, lhs: NodeId, rhs: NodeId) -> NodeId {
        self.compare(Condition::Ne, lhs, rhs)
    }

    fn int_lt(&mut self, lhs: NodeId, rhs: NodeId) -> NodeId {
        self.compare(Condition::Lt, lhs, rhs)
    }

    fn int_le(&mut self, lhs: NodeId, rhs: NodeId) -> NodeId {
        self.compare(Condition::Le, lhs, rhs)
    }

    fn int_gt(&mut self, lhs: NodeId, rhs: NodeId) -> NodeId {
        self.compare(Condition::Gt, lhs, rhs)
    }

    fn int_ge(&mut self, lhs: NodeId, rhs: NodeId) -> NodeId {
        self.compare(Condition::Ge, lhs, rhs)
    }

    fn below(&mut self, lhs: NodeId, rhs: NodeId) -> NodeId {
        self.compare(Condition::Bt, lhs, rhs)
    }

    fn float_eq(&mut self, lhs: NodeId, rhs: NodeId) -> NodeId {
        self.value(Operator::FloatCmp(CmpOp::Eq), &[lhs, rhs])
    }

    fn float_lt(&mut self, lhs: NodeId, rhs: NodeId) -> NodeId {
        self.value(Operator::FloatCmp(CmpOp::Lt), &[lhs, rhs])
    }

    fn is_null(&mut self, value: NodeId) -> NodeId {
        self.value(Operator::IsNull, &[value])
    }

    fn instance_of(&mut self, value: NodeId, ty: TypeRef) -> NodeId {
        self.value(Operator::InstanceOf(ty), &[value])
    }

    fn logic_not(&mut self, condition: NodeId) -> NodeId {
        self.value(Operator::LogicNot, &[condition])
    }

    fn conditional(&mut self, condition: NodeId, if_true: NodeId, if_false: NodeId) -> NodeId {
        self.value(Operator::Conditional, &[condition, if_true, if_false])
    }
}

impl GraphBuilder {
    /// Stamp of an existing node, for building typed phis.
    pub fn stamp_of(&self, node: NodeId) -> Stamp {
        self.graph.stamp(node).clone()
    }
}
