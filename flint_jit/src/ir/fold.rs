//! Concrete evaluation of pure operators.
//!
//! Constant folding and the interpreter share these functions, so a folded
//! graph computes bit-for-bit what the unfolded one does. Integers are
//! passed sign-extended from their width; floats as raw bits.

use super::operators::{ArithOp, BitwiseOp, CmpOp};
use super::stamp::{decode_float, sign_extend, width_mask, wrap, wrap_wide};

/// Integer arithmetic; `None` for division by zero.
pub fn int_arith(op: ArithOp, bits: u32, x: i64, y: i64) -> Option<i64> {
    Some(match op {
        ArithOp::Add => wrap(x.wrapping_add(y), bits),
        ArithOp::Sub => wrap(x.wrapping_sub(y), bits),
        ArithOp::Mul => wrap(x.wrapping_mul(y), bits),
        ArithOp::Div if y == 0 => return None,
        ArithOp::Div => wrap_wide(x as i128 / y as i128, bits),
        ArithOp::UnsignedDiv => {
            let m = width_mask(bits);
            match (y as u64) & m {
                0 => return None,
                d => sign_extend(((x as u64) & m) / d, bits),
            }
        }
        ArithOp::Neg => wrap(x.wrapping_neg(), bits),
    })
}

/// Mask applied to shift amounts.
pub fn shift_mask(bits: u32) -> u32 {
    (bits.max(32) - 1).min(63)
}

pub fn bitwise(op: BitwiseOp, bits: u32, x: i64, y: i64) -> i64 {
    let s = (y as u32) & shift_mask(bits);
    match op {
        BitwiseOp::And => x & y,
        BitwiseOp::Or => x | y,
        BitwiseOp::Xor => x ^ y,
        BitwiseOp::Not => wrap(!x, bits),
        BitwiseOp::Shl => wrap(x.wrapping_shl(s), bits),
        BitwiseOp::Shr => x >> s,
        BitwiseOp::UShr => sign_extend(((x as u64) & width_mask(bits)) >> s, bits),
    }
}

pub fn int_compare(op: CmpOp, bits: u32, x: i64, y: i64) -> bool {
    match op {
        CmpOp::Eq => x == y,
        CmpOp::Lt => x < y,
        CmpOp::Below => ((x as u64) & width_mask(bits)) < ((y as u64) & width_mask(bits)),
    }
}

fn encode(bits: u32, value: f64) -> u64 {
    if bits == 32 {
        (value as f32).to_bits() as u64
    } else {
        value.to_bits()
    }
}

/// Float arithmetic on raw bits, computed at the operand width.
pub fn float_arith(op: ArithOp, bits: u32, x: u64, y: u64) -> u64 {
    if op == ArithOp::Neg {
        let sign = if bits == 32 { 1u64 << 31 } else { 1u64 << 63 };
        return x ^ sign;
    }
    if bits == 32 {
        let (a, b) = (f32::from_bits(x as u32), f32::from_bits(y as u32));
        let r = match op {
            ArithOp::Add => a + b,
            ArithOp::Sub => a - b,
            ArithOp::Mul => a * b,
            _ => a / b,
        };
        r.to_bits() as u64
    } else {
        let (a, b) = (f64::from_bits(x), f64::from_bits(y));
        let r = match op {
            ArithOp::Add => a + b,
            ArithOp::Sub => a - b,
            ArithOp::Mul => a * b,
            _ => a / b,
        };
        encode(64, r)
    }
}

/// Ordered comparison; any NaN operand gives `false`.
pub fn float_compare(op: CmpOp, bits: u32, x: u64, y: u64) -> bool {
    let (a, b) = (decode_float(bits, x), decode_float(bits, y));
    match op {
        CmpOp::Eq => a == b,
        CmpOp::Lt | CmpOp::Below => a < b,
    }
}
