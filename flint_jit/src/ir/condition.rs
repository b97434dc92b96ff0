//! Integer comparison conditions and their logic.
//!
//! Graph nodes only use the three canonical comparisons ([`CmpOp`]); the
//! full [`Condition`] set is used by builders, loop analysis, and
//! conditional elimination to reason about relations between operands.
//!
//! Each condition is the set of orderings it accepts: `LT` accepts
//! "less", `LE` accepts "less" and "equal", and so on. Signed and unsigned
//! conditions order values differently, but agree on equality, so `EQ` and
//! `NE` belong to both families. Implication, `join` (OR) and `meet` (AND)
//! are set operations on these orderings.

use crate::ir::operators::CmpOp;
use crate::ir::stamp::{max_value, min_value, width_mask, IntegerStamp, Stamp};

/// A comparison between two integers `x` and `y`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Condition {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    /// Unsigned below.
    Bt,
    /// Unsigned below or equal.
    Be,
    /// Unsigned above.
    At,
    /// Unsigned above or equal.
    Ae,
}

const LESS: u8 = 0b100;
const EQUAL: u8 = 0b010;
const GREATER: u8 = 0b001;

#[derive(Clone, Copy, PartialEq, Eq)]
enum Family {
    Signed,
    Unsigned,
    Both,
}

impl Condition {
    pub const ALL: [Condition; 10] = [
        Condition::Eq,
        Condition::Ne,
        Condition::Lt,
        Condition::Le,
        Condition::Gt,
        Condition::Ge,
        Condition::Bt,
        Condition::Be,
        Condition::At,
        Condition::Ae,
    ];

    fn orderings(self) -> u8 {
        match self {
            Condition::Eq => EQUAL,
            Condition::Ne => LESS | GREATER,
            Condition::Lt | Condition::Bt => LESS,
            Condition::Le | Condition::Be => LESS | EQUAL,
            Condition::Gt | Condition::At => GREATER,
            Condition::Ge | Condition::Ae => GREATER | EQUAL,
        }
    }

    fn family(self) -> Family {
        match self {
            Condition::Eq | Condition::Ne => Family::Both,
            Condition::Lt | Condition::Le | Condition::Gt | Condition::Ge => Family::Signed,
            _ => Family::Unsigned,
        }
    }

    fn from_orderings(bits: u8, unsigned: bool) -> Option<Condition> {
        Some(match (bits, unsigned) {
            (EQUAL, _) => Condition::Eq,
            (0b101, _) => Condition::Ne,
            (LESS, false) => Condition::Lt,
            (0b110, false) => Condition::Le,
            (GREATER, false) => Condition::Gt,
            (0b011, false) => Condition::Ge,
            (LESS, true) => Condition::Bt,
            (0b110, true) => Condition::Be,
            (GREATER, true) => Condition::At,
            (0b011, true) => Condition::Ae,
            _ => return None,
        })
    }

    /// Family shared by both conditions, if any.
    fn common_family(self, other: Condition) -> Option<bool> {
        match (self.family(), other.family()) {
            (Family::Both, Family::Both) | (Family::Signed, Family::Both) | (Family::Both, Family::Signed) => Some(false),
            (Family::Signed, Family::Signed) => Some(false),
            (Family::Unsigned, Family::Unsigned) | (Family::Unsigned, Family::Both) | (Family::Both, Family::Unsigned) => {
                Some(true)
            }
            _ => None,
        }
    }

    pub fn is_unsigned(self) -> bool {
        self.family() == Family::Unsigned
    }

    /// `!(x self y)` as a condition on `(x, y)`.
    pub fn negate(self) -> Condition {
        match self {
            Condition::Eq => Condition::Ne,
            Condition::Ne => Condition::Eq,
            Condition::Lt => Condition::Ge,
            Condition::Le => Condition::Gt,
            Condition::Gt => Condition::Le,
            Condition::Ge => Condition::Lt,
            Condition::Bt => Condition::Ae,
            Condition::Be => Condition::At,
            Condition::At => Condition::Be,
            Condition::Ae => Condition::Bt,
        }
    }

    /// The condition `c` such that `x self y` is `y c x`.
    pub fn mirror(self) -> Condition {
        match self {
            Condition::Eq => Condition::Eq,
            Condition::Ne => Condition::Ne,
            Condition::Lt => Condition::Gt,
            Condition::Le => Condition::Ge,
            Condition::Gt => Condition::Lt,
            Condition::Ge => Condition::Le,
            Condition::Bt => Condition::At,
            Condition::Be => Condition::Ae,
            Condition::At => Condition::Bt,
            Condition::Ae => Condition::Be,
        }
    }

    /// Whenever `x self y` holds, `x other y` holds too.
    pub fn implies(self, other: Condition) -> bool {
        if self == other {
            return true;
        }
        let (mine, theirs) = (self.orderings(), other.orderings());
        match self.common_family(other) {
            Some(_) => mine & !theirs == 0,
            // Across families only equality is comparable.
            None => mine == EQUAL && theirs & EQUAL != 0,
        }
    }

    /// Condition equivalent to `(x self y) || (x other y)`; `None` if not
    /// expressible (including the always-true case).
    pub fn join(self, other: Condition) -> Option<Condition> {
        let unsigned = self.common_family(other)?;
        Self::from_orderings(self.orderings() | other.orderings(), unsigned)
    }

    /// Condition equivalent to `(x self y) && (x other y)`; `None` if not
    /// expressible (including the always-false case).
    pub fn meet(self, other: Condition) -> Option<Condition> {
        match self.common_family(other) {
            Some(unsigned) => Self::from_orderings(self.orderings() & other.orderings(), unsigned),
            None if self.implies(other) => Some(self),
            None if other.implies(self) => Some(other),
            None => None,
        }
    }

    /// Evaluate on two `bits`-wide values.
    pub fn fold(self, x: i64, y: i64, bits: u32) -> bool {
        let m = width_mask(bits);
        let (ux, uy) = (x as u64 & m, y as u64 & m);
        match self {
            Condition::Eq => x == y,
            Condition::Ne => x != y,
            Condition::Lt => x < y,
            Condition::Le => x <= y,
            Condition::Gt => x > y,
            Condition::Ge => x >= y,
            Condition::Bt => ux < uy,
            Condition::Be => ux <= uy,
            Condition::At => ux > uy,
            Condition::Ae => ux >= uy,
        }
    }

    /// Canonical node form: `x self y` is `[!](a op b)` where `(a, b)` is
    /// `(x, y)`, or `(y, x)` when the first flag is set. The second flag
    /// requests a negation.
    pub fn canonical(self) -> (CmpOp, bool, bool) {
        match self {
            Condition::Eq => (CmpOp::Eq, false, false),
            Condition::Ne => (CmpOp::Eq, false, true),
            Condition::Lt => (CmpOp::Lt, false, false),
            Condition::Le => (CmpOp::Lt, true, true),
            Condition::Gt => (CmpOp::Lt, true, false),
            Condition::Ge => (CmpOp::Lt, false, true),
            Condition::Bt => (CmpOp::Below, false, false),
            Condition::Be => (CmpOp::Below, true, true),
            Condition::At => (CmpOp::Below, true, false),
            Condition::Ae => (CmpOp::Below, false, true),
        }
    }

    // -------------------------------------------------------------------------
    // Stamp reasoning
    // -------------------------------------------------------------------------

    /// Decide `x self y` from the operand stamps alone.
    pub fn fold_stamps(self, x: &IntegerStamp, y: &IntegerStamp) -> Option<bool> {
        match self {
            Condition::Eq => {
                if let (Some(a), Some(b)) = (x.as_constant(), y.as_constant()) {
                    Some(a == b)
                } else if x.meet(y).is_none() {
                    Some(false)
                } else {
                    None
                }
            }
            Condition::Lt => {
                if x.upper() < y.lower() {
                    Some(true)
                } else if x.lower() >= y.upper() {
                    Some(false)
                } else {
                    None
                }
            }
            Condition::Bt => {
                let (xl, xh) = x.unsigned_bounds();
                let (yl, yh) = y.unsigned_bounds();
                if xh < yl {
                    Some(true)
                } else if xl >= yh {
                    Some(false)
                } else {
                    None
                }
            }
            Condition::Ne | Condition::Ge | Condition::Ae => self.negate().fold_stamps(x, y).map(|b| !b),
            Condition::Gt | Condition::At => self.mirror().fold_stamps(y, x),
            Condition::Le | Condition::Be => self.negate().mirror().fold_stamps(y, x).map(|b| !b),
        }
    }

    /// Stamp of `x` on paths where `x self y` holds.
    pub fn refine_x(self, x: &IntegerStamp, y: &IntegerStamp) -> Stamp {
        let bits = x.bits();
        let narrowed = match self {
            Condition::Eq => x.meet(y),
            Condition::Ne => match y.as_constant() {
                Some(c) if c == x.lower() && c == x.upper() => None,
                Some(c) if c == x.lower() => x.meet(&IntegerStamp::range(bits, c + 1, x.upper()).unwrap_or(*x)),
                Some(c) if c == x.upper() => x.meet(&IntegerStamp::range(bits, x.lower(), c - 1).unwrap_or(*x)),
                _ => Some(*x),
            },
            Condition::Lt if y.upper() == min_value(bits) => None,
            Condition::Lt => range_meet(x, min_value(bits), y.upper() - 1),
            Condition::Le => range_meet(x, min_value(bits), y.upper()),
            Condition::Gt if y.lower() == max_value(bits) => None,
            Condition::Gt => range_meet(x, y.lower() + 1, max_value(bits)),
            Condition::Ge => range_meet(x, y.lower(), max_value(bits)),
            Condition::Bt | Condition::Be => {
                let (_, yh) = y.unsigned_bounds();
                let limit = if self == Condition::Bt {
                    match yh.checked_sub(1) {
                        Some(l) => l,
                        None => return Stamp::Empty,
                    }
                } else {
                    yh
                };
                if limit <= max_value(bits) as u64 {
                    range_meet(x, 0, limit as i64)
                } else {
                    Some(*x)
                }
            }
            Condition::At | Condition::Ae => Some(*x),
        };
        narrowed.map_or(Stamp::Empty, Stamp::Integer)
    }

    /// Stamp of `y` on paths where `x self y` holds.
    pub fn refine_y(self, x: &IntegerStamp, y: &IntegerStamp) -> Stamp {
        self.mirror().refine_x(y, x)
    }
}

fn range_meet(x: &IntegerStamp, lo: i64, hi: i64) -> Option<IntegerStamp> {
    x.meet(&IntegerStamp::range(x.bits(), lo, hi)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const BOUNDARY: [i64; 7] = [i32::MIN as i64, i32::MIN as i64 + 1, -1, 0, 1, i32::MAX as i64 - 1, i32::MAX as i64];

    #[test]
    fn test_negate_and_mirror_are_involutions() {
        for c in Condition::ALL {
            assert_eq!(c.negate().negate(), c);
            assert_eq!(c.mirror().mirror(), c);
        }
    }

    #[test]
    fn test_known_implications() {
        assert!(Condition::Lt.implies(Condition::Le));
        assert!(Condition::Lt.implies(Condition::Ne));
        assert!(Condition::Eq.implies(Condition::Be));
        assert!(!Condition::Lt.implies(Condition::Bt));
        assert!(!Condition::Le.implies(Condition::Lt));
    }

    #[test]
    fn test_join_meet_examples() {
        assert_eq!(Condition::Lt.join(Condition::Eq), Some(Condition::Le));
        assert_eq!(Condition::Lt.join(Condition::Gt), Some(Condition::Ne));
        assert_eq!(Condition::Le.meet(Condition::Ge), Some(Condition::Eq));
        assert_eq!(Condition::Lt.meet(Condition::Gt), None);
        assert_eq!(Condition::Lt.join(Condition::Ge), None);
        assert_eq!(Condition::Lt.join(Condition::Bt), None);
    }

    #[test]
    fn test_canonical_form_matches_fold() {
        for c in Condition::ALL {
            let (op, swap, negate) = c.canonical();
            for &x in &BOUNDARY {
                for &y in &BOUNDARY {
                    let (a, b) = if swap { (y, x) } else { (x, y) };
                    let r = op.condition().fold(a, b, 32) ^ negate;
                    assert_eq!(r, c.fold(x, y, 32), "{c:?} {x} {y}");
                }
            }
        }
    }

    #[test]
    fn test_fold_stamps() {
        let small = IntegerStamp::range(32, 0, 9).unwrap();
        let ten = IntegerStamp::constant(32, 10);
        assert_eq!(Condition::Lt.fold_stamps(&small, &ten), Some(true));
        assert_eq!(Condition::Ge.fold_stamps(&small, &ten), Some(false));
        assert_eq!(Condition::Eq.fold_stamps(&small, &ten), Some(false));
        assert_eq!(Condition::Bt.fold_stamps(&small, &ten), Some(true));
        let any = IntegerStamp::unrestricted(32);
        assert_eq!(Condition::Lt.fold_stamps(&any, &ten), None);
    }

    #[test]
    fn test_refine() {
        let any = IntegerStamp::unrestricted(32);
        let zero = IntegerStamp::constant(32, 0);
        assert_eq!(Condition::Eq.refine_x(&any, &zero), Stamp::int_constant(32, 0));
        let lt = Condition::Lt.refine_x(&any, &IntegerStamp::constant(32, 100));
        assert_eq!(lt.as_integer().map(|s| s.upper()), Some(99));
        let below = Condition::Bt.refine_x(&any, &IntegerStamp::range(32, 0, 50).unwrap());
        assert_eq!(below.as_integer().map(|s| (s.lower(), s.upper())), Some((0, 49)));
        let nonzero = Condition::Ne.refine_x(&IntegerStamp::range(32, 0, 5).unwrap(), &zero);
        assert_eq!(nonzero.as_integer().map(|s| s.lower()), Some(1));
        assert!(Condition::Ne.refine_x(&zero, &zero).is_empty());
    }

    fn condition() -> impl Strategy<Value = Condition> {
        prop::sample::select(Condition::ALL.to_vec())
    }

    fn operand() -> impl Strategy<Value = i64> {
        prop_oneof![prop::sample::select(BOUNDARY.to_vec()), any::<i32>().prop_map(i64::from)]
    }

    proptest! {
        #[test]
        fn prop_implies_is_sound(c1 in condition(), c2 in condition(), x in operand(), y in operand()) {
            if c1.implies(c2) && c1.fold(x, y, 32) {
                prop_assert!(c2.fold(x, y, 32));
            }
        }

        #[test]
        fn prop_join_is_or(c1 in condition(), c2 in condition(), x in operand(), y in operand()) {
            prop_assert_eq!(c1.join(c2), c2.join(c1));
            if let Some(j) = c1.join(c2) {
                prop_assert_eq!(j.fold(x, y, 32), c1.fold(x, y, 32) || c2.fold(x, y, 32));
            }
        }

        #[test]
        fn prop_meet_is_and(c1 in condition(), c2 in condition(), x in operand(), y in operand()) {
            prop_assert_eq!(c1.meet(c2), c2.meet(c1));
            if let Some(m) = c1.meet(c2) {
                prop_assert_eq!(m.fold(x, y, 32), c1.fold(x, y, 32) && c2.fold(x, y, 32));
            }
        }

        #[test]
        fn prop_refine_is_sound(c in condition(), x in operand(), y in operand()) {
            let any = IntegerStamp::unrestricted(32);
            let ys = IntegerStamp::constant(32, y);
            if c.fold(x, y, 32) {
                let refined = c.refine_x(&any, &ys);
                prop_assert!(refined.as_integer().is_some_and(|s| s.contains(x)), "{:?} {} {}", c, x, y);
            }
        }
    }
}
