//! Stamps: the abstract value domain of the IR.
//!
//! Every node carries a stamp that soundly over-approximates the values it
//! can produce at runtime. Stamps form a lattice per value kind:
//!
//! ```text
//!              unrestricted
//!             /      |      \
//!        narrower  ranges / types
//!             \      |      /
//!                  Empty        (no value: unreachable)
//! ```
//!
//! - [`Stamp::join`] is the union, used where control flow merges.
//! - [`Stamp::meet`] is the intersection, used when a condition or guard
//!   narrows a value. A meet of contradictory facts yields [`Stamp::Empty`].
//!
//! Stamps are immutable values and are `Send + Sync`; they can be shared
//! between graphs and threads freely.

mod float;
mod integer;
mod object;

pub use float::{decode as decode_float, FloatStamp};
pub use integer::{max_value, min_value, sign_extend, width_mask, wrap, wrap_wide, IntegerStamp};
pub use object::{ClassType, ObjectStamp, TypeRef};

use std::fmt;

use crate::ir::operators::Constant;

/// Abstract value of a node.
#[derive(Clone, PartialEq)]
pub enum Stamp {
    Integer(IntegerStamp),
    Float(FloatStamp),
    Object(ObjectStamp),
    /// Nodes that produce no value: control nodes and conditions.
    Void,
    /// No value at all; code producing it is unreachable.
    Empty,
}

impl Stamp {
    // -------------------------------------------------------------------------
    // Constructors
    // -------------------------------------------------------------------------

    pub fn int(bits: u32) -> Self {
        Stamp::Integer(IntegerStamp::unrestricted(bits))
    }

    /// `[lo, hi]` at width `bits`; empty if `lo > hi`.
    pub fn for_integer(bits: u32, lo: i64, hi: i64) -> Self {
        IntegerStamp::range(bits, lo, hi).map_or(Stamp::Empty, Stamp::Integer)
    }

    pub fn int_constant(bits: u32, value: i64) -> Self {
        Stamp::Integer(IntegerStamp::constant(bits, value))
    }

    /// 32-bit `[0, MAX]`.
    pub fn positive_int() -> Self {
        Self::for_integer(32, 0, max_value(32))
    }

    pub fn float(bits: u32) -> Self {
        Stamp::Float(FloatStamp::unrestricted(bits))
    }

    pub fn object() -> Self {
        Stamp::Object(ObjectStamp::unrestricted())
    }

    pub fn object_non_null() -> Self {
        Stamp::Object(ObjectStamp::new(None, false, true))
    }

    pub fn object_of(ty: TypeRef, exact: bool, non_null: bool) -> Self {
        Stamp::Object(ObjectStamp::new(Some(ty), exact, non_null))
    }

    pub fn null() -> Self {
        Stamp::Object(ObjectStamp::null())
    }

    pub fn for_constant(constant: &Constant) -> Self {
        match *constant {
            Constant::Int { bits, value } => Self::int_constant(bits, value),
            Constant::Float { bits, raw } => Stamp::Float(FloatStamp::constant(bits, raw)),
            Constant::Null => Self::null(),
        }
    }

    // -------------------------------------------------------------------------
    // Queries
    // -------------------------------------------------------------------------

    pub fn is_empty(&self) -> bool {
        match self {
            Stamp::Empty => true,
            Stamp::Float(f) => f.is_empty(),
            Stamp::Object(o) => o.is_empty(),
            _ => false,
        }
    }

    pub fn as_integer(&self) -> Option<&IntegerStamp> {
        match self {
            Stamp::Integer(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&ObjectStamp> {
        match self {
            Stamp::Object(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<&FloatStamp> {
        match self {
            Stamp::Float(s) => Some(s),
            _ => None,
        }
    }

    /// The constant this stamp pins the value to, if any.
    pub fn as_constant(&self) -> Option<Constant> {
        match self {
            Stamp::Integer(s) => s.as_constant().map(|value| Constant::Int { bits: s.bits(), value }),
            Stamp::Float(s) => s.as_constant().map(|v| Constant::float(s.bits(), v)),
            Stamp::Object(s) if s.is_always_null() => Some(Constant::Null),
            _ => None,
        }
    }

    pub fn as_int_constant(&self) -> Option<i64> {
        self.as_integer().and_then(IntegerStamp::as_constant)
    }

    /// Unrestricted stamp of the same kind and width.
    pub fn unrestricted(&self) -> Self {
        match self {
            Stamp::Integer(s) => Self::int(s.bits()),
            Stamp::Float(s) => Self::float(s.bits()),
            Stamp::Object(_) => Self::object(),
            Stamp::Void => Stamp::Void,
            Stamp::Empty => Stamp::Empty,
        }
    }

    /// Same kind (and width) as `other`.
    pub fn is_compatible(&self, other: &Stamp) -> bool {
        match (self, other) {
            (Stamp::Empty, _) | (_, Stamp::Empty) => true,
            (Stamp::Integer(a), Stamp::Integer(b)) => a.bits() == b.bits(),
            (Stamp::Float(a), Stamp::Float(b)) => a.bits() == b.bits(),
            (Stamp::Object(_), Stamp::Object(_)) | (Stamp::Void, Stamp::Void) => true,
            _ => false,
        }
    }

    /// `self` describes no more values than `other` and differs from it.
    pub fn is_strictly_more_precise(&self, other: &Stamp) -> bool {
        self != other && self.meet(other) == *self
    }

    // -------------------------------------------------------------------------
    // Lattice
    // -------------------------------------------------------------------------

    /// Union. Incompatible kinds are a construction bug; the result is then
    /// the unrestricted stamp of `self`.
    pub fn join(&self, other: &Stamp) -> Stamp {
        match (self, other) {
            (Stamp::Empty, s) | (s, Stamp::Empty) => s.clone(),
            (Stamp::Integer(a), Stamp::Integer(b)) if a.bits() == b.bits() => Stamp::Integer(a.join(b)),
            (Stamp::Float(a), Stamp::Float(b)) if a.bits() == b.bits() => Stamp::Float(a.join(b)),
            (Stamp::Object(a), Stamp::Object(b)) => Stamp::Object(a.join(b)),
            (Stamp::Void, Stamp::Void) => Stamp::Void,
            _ => {
                debug_assert!(false, "join of incompatible stamps {self:?} and {other:?}");
                self.unrestricted()
            }
        }
    }

    /// Intersection. Contradictions and incompatible kinds give `Empty`.
    pub fn meet(&self, other: &Stamp) -> Stamp {
        match (self, other) {
            (Stamp::Empty, _) | (_, Stamp::Empty) => Stamp::Empty,
            (Stamp::Integer(a), Stamp::Integer(b)) if a.bits() == b.bits() => {
                a.meet(b).map_or(Stamp::Empty, Stamp::Integer)
            }
            (Stamp::Float(a), Stamp::Float(b)) if a.bits() == b.bits() => a.meet(b).map_or(Stamp::Empty, Stamp::Float),
            (Stamp::Object(a), Stamp::Object(b)) => a.meet(b).map_or(Stamp::Empty, Stamp::Object),
            (Stamp::Void, Stamp::Void) => Stamp::Void,
            _ => Stamp::Empty,
        }
    }

    /// Alias of [`Stamp::meet`] under the name used by guard narrowing.
    pub fn improve_with(&self, other: &Stamp) -> Stamp {
        self.meet(other)
    }
}

impl fmt::Debug for Stamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stamp::Integer(s) => s.fmt(f),
            Stamp::Float(s) => s.fmt(f),
            Stamp::Object(s) => s.fmt(f),
            Stamp::Void => f.write_str("void"),
            Stamp::Empty => f.write_str("empty"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_constructors() {
        assert_eq!(Stamp::positive_int().as_integer().map(|s| s.lower()), Some(0));
        assert!(Stamp::for_integer(32, 5, 4).is_empty());
        assert!(Stamp::object_non_null().as_object().is_some_and(ObjectStamp::is_non_null));
        assert_eq!(Stamp::int_constant(32, 7).as_int_constant(), Some(7));
    }

    #[test]
    fn test_empty_is_join_identity_and_meet_absorbing() {
        let s = Stamp::for_integer(32, 1, 9);
        assert_eq!(s.join(&Stamp::Empty), s);
        assert_eq!(Stamp::Empty.meet(&s), Stamp::Empty);
    }

    #[test]
    fn test_contradiction_is_empty() {
        let zero = Stamp::int_constant(32, 0);
        let five = Stamp::int_constant(32, 5);
        assert!(zero.meet(&five).is_empty());
        assert!(Stamp::null().meet(&Stamp::object_non_null()).is_empty());
    }

    #[test]
    fn test_strictly_more_precise() {
        let narrow = Stamp::for_integer(32, 0, 3);
        assert!(narrow.is_strictly_more_precise(&Stamp::int(32)));
        assert!(!Stamp::int(32).is_strictly_more_precise(&narrow));
        assert!(!narrow.is_strictly_more_precise(&narrow));
    }

    const BOUNDARY: [i64; 7] = [i32::MIN as i64, i32::MIN as i64 + 1, -1, 0, 1, i32::MAX as i64 - 1, i32::MAX as i64];

    fn int_stamp() -> impl Strategy<Value = IntegerStamp> {
        let edge = prop::sample::select(BOUNDARY.to_vec());
        let bound = prop_oneof![edge, any::<i32>().prop_map(i64::from), -16i64..16];
        (bound.clone(), bound, any::<u32>(), any::<u32>()).prop_filter_map("empty stamp", |(a, b, must, may)| {
            let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
            IntegerStamp::create(32, lo, hi, (must & may & 0xff) as u64, (may | 0xffff_ff00) as u64)
        })
    }

    fn sample(s: &IntegerStamp) -> Vec<i64> {
        let mut values = BOUNDARY.to_vec();
        values.extend([s.lower(), s.upper(), s.lower().saturating_add(1), s.upper().saturating_sub(1)]);
        values.into_iter().filter(|v| s.contains(*v)).collect()
    }

    proptest! {
        #[test]
        fn prop_join_meet_commute(a in int_stamp(), b in int_stamp()) {
            prop_assert_eq!(a.join(&b), b.join(&a));
            prop_assert_eq!(a.meet(&b), b.meet(&a));
        }

        #[test]
        fn prop_join_associates(a in int_stamp(), b in int_stamp(), c in int_stamp()) {
            prop_assert_eq!(a.join(&b).join(&c), a.join(&b.join(&c)));
        }

        #[test]
        fn prop_join_is_sound(a in int_stamp(), b in int_stamp()) {
            let j = a.join(&b);
            for v in sample(&a).into_iter().chain(sample(&b)) {
                prop_assert!(j.contains(v), "{:?} join {:?} lost {}", a, b, v);
            }
        }

        #[test]
        fn prop_meet_is_sound(a in int_stamp(), b in int_stamp()) {
            let both: Vec<i64> = sample(&a).into_iter().filter(|v| b.contains(*v)).collect();
            match a.meet(&b) {
                Some(m) => for v in both { prop_assert!(m.contains(v)); },
                None => prop_assert!(both.is_empty()),
            }
        }

        #[test]
        fn prop_add_is_sound(a in int_stamp(), b in int_stamp()) {
            let sum = a.add(&b);
            for x in sample(&a) {
                for y in sample(&b) {
                    prop_assert!(sum.contains(wrap(x + y, 32)));
                }
            }
        }
    }
}
