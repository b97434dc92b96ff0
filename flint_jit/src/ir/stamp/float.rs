//! Floating-point stamps: an ordered range plus a NaN flag.

use std::cmp::Ordering;
use std::fmt;

/// Abstract value of an IEEE-754 float of width 32 or 64.
///
/// Bounds are ordered with `-0.0 < +0.0`. A stamp whose range is empty but
/// which may be NaN describes NaN only; a range-empty stamp that excludes
/// NaN is the empty stamp.
#[derive(Clone, Copy)]
pub struct FloatStamp {
    bits: u32,
    lower: f64,
    upper: f64,
    non_nan: bool,
}

#[inline]
fn fmin(a: f64, b: f64) -> f64 {
    if a.total_cmp(&b) == Ordering::Greater {
        b
    } else {
        a
    }
}

#[inline]
fn fmax(a: f64, b: f64) -> f64 {
    if a.total_cmp(&b) == Ordering::Less {
        b
    } else {
        a
    }
}

impl FloatStamp {
    pub fn unrestricted(bits: u32) -> Self {
        FloatStamp {
            bits,
            lower: f64::NEG_INFINITY,
            upper: f64::INFINITY,
            non_nan: false,
        }
    }

    pub fn create(bits: u32, lower: f64, upper: f64, non_nan: bool) -> Self {
        FloatStamp {
            bits,
            lower,
            upper,
            non_nan,
        }
    }

    /// Stamp of the constant stored in `raw` (low 32 bits for floats).
    pub fn constant(bits: u32, raw: u64) -> Self {
        let value = decode(bits, raw);
        if value.is_nan() {
            FloatStamp {
                bits,
                lower: f64::INFINITY,
                upper: f64::NEG_INFINITY,
                non_nan: false,
            }
        } else {
            FloatStamp {
                bits,
                lower: value,
                upper: value,
                non_nan: true,
            }
        }
    }

    #[inline]
    pub fn bits(&self) -> u32 {
        self.bits
    }

    #[inline]
    pub fn lower(&self) -> f64 {
        self.lower
    }

    #[inline]
    pub fn upper(&self) -> f64 {
        self.upper
    }

    #[inline]
    pub fn is_non_nan(&self) -> bool {
        self.non_nan
    }

    fn has_range(&self) -> bool {
        self.lower.total_cmp(&self.upper) != Ordering::Greater
    }

    pub fn is_empty(&self) -> bool {
        self.non_nan && !self.has_range()
    }

    pub fn is_nan_only(&self) -> bool {
        !self.non_nan && !self.has_range()
    }

    /// The single non-NaN value this stamp allows.
    pub fn as_constant(&self) -> Option<f64> {
        (self.non_nan && self.lower.to_bits() == self.upper.to_bits()).then_some(self.lower)
    }

    pub fn contains(&self, value: f64) -> bool {
        if value.is_nan() {
            return !self.non_nan;
        }
        self.has_range()
            && self.lower.total_cmp(&value) != Ordering::Greater
            && value.total_cmp(&self.upper) != Ordering::Greater
    }

    pub fn join(&self, other: &Self) -> Self {
        let (lower, upper) = match (self.has_range(), other.has_range()) {
            (true, true) => (fmin(self.lower, other.lower), fmax(self.upper, other.upper)),
            (true, false) => (self.lower, self.upper),
            (false, true) => (other.lower, other.upper),
            (false, false) => (f64::INFINITY, f64::NEG_INFINITY),
        };
        FloatStamp {
            bits: self.bits,
            lower,
            upper,
            non_nan: self.non_nan && other.non_nan,
        }
    }

    /// Intersection; `None` when empty.
    pub fn meet(&self, other: &Self) -> Option<Self> {
        let stamp = FloatStamp {
            bits: self.bits,
            lower: fmax(self.lower, other.lower),
            upper: fmin(self.upper, other.upper),
            non_nan: self.non_nan || other.non_nan,
        };
        (!stamp.is_empty()).then_some(stamp)
    }

    pub fn neg(&self) -> Self {
        if !self.has_range() {
            return *self;
        }
        FloatStamp {
            bits: self.bits,
            lower: -self.upper,
            upper: -self.lower,
            non_nan: self.non_nan,
        }
    }
}

/// Decode the raw bits of a float constant of width `bits`.
pub fn decode(bits: u32, raw: u64) -> f64 {
    if bits == 32 {
        f32::from_bits(raw as u32) as f64
    } else {
        f64::from_bits(raw)
    }
}

impl PartialEq for FloatStamp {
    fn eq(&self, other: &Self) -> bool {
        self.bits == other.bits
            && self.non_nan == other.non_nan
            && self.lower.to_bits() == other.lower.to_bits()
            && self.upper.to_bits() == other.upper.to_bits()
    }
}

impl fmt::Debug for FloatStamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "f{} [{:?}..{:?}]", self.bits, self.lower, self.upper)?;
        if !self.non_nan {
            write!(f, " nan?")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nan_constant_is_nan_only() {
        let s = FloatStamp::constant(64, f64::NAN.to_bits());
        assert!(s.is_nan_only());
        assert!(s.contains(f64::NAN));
        assert!(!s.contains(0.0));
        assert_eq!(s.as_constant(), None);
    }

    #[test]
    fn test_signed_zero_ordering() {
        let neg = FloatStamp::constant(64, (-0.0f64).to_bits());
        let pos = FloatStamp::constant(64, 0.0f64.to_bits());
        assert!(neg.meet(&pos).is_none());
        let j = neg.join(&pos);
        assert!(j.contains(-0.0) && j.contains(0.0));
    }

    #[test]
    fn test_join_with_nan_keeps_range() {
        let one = FloatStamp::constant(32, 1.0f32.to_bits() as u64);
        let nan = FloatStamp::constant(32, f32::NAN.to_bits() as u64);
        let j = one.join(&nan);
        assert!(j.contains(1.0));
        assert!(j.contains(f64::NAN));
        assert!(!j.contains(2.0));
    }
}
