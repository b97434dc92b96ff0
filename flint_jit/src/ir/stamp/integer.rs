//! Integer stamps: a signed range plus known-bit masks at a fixed width.

use std::fmt;

// =============================================================================
// Bit-width helpers
// =============================================================================

/// All-ones mask for a `bits`-wide integer.
#[inline]
pub const fn width_mask(bits: u32) -> u64 {
    if bits >= 64 {
        u64::MAX
    } else {
        (1u64 << bits) - 1
    }
}

#[inline]
pub const fn min_value(bits: u32) -> i64 {
    if bits >= 64 {
        i64::MIN
    } else {
        -(1i64 << (bits - 1))
    }
}

#[inline]
pub const fn max_value(bits: u32) -> i64 {
    if bits >= 64 {
        i64::MAX
    } else {
        (1i64 << (bits - 1)) - 1
    }
}

/// Interpret the low `bits` of `raw` as a signed two's-complement value.
#[inline]
pub const fn sign_extend(raw: u64, bits: u32) -> i64 {
    if bits >= 64 {
        raw as i64
    } else {
        let shift = 64 - bits;
        ((raw << shift) as i64) >> shift
    }
}

/// Wrap `value` to a `bits`-wide integer.
#[inline]
pub const fn wrap(value: i64, bits: u32) -> i64 {
    sign_extend(value as u64 & width_mask(bits), bits)
}

/// Wrap a wide intermediate result to a `bits`-wide integer.
#[inline]
pub fn wrap_wide(value: i128, bits: u32) -> i64 {
    wrap(value as i64, bits)
}

#[inline]
fn fits(value: i128, bits: u32) -> bool {
    value >= min_value(bits) as i128 && value <= max_value(bits) as i128
}

/// Smallest `bits`-wide value `>= from` whose bits agree with the masks.
fn least_member_at_least(from: i64, bits: u32, must: u64, may: u64) -> Option<i64> {
    let m = width_mask(bits);
    let sign = 1u64 << (bits - 1);
    // Flipping the sign bit turns signed order into unsigned order.
    let flip = |mask: u64, other: u64| (mask & !sign) | (!other & sign);
    let (must_u, may_u) = (flip(must, may), flip(may, must));
    let start = (from as u64 ^ sign) & m;
    next_with_bits(start, m, must_u & m, may_u & m).map(|u| sign_extend(u ^ sign, bits))
}

/// Largest `bits`-wide value `<= from` whose bits agree with the masks.
fn greatest_member_at_most(from: i64, bits: u32, must: u64, may: u64) -> Option<i64> {
    let m = width_mask(bits);
    // Complementing maps "largest below" onto "smallest above".
    least_member_at_least(!from, bits, !may & m, !must & m).map(|v| !v)
}

/// Smallest `x >= start` within `m` with `x & must == must` and `x & !may == 0`.
fn next_with_bits(start: u64, m: u64, must: u64, may: u64) -> Option<u64> {
    let ok = |x: u64, keep: u64| x & must & keep == must & keep && x & !may & keep == 0;
    if ok(start, m) {
        return Some(start);
    }
    // The answer agrees with `start` above some bit `i` that it raises from 0 to 1.
    (0..64 - m.leading_zeros()).find_map(|i| {
        let bit = 1u64 << i;
        let above = m & !(bit | (bit - 1));
        (start & bit == 0 && may & bit != 0 && ok(start, above))
            .then(|| (start & above) | bit | (must & (bit - 1)))
    })
}

/// Tighten masks with the high bits shared by every value in `[lo, hi]`.
fn masks_from_bounds(lo: i64, hi: i64, bits: u32, mut must: u64, mut may: u64) -> (u64, u64) {
    let m = width_mask(bits);
    if (lo < 0) == (hi < 0) {
        let diff = (lo ^ hi) as u64 & m;
        let prefix = if diff == 0 {
            m
        } else {
            let top = 63 - diff.leading_zeros();
            let low_bits = if top >= 63 { u64::MAX } else { (1u64 << (top + 1)) - 1 };
            m & !low_bits
        };
        let common = lo as u64 & prefix;
        must |= common;
        may &= common | !prefix;
    }
    (must, may)
}

// =============================================================================
// IntegerStamp
// =============================================================================

/// Abstract value of a `bits`-wide two's-complement integer.
///
/// A value `v` is described when `lower <= v <= upper`, every bit of
/// `must_be_set` is set in `v`, and no bit outside `may_be_set` is set.
/// Masks only cover the low `bits` bits.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct IntegerStamp {
    bits: u32,
    lower: i64,
    upper: i64,
    must_be_set: u64,
    may_be_set: u64,
}

impl IntegerStamp {
    /// Build a stamp and tighten bounds and masks against each other.
    ///
    /// Returns `None` when no value satisfies all constraints.
    pub fn create(bits: u32, lower: i64, upper: i64, must_be_set: u64, may_be_set: u64) -> Option<Self> {
        debug_assert!((1..=64).contains(&bits));
        let m = width_mask(bits);
        let mut must = must_be_set & m;
        let mut may = may_be_set & m;
        let mut lo = lower.max(min_value(bits));
        let mut hi = upper.min(max_value(bits));
        if must & !may != 0 || lo > hi {
            return None;
        }

        // Snap the bounds to members and re-derive the masks from them until
        // neither moves. Bounds are then members, so the form is canonical.
        loop {
            let (snapped_lo, snapped_hi) = match (
                least_member_at_least(lo, bits, must, may),
                greatest_member_at_most(hi, bits, must, may),
            ) {
                (Some(l), Some(h)) if l <= h => (l, h),
                _ => return None,
            };
            let (tight_must, tight_may) = masks_from_bounds(snapped_lo, snapped_hi, bits, must, may);
            if tight_must & !tight_may != 0 {
                return None;
            }
            let stable = (snapped_lo, snapped_hi, tight_must, tight_may) == (lo, hi, must, may);
            (lo, hi, must, may) = (snapped_lo, snapped_hi, tight_must, tight_may);
            if stable {
                break;
            }
        }

        Some(IntegerStamp {
            bits,
            lower: lo,
            upper: hi,
            must_be_set: must,
            may_be_set: may,
        })
    }

    /// Stamp covering every `bits`-wide value.
    pub fn unrestricted(bits: u32) -> Self {
        IntegerStamp {
            bits,
            lower: min_value(bits),
            upper: max_value(bits),
            must_be_set: 0,
            may_be_set: width_mask(bits),
        }
    }

    pub fn constant(bits: u32, value: i64) -> Self {
        let v = wrap(value, bits);
        let raw = v as u64 & width_mask(bits);
        IntegerStamp {
            bits,
            lower: v,
            upper: v,
            must_be_set: raw,
            may_be_set: raw,
        }
    }

    /// Range-only constructor; `None` if `lower > upper`.
    pub fn range(bits: u32, lower: i64, upper: i64) -> Option<Self> {
        Self::create(bits, lower, upper, 0, width_mask(bits))
    }

    fn range_or_unrestricted(bits: u32, lower: i128, upper: i128) -> Self {
        if fits(lower, bits) && fits(upper, bits) {
            Self::range(bits, lower as i64, upper as i64).unwrap_or_else(|| Self::unrestricted(bits))
        } else {
            Self::unrestricted(bits)
        }
    }

    fn from_masks(bits: u32, must: u64, may: u64) -> Self {
        Self::create(bits, min_value(bits), max_value(bits), must, may)
            .unwrap_or_else(|| Self::unrestricted(bits))
    }

    #[inline]
    pub fn bits(&self) -> u32 {
        self.bits
    }

    #[inline]
    pub fn lower(&self) -> i64 {
        self.lower
    }

    #[inline]
    pub fn upper(&self) -> i64 {
        self.upper
    }

    #[inline]
    pub fn must_be_set(&self) -> u64 {
        self.must_be_set
    }

    #[inline]
    pub fn may_be_set(&self) -> u64 {
        self.may_be_set
    }

    pub fn as_constant(&self) -> Option<i64> {
        (self.lower == self.upper).then_some(self.lower)
    }

    pub fn is_unrestricted(&self) -> bool {
        *self == Self::unrestricted(self.bits)
    }

    pub fn contains(&self, value: i64) -> bool {
        let raw = value as u64 & width_mask(self.bits);
        value >= self.lower && value <= self.upper && raw & self.must_be_set == self.must_be_set && raw & !self.may_be_set == 0
    }

    pub fn is_positive(&self) -> bool {
        self.lower >= 0
    }

    pub fn is_strictly_positive(&self) -> bool {
        self.lower > 0
    }

    pub fn is_strictly_negative(&self) -> bool {
        self.upper < 0
    }

    pub fn can_be_zero(&self) -> bool {
        self.contains(0)
    }

    /// Bounds when the value is read as unsigned.
    pub fn unsigned_bounds(&self) -> (u64, u64) {
        let m = width_mask(self.bits);
        if self.lower >= 0 || self.upper < 0 {
            (self.lower as u64 & m, self.upper as u64 & m)
        } else {
            (self.must_be_set, self.may_be_set)
        }
    }

    // -------------------------------------------------------------------------
    // Lattice
    // -------------------------------------------------------------------------

    /// Union.
    pub fn join(&self, other: &Self) -> Self {
        debug_assert_eq!(self.bits, other.bits);
        Self::create(
            self.bits,
            self.lower.min(other.lower),
            self.upper.max(other.upper),
            self.must_be_set & other.must_be_set,
            self.may_be_set | other.may_be_set,
        )
        .unwrap_or_else(|| Self::unrestricted(self.bits))
    }

    /// Intersection; `None` when empty.
    pub fn meet(&self, other: &Self) -> Option<Self> {
        debug_assert_eq!(self.bits, other.bits);
        Self::create(
            self.bits,
            self.lower.max(other.lower),
            self.upper.min(other.upper),
            self.must_be_set | other.must_be_set,
            self.may_be_set & other.may_be_set,
        )
    }

    // -------------------------------------------------------------------------
    // Arithmetic transfer functions
    // -------------------------------------------------------------------------

    pub fn add(&self, other: &Self) -> Self {
        let bits = self.bits;
        if let (Some(a), Some(b)) = (self.as_constant(), other.as_constant()) {
            return Self::constant(bits, wrap_wide(a as i128 + b as i128, bits));
        }
        Self::range_or_unrestricted(
            bits,
            self.lower as i128 + other.lower as i128,
            self.upper as i128 + other.upper as i128,
        )
    }

    pub fn sub(&self, other: &Self) -> Self {
        let bits = self.bits;
        if let (Some(a), Some(b)) = (self.as_constant(), other.as_constant()) {
            return Self::constant(bits, wrap_wide(a as i128 - b as i128, bits));
        }
        Self::range_or_unrestricted(
            bits,
            self.lower as i128 - other.upper as i128,
            self.upper as i128 - other.lower as i128,
        )
    }

    pub fn mul(&self, other: &Self) -> Self {
        let bits = self.bits;
        let products = [
            self.lower as i128 * other.lower as i128,
            self.lower as i128 * other.upper as i128,
            self.upper as i128 * other.lower as i128,
            self.upper as i128 * other.upper as i128,
        ];
        let lo = products.iter().copied().min().unwrap_or(i128::MIN);
        let hi = products.iter().copied().max().unwrap_or(i128::MAX);
        Self::range_or_unrestricted(bits, lo, hi)
    }

    /// Signed truncating division by a constant stamp.
    pub fn div(&self, other: &Self) -> Self {
        let bits = self.bits;
        match other.as_constant() {
            Some(d) if d > 0 => Self::range_or_unrestricted(bits, (self.lower / d) as i128, (self.upper / d) as i128),
            Some(d) if d < 0 && !(d == -1 && self.lower == min_value(bits)) => {
                Self::range_or_unrestricted(bits, (self.upper / d) as i128, (self.lower / d) as i128)
            }
            _ => Self::unrestricted(bits),
        }
    }

    /// Unsigned division by a constant stamp.
    pub fn unsigned_div(&self, other: &Self) -> Self {
        let bits = self.bits;
        let d = match other.as_constant() {
            Some(d) => d as u64 & width_mask(bits),
            None => 0,
        };
        if d == 0 {
            return Self::unrestricted(bits);
        }
        let (lo, hi) = self.unsigned_bounds();
        let (lo, hi) = (lo / d, hi / d);
        if hi <= max_value(bits) as u64 {
            Self::range_or_unrestricted(bits, lo as i128, hi as i128)
        } else {
            Self::unrestricted(bits)
        }
    }

    pub fn neg(&self) -> Self {
        if self.lower == min_value(self.bits) {
            return Self::unrestricted(self.bits);
        }
        Self::range_or_unrestricted(self.bits, -(self.upper as i128), -(self.lower as i128))
    }

    pub fn and(&self, other: &Self) -> Self {
        let mut stamp = Self::from_masks(
            self.bits,
            self.must_be_set & other.must_be_set,
            self.may_be_set & other.may_be_set,
        );
        if self.is_positive() || other.is_positive() {
            let hi = match (self.is_positive(), other.is_positive()) {
                (true, true) => self.upper.min(other.upper),
                (true, false) => self.upper,
                _ => other.upper,
            };
            if let Some(narrowed) = stamp.meet(&Self::range_or_unrestricted(self.bits, 0, hi as i128)) {
                stamp = narrowed;
            }
        }
        stamp
    }

    pub fn or(&self, other: &Self) -> Self {
        Self::from_masks(
            self.bits,
            self.must_be_set | other.must_be_set,
            self.may_be_set | other.may_be_set,
        )
    }

    pub fn xor(&self, other: &Self) -> Self {
        let m = width_mask(self.bits);
        let known = (self.must_be_set | !self.may_be_set) & (other.must_be_set | !other.may_be_set) & m;
        let value = (self.must_be_set ^ other.must_be_set) & known;
        Self::from_masks(self.bits, value, value | (!known & m))
    }

    pub fn not(&self) -> Self {
        let m = width_mask(self.bits);
        Self::create(
            self.bits,
            !self.upper,
            !self.lower,
            !self.may_be_set & m,
            !self.must_be_set & m,
        )
        .unwrap_or_else(|| Self::unrestricted(self.bits))
    }

    /// Shift amount after Java-style masking, if constant.
    fn shift_amount(&self, shift: &Self) -> Option<u32> {
        shift.as_constant().map(|s| (s as u32) & (self.bits.max(32) - 1).min(63))
    }

    pub fn shl(&self, shift: &Self) -> Self {
        let bits = self.bits;
        let Some(s) = self.shift_amount(shift) else {
            return Self::unrestricted(bits);
        };
        let m = width_mask(bits);
        let by_masks = Self::from_masks(bits, (self.must_be_set << s) & m, (self.may_be_set << s) & m);
        let lo = (self.lower as i128) << s;
        let hi = (self.upper as i128) << s;
        if fits(lo, bits) && fits(hi, bits) {
            by_masks
                .meet(&Self::range_or_unrestricted(bits, lo, hi))
                .unwrap_or(by_masks)
        } else {
            by_masks
        }
    }

    pub fn shr(&self, shift: &Self) -> Self {
        let bits = self.bits;
        let Some(s) = self.shift_amount(shift) else {
            return Self::unrestricted(bits);
        };
        let m = width_mask(bits);
        let must = ((sign_extend(self.must_be_set, bits) >> s) as u64) & m;
        let may = ((sign_extend(self.may_be_set, bits) >> s) as u64) & m;
        let by_masks = Self::from_masks(bits, must, may);
        by_masks
            .meet(&Self::range_or_unrestricted(
                bits,
                (self.lower >> s) as i128,
                (self.upper >> s) as i128,
            ))
            .unwrap_or(by_masks)
    }

    pub fn ushr(&self, shift: &Self) -> Self {
        let bits = self.bits;
        let Some(s) = self.shift_amount(shift) else {
            return Self::unrestricted(bits);
        };
        let by_masks = Self::from_masks(bits, self.must_be_set >> s, self.may_be_set >> s);
        if self.lower >= 0 {
            by_masks
                .meet(&Self::range_or_unrestricted(
                    bits,
                    (self.lower >> s) as i128,
                    (self.upper >> s) as i128,
                ))
                .unwrap_or(by_masks)
        } else {
            by_masks
        }
    }
}

impl fmt::Debug for IntegerStamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "i{}", self.bits)?;
        if let Some(c) = self.as_constant() {
            return write!(f, " [{c}]");
        }
        write!(f, " [{}..{}]", self.lower, self.upper)?;
        let m = width_mask(self.bits);
        if self.must_be_set != 0 || self.may_be_set != m {
            write!(f, " #{:x}/{:x}", self.must_be_set, self.may_be_set)?;
        }
        Ok(())
    }
}
