//! Rational media time.
//!
//! Timestamps are exact fractions of a time scale (sample rate, container
//! tick rate, frame rate denominator). All arithmetic and comparison is
//! performed on exact rational values so that repeated operations never
//! accumulate floating-point drift.

use std::cmp::Ordering;
use std::fmt;
use std::ops::{Add, Div, Mul, Sub};

use serde::{Deserialize, Serialize};

/// An exact media timestamp: `num / den` seconds, where `den` is the
/// time scale the value is expressed against.
///
/// Invariant: `den > 0`. Construction normalizes the sign into the
/// numerator.
#[derive(Clone, Copy, Serialize, Deserialize)]
pub struct MediaTime {
    num: i64,
    den: i64,
}

impl MediaTime {
    /// The zero timestamp, 0/1.
    pub const ZERO: MediaTime = MediaTime { num: 0, den: 1 };

    /// Create a timestamp of `value` ticks at `scale` ticks per second.
    ///
    /// Exact, no rounding.
    ///
    /// # Panics
    ///
    /// Panics if `scale` is zero.
    pub fn new(value: i64, scale: i64) -> Self {
        assert!(scale != 0, "time scale cannot be zero");
        let (num, den) = if scale < 0 { (-value, -scale) } else { (value, scale) };
        Self { num, den }
    }

    /// Create a timestamp approximately equal to `seconds` at the given
    /// scale.
    ///
    /// Lossy: the value is truncated to whole ticks of `scale`.
    pub fn from_seconds(seconds: f64, scale: i64) -> Self {
        assert!(scale != 0, "time scale cannot be zero");
        Self::new((seconds * scale as f64) as i64, scale)
    }

    /// The tick count (numerator).
    pub fn value(&self) -> i64 {
        self.num
    }

    /// The time scale (denominator). Always positive.
    pub fn scale(&self) -> i64 {
        self.den
    }

    /// The value in seconds, as a float. Lossy by nature.
    pub fn seconds(&self) -> f64 {
        self.num as f64 / self.den as f64
    }

    /// Check whether the value is exactly zero.
    pub fn is_zero(&self) -> bool {
        self.num == 0
    }

    /// Check whether the value is negative.
    pub fn is_negative(&self) -> bool {
        self.num < 0
    }

    /// Absolute value.
    pub fn abs(&self) -> Self {
        Self {
            num: self.num.abs(),
            den: self.den,
        }
    }

    /// Re-express the value at a new scale.
    ///
    /// This is the one documented lossy operation: the conversion goes
    /// through a floating intermediate and truncates to whole ticks of
    /// the new scale. Callers converting between scales with a known
    /// exact ratio must account for the truncation themselves.
    pub fn convert_scale(&self, scale: i64) -> Self {
        assert!(scale != 0, "time scale cannot be zero");
        let value = (self.num as f64 / self.den as f64 * scale as f64) as i64;
        Self::new(value, scale)
    }

    /// The reciprocal, `den / num`.
    ///
    /// # Panics
    ///
    /// Panics if the value is zero.
    pub fn invert(&self) -> Self {
        assert!(self.num != 0, "cannot invert a zero time");
        Self::new(self.den, self.num)
    }

    /// Return whichever of `a`, `b` is numerically closer to `self`.
    /// On an exact tie, returns `self`.
    pub fn nearer(&self, a: MediaTime, b: MediaTime) -> Self {
        let da = (*self - a).abs();
        let db = (*self - b).abs();
        match da.cmp(&db) {
            Ordering::Less => a,
            Ordering::Greater => b,
            Ordering::Equal => *self,
        }
    }

    /// Rescale an integer tick count from the `src` time base to the
    /// `dst` time base, truncating toward zero.
    ///
    /// Exact up to the final integer division; used when moving packet
    /// timestamps between codec and stream time bases.
    pub fn rescale_value(value: i64, src: MediaTime, dst: MediaTime) -> i64 {
        let num = value as i128 * src.num as i128 * dst.den as i128;
        let den = src.den as i128 * dst.num as i128;
        (num / den) as i64
    }

    /// Build a reduced value from wide intermediate products.
    fn from_i128(num: i128, den: i128) -> Self {
        debug_assert!(den != 0);
        let (num, den) = if den < 0 { (-num, -den) } else { (num, den) };
        if num == 0 {
            return Self::ZERO;
        }
        let g = gcd(num.unsigned_abs(), den.unsigned_abs());
        Self {
            num: (num / g as i128) as i64,
            den: (den / g as i128) as i64,
        }
    }
}

impl Default for MediaTime {
    fn default() -> Self {
        Self::ZERO
    }
}

impl fmt::Debug for MediaTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MediaTime({}/{})", self.num, self.den)
    }
}

impl fmt::Display for MediaTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.den == 1 {
            write!(f, "{}", self.num)
        } else {
            write!(f, "{}/{}", self.num, self.den)
        }
    }
}

impl PartialEq for MediaTime {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for MediaTime {}

impl PartialOrd for MediaTime {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for MediaTime {
    fn cmp(&self, other: &Self) -> Ordering {
        let lhs = self.num as i128 * other.den as i128;
        let rhs = other.num as i128 * self.den as i128;
        lhs.cmp(&rhs)
    }
}

impl Add for MediaTime {
    type Output = Self;

    fn add(self, rhs: Self) -> Self::Output {
        let num = self.num as i128 * rhs.den as i128 + rhs.num as i128 * self.den as i128;
        let den = self.den as i128 * rhs.den as i128;
        Self::from_i128(num, den)
    }
}

impl Sub for MediaTime {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self::Output {
        let num = self.num as i128 * rhs.den as i128 - rhs.num as i128 * self.den as i128;
        let den = self.den as i128 * rhs.den as i128;
        Self::from_i128(num, den)
    }
}

impl Mul for MediaTime {
    type Output = Self;

    fn mul(self, rhs: Self) -> Self::Output {
        Self::from_i128(
            self.num as i128 * rhs.num as i128,
            self.den as i128 * rhs.den as i128,
        )
    }
}

impl Div for MediaTime {
    type Output = Self;

    /// Division by a zero-valued operand is a precondition violation and
    /// panics; callers must avoid it.
    fn div(self, rhs: Self) -> Self::Output {
        assert!(rhs.num != 0, "division by a zero time");
        Self::from_i128(
            self.num as i128 * rhs.den as i128,
            self.den as i128 * rhs.num as i128,
        )
    }
}

/// Greatest common divisor, Euclid.
fn gcd(mut a: u128, mut b: u128) -> u128 {
    while b != 0 {
        let t = b;
        b = a % b;
        a = t;
    }
    a
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_normalizes_sign() {
        let t = MediaTime::new(1, -2);
        assert_eq!(t.value(), -1);
        assert_eq!(t.scale(), 2);
    }

    #[test]
    fn test_add_sub_roundtrip_is_exact() {
        let a = MediaTime::new(1001, 30000);
        let b = MediaTime::new(1, 44100);
        assert_eq!((a + b) - b, a);
        assert_eq!((a - b) + b, a);
    }

    #[test]
    fn test_add_reduces() {
        let a = MediaTime::new(1, 2);
        let b = MediaTime::new(1, 3);
        let c = a + b;
        assert_eq!(c, MediaTime::new(5, 6));
    }

    #[test]
    fn test_ordering_is_exact() {
        let a = MediaTime::new(1, 2);
        let b = MediaTime::new(1, 3);
        assert!(a > b);
        assert!(b < a);
        assert!(a != b);
        // Values that would collide under f64 rounding stay distinct.
        let c = MediaTime::new(1_000_000_000_000_000_001, i64::MAX);
        let d = MediaTime::new(1_000_000_000_000_000_000, i64::MAX);
        assert!(c > d);
    }

    #[test]
    fn test_eq_across_scales() {
        assert_eq!(MediaTime::new(1, 2), MediaTime::new(2, 4));
        assert_eq!(MediaTime::new(600, 600), MediaTime::new(44100, 44100));
    }

    #[test]
    fn test_convert_scale_bound() {
        let t = MediaTime::new(90000, 90000); // 1s
        let coarse = t.convert_scale(600);
        assert_eq!(coarse, MediaTime::new(600, 600));
        // Round-trip through a coarser scale is exact to one coarse tick.
        let t = MediaTime::new(90001, 90000);
        let back = t.convert_scale(600).convert_scale(90000);
        let err = (t - back).abs();
        assert!(err <= MediaTime::new(1, 600));
    }

    #[test]
    fn test_mul_div() {
        let a = MediaTime::new(2, 3);
        let b = MediaTime::new(3, 4);
        assert_eq!(a * b, MediaTime::new(1, 2));
        assert_eq!(a / b, MediaTime::new(8, 9));
    }

    #[test]
    fn test_invert() {
        let fps = MediaTime::new(30000, 1001);
        assert_eq!(fps.invert(), MediaTime::new(1001, 30000));
    }

    #[test]
    fn test_nearer() {
        let t = MediaTime::new(5, 10);
        let a = MediaTime::new(4, 10);
        let b = MediaTime::new(9, 10);
        assert_eq!(t.nearer(a, b), a);
        // exact tie returns self
        let a = MediaTime::new(4, 10);
        let b = MediaTime::new(6, 10);
        assert_eq!(t.nearer(a, b), t);
    }

    #[test]
    fn test_rescale_value() {
        let ms = MediaTime::new(1, 1000);
        let mpeg = MediaTime::new(1, 90000);
        assert_eq!(MediaTime::rescale_value(1000, ms, mpeg), 90000);
        assert_eq!(MediaTime::rescale_value(90000, mpeg, ms), 1000);
    }

    #[test]
    fn test_zero() {
        assert!(MediaTime::ZERO.is_zero());
        assert_eq!(MediaTime::ZERO, MediaTime::new(0, 600));
    }

    #[test]
    fn test_from_seconds_truncates() {
        let t = MediaTime::from_seconds(0.5, 600);
        assert_eq!(t.value(), 300);
        assert_eq!(t.scale(), 600);
    }
}
