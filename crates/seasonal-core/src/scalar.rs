//! Floating point element types.

use std::fmt::{Debug, Display};
use std::ops::{AddAssign, DivAssign, MulAssign, SubAssign};
use std::str::FromStr;

use num_traits::Float;

/// A floating point type that vectors, matrices and accumulators can hold.
///
/// `Display` must produce the shortest representation that parses back to
/// the identical value, which is what the standard library does for `f32`
/// and `f64`.
pub trait Scalar:
    Float
    + Default
    + Debug
    + Display
    + FromStr
    + AddAssign
    + SubAssign
    + MulAssign
    + DivAssign
    + Send
    + Sync
    + 'static
{
    /// Convert from double precision, rounding if necessary.
    fn cast_f64(value: f64) -> Self;

    /// Widen to double precision.
    fn as_f64(self) -> f64;
}

impl Scalar for f32 {
    #[inline]
    fn cast_f64(value: f64) -> Self {
        value as f32
    }

    #[inline]
    fn as_f64(self) -> f64 {
        f64::from(self)
    }
}

impl Scalar for f64 {
    #[inline]
    fn cast_f64(value: f64) -> Self {
        value
    }

    #[inline]
    fn as_f64(self) -> f64 {
        self
    }
}
