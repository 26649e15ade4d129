//! Type aliases used across the crate.

use crate::linalg::{VectorN, VectorX};
use crate::statistics::CentralMoments;

/// Seconds since the epoch.
pub type Time = i64;

/// A half open time interval `[start, end)`.
pub type TimeInterval = (Time, Time);

/// Mean of double precision values.
pub type MeanAccumulator = CentralMoments<f64, 1>;

/// Mean and variance of double precision values.
pub type MeanVarAccumulator = CentralMoments<f64, 2>;

/// Mean, variance and skewness of double precision values.
pub type MeanVarSkewAccumulator = CentralMoments<f64, 3>;

/// Mean of single precision values, the compact per-bucket history element.
pub type FloatMeanAccumulator = CentralMoments<f32, 1>;

/// Fixed-dimension double precision vector.
pub type Vector<const N: usize> = VectorN<f64, N>;

/// Runtime-dimension double precision vector.
pub type DynVector = VectorX<f64>;
