//! Numeric core for streaming seasonality detection.
//!
//! This crate provides the value types the detectors in `seasonal` are
//! built from. Everything here is a plain value with no interior locking:
//! callers own an accumulator and update it from one thread at a time.
//!
//! - [`linalg`]: dense vectors and packed symmetric matrices with fixed or
//!   runtime dimension, and nalgebra based decompositions
//! - [`statistics`]: central moments, covariances, order statistics, online
//!   regression, autocorrelation and significance helpers
//! - [`codec`]: the delimited string encoding and checksums every persisted
//!   value shares
//!
//! ```
//! use seasonal_core::{Delimited, MeanVarAccumulator};
//!
//! let mut moments = MeanVarAccumulator::new();
//! moments.add(1.0);
//! moments.add(3.0);
//! let restored = MeanVarAccumulator::from_delimited(&moments.to_delimited()).unwrap();
//! assert_eq!(restored, moments);
//! ```

#![warn(clippy::all)]

pub mod codec;
pub mod constants;
pub mod error;
pub mod linalg;
pub mod scalar;
pub mod statistics;
pub mod types;

pub use codec::{join_delimited, split_delimited, Checksum, Delimited};
pub use error::{DistributionError, LinalgError, ParseError};
pub use scalar::Scalar;
pub use types::{
    DynVector, FloatMeanAccumulator, MeanAccumulator, MeanVarAccumulator, MeanVarSkewAccumulator,
    Time, TimeInterval, Vector,
};
