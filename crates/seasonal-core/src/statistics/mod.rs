//! Streaming statistics and significance tests.
//!
//! This module provides the accumulators the detectors are built from:
//! - Central moments of order one to three with merge, split and aging
//! - Multivariate covariances with Ledoit-Wolf shrinkage
//! - Bounded order statistics with an injected ordering
//! - Online least squares polynomial regression
//! - Autocorrelation of bucketed histories, direct and FFT based
//! - Percentile helpers for the F, chi-squared and normal distributions

mod autocorrelation;
mod covariances;
mod moments;
mod order_statistics;
mod regression;
mod significance;

pub use autocorrelation::{autocorrelation, autocorrelations};
pub use covariances::{Covariances, CovariancesN, CovariancesX};
pub use moments::{CentralMoments, MomentValue};
pub use order_statistics::{
    Compare, Greater, Less, OrderStatistics, OrderStatisticsHeap, OrderStatisticsStack,
};
pub use regression::{CubicRegression, LeastSquaresOnline, LinearRegression, QuadraticRegression};
pub use significance::{
    autocorrelation_at_percentile, f_test, mean_at_percentile, variance_at_percentile,
};
