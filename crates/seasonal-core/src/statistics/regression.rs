//! Online weighted least squares polynomial regression.
//!
//! [`LeastSquaresOnline`] fits `y = c0 + c1 x + ... + cN x^N` by keeping the
//! weighted means of the sufficient statistics
//!
//! ```text
//! 1, x, ..., x^2N, y, x y, ..., x^N y
//! ```
//!
//! from which the Gramian `X'WX` and the vector `X'Wy` are rebuilt on demand
//! and solved with an SVD. The Gramian squares the condition of the design
//! matrix, so callers should keep the abscissa near the origin with
//! [`shift_abscissa`](LeastSquaresOnline::shift_abscissa).

use std::fmt;

use nalgebra::{DMatrix, DVector};

use crate::codec::{Checksum, Delimited};
use crate::constants::{MAX_CONDITION, MINIMUM_RANGE_TO_PREDICT};
use crate::error::ParseError;
use crate::linalg::{SymmetricMatrixX, VectorN};
use crate::statistics::CentralMoments;

/// Online least squares fit of a degree `ORDER` polynomial.
///
/// `STATISTICS` must equal `3 (ORDER + 1) - 1`; this is checked when the
/// type is instantiated.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LeastSquaresOnline<const ORDER: usize, const STATISTICS: usize> {
    statistic: CentralMoments<VectorN<f64, STATISTICS>, 1>,
}

/// Straight line fit.
pub type LinearRegression = LeastSquaresOnline<1, 5>;

/// Quadratic fit.
pub type QuadraticRegression = LeastSquaresOnline<2, 8>;

/// Cubic fit.
pub type CubicRegression = LeastSquaresOnline<3, 11>;

impl<const ORDER: usize, const STATISTICS: usize> Default for LeastSquaresOnline<ORDER, STATISTICS> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const ORDER: usize, const STATISTICS: usize> LeastSquaresOnline<ORDER, STATISTICS> {
    /// Number of parameters of the fitted polynomial.
    pub const PARAMETERS: usize = ORDER + 1;

    const VALID_SIZE: () = assert!(
        STATISTICS == 3 * (ORDER + 1) - 1,
        "STATISTICS must be 3 (ORDER + 1) - 1"
    );

    /// Index of the first `x^i y` statistic.
    const Y: usize = 2 * (ORDER + 1) - 1;

    pub fn new() -> Self {
        #[allow(clippy::let_unit_value)]
        let () = Self::VALID_SIZE;
        Self {
            statistic: CentralMoments::new(),
        }
    }

    /// Build from previously accumulated sufficient statistics.
    pub fn from_statistic(statistic: CentralMoments<VectorN<f64, STATISTICS>, 1>) -> Self {
        #[allow(clippy::let_unit_value)]
        let () = Self::VALID_SIZE;
        Self { statistic }
    }

    /// The sufficient statistics.
    pub fn statistic(&self) -> &CentralMoments<VectorN<f64, STATISTICS>, 1> {
        &self.statistic
    }

    /// Add the point `(x, y)` with weight `weight`.
    pub fn add(&mut self, x: f64, y: f64, weight: f64) {
        let n = Self::PARAMETERS;
        let mut d = VectorN::<f64, STATISTICS>::zeros();
        let mut xi = 1.0;
        for i in 0..n {
            d[i] = xi;
            d[i + Self::Y] = xi * y;
            xi *= x;
        }
        for i in n..Self::Y {
            d[i] = xi;
            xi *= x;
        }
        self.statistic.add_weighted(d, weight);
    }

    /// Update the statistics for a subsequent translation `x -> x + dx` of
    /// the abscissa.
    pub fn shift_abscissa(&mut self, dx: f64) {
        if self.statistic.count() == 0.0 {
            return;
        }

        // (x + dx)^i = sum_j (i j) dx^(i - j) x^j, updated from the highest
        // power down so every right hand side is still unshifted.
        let n = Self::PARAMETERS;
        let mut powers = vec![dx; 2 * n - 2];
        for i in 1..powers.len() {
            powers[i] = powers[i - 1] * dx;
        }
        let s = self.statistic.mean();
        let shifted = self.statistic.mean_mut();
        for i in (1..=2 * n - 2).rev() {
            for j in 0..i {
                let bij = binomial(i, j) * powers[i - j - 1];
                shifted[i] += bij * s[j];
                if i < n {
                    shifted[i + Self::Y] += bij * s[j + Self::Y];
                }
            }
        }
        tracing::trace!(dx, "Shifted regression abscissa");
    }

    /// Update the statistics for a subsequent translation `y -> y + dy` of
    /// the ordinates.
    pub fn shift_ordinate(&mut self, dy: f64) {
        if self.statistic.count() == 0.0 {
            return;
        }
        let s = self.statistic.mean();
        let shifted = self.statistic.mean_mut();
        for i in 0..Self::PARAMETERS {
            shifted[i + Self::Y] += s[i] * dy;
        }
    }

    /// Multiply the effective number of points by `scale`.
    pub fn scale(&mut self, scale: f64) -> &mut Self {
        let count = self.statistic.count();
        self.statistic.set_count(scale * count);
        self
    }

    /// A copy with the effective number of points multiplied by `scale`.
    pub fn scaled(&self, scale: f64) -> Self {
        let mut result = *self;
        result.scale(scale);
        result
    }

    /// Age out old points by `factor`.
    ///
    /// With `mean_revert` the `x^i y` statistics also relax towards
    /// `mean(x^i) mean(y)`, so the slope and higher order terms decay
    /// towards zero.
    pub fn age(&mut self, factor: f64, mean_revert: bool) {
        if mean_revert {
            let s = self.statistic.mean();
            let reverted = self.statistic.mean_mut();
            for i in 1..Self::PARAMETERS {
                reverted[i + Self::Y] = factor * s[i + Self::Y] + (1.0 - factor) * s[i] * s[Self::Y];
            }
        }
        self.statistic.age(factor);
    }

    /// The effective number of points fitted.
    pub fn count(&self) -> f64 {
        self.statistic.count()
    }

    /// The weighted mean of the ordinates.
    pub fn mean(&self) -> f64 {
        self.statistic.mean()[Self::Y]
    }

    /// The width of a uniform distribution with the variance of the
    /// abscissa, the horizon over which higher order terms are trusted.
    pub fn range(&self) -> f64 {
        let s = self.statistic.mean();
        (12.0 * (s[2] - s[1] * s[1]).max(0.0)).sqrt()
    }

    /// The polynomial parameters, intercept first, using the default
    /// maximum condition number.
    pub fn parameters(&self) -> Vec<f64> {
        self.parameters_with_condition(MAX_CONDITION)
    }

    /// The polynomial parameters, intercept first.
    ///
    /// If the Gramian's condition number exceeds `max_condition` the
    /// highest order that is well conditioned is fitted and the remaining
    /// parameters are zero. With no usable Gramian this is the mean.
    pub fn parameters_with_condition(&self, max_condition: f64) -> Vec<f64> {
        let mut result = vec![0.0; Self::PARAMETERS];
        let s = self.statistic.mean();
        for n in (2..=Self::PARAMETERS).rev() {
            let gramian = self.gramian(n);
            let Some(svd) = well_conditioned(gramian, max_condition) else {
                tracing::trace!(n, "Gramian ill conditioned");
                continue;
            };
            let y = DVector::from_fn(n, |i, _| s[i + Self::Y]);
            if let Ok(solution) = svd.solve(&y, 0.0) {
                result[..n].copy_from_slice(solution.as_slice());
                return result;
            }
        }
        result[0] = self.mean();
        result
    }

    /// The covariance matrix of the parameters when the residuals have
    /// variance `variance`, using the default maximum condition number.
    pub fn covariances(&self, variance: f64) -> SymmetricMatrixX<f64> {
        self.covariances_with_condition(variance, MAX_CONDITION)
    }

    /// The covariance matrix `variance (X'WX)^-1 / count` of the parameters
    /// of the highest order well conditioned subproblem.
    pub fn covariances_with_condition(&self, variance: f64, max_condition: f64) -> SymmetricMatrixX<f64> {
        let mut result = SymmetricMatrixX::<f64>::zeros(Self::PARAMETERS);
        let count = self.count();
        for n in (2..=Self::PARAMETERS).rev() {
            let Some(svd) = well_conditioned(self.gramian(n), max_condition) else {
                continue;
            };
            let Ok(inverse) = svd.pseudo_inverse(0.0) else {
                continue;
            };
            for i in 0..n {
                for j in 0..=i {
                    result.set(i, j, inverse[(i, j)] * variance / count);
                }
            }
            return result;
        }
        result.set(0, 0, variance / count);
        result
    }

    /// Predict the ordinate at `x`.
    ///
    /// Until the abscissa range reaches the minimum range to predict this is
    /// just the mean, since the higher order terms are not yet trusted.
    pub fn predict(&self, x: f64) -> f64 {
        if self.range() < MINIMUM_RANGE_TO_PREDICT {
            return self.mean();
        }
        evaluate(&self.parameters(), x)
    }

    /// The mean of the fitted polynomial over `[a, b]`.
    pub fn mean_between(&self, a: f64, b: f64) -> f64 {
        let params = self.parameters();
        let interval = b - a;
        if interval == 0.0 {
            return evaluate(&params, a);
        }
        let mut result = 0.0;
        for (i, p) in params.iter().enumerate() {
            for j in 0..=i {
                result += binomial(i + 1, j + 1) * p / (i + 1) as f64
                    * a.powi((i - j) as i32)
                    * interval.powi((j + 1) as i32);
            }
        }
        result / interval
    }

    fn gramian(&self, n: usize) -> DMatrix<f64> {
        let s = self.statistic.mean();
        DMatrix::from_fn(n, n, |i, j| s[i + j])
    }
}

fn well_conditioned(
    gramian: DMatrix<f64>,
    max_condition: f64,
) -> Option<nalgebra::SVD<f64, nalgebra::Dyn, nalgebra::Dyn>> {
    let svd = gramian.svd(true, true);
    let largest = svd.singular_values.max();
    let smallest = svd.singular_values.min();
    if !(largest.is_finite() && smallest.is_finite()) || largest > max_condition * smallest {
        return None;
    }
    Some(svd)
}

fn evaluate(params: &[f64], x: f64) -> f64 {
    params.iter().rev().fold(0.0, |result, p| result * x + p)
}

/// The binomial coefficient `(n m)`.
fn binomial(n: usize, m: usize) -> f64 {
    let m = m.min(n - m);
    (0..m).fold(1.0, |result, k| result * (n - k) as f64 / (k + 1) as f64)
}

impl<const ORDER: usize, const STATISTICS: usize> std::ops::AddAssign<&LeastSquaresOnline<ORDER, STATISTICS>>
    for LeastSquaresOnline<ORDER, STATISTICS>
{
    /// Combine with the points fitted by `rhs`.
    fn add_assign(&mut self, rhs: &LeastSquaresOnline<ORDER, STATISTICS>) {
        self.statistic += &rhs.statistic;
    }
}

impl<const ORDER: usize, const STATISTICS: usize> std::ops::Add<&LeastSquaresOnline<ORDER, STATISTICS>>
    for LeastSquaresOnline<ORDER, STATISTICS>
{
    type Output = Self;

    fn add(mut self, rhs: &LeastSquaresOnline<ORDER, STATISTICS>) -> Self {
        self += rhs;
        self
    }
}

impl<const ORDER: usize, const STATISTICS: usize> Delimited for LeastSquaresOnline<ORDER, STATISTICS> {
    fn to_delimited(&self) -> String {
        self.statistic.to_delimited()
    }

    fn from_delimited(value: &str) -> Result<Self, ParseError> {
        CentralMoments::from_delimited(value).map(Self::from_statistic)
    }
}

impl<const ORDER: usize, const STATISTICS: usize> Checksum for LeastSquaresOnline<ORDER, STATISTICS> {
    fn checksum(&self, seed: u64) -> u64 {
        self.statistic.checksum(seed)
    }
}

impl<const ORDER: usize, const STATISTICS: usize> fmt::Display for LeastSquaresOnline<ORDER, STATISTICS> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let params = self.parameters();
        for i in (1..params.len()).rev() {
            write!(f, "{} x^{} + ", params[i], i)?;
        }
        write!(f, "{}", params[0])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_distr::{Distribution, Normal};
    use rand_xoshiro::Xoshiro256PlusPlus;

    #[test]
    fn test_binomial() {
        assert_eq!(binomial(4, 0), 1.0);
        assert_eq!(binomial(4, 4), 1.0);
        assert_eq!(binomial(4, 2), 6.0);
        assert_eq!(binomial(6, 3), 20.0);
    }

    #[test]
    fn test_exact_line() {
        let mut regression = LinearRegression::new();
        for i in 0..20 {
            let x = i as f64;
            regression.add(x, 3.0 + 0.5 * x, 1.0);
        }
        let params = regression.parameters();
        assert!((params[0] - 3.0).abs() < 1e-8, "Expected intercept 3, got {}", params[0]);
        assert!((params[1] - 0.5).abs() < 1e-8, "Expected slope 0.5, got {}", params[1]);
        assert!((regression.predict(40.0) - 23.0).abs() < 1e-6);
        assert_eq!(regression.count(), 20.0);
    }

    #[test]
    fn test_noisy_line_fit() {
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(42);
        let noise = Normal::new(0.0, 2.0).unwrap();
        let mut regression = LinearRegression::new();
        for i in 0..500 {
            let x = i as f64 / 10.0;
            regression.add(x, 5.0 + 2.0 * x + noise.sample(&mut rng), 1.0);
        }
        let params = regression.parameters();
        assert!((params[0] - 5.0).abs() < 0.8, "Expected intercept near 5, got {}", params[0]);
        assert!((params[1] - 2.0).abs() < 0.05, "Expected slope near 2, got {}", params[1]);
    }

    #[test]
    fn test_quadratic_fit() {
        let mut regression = QuadraticRegression::new();
        for i in 0..50 {
            let x = i as f64 / 5.0;
            regression.add(x, 1.0 - 2.0 * x + 0.25 * x * x, 1.0);
        }
        let params = regression.parameters();
        for (actual, expected) in params.iter().zip([1.0, -2.0, 0.25]) {
            assert!((actual - expected).abs() < 1e-6, "Expected {}, got {}", expected, actual);
        }
    }

    #[test]
    fn test_singular_falls_back_to_lower_order() {
        let mut regression = QuadraticRegression::new();
        regression.add(0.0, 1.0, 1.0);
        let params = regression.parameters();
        assert!((params[0] - 1.0).abs() < 1e-6);
        assert_eq!(params[1], 0.0);
        assert_eq!(params[2], 0.0);

        regression.add(1.0, 2.0, 1.0);
        let params = regression.parameters();
        assert!((params[0] - 1.0).abs() < 1e-6, "got {:?}", params);
        assert!((params[1] - 1.0).abs() < 1e-6, "got {:?}", params);
        assert!(params[2].abs() < 1e-6, "got {:?}", params);

        regression.add(2.0, 3.0, 1.0);
        let params = regression.parameters();
        assert!((params[0] - 1.0).abs() < 5e-6, "got {:?}", params);
        assert!((params[1] - 1.0).abs() < 5e-6, "got {:?}", params);
        assert!(params[2].abs() < 5e-6, "got {:?}", params);
    }

    #[test]
    fn test_shift_abscissa_matches_shifted_fit() {
        let mut regression = QuadraticRegression::new();
        let mut shifted = QuadraticRegression::new();
        for i in 0..100 {
            let x = i as f64;
            let y = 5.0 + 2.0 * x + 0.01 * x * x;
            regression.add(x, y, 1.0);
            shifted.add(x - 50.0, y, 1.0);
        }
        regression.shift_abscissa(-50.0);
        let actual = regression.parameters();
        let expected = shifted.parameters();
        for (a, e) in actual.iter().zip(&expected) {
            assert!((a - e).abs() < 1e-3 * e.abs().max(1e-3), "Expected {}, got {}", e, a);
        }
    }

    #[test]
    fn test_shift_ordinate() {
        let mut regression = LinearRegression::new();
        for i in 0..10 {
            let x = i as f64;
            regression.add(x, 1.0 + x, 1.0);
        }
        regression.shift_ordinate(4.0);
        let params = regression.parameters();
        assert!((params[0] - 5.0).abs() < 1e-8, "Expected intercept 5, got {}", params[0]);
        assert!((params[1] - 1.0).abs() < 1e-8, "Expected slope 1, got {}", params[1]);
        assert!((regression.mean() - 9.5).abs() < 1e-10);
    }

    #[test]
    fn test_age_with_mean_reversion_flattens() {
        let mut regression = LinearRegression::new();
        for i in 0..100 {
            let x = i as f64 / 10.0;
            regression.add(x, 100.0 + 5.0 * x, 1.0);
        }
        let before = regression.parameters();
        regression.age(0.5, true);
        let after = regression.parameters();
        assert!(after[1] < before[1], "Expected slope to shrink, {} -> {}", before[1], after[1]);
        assert!(after[1] > 0.0);
        assert!(after[0] > before[0]);
        assert_eq!(regression.count(), 50.0);
    }

    #[test]
    fn test_merge_matches_combined_fit() {
        let mut a = CubicRegression::new();
        let mut b = CubicRegression::new();
        let mut all = CubicRegression::new();
        for i in 0..40 {
            let x = i as f64 / 10.0;
            let y = 1.0 + x - 0.5 * x * x + 0.1 * x * x * x + ((i * 13) % 7) as f64 * 0.01;
            if i % 3 == 0 {
                a.add(x, y, 1.0);
            } else {
                b.add(x, y, 1.0);
            }
            all.add(x, y, 1.0);
        }
        let merged = (a + &b).parameters();
        let expected = all.parameters();
        for (m, e) in merged.iter().zip(&expected) {
            assert!((m - e).abs() < 1e-6 * e.abs().max(1.0), "Expected {}, got {}", e, m);
        }
    }

    #[test]
    fn test_mean_between() {
        let mut regression = LinearRegression::new();
        for i in 0..10 {
            let x = i as f64;
            regression.add(x, 2.0 * x, 1.0);
        }
        assert!((regression.mean_between(0.0, 4.0) - 4.0).abs() < 1e-8);
        assert!((regression.mean_between(3.0, 3.0) - 6.0).abs() < 1e-8);
    }

    #[test]
    fn test_predict_short_range_returns_mean() {
        let mut regression = LinearRegression::new();
        regression.add(0.0, 1.0, 1.0);
        regression.add(0.1, 3.0, 1.0);
        assert!(regression.range() < MINIMUM_RANGE_TO_PREDICT);
        assert!((regression.predict(10.0) - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_covariances_scale_with_variance() {
        let mut regression = LinearRegression::new();
        for i in 0..100 {
            regression.add(i as f64 / 10.0, 0.0, 1.0);
        }
        let c1 = regression.covariances(1.0);
        let c2 = regression.covariances(2.0);
        assert!(c1.get(0, 0) > 0.0);
        assert!(c1.get(1, 1) > 0.0);
        assert!((c2.get(1, 1) - 2.0 * c1.get(1, 1)).abs() < 1e-12);
    }

    #[test]
    fn test_persistence_round_trip() {
        let mut regression = CubicRegression::new();
        for i in 0..30 {
            let x = i as f64 * 0.3;
            regression.add(x, x.sin(), 1.0 + (i % 3) as f64);
        }
        let restored = CubicRegression::from_delimited(&regression.to_delimited()).unwrap();
        assert_eq!(restored, regression);
        assert_eq!(restored.checksum(0), regression.checksum(0));
        assert!(CubicRegression::from_delimited("1:2:3").is_err());
    }
}
