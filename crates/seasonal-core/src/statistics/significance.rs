//! Significance helpers for the trend and periodicity tests.
//!
//! Every helper that takes a percentage turns invalid distribution
//! parameters into a logged error and the neutral value (the input
//! statistic itself), so a sparse history weakens a test instead of
//! aborting it.

use statrs::distribution::{ChiSquared, ContinuousCDF, FisherSnedecor, Normal};

use crate::error::DistributionError;

fn check_percentage(percentage: f64) -> Result<f64, DistributionError> {
    if (0.0..=100.0).contains(&percentage) {
        Ok(percentage / 100.0)
    } else {
        Err(DistributionError(format!("percentage {} outside [0, 100]", percentage)))
    }
}

/// Lower tail probability of the F distribution with `d1` and `d2`
/// degrees of freedom at `x`.
///
/// Small values mean the numerator variance is significantly smaller than
/// the denominator variance.
///
/// # Arguments
/// * `x` - The variance ratio
/// * `d1` - Degrees of freedom of the numerator
/// * `d2` - Degrees of freedom of the denominator
///
/// # Returns
/// The probability `P(F <= x)`, or an error if either degrees of freedom is
/// not positive and finite or `x` is NaN.
pub fn f_test(x: f64, d1: f64, d2: f64) -> Result<f64, DistributionError> {
    if x.is_nan() || !(d1.is_finite() && d2.is_finite()) {
        return Err(DistributionError(format!("x = {}, d1 = {}, d2 = {}", x, d1, d2)));
    }
    let f = FisherSnedecor::new(d1, d2)
        .map_err(|e| DistributionError(format!("{}: d1 = {}, d2 = {}", e, d1, d2)))?;
    if x <= 0.0 {
        return Ok(0.0);
    }
    if !(d1 * x).is_finite() {
        return Ok(1.0);
    }
    Ok(f.cdf(x))
}

/// The `percentage` percentile of the mean of `n` normal variables with
/// mean `mean` and variance `variance`.
pub fn mean_at_percentile(mean: f64, variance: f64, n: f64, percentage: f64) -> f64 {
    let quantile = check_percentage(percentage).and_then(|p| {
        let normal = Normal::new(mean, (variance / n).sqrt())
            .map_err(|e| DistributionError(e.to_string()))?;
        Ok(normal.inverse_cdf(p))
    });
    match quantile {
        Ok(quantile) => quantile,
        Err(e) => {
            tracing::error!(error = %e, n, percentage, "Bad input");
            mean
        }
    }
}

/// The `percentage` percentile of a sample variance of `n` values, whose
/// scaled value is chi-squared with `n - 1` degrees of freedom.
pub fn variance_at_percentile(variance: f64, n: f64, percentage: f64) -> f64 {
    let quantile = check_percentage(percentage).and_then(|p| {
        let chi = ChiSquared::new(n - 1.0).map_err(|e| DistributionError(e.to_string()))?;
        Ok(chi.inverse_cdf(p) / (n - 1.0))
    });
    match quantile {
        Ok(quantile) => quantile * variance,
        Err(e) => {
            tracing::error!(error = %e, n, percentage, "Bad input");
            variance
        }
    }
}

/// The `percentage` percentile of an autocorrelation of `n` values, treated
/// as F distributed with `n - 1` and `n - 1` degrees of freedom.
pub fn autocorrelation_at_percentile(autocorrelation: f64, n: f64, percentage: f64) -> f64 {
    let quantile = check_percentage(percentage).and_then(|p| {
        let f = FisherSnedecor::new(n - 1.0, n - 1.0)
            .map_err(|e| DistributionError(e.to_string()))?;
        Ok(f.inverse_cdf(p))
    });
    match quantile {
        Ok(quantile) => quantile * autocorrelation,
        Err(e) => {
            tracing::error!(error = %e, n, percentage, "Bad input");
            autocorrelation
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_f_test_median_of_equal_dof() {
        let p = f_test(1.0, 10.0, 10.0).unwrap();
        assert!((p - 0.5).abs() < 1e-10, "Expected 0.5, got {}", p);
    }

    #[test]
    fn test_f_test_tails() {
        assert_eq!(f_test(0.0, 5.0, 5.0).unwrap(), 0.0);
        assert_eq!(f_test(-1.0, 5.0, 5.0).unwrap(), 0.0);
        assert_eq!(f_test(f64::INFINITY, 5.0, 5.0).unwrap(), 1.0);
        let small = f_test(0.1, 50.0, 50.0).unwrap();
        assert!(small < 1e-10, "Expected a tiny lower tail, got {}", small);
    }

    #[test]
    fn test_f_test_rejects_bad_dof() {
        assert!(f_test(1.0, 0.0, 5.0).is_err());
        assert!(f_test(1.0, 5.0, -1.0).is_err());
        assert!(f_test(f64::NAN, 5.0, 5.0).is_err());
    }

    #[test]
    fn test_mean_at_percentile() {
        let median = mean_at_percentile(10.0, 4.0, 4.0, 50.0);
        assert!((median - 10.0).abs() < 1e-3, "Expected 10, got {}", median);
        let upper = mean_at_percentile(10.0, 4.0, 4.0, 84.134_474_6);
        assert!((upper - 11.0).abs() < 1e-3, "Expected 11, got {}", upper);
        assert_eq!(mean_at_percentile(10.0, 4.0, 4.0, -5.0), 10.0);
    }

    #[test]
    fn test_variance_at_percentile() {
        // The median of chi-squared with k degrees of freedom is near k (1 - 2 / 9k)^3.
        let k: f64 = 100.0;
        let expected = (1.0 - 2.0 / (9.0 * k)).powi(3);
        let median = variance_at_percentile(1.0, k + 1.0, 50.0);
        assert!((median - expected).abs() < 1e-3, "Expected {}, got {}", expected, median);
        assert!(variance_at_percentile(2.0, 20.0, 80.0) > 2.0);
        assert!(variance_at_percentile(2.0, 20.0, 20.0) < 2.0);
    }

    #[test]
    fn test_degenerate_inputs_are_neutral() {
        assert_eq!(variance_at_percentile(3.0, 1.0, 80.0), 3.0);
        assert_eq!(autocorrelation_at_percentile(0.6, 1.0, 80.0), 0.6);
        assert_eq!(variance_at_percentile(3.0, 10.0, 120.0), 3.0);
    }

    #[test]
    fn test_autocorrelation_at_percentile() {
        let median = autocorrelation_at_percentile(0.5, 201.0, 50.0);
        assert!((median - 0.5).abs() < 0.01, "Expected about 0.5, got {}", median);
        assert!(autocorrelation_at_percentile(0.5, 50.0, 90.0) > 0.5);
    }
}
