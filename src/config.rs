//! Tunables for the periodicity, trend and randomized tests.
//!
//! The defaults are the values the tests were calibrated with. Changing them
//! trades false positives against sensitivity; `validate` only checks that a
//! value is meaningful, not that it is sensible.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Configuration shared by the detectors in this crate.
///
/// Every detector takes its own copy, so two detectors may be tuned
/// differently. The configuration is not persisted with detector state,
/// except for [`Trend`](crate::Trend), which persists its `decay_rate` and
/// restores it over the configured one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    // =========================================================================
    // Significance
    // =========================================================================
    /// Largest F-test probability at which a variance reduction counts as
    /// significant.
    ///
    /// Default: 0.005.
    pub maximum_significance: f64,

    /// Width in percent of the two sided confidence interval used to bound
    /// test statistics. Variances are taken at the upper end and
    /// autocorrelations at the lower end of this interval.
    ///
    /// Default: 80.
    pub confidence_interval: f64,

    /// Largest probability that the randomized projection energy ratio arose
    /// by chance for a period to be reported.
    ///
    /// Default: 1e-3.
    pub randomized_significance: f64,

    // =========================================================================
    // Periodicity thresholds
    // =========================================================================
    /// Fraction of the window's buckets that must be populated before the
    /// amplitude test may confirm a short period.
    ///
    /// Default: 0.9.
    pub accurate_test_populated_fraction: f64,

    /// Smallest variance, relative to the mean, worth testing at all.
    ///
    /// Default: 1e-4.
    pub minimum_coefficient_of_variation: f64,

    /// A period must leave at most this fraction of the unexplained variance.
    ///
    /// Default: 0.7.
    pub has_period_variance_ratio: f64,

    /// A partition must leave at most this fraction of the unexplained variance.
    ///
    /// Default: 0.5.
    pub has_partition_variance_ratio: f64,

    /// Amplitude, in residual standard deviations, that a periodic trend must
    /// exceed to pass the amplitude test.
    ///
    /// Default: 1.0.
    pub has_period_amplitude_in_sds: f64,

    /// Autocorrelation at the period lag required to confirm a period.
    ///
    /// Default: 0.5.
    pub minimum_autocorrelation: f64,

    // =========================================================================
    // Trend
    // =========================================================================
    /// The detrended variance must be below this fraction of the raw variance.
    ///
    /// Default: 0.5.
    pub has_trend_variance_ratio: f64,

    // =========================================================================
    // Aging
    // =========================================================================
    /// Exponential decay rate per unit of propagated time.
    ///
    /// Default: 0 (no aging).
    pub decay_rate: f64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            maximum_significance: 0.005,
            confidence_interval: 80.0,
            randomized_significance: 1e-3,
            accurate_test_populated_fraction: 0.9,
            minimum_coefficient_of_variation: 1e-4,
            has_period_variance_ratio: 0.7,
            has_partition_variance_ratio: 0.5,
            has_period_amplitude_in_sds: 1.0,
            minimum_autocorrelation: 0.5,
            has_trend_variance_ratio: 0.5,
            decay_rate: 0.0,
        }
    }
}

impl Config {
    /// Create a new configuration with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    // =========================================================================
    // Builder methods
    // =========================================================================

    /// Set the maximum F-test significance.
    pub fn maximum_significance(mut self, significance: f64) -> Self {
        self.maximum_significance = significance;
        self
    }

    /// Set the confidence interval in percent.
    pub fn confidence_interval(mut self, percentage: f64) -> Self {
        self.confidence_interval = percentage;
        self
    }

    /// Set the randomized projection test significance.
    pub fn randomized_significance(mut self, significance: f64) -> Self {
        self.randomized_significance = significance;
        self
    }

    /// Set the populated fraction needed for the amplitude test.
    pub fn accurate_test_populated_fraction(mut self, fraction: f64) -> Self {
        self.accurate_test_populated_fraction = fraction;
        self
    }

    /// Set the minimum coefficient of variation.
    pub fn minimum_coefficient_of_variation(mut self, coefficient: f64) -> Self {
        self.minimum_coefficient_of_variation = coefficient;
        self
    }

    /// Set the variance ratio a period must achieve.
    pub fn has_period_variance_ratio(mut self, ratio: f64) -> Self {
        self.has_period_variance_ratio = ratio;
        self
    }

    /// Set the variance ratio a partition must achieve.
    pub fn has_partition_variance_ratio(mut self, ratio: f64) -> Self {
        self.has_partition_variance_ratio = ratio;
        self
    }

    /// Set the amplitude threshold in standard deviations.
    pub fn has_period_amplitude_in_sds(mut self, sds: f64) -> Self {
        self.has_period_amplitude_in_sds = sds;
        self
    }

    /// Set the minimum autocorrelation.
    pub fn minimum_autocorrelation(mut self, autocorrelation: f64) -> Self {
        self.minimum_autocorrelation = autocorrelation;
        self
    }

    /// Set the variance ratio the trend test requires.
    pub fn has_trend_variance_ratio(mut self, ratio: f64) -> Self {
        self.has_trend_variance_ratio = ratio;
        self
    }

    /// Set the decay rate.
    pub fn decay_rate(mut self, rate: f64) -> Self {
        self.decay_rate = rate;
        self
    }

    // =========================================================================
    // Derived values
    // =========================================================================

    /// Percentile at the upper end of the confidence interval.
    pub(crate) fn upper_percentile(&self) -> f64 {
        50.0 + self.confidence_interval / 2.0
    }

    /// Percentile at the lower end of the confidence interval.
    pub(crate) fn lower_percentile(&self) -> f64 {
        50.0 - self.confidence_interval / 2.0
    }

    /// Check every value is in its meaningful range.
    pub fn validate(&self) -> Result<()> {
        fn probability(name: &str, value: f64) -> Result<()> {
            if value > 0.0 && value < 1.0 {
                Ok(())
            } else {
                Err(Error::InvalidConfig(format!("{} must be in (0, 1), got {}", name, value)))
            }
        }
        fn ratio(name: &str, value: f64) -> Result<()> {
            if value > 0.0 && value <= 1.0 {
                Ok(())
            } else {
                Err(Error::InvalidConfig(format!("{} must be in (0, 1], got {}", name, value)))
            }
        }
        fn non_negative(name: &str, value: f64) -> Result<()> {
            if value.is_finite() && value >= 0.0 {
                Ok(())
            } else {
                Err(Error::InvalidConfig(format!(
                    "{} must be finite and non-negative, got {}",
                    name, value
                )))
            }
        }

        probability("maximum_significance", self.maximum_significance)?;
        probability("randomized_significance", self.randomized_significance)?;
        if !(self.confidence_interval > 0.0 && self.confidence_interval < 100.0) {
            return Err(Error::InvalidConfig(format!(
                "confidence_interval must be in (0, 100), got {}",
                self.confidence_interval
            )));
        }
        ratio("accurate_test_populated_fraction", self.accurate_test_populated_fraction)?;
        ratio("has_period_variance_ratio", self.has_period_variance_ratio)?;
        ratio("has_partition_variance_ratio", self.has_partition_variance_ratio)?;
        ratio("minimum_autocorrelation", self.minimum_autocorrelation)?;
        ratio("has_trend_variance_ratio", self.has_trend_variance_ratio)?;
        non_negative("minimum_coefficient_of_variation", self.minimum_coefficient_of_variation)?;
        non_negative("has_period_amplitude_in_sds", self.has_period_amplitude_in_sds)?;
        non_negative("decay_rate", self.decay_rate)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.upper_percentile(), 90.0);
        assert_eq!(config.lower_percentile(), 10.0);
    }

    #[test]
    fn test_builder_rejects_out_of_range() {
        assert!(Config::new().maximum_significance(0.0).validate().is_err());
        assert!(Config::new().confidence_interval(100.0).validate().is_err());
        assert!(Config::new().has_period_variance_ratio(1.5).validate().is_err());
        assert!(Config::new().decay_rate(-1.0).validate().is_err());
        assert!(Config::new().decay_rate(f64::NAN).validate().is_err());
        assert!(Config::new().decay_rate(0.01).validate().is_ok());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: Config = serde_json::from_str(r#"{"decay_rate": 0.2}"#).unwrap();
        assert_eq!(config.decay_rate, 0.2);
        assert_eq!(config.maximum_significance, 0.005);

        let json = serde_json::to_string(&config).unwrap();
        let restored: Config = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, config);
    }
}
