//! Test for a polynomial trend.
//!
//! [`Trend`] fits a cubic in time, measured in weeks from an origin that
//! moves forward every few weeks to keep the abscissa small, and compares
//! the variance of the values with the variance of their residuals from the
//! fit.

use seasonal_core::codec::Delimited;
use seasonal_core::constants::WEEK;
use seasonal_core::statistics::{f_test, variance_at_percentile, CentralMoments, CubicRegression};
use seasonal_core::{Checksum, Time, Vector};

use crate::config::Config;
use crate::error::Result;
use crate::persist::{insert_display, parse_field, require, StateInserter, StateTraverser};

/// Order of the fitted polynomial.
pub const ORDER: usize = 3;

const DECAY_RATE_TAG: &str = "a";
const TIME_ORIGIN_TAG: &str = "b";
const TREND_TAG: &str = "c";
const VARIANCES_TAG: &str = "d";
const REGRESSION_TAG: &str = "a";

/// The origin moves once a value arrives this long after it.
const SHIFT_INTERVAL: Time = 3 * WEEK;

type VarianceAccumulator = CentralMoments<Vector<2>, 2>;

/// A cubic trend and the variances of the values with and without it.
#[derive(Debug, Clone, PartialEq)]
pub struct Trend {
    config: Config,
    time_origin: Time,
    trend: CubicRegression,
    /// Mean and variance of the values and their residuals.
    variances: VarianceAccumulator,
}

impl Trend {
    pub fn new(decay_rate: f64) -> Self {
        Self::with_config(Config::default().decay_rate(decay_rate))
    }

    pub fn with_config(config: Config) -> Self {
        Self {
            config,
            time_origin: Time::MIN,
            trend: CubicRegression::new(),
            variances: VarianceAccumulator::new(),
        }
    }

    pub fn set_decay_rate(&mut self, decay_rate: f64) {
        self.config.decay_rate = decay_rate;
    }

    /// Age the fit and variances by the decay over `time`.
    pub fn propagate_forwards_by_time(&mut self, time: f64) {
        if !time.is_finite() || time < 0.0 {
            tracing::error!(time, "Bad propagation time");
            return;
        }
        let factor = (-self.config.decay_rate * time).exp();
        self.trend.age(factor, false);
        self.variances.age(factor);
    }

    /// Add `value` at `time` to the fit.
    pub fn add(&mut self, time: Time, value: f64, weight: f64) {
        if self.time_origin == Time::MIN {
            self.time_origin = time;
        } else if time.saturating_sub(SHIFT_INTERVAL) >= self.time_origin {
            tracing::trace!(time, origin = self.time_origin, "Shifting trend origin");
            self.trend.shift_abscissa(-self.time(time));
            self.time_origin = time;
        }
        self.trend.add(self.time(time), value, weight);
    }

    /// Record `value` and its residual from the current fit.
    pub fn capture_variance(&mut self, time: Time, value: f64, weight: f64) {
        let prediction = self.trend.predict(self.time(time));
        self.variances
            .add_weighted(Vector::from_array([value, value - prediction]), weight);
    }

    /// Move the fit by `shift`.
    pub fn shift(&mut self, shift: f64) {
        self.trend.shift_ordinate(shift);
    }

    /// True if removing the trend significantly reduces the variance.
    pub fn test(&self) -> bool {
        let n = self.variances.count();
        let d0 = n - 1.0;
        let d1 = n - ORDER as f64 - 1.0;
        let variances = self.variances.maximum_likelihood_variance();
        let (v0, v1) = (variances[0], variances[1]);
        if d1 <= 0.0 {
            return false;
        }
        let upper = variance_at_percentile(v1, n, self.config.confidence_interval);
        tracing::trace!(n, v0, v1, upper, "Trend variances");
        if upper >= self.config.has_trend_variance_ratio * v0 {
            return false;
        }
        match f_test(v1 / v0, d1, d0) {
            Ok(p) => p <= self.config.maximum_significance,
            Err(e) => {
                tracing::error!(error = %e, "Failed to test for trend");
                false
            }
        }
    }

    pub fn trend(&self) -> &CubicRegression {
        &self.trend
    }

    pub fn origin(&self) -> Time {
        self.time_origin
    }

    /// Residual variance from the fit.
    pub fn variance(&self) -> f64 {
        self.variances.maximum_likelihood_variance()[1]
    }

    pub fn checksum(&self, seed: u64) -> u64 {
        let seed = self.config.decay_rate.checksum(seed);
        let seed = self.time_origin.checksum(seed);
        let seed = self.trend.checksum(seed);
        self.variances.checksum(seed)
    }

    pub fn persist(&self, inserter: &mut dyn StateInserter) {
        insert_display(inserter, DECAY_RATE_TAG, self.config.decay_rate);
        insert_display(inserter, TIME_ORIGIN_TAG, self.time_origin);
        inserter.insert_level(TREND_TAG, &mut |level| {
            level.insert_value(REGRESSION_TAG, self.trend.to_delimited());
        });
        inserter.insert_value(VARIANCES_TAG, self.variances.to_delimited());
    }

    /// Restore a trend persisted by [`persist`](Self::persist). The persisted
    /// decay rate overrides the one in `config`.
    pub fn restore(config: Config, traverser: &dyn StateTraverser) -> Result<Self> {
        const CONTEXT: &str = "trend";
        let mut decay_rate = None;
        let mut time_origin = None;
        let mut trend = None;
        let mut variances = None;
        for (tag, entry) in traverser.entries() {
            match tag {
                DECAY_RATE_TAG => decay_rate = Some(parse_field::<f64>(entry.value(tag)?)?),
                TIME_ORIGIN_TAG => time_origin = Some(parse_field::<Time>(entry.value(tag)?)?),
                TREND_TAG => {
                    for (tag, entry) in entry.level(tag)?.entries() {
                        if tag == REGRESSION_TAG {
                            trend = Some(CubicRegression::from_delimited(entry.value(tag)?)?);
                        }
                    }
                }
                VARIANCES_TAG => variances = Some(VarianceAccumulator::from_delimited(entry.value(tag)?)?),
                _ => {}
            }
        }
        Ok(Self {
            config: config.decay_rate(require(decay_rate, DECAY_RATE_TAG, CONTEXT)?),
            time_origin: require(time_origin, TIME_ORIGIN_TAG, CONTEXT)?,
            trend: require(trend, TREND_TAG, CONTEXT)?,
            variances: require(variances, VARIANCES_TAG, CONTEXT)?,
        })
    }

    fn time(&self, time: Time) -> f64 {
        time.saturating_sub(self.time_origin) as f64 / WEEK as f64
    }
}
