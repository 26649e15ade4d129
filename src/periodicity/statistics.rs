//! Running statistics of one periodicity test.

use seasonal_core::statistics::variance_at_percentile;
use seasonal_core::{FloatMeanAccumulator, MeanVarAccumulator, Time, TimeInterval};

use super::bucketing::periodic_trend_in;
use crate::config::Config;

/// The unexplained variance and degrees of freedom as components are
/// accepted, plus the candidate values of the component under test.
///
/// A test sets the candidate values and the caller commits them if the
/// component is accepted, so later components are tested against what the
/// accepted ones leave unexplained.
#[derive(Debug, Clone)]
pub(crate) struct TestStatistics {
    pub periods: [Time; 2],
    pub buckets_per_short: f64,
    pub buckets_per_long: f64,
    pub populated_buckets: f64,
    pub values_per_bucket: f64,
    pub unexplained_variance: f64,
    pub degrees_of_freedom: f64,
    pub candidate_unexplained_variance: f64,
    pub candidate_degrees_of_freedom: f64,
    pub start_of_partition: Time,
    pub shortest_interval: Time,
    variance_ratio: f64,
    amplitude_in_sds: f64,
}

impl TestStatistics {
    /// Statistics of the values before any component is removed, or `None`
    /// if there are too few populated buckets or too little variation to
    /// test.
    #[allow(clippy::too_many_arguments)]
    pub fn initialize(
        values: &[FloatMeanAccumulator],
        bucket_length: Time,
        windows: &[TimeInterval],
        periods: [Time; 2],
        partition: &[Time],
        populated: f64,
        count: f64,
        config: &Config,
    ) -> Option<Self> {
        let &(start, end) = windows.first()?;
        let window = end - start;
        let populated_buckets = (window / bucket_length) as f64 * populated;
        let values_per_bucket = count / populated_buckets;
        tracing::trace!(populated_buckets, values_per_bucket, "Test statistics");

        if populated_buckets <= 2.0 {
            return None;
        }

        let mut trend = [MeanVarAccumulator::new()];
        periodic_trend_in(values, windows, bucket_length, &mut trend);
        let mean = trend[0].mean();
        let variance = trend[0].variance();
        tracing::trace!(mean, variance, "Level");
        if variance <= config.minimum_coefficient_of_variation * mean {
            return None;
        }

        Some(Self {
            periods,
            buckets_per_short: (periods[0] / bucket_length) as f64,
            buckets_per_long: (periods[1] / bucket_length) as f64,
            populated_buckets,
            values_per_bucket,
            unexplained_variance: variance_at_percentile(
                variance,
                populated_buckets - 1.0,
                config.upper_percentile(),
            ),
            degrees_of_freedom: populated_buckets - 1.0,
            candidate_unexplained_variance: 0.0,
            candidate_degrees_of_freedom: 0.0,
            start_of_partition: 0,
            shortest_interval: partition.iter().copied().min().unwrap_or(0),
            variance_ratio: config.has_period_variance_ratio,
            amplitude_in_sds: config.has_period_amplitude_in_sds,
        })
    }

    /// Accept the candidate values if `commit`.
    pub fn commit_candidates(&mut self, commit: bool) {
        if commit {
            self.unexplained_variance = self.candidate_unexplained_variance;
            self.degrees_of_freedom = self.candidate_degrees_of_freedom;
        }
    }

    pub fn can_test_for_short(&self, bucket_length: Time) -> bool {
        bucket_length <= self.periods[0] / 4 && self.populated_buckets > 2.9 * self.buckets_per_short
    }

    pub fn can_test_for_partition(&self, bucket_length: Time) -> bool {
        bucket_length <= self.shortest_interval / 2 && self.populated_buckets > 1.8 * self.buckets_per_long
    }

    pub fn can_test_for_long(&self, bucket_length: Time) -> bool {
        bucket_length <= self.periods[1] / 4 && self.populated_buckets > 1.8 * self.buckets_per_long
    }

    /// The F statistic of the candidate against the unexplained variance.
    pub fn f(&self) -> f64 {
        self.candidate_unexplained_variance / self.unexplained_variance
    }

    pub fn amplitude_threshold(&self) -> f64 {
        self.amplitude_in_sds * (self.values_per_bucket * self.unexplained_variance).sqrt()
    }

    pub fn variance_threshold(&self) -> f64 {
        self.variance_ratio * self.unexplained_variance
    }
}
