//! Tests for periodic components of a bucketed history.
//!
//! A [`Periodicity`] keeps one mean accumulator per bucket of a window that
//! spans a whole number of the longer of two candidate periods, e.g. a
//! fortnight of hourly buckets for a daily and a weekly period. Its
//! [`test`](Periodicity::test) decides which periods are present, and
//! optionally whether the long period splits into two intervals with
//! different behaviour, e.g. weekends and weekdays.
//!
//! The test runs in stages:
//!
//! 1. The short period is accepted if removing its trend significantly
//!    reduces the unexplained variance, or its amplitude is large, and the
//!    history autocorrelates at its lag.
//! 2. The partition is accepted if fitting the short period separately to
//!    the two intervals, at the best start, significantly reduces the
//!    unexplained variance.
//! 3. The long period is tested like the short one.
//! 4. If a partition or the long period was accepted, both periods are
//!    fitted jointly and each component is kept only if it explains enough
//!    variance and the remainder autocorrelates at its lag.

mod bucketing;
pub mod daily_weekly;
mod result;
pub mod scanning;
mod statistics;

use std::mem::size_of;

use seasonal_core::codec::{join_delimited, split_delimited};
use seasonal_core::constants::LIST_DELIMITER;
use seasonal_core::statistics::{autocorrelation, autocorrelation_at_percentile, f_test, variance_at_percentile};
use seasonal_core::{Checksum, FloatMeanAccumulator, MeanVarAccumulator, Time, TimeInterval};

pub use daily_weekly::{daily_and_weekly, print_daily_and_weekly, PERMITTED_BUCKET_LENGTHS};
pub use result::{Interval, Period, PeriodicityResult};
pub use scanning::ScanningPeriodicity;

use bucketing::{
    minimum_autocorrelation, periodic_trend_in, remainder_autocorrelation, residual_variance,
    trend_amplitude, trend_residual_variance, trend_variance,
};
use statistics::TestStatistics;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::persist::{insert_display, join_times, parse_field, parse_times, require, StateInserter, StateTraverser};

const WINDOW_TAG: &str = "a";
const BUCKET_LENGTH_TAG: &str = "b";
const PERIODS_TAG: &str = "c";
const PARTITION_TAG: &str = "d";
const BUCKET_VALUES_TAG: &str = "e";

/// A decomposed trend: the time interval each bucket covers in the first
/// window, and the mean and variance of the component in that bucket.
pub type TrendTable = Vec<(TimeInterval, MeanVarAccumulator)>;

/// Test for a short and a long period, and a partition of the long period,
/// in a bucketed history.
#[derive(Debug, Clone, PartialEq)]
pub struct Periodicity {
    config: Config,
    bucket_length: Time,
    window: Time,
    /// The short then the long period, or empty if uninitialized.
    periods: Vec<Time>,
    /// Lengths of the first and second interval, or empty.
    partition: Vec<Time>,
    bucket_values: Vec<FloatMeanAccumulator>,
}

impl Periodicity {
    /// An uninitialized test aging at `decay_rate`.
    pub fn new(decay_rate: f64) -> Self {
        Self::with_config(Config::default().decay_rate(decay_rate))
    }

    /// An uninitialized test using `config`.
    pub fn with_config(config: Config) -> Self {
        Self {
            config,
            bucket_length: 0,
            window: 0,
            periods: Vec::new(),
            partition: Vec::new(),
            bucket_values: Vec::new(),
        }
    }

    /// Configure the periods to test and reset the history to `initial`.
    ///
    /// The following must hold:
    /// - there are exactly two periods, and the partition is empty or has
    ///   two parts summing to the long period;
    /// - the window exceeds the long period, and is a multiple of it if it
    ///   is more than twice it;
    /// - both periods are multiples of the bucket length and the long
    ///   period is a multiple of the short one.
    ///
    /// Otherwise the test is left uninitialized and an error describing the
    /// violated condition is returned.
    pub fn initialize(
        &mut self,
        bucket_length: Time,
        window: Time,
        periods: &[Time],
        partition: &[Time],
        initial: &[FloatMeanAccumulator],
    ) -> Result<()> {
        let mut periods = periods.to_vec();
        periods.sort_unstable();

        if let Err(e) = validate(bucket_length, window, &periods, partition) {
            tracing::debug!(error = %e, "Rejected periodicity configuration");
            self.periods.clear();
            self.bucket_values.clear();
            return Err(e);
        }

        self.window = window;
        self.periods = periods;
        self.partition = partition.to_vec();
        self.bucket_length = bucket_length;
        self.bucket_values = vec![FloatMeanAccumulator::new(); (window / bucket_length) as usize];
        let n = initial.len().min(self.bucket_values.len());
        self.bucket_values[..n].copy_from_slice(&initial[..n]);
        Ok(())
    }

    /// True if [`initialize`](Self::initialize) succeeded.
    pub fn initialized(&self) -> bool {
        !self.bucket_values.is_empty()
    }

    pub fn set_decay_rate(&mut self, decay_rate: f64) {
        self.config.decay_rate = decay_rate;
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn bucket_length(&self) -> Time {
        self.bucket_length
    }

    pub fn window(&self) -> Time {
        self.window
    }

    /// The short and long periods, in ascending order.
    pub fn periods(&self) -> &[Time] {
        &self.periods
    }

    pub fn partition(&self) -> &[Time] {
        &self.partition
    }

    pub fn bucket_values(&self) -> &[FloatMeanAccumulator] {
        &self.bucket_values
    }

    /// Age the history by the decay over `time`.
    pub fn propagate_forwards_by_time(&mut self, time: f64) {
        if time < 0.0 {
            tracing::error!(time, "Can't propagate bucketing backwards in time");
            return;
        }
        if !self.initialized() {
            return;
        }
        let factor = (-self.config.decay_rate * time).exp();
        for value in self.bucket_values.iter_mut() {
            value.age(factor);
        }
    }

    /// Add `value` with `weight` to the bucket containing `time`.
    pub fn add(&mut self, time: Time, value: f64, weight: f64) {
        if self.initialized() {
            let i = (time.rem_euclid(self.window) / self.bucket_length) as usize;
            self.bucket_values[i].add_weighted(value as f32, weight);
        }
    }

    /// Fraction of buckets with any values.
    pub fn populated_ratio(&self) -> f64 {
        if self.bucket_values.is_empty() {
            return 0.0;
        }
        let populated = self.bucket_values.iter().filter(|value| value.count() > 0.0).count();
        populated as f64 / self.bucket_values.len() as f64
    }

    /// True if enough buckets are populated for the amplitude test.
    pub fn seen_sufficient_data(&self) -> bool {
        if !self.initialized() {
            return false;
        }
        self.bucket_values.len() as f64 * self.populated_ratio()
            > self.config.accurate_test_populated_fraction * (self.window / self.bucket_length) as f64
    }

    /// Total weight of the values in the history.
    pub fn count(&self) -> f64 {
        self.bucket_values.iter().map(FloatMeanAccumulator::count).sum()
    }

    /// Bytes allocated on the heap.
    pub fn memory_usage(&self) -> usize {
        size_of::<Time>() * (self.periods.capacity() + self.partition.capacity())
            + size_of::<FloatMeanAccumulator>() * self.bucket_values.capacity()
    }

    pub fn checksum(&self, seed: u64) -> u64 {
        let seed = self.config.decay_rate.checksum(seed);
        let seed = self.bucket_length.checksum(seed);
        let seed = self.window.checksum(seed);
        let seed = self.periods.checksum(seed);
        let seed = self.partition.checksum(seed);
        self.bucket_values.checksum(seed)
    }

    // ========================================================================
    // Test
    // ========================================================================

    /// Test which periods are present in the history.
    ///
    /// Returns an empty result if uninitialized, or if the history is too
    /// sparse or too flat to test.
    pub fn test(&self) -> PeriodicityResult {
        let mut result = PeriodicityResult::new();
        if !self.initialized() {
            return result;
        }

        let Some(mut statistics) = TestStatistics::initialize(
            &self.bucket_values,
            self.bucket_length,
            &self.windows(Interval::Full, 0),
            [self.periods[0], self.periods[1]],
            &self.partition,
            self.populated_ratio(),
            self.count(),
            &self.config,
        ) else {
            return result;
        };

        let period = (self.periods[0] / self.bucket_length) as usize;
        let has_short = statistics.can_test_for_short(self.bucket_length)
            && (self.test_component_using_unexplained_variance(period, &mut statistics)
                || (self.seen_sufficient_data() && self.test_component_using_amplitude(period, &statistics)))
            && self.test_autocorrelation(period, &statistics);
        tracing::trace!(has_short, "Short period");
        statistics.commit_candidates(has_short);

        let has_partition = statistics.can_test_for_partition(self.bucket_length)
            && self.test_for_partition_using_unexplained_variance(&mut statistics);
        tracing::trace!(has_partition, "Partition");
        statistics.commit_candidates(has_partition);

        let period = (self.periods[1] / self.bucket_length) as usize;
        let has_long = statistics.can_test_for_long(self.bucket_length)
            && (self.test_component_using_unexplained_variance(period, &mut statistics)
                || (!has_short && self.test_component_using_amplitude(period, &statistics)))
            && self.test_autocorrelation(period, &statistics);
        tracing::trace!(has_long, "Long period");
        if !has_partition && !has_long {
            result.add_if(has_short, Interval::Full, Period::Short);
            return result;
        }
        statistics.commit_candidates(has_long);

        // Decompose and check each component explains significant variance
        // and autocorrelates once the other is removed.

        let mut candidate = PeriodicityResult::new();
        candidate.add_if(true, Interval::Full, Period::Both);
        candidate.add_if(has_partition, Interval::First, Period::Both);
        candidate.add_if(has_partition, Interval::Second, Period::Both);
        candidate.set_start_of_partition(statistics.start_of_partition);

        let trends = self.trends(&candidate);

        if has_partition {
            for interval in [Interval::First, Interval::Second] {
                let short = &trends[PeriodicityResult::index(interval, Period::Short)];
                let long = &trends[PeriodicityResult::index(interval, Period::Long)];
                let windows = self.windows(interval, candidate.start_of_partition());
                result.add_if(
                    self.test_component_using_explained_variance(short, long, &windows, &statistics),
                    interval,
                    Period::Short,
                );
                result.add_if(
                    self.test_component_using_explained_variance(long, short, &windows, &statistics),
                    interval,
                    Period::Long,
                );
            }
            if result.periods(Interval::First).contains(Period::Short)
                || result.periods(Interval::Second).contains(Period::Short)
            {
                result.set_start_of_partition(candidate.start_of_partition());
                result.add_if(result.periods(Interval::First) == Period::None, Interval::First, Period::Long);
                result.add_if(result.periods(Interval::Second) == Period::None, Interval::Second, Period::Long);
                return result;
            }
        }

        let short = &trends[PeriodicityResult::index(Interval::Full, Period::Short)];
        let long = &trends[PeriodicityResult::index(Interval::Full, Period::Long)];
        let windows = self.windows(Interval::Full, 0);
        let mut result = PeriodicityResult::new();
        result.add_if(
            self.test_component_using_explained_variance(short, long, &windows, &statistics),
            Interval::Full,
            Period::Short,
        );
        result.add_if(
            self.test_component_using_explained_variance(long, short, &windows, &statistics),
            Interval::Full,
            Period::Long,
        );
        result
    }

    fn significant(&self, f: f64, d1: f64, d2: f64) -> bool {
        match f_test(f, d1, d2) {
            Ok(p) => p <= self.config.maximum_significance,
            Err(e) => {
                tracing::error!(error = %e, f, d1, d2, "Failed to compute significance");
                false
            }
        }
    }

    fn test_component_using_unexplained_variance(&self, period: usize, statistics: &mut TestStatistics) -> bool {
        let degrees_of_freedom = statistics.populated_buckets - period as f64;
        let scale = 1.0 / statistics.values_per_bucket;

        let mut trend = vec![MeanVarAccumulator::new(); period];
        periodic_trend_in(&self.bucket_values, &self.windows(Interval::Full, 0), self.bucket_length, &mut trend);

        statistics.candidate_unexplained_variance = variance_at_percentile(
            residual_variance(&trend_residual_variance(&trend, scale)),
            degrees_of_freedom,
            self.config.upper_percentile(),
        );
        statistics.candidate_degrees_of_freedom = degrees_of_freedom;
        tracing::trace!(
            period,
            variance = statistics.candidate_unexplained_variance,
            threshold = statistics.variance_threshold(),
            "Unexplained variance"
        );

        statistics.candidate_unexplained_variance <= statistics.variance_threshold()
            && self.significant(statistics.f(), degrees_of_freedom, statistics.degrees_of_freedom)
    }

    fn test_component_using_explained_variance(
        &self,
        trend: &TrendTable,
        remainder: &TrendTable,
        windows: &[TimeInterval],
        statistics: &TestStatistics,
    ) -> bool {
        if windows.is_empty() {
            return false;
        }

        let variance_threshold = 0.75
            * statistics.values_per_bucket
            * (1.0 - self.config.has_period_variance_ratio)
            * statistics.unexplained_variance;
        let amplitude_threshold = 0.75 * statistics.amplitude_threshold();

        let populated_buckets: Time = windows.iter().map(|(a, b)| (b - a) / self.bucket_length).sum();
        let period = trend.len();
        let variance = variance_at_percentile(
            trend_variance(trend),
            populated_buckets as f64 - period as f64,
            self.config.upper_percentile(),
        );
        let amplitude = trend_amplitude(trend);
        tracing::trace!(period, variance, variance_threshold, amplitude, amplitude_threshold, "Explained variance");

        if variance >= variance_threshold || amplitude >= amplitude_threshold {
            let r = autocorrelation_at_percentile(
                remainder_autocorrelation(period, self.bucket_length, &self.bucket_values, remainder, windows),
                statistics.populated_buckets,
                self.config.lower_percentile(),
            );
            tracing::trace!(autocorrelation = r, "Remainder autocorrelation");
            return r > minimum_autocorrelation(variance, variance_threshold, self.config.minimum_autocorrelation);
        }

        false
    }

    fn test_component_using_amplitude(&self, period: usize, statistics: &TestStatistics) -> bool {
        let mut trend = vec![MeanVarAccumulator::new(); period];
        periodic_trend_in(&self.bucket_values, &self.windows(Interval::Full, 0), self.bucket_length, &mut trend);

        let amplitude = trend_amplitude(&trend);
        tracing::trace!(period, amplitude, threshold = statistics.amplitude_threshold(), "Amplitude");
        amplitude > statistics.amplitude_threshold()
    }

    fn test_for_partition_using_unexplained_variance(&self, statistics: &mut TestStatistics) -> bool {
        let shortest = self.partition.iter().copied().min().unwrap_or(0);
        let degrees_of_freedom = statistics.populated_buckets - (shortest / self.bucket_length) as f64;

        let (variance, start_of_partition) = self.partition_variance(statistics.values_per_bucket);
        statistics.start_of_partition = start_of_partition;
        statistics.candidate_unexplained_variance =
            variance_at_percentile(variance, degrees_of_freedom, self.config.upper_percentile());
        statistics.candidate_degrees_of_freedom = degrees_of_freedom;
        tracing::trace!(
            variance = statistics.candidate_unexplained_variance,
            start_of_partition,
            "Partition variance"
        );

        statistics.candidate_unexplained_variance
            <= self.config.has_partition_variance_ratio * statistics.unexplained_variance
            && self.significant(statistics.f(), degrees_of_freedom, statistics.degrees_of_freedom)
    }

    fn test_autocorrelation(&self, period: usize, statistics: &TestStatistics) -> bool {
        let r = autocorrelation_at_percentile(
            autocorrelation(period, &self.bucket_values),
            statistics.populated_buckets,
            self.config.lower_percentile(),
        );
        tracing::trace!(period, autocorrelation = r, "Autocorrelation");
        r > minimum_autocorrelation(
            statistics.variance_threshold(),
            statistics.candidate_unexplained_variance,
            self.config.minimum_autocorrelation,
        )
    }

    // ========================================================================
    // Persistence
    // ========================================================================

    pub fn persist(&self, inserter: &mut dyn StateInserter) {
        insert_display(inserter, BUCKET_LENGTH_TAG, self.bucket_length);
        insert_display(inserter, WINDOW_TAG, self.window);
        inserter.insert_value(PERIODS_TAG, join_times(&self.periods));
        inserter.insert_value(PARTITION_TAG, join_times(&self.partition));
        inserter.insert_value(BUCKET_VALUES_TAG, join_delimited(&self.bucket_values, LIST_DELIMITER));
    }

    /// Restore a test persisted by [`persist`](Self::persist).
    ///
    /// The configuration is not persisted and is supplied by the caller.
    pub fn restore(config: Config, traverser: &dyn StateTraverser) -> Result<Self> {
        const CONTEXT: &str = "periodicity";
        let mut bucket_length = None;
        let mut window = None;
        let mut periods = None;
        let mut partition = None;
        let mut bucket_values = None;
        for (tag, entry) in traverser.entries() {
            match tag {
                BUCKET_LENGTH_TAG => bucket_length = Some(parse_field::<Time>(entry.value(tag)?)?),
                WINDOW_TAG => window = Some(parse_field::<Time>(entry.value(tag)?)?),
                PERIODS_TAG => periods = Some(parse_times(entry.value(tag)?)?),
                PARTITION_TAG => partition = Some(parse_times(entry.value(tag)?)?),
                BUCKET_VALUES_TAG => bucket_values = Some(split_delimited(entry.value(tag)?, LIST_DELIMITER)?),
                _ => {}
            }
        }

        let result = Self {
            config,
            bucket_length: require(bucket_length, BUCKET_LENGTH_TAG, CONTEXT)?,
            window: require(window, WINDOW_TAG, CONTEXT)?,
            periods: require(periods, PERIODS_TAG, CONTEXT)?,
            partition: partition.unwrap_or_default(),
            bucket_values: bucket_values.unwrap_or_default(),
        };
        if result.initialized() {
            validate(result.bucket_length, result.window, &result.periods, &result.partition)?;
            if result.bucket_values.len() as Time != result.window / result.bucket_length {
                return Err(Error::BadState(format!(
                    "{} bucket values for window {} and bucket length {}",
                    result.bucket_values.len(),
                    result.window,
                    result.bucket_length
                )));
            }
        }
        Ok(result)
    }
}

fn validate(bucket_length: Time, window: Time, periods: &[Time], partition: &[Time]) -> Result<()> {
    let invalid = |reason: String| Err(Error::InvalidConfig(reason));
    let &[short, long] = periods else {
        return invalid(format!("expected two periods, got {:?}", periods));
    };
    if bucket_length <= 0 || short <= 0 {
        return invalid(format!("bucket length {} and periods must be positive", bucket_length));
    }
    if !partition.is_empty() && partition.len() != 2 {
        return invalid(format!("expected an empty or two part partition, got {:?}", partition));
    }
    if window <= long || (window > 2 * long && window % long != 0) {
        return invalid(format!("window {} incompatible with long period {}", window, long));
    }
    if short % bucket_length != 0 || long % bucket_length != 0 {
        return invalid(format!("periods {:?} not multiples of bucket length {}", periods, bucket_length));
    }
    if long % short != 0 {
        return invalid(format!("long period {} not a multiple of short period {}", long, short));
    }
    if !partition.is_empty() && partition.iter().sum::<Time>() != long {
        return invalid(format!("partition {:?} does not sum to long period {}", partition, long));
    }
    if window % bucket_length != 0 {
        return invalid(format!("window {} not a multiple of bucket length {}", window, bucket_length));
    }
    Ok(())
}
