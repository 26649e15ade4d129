//! Search for an unknown period.
//!
//! [`ScanningPeriodicity`] keeps a fixed number of buckets from a start time
//! and doubles the bucket length whenever time runs past the last bucket, so
//! it always covers everything seen so far at the finest resolution that
//! fits. Testing picks the two most plausible periods from the history and
//! runs a [`Periodicity`] test configured with them.

use seasonal_core::codec::{join_delimited, split_delimited};
use seasonal_core::constants::LIST_DELIMITER;
use seasonal_core::statistics::{autocorrelation, autocorrelations, Greater, OrderStatisticsStack};
use seasonal_core::{Checksum, FloatMeanAccumulator, MeanAccumulator, Time};

use super::bucketing::{periodic_trend, remainder_autocorrelation};
use super::{Periodicity, PeriodicityResult};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::persist::{insert_display, parse_field, require, StateInserter, StateTraverser};

const BUCKET_LENGTH_TAG: &str = "b";
const START_TIME_TAG: &str = "c";
const BUCKET_VALUES_TAG: &str = "e";

type Candidates<const N: usize> = OrderStatisticsStack<(f64, usize), N, Greater>;

/// A compressing bucket history that searches for its own periods.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanningPeriodicity {
    config: Config,
    bucket_length: Time,
    start_time: Time,
    bucket_values: Vec<FloatMeanAccumulator>,
}

impl ScanningPeriodicity {
    /// A history of `size` buckets, rounded up to an even number, of
    /// initial length `bucket_length`.
    pub fn new(size: usize, bucket_length: Time) -> Self {
        Self::with_config(Config::default(), size, bucket_length)
    }

    pub fn with_config(config: Config, size: usize, bucket_length: Time) -> Self {
        Self {
            config,
            bucket_length,
            start_time: Time::MIN,
            bucket_values: vec![FloatMeanAccumulator::new(); size + size % 2],
        }
    }

    /// Start the history at `time`.
    pub fn initialize(&mut self, time: Time) {
        self.start_time = time;
    }

    pub fn initialized(&self) -> bool {
        self.start_time != Time::MIN
    }

    /// The current bucket length.
    pub fn bucket_length(&self) -> Time {
        self.bucket_length
    }

    pub fn start_time(&self) -> Time {
        self.start_time
    }

    pub fn bucket_values(&self) -> &[FloatMeanAccumulator] {
        &self.bucket_values
    }

    /// Add `value` at `time`, compressing the history until it covers
    /// `time`.
    ///
    /// Values before the start time, before [`initialize`](Self::initialize)
    /// is called, or too far after the start time to represent, are ignored.
    pub fn add(&mut self, time: Time, value: f64, weight: f64) {
        if !self.initialized() || time < self.start_time || self.bucket_values.is_empty() || self.bucket_length <= 0 {
            tracing::trace!(time, start_time = self.start_time, "Ignoring value outside history");
            return;
        }
        let Some(offset) = time.checked_sub(self.start_time) else {
            tracing::debug!(time, start_time = self.start_time, "Ignoring value beyond representable history");
            return;
        };
        while self.need_to_compress(offset) {
            self.compress();
        }
        let i = (offset / self.bucket_length) as usize;
        self.bucket_values[i].add_weighted(value as f32, weight);
    }

    /// True if `offset` from the start time falls past the last bucket.
    ///
    /// A span too long for [`Time`] covers every offset.
    fn need_to_compress(&self, offset: Time) -> bool {
        (self.bucket_values.len() as Time)
            .checked_mul(self.bucket_length)
            .map_or(false, |span| offset >= span)
    }

    fn compress(&mut self) {
        let n = self.bucket_values.len();
        for j in 0..n / 2 {
            self.bucket_values[j] = self.bucket_values[2 * j] + self.bucket_values[2 * j + 1];
        }
        for value in &mut self.bucket_values[n / 2..] {
            *value = FloatMeanAccumulator::new();
        }
        self.bucket_length *= 2;
        tracing::debug!(bucket_length = self.bucket_length, "Compressed scanning history");
    }

    /// Find the two most plausible periods and test for them.
    ///
    /// The base period is the lag with the highest autocorrelation, averaged
    /// over its multiples and corrected for padding. The second period is
    /// its best divisor, or its best multiple if the base period's trend
    /// leaves a remainder that autocorrelates more strongly.
    ///
    /// Returns `None` if the history is too short to have candidates.
    pub fn test(&self) -> Option<(Periodicity, PeriodicityResult)> {
        let n = self.bucket_values.len();
        let pad = n / 3;

        // Pad to the largest lag so the autocorrelations aren't cyclic.
        let mut values = self.bucket_values.clone();
        values.resize(n + pad, FloatMeanAccumulator::new());
        let mut correlations = autocorrelations(&values);
        correlations.truncate(pad);
        values.truncate(n);

        let mut candidates = Candidates::<5>::new();
        for period in 4..correlations.len() {
            let correlation = self.mean_for_periodic_offsets(&correlations, period);
            tracing::trace!(period, correlation, "Padded autocorrelation");
            candidates.add((correlation, period));
        }
        if candidates.is_empty() {
            return None;
        }

        let mut ranked = Candidates::<5>::new();
        for &(_, period) in candidates.iter() {
            self.resize(n - n % period, &mut values);
            ranked.add((autocorrelation(period, &values), period));
        }
        let (_, base) = *ranked.sorted().first()?;
        tracing::trace!(candidates = ?ranked.sorted(), base, "Candidate periods");

        let mut correlation = -1.0;
        let mut other = 2 * base;

        // The best harmonic of the base period.
        self.resize(n - n % base, &mut values);
        let mut harmonics = Candidates::<1>::new();
        for divisor in (2..).take_while(|divisor| 4 * divisor <= base) {
            if base % divisor == 0 {
                let period = base / divisor;
                harmonics.add((autocorrelation(period, &values), period));
            }
        }
        if let Some(&(best, period)) = harmonics.biggest() {
            correlation = best;
            other = period;
        }

        // The best multiple of the base period, once its trend is removed.
        let mut trend = vec![MeanAccumulator::new(); base];
        let window = n - n % base;
        periodic_trend(&values, &[(0, window)], &mut trend);
        let mut multiples = Candidates::<1>::new();
        multiples.add((-1.0, 2 * base));
        let mut period = 2 * base;
        while 2 * period <= values.len() {
            let window = n - n % period;
            self.resize(window, &mut values);
            let window = window as Time * self.bucket_length;
            multiples.add((
                remainder_autocorrelation(period, self.bucket_length, &values, &trend, &[(0, window)]),
                period,
            ));
            period += base;
        }
        if let Some(&(best, period)) = multiples.biggest() {
            if best >= correlation {
                other = period;
            }
        }

        let (short, long) = if other < base { (other, base) } else { (base, other) };
        let periods = [short as Time * self.bucket_length, long as Time * self.bucket_length];
        let window = (n - n % if n > 2 * long { long } else { short }) as Time * self.bucket_length;
        tracing::debug!(bucket_length = self.bucket_length, window, ?periods, "Testing scanned periods");

        self.resize(n, &mut values);
        let mut periodicity = Periodicity::with_config(self.config.clone());
        if let Err(e) = periodicity.initialize(self.bucket_length, window, &periods, &[], &values) {
            tracing::debug!(error = %e, "Scanned periods can't be tested");
            return None;
        }
        let result = periodicity.test();
        Some((periodicity, result))
    }

    /// Truncate or extend `values` from the history to `size` buckets.
    fn resize(&self, size: usize, values: &mut Vec<FloatMeanAccumulator>) {
        let n = values.len();
        values.truncate(size);
        if size > n {
            values.extend_from_slice(&self.bucket_values[n..size]);
        }
    }

    /// Mean padding corrected autocorrelation over the multiples of `period`.
    fn mean_for_periodic_offsets(&self, correlations: &[f64], period: usize) -> f64 {
        let mut result = MeanAccumulator::new();
        for offset in (period..=correlations.len()).step_by(period) {
            result.add(self.correct_for_pad(correlations[offset - 1], offset));
        }
        result.mean()
    }

    fn correct_for_pad(&self, correlation: f64, offset: usize) -> f64 {
        let n = self.bucket_values.len() as f64;
        correlation * n / (n - offset as f64)
    }

    pub fn checksum(&self, seed: u64) -> u64 {
        let seed = self.bucket_length.checksum(seed);
        let seed = self.start_time.checksum(seed);
        self.bucket_values.checksum(seed)
    }

    pub fn persist(&self, inserter: &mut dyn StateInserter) {
        insert_display(inserter, BUCKET_LENGTH_TAG, self.bucket_length);
        insert_display(inserter, START_TIME_TAG, self.start_time);
        inserter.insert_value(BUCKET_VALUES_TAG, join_delimited(&self.bucket_values, LIST_DELIMITER));
    }

    pub fn restore(config: Config, traverser: &dyn StateTraverser) -> Result<Self> {
        const CONTEXT: &str = "scanning periodicity";
        let mut bucket_length = None;
        let mut start_time = None;
        let mut bucket_values = None;
        for (tag, entry) in traverser.entries() {
            match tag {
                BUCKET_LENGTH_TAG => bucket_length = Some(parse_field::<Time>(entry.value(tag)?)?),
                START_TIME_TAG => start_time = Some(parse_field::<Time>(entry.value(tag)?)?),
                BUCKET_VALUES_TAG => bucket_values = Some(split_delimited(entry.value(tag)?, LIST_DELIMITER)?),
                _ => {}
            }
        }
        let bucket_values: Vec<FloatMeanAccumulator> = require(bucket_values, BUCKET_VALUES_TAG, CONTEXT)?;
        if bucket_values.len() % 2 != 0 {
            return Err(Error::BadState(format!("odd number {} of scanning buckets", bucket_values.len())));
        }
        Ok(Self {
            config,
            bucket_length: require(bucket_length, BUCKET_LENGTH_TAG, CONTEXT)?,
            start_time: require(start_time, START_TIME_TAG, CONTEXT)?,
            bucket_values,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persist::StateDocument;
    use rand::SeedableRng;
    use rand_distr::{Distribution, Normal};
    use rand_xoshiro::Xoshiro256PlusPlus;
    use seasonal_core::constants::{DAY, HOUR};
    use std::f64::consts::PI;

    #[test]
    fn test_size_is_even() {
        assert_eq!(ScanningPeriodicity::new(5, 1).bucket_values().len(), 6);
        assert_eq!(ScanningPeriodicity::new(6, 1).bucket_values().len(), 6);
    }

    #[test]
    fn test_add_before_start_is_ignored() {
        let mut scanning = ScanningPeriodicity::new(4, 1);
        scanning.add(0, 1.0, 1.0);
        assert!(scanning.bucket_values().iter().all(|value| value.count() == 0.0));

        scanning.initialize(10);
        scanning.add(9, 1.0, 1.0);
        assert!(scanning.bucket_values().iter().all(|value| value.count() == 0.0));
    }

    #[test]
    fn test_compression_merges_pairs() {
        let mut scanning = ScanningPeriodicity::new(4, 1);
        scanning.initialize(0);
        for time in 0..4 {
            scanning.add(time, time as f64, 1.0);
        }
        scanning.add(4, 10.0, 1.0);

        assert_eq!(scanning.bucket_length(), 2);
        let values = scanning.bucket_values();
        assert_eq!(values[0].count(), 2.0);
        assert_eq!(values[0].mean(), 0.5);
        assert_eq!(values[1].mean(), 2.5);
        assert_eq!(values[2].mean(), 10.0);
        assert_eq!(values[3].count(), 0.0);

        // Far past the end compresses repeatedly.
        scanning.add(30, 1.0, 1.0);
        assert_eq!(scanning.bucket_length(), 8);
        assert_eq!(scanning.bucket_values()[3].count(), 1.0);
    }

    #[test]
    fn test_extreme_times_terminate() {
        let mut scanning = ScanningPeriodicity::new(4, 1);
        scanning.initialize(-10);
        scanning.add(0, 1.0, 1.0);
        scanning.add(Time::MAX - 5, 2.0, 1.0);
        assert_eq!(scanning.bucket_length(), 4);
        assert_eq!(scanning.bucket_values()[2].count(), 1.0);

        let mut scanning = ScanningPeriodicity::new(4, 1);
        scanning.initialize(0);
        scanning.add(0, 1.0, 1.0);
        scanning.add(Time::MAX, 2.0, 1.0);
        assert_eq!(scanning.bucket_length(), 1 << 61);
        let values = scanning.bucket_values();
        assert_eq!(values[0].count(), 1.0);
        assert_eq!(values[3].mean(), 2.0);
    }

    #[test]
    fn test_short_history_has_no_candidates() {
        let mut scanning = ScanningPeriodicity::new(12, 1);
        scanning.initialize(0);
        for time in 0..12 {
            scanning.add(time, (time % 3) as f64, 1.0);
        }
        assert!(scanning.test().is_none());
    }

    #[test]
    fn test_finds_daily_period() {
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(3);
        let noise = Normal::new(0.0, 0.5).unwrap();
        let mut scanning = ScanningPeriodicity::new(336, HOUR);
        scanning.initialize(0);
        for time in (0..14 * DAY).step_by(HOUR as usize) {
            let hour = (time % DAY) / HOUR;
            let value = 10.0 + 5.0 * (2.0 * PI * hour as f64 / 24.0).sin() + noise.sample(&mut rng);
            scanning.add(time, value, 1.0);
        }

        let (periodicity, result) = scanning.test().unwrap();
        assert!(periodicity.periods().contains(&DAY), "{:?}", periodicity.periods());
        assert!(result.periodic(), "{:?}", result);
    }

    #[test]
    fn test_persistence() {
        let mut scanning = ScanningPeriodicity::new(10, 60);
        scanning.initialize(120);
        for time in (120..1000).step_by(17) {
            scanning.add(time, (time % 7) as f64, 1.0);
        }

        let mut document = StateDocument::new();
        scanning.persist(&mut document);
        let restored = ScanningPeriodicity::restore(Config::default(), &document).unwrap();
        assert_eq!(restored, scanning);
        assert_eq!(restored.checksum(1), scanning.checksum(1));
    }
}
