//! Periodic trends of a bucket history.
//!
//! A trend of period `p` folds the buckets of one or more windows modulo
//! `p`. The helpers here are generic over the accumulator a trend bucket
//! holds, so the same folding code produces plain means, means with
//! variances, and residual histories.

use std::collections::VecDeque;

use seasonal_core::statistics::{Greater, Less, OrderStatisticsStack};
use seasonal_core::{FloatMeanAccumulator, MeanAccumulator, MeanVarAccumulator, Time, TimeInterval};

use super::result::{Interval, Period, PeriodicityResult};
use super::{Periodicity, TrendTable};

/// A bucket of a trend: a weighted mean.
pub(crate) trait Bucket {
    fn count(&self) -> f64;
    fn mean(&self) -> f64;
}

/// A bucket a weighted value can be folded into.
pub(crate) trait BucketMut: Bucket {
    fn add_weighted_value(&mut self, x: f64, weight: f64);
}

impl Bucket for MeanAccumulator {
    fn count(&self) -> f64 {
        MeanAccumulator::count(self)
    }
    fn mean(&self) -> f64 {
        MeanAccumulator::mean(self)
    }
}

impl BucketMut for MeanAccumulator {
    fn add_weighted_value(&mut self, x: f64, weight: f64) {
        self.add_weighted(x, weight);
    }
}

impl Bucket for MeanVarAccumulator {
    fn count(&self) -> f64 {
        MeanVarAccumulator::count(self)
    }
    fn mean(&self) -> f64 {
        MeanVarAccumulator::mean(self)
    }
}

impl BucketMut for MeanVarAccumulator {
    fn add_weighted_value(&mut self, x: f64, weight: f64) {
        self.add_weighted(x, weight);
    }
}

impl Bucket for FloatMeanAccumulator {
    fn count(&self) -> f64 {
        FloatMeanAccumulator::count(self)
    }
    fn mean(&self) -> f64 {
        f64::from(FloatMeanAccumulator::mean(self))
    }
}

impl BucketMut for FloatMeanAccumulator {
    fn add_weighted_value(&mut self, x: f64, weight: f64) {
        self.add_weighted(x as f32, weight);
    }
}

impl Bucket for (TimeInterval, MeanVarAccumulator) {
    fn count(&self) -> f64 {
        self.1.count()
    }
    fn mean(&self) -> f64 {
        self.1.mean()
    }
}

// ============================================================================
// Windows
// ============================================================================

/// Windows of `length` starting every `long_period` in `[start, end)`.
pub(crate) fn compute_windows(start: Time, end: Time, length: Time, long_period: Time) -> Vec<TimeInterval> {
    if long_period <= 0 {
        return Vec::new();
    }
    (0..)
        .map(|i| start + i * long_period)
        .take_while(|&time| time < end)
        .map(|time| (time, time + length))
        .collect()
}

/// Bucket index ranges of `windows` and their total length.
pub(crate) fn index_windows(windows: &[TimeInterval], bucket_length: Time) -> (Vec<(usize, usize)>, usize) {
    let result: Vec<(usize, usize)> = windows
        .iter()
        .map(|&(start, end)| ((start / bucket_length) as usize, (end / bucket_length) as usize))
        .collect();
    let length = result.iter().map(|(a, b)| b.saturating_sub(*a)).sum();
    (result, length)
}

// ============================================================================
// Folding
// ============================================================================

/// Fold the buckets of `values` in `windows` into `trend` modulo its length.
///
/// Windows wrap around the end of `values`.
pub(crate) fn periodic_trend<B: BucketMut>(
    values: &[FloatMeanAccumulator],
    windows: &[(usize, usize)],
    trend: &mut [B],
) {
    let length = values.len();
    let period = trend.len();
    if period == 0 || length == 0 {
        return;
    }
    let mut j = 0;
    for &(a, b) in windows {
        for k in a..b {
            let value = &values[k % length];
            trend[j % period].add_weighted_value(f64::from(value.mean()), value.count());
            j += 1;
        }
    }
}

/// [`periodic_trend`] over time windows.
pub(crate) fn periodic_trend_in<B: BucketMut>(
    values: &[FloatMeanAccumulator],
    windows: &[TimeInterval],
    bucket_length: Time,
    trend: &mut [B],
) {
    let (windows, _) = index_windows(windows, bucket_length);
    periodic_trend(values, &windows, trend);
}

/// The weighted mean and variance of the buckets at `times`.
pub(crate) fn average_value(values: &[FloatMeanAccumulator], times: &[Time], bucket_length: Time) -> MeanVarAccumulator {
    let mut result = MeanVarAccumulator::new();
    for &time in times {
        let value = &values[(time / bucket_length) as usize % values.len()];
        result.add_weighted(f64::from(value.mean()), value.count());
    }
    result
}

// ============================================================================
// Trend statistics
// ============================================================================

/// Weighted variance of the bucket means of `trend`.
pub(crate) fn trend_variance<B: Bucket>(trend: &[B]) -> f64 {
    let mut result = MeanVarAccumulator::new();
    for bucket in trend {
        result.add_weighted(bucket.mean(), bucket.count());
    }
    result.variance()
}

/// Largest deviation of a populated bucket mean from the weighted level of
/// `trend`, and zero if no bucket is populated.
pub(crate) fn trend_amplitude<B: Bucket>(trend: &[B]) -> f64 {
    let mut level = MeanAccumulator::new();
    for bucket in trend {
        level.add_weighted(bucket.mean(), bucket.count());
    }

    let mut result = OrderStatisticsStack::<f64, 1, Greater>::new();
    result.add(0.0);
    for bucket in trend.iter().filter(|bucket| bucket.count() > 0.0) {
        result.add((bucket.mean() - level.mean()).abs());
    }
    result.biggest().copied().unwrap_or(0.0)
}

/// Unbiased residual variance from a mean of maximum likelihood variances.
pub(crate) fn residual_variance(mean: &MeanAccumulator) -> f64 {
    let n = mean.count();
    if n <= 1.0 {
        return mean.mean();
    }
    n / (n - 1.0) * mean.mean()
}

/// The maximum likelihood variance of `bucket`, weighted by its scaled count.
pub(crate) fn bucket_residual_variance(bucket: &MeanVarAccumulator, scale: f64) -> MeanAccumulator {
    MeanAccumulator::accumulator(scale * bucket.count(), bucket.maximum_likelihood_variance())
}

/// The mean of the bucket variances of `trend`, weighted by count, with the
/// total count scaled by `scale`.
pub(crate) fn trend_residual_variance<'a, I>(trend: I, scale: f64) -> MeanAccumulator
where
    I: IntoIterator<Item = &'a MeanVarAccumulator>,
{
    let mut result = MeanAccumulator::new();
    for bucket in trend {
        result.add_weighted(bucket.maximum_likelihood_variance(), bucket.count());
    }
    let count = result.count();
    result.set_count(count * scale);
    result
}

/// The autocorrelation a component must exceed, relaxed from `threshold`
/// by up to a fifth as its variance grows past `variance_threshold`.
pub(crate) fn minimum_autocorrelation(variance: f64, variance_threshold: f64, threshold: f64) -> f64 {
    let factor = 1.0 - 0.5 * (variance - variance_threshold) / variance_threshold;
    if factor.is_nan() {
        return 0.8 * threshold;
    }
    factor.clamp(0.8, 1.0) * threshold
}

/// Autocorrelation at `offset` of the buckets in `windows` after removing
/// `trend` cyclically.
pub(crate) fn remainder_autocorrelation<B: Bucket>(
    offset: usize,
    bucket_length: Time,
    values: &[FloatMeanAccumulator],
    trend: &[B],
    windows: &[TimeInterval],
) -> f64 {
    if windows.is_empty() {
        return 0.0;
    }

    let (windows, n) = index_windows(windows, bucket_length);
    let mut residuals = vec![FloatMeanAccumulator::new(); n];
    periodic_trend(values, &windows, &mut residuals);
    if !trend.is_empty() {
        for (i, residual) in residuals.iter_mut().enumerate() {
            if residual.count() > 0.0 {
                *residual.mean_mut() -= trend[i % trend.len()].mean() as f32;
            }
        }
    }
    seasonal_core::statistics::autocorrelation(offset, &residuals)
}

// ============================================================================
// Decomposition
// ============================================================================

impl Periodicity {
    /// The windows making up `interval` when the partition starts at `start`.
    ///
    /// Without a partition only the full interval has windows.
    pub(crate) fn windows(&self, interval: Interval, start: Time) -> Vec<TimeInterval> {
        match (interval, self.partition.as_slice()) {
            (Interval::Full, _) => vec![(0, self.window)],
            (Interval::First, &[first, _]) => compute_windows(start, start + self.window, first, self.periods[1]),
            (Interval::Second, &[first, second]) => {
                compute_windows(start + first, start + self.window, second, self.periods[1])
            }
            _ => Vec::new(),
        }
    }

    /// The decomposed trends of every interval, indexed by
    /// [`PeriodicityResult::index`].
    ///
    /// Only the components `periods` reports are filled in; each trend
    /// bucket carries the time interval it covers in the first window.
    pub fn trends(&self, periods: &PeriodicityResult) -> [TrendTable; 6] {
        let mut result: [TrendTable; 6] = Default::default();
        if !self.initialized() {
            return result;
        }
        for interval in [Interval::First, Interval::Second, Interval::Full] {
            let windows = self.windows(interval, periods.start_of_partition());
            let (short, long) = self.periodic_bucketing(periods.periods(interval), &windows);
            result[PeriodicityResult::index(interval, Period::Short)] = short;
            result[PeriodicityResult::index(interval, Period::Long)] = long;
        }
        result
    }

    /// The short and long trends for the components in `periods`.
    pub(crate) fn periodic_bucketing(&self, periods: Period, windows: &[TimeInterval]) -> (TrendTable, TrendTable) {
        match periods {
            Period::None => (Vec::new(), Vec::new()),
            Period::Short => (self.single_period_bucketing(self.periods[0], windows), Vec::new()),
            Period::Long => (Vec::new(), self.single_period_bucketing(self.periods[1], windows)),
            Period::Both => self.both_periods_bucketing(windows),
        }
    }

    fn initialize_buckets(&self, period: usize, windows: &[TimeInterval]) -> TrendTable {
        let start = windows.first().map_or(0, |window| window.0);
        (0..period)
            .map(|i| {
                let bucket = start + i as Time * self.bucket_length;
                ((bucket, bucket + self.bucket_length), MeanVarAccumulator::new())
            })
            .collect()
    }

    fn single_period_bucketing(&self, period: Time, windows: &[TimeInterval]) -> TrendTable {
        let Some(&(start, end)) = windows.first() else {
            return Vec::new();
        };
        let period = (period.min(end - start) / self.bucket_length) as usize;
        if period == 0 {
            return Vec::new();
        }

        let mut trend = self.initialize_buckets(period, windows);
        let mut variance_scales = vec![MeanAccumulator::new(); period];
        let length = self.bucket_values.len();
        let mut j = 0;
        for &(a, b) in &index_windows(windows, self.bucket_length).0 {
            for k in a..b {
                let bucket = &self.bucket_values[k % length];
                let count = bucket.count();
                if count > 0.0 {
                    trend[j % period].1.add_weighted(f64::from(bucket.mean()), count);
                    variance_scales[j % period].add(1.0 / count);
                }
                j += 1;
            }
        }
        normalize_variances(&mut trend, &variance_scales);
        trend
    }

    /// Decompose the buckets in `windows` into short and long components.
    ///
    /// With the window a whole number of long periods each bucket value is
    /// the sum of a short and a long baseline. The least squares system for
    /// the baselines is singular, since a constant can move between the two
    /// components. Regularising and taking the limit assigns the short
    /// component the fraction `(N/N1) / (N/N1 + N/N2)` of the short period
    /// means and the long component the rest. The short baseline is then
    /// shifted so the long component is as smooth as possible.
    fn both_periods_bucketing(&self, windows: &[TimeInterval]) -> (TrendTable, TrendTable) {
        let Some(&(start, end)) = windows.first() else {
            return (Vec::new(), Vec::new());
        };

        let window: Time = windows.iter().map(|(a, b)| b - a).sum();
        let w0 = end - start;
        let short_period_time = self.periods[0].min(w0);
        let long_period_time = self.periods[1].min(w0);
        let short_period = (short_period_time / self.bucket_length) as usize;
        let long_period = (long_period_time / self.bucket_length) as usize;
        if short_period == 0 || long_period == 0 {
            return (Vec::new(), Vec::new());
        }
        let length = self.bucket_values.len();
        let s = (window / short_period_time) as f64;
        let l = (window / long_period_time) as f64;
        let scale = s / (s + l);

        let mut short = vec![MeanAccumulator::new(); short_period];
        let mut long = vec![MeanAccumulator::new(); long_period];
        periodic_trend_in(&self.bucket_values, windows, self.bucket_length, &mut short);
        periodic_trend_in(&self.bucket_values, windows, self.bucket_length, &mut long);

        for bucket in short.iter_mut() {
            *bucket.mean_mut() *= scale;
        }
        for (i, bucket) in long.iter_mut().enumerate() {
            if bucket.count() > 0.0 {
                *bucket.mean_mut() -= short[i % short_period].mean();
            }
        }

        let mut shifts = vec![MeanAccumulator::new(); short_period];
        for (i, bucket) in long.iter().enumerate() {
            if bucket.count() > 0.0 {
                shifts[i % short_period].add(bucket.mean());
            }
        }
        for (i, shift) in shifts.iter().map(MeanAccumulator::mean).enumerate() {
            if shift != 0.0 {
                *short[i].mean_mut() += shift;
                for bucket in long.iter_mut().skip(i).step_by(short_period) {
                    if bucket.count() > 0.0 {
                        *bucket.mean_mut() -= shift;
                    }
                }
            }
        }

        let mut short_trend = self.initialize_buckets(short_period, windows);
        let mut long_trend = self.initialize_buckets(long_period, windows);
        let mut variance_scales = vec![MeanAccumulator::new(); short_period];
        let mut j = 0;
        for &(a, b) in &index_windows(windows, self.bucket_length).0 {
            for k in a..b {
                let bucket = &self.bucket_values[k % length];
                let count = bucket.count();
                if count > 0.0 {
                    let mean = f64::from(bucket.mean()) - long[j % long_period].mean();
                    short_trend[j % short_period].1.add_weighted(mean, count);
                    variance_scales[j % short_period].add(1.0 / count);
                }
                j += 1;
            }
        }
        normalize_variances(&mut short_trend, &variance_scales);
        for (bucket, mean) in long_trend.iter_mut().zip(&long) {
            bucket.1.add(mean.mean());
        }

        (short_trend, long_trend)
    }

    /// Find the partition start minimising the residual variance of the
    /// short period fitted separately to each interval.
    ///
    /// Each step moves the start one bucket on. Only one bucket of each
    /// interval's short trend changes, so it is removed from the running
    /// residual variance and its replacement added, which makes the whole
    /// search linear in the number of buckets.
    ///
    /// Returns the minimum variance and the start of partition. Among starts
    /// within 5% of the minimum, the one whose bucket mean is closest to
    /// zero is preferred.
    pub(crate) fn partition_variance(&self, mean_count: f64) -> (f64, Time) {
        let windows = [self.windows(Interval::First, 0), self.windows(Interval::Second, 0)];

        let mut deltas: [Vec<Time>; 2] = Default::default();
        for (deltas, windows) in deltas.iter_mut().zip(&windows) {
            for &(start, end) in windows {
                let mut t = start + self.periods[0];
                while t <= end {
                    deltas.push(t - self.bucket_length);
                    t += self.periods[0];
                }
            }
        }
        tracing::trace!(?deltas, "Partition deltas");

        let n = (self.periods[0] / self.bucket_length) as usize;
        let mut trends: [VecDeque<MeanVarAccumulator>; 2] = Default::default();
        for (trend, windows) in trends.iter_mut().zip(&windows) {
            let mut buckets = vec![MeanVarAccumulator::new(); n];
            periodic_trend_in(&self.bucket_values, windows, self.bucket_length, &mut buckets);
            *trend = buckets.into();
        }

        let scale = 1.0 / mean_count;
        let mut variances = [
            trend_residual_variance(&trends[0], scale),
            trend_residual_variance(&trends[1], scale),
        ];

        let mut minimum = OrderStatisticsStack::<(f64, Time), 1, Less>::new();
        minimum.add(((residual_variance(&variances[0]) + residual_variance(&variances[1])) / 2.0, 0));
        let mut candidates: Vec<(f64, Time)> = Vec::with_capacity(n);

        let mut time = self.bucket_length;
        while time < self.periods[1] {
            for i in 0..2 {
                for delta in deltas[i].iter_mut() {
                    let t = *delta + self.bucket_length;
                    *delta = if t == self.window { 0 } else { t };
                }
                let Some(old_bucket) = trends[i].pop_front() else {
                    continue;
                };
                let new_bucket = average_value(&self.bucket_values, &deltas[i], self.bucket_length);
                variances[i] -= bucket_residual_variance(&old_bucket, scale);
                variances[i] += bucket_residual_variance(&new_bucket, scale);
                trends[i].push_back(new_bucket);
            }
            let variance = (residual_variance(&variances[0]) + residual_variance(&variances[1])) / 2.0;
            minimum.add((variance, time));
            if let Some(&(best, _)) = minimum.biggest() {
                if variance < 1.05 * best {
                    candidates.push((variance, time));
                }
            }
            time += self.bucket_length;
        }

        let Some(&(minimum_variance, minimum_time)) = minimum.biggest() else {
            return (0.0, 0);
        };

        let mut lowest = OrderStatisticsStack::<(f64, Time), 1, Less>::new();
        for &(variance, time) in &candidates {
            if variance < 1.05 * minimum_variance {
                let j = (time / self.bucket_length) as usize;
                lowest.add((f64::from(self.bucket_values[j].mean()).abs(), time));
            }
        }
        let start = lowest.biggest().map_or(minimum_time, |&(_, time)| time);

        (minimum_variance, start)
    }
}

fn normalize_variances(trend: &mut TrendTable, variance_scales: &[MeanAccumulator]) {
    for (bucket, scale) in trend.iter_mut().zip(variance_scales) {
        if scale.count() > 0.0 && scale.mean() > 0.0 {
            *bucket.1.moment_mut(1) /= scale.mean();
        }
    }
}
