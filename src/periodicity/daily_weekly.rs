//! The standard daily and weekly periodicity test.

use seasonal_core::constants::{DAY, HOUR, WEEK, WEEKDAYS, WEEKEND};
use seasonal_core::Time;

use super::{Periodicity, PeriodicityResult};

/// Bucket lengths the daily and weekly test supports. Other lengths are
/// rounded up to the next of these.
pub const PERMITTED_BUCKET_LENGTHS: [Time; 12] =
    [60, 300, 1800, 3600, 7200, 10800, 14400, 21600, 28800, 43200, 86400, 172800];

const INTERVAL_NAMES: [&str; 2] = ["weekend", "weekdays"];
const PERIOD_NAMES: [&str; 2] = ["daily", "weekly"];

/// A test for daily and weekly periods with a weekend and weekdays
/// partition, over two weeks of buckets at least an hour long.
///
/// Returns `None` if `bucket_length` exceeds the largest permitted length,
/// or rounds up to a length that doesn't divide a day.
pub fn daily_and_weekly(bucket_length: Time, decay_rate: f64) -> Option<Periodicity> {
    let i = PERMITTED_BUCKET_LENGTHS.partition_point(|&length| length < bucket_length);
    let bucket_length = *PERMITTED_BUCKET_LENGTHS.get(i)?;
    let bucket_length = bucket_length.max(HOUR);
    let window = 2 * WEEK * (bucket_length / HOUR);

    let mut result = Periodicity::new(decay_rate);
    if let Err(e) = result.initialize(bucket_length, window, &[DAY, WEEK], &[WEEKEND, WEEKDAYS], &[]) {
        tracing::debug!(error = %e, bucket_length, "Unsupported daily and weekly bucket length");
        return None;
    }
    Some(result)
}

/// Name the periods in `result` of a [`daily_and_weekly`] test.
pub fn print_daily_and_weekly(result: &PeriodicityResult) -> String {
    result.print(&INTERVAL_NAMES, &PERIOD_NAMES)
}
