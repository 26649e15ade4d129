//! End to end periodicity tests over synthetic hourly series.
//!
//! These tests drive the public detectors the way a caller would: feed a
//! few weeks of bucketed values, then test and inspect the result.

use std::f64::consts::PI;

use rand::SeedableRng;
use rand_distr::{Distribution, Normal};
use rand_xoshiro::Xoshiro256PlusPlus;
use seasonal::constants::{DAY, HOUR, WEEK};
use seasonal::{
    daily_and_weekly, print_daily_and_weekly, Interval, Period, Periodicity, PeriodicityResult,
    ScanningPeriodicity, Time,
};

fn feed(periodicity: &mut Periodicity, weeks: Time, seed: u64, f: impl Fn(Time) -> f64) {
    let mut rng = Xoshiro256PlusPlus::seed_from_u64(seed);
    let noise = Normal::new(0.0, 0.5).unwrap();
    for time in (0..weeks * WEEK).step_by(HOUR as usize) {
        periodicity.add(time, f(time) + noise.sample(&mut rng), 1.0);
    }
}

fn has_anywhere(result: &PeriodicityResult, period: Period) -> bool {
    [Interval::Full, Interval::First, Interval::Second]
        .iter()
        .any(|&interval| result.periods(interval).contains(period))
}

fn daily(time: Time) -> f64 {
    let hour = (time % DAY) / HOUR;
    10.0 + 5.0 * (2.0 * PI * hour as f64 / 24.0).sin()
}

// =============================================================================
// DAILY AND WEEKLY
// =============================================================================

#[test]
fn daily_sine_is_daily() {
    let mut periodicity = daily_and_weekly(HOUR, 0.0).unwrap();
    feed(&mut periodicity, 2, 1, daily);

    let result = periodicity.test();
    assert!(result.periodic());
    assert!(result.periods(Interval::Full).contains(Period::Short), "{:?}", result);
    assert!(!result.periods(Interval::Full).contains(Period::Long), "{:?}", result);
    assert!(print_daily_and_weekly(&result).contains("daily"));
}

#[test]
fn day_of_week_levels_are_weekly() {
    let mut periodicity = daily_and_weekly(HOUR, 0.0).unwrap();
    feed(&mut periodicity, 2, 2, |time| 3.0 * ((time % WEEK) / DAY) as f64);

    let result = periodicity.test();
    assert!(has_anywhere(&result, Period::Long), "{:?}", result);
    assert!(print_daily_and_weekly(&result).contains("weekly"));
}

#[test]
fn weekday_only_pattern_is_periodic() {
    let mut periodicity = daily_and_weekly(HOUR, 0.0).unwrap();
    // Flat for the first two days of each week, daily for the rest.
    feed(&mut periodicity, 2, 3, |time| if time % WEEK < 2 * DAY { 10.0 } else { daily(time) });

    let result = periodicity.test();
    assert!(result.periodic(), "{:?}", result);
    assert!(has_anywhere(&result, Period::Short), "{:?}", result);
}

#[test]
fn weekend_and_weekdays_are_partitioned() {
    let mut periodicity = daily_and_weekly(HOUR, 0.0).unwrap();
    feed(&mut periodicity, 2, 7, |time| {
        if time % WEEK < 2 * DAY {
            0.0
        } else {
            10.0 + daily(time)
        }
    });

    let result = periodicity.test();
    assert!(result.periods(Interval::Second).contains(Period::Short), "{:?}", result);
    let start = result.start_of_partition().rem_euclid(WEEK);
    assert!(start <= HOUR || start >= WEEK - HOUR, "partition starts at {}", start);
    assert!(print_daily_and_weekly(&result).contains("weekdays daily"));
}

#[test]
fn noise_is_not_periodic() {
    let mut periodicity = daily_and_weekly(HOUR, 0.0).unwrap();
    feed(&mut periodicity, 2, 4, |_| 10.0);
    assert!(!periodicity.test().periodic());
}

#[test]
fn sparse_data_is_not_tested() {
    let mut periodicity = daily_and_weekly(HOUR, 0.0).unwrap();
    for time in (0..2 * WEEK).step_by(DAY as usize) {
        periodicity.add(time, daily(time), 1.0);
    }
    assert!(!periodicity.seen_sufficient_data());
    assert!(!periodicity.test().periodic());
}

#[test]
fn decay_forgets_old_pattern() {
    let mut periodicity = daily_and_weekly(HOUR, 0.5).unwrap();
    feed(&mut periodicity, 2, 5, daily);
    let before = periodicity.count();
    periodicity.propagate_forwards_by_time(10.0);
    assert!(periodicity.count() < before * 1e-2);
}

// =============================================================================
// SCANNING
// =============================================================================

#[test]
fn scanning_hands_over_to_periodicity() {
    let mut rng = Xoshiro256PlusPlus::seed_from_u64(6);
    let noise = Normal::new(0.0, 0.5).unwrap();
    let mut scanning = ScanningPeriodicity::new(336, HOUR);
    scanning.initialize(0);
    for time in (0..2 * WEEK).step_by(HOUR as usize) {
        scanning.add(time, daily(time) + noise.sample(&mut rng), 1.0);
    }

    let (mut periodicity, result) = scanning.test().expect("a daily candidate");
    assert!(result.periodic());
    assert!(periodicity.periods().contains(&DAY));
    assert_eq!(periodicity.bucket_length(), HOUR);

    // The returned test keeps working on new values.
    let count = periodicity.count();
    periodicity.add(2 * WEEK, 12.0, 1.0);
    assert!(periodicity.count() > count);
    assert!(periodicity.test().periodic());
}

#[test]
fn scanning_compresses_long_histories() {
    let mut scanning = ScanningPeriodicity::new(48, HOUR);
    scanning.initialize(0);
    for time in (0..4 * DAY).step_by(HOUR as usize) {
        scanning.add(time, daily(time), 1.0);
    }
    assert_eq!(scanning.bucket_length(), 2 * HOUR);
    assert_eq!(scanning.bucket_values().len(), 48);
}
