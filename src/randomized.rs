//! A cheap test for daily and weekly periods using random projections.
//!
//! Each detector projects its values onto two families of vectors indexed
//! by the hour they arrive in: periodic projections, which repeat every day
//! or week, and random projections, which are the same values shuffled
//! within each period. A periodic signal has much more energy in the
//! periodic projections, so comparing the mean squared projections with an
//! F-test detects it without keeping any history.
//!
//! The projection vectors are shared by every detector through a
//! [`ProjectionBank`], which resamples them every few weeks.

use std::sync::{Arc, Mutex, MutexGuard};

use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro256PlusPlus;
use seasonal_core::codec::{parse_tokens, Delimited};
use seasonal_core::constants::{DAY, DEFAULT_SEED, LINALG_DELIMITER, WEEK};
use seasonal_core::statistics::{f_test, CentralMoments};
use seasonal_core::{Checksum, Time, Vector};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::persist::{insert_display, parse_field, require, StateInserter, StateTraverser};

/// Number of projections of each kind.
pub const N: usize = 5;

const PROJECTIONS: usize = 2 * N;

/// Resolution of the projection vectors.
pub const SAMPLE_INTERVAL: Time = 3_600;

/// Interval between resampling the day projections.
pub const DAY_RESAMPLE_INTERVAL: Time = 1_209_600;

/// Interval between resampling the week projections.
pub const WEEK_RESAMPLE_INTERVAL: Time = 2_419_200;

const STATISTICS_DECAY: f64 = 0.1;

const DAY_PROJECTIONS_TAG: &str = "a";
const DAY_STATISTICS_TAG: &str = "b";
const DAY_REFRESHED_TAG: &str = "c";
const WEEK_PROJECTIONS_TAG: &str = "d";
const WEEK_STATISTICS_TAG: &str = "e";
const WEEK_REFRESHED_TAG: &str = "f";

const RNG_TAG: &str = "a";
const DAY_RANDOM_TAG: &str = "b";
const DAY_PERIODIC_TAG: &str = "c";
const DAY_RESAMPLED_TAG: &str = "d";
const WEEK_RANDOM_TAG: &str = "e";
const WEEK_PERIODIC_TAG: &str = "f";
const WEEK_RESAMPLED_TAG: &str = "g";
const INDEX_TAG: &str = "h";

type ProjectionAccumulator = CentralMoments<Vector<PROJECTIONS>, 1>;
type StatisticAccumulator = CentralMoments<Vector<2>, 1>;

fn floor(time: Time, interval: Time) -> Time {
    time.div_euclid(interval) * interval
}

fn join_values(values: &[f64]) -> String {
    values
        .iter()
        .map(f64::to_string)
        .collect::<Vec<_>>()
        .join(&LINALG_DELIMITER.to_string())
}

/// Index of `time` in a projection spanning `interval`.
fn slot(time: Time, interval: Time) -> usize {
    (time.rem_euclid(interval) / SAMPLE_INTERVAL) as usize
}

// ============================================================================
// Projection bank
// ============================================================================

/// The projections of one period.
#[derive(Debug, Clone, PartialEq)]
struct Projections {
    period: Time,
    resample_interval: Time,
    random: [Vec<f64>; N],
    periodic: [Vec<f64>; N],
    resampled: Time,
}

impl Projections {
    fn new(period: Time, resample_interval: Time) -> Self {
        Self {
            period,
            resample_interval,
            random: Default::default(),
            periodic: Default::default(),
            resampled: -resample_interval,
        }
    }

    fn periodic_len(&self) -> usize {
        (self.period / SAMPLE_INTERVAL) as usize
    }

    fn random_len(&self) -> usize {
        (self.resample_interval / SAMPLE_INTERVAL) as usize
    }

    fn needs_resample(&self, time: Time) -> bool {
        time >= self.resampled.saturating_add(self.resample_interval)
    }

    /// Draw new periodic projections with zero mean, and random projections
    /// which shuffle them within each period.
    fn resample(&mut self, rng: &mut Xoshiro256PlusPlus, time: Time) {
        let n = self.periodic_len();
        let t = self.random_len();
        for (periodic, random) in self.periodic.iter_mut().zip(self.random.iter_mut()) {
            *periodic = (0..n).map(|_| rng.gen_range(-1.0..1.0)).collect();
            let mean = periodic.iter().sum::<f64>() / n as f64;
            for x in periodic.iter_mut() {
                *x -= mean;
            }
            random.clear();
            random.resize(t, 0.0);
            for chunk in random.chunks_exact_mut(n) {
                chunk.copy_from_slice(periodic);
                chunk.shuffle(rng);
            }
        }
        self.resampled = floor(time, self.resample_interval);
    }

    /// The projections of `value` arriving at `time`, interleaving random
    /// and periodic.
    fn project(&self, time: Time, value: f64) -> Vector<PROJECTIONS> {
        let random = slot(time, self.resample_interval);
        let periodic = slot(time, self.period);
        let mut result = Vector::<PROJECTIONS>::zeros();
        for i in 0..N {
            result[2 * i] = self.random[i].get(random).copied().unwrap_or(0.0) * value;
            result[2 * i + 1] = self.periodic[i].get(periodic).copied().unwrap_or(0.0) * value;
        }
        result
    }

    fn validate(&self) -> Result<()> {
        let (n, t) = (self.periodic_len(), self.random_len());
        for i in 0..N {
            if self.periodic[i].len() != n || self.random[i].len() != t {
                return Err(Error::BadState(format!(
                    "projection {} of period {} has lengths {} and {}, expected {} and {}",
                    i,
                    self.period,
                    self.periodic[i].len(),
                    self.random[i].len(),
                    n,
                    t
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
struct BankState {
    rng: Xoshiro256PlusPlus,
    day: Projections,
    week: Projections,
}

impl BankState {
    fn resample(&mut self, time: Time) {
        if self.day.needs_resample(time) {
            tracing::trace!(time, "Resampling day projections");
            self.day.resample(&mut self.rng, time);
        }
        if self.week.needs_resample(time) {
            tracing::trace!(time, "Resampling week projections");
            self.week.resample(&mut self.rng, time);
        }
    }
}

/// Projection vectors shared by every [`RandomizedPeriodicity`] detector.
///
/// The bank is resampled by whichever detector first sees a value after
/// the resample interval. It is only ever handed out behind an [`Arc`], and
/// the only way to restore persisted state is [`ProjectionBank::restore`],
/// which builds a new bank, so state is never restored into a bank that
/// detectors already share.
#[derive(Debug)]
pub struct ProjectionBank {
    state: Mutex<BankState>,
}

impl ProjectionBank {
    /// A bank seeded with the default seed.
    #[allow(clippy::new_ret_no_self)]
    pub fn new() -> Arc<Self> {
        Self::with_seed(DEFAULT_SEED)
    }

    pub fn with_seed(seed: u64) -> Arc<Self> {
        let mut state = BankState {
            rng: Xoshiro256PlusPlus::seed_from_u64(seed),
            day: Projections::new(DAY, DAY_RESAMPLE_INTERVAL),
            week: Projections::new(WEEK, WEEK_RESAMPLE_INTERVAL),
        };
        state.resample(0);
        Arc::new(Self {
            state: Mutex::new(state),
        })
    }

    fn lock(&self) -> MutexGuard<'_, BankState> {
        // Every update leaves the state consistent before it can panic.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Resample any projections whose interval has elapsed by `time`.
    pub fn resample(&self, time: Time) {
        self.lock().resample(time);
    }

    /// Times the day and week projections were last resampled.
    pub fn resampled(&self) -> (Time, Time) {
        let state = self.lock();
        (state.day.resampled, state.week.resampled)
    }

    fn project(&self, time: Time, value: f64) -> (Vector<PROJECTIONS>, Vector<PROJECTIONS>) {
        let mut state = self.lock();
        state.resample(time);
        (state.day.project(time, value), state.week.project(time, value))
    }

    pub fn checksum(&self, seed: u64) -> u64 {
        let state = self.lock();
        let mut seed = seed;
        for projections in [&state.day, &state.week] {
            seed = projections.resampled.checksum(seed);
            for i in 0..N {
                seed = projections.random[i].checksum(seed);
                seed = projections.periodic[i].checksum(seed);
            }
        }
        seed
    }

    pub fn persist(&self, inserter: &mut dyn StateInserter) {
        let state = self.lock();
        match serde_json::to_string(&state.rng) {
            Ok(rng) => inserter.insert_value(RNG_TAG, rng),
            Err(e) => tracing::error!(error = %e, "Failed to persist projection bank rng"),
        }
        insert_display(inserter, DAY_RESAMPLED_TAG, state.day.resampled);
        insert_display(inserter, WEEK_RESAMPLED_TAG, state.week.resampled);
        for i in 0..N {
            insert_display(inserter, INDEX_TAG, i);
            inserter.insert_value(DAY_RANDOM_TAG, join_values(&state.day.random[i]));
            inserter.insert_value(DAY_PERIODIC_TAG, join_values(&state.day.periodic[i]));
            inserter.insert_value(WEEK_RANDOM_TAG, join_values(&state.week.random[i]));
            inserter.insert_value(WEEK_PERIODIC_TAG, join_values(&state.week.periodic[i]));
        }
    }

    /// A new bank from the state written by [`persist`](Self::persist).
    pub fn restore(traverser: &dyn StateTraverser) -> Result<Arc<Self>> {
        const CONTEXT: &str = "projection bank";
        let mut rng = None;
        let mut day = Projections::new(DAY, DAY_RESAMPLE_INTERVAL);
        let mut week = Projections::new(WEEK, WEEK_RESAMPLE_INTERVAL);
        let mut day_resampled = None;
        let mut week_resampled = None;
        let mut index = 0;
        for (tag, entry) in traverser.entries() {
            let projection = |projections: &mut [Vec<f64>; N], index: usize| -> Result<()> {
                let slot = projections
                    .get_mut(index)
                    .ok_or_else(|| Error::BadState(format!("projection index {} out of range", index)))?;
                *slot = parse_tokens(entry.value(tag)?, LINALG_DELIMITER)?;
                Ok(())
            };
            match tag {
                RNG_TAG => {
                    rng = Some(serde_json::from_str::<Xoshiro256PlusPlus>(entry.value(tag)?)?);
                }
                DAY_RESAMPLED_TAG => day_resampled = Some(parse_field(entry.value(tag)?)?),
                WEEK_RESAMPLED_TAG => week_resampled = Some(parse_field(entry.value(tag)?)?),
                INDEX_TAG => index = parse_field(entry.value(tag)?)?,
                DAY_RANDOM_TAG => projection(&mut day.random, index)?,
                DAY_PERIODIC_TAG => projection(&mut day.periodic, index)?,
                WEEK_RANDOM_TAG => projection(&mut week.random, index)?,
                WEEK_PERIODIC_TAG => projection(&mut week.periodic, index)?,
                _ => {}
            }
        }
        day.resampled = require(day_resampled, DAY_RESAMPLED_TAG, CONTEXT)?;
        week.resampled = require(week_resampled, WEEK_RESAMPLED_TAG, CONTEXT)?;
        day.validate()?;
        week.validate()?;
        let state = BankState {
            rng: require(rng, RNG_TAG, CONTEXT)?,
            day,
            week,
        };
        Ok(Arc::new(Self {
            state: Mutex::new(state),
        }))
    }
}

// ============================================================================
// Detector
// ============================================================================

/// The randomized daily and weekly periodicity test of one time series.
#[derive(Debug, Clone)]
pub struct RandomizedPeriodicity {
    bank: Arc<ProjectionBank>,
    significance: f64,
    day_projections: ProjectionAccumulator,
    day_statistics: StatisticAccumulator,
    day_refreshed: Time,
    week_projections: ProjectionAccumulator,
    week_statistics: StatisticAccumulator,
    week_refreshed: Time,
}

impl RandomizedPeriodicity {
    pub fn new(bank: Arc<ProjectionBank>) -> Self {
        Self::with_config(bank, &Config::default())
    }

    pub fn with_config(bank: Arc<ProjectionBank>, config: &Config) -> Self {
        Self {
            bank,
            significance: config.randomized_significance,
            day_projections: ProjectionAccumulator::new(),
            day_statistics: StatisticAccumulator::new(),
            day_refreshed: -DAY_RESAMPLE_INTERVAL,
            week_projections: ProjectionAccumulator::new(),
            week_statistics: StatisticAccumulator::new(),
            week_refreshed: -WEEK_RESAMPLE_INTERVAL,
        }
    }

    pub fn bank(&self) -> &Arc<ProjectionBank> {
        &self.bank
    }

    /// Project `value` arriving at `time`.
    ///
    /// Once per resample interval the projections accumulated so far are
    /// folded into the test statistics and restarted.
    pub fn add(&mut self, time: Time, value: f64) {
        let (day, week) = self.bank.project(time, value);

        if time >= self.day_refreshed.saturating_add(DAY_RESAMPLE_INTERVAL) {
            tracing::trace!(time, "Updating day statistics");
            update_statistics(&mut self.day_projections, &mut self.day_statistics);
            self.day_refreshed = floor(time, DAY_RESAMPLE_INTERVAL);
        }
        if time >= self.week_refreshed.saturating_add(WEEK_RESAMPLE_INTERVAL) {
            tracing::trace!(time, "Updating week statistics");
            update_statistics(&mut self.week_projections, &mut self.week_statistics);
            self.week_refreshed = floor(time, WEEK_RESAMPLE_INTERVAL);
        }

        self.day_projections.add(day);
        self.week_projections.add(week);
    }

    /// True if the periodic projections capture significantly more energy
    /// than the random ones for either the day or the week.
    pub fn test(&self) -> bool {
        for (name, statistics) in [("day", &self.day_statistics), ("week", &self.week_statistics)] {
            let n = statistics.count();
            if n < 1.0 {
                continue;
            }
            let s = statistics.mean();
            let ratio = if s[0] == s[1] {
                1.0
            } else if s[0] == 0.0 {
                f64::MAX
            } else {
                s[1] / s[0]
            };
            match f_test(ratio, n, n) {
                Ok(p) => {
                    tracing::trace!(period = name, ratio, n, significance = 1.0 - p, "Randomized test");
                    if 1.0 - p < self.significance {
                        return true;
                    }
                }
                Err(e) => {
                    tracing::error!(error = %e, "Failed to test for periodicity");
                    return false;
                }
            }
        }
        false
    }

    /// Checksum of this detector's own state, excluding the shared bank.
    pub fn checksum(&self, seed: u64) -> u64 {
        let seed = self.day_projections.checksum(seed);
        let seed = self.day_statistics.checksum(seed);
        let seed = self.day_refreshed.checksum(seed);
        let seed = self.week_projections.checksum(seed);
        let seed = self.week_statistics.checksum(seed);
        self.week_refreshed.checksum(seed)
    }

    /// Persist this detector's own state; the bank is persisted separately.
    pub fn persist(&self, inserter: &mut dyn StateInserter) {
        inserter.insert_value(DAY_PROJECTIONS_TAG, self.day_projections.to_delimited());
        inserter.insert_value(DAY_STATISTICS_TAG, self.day_statistics.to_delimited());
        insert_display(inserter, DAY_REFRESHED_TAG, self.day_refreshed);
        inserter.insert_value(WEEK_PROJECTIONS_TAG, self.week_projections.to_delimited());
        inserter.insert_value(WEEK_STATISTICS_TAG, self.week_statistics.to_delimited());
        insert_display(inserter, WEEK_REFRESHED_TAG, self.week_refreshed);
    }

    pub fn restore(bank: Arc<ProjectionBank>, config: &Config, traverser: &dyn StateTraverser) -> Result<Self> {
        const CONTEXT: &str = "randomized periodicity";
        let mut day_projections = None;
        let mut day_statistics = None;
        let mut day_refreshed = None;
        let mut week_projections = None;
        let mut week_statistics = None;
        let mut week_refreshed = None;
        for (tag, entry) in traverser.entries() {
            match tag {
                DAY_PROJECTIONS_TAG => day_projections = Some(ProjectionAccumulator::from_delimited(entry.value(tag)?)?),
                DAY_STATISTICS_TAG => day_statistics = Some(StatisticAccumulator::from_delimited(entry.value(tag)?)?),
                DAY_REFRESHED_TAG => day_refreshed = Some(parse_field(entry.value(tag)?)?),
                WEEK_PROJECTIONS_TAG => {
                    week_projections = Some(ProjectionAccumulator::from_delimited(entry.value(tag)?)?)
                }
                WEEK_STATISTICS_TAG => week_statistics = Some(StatisticAccumulator::from_delimited(entry.value(tag)?)?),
                WEEK_REFRESHED_TAG => week_refreshed = Some(parse_field(entry.value(tag)?)?),
                _ => {}
            }
        }
        Ok(Self {
            bank,
            significance: config.randomized_significance,
            day_projections: require(day_projections, DAY_PROJECTIONS_TAG, CONTEXT)?,
            day_statistics: require(day_statistics, DAY_STATISTICS_TAG, CONTEXT)?,
            day_refreshed: require(day_refreshed, DAY_REFRESHED_TAG, CONTEXT)?,
            week_projections: require(week_projections, WEEK_PROJECTIONS_TAG, CONTEXT)?,
            week_statistics: require(week_statistics, WEEK_STATISTICS_TAG, CONTEXT)?,
            week_refreshed: require(week_refreshed, WEEK_REFRESHED_TAG, CONTEXT)?,
        })
    }
}

impl PartialEq for RandomizedPeriodicity {
    /// Detectors are equal if they share a bank and have the same state.
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.bank, &other.bank)
            && self.significance == other.significance
            && self.day_projections == other.day_projections
            && self.day_statistics == other.day_statistics
            && self.day_refreshed == other.day_refreshed
            && self.week_projections == other.week_projections
            && self.week_statistics == other.week_statistics
            && self.week_refreshed == other.week_refreshed
    }
}

/// Fold the mean squared random and periodic projections into `statistics`
/// and restart `projections`.
fn update_statistics(projections: &mut ProjectionAccumulator, statistics: &mut StatisticAccumulator) {
    if projections.count() > 0.0 {
        let mean = projections.mean();
        let mut statistic = StatisticAccumulator::new();
        for i in 0..N {
            statistic.add(Vector::from_array([mean[2 * i] * mean[2 * i], mean[2 * i + 1] * mean[2 * i + 1]]));
        }
        *statistics += statistic;
        statistics.age(1.0 - STATISTICS_DECAY);
        tracing::trace!(%statistics, "Updated randomized statistics");
    }
    *projections = ProjectionAccumulator::new();
}
