//! Test for a step change in level.
//!
//! [`StepChange`] keeps a small random sample of recent values and looks
//! for the split point in the middle of the sample that best separates an
//! old level from a new one. A split close to the centre of the sample is
//! reported as a definite change, one nearer the ends as undetermined until
//! more values arrive.

use std::collections::VecDeque;

use rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro256PlusPlus;
use seasonal_core::codec::{parse_tokens, Delimited};
use seasonal_core::constants::{DEFAULT_SEED, LINALG_DELIMITER};
use seasonal_core::statistics::{f_test, mean_at_percentile};
use seasonal_core::{Checksum, MeanAccumulator, MeanVarAccumulator, Time};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::persist::{insert_display, parse_field, require, StateInserter, StateTraverser};

const MINIMUM_SAMPLES: usize = 8;

const RNG_TAG: &str = "a";
const BUCKET_LENGTH_TAG: &str = "b";
const PROBABILITY_TAG: &str = "c";
const NEXT_SAMPLE_TIME_TAG: &str = "d";
const SAMPLES_TAG: &str = "e";
const LEVEL_TAG: &str = "f";
const VARIANCE_TAG: &str = "g";
const CAPACITY_TAG: &str = "h";

/// A three valued test outcome.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum TernaryBool {
    #[default]
    False,
    True,
    Undetermined,
}

/// The outcome of a step change test.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct StepChangeResult {
    /// Whether a change was found.
    pub value: TernaryBool,
    /// The level after the test.
    pub level: f64,
    /// How far the level moved.
    pub shift: f64,
}

/// A down sampled window of values tested for a change in level.
#[derive(Debug, Clone, PartialEq)]
pub struct StepChange {
    config: Config,
    rng: Xoshiro256PlusPlus,
    bucket_length: Time,
    probability: f64,
    next_sample_time: Time,
    capacity: usize,
    samples: VecDeque<f64>,
    level: f64,
    /// Mean within level variance at past tests.
    variance: MeanAccumulator,
}

impl StepChange {
    /// Sample roughly one in every `1 / p` buckets of length `bucket_length`
    /// into a window of at least `n` values.
    pub fn new(bucket_length: Time, n: usize, p: f64, decay_rate: f64) -> Self {
        Self::with_config(Config::default().decay_rate(decay_rate), bucket_length, n, p)
    }

    pub fn with_config(config: Config, bucket_length: Time, n: usize, p: f64) -> Self {
        let capacity = n.max(MINIMUM_SAMPLES);
        Self {
            config,
            rng: Xoshiro256PlusPlus::seed_from_u64(DEFAULT_SEED),
            bucket_length,
            probability: p.clamp(1e-10, 1.0),
            next_sample_time: Time::MIN,
            capacity,
            samples: VecDeque::with_capacity(capacity),
            level: 0.0,
            variance: MeanAccumulator::new(),
        }
    }

    pub fn set_decay_rate(&mut self, decay_rate: f64) {
        self.config.decay_rate = decay_rate;
    }

    pub fn level(&self) -> f64 {
        self.level
    }

    pub fn samples(&self) -> &VecDeque<f64> {
        &self.samples
    }

    /// Forget the sampled values, keeping the level and variance.
    pub fn clear(&mut self) {
        self.samples.clear();
    }

    pub fn propagate_forwards_by_time(&mut self, time: f64) {
        if time < 0.0 {
            tracing::error!(time, "Can't propagate step change backwards in time");
            return;
        }
        let factor = (-self.config.decay_rate * time).exp();
        self.variance.age(factor);
    }

    /// Sample `value` if `time` is past the next sample time.
    ///
    /// The level is initialised to the sample mean when the window first
    /// fills.
    pub fn add(&mut self, time: Time, value: f64) {
        if time <= self.next_sample_time {
            return;
        }
        if self.samples.len() + 1 == self.capacity {
            let mut level = MeanAccumulator::new();
            level.add_all(self.samples.iter().chain(std::iter::once(&value)));
            self.level = level.mean();
            tracing::trace!(level = self.level, "Initial level");
        }
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(value);

        let p = self.probability;
        let buckets = (self.rng.gen_range(0.5 / p..1.5 / p) + 0.5) as Time;
        self.next_sample_time = time.saturating_add(buckets.saturating_mul(self.bucket_length));
    }

    /// Test the window for a step change and update the level if a change is
    /// found near its centre.
    ///
    /// Returns a negative result until the window is full.
    pub fn capture_variance_and_test(&mut self) -> StepChangeResult {
        let n = self.samples.len();
        if n < self.capacity {
            return StepChangeResult::default();
        }

        let (a, b) = (n / 8, 7 * n / 8);

        let mut l0 = MeanAccumulator::new();
        let mut l1 = MeanAccumulator::new();
        let mut l2 = MeanVarAccumulator::new();
        for (i, &sample) in self.samples.iter().enumerate() {
            let r = sample - self.level;
            l0.add(r * r);
            if i < a {
                l1.add(r * r);
            } else {
                l2.add(sample);
            }
        }

        let v0 = l0.mean();
        if v0 < (1e-4 * self.level).max(1e-12) {
            self.variance += MeanAccumulator::accumulator(1.0, v0);
            return StepChangeResult::default();
        }

        let mut v1 = f64::MAX;
        let (mut level, mut level_count, mut level_variance) = (0.0, 0.0, 0.0);
        let mut knot = 0;
        for (i, &sample) in self.samples.iter().enumerate().take(b).skip(a) {
            let vi = (l1 + MeanAccumulator::accumulator(l2.count(), l2.maximum_likelihood_variance())).mean();
            if vi < v1 {
                v1 = vi;
                level = l2.mean();
                level_count = l2.count();
                level_variance = l2.maximum_likelihood_variance();
                knot = i;
            }
            let r = sample - self.level;
            l1.add(r * r);
            l2 -= MeanVarAccumulator::accumulator(1.0, sample, 0.0);
        }

        let threshold = 3.0 * (self.variance + MeanAccumulator::accumulator(1.0, v1)).mean().sqrt();
        let sign = if level - self.level < 0.0 { -1.0 } else { 1.0 };
        let shift = (sign
            * mean_at_percentile(
                level - self.level,
                level_variance,
                level_count,
                50.0 + sign / 2.0 * self.config.confidence_interval,
            ))
        .max(0.0);

        let significant = match f_test(v1 / v0, n as f64 - 2.0, n as f64 - 1.0) {
            Ok(p) => p < self.config.maximum_significance,
            Err(e) => {
                tracing::error!(error = %e, "Failed to test for step change");
                false
            }
        };
        let even = knot >= 3 * n / 8 && knot <= 5 * n / 8;
        let passed = shift > threshold && significant;
        tracing::trace!(knot, threshold, shift, v0, v1, even, passed, "Step change");

        let old_level = self.level;
        if even {
            self.variance += MeanAccumulator::accumulator(1.0, if passed { v1 } else { v0 });
            if passed {
                self.level = level;
            }
        }

        StepChangeResult {
            value: match (passed, even) {
                (false, _) => TernaryBool::False,
                (true, true) => TernaryBool::True,
                (true, false) => TernaryBool::Undetermined,
            },
            level: self.level,
            shift: self.level - old_level,
        }
    }

    pub fn checksum(&self, seed: u64) -> u64 {
        let seed = self.config.decay_rate.checksum(seed);
        let seed = self.bucket_length.checksum(seed);
        let seed = self.probability.checksum(seed);
        let seed = self.next_sample_time.checksum(seed);
        let seed = self.samples.iter().fold(seed, |seed, sample| sample.checksum(seed));
        let seed = self.level.checksum(seed);
        self.variance.checksum(seed)
    }

    pub fn persist(&self, inserter: &mut dyn StateInserter) {
        match serde_json::to_string(&self.rng) {
            Ok(rng) => inserter.insert_value(RNG_TAG, rng),
            Err(e) => tracing::error!(error = %e, "Failed to persist step change rng"),
        }
        insert_display(inserter, BUCKET_LENGTH_TAG, self.bucket_length);
        insert_display(inserter, PROBABILITY_TAG, self.probability);
        insert_display(inserter, NEXT_SAMPLE_TIME_TAG, self.next_sample_time);
        let samples: Vec<String> = self.samples.iter().map(f64::to_string).collect();
        inserter.insert_value(SAMPLES_TAG, samples.join(&LINALG_DELIMITER.to_string()));
        insert_display(inserter, LEVEL_TAG, self.level);
        inserter.insert_value(VARIANCE_TAG, self.variance.to_delimited());
        insert_display(inserter, CAPACITY_TAG, self.capacity);
    }

    pub fn restore(config: Config, traverser: &dyn StateTraverser) -> Result<Self> {
        const CONTEXT: &str = "step change";
        let mut rng = None;
        let mut bucket_length = None;
        let mut probability = None;
        let mut next_sample_time = None;
        let mut samples = None;
        let mut level = None;
        let mut variance = None;
        let mut capacity = None;
        for (tag, entry) in traverser.entries() {
            match tag {
                RNG_TAG => rng = Some(serde_json::from_str::<Xoshiro256PlusPlus>(entry.value(tag)?)?),
                BUCKET_LENGTH_TAG => bucket_length = Some(parse_field::<Time>(entry.value(tag)?)?),
                PROBABILITY_TAG => probability = Some(parse_field::<f64>(entry.value(tag)?)?),
                NEXT_SAMPLE_TIME_TAG => next_sample_time = Some(parse_field::<Time>(entry.value(tag)?)?),
                SAMPLES_TAG => samples = Some(parse_tokens::<f64>(entry.value(tag)?, LINALG_DELIMITER)?),
                LEVEL_TAG => level = Some(parse_field::<f64>(entry.value(tag)?)?),
                VARIANCE_TAG => variance = Some(MeanAccumulator::from_delimited(entry.value(tag)?)?),
                CAPACITY_TAG => capacity = Some(parse_field::<usize>(entry.value(tag)?)?),
                _ => {}
            }
        }

        let samples = require(samples, SAMPLES_TAG, CONTEXT)?;
        let capacity = require(capacity, CAPACITY_TAG, CONTEXT)?;
        if capacity < MINIMUM_SAMPLES || samples.len() > capacity {
            return Err(Error::BadState(format!(
                "{} samples for capacity {}",
                samples.len(),
                capacity
            )));
        }
        let mut buffer = VecDeque::with_capacity(capacity);
        buffer.extend(samples);

        Ok(Self {
            config,
            rng: require(rng, RNG_TAG, CONTEXT)?,
            bucket_length: require(bucket_length, BUCKET_LENGTH_TAG, CONTEXT)?,
            probability: require(probability, PROBABILITY_TAG, CONTEXT)?,
            next_sample_time: require(next_sample_time, NEXT_SAMPLE_TIME_TAG, CONTEXT)?,
            capacity,
            samples: buffer,
            level: require(level, LEVEL_TAG, CONTEXT)?,
            variance: require(variance, VARIANCE_TAG, CONTEXT)?,
        })
    }
}
