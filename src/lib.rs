//! # seasonal
//!
//! Online tests for periodicity, trend and step changes in bucketed time
//! series.
//!
//! Values arrive one at a time and are folded into fixed size summaries, so
//! memory use is bounded however long a series runs. The detectors are:
//!
//! - [`Periodicity`]: tests a window of bucket means for a fixed set of
//!   candidate periods and an optional weekday/weekend style partition
//! - [`ScanningPeriodicity`]: searches a long window for the period with the
//!   strongest autocorrelation and hands back a [`Periodicity`] for it
//! - [`RandomizedPeriodicity`]: a cheap daily and weekly test over random
//!   projections shared through a [`ProjectionBank`]
//! - [`Trend`]: tests whether a cubic trend explains the values
//! - [`StepChange`]: tests for a sudden change in level
//!
//! Every detector persists to, and restores from, a tagged
//! [`StateDocument`] that renders as JSON.
//!
//! ## Quick Start
//!
//! ```
//! use seasonal::{daily_and_weekly, print_daily_and_weekly};
//! use seasonal::constants::{DAY, HOUR};
//!
//! let mut test = daily_and_weekly(HOUR, 0.0).unwrap();
//! for time in (0..14 * DAY).step_by(HOUR as usize) {
//!     let phase = 2.0 * std::f64::consts::PI * (time % DAY) as f64 / DAY as f64;
//!     let jitter = ((time / HOUR) * 7919 % 13) as f64 / 13.0;
//!     test.add(time, 10.0 * phase.sin() + jitter, 1.0);
//! }
//!
//! let result = test.test();
//! println!("found {}", print_daily_and_weekly(&result));
//! assert!(result.periodic());
//! ```
//!
//! ## Logging
//!
//! Detectors emit [`tracing`] events: `trace` for test statistics, `debug`
//! for decisions, and `error` for misuse such as propagating backwards in
//! time. Install a subscriber to see them.

#![warn(clippy::all)]

mod config;
mod error;
pub mod periodicity;
pub mod persist;
mod randomized;
mod step_change;
mod trend;

pub use config::Config;
pub use error::{Error, Result};
pub use periodicity::{
    daily_and_weekly, print_daily_and_weekly, Interval, Period, Periodicity, PeriodicityResult,
    ScanningPeriodicity, PERMITTED_BUCKET_LENGTHS,
};
pub use persist::{StateDocument, StateEntry, StateInserter, StateTraverser};
pub use randomized::{ProjectionBank, RandomizedPeriodicity};
pub use step_change::{StepChange, StepChangeResult, TernaryBool};
pub use trend::Trend;

pub use seasonal_core::{constants, Time};
