//! Constants shared by the numeric core and the detectors built on it.

use crate::types::Time;

/// Default deterministic seed for RNG operations and checksums.
///
/// The value `0x736561736F6E616C` is "seasonal" encoded in ASCII.
pub const DEFAULT_SEED: u64 = 0x736561736F6E616C;

/// Separates the components of a persisted vector or symmetric matrix.
pub const LINALG_DELIMITER: char = ',';

/// Separates the count and moments of a persisted accumulator, and the
/// values held by a persisted order-statistics accumulator.
pub const MOMENTS_DELIMITER: char = ':';

/// Separates the entries of a persisted list of accumulators.
pub const LIST_DELIMITER: char = ';';

/// Natural log of 2*pi, used in Gaussian log-likelihoods.
pub const LOG_2PI: f64 = 1.8378770664093453;

/// Relative eigenvalue below which a covariance direction is treated as singular.
pub const SINGULAR_EIGENVALUE_TOLERANCE: f64 = 1e-12;

/// Largest condition number accepted when solving for regression parameters.
pub const MAX_CONDITION: f64 = 1e15;

/// Regressions whose abscissa range is smaller than this predict their mean.
pub const MINIMUM_RANGE_TO_PREDICT: f64 = 1.0;

// ============================================================================
// Calendar
// ============================================================================

/// One hour in seconds.
pub const HOUR: Time = 3_600;

/// One day in seconds.
pub const DAY: Time = 86_400;

/// One week in seconds.
pub const WEEK: Time = 604_800;

/// The two weekend days in seconds.
pub const WEEKEND: Time = 172_800;

/// The five weekdays in seconds.
pub const WEEKDAYS: Time = 432_000;
