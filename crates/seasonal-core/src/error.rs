//! Error types for the numeric core.

use thiserror::Error;

/// Failure to reconstruct a value from its delimited representation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    /// The representation held no tokens where some were required.
    #[error("empty representation")]
    Empty,

    /// A token could not be parsed as a number.
    #[error("invalid numeric token '{token}'")]
    BadNumber {
        /// The offending token.
        token: String,
    },

    /// The representation held the wrong number of elements.
    #[error("expected {expected} elements, found {found}")]
    WrongLength {
        /// Number of elements required.
        expected: usize,
        /// Number of elements present.
        found: usize,
    },

    /// The element count is not that of a packed lower triangle.
    #[error("{0} elements do not form a packed lower triangle")]
    NotTriangular(usize),
}

/// Failure of a matrix decomposition based operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum LinalgError {
    /// The matrix has a null space the operation cannot ignore.
    #[error("matrix is singular")]
    Singular,

    /// The decomposition did not produce finite values.
    #[error("decomposition produced non-finite values")]
    NonFinite,
}

/// Invalid parameters passed to a probability distribution.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid distribution parameters: {0}")]
pub struct DistributionError(pub String);
