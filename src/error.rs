//! Error type for restoring detectors and validating configuration.

use seasonal_core::ParseError;
use thiserror::Error;

/// Failure to configure or restore a detector.
///
/// Statistical degeneracies encountered while testing are never reported
/// through this type: the tests log them and fall back to "no effect".
#[derive(Debug, Error)]
pub enum Error {
    /// A state document lacked a tag the detector needs.
    #[error("missing tag '{tag}' in {context}")]
    MissingTag {
        /// The missing tag.
        tag: &'static str,
        /// The detector being restored.
        context: &'static str,
    },

    /// A configuration value was out of range.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// A state document had the wrong shape.
    #[error("bad state: {0}")]
    BadState(String),

    /// A persisted value could not be parsed.
    #[error(transparent)]
    Parse(#[from] ParseError),

    /// A state document was not valid JSON.
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// Result alias for fallible detector operations.
pub type Result<T> = std::result::Result<T, Error>;
