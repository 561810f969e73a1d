//! Error taxonomy for layer construction, lifecycle and tensor arithmetic.
//!
//! Every fallible operation in the crate returns [`LayerResult`]. Errors are
//! raised at the point of detection and never recovered from inside a layer;
//! the caller decides whether the current training step is lost.

use thiserror::Error;

/// All failure conditions a layer can report.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LayerError {
    /// Invalid constructor arguments or parameter vectors.
    #[error("invalid configuration: {0}")]
    Configuration(String),

    /// Lifecycle violation, e.g. `backward` without a preceding `forward`.
    #[error("invalid layer state: {0}")]
    State(&'static str),

    /// Tensor operation invoked with incompatible shapes.
    #[error("shape mismatch: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        /// The shape the operation required.
        expected: Vec<usize>,
        /// The shape it was given.
        actual: Vec<usize>,
    },

    /// The call is not meaningful for this layer (e.g. single-input forward on
    /// a layer that needs two inputs).
    #[error("unsupported operation: {0}")]
    UnsupportedOperation(&'static str),

    /// A configuration file could not be read or parsed.
    #[error("failed to load configuration: {0}")]
    Config(String),
}

impl LayerError {
    /// Shorthand for a [`LayerError::ShapeMismatch`].
    #[must_use]
    pub fn shape(expected: &[usize], actual: &[usize]) -> Self {
        Self::ShapeMismatch {
            expected: expected.to_vec(),
            actual: actual.to_vec(),
        }
    }

    /// Shorthand for a [`LayerError::Configuration`].
    #[must_use]
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }
}

/// Result alias used throughout the crate.
pub type LayerResult<T> = Result<T, LayerError>;
