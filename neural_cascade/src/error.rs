//! Error types for neural_cascade.

use cascade_core::{CascadeError, ErrorKind, StageKind};
use thiserror::Error;

/// Errors that can occur while building or running a cascade backbone.
#[derive(Error, Debug)]
pub enum NeuralCascadeError {
    /// Stage graph, index or batch error from cascade_core.
    #[error(transparent)]
    Cascade(#[from] CascadeError),

    /// Invalid configuration outside the stage graph.
    #[error("invalid configuration: {message}")]
    InvalidConfig {
        /// Description of the configuration error.
        message: String,
    },

    /// A stage module does not match the kind of its descriptor.
    #[error("stage {stage}: descriptor is {expected:?} but the module is {got:?}")]
    StageMismatch {
        /// Stage index.
        stage: usize,
        /// Kind named by the descriptor.
        expected: StageKind,
        /// Kind of the supplied module.
        got: StageKind,
    },

    /// Tensor shape mismatch.
    #[error("{context}: tensor shape mismatch: expected {expected:?}, got {got:?}")]
    ShapeMismatch {
        /// Where the mismatch was detected.
        context: String,
        /// Expected shape.
        expected: Vec<usize>,
        /// Actual shape.
        got: Vec<usize>,
    },

    /// A consumer needs per-point features but the level has none.
    #[error("{context}: no point features available")]
    MissingFeatures {
        /// Where the features were needed.
        context: String,
    },

    /// Class-aware sampling ran before any stage predicted classes.
    #[error("class-aware sampling needs a prior class prediction")]
    MissingClassPrediction,

    /// Invalid or corrupted input data.
    #[error("invalid data: {0}")]
    InvalidData(String),

    /// The diagnostic sample sink failed.
    #[error("sample sink error: {message}")]
    SinkError {
        /// Description of the error.
        message: String,
    },

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl NeuralCascadeError {
    /// Classify the error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            NeuralCascadeError::Cascade(err) => err.kind(),
            NeuralCascadeError::InvalidConfig { .. } | NeuralCascadeError::StageMismatch { .. } => {
                ErrorKind::Configuration
            }
            NeuralCascadeError::ShapeMismatch { .. }
            | NeuralCascadeError::MissingFeatures { .. }
            | NeuralCascadeError::MissingClassPrediction
            | NeuralCascadeError::InvalidData(_) => ErrorKind::Precondition,
            NeuralCascadeError::SinkError { .. } | NeuralCascadeError::Io(_) => ErrorKind::External,
        }
    }

    pub(crate) fn shape(context: impl Into<String>, expected: &[usize], got: &[usize]) -> Self {
        NeuralCascadeError::ShapeMismatch {
            context: context.into(),
            expected: expected.to_vec(),
            got: got.to_vec(),
        }
    }

    pub(crate) fn missing_features(context: impl Into<String>) -> Self {
        NeuralCascadeError::MissingFeatures {
            context: context.into(),
        }
    }
}

/// Result type for neural_cascade operations.
pub type Result<T> = std::result::Result<T, NeuralCascadeError>;
