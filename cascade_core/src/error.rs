//! Error types for cascade_core operations.
//!
//! Every core error belongs to one of two classes (see [`ErrorKind`]): a
//! configuration error is detected while building a [`StageGraph`](crate::StageGraph)
//! and never mid-run; a precondition violation aborts the forward evaluation
//! of the whole batch.

use thiserror::Error;

/// Classification of a [`CascadeError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Invalid stage graph or stage parameters, detected at construction.
    Configuration,
    /// Invalid runtime input, fatal for the current batch.
    Precondition,
    /// Failure outside the numeric path, such as diagnostic output.
    /// Never produced by this crate.
    External,
}

/// Errors that can occur while validating or evaluating a stage cascade.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CascadeError {
    /// The stage list is empty.
    #[error("stage graph has no stages")]
    EmptyPipeline,

    /// A stage references a level that is not yet available when it runs.
    #[error("stage {stage} {field} references level {level}, but only levels 0..={stage} exist when it runs")]
    ForwardReference {
        /// Stage holding the reference.
        stage: usize,
        /// Name of the referencing field.
        field: &'static str,
        /// Referenced pyramid level.
        level: usize,
    },

    /// A list parameter that must be non-empty is empty.
    #[error("stage {stage}: parameter `{parameter}` must not be empty")]
    EmptyParameter {
        /// Stage index.
        stage: usize,
        /// Parameter name.
        parameter: &'static str,
    },

    /// Two per-pass or per-branch lists disagree in length.
    #[error("stage {stage}: `{parameter}` has {got} entries, expected {expected}")]
    ParameterLengthMismatch {
        /// Stage index.
        stage: usize,
        /// Parameter name.
        parameter: &'static str,
        /// Expected number of entries.
        expected: usize,
        /// Actual number of entries.
        got: usize,
    },

    /// A parameter value is outside its valid domain.
    #[error("stage {stage}: invalid `{parameter}`: {message}")]
    InvalidParameter {
        /// Stage index.
        stage: usize,
        /// Parameter name.
        parameter: &'static str,
        /// Description of the problem.
        message: String,
    },

    /// The pipeline has no vote stage, so no centers can be produced.
    #[error("stage graph has no vote stage")]
    MissingVoteStage,

    /// Class-aware sampling is configured but no earlier stage predicts classes.
    #[error("stage {stage} samples by class score but no earlier stage has a confidence MLP")]
    MissingClassSource {
        /// Stage index.
        stage: usize,
    },

    /// The fusion level pair is invalid.
    #[error("invalid fusion levels low={low} high={high}: {message}")]
    InvalidFusionLevels {
        /// Dense level.
        low: usize,
        /// Coarse level.
        high: usize,
        /// Description of the problem.
        message: String,
    },

    /// No index chain connects the coarse level back to the dense level.
    #[error("no index chain from level {high} to level {low}: {message}")]
    BrokenIndexChain {
        /// Dense level.
        low: usize,
        /// Coarse level.
        high: usize,
        /// Description of where the walk failed.
        message: String,
    },

    /// Batch elements contribute different point counts.
    #[error("batch elements have unequal point counts: {counts:?}")]
    UnequalBatchCounts {
        /// Point count per batch element.
        counts: Vec<usize>,
    },

    /// A point carries a batch index outside `0..batch_size`.
    #[error("point {point} has batch index {value}, batch size is {batch_size}")]
    BatchIndexOutOfRange {
        /// Row of the offending point.
        point: usize,
        /// Its batch index value.
        value: f32,
        /// Configured batch size.
        batch_size: usize,
    },

    /// Points are not grouped by ascending batch index.
    #[error("point {point} has batch index {value} after a point of batch {previous}")]
    UnsortedBatch {
        /// Row of the offending point.
        point: usize,
        /// Its batch index.
        value: usize,
        /// Batch index of the preceding point.
        previous: usize,
    },

    /// An index value points outside the domain it indexes.
    #[error("batch {batch}, position {position}: index {index} out of range for {len} points")]
    IndexOutOfRange {
        /// Batch element.
        batch: usize,
        /// Position within the index row.
        position: usize,
        /// Offending value.
        index: i64,
        /// Size of the indexed domain.
        len: usize,
    },

    /// Two index matrices cannot be composed because their shapes disagree.
    #[error("index shape mismatch: expected {expected:?}, got {got:?}")]
    IndexShapeMismatch {
        /// Expected `[batch, len]`.
        expected: [usize; 2],
        /// Actual `[batch, len]`.
        got: [usize; 2],
    },

    /// A chain stage never recorded a subsample index.
    #[error("stage {stage} has no recorded subsample index")]
    MissingSubsampleIndex {
        /// Stage index.
        stage: usize,
    },
}

impl CascadeError {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            CascadeError::UnequalBatchCounts { .. }
            | CascadeError::BatchIndexOutOfRange { .. }
            | CascadeError::UnsortedBatch { .. }
            | CascadeError::IndexOutOfRange { .. }
            | CascadeError::IndexShapeMismatch { .. }
            | CascadeError::MissingSubsampleIndex { .. } => ErrorKind::Precondition,
            _ => ErrorKind::Configuration,
        }
    }

    pub(crate) fn invalid(stage: usize, parameter: &'static str, message: impl Into<String>) -> Self {
        CascadeError::InvalidParameter {
            stage,
            parameter,
            message: message.into(),
        }
    }
}

/// Result type for cascade_core operations.
pub type Result<T> = std::result::Result<T, CascadeError>;
