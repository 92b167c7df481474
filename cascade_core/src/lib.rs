//! # cascade_core
//!
//! Pure algorithms behind a cascaded point-cloud encoder.
//!
//! An encoder is an ordered list of stages. Each stage reads an earlier
//! pyramid level and appends a new one; sampling stages also emit the
//! positions of their output points within their input. This crate holds
//! everything about that bookkeeping that does not need tensors:
//!
//! - [`stage`]: stage descriptors (sampling or vote) and their parameters
//! - [`graph`]: [`StageGraph`] validation, channel widths, index-chain planning
//! - [`index`]: [`IndexMatrix`] and right-to-left composition of subsample indices
//! - [`batch`]: the equal-points-per-batch-element precondition
//! - [`sampling`]: farthest point sampling, class-score top-k, ball query
//! - [`error`]: error types
//!
//! ## Levels
//!
//! ```text
//! level 0        stage 0        level 1        stage 1        level 2
//! (input) ──────────────────▶ (16 pts) ──────────────────▶ (8 pts)  ...
//!            idx_0: 16 ← N               idx_1: 8 ← 16
//! ```
//!
//! Recovering a level-1 feature for a level-3 point composes
//! `idx_1[idx_2[j]]`, evaluated per batch element.
//!
//! ## Feature Flags
//!
//! - `serde`: `Serialize`/`Deserialize` for stage descriptors

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod batch;
pub mod error;
pub mod graph;
pub mod index;
pub mod sampling;
pub mod stage;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::batch::uniform_point_count;
    pub use crate::error::{CascadeError, ErrorKind, Result};
    pub use crate::graph::{ChainLink, FusionLevels, IndexChainPlan, StageGraph};
    pub use crate::index::{compose_chain, IndexMatrix};
    pub use crate::sampling::{ball_query, farthest_point_sample, top_k_by_score};
    pub use crate::stage::{
        center_source_from_raw, LayerInput, SampleMethod, SampleRange, SamplingParams,
        StageDescriptor, StageKind, StageLayer, VoteParams,
    };
}

// Re-export everything at crate root for convenience
pub use batch::uniform_point_count;
pub use error::{CascadeError, ErrorKind, Result};
pub use graph::{ChainLink, FusionLevels, IndexChainPlan, StageGraph};
pub use index::{compose_chain, IndexMatrix};
pub use sampling::{ball_query, farthest_point_sample, top_k_by_score};
pub use stage::{
    center_source_from_raw, LayerInput, SampleMethod, SampleRange, SamplingParams,
    StageDescriptor, StageKind, StageLayer, VoteParams,
};
