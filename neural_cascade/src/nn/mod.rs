//! Neural network modules for the encoder stages.
//!
//! Each stage kind is a trait the backbone drives, with a reference Burn
//! implementation:
//! - [`SetAbstraction`] / [`PointSetAbstraction`]: sample, group, encode
//! - [`VoteStage`] / [`VoteLayer`]: shift points towards object centers
//! - [`FeatureFusion`] / [`FusionModule`]: mix high- and low-level features

pub mod fusion;
pub mod mlp;
pub mod set_abstraction;
pub mod vote;

pub use fusion::{FeatureFusion, FusionModule};
pub use mlp::SharedMlp;
pub use set_abstraction::{ConfidenceHead, PointSetAbstraction, SaOutput, SetAbstraction};
pub use vote::{VoteLayer, VoteOutput, VoteStage};
