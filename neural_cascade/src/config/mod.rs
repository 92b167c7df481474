//! Configuration types for neural_cascade.
//!
//! Burn-style configuration structs for the shared MLPs, the fusion
//! primitive and the whole encoder. All of them round-trip through Burn's
//! JSON config persistence.

mod encoder;
mod network;

pub use encoder::EncoderConfig;
pub use network::{FusionConfig, SharedMlpConfig};
