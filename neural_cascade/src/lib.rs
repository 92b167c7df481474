//! # neural_cascade
//!
//! Burn runtime for cascaded point-cloud encoders.
//!
//! A batch of raw points goes through an ordered list of stages. Sampling
//! stages pick fewer points and aggregate their neighborhoods; vote stages
//! shift points towards object centers. Every stage output becomes a
//! pyramid level. After the last stage, the features of a dense level are
//! gathered at the points of a coarse level by composing the subsample
//! indices in between, fused with the coarse features, and emitted per
//! voted center.
//!
//! ## Quick Start
//!
//! ```ignore
//! use neural_cascade::prelude::*;
//! use burn::backend::NdArray;
//!
//! let device = Default::default();
//! let config = EncoderConfig::ia_ssd(3);
//! let backbone = ReferenceBackbone::<NdArray>::new(&config, &device)?;
//!
//! // rows: [batch_index, x, y, z, intensity]
//! let batch = PointBatch::from_points(points, 2)?;
//! let output = backbone.forward(&batch)?;
//! println!("{:?}", output.centers_features.dims());
//! ```
//!
//! ## Architecture
//!
//! ```text
//! cascade_core (stage graph, index composition, sampling)
//!     │
//!     ▼
//! neural_cascade
//!     config ─▶ encoder::CascadeBackbone ─▶ EncoderOutput
//!                   │        │
//!              nn stages   dump::SampleSink
//! ```
//!
//! ## Feature Flags
//!
//! - `std` (default): Standard library support
//! - `ndarray` (default): CPU backend using ndarray
//! - `wgpu`: GPU acceleration via WebGPU

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod data;
pub mod dump;
pub mod encoder;
pub mod error;
pub mod nn;
pub mod ops;

// Re-export key types for convenience
pub use config::{EncoderConfig, FusionConfig, SharedMlpConfig};
pub use data::PointBatch;
pub use encoder::{CascadeBackbone, EncoderOutput, ReferenceBackbone, StageModule};
pub use error::{NeuralCascadeError, Result};

// Re-export from cascade_core for convenience
pub use cascade_core::{
    ErrorKind, FusionLevels, IndexMatrix, SampleMethod, SamplingParams, StageDescriptor,
    StageGraph, StageKind, VoteParams,
};

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::config::{EncoderConfig, FusionConfig, SharedMlpConfig};
    pub use crate::data::PointBatch;
    pub use crate::dump::{DirectorySink, SampleSink};
    pub use crate::encoder::{
        CascadeBackbone, EncoderOutput, Pyramid, PyramidEntry, ReferenceBackbone, SampleLedger,
        StageModule, VoteRecord,
    };
    pub use crate::error::{NeuralCascadeError, Result};
    pub use crate::nn::{
        FeatureFusion, FusionModule, PointSetAbstraction, SaOutput, SetAbstraction, SharedMlp,
        VoteLayer, VoteOutput, VoteStage,
    };

    pub use cascade_core::prelude::*;
}
