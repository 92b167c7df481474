//! The cascade encoder runtime.
//!
//! - [`CascadeBackbone`]: drives the stage graph and the fusion step
//! - [`Pyramid`]: every level produced during a pass
//! - [`SampleLedger`]: per-stage subsample indices
//! - [`EncoderOutput`]: the flattened, batch-tagged result

mod backbone;
mod ledger;
mod output;
mod pyramid;

pub use backbone::{CascadeBackbone, ReferenceBackbone, StageModule};
pub use ledger::SampleLedger;
pub use output::{EncoderOutput, VoteRecord};
pub use pyramid::{Pyramid, PyramidEntry};
