//! Input records for the encoder.

mod point_batch;

pub use point_batch::PointBatch;
