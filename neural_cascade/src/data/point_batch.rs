//! Batched point input.

use burn::prelude::*;
use cascade_core::uniform_point_count;

use crate::error::{NeuralCascadeError, Result};
use crate::ops::to_host;

/// A batch of point clouds with equal point counts, in dense layout.
#[derive(Debug, Clone)]
pub struct PointBatch<B: Backend> {
    /// Coordinates, shape [batch, points, 3].
    pub xyz: Tensor<B, 3>,
    /// Per-point attributes, shape [batch, channels, points].
    pub features: Option<Tensor<B, 3>>,
    /// Batch index of every point, shape [batch, points].
    pub batch_index: Tensor<B, 2>,
    /// One identifier per batch element, used only for diagnostics.
    pub frame_ids: Option<Vec<String>>,
}

impl<B: Backend> PointBatch<B> {
    /// Build from flat rows `[batch_index, x, y, z, attr...]`.
    ///
    /// Input shape: [total_points, 4 + C]
    ///
    /// Rows must be grouped by ascending batch index and every batch
    /// element must contribute the same number of points.
    pub fn from_points(points: Tensor<B, 2>, batch_size: usize) -> Result<Self> {
        let [total, columns] = points.dims();
        if columns < 4 {
            return Err(NeuralCascadeError::InvalidData(format!(
                "point rows need [batch_index, x, y, z], got {} columns",
                columns
            )));
        }
        if batch_size == 0 {
            return Err(NeuralCascadeError::InvalidData(
                "batch_size must be positive".to_string(),
            ));
        }

        let batch_column = points.clone().slice([0..total, 0..1]);
        let num_points = uniform_point_count(&to_host(batch_column.clone())?, batch_size)?;

        let xyz = points
            .clone()
            .slice([0..total, 1..4])
            .reshape([batch_size, num_points, 3]);
        let features = (columns > 4).then(|| {
            points
                .slice([0..total, 4..columns])
                .reshape([batch_size, num_points, columns - 4])
                .swap_dims(1, 2)
        });
        let batch_index = batch_column.reshape([batch_size, num_points]);

        log::debug!(
            "point batch: {} elements x {} points, {} feature channels",
            batch_size,
            num_points,
            columns - 4
        );

        Ok(Self {
            xyz,
            features,
            batch_index,
            frame_ids: None,
        })
    }

    /// Attach per-element frame identifiers.
    pub fn with_frame_ids(mut self, frame_ids: Vec<String>) -> Result<Self> {
        if frame_ids.len() != self.batch_size() {
            return Err(NeuralCascadeError::InvalidData(format!(
                "{} frame ids for a batch of {}",
                frame_ids.len(),
                self.batch_size()
            )));
        }
        self.frame_ids = Some(frame_ids);
        Ok(self)
    }

    /// Number of batch elements.
    pub fn batch_size(&self) -> usize {
        self.xyz.dims()[0]
    }

    /// Points per batch element.
    pub fn num_points(&self) -> usize {
        self.xyz.dims()[1]
    }

    /// Feature channels per point.
    pub fn num_features(&self) -> usize {
        self.features.as_ref().map_or(0, |f| f.dims()[1])
    }
}
