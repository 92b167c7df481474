//! Records produced by a forward pass.

use burn::prelude::*;
use cascade_core::IndexMatrix;

use super::Pyramid;
use crate::ops::batch_tagged;

/// Centers and offsets of the last vote stage.
#[derive(Debug, Clone)]
pub struct VoteRecord<B: Backend> {
    /// Shifted centers, shape [batch, M, 3].
    pub centers: Tensor<B, 3>,
    /// Centers before the shift, shape [batch, M, 3].
    pub centers_origin: Tensor<B, 3>,
    /// Batch-tagged origin centers, shape [batch, M, 4].
    pub origin_coords: Tensor<B, 3>,
    /// Offsets, shape [batch, M, 3].
    pub offsets: Tensor<B, 3>,
}

impl<B: Backend> VoteRecord<B> {
    pub(crate) fn new(
        centers: Tensor<B, 3>,
        centers_origin: Tensor<B, 3>,
        offsets: Tensor<B, 3>,
        batch_index: &Tensor<B, 2>,
    ) -> Self {
        Self {
            origin_coords: batch_tagged(centers_origin.clone(), batch_index),
            centers,
            centers_origin,
            offsets,
        }
    }

    /// Centers per batch element.
    pub fn num_centers(&self) -> usize {
        self.centers.dims()[1]
    }
}

/// Everything an encoder forward pass produces.
///
/// Row tensors are flattened across the batch and carry the batch index in
/// column 0; row `b * M + j` is center `j` of batch element `b`.
#[derive(Debug, Clone)]
pub struct EncoderOutput<B: Backend> {
    /// Vote offsets, shape [batch * M, 4].
    pub ctr_offsets: Tensor<B, 2>,
    /// Shifted centers, shape [batch * M, 4].
    pub centers: Tensor<B, 2>,
    /// Centers before the shift, shape [batch * M, 4].
    pub centers_origin: Tensor<B, 2>,
    /// Fused features, shape [batch * M, C].
    pub centers_features: Tensor<B, 2>,
    /// Batch index of every row, shape [batch * M].
    pub ctr_batch_idx: Tensor<B, 1>,
    /// Every pyramid level, input first.
    pub pyramid: Pyramid<B>,
    /// The authoritative vote stage's record.
    pub vote: VoteRecord<B>,
    /// Recorded subsample index of every stage; `None` for vote stages.
    pub sample_indices: Vec<Option<IndexMatrix>>,
    /// Positions of the coarse fusion level's points in the dense level.
    pub fusion_index: IndexMatrix,
    /// Latest class prediction, shape [batch, M', K].
    pub class_prediction: Option<Tensor<B, 3>>,
}

impl<B: Backend> EncoderOutput<B> {
    /// Number of output rows.
    pub fn num_rows(&self) -> usize {
        self.centers.dims()[0]
    }

    /// Width of the fused features.
    pub fn num_point_features(&self) -> usize {
        self.centers_features.dims()[1]
    }
}
