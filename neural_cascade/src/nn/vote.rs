//! Vote stage: shift points towards object centers.

use burn::module::{Ignored, Module};
use burn::nn::{Linear, LinearConfig};
use burn::prelude::*;
use cascade_core::VoteParams;

use super::SharedMlp;
use crate::config::SharedMlpConfig;
use crate::error::{NeuralCascadeError, Result};

/// Output of a vote stage.
#[derive(Debug, Clone)]
pub struct VoteOutput<B: Backend> {
    /// Shifted points, shape [batch, M, 3].
    pub centers: Tensor<B, 3>,
    /// Features of the shifted points, shape [batch, C', M].
    pub features: Option<Tensor<B, 3>>,
    /// Points before the shift, shape [batch, M, 3].
    pub centers_origin: Tensor<B, 3>,
    /// Applied offsets, shape [batch, M, 3].
    pub offsets: Tensor<B, 3>,
}

/// A stage predicting per-point center offsets.
pub trait VoteStage<B: Backend> {
    /// Run the stage on `xyz` [batch, M, 3] and `features` [batch, C, M].
    fn forward(&self, xyz: Tensor<B, 3>, features: Option<Tensor<B, 3>>) -> Result<VoteOutput<B>>;
}

/// Shared MLP followed by a linear offset regression.
#[derive(Module, Debug)]
pub struct VoteLayer<B: Backend> {
    mlp: SharedMlp<B>,
    offset_head: Linear<B>,
    max_translate_range: Ignored<Option<[f32; 3]>>,
}

impl<B: Backend> VoteLayer<B> {
    /// Create a vote layer over `input_channels` feature channels.
    pub fn new(params: &VoteParams, input_channels: usize, device: &B::Device) -> Self {
        let config = SharedMlpConfig::new(input_channels).with_widths(params.mlps.clone());
        Self {
            offset_head: LinearConfig::new(config.output_dim(), 3).init(device),
            mlp: config.init(device),
            max_translate_range: Ignored(params.max_translate_range),
        }
    }

    fn clamp_offsets(&self, offsets: Tensor<B, 3>) -> Tensor<B, 3> {
        let Some(range) = self.max_translate_range.0 else {
            return offsets;
        };
        let [batch, points, _] = offsets.dims();
        let axes = range
            .iter()
            .enumerate()
            .map(|(axis, &limit)| {
                offsets
                    .clone()
                    .slice([0..batch, 0..points, axis..axis + 1])
                    .clamp(-limit, limit)
            })
            .collect();
        Tensor::cat(axes, 2)
    }
}

impl<B: Backend> VoteStage<B> for VoteLayer<B> {
    fn forward(&self, xyz: Tensor<B, 3>, features: Option<Tensor<B, 3>>) -> Result<VoteOutput<B>> {
        let features = features.ok_or_else(|| NeuralCascadeError::missing_features("vote stage"))?;
        let [batch, points, _] = xyz.dims();
        let [feature_batch, _, feature_points] = features.dims();
        if feature_batch != batch || feature_points != points {
            return Err(NeuralCascadeError::shape(
                "vote stage features",
                &[batch, features.dims()[1], points],
                &features.dims(),
            ));
        }

        let hidden = self.mlp.forward(features.swap_dims(1, 2));
        let offsets = self.clamp_offsets(self.offset_head.forward(hidden.clone()));
        let centers = xyz.clone() + offsets.clone();

        Ok(VoteOutput {
            centers,
            features: Some(hidden.swap_dims(1, 2)),
            centers_origin: xyz,
            offsets,
        })
    }
}
