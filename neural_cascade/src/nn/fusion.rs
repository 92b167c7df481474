//! Fusion of high-level and recovered low-level features.

use burn::module::Module;
use burn::prelude::*;

use super::SharedMlp;
use crate::config::{FusionConfig, SharedMlpConfig};

/// Mixes a coarse feature map with dense features gathered at its points.
pub trait FeatureFusion<B: Backend> {
    /// Fuse `high` [batch, Ch, M] with `low` [batch, Cl, M] into
    /// [batch, Co, M].
    fn forward(&self, high: Tensor<B, 3>, low: Tensor<B, 3>) -> Tensor<B, 3>;
}

/// Per-side MLPs, channel concatenation and a compressing MLP.
#[derive(Module, Debug)]
pub struct FusionModule<B: Backend> {
    high: SharedMlp<B>,
    low: SharedMlp<B>,
    compress: SharedMlp<B>,
}

impl<B: Backend> FusionModule<B> {
    /// Create a fusion module for the given input widths.
    pub fn new(
        config: &FusionConfig,
        high_channels: usize,
        low_channels: usize,
        device: &B::Device,
    ) -> Self {
        let concat = config.high_output(high_channels) + config.low_output(low_channels);
        Self {
            high: SharedMlpConfig::new(high_channels)
                .with_widths(config.high_mlp.clone())
                .init(device),
            low: SharedMlpConfig::new(low_channels)
                .with_widths(config.low_mlp.clone())
                .init(device),
            compress: SharedMlpConfig::new(concat)
                .with_widths(config.compress_mlp.clone())
                .init(device),
        }
    }
}

impl<B: Backend> FeatureFusion<B> for FusionModule<B> {
    fn forward(&self, high: Tensor<B, 3>, low: Tensor<B, 3>) -> Tensor<B, 3> {
        let high = self.high.forward_channels_first(high);
        let low = self.low.forward_channels_first(low);
        self.compress
            .forward_channels_first(Tensor::cat(vec![high, low], 1))
    }
}
