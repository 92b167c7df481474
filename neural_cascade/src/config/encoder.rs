//! Encoder configuration.

use burn::config::Config;
use cascade_core::{
    IndexChainPlan, SampleMethod, SamplingParams, StageDescriptor, StageGraph, VoteParams,
};

use super::FusionConfig;
use crate::error::{self, NeuralCascadeError};

/// Configuration for a cascaded point-cloud encoder.
#[derive(Config, Debug)]
pub struct EncoderConfig {
    /// Per-point input width, coordinates included (`3 + C`).
    pub input_channels: usize,

    /// Number of object classes predicted by confidence heads.
    pub num_class: usize,

    /// Stages in execution order.
    pub stages: Vec<StageDescriptor>,

    /// Fusion between a dense and a coarse level.
    pub fusion: FusionConfig,
}

impl EncoderConfig {
    /// Width of the per-point attributes, coordinates excluded.
    pub fn point_feature_channels(&self) -> error::Result<usize> {
        self.input_channels
            .checked_sub(3)
            .ok_or_else(|| NeuralCascadeError::InvalidConfig {
                message: format!(
                    "input_channels = {} does not cover the xyz coordinates",
                    self.input_channels
                ),
            })
    }

    /// Build and validate the stage graph.
    pub fn graph(&self) -> error::Result<StageGraph> {
        Ok(StageGraph::new(
            self.point_feature_channels()?,
            self.stages.clone(),
        )?)
    }

    /// Validate everything: the stage graph, the fusion levels and the
    /// index chain between them.
    pub fn validate(&self) -> error::Result<(StageGraph, IndexChainPlan)> {
        let graph = self.graph()?;
        let plan = graph.plan_index_chain(self.fusion.levels())?;
        if self.num_class == 0 && self.stages.iter().any(has_confidence) {
            return Err(NeuralCascadeError::InvalidConfig {
                message: "confidence heads need num_class > 0".to_string(),
            });
        }
        Ok((graph, plan))
    }

    /// Width of the fused per-center features.
    pub fn num_point_features(&self) -> error::Result<usize> {
        let (graph, plan) = self.validate()?;
        let levels = plan.levels();
        // Both levels exist once the plan is valid.
        let high = graph.level_channels(levels.high).unwrap_or(0);
        let low = graph.level_channels(levels.low).unwrap_or(0);
        Ok(self.fusion.output_channels(high, low))
    }

    /// The IA-SSD single-stage detector backbone.
    ///
    /// Four sampling stages take 16384 raw points down to 4096, 1024, 512
    /// and 256; the last two pick the points with the highest class scores.
    /// A vote stage shifts the 256 points towards object centers and a final
    /// stage groups level 3 around the shifted centers. Level 1 features are
    /// fused into level 4.
    pub fn ia_ssd(num_class: usize) -> Self {
        let stages = vec![
            StageDescriptor::sampling(
                0,
                SamplingParams::fps(4096)
                    .with_group(0.2, 16, vec![16, 16, 32])
                    .with_group(0.8, 32, vec![32, 32, 64])
                    .with_dilated_group(true)
                    .with_aggregation_mlp(vec![64]),
            ),
            StageDescriptor::sampling(
                1,
                SamplingParams::fps(1024)
                    .with_group(0.8, 16, vec![64, 64, 128])
                    .with_group(1.6, 32, vec![64, 96, 128])
                    .with_dilated_group(true)
                    .with_aggregation_mlp(vec![128])
                    .with_confidence_mlp(vec![128]),
            ),
            StageDescriptor::sampling(
                2,
                SamplingParams::new(512, SampleMethod::ClassAware)
                    .with_group(1.6, 16, vec![128, 128, 256])
                    .with_group(4.8, 32, vec![128, 256, 256])
                    .with_dilated_group(true)
                    .with_aggregation_mlp(vec![256])
                    .with_confidence_mlp(vec![256]),
            ),
            StageDescriptor::sampling(
                3,
                SamplingParams::new(256, SampleMethod::ClassAware)
                    .with_aggregation_mlp(vec![256]),
            ),
            StageDescriptor::vote(
                4,
                VoteParams::new(vec![128]).with_max_translate_range([3.0, 3.0, 2.0]),
            ),
            StageDescriptor::sampling(
                3,
                SamplingParams::centered()
                    .with_group(4.8, 16, vec![256, 256, 512])
                    .with_group(6.4, 32, vec![256, 512, 1024])
                    .with_aggregation_mlp(vec![512]),
            )
            .with_center_source(5),
        ];

        let fusion = FusionConfig::new(1, 4)
            .with_high_mlp(vec![256])
            .with_low_mlp(vec![128])
            .with_compress_mlp(vec![256]);

        Self::new(4, num_class, stages, fusion)
    }
}

fn has_confidence(descriptor: &StageDescriptor) -> bool {
    descriptor
        .sampling_params()
        .is_some_and(|params| params.confidence().is_some())
}
