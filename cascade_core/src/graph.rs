//! Validated stage graph and index-chain planning.
//!
//! [`StageGraph::new`] checks every cross reference and per-stage parameter
//! once, so a graph that constructs never fails a configuration check at
//! run time.

use crate::error::{CascadeError, Result};
use crate::stage::{SampleMethod, SamplingParams, StageDescriptor, StageKind, StageLayer};

/// The level pair joined by feature fusion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FusionLevels {
    /// Dense level whose features are recovered through the index chain.
    pub low: usize,
    /// Coarse level whose features are fused with the recovered ones.
    pub high: usize,
}

impl FusionLevels {
    /// Create a level pair.
    pub const fn new(low: usize, high: usize) -> Self {
        Self { low, high }
    }
}

/// One step of an index chain, in pipeline order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainLink {
    /// A sampling stage whose recorded subsample index is composed.
    Sampled(usize),
    /// A vote stage: output point `j` is input point `j`.
    Identity(usize),
}

impl ChainLink {
    /// The stage of this link.
    pub fn stage(&self) -> usize {
        match *self {
            ChainLink::Sampled(stage) | ChainLink::Identity(stage) => stage,
        }
    }
}

/// The stages connecting a coarse level back to a dense level.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexChainPlan {
    levels: FusionLevels,
    links: Vec<ChainLink>,
}

impl IndexChainPlan {
    /// The joined levels.
    pub fn levels(&self) -> FusionLevels {
        self.levels
    }

    /// All links, in pipeline order.
    pub fn links(&self) -> &[ChainLink] {
        &self.links
    }

    /// Stages whose subsample indices are composed, in pipeline order.
    pub fn sampled_stages(&self) -> impl Iterator<Item = usize> + '_ {
        self.links.iter().filter_map(|link| match *link {
            ChainLink::Sampled(stage) => Some(stage),
            ChainLink::Identity(_) => None,
        })
    }
}

/// An ordered, validated list of stages with per-level channel widths.
#[derive(Debug, Clone, PartialEq)]
pub struct StageGraph {
    stages: Vec<StageDescriptor>,
    level_channels: Vec<usize>,
}

impl StageGraph {
    /// Validate `stages` and compute channel widths.
    ///
    /// `point_feature_channels` is the width of the raw per-point attributes
    /// (coordinates excluded).
    pub fn new(point_feature_channels: usize, stages: Vec<StageDescriptor>) -> Result<Self> {
        if stages.is_empty() {
            return Err(CascadeError::EmptyPipeline);
        }

        let mut level_channels = Vec::with_capacity(stages.len() + 1);
        level_channels.push(point_feature_channels);
        let mut predicts_classes = false;

        for (stage, descriptor) in stages.iter().enumerate() {
            let levels = descriptor.layer_input.levels();
            if levels.is_empty() {
                return Err(CascadeError::EmptyParameter {
                    stage,
                    parameter: "layer_input",
                });
            }
            for &level in levels {
                check_reference(stage, "layer_input", level)?;
            }
            if let Some(level) = descriptor.center_source {
                check_reference(stage, "center_source", level)?;
            }

            // Non-empty, checked above.
            let input_level = levels[levels.len() - 1];
            let channel_in = level_channels[input_level];

            let channel_out = match &descriptor.layer {
                StageLayer::Sampling(params) => {
                    validate_sampling(stage, descriptor, params, channel_in, predicts_classes)?;
                    predicts_classes |= params.confidence().is_some();
                    params.output_channels(channel_in)
                }
                StageLayer::Vote(params) => {
                    if params.mlps.contains(&0) {
                        return Err(CascadeError::invalid(stage, "mlps", "zero-width layer"));
                    }
                    if let Some(range) = params.max_translate_range {
                        if range.iter().any(|r| !r.is_finite() || *r < 0.0) {
                            return Err(CascadeError::invalid(
                                stage,
                                "max_translate_range",
                                format!("{:?} must be finite and non-negative", range),
                            ));
                        }
                    }
                    params.output_channels(channel_in)
                }
            };
            level_channels.push(channel_out);
        }

        if !stages.iter().any(|s| s.kind() == StageKind::Vote) {
            return Err(CascadeError::MissingVoteStage);
        }

        Ok(Self {
            stages,
            level_channels,
        })
    }

    /// Number of stages.
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    /// Always false for a constructed graph.
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Number of pyramid levels, including the input level.
    pub fn num_levels(&self) -> usize {
        self.level_channels.len()
    }

    /// All stage descriptors.
    pub fn stages(&self) -> &[StageDescriptor] {
        &self.stages
    }

    /// Descriptor of one stage.
    pub fn stage(&self, stage: usize) -> Option<&StageDescriptor> {
        self.stages.get(stage)
    }

    /// The level feeding `stage`.
    pub fn input_level(&self, stage: usize) -> Option<usize> {
        self.stages.get(stage).and_then(|s| s.layer_input.level())
    }

    /// Channel width of a level.
    pub fn level_channels(&self, level: usize) -> Option<usize> {
        self.level_channels.get(level).copied()
    }

    /// Channel widths of every level.
    pub fn channels(&self) -> &[usize] {
        &self.level_channels
    }

    /// Channel width of the last level.
    pub fn output_channels(&self) -> usize {
        self.level_channels.last().copied().unwrap_or(0)
    }

    /// The last vote stage; its centers are authoritative.
    pub fn last_vote_stage(&self) -> Option<usize> {
        self.stages.iter().rposition(|s| s.kind() == StageKind::Vote)
    }

    /// Plan the index chain recovering `levels.low` features at `levels.high`.
    ///
    /// Walks back from the coarse level: level `L` was produced by stage
    /// `L - 1`, which read its layer input. The walk must land exactly on
    /// the dense level.
    pub fn plan_index_chain(&self, levels: FusionLevels) -> Result<IndexChainPlan> {
        let FusionLevels { low, high } = levels;
        if low >= high || high >= self.num_levels() {
            return Err(CascadeError::InvalidFusionLevels {
                low,
                high,
                message: format!("need low < high < {}", self.num_levels()),
            });
        }
        if self.level_channels[low] == 0 {
            return Err(CascadeError::InvalidFusionLevels {
                low,
                high,
                message: "dense level carries no features".to_string(),
            });
        }

        let broken = |message: String| CascadeError::BrokenIndexChain { low, high, message };

        let mut links = Vec::new();
        let mut level = high;
        while level > low {
            let stage = level - 1;
            let descriptor = &self.stages[stage];
            let link = match descriptor.kind() {
                StageKind::Sampling if descriptor.center_source.is_some() => {
                    return Err(broken(format!(
                        "stage {} takes its centers from level {:?} and has no index into its input",
                        stage, descriptor.center_source
                    )));
                }
                StageKind::Sampling => ChainLink::Sampled(stage),
                StageKind::Vote => ChainLink::Identity(stage),
            };
            links.push(link);
            // Validated at construction.
            let next = descriptor.layer_input.level().unwrap_or(0);
            if next < low {
                return Err(broken(format!(
                    "stage {} reads level {}, which is below the dense level",
                    stage, next
                )));
            }
            level = next;
        }

        links.reverse();
        Ok(IndexChainPlan { levels, links })
    }
}

fn check_reference(stage: usize, field: &'static str, level: usize) -> Result<()> {
    if level > stage {
        return Err(CascadeError::ForwardReference {
            stage,
            field,
            level,
        });
    }
    Ok(())
}

fn validate_sampling(
    stage: usize,
    descriptor: &StageDescriptor,
    params: &SamplingParams,
    channel_in: usize,
    predicts_classes: bool,
) -> Result<()> {
    let passes = params.npoints.len();
    if passes == 0 && descriptor.center_source.is_none() {
        return Err(CascadeError::EmptyParameter {
            stage,
            parameter: "npoints",
        });
    }
    check_len(stage, "sample_ranges", passes, params.sample_ranges.len())?;
    check_len(stage, "sample_methods", passes, params.sample_methods.len())?;
    if params.npoints.contains(&0) {
        return Err(CascadeError::invalid(stage, "npoints", "zero sample count"));
    }
    for range in &params.sample_ranges {
        if range.end.is_some_and(|end| end <= range.start) {
            return Err(CascadeError::invalid(
                stage,
                "sample_ranges",
                format!("empty range {:?}", range),
            ));
        }
    }
    if params.sample_methods.contains(&SampleMethod::ClassAware) && !predicts_classes {
        return Err(CascadeError::MissingClassSource { stage });
    }

    let branches = params.radii.len();
    check_len(stage, "nsamples", branches, params.nsamples.len())?;
    check_len(stage, "mlps", branches, params.mlps.len())?;
    if params.nsamples.contains(&0) {
        return Err(CascadeError::invalid(stage, "nsamples", "zero neighbor count"));
    }
    if let Some(radius) = params.radii.iter().find(|r| !r.is_finite() || **r <= 0.0) {
        return Err(CascadeError::invalid(
            stage,
            "radii",
            format!("radius {} must be positive", radius),
        ));
    }
    for mlp in &params.mlps {
        if mlp.is_empty() {
            return Err(CascadeError::EmptyParameter {
                stage,
                parameter: "mlps",
            });
        }
    }
    if params.mlps.is_empty() {
        if descriptor.center_source.is_some() {
            return Err(CascadeError::invalid(
                stage,
                "mlps",
                "a stage taking centers from another level needs a grouping branch",
            ));
        }
        if channel_in == 0 && (params.aggregation().is_some() || params.confidence().is_some()) {
            return Err(CascadeError::invalid(
                stage,
                "aggregation_mlp",
                "a pass-through stage over a featureless level has nothing to aggregate",
            ));
        }
    }
    let widths = params
        .mlps
        .iter()
        .flatten()
        .chain(params.aggregation().into_iter().flatten())
        .chain(params.confidence().into_iter().flatten());
    for &width in widths {
        if width == 0 {
            return Err(CascadeError::invalid(stage, "mlps", "zero-width layer"));
        }
    }
    Ok(())
}

fn check_len(stage: usize, parameter: &'static str, expected: usize, got: usize) -> Result<()> {
    if expected != got {
        return Err(CascadeError::ParameterLengthMismatch {
            stage,
            parameter,
            expected,
            got,
        });
    }
    Ok(())
}
