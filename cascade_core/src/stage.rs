//! Stage descriptors: the immutable per-stage metadata of a cascade.
//!
//! A cascade is an ordered list of stages. Each stage reads one pyramid
//! level (see [`LayerInput`]) and appends exactly one new level. Level `0`
//! is the raw input, so stage `i` produces level `i + 1`.

use core::ops::Range;

/// The closed set of stage kinds.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StageKind {
    /// Sampling, grouping and local feature aggregation.
    Sampling,
    /// Per-point offset regression producing shifted centers.
    Vote,
}

/// Which pyramid level(s) feed a stage.
///
/// With a list, the last level drives both channel-width bookkeeping and
/// input selection; the other entries are validated but otherwise unused.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(untagged))]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LayerInput {
    /// A single level.
    Single(usize),
    /// A list of levels.
    Multi(Vec<usize>),
}

impl LayerInput {
    /// The level whose tensors feed the stage, `None` for an empty list.
    pub fn level(&self) -> Option<usize> {
        match self {
            LayerInput::Single(level) => Some(*level),
            LayerInput::Multi(levels) => levels.last().copied(),
        }
    }

    /// Every referenced level.
    pub fn levels(&self) -> &[usize] {
        match self {
            LayerInput::Single(level) => core::slice::from_ref(level),
            LayerInput::Multi(levels) => levels,
        }
    }
}

impl From<usize> for LayerInput {
    fn from(level: usize) -> Self {
        LayerInput::Single(level)
    }
}

impl From<Vec<usize>> for LayerInput {
    fn from(levels: Vec<usize>) -> Self {
        LayerInput::Multi(levels)
    }
}

/// Convert a raw center-source index where `-1` (any negative value)
/// means "the stage picks its own centers".
pub fn center_source_from_raw(raw: i64) -> Option<usize> {
    usize::try_from(raw).ok()
}

/// How a sampling pass picks its output points.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SampleMethod {
    /// Farthest point sampling on coordinates.
    #[default]
    DistanceFps,
    /// Farthest point sampling on coordinates concatenated with features.
    FeatureFps,
    /// Top-k points by the maximum score of the running class prediction.
    ClassAware,
}

/// A half-open slice of the input points a sampling pass draws from.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SampleRange {
    /// First point (inclusive).
    pub start: usize,
    /// Last point (exclusive); `None` runs to the end of the point set.
    pub end: Option<usize>,
}

impl SampleRange {
    /// The whole point set.
    pub const FULL: SampleRange = SampleRange { start: 0, end: None };

    /// Create a bounded range.
    pub const fn new(start: usize, end: usize) -> Self {
        Self {
            start,
            end: Some(end),
        }
    }

    /// Resolve against a point set of `num_points` points, clamping to it.
    pub fn resolve(&self, num_points: usize) -> Range<usize> {
        let end = self.end.map_or(num_points, |e| e.min(num_points));
        self.start.min(end)..end
    }
}

/// Parameters of a sampling-and-aggregation stage.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SamplingParams {
    /// Output point count of each sampling pass.
    pub npoints: Vec<usize>,
    /// Input slice of each sampling pass.
    pub sample_ranges: Vec<SampleRange>,
    /// Method of each sampling pass.
    pub sample_methods: Vec<SampleMethod>,
    /// Ball-query radius of each grouping branch.
    pub radii: Vec<f32>,
    /// Neighbor count of each grouping branch.
    pub nsamples: Vec<usize>,
    /// Shared-MLP widths of each grouping branch (input width excluded).
    pub mlps: Vec<Vec<usize>>,
    /// Group in radius rings `[r_{k-1}, r_k)` instead of balls.
    pub dilated_group: bool,
    /// MLP applied to the concatenated branch outputs.
    pub aggregation_mlp: Option<Vec<usize>>,
    /// MLP predicting per-point class scores.
    pub confidence_mlp: Option<Vec<usize>>,
}

impl SamplingParams {
    /// A single farthest-point-sampling pass over the whole input.
    pub fn fps(npoint: usize) -> Self {
        Self::new(npoint, SampleMethod::DistanceFps)
    }

    /// A single sampling pass over the whole input.
    pub fn new(npoint: usize, method: SampleMethod) -> Self {
        Self {
            npoints: vec![npoint],
            sample_ranges: vec![SampleRange::FULL],
            sample_methods: vec![method],
            ..Default::default()
        }
    }

    /// No sampling of its own; the stage takes its centers from another level.
    pub fn centered() -> Self {
        Self::default()
    }

    /// Add a grouping branch.
    pub fn with_group(mut self, radius: f32, nsample: usize, mlp: Vec<usize>) -> Self {
        self.radii.push(radius);
        self.nsamples.push(nsample);
        self.mlps.push(mlp);
        self
    }

    /// Set the aggregation MLP; an empty list disables it.
    pub fn with_aggregation_mlp(mut self, mlp: Vec<usize>) -> Self {
        self.aggregation_mlp = (!mlp.is_empty()).then_some(mlp);
        self
    }

    /// Set the confidence MLP; an empty list disables it.
    pub fn with_confidence_mlp(mut self, mlp: Vec<usize>) -> Self {
        self.confidence_mlp = (!mlp.is_empty()).then_some(mlp);
        self
    }

    /// Enable or disable dilated (ring) grouping.
    pub fn with_dilated_group(mut self, dilated: bool) -> Self {
        self.dilated_group = dilated;
        self
    }

    /// Aggregation MLP, treating an empty list as absent.
    pub fn aggregation(&self) -> Option<&[usize]> {
        self.aggregation_mlp.as_deref().filter(|m| !m.is_empty())
    }

    /// Confidence MLP, treating an empty list as absent.
    pub fn confidence(&self) -> Option<&[usize]> {
        self.confidence_mlp.as_deref().filter(|m| !m.is_empty())
    }

    /// Total output points over all sampling passes.
    pub fn total_points(&self) -> usize {
        self.npoints.iter().sum()
    }

    /// Output channel width for a given input width.
    ///
    /// A fixed aggregation width wins; otherwise the branch outputs are
    /// concatenated. A stage with neither passes its input features through.
    pub fn output_channels(&self, input_channels: usize) -> usize {
        if let Some(&width) = self.aggregation().and_then(|m| m.last()) {
            return width;
        }
        if self.mlps.is_empty() {
            return input_channels;
        }
        self.mlps.iter().filter_map(|mlp| mlp.last().copied()).sum()
    }
}

/// Parameters of a vote stage.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq, Default)]
pub struct VoteParams {
    /// Shared-MLP widths applied before offset regression.
    pub mlps: Vec<usize>,
    /// Per-axis bound on the predicted offset magnitude.
    pub max_translate_range: Option<[f32; 3]>,
}

impl VoteParams {
    /// Create vote parameters.
    pub fn new(mlps: Vec<usize>) -> Self {
        Self {
            mlps,
            max_translate_range: None,
        }
    }

    /// Bound the offsets per axis.
    pub fn with_max_translate_range(mut self, range: [f32; 3]) -> Self {
        self.max_translate_range = Some(range);
        self
    }

    /// Output channel width for a given input width.
    pub fn output_channels(&self, input_channels: usize) -> usize {
        self.mlps.last().copied().unwrap_or(input_channels)
    }
}

/// Kind-specific stage parameters.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub enum StageLayer {
    /// Sampling-and-aggregation stage.
    Sampling(SamplingParams),
    /// Vote stage.
    Vote(VoteParams),
}

/// Immutable metadata of one stage.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub struct StageDescriptor {
    /// Kind-specific parameters.
    pub layer: StageLayer,
    /// Level(s) providing points and features.
    pub layer_input: LayerInput,
    /// Level providing the centers, if the stage does not sample its own.
    pub center_source: Option<usize>,
}

impl StageDescriptor {
    /// A sampling stage reading `layer_input`.
    pub fn sampling(layer_input: impl Into<LayerInput>, params: SamplingParams) -> Self {
        Self {
            layer: StageLayer::Sampling(params),
            layer_input: layer_input.into(),
            center_source: None,
        }
    }

    /// A vote stage reading `layer_input`.
    pub fn vote(layer_input: impl Into<LayerInput>, params: VoteParams) -> Self {
        Self {
            layer: StageLayer::Vote(params),
            layer_input: layer_input.into(),
            center_source: None,
        }
    }

    /// Take centers from `level` instead of sampling.
    pub fn with_center_source(mut self, level: usize) -> Self {
        self.center_source = Some(level);
        self
    }

    /// The stage kind.
    pub fn kind(&self) -> StageKind {
        match self.layer {
            StageLayer::Sampling(_) => StageKind::Sampling,
            StageLayer::Vote(_) => StageKind::Vote,
        }
    }

    /// Sampling parameters, if this is a sampling stage.
    pub fn sampling_params(&self) -> Option<&SamplingParams> {
        match &self.layer {
            StageLayer::Sampling(params) => Some(params),
            StageLayer::Vote(_) => None,
        }
    }

    /// Vote parameters, if this is a vote stage.
    pub fn vote_params(&self) -> Option<&VoteParams> {
        match &self.layer {
            StageLayer::Vote(params) => Some(params),
            StageLayer::Sampling(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layer_input_uses_last_level() {
        assert_eq!(LayerInput::Single(2).level(), Some(2));
        assert_eq!(LayerInput::Multi(vec![0, 3, 1]).level(), Some(1));
        assert_eq!(LayerInput::Multi(vec![]).level(), None);
        assert_eq!(LayerInput::Multi(vec![0, 3]).levels(), &[0, 3]);
    }

    #[test]
    fn test_center_source_sentinel() {
        assert_eq!(center_source_from_raw(-1), None);
        assert_eq!(center_source_from_raw(5), Some(5));
    }

    #[test]
    fn test_sample_range_resolve() {
        assert_eq!(SampleRange::FULL.resolve(16), 0..16);
        assert_eq!(SampleRange::new(4, 8).resolve(16), 4..8);
        assert_eq!(SampleRange::new(4, 32).resolve(16), 4..16);
        assert_eq!(SampleRange::new(20, 32).resolve(16), 16..16);
    }

    #[test]
    fn test_sampling_output_channels() {
        let params = SamplingParams::fps(8)
            .with_group(0.2, 16, vec![16, 16, 32])
            .with_group(0.8, 32, vec![32, 32, 64]);
        assert_eq!(params.output_channels(1), 96);

        let aggregated = params.clone().with_aggregation_mlp(vec![64]);
        assert_eq!(aggregated.output_channels(1), 64);

        let empty_aggregation = params.with_aggregation_mlp(vec![]);
        assert_eq!(empty_aggregation.output_channels(1), 96);

        assert_eq!(SamplingParams::fps(8).output_channels(7), 7);
    }

    #[test]
    fn test_vote_output_channels() {
        assert_eq!(VoteParams::new(vec![128]).output_channels(256), 128);
        assert_eq!(VoteParams::new(vec![]).output_channels(256), 256);
    }

    #[test]
    fn test_descriptor_kind() {
        let sa = StageDescriptor::sampling(0, SamplingParams::fps(4));
        let vote = StageDescriptor::vote(1, VoteParams::default()).with_center_source(1);
        assert_eq!(sa.kind(), StageKind::Sampling);
        assert_eq!(vote.kind(), StageKind::Vote);
        assert!(sa.sampling_params().is_some());
        assert!(vote.vote_params().is_some());
        assert_eq!(vote.center_source, Some(1));
    }
}
