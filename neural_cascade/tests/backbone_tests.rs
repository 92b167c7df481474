//! Backbone orchestration tests with deterministic stub stages.
//!
//! Stub sampling stages apply a fixed permutation per batch element and
//! carry features along, so every point keeps its tag and the index chain
//! can be checked against hand-computed compositions.

use std::cell::Cell;
use std::rc::Rc;

use burn::backend::ndarray::NdArrayDevice;
use burn::backend::NdArray;
use burn::prelude::*;

use neural_cascade::ops::{gather_channels, gather_points, index_tensor, to_host};
use neural_cascade::prelude::*;

type TestBackend = NdArray;

// =============================================================================
// Stubs
// =============================================================================

/// What a stub reports as its subsample index.
#[derive(Clone)]
enum Report {
    /// The permutation it applied.
    Applied,
    /// Nothing.
    Missing,
    /// A fixed index, regardless of what it applied.
    Fixed(Vec<usize>),
}

/// How a stub breaks its output contract.
#[derive(Clone, Copy)]
enum Breakage {
    /// Drops every batch element but the first.
    Batch,
    /// Returns features for one point fewer than it outputs.
    Features,
    /// Returns class scores for one point fewer than it outputs.
    Classes,
}

struct PermutationStage {
    permutation: Vec<usize>,
    report: Report,
    predict_classes: bool,
    breakage: Option<Breakage>,
    calls: Rc<Cell<usize>>,
    priors_seen: Rc<Cell<usize>>,
}

impl PermutationStage {
    fn new(permutation: Vec<usize>, calls: &Rc<Cell<usize>>) -> Self {
        Self {
            permutation,
            report: Report::Applied,
            predict_classes: false,
            breakage: None,
            calls: Rc::clone(calls),
            priors_seen: Rc::new(Cell::new(0)),
        }
    }

    fn reporting(mut self, report: Report) -> Self {
        self.report = report;
        self
    }

    fn predicting(mut self) -> Self {
        self.predict_classes = true;
        self
    }

    fn breaking(mut self, breakage: Breakage) -> Self {
        self.breakage = Some(breakage);
        self
    }
}

impl SetAbstraction<TestBackend> for PermutationStage {
    fn forward(
        &self,
        xyz: Tensor<TestBackend, 3>,
        features: Option<Tensor<TestBackend, 3>>,
        prior_class: Option<Tensor<TestBackend, 3>>,
        _centers: Option<Tensor<TestBackend, 3>>,
    ) -> neural_cascade::Result<SaOutput<TestBackend>> {
        self.calls.set(self.calls.get() + 1);
        if prior_class.is_some() {
            self.priors_seen.set(self.priors_seen.get() + 1);
        }

        let [batch, _, _] = xyz.dims();
        let device = xyz.device();
        let index = IndexMatrix::from_rows(vec![self.permutation.clone(); batch])?;
        let xyz = gather_points(xyz, &index)?;
        let features = match features {
            Some(f) => Some(gather_channels(f, &index)?),
            None => None,
        };
        let class_prediction = self
            .predict_classes
            .then(|| Tensor::ones([batch, self.permutation.len(), 2], &device));

        let sample_indices = match &self.report {
            Report::Applied => Some(index_tensor(&index, &device)),
            Report::Missing => None,
            Report::Fixed(row) => Some(index_tensor(
                &IndexMatrix::from_rows(vec![row.clone(); batch])?,
                &device,
            )),
        };

        let mut output = SaOutput {
            xyz,
            features,
            class_prediction,
            sample_indices,
        };
        let m = self.permutation.len();
        match self.breakage {
            Some(Breakage::Batch) => output.xyz = output.xyz.slice([0..1, 0..m, 0..3]),
            Some(Breakage::Features) => {
                output.features = output.features.map(|f| {
                    let channels = f.dims()[1];
                    f.slice([0..batch, 0..channels, 0..m - 1])
                })
            }
            Some(Breakage::Classes) => {
                output.class_prediction = Some(Tensor::ones([batch, m - 1, 2], &device))
            }
            None => {}
        }
        Ok(output)
    }
}

/// Shifts every point by +1 on each axis and passes features through.
enum ShiftVote {
    Exact,
    /// Drops the last center.
    Truncated,
}

impl VoteStage<TestBackend> for ShiftVote {
    fn forward(
        &self,
        xyz: Tensor<TestBackend, 3>,
        features: Option<Tensor<TestBackend, 3>>,
    ) -> neural_cascade::Result<VoteOutput<TestBackend>> {
        let xyz = match self {
            ShiftVote::Exact => xyz,
            ShiftVote::Truncated => {
                let [batch, points, _] = xyz.dims();
                xyz.slice([0..batch, 0..points - 1, 0..3])
            }
        };
        let offsets = xyz.ones_like();
        Ok(VoteOutput {
            centers: xyz.clone() + offsets.clone(),
            features,
            centers_origin: xyz,
            offsets,
        })
    }
}

/// Concatenates high and low features.
struct ConcatFusion;

impl FeatureFusion<TestBackend> for ConcatFusion {
    fn forward(
        &self,
        high: Tensor<TestBackend, 3>,
        low: Tensor<TestBackend, 3>,
    ) -> Tensor<TestBackend, 3> {
        Tensor::cat(vec![high, low], 1)
    }
}

type StubBackbone = CascadeBackbone<TestBackend, PermutationStage, ShiftVote, ConcatFusion>;

// =============================================================================
// Helpers
// =============================================================================

fn sa(input: usize, npoint: usize) -> StageDescriptor {
    StageDescriptor::sampling(input, SamplingParams::fps(npoint).with_group(1.0, 4, vec![4]))
}

/// Two sampling stages and a vote stage on level 2.
fn two_stage_graph(first: usize, second: usize) -> StageGraph {
    StageGraph::new(
        1,
        vec![
            sa(0, first),
            sa(1, second),
            StageDescriptor::vote(2, VoteParams::default()),
        ],
    )
    .unwrap()
}

/// `batch` elements of `points` points; feature channel 0 of point `i` in
/// element `b` is the tag `100 * b + i`.
fn tagged_batch(batch: usize, points: usize) -> PointBatch<TestBackend> {
    let mut values = Vec::with_capacity(batch * points * 5);
    for b in 0..batch {
        for i in 0..points {
            values.extend([b as f32, i as f32, 0.0, 0.0, (100 * b + i) as f32]);
        }
    }
    let rows = Tensor::from_data(
        TensorData::new(values, [batch * points, 5]),
        &NdArrayDevice::Cpu,
    );
    PointBatch::from_points(rows, batch).unwrap()
}

fn stub_backbone(
    graph: StageGraph,
    levels: FusionLevels,
    first: PermutationStage,
    second: PermutationStage,
) -> StubBackbone {
    StubBackbone::from_parts(
        graph,
        levels,
        vec![
            StageModule::Sampling(first),
            StageModule::Sampling(second),
            StageModule::Vote(ShiftVote::Exact),
        ],
        ConcatFusion,
    )
    .unwrap()
}

// =============================================================================
// Index chain
// =============================================================================

#[test]
fn round_trip_16_8_4_recovers_tags() {
    let calls = Rc::new(Cell::new(0));
    let backbone = stub_backbone(
        two_stage_graph(8, 4),
        FusionLevels::new(0, 2),
        PermutationStage::new(vec![15, 13, 11, 9, 7, 5, 3, 1], &calls),
        PermutationStage::new(vec![6, 1, 4, 3], &calls),
    );

    let output = backbone.forward(&tagged_batch(2, 16)).unwrap();
    assert_eq!(calls.get(), 2);

    // idx_0[idx_1[j]]: [3, 13, 7, 9]
    assert_eq!(output.fusion_index.row(0), &[3, 13, 7, 9]);
    assert_eq!(output.fusion_index.row(1), &[3, 13, 7, 9]);

    // Rows are (high tag, recovered low tag); both must be the source tag.
    let features = to_host(output.centers_features).unwrap();
    let expected: Vec<f32> = [0.0f32, 100.0]
        .iter()
        .flat_map(|base| [3.0, 13.0, 7.0, 9.0].map(|i| base + i))
        .flat_map(|tag| [tag, tag])
        .collect();
    assert_eq!(features, expected);
}

#[test]
fn identity_then_reverse_end_to_end() {
    let calls = Rc::new(Cell::new(0));
    let backbone = stub_backbone(
        two_stage_graph(8, 8),
        FusionLevels::new(0, 2),
        PermutationStage::new((0..8).collect(), &calls),
        PermutationStage::new((0..8).rev().collect(), &calls),
    );

    let output = backbone.forward(&tagged_batch(1, 16)).unwrap();

    let recovered: Vec<f32> = (0..8).rev().map(|t| t as f32).collect();
    let features = to_host(output.centers_features.clone()).unwrap();
    let low_column: Vec<f32> = features.chunks_exact(2).map(|row| row[1]).collect();
    assert_eq!(low_column, recovered);

    assert_eq!(output.num_rows(), 8);
    assert_eq!(to_host(output.ctr_batch_idx).unwrap(), vec![0.0; 8]);

    // Centers carry the batch column, then the shifted coordinates.
    let centers = to_host(output.centers).unwrap();
    assert_eq!(&centers[..4], &[0.0, 8.0, 1.0, 1.0]);
    let offsets = to_host(output.ctr_offsets).unwrap();
    assert_eq!(&offsets[..4], &[0.0, 1.0, 1.0, 1.0]);
    let origin = to_host(output.centers_origin).unwrap();
    assert_eq!(&origin[..4], &[0.0, 7.0, 0.0, 0.0]);
}

#[test]
fn empty_index_reuses_previous_stage() {
    let calls = Rc::new(Cell::new(0));
    let backbone = stub_backbone(
        two_stage_graph(8, 8),
        FusionLevels::new(0, 1),
        PermutationStage::new(vec![1, 3, 5, 7, 9, 11, 13, 15], &calls),
        PermutationStage::new((0..8).rev().collect(), &calls).reporting(Report::Missing),
    );

    let output = backbone.forward(&tagged_batch(1, 16)).unwrap();
    assert!(output.sample_indices[0].is_some());
    assert_eq!(output.sample_indices[1], output.sample_indices[0]);
    assert!(output.sample_indices[2].is_none());
}

#[test]
fn out_of_range_index_is_a_precondition_violation() {
    let calls = Rc::new(Cell::new(0));
    let backbone = stub_backbone(
        two_stage_graph(8, 4),
        FusionLevels::new(0, 2),
        PermutationStage::new((0..8).collect(), &calls),
        PermutationStage::new(vec![0, 1, 2, 3], &calls).reporting(Report::Fixed(vec![0, 1, 2, 8])),
    );

    let err = backbone.forward(&tagged_batch(1, 16)).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Precondition);
    assert!(matches!(
        err,
        NeuralCascadeError::Cascade(CascadeError::IndexOutOfRange { index: 8, len: 8, .. })
    ));
}

// =============================================================================
// Stage loop
// =============================================================================

#[test]
fn mismatched_batch_counts_fail_before_any_stage_runs() {
    let calls = Rc::new(Cell::new(0));
    let backbone = stub_backbone(
        two_stage_graph(8, 4),
        FusionLevels::new(0, 2),
        PermutationStage::new((0..8).collect(), &calls),
        PermutationStage::new((0..4).collect(), &calls),
    );

    // Element 0 has 10 points, element 1 has 9.
    let mut values = Vec::new();
    for (b, count) in [(0, 10), (1, 9)] {
        for i in 0..count {
            values.extend([b as f32, i as f32, 0.0, 0.0, 0.0]);
        }
    }
    let rows = Tensor::<TestBackend, 2>::from_data(
        TensorData::new(values, [19, 5]),
        &NdArrayDevice::Cpu,
    );

    let result = PointBatch::from_points(rows, 2).and_then(|batch| backbone.forward(&batch));
    let err = result.err().unwrap();
    assert_eq!(err.kind(), ErrorKind::Precondition);
    assert!(matches!(
        err,
        NeuralCascadeError::Cascade(CascadeError::UnequalBatchCounts { .. })
    ));
    assert_eq!(calls.get(), 0);
}

#[test]
fn class_prediction_is_threaded_and_never_reset() {
    let calls = Rc::new(Cell::new(0));
    let first = PermutationStage::new((0..8).collect(), &calls).predicting();
    let second = PermutationStage::new((0..4).collect(), &calls);
    let priors_seen = Rc::clone(&second.priors_seen);
    let backbone = stub_backbone(two_stage_graph(8, 4), FusionLevels::new(0, 2), first, second);

    let output = backbone.forward(&tagged_batch(1, 16)).unwrap();

    assert_eq!(priors_seen.get(), 1);
    // Stage 1 predicted nothing, so stage 0's prediction survives.
    assert_eq!(output.class_prediction.unwrap().dims(), [1, 8, 2]);

    let predictions = output.pyramid.class_predictions();
    assert!(predictions[0].is_none());
    assert_eq!(predictions[1].as_ref().unwrap().dims(), [1, 8, 3]);
    assert!(predictions[2].is_none());
    assert!(predictions[3].is_none());
}

#[test]
fn stage_kinds_must_match_the_graph() {
    let calls = Rc::new(Cell::new(0));
    let result = StubBackbone::from_parts(
        two_stage_graph(8, 4),
        FusionLevels::new(0, 2),
        vec![
            StageModule::Sampling(PermutationStage::new((0..8).collect(), &calls)),
            StageModule::Vote(ShiftVote::Exact),
            StageModule::Vote(ShiftVote::Exact),
        ],
        ConcatFusion,
    );
    assert!(matches!(
        result.err(),
        Some(NeuralCascadeError::StageMismatch {
            stage: 1,
            expected: StageKind::Sampling,
            got: StageKind::Vote,
        })
    ));
}

#[test]
fn sink_receives_every_level() {
    let dir = tempfile::tempdir().unwrap();
    let calls = Rc::new(Cell::new(0));
    let backbone = stub_backbone(
        two_stage_graph(8, 4),
        FusionLevels::new(0, 2),
        PermutationStage::new((0..8).collect(), &calls),
        PermutationStage::new((0..4).collect(), &calls),
    )
    .with_sample_sink(Box::new(DirectorySink::new(dir.path())));

    let batch = tagged_batch(2, 16)
        .with_frame_ids(vec!["seq/000001".to_string(), "000002".to_string()])
        .unwrap();
    backbone.forward(&batch).unwrap();

    let first = dir.path().join("sample_list_save/seq/sample_list_000001.json");
    let second = dir.path().join("sample_list_save/sample_list_000002.json");
    let value: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(first).unwrap()).unwrap();
    let levels = value["levels"].as_array().unwrap();
    let sizes: Vec<usize> = levels.iter().map(|l| l.as_array().unwrap().len()).collect();
    assert_eq!(sizes, vec![16, 8, 4, 4]);
    assert!(second.exists());
}

// =============================================================================
// Stage output contract
// =============================================================================

fn assert_shape_violation(err: NeuralCascadeError, context: &str) {
    assert_eq!(err.kind(), ErrorKind::Precondition);
    match err {
        NeuralCascadeError::ShapeMismatch { context: got, .. } => assert_eq!(got, context),
        other => panic!("expected a shape mismatch for {}, got {:?}", context, other),
    }
}

fn run_with_second(second: PermutationStage) -> neural_cascade::Result<EncoderOutput<TestBackend>> {
    let calls = Rc::new(Cell::new(0));
    stub_backbone(
        two_stage_graph(8, 4),
        FusionLevels::new(0, 2),
        PermutationStage::new((0..8).collect(), &calls),
        second,
    )
    .forward(&tagged_batch(2, 16))
}

#[test]
fn sampling_stage_must_keep_the_batch_size() {
    let calls = Rc::new(Cell::new(0));
    let second = PermutationStage::new((0..4).collect(), &calls).breaking(Breakage::Batch);
    assert_shape_violation(run_with_second(second).unwrap_err(), "stage 1 coordinates");
}

#[test]
fn sampling_features_must_match_the_point_count() {
    let calls = Rc::new(Cell::new(0));
    let second = PermutationStage::new((0..4).collect(), &calls).breaking(Breakage::Features);
    assert_shape_violation(run_with_second(second).unwrap_err(), "stage 1 features");
}

#[test]
fn class_prediction_must_match_the_point_count() {
    let calls = Rc::new(Cell::new(0));
    let second = PermutationStage::new((0..4).collect(), &calls).breaking(Breakage::Classes);
    assert_shape_violation(run_with_second(second).unwrap_err(), "stage 1 class prediction");
}

#[test]
fn subsample_index_must_match_the_point_count() {
    let calls = Rc::new(Cell::new(0));
    let second =
        PermutationStage::new((0..4).collect(), &calls).reporting(Report::Fixed(vec![0, 1, 2]));

    let err = run_with_second(second).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Precondition);
    assert!(matches!(
        err,
        NeuralCascadeError::Cascade(CascadeError::IndexShapeMismatch {
            expected: [2, 4],
            got: [2, 3],
        })
    ));
}

#[test]
fn vote_stage_must_keep_its_shapes() {
    let calls = Rc::new(Cell::new(0));
    let backbone = StubBackbone::from_parts(
        two_stage_graph(8, 4),
        FusionLevels::new(0, 2),
        vec![
            StageModule::Sampling(PermutationStage::new((0..8).collect(), &calls)),
            StageModule::Sampling(PermutationStage::new((0..4).collect(), &calls)),
            StageModule::Vote(ShiftVote::Truncated),
        ],
        ConcatFusion,
    )
    .unwrap();

    let err = backbone.forward(&tagged_batch(1, 16)).unwrap_err();
    assert_shape_violation(err, "stage 2 centers");
}

#[test]
fn fused_points_must_match_the_vote_centers() {
    let calls = Rc::new(Cell::new(0));
    // Fusing at level 1 yields 8 points per element; the vote stage holds 4.
    let backbone = stub_backbone(
        two_stage_graph(8, 4),
        FusionLevels::new(0, 1),
        PermutationStage::new((0..8).collect(), &calls),
        PermutationStage::new((0..4).collect(), &calls),
    );

    let err = backbone.forward(&tagged_batch(1, 16)).unwrap_err();
    assert_shape_violation(err, "fused features vs vote centers");
}

#[test]
fn frame_ids_must_cover_the_batch() {
    let dir = tempfile::tempdir().unwrap();
    let calls = Rc::new(Cell::new(0));
    let backbone = stub_backbone(
        two_stage_graph(8, 4),
        FusionLevels::new(0, 2),
        PermutationStage::new((0..8).collect(), &calls),
        PermutationStage::new((0..4).collect(), &calls),
    )
    .with_sample_sink(Box::new(DirectorySink::new(dir.path())));

    let mut batch = tagged_batch(1, 16);
    batch.frame_ids = Some(vec!["a".to_string(), "b".to_string()]);

    let err = backbone.forward(&batch).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Precondition);
    assert!(matches!(err, NeuralCascadeError::InvalidData(_)));
    assert!(!dir.path().join("sample_list_save").exists());
}

#[test]
fn tags_come_from_the_input_batch_index() {
    let calls = Rc::new(Cell::new(0));
    let backbone = stub_backbone(
        two_stage_graph(8, 4),
        FusionLevels::new(0, 2),
        PermutationStage::new((0..8).collect(), &calls),
        PermutationStage::new((0..4).collect(), &calls),
    );

    let output = backbone.forward(&tagged_batch(2, 16)).unwrap();
    let expected: Vec<f32> = [0.0f32, 1.0].iter().flat_map(|&b| [b; 4]).collect();
    assert_eq!(to_host(output.ctr_batch_idx).unwrap(), expected);

    let coords = to_host(output.pyramid.get(1).unwrap().coords.clone()).unwrap();
    let tags: Vec<f32> = coords.chunks_exact(4).map(|row| row[0]).collect();
    assert_eq!(tags, [0.0f32, 1.0].iter().flat_map(|&b| [b; 8]).collect::<Vec<_>>());
}
