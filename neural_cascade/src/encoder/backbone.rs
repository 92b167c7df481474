//! The cascade backbone: runs the stage graph, recovers dense features at
//! the coarse fusion level and assembles the output record.

use std::marker::PhantomData;

use burn::prelude::*;
use cascade_core::{
    CascadeError, FusionLevels, IndexChainPlan, IndexMatrix, StageGraph, StageKind, StageLayer,
};

use super::{EncoderOutput, Pyramid, PyramidEntry, SampleLedger, VoteRecord};
use crate::config::EncoderConfig;
use crate::data::PointBatch;
use crate::dump::SampleSink;
use crate::error::{NeuralCascadeError, Result};
use crate::nn::{
    FeatureFusion, FusionModule, PointSetAbstraction, SaOutput, SetAbstraction, VoteLayer,
    VoteOutput, VoteStage,
};
use crate::ops::{batch_tagged, batch_tags, gather_channels, index_matrix, to_host};

/// The module running one stage.
#[derive(Debug)]
pub enum StageModule<S, V> {
    /// A sampling-and-aggregation stage.
    Sampling(S),
    /// A vote stage.
    Vote(V),
}

impl<S, V> StageModule<S, V> {
    /// Kind of the wrapped module.
    pub fn kind(&self) -> StageKind {
        match self {
            StageModule::Sampling(_) => StageKind::Sampling,
            StageModule::Vote(_) => StageKind::Vote,
        }
    }
}

/// Runs a validated stage graph over point batches.
///
/// Stage modules, the fusion primitive and the diagnostic sink are
/// injected; the backbone owns only the bookkeeping between them. A forward
/// pass keeps all intermediate state local, so the backbone is `&self`
/// throughout.
pub struct CascadeBackbone<
    B: Backend,
    S = PointSetAbstraction<B>,
    V = VoteLayer<B>,
    F = FusionModule<B>,
> {
    graph: StageGraph,
    plan: IndexChainPlan,
    stages: Vec<StageModule<S, V>>,
    fusion: F,
    sink: Option<Box<dyn SampleSink>>,
    _backend: PhantomData<B>,
}

/// The backbone with the reference Burn modules.
pub type ReferenceBackbone<B> =
    CascadeBackbone<B, PointSetAbstraction<B>, VoteLayer<B>, FusionModule<B>>;

impl<B: Backend> ReferenceBackbone<B> {
    /// Build the reference modules for a configuration.
    pub fn new(config: &EncoderConfig, device: &B::Device) -> Result<Self> {
        let (graph, plan) = config.validate()?;

        let stages = graph
            .stages()
            .iter()
            .enumerate()
            .map(|(stage, descriptor)| {
                let channels = graph
                    .input_level(stage)
                    .and_then(|level| graph.level_channels(level))
                    .unwrap_or(0);
                match &descriptor.layer {
                    StageLayer::Sampling(params) => StageModule::Sampling(PointSetAbstraction::new(
                        params.clone(),
                        channels,
                        config.num_class,
                        device,
                    )),
                    StageLayer::Vote(params) => {
                        StageModule::Vote(VoteLayer::new(params, channels, device))
                    }
                }
            })
            .collect();

        let levels = plan.levels();
        let fusion = FusionModule::new(
            &config.fusion,
            graph.level_channels(levels.high).unwrap_or(0),
            graph.level_channels(levels.low).unwrap_or(0),
            device,
        );

        log::info!(
            "cascade backbone: {} stages, level widths {:?}, fusing level {} into level {}",
            graph.len(),
            graph.channels(),
            levels.low,
            levels.high
        );

        Self::from_parts(graph, levels, stages, fusion)
    }
}

impl<B, S, V, F> CascadeBackbone<B, S, V, F>
where
    B: Backend,
    S: SetAbstraction<B>,
    V: VoteStage<B>,
    F: FeatureFusion<B>,
{
    /// Assemble a backbone from a graph and one module per stage.
    pub fn from_parts(
        graph: StageGraph,
        fusion_levels: FusionLevels,
        stages: Vec<StageModule<S, V>>,
        fusion: F,
    ) -> Result<Self> {
        if stages.len() != graph.len() {
            return Err(NeuralCascadeError::InvalidConfig {
                message: format!(
                    "{} stage modules for a graph of {} stages",
                    stages.len(),
                    graph.len()
                ),
            });
        }
        for (stage, (descriptor, module)) in graph.stages().iter().zip(&stages).enumerate() {
            if descriptor.kind() != module.kind() {
                return Err(NeuralCascadeError::StageMismatch {
                    stage,
                    expected: descriptor.kind(),
                    got: module.kind(),
                });
            }
        }
        let plan = graph.plan_index_chain(fusion_levels)?;

        Ok(Self {
            graph,
            plan,
            stages,
            fusion,
            sink: None,
            _backend: PhantomData,
        })
    }

    /// Install a diagnostic sink.
    pub fn with_sample_sink(mut self, sink: Box<dyn SampleSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// The stage graph.
    pub fn graph(&self) -> &StageGraph {
        &self.graph
    }

    /// The fusion index chain.
    pub fn chain(&self) -> &IndexChainPlan {
        &self.plan
    }

    /// Stage modules, in order.
    pub fn stages(&self) -> &[StageModule<S, V>] {
        &self.stages
    }

    /// Run every stage, fuse, and assemble the output record.
    pub fn forward(&self, batch: &PointBatch<B>) -> Result<EncoderOutput<B>> {
        let batch_size = batch.batch_size();
        let batch_index = &batch.batch_index;

        let mut pyramid = Pyramid::new(PyramidEntry::new(
            batch.xyz.clone(),
            batch.features.clone(),
            None,
            batch_index,
        ));
        let mut ledger = SampleLedger::new();
        let mut class_prediction: Option<Tensor<B, 3>> = None;
        let mut vote: Option<VoteRecord<B>> = None;

        for (stage, (descriptor, module)) in self.graph.stages().iter().zip(&self.stages).enumerate()
        {
            let level = descriptor.layer_input.level().unwrap_or(0);
            let input = level_of(&pyramid, stage, "layer_input", level)?;
            let input_points = input.num_points();
            let xyz = input.xyz.clone();
            let features = input.features.clone();

            log::debug!(
                "stage {} ({:?}) reads level {}: {} points x {} channels",
                stage,
                descriptor.kind(),
                level,
                input_points,
                input.num_channels()
            );

            let entry = match module {
                StageModule::Sampling(sa) => {
                    let centers = match descriptor.center_source {
                        Some(source) => {
                            Some(level_of(&pyramid, stage, "center_source", source)?.xyz.clone())
                        }
                        None => None,
                    };
                    let output = sa.forward(xyz, features, class_prediction.clone(), centers)?;
                    let index = check_sampling_output(stage, batch_size, input_points, &output)?;
                    ledger.record_sampled(index);

                    if let Some(prediction) = &output.class_prediction {
                        class_prediction = Some(prediction.clone());
                    }
                    PyramidEntry::new(
                        output.xyz,
                        output.features,
                        output.class_prediction,
                        batch_index,
                    )
                }
                StageModule::Vote(vote_stage) => {
                    let output = vote_stage.forward(xyz, features)?;
                    check_vote_output(stage, batch_size, input_points, &output)?;
                    ledger.record_identity();

                    let entry = PyramidEntry::new(
                        output.centers.clone(),
                        output.features,
                        None,
                        batch_index,
                    );
                    vote = Some(VoteRecord::new(
                        output.centers,
                        output.centers_origin,
                        output.offsets,
                        batch_index,
                    ));
                    entry
                }
            };

            log::debug!(
                "stage {} wrote level {}: {} points x {} channels",
                stage,
                stage + 1,
                entry.num_points(),
                entry.num_channels()
            );
            pyramid.push(entry);
        }

        let vote = vote.ok_or(CascadeError::MissingVoteStage)?;
        let (fusion_index, fused) = self.fuse(&pyramid, &ledger, batch_size)?;

        let [_, channels, points] = fused.dims();
        let centers = vote.num_centers();
        if points != centers {
            return Err(NeuralCascadeError::shape(
                "fused features vs vote centers",
                &[batch_size, channels, centers],
                &fused.dims(),
            ));
        }

        let rows = batch_size * centers;
        let flatten = |tensor: Tensor<B, 3>| batch_tagged(tensor, batch_index).reshape([rows, 4]);
        let output = EncoderOutput {
            ctr_offsets: flatten(vote.offsets.clone()),
            centers: flatten(vote.centers.clone()),
            centers_origin: flatten(vote.centers_origin.clone()),
            centers_features: fused.swap_dims(1, 2).reshape([rows, channels]),
            ctr_batch_idx: batch_tags(batch_index, centers).reshape([rows]),
            pyramid,
            vote,
            sample_indices: ledger.into_entries(),
            fusion_index,
            class_prediction,
        };

        if let (Some(sink), Some(frame_ids)) = (&self.sink, &batch.frame_ids) {
            dump_levels(sink.as_ref(), frame_ids, &output.pyramid)?;
        }

        Ok(output)
    }

    /// Recover low-level features at the high level and fuse them.
    ///
    /// The composed index must stay inside the low level and match the
    /// high level's shape. Repeated entries are accepted with a warning:
    /// sampling pads with duplicates when an element has fewer points than
    /// requested, and those duplicates survive composition.
    fn fuse(
        &self,
        pyramid: &Pyramid<B>,
        ledger: &SampleLedger,
        batch_size: usize,
    ) -> Result<(IndexMatrix, Tensor<B, 3>)> {
        let FusionLevels { low, high } = self.plan.levels();
        let last = self.graph.len();
        let low_entry = level_of(pyramid, last, "fusion low_level", low)?;
        let high_entry = level_of(pyramid, last, "fusion high_level", high)?;
        let high_points = high_entry.num_points();

        let fusion_index = match ledger.compose(&self.plan)? {
            Some(index) => index,
            None => IndexMatrix::identity(batch_size, high_points),
        };
        if fusion_index.shape() != [batch_size, high_points] {
            return Err(CascadeError::IndexShapeMismatch {
                expected: [batch_size, high_points],
                got: fusion_index.shape(),
            }
            .into());
        }
        fusion_index.check_domain(low_entry.num_points())?;
        if !fusion_index.is_injective() {
            log::warn!(
                "composed index from level {} to level {} maps several points to the same source",
                high,
                low
            );
        }

        let low_features = low_entry
            .features
            .clone()
            .ok_or_else(|| NeuralCascadeError::missing_features(format!("fusion level {}", low)))?;
        let high_features = high_entry
            .features
            .clone()
            .ok_or_else(|| NeuralCascadeError::missing_features(format!("fusion level {}", high)))?;
        let recovered = gather_channels(low_features, &fusion_index)?;

        let [rb, rc, rm] = recovered.dims();
        let [hb, hc, hm] = high_features.dims();
        if rb != hb || rm != hm {
            return Err(NeuralCascadeError::shape(
                "recovered low-level features",
                &[hb, rc, hm],
                &[rb, rc, rm],
            ));
        }

        let fused = self.fusion.forward(high_features, recovered);
        let [fb, fc, fm] = fused.dims();
        if fb != hb || fm != hm {
            return Err(NeuralCascadeError::shape("fused features", &[hb, fc, hm], &[fb, fc, fm]));
        }

        log::debug!(
            "fused level {} ({} ch) into level {} ({} ch): {} channels over {} points",
            low,
            rc,
            high,
            hc,
            fc,
            fm
        );
        Ok((fusion_index, fused))
    }
}

fn level_of<'a, B: Backend>(
    pyramid: &'a Pyramid<B>,
    stage: usize,
    field: &'static str,
    level: usize,
) -> Result<&'a PyramidEntry<B>> {
    pyramid
        .get(level)
        .ok_or_else(|| CascadeError::ForwardReference { stage, field, level }.into())
}

fn check_sampling_output<B: Backend>(
    stage: usize,
    batch_size: usize,
    input_points: usize,
    output: &SaOutput<B>,
) -> Result<Option<IndexMatrix>> {
    let [xb, points, xc] = output.xyz.dims();
    if xb != batch_size || xc != 3 {
        return Err(NeuralCascadeError::shape(
            format!("stage {} coordinates", stage),
            &[batch_size, points, 3],
            &[xb, points, xc],
        ));
    }
    if let Some(features) = &output.features {
        let [fb, fc, fm] = features.dims();
        if fb != batch_size || fm != points {
            return Err(NeuralCascadeError::shape(
                format!("stage {} features", stage),
                &[batch_size, fc, points],
                &[fb, fc, fm],
            ));
        }
    }
    if let Some(prediction) = &output.class_prediction {
        let [pb, pm, pk] = prediction.dims();
        if pb != batch_size || pm != points {
            return Err(NeuralCascadeError::shape(
                format!("stage {} class prediction", stage),
                &[batch_size, points, pk],
                &[pb, pm, pk],
            ));
        }
    }

    let index = match &output.sample_indices {
        Some(indices) => index_matrix(indices.clone())?,
        None => return Ok(None),
    };
    if index.is_empty() {
        return Ok(None);
    }
    if index.shape() != [batch_size, points] {
        return Err(CascadeError::IndexShapeMismatch {
            expected: [batch_size, points],
            got: index.shape(),
        }
        .into());
    }
    index.check_domain(input_points)?;
    Ok(Some(index))
}

fn check_vote_output<B: Backend>(
    stage: usize,
    batch_size: usize,
    input_points: usize,
    output: &VoteOutput<B>,
) -> Result<()> {
    let expected = [batch_size, input_points, 3];
    let named = [
        ("centers", &output.centers),
        ("origin centers", &output.centers_origin),
        ("offsets", &output.offsets),
    ];
    for (name, tensor) in named {
        if tensor.dims() != expected {
            return Err(NeuralCascadeError::shape(
                format!("stage {} {}", stage, name),
                &expected,
                &tensor.dims(),
            ));
        }
    }
    if let Some(features) = &output.features {
        let [fb, fc, fm] = features.dims();
        if fb != batch_size || fm != input_points {
            return Err(NeuralCascadeError::shape(
                format!("stage {} features", stage),
                &[batch_size, fc, input_points],
                &[fb, fc, fm],
            ));
        }
    }
    Ok(())
}

fn dump_levels<B: Backend>(
    sink: &dyn SampleSink,
    frame_ids: &[String],
    pyramid: &Pyramid<B>,
) -> Result<()> {
    let batch_size = pyramid.get(0).map_or(0, |entry| entry.xyz.dims()[0]);
    if frame_ids.len() != batch_size {
        return Err(NeuralCascadeError::InvalidData(format!(
            "{} frame ids for a batch of {}",
            frame_ids.len(),
            batch_size
        )));
    }

    let hosts = pyramid
        .levels()
        .iter()
        .map(|entry| Ok((entry.num_points(), to_host(entry.xyz.clone())?)))
        .collect::<Result<Vec<_>>>()?;

    for (b, frame_id) in frame_ids.iter().enumerate() {
        let levels: Vec<Vec<[f32; 3]>> = hosts
            .iter()
            .map(|(points, values)| {
                values[b * points * 3..(b + 1) * points * 3]
                    .chunks_exact(3)
                    .map(|p| [p[0], p[1], p[2]])
                    .collect()
            })
            .collect();
        sink.record(frame_id, &levels)?;
    }
    Ok(())
}
