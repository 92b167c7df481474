//! Set abstraction: sample centers, group neighbors, encode groups.

use burn::module::{Ignored, Module};
use burn::nn::{Linear, LinearConfig};
use burn::prelude::*;
use burn::tensor::activation::sigmoid;
use cascade_core::{
    ball_query, farthest_point_sample, top_k_by_score, IndexMatrix, SampleMethod, SamplingParams,
};

use super::SharedMlp;
use crate::config::SharedMlpConfig;
use crate::error::{NeuralCascadeError, Result};
use crate::ops::{gather_channels, gather_points, index_tensor, to_host};

/// Output of a sampling stage.
#[derive(Debug, Clone)]
pub struct SaOutput<B: Backend> {
    /// Output coordinates, shape [batch, M, 3].
    pub xyz: Tensor<B, 3>,
    /// Output features, shape [batch, C', M].
    pub features: Option<Tensor<B, 3>>,
    /// Per-point class scores, shape [batch, M, K].
    pub class_prediction: Option<Tensor<B, 3>>,
    /// Positions of the output points within the input, shape [batch, M].
    ///
    /// `None` or an empty tensor when the stage did not subsample its input.
    pub sample_indices: Option<Tensor<B, 2, Int>>,
}

/// A sampling-and-aggregation stage.
pub trait SetAbstraction<B: Backend> {
    /// Run the stage.
    ///
    /// - `xyz`: [batch, N, 3]
    /// - `features`: [batch, C, N]
    /// - `prior_class`: the latest class prediction, [batch, N, K]
    /// - `centers`: externally supplied output points, [batch, M, 3]
    fn forward(
        &self,
        xyz: Tensor<B, 3>,
        features: Option<Tensor<B, 3>>,
        prior_class: Option<Tensor<B, 3>>,
        centers: Option<Tensor<B, 3>>,
    ) -> Result<SaOutput<B>>;
}

/// Point-wise class-score head.
#[derive(Module, Debug)]
pub struct ConfidenceHead<B: Backend> {
    mlp: SharedMlp<B>,
    head: Linear<B>,
}

impl<B: Backend> ConfidenceHead<B> {
    /// Create a head mapping `input_dim` channels to `num_class` scores.
    pub fn new(input_dim: usize, widths: &[usize], num_class: usize, device: &B::Device) -> Self {
        let config = SharedMlpConfig::new(input_dim).with_widths(widths.to_vec());
        let head = LinearConfig::new(config.output_dim(), num_class).init(device);
        Self {
            mlp: config.init(device),
            head,
        }
    }

    /// Input shape: [batch, M, C]; output shape: [batch, M, num_class].
    pub fn forward(&self, x: Tensor<B, 3>) -> Tensor<B, 3> {
        self.head.forward(self.mlp.forward(x))
    }
}

/// Multi-scale PointNet++ set abstraction with selectable sampling.
#[derive(Module, Debug)]
pub struct PointSetAbstraction<B: Backend> {
    params: Ignored<SamplingParams>,
    branches: Vec<SharedMlp<B>>,
    aggregation: Option<SharedMlp<B>>,
    confidence: Option<ConfidenceHead<B>>,
}

impl<B: Backend> PointSetAbstraction<B> {
    /// Create a stage reading `input_channels` feature channels.
    pub fn new(
        params: SamplingParams,
        input_channels: usize,
        num_class: usize,
        device: &B::Device,
    ) -> Self {
        // Grouped features carry relative xyz in front.
        let branches: Vec<SharedMlp<B>> = params
            .mlps
            .iter()
            .map(|widths| {
                SharedMlpConfig::new(input_channels + 3)
                    .with_widths(widths.clone())
                    .init(device)
            })
            .collect();

        let grouped_width = if params.mlps.is_empty() {
            input_channels
        } else {
            params.mlps.iter().filter_map(|m| m.last()).sum()
        };
        let aggregation = params.aggregation().map(|widths| {
            SharedMlpConfig::new(grouped_width)
                .with_widths(widths.to_vec())
                .init(device)
        });
        let confidence = params.confidence().map(|widths| {
            ConfidenceHead::new(
                params.output_channels(input_channels),
                widths,
                num_class,
                device,
            )
        });

        Self {
            params: Ignored(params),
            branches,
            aggregation,
            confidence,
        }
    }

    /// Stage parameters.
    pub fn params(&self) -> &SamplingParams {
        &self.params.0
    }

    /// Pick output points as positions into the input, per batch element.
    fn sample(
        &self,
        xyz: &Tensor<B, 3>,
        features: Option<&Tensor<B, 3>>,
        prior_class: Option<&Tensor<B, 3>>,
    ) -> Result<IndexMatrix> {
        let [batch, num_points, _] = xyz.dims();
        let xyz_host = to_host(xyz.clone())?;
        let mut rows = vec![Vec::with_capacity(self.params().total_points()); batch];

        let passes = self
            .params()
            .npoints
            .iter()
            .zip(&self.params().sample_ranges)
            .zip(&self.params().sample_methods);
        for ((&count, range), &method) in passes {
            let range = range.resolve(num_points);
            if range.is_empty() {
                return Err(NeuralCascadeError::InvalidData(format!(
                    "sample range {:?} selects no points out of {}",
                    range, num_points
                )));
            }

            match method {
                SampleMethod::DistanceFps => {
                    for (b, row) in rows.iter_mut().enumerate() {
                        let base = b * num_points;
                        let points = &xyz_host[(base + range.start) * 3..(base + range.end) * 3];
                        row.extend(
                            farthest_point_sample(points, 3, count)
                                .into_iter()
                                .map(|i| i + range.start),
                        );
                    }
                }
                SampleMethod::FeatureFps => {
                    let features = features.ok_or_else(|| {
                        NeuralCascadeError::missing_features("feature-space farthest point sampling")
                    })?;
                    let channels = features.dims()[1];
                    let dim = 3 + channels;
                    let joint = to_host(Tensor::cat(
                        vec![xyz.clone(), features.clone().swap_dims(1, 2)],
                        2,
                    ))?;
                    for (b, row) in rows.iter_mut().enumerate() {
                        let base = b * num_points;
                        let points = &joint[(base + range.start) * dim..(base + range.end) * dim];
                        row.extend(
                            farthest_point_sample(points, dim, count)
                                .into_iter()
                                .map(|i| i + range.start),
                        );
                    }
                }
                SampleMethod::ClassAware => {
                    let prior = prior_class.ok_or(NeuralCascadeError::MissingClassPrediction)?;
                    let [prior_batch, prior_points, num_class] = prior.dims();
                    if prior_batch != batch || prior_points != num_points {
                        return Err(NeuralCascadeError::shape(
                            "class-aware sampling prior",
                            &[batch, num_points, num_class],
                            &[prior_batch, prior_points, num_class],
                        ));
                    }
                    let scores = to_host(sigmoid(prior.clone()).max_dim(2))?;
                    if count > range.len() {
                        return Err(NeuralCascadeError::InvalidData(format!(
                            "class-aware sampling of {} points from a range of {}",
                            count,
                            range.len()
                        )));
                    }
                    for (b, row) in rows.iter_mut().enumerate() {
                        let base = b * num_points;
                        let slice = &scores[base + range.start..base + range.end];
                        row.extend(
                            top_k_by_score(slice, count)
                                .into_iter()
                                .map(|i| i + range.start),
                        );
                    }
                }
            }
        }

        Ok(IndexMatrix::from_rows(rows)?)
    }

    /// Ball-query groups and encode every branch.
    ///
    /// Returns channels-last features [batch, M, sum of branch widths].
    fn group(
        &self,
        xyz: &Tensor<B, 3>,
        features: Option<&Tensor<B, 3>>,
        centers: &Tensor<B, 3>,
    ) -> Result<Tensor<B, 3>> {
        let [batch, num_points, _] = xyz.dims();
        let [_, num_centers, _] = centers.dims();
        let xyz_host = to_host(xyz.clone())?;
        let centers_host = to_host(centers.clone())?;

        let mut outputs = Vec::with_capacity(self.branches.len());
        let mut min_radius = 0.0f32;
        let branches = self
            .branches
            .iter()
            .zip(&self.params().radii)
            .zip(&self.params().nsamples);
        for ((mlp, &radius), &nsample) in branches {
            let rows = (0..batch)
                .map(|b| {
                    ball_query(
                        &centers_host[b * num_centers * 3..(b + 1) * num_centers * 3],
                        &xyz_host[b * num_points * 3..(b + 1) * num_points * 3],
                        min_radius,
                        radius,
                        nsample,
                    )
                })
                .collect();
            let group = IndexMatrix::from_rows(rows)?;

            let relative = gather_points(xyz.clone(), &group)?
                .reshape([batch, num_centers, nsample, 3])
                - centers.clone().unsqueeze_dim::<4>(2);
            let grouped = match features {
                Some(features) => {
                    let channels = features.dims()[1];
                    let neighbors = gather_channels(features.clone(), &group)?
                        .swap_dims(1, 2)
                        .reshape([batch, num_centers, nsample, channels]);
                    Tensor::cat(vec![relative, neighbors], 3)
                }
                None => relative,
            };

            outputs.push(mlp.forward(grouped).max_dim(2).squeeze::<3>(2));
            if self.params().dilated_group {
                min_radius = radius;
            }
        }

        Ok(Tensor::cat(outputs, 2))
    }
}

impl<B: Backend> SetAbstraction<B> for PointSetAbstraction<B> {
    fn forward(
        &self,
        xyz: Tensor<B, 3>,
        features: Option<Tensor<B, 3>>,
        prior_class: Option<Tensor<B, 3>>,
        centers: Option<Tensor<B, 3>>,
    ) -> Result<SaOutput<B>> {
        let [batch, _, _] = xyz.dims();
        let device = xyz.device();

        let (new_xyz, index) = match centers {
            Some(centers) => {
                let dims = centers.dims();
                if dims[0] != batch || dims[2] != 3 {
                    return Err(NeuralCascadeError::shape(
                        "supplied centers",
                        &[batch, dims[1], 3],
                        &dims,
                    ));
                }
                (centers, None)
            }
            None => {
                let index = self.sample(&xyz, features.as_ref(), prior_class.as_ref())?;
                (gather_points(xyz.clone(), &index)?, Some(index))
            }
        };

        // Channels-last [batch, M, C] until the end.
        let point_features = if self.branches.is_empty() {
            match (features, &index) {
                (Some(features), Some(index)) => {
                    Some(gather_channels(features, index)?.swap_dims(1, 2))
                }
                (None, _) => None,
                (Some(_), None) => {
                    return Err(NeuralCascadeError::InvalidData(
                        "a stage without grouping branches cannot take external centers"
                            .to_string(),
                    ))
                }
            }
        } else {
            Some(self.group(&xyz, features.as_ref(), &new_xyz)?)
        };

        let point_features = match (point_features, &self.aggregation) {
            (Some(f), Some(aggregation)) => Some(aggregation.forward(f)),
            (f, _) => f,
        };
        let class_prediction = match (&point_features, &self.confidence) {
            (Some(f), Some(head)) => Some(head.forward(f.clone())),
            _ => None,
        };

        Ok(SaOutput {
            xyz: new_xyz,
            features: point_features.map(|f| f.swap_dims(1, 2)),
            class_prediction,
            sample_indices: index.map(|index| index_tensor(&index, &device)),
        })
    }
}
