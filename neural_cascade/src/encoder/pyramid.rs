//! Append-only record of every pyramid level produced during a forward pass.

use burn::prelude::*;

use crate::ops::batch_tagged;

/// One pyramid level.
#[derive(Debug, Clone)]
pub struct PyramidEntry<B: Backend> {
    /// Coordinates, shape [batch, M, 3].
    pub xyz: Tensor<B, 3>,
    /// Coordinates with a leading batch-index column, shape [batch, M, 4].
    pub coords: Tensor<B, 3>,
    /// Features, shape [batch, C, M].
    pub features: Option<Tensor<B, 3>>,
    /// Class scores with a leading batch-index column, shape [batch, M, 1 + K].
    pub class_prediction: Option<Tensor<B, 3>>,
}

impl<B: Backend> PyramidEntry<B> {
    /// Build an entry, batch-tagging coordinates and class scores.
    ///
    /// `batch_index` is the input batch-index matrix, shape [batch, N].
    pub fn new(
        xyz: Tensor<B, 3>,
        features: Option<Tensor<B, 3>>,
        class_prediction: Option<Tensor<B, 3>>,
        batch_index: &Tensor<B, 2>,
    ) -> Self {
        Self {
            coords: batch_tagged(xyz.clone(), batch_index),
            xyz,
            features,
            class_prediction: class_prediction.map(|scores| batch_tagged(scores, batch_index)),
        }
    }

    /// Points per batch element.
    pub fn num_points(&self) -> usize {
        self.xyz.dims()[1]
    }

    /// Feature channels, 0 without features.
    pub fn num_channels(&self) -> usize {
        self.features.as_ref().map_or(0, |f| f.dims()[1])
    }
}

/// Levels in production order; level 0 is the input.
#[derive(Debug, Clone)]
pub struct Pyramid<B: Backend> {
    entries: Vec<PyramidEntry<B>>,
}

impl<B: Backend> Pyramid<B> {
    /// Start a pyramid from the input level.
    pub fn new(input: PyramidEntry<B>) -> Self {
        Self {
            entries: vec![input],
        }
    }

    pub(crate) fn push(&mut self, entry: PyramidEntry<B>) {
        self.entries.push(entry);
    }

    /// Number of levels.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Always false; the input level is always present.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// A level, if produced.
    pub fn get(&self, level: usize) -> Option<&PyramidEntry<B>> {
        self.entries.get(level)
    }

    /// All levels.
    pub fn levels(&self) -> &[PyramidEntry<B>] {
        &self.entries
    }

    /// Coordinates of every level.
    pub fn xyz(&self) -> Vec<Tensor<B, 3>> {
        self.entries.iter().map(|e| e.xyz.clone()).collect()
    }

    /// Batch-tagged coordinates of every level.
    pub fn coords(&self) -> Vec<Tensor<B, 3>> {
        self.entries.iter().map(|e| e.coords.clone()).collect()
    }

    /// Features of every level.
    pub fn features(&self) -> Vec<Option<Tensor<B, 3>>> {
        self.entries.iter().map(|e| e.features.clone()).collect()
    }

    /// Batch-tagged class predictions of every level.
    pub fn class_predictions(&self) -> Vec<Option<Tensor<B, 3>>> {
        self.entries
            .iter()
            .map(|e| e.class_prediction.clone())
            .collect()
    }
}
