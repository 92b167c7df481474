//! Tensor helpers shared by the stage modules and the backbone.
//!
//! Gathers work per batch element with `select` along the point dimension
//! and stack the results; batch elements never mix.

use burn::prelude::*;
use cascade_core::IndexMatrix;

use crate::error::{NeuralCascadeError, Result};

/// Copy a float tensor to the host.
pub fn to_host<B: Backend, const D: usize>(tensor: Tensor<B, D>) -> Result<Vec<f32>> {
    tensor
        .into_data()
        .convert::<f32>()
        .to_vec::<f32>()
        .map_err(|err| NeuralCascadeError::InvalidData(format!("{:?}", err)))
}

/// Upload an index matrix as a `[B, M]` integer tensor.
pub fn index_tensor<B: Backend>(index: &IndexMatrix, device: &B::Device) -> Tensor<B, 2, Int> {
    Tensor::from_data(
        TensorData::new(index.to_i64(), [index.batch_size(), index.len()]),
        device,
    )
}

/// Download a `[B, M]` integer tensor as an index matrix.
///
/// Negative entries are rejected.
pub fn index_matrix<B: Backend>(tensor: Tensor<B, 2, Int>) -> Result<IndexMatrix> {
    let [batch_size, len] = tensor.dims();
    let values = tensor
        .into_data()
        .convert::<i64>()
        .to_vec::<i64>()
        .map_err(|err| NeuralCascadeError::InvalidData(format!("{:?}", err)))?;
    Ok(IndexMatrix::from_signed(batch_size, len, &values)?)
}

fn batch_rows<B: Backend>(index: &IndexMatrix, b: usize, device: &B::Device) -> Tensor<B, 1, Int> {
    let row: Vec<i64> = index.row(b).iter().map(|&i| i as i64).collect();
    Tensor::from_data(TensorData::new(row, [index.len()]), device)
}

fn check_batch(context: &str, index: &IndexMatrix, batch_size: usize) -> Result<()> {
    if index.batch_size() != batch_size {
        return Err(NeuralCascadeError::shape(
            context,
            &[batch_size, index.len()],
            &[index.batch_size(), index.len()],
        ));
    }
    Ok(())
}

/// Gather points of a points-major tensor.
///
/// Input shape: [batch, points, dim]; `index` is `[batch, M]`.
/// Output shape: [batch, M, dim]
pub fn gather_points<B: Backend>(points: Tensor<B, 3>, index: &IndexMatrix) -> Result<Tensor<B, 3>> {
    let [batch, num_points, dim] = points.dims();
    check_batch("gather points", index, batch)?;
    index.check_domain(num_points)?;
    let device = points.device();

    let rows = (0..batch)
        .map(|b| {
            points
                .clone()
                .slice([b..b + 1, 0..num_points, 0..dim])
                .squeeze::<2>(0)
                .select(0, batch_rows::<B>(index, b, &device))
        })
        .collect();
    Ok(Tensor::stack::<3>(rows, 0))
}

/// Gather points of a channels-first feature tensor.
///
/// Input shape: [batch, channels, points]; `index` is `[batch, M]`.
/// Output shape: [batch, channels, M]
pub fn gather_channels<B: Backend>(
    features: Tensor<B, 3>,
    index: &IndexMatrix,
) -> Result<Tensor<B, 3>> {
    let [batch, channels, num_points] = features.dims();
    check_batch("gather features", index, batch)?;
    index.check_domain(num_points)?;
    let device = features.device();

    let rows = (0..batch)
        .map(|b| {
            features
                .clone()
                .slice([b..b + 1, 0..channels, 0..num_points])
                .squeeze::<2>(0)
                .select(1, batch_rows::<B>(index, b, &device))
        })
        .collect();
    Ok(Tensor::stack::<3>(rows, 0))
}

/// A `[batch, points, 1]` column holding each row's batch element index.
pub fn batch_column<B: Backend>(batch: usize, points: usize, device: &B::Device) -> Tensor<B, 3> {
    let values: Vec<f32> = (0..batch)
        .flat_map(|b| std::iter::repeat(b as f32).take(points))
        .collect();
    Tensor::from_data(TensorData::new(values, [batch, points, 1]), device)
}

/// Batch tags for `points` points per element, as a `[batch, points, 1]` column.
///
/// Sliced from the input batch-index matrix `[batch, N]`. Points are stored
/// batch-major with equal counts, so every row of that matrix is constant
/// and the first `points` columns tag any level. A level wider than the
/// input gets a generated column instead.
pub fn batch_tags<B: Backend>(batch_index: &Tensor<B, 2>, points: usize) -> Tensor<B, 3> {
    let [batch, num_points] = batch_index.dims();
    if points > num_points {
        return batch_column::<B>(batch, points, &batch_index.device());
    }
    batch_index
        .clone()
        .slice([0..batch, 0..points])
        .unsqueeze_dim::<3>(2)
}

/// Prepend the batch-index column: `[B, M, D]` becomes `[B, M, 1 + D]`.
pub fn batch_tagged<B: Backend>(tensor: Tensor<B, 3>, batch_index: &Tensor<B, 2>) -> Tensor<B, 3> {
    let points = tensor.dims()[1];
    Tensor::cat(vec![batch_tags(batch_index, points), tensor], 2)
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type TestBackend = NdArray;

    fn arange(batch: usize, rows: usize, cols: usize) -> Tensor<TestBackend, 3> {
        let values: Vec<f32> = (0..batch * rows * cols).map(|v| v as f32).collect();
        Tensor::from_data(TensorData::new(values, [batch, rows, cols]), &Default::default())
    }

    #[test]
    fn test_gather_points_per_batch() {
        // [2, 4, 2]: batch b, point i holds (8b + 2i, 8b + 2i + 1).
        let points = arange(2, 4, 2);
        let index = IndexMatrix::from_rows(vec![vec![3, 0], vec![1, 1]]).unwrap();

        let gathered = gather_points(points, &index).unwrap();
        assert_eq!(gathered.dims(), [2, 2, 2]);
        assert_eq!(
            to_host(gathered).unwrap(),
            vec![6.0, 7.0, 0.0, 1.0, 10.0, 11.0, 10.0, 11.0]
        );
    }

    #[test]
    fn test_gather_channels_per_batch() {
        // [2, 2, 3]: batch b, channel c, point i holds 6b + 3c + i.
        let features = arange(2, 2, 3);
        let index = IndexMatrix::from_rows(vec![vec![2], vec![0]]).unwrap();

        let gathered = gather_channels(features, &index).unwrap();
        assert_eq!(gathered.dims(), [2, 2, 1]);
        assert_eq!(to_host(gathered).unwrap(), vec![2.0, 5.0, 6.0, 9.0]);
    }

    #[test]
    fn test_gather_rejects_out_of_range() {
        let points = arange(1, 4, 3);
        let index = IndexMatrix::from_rows(vec![vec![4]]).unwrap();
        assert!(gather_points(points, &index).is_err());
    }

    #[test]
    fn test_index_roundtrip() {
        let device = Default::default();
        let index = IndexMatrix::from_rows(vec![vec![5, 1, 2], vec![0, 0, 7]]).unwrap();
        let tensor = index_tensor::<TestBackend>(&index, &device);
        assert_eq!(tensor.dims(), [2, 3]);
        assert_eq!(index_matrix(tensor).unwrap(), index);
    }

    #[test]
    fn test_negative_index_rejected() {
        let device = Default::default();
        let tensor = Tensor::<TestBackend, 2, Int>::from_data(
            TensorData::new(vec![0i64, -1], [1, 2]),
            &device,
        );
        assert!(index_matrix(tensor).is_err());
    }

    fn batch_index(batch: usize, points: usize) -> Tensor<TestBackend, 2> {
        let values: Vec<f32> = (0..batch)
            .flat_map(|b| std::iter::repeat(b as f32).take(points))
            .collect();
        Tensor::from_data(TensorData::new(values, [batch, points]), &Default::default())
    }

    #[test]
    fn test_batch_tagged() {
        let tagged = batch_tagged(arange(2, 2, 1), &batch_index(2, 6));
        assert_eq!(tagged.dims(), [2, 2, 2]);
        assert_eq!(
            to_host(tagged).unwrap(),
            vec![0.0, 0.0, 0.0, 1.0, 1.0, 2.0, 1.0, 3.0]
        );
    }

    #[test]
    fn test_batch_tags_slice_the_input_column() {
        // Tags carry whatever the input rows hold.
        let index = Tensor::<TestBackend, 2>::from_data(
            TensorData::new(vec![3.0f32, 3.0, 3.0, 7.0, 7.0, 7.0], [2, 3]),
            &Default::default(),
        );
        let tags = batch_tags(&index, 2);
        assert_eq!(tags.dims(), [2, 2, 1]);
        assert_eq!(to_host(tags).unwrap(), vec![3.0, 3.0, 7.0, 7.0]);
    }

    #[test]
    fn test_batch_tags_wider_than_input() {
        let tags = batch_tags(&batch_index(2, 2), 3);
        assert_eq!(to_host(tags).unwrap(), vec![0.0, 0.0, 0.0, 1.0, 1.0, 1.0]);
    }
}
