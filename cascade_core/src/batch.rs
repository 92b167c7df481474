//! Batch layout checks for flat, batch-tagged point arrays.

use crate::error::{CascadeError, Result};

/// Validate a batch-index column and return the per-element point count.
///
/// Points must be grouped by ascending batch index and every batch element
/// must contribute the same number of points, so the flat array can be
/// reshaped into a dense `[batch_size, count, ...]` layout.
pub fn uniform_point_count(batch_indices: &[f32], batch_size: usize) -> Result<usize> {
    let mut counts = vec![0usize; batch_size];
    let mut previous = 0usize;

    for (point, &raw) in batch_indices.iter().enumerate() {
        let out_of_range = CascadeError::BatchIndexOutOfRange {
            point,
            value: raw,
            batch_size,
        };
        if !raw.is_finite() || raw < 0.0 || raw.fract() != 0.0 {
            return Err(out_of_range);
        }
        let batch = raw as usize;
        if batch >= batch_size {
            return Err(out_of_range);
        }
        if batch < previous {
            return Err(CascadeError::UnsortedBatch {
                point,
                value: batch,
                previous,
            });
        }
        previous = batch;
        counts[batch] += 1;
    }

    let first = counts.first().copied().unwrap_or(0);
    if counts.iter().any(|&c| c != first) {
        return Err(CascadeError::UnequalBatchCounts { counts });
    }
    Ok(first)
}
