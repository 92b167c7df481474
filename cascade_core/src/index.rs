//! Subsample indices and their composition.
//!
//! A sampling stage emits, per batch element, the positions of its output
//! points within its input point set. Chaining several stages means
//! composing these maps right to left:
//!
//! ```text
//! composed[b][j] = idx_1[b][ idx_2[b][ ... idx_n[b][j] ... ] ]
//! ```
//!
//! Rows never mix: every batch element's indices are local to it.

use crate::error::{CascadeError, Result};

/// A `[batch, len]` matrix of point indices, row-major.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexMatrix {
    batch_size: usize,
    len: usize,
    values: Vec<usize>,
}

impl IndexMatrix {
    /// Create from row-major values.
    pub fn new(batch_size: usize, len: usize, values: Vec<usize>) -> Result<Self> {
        if values.len() != batch_size * len {
            return Err(CascadeError::IndexShapeMismatch {
                expected: [batch_size, len],
                got: [batch_size, values.len().checked_div(batch_size).unwrap_or(0)],
            });
        }
        Ok(Self {
            batch_size,
            len,
            values,
        })
    }

    /// Create from signed values, rejecting negatives.
    pub fn from_signed(batch_size: usize, len: usize, values: &[i64]) -> Result<Self> {
        let mut converted = Vec::with_capacity(values.len());
        for (i, &value) in values.iter().enumerate() {
            let index = usize::try_from(value).map_err(|_| CascadeError::IndexOutOfRange {
                batch: i.checked_div(len).unwrap_or(0),
                position: i.checked_rem(len).unwrap_or(0),
                index: value,
                len,
            })?;
            converted.push(index);
        }
        Self::new(batch_size, len, converted)
    }

    /// Create from one row per batch element; rows must agree in length.
    pub fn from_rows(rows: Vec<Vec<usize>>) -> Result<Self> {
        let batch_size = rows.len();
        let len = rows.first().map_or(0, Vec::len);
        if rows.iter().any(|row| row.len() != len) {
            return Err(CascadeError::UnequalBatchCounts {
                counts: rows.iter().map(Vec::len).collect(),
            });
        }
        Ok(Self {
            batch_size,
            len,
            values: rows.into_iter().flatten().collect(),
        })
    }

    /// The identity map `0..len` for every batch element.
    pub fn identity(batch_size: usize, len: usize) -> Self {
        Self {
            batch_size,
            len,
            values: (0..batch_size).flat_map(|_| 0..len).collect(),
        }
    }

    /// Number of batch elements.
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Indices per batch element.
    pub fn len(&self) -> usize {
        self.len
    }

    /// True when no batch element has any index.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// `[batch, len]`.
    pub fn shape(&self) -> [usize; 2] {
        [self.batch_size, self.len]
    }

    /// Indices of one batch element.
    pub fn row(&self, batch: usize) -> &[usize] {
        &self.values[batch * self.len..(batch + 1) * self.len]
    }

    /// Iterate over rows.
    pub fn rows(&self) -> impl Iterator<Item = &[usize]> {
        (0..self.batch_size).map(move |b| self.row(b))
    }

    /// Row-major values.
    pub fn values(&self) -> &[usize] {
        &self.values
    }

    /// Row-major values as `i64`, the element type of integer tensors.
    pub fn to_i64(&self) -> Vec<i64> {
        self.values.iter().map(|&v| v as i64).collect()
    }

    /// Fail unless every index is `< domain`.
    pub fn check_domain(&self, domain: usize) -> Result<()> {
        for (batch, row) in self.rows().enumerate() {
            if let Some(position) = row.iter().position(|&i| i >= domain) {
                return Err(CascadeError::IndexOutOfRange {
                    batch,
                    position,
                    index: row[position] as i64,
                    len: domain,
                });
            }
        }
        Ok(())
    }

    /// True when no row repeats an index.
    pub fn is_injective(&self) -> bool {
        self.rows().all(|row| {
            let mut seen = row.to_vec();
            seen.sort_unstable();
            seen.windows(2).all(|w| w[0] != w[1])
        })
    }

    /// Look up `inner` through `self`: `result[b][j] = self[b][inner[b][j]]`.
    ///
    /// `self` maps the intermediate level into an outer level, `inner` maps a
    /// deeper level into the intermediate one.
    pub fn gather(&self, inner: &IndexMatrix) -> Result<IndexMatrix> {
        if inner.batch_size != self.batch_size {
            return Err(CascadeError::IndexShapeMismatch {
                expected: [self.batch_size, inner.len],
                got: inner.shape(),
            });
        }
        inner.check_domain(self.len)?;

        let mut values = Vec::with_capacity(inner.values.len());
        for (outer_row, inner_row) in self.rows().zip(inner.rows()) {
            values.extend(inner_row.iter().map(|&j| outer_row[j]));
        }
        Ok(IndexMatrix {
            batch_size: self.batch_size,
            len: inner.len,
            values,
        })
    }
}

/// Compose a chain of subsample indices given in pipeline order.
///
/// `chain[0]` indexes into the dense level, each later entry indexes into
/// its predecessor's output, and the result maps the last entry's output
/// points straight into the dense level. Returns `None` for an empty chain.
pub fn compose_chain(chain: &[&IndexMatrix]) -> Result<Option<IndexMatrix>> {
    let Some((&last, rest)) = chain.split_last() else {
        return Ok(None);
    };
    let mut composed = last.clone();
    for outer in rest.iter().rev() {
        composed = outer.gather(&composed)?;
    }
    Ok(Some(composed))
}
