//! Rank-local sparse row blocks of a distributed kernel filter.
//!
//! A [`RowBlockMatrix`] stores rows in compressed sparse row form. Row indices
//! are this rank's local point indices; column indices are either local point
//! indices (the local block) or a neighbour's point indices (a parallel block).
//! The sparsity pattern is fixed after construction: `set_row` and
//! `row_normalize` only rewrite stored values.

use std::collections::BTreeMap;

use itertools::Itertools;
use serde::{Deserialize, Serialize};

use crate::filter_error::FilterError;

/// Compressed sparse row block.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RowBlockMatrix {
    num_rows: usize,
    num_columns: usize,
    row_ptrs: Vec<usize>,
    col_indices: Vec<usize>,
    values: Vec<f64>,
}

impl RowBlockMatrix {
    /// An all-zero block with no stored entries.
    pub fn new(num_rows: usize, num_columns: usize) -> Self {
        Self {
            num_rows,
            num_columns,
            row_ptrs: vec![0; num_rows + 1],
            col_indices: Vec::new(),
            values: Vec::new(),
        }
    }

    /// Build from `(row, col, value)` triplets. Entries are sorted by
    /// `(row, col)`; duplicates are summed. Explicit zeros are kept as stored
    /// entries so a caller-chosen pattern survives.
    pub fn from_triplets<I>(
        num_rows: usize,
        num_columns: usize,
        triplets: I,
    ) -> Result<Self, FilterError>
    where
        I: IntoIterator<Item = (usize, usize, f64)>,
    {
        let mut entries: Vec<(usize, usize, f64)> = triplets.into_iter().collect();
        for &(row, column, _) in &entries {
            if row >= num_rows {
                return Err(FilterError::RowIndexOutOfBounds { row, num_rows });
            }
            if column >= num_columns {
                return Err(FilterError::ColumnIndexOutOfBounds {
                    column,
                    num_columns,
                });
            }
        }
        entries.sort_by_key(|&(r, c, _)| (r, c));

        let mut matrix = Self::new(num_rows, num_columns);
        for ((row, column), group) in &entries.into_iter().chunk_by(|&(r, c, _)| (r, c)) {
            let value: f64 = group.map(|(_, _, v)| v).sum();
            matrix.col_indices.push(column);
            matrix.values.push(value);
            matrix.row_ptrs[row + 1] += 1;
        }
        for row in 0..num_rows {
            matrix.row_ptrs[row + 1] += matrix.row_ptrs[row];
        }
        Ok(matrix)
    }

    #[inline]
    pub fn num_rows(&self) -> usize {
        self.num_rows
    }

    #[inline]
    pub fn num_columns(&self) -> usize {
        self.num_columns
    }

    /// Number of stored entries.
    #[inline]
    pub fn nnz(&self) -> usize {
        self.values.len()
    }

    fn row_range(&self, row: usize) -> Result<std::ops::Range<usize>, FilterError> {
        if row >= self.num_rows {
            return Err(FilterError::RowIndexOutOfBounds {
                row,
                num_rows: self.num_rows,
            });
        }
        Ok(self.row_ptrs[row]..self.row_ptrs[row + 1])
    }

    /// Stored weights and their column indices for `row`.
    pub fn get_row(&self, row: usize) -> Result<(&[f64], &[usize]), FilterError> {
        let range = self.row_range(row)?;
        Ok((&self.values[range.clone()], &self.col_indices[range]))
    }

    /// Overwrite the stored weights of `row`, keeping its pattern.
    pub fn set_row(&mut self, row: usize, weights: &[f64]) -> Result<(), FilterError> {
        let range = self.row_range(row)?;
        if weights.len() != range.len() {
            return Err(FilterError::RowLengthMismatch {
                row,
                expected: range.len(),
                found: weights.len(),
            });
        }
        self.values[range].copy_from_slice(weights);
        Ok(())
    }

    /// `out = A·x`, or `out = Aᵗ·x` when `transpose` is set.
    pub fn mat_vec(&self, x: &[f64], transpose: bool) -> Result<Vec<f64>, FilterError> {
        let (in_len, out_len) = if transpose {
            (self.num_rows, self.num_columns)
        } else {
            (self.num_columns, self.num_rows)
        };
        if x.len() != in_len {
            return Err(FilterError::DimensionMismatch {
                expected: in_len,
                found: x.len(),
            });
        }
        let mut out = vec![0.0; out_len];
        for row in 0..self.num_rows {
            let range = self.row_ptrs[row]..self.row_ptrs[row + 1];
            for (&c, &v) in self.col_indices[range.clone()].iter().zip(&self.values[range]) {
                if transpose {
                    out[c] += v * x[row];
                } else {
                    out[row] += v * x[c];
                }
            }
        }
        Ok(out)
    }

    /// Per-row sums of stored weights, summed in column storage order.
    pub fn row_sums(&self) -> Vec<f64> {
        (0..self.num_rows)
            .map(|row| self.values[self.row_ptrs[row]..self.row_ptrs[row + 1]].iter().sum())
            .collect()
    }

    /// Scale every stored entry of row `i` by `factors[i]`.
    pub fn row_normalize(&mut self, factors: &[f64]) -> Result<(), FilterError> {
        if factors.len() != self.num_rows {
            return Err(FilterError::DimensionMismatch {
                expected: self.num_rows,
                found: factors.len(),
            });
        }
        for (row, &factor) in factors.iter().enumerate() {
            for v in &mut self.values[self.row_ptrs[row]..self.row_ptrs[row + 1]] {
                *v *= factor;
            }
        }
        Ok(())
    }

    /// Iterate stored entries as `(row, col, value)` in storage order.
    pub fn triplets(&self) -> impl Iterator<Item = (usize, usize, f64)> + '_ {
        (0..self.num_rows).flat_map(move |row| {
            let range = self.row_ptrs[row]..self.row_ptrs[row + 1];
            self.col_indices[range.clone()]
                .iter()
                .zip(&self.values[range])
                .map(move |(&c, &v)| (row, c, v))
        })
    }
}

/// One rank's slice of a distributed kernel filter.
///
/// `local` holds rows × local columns. `row_blocks[q]` holds the same rows
/// against neighbour `q`'s points. `column_blocks[q]` is filled by the
/// normalization exchange with `q`'s normalized row block addressed to this
/// rank. Maps are keyed by rank so iteration is always in ascending rank order.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct KernelBlocks {
    pub local: RowBlockMatrix,
    pub row_blocks: BTreeMap<usize, RowBlockMatrix>,
    pub column_blocks: BTreeMap<usize, RowBlockMatrix>,
}

impl KernelBlocks {
    pub fn new(local: RowBlockMatrix) -> Self {
        Self {
            local,
            row_blocks: BTreeMap::new(),
            column_blocks: BTreeMap::new(),
        }
    }

    /// Attach the row block against neighbour `rank`.
    pub fn with_row_block(mut self, rank: usize, block: RowBlockMatrix) -> Self {
        self.row_blocks.insert(rank, block);
        self
    }

    /// Stored entries of one logical row across all blocks.
    pub fn row_nnz(&self, row: usize) -> Result<usize, FilterError> {
        let mut n = self.local.get_row(row)?.0.len();
        for block in self.row_blocks.values() {
            n += block.get_row(row)?.0.len();
        }
        Ok(n)
    }

    /// Sum of one logical row: local block first, then neighbours by rank.
    pub fn row_total(&self, row: usize) -> Result<f64, FilterError> {
        let mut total: f64 = self.local.get_row(row)?.0.iter().sum();
        for block in self.row_blocks.values() {
            total += block.get_row(row)?.0.iter().sum::<f64>();
        }
        Ok(total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> RowBlockMatrix {
        RowBlockMatrix::from_triplets(
            3,
            4,
            [(2, 1, 4.0), (0, 3, 2.0), (0, 0, 1.0), (2, 1, 1.0), (1, 2, 0.0)],
        )
        .unwrap()
    }

    #[test]
    fn triplets_are_sorted_and_merged() {
        let m = sample();
        assert_eq!(m.nnz(), 4);
        let (w, c) = m.get_row(0).unwrap();
        assert_eq!((w, c), (&[1.0, 2.0][..], &[0, 3][..]));
        let (w, c) = m.get_row(2).unwrap();
        assert_eq!((w, c), (&[5.0][..], &[1][..]));
        // explicit zero is part of the pattern
        assert_eq!(m.get_row(1).unwrap().1, &[2]);
    }

    #[test]
    fn out_of_range_triplet_errors() {
        assert!(matches!(
            RowBlockMatrix::from_triplets(2, 2, [(2, 0, 1.0)]),
            Err(FilterError::RowIndexOutOfBounds { row: 2, num_rows: 2 })
        ));
        assert!(matches!(
            RowBlockMatrix::from_triplets(2, 2, [(0, 7, 1.0)]),
            Err(FilterError::ColumnIndexOutOfBounds { column: 7, .. })
        ));
    }

    #[test]
    fn set_row_keeps_pattern_and_checks_length() {
        let mut m = sample();
        m.set_row(0, &[0.25, 0.75]).unwrap();
        assert_eq!(m.get_row(0).unwrap().0, &[0.25, 0.75]);
        assert!(matches!(
            m.set_row(0, &[1.0]),
            Err(FilterError::RowLengthMismatch { row: 0, expected: 2, found: 1 })
        ));
        assert!(m.set_row(3, &[]).is_err());
    }

    #[test]
    fn mat_vec_and_transpose() {
        let m = sample();
        assert_eq!(m.mat_vec(&[1.0, 1.0, 1.0, 1.0], false).unwrap(), m.row_sums());
        assert_eq!(m.mat_vec(&[1.0, 2.0, 3.0], true).unwrap(), vec![1.0, 15.0, 0.0, 2.0]);
        assert!(m.mat_vec(&[1.0], false).is_err());
    }

    #[test]
    fn row_normalize_scales_rows() {
        let mut m = sample();
        m.row_normalize(&[0.5, 1.0, 0.2]).unwrap();
        assert_eq!(m.row_sums(), vec![1.5, 0.0, 1.0]);
        assert!(m.row_normalize(&[1.0]).is_err());
    }

    #[test]
    fn kernel_row_total_spans_blocks() {
        let local = RowBlockMatrix::from_triplets(1, 2, [(0, 0, 1.0), (0, 1, 2.0)]).unwrap();
        let nbr = RowBlockMatrix::from_triplets(1, 3, [(0, 2, 3.0)]).unwrap();
        let kernel = KernelBlocks::new(local).with_row_block(1, nbr);
        assert_eq!(kernel.row_total(0).unwrap(), 6.0);
        assert_eq!(kernel.row_nnz(0).unwrap(), 3);
    }
}
