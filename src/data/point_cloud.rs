//! Coordinate lookup for kernel points.
//!
//! Rows of the kernel filter are centred at this rank's points; nonlocal
//! columns are resolved through a neighbour's point list, whose entries carry
//! the column index they occupy in that neighbour's block.

use serde::{Deserialize, Serialize};

use crate::filter_error::FilterError;

/// Coordinate provider consumed by normalization.
pub trait PointProvider {
    /// Number of points.
    fn get_num_points(&self) -> usize;

    /// Coordinates `(x, y, z)` of the point at position `index`.
    fn get_point(&self, index: usize) -> Result<[f64; 3], FilterError>;

    /// Column index carried by the point at position `index`.
    /// Defaults to the position itself.
    fn get_index(&self, index: usize) -> Result<usize, FilterError> {
        if index >= self.get_num_points() {
            return Err(FilterError::PointIndexOutOfBounds {
                index,
                num_points: self.get_num_points(),
            });
        }
        Ok(index)
    }
}

/// Owned point list with per-point column indices.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PointCloud {
    coords: Vec<[f64; 3]>,
    indices: Vec<usize>,
}

impl PointCloud {
    /// Points indexed by their position.
    pub fn new(coords: Vec<[f64; 3]>) -> Self {
        let indices = (0..coords.len()).collect();
        Self { coords, indices }
    }

    /// Points carrying explicit column indices (nonlocal point lists).
    pub fn with_indices(indices: Vec<usize>, coords: Vec<[f64; 3]>) -> Result<Self, FilterError> {
        if indices.len() != coords.len() {
            return Err(FilterError::DimensionMismatch {
                expected: coords.len(),
                found: indices.len(),
            });
        }
        Ok(Self { coords, indices })
    }

    pub fn push(&mut self, index: usize, coord: [f64; 3]) {
        self.indices.push(index);
        self.coords.push(coord);
    }

    pub fn len(&self) -> usize {
        self.coords.len()
    }

    pub fn is_empty(&self) -> bool {
        self.coords.is_empty()
    }
}

impl PointProvider for PointCloud {
    fn get_num_points(&self) -> usize {
        self.coords.len()
    }

    fn get_point(&self, index: usize) -> Result<[f64; 3], FilterError> {
        self.coords
            .get(index)
            .copied()
            .ok_or(FilterError::PointIndexOutOfBounds {
                index,
                num_points: self.coords.len(),
            })
    }

    fn get_index(&self, index: usize) -> Result<usize, FilterError> {
        self.indices
            .get(index)
            .copied()
            .ok_or(FilterError::PointIndexOutOfBounds {
                index,
                num_points: self.indices.len(),
            })
    }
}
