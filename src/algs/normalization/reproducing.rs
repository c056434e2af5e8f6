//! Per-row weight correction.
//!
//! A row is the concatenation of its local and nonlocal weights together with
//! each column's coordinate offset from the row's centre. The constraint
//! matrix `C` holds one monomial of the offsets per row, ordered
//! `1, dx, dy, dz, dx², dxdy, dxdz, dy², dydz, dz²` (truncated to the active
//! axes), so a lower level is always a row prefix of a higher one.

use log::trace;
use ndarray::{Array1, Array2, ArrayView2, s};

use super::config::{NormalizationStrategy, ReproductionLevel};
use crate::data::dense::DenseSolver;
use crate::filter_error::FilterError;

/// Gathered weights of one logical row.
#[derive(Clone, Debug, PartialEq)]
pub struct RowProblem {
    pub row: usize,
    pub weights: Vec<f64>,
    pub offsets: Vec<[f64; 3]>,
}

/// Corrected weights and the level they satisfy.
#[derive(Clone, Debug, PartialEq)]
pub struct RowSolution {
    pub weights: Vec<f64>,
    /// Level attempted first, after capping by row size.
    pub requested: ReproductionLevel,
    pub achieved: ReproductionLevel,
}

/// Build `C` for `level` over `dimension` axes.
pub fn constraint_matrix(
    offsets: &[[f64; 3]],
    dimension: usize,
    level: ReproductionLevel,
) -> Array2<f64> {
    let mut c = Array2::zeros((level.num_constraints(dimension), offsets.len()));
    for (j, d) in offsets.iter().enumerate() {
        let mut column = c.column_mut(j);
        column[0] = 1.0;
        let mut r = 1;
        if level >= ReproductionLevel::Linear {
            for a in 0..dimension {
                column[r] = d[a];
                r += 1;
            }
        }
        if level >= ReproductionLevel::Quadratic {
            for a in 0..dimension {
                for b in a..dimension {
                    column[r] = d[a] * d[b];
                    r += 1;
                }
            }
        }
    }
    c
}

/// `w / Σw`, rescaling by the reciprocal of the total.
pub fn row_sum_normalize(row: usize, weights: &[f64]) -> Result<Vec<f64>, FilterError> {
    let total: f64 = weights.iter().sum();
    if total == 0.0 {
        return Err(FilterError::DegenerateRow { row, total });
    }
    let factor = 1.0 / total;
    Ok(weights.iter().map(|w| w * factor).collect())
}

fn unit_target(n: usize) -> Array1<f64> {
    let mut e0 = Array1::zeros(n);
    e0[0] = 1.0;
    e0
}

/// Correction-function form: `w' = diag(w)·Cᵗ·λ` with `(C·diag(w)·Cᵗ)·λ = e₀`.
pub fn solve_correction_function<S: DenseSolver>(
    solver: &S,
    c: ArrayView2<'_, f64>,
    weights: &Array1<f64>,
) -> Result<Array1<f64>, FilterError> {
    let c_w = &c * weights;
    let system = c_w.dot(&c.t());
    let lambda = solver.solve(&system, &unit_target(c.nrows()))?;
    Ok(c_w.t().dot(&lambda))
}

/// Minimal-change form: `w' = w₀ + Cᵗ·μ` with `(C·Cᵗ)·μ = e₀ − C·w₀`.
pub fn solve_minimal_change<S: DenseSolver>(
    solver: &S,
    c: ArrayView2<'_, f64>,
    normalized: &Array1<f64>,
) -> Result<Array1<f64>, FilterError> {
    let system = c.dot(&c.t());
    let target = unit_target(c.nrows()) - c.dot(normalized);
    let mu = solver.solve(&system, &target)?;
    Ok(normalized + &c.t().dot(&mu))
}

/// Correct one row, stepping down the ladder on singular solves.
///
/// The starting level is `reproduction` capped by what the row's entry count
/// can support. Every rung is tried at most once. The correction-function form
/// works on the raw weights; a zero total is only fatal once a row-sum
/// (minimal-change start or constant rung) is needed.
pub fn solve_row<S: DenseSolver>(
    solver: &S,
    strategy: NormalizationStrategy,
    reproduction: ReproductionLevel,
    dimension: usize,
    problem: &RowProblem,
) -> Result<RowSolution, FilterError> {
    let RowProblem {
        row,
        weights,
        offsets,
    } = problem;
    if weights.len() != offsets.len() {
        return Err(FilterError::DimensionMismatch {
            expected: weights.len(),
            found: offsets.len(),
        });
    }
    if strategy == NormalizationStrategy::ClassicalRowSum {
        return Ok(RowSolution {
            weights: row_sum_normalize(*row, weights)?,
            requested: ReproductionLevel::Constant,
            achieved: ReproductionLevel::Constant,
        });
    }

    let requested = reproduction.min(ReproductionLevel::supported_by(weights.len(), dimension));
    let c = constraint_matrix(offsets, dimension, requested);
    let initial = match strategy {
        NormalizationStrategy::MinimalChange => Array1::from(row_sum_normalize(*row, weights)?),
        _ => Array1::from(weights.clone()),
    };

    let mut level = requested;
    while let Some(lower) = level.lower() {
        let m = level.num_constraints(dimension);
        let view = c.slice(s![..m, ..]);
        let attempt = match strategy {
            NormalizationStrategy::MinimalChange => solve_minimal_change(solver, view, &initial),
            _ => solve_correction_function(solver, view, &initial),
        };
        match attempt {
            Ok(w) => {
                return Ok(RowSolution {
                    weights: w.to_vec(),
                    requested,
                    achieved: level,
                });
            }
            Err(FilterError::SingularSystem { constraints }) => {
                trace!("row {row}: singular {constraints}x{constraints} system, retrying at {lower:?}");
                level = lower;
            }
            Err(e) => return Err(e),
        }
    }
    Ok(RowSolution {
        weights: row_sum_normalize(*row, weights)?,
        requested,
        achieved: ReproductionLevel::Constant,
    })
}
