//! Dense solves for the per-row constraint systems.
//!
//! The systems are tiny (at most 10×10) and symmetric, but may be exactly or
//! numerically singular when a row's points do not span the requested
//! polynomial space. Singularity is reported as
//! [`FilterError::SingularSystem`] so the caller can retry with fewer
//! constraints.

use ndarray::{Array1, Array2};

use crate::filter_error::FilterError;

/// Dense linear solver used by reproducing-conditions normalization.
pub trait DenseSolver: Send + Sync {
    fn solve(&self, a: &Array2<f64>, b: &Array1<f64>) -> Result<Array1<f64>, FilterError>;
}

/// Gaussian elimination with partial pivoting on the symmetrically scaled
/// system `D⁻¹·A·D⁻¹`, `dᵢ = √|aᵢᵢ|` (or the row's largest magnitude when the
/// diagonal vanishes).
///
/// A scaled pivot whose magnitude is at most `tolerance × max|ãᵢⱼ|` marks the
/// system singular. Moment matrices of rescaled coordinates differ only by a
/// diagonal congruence, so the decision does not depend on mesh units.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PivotedLu {
    pub tolerance: f64,
}

impl Default for PivotedLu {
    fn default() -> Self {
        Self { tolerance: 1e-12 }
    }
}

impl DenseSolver for PivotedLu {
    fn solve(&self, a: &Array2<f64>, b: &Array1<f64>) -> Result<Array1<f64>, FilterError> {
        let n = a.nrows();
        if a.ncols() != n {
            return Err(FilterError::DimensionMismatch {
                expected: n,
                found: a.ncols(),
            });
        }
        if b.len() != n {
            return Err(FilterError::DimensionMismatch {
                expected: n,
                found: b.len(),
            });
        }

        let d = match jacobi_scaling(a) {
            Some(d) => d,
            None => return Err(FilterError::SingularSystem { constraints: n }),
        };
        let mut lu = Array2::from_shape_fn((n, n), |(i, j)| a[[i, j]] / (d[i] * d[j]));
        let mut x = Array1::from_shape_fn(n, |i| b[i] / d[i]);

        let scale = lu.iter().fold(0.0f64, |m, v| m.max(v.abs()));
        let threshold = self.tolerance * scale;
        if !(scale > 0.0) || !scale.is_finite() {
            return Err(FilterError::SingularSystem { constraints: n });
        }

        for k in 0..n {
            let mut max_row = k;
            let mut max_val = lu[[k, k]].abs();
            for i in (k + 1)..n {
                let val = lu[[i, k]].abs();
                if val > max_val {
                    max_val = val;
                    max_row = i;
                }
            }
            if max_val <= threshold {
                return Err(FilterError::SingularSystem { constraints: n });
            }
            if max_row != k {
                for j in 0..n {
                    lu.swap([k, j], [max_row, j]);
                }
                x.swap(k, max_row);
            }

            let pivot = lu[[k, k]];
            for i in (k + 1)..n {
                let mult = lu[[i, k]] / pivot;
                if mult == 0.0 {
                    continue;
                }
                for j in k..n {
                    let update = mult * lu[[k, j]];
                    lu[[i, j]] -= update;
                }
                x[i] -= mult * x[k];
            }
        }

        for i in (0..n).rev() {
            let mut acc = x[i];
            for j in (i + 1)..n {
                acc -= lu[[i, j]] * x[j];
            }
            x[i] = acc / lu[[i, i]];
        }
        Ok(x / &d)
    }
}

/// Square roots of the diagonal magnitudes; `None` for an all-zero or
/// non-finite row.
fn jacobi_scaling(a: &Array2<f64>) -> Option<Array1<f64>> {
    let mut d = Array1::zeros(a.nrows());
    for (i, row) in a.rows().into_iter().enumerate() {
        let diag = row[i].abs();
        let mag = if diag > 0.0 {
            diag
        } else {
            row.iter().fold(0.0f64, |m, v| m.max(v.abs()))
        };
        if !(mag > 0.0) || !mag.is_finite() {
            return None;
        }
        d[i] = mag.sqrt();
    }
    Some(d)
}
