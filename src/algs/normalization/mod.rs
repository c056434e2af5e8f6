//! Kernel filter normalization.
//!
//! [`MatrixNormalizationAgent::normalize`] rewrites the weights of every row
//! of a rank's kernel blocks in place, keeping the sparsity pattern, and then
//! exchanges the normalized row blocks with neighbouring ranks.
//!
//! Row sums are always accumulated local block first, then neighbour blocks in
//! ascending rank, so results are reproducible for a fixed partitioning.

pub mod block_exchange;
pub mod config;
pub mod reproducing;

use std::collections::BTreeMap;

use hashbrown::HashMap;
use log::{debug, warn};
use serde::{Deserialize, Serialize};

pub use config::{NormalizationConfig, NormalizationStrategy, ReproductionLevel};
use reproducing::{RowProblem, RowSolution, solve_row};

use crate::algs::communicator::Communicator;
use crate::data::dense::{DenseSolver, PivotedLu};
use crate::data::point_cloud::PointProvider;
use crate::data::sparse::KernelBlocks;
use crate::filter_error::FilterError;

/// A row whose reproducing solve fell below the level it started at.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct RowDegradation {
    pub row: usize,
    pub requested: ReproductionLevel,
    pub achieved: ReproductionLevel,
}

/// Outcome of one normalization pass on this rank.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct NormalizationReport {
    /// Rows with at least one stored weight.
    pub rows: usize,
    pub degraded_rows: Vec<RowDegradation>,
}

impl NormalizationReport {
    /// No row had to step down the ladder.
    pub fn is_exact(&self) -> bool {
        self.degraded_rows.is_empty()
    }
}

/// Coordinates of nonlocal columns, keyed by neighbour rank then column.
struct NonlocalLookup<'a, P> {
    providers: &'a BTreeMap<usize, P>,
    positions: BTreeMap<usize, HashMap<usize, usize>>,
}

impl<'a, P: PointProvider> NonlocalLookup<'a, P> {
    fn new(providers: &'a BTreeMap<usize, P>) -> Result<Self, FilterError> {
        let mut positions = BTreeMap::new();
        for (&rank, provider) in providers {
            let n = provider.get_num_points();
            let mut map = HashMap::with_capacity(n);
            for i in 0..n {
                map.insert(provider.get_index(i)?, i);
            }
            positions.insert(rank, map);
        }
        Ok(Self {
            providers,
            positions,
        })
    }

    fn point(&self, rank: usize, column: usize) -> Result<[f64; 3], FilterError> {
        let position = self.positions.get(&rank).and_then(|m| m.get(&column));
        match (self.providers.get(&rank), position) {
            (Some(provider), Some(&i)) => provider.get_point(i),
            _ => Err(FilterError::MissingNonlocalPoint { rank, column }),
        }
    }
}

#[inline]
fn offset(p: [f64; 3], center: [f64; 3]) -> [f64; 3] {
    [p[0] - center[0], p[1] - center[1], p[2] - center[2]]
}

/// Normalizes distributed kernel filter rows.
#[derive(Clone, Debug)]
pub struct MatrixNormalizationAgent<S: DenseSolver = PivotedLu> {
    config: NormalizationConfig,
    solver: S,
}

impl MatrixNormalizationAgent<PivotedLu> {
    pub fn new(config: NormalizationConfig) -> Self {
        let solver = PivotedLu {
            tolerance: config.singular_tolerance,
        };
        Self { config, solver }
    }
}

impl<S: DenseSolver> MatrixNormalizationAgent<S> {
    pub fn with_solver(config: NormalizationConfig, solver: S) -> Self {
        Self { config, solver }
    }

    pub fn config(&self) -> &NormalizationConfig {
        &self.config
    }

    /// Normalize every row of `kernel`, then exchange row blocks with the
    /// given neighbours. Collective over `comm`: every rank listed as a
    /// neighbour must call it with the mirrored lists.
    ///
    /// `points` holds this rank's coordinates by local index;
    /// `nonlocal_points[q]` holds neighbour `q`'s points, each carrying the
    /// column index it occupies in `kernel.row_blocks[q]`.
    pub fn normalize<C, P>(
        &self,
        comm: &C,
        points: &P,
        nonlocal_points: &BTreeMap<usize, P>,
        kernel: &mut KernelBlocks,
        below: &[usize],
        above: &[usize],
    ) -> Result<NormalizationReport, FilterError>
    where
        C: Communicator,
        P: PointProvider,
    {
        let report = self.normalize_local(points, nonlocal_points, kernel)?;
        block_exchange::exchange_blocks(comm, kernel, nonlocal_points, below, above)?;
        Ok(report)
    }

    /// The communication-free part of [`normalize`](Self::normalize).
    pub fn normalize_local<P: PointProvider>(
        &self,
        points: &P,
        nonlocal_points: &BTreeMap<usize, P>,
        kernel: &mut KernelBlocks,
    ) -> Result<NormalizationReport, FilterError> {
        self.config.validate()?;
        let report = match self.config.strategy {
            NormalizationStrategy::ClassicalRowSum => classical_row_sum(kernel)?,
            _ => self.reproducing(points, nonlocal_points, kernel)?,
        };
        debug!(
            "normalized {} rows ({:?}, {:?}), {} degraded",
            report.rows,
            self.config.strategy,
            self.config.reproduction,
            report.degraded_rows.len()
        );
        Ok(report)
    }

    /// Normalize a single row across all blocks. Returns the degradation if
    /// the row fell down the ladder.
    pub fn normalize_block_row<P: PointProvider>(
        &self,
        points: &P,
        nonlocal_points: &BTreeMap<usize, P>,
        kernel: &mut KernelBlocks,
        row: usize,
    ) -> Result<Option<RowDegradation>, FilterError> {
        self.config.validate()?;
        let lookup = NonlocalLookup::new(nonlocal_points)?;
        let problem = gather_row(points, &lookup, kernel, row)?;
        if problem.weights.is_empty() {
            return Ok(None);
        }
        let solution = self.solve(&problem)?;
        scatter_row(kernel, row, &solution.weights)?;
        Ok(degradation(row, &solution))
    }

    fn solve(&self, problem: &RowProblem) -> Result<RowSolution, FilterError> {
        solve_row(
            &self.solver,
            self.config.strategy,
            self.config.reproduction,
            self.config.dimension,
            problem,
        )
    }

    fn reproducing<P: PointProvider>(
        &self,
        points: &P,
        nonlocal_points: &BTreeMap<usize, P>,
        kernel: &mut KernelBlocks,
    ) -> Result<NormalizationReport, FilterError> {
        let lookup = NonlocalLookup::new(nonlocal_points)?;
        let mut problems = Vec::with_capacity(kernel.local.num_rows());
        for row in 0..kernel.local.num_rows() {
            let problem = gather_row(points, &lookup, kernel, row)?;
            if !problem.weights.is_empty() {
                problems.push(problem);
            }
        }

        #[cfg(feature = "rayon")]
        let solutions: Vec<Result<RowSolution, FilterError>> = {
            use rayon::prelude::*;
            problems.par_iter().map(|p| self.solve(p)).collect()
        };
        #[cfg(not(feature = "rayon"))]
        let solutions: Vec<Result<RowSolution, FilterError>> =
            problems.iter().map(|p| self.solve(p)).collect();

        let mut report = NormalizationReport {
            rows: problems.len(),
            degraded_rows: Vec::new(),
        };
        for (problem, solution) in problems.iter().zip(solutions) {
            let solution = solution?;
            scatter_row(kernel, problem.row, &solution.weights)?;
            if let Some(d) = degradation(problem.row, &solution) {
                report.degraded_rows.push(d);
            }
        }
        Ok(report)
    }
}

fn degradation(row: usize, solution: &RowSolution) -> Option<RowDegradation> {
    if solution.achieved >= solution.requested {
        return None;
    }
    warn!(
        "row {row}: reproduction degraded from {:?} to {:?}",
        solution.requested, solution.achieved
    );
    Some(RowDegradation {
        row,
        requested: solution.requested,
        achieved: solution.achieved,
    })
}

fn classical_row_sum(kernel: &mut KernelBlocks) -> Result<NormalizationReport, FilterError> {
    let num_rows = kernel.local.num_rows();
    let mut factors = vec![1.0; num_rows];
    let mut rows = 0;
    for (row, factor) in factors.iter_mut().enumerate() {
        if kernel.row_nnz(row)? == 0 {
            continue;
        }
        let total = kernel.row_total(row)?;
        if total == 0.0 {
            return Err(FilterError::DegenerateRow { row, total });
        }
        *factor = 1.0 / total;
        rows += 1;
    }
    kernel.local.row_normalize(&factors)?;
    for block in kernel.row_blocks.values_mut() {
        block.row_normalize(&factors)?;
    }
    Ok(NormalizationReport {
        rows,
        degraded_rows: Vec::new(),
    })
}

fn gather_row<P: PointProvider>(
    points: &P,
    lookup: &NonlocalLookup<'_, P>,
    kernel: &KernelBlocks,
    row: usize,
) -> Result<RowProblem, FilterError> {
    let mut problem = RowProblem {
        row,
        weights: Vec::new(),
        offsets: Vec::new(),
    };
    let (weights, columns) = kernel.local.get_row(row)?;
    if kernel.row_nnz(row)? == 0 {
        return Ok(problem);
    }
    let center = points.get_point(row)?;
    for (&w, &c) in weights.iter().zip(columns) {
        problem.weights.push(w);
        problem.offsets.push(offset(points.get_point(c)?, center));
    }
    for (&rank, block) in &kernel.row_blocks {
        let (weights, columns) = block.get_row(row)?;
        for (&w, &c) in weights.iter().zip(columns) {
            problem.weights.push(w);
            problem.offsets.push(offset(lookup.point(rank, c)?, center));
        }
    }
    Ok(problem)
}

fn scatter_row(kernel: &mut KernelBlocks, row: usize, weights: &[f64]) -> Result<(), FilterError> {
    let expected = kernel.row_nnz(row)?;
    if weights.len() != expected {
        return Err(FilterError::RowLengthMismatch {
            row,
            expected,
            found: weights.len(),
        });
    }
    let n_local = kernel.local.get_row(row)?.0.len();
    let (head, mut rest) = weights.split_at(n_local);
    kernel.local.set_row(row, head)?;
    for block in kernel.row_blocks.values_mut() {
        let len = block.get_row(row)?.0.len();
        let (head, tail) = rest.split_at(len);
        block.set_row(row, head)?;
        rest = tail;
    }
    Ok(())
}
