#![cfg_attr(docsrs, feature(doc_cfg))]
//! # kernel-filter-exchange
//!
//! kernel-filter-exchange is the distributed core of a kernel (smoothing)
//! filter for mesh-based design optimization. It tracks which partition owns
//! each replicated mesh point, moves boundary values between neighbouring
//! partitions, and normalizes a distributed sparse filter matrix so that it
//! reproduces constant, linear, or quadratic fields.
//!
//! ## Features
//! - Ownership and halo exchange over shared-point correspondences, or built
//!   directly from global point identifiers
//! - Classical row-sum and reproducing-conditions normalization with a
//!   degrade-and-retry ladder on singular solves
//! - Pluggable communication backends (serial, in-process threads, MPI)
//! - Optional `rayon` parallelism for the per-row dense solves
//!
//! ## Determinism
//!
//! Every protocol visits neighbours in a fixed rank order that all ranks agree
//! on, so no two ranks wait on each other. Row totals are summed local block first, then
//! neighbour blocks by ascending rank, so identical partitionings give
//! bit-identical results.
//!
//! ## Usage
//! ```toml
//! [dependencies]
//! kernel-filter-exchange = "0.1"
//! # Optional features:
//! # features = ["mpi-support","rayon"]
//! ```

pub mod algs;
pub mod data;
pub mod filter_error;

/// A convenient prelude to import the most-used traits & types:
pub mod prelude {
    #[cfg(feature = "mpi-support")]
    pub use crate::algs::communicator::MpiComm;
    pub use crate::algs::communicator::{Communicator, NoComm, RayonComm};
    pub use crate::algs::exchanger::ownership::Ownership;
    pub use crate::algs::exchanger::{ParallelExchanger, SharedPairs};
    pub use crate::algs::normalization::{
        MatrixNormalizationAgent, NormalizationConfig, NormalizationReport, NormalizationStrategy,
        ReproductionLevel, RowDegradation,
    };
    pub use crate::data::dense::{DenseSolver, PivotedLu};
    pub use crate::data::point_cloud::{PointCloud, PointProvider};
    pub use crate::data::sparse::{KernelBlocks, RowBlockMatrix};
    pub use crate::filter_error::FilterError;
}
