//! FilterError: unified error type for the exchanger and normalization APIs.
//!
//! Every public operation returns `Result<_, FilterError>`. Fatal conditions
//! (degenerate rows, protocol mismatches) carry the row, rank, or step involved
//! so the enclosing run can abort with a descriptive message.

use thiserror::Error;

/// Unified error type for kernel-filter exchange and normalization.
#[derive(Debug, Error)]
pub enum FilterError {
    /// A row's total weight is exactly zero and cannot be row-sum normalized.
    #[error("degenerate row {row}: total weight {total} cannot be normalized")]
    DegenerateRow { row: usize, total: f64 },
    /// A dense reproducing-conditions solve failed (singular or non-pivotable).
    #[error("dense solve with {constraints} constraints is singular")]
    SingularSystem { constraints: usize },
    /// Transport failure talking to a neighbouring rank.
    #[error("communication error with rank {neighbor}: {source}")]
    CommError {
        neighbor: usize,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    /// A message arrived with a different record count than the protocol expects.
    #[error("{step}: rank {neighbor} sent {found} values, expected {expected}")]
    MessageLengthMismatch {
        neighbor: usize,
        step: &'static str,
        expected: usize,
        found: usize,
    },
    /// A wire buffer could not be decoded.
    #[error("wire decode error: {0}")]
    WireDecode(String),
    /// Row index past the end of a sparse block.
    #[error("row {row} out of bounds for block with {num_rows} rows")]
    RowIndexOutOfBounds { row: usize, num_rows: usize },
    /// Column index past the end of a sparse block.
    #[error("column {column} out of bounds for block with {num_columns} columns")]
    ColumnIndexOutOfBounds { column: usize, num_columns: usize },
    /// `set_row` was handed a different number of weights than the row stores.
    #[error("row {row} stores {expected} nonzeros, got {found} weights")]
    RowLengthMismatch {
        row: usize,
        expected: usize,
        found: usize,
    },
    /// A nonlocal column has no coordinates in the neighbour's point list.
    #[error("column {column} of rank {rank}'s block has no nonlocal point")]
    MissingNonlocalPoint { rank: usize, column: usize },
    /// A neighbour listed in the protocol has no row block on this rank.
    #[error("no row block for neighbouring rank {0}")]
    MissingNeighborBlock(usize),
    /// A neighbour rank is this rank itself or outside the communicator.
    #[error("invalid neighbour rank {rank} (communicator size {size}, own rank {own})")]
    InvalidNeighbor { rank: usize, own: usize, size: usize },
    /// Point index past the end of a point cloud.
    #[error("point {index} out of bounds for cloud with {num_points} points")]
    PointIndexOutOfBounds { index: usize, num_points: usize },
    /// Local index past the end of the exchanger's index space.
    #[error("local index {index} out of bounds (len {len})")]
    IndexOutOfBounds { index: usize, len: usize },
    /// A vector handed to the exchanger has the wrong length.
    #[error("vector length mismatch: expected {expected}, found {found}")]
    VectorLengthMismatch { expected: usize, found: usize },
    /// Dense or block dimensions disagree.
    #[error("dimension mismatch: expected {expected}, found {found}")]
    DimensionMismatch { expected: usize, found: usize },
    /// Normalization was configured with an unsupported spatial dimension.
    #[error("unsupported spatial dimension {0} (expected 1, 2 or 3)")]
    InvalidDimension(usize),
    /// Two ranks flag the same point as owned.
    #[error("local index {local} is claimed by both rank {first} and rank {second}")]
    AmbiguousOwnership {
        local: usize,
        first: usize,
        second: usize,
    },
    /// No rank flags a held point as owned.
    #[error("local index {local} has no owning rank")]
    IncompleteOwnership { local: usize },
    /// The singular-pivot tolerance is negative or not finite.
    #[error("invalid singular tolerance {0} (expected a finite value >= 0)")]
    InvalidTolerance(f64),
    /// MPI could not be initialized (already initialized or unavailable).
    #[error("MPI initialization failed")]
    MpiInit,
}
