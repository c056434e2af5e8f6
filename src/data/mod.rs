//! Data module: sparse kernel blocks, dense solves, and point coordinates.

pub mod dense;
pub mod point_cloud;
pub mod sparse;

pub use dense::{DenseSolver, PivotedLu};
pub use point_cloud::{PointCloud, PointProvider};
pub use sparse::{KernelBlocks, RowBlockMatrix};
