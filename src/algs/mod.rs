//! Distributed algorithms: transport, halo exchange, and normalization.

pub mod communicator;
pub mod exchanger;
pub mod normalization;
pub mod wire;

pub use exchanger::ParallelExchanger;
pub use normalization::{MatrixNormalizationAgent, NormalizationConfig, NormalizationReport};
