//! Topology optimization.
//!
//! - [`mma`]: the Method of Moving Asymptotes subsolver
//! - [`simp`]: SIMP compliance minimization over an [`crate::model::AnalysisModel`]

pub mod mma;
pub mod simp;

pub use mma::{mma_update, MmaInput, MmaSettings, MmaState, MmaUpdate};
pub use simp::{OptimizationReport, TopologyOptimizer, TopologySettings};
