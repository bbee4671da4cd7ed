//! Error types for analysis and optimization operations.

use thiserror::Error;

/// Result type alias using the crate error.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while building, solving or optimizing a model.
#[derive(Error, Debug)]
pub enum Error {
    /// Caller-supplied argument is malformed (wrong structure kind for a
    /// geometry, zero mesh size, unknown solver or load case, bad handle).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Invalid material or section properties.
    #[error("invalid material: {0}")]
    InvalidMaterial(String),

    /// Mesh-related errors.
    #[error("mesh error: {0}")]
    Mesh(String),

    /// Element-related errors (degenerate or inverted geometry).
    #[error("element error: {0}")]
    Element(String),

    /// Assembly errors.
    #[error("assembly error: {0}")]
    Assembly(String),

    /// Solver errors.
    #[error("solver error: {0}")]
    Solver(String),

    /// Matrix singularity or conditioning issues.
    #[error("singular matrix: {0}")]
    SingularMatrix(String),

    /// Failure inside the convex subproblem solver.
    #[error("optimization error: {0}")]
    Optimization(String),
}
