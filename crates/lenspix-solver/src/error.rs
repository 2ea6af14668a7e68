//! Error types for lenspix-solver.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid dimensions: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("invalid sparse structure: {0}")]
    InvalidStructure(String),

    #[error("solver error: {0}")]
    SolverError(String),
}

pub type Result<T> = std::result::Result<T, Error>;
