//! Error types for lenspix-core.

use thiserror::Error;

use crate::grid::PixelGrid;

#[derive(Debug, Error)]
pub enum Error {
    #[error("grid must be at least 2x2 pixels, got {nx}x{ny}")]
    InvalidGrid { nx: usize, ny: usize },

    #[error("pixel size must be positive and finite, got {0}")]
    InvalidPixelSize(f64),

    #[error("field data length mismatch: expected {expected}, got {actual}")]
    DataLength { expected: usize, actual: usize },

    #[error("field grids differ: {left} vs {right}")]
    GridMismatch { left: PixelGrid, right: PixelGrid },

    #[error("batch size mismatch: expected {expected}, got {actual}")]
    BatchMismatch { expected: usize, actual: usize },

    #[error("composite field structure mismatch")]
    StructureMismatch,

    #[error("invalid mask parameter: {0}")]
    InvalidMaskParameter(String),
}

pub type Result<T> = std::result::Result<T, Error>;
