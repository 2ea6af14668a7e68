//! # lenspix
//!
//! Gravitational lensing of pixelized, flat-sky CMB maps.
//!
//! lenspix provides:
//! - Periodic pixel grids and map/Fourier fields, batched or grouped into composites
//! - A sparse bilinear lensing operator with forward, adjoint and inverse applications
//! - Reverse-mode gradients with respect to the field and the deflection potential
//! - Apodized analysis masks with point-source holes
//!
//! ## Quick Start
//!
//! ```rust
//! use lenspix::prelude::*;
//!
//! let grid = PixelGrid::from_arcmin(64, 64, 2.0).unwrap();
//! let phi = FlatMap::from_fn(grid, |i, j| 1e-7 * (i as f64 * 0.1).sin() * (j as f64 * 0.1).cos());
//! let lens = BilinearLens::new(phi).unwrap();
//!
//! let f: Field = FlatMap::white_noise(grid, 42).into();
//! let lensed = lens.apply(&f).unwrap();
//! let unlensed = lens.apply_inverse(&lensed).unwrap();
//! assert_eq!(unlensed.kind(), FieldKind::Scalar);
//! ```
//!
//! ## Gradients
//!
//! ```rust
//! use lenspix::prelude::*;
//!
//! let grid = PixelGrid::square(32, 1.0).unwrap();
//! let phi = FlatMap::from_fn(grid, |i, _| 0.5 * (i as f64 * 0.2).cos());
//! let lens = BilinearLens::new(phi).unwrap();
//!
//! let f: Field = FlatMap::white_noise(grid, 1).into();
//! let (_y, tape) = lens.apply_with_tape(&f).unwrap();
//! let delta: Field = FlatMap::white_noise(grid, 2).into();
//! let grad = lens.pullback(&tape, &delta).unwrap();
//! assert_eq!(grad.deflection.grid(), grid);
//! ```
//!
//! ## Features
//!
//! - `cuda` - Build and apply lensing matrices on NVIDIA GPUs
//! - `full` - Enable all optional features

// Re-export member crates
pub use lenspix_core as core;
pub use lenspix_lensing as lensing;
pub use lenspix_solver as solver;

#[cfg(feature = "cuda")]
pub use lenspix_backend_cuda as backend_cuda;

// ============================================================================
// Convenient re-exports from lenspix_core
// ============================================================================

pub use lenspix_core::{
    // Units
    ARCMIN,
    DEGREE,
    // Errors
    Error as CoreError,
    // Fields
    Field,
    FieldKind,
    FlatField,
    FlatFourier,
    FlatMap,
    // Grid
    PixelGrid,
    // Masks
    MaskConfig,
    make_mask,
    // Spectral derivatives
    gradient,
    gradient_adjoint,
};

// ============================================================================
// Convenient re-exports from lenspix_solver
// ============================================================================

pub use lenspix_solver::{
    // Backends
    ComputeBackend,
    // Sparse matrices
    CsrMatrix,
    // Errors
    Error as SolverError,
    // GMRES
    GmresConfig,
    GmresResult,
    solve_gmres,
};

// ============================================================================
// Convenient re-exports from lenspix_lensing
// ============================================================================

pub use lenspix_lensing::{
    AdjointLens,
    // Operator
    BilinearLens,
    InverseReport,
    // Errors
    LensError,
    LensingConfig,
    // Gradients
    LensingGradient,
    LensingMatrix,
    LensingTape,
};

// ============================================================================
// Prelude module for convenient imports
// ============================================================================

/// Prelude module containing commonly used types.
///
/// ```rust
/// use lenspix::prelude::*;
/// ```
pub mod prelude {
    // Fields and grids
    pub use crate::{Field, FieldKind, FlatMap, PixelGrid};

    // Lensing
    pub use crate::{BilinearLens, ComputeBackend, LensError, LensingConfig};

    // Masks
    pub use crate::{MaskConfig, make_mask};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prelude_lensing() {
        use crate::prelude::*;

        let grid = PixelGrid::square(8, 1.0).unwrap();
        let lens = BilinearLens::new(FlatMap::zeros(grid)).unwrap();
        assert!(lens.is_identity());
        assert_eq!(lens.backend(), &ComputeBackend::Cpu);
    }

    #[test]
    fn test_masked_lensing() {
        let grid = PixelGrid::from_arcmin(64, 64, 4.0).unwrap();
        let mask = make_mask(
            &grid,
            &MaskConfig::default()
                .with_edge_padding(0.5)
                .with_edge_rounding(0.25)
                .with_apodization(0.5)
                .with_seed(3),
        )
        .unwrap();
        let phi = FlatMap::from_fn(grid, |i, _| 2e-7 * (i as f64 * 0.1).sin());
        let lens = BilinearLens::new(phi).unwrap();

        let lensed = lens.apply(&mask.into()).unwrap();
        let lensed = lensed.as_map().unwrap();
        assert!(lensed.data().iter().all(|&v| (-1e-12..=1.0 + 1e-12).contains(&v)));
    }

    #[test]
    fn test_logdet_unsupported() {
        let grid = PixelGrid::square(8, 1.0).unwrap();
        let lens = BilinearLens::new(FlatMap::zeros(grid)).unwrap();
        assert!(matches!(lens.logdet(), Err(LensError::UnsupportedOperation(_))));
    }
}
