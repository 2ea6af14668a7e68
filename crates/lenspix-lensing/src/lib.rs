//! Bilinear-interpolation lensing of flat-sky CMB maps.
//!
//! This crate provides:
//! - The bilinear stencil and the sparse lensing matrix builders (rayon on
//!   the CPU, an nvrtc kernel on CUDA devices with the `cuda` feature)
//! - [`BilinearLens`], with forward, adjoint and GMRES-based inverse
//!   applications preconditioned by a lazily built anti-lensing matrix
//! - The reverse-mode pullback with respect to the field and deflection
//!
//! # Example
//!
//! ```
//! use lenspix_core::{Field, FlatMap, PixelGrid};
//! use lenspix_lensing::BilinearLens;
//!
//! let grid = PixelGrid::square(32, 1.0).unwrap();
//! let phi = FlatMap::from_fn(grid, |i, _| 0.5 * (i as f64 * 0.2).sin());
//! let lens = BilinearLens::new(phi).unwrap();
//!
//! let f: Field = FlatMap::white_noise(grid, 7).into();
//! let lensed = lens.apply(&f).unwrap();
//! let delensed = lens.apply_inverse(&lensed).unwrap();
//! assert_eq!(delensed.leaves().len(), 1);
//! ```

pub mod builder;
pub mod cache;
pub mod device;
pub mod error;
pub mod kernel;
pub mod layout;
pub mod matrix;
pub mod operator;
pub mod pullback;

pub use builder::{DeflectedCoordinates, build_cpu};
pub use cache::AntiLensingCache;
pub use error::{LensError, Result};
pub use kernel::{BilinearStencil, bilinear_stencil};
pub use layout::{RowLayout, STENCIL_SIZE, row_layout};
pub use matrix::{Adjoint, Forward, LensingMatrix};
pub use operator::{
    AdjointLens, BilinearLens, DEFAULT_INVERSE_ITERATIONS, InverseReport, LensingConfig,
    SolveSummary,
};
pub use pullback::{LensingGradient, LensingTape};
pub use lenspix_solver::ComputeBackend;
