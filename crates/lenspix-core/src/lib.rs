//! Flat-sky pixel grids, fields and masks for lenspix.
//!
//! This crate provides the data types the lensing operator acts on: periodic
//! pixel grids, map and Fourier-space fields (possibly batched or grouped
//! into composites), spectral derivatives, and apodized analysis masks.

pub mod error;
pub mod field;
pub mod fourier;
pub mod grid;
pub mod mask;
pub mod rng;

pub use error::{Error, Result};
pub use field::{Basis, Field, FieldKind, FlatField, FlatFourier, FlatMap};
pub use fourier::{FourierPlan, fourier_plan, gradient, gradient_adjoint};
pub use grid::{ARCMIN, DEGREE, PixelGrid};
pub use mask::{MaskConfig, make_mask};
