//! CUDA backend for lenspix lensing matrices.
//!
//! Provides a device context with runtime-compiled kernels, a bilinear
//! lensing-matrix builder running on the GPU, and device-resident CSR
//! matrices implementing the solver's operator traits.

pub mod context;
pub mod error;
pub mod kernels;
pub mod sparse_matrix;

pub use context::{CudaContext, DEFAULT_DEVICE};
pub use error::{CudaError, Result};
pub use kernels::LensingKernels;
pub use sparse_matrix::{CudaCsrMatrix, CudaTransposed};
