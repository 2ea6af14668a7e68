//! Error types for lenspix-lensing.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum LensError {
    #[error("unsupported operation: {0}")]
    UnsupportedOperation(&'static str),

    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("incompatible deflection field: {0}")]
    IncompatibleDeflection(String),

    #[error(transparent)]
    Field(#[from] lenspix_core::Error),

    #[error(transparent)]
    Solver(#[from] lenspix_solver::Error),

    #[error("tape was recorded by a lens with a different deflection")]
    TapeMismatch,

    #[error("backend error: {0}")]
    Backend(String),
}

#[cfg(feature = "cuda")]
impl From<lenspix_backend_cuda::CudaError> for LensError {
    fn from(err: lenspix_backend_cuda::CudaError) -> Self {
        use lenspix_backend_cuda::CudaError;
        match err {
            CudaError::NoDevice => {
                LensError::BackendUnavailable("no CUDA device with sparse support found".into())
            }
            err @ (CudaError::DeviceInit { .. } | CudaError::Compile(_)) => {
                LensError::BackendUnavailable(err.to_string())
            }
            other => LensError::Backend(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, LensError>;
