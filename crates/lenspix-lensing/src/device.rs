//! Compute-device lookup for lensing matrices.
//!
//! CUDA contexts are created once per device ordinal and shared by every
//! matrix placed on that device. Without the `cuda` feature, requesting a GPU
//! backend fails with [`LensError::BackendUnavailable`].

use lenspix_solver::ComputeBackend;

use crate::error::{LensError, Result};

#[cfg(feature = "cuda")]
mod cuda {
    use std::collections::HashMap;
    use std::sync::{Arc, LazyLock};

    use lenspix_backend_cuda::CudaContext;
    use parking_lot::Mutex;

    use crate::error::{LensError, Result};

    static CONTEXTS: LazyLock<Mutex<HashMap<usize, Arc<CudaContext>>>> =
        LazyLock::new(|| Mutex::new(HashMap::new()));

    /// Shared context for `device_id`, created on first use.
    pub fn context(device_id: usize) -> Result<Arc<CudaContext>> {
        let mut contexts = CONTEXTS.lock();
        if let Some(ctx) = contexts.get(&device_id) {
            return Ok(Arc::clone(ctx));
        }

        // cudarc panics if the driver library cannot be loaded
        let ctx = std::panic::catch_unwind(|| CudaContext::with_device(device_id))
            .map_err(|_| {
                LensError::BackendUnavailable("CUDA driver library could not be loaded".into())
            })??;
        let ctx = Arc::new(ctx);
        contexts.insert(device_id, Arc::clone(&ctx));
        Ok(ctx)
    }
}

#[cfg(feature = "cuda")]
pub use cuda::context as cuda_context;

pub(crate) fn cuda_not_compiled(device_id: usize) -> LensError {
    LensError::BackendUnavailable(format!(
        "CUDA device {} requested but CUDA sparse support is not compiled in \
         (rebuild with `--features cuda`)",
        device_id
    ))
}

/// Check that `backend` can hold lensing matrices.
pub fn ensure_available(backend: &ComputeBackend) -> Result<()> {
    match backend {
        ComputeBackend::Cpu => Ok(()),
        #[cfg(feature = "cuda")]
        ComputeBackend::Cuda { device_id } => cuda_context(*device_id).map(|_| ()),
        #[cfg(not(feature = "cuda"))]
        ComputeBackend::Cuda { device_id } => Err(cuda_not_compiled(*device_id)),
    }
}
