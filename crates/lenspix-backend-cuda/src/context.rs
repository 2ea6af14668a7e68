//! Per-device CUDA state.

use std::sync::Arc;

use cudarc::driver::{CudaContext as CudarcContext, CudaStream};

use crate::error::{CudaError, Result};
use crate::kernels::LensingKernels;

/// A device, its default stream, and the lensing kernels compiled for it.
///
/// Creating a context compiles the kernels with nvrtc, so callers should make
/// one per device and share it.
pub struct CudaContext {
    device_id: usize,
    pub(crate) ctx: Arc<CudarcContext>,
    pub(crate) stream: Arc<CudaStream>,
    pub(crate) kernels: LensingKernels,
}

/// Ordinal used by [`CudaContext::new`].
pub const DEFAULT_DEVICE: usize = 0;

/// Driver messages that mean the ordinal does not name a usable device.
const NO_DEVICE_MARKERS: [&str; 4] = [
    "no CUDA-capable device",
    "invalid device",
    "ordinal",
    "NO_DEVICE",
];

fn classify_init_error(device_id: usize, reason: String) -> CudaError {
    if NO_DEVICE_MARKERS.iter().any(|m| reason.contains(m)) {
        CudaError::NoDevice
    } else {
        CudaError::DeviceInit { device_id, reason }
    }
}

impl CudaContext {
    /// Context on [`DEFAULT_DEVICE`].
    pub fn new() -> Result<Self> {
        Self::with_device(DEFAULT_DEVICE)
    }

    /// Context on device `device_id`.
    ///
    /// # Errors
    ///
    /// `CudaError::NoDevice` if the ordinal does not exist,
    /// `CudaError::DeviceInit` for other driver failures, and
    /// `CudaError::Compile` if the lensing kernels fail to build.
    pub fn with_device(device_id: usize) -> Result<Self> {
        let ctx = CudarcContext::new(device_id)
            .map_err(|e| classify_init_error(device_id, e.to_string()))?;
        let stream = ctx.default_stream();
        let kernels = LensingKernels::new(&ctx)?;

        log::info!("CUDA lensing context ready on device {}", device_id);

        Ok(Self {
            device_id,
            ctx,
            stream,
            kernels,
        })
    }

    pub fn device_id(&self) -> usize {
        self.device_id
    }

    pub fn stream(&self) -> &Arc<CudaStream> {
        &self.stream
    }

    pub fn cuda_context(&self) -> &Arc<CudarcContext> {
        &self.ctx
    }

    /// Wait for all work queued on the stream.
    pub fn synchronize(&self) -> Result<()> {
        self.stream
            .synchronize()
            .map_err(|e| CudaError::Transfer(format!("stream synchronize: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_ordinal_maps_to_no_device() {
        let err = classify_init_error(4, "CUDA_ERROR_INVALID_DEVICE: invalid device ordinal".into());
        assert!(matches!(err, CudaError::NoDevice));

        let err = classify_init_error(0, "CUDA_ERROR_NO_DEVICE".into());
        assert!(matches!(err, CudaError::NoDevice));
    }

    #[test]
    fn test_other_failures_keep_reason() {
        let err = classify_init_error(1, "CUDA_ERROR_OUT_OF_MEMORY".into());
        match err {
            CudaError::DeviceInit { device_id, reason } => {
                assert_eq!(device_id, 1);
                assert!(reason.contains("OUT_OF_MEMORY"));
            }
            other => panic!("unexpected error: {}", other),
        }
    }
}
