//! Errors raised by the CUDA lensing backend.

use std::fmt;

#[derive(Debug)]
pub enum CudaError {
    /// The driver could not create a context on the device.
    DeviceInit { device_id: usize, reason: String },
    /// No device with the requested ordinal.
    NoDevice,
    /// nvrtc rejected the kernel source, or the module failed to load.
    Compile(String),
    /// A kernel launch was rejected by the driver.
    Launch { kernel: &'static str, reason: String },
    MemoryAlloc(String),
    /// Host/device copy failed.
    Transfer(String),
    /// Buffer lengths or grid sizes that the kernels cannot index.
    InvalidDimension(String),
}

impl fmt::Display for CudaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CudaError::DeviceInit { device_id, reason } => {
                write!(f, "cannot initialize CUDA device {}: {}", device_id, reason)
            }
            CudaError::NoDevice => write!(f, "no CUDA device available"),
            CudaError::Compile(msg) => write!(f, "lensing kernel compilation failed: {}", msg),
            CudaError::Launch { kernel, reason } => {
                write!(f, "launch of {} failed: {}", kernel, reason)
            }
            CudaError::MemoryAlloc(msg) => write!(f, "device allocation failed: {}", msg),
            CudaError::Transfer(msg) => write!(f, "host/device transfer failed: {}", msg),
            CudaError::InvalidDimension(msg) => write!(f, "invalid dimension: {}", msg),
        }
    }
}

impl std::error::Error for CudaError {}

pub type Result<T> = std::result::Result<T, CudaError>;
