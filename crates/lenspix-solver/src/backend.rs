//! Compute backend selection.
//!
//! Provides [`ComputeBackend`] for choosing between CPU and CUDA execution at
//! runtime. The enum lives in `lenspix-solver` so all crates can reference it
//! without circular dependencies. Device probing happens where the matrices
//! are built.

use std::fmt;

/// The compute backend to use for matrix construction and application.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub enum ComputeBackend {
    /// CPU backend (always available).
    #[default]
    Cpu,
    /// NVIDIA CUDA backend.
    Cuda {
        /// CUDA device ordinal.
        device_id: usize,
    },
}

impl ComputeBackend {
    /// Parse a backend name.
    ///
    /// Accepts `"auto"`, `"cpu"`, `"cuda"` and `"cuda:N"` for a specific
    /// device. `"auto"` returns `Cpu`.
    pub fn from_name(name: &str) -> Option<Self> {
        let name = name.trim().to_lowercase();
        match name.as_str() {
            "auto" | "cpu" => Some(ComputeBackend::Cpu),
            "cuda" | "gpu" => Some(ComputeBackend::Cuda { device_id: 0 }),
            other => other
                .strip_prefix("cuda:")
                .and_then(|id| id.parse().ok())
                .map(|device_id| ComputeBackend::Cuda { device_id }),
        }
    }

    /// Short name for display.
    pub fn name(&self) -> &str {
        match self {
            ComputeBackend::Cpu => "CPU",
            ComputeBackend::Cuda { .. } => "CUDA",
        }
    }

    /// Whether data for this backend lives in device memory.
    pub fn is_gpu(&self) -> bool {
        matches!(self, ComputeBackend::Cuda { .. })
    }
}

impl fmt::Display for ComputeBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ComputeBackend::Cpu => write!(f, "CPU"),
            ComputeBackend::Cuda { device_id } => write!(f, "CUDA (device {})", device_id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_cpu() {
        assert_eq!(ComputeBackend::default(), ComputeBackend::Cpu);
        assert!(!ComputeBackend::Cpu.is_gpu());
    }

    #[test]
    fn test_from_name_variants() {
        assert_eq!(ComputeBackend::from_name("auto"), Some(ComputeBackend::Cpu));
        assert_eq!(ComputeBackend::from_name("CPU"), Some(ComputeBackend::Cpu));
        assert_eq!(
            ComputeBackend::from_name("cuda"),
            Some(ComputeBackend::Cuda { device_id: 0 })
        );
        assert_eq!(
            ComputeBackend::from_name("cuda:2"),
            Some(ComputeBackend::Cuda { device_id: 2 })
        );
    }

    #[test]
    fn test_from_name_invalid() {
        assert!(ComputeBackend::from_name("opencl").is_none());
        assert!(ComputeBackend::from_name("cuda:x").is_none());
    }

    #[test]
    fn test_display_and_name() {
        assert_eq!(format!("{}", ComputeBackend::Cpu), "CPU");
        let b = ComputeBackend::Cuda { device_id: 1 };
        assert_eq!(format!("{}", b), "CUDA (device 1)");
        assert_eq!(b.name(), "CUDA");
        assert!(b.is_gpu());
    }
}
