//! Backend-resident lensing matrices.

use std::fmt;

use lenspix_solver::{ComputeBackend, CsrMatrix, RealOperator, RealPreconditioner, Transposed};

use crate::builder::{DeflectedCoordinates, build_cpu};
#[cfg(not(feature = "cuda"))]
use crate::device::cuda_not_compiled;
use crate::error::Result;

#[cfg(feature = "cuda")]
use crate::layout::row_layout;
#[cfg(feature = "cuda")]
use lenspix_backend_cuda::{CudaCsrMatrix, CudaTransposed};

/// A bilinear lensing matrix stored on one compute backend.
pub enum LensingMatrix {
    Cpu(CsrMatrix),
    #[cfg(feature = "cuda")]
    Cuda(CudaCsrMatrix),
}

impl fmt::Debug for LensingMatrix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LensingMatrix")
            .field("backend", &self.backend())
            .field("dim", &self.dim())
            .field("nnz", &self.host().nnz())
            .finish()
    }
}

impl LensingMatrix {
    /// Run the builder for `coords` on `backend`.
    pub fn build(coords: &DeflectedCoordinates, backend: &ComputeBackend) -> Result<Self> {
        match backend {
            ComputeBackend::Cpu => Ok(LensingMatrix::Cpu(build_cpu(coords)?)),
            #[cfg(feature = "cuda")]
            ComputeBackend::Cuda { device_id } => {
                let grid = coords.grid();
                let ctx = crate::device::cuda_context(*device_id)?;
                let layout = row_layout(grid.nx(), grid.ny());
                Ok(LensingMatrix::Cuda(CudaCsrMatrix::build_lensing(
                    ctx,
                    grid.nx(),
                    grid.ny(),
                    layout.row_ptr(),
                    coords.ti(),
                    coords.tj(),
                )?))
            }
            #[cfg(not(feature = "cuda"))]
            ComputeBackend::Cuda { device_id } => Err(cuda_not_compiled(*device_id)),
        }
    }

    /// Backend holding the matrix.
    pub fn backend(&self) -> ComputeBackend {
        match self {
            LensingMatrix::Cpu(_) => ComputeBackend::Cpu,
            #[cfg(feature = "cuda")]
            LensingMatrix::Cuda(m) => ComputeBackend::Cuda {
                device_id: m.device_id(),
            },
        }
    }

    pub fn dim(&self) -> usize {
        self.host().nrows()
    }

    /// Host-side CSR representation.
    pub fn host(&self) -> &CsrMatrix {
        match self {
            LensingMatrix::Cpu(m) => m,
            #[cfg(feature = "cuda")]
            LensingMatrix::Cuda(m) => m.host(),
        }
    }

    /// Copy of this matrix on `backend`.
    pub fn to_backend(&self, backend: &ComputeBackend) -> Result<Self> {
        match backend {
            ComputeBackend::Cpu => Ok(LensingMatrix::Cpu(self.host().clone())),
            #[cfg(feature = "cuda")]
            ComputeBackend::Cuda { device_id } => {
                let ctx = crate::device::cuda_context(*device_id)?;
                Ok(LensingMatrix::Cuda(CudaCsrMatrix::from_host(ctx, self.host())?))
            }
            #[cfg(not(feature = "cuda"))]
            ComputeBackend::Cuda { device_id } => Err(cuda_not_compiled(*device_id)),
        }
    }

    /// y = L x.
    pub fn apply(&self, x: &[f64], y: &mut [f64]) {
        match self {
            LensingMatrix::Cpu(m) => RealOperator::apply(m, x, y),
            #[cfg(feature = "cuda")]
            LensingMatrix::Cuda(m) => RealOperator::apply(m, x, y),
        }
    }

    /// y = Lᵀ x.
    pub fn apply_transpose(&self, x: &[f64], y: &mut [f64]) {
        match self {
            LensingMatrix::Cpu(m) => RealOperator::apply(&Transposed(m), x, y),
            #[cfg(feature = "cuda")]
            LensingMatrix::Cuda(m) => RealOperator::apply(&CudaTransposed(m), x, y),
        }
    }

    /// The matrix as a solver operator.
    pub fn forward(&self) -> Forward<'_> {
        Forward(self)
    }

    /// The transposed matrix as a solver operator.
    pub fn adjoint(&self) -> Adjoint<'_> {
        Adjoint(self)
    }
}

/// Operator view applying `L`.
#[derive(Debug, Clone, Copy)]
pub struct Forward<'a>(&'a LensingMatrix);

/// Operator view applying `Lᵀ`.
#[derive(Debug, Clone, Copy)]
pub struct Adjoint<'a>(&'a LensingMatrix);

impl RealOperator for Forward<'_> {
    fn dim(&self) -> usize {
        self.0.dim()
    }

    fn apply(&self, x: &[f64], y: &mut [f64]) {
        self.0.apply(x, y);
    }
}

impl RealPreconditioner for Forward<'_> {
    fn dim(&self) -> usize {
        self.0.dim()
    }

    fn apply(&self, x: &[f64], y: &mut [f64]) {
        self.0.apply(x, y);
    }
}

impl RealOperator for Adjoint<'_> {
    fn dim(&self) -> usize {
        self.0.dim()
    }

    fn apply(&self, x: &[f64], y: &mut [f64]) {
        self.0.apply_transpose(x, y);
    }
}

impl RealPreconditioner for Adjoint<'_> {
    fn dim(&self) -> usize {
        self.0.dim()
    }

    fn apply(&self, x: &[f64], y: &mut [f64]) {
        self.0.apply_transpose(x, y);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lenspix_core::{FlatMap, PixelGrid};

    fn matrix(grid: PixelGrid) -> LensingMatrix {
        let phi = FlatMap::from_fn(grid, |i, j| {
            0.4 * ((i as f64 * 0.7).sin() + (j as f64 * 0.3).cos())
        });
        let coords = DeflectedCoordinates::from_deflection(&phi);
        LensingMatrix::build(&coords, &ComputeBackend::Cpu).unwrap()
    }

    #[test]
    fn test_cpu_build_reports_backend() {
        let m = matrix(PixelGrid::square(8, 1.0).unwrap());
        assert_eq!(m.backend(), ComputeBackend::Cpu);
        assert_eq!(m.dim(), 64);
        assert_eq!(m.host().nnz(), 256);
    }

    #[test]
    fn test_views_apply_matrix_and_transpose() {
        let m = matrix(PixelGrid::square(8, 1.0).unwrap());
        let x: Vec<f64> = (0..64).map(|i| (i as f64).sqrt()).collect();
        let mut y1 = vec![0.0; 64];
        let mut y2 = vec![0.0; 64];

        RealOperator::apply(&m.forward(), &x, &mut y1);
        m.host().matvec(&x, &mut y2).unwrap();
        assert_eq!(y1, y2);

        RealOperator::apply(&m.adjoint(), &x, &mut y1);
        m.host().matvec_transpose(&x, &mut y2).unwrap();
        assert_eq!(y1, y2);
    }

    #[test]
    fn test_to_cpu_copies_values() {
        let m = matrix(PixelGrid::square(8, 1.0).unwrap());
        let copy = m.to_backend(&ComputeBackend::Cpu).unwrap();
        assert_eq!(copy.host(), m.host());
    }

    #[cfg(not(feature = "cuda"))]
    #[test]
    fn test_cuda_without_feature_fails() {
        let m = matrix(PixelGrid::square(4, 1.0).unwrap());
        let err = m.to_backend(&ComputeBackend::Cuda { device_id: 0 }).unwrap_err();
        assert!(matches!(err, crate::error::LensError::BackendUnavailable(_)));
    }
}
