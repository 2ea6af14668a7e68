//! Device-resident CSR matrices.
//!
//! A [`CudaCsrMatrix`] keeps its structure and values in device memory and a
//! host mirror of the same matrix. Mat-vecs run on the GPU; if a launch or
//! transfer fails, the operator falls back to the host mirror and logs a
//! warning.

use std::sync::Arc;

use cudarc::driver::CudaSlice;
use lenspix_solver::{CsrMatrix, RealOperator, RealPreconditioner};

use crate::context::CudaContext;
use crate::error::{CudaError, Result};

/// Square sparse matrix stored on a CUDA device.
pub struct CudaCsrMatrix {
    ctx: Arc<CudaContext>,
    n: usize,
    row_ptr: CudaSlice<i32>,
    col_idx: CudaSlice<i32>,
    values: CudaSlice<f64>,
    host: CsrMatrix,
}

fn to_i32(values: &[usize], what: &str) -> Result<Vec<i32>> {
    values
        .iter()
        .map(|&v| {
            i32::try_from(v).map_err(|_| {
                CudaError::InvalidDimension(format!("{} entry {} exceeds i32 range", what, v))
            })
        })
        .collect()
}

impl CudaCsrMatrix {
    /// Build a lensing matrix on the device from deflected coordinates.
    ///
    /// `row_ptr` is the fixed 4-entries-per-row layout for `ti.len()` pixels;
    /// the bilinear kernel fills in columns and weights.
    pub fn build_lensing(
        ctx: Arc<CudaContext>,
        nx: usize,
        ny: usize,
        row_ptr: &[usize],
        ti: &[f64],
        tj: &[f64],
    ) -> Result<Self> {
        let n = nx * ny;
        if ti.len() != n || tj.len() != n || row_ptr.len() != n + 1 {
            return Err(CudaError::InvalidDimension(format!(
                "deflected coordinates must cover {}x{} pixels",
                nx, ny
            )));
        }
        if i32::try_from(4 * n).is_err() {
            return Err(CudaError::InvalidDimension(format!(
                "{} nonzeros exceed i32 indexing",
                4 * n
            )));
        }

        let stream = &ctx.stream;
        let d_ti = stream
            .memcpy_stod(ti)
            .map_err(|e| CudaError::Transfer(format!("coordinate upload failed: {}", e)))?;
        let d_tj = stream
            .memcpy_stod(tj)
            .map_err(|e| CudaError::Transfer(format!("coordinate upload failed: {}", e)))?;
        let mut col_idx: CudaSlice<i32> = stream
            .alloc_zeros(4 * n)
            .map_err(|e| CudaError::MemoryAlloc(format!("column alloc failed: {}", e)))?;
        let mut values: CudaSlice<f64> = stream
            .alloc_zeros(4 * n)
            .map_err(|e| CudaError::MemoryAlloc(format!("value alloc failed: {}", e)))?;

        ctx.kernels
            .bilinear(stream, &d_ti, &d_tj, nx, ny, &mut col_idx, &mut values)?;
        ctx.synchronize()?;

        let d_row_ptr = stream
            .memcpy_stod(&to_i32(row_ptr, "row_ptr")?)
            .map_err(|e| CudaError::Transfer(format!("row_ptr upload failed: {}", e)))?;

        let host_cols: Vec<i32> = stream
            .memcpy_dtov(&col_idx)
            .map_err(|e| CudaError::Transfer(format!("column download failed: {}", e)))?;
        let host_vals: Vec<f64> = stream
            .memcpy_dtov(&values)
            .map_err(|e| CudaError::Transfer(format!("value download failed: {}", e)))?;
        let host = CsrMatrix::from_raw_parts(
            n,
            n,
            row_ptr.to_vec(),
            host_cols.iter().map(|&c| c as usize).collect(),
            host_vals,
        )
        .map_err(|e| CudaError::InvalidDimension(e.to_string()))?;

        log::debug!(
            "built {}x{} lensing matrix on CUDA device {}",
            nx,
            ny,
            ctx.device_id()
        );

        Ok(Self {
            ctx,
            n,
            row_ptr: d_row_ptr,
            col_idx,
            values,
            host,
        })
    }

    /// Upload an existing host matrix.
    pub fn from_host(ctx: Arc<CudaContext>, host: &CsrMatrix) -> Result<Self> {
        if host.nrows() != host.ncols() {
            return Err(CudaError::InvalidDimension(format!(
                "matrix must be square, got {}x{}",
                host.nrows(),
                host.ncols()
            )));
        }
        let stream = &ctx.stream;
        let row_ptr = stream
            .memcpy_stod(&to_i32(host.row_ptr(), "row_ptr")?)
            .map_err(|e| CudaError::Transfer(format!("row_ptr upload failed: {}", e)))?;
        let col_idx = stream
            .memcpy_stod(&to_i32(host.col_idx(), "col_idx")?)
            .map_err(|e| CudaError::Transfer(format!("col_idx upload failed: {}", e)))?;
        let values = stream
            .memcpy_stod(host.values())
            .map_err(|e| CudaError::Transfer(format!("values upload failed: {}", e)))?;

        log::debug!(
            "uploaded {}x{} CSR matrix ({} nonzeros) to CUDA device {}",
            host.nrows(),
            host.ncols(),
            host.nnz(),
            ctx.device_id()
        );

        Ok(Self {
            n: host.nrows(),
            ctx,
            row_ptr,
            col_idx,
            values,
            host: host.clone(),
        })
    }

    pub fn dimension(&self) -> usize {
        self.n
    }

    pub fn device_id(&self) -> usize {
        self.ctx.device_id()
    }

    pub fn context(&self) -> &Arc<CudaContext> {
        &self.ctx
    }

    /// Host copy of the matrix.
    pub fn host(&self) -> &CsrMatrix {
        &self.host
    }

    /// y = A x on the device.
    pub fn apply_gpu(&self, x: &[f64], y: &mut [f64]) -> Result<()> {
        self.launch(x, y, false)
    }

    /// y = Aᵀ x on the device.
    pub fn apply_transpose_gpu(&self, x: &[f64], y: &mut [f64]) -> Result<()> {
        self.launch(x, y, true)
    }

    fn launch(&self, x: &[f64], y: &mut [f64], transpose: bool) -> Result<()> {
        if x.len() != self.n || y.len() != self.n {
            return Err(CudaError::InvalidDimension(format!(
                "vectors must have length {}",
                self.n
            )));
        }
        let stream = &self.ctx.stream;
        let d_x = stream
            .memcpy_stod(x)
            .map_err(|e| CudaError::Transfer(format!("x upload failed: {}", e)))?;
        let mut d_y: CudaSlice<f64> = stream
            .alloc_zeros(self.n)
            .map_err(|e| CudaError::MemoryAlloc(format!("y alloc failed: {}", e)))?;

        if transpose {
            self.ctx.kernels.spmv_transpose(
                stream,
                &self.row_ptr,
                &self.col_idx,
                &self.values,
                &d_x,
                &mut d_y,
            )?;
        } else {
            self.ctx.kernels.spmv(
                stream,
                &self.row_ptr,
                &self.col_idx,
                &self.values,
                &d_x,
                &mut d_y,
            )?;
        }
        self.ctx.synchronize()?;

        let y_gpu: Vec<f64> = stream
            .memcpy_dtov(&d_y)
            .map_err(|e| CudaError::Transfer(format!("y download failed: {}", e)))?;
        y.copy_from_slice(&y_gpu);
        Ok(())
    }

    fn apply_with_fallback(&self, x: &[f64], y: &mut [f64]) {
        if let Err(e) = self.apply_gpu(x, y) {
            log::warn!("GPU lensing apply failed, falling back to CPU: {}", e);
            RealOperator::apply(&self.host, x, y);
        }
    }

    fn apply_transpose_with_fallback(&self, x: &[f64], y: &mut [f64]) {
        if let Err(e) = self.apply_transpose_gpu(x, y) {
            log::warn!("GPU lensing adjoint failed, falling back to CPU: {}", e);
            RealOperator::apply(&lenspix_solver::Transposed(&self.host), x, y);
        }
    }
}

impl RealOperator for CudaCsrMatrix {
    fn dim(&self) -> usize {
        self.n
    }

    fn apply(&self, x: &[f64], y: &mut [f64]) {
        assert_eq!(x.len(), self.n);
        assert_eq!(y.len(), self.n);
        self.apply_with_fallback(x, y);
    }
}

impl RealPreconditioner for CudaCsrMatrix {
    fn dim(&self) -> usize {
        self.n
    }

    fn apply(&self, x: &[f64], y: &mut [f64]) {
        RealOperator::apply(self, x, y);
    }
}

/// Transpose view of a device matrix.
#[derive(Clone, Copy)]
pub struct CudaTransposed<'a>(pub &'a CudaCsrMatrix);

impl RealOperator for CudaTransposed<'_> {
    fn dim(&self) -> usize {
        self.0.n
    }

    fn apply(&self, x: &[f64], y: &mut [f64]) {
        assert_eq!(x.len(), self.0.n);
        assert_eq!(y.len(), self.0.n);
        self.0.apply_transpose_with_fallback(x, y);
    }
}

impl RealPreconditioner for CudaTransposed<'_> {
    fn dim(&self) -> usize {
        self.0.n
    }

    fn apply(&self, x: &[f64], y: &mut [f64]) {
        RealOperator::apply(self, x, y);
    }
}
