//! CUDA kernels for building and applying lensing matrices.
//!
//! The bilinear kernel evaluates exactly the same floating-point expression
//! as the CPU kernel, and the module is compiled with FMA contraction off, so
//! GPU-built weights match CPU-built weights bit for bit.

use std::sync::Arc;

use cudarc::driver::{
    CudaContext as CudarcContext, CudaFunction, CudaModule, CudaSlice, CudaStream, LaunchConfig,
    PushKernelArg,
};
use cudarc::nvrtc::{CompileOptions, compile_ptx_with_opts};

use crate::error::{CudaError, Result};

const KERNEL_SOURCE: &str = r#"
extern "C" {

// One output pixel per iteration of a grid-stride loop.
// Writes the 4 corner columns and bilinear weights of row `idx`
// at positions 4*idx .. 4*idx+3.
__global__ void bilinear_lensing_kernel(
    const double* __restrict__ ti,
    const double* __restrict__ tj,
    long long nx,
    long long ny,
    unsigned long long n,
    int* __restrict__ cols,
    double* __restrict__ vals
) {
    unsigned long long stride = (unsigned long long)blockDim.x * gridDim.x;
    for (unsigned long long idx = (unsigned long long)blockIdx.x * blockDim.x + threadIdx.x;
         idx < n;
         idx += stride) {
        double x = ti[idx];
        double y = tj[idx];
        double left = floor(x);
        double top = floor(y);
        double right = left + 1.0;
        double bottom = top + 1.0;

        double dxm = left - x;
        double dxp = right - x;
        double dym = top - y;
        double dyp = bottom - y;
        double norm = (dxp - dxm) * (dyp - dym);

        long long l = ((((long long)left) % nx) + nx) % nx;
        long long r = ((((long long)right) % nx) + nx) % nx;
        long long t = ((((long long)top) % ny) + ny) % ny;
        long long b = ((((long long)bottom) % ny) + ny) % ny;

        unsigned long long base = 4 * idx;
        cols[base]     = (int)(t * nx + l);
        cols[base + 1] = (int)(t * nx + r);
        cols[base + 2] = (int)(b * nx + l);
        cols[base + 3] = (int)(b * nx + r);

        vals[base]     = (dxp * dyp) / norm;
        vals[base + 1] = (-dxm * dyp) / norm;
        vals[base + 2] = (-dxp * dym) / norm;
        vals[base + 3] = (dxm * dym) / norm;
    }
}

// y = A x, one row per iteration.
__global__ void csr_spmv_kernel(
    const int* __restrict__ row_ptr,
    const int* __restrict__ col_idx,
    const double* __restrict__ values,
    const double* __restrict__ x,
    double* __restrict__ y,
    unsigned long long nrows
) {
    unsigned long long stride = (unsigned long long)blockDim.x * gridDim.x;
    for (unsigned long long row = (unsigned long long)blockIdx.x * blockDim.x + threadIdx.x;
         row < nrows;
         row += stride) {
        double sum = 0.0;
        for (int k = row_ptr[row]; k < row_ptr[row + 1]; ++k) {
            sum += values[k] * x[col_idx[k]];
        }
        y[row] = sum;
    }
}

// y += A^T x, scattering each row. y must be zeroed first.
__global__ void csr_spmv_transpose_kernel(
    const int* __restrict__ row_ptr,
    const int* __restrict__ col_idx,
    const double* __restrict__ values,
    const double* __restrict__ x,
    double* __restrict__ y,
    unsigned long long nrows
) {
    unsigned long long stride = (unsigned long long)blockDim.x * gridDim.x;
    for (unsigned long long row = (unsigned long long)blockIdx.x * blockDim.x + threadIdx.x;
         row < nrows;
         row += stride) {
        double xr = x[row];
        for (int k = row_ptr[row]; k < row_ptr[row + 1]; ++k) {
            atomicAdd(&y[col_idx[k]], values[k] * xr);
        }
    }
}

}
"#;

/// Compiled lensing kernels.
pub struct LensingKernels {
    #[allow(dead_code)]
    module: Arc<CudaModule>,
    bilinear: CudaFunction,
    spmv: CudaFunction,
    spmv_transpose: CudaFunction,
}

impl LensingKernels {
    /// Compile and load the kernels into `ctx`.
    pub fn new(ctx: &Arc<CudarcContext>) -> Result<Self> {
        log::info!("Compiling CUDA lensing kernels...");

        let opts = CompileOptions {
            fmad: Some(false),
            // atomicAdd on doubles
            arch: Some("compute_60"),
            ..Default::default()
        };
        let ptx = compile_ptx_with_opts(KERNEL_SOURCE, opts)
            .map_err(|e| CudaError::Compile(e.to_string()))?;
        let module = ctx
            .load_module(ptx)
            .map_err(|e| CudaError::Compile(e.to_string()))?;

        let load = |name: &str| {
            module
                .load_function(name)
                .map_err(|e| CudaError::Compile(format!("{}: {}", name, e)))
        };
        let bilinear = load("bilinear_lensing_kernel")?;
        let spmv = load("csr_spmv_kernel")?;
        let spmv_transpose = load("csr_spmv_transpose_kernel")?;

        log::info!("CUDA lensing kernels compiled successfully");

        Ok(Self {
            module,
            bilinear,
            spmv,
            spmv_transpose,
        })
    }

    /// Launch configuration for a grid-stride loop over `n` items.
    fn launch_config(n: usize) -> LaunchConfig {
        const BLOCK_SIZE: u32 = 256;
        const MAX_BLOCKS: u32 = 65_535;
        let grid_size = n.div_ceil(BLOCK_SIZE as usize).clamp(1, MAX_BLOCKS as usize) as u32;
        LaunchConfig {
            grid_dim: (grid_size, 1, 1),
            block_dim: (BLOCK_SIZE, 1, 1),
            shared_mem_bytes: 0,
        }
    }

    /// Fill `cols` and `vals` (length `4n`) with the bilinear stencil of
    /// every deflected coordinate.
    #[allow(clippy::too_many_arguments)]
    pub fn bilinear(
        &self,
        stream: &CudaStream,
        ti: &CudaSlice<f64>,
        tj: &CudaSlice<f64>,
        nx: usize,
        ny: usize,
        cols: &mut CudaSlice<i32>,
        vals: &mut CudaSlice<f64>,
    ) -> Result<()> {
        let n = ti.len();
        if tj.len() != n || cols.len() != 4 * n || vals.len() != 4 * n {
            return Err(CudaError::InvalidDimension(format!(
                "bilinear kernel buffers do not match {} pixels",
                n
            )));
        }
        let (nx, ny, n) = (nx as i64, ny as i64, n as u64);
        let cfg = Self::launch_config(n as usize);
        // SAFETY: buffer lengths checked above; the kernel writes only
        // indices below 4n.
        unsafe {
            stream
                .launch_builder(&self.bilinear)
                .arg(ti)
                .arg(tj)
                .arg(&nx)
                .arg(&ny)
                .arg(&n)
                .arg(cols)
                .arg(vals)
                .launch(cfg)
        }
        .map_err(|e| CudaError::Launch {
            kernel: "bilinear_lensing_kernel",
            reason: e.to_string(),
        })?;
        Ok(())
    }

    /// y = A x for a device CSR matrix with `nrows` rows.
    #[allow(clippy::too_many_arguments)]
    pub fn spmv(
        &self,
        stream: &CudaStream,
        row_ptr: &CudaSlice<i32>,
        col_idx: &CudaSlice<i32>,
        values: &CudaSlice<f64>,
        x: &CudaSlice<f64>,
        y: &mut CudaSlice<f64>,
    ) -> Result<()> {
        let nrows = row_ptr.len().saturating_sub(1);
        if y.len() != nrows {
            return Err(CudaError::InvalidDimension(format!(
                "output length {} does not match {} rows",
                y.len(),
                nrows
            )));
        }
        let n = nrows as u64;
        let cfg = Self::launch_config(nrows);
        // SAFETY: row_ptr has nrows + 1 entries and y has nrows entries.
        unsafe {
            stream
                .launch_builder(&self.spmv)
                .arg(row_ptr)
                .arg(col_idx)
                .arg(values)
                .arg(x)
                .arg(y)
                .arg(&n)
                .launch(cfg)
        }
        .map_err(|e| CudaError::Launch {
            kernel: "csr_spmv_kernel",
            reason: e.to_string(),
        })?;
        Ok(())
    }

    /// y = Aᵀ x. Zeroes `y` before scattering.
    pub fn spmv_transpose(
        &self,
        stream: &Arc<CudaStream>,
        row_ptr: &CudaSlice<i32>,
        col_idx: &CudaSlice<i32>,
        values: &CudaSlice<f64>,
        x: &CudaSlice<f64>,
        y: &mut CudaSlice<f64>,
    ) -> Result<()> {
        let nrows = row_ptr.len().saturating_sub(1);
        if x.len() != nrows {
            return Err(CudaError::InvalidDimension(format!(
                "input length {} does not match {} rows",
                x.len(),
                nrows
            )));
        }
        stream
            .memset_zeros(y)
            .map_err(|e| CudaError::Transfer(e.to_string()))?;
        let n = nrows as u64;
        let cfg = Self::launch_config(nrows);
        // SAFETY: x has nrows entries; column indices are validated on upload.
        unsafe {
            stream
                .launch_builder(&self.spmv_transpose)
                .arg(row_ptr)
                .arg(col_idx)
                .arg(values)
                .arg(x)
                .arg(y)
                .arg(&n)
                .launch(cfg)
        }
        .map_err(|e| CudaError::Launch {
            kernel: "csr_spmv_transpose_kernel",
            reason: e.to_string(),
        })?;
        Ok(())
    }
}
