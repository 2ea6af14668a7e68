//! 2D FFTs and spectral derivatives on periodic flat-sky grids.
//!
//! Derivatives are taken in Fourier space with physical wavenumbers
//! `k = 2π m / (N Δx)`. The Nyquist mode of an even-length axis is zeroed so
//! that the derivative stays a real, antisymmetric operator: the transpose of
//! [`gradient`] is exactly [`gradient_adjoint`].
//!
//! Plans depend only on the grid shape and are shared process-wide through
//! [`fourier_plan`].

use std::collections::HashMap;
use std::f64::consts::PI;
use std::sync::{Arc, LazyLock};

use parking_lot::Mutex;
use rustfft::{Fft, FftPlanner, num_complex::Complex};

use crate::error::Result;
use crate::field::FlatMap;
use crate::grid::PixelGrid;

type C64 = Complex<f64>;

/// Forward and inverse FFT plans for one grid shape.
pub struct FourierPlan {
    nx: usize,
    ny: usize,
    row_forward: Arc<dyn Fft<f64>>,
    row_inverse: Arc<dyn Fft<f64>>,
    col_forward: Arc<dyn Fft<f64>>,
    col_inverse: Arc<dyn Fft<f64>>,
}

impl FourierPlan {
    pub fn new(nx: usize, ny: usize) -> Self {
        let mut planner = FftPlanner::new();
        Self {
            nx,
            ny,
            row_forward: planner.plan_fft_forward(nx),
            row_inverse: planner.plan_fft_inverse(nx),
            col_forward: planner.plan_fft_forward(ny),
            col_inverse: planner.plan_fft_inverse(ny),
        }
    }

    pub fn nx(&self) -> usize {
        self.nx
    }

    pub fn ny(&self) -> usize {
        self.ny
    }

    /// Unnormalized forward transform of one real plane.
    pub fn forward(&self, plane: &[f64]) -> Vec<C64> {
        let mut buf: Vec<C64> = plane.iter().map(|&v| C64::new(v, 0.0)).collect();
        self.transform(&mut buf, &*self.row_forward, &*self.col_forward);
        buf
    }

    /// Inverse transform of one plane, normalized by `1/N`, keeping the real part.
    pub fn inverse(&self, coeffs: &[C64]) -> Vec<f64> {
        let mut buf = coeffs.to_vec();
        self.transform(&mut buf, &*self.row_inverse, &*self.col_inverse);
        let scale = 1.0 / (self.nx * self.ny) as f64;
        buf.iter().map(|c| c.re * scale).collect()
    }

    fn transform(&self, buf: &mut [C64], row: &dyn Fft<f64>, col: &dyn Fft<f64>) {
        let (nx, ny) = (self.nx, self.ny);
        debug_assert_eq!(buf.len(), nx * ny);

        // rows are contiguous; rustfft handles the whole buffer as nx-length chunks
        row.process(buf);

        let mut transposed = vec![C64::new(0.0, 0.0); nx * ny];
        for j in 0..ny {
            for i in 0..nx {
                transposed[i * ny + j] = buf[j * nx + i];
            }
        }
        col.process(&mut transposed);
        for i in 0..nx {
            for j in 0..ny {
                buf[j * nx + i] = transposed[i * ny + j];
            }
        }
    }
}

impl std::fmt::Debug for FourierPlan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FourierPlan")
            .field("nx", &self.nx)
            .field("ny", &self.ny)
            .finish()
    }
}

static FOURIER_PLANS: LazyLock<Mutex<HashMap<(usize, usize), Arc<FourierPlan>>>> =
    LazyLock::new(|| Mutex::new(HashMap::new()));

/// Shared plan for an `nx x ny` grid, built on first request.
pub fn fourier_plan(nx: usize, ny: usize) -> Arc<FourierPlan> {
    let mut plans = FOURIER_PLANS.lock();
    plans
        .entry((nx, ny))
        .or_insert_with(|| {
            log::debug!("planning FFTs for {}x{} grid", nx, ny);
            Arc::new(FourierPlan::new(nx, ny))
        })
        .clone()
}

/// Physical wavenumbers for an axis of `n` pixels of size `dx`.
///
/// Follows FFT ordering (`0, 1, ..., -1`). The Nyquist entry of an even
/// axis is zero.
pub fn wavenumbers(n: usize, dx: f64) -> Vec<f64> {
    let scale = 2.0 * PI / (n as f64 * dx);
    (0..n)
        .map(|m| {
            if n % 2 == 0 && m == n / 2 {
                0.0
            } else if m <= n / 2 {
                m as f64 * scale
            } else {
                (m as f64 - n as f64) * scale
            }
        })
        .collect()
}

/// Spectral gradient `(∂ₓf, ∂ᵧf)` of every plane of `map`.
pub fn gradient(map: &FlatMap) -> (FlatMap, FlatMap) {
    let grid = map.grid();
    let plan = fourier_plan(grid.nx(), grid.ny());
    let kx = wavenumbers(grid.nx(), grid.dx());
    let ky = wavenumbers(grid.ny(), grid.dx());

    let mut gx = FlatMap::zeros_batched(grid, map.nbatch());
    let mut gy = FlatMap::zeros_batched(grid, map.nbatch());

    for (b, plane) in map.planes().enumerate() {
        let coeffs = plan.forward(plane);
        let mut cx = Vec::with_capacity(coeffs.len());
        let mut cy = Vec::with_capacity(coeffs.len());
        for (idx, c) in coeffs.iter().enumerate() {
            let (m, n) = grid.coords(idx);
            cx.push(C64::new(0.0, kx[m]) * c);
            cy.push(C64::new(0.0, ky[n]) * c);
        }
        gx.plane_mut(b).copy_from_slice(&plan.inverse(&cx));
        gy.plane_mut(b).copy_from_slice(&plan.inverse(&cy));
    }

    (gx, gy)
}

/// Transpose of [`gradient`]: `∇ᵗ(gₓ, gᵧ) = −(∂ₓgₓ + ∂ᵧgᵧ)`.
pub fn gradient_adjoint(gx: &FlatMap, gy: &FlatMap) -> Result<FlatMap> {
    gx.ensure_compatible(gy)?;
    let grid = gx.grid();
    let plan = fourier_plan(grid.nx(), grid.ny());
    let kx = wavenumbers(grid.nx(), grid.dx());
    let ky = wavenumbers(grid.ny(), grid.dx());

    let mut out = FlatMap::zeros_batched(grid, gx.nbatch());
    for b in 0..gx.nbatch() {
        let cx = plan.forward(gx.plane(b));
        let cy = plan.forward(gy.plane(b));
        let div: Vec<C64> = cx
            .iter()
            .zip(cy.iter())
            .enumerate()
            .map(|(idx, (x, y))| {
                let (m, n) = grid.coords(idx);
                -(C64::new(0.0, kx[m]) * x + C64::new(0.0, ky[n]) * y)
            })
            .collect();
        out.plane_mut(b).copy_from_slice(&plan.inverse(&div));
    }
    Ok(out)
}
