//! Sparse lensing matrix construction.
//!
//! The deflection potential φ is differentiated spectrally, converted to
//! pixel units, and offset by each pixel's own position to get the absolute
//! deflected coordinates. The kernel then runs once per output pixel; on CPU
//! the pixels are split across the rayon pool.

use lenspix_core::{FlatMap, PixelGrid, gradient};
use lenspix_solver::CsrMatrix;
use rayon::prelude::*;

use crate::error::Result;
use crate::kernel::bilinear_stencil;
use crate::layout::{STENCIL_SIZE, row_layout};

/// Fractional source coordinate of every output pixel, in pixel units.
#[derive(Debug, Clone)]
pub struct DeflectedCoordinates {
    grid: PixelGrid,
    ti: Vec<f64>,
    tj: Vec<f64>,
}

impl DeflectedCoordinates {
    /// `ĩ = i + ∂ₓφ/Δx`, `j̃ = j + ∂ᵧφ/Δx`.
    pub fn from_deflection(phi: &FlatMap) -> Self {
        let grid = phi.grid();
        let (gx, gy) = gradient(phi);
        let inv_dx = 1.0 / grid.dx();
        let nx = grid.nx();

        let ti = gx
            .plane(0)
            .iter()
            .enumerate()
            .map(|(k, &g)| (k % nx) as f64 + g * inv_dx)
            .collect();
        let tj = gy
            .plane(0)
            .iter()
            .enumerate()
            .map(|(k, &g)| (k / nx) as f64 + g * inv_dx)
            .collect();

        Self { grid, ti, tj }
    }

    /// Coordinates of the undeflected grid.
    pub fn identity(grid: PixelGrid) -> Self {
        let nx = grid.nx();
        Self {
            grid,
            ti: (0..grid.npix()).map(|k| (k % nx) as f64).collect(),
            tj: (0..grid.npix()).map(|k| (k / nx) as f64).collect(),
        }
    }

    pub fn grid(&self) -> PixelGrid {
        self.grid
    }

    pub fn len(&self) -> usize {
        self.ti.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ti.is_empty()
    }

    pub fn ti(&self) -> &[f64] {
        &self.ti
    }

    pub fn tj(&self) -> &[f64] {
        &self.tj
    }
}

/// Build the lensing matrix on the CPU.
pub fn build_cpu(coords: &DeflectedCoordinates) -> Result<CsrMatrix> {
    let grid = coords.grid();
    let (nx, ny) = (grid.nx(), grid.ny());
    let n = grid.npix();
    let layout = row_layout(nx, ny);

    let mut col_idx = vec![0usize; STENCIL_SIZE * n];
    let mut values = vec![0.0f64; STENCIL_SIZE * n];

    col_idx
        .par_chunks_mut(STENCIL_SIZE)
        .zip(values.par_chunks_mut(STENCIL_SIZE))
        .enumerate()
        .for_each(|(idx, (cols, vals))| {
            let stencil = bilinear_stencil(coords.ti[idx], coords.tj[idx], nx, ny);
            cols.copy_from_slice(&stencil.indices);
            vals.copy_from_slice(&stencil.weights);
        });

    log::debug!("built {} lensing matrix on CPU ({} nonzeros)", grid, values.len());

    Ok(layout.assemble(col_idx, values)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sinusoid_phi(grid: PixelGrid, amplitude: f64) -> FlatMap {
        let (nx, ny) = (grid.nx() as f64, grid.ny() as f64);
        FlatMap::from_fn(grid, |i, j| {
            let x = 2.0 * std::f64::consts::PI * i as f64 / nx;
            let y = 2.0 * std::f64::consts::PI * j as f64 / ny;
            amplitude * (x.sin() + (2.0 * y).cos())
        })
    }

    #[test]
    fn test_zero_deflection_is_identity_grid() {
        let grid = PixelGrid::new(6, 4, 0.1).unwrap();
        let coords = DeflectedCoordinates::from_deflection(&FlatMap::zeros(grid));
        let identity = DeflectedCoordinates::identity(grid);
        assert_eq!(coords.len(), 24);
        for (a, b) in coords.ti().iter().zip(identity.ti()) {
            assert!((a - b).abs() < 1e-14);
        }
        for (a, b) in coords.tj().iter().zip(identity.tj()) {
            assert!((a - b).abs() < 1e-14);
        }
    }

    #[test]
    fn test_coordinates_follow_gradient() {
        let grid = PixelGrid::square(16, 0.5).unwrap();
        let phi = sinusoid_phi(grid, 0.1);
        let coords = DeflectedCoordinates::from_deflection(&phi);
        let (gx, gy) = gradient(&phi);
        let k = grid.index(3, 5);
        assert!((coords.ti()[k] - (3.0 + gx.data()[k] / 0.5)).abs() < 1e-12);
        assert!((coords.tj()[k] - (5.0 + gy.data()[k] / 0.5)).abs() < 1e-12);
    }

    #[test]
    fn test_exactly_four_entries_per_row() {
        let grid = PixelGrid::new(8, 5, 1.0).unwrap();
        let m = build_cpu(&DeflectedCoordinates::from_deflection(&sinusoid_phi(grid, 0.7))).unwrap();
        assert_eq!(m.nnz(), 4 * 40);
        for i in 0..40 {
            assert_eq!(m.row(i).0.len(), 4);
        }
        for s in m.row_sums() {
            assert!((s - 1.0).abs() < 1e-10);
        }
    }

    #[test]
    fn test_matches_sequential_kernel() {
        let grid = PixelGrid::new(12, 9, 1.0).unwrap();
        let coords = DeflectedCoordinates::from_deflection(&sinusoid_phi(grid, 1.3));
        let m = build_cpu(&coords).unwrap();
        for idx in 0..grid.npix() {
            let s = bilinear_stencil(coords.ti()[idx], coords.tj()[idx], 12, 9);
            let (cols, vals) = m.row(idx);
            assert_eq!(cols, &s.indices);
            assert_eq!(vals, &s.weights);
        }
    }
}
