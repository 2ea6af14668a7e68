//! Bilinear index/weight kernel.
//!
//! For a deflected coordinate `(ĩ, j̃)` in pixel units, the four surrounding
//! pixels are `(⌊ĩ⌋, ⌊j̃⌋)`, `(⌊ĩ⌋+1, ⌊j̃⌋)`, `(⌊ĩ⌋, ⌊j̃⌋+1)` and
//! `(⌊ĩ⌋+1, ⌊j̃⌋+1)`, wrapped periodically. The weights are the first row of
//! the inverse of the 4x4 bilinear basis matrix `[1, Δx, Δy, ΔxΔy]` evaluated
//! at the corner offsets, written in closed form.
//!
//! The CUDA kernel computes the same expression term for term.

use lenspix_core::grid::wrap_index;

/// Corner indices and weights for one output pixel.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BilinearStencil {
    /// Flat indices of (left, top), (right, top), (left, bottom), (right, bottom).
    pub indices: [usize; 4],
    pub weights: [f64; 4],
}

impl BilinearStencil {
    /// Interpolate `values` (a row-major plane) at the stencil's coordinate.
    pub fn interpolate(&self, values: &[f64]) -> f64 {
        self.indices
            .iter()
            .zip(&self.weights)
            .map(|(&k, &w)| w * values[k])
            .sum()
    }
}

/// Stencil of the deflected coordinate `(ti, tj)` on an `nx x ny` grid.
#[inline]
pub fn bilinear_stencil(ti: f64, tj: f64, nx: usize, ny: usize) -> BilinearStencil {
    let left = ti.floor();
    let top = tj.floor();
    let right = left + 1.0;
    let bottom = top + 1.0;

    let dxm = left - ti;
    let dxp = right - ti;
    let dym = top - tj;
    let dyp = bottom - tj;
    let norm = (dxp - dxm) * (dyp - dym);

    let l = wrap_index(left as i64, nx);
    let r = wrap_index(right as i64, nx);
    let t = wrap_index(top as i64, ny);
    let b = wrap_index(bottom as i64, ny);

    BilinearStencil {
        indices: [t * nx + l, t * nx + r, b * nx + l, b * nx + r],
        weights: [
            (dxp * dyp) / norm,
            (-dxm * dyp) / norm,
            (-dxp * dym) / norm,
            (dxm * dym) / norm,
        ],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lenspix_core::rng;
    use nalgebra::Matrix4;

    #[test]
    fn test_weights_sum_to_one() {
        for k in 0..2000u64 {
            let fx = rng::uniform(3, 0, k);
            let fy = rng::uniform(3, 1, k);
            let s = bilinear_stencil(5.0 + fx, 2.0 + fy, 16, 16);
            let sum: f64 = s.weights.iter().sum();
            assert!((sum - 1.0).abs() < 1e-10, "sum = {} at ({}, {})", sum, fx, fy);
        }
    }

    #[test]
    fn test_integer_coordinate_picks_one_pixel() {
        let s = bilinear_stencil(3.0, 2.0, 8, 8);
        assert_eq!(s.indices[0], 2 * 8 + 3);
        assert_eq!(s.weights[0], 1.0);
        assert_eq!(s.weights[1].abs() + s.weights[2].abs() + s.weights[3], 0.0);
    }

    #[test]
    fn test_wraps_negative_and_overflow() {
        let s = bilinear_stencil(-0.5, 7.5, 8, 8);
        // left = -1 -> 7, right = 0; top = 7, bottom = 8 -> 0
        assert_eq!(s.indices, [7 * 8 + 7, 7 * 8, 7, 0]);
        for w in s.weights {
            assert!((w - 0.25).abs() < 1e-15);
        }
    }

    #[test]
    fn test_matches_direct_basis_inverse() {
        for k in 0..50u64 {
            let ti = 10.0 * rng::uniform(9, 0, k) - 3.0;
            let tj = 10.0 * rng::uniform(9, 1, k) - 3.0;
            let (l, t) = (ti.floor(), tj.floor());
            let corners = [(l, t), (l + 1.0, t), (l, t + 1.0), (l + 1.0, t + 1.0)];

            let basis = Matrix4::from_fn(|row, col| {
                let dx = corners[row].0 - ti;
                let dy = corners[row].1 - tj;
                [1.0, dx, dy, dx * dy][col]
            });
            let inverse = basis.try_inverse().unwrap();

            let s = bilinear_stencil(ti, tj, 32, 32);
            for c in 0..4 {
                assert!(
                    (s.weights[c] - inverse[(0, c)]).abs() < 1e-10,
                    "corner {}: {} vs {}",
                    c,
                    s.weights[c],
                    inverse[(0, c)]
                );
            }
        }
    }

    #[test]
    fn test_reproduces_bilinear_functions() {
        let (nx, ny) = (8, 8);
        let plane: Vec<f64> = (0..nx * ny)
            .map(|k| {
                let (i, j) = ((k % nx) as f64, (k / nx) as f64);
                1.0 + 2.0 * i - 0.5 * j + 0.25 * i * j
            })
            .collect();
        let (ti, tj) = (2.3, 4.8);
        let s = bilinear_stencil(ti, tj, nx, ny);
        let expected = 1.0 + 2.0 * ti - 0.5 * tj + 0.25 * ti * tj;
        assert!((s.interpolate(&plane) - expected).abs() < 1e-12);
    }
}
