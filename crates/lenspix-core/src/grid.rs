//! Flat-sky pixel grid metadata.

use std::f64::consts::PI;
use std::fmt;

use crate::error::{Error, Result};

/// Radians per arcminute.
pub const ARCMIN: f64 = PI / (180.0 * 60.0);

/// Radians per degree.
pub const DEGREE: f64 = PI / 180.0;

/// Dimensions and physical pixel size of a periodic flat-sky map.
///
/// Pixels are addressed as `(i, j)` with `i` running along x (`0..nx`) and
/// `j` along y (`0..ny`). The flat index is row-major: `j * nx + i`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PixelGrid {
    nx: usize,
    ny: usize,
    dx: f64,
}

impl PixelGrid {
    /// Create a grid with `nx * ny` pixels of side `dx` radians.
    pub fn new(nx: usize, ny: usize, dx: f64) -> Result<Self> {
        if nx < 2 || ny < 2 {
            return Err(Error::InvalidGrid { nx, ny });
        }
        if !dx.is_finite() || dx <= 0.0 {
            return Err(Error::InvalidPixelSize(dx));
        }
        Ok(Self { nx, ny, dx })
    }

    /// Square `n x n` grid.
    pub fn square(n: usize, dx: f64) -> Result<Self> {
        Self::new(n, n, dx)
    }

    /// Grid with the pixel side given in arcminutes.
    pub fn from_arcmin(nx: usize, ny: usize, theta_pix_arcmin: f64) -> Result<Self> {
        Self::new(nx, ny, theta_pix_arcmin * ARCMIN)
    }

    pub fn nx(&self) -> usize {
        self.nx
    }

    pub fn ny(&self) -> usize {
        self.ny
    }

    /// Pixel side in radians.
    pub fn dx(&self) -> f64 {
        self.dx
    }

    /// Pixel side in arcminutes.
    pub fn theta_pix_arcmin(&self) -> f64 {
        self.dx / ARCMIN
    }

    /// Total number of pixels.
    pub fn npix(&self) -> usize {
        self.nx * self.ny
    }

    /// Solid angle covered by the map in steradians.
    pub fn area(&self) -> f64 {
        self.npix() as f64 * self.dx * self.dx
    }

    /// Flat index of pixel `(i, j)`.
    #[inline]
    pub fn index(&self, i: usize, j: usize) -> usize {
        debug_assert!(i < self.nx && j < self.ny);
        j * self.nx + i
    }

    /// Inverse of [`PixelGrid::index`].
    #[inline]
    pub fn coords(&self, index: usize) -> (usize, usize) {
        (index % self.nx, index / self.nx)
    }

    /// Flat index of a possibly out-of-range pixel, wrapped periodically.
    #[inline]
    pub fn wrapped_index(&self, i: i64, j: i64) -> usize {
        wrap_index(j, self.ny) * self.nx + wrap_index(i, self.nx)
    }

    /// Check that two grids describe the same pixelization.
    pub fn ensure_same(&self, other: &PixelGrid) -> Result<()> {
        if self == other {
            Ok(())
        } else {
            Err(Error::GridMismatch {
                left: *self,
                right: *other,
            })
        }
    }
}

impl fmt::Display for PixelGrid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}x{} @ {:.3} arcmin",
            self.nx,
            self.ny,
            self.theta_pix_arcmin()
        )
    }
}

/// Wrap a raw pixel index onto `0..extent` (periodic boundary).
#[inline]
pub fn wrap_index(raw: i64, extent: usize) -> usize {
    raw.rem_euclid(extent as i64) as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_degenerate_grids() {
        assert!(matches!(
            PixelGrid::new(1, 8, 1.0),
            Err(Error::InvalidGrid { nx: 1, ny: 8 })
        ));
        assert!(matches!(
            PixelGrid::new(8, 8, 0.0),
            Err(Error::InvalidPixelSize(_))
        ));
        assert!(PixelGrid::new(8, 8, f64::NAN).is_err());
    }

    #[test]
    fn test_index_roundtrip() {
        let grid = PixelGrid::new(5, 3, 1.0).unwrap();
        for j in 0..3 {
            for i in 0..5 {
                let idx = grid.index(i, j);
                assert_eq!(grid.coords(idx), (i, j));
            }
        }
        assert_eq!(grid.index(4, 2), 14);
    }

    #[test]
    fn test_wrap_negative_and_overflow() {
        assert_eq!(wrap_index(-1, 8), 7);
        assert_eq!(wrap_index(8, 8), 0);
        assert_eq!(wrap_index(-9, 8), 7);
        assert_eq!(wrap_index(17, 8), 1);
    }

    #[test]
    fn test_wrapped_index_flattens_both_axes() {
        let grid = PixelGrid::new(4, 6, 1.0).unwrap();
        assert_eq!(grid.wrapped_index(-1, -1), grid.index(3, 5));
        assert_eq!(grid.wrapped_index(4, 6), grid.index(0, 0));
    }

    #[test]
    fn test_arcmin_conversion() {
        let grid = PixelGrid::from_arcmin(64, 64, 2.0).unwrap();
        assert!((grid.dx() - 2.0 * ARCMIN).abs() < 1e-18);
        assert!((grid.theta_pix_arcmin() - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_display() {
        let grid = PixelGrid::from_arcmin(16, 8, 3.0).unwrap();
        assert_eq!(format!("{}", grid), "16x8 @ 3.000 arcmin");
    }
}
