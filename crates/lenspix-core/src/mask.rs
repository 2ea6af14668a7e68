//! Apodized edge and point-source masks.
//!
//! A mask is built from three pieces:
//! 1. a boundary mask zeroing `edge_padding_deg` around the map edge, with its
//!    corners rounded by a morphological opening of radius `edge_rounding_deg`
//! 2. a cosine taper over `apodization_deg` inward from every masked pixel
//! 3. binary holes of radius `ptsrc_radius_arcmin` around random point sources
//!
//! Distances come from an exact Euclidean distance transform (separable
//! lower-envelope algorithm of Felzenszwalb and Huttenlocher).

use std::f64::consts::PI;

use crate::error::{Error, Result};
use crate::field::FlatMap;
use crate::grid::PixelGrid;
use crate::rng;

/// Finite stand-in for "infinitely far" in the squared-distance transform.
const FAR: f64 = 1e20;

/// Mask generation parameters.
#[derive(Debug, Clone)]
pub struct MaskConfig {
    /// Width of the zeroed border, in degrees.
    pub edge_padding_deg: f64,
    /// Corner rounding radius, in degrees.
    pub edge_rounding_deg: f64,
    /// Width of the cosine taper, in degrees.
    pub apodization_deg: f64,
    /// Number of point sources; `None` picks about 4000 per full sky.
    pub num_ptsrcs: Option<usize>,
    /// Radius of each point-source hole, in arcminutes.
    pub ptsrc_radius_arcmin: f64,
    /// Seed for point-source positions.
    pub seed: u64,
}

impl Default for MaskConfig {
    fn default() -> Self {
        Self {
            edge_padding_deg: 2.0,
            edge_rounding_deg: 1.0,
            apodization_deg: 1.0,
            num_ptsrcs: None,
            ptsrc_radius_arcmin: 7.0,
            seed: 0,
        }
    }
}

impl MaskConfig {
    pub fn with_edge_padding(mut self, deg: f64) -> Self {
        self.edge_padding_deg = deg;
        self
    }

    pub fn with_edge_rounding(mut self, deg: f64) -> Self {
        self.edge_rounding_deg = deg;
        self
    }

    pub fn with_apodization(mut self, deg: f64) -> Self {
        self.apodization_deg = deg;
        self
    }

    pub fn with_point_sources(mut self, count: usize, radius_arcmin: f64) -> Self {
        self.num_ptsrcs = Some(count);
        self.ptsrc_radius_arcmin = radius_arcmin;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("edge_padding_deg", self.edge_padding_deg),
            ("edge_rounding_deg", self.edge_rounding_deg),
            ("apodization_deg", self.apodization_deg),
            ("ptsrc_radius_arcmin", self.ptsrc_radius_arcmin),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(Error::InvalidMaskParameter(format!(
                    "{} must be finite and non-negative, got {}",
                    name, value
                )));
            }
        }
        Ok(())
    }
}

/// Default point-source count for a map: 4000 sources per full sky.
pub fn default_ptsrc_count(grid: &PixelGrid) -> usize {
    (grid.area() / (4.0 * PI) * 4000.0).round() as usize
}

/// Build the apodized edge mask times the point-source mask.
pub fn make_mask(grid: &PixelGrid, config: &MaskConfig) -> Result<FlatMap> {
    config.validate()?;
    let theta = grid.theta_pix_arcmin();
    let deg_to_npix = |deg: f64| (deg * 60.0 / theta).round() as usize;
    let arcmin_to_npix = |arcmin: f64| (arcmin / theta).round() as usize;

    let mut edges = boundary_mask(grid, deg_to_npix(config.edge_padding_deg));
    let rounding = deg_to_npix(config.edge_rounding_deg);
    if rounding > 0 {
        edges = round_corners(grid, &edges, rounding);
    }
    let apodized = cos_apodize(grid, &edges, deg_to_npix(config.apodization_deg));

    let count = config
        .num_ptsrcs
        .unwrap_or_else(|| default_ptsrc_count(grid));
    let ptsrc = point_source_mask(
        grid,
        count,
        arcmin_to_npix(config.ptsrc_radius_arcmin),
        config.seed,
    );

    log::debug!(
        "built mask on {} grid with {} point sources",
        grid,
        count
    );

    let data = apodized
        .iter()
        .zip(ptsrc.iter())
        .map(|(&w, &keep)| if keep { w } else { 0.0 })
        .collect();
    FlatMap::from_vec(*grid, data)
}

/// `true` everywhere except a border `padding` pixels wide.
pub fn boundary_mask(grid: &PixelGrid, padding: usize) -> Vec<bool> {
    let (nx, ny) = (grid.nx(), grid.ny());
    let mut mask = Vec::with_capacity(grid.npix());
    for j in 0..ny {
        for i in 0..nx {
            let inside = i >= padding && j >= padding && i + padding < nx && j + padding < ny;
            mask.push(inside);
        }
    }
    mask
}

/// Morphological opening (erode then dilate) with a disc of `radius` pixels.
pub fn round_corners(grid: &PixelGrid, mask: &[bool], radius: usize) -> Vec<bool> {
    let r = radius as f64;
    let to_unmasked = distance_to(grid, mask, false);
    let eroded: Vec<bool> = to_unmasked.iter().map(|&d| d > r).collect();
    let to_eroded = distance_to(grid, &eroded, true);
    to_eroded.iter().map(|&d| d <= r).collect()
}

/// Cosine taper `sin²(π/2 · min(1, d / width))`, with `d` the distance to the
/// nearest masked pixel. A zero width leaves the mask binary.
pub fn cos_apodize(grid: &PixelGrid, mask: &[bool], width: usize) -> Vec<f64> {
    if width == 0 {
        return mask.iter().map(|&m| if m { 1.0 } else { 0.0 }).collect();
    }
    let w = width as f64;
    distance_to(grid, mask, false)
        .iter()
        .zip(mask.iter())
        .map(|(&d, &m)| {
            if m {
                (0.5 * PI * (d / w).min(1.0)).sin().powi(2)
            } else {
                0.0
            }
        })
        .collect()
}

/// `false` within `radius` pixels of `count` uniformly placed point sources.
pub fn point_source_mask(grid: &PixelGrid, count: usize, radius: usize, seed: u64) -> Vec<bool> {
    if count == 0 {
        return vec![true; grid.npix()];
    }
    let mut sources = vec![false; grid.npix()];
    for k in 0..count as u64 {
        let i = ((rng::uniform(seed, 0, k) * grid.nx() as f64) as usize).min(grid.nx() - 1);
        let j = ((rng::uniform(seed, 1, k) * grid.ny() as f64) as usize).min(grid.ny() - 1);
        sources[grid.index(i, j)] = true;
    }
    let r = radius as f64;
    distance_to(grid, &sources, true)
        .iter()
        .map(|&d| d > r)
        .collect()
}

/// Euclidean distance (in pixels) from every pixel to the nearest pixel whose
/// mask value equals `target`. Pixels that are themselves `target` get 0.
pub fn distance_to(grid: &PixelGrid, mask: &[bool], target: bool) -> Vec<f64> {
    let (nx, ny) = (grid.nx(), grid.ny());
    debug_assert_eq!(mask.len(), nx * ny);

    let mut sq: Vec<f64> = mask
        .iter()
        .map(|&m| if m == target { 0.0 } else { FAR })
        .collect();

    // columns
    let mut line = vec![0.0; ny];
    let mut out = vec![0.0; ny];
    for i in 0..nx {
        for j in 0..ny {
            line[j] = sq[j * nx + i];
        }
        squared_distance_1d(&line, &mut out);
        for j in 0..ny {
            sq[j * nx + i] = out[j];
        }
    }

    // rows
    let mut out = vec![0.0; nx];
    for row in sq.chunks_exact_mut(nx) {
        squared_distance_1d(row, &mut out);
        row.copy_from_slice(&out);
    }

    sq.iter().map(|&d| d.sqrt()).collect()
}

/// 1D squared distance transform of a sampled function (lower envelope of
/// parabolas rooted at each sample).
fn squared_distance_1d(f: &[f64], d: &mut [f64]) {
    let n = f.len();
    let mut v = vec![0usize; n];
    let mut z = vec![0.0f64; n + 1];
    let mut k = 0usize;
    z[0] = f64::NEG_INFINITY;
    z[1] = f64::INFINITY;

    let intersect = |q: usize, p: usize| {
        let (qf, pf) = (q as f64, p as f64);
        ((f[q] + qf * qf) - (f[p] + pf * pf)) / (2.0 * qf - 2.0 * pf)
    };

    for q in 1..n {
        let mut s = intersect(q, v[k]);
        while s <= z[k] {
            k -= 1;
            s = intersect(q, v[k]);
        }
        k += 1;
        v[k] = q;
        z[k] = s;
        z[k + 1] = f64::INFINITY;
    }

    k = 0;
    for (q, dq) in d.iter_mut().enumerate().take(n) {
        while z[k + 1] < q as f64 {
            k += 1;
        }
        let offset = q as f64 - v[k] as f64;
        *dq = offset * offset + f[v[k]];
    }
}
