//! Flat-sky scalar fields and composite (tuple) fields.
//!
//! A [`FlatMap`] is the position-space representation: real pixel values on a
//! [`PixelGrid`], with an optional batch axis of independent map planes.
//! A [`FlatFourier`] holds the same planes as 2D DFT coefficients. Operators
//! that work pixel-by-pixel take a [`FlatField`] in either basis and convert to
//! position space first.
//!
//! [`Field`] groups scalar fields into tuples (e.g. Stokes Q and U) so that an
//! operator can be applied component-wise while keeping the tuple structure.

use std::slice::{ChunksExact, ChunksExactMut};

use num_complex::Complex64 as C64;

use crate::error::{Error, Result};
use crate::fourier::fourier_plan;
use crate::grid::PixelGrid;
use crate::rng;

/// Real pixel-space field with `nbatch` planes.
///
/// Storage is plane-major: `data[b * npix + j * nx + i]`.
#[derive(Debug, Clone, PartialEq)]
pub struct FlatMap {
    grid: PixelGrid,
    nbatch: usize,
    data: Vec<f64>,
}

impl FlatMap {
    /// Single-plane map of zeros.
    pub fn zeros(grid: PixelGrid) -> Self {
        Self::zeros_batched(grid, 1)
    }

    /// `nbatch`-plane map of zeros.
    ///
    /// # Panics
    ///
    /// Panics if `nbatch == 0`.
    pub fn zeros_batched(grid: PixelGrid, nbatch: usize) -> Self {
        assert!(nbatch > 0, "a map needs at least one plane");
        Self {
            grid,
            nbatch,
            data: vec![0.0; nbatch * grid.npix()],
        }
    }

    /// Single-plane map from row-major pixel data.
    pub fn from_vec(grid: PixelGrid, data: Vec<f64>) -> Result<Self> {
        Self::from_planes(grid, 1, data)
    }

    /// Batched map from plane-major pixel data.
    pub fn from_planes(grid: PixelGrid, nbatch: usize, data: Vec<f64>) -> Result<Self> {
        if nbatch == 0 {
            return Err(Error::BatchMismatch {
                expected: 1,
                actual: 0,
            });
        }
        let expected = nbatch * grid.npix();
        if data.len() != expected {
            return Err(Error::DataLength {
                expected,
                actual: data.len(),
            });
        }
        Ok(Self { grid, nbatch, data })
    }

    /// Single-plane map with pixel `(i, j)` set to `f(i, j)`.
    pub fn from_fn(grid: PixelGrid, mut f: impl FnMut(usize, usize) -> f64) -> Self {
        let mut data = Vec::with_capacity(grid.npix());
        for j in 0..grid.ny() {
            for i in 0..grid.nx() {
                data.push(f(i, j));
            }
        }
        Self {
            grid,
            nbatch: 1,
            data,
        }
    }

    /// Unit-variance white noise, reproducible from `seed`.
    pub fn white_noise(grid: PixelGrid, seed: u64) -> Self {
        let data = (0..grid.npix() as u64)
            .map(|idx| rng::gaussian(seed, 0, idx))
            .collect();
        Self {
            grid,
            nbatch: 1,
            data,
        }
    }

    pub fn grid(&self) -> PixelGrid {
        self.grid
    }

    pub fn nbatch(&self) -> usize {
        self.nbatch
    }

    /// Pixels per plane.
    pub fn npix(&self) -> usize {
        self.grid.npix()
    }

    pub fn data(&self) -> &[f64] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [f64] {
        &mut self.data
    }

    pub fn into_data(self) -> Vec<f64> {
        self.data
    }

    /// Pixel `(i, j)` of the first plane.
    pub fn get(&self, i: usize, j: usize) -> f64 {
        self.data[self.grid.index(i, j)]
    }

    /// Pixel `(i, j)` of plane `b`.
    pub fn get_batched(&self, b: usize, i: usize, j: usize) -> f64 {
        self.data[b * self.npix() + self.grid.index(i, j)]
    }

    pub fn plane(&self, b: usize) -> &[f64] {
        let n = self.npix();
        &self.data[b * n..(b + 1) * n]
    }

    pub fn plane_mut(&mut self, b: usize) -> &mut [f64] {
        let n = self.npix();
        &mut self.data[b * n..(b + 1) * n]
    }

    pub fn planes(&self) -> ChunksExact<'_, f64> {
        self.data.chunks_exact(self.grid.npix())
    }

    pub fn planes_mut(&mut self) -> ChunksExactMut<'_, f64> {
        let n = self.grid.npix();
        self.data.chunks_exact_mut(n)
    }

    /// True only if every pixel is exactly `0.0`.
    pub fn is_zero(&self) -> bool {
        self.data.iter().all(|&v| v == 0.0)
    }

    pub fn is_finite(&self) -> bool {
        self.data.iter().all(|v| v.is_finite())
    }

    /// Check grid and batch agreement with `other`.
    pub fn ensure_compatible(&self, other: &FlatMap) -> Result<()> {
        self.grid.ensure_same(&other.grid)?;
        if self.nbatch != other.nbatch {
            return Err(Error::BatchMismatch {
                expected: self.nbatch,
                actual: other.nbatch,
            });
        }
        Ok(())
    }

    /// Map every pixel through `f`.
    pub fn map(&self, f: impl Fn(f64) -> f64) -> FlatMap {
        FlatMap {
            grid: self.grid,
            nbatch: self.nbatch,
            data: self.data.iter().map(|&v| f(v)).collect(),
        }
    }

    /// Combine two compatible maps pixel-by-pixel.
    pub fn zip_with(&self, other: &FlatMap, f: impl Fn(f64, f64) -> f64) -> Result<FlatMap> {
        self.ensure_compatible(other)?;
        Ok(FlatMap {
            grid: self.grid,
            nbatch: self.nbatch,
            data: self
                .data
                .iter()
                .zip(other.data.iter())
                .map(|(&a, &b)| f(a, b))
                .collect(),
        })
    }

    pub fn try_add(&self, other: &FlatMap) -> Result<FlatMap> {
        self.zip_with(other, |a, b| a + b)
    }

    pub fn try_sub(&self, other: &FlatMap) -> Result<FlatMap> {
        self.zip_with(other, |a, b| a - b)
    }

    /// Elementwise product.
    pub fn hadamard(&self, other: &FlatMap) -> Result<FlatMap> {
        self.zip_with(other, |a, b| a * b)
    }

    pub fn scale(&self, alpha: f64) -> FlatMap {
        self.map(|v| alpha * v)
    }

    /// `self += alpha * other`.
    pub fn axpy(&mut self, alpha: f64, other: &FlatMap) -> Result<()> {
        self.ensure_compatible(other)?;
        for (a, &b) in self.data.iter_mut().zip(other.data.iter()) {
            *a += alpha * b;
        }
        Ok(())
    }

    /// Pixel-space inner product over all planes.
    pub fn dot(&self, other: &FlatMap) -> Result<f64> {
        self.ensure_compatible(other)?;
        Ok(self
            .data
            .iter()
            .zip(other.data.iter())
            .map(|(a, b)| a * b)
            .sum())
    }

    /// Euclidean norm over all planes.
    pub fn norm(&self) -> f64 {
        self.data.iter().map(|v| v * v).sum::<f64>().sqrt()
    }

    /// Single-plane map holding the sum of all planes.
    pub fn sum_planes(&self) -> FlatMap {
        let mut out = vec![0.0; self.npix()];
        for plane in self.planes() {
            for (o, &v) in out.iter_mut().zip(plane) {
                *o += v;
            }
        }
        FlatMap {
            grid: self.grid,
            nbatch: 1,
            data: out,
        }
    }

    /// Fourier-space representation of every plane.
    pub fn to_fourier(&self) -> FlatFourier {
        let plan = fourier_plan(self.grid.nx(), self.grid.ny());
        let mut data = Vec::with_capacity(self.data.len());
        for plane in self.planes() {
            data.extend(plan.forward(plane));
        }
        FlatFourier {
            grid: self.grid,
            nbatch: self.nbatch,
            data,
        }
    }
}

/// Complex 2D DFT coefficients of a real map, plane-major like [`FlatMap`].
///
/// Coefficient `(m, n)` of plane `b` lives at `b * npix + n * nx + m`.
/// The forward transform is unnormalized.
#[derive(Debug, Clone, PartialEq)]
pub struct FlatFourier {
    grid: PixelGrid,
    nbatch: usize,
    data: Vec<C64>,
}

impl FlatFourier {
    pub fn from_planes(grid: PixelGrid, nbatch: usize, data: Vec<C64>) -> Result<Self> {
        let expected = nbatch * grid.npix();
        if nbatch == 0 || data.len() != expected {
            return Err(Error::DataLength {
                expected,
                actual: data.len(),
            });
        }
        Ok(Self { grid, nbatch, data })
    }

    pub fn grid(&self) -> PixelGrid {
        self.grid
    }

    pub fn nbatch(&self) -> usize {
        self.nbatch
    }

    pub fn data(&self) -> &[C64] {
        &self.data
    }

    /// Position-space representation (real part of the inverse transform).
    pub fn to_map(&self) -> FlatMap {
        let plan = fourier_plan(self.grid.nx(), self.grid.ny());
        let mut data = Vec::with_capacity(self.data.len());
        for plane in self.data.chunks_exact(self.grid.npix()) {
            data.extend(plan.inverse(plane));
        }
        FlatMap {
            grid: self.grid,
            nbatch: self.nbatch,
            data,
        }
    }
}

/// Which basis a [`FlatField`] is stored in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Basis {
    Map,
    Fourier,
}

/// A scalar flat-sky field in either basis.
#[derive(Debug, Clone, PartialEq)]
pub enum FlatField {
    Map(FlatMap),
    Fourier(FlatFourier),
}

impl FlatField {
    pub fn basis(&self) -> Basis {
        match self {
            FlatField::Map(_) => Basis::Map,
            FlatField::Fourier(_) => Basis::Fourier,
        }
    }

    pub fn grid(&self) -> PixelGrid {
        match self {
            FlatField::Map(m) => m.grid(),
            FlatField::Fourier(f) => f.grid(),
        }
    }

    pub fn nbatch(&self) -> usize {
        match self {
            FlatField::Map(m) => m.nbatch(),
            FlatField::Fourier(f) => f.nbatch(),
        }
    }

    /// Position-space representation.
    pub fn to_map(&self) -> FlatMap {
        match self {
            FlatField::Map(m) => m.clone(),
            FlatField::Fourier(f) => f.to_map(),
        }
    }

    pub fn into_map(self) -> FlatMap {
        match self {
            FlatField::Map(m) => m,
            FlatField::Fourier(f) => f.to_map(),
        }
    }

    /// Borrow the map if already in position space.
    pub fn as_map(&self) -> Option<&FlatMap> {
        match self {
            FlatField::Map(m) => Some(m),
            FlatField::Fourier(_) => None,
        }
    }
}

/// Shape tag of a [`Field`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Scalar,
    Composite,
}

/// A scalar field or a tuple of fields.
#[derive(Debug, Clone, PartialEq)]
pub enum Field {
    Scalar(FlatField),
    Composite(Vec<Field>),
}

impl Field {
    pub fn composite(components: Vec<Field>) -> Self {
        Field::Composite(components)
    }

    pub fn kind(&self) -> FieldKind {
        match self {
            Field::Scalar(_) => FieldKind::Scalar,
            Field::Composite(_) => FieldKind::Composite,
        }
    }

    /// Components of a composite field; a scalar has none.
    pub fn components(&self) -> &[Field] {
        match self {
            Field::Scalar(_) => &[],
            Field::Composite(c) => c,
        }
    }

    /// All scalar leaves, depth-first.
    pub fn leaves(&self) -> Vec<&FlatField> {
        let mut out = Vec::new();
        self.collect_leaves(&mut out);
        out
    }

    fn collect_leaves<'a>(&'a self, out: &mut Vec<&'a FlatField>) {
        match self {
            Field::Scalar(f) => out.push(f),
            Field::Composite(c) => c.iter().for_each(|f| f.collect_leaves(out)),
        }
    }

    /// Borrow the map of a scalar field stored in position space.
    pub fn as_map(&self) -> Option<&FlatMap> {
        match self {
            Field::Scalar(f) => f.as_map(),
            Field::Composite(_) => None,
        }
    }

    /// Same structure, every leaf converted to position space.
    pub fn to_map_field(&self) -> Field {
        match self {
            Field::Scalar(f) => Field::Scalar(FlatField::Map(f.to_map())),
            Field::Composite(c) => Field::Composite(c.iter().map(Field::to_map_field).collect()),
        }
    }

    /// Apply `f` to every leaf, keeping the tuple structure.
    pub fn try_map_leaves<E, F>(&self, f: &mut F) -> std::result::Result<Field, E>
    where
        F: FnMut(&FlatField) -> std::result::Result<FlatMap, E>,
    {
        match self {
            Field::Scalar(leaf) => Ok(Field::Scalar(FlatField::Map(f(leaf)?))),
            Field::Composite(c) => c
                .iter()
                .map(|component| component.try_map_leaves(&mut *f))
                .collect::<std::result::Result<Vec<_>, E>>()
                .map(Field::Composite),
        }
    }

    /// Apply `f` to corresponding leaves of two fields with the same structure.
    pub fn try_zip_leaves<E, F>(&self, other: &Field, f: &mut F) -> std::result::Result<Field, E>
    where
        E: From<Error>,
        F: FnMut(&FlatField, &FlatField) -> std::result::Result<FlatMap, E>,
    {
        match (self, other) {
            (Field::Scalar(a), Field::Scalar(b)) => Ok(Field::Scalar(FlatField::Map(f(a, b)?))),
            (Field::Composite(a), Field::Composite(b)) if a.len() == b.len() => a
                .iter()
                .zip(b.iter())
                .map(|(x, y)| x.try_zip_leaves(y, &mut *f))
                .collect::<std::result::Result<Vec<_>, E>>()
                .map(Field::Composite),
            _ => Err(Error::StructureMismatch.into()),
        }
    }

    /// Position-space inner product summed over all leaves.
    pub fn dot(&self, other: &Field) -> Result<f64> {
        let a = self.leaves();
        let b = other.leaves();
        if a.len() != b.len() || self.kind() != other.kind() {
            return Err(Error::StructureMismatch);
        }
        a.iter()
            .zip(b.iter())
            .map(|(x, y)| x.to_map().dot(&y.to_map()))
            .sum()
    }
}

impl From<FlatMap> for Field {
    fn from(map: FlatMap) -> Self {
        Field::Scalar(FlatField::Map(map))
    }
}

impl From<FlatFourier> for Field {
    fn from(fourier: FlatFourier) -> Self {
        Field::Scalar(FlatField::Fourier(fourier))
    }
}

impl From<FlatMap> for FlatField {
    fn from(map: FlatMap) -> Self {
        FlatField::Map(map)
    }
}
