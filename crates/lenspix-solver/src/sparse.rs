//! Compressed sparse row (CSR) matrices.
//!
//! Column indices within a row are not required to be sorted, so matrices
//! with a fixed number of entries per row can be assembled directly without
//! an intermediate triplet sort. [`CsrMatrix::from_triplets`] produces sorted
//! rows with duplicates summed.

use std::collections::BTreeMap;

use rayon::prelude::*;

use crate::error::{Error, Result};
use crate::operator::{RealOperator, RealPreconditioner};

/// Row count above which mat-vecs run on the rayon pool.
pub const PARALLEL_ROW_THRESHOLD: usize = 4096;

/// Real sparse matrix in CSR format.
#[derive(Debug, Clone, PartialEq)]
pub struct CsrMatrix {
    nrows: usize,
    ncols: usize,
    /// Row pointers (length nrows + 1).
    row_ptr: Vec<usize>,
    col_idx: Vec<usize>,
    values: Vec<f64>,
}

impl CsrMatrix {
    /// Create from CSR arrays, validating the structure.
    pub fn from_raw_parts(
        nrows: usize,
        ncols: usize,
        row_ptr: Vec<usize>,
        col_idx: Vec<usize>,
        values: Vec<f64>,
    ) -> Result<Self> {
        if row_ptr.len() != nrows + 1 {
            return Err(Error::InvalidStructure(format!(
                "row_ptr length must be nrows + 1 = {}, got {}",
                nrows + 1,
                row_ptr.len()
            )));
        }
        if row_ptr[0] != 0 || row_ptr.windows(2).any(|w| w[1] < w[0]) {
            return Err(Error::InvalidStructure(
                "row_ptr must start at 0 and be non-decreasing".into(),
            ));
        }
        let nnz = row_ptr[nrows];
        if col_idx.len() != nnz || values.len() != nnz {
            return Err(Error::InvalidStructure(format!(
                "col_idx and values length must match nnz = {}",
                nnz
            )));
        }
        if let Some(&col) = col_idx.iter().find(|&&c| c >= ncols) {
            return Err(Error::InvalidStructure(format!(
                "column index {} out of range for {} columns",
                col, ncols
            )));
        }
        Ok(Self {
            nrows,
            ncols,
            row_ptr,
            col_idx,
            values,
        })
    }

    /// Build from (row, col, value) triplets. Duplicate entries are summed.
    pub fn from_triplets(
        nrows: usize,
        ncols: usize,
        triplets: &[(usize, usize, f64)],
    ) -> Result<Self> {
        let mut entries: BTreeMap<(usize, usize), f64> = BTreeMap::new();
        for &(row, col, val) in triplets {
            if row >= nrows || col >= ncols {
                return Err(Error::InvalidStructure(format!(
                    "entry ({}, {}) out of range for {}x{} matrix",
                    row, col, nrows, ncols
                )));
            }
            *entries.entry((row, col)).or_insert(0.0) += val;
        }

        let mut row_ptr = vec![0; nrows + 1];
        let mut col_idx = Vec::with_capacity(entries.len());
        let mut values = Vec::with_capacity(entries.len());

        let mut current_row = 0;
        for (&(row, col), &val) in &entries {
            while current_row <= row {
                row_ptr[current_row] = col_idx.len();
                current_row += 1;
            }
            col_idx.push(col);
            values.push(val);
        }
        while current_row <= nrows {
            row_ptr[current_row] = col_idx.len();
            current_row += 1;
        }

        Ok(Self {
            nrows,
            ncols,
            row_ptr,
            col_idx,
            values,
        })
    }

    /// `n x n` identity.
    pub fn identity(n: usize) -> Self {
        Self {
            nrows: n,
            ncols: n,
            row_ptr: (0..=n).collect(),
            col_idx: (0..n).collect(),
            values: vec![1.0; n],
        }
    }

    pub fn nrows(&self) -> usize {
        self.nrows
    }

    pub fn ncols(&self) -> usize {
        self.ncols
    }

    /// Number of stored entries.
    pub fn nnz(&self) -> usize {
        self.values.len()
    }

    pub fn row_ptr(&self) -> &[usize] {
        &self.row_ptr
    }

    pub fn col_idx(&self) -> &[usize] {
        &self.col_idx
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    /// Column indices and values of row `i`.
    pub fn row(&self, i: usize) -> (&[usize], &[f64]) {
        let range = self.row_ptr[i]..self.row_ptr[i + 1];
        (&self.col_idx[range.clone()], &self.values[range])
    }

    /// Entry `(i, j)`, summing duplicates; zero if not stored.
    pub fn get(&self, i: usize, j: usize) -> f64 {
        let (cols, vals) = self.row(i);
        cols.iter()
            .zip(vals)
            .filter(|(c, _)| **c == j)
            .map(|(_, v)| v)
            .sum()
    }

    /// Sum of each row's entries.
    pub fn row_sums(&self) -> Vec<f64> {
        (0..self.nrows).map(|i| self.row(i).1.iter().sum()).collect()
    }

    /// y = A * x.
    pub fn matvec(&self, x: &[f64], y: &mut [f64]) -> Result<()> {
        check_len(self.ncols, x.len())?;
        check_len(self.nrows, y.len())?;
        self.matvec_unchecked(x, y);
        Ok(())
    }

    /// y = Aᵀ * x.
    pub fn matvec_transpose(&self, x: &[f64], y: &mut [f64]) -> Result<()> {
        check_len(self.nrows, x.len())?;
        check_len(self.ncols, y.len())?;
        self.matvec_transpose_unchecked(x, y);
        Ok(())
    }

    fn matvec_unchecked(&self, x: &[f64], y: &mut [f64]) {
        let row_dot = |i: usize| -> f64 {
            let (cols, vals) = self.row(i);
            cols.iter().zip(vals).map(|(&c, &v)| v * x[c]).sum()
        };
        if self.nrows >= PARALLEL_ROW_THRESHOLD {
            y.par_iter_mut()
                .enumerate()
                .for_each(|(i, yi)| *yi = row_dot(i));
        } else {
            for (i, yi) in y.iter_mut().enumerate() {
                *yi = row_dot(i);
            }
        }
    }

    fn matvec_transpose_unchecked(&self, x: &[f64], y: &mut [f64]) {
        let scatter = |acc: &mut [f64], rows: std::ops::Range<usize>| {
            for i in rows {
                let (cols, vals) = self.row(i);
                for (&c, &v) in cols.iter().zip(vals) {
                    acc[c] += v * x[i];
                }
            }
        };

        if self.nrows >= PARALLEL_ROW_THRESHOLD {
            let chunk = PARALLEL_ROW_THRESHOLD / 4;
            let ncols = self.ncols;
            let summed = (0..self.nrows.div_ceil(chunk))
                .into_par_iter()
                .fold(
                    || vec![0.0; ncols],
                    |mut acc, c| {
                        let start = c * chunk;
                        scatter(&mut acc[..], start..(start + chunk).min(self.nrows));
                        acc
                    },
                )
                .reduce(
                    || vec![0.0; ncols],
                    |mut a, b| {
                        for (ai, bi) in a.iter_mut().zip(&b) {
                            *ai += bi;
                        }
                        a
                    },
                );
            y.copy_from_slice(&summed);
        } else {
            y.fill(0.0);
            scatter(y, 0..self.nrows);
        }
    }

    /// Explicit transpose (rows become columns).
    pub fn transpose(&self) -> CsrMatrix {
        let mut counts = vec![0usize; self.ncols + 1];
        for &c in &self.col_idx {
            counts[c + 1] += 1;
        }
        for c in 0..self.ncols {
            counts[c + 1] += counts[c];
        }
        let row_ptr = counts.clone();
        let mut next = counts;
        let mut col_idx = vec![0; self.nnz()];
        let mut values = vec![0.0; self.nnz()];
        for i in 0..self.nrows {
            let (cols, vals) = self.row(i);
            for (&c, &v) in cols.iter().zip(vals) {
                let slot = next[c];
                col_idx[slot] = i;
                values[slot] = v;
                next[c] += 1;
            }
        }
        CsrMatrix {
            nrows: self.ncols,
            ncols: self.nrows,
            row_ptr,
            col_idx,
            values,
        }
    }
}

fn check_len(expected: usize, actual: usize) -> Result<()> {
    if expected == actual {
        Ok(())
    } else {
        Err(Error::DimensionMismatch { expected, actual })
    }
}

impl RealOperator for CsrMatrix {
    fn dim(&self) -> usize {
        self.nrows
    }

    fn apply(&self, x: &[f64], y: &mut [f64]) {
        assert_eq!(x.len(), self.ncols);
        assert_eq!(y.len(), self.nrows);
        self.matvec_unchecked(x, y);
    }
}

impl RealPreconditioner for CsrMatrix {
    fn dim(&self) -> usize {
        self.nrows
    }

    fn apply(&self, x: &[f64], y: &mut [f64]) {
        assert_eq!(x.len(), self.ncols);
        assert_eq!(y.len(), self.nrows);
        self.matvec_unchecked(x, y);
    }
}

/// View of a CSR matrix that applies its transpose without materializing it.
#[derive(Debug, Clone, Copy)]
pub struct Transposed<'a>(pub &'a CsrMatrix);

impl RealOperator for Transposed<'_> {
    fn dim(&self) -> usize {
        self.0.ncols
    }

    fn apply(&self, x: &[f64], y: &mut [f64]) {
        assert_eq!(x.len(), self.0.nrows);
        assert_eq!(y.len(), self.0.ncols);
        self.0.matvec_transpose_unchecked(x, y);
    }
}

impl RealPreconditioner for Transposed<'_> {
    fn dim(&self) -> usize {
        self.0.ncols
    }

    fn apply(&self, x: &[f64], y: &mut [f64]) {
        RealOperator::apply(self, x, y);
    }
}
