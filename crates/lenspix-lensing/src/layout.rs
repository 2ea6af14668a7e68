//! Memoized row layout of lensing matrices.
//!
//! Every lensing matrix on an `nx x ny` grid has exactly four entries per
//! row, so its COO row indices and CSR row pointers depend only on the grid
//! shape. They are built once per shape and shared process-wide.

use std::collections::HashMap;
use std::sync::{Arc, LazyLock};

use lenspix_solver::{CsrMatrix, Result};
use parking_lot::Mutex;

/// Entries per matrix row.
pub const STENCIL_SIZE: usize = 4;

/// Row structure shared by all lensing matrices of one grid shape.
#[derive(Debug)]
pub struct RowLayout {
    nx: usize,
    ny: usize,
    /// COO row index of every entry: `rows[4 * i + k] == i`.
    rows: Vec<usize>,
    /// CSR row pointers: `row_ptr[i] == 4 * i`.
    row_ptr: Vec<usize>,
}

impl RowLayout {
    fn new(nx: usize, ny: usize) -> Self {
        let n = nx * ny;
        Self {
            nx,
            ny,
            rows: (0..n)
                .flat_map(|i| std::iter::repeat_n(i, STENCIL_SIZE))
                .collect(),
            row_ptr: (0..=n).map(|i| STENCIL_SIZE * i).collect(),
        }
    }

    pub fn nx(&self) -> usize {
        self.nx
    }

    pub fn ny(&self) -> usize {
        self.ny
    }

    pub fn npix(&self) -> usize {
        self.nx * self.ny
    }

    pub fn rows(&self) -> &[usize] {
        &self.rows
    }

    pub fn row_ptr(&self) -> &[usize] {
        &self.row_ptr
    }

    /// CSR matrix from per-row stencil columns and weights (length `4N` each).
    pub fn assemble(&self, col_idx: Vec<usize>, values: Vec<f64>) -> Result<CsrMatrix> {
        let n = self.npix();
        CsrMatrix::from_raw_parts(n, n, self.row_ptr.clone(), col_idx, values)
    }

    /// `(row, col, weight)` triplets of a matrix with this layout.
    pub fn triplets(&self, matrix: &CsrMatrix) -> Vec<(usize, usize, f64)> {
        self.rows
            .iter()
            .zip(matrix.col_idx().iter().zip(matrix.values()))
            .map(|(&r, (&c, &v))| (r, c, v))
            .collect()
    }
}

static ROW_LAYOUTS: LazyLock<Mutex<HashMap<(usize, usize), Arc<RowLayout>>>> =
    LazyLock::new(|| Mutex::new(HashMap::new()));

/// Shared layout for an `nx x ny` grid, built on first request.
pub fn row_layout(nx: usize, ny: usize) -> Arc<RowLayout> {
    let mut layouts = ROW_LAYOUTS.lock();
    layouts
        .entry((nx, ny))
        .or_insert_with(|| {
            log::debug!("building row layout for {}x{} grid", nx, ny);
            Arc::new(RowLayout::new(nx, ny))
        })
        .clone()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_four_entries_per_row() {
        let layout = row_layout(3, 2);
        assert_eq!(layout.rows().len(), 24);
        assert_eq!(layout.row_ptr(), &[0, 4, 8, 12, 16, 20, 24]);
        assert_eq!(&layout.rows()[4..8], &[1, 1, 1, 1]);
    }

    #[test]
    fn test_repeated_shapes_share_layout() {
        let a = row_layout(5, 7);
        let b = row_layout(5, 7);
        let c = row_layout(7, 5);
        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));
        assert_eq!((c.nx(), c.ny(), c.npix()), (7, 5, 35));
    }

    #[test]
    fn test_assemble_and_recover_triplets() {
        let layout = row_layout(2, 2);
        let cols: Vec<usize> = (0..16).map(|k| (k / 4 + k % 4) % 4).collect();
        let vals: Vec<f64> = (0..16).map(|k| k as f64).collect();
        let m = layout.assemble(cols.clone(), vals).unwrap();
        assert_eq!(m.nnz(), 16);

        let t = layout.triplets(&m);
        assert_eq!(t[5], (1, cols[5], 5.0));
        assert_eq!(t[15].0, 3);
    }

    #[test]
    fn test_assemble_rejects_short_input() {
        assert!(row_layout(2, 2).assemble(vec![0; 15], vec![0.0; 15]).is_err());
    }
}
