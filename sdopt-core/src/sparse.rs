//! Sparse matrix operations.
//!
//! The global stiffness is stored as nalgebra-sparse CSR. Assembly goes
//! through [`TripletMatrix`] (COO), whose duplicates are summed on conversion.

use crate::error::{Error, Result};
use nalgebra::DMatrix;
use nalgebra_sparse::coo::CooMatrix;
use nalgebra_sparse::csr::CsrMatrix as NalgebraCsr;

/// Compressed Sparse Row matrix.
pub type CsrMatrix = NalgebraCsr<f64>;

/// Builder for assembling a sparse matrix from triplets (COO format).
pub struct TripletMatrix {
    n_rows: usize,
    n_cols: usize,
    rows: Vec<usize>,
    cols: Vec<usize>,
    values: Vec<f64>,
}

impl TripletMatrix {
    pub fn new(n_rows: usize, n_cols: usize) -> Self {
        Self::with_capacity(n_rows, n_cols, 0)
    }

    pub fn with_capacity(n_rows: usize, n_cols: usize, nnz_estimate: usize) -> Self {
        Self {
            n_rows,
            n_cols,
            rows: Vec::with_capacity(nnz_estimate),
            cols: Vec::with_capacity(nnz_estimate),
            values: Vec::with_capacity(nnz_estimate),
        }
    }

    /// Add a value at (row, col). Duplicates are summed during conversion.
    pub fn add(&mut self, row: usize, col: usize, value: f64) {
        debug_assert!(row < self.n_rows, "Row index out of bounds");
        debug_assert!(col < self.n_cols, "Column index out of bounds");
        if value != 0.0 {
            self.rows.push(row);
            self.cols.push(col);
            self.values.push(value);
        }
    }

    /// Scatter an element matrix. Rows and columns mapped to `None`
    /// (constrained or unused DOFs) are dropped.
    pub fn add_element_matrix(&mut self, dofs: &[Option<usize>], k: &DMatrix<f64>) {
        debug_assert_eq!(k.nrows(), dofs.len());
        debug_assert_eq!(k.ncols(), dofs.len());
        for (i, row) in dofs.iter().enumerate() {
            let Some(row) = *row else { continue };
            for (j, col) in dofs.iter().enumerate() {
                if let Some(col) = *col {
                    self.add(row, col, k[(i, j)]);
                }
            }
        }
    }

    /// Number of stored triplets.
    pub fn nnz(&self) -> usize {
        self.values.len()
    }

    /// Convert to CSR, summing duplicate entries.
    pub fn to_csr(self) -> Result<CsrMatrix> {
        let coo = CooMatrix::try_from_triplets(
            self.n_rows,
            self.n_cols,
            self.rows,
            self.cols,
            self.values,
        )
        .map_err(|e| Error::Assembly(format!("invalid triplet data: {}", e)))?;
        Ok(CsrMatrix::from(&coo))
    }
}

/// y = A x.
pub fn spmv(a: &CsrMatrix, x: &[f64], y: &mut [f64]) {
    for (yi, row) in y.iter_mut().zip(a.row_iter()) {
        *yi = row
            .col_indices()
            .iter()
            .zip(row.values())
            .map(|(&j, &v)| v * x[j])
            .sum();
    }
}

/// Main diagonal of a square matrix; missing entries are zero.
pub fn diagonal(a: &CsrMatrix) -> Vec<f64> {
    a.row_iter()
        .enumerate()
        .map(|(i, row)| {
            row.col_indices()
                .iter()
                .zip(row.values())
                .find(|(&j, _)| j == i)
                .map_or(0.0, |(_, &v)| v)
        })
        .collect()
}

/// `S A S` with `S = diag(scale)`, on the same sparsity pattern.
pub fn symmetric_scale(a: &CsrMatrix, scale: &[f64]) -> Result<CsrMatrix> {
    let mut values = Vec::with_capacity(a.nnz());
    for (i, row) in a.row_iter().enumerate() {
        for (&j, &v) in row.col_indices().iter().zip(row.values()) {
            values.push(v * scale[i] * scale[j]);
        }
    }
    CsrMatrix::try_from_csr_data(
        a.nrows(),
        a.ncols(),
        a.row_offsets().to_vec(),
        a.col_indices().to_vec(),
        values,
    )
    .map_err(|e| Error::Solver(format!("cannot rescale matrix: {}", e)))
}

pub fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

pub fn norm(a: &[f64]) -> f64 {
    dot(a, a).sqrt()
}
