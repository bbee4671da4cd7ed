//! Sparse direct solvers.
//!
//! Both backends factorize once in [`LinearSolver::compute`] and reuse the
//! factors for every load case and for adjoint solves. The stiffness matrix
//! is symmetric, so the adjoint system shares the primal factorization.

use super::{check_rhs, LinearSolver};
use crate::error::{Error, Result};
use crate::sparse::{diagonal, CsrMatrix};
use faer::linalg::cholesky::llt::factor::LltError;
use faer::prelude::*;
use faer::sparse::linalg::solvers::{Llt, SymbolicLlt};
use faer::sparse::linalg::LltError as SparseLltError;
use faer::sparse::{SparseColMat, SymbolicSparseColMat};
use log::debug;
use sprs::{CsMat, FillInReduction, SymmetryCheck, TriMat};
use sprs_ldl::{Ldl, LdlNumeric};

/// Convert a CSR matrix into faer's CSC layout by transposing the index
/// structure.
fn csr_to_faer_csc(csr: &CsrMatrix) -> SparseColMat<usize, f64> {
    let nrows = csr.nrows();
    let ncols = csr.ncols();
    let row_offsets = csr.row_offsets();
    let col_indices = csr.col_indices();
    let values = csr.values();

    let mut col_offsets = vec![0usize; ncols + 1];
    for &col in col_indices {
        col_offsets[col + 1] += 1;
    }
    for i in 0..ncols {
        col_offsets[i + 1] += col_offsets[i];
    }

    let mut row_indices = vec![0usize; values.len()];
    let mut csc_values = vec![0.0f64; values.len()];
    let mut next = col_offsets[..ncols].to_vec();
    for row in 0..nrows {
        for idx in row_offsets[row]..row_offsets[row + 1] {
            let col = col_indices[idx];
            row_indices[next[col]] = row;
            csc_values[next[col]] = values[idx];
            next[col] += 1;
        }
    }

    // SAFETY: offsets are monotone, row indices are in range and sorted
    // within each column because rows are visited in order.
    unsafe {
        SparseColMat::new(
            SymbolicSparseColMat::new_unchecked(nrows, ncols, col_offsets, None, row_indices),
            csc_values,
        )
    }
}

fn check_square(matrix: &CsrMatrix) -> Result<()> {
    if matrix.nrows() != matrix.ncols() {
        return Err(Error::Solver(format!(
            "matrix must be square, got {}x{}",
            matrix.nrows(),
            matrix.ncols()
        )));
    }
    Ok(())
}

/// Sparse Cholesky (LLᵀ) from faer.
///
/// A non-positive pivot is reported as [`Error::SingularMatrix`], which is
/// how an unrestrained mechanism shows up.
#[derive(Default)]
pub struct FaerCholeskySolver {
    n: usize,
    llt: Option<Llt<usize, f64>>,
}

impl FaerCholeskySolver {
    pub fn new() -> Self {
        Self::default()
    }

    fn factor(&self) -> Result<&Llt<usize, f64>> {
        self.llt
            .as_ref()
            .ok_or_else(|| Error::Solver("solve called before compute".into()))
    }

    fn solve_with_factor(&self, rhs: &[f64]) -> Result<Vec<f64>> {
        check_rhs(self.n, rhs)?;
        if self.n == 0 {
            return Ok(Vec::new());
        }
        let llt = self.factor()?;
        let mut x = faer::Mat::from_fn(self.n, 1, |i, _| rhs[i]);
        llt.solve_in_place(x.as_mut());
        Ok((0..self.n).map(|i| x[(i, 0)]).collect())
    }
}

impl LinearSolver for FaerCholeskySolver {
    fn name(&self) -> &'static str {
        "faer sparse Cholesky (LLᵀ)"
    }

    fn compute(&mut self, matrix: &CsrMatrix) -> Result<()> {
        check_square(matrix)?;
        self.n = matrix.nrows();
        self.llt = None;
        if self.n == 0 {
            return Ok(());
        }

        let csc = csr_to_faer_csc(matrix);
        let csc_ref = csc.as_ref();
        let symbolic = SymbolicLlt::try_new(csc_ref.symbolic(), faer::Side::Lower)
            .map_err(|e| Error::Solver(format!("symbolic Cholesky analysis failed: {:?}", e)))?;
        let llt = Llt::try_new_with_symbolic(symbolic, csc_ref, faer::Side::Lower).map_err(|e| match e {
            SparseLltError::Generic(err) => Error::Solver(format!("sparse Cholesky error: {:?}", err)),
            SparseLltError::Numeric(LltError::NonPositivePivot { index }) => Error::SingularMatrix(format!(
                "stiffness matrix is not positive definite at pivot {}",
                index
            )),
        })?;
        debug!("factorized {} x {} system with {} nonzeros", self.n, self.n, matrix.nnz());
        self.llt = Some(llt);
        Ok(())
    }

    fn solve(&self, rhs: &[f64]) -> Result<Vec<f64>> {
        self.solve_with_factor(rhs)
    }

    fn solve_adjoint(&self, rhs: &[f64]) -> Result<Vec<f64>> {
        self.solve_with_factor(rhs)
    }

    fn supports_adjoint(&self) -> bool {
        true
    }
}

/// Sparse LDLᵀ from sprs-ldl with reverse Cuthill-McKee ordering.
///
/// The stiffness matrix must be positive definite, so any non-positive
/// entry of D is rejected.
#[derive(Default)]
pub struct LdlSolver {
    n: usize,
    ldl: Option<LdlFactor>,
}

/// sprs-ldl cannot order a 1x1 matrix, so that case keeps its pivot.
enum LdlFactor {
    Pivot(f64),
    Sparse(LdlNumeric<f64, usize>),
}

impl LdlSolver {
    pub fn new() -> Self {
        Self::default()
    }

    fn solve_with_factor(&self, rhs: &[f64]) -> Result<Vec<f64>> {
        check_rhs(self.n, rhs)?;
        if self.n == 0 {
            return Ok(Vec::new());
        }
        let ldl = self
            .ldl
            .as_ref()
            .ok_or_else(|| Error::Solver("solve called before compute".into()))?;
        Ok(match ldl {
            LdlFactor::Pivot(d) => vec![rhs[0] / d],
            LdlFactor::Sparse(ldl) => ldl.solve(rhs),
        })
    }
}

impl LinearSolver for LdlSolver {
    fn name(&self) -> &'static str {
        "sprs-ldl sparse LDLᵀ"
    }

    fn compute(&mut self, matrix: &CsrMatrix) -> Result<()> {
        check_square(matrix)?;
        self.n = matrix.nrows();
        self.ldl = None;
        if self.n == 0 {
            return Ok(());
        }
        if self.n == 1 {
            let d = diagonal(matrix)[0];
            if d.is_nan() || d <= 0.0 {
                return Err(Error::SingularMatrix(format!(
                    "stiffness matrix is not positive definite (D[0] = {:e})",
                    d
                )));
            }
            self.ldl = Some(LdlFactor::Pivot(d));
            return Ok(());
        }

        let mut tri = TriMat::new((self.n, self.n));
        for (i, row) in matrix.row_iter().enumerate() {
            for (&j, &v) in row.col_indices().iter().zip(row.values()) {
                tri.add_triplet(i, j, v);
            }
        }
        let csc: CsMat<f64> = tri.to_csc();

        let ldl = Ldl::new()
            .fill_in_reduction(FillInReduction::ReverseCuthillMcKee)
            .check_symmetry(SymmetryCheck::DontCheckSymmetry)
            .numeric(csc.view())
            .map_err(|e| Error::SingularMatrix(format!("LDLᵀ factorization failed: {:?}", e)))?;
        if let Some((index, d)) = ldl.d().iter().enumerate().find(|(_, &d)| d.is_nan() || d <= 0.0) {
            return Err(Error::SingularMatrix(format!(
                "stiffness matrix is not positive definite (D[{}] = {:e})",
                index, d
            )));
        }
        debug!("LDLᵀ factorized {} x {} system", self.n, self.n);
        self.ldl = Some(LdlFactor::Sparse(ldl));
        Ok(())
    }

    fn solve(&self, rhs: &[f64]) -> Result<Vec<f64>> {
        self.solve_with_factor(rhs)
    }

    fn solve_adjoint(&self, rhs: &[f64]) -> Result<Vec<f64>> {
        self.solve_with_factor(rhs)
    }

    fn supports_adjoint(&self) -> bool {
        true
    }
}
