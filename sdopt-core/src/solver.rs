//! Linear system solvers.
//!
//! Solves the assembled system K u = f for every load case.
//!
//! # Solver Backends
//!
//! - [`FaerCholeskySolver`]: sparse LLᵀ from faer. The default.
//! - [`LdlSolver`]: sparse LDLᵀ from sprs-ldl with an SPD check on D.
//! - [`BiCgStabSolver`]: Jacobi-preconditioned BiCGStab.
//! - [`ScaledBiCgStabSolver`]: a 3-iteration rough BiCGStab solve whose
//!   magnitudes rescale the system before the full solve.
//!
//! Direct solvers keep their factorization, so adjoint systems can be solved
//! after the primal solve without refactoring.

use crate::error::{Error, Result};
use crate::sparse::CsrMatrix;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub mod direct;
pub mod iterative;

pub use direct::{FaerCholeskySolver, LdlSolver};
pub use iterative::{BiCgStabSolver, ScaledBiCgStabSolver};

/// Capability shared by all backends.
pub trait LinearSolver: Send + Sync {
    /// Solver name for diagnostics.
    fn name(&self) -> &'static str;

    /// Prepare solves with `matrix`: factorize it, or keep it for iterations.
    fn compute(&mut self, matrix: &CsrMatrix) -> Result<()>;

    /// Solve K x = rhs.
    fn solve(&self, rhs: &[f64]) -> Result<Vec<f64>>;

    /// Solve Kᵀ λ = rhs with the stored factorization.
    ///
    /// # Errors
    ///
    /// Iterative backends keep no factorization and return [`Error::Solver`].
    fn solve_adjoint(&self, rhs: &[f64]) -> Result<Vec<f64>>;

    /// Whether [`LinearSolver::solve_adjoint`] is available.
    fn supports_adjoint(&self) -> bool;
}

/// Backend selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SolverKind {
    #[default]
    FaerCholesky,
    Ldl,
    #[serde(rename = "bicgstab")]
    BiCgStab,
    #[serde(rename = "scaled-bicgstab")]
    ScaledBiCgStab,
}

impl SolverKind {
    pub const ALL: [SolverKind; 4] = [
        SolverKind::FaerCholesky,
        SolverKind::Ldl,
        SolverKind::BiCgStab,
        SolverKind::ScaledBiCgStab,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            SolverKind::FaerCholesky => "faer-cholesky",
            SolverKind::Ldl => "ldl",
            SolverKind::BiCgStab => "bicgstab",
            SolverKind::ScaledBiCgStab => "scaled-bicgstab",
        }
    }

    pub fn is_direct(self) -> bool {
        matches!(self, SolverKind::FaerCholesky | SolverKind::Ldl)
    }
}

impl fmt::Display for SolverKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SolverKind {
    type Err = Error;

    fn from_str(name: &str) -> Result<Self> {
        SolverKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == name)
            .ok_or_else(|| {
                Error::InvalidArgument(format!(
                    "unknown solver '{}', expected one of: faer-cholesky, ldl, bicgstab, scaled-bicgstab",
                    name
                ))
            })
    }
}

/// Solver configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverConfig {
    pub kind: SolverKind,
    /// Relative residual tolerance for iterative solvers.
    pub tolerance: f64,
    /// Maximum iterations for iterative solvers.
    pub max_iterations: usize,
    /// Iterations of the rough solve that sets the scaling.
    pub rough_iterations: usize,
    /// Condition number above which a system is reported singular.
    pub singularity_threshold: f64,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            kind: SolverKind::FaerCholesky,
            tolerance: 1e-10,
            max_iterations: 10_000,
            rough_iterations: 3,
            singularity_threshold: 1e10,
        }
    }
}

impl SolverConfig {
    pub fn with_kind(mut self, kind: SolverKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = tolerance;
        self
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    pub fn with_rough_iterations(mut self, rough_iterations: usize) -> Self {
        self.rough_iterations = rough_iterations;
        self
    }

    pub fn with_singularity_threshold(mut self, threshold: f64) -> Self {
        self.singularity_threshold = threshold;
        self
    }
}

/// Instantiate the backend selected by `kind`.
pub fn create_solver(kind: SolverKind, config: &SolverConfig) -> Box<dyn LinearSolver> {
    match kind {
        SolverKind::FaerCholesky => Box::new(FaerCholeskySolver::new()),
        SolverKind::Ldl => Box::new(LdlSolver::new()),
        SolverKind::BiCgStab => Box::new(BiCgStabSolver::new(config.tolerance, config.max_iterations)),
        SolverKind::ScaledBiCgStab => Box::new(ScaledBiCgStabSolver::new(
            config.tolerance,
            config.max_iterations,
            config.rough_iterations,
        )),
    }
}

/// Check the right-hand side against the prepared system size.
pub(crate) fn check_rhs(n: usize, rhs: &[f64]) -> Result<()> {
    if rhs.len() != n {
        return Err(Error::Solver(format!(
            "right-hand side has {} entries, system has {}",
            rhs.len(),
            n
        )));
    }
    Ok(())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::sparse::{spmv, TripletMatrix};
    use approx::assert_relative_eq;

    /// 1D Laplacian with a stiff spring at one end: SPD, moderately conditioned.
    pub(crate) fn spd_matrix(n: usize) -> CsrMatrix {
        let mut t = TripletMatrix::new(n, n);
        for i in 0..n {
            t.add(i, i, if i == 0 { 1e3 } else { 2.0 });
            if i + 1 < n {
                t.add(i, i + 1, -1.0);
                t.add(i + 1, i, -1.0);
            }
        }
        t.to_csr().unwrap()
    }

    #[test]
    fn test_solver_kind_parsing() {
        for kind in SolverKind::ALL {
            assert_eq!(kind.as_str().parse::<SolverKind>().unwrap(), kind);
        }
        assert!(matches!(
            "cholmod".parse::<SolverKind>(),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_all_backends_agree() {
        let a = spd_matrix(40);
        let rhs: Vec<f64> = (0..40).map(|i| 1.0 + 0.5 * (i as f64 * 0.3).sin()).collect();
        let config = SolverConfig::default().with_tolerance(1e-12);
        for kind in SolverKind::ALL {
            let mut solver = create_solver(kind, &config);
            solver.compute(&a).unwrap();
            let x = solver.solve(&rhs).unwrap();
            let mut ax = vec![0.0; 40];
            spmv(&a, &x, &mut ax);
            for (lhs, rhs) in ax.iter().zip(&rhs) {
                assert_relative_eq!(*lhs, *rhs, epsilon = 1e-6);
            }
            assert_eq!(solver.supports_adjoint(), kind.is_direct());
        }
    }

    #[test]
    fn test_adjoint_only_after_direct() {
        let a = spd_matrix(5);
        let config = SolverConfig::default();
        let mut direct = create_solver(SolverKind::Ldl, &config);
        direct.compute(&a).unwrap();
        assert!(direct.solve_adjoint(&[1.0; 5]).is_ok());
        let mut iterative = create_solver(SolverKind::BiCgStab, &config);
        iterative.compute(&a).unwrap();
        assert!(matches!(
            iterative.solve_adjoint(&[1.0; 5]),
            Err(Error::Solver(_))
        ));
    }
}
