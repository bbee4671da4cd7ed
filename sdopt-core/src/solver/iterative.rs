//! Krylov solvers.
//!
//! [`BiCgStabSolver`] runs BiCGStab with a Jacobi preconditioner.
//! [`ScaledBiCgStabSolver`] first runs a few iterations to estimate the
//! solution magnitudes, rescales the system by them and then solves the
//! rescaled system. Structures mixing stiff and soft members produce
//! displacements over many orders of magnitude, and the rescaling evens
//! them out.

use super::{check_rhs, LinearSolver};
use crate::error::{Error, Result};
use crate::sparse::{diagonal, dot, norm, spmv, symmetric_scale, CsrMatrix};
use log::{debug, trace};

/// Denominators below this are treated as a breakdown.
const BREAKDOWN: f64 = 1e-300;

/// Relative floor on the scaling factors.
const SCALE_FLOOR: f64 = 1e-8;

/// Result of one BiCGStab run.
#[derive(Debug, Clone)]
pub struct BiCgStabOutcome {
    pub solution: Vec<f64>,
    pub converged: bool,
    pub iterations: usize,
    /// Final residual norm relative to the right-hand side.
    pub relative_residual: f64,
}

/// Jacobi-preconditioned BiCGStab starting from zero.
///
/// Stops when ‖b − A x‖ ≤ `tolerance` ‖b‖ or after `max_iterations`.
/// A non-converged run is still returned; only breakdown is an error.
pub fn bicgstab(a: &CsrMatrix, b: &[f64], tolerance: f64, max_iterations: usize) -> Result<BiCgStabOutcome> {
    let n = b.len();
    let mut x = vec![0.0; n];
    let b_norm = norm(b);
    if b_norm == 0.0 {
        return Ok(BiCgStabOutcome {
            solution: x,
            converged: true,
            iterations: 0,
            relative_residual: 0.0,
        });
    }

    let inv_diag: Vec<f64> = diagonal(a)
        .into_iter()
        .map(|d| if d.abs() > BREAKDOWN { 1.0 / d } else { 1.0 })
        .collect();
    let precondition = |src: &[f64], dst: &mut [f64]| {
        for ((d, s), m) in dst.iter_mut().zip(src).zip(&inv_diag) {
            *d = s * m;
        }
    };

    let mut r = b.to_vec();
    let r0 = r.clone();
    let mut p = vec![0.0; n];
    let mut v = vec![0.0; n];
    let mut s = vec![0.0; n];
    let mut t = vec![0.0; n];
    let mut p_hat = vec![0.0; n];
    let mut s_hat = vec![0.0; n];
    let (mut rho, mut alpha, mut omega) = (1.0, 1.0, 1.0);
    let mut relative_residual = 1.0;

    for iteration in 1..=max_iterations {
        let rho_next = dot(&r0, &r);
        if rho_next.abs() < BREAKDOWN {
            return Err(Error::Solver(format!("BiCGStab breakdown (rho = 0) at iteration {}", iteration)));
        }
        let beta = (rho_next / rho) * (alpha / omega);
        rho = rho_next;
        for i in 0..n {
            p[i] = r[i] + beta * (p[i] - omega * v[i]);
        }

        precondition(&p, &mut p_hat);
        spmv(a, &p_hat, &mut v);
        let r0v = dot(&r0, &v);
        if r0v.abs() < BREAKDOWN {
            return Err(Error::Solver(format!("BiCGStab breakdown (r0·v = 0) at iteration {}", iteration)));
        }
        alpha = rho / r0v;
        for i in 0..n {
            s[i] = r[i] - alpha * v[i];
        }

        let s_norm = norm(&s) / b_norm;
        if s_norm <= tolerance {
            for i in 0..n {
                x[i] += alpha * p_hat[i];
            }
            trace!("BiCGStab iteration {}: relative residual {:e}", iteration, s_norm);
            return Ok(BiCgStabOutcome {
                solution: x,
                converged: true,
                iterations: iteration,
                relative_residual: s_norm,
            });
        }

        precondition(&s, &mut s_hat);
        spmv(a, &s_hat, &mut t);
        let tt = dot(&t, &t);
        if tt < BREAKDOWN {
            return Err(Error::Solver(format!("BiCGStab breakdown (t = 0) at iteration {}", iteration)));
        }
        omega = dot(&t, &s) / tt;
        for i in 0..n {
            x[i] += alpha * p_hat[i] + omega * s_hat[i];
            r[i] = s[i] - omega * t[i];
        }

        relative_residual = norm(&r) / b_norm;
        trace!("BiCGStab iteration {}: relative residual {:e}", iteration, relative_residual);
        if relative_residual <= tolerance {
            return Ok(BiCgStabOutcome {
                solution: x,
                converged: true,
                iterations: iteration,
                relative_residual,
            });
        }
        if omega.abs() < BREAKDOWN {
            return Err(Error::Solver(format!("BiCGStab breakdown (omega = 0) at iteration {}", iteration)));
        }
    }

    Ok(BiCgStabOutcome {
        solution: x,
        converged: false,
        iterations: max_iterations,
        relative_residual,
    })
}

fn require_convergence(outcome: BiCgStabOutcome) -> Result<Vec<f64>> {
    if !outcome.converged {
        return Err(Error::Solver(format!(
            "BiCGStab did not converge in {} iterations (relative residual {:e})",
            outcome.iterations, outcome.relative_residual
        )));
    }
    debug!(
        "BiCGStab converged in {} iterations (relative residual {:e})",
        outcome.iterations, outcome.relative_residual
    );
    Ok(outcome.solution)
}

fn no_adjoint(name: &str) -> Error {
    Error::Solver(format!("{} keeps no factorization, adjoint solves need a direct solver", name))
}

fn prepared(matrix: &Option<CsrMatrix>) -> Result<&CsrMatrix> {
    matrix
        .as_ref()
        .ok_or_else(|| Error::Solver("solve called before compute".into()))
}

/// Jacobi-preconditioned BiCGStab.
pub struct BiCgStabSolver {
    tolerance: f64,
    max_iterations: usize,
    matrix: Option<CsrMatrix>,
}

impl BiCgStabSolver {
    pub fn new(tolerance: f64, max_iterations: usize) -> Self {
        Self {
            tolerance,
            max_iterations,
            matrix: None,
        }
    }
}

impl LinearSolver for BiCgStabSolver {
    fn name(&self) -> &'static str {
        "Jacobi-preconditioned BiCGStab"
    }

    fn compute(&mut self, matrix: &CsrMatrix) -> Result<()> {
        self.matrix = Some(matrix.clone());
        Ok(())
    }

    fn solve(&self, rhs: &[f64]) -> Result<Vec<f64>> {
        let a = prepared(&self.matrix)?;
        check_rhs(a.nrows(), rhs)?;
        require_convergence(bicgstab(a, rhs, self.tolerance, self.max_iterations)?)
    }

    fn solve_adjoint(&self, _rhs: &[f64]) -> Result<Vec<f64>> {
        Err(no_adjoint(self.name()))
    }

    fn supports_adjoint(&self) -> bool {
        false
    }
}

/// BiCGStab on the system rescaled by a rough solution estimate.
///
/// With D = diag(|x₀|) from `rough_iterations` of plain BiCGStab, solves
/// (D K D) y = D f and returns u = D y. Scale factors are floored at
/// 1e-8 · max|x₀|, and all ones are used when the rough solve gives zero.
pub struct ScaledBiCgStabSolver {
    tolerance: f64,
    max_iterations: usize,
    rough_iterations: usize,
    matrix: Option<CsrMatrix>,
}

impl ScaledBiCgStabSolver {
    pub fn new(tolerance: f64, max_iterations: usize, rough_iterations: usize) -> Self {
        Self {
            tolerance,
            max_iterations,
            rough_iterations,
            matrix: None,
        }
    }

    fn scaling(&self, a: &CsrMatrix, rhs: &[f64]) -> Result<Vec<f64>> {
        let rough = bicgstab(a, rhs, self.tolerance, self.rough_iterations)?;
        let peak = rough.solution.iter().fold(0.0_f64, |m, v| m.max(v.abs()));
        if peak == 0.0 || !peak.is_finite() {
            return Ok(vec![1.0; rhs.len()]);
        }
        let floor = peak * SCALE_FLOOR;
        Ok(rough.solution.iter().map(|v| v.abs().max(floor)).collect())
    }
}

impl LinearSolver for ScaledBiCgStabSolver {
    fn name(&self) -> &'static str {
        "rescaled Jacobi-preconditioned BiCGStab"
    }

    fn compute(&mut self, matrix: &CsrMatrix) -> Result<()> {
        self.matrix = Some(matrix.clone());
        Ok(())
    }

    fn solve(&self, rhs: &[f64]) -> Result<Vec<f64>> {
        let a = prepared(&self.matrix)?;
        check_rhs(a.nrows(), rhs)?;
        if norm(rhs) == 0.0 {
            return Ok(vec![0.0; rhs.len()]);
        }

        let scale = self.scaling(a, rhs)?;
        let scaled = symmetric_scale(a, &scale)?;
        let scaled_rhs: Vec<f64> = rhs.iter().zip(&scale).map(|(f, d)| f * d).collect();
        let y = require_convergence(bicgstab(&scaled, &scaled_rhs, self.tolerance, self.max_iterations)?)?;
        Ok(y.iter().zip(&scale).map(|(y, d)| y * d).collect())
    }

    fn solve_adjoint(&self, _rhs: &[f64]) -> Result<Vec<f64>> {
        Err(no_adjoint(self.name()))
    }

    fn supports_adjoint(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::solver::tests::spd_matrix;
    use crate::sparse::TripletMatrix;
    use approx::assert_relative_eq;

    fn residual(a: &CsrMatrix, x: &[f64], b: &[f64]) -> f64 {
        let mut ax = vec![0.0; b.len()];
        spmv(a, x, &mut ax);
        let r: Vec<f64> = ax.iter().zip(b).map(|(p, q)| p - q).collect();
        norm(&r) / norm(b)
    }

    #[test]
    fn test_zero_rhs() {
        let a = spd_matrix(4);
        let outcome = bicgstab(&a, &[0.0; 4], 1e-10, 10).unwrap();
        assert!(outcome.converged);
        assert_eq!(outcome.iterations, 0);
        assert_eq!(outcome.solution, vec![0.0; 4]);
    }

    #[test]
    fn test_diagonal_converges_in_one_iteration() {
        let mut t = TripletMatrix::new(3, 3);
        t.add(0, 0, 2.0);
        t.add(1, 1, 5.0);
        t.add(2, 2, 10.0);
        let a = t.to_csr().unwrap();
        let outcome = bicgstab(&a, &[2.0, 5.0, 10.0], 1e-12, 10).unwrap();
        assert!(outcome.converged);
        assert_eq!(outcome.iterations, 1);
        for x in outcome.solution {
            assert_relative_eq!(x, 1.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_iteration_cap_reported() {
        let a = spd_matrix(60);
        let b = vec![1.0; 60];
        let outcome = bicgstab(&a, &b, 1e-14, 2).unwrap();
        assert!(!outcome.converged);
        assert_eq!(outcome.iterations, 2);

        let solver = BiCgStabSolver {
            tolerance: 1e-14,
            max_iterations: 2,
            matrix: Some(a),
        };
        assert!(matches!(solver.solve(&b), Err(Error::Solver(_))));
    }

    #[test]
    fn test_scaled_solver_handles_disparate_stiffness() {
        let n = 30;
        let mut t = TripletMatrix::new(n, n);
        for i in 0..n {
            let k = if i < n / 2 { 1e3 } else { 1.0 };
            t.add(i, i, 2.0 * k);
            if i + 1 < n {
                t.add(i, i + 1, -0.5 * k.min(1.0));
                t.add(i + 1, i, -0.5 * k.min(1.0));
            }
        }
        let a = t.to_csr().unwrap();
        let b: Vec<f64> = (0..n).map(|i| 1.0 + i as f64).collect();

        let mut solver = ScaledBiCgStabSolver::new(1e-12, 1000, 3);
        solver.compute(&a).unwrap();
        let x = solver.solve(&b).unwrap();
        assert!(residual(&a, &x, &b) < 1e-6);
        assert_eq!(solver.solve(&vec![0.0; n]).unwrap(), vec![0.0; n]);
    }
}
