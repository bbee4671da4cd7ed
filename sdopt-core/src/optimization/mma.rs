//! Method of Moving Asymptotes.
//!
//! One call to [`mma_update`] performs one outer MMA iteration for
//!
//! ```text
//! minimize    f0(x) + a0 z + Σ (c_i y_i + ½ d_i y_i²)
//! subject to  f_i(x) − a_i z − y_i ≤ 0,   i = 1..m
//!             xmin ≤ x ≤ xmax,  y ≥ 0,  z ≥ 0
//! ```
//!
//! The objective and constraints are replaced by separable convex
//! approximations built around moving asymptotes `low < x < upp`, and the
//! approximate problem is solved by a primal-dual interior-point method.
//! The Newton system is reduced to size m + 1 when m < n and to n + 1
//! otherwise.

use crate::error::{Error, Result};
use log::{trace, warn};
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

/// Algorithm constants and the artificial-variable weights.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MmaSettings {
    /// Initial asymptote distance as a fraction of the box width.
    pub asyinit: f64,
    /// Asymptote expansion factor for monotone variables.
    pub asyincr: f64,
    /// Asymptote contraction factor for oscillating variables.
    pub asydecr: f64,
    /// Fraction of the asymptote distance a variable may move.
    pub albefa: f64,
    /// Fraction of the box width a variable may move.
    pub move_limit: f64,
    /// Regularization of the approximations.
    pub raa0: f64,
    /// Final barrier parameter.
    pub epsimin: f64,
    pub a0: f64,
    /// Per-constraint weight of z.
    pub a: Vec<f64>,
    /// Per-constraint linear weight of y.
    pub c: Vec<f64>,
    /// Per-constraint quadratic weight of y.
    pub d: Vec<f64>,
    pub max_inner_iterations: usize,
    pub max_line_search_halvings: usize,
}

impl Default for MmaSettings {
    fn default() -> Self {
        Self::with_constraints(1)
    }
}

impl MmaSettings {
    /// Standard settings for `m` constraints: a0 = 1, a = 0, c = 1000, d = 1.
    pub fn with_constraints(m: usize) -> Self {
        Self {
            asyinit: 0.5,
            asyincr: 1.2,
            asydecr: 0.7,
            albefa: 0.1,
            move_limit: 0.5,
            raa0: 1e-5,
            epsimin: 1e-7,
            a0: 1.0,
            a: vec![0.0; m],
            c: vec![1000.0; m],
            d: vec![1.0; m],
            max_inner_iterations: 200,
            max_line_search_halvings: 50,
        }
    }

    pub fn with_move_limit(mut self, move_limit: f64) -> Self {
        self.move_limit = move_limit;
        self
    }

    pub fn n_constraints(&self) -> usize {
        self.a.len()
    }
}

/// Moving asymptotes carried between iterations.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MmaState {
    pub low: Vec<f64>,
    pub upp: Vec<f64>,
}

/// Data of one outer iteration.
#[derive(Debug, Clone, Copy)]
pub struct MmaInput<'a> {
    /// Outer iteration counter, starting at 1.
    pub iteration: usize,
    pub x: &'a [f64],
    pub xmin: &'a [f64],
    pub xmax: &'a [f64],
    /// Iterate of the previous iteration.
    pub xold1: &'a [f64],
    /// Iterate two iterations back.
    pub xold2: &'a [f64],
    pub f0: f64,
    pub df0dx: &'a [f64],
    /// Constraint values, length m.
    pub fval: &'a [f64],
    /// Constraint gradients, m × n.
    pub dfdx: &'a DMatrix<f64>,
}

/// Solution of the approximate subproblem.
#[derive(Debug, Clone, PartialEq)]
pub struct MmaUpdate {
    pub x: Vec<f64>,
    pub y: Vec<f64>,
    pub z: f64,
    pub lambda: Vec<f64>,
    pub xsi: Vec<f64>,
    pub eta: Vec<f64>,
    pub mu: Vec<f64>,
    pub zeta: f64,
    pub s: Vec<f64>,
    pub low: Vec<f64>,
    pub upp: Vec<f64>,
}

/// Separable convex subproblem around the current iterate.
struct Subproblem<'a> {
    settings: &'a MmaSettings,
    low: DVector<f64>,
    upp: DVector<f64>,
    alfa: DVector<f64>,
    beta: DVector<f64>,
    p0: DVector<f64>,
    q0: DVector<f64>,
    p: DMatrix<f64>,
    q: DMatrix<f64>,
    a: DVector<f64>,
    b: DVector<f64>,
    c: DVector<f64>,
    d: DVector<f64>,
}

/// Primal-dual point of the interior-point method.
#[derive(Debug, Clone)]
struct Iterate {
    x: DVector<f64>,
    y: DVector<f64>,
    z: f64,
    lam: DVector<f64>,
    xsi: DVector<f64>,
    eta: DVector<f64>,
    mu: DVector<f64>,
    zet: f64,
    s: DVector<f64>,
}

impl Iterate {
    fn step(&self, dir: &Iterate, t: f64) -> Iterate {
        Iterate {
            x: &self.x + &dir.x * t,
            y: &self.y + &dir.y * t,
            z: self.z + dir.z * t,
            lam: &self.lam + &dir.lam * t,
            xsi: &self.xsi + &dir.xsi * t,
            eta: &self.eta + &dir.eta * t,
            mu: &self.mu + &dir.mu * t,
            zet: self.zet + dir.zet * t,
            s: &self.s + &dir.s * t,
        }
    }
}

fn check_len(name: &str, len: usize, expected: usize) -> Result<()> {
    if len != expected {
        return Err(Error::InvalidArgument(format!(
            "MMA input '{}' has length {}, expected {}",
            name, len, expected
        )));
    }
    Ok(())
}

/// One MMA iteration.
///
/// `state` holds the asymptotes of the previous call and is ignored for the
/// first two iterations.
///
/// # Errors
///
/// [`Error::InvalidArgument`] on inconsistent dimensions and
/// [`Error::Optimization`] if a Newton system of the subsolver is singular.
pub fn mma_update(settings: &MmaSettings, input: &MmaInput<'_>, state: &MmaState) -> Result<MmaUpdate> {
    let n = input.x.len();
    let m = settings.n_constraints();
    for (name, len) in [
        ("xmin", input.xmin.len()),
        ("xmax", input.xmax.len()),
        ("xold1", input.xold1.len()),
        ("xold2", input.xold2.len()),
        ("df0dx", input.df0dx.len()),
    ] {
        check_len(name, len, n)?;
    }
    check_len("fval", input.fval.len(), m)?;
    check_len("c", settings.c.len(), m)?;
    check_len("d", settings.d.len(), m)?;
    if input.dfdx.nrows() != m || input.dfdx.ncols() != n {
        return Err(Error::InvalidArgument(format!(
            "MMA constraint Jacobian is {}x{}, expected {}x{}",
            input.dfdx.nrows(),
            input.dfdx.ncols(),
            m,
            n
        )));
    }
    if input.iteration > 2 {
        check_len("low", state.low.len(), n)?;
        check_len("upp", state.upp.len(), n)?;
    }
    if n == 0 {
        return Ok(MmaUpdate {
            x: Vec::new(),
            y: vec![0.0; m],
            z: 0.0,
            lambda: vec![0.0; m],
            xsi: Vec::new(),
            eta: Vec::new(),
            mu: vec![0.0; m],
            zeta: 0.0,
            s: vec![0.0; m],
            low: Vec::new(),
            upp: Vec::new(),
        });
    }

    let sub = Subproblem::build(settings, input, state);
    let solution = sub.solve()?;
    Ok(MmaUpdate {
        x: solution.x.as_slice().to_vec(),
        y: solution.y.as_slice().to_vec(),
        z: solution.z,
        lambda: solution.lam.as_slice().to_vec(),
        xsi: solution.xsi.as_slice().to_vec(),
        eta: solution.eta.as_slice().to_vec(),
        mu: solution.mu.as_slice().to_vec(),
        zeta: solution.zet,
        s: solution.s.as_slice().to_vec(),
        low: sub.low.as_slice().to_vec(),
        upp: sub.upp.as_slice().to_vec(),
    })
}

impl<'a> Subproblem<'a> {
    fn build(settings: &'a MmaSettings, input: &MmaInput<'_>, state: &MmaState) -> Self {
        let n = input.x.len();
        let m = settings.n_constraints();
        let x = DVector::from_column_slice(input.x);
        let xmin = DVector::from_column_slice(input.xmin);
        let xmax = DVector::from_column_slice(input.xmax);
        let range = &xmax - &xmin;

        let (low, upp) = if input.iteration <= 2 {
            (&x - &range * settings.asyinit, &x + &range * settings.asyinit)
        } else {
            let mut low = DVector::zeros(n);
            let mut upp = DVector::zeros(n);
            for j in 0..n {
                let trend = (input.x[j] - input.xold1[j]) * (input.xold1[j] - input.xold2[j]);
                let factor = if trend > 0.0 {
                    settings.asyincr
                } else if trend < 0.0 {
                    settings.asydecr
                } else {
                    1.0
                };
                let l = x[j] - factor * (input.xold1[j] - state.low[j]);
                let u = x[j] + factor * (state.upp[j] - input.xold1[j]);
                low[j] = l.max(x[j] - 10.0 * range[j]).min(x[j] - 0.01 * range[j]);
                upp[j] = u.min(x[j] + 10.0 * range[j]).max(x[j] + 0.01 * range[j]);
            }
            (low, upp)
        };

        let alfa = DVector::from_fn(n, |j, _| {
            (low[j] + settings.albefa * (x[j] - low[j]))
                .max(x[j] - settings.move_limit * range[j])
                .max(xmin[j])
        });
        let beta = DVector::from_fn(n, |j, _| {
            (upp[j] - settings.albefa * (upp[j] - x[j]))
                .min(x[j] + settings.move_limit * range[j])
                .min(xmax[j])
        });

        let range_inv = range.map(|r| 1.0 / r.max(1e-5));
        let ux2 = (&upp - &x).map(|v| v * v);
        let xl2 = (&x - &low).map(|v| v * v);

        let mut p0 = DVector::zeros(n);
        let mut q0 = DVector::zeros(n);
        for j in 0..n {
            let g = input.df0dx[j];
            let reg = 0.001 * g.abs() + settings.raa0 * range_inv[j];
            p0[j] = (g.max(0.0) + reg) * ux2[j];
            q0[j] = ((-g).max(0.0) + reg) * xl2[j];
        }

        let mut p = DMatrix::zeros(m, n);
        let mut q = DMatrix::zeros(m, n);
        for i in 0..m {
            for j in 0..n {
                let g = input.dfdx[(i, j)];
                let reg = 0.001 * g.abs() + settings.raa0 * range_inv[j];
                p[(i, j)] = (g.max(0.0) + reg) * ux2[j];
                q[(i, j)] = ((-g).max(0.0) + reg) * xl2[j];
            }
        }

        let uxinv = (&upp - &x).map(|v| 1.0 / v);
        let xlinv = (&x - &low).map(|v| 1.0 / v);
        let b = &p * &uxinv + &q * &xlinv - DVector::from_column_slice(input.fval);

        Self {
            settings,
            low,
            upp,
            alfa,
            beta,
            p0,
            q0,
            p,
            q,
            a: DVector::from_column_slice(&settings.a),
            b,
            c: DVector::from_column_slice(&settings.c),
            d: DVector::from_column_slice(&settings.d),
        }
    }

    fn n(&self) -> usize {
        self.p0.len()
    }

    fn m(&self) -> usize {
        self.b.len()
    }

    fn initial_point(&self) -> Iterate {
        let n = self.n();
        let m = self.m();
        let x = (&self.alfa + &self.beta) * 0.5;
        Iterate {
            xsi: DVector::from_fn(n, |j, _| (1.0 / (x[j] - self.alfa[j])).max(1.0)),
            eta: DVector::from_fn(n, |j, _| (1.0 / (self.beta[j] - x[j])).max(1.0)),
            x,
            y: DVector::from_element(m, 1.0),
            z: 1.0,
            lam: DVector::from_element(m, 1.0),
            mu: self.c.map(|c| (0.5 * c).max(1.0)),
            zet: 1.0,
            s: DVector::from_element(m, 1.0),
        }
    }

    /// Perturbed KKT residual at barrier parameter `epsi`.
    fn residual(&self, it: &Iterate, epsi: f64) -> DVector<f64> {
        let n = self.n();
        let m = self.m();
        let ux1 = &self.upp - &it.x;
        let xl1 = &it.x - &self.low;
        let plam = &self.p0 + self.p.tr_mul(&it.lam);
        let qlam = &self.q0 + self.q.tr_mul(&it.lam);
        let gvec = &self.p * ux1.map(|v| 1.0 / v) + &self.q * xl1.map(|v| 1.0 / v);

        let mut r = Vec::with_capacity(3 * n + 4 * m + 2);
        for j in 0..n {
            let dpsidx = plam[j] / (ux1[j] * ux1[j]) - qlam[j] / (xl1[j] * xl1[j]);
            r.push(dpsidx - it.xsi[j] + it.eta[j]);
        }
        for i in 0..m {
            r.push(self.c[i] + self.d[i] * it.y[i] - it.mu[i] - it.lam[i]);
        }
        r.push(self.settings.a0 - it.zet - self.a.dot(&it.lam));
        for i in 0..m {
            r.push(gvec[i] - self.a[i] * it.z - it.y[i] + it.s[i] - self.b[i]);
        }
        for j in 0..n {
            r.push(it.xsi[j] * (it.x[j] - self.alfa[j]) - epsi);
        }
        for j in 0..n {
            r.push(it.eta[j] * (self.beta[j] - it.x[j]) - epsi);
        }
        for i in 0..m {
            r.push(it.mu[i] * it.y[i] - epsi);
        }
        r.push(it.zet * it.z - epsi);
        for i in 0..m {
            r.push(it.lam[i] * it.s[i] - epsi);
        }
        DVector::from_vec(r)
    }

    /// Newton direction for the perturbed KKT system.
    fn newton_direction(&self, it: &Iterate, epsi: f64) -> Result<Iterate> {
        let n = self.n();
        let m = self.m();
        let ux1 = &self.upp - &it.x;
        let xl1 = &it.x - &self.low;
        let plam = &self.p0 + self.p.tr_mul(&it.lam);
        let qlam = &self.q0 + self.q.tr_mul(&it.lam);
        let gvec = &self.p * ux1.map(|v| 1.0 / v) + &self.q * xl1.map(|v| 1.0 / v);

        let mut gg = DMatrix::zeros(m, n);
        for i in 0..m {
            for j in 0..n {
                gg[(i, j)] = self.p[(i, j)] / (ux1[j] * ux1[j]) - self.q[(i, j)] / (xl1[j] * xl1[j]);
            }
        }

        let x_alfa = &it.x - &self.alfa;
        let beta_x = &self.beta - &it.x;
        let delx = DVector::from_fn(n, |j, _| {
            plam[j] / (ux1[j] * ux1[j]) - qlam[j] / (xl1[j] * xl1[j]) - epsi / x_alfa[j] + epsi / beta_x[j]
        });
        let dely = DVector::from_fn(m, |i, _| self.c[i] + self.d[i] * it.y[i] - it.lam[i] - epsi / it.y[i]);
        let delz = self.settings.a0 - self.a.dot(&it.lam) - epsi / it.z;
        let dellam = DVector::from_fn(m, |i, _| {
            gvec[i] - self.a[i] * it.z - it.y[i] - self.b[i] + epsi / it.lam[i]
        });
        let diagx = DVector::from_fn(n, |j, _| {
            2.0 * (plam[j] / ux1[j].powi(3) + qlam[j] / xl1[j].powi(3))
                + it.xsi[j] / x_alfa[j]
                + it.eta[j] / beta_x[j]
        });
        let diagy = DVector::from_fn(m, |i, _| self.d[i] + it.mu[i] / it.y[i]);
        let diaglamyi = DVector::from_fn(m, |i, _| it.s[i] / it.lam[i] + 1.0 / diagy[i]);

        let singular = || Error::Optimization("MMA Newton system is singular".into());
        let (dx, dz, dlam) = if m < n {
            let blam = &dellam + dely.component_div(&diagy) - &gg * delx.component_div(&diagx);
            let gg_scaled = DMatrix::from_fn(m, n, |i, j| gg[(i, j)] / diagx[j]);
            let alam = DMatrix::from_diagonal(&diaglamyi) + &gg_scaled * gg.transpose();
            let mut aa = DMatrix::zeros(m + 1, m + 1);
            aa.view_mut((0, 0), (m, m)).copy_from(&alam);
            for i in 0..m {
                aa[(i, m)] = self.a[i];
                aa[(m, i)] = self.a[i];
            }
            aa[(m, m)] = -it.zet / it.z;
            let mut bb = DVector::zeros(m + 1);
            bb.rows_mut(0, m).copy_from(&blam);
            bb[m] = delz;
            let sol = aa.lu().solve(&bb).ok_or_else(singular)?;
            let dlam = sol.rows(0, m).into_owned();
            let dz = sol[m];
            let dx = -(&delx + gg.tr_mul(&dlam)).component_div(&diagx);
            (dx, dz, dlam)
        } else {
            let dellamyi = &dellam + dely.component_div(&diagy);
            let a_over = self.a.component_div(&diaglamyi);
            let gg_scaled = DMatrix::from_fn(m, n, |i, j| gg[(i, j)] / diaglamyi[i]);
            let axx = DMatrix::from_diagonal(&diagx) + gg.tr_mul(&gg_scaled);
            let azz = it.zet / it.z + self.a.dot(&a_over);
            let axz = -gg.tr_mul(&a_over);
            let ratio = dellamyi.component_div(&diaglamyi);
            let bx = &delx + gg.tr_mul(&ratio);
            let bz = delz - self.a.dot(&ratio);

            let mut aa = DMatrix::zeros(n + 1, n + 1);
            aa.view_mut((0, 0), (n, n)).copy_from(&axx);
            for j in 0..n {
                aa[(j, n)] = axz[j];
                aa[(n, j)] = axz[j];
            }
            aa[(n, n)] = azz;
            let mut bb = DVector::zeros(n + 1);
            bb.rows_mut(0, n).copy_from(&(-bx));
            bb[n] = -bz;
            let sol = aa.lu().solve(&bb).ok_or_else(singular)?;
            let dx = sol.rows(0, n).into_owned();
            let dz = sol[n];
            let dlam = (&gg * &dx).component_div(&diaglamyi) - &a_over * dz + &ratio;
            (dx, dz, dlam)
        };

        let dy = (&dlam - &dely).component_div(&diagy);
        let dxsi = DVector::from_fn(n, |j, _| -it.xsi[j] + epsi / x_alfa[j] - it.xsi[j] * dx[j] / x_alfa[j]);
        let deta = DVector::from_fn(n, |j, _| -it.eta[j] + epsi / beta_x[j] + it.eta[j] * dx[j] / beta_x[j]);
        let dmu = DVector::from_fn(m, |i, _| -it.mu[i] + epsi / it.y[i] - it.mu[i] * dy[i] / it.y[i]);
        let dzet = -it.zet + epsi / it.z - it.zet * dz / it.z;
        let ds = DVector::from_fn(m, |i, _| -it.s[i] + epsi / it.lam[i] - it.s[i] * dlam[i] / it.lam[i]);

        Ok(Iterate {
            x: dx,
            y: dy,
            z: dz,
            lam: dlam,
            xsi: dxsi,
            eta: deta,
            mu: dmu,
            zet: dzet,
            s: ds,
        })
    }

    /// Largest step in (0, 1] keeping the iterate strictly interior, with
    /// the 1.01 safety factor.
    fn max_step(&self, it: &Iterate, dir: &Iterate) -> f64 {
        let mut worst: f64 = 1.0;
        let mut push = |value: f64, delta: f64| {
            worst = worst.max(-1.01 * delta / value);
        };
        for (v, d) in [(&it.y, &dir.y), (&it.lam, &dir.lam), (&it.xsi, &dir.xsi), (&it.eta, &dir.eta), (&it.mu, &dir.mu), (&it.s, &dir.s)] {
            for (value, delta) in v.iter().zip(d.iter()) {
                push(*value, *delta);
            }
        }
        push(it.z, dir.z);
        push(it.zet, dir.zet);
        for j in 0..self.n() {
            push(it.x[j] - self.alfa[j], dir.x[j]);
            push(self.beta[j] - it.x[j], -dir.x[j]);
        }
        1.0 / worst
    }

    fn solve(&self) -> Result<Iterate> {
        let settings = self.settings;
        let mut it = self.initial_point();
        let mut epsi = 1.0;
        let mut total_inner = 0;

        while epsi > settings.epsimin {
            let residual = self.residual(&it, epsi);
            let mut residual_norm = residual.norm();
            let mut residual_max = residual.amax();
            let mut inner = 0;

            while residual_max > 0.9 * epsi && inner < settings.max_inner_iterations {
                inner += 1;
                let dir = self.newton_direction(&it, epsi)?;
                let mut step = self.max_step(&it, &dir);

                let mut halvings = 0;
                let mut candidate = it.step(&dir, step);
                let mut candidate_residual = self.residual(&candidate, epsi);
                while candidate_residual.norm() > residual_norm {
                    if halvings == settings.max_line_search_halvings {
                        warn!(
                            "MMA line search hit {} halvings at barrier {:e}; taking the last step",
                            halvings, epsi
                        );
                        break;
                    }
                    halvings += 1;
                    step *= 0.5;
                    candidate = it.step(&dir, step);
                    candidate_residual = self.residual(&candidate, epsi);
                }

                it = candidate;
                residual_norm = candidate_residual.norm();
                residual_max = candidate_residual.amax();
            }

            if inner == settings.max_inner_iterations && residual_max > 0.9 * epsi {
                warn!(
                    "MMA subsolver reached {} inner iterations at barrier {:e} (residual {:e})",
                    inner, epsi, residual_max
                );
            }
            total_inner += inner;
            epsi *= 0.5;
        }
        trace!("MMA subsolver used {} Newton iterations", total_inner);
        Ok(it)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    /// Drive `mma_update` for `iterations` steps on a problem given by
    /// `evaluate(x) -> (f0, df0dx, fval, dfdx)`.
    fn run(
        x0: Vec<f64>,
        xmin: Vec<f64>,
        xmax: Vec<f64>,
        settings: &MmaSettings,
        iterations: usize,
        evaluate: impl Fn(&[f64]) -> (f64, Vec<f64>, Vec<f64>, DMatrix<f64>),
    ) -> Vec<f64> {
        let mut x = x0.clone();
        let mut xold1 = x0.clone();
        let mut xold2 = x0;
        let mut state = MmaState::default();
        for iteration in 1..=iterations {
            let (f0, df0dx, fval, dfdx) = evaluate(&x);
            let input = MmaInput {
                iteration,
                x: &x,
                xmin: &xmin,
                xmax: &xmax,
                xold1: &xold1,
                xold2: &xold2,
                f0,
                df0dx: &df0dx,
                fval: &fval,
                dfdx: &dfdx,
            };
            let update = mma_update(settings, &input, &state).unwrap();
            for j in 0..x.len() {
                assert!(update.x[j] >= xmin[j] - 1e-12 && update.x[j] <= xmax[j] + 1e-12);
                assert!(update.low[j] < update.x[j] && update.x[j] < update.upp[j]);
            }
            xold2 = std::mem::replace(&mut xold1, x.clone());
            x = update.x;
            state = MmaState {
                low: update.low,
                upp: update.upp,
            };
        }
        x
    }

    #[test]
    fn test_unconstrained_quadratic_approaches_target() {
        let target = [0.2, 0.45, 0.8, 0.6];
        let objective = |x: &[f64]| x.iter().zip(&target).map(|(x, t)| (x - t).powi(2)).sum::<f64>();
        let settings = MmaSettings::with_constraints(1);
        let x = run(vec![0.5; 4], vec![0.0; 4], vec![1.0; 4], &settings, 60, |x| {
            let df0dx = x.iter().zip(&target).map(|(x, t)| 2.0 * (x - t)).collect();
            // Σx ≤ 4 never binds inside the box.
            let fval = vec![x.iter().sum::<f64>() - 4.0];
            (objective(x), df0dx, fval, DMatrix::from_element(1, 4, 1.0))
        });
        // Near the optimum the asymptotes sit at their closest allowed
        // distance and the iterate may alternate around the target.
        assert!(objective(&x) < 1e-3 * objective(&[0.5; 4]));
        for (x, t) in x.iter().zip(&target) {
            assert_relative_eq!(*x, *t, epsilon = 1e-2);
        }
    }

    #[test]
    fn test_two_constraint_toy_problem() {
        // min x1² + x2² + x3²
        // s.t. (x1-5)² + (x2-2)² + (x3-1)² ≤ 9
        //      (x1-3)² + (x2-4)² + (x3-3)² ≤ 9
        let settings = MmaSettings::with_constraints(2);
        let x = run(vec![4.0, 3.0, 2.0], vec![0.0; 3], vec![5.0; 3], &settings, 60, |x| {
            let f0 = x.iter().map(|v| v * v).sum();
            let df0dx = x.iter().map(|v| 2.0 * v).collect();
            let c1 = [5.0, 2.0, 1.0];
            let c2 = [3.0, 4.0, 3.0];
            let g = |c: &[f64; 3]| x.iter().zip(c).map(|(v, c)| (v - c).powi(2)).sum::<f64>() - 9.0;
            let dfdx = DMatrix::from_fn(2, 3, |i, j| {
                let c = if i == 0 { c1[j] } else { c2[j] };
                2.0 * (x[j] - c)
            });
            (f0, df0dx, vec![g(&c1), g(&c2)], dfdx)
        });
        assert_relative_eq!(x[0], 2.0175, epsilon = 1e-2);
        assert_relative_eq!(x[1], 1.7800, epsilon = 1e-2);
        assert_relative_eq!(x[2], 1.2375, epsilon = 1e-2);
    }

    #[test]
    fn test_volume_constrained_linear_objective_respects_constraint() {
        // Maximize Σ w x with mean(x) ≤ 0.5: the budget goes to the heavy weights.
        let weights = [1.0, 4.0, 2.0, 3.0];
        let settings = MmaSettings::with_constraints(1);
        let x = run(vec![0.5; 4], vec![0.0; 4], vec![1.0; 4], &settings, 80, |x| {
            let f0 = -x.iter().zip(&weights).map(|(x, w)| x * w).sum::<f64>();
            let df0dx = weights.iter().map(|w| -w).collect();
            let fval = vec![x.iter().sum::<f64>() / 4.0 - 0.5];
            (f0, df0dx, fval, DMatrix::from_element(1, 4, 0.25))
        });
        assert!(x.iter().sum::<f64>() / 4.0 <= 0.5 + 1e-3);
        assert!(x[1] > 0.95 && x[3] > 0.95);
        assert!(x[0] < 0.05 && x[2] < 0.05);
    }

    #[test]
    fn test_dimension_mismatch_rejected() {
        let settings = MmaSettings::with_constraints(1);
        let dfdx = DMatrix::zeros(1, 2);
        let input = MmaInput {
            iteration: 1,
            x: &[0.5, 0.5],
            xmin: &[0.0],
            xmax: &[1.0, 1.0],
            xold1: &[0.5, 0.5],
            xold2: &[0.5, 0.5],
            f0: 0.0,
            df0dx: &[1.0, 1.0],
            fval: &[0.0],
            dfdx: &dfdx,
        };
        assert!(matches!(
            mma_update(&settings, &input, &MmaState::default()),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_first_iteration_asymptotes() {
        let settings = MmaSettings::with_constraints(1);
        let dfdx = DMatrix::from_element(1, 2, 1.0);
        let input = MmaInput {
            iteration: 1,
            x: &[0.5, 0.2],
            xmin: &[0.0, 0.0],
            xmax: &[1.0, 2.0],
            xold1: &[0.5, 0.2],
            xold2: &[0.5, 0.2],
            f0: 1.0,
            df0dx: &[1.0, -1.0],
            fval: &[-1.0],
            dfdx: &dfdx,
        };
        let update = mma_update(&settings, &input, &MmaState::default()).unwrap();
        assert_relative_eq!(update.low[0], 0.0, epsilon = 1e-15);
        assert_relative_eq!(update.upp[0], 1.0, epsilon = 1e-15);
        assert_relative_eq!(update.low[1], -0.8, epsilon = 1e-15);
        assert_relative_eq!(update.upp[1], 1.2, epsilon = 1e-15);
        // Positive gradient pushes x0 down, negative gradient pushes x1 up.
        assert!(update.x[0] < 0.5);
        assert!(update.x[1] > 0.2);
    }
}
