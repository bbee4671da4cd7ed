//! 4-node flat shell: bilinear membrane plus DKQ plate bending.
//!
//! The element works in a local frame with `e1` along the first edge and the
//! normal `n` from the cross product of the diagonals. Local DOFs per node are
//! `[u, v, w, θx, θy, θz]`:
//!
//! - membrane (`u`, `v`): bilinear plane stress, split into a normal part
//!   (D without the shear term) and a shear part (the shear term alone),
//! - bending (`w`, `θx`, `θy`): discrete Kirchhoff quadrilateral of Batoz and
//!   Tahar, with rotations `θx = ∂w/∂y` and `θy = −∂w/∂x`,
//! - drilling (`θz`): a fictitious spring equal to the mean absolute entry of
//!   the summed matrix, so the normal rotation is never singular.
//!
//! All parts use 2 × 2 Gauss integration.

use crate::element::gauss::gauss_quad;
use crate::element::{block_transform, check_node_count, rotation, to_global, Formulation, LocalStiffness};
use crate::error::{Error, Result};
use crate::material::Material;
use crate::types::{Dof, Point3};
use nalgebra::{DMatrix, Matrix2, Matrix3, Vector2};

const XI: [f64; 4] = [-1.0, 1.0, 1.0, -1.0];
const ETA: [f64; 4] = [-1.0, -1.0, 1.0, 1.0];

/// Quadrilateral flat shell element.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FlatShell {
    pub thickness: f64,
    pub material: Material,
}

/// Element geometry in its own plane.
struct Planar {
    rotation: Matrix3<f64>,
    x: [f64; 4],
    y: [f64; 4],
}

/// Side coefficients of the DKQ rotation fields.
#[derive(Clone, Copy)]
struct SideCoefficients {
    a: f64,
    b: f64,
    c: f64,
    d: f64,
    e: f64,
}

impl FlatShell {
    pub fn new(thickness: f64, material: Material) -> Self {
        Self {
            thickness,
            material,
        }
    }

    fn planar(coords: &[Point3]) -> Result<Planar> {
        check_node_count("flat shell", 4, coords)?;
        let normal = (coords[2] - coords[0]).cross(&(coords[3] - coords[1]));
        let n = normal
            .try_normalize(f64::EPSILON)
            .ok_or_else(|| Error::Element("flat shell has zero area".into()))?;
        let edge = coords[1] - coords[0];
        let e1 = (edge - n * n.dot(&edge))
            .try_normalize(f64::EPSILON)
            .ok_or_else(|| Error::Element("flat shell has a zero-length edge".into()))?;
        let e2 = n.cross(&e1);
        let mut x = [0.0; 4];
        let mut y = [0.0; 4];
        for i in 0..4 {
            let d = coords[i] - coords[0];
            x[i] = d.dot(&e1);
            y[i] = d.dot(&e2);
        }
        Ok(Planar {
            rotation: rotation(&e1, &e2, &n),
            x,
            y,
        })
    }

    /// Bilinear shape derivatives with respect to (ξ, η).
    fn bilinear_derivatives(xi: f64, eta: f64) -> ([f64; 4], [f64; 4]) {
        let mut d_xi = [0.0; 4];
        let mut d_eta = [0.0; 4];
        for a in 0..4 {
            d_xi[a] = 0.25 * XI[a] * (1.0 + ETA[a] * eta);
            d_eta[a] = 0.25 * ETA[a] * (1.0 + XI[a] * xi);
        }
        (d_xi, d_eta)
    }

    /// Inverse Jacobian and its determinant at (ξ, η).
    fn jacobian(p: &Planar, xi: f64, eta: f64) -> Result<(Matrix2<f64>, f64)> {
        let (d_xi, d_eta) = Self::bilinear_derivatives(xi, eta);
        let mut j = Matrix2::zeros();
        for a in 0..4 {
            j[(0, 0)] += d_xi[a] * p.x[a];
            j[(0, 1)] += d_xi[a] * p.y[a];
            j[(1, 0)] += d_eta[a] * p.x[a];
            j[(1, 1)] += d_eta[a] * p.y[a];
        }
        let det = j.determinant();
        if det <= 0.0 {
            return Err(Error::Element(format!(
                "flat shell has a non-positive Jacobian ({:e})",
                det
            )));
        }
        let inv = j
            .try_inverse()
            .ok_or_else(|| Error::Element("flat shell Jacobian is singular".into()))?;
        Ok((inv, det))
    }

    /// 3 × 8 membrane strain-displacement matrix over `[u, v]` per node.
    fn membrane_b(p: &Planar, xi: f64, eta: f64) -> Result<(DMatrix<f64>, f64)> {
        let (inv, det) = Self::jacobian(p, xi, eta)?;
        let (d_xi, d_eta) = Self::bilinear_derivatives(xi, eta);
        let mut b = DMatrix::zeros(3, 8);
        for a in 0..4 {
            let g = inv * Vector2::new(d_xi[a], d_eta[a]);
            b[(0, 2 * a)] = g[0];
            b[(1, 2 * a + 1)] = g[1];
            b[(2, 2 * a)] = g[1];
            b[(2, 2 * a + 1)] = g[0];
        }
        Ok((b, det))
    }

    fn side_coefficients(p: &Planar) -> [SideCoefficients; 4] {
        std::array::from_fn(|k| {
            let j = (k + 1) % 4;
            let xij = p.x[k] - p.x[j];
            let yij = p.y[k] - p.y[j];
            let l2 = xij * xij + yij * yij;
            SideCoefficients {
                a: -xij / l2,
                b: 0.75 * xij * yij / l2,
                c: (0.25 * xij * xij - 0.5 * yij * yij) / l2,
                d: -yij / l2,
                e: (0.25 * yij * yij - 0.5 * xij * xij) / l2,
            }
        })
    }

    /// Serendipity derivatives with respect to (ξ, η): corners then the
    /// midsides of edges 0-1, 1-2, 2-3, 3-0.
    fn serendipity_derivatives(xi: f64, eta: f64) -> ([f64; 8], [f64; 8]) {
        let d_xi = [
            0.25 * (1.0 - eta) * (2.0 * xi + eta),
            0.25 * (1.0 - eta) * (2.0 * xi - eta),
            0.25 * (1.0 + eta) * (2.0 * xi + eta),
            0.25 * (1.0 + eta) * (2.0 * xi - eta),
            -xi * (1.0 - eta),
            0.5 * (1.0 - eta * eta),
            -xi * (1.0 + eta),
            -0.5 * (1.0 - eta * eta),
        ];
        let d_eta = [
            0.25 * (1.0 - xi) * (xi + 2.0 * eta),
            0.25 * (1.0 + xi) * (2.0 * eta - xi),
            0.25 * (1.0 + xi) * (xi + 2.0 * eta),
            0.25 * (1.0 - xi) * (2.0 * eta - xi),
            -0.5 * (1.0 - xi * xi),
            -eta * (1.0 + xi),
            0.5 * (1.0 - xi * xi),
            -eta * (1.0 - xi),
        ];
        (d_xi, d_eta)
    }

    /// Rotation fields βx, βy over `[w, θx, θy]` per node, evaluated with
    /// shape values (or derivatives) `n`.
    fn rotation_fields(sides: &[SideCoefficients; 4], n: &[f64; 8]) -> ([f64; 12], [f64; 12]) {
        let mut hx = [0.0; 12];
        let mut hy = [0.0; 12];
        for i in 0..4 {
            let (m, l) = (i, (i + 3) % 4);
            let (sm, sl) = (sides[m], sides[l]);
            let (nm, nl) = (n[4 + m], n[4 + l]);
            hx[3 * i] = 1.5 * (sm.a * nm - sl.a * nl);
            hx[3 * i + 1] = sm.b * nm + sl.b * nl;
            hx[3 * i + 2] = n[i] - sm.c * nm - sl.c * nl;
            hy[3 * i] = 1.5 * (sm.d * nm - sl.d * nl);
            hy[3 * i + 1] = -n[i] + sm.e * nm + sl.e * nl;
            hy[3 * i + 2] = -sm.b * nm - sl.b * nl;
        }
        (hx, hy)
    }

    /// 3 × 12 curvature-displacement matrix over `[w, θx, θy]` per node.
    fn bending_b(p: &Planar, sides: &[SideCoefficients; 4], xi: f64, eta: f64) -> Result<(DMatrix<f64>, f64)> {
        let (inv, det) = Self::jacobian(p, xi, eta)?;
        let (dn_xi, dn_eta) = Self::serendipity_derivatives(xi, eta);
        let mut dn_x = [0.0; 8];
        let mut dn_y = [0.0; 8];
        for a in 0..8 {
            let g = inv * Vector2::new(dn_xi[a], dn_eta[a]);
            dn_x[a] = g[0];
            dn_y[a] = g[1];
        }
        let (hx_x, hy_x) = Self::rotation_fields(sides, &dn_x);
        let (hx_y, hy_y) = Self::rotation_fields(sides, &dn_y);
        let mut b = DMatrix::zeros(3, 12);
        for c in 0..12 {
            b[(0, c)] = hx_x[c];
            b[(1, c)] = hy_y[c];
            b[(2, c)] = hx_y[c] + hy_x[c];
        }
        Ok((b, det))
    }

    /// Scatter an element-part matrix into the 24 × 24 local layout.
    fn scatter(part: &DMatrix<f64>, offsets: &[usize], target: &mut DMatrix<f64>) {
        let per_node = offsets.len();
        for r in 0..part.nrows() {
            let gr = 6 * (r / per_node) + offsets[r % per_node];
            for c in 0..part.ncols() {
                let gc = 6 * (c / per_node) + offsets[c % per_node];
                target[(gr, gc)] += part[(r, c)];
            }
        }
    }
}

impl Formulation for FlatShell {
    fn n_nodes(&self) -> usize {
        4
    }

    fn node_dofs(&self) -> &'static [Dof] {
        &Dof::ALL
    }

    fn stiffness(&self, coords: &[Point3]) -> Result<LocalStiffness> {
        let p = Self::planar(coords)?;
        let sides = Self::side_coefficients(&p);
        let t = self.thickness;
        let d = self.material.constitutive_plane_stress();
        let mut d_normal = d * t;
        d_normal[(2, 2)] = 0.0;
        let mut d_shear = Matrix3::zeros();
        d_shear[(2, 2)] = d[(2, 2)] * t;
        let d_bending = d * (t * t * t / 12.0);
        let to_dyn = |m: &Matrix3<f64>| DMatrix::from_column_slice(3, 3, m.as_slice());
        let (d_normal, d_shear, d_bending) = (to_dyn(&d_normal), to_dyn(&d_shear), to_dyn(&d_bending));

        let mut k_normal = DMatrix::zeros(8, 8);
        let mut k_shear = DMatrix::zeros(8, 8);
        let mut k_bend = DMatrix::zeros(12, 12);
        for gp in gauss_quad(2) {
            let (bm, det) = Self::membrane_b(&p, gp.xi(), gp.eta())?;
            let w = gp.weight * det;
            k_normal += bm.transpose() * &d_normal * &bm * w;
            k_shear += bm.transpose() * &d_shear * &bm * w;
            let (bb, det) = Self::bending_b(&p, &sides, gp.xi(), gp.eta())?;
            k_bend += bb.transpose() * &d_bending * &bb * (gp.weight * det);
        }

        let mut axial = DMatrix::zeros(24, 24);
        let mut shear = DMatrix::zeros(24, 24);
        let mut bending = DMatrix::zeros(24, 24);
        Self::scatter(&k_normal, &[0, 1], &mut axial);
        Self::scatter(&k_shear, &[0, 1], &mut shear);
        Self::scatter(&k_bend, &[2, 3, 4], &mut bending);

        let mut total = &axial + &shear + &bending;
        // Mean absolute entry, so the term stays positive.
        let drilling = total.iter().map(|v| v.abs()).sum::<f64>() / total.len() as f64;
        for i in 0..4 {
            total[(6 * i + 5, 6 * i + 5)] += drilling;
        }

        let transform = block_transform(&p.rotation, 8);
        Ok(LocalStiffness {
            total: to_global(&total, &transform),
            axial: to_global(&axial, &transform),
            shear: to_global(&shear, &transform),
            bending: to_global(&bending, &transform),
        })
    }

    fn volume(&self, coords: &[Point3]) -> Result<f64> {
        let p = Self::planar(coords)?;
        let mut area = 0.0;
        for gp in gauss_quad(2) {
            area += gp.weight * Self::jacobian(&p, gp.xi(), gp.eta())?.1;
        }
        Ok(area * self.thickness)
    }

    /// Membrane stress `[σx, σy, 0, τxy, 0, 0]` in the element frame,
    /// averaged over the four integration points.
    fn stress_operator(&self, coords: &[Point3]) -> Result<DMatrix<f64>> {
        let p = Self::planar(coords)?;
        let d = self.material.constitutive_plane_stress();
        let d = DMatrix::from_column_slice(3, 3, d.as_slice());
        let mut average = DMatrix::zeros(3, 8);
        for gp in gauss_quad(2) {
            let (bm, _) = Self::membrane_b(&p, gp.xi(), gp.eta())?;
            average += &d * bm * 0.25;
        }
        let mut local = DMatrix::zeros(6, 24);
        for (row, voigt) in [(0, 0), (1, 1), (2, 3)] {
            for c in 0..8 {
                local[(voigt, 6 * (c / 2) + c % 2)] = average[(row, c)];
            }
        }
        Ok(local * block_transform(&p.rotation, 8))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::DVector;

    fn plate(l: f64, w: f64) -> Vec<Point3> {
        vec![
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(l, 0.0, 0.0),
            Point3::new(l, w, 0.0),
            Point3::new(0.0, w, 0.0),
        ]
    }

    #[test]
    fn test_shell_volume() {
        let shell = FlatShell::new(0.1, Material::new(1.0, 0.3).unwrap());
        let skewed = vec![
            Point3::new(0.0, 0.0, 1.0),
            Point3::new(2.0, 0.0, 1.0),
            Point3::new(3.0, 1.5, 1.0),
            Point3::new(1.0, 1.5, 1.0),
        ];
        assert_relative_eq!(shell.volume(&skewed).unwrap(), 0.3, epsilon = 1e-12);
    }

    #[test]
    fn test_drilling_term_is_mean_absolute_entry() {
        let shell = FlatShell::new(0.1, Material::new(1000.0, 0.3).unwrap());
        let k = shell.stiffness(&plate(2.0, 1.0)).unwrap();
        let summed = &k.axial + &k.shear + &k.bending;
        let mean = summed.iter().map(|v| v.abs()).sum::<f64>() / summed.len() as f64;
        for node in 0..4 {
            let i = 6 * node + 5;
            assert_relative_eq!(summed[(i, i)], 0.0, epsilon = 1e-12);
            assert_relative_eq!(k.total[(i, i)], mean, max_relative = 1e-12);
        }
    }

    #[test]
    fn test_shell_stiffness_symmetric() {
        let shell = FlatShell::new(0.2, Material::new(1000.0, 0.3).unwrap());
        let coords = vec![
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(1.0, 0.0, 1.0),
            Point3::new(1.2, 1.0, 1.1),
            Point3::new(0.0, 0.8, 0.0),
        ];
        let k = shell.stiffness(&coords).unwrap();
        for m in [&k.total, &k.axial, &k.shear, &k.bending] {
            for i in 0..24 {
                for j in 0..24 {
                    assert_relative_eq!(m[(i, j)], m[(j, i)], epsilon = 1e-9, max_relative = 1e-9);
                }
            }
        }
    }

    #[test]
    fn test_shell_rigid_body_modes() {
        let shell = FlatShell::new(0.1, Material::new(1000.0, 0.25).unwrap());
        let coords = vec![
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(2.0, 0.0, 0.0),
            Point3::new(2.5, 1.0, 0.0),
            Point3::new(0.0, 1.5, 0.0),
        ];
        let k = shell.stiffness(&coords).unwrap().total;
        // Translations and rotations about in-plane axes carry no energy.
        let modes: [Box<dyn Fn(&Point3) -> [f64; 6]>; 5] = [
            Box::new(|_: &Point3| [1.0, 0.0, 0.0, 0.0, 0.0, 0.0]),
            Box::new(|_: &Point3| [0.0, 1.0, 0.0, 0.0, 0.0, 0.0]),
            Box::new(|_: &Point3| [0.0, 0.0, 1.0, 0.0, 0.0, 0.0]),
            Box::new(|p: &Point3| [0.0, 0.0, p.y, 1.0, 0.0, 0.0]),
            Box::new(|p: &Point3| [0.0, 0.0, -p.x, 0.0, 1.0, 0.0]),
        ];
        for mode in &modes {
            let u = DVector::from_iterator(24, coords.iter().flat_map(|p| mode(p)));
            assert_relative_eq!((&k * u).norm(), 0.0, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_shell_uniaxial_tension_energy() {
        let (l, w, t, e) = (4.0, 2.0, 0.1, 1000.0);
        let shell = FlatShell::new(t, Material::new(e, 0.3).unwrap());
        let coords = plate(l, w);
        let k = shell.stiffness(&coords).unwrap();

        // Free: ux at x = L, uy everywhere except node 0.
        let free = [6, 12, 7, 13, 19];
        let p = 3.0;
        let mut f = DVector::zeros(free.len());
        f[0] = p / 2.0;
        f[1] = p / 2.0;
        let kff = DMatrix::from_fn(free.len(), free.len(), |i, j| k.total[(free[i], free[j])]);
        let uf = kff.lu().solve(&f).unwrap();
        let mut u = DVector::zeros(24);
        for (i, &dof) in free.iter().enumerate() {
            u[dof] = uf[i];
        }

        let energy = |m: &DMatrix<f64>| 0.5 * u.dot(&(m * &u));
        let expected = p * p * l / (2.0 * e * w * t);
        assert_relative_eq!(energy(&k.total), expected, max_relative = 1e-3);
        assert_relative_eq!(energy(&k.axial), expected, max_relative = 1e-3);
        assert_relative_eq!(energy(&k.bending), 0.0, epsilon = 1e-12);
        assert_relative_eq!(energy(&k.shear), 0.0, epsilon = 1e-12);

        let stress = shell.stress_operator(&coords).unwrap() * &u;
        assert_relative_eq!(stress[0], p / (w * t), max_relative = 1e-6);
        assert_relative_eq!(stress[1], 0.0, epsilon = 1e-9);
    }

    #[test]
    fn test_shell_degenerate_rejected() {
        let shell = FlatShell::new(0.1, Material::new(1.0, 0.3).unwrap());
        let line = vec![
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(1.0, 0.0, 0.0),
            Point3::new(2.0, 0.0, 0.0),
            Point3::new(3.0, 0.0, 0.0),
        ];
        assert!(matches!(shell.stiffness(&line), Err(Error::Element(_))));
    }
}
