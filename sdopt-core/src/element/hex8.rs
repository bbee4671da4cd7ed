//! 8-node trilinear hexahedron.
//!
//! - 8 nodes at the vertices, 3 translational DOFs per node (24 total)
//! - Trilinear shape functions, 2×2×2 Gauss integration
//! - Stiffness split into a normal part (the 3×3 normal block of D) and a
//!   shear part (the shear diagonal of D)
//!
//! # Shape Functions
//!
//! ```text
//! N_i = (1 + ξ_i*ξ)(1 + η_i*η)(1 + ζ_i*ζ) / 8
//! ```
//!
//! # Node Numbering
//!
//! ```text
//!        7-------6
//!       /|      /|
//!      / |     / |
//!     4-------5  |
//!     |  3----|--2
//!     | /     | /
//!     |/      |/
//!     0-------1
//! ```
//!
//! Bottom face counter-clockwise, then the top face in the same order.

use crate::element::gauss::gauss_hex;
use crate::element::{check_node_count, Formulation, LocalStiffness};
use crate::error::{Error, Result};
use crate::material::Material;
use crate::types::{Dof, Point3};
use nalgebra::{DMatrix, Matrix3, Vector3};

/// Natural coordinates of node i are (XI[i], ETA[i], ZETA[i]).
const XI: [f64; 8] = [-1.0, 1.0, 1.0, -1.0, -1.0, 1.0, 1.0, -1.0];
const ETA: [f64; 8] = [-1.0, -1.0, 1.0, 1.0, -1.0, -1.0, 1.0, 1.0];
const ZETA: [f64; 8] = [-1.0, -1.0, -1.0, -1.0, 1.0, 1.0, 1.0, 1.0];

/// Trilinear solid element.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Hexahedron {
    pub material: Material,
}

impl Hexahedron {
    pub fn new(material: Material) -> Self {
        Self { material }
    }

    #[cfg(test)]
    fn shape_functions(xi: f64, eta: f64, zeta: f64) -> [f64; 8] {
        let mut n = [0.0; 8];
        for i in 0..8 {
            n[i] = 0.125 * (1.0 + XI[i] * xi) * (1.0 + ETA[i] * eta) * (1.0 + ZETA[i] * zeta);
        }
        n
    }

    /// (dN/dξ, dN/dη, dN/dζ) for each node.
    fn shape_derivatives(xi: f64, eta: f64, zeta: f64) -> [[f64; 8]; 3] {
        let mut dn = [[0.0; 8]; 3];
        for i in 0..8 {
            dn[0][i] = 0.125 * XI[i] * (1.0 + ETA[i] * eta) * (1.0 + ZETA[i] * zeta);
            dn[1][i] = 0.125 * (1.0 + XI[i] * xi) * ETA[i] * (1.0 + ZETA[i] * zeta);
            dn[2][i] = 0.125 * (1.0 + XI[i] * xi) * (1.0 + ETA[i] * eta) * ZETA[i];
        }
        dn
    }

    /// J[r][c] = ∂x_c/∂ξ_r.
    fn jacobian(coords: &[Point3], dn: &[[f64; 8]; 3]) -> Matrix3<f64> {
        let mut j = Matrix3::zeros();
        for i in 0..8 {
            for r in 0..3 {
                for c in 0..3 {
                    j[(r, c)] += dn[r][i] * coords[i][c];
                }
            }
        }
        j
    }

    /// 6×24 strain-displacement matrix and Jacobian determinant.
    ///
    /// Strain order: [ε_xx, ε_yy, ε_zz, γ_xy, γ_yz, γ_xz].
    fn b_matrix(coords: &[Point3], xi: f64, eta: f64, zeta: f64) -> Result<(DMatrix<f64>, f64)> {
        let dn = Self::shape_derivatives(xi, eta, zeta);
        let j = Self::jacobian(coords, &dn);
        let det_j = j.determinant();
        if det_j <= 0.0 {
            return Err(Error::Element(format!(
                "hexahedron is inverted (Jacobian determinant {:e})",
                det_j
            )));
        }
        let j_inv = j
            .try_inverse()
            .ok_or_else(|| Error::Element("hexahedron Jacobian is singular".into()))?;

        let mut b = DMatrix::zeros(6, 24);
        for i in 0..8 {
            let g = j_inv * Vector3::new(dn[0][i], dn[1][i], dn[2][i]);
            let col = 3 * i;
            b[(0, col)] = g[0];
            b[(1, col + 1)] = g[1];
            b[(2, col + 2)] = g[2];
            b[(3, col)] = g[1];
            b[(3, col + 1)] = g[0];
            b[(4, col + 1)] = g[2];
            b[(4, col + 2)] = g[1];
            b[(5, col)] = g[2];
            b[(5, col + 2)] = g[0];
        }
        Ok((b, det_j))
    }

    fn constitutive(&self) -> DMatrix<f64> {
        let d = self.material.constitutive_3d();
        DMatrix::from_column_slice(6, 6, d.as_slice())
    }
}

impl Formulation for Hexahedron {
    fn n_nodes(&self) -> usize {
        8
    }

    fn node_dofs(&self) -> &'static [Dof] {
        &Dof::TRANSLATIONS
    }

    fn stiffness(&self, coords: &[Point3]) -> Result<LocalStiffness> {
        check_node_count("hexahedron", 8, coords)?;
        let d = self.constitutive();
        let mut d_normal = DMatrix::zeros(6, 6);
        d_normal.view_mut((0, 0), (3, 3)).copy_from(&d.view((0, 0), (3, 3)));
        let mut d_shear = DMatrix::zeros(6, 6);
        for i in 3..6 {
            d_shear[(i, i)] = d[(i, i)];
        }

        let mut normal = DMatrix::zeros(24, 24);
        let mut shear = DMatrix::zeros(24, 24);
        for gp in gauss_hex(2) {
            let (b, det_j) = Self::b_matrix(coords, gp.xi(), gp.eta(), gp.zeta())?;
            let w = det_j * gp.weight;
            let bt = b.transpose();
            normal += &bt * &d_normal * &b * w;
            shear += &bt * &d_shear * &b * w;
        }
        Ok(LocalStiffness {
            total: &normal + &shear,
            axial: normal,
            shear,
            bending: DMatrix::zeros(24, 24),
        })
    }

    fn volume(&self, coords: &[Point3]) -> Result<f64> {
        check_node_count("hexahedron", 8, coords)?;
        let mut volume = 0.0;
        for gp in gauss_hex(2) {
            let dn = Self::shape_derivatives(gp.xi(), gp.eta(), gp.zeta());
            volume += Self::jacobian(coords, &dn).determinant() * gp.weight;
        }
        if volume <= 0.0 {
            return Err(Error::Element(format!(
                "hexahedron has non-positive volume {:e}",
                volume
            )));
        }
        Ok(volume)
    }

    /// D times the mean of the integration-point B matrices.
    fn stress_operator(&self, coords: &[Point3]) -> Result<DMatrix<f64>> {
        check_node_count("hexahedron", 8, coords)?;
        let points = gauss_hex(2);
        let mut b_sum = DMatrix::zeros(6, 24);
        for gp in &points {
            b_sum += Self::b_matrix(coords, gp.xi(), gp.eta(), gp.zeta())?.0;
        }
        Ok(self.constitutive() * b_sum / points.len() as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::DVector;

    fn cuboid(a: f64, b: f64, c: f64) -> Vec<Point3> {
        vec![
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(a, 0.0, 0.0),
            Point3::new(a, b, 0.0),
            Point3::new(0.0, b, 0.0),
            Point3::new(0.0, 0.0, c),
            Point3::new(a, 0.0, c),
            Point3::new(a, b, c),
            Point3::new(0.0, b, c),
        ]
    }

    fn hex() -> Hexahedron {
        Hexahedron::new(Material::new(1e6, 0.25).unwrap())
    }

    #[test]
    fn test_shape_functions_partition_of_unity() {
        for (xi, eta, zeta) in [(0.0, 0.0, 0.0), (1.0, 1.0, 1.0), (-1.0, 0.5, 0.0), (0.3, -0.7, 0.5)] {
            let sum: f64 = Hexahedron::shape_functions(xi, eta, zeta).iter().sum();
            assert_relative_eq!(sum, 1.0, epsilon = 1e-14);
        }
        for i in 0..8 {
            let n = Hexahedron::shape_functions(XI[i], ETA[i], ZETA[i]);
            for (j, value) in n.iter().enumerate() {
                assert_relative_eq!(*value, if i == j { 1.0 } else { 0.0 }, epsilon = 1e-14);
            }
        }
    }

    #[test]
    fn test_volume() {
        assert_relative_eq!(hex().volume(&cuboid(1.0, 1.0, 1.0)).unwrap(), 1.0, epsilon = 1e-12);
        assert_relative_eq!(hex().volume(&cuboid(2.0, 0.5, 3.0)).unwrap(), 3.0, epsilon = 1e-12);
    }

    #[test]
    fn test_inverted_element_rejected() {
        let mut coords = cuboid(1.0, 1.0, 1.0);
        coords.swap(0, 4);
        coords.swap(1, 5);
        coords.swap(2, 6);
        coords.swap(3, 7);
        assert!(matches!(hex().stiffness(&coords), Err(Error::Element(_))));
        assert!(hex().volume(&coords).is_err());
    }

    #[test]
    fn test_stiffness_symmetric_and_rigid_translations() {
        let coords = cuboid(1.0, 2.0, 1.5);
        let k = hex().stiffness(&coords).unwrap().total;
        let tol = 1e-12 * k.amax();
        for i in 0..24 {
            assert!(k[(i, i)] > 0.0);
            for j in 0..24 {
                assert_relative_eq!(k[(i, j)], k[(j, i)], epsilon = tol);
            }
        }
        for axis in 0..3 {
            let u = DVector::from_fn(24, |i, _| if i % 3 == axis { 1.0 } else { 0.0 });
            assert_relative_eq!((&k * u).norm(), 0.0, epsilon = tol * 24.0);
        }
    }

    #[test]
    fn test_constant_strain_patch() {
        let hex = hex();
        let coords = cuboid(1.0, 1.0, 1.0);
        let strain_xx = 0.001;
        let u = DVector::from_fn(24, |i, _| if i % 3 == 0 { strain_xx * coords[i / 3].x } else { 0.0 });

        let stress = hex.stress_operator(&coords).unwrap() * &u;
        let d = hex.material.constitutive_3d();
        assert_relative_eq!(stress[0], d[(0, 0)] * strain_xx, max_relative = 1e-9);
        assert_relative_eq!(stress[1], d[(1, 0)] * strain_xx, max_relative = 1e-9);
        assert_relative_eq!(stress[3], 0.0, epsilon = 1e-9);

        // Energy density ½ εᵀ D ε over a unit volume, all of it normal.
        let k = hex.stiffness(&coords).unwrap();
        let energy = |m: &DMatrix<f64>| 0.5 * u.dot(&(m * &u));
        assert_relative_eq!(energy(&k.total), 0.5 * d[(0, 0)] * strain_xx * strain_xx, max_relative = 1e-9);
        assert_relative_eq!(energy(&k.shear), 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_simple_shear_is_shear_energy() {
        let hex = hex();
        let coords = cuboid(1.0, 1.0, 1.0);
        let gamma = 0.002;
        let u = DVector::from_fn(24, |i, _| if i % 3 == 0 { gamma * coords[i / 3].y } else { 0.0 });
        let k = hex.stiffness(&coords).unwrap();
        let energy = |m: &DMatrix<f64>| 0.5 * u.dot(&(m * &u));
        let g = hex.material.shear_modulus();
        assert_relative_eq!(energy(&k.shear), 0.5 * g * gamma * gamma, max_relative = 1e-9);
        assert_relative_eq!(energy(&k.axial), 0.0, epsilon = 1e-12);
    }
}
