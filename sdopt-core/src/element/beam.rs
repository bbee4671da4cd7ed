//! 2-node Euler-Bernoulli beam with St-Venant torsion.
//!
//! The local x axis runs from node 0 to node 1. Local z is the global Z axis
//! projected off the member axis, or global X for vertical members, and
//! local y completes the right-handed frame. The rectangular section has its
//! width along local y and its height along local z.
//!
//! Local DOFs per node are `[u, v, w, θx, θy, θz]`; the closed-form 12 × 12
//! stiffness is rotated into global axes node block by node block.

use crate::element::{block_transform, check_node_count, rotation, to_global, Formulation, LocalStiffness};
use crate::error::{Error, Result};
use crate::material::Material;
use crate::types::{Dof, Point3};
use nalgebra::{DMatrix, Matrix3};

/// Axis angle below which a member counts as vertical.
const VERTICAL_TOLERANCE: f64 = 1e-6;

/// Rectangular section properties.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Section {
    pub area: f64,
    /// Second moment about local y (bending in the x-z plane).
    pub iy: f64,
    /// Second moment about local z (bending in the x-y plane).
    pub iz: f64,
    /// Torsion constant.
    pub j: f64,
}

impl Section {
    /// Solid rectangle, `width` along local y and `height` along local z.
    pub fn rectangle(width: f64, height: f64) -> Self {
        let (a, b) = if width >= height {
            (width, height)
        } else {
            (height, width)
        };
        let ratio = b / a;
        Self {
            area: width * height,
            iy: width * height.powi(3) / 12.0,
            iz: height * width.powi(3) / 12.0,
            j: a * b.powi(3) * (1.0 / 3.0 - 0.21 * ratio * (1.0 - ratio.powi(4) / 12.0)),
        }
    }
}

/// Rectangular beam element.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Beam {
    pub width: f64,
    pub height: f64,
    pub material: Material,
}

/// Local stiffness contributions before rotation.
struct LocalParts {
    axial: DMatrix<f64>,
    torsion: DMatrix<f64>,
    bending: DMatrix<f64>,
}

impl Beam {
    pub fn new(width: f64, height: f64, material: Material) -> Self {
        Self {
            width,
            height,
            material,
        }
    }

    pub fn section(&self) -> Section {
        Section::rectangle(self.width, self.height)
    }

    /// Member length and rotation with rows `ex`, `ey`, `ez`.
    pub fn local_frame(coords: &[Point3]) -> Result<(f64, Matrix3<f64>)> {
        check_node_count("beam", 2, coords)?;
        let d = coords[1] - coords[0];
        let length = d.norm();
        if length <= f64::EPSILON {
            return Err(Error::Element("beam has zero length".into()));
        }
        let ex = d / length;
        let up = if ex.cross(&Point3::z()).norm() < VERTICAL_TOLERANCE {
            Point3::x()
        } else {
            Point3::z()
        };
        let ez = (up - ex * up.dot(&ex)).normalize();
        let ey = ez.cross(&ex);
        Ok((length, rotation(&ex, &ey, &ez)))
    }

    fn local_parts(&self, length: f64) -> LocalParts {
        let e = self.material.youngs_modulus;
        let g = self.material.shear_modulus();
        let s = self.section();
        let l = length;
        let (l2, l3) = (l * l, l * l * l);

        let mut axial = DMatrix::zeros(12, 12);
        let ea = e * s.area / l;
        axial[(0, 0)] = ea;
        axial[(6, 6)] = ea;
        axial[(0, 6)] = -ea;
        axial[(6, 0)] = -ea;

        let mut torsion = DMatrix::zeros(12, 12);
        let gj = g * s.j / l;
        torsion[(3, 3)] = gj;
        torsion[(9, 9)] = gj;
        torsion[(3, 9)] = -gj;
        torsion[(9, 3)] = -gj;

        let mut bending = DMatrix::zeros(12, 12);
        let ez = e * s.iz;
        let ey = e * s.iy;
        // x-y plane: v and θz.
        let upper = [
            (1, 1, 12.0 * ez / l3),
            (1, 5, 6.0 * ez / l2),
            (1, 7, -12.0 * ez / l3),
            (1, 11, 6.0 * ez / l2),
            (5, 5, 4.0 * ez / l),
            (5, 7, -6.0 * ez / l2),
            (5, 11, 2.0 * ez / l),
            (7, 7, 12.0 * ez / l3),
            (7, 11, -6.0 * ez / l2),
            (11, 11, 4.0 * ez / l),
            // x-z plane: w and θy.
            (2, 2, 12.0 * ey / l3),
            (2, 4, -6.0 * ey / l2),
            (2, 8, -12.0 * ey / l3),
            (2, 10, -6.0 * ey / l2),
            (4, 4, 4.0 * ey / l),
            (4, 8, 6.0 * ey / l2),
            (4, 10, 2.0 * ey / l),
            (8, 8, 12.0 * ey / l3),
            (8, 10, 6.0 * ey / l2),
            (10, 10, 4.0 * ey / l),
        ];
        for (i, j, value) in upper {
            bending[(i, j)] = value;
            bending[(j, i)] = value;
        }

        LocalParts {
            axial,
            torsion,
            bending,
        }
    }
}

impl Formulation for Beam {
    fn n_nodes(&self) -> usize {
        2
    }

    fn node_dofs(&self) -> &'static [Dof] {
        &Dof::ALL
    }

    fn stiffness(&self, coords: &[Point3]) -> Result<LocalStiffness> {
        let (length, r) = Self::local_frame(coords)?;
        let t = block_transform(&r, 4);
        let parts = self.local_parts(length);
        let axial = to_global(&parts.axial, &t);
        let shear = to_global(&parts.torsion, &t);
        let bending = to_global(&parts.bending, &t);
        Ok(LocalStiffness {
            total: &axial + &shear + &bending,
            axial,
            shear,
            bending,
        })
    }

    fn volume(&self, coords: &[Point3]) -> Result<f64> {
        Ok(self.section().area * Self::local_frame(coords)?.0)
    }

    /// Axial stress at the section centroid, where bending and torsion
    /// stresses vanish.
    fn stress_operator(&self, coords: &[Point3]) -> Result<DMatrix<f64>> {
        let (length, r) = Self::local_frame(coords)?;
        let factor = self.material.youngs_modulus / length;
        let mut s = DMatrix::zeros(6, 12);
        for i in 0..3 {
            s[(0, i)] = -factor * r[(0, i)];
            s[(0, 6 + i)] = factor * r[(0, i)];
        }
        Ok(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::DVector;

    /// Solve the beam with one node clamped and a load on the other.
    fn free_end_displacement(beam: &Beam, coords: &[Point3], clamped: usize, load: [f64; 6]) -> DVector<f64> {
        let k = beam.stiffness(coords).unwrap().total;
        let free = if clamped == 0 { 6 } else { 0 };
        let kff = k.view((free, free), (6, 6)).into_owned();
        let f = DVector::from_row_slice(&load);
        kff.lu().solve(&f).unwrap()
    }

    #[test]
    fn test_rectangle_section() {
        let s = Section::rectangle(0.2, 0.4);
        assert_relative_eq!(s.area, 0.08, epsilon = 1e-15);
        assert_relative_eq!(s.iy, 0.2 * 0.064 / 12.0, epsilon = 1e-15);
        assert_relative_eq!(s.iz, 0.4 * 0.008 / 12.0, epsilon = 1e-15);
        let ratio: f64 = 0.5;
        let j = 0.4 * 0.008 * (1.0 / 3.0 - 0.21 * ratio * (1.0 - ratio.powi(4) / 12.0));
        assert_relative_eq!(s.j, j, epsilon = 1e-15);
    }

    #[test]
    fn test_cantilever_tip_deflection_independent_of_node_order() {
        let beam = Beam::new(0.1, 0.3, Material::new(210e3, 0.3).unwrap());
        let (length, p) = (2.5_f64, -4.0);
        let expected = p * length.powi(3) / (3.0 * 210e3 * beam.section().iy);

        let forward = [Point3::zeros(), Point3::new(length, 0.0, 0.0)];
        let u = free_end_displacement(&beam, &forward, 0, [0.0, 0.0, p, 0.0, 0.0, 0.0]);
        assert_relative_eq!(u[2], expected, max_relative = 1e-3);

        let reversed = [Point3::new(length, 0.0, 0.0), Point3::zeros()];
        let u = free_end_displacement(&beam, &reversed, 1, [0.0, 0.0, p, 0.0, 0.0, 0.0]);
        assert_relative_eq!(u[2], expected, max_relative = 1e-3);
    }

    #[test]
    fn test_cantilever_lateral_uses_weak_axis() {
        let beam = Beam::new(0.1, 0.3, Material::new(210e3, 0.3).unwrap());
        let coords = [Point3::zeros(), Point3::new(0.0, 3.0, 0.0)];
        let u = free_end_displacement(&beam, &coords, 0, [1.0, 0.0, 0.0, 0.0, 0.0, 0.0]);
        let expected = 27.0 / (3.0 * 210e3 * beam.section().iz);
        assert_relative_eq!(u[0], expected, max_relative = 1e-3);
    }

    #[test]
    fn test_vertical_member_frame() {
        let coords = [Point3::zeros(), Point3::new(0.0, 0.0, 5.0)];
        let (length, r) = Beam::local_frame(&coords).unwrap();
        assert_relative_eq!(length, 5.0);
        assert_relative_eq!(r.row(2).transpose(), Point3::x(), epsilon = 1e-12);
        assert_relative_eq!(r.determinant(), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_energy_split_sums_to_total() {
        let beam = Beam::new(0.2, 0.2, Material::new(1000.0, 0.25).unwrap());
        let coords = [Point3::new(0.0, 0.0, 0.0), Point3::new(1.0, 2.0, 0.5)];
        let k = beam.stiffness(&coords).unwrap();
        let u = DVector::from_fn(12, |i, _| ((i * 7 % 5) as f64 - 2.0) * 1e-3);
        let e = |m: &DMatrix<f64>| u.dot(&(m * &u));
        assert_relative_eq!(e(&k.total), e(&k.axial) + e(&k.shear) + e(&k.bending), max_relative = 1e-12);
        assert_relative_eq!(beam.volume(&coords).unwrap(), 0.04 * 5.25_f64.sqrt(), epsilon = 1e-12);
    }

    #[test]
    fn test_torsion_stiffness() {
        let beam = Beam::new(0.2, 0.1, Material::new(1000.0, 0.25).unwrap());
        let coords = [Point3::zeros(), Point3::new(2.0, 0.0, 0.0)];
        let u = free_end_displacement(&beam, &coords, 0, [0.0, 0.0, 0.0, 1.0, 0.0, 0.0]);
        let gj = beam.material.shear_modulus() * beam.section().j;
        assert_relative_eq!(u[3], 2.0 / gj, max_relative = 1e-9);
    }
}
