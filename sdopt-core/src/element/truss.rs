//! 2-node axial bar.
//!
//! Stiffness is `EA/L` along the member, rotated into global axes with the
//! direction cosines `c`:
//!
//! ```text
//! K = EA/L [ c cᵀ  -c cᵀ ]
//!          [-c cᵀ   c cᵀ ]
//! ```

use crate::element::{check_node_count, Formulation, LocalStiffness};
use crate::error::{Error, Result};
use crate::material::Material;
use crate::types::{Dof, Point3};
use nalgebra::DMatrix;

/// Axial-only member.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Truss {
    pub area: f64,
    pub material: Material,
}

impl Truss {
    pub fn new(area: f64, material: Material) -> Self {
        Self { area, material }
    }

    /// Length and unit direction from node 0 to node 1.
    fn axis(coords: &[Point3]) -> Result<(f64, Point3)> {
        check_node_count("truss", 2, coords)?;
        let d = coords[1] - coords[0];
        let length = d.norm();
        if length <= f64::EPSILON {
            return Err(Error::Element("truss has zero length".into()));
        }
        Ok((length, d / length))
    }
}

impl Formulation for Truss {
    fn n_nodes(&self) -> usize {
        2
    }

    fn node_dofs(&self) -> &'static [Dof] {
        &Dof::TRANSLATIONS
    }

    fn stiffness(&self, coords: &[Point3]) -> Result<LocalStiffness> {
        let (length, c) = Self::axis(coords)?;
        let block = c * c.transpose() * (self.material.youngs_modulus * self.area / length);
        let mut k = DMatrix::zeros(6, 6);
        k.view_mut((0, 0), (3, 3)).copy_from(&block);
        k.view_mut((3, 3), (3, 3)).copy_from(&block);
        k.view_mut((0, 3), (3, 3)).copy_from(&(-block));
        k.view_mut((3, 0), (3, 3)).copy_from(&(-block));
        Ok(LocalStiffness::axial_only(k))
    }

    fn volume(&self, coords: &[Point3]) -> Result<f64> {
        Ok(self.area * Self::axis(coords)?.0)
    }

    /// Axial stress as the first Voigt component.
    fn stress_operator(&self, coords: &[Point3]) -> Result<DMatrix<f64>> {
        let (length, c) = Self::axis(coords)?;
        let factor = self.material.youngs_modulus / length;
        let mut s = DMatrix::zeros(6, 6);
        for i in 0..3 {
            s[(0, i)] = -factor * c[i];
            s[(0, 3 + i)] = factor * c[i];
        }
        Ok(s)
    }
}
