//! Material property definitions and density interpolation.
//!
//! Materials are isotropic linear elastic. Stiffness of every element is
//! scaled through the SIMP interpolation so that topology optimization can
//! drive a per-element design density.

use crate::error::{Error, Result};
use nalgebra::{Matrix3, Matrix6};
use serde::{Deserialize, Serialize};

/// Relative stiffness of fully void material unless a structure overrides it.
pub const DEFAULT_RELATIVE_LOWER_BOUND: f64 = 1e-6;

/// Material properties for structural analysis.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Material {
    /// Young's modulus.
    pub youngs_modulus: f64,
    /// Poisson's ratio (dimensionless).
    pub poissons_ratio: f64,
}

impl Material {
    /// Create a new isotropic linear elastic material.
    ///
    /// # Errors
    ///
    /// Returns error if material properties are physically invalid.
    pub fn new(youngs_modulus: f64, poissons_ratio: f64) -> Result<Self> {
        if youngs_modulus.is_nan() || youngs_modulus <= 0.0 {
            return Err(Error::InvalidMaterial(
                "Young's modulus must be positive".into(),
            ));
        }
        if poissons_ratio <= -1.0 || poissons_ratio >= 0.5 {
            return Err(Error::InvalidMaterial(
                "Poisson's ratio must be in range (-1, 0.5)".into(),
            ));
        }
        Ok(Self {
            youngs_modulus,
            poissons_ratio,
        })
    }

    /// Material without lateral contraction, used by axial-only members.
    pub fn uniaxial(youngs_modulus: f64) -> Result<Self> {
        Self::new(youngs_modulus, 0.0)
    }

    /// Shear modulus G = E / (2(1 + ν)).
    pub fn shear_modulus(&self) -> f64 {
        self.youngs_modulus / (2.0 * (1.0 + self.poissons_ratio))
    }

    /// 3D constitutive matrix for isotropic linear elasticity.
    ///
    /// Returns the 6x6 matrix D such that σ = D * ε in Voigt notation.
    pub fn constitutive_3d(&self) -> Matrix6<f64> {
        let e = self.youngs_modulus;
        let nu = self.poissons_ratio;

        let factor = e / ((1.0 + nu) * (1.0 - 2.0 * nu));
        let c11 = factor * (1.0 - nu);
        let c12 = factor * nu;
        let c44 = factor * (1.0 - 2.0 * nu) / 2.0; // = G

        Matrix6::new(
            c11, c12, c12, 0.0, 0.0, 0.0,
            c12, c11, c12, 0.0, 0.0, 0.0,
            c12, c12, c11, 0.0, 0.0, 0.0,
            0.0, 0.0, 0.0, c44, 0.0, 0.0,
            0.0, 0.0, 0.0, 0.0, c44, 0.0,
            0.0, 0.0, 0.0, 0.0, 0.0, c44,
        )
    }

    /// Plane stress constitutive matrix (for membranes and plates).
    ///
    /// Returns a 3x3 matrix for [σ_xx, σ_yy, τ_xy] = D * [ε_xx, ε_yy, γ_xy].
    pub fn constitutive_plane_stress(&self) -> Matrix3<f64> {
        let e = self.youngs_modulus;
        let nu = self.poissons_ratio;

        let factor = e / (1.0 - nu * nu);

        Matrix3::new(
            factor,      factor * nu, 0.0,
            factor * nu, factor,      0.0,
            0.0,         0.0,         factor * (1.0 - nu) / 2.0,
        )
    }
}

/// SIMP (Solid Isotropic Material with Penalization) interpolation.
///
/// `E(ρ) = Emin + ρ^p (E0 − Emin)`, with ρ clamped to (0, 1].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Simp {
    /// Physical modulus of solid material.
    pub e0: f64,
    /// Modulus of void material.
    pub emin: f64,
}

impl Simp {
    /// Smallest density an element may take; keeps `ρ^(p-1)` finite.
    pub const MIN_DENSITY: f64 = 1e-9;

    /// Build the interpolation from the solid modulus and a relative lower bound.
    pub fn new(e0: f64, relative_lower_bound: f64) -> Self {
        Self {
            e0,
            emin: e0 * relative_lower_bound,
        }
    }

    /// Clamp a density into the admissible range (0, 1].
    pub fn clamp_density(density: f64) -> f64 {
        if density.is_nan() {
            return 1.0;
        }
        density.clamp(Self::MIN_DENSITY, 1.0)
    }

    /// Penalized modulus at `density`.
    pub fn modulus(&self, density: f64, penalty: f64) -> f64 {
        let rho = Self::clamp_density(density);
        self.emin + rho.powf(penalty) * (self.e0 - self.emin)
    }

    /// Derivative dE/dρ of the penalized modulus.
    pub fn modulus_derivative(&self, density: f64, penalty: f64) -> f64 {
        let rho = Self::clamp_density(density);
        penalty * rho.powf(penalty - 1.0) * (self.e0 - self.emin)
    }
}
