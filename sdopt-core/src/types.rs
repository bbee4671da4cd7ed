//! Core data types for FEA operations.
//!
//! This module defines fundamental types used throughout the engine:
//! - Geometric primitives (points, vectors, bounding regions)
//! - Stress tensors and the failure measure derived from them
//! - Degree of freedom identifiers and load case names

use crate::error::{Error, Result};
use nalgebra::{Vector3, Vector6};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A point in 3D space.
pub type Point3 = Vector3<f64>;

/// A 3D vector (displacement, force, etc.).
pub type Vec3 = Vector3<f64>;

/// Default distance below which two points are considered the same entity.
pub const COINCIDENCE_TOLERANCE: f64 = 1e-6;

/// Number of degrees of freedom carried by every node.
pub const DOFS_PER_NODE: usize = 6;

/// A nodal degree of freedom: three translations and three rotations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Dof {
    Ux,
    Uy,
    Uz,
    Rx,
    Ry,
    Rz,
}

impl Dof {
    /// All six DOFs in index order.
    pub const ALL: [Dof; 6] = [Dof::Ux, Dof::Uy, Dof::Uz, Dof::Rx, Dof::Ry, Dof::Rz];

    /// Translational DOFs.
    pub const TRANSLATIONS: [Dof; 3] = [Dof::Ux, Dof::Uy, Dof::Uz];

    /// Index 0-5 of this DOF within a node.
    pub fn index(self) -> usize {
        self as usize
    }

    /// Bit of this DOF in an element-freedom signature.
    pub fn bit(self) -> u8 {
        1 << self.index()
    }
}

impl TryFrom<usize> for Dof {
    type Error = Error;

    fn try_from(index: usize) -> Result<Self> {
        Dof::ALL.get(index).copied().ok_or_else(|| {
            Error::InvalidArgument(format!("DOF index {} out of range 0-5", index))
        })
    }
}

/// Identifier of a load case. Loads sharing an identifier are solved together.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LoadCase(pub String);

impl LoadCase {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }
}

impl fmt::Display for LoadCase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for LoadCase {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

/// Axis-aligned bounding region used to restrict result aggregation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub min: Point3,
    pub max: Point3,
}

impl BoundingBox {
    /// Create a region from two opposite corners in any order.
    pub fn new(a: Point3, b: Point3) -> Self {
        Self {
            min: a.inf(&b),
            max: a.sup(&b),
        }
    }

    /// Whether `p` lies inside or on the boundary, within `tolerance`.
    pub fn contains(&self, p: &Point3, tolerance: f64) -> bool {
        (0..3).all(|i| p[i] >= self.min[i] - tolerance && p[i] <= self.max[i] + tolerance)
    }
}

/// Symmetric stress tensor in Voigt notation.
///
/// Components are ordered as: [σ_xx, σ_yy, σ_zz, τ_xy, τ_yz, τ_xz]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StressTensor(pub Vector6<f64>);

impl StressTensor {
    /// Create a new stress tensor from Voigt components.
    pub fn new(components: [f64; 6]) -> Self {
        Self(Vector6::from_row_slice(&components))
    }

    /// Zero stress state.
    pub fn zero() -> Self {
        Self(Vector6::zeros())
    }

    /// Compute von Mises equivalent stress.
    pub fn von_mises(&self) -> f64 {
        let s = &self.0;
        let term1 = (s[0] - s[1]).powi(2) + (s[1] - s[2]).powi(2) + (s[2] - s[0]).powi(2);
        let term2 = 6.0 * (s[3].powi(2) + s[4].powi(2) + s[5].powi(2));

        ((term1 + term2) / 2.0).sqrt()
    }

    /// First stress invariant I1 = σ_xx + σ_yy + σ_zz.
    pub fn first_invariant(&self) -> f64 {
        self.0[0] + self.0[1] + self.0[2]
    }

    /// Drucker-Prager style failure measure `σ_vm + α·I1`.
    ///
    /// With `alpha = 0` this reduces to von Mises.
    pub fn drucker_prager(&self, alpha: f64) -> f64 {
        self.von_mises() + alpha * self.first_invariant()
    }

    /// Gradient of [`StressTensor::drucker_prager`] with respect to the Voigt
    /// components. Zero at the stress-free state.
    pub fn drucker_prager_gradient(&self, alpha: f64) -> Vector6<f64> {
        let s = &self.0;
        let vm = self.von_mises();
        let mut grad = Vector6::new(alpha, alpha, alpha, 0.0, 0.0, 0.0);
        if vm > f64::EPSILON {
            grad[0] += (2.0 * s[0] - s[1] - s[2]) / (2.0 * vm);
            grad[1] += (2.0 * s[1] - s[0] - s[2]) / (2.0 * vm);
            grad[2] += (2.0 * s[2] - s[0] - s[1]) / (2.0 * vm);
            grad[3] += 3.0 * s[3] / vm;
            grad[4] += 3.0 * s[4] / vm;
            grad[5] += 3.0 * s[5] / vm;
        }
        grad
    }
}

impl Default for StressTensor {
    fn default() -> Self {
        Self::zero()
    }
}
