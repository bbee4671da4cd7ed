//! Structural property assignments.
//!
//! A [`Structure`] tells the mesher which kind of element to generate on a
//! geometry and carries the section and material data of that element.

use crate::error::{Error, Result};
use crate::material::{Material, DEFAULT_RELATIVE_LOWER_BOUND};
use serde::{Deserialize, Serialize};

/// Section and material data per structural role.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StructureKind {
    /// No stiffness contribution; the geometry only passes loads on.
    None,
    /// Axial-only member.
    Truss { area: f64, youngs_modulus: f64 },
    /// Rectangular Euler-Bernoulli beam. `width` runs along the local y axis,
    /// `height` along the local z axis.
    Beam {
        width: f64,
        height: f64,
        youngs_modulus: f64,
        poissons_ratio: f64,
    },
    /// Membrane plus plate bending.
    FlatShell {
        thickness: f64,
        youngs_modulus: f64,
        poissons_ratio: f64,
    },
    /// Trilinear solid.
    QuadHexahedron {
        youngs_modulus: f64,
        poissons_ratio: f64,
    },
}

impl StructureKind {
    /// Short name used in diagnostics.
    pub fn name(&self) -> &'static str {
        match self {
            StructureKind::None => "none",
            StructureKind::Truss { .. } => "truss",
            StructureKind::Beam { .. } => "beam",
            StructureKind::FlatShell { .. } => "flat_shell",
            StructureKind::QuadHexahedron { .. } => "quad_hexahedron",
        }
    }

    /// Material of the structure, `None` for the passthrough kind.
    pub fn material(&self) -> Result<Option<Material>> {
        match *self {
            StructureKind::None => Ok(None),
            StructureKind::Truss { youngs_modulus, .. } => {
                Material::uniaxial(youngs_modulus).map(Some)
            }
            StructureKind::Beam {
                youngs_modulus,
                poissons_ratio,
                ..
            }
            | StructureKind::FlatShell {
                youngs_modulus,
                poissons_ratio,
                ..
            }
            | StructureKind::QuadHexahedron {
                youngs_modulus,
                poissons_ratio,
            } => Material::new(youngs_modulus, poissons_ratio).map(Some),
        }
    }

    fn validate(&self) -> Result<()> {
        self.material()?;
        let positive = |name: &str, value: f64| {
            if value > 0.0 && value.is_finite() {
                Ok(())
            } else {
                Err(Error::InvalidMaterial(format!(
                    "{} of a {} structure must be positive, got {}",
                    name,
                    self.name(),
                    value
                )))
            }
        };
        match *self {
            StructureKind::Truss { area, .. } => positive("area", area),
            StructureKind::Beam { width, height, .. } => {
                positive("width", width)?;
                positive("height", height)
            }
            StructureKind::FlatShell { thickness, .. } => positive("thickness", thickness),
            StructureKind::None | StructureKind::QuadHexahedron { .. } => Ok(()),
        }
    }
}

/// A structural property assigned to a geometry.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Structure {
    pub kind: StructureKind,
    /// Excluded from compliance and volume accounting.
    pub ghost: bool,
    pub visible: bool,
    /// Auxiliary panel that carries surface loads into a frame.
    pub load_panel: bool,
    /// Void stiffness relative to the solid modulus.
    pub relative_lower_bound: Option<f64>,
}

impl Structure {
    /// Create a visible, load-bearing structure.
    pub fn new(kind: StructureKind) -> Result<Self> {
        kind.validate()?;
        Ok(Self {
            kind,
            ghost: false,
            visible: true,
            load_panel: false,
            relative_lower_bound: None,
        })
    }

    pub fn none() -> Self {
        Self {
            kind: StructureKind::None,
            ghost: false,
            visible: true,
            load_panel: false,
            relative_lower_bound: None,
        }
    }

    pub fn truss(area: f64, youngs_modulus: f64) -> Result<Self> {
        Self::new(StructureKind::Truss {
            area,
            youngs_modulus,
        })
    }

    pub fn beam(width: f64, height: f64, youngs_modulus: f64, poissons_ratio: f64) -> Result<Self> {
        Self::new(StructureKind::Beam {
            width,
            height,
            youngs_modulus,
            poissons_ratio,
        })
    }

    pub fn flat_shell(thickness: f64, youngs_modulus: f64, poissons_ratio: f64) -> Result<Self> {
        Self::new(StructureKind::FlatShell {
            thickness,
            youngs_modulus,
            poissons_ratio,
        })
    }

    pub fn quad_hexahedron(youngs_modulus: f64, poissons_ratio: f64) -> Result<Self> {
        Self::new(StructureKind::QuadHexahedron {
            youngs_modulus,
            poissons_ratio,
        })
    }

    /// Mark the structure as a ghost component.
    pub fn ghost(mut self) -> Self {
        self.ghost = true;
        self
    }

    pub fn hidden(mut self) -> Self {
        self.visible = false;
        self
    }

    /// Override the relative stiffness of void material.
    pub fn with_relative_lower_bound(mut self, bound: f64) -> Result<Self> {
        if !(bound > 0.0 && bound < 1.0) {
            return Err(Error::InvalidArgument(format!(
                "relative lower bound must be in (0, 1), got {}",
                bound
            )));
        }
        self.relative_lower_bound = Some(bound);
        Ok(self)
    }

    /// Relative lower bound, falling back to the default.
    pub fn lower_bound(&self) -> f64 {
        self.relative_lower_bound
            .unwrap_or(DEFAULT_RELATIVE_LOWER_BOUND)
    }

    /// Whether the structure takes part in compliance accounting.
    pub fn is_active_in_compliance(&self) -> bool {
        !self.ghost && !self.load_panel
    }

    /// Low-stiffness ghost shell spanning a loaded frame.
    ///
    /// Thickness is a thousandth of the frame's section depth, modulus the
    /// frame's void modulus, so the panel transmits load without adding
    /// meaningful stiffness.
    pub fn load_panel_for(frame: &Structure) -> Result<Option<Self>> {
        let (depth, modulus) = match frame.kind {
            StructureKind::Truss {
                area,
                youngs_modulus,
            } => (area.sqrt(), youngs_modulus),
            StructureKind::Beam {
                width,
                height,
                youngs_modulus,
                ..
            } => (width.max(height), youngs_modulus),
            _ => return Ok(None),
        };
        let mut panel = Self::flat_shell(depth * 1e-3, modulus * frame.lower_bound(), 0.0)?;
        panel.ghost = true;
        panel.visible = false;
        panel.load_panel = true;
        Ok(Some(panel))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_non_positive_section_rejected() {
        assert!(Structure::truss(0.0, 1.0).is_err());
        assert!(Structure::beam(1.0, -1.0, 1.0, 0.3).is_err());
        assert!(Structure::flat_shell(1.0, 1.0, 0.6).is_err());
    }

    #[test]
    fn test_default_lower_bound() {
        let s = Structure::quad_hexahedron(1.0, 0.3).unwrap();
        assert_eq!(s.lower_bound(), DEFAULT_RELATIVE_LOWER_BOUND);
        let s = s.with_relative_lower_bound(1e-3).unwrap();
        assert_eq!(s.lower_bound(), 1e-3);
    }

    #[test]
    fn test_load_panel_is_ghost_shell() {
        let frame = Structure::truss(4.0, 1000.0).unwrap();
        let panel = Structure::load_panel_for(&frame).unwrap().unwrap();
        assert!(panel.ghost && panel.load_panel && !panel.is_active_in_compliance());
        match panel.kind {
            StructureKind::FlatShell { thickness, .. } => assert!((thickness - 2e-3).abs() < 1e-12),
            other => panic!("unexpected panel kind {:?}", other),
        }
        assert!(Structure::load_panel_for(&Structure::none()).unwrap().is_none());
    }
}
