//! Aggregated analysis results.

use crate::element::Element;
use crate::types::BoundingBox;
use serde::{Deserialize, Serialize};

/// Strain energies and volumes summed over a set of elements.
///
/// Energies are summed over all load cases. Volumes are material volumes,
/// `Σ ρₑ vₑ`, so a void element contributes only its remaining density.
/// Ghost and load-panel elements are reported separately and never enter the
/// structural totals.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SdResults {
    pub total_strain_energy: f64,
    /// Flat-shell share of in-plane shear energy.
    pub shear_strain_energy: f64,
    /// Flat-shell share of in-plane normal energy.
    pub axial_strain_energy: f64,
    /// Flat-shell share of plate bending energy.
    pub bend_strain_energy: f64,
    pub total_structural_volume: f64,
    pub ghost_strain_energy: f64,
    pub ghost_structural_volume: f64,
}

impl SdResults {
    pub fn from_elements<'a>(elements: impl IntoIterator<Item = &'a Element>) -> Self {
        let mut results = SdResults::default();
        for element in elements {
            results.accumulate(element);
        }
        results
    }

    /// Aggregate the elements whose corners all lie inside or on `region`.
    pub fn within<'a>(
        elements: impl IntoIterator<Item = &'a Element>,
        region: &BoundingBox,
        tolerance: f64,
    ) -> Self {
        Self::from_elements(
            elements
                .into_iter()
                .filter(|e| e.coords().iter().all(|p| region.contains(p, tolerance))),
        )
    }

    fn accumulate(&mut self, element: &Element) {
        let energy = element.total_energy();
        let volume = element.density() * element.volume();
        if element.is_ghost() {
            self.ghost_strain_energy += energy.total;
            self.ghost_structural_volume += volume;
            return;
        }
        self.total_strain_energy += energy.total;
        self.total_structural_volume += volume;
        if element.kind().is_flat_shell() {
            self.axial_strain_energy += energy.axial;
            self.shear_strain_energy += energy.shear;
            self.bend_strain_energy += energy.bending;
        }
    }
}
