//! SIMP compliance minimization.
//!
//! Minimizes the total compliance of an analysis model subject to a single
//! volume constraint `Σ vₑρₑ / (V_f Σ vₑ) − 1 ≤ 0`, with the densities of all
//! non-ghost elements as design variables. Each iteration analyzes the model,
//! takes the compliance sensitivities and asks MMA for new densities.

use super::mma::{mma_update, MmaInput, MmaSettings, MmaState};
use crate::error::{Error, Result};
use crate::model::AnalysisModel;
use log::{debug, info};
use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TopologySettings {
    /// Target share of the design volume.
    pub volume_fraction: f64,
    pub penalty: f64,
    pub max_iterations: usize,
    /// Stop once no density changes by more than this.
    pub tolerance: f64,
    /// Lower bound of the design variables.
    pub min_density: f64,
    pub mma: MmaSettings,
}

impl Default for TopologySettings {
    fn default() -> Self {
        Self {
            volume_fraction: 0.5,
            penalty: 3.0,
            max_iterations: 100,
            tolerance: 1e-3,
            min_density: 1e-3,
            mma: MmaSettings::with_constraints(1).with_move_limit(0.2),
        }
    }
}

impl TopologySettings {
    pub fn with_volume_fraction(mut self, volume_fraction: f64) -> Self {
        self.volume_fraction = volume_fraction;
        self
    }

    pub fn with_penalty(mut self, penalty: f64) -> Self {
        self.penalty = penalty;
        self
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    pub fn with_tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = tolerance;
        self
    }

    fn validate(&self) -> Result<()> {
        if !(self.volume_fraction > 0.0 && self.volume_fraction <= 1.0) {
            return Err(Error::InvalidArgument(format!(
                "volume fraction must lie in (0, 1], got {}",
                self.volume_fraction
            )));
        }
        if !(self.min_density > 0.0 && self.min_density < self.volume_fraction) {
            return Err(Error::InvalidArgument(format!(
                "minimum density must lie in (0, {}), got {}",
                self.volume_fraction, self.min_density
            )));
        }
        if self.mma.n_constraints() != 1 {
            return Err(Error::InvalidArgument(format!(
                "topology optimization has one volume constraint, MMA settings describe {}",
                self.mma.n_constraints()
            )));
        }
        Ok(())
    }
}

/// Outcome of an optimization run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizationReport {
    pub iterations: usize,
    /// Total compliance at the start of every iteration.
    pub compliance_history: Vec<f64>,
    /// Compliance of the final densities.
    pub final_compliance: f64,
    pub volume_fraction: f64,
    pub converged: bool,
    /// Final densities of the design elements.
    pub densities: Vec<f64>,
}

pub struct TopologyOptimizer {
    settings: TopologySettings,
}

impl TopologyOptimizer {
    pub fn new(settings: TopologySettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &TopologySettings {
        &self.settings
    }

    /// Optimize the densities of `model`, meshing it first if needed.
    ///
    /// On return the model holds the final densities and their analysis.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Optimization`] if the model has no design elements or
    /// carries no load, and propagates analysis and MMA errors.
    pub fn run(&self, model: &mut AnalysisModel) -> Result<OptimizationReport> {
        let settings = &self.settings;
        settings.validate()?;
        let penalty = settings.penalty;
        model.set_element_densities(settings.volume_fraction, penalty)?;

        let design = model.design_elements();
        if design.is_empty() {
            return Err(Error::Optimization("model has no design elements".into()));
        }
        let n = design.len();
        let volumes: Vec<f64> = {
            let system = model
                .system()
                .ok_or_else(|| Error::Optimization("model has no FEA system".into()))?;
            design
                .iter()
                .map(|&id| system.element(id).map(|e| e.volume()))
                .collect::<Result<_>>()?
        };
        let allowed_volume = settings.volume_fraction * volumes.iter().sum::<f64>();
        let volume_gradient = DMatrix::from_fn(1, n, |_, j| volumes[j] / allowed_volume);
        info!(
            "topology optimization over {} elements, volume fraction {}, penalty {}",
            n, settings.volume_fraction, penalty
        );

        let xmin = vec![settings.min_density; n];
        let xmax = vec![1.0; n];
        let mut x = vec![settings.volume_fraction; n];
        let mut xold1 = x.clone();
        let mut xold2 = x.clone();
        let mut state = MmaState::default();
        let mut history = Vec::new();
        let mut reference = None;
        let mut converged = false;

        for iteration in 1..=settings.max_iterations {
            model.set_densities(&x, penalty)?;
            model.analyze()?;
            let system = model
                .system()
                .ok_or_else(|| Error::Optimization("model has no FEA system".into()))?;
            let compliance = system.total_compliance();
            let c0 = *reference.get_or_insert(compliance);
            if !(c0 > 0.0) {
                return Err(Error::Optimization(format!(
                    "initial compliance is {:e}; the model carries no load",
                    c0
                )));
            }
            history.push(compliance);

            let sensitivities = system.compliance_sensitivities();
            let df0dx: Vec<f64> = design.iter().map(|id| sensitivities[id.0] / c0).collect();
            let volume: f64 = x.iter().zip(&volumes).map(|(x, v)| x * v).sum();
            let fval = [volume / allowed_volume - 1.0];

            let input = MmaInput {
                iteration,
                x: &x,
                xmin: &xmin,
                xmax: &xmax,
                xold1: &xold1,
                xold2: &xold2,
                f0: compliance / c0,
                df0dx: &df0dx,
                fval: &fval,
                dfdx: &volume_gradient,
            };
            let update = mma_update(&settings.mma, &input, &state)?;
            let change = update
                .x
                .iter()
                .zip(&x)
                .map(|(new, old)| (new - old).abs())
                .fold(0.0, f64::max);
            info!(
                "iteration {}: compliance {:.6e}, volume {:.4}, change {:.4}",
                iteration,
                compliance,
                volume / allowed_volume * settings.volume_fraction,
                change
            );
            debug!("MMA multiplier {:?}", update.lambda);

            xold2 = std::mem::replace(&mut xold1, std::mem::replace(&mut x, update.x));
            state = MmaState {
                low: update.low,
                upp: update.upp,
            };
            if change < settings.tolerance {
                converged = true;
                break;
            }
        }

        model.set_densities(&x, penalty)?;
        model.analyze()?;
        let final_compliance = model.system().map_or(0.0, |s| s.total_compliance());
        let volume_fraction = x.iter().zip(&volumes).map(|(x, v)| x * v).sum::<f64>() / volumes.iter().sum::<f64>();
        info!(
            "topology optimization {} after {} iterations: compliance {:.6e}, volume fraction {:.4}",
            if converged { "converged" } else { "stopped" },
            history.len(),
            final_compliance,
            volume_fraction
        );
        Ok(OptimizationReport {
            iterations: history.len(),
            compliance_history: history,
            final_compliance,
            volume_fraction,
            converged,
            densities: x,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{Constraint, GeometryShape, Load};
    use crate::structure::Structure;
    use crate::types::{Dof, Point3};

    /// Two bars meeting at a loaded joint: one along the load, one diagonal.
    fn two_bar_model() -> AnalysisModel {
        let mut model = AnalysisModel::default();
        let joint = Point3::new(1.0, 0.0, 0.0);
        let supports = [Point3::new(0.0, 0.0, 0.0), Point3::new(0.0, 1.0, 0.0)];
        for support in supports {
            let g = model.add_geometry(GeometryShape::LineSegment([support, joint])).unwrap();
            model.add_structure(g, Structure::truss(0.01, 1000.0).unwrap()).unwrap();
            let p = model.add_point(support);
            for constraint in Constraint::pinned() {
                model.add_point_constraint(p, constraint).unwrap();
            }
        }
        let j = model.add_point(joint);
        model.add_point_constraint(j, Constraint::new(Dof::Uz)).unwrap();
        model.add_point_load(j, Load::new("push", 1.0, Dof::Ux)).unwrap();
        model
    }

    #[test]
    fn test_material_moves_to_load_path() {
        let mut model = two_bar_model();
        let report = model
            .optimize(&TopologySettings::default().with_max_iterations(60))
            .unwrap();
        assert_eq!(report.densities.len(), 2);
        assert!(report.densities[0] > report.densities[1]);
        assert!(report.volume_fraction <= 0.5 + 1e-2);
        assert!(report.final_compliance < report.compliance_history[0]);
        assert_eq!(report.iterations, report.compliance_history.len());
        assert_eq!(model.element_densities(), report.densities);
    }

    #[test]
    fn test_invalid_settings_rejected() {
        let mut model = two_bar_model();
        let settings = TopologySettings::default().with_volume_fraction(0.0);
        assert!(matches!(model.optimize(&settings), Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn test_unloaded_model_rejected() {
        let mut model = AnalysisModel::default();
        let g = model
            .add_geometry(GeometryShape::LineSegment([Point3::zeros(), Point3::new(1.0, 0.0, 0.0)]))
            .unwrap();
        model.add_structure(g, Structure::truss(0.01, 1000.0).unwrap()).unwrap();
        for x in [0.0, 1.0] {
            let p = model.add_point(Point3::new(x, 0.0, 0.0));
            for constraint in Constraint::pinned() {
                model.add_point_constraint(p, constraint).unwrap();
            }
        }
        assert!(matches!(
            model.optimize(&TopologySettings::default()),
            Err(Error::Optimization(_))
        ));
    }
}
