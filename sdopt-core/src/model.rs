//! Analysis model: the entry point for building, meshing and analyzing a
//! structure.
//!
//! The model owns the user points and geometries. Meshing turns them into a
//! [`FeaSystem`]; any change to points, geometries or their assignments
//! discards the mesh, which is rebuilt on the next [`AnalysisModel::mesh`] or
//! [`AnalysisModel::analyze`] call.

use crate::assembly::FeaSystem;
use crate::element::{
    Beam, Element, ElementFlags, ElementId, ElementKind, ElementOrigin, EnergyBreakdown, FlatShell, Hexahedron,
    NodeId, Truss,
};
use crate::error::{Error, Result};
use crate::geometry::{Constraint, Geometry, GeometryId, GeometryKind, GeometryShape, Load, PointId, PointStore};
use crate::material::DEFAULT_RELATIVE_LOWER_BOUND;
use crate::mesh::{mesh_geometry, MeshOptions, Subdivision};
use crate::optimization::{OptimizationReport, TopologyOptimizer, TopologySettings};
use crate::results::SdResults;
use crate::solver::{SolverConfig, SolverKind};
use crate::structure::{Structure, StructureKind};
use crate::types::{BoundingBox, LoadCase, Point3, StressTensor, COINCIDENCE_TOLERANCE};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

/// Model-wide settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelSettings {
    /// Subdivision used when analyzing an unmeshed model.
    pub mesh_size: Subdivision,
    pub solver: SolverConfig,
    /// Distance below which two points are the same point.
    pub coincidence_tolerance: f64,
    /// Void stiffness ratio for structures that do not set their own.
    pub relative_lower_bound: f64,
    /// Friction coefficient of the Drucker-Prager failure measure.
    pub drucker_prager_alpha: f64,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            mesh_size: Subdivision::Uniform(1),
            solver: SolverConfig::default(),
            coincidence_tolerance: COINCIDENCE_TOLERANCE,
            relative_lower_bound: DEFAULT_RELATIVE_LOWER_BOUND,
            drucker_prager_alpha: 0.0,
        }
    }
}

impl ModelSettings {
    pub fn with_mesh_size(mut self, mesh_size: Subdivision) -> Self {
        self.mesh_size = mesh_size;
        self
    }

    pub fn with_solver(mut self, solver: SolverConfig) -> Self {
        self.solver = solver;
        self
    }

    pub fn with_coincidence_tolerance(mut self, tolerance: f64) -> Self {
        self.coincidence_tolerance = tolerance;
        self
    }

    pub fn with_relative_lower_bound(mut self, bound: f64) -> Self {
        self.relative_lower_bound = bound;
        self
    }

    pub fn with_drucker_prager_alpha(mut self, alpha: f64) -> Self {
        self.drucker_prager_alpha = alpha;
        self
    }

    fn validate(&self) -> Result<()> {
        self.mesh_size.counts()?;
        if !(self.coincidence_tolerance > 0.0) {
            return Err(Error::InvalidArgument(format!(
                "coincidence tolerance must be positive, got {}",
                self.coincidence_tolerance
            )));
        }
        if !(self.relative_lower_bound > 0.0 && self.relative_lower_bound < 1.0) {
            return Err(Error::InvalidArgument(format!(
                "relative lower bound must lie in (0, 1), got {}",
                self.relative_lower_bound
            )));
        }
        Ok(())
    }
}

/// Lifecycle state of an [`AnalysisModel`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelState {
    Unmeshed,
    Meshed,
    Analyzed,
}

/// Points, geometries and the FEA system generated from them.
pub struct AnalysisModel {
    settings: ModelSettings,
    points: PointStore,
    geometries: Vec<Geometry>,
    mesh_points: PointStore,
    system: Option<FeaSystem>,
    analyzed: bool,
}

impl Default for AnalysisModel {
    fn default() -> Self {
        Self {
            points: PointStore::new(COINCIDENCE_TOLERANCE),
            mesh_points: PointStore::new(COINCIDENCE_TOLERANCE),
            settings: ModelSettings::default(),
            geometries: Vec::new(),
            system: None,
            analyzed: false,
        }
    }
}

impl AnalysisModel {
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] for a zero mesh size or a
    /// non-positive tolerance.
    pub fn new(settings: ModelSettings) -> Result<Self> {
        settings.validate()?;
        Ok(Self {
            points: PointStore::new(settings.coincidence_tolerance),
            mesh_points: PointStore::new(settings.coincidence_tolerance),
            settings,
            geometries: Vec::new(),
            system: None,
            analyzed: false,
        })
    }

    pub fn settings(&self) -> &ModelSettings {
        &self.settings
    }

    pub fn state(&self) -> ModelState {
        match (&self.system, self.analyzed) {
            (None, _) => ModelState::Unmeshed,
            (Some(_), false) => ModelState::Meshed,
            (Some(_), true) => ModelState::Analyzed,
        }
    }

    // ---- model building ----

    /// Add a point, or return the coincident existing one.
    pub fn add_point(&mut self, position: Point3) -> PointId {
        let (id, created) = self.points.insert(position);
        if created {
            self.invalidate();
        }
        id
    }

    /// Add a geometry, or return the existing geometry with the same corners.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if two corners coincide. Nothing is
    /// added in that case.
    pub fn add_geometry(&mut self, shape: GeometryShape) -> Result<GeometryId> {
        let corners = shape.corners();
        let tolerance = self.settings.coincidence_tolerance;
        for (i, a) in corners.iter().enumerate() {
            if corners[i + 1..].iter().any(|b| (a - b).norm() <= tolerance) {
                return Err(Error::InvalidArgument(format!(
                    "{:?} has coincident corner points",
                    shape.kind()
                )));
            }
        }

        let kind = shape.kind();
        let ids: Vec<PointId> = corners.iter().map(|&p| self.add_point(p)).collect();
        if let Some(existing) = self.geometries.iter().position(|g| g.same_entity(kind, &ids)) {
            return Ok(GeometryId(existing));
        }
        let geometry = Geometry::new(kind, ids)?;
        self.geometries.push(geometry);
        self.invalidate();
        Ok(GeometryId(self.geometries.len() - 1))
    }

    /// Assign a structure to a geometry.
    ///
    /// A truss or beam frame on a loaded quadrilateral also receives a ghost
    /// load panel that carries the surface load into the frame.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if the structure kind does not fit
    /// the geometry kind.
    pub fn add_structure(&mut self, geometry: GeometryId, structure: Structure) -> Result<()> {
        self.edit_geometry(geometry, |g| g.add_structure(structure))
    }

    pub fn add_point_load(&mut self, point: PointId, load: Load) -> Result<()> {
        self.points.point_mut(point)?.loads.push(load);
        self.invalidate();
        Ok(())
    }

    /// Add a load distributed over the geometry.
    pub fn add_geometry_load(&mut self, geometry: GeometryId, load: Load) -> Result<()> {
        self.edit_geometry(geometry, |g| {
            g.add_load(load);
            Ok(())
        })
    }

    pub fn add_point_constraint(&mut self, point: PointId, constraint: Constraint) -> Result<()> {
        self.points.point_mut(point)?.add_constraint(constraint);
        self.invalidate();
        Ok(())
    }

    /// Constrain every mesh point of the geometry.
    pub fn add_geometry_constraint(&mut self, geometry: GeometryId, constraint: Constraint) -> Result<()> {
        self.geometry_mut(geometry)?.add_constraint(constraint);
        self.invalidate();
        Ok(())
    }

    /// Apply `edit` to a copy of the geometry and commit it, with its load
    /// panel, only if everything succeeds.
    fn edit_geometry(&mut self, id: GeometryId, edit: impl FnOnce(&mut Geometry) -> Result<()>) -> Result<()> {
        let mut geometry = self.geometry(id)?.clone();
        edit(&mut geometry)?;
        ensure_load_panel(&mut geometry, id)?;
        *self.geometry_mut(id)? = geometry;
        self.invalidate();
        Ok(())
    }

    // ---- meshing and analysis ----

    /// Mesh every geometry and build the FEA system.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] for a zero subdivision and
    /// propagates meshing and element errors. The model, including any
    /// previous mesh, is left unchanged on error.
    pub fn mesh(&mut self, subdivision: Subdivision) -> Result<()> {
        subdivision.counts()?;
        let mut geometries = self.geometries.clone();
        for geometry in &mut geometries {
            geometry.clear_mesh();
        }
        let (mesh_points, system) = build_system(
            &mut geometries,
            &self.points,
            subdivision,
            MeshOptions::default(),
            &self.settings,
        )?;
        info!(
            "meshed {} geometries into {} nodes and {} elements",
            geometries.len(),
            system.nodes().len(),
            system.elements().len()
        );
        self.settings.mesh_size = subdivision;
        self.geometries = geometries;
        self.mesh_points = mesh_points;
        self.system = Some(system);
        self.analyzed = false;
        Ok(())
    }

    /// Discard the mesh and the FEA system. Points and geometries remain.
    pub fn clear_mesh(&mut self) {
        self.invalidate();
    }

    fn invalidate(&mut self) {
        for geometry in &mut self.geometries {
            geometry.clear_mesh();
        }
        self.mesh_points.clear();
        self.system = None;
        self.analyzed = false;
    }

    /// Analyze with the configured solver, meshing first if needed.
    pub fn analyze(&mut self) -> Result<()> {
        self.analyze_with(self.settings.solver.kind)
    }

    pub fn analyze_with(&mut self, kind: SolverKind) -> Result<()> {
        if self.system.is_none() {
            self.mesh(self.settings.mesh_size)?;
        }
        self.analyzed = false;
        let system = self.system_mut()?;
        system.generate_global_system()?;
        system.solve(kind)?;
        self.analyzed = true;
        Ok(())
    }

    /// Whether the structure can carry load.
    ///
    /// Meshes a scratch copy of the model at subdivision 1 without ghost and
    /// load-panel structures and checks its stiffness for singularity. The
    /// model's own mesh and results are not touched.
    pub fn is_stable(&self) -> Result<bool> {
        let mut scratch = self.geometries.clone();
        let (_, mut system) = build_system(
            &mut scratch,
            &self.points,
            Subdivision::Uniform(1),
            MeshOptions { skip_ghost: true },
            &self.settings,
        )?;
        system.generate_global_system()?;
        Ok(!system.is_singular()?)
    }

    // ---- densities ----

    /// Set every non-ghost element to `volume_fraction` and reassemble.
    ///
    /// Meshes first if the model is unmeshed.
    pub fn set_element_densities(&mut self, volume_fraction: f64, penalty: f64) -> Result<()> {
        check_density(volume_fraction)?;
        check_penalty(penalty)?;
        self.ensure_meshed()?;
        let system = self.system_mut()?;
        for element in system.elements_mut().iter_mut().filter(|e| !e.is_ghost()) {
            element.set_density(volume_fraction, penalty);
        }
        system.generate_global_system()?;
        self.analyzed = false;
        Ok(())
    }

    /// Set the densities of the design elements, in [`AnalysisModel::design_elements`] order.
    pub fn set_densities(&mut self, densities: &[f64], penalty: f64) -> Result<()> {
        check_penalty(penalty)?;
        self.ensure_meshed()?;
        let design = self.design_elements();
        if densities.len() != design.len() {
            return Err(Error::InvalidArgument(format!(
                "expected {} densities, got {}",
                design.len(),
                densities.len()
            )));
        }
        if let Some(&bad) = densities.iter().find(|d| check_density(**d).is_err()) {
            return Err(Error::InvalidArgument(format!("density {} is outside (0, 1]", bad)));
        }
        let system = self.system_mut()?;
        for (id, &density) in design.iter().zip(densities) {
            system.element_mut(*id)?.set_density(density, penalty);
        }
        system.generate_global_system()?;
        self.analyzed = false;
        Ok(())
    }

    fn ensure_meshed(&mut self) -> Result<()> {
        if self.system.is_none() {
            self.mesh(self.settings.mesh_size)?;
        }
        Ok(())
    }

    /// Elements that take part in topology optimization.
    pub fn design_elements(&self) -> Vec<ElementId> {
        self.system
            .as_ref()
            .map(|s| {
                s.elements()
                    .iter()
                    .enumerate()
                    .filter(|(_, e)| !e.is_ghost())
                    .map(|(i, _)| ElementId(i))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Run SIMP topology optimization on the meshed model.
    pub fn optimize(&mut self, settings: &TopologySettings) -> Result<OptimizationReport> {
        TopologyOptimizer::new(settings.clone()).run(self)
    }

    // ---- results ----

    /// Energies and volumes of the whole structure.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Assembly`] if the model has not been analyzed.
    pub fn total_results(&self) -> Result<SdResults> {
        Ok(SdResults::from_elements(self.analyzed_system()?.elements()))
    }

    /// Energies and volumes of the elements lying inside or on `region`.
    pub fn partial_results(&self, region: &BoundingBox) -> Result<SdResults> {
        Ok(SdResults::within(
            self.analyzed_system()?.elements(),
            region,
            self.settings.coincidence_tolerance,
        ))
    }

    pub fn element_densities(&self) -> Vec<f64> {
        self.system
            .as_ref()
            .map(|s| s.elements().iter().map(|e| e.density()).collect())
            .unwrap_or_default()
    }

    pub fn stress_at_center(&self, element: ElementId, load_case: &LoadCase) -> Result<StressTensor> {
        Ok(self.analyzed_system()?.element(element)?.stress_at_center(load_case))
    }

    /// Drucker-Prager measure of the stress at center.
    pub fn failure_measure(&self, element: ElementId, load_case: &LoadCase) -> Result<f64> {
        Ok(self
            .stress_at_center(element, load_case)?
            .drucker_prager(self.settings.drucker_prager_alpha))
    }

    /// Strain energy of one element summed over load cases.
    pub fn element_energy(&self, element: ElementId) -> Result<EnergyBreakdown> {
        Ok(self.analyzed_system()?.element(element)?.total_energy())
    }

    /// Node generated at `position`, if the model is meshed.
    pub fn node_at(&self, position: &Point3) -> Option<NodeId> {
        self.system.as_ref().and_then(|s| s.find_node(position))
    }

    fn analyzed_system(&self) -> Result<&FeaSystem> {
        match &self.system {
            Some(system) if self.analyzed => Ok(system),
            _ => Err(Error::Assembly("model has not been analyzed".into())),
        }
    }

    // ---- accessors ----

    pub fn system(&self) -> Option<&FeaSystem> {
        self.system.as_ref()
    }

    fn system_mut(&mut self) -> Result<&mut FeaSystem> {
        self.system
            .as_mut()
            .ok_or_else(|| Error::Assembly("model has not been meshed".into()))
    }

    pub fn points(&self) -> &PointStore {
        &self.points
    }

    /// Mesh points of the current mesh. Empty when unmeshed.
    pub fn mesh_points(&self) -> &PointStore {
        &self.mesh_points
    }

    pub fn geometries(&self) -> &[Geometry] {
        &self.geometries
    }

    pub fn geometry(&self, id: GeometryId) -> Result<&Geometry> {
        self.geometries
            .get(id.0)
            .ok_or_else(|| Error::InvalidArgument(format!("unknown geometry {}", id.0)))
    }

    fn geometry_mut(&mut self, id: GeometryId) -> Result<&mut Geometry> {
        self.geometries
            .get_mut(id.0)
            .ok_or_else(|| Error::InvalidArgument(format!("unknown geometry {}", id.0)))
    }
}

/// Give a truss or beam frame on a loaded quadrilateral a ghost load panel.
fn ensure_load_panel(geometry: &mut Geometry, id: GeometryId) -> Result<()> {
    if geometry.kind() != GeometryKind::Quadrilateral
        || geometry.loads().is_empty()
        || geometry.structures().iter().any(|s| s.load_panel)
    {
        return Ok(());
    }
    let frame = geometry
        .structures()
        .iter()
        .find(|s| matches!(s.kind, StructureKind::Truss { .. } | StructureKind::Beam { .. }))
        .copied();
    if let Some(frame) = frame {
        if let Some(panel) = Structure::load_panel_for(&frame)? {
            debug!("adding load panel to frame on geometry {}", id.0);
            geometry.add_structure(panel)?;
        }
    }
    Ok(())
}

fn check_density(density: f64) -> Result<()> {
    if density > 0.0 && density <= 1.0 {
        Ok(())
    } else {
        Err(Error::InvalidArgument(format!("density {} is outside (0, 1]", density)))
    }
}

fn check_penalty(penalty: f64) -> Result<()> {
    if penalty >= 1.0 {
        Ok(())
    } else {
        Err(Error::InvalidArgument(format!("penalty must be at least 1, got {}", penalty)))
    }
}

/// Element formulation generated for a structure, `None` for a structure
/// without stiffness.
fn element_kind(kind: &StructureKind) -> Result<Option<ElementKind>> {
    let Some(material) = kind.material()? else {
        return Ok(None);
    };
    Ok(match *kind {
        StructureKind::None => None,
        StructureKind::Truss { area, .. } => Some(ElementKind::Truss(Truss::new(area, material))),
        StructureKind::Beam { width, height, .. } => Some(ElementKind::Beam(Beam::new(width, height, material))),
        StructureKind::FlatShell { thickness, .. } => Some(ElementKind::FlatShell(FlatShell::new(thickness, material))),
        StructureKind::QuadHexahedron { .. } => Some(ElementKind::Hexahedron(Hexahedron::new(material))),
    })
}

/// Mesh `geometries` into a fresh point store and build an FEA system on it.
fn build_system(
    geometries: &mut [Geometry],
    points: &PointStore,
    subdivision: Subdivision,
    options: MeshOptions,
    settings: &ModelSettings,
) -> Result<(PointStore, FeaSystem)> {
    let tolerance = settings.coincidence_tolerance;
    let mut mesh_points = PointStore::new(tolerance);
    for geometry in geometries.iter_mut() {
        mesh_geometry(geometry, points, subdivision, &mut mesh_points, options)?;
    }

    for (id, point) in points.iter() {
        if (!point.loads.is_empty() || !point.constraints.is_empty()) && mesh_points.find(&point.position).is_none() {
            warn!(
                "point {} at ({}, {}, {}) carries loads or constraints but no mesh point coincides with it",
                id.0, point.position.x, point.position.y, point.position.z
            );
        }
    }

    let mut system = FeaSystem::with_tolerance(settings.solver.clone(), tolerance);
    let nodes: Vec<NodeId> = mesh_points.iter().map(|(_, point)| system.add_node(point)).collect();

    for (index, geometry) in geometries.iter().enumerate() {
        for group in geometry.element_groups() {
            let structure = geometry
                .structures()
                .get(group.structure)
                .ok_or_else(|| Error::Mesh(format!("element group references missing structure {}", group.structure)))?;
            let Some(kind) = element_kind(&structure.kind)? else {
                continue;
            };
            let element_nodes = group.points.iter().map(|p| nodes[p.0]).collect();
            let coords = group
                .points
                .iter()
                .map(|&p| mesh_points.position(p))
                .collect::<Result<Vec<_>>>()?;
            let lower_bound = structure.relative_lower_bound.unwrap_or(settings.relative_lower_bound);
            let element = Element::new(kind, element_nodes, coords, lower_bound)?
                .with_flags(ElementFlags {
                    ghost: structure.ghost,
                    visible: structure.visible,
                    load_panel: structure.load_panel,
                })
                .with_origin(ElementOrigin {
                    geometry: GeometryId(index),
                    structure: group.structure,
                });
            system.add_element(element)?;
        }
    }
    Ok((mesh_points, system))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Dof;
    use approx::assert_relative_eq;

    fn bar_model() -> (AnalysisModel, PointId, PointId) {
        let mut model = AnalysisModel::default();
        let g = model
            .add_geometry(GeometryShape::LineSegment([
                Point3::new(0.0, 0.0, 0.0),
                Point3::new(1.0, 0.0, 0.0),
            ]))
            .unwrap();
        // A = 0.1, so axial behaviour matches a truss of the same area.
        model.add_structure(g, Structure::beam(0.1, 1.0, 1000.0, 0.3).unwrap()).unwrap();
        let a = model.add_point(Point3::new(0.0, 0.0, 0.0));
        let b = model.add_point(Point3::new(1.0, 0.0, 0.0));
        for constraint in Constraint::fixed() {
            model.add_point_constraint(a, constraint).unwrap();
        }
        for dof in [Dof::Uy, Dof::Uz] {
            model.add_point_constraint(b, Constraint::new(dof)).unwrap();
        }
        model.add_point_load(b, Load::new("dead", 10.0, Dof::Ux)).unwrap();
        (model, a, b)
    }

    #[test]
    fn test_geometry_dedup() {
        let mut model = AnalysisModel::default();
        let a = Point3::new(0.0, 0.0, 0.0);
        let b = Point3::new(2.0, 0.0, 0.0);
        let first = model.add_geometry(GeometryShape::LineSegment([a, b])).unwrap();
        let second = model.add_geometry(GeometryShape::LineSegment([b, a])).unwrap();
        assert_eq!(first, second);
        assert_eq!(model.geometries().len(), 1);
        assert_eq!(model.points().len(), 2);
    }

    #[test]
    fn test_collapsed_geometry_rejected_without_mutation() {
        let mut model = AnalysisModel::default();
        let p = Point3::new(1.0, 1.0, 1.0);
        let result = model.add_geometry(GeometryShape::LineSegment([p, p]));
        assert!(matches!(result, Err(Error::InvalidArgument(_))));
        assert!(model.points().is_empty());
        assert!(model.geometries().is_empty());
    }

    #[test]
    fn test_incompatible_structure_rejected() {
        let mut model = AnalysisModel::default();
        let g = model
            .add_geometry(GeometryShape::cuboid(Point3::zeros(), Point3::new(1.0, 1.0, 1.0)))
            .unwrap();
        let beam = Structure::beam(0.1, 0.2, 1.0, 0.3).unwrap();
        assert!(matches!(model.add_structure(g, beam), Err(Error::InvalidArgument(_))));
        assert!(model.geometry(g).unwrap().structures().is_empty());
    }

    #[test]
    fn test_state_transitions() {
        let (mut model, _, _) = bar_model();
        assert_eq!(model.state(), ModelState::Unmeshed);
        model.mesh(Subdivision::Uniform(2)).unwrap();
        assert_eq!(model.state(), ModelState::Meshed);
        assert_eq!(model.system().unwrap().elements().len(), 2);
        model.analyze().unwrap();
        assert_eq!(model.state(), ModelState::Analyzed);

        model.add_point(Point3::new(5.0, 5.0, 5.0));
        assert_eq!(model.state(), ModelState::Unmeshed);
        assert!(model.mesh_points().is_empty());
        assert!(model.geometries()[0].mesh().is_empty());
        assert!(model.total_results().is_err());
    }

    #[test]
    fn test_analyze_meshes_with_last_size() {
        let (mut model, _, b) = bar_model();
        model.mesh(Subdivision::Uniform(4)).unwrap();
        model.clear_mesh();
        model.analyze().unwrap();
        assert_eq!(model.system().unwrap().elements().len(), 4);

        let position = model.points().position(b).unwrap();
        let node = model.node_at(&position).unwrap();
        let u = model.system().unwrap().displacement(node, &"dead".into()).unwrap();
        // u = F L / (E A)
        assert_relative_eq!(u[0], 0.1, max_relative = 1e-9);
        let results = model.total_results().unwrap();
        assert_relative_eq!(results.total_strain_energy, 0.5, max_relative = 1e-9);
        assert_relative_eq!(results.total_structural_volume, 0.1, max_relative = 1e-12);
    }

    #[test]
    fn test_zero_mesh_size_rejected() {
        let (mut model, _, _) = bar_model();
        model.mesh(Subdivision::Uniform(3)).unwrap();
        assert!(matches!(model.mesh(Subdivision::Uniform(0)), Err(Error::InvalidArgument(_))));
        assert_eq!(model.state(), ModelState::Meshed);
        assert_eq!(model.settings().mesh_size, Subdivision::Uniform(3));
    }

    #[test]
    fn test_failed_remesh_keeps_previous_mesh() {
        // Points closer than 0.3 merge, so four cells on a unit bar collapse.
        let settings = ModelSettings::default().with_coincidence_tolerance(0.3);
        let mut model = AnalysisModel::new(settings).unwrap();
        let g = model
            .add_geometry(GeometryShape::LineSegment([Point3::zeros(), Point3::new(1.0, 0.0, 0.0)]))
            .unwrap();
        model.add_structure(g, Structure::beam(0.1, 1.0, 1000.0, 0.3).unwrap()).unwrap();
        let a = model.add_point(Point3::zeros());
        let b = model.add_point(Point3::new(1.0, 0.0, 0.0));
        for constraint in Constraint::fixed() {
            model.add_point_constraint(a, constraint).unwrap();
        }
        model.add_point_load(b, Load::new("dead", 10.0, Dof::Ux)).unwrap();
        model.analyze().unwrap();
        let mesh = model.geometries()[0].mesh().clone();

        assert!(matches!(model.mesh(Subdivision::Uniform(4)), Err(Error::Mesh(_))));
        assert_eq!(model.state(), ModelState::Analyzed);
        assert_eq!(model.settings().mesh_size, Subdivision::Uniform(1));
        assert_eq!(model.geometries()[0].mesh(), &mesh);
        assert_eq!(model.mesh_points().len(), 2);
        assert_relative_eq!(model.total_results().unwrap().total_strain_energy, 0.5, max_relative = 1e-9);
    }

    #[test]
    fn test_is_stable_leaves_mesh_untouched() {
        let (mut model, _, _) = bar_model();
        model.mesh(Subdivision::Uniform(3)).unwrap();
        let before = model.geometries()[0].mesh().clone();
        assert!(model.is_stable().unwrap());
        assert_eq!(model.geometries()[0].mesh(), &before);
        assert_eq!(model.system().unwrap().elements().len(), 3);
    }

    #[test]
    fn test_densities_scale_energy() {
        let (mut model, _, _) = bar_model();
        model.analyze().unwrap();
        let solid = model.total_results().unwrap().total_strain_energy;

        model.set_element_densities(0.5, 3.0).unwrap();
        assert_eq!(model.state(), ModelState::Meshed);
        model.analyze().unwrap();
        let results = model.total_results().unwrap();
        let scale = 1e-6 + 0.125 * (1.0 - 1e-6);
        assert_relative_eq!(results.total_strain_energy, solid / scale, max_relative = 1e-9);
        assert_relative_eq!(results.total_structural_volume, 0.05, max_relative = 1e-12);
        assert_eq!(model.element_densities(), vec![0.5]);

        assert!(model.set_densities(&[0.5, 0.5], 3.0).is_err());
        assert!(model.set_element_densities(0.0, 3.0).is_err());
    }

    #[test]
    fn test_frame_on_loaded_quad_gets_load_panel() {
        let mut model = AnalysisModel::default();
        let g = model
            .add_geometry(GeometryShape::Quadrilateral([
                Point3::new(0.0, 0.0, 0.0),
                Point3::new(1.0, 0.0, 0.0),
                Point3::new(1.0, 1.0, 0.0),
                Point3::new(0.0, 1.0, 0.0),
            ]))
            .unwrap();
        model.add_structure(g, Structure::truss(0.01, 100.0).unwrap()).unwrap();
        assert_eq!(model.geometry(g).unwrap().structures().len(), 1);
        model.add_geometry_load(g, Load::new("wind", -1.0, Dof::Uz)).unwrap();
        model.add_geometry_load(g, Load::new("wind", -1.0, Dof::Uz)).unwrap();
        let structures = model.geometry(g).unwrap().structures();
        assert_eq!(structures.len(), 2);
        assert!(structures[1].load_panel && structures[1].ghost);

        model.mesh(Subdivision::Uniform(1)).unwrap();
        let elements = model.system().unwrap().elements();
        assert_eq!(elements.iter().filter(|e| e.is_ghost()).count(), 1);
        assert_eq!(model.design_elements().len(), 4);
    }

    #[test]
    fn test_failed_load_panel_leaves_geometry_unchanged() {
        let mut model = AnalysisModel::default();
        let g = model
            .add_geometry(GeometryShape::Quadrilateral([
                Point3::new(0.0, 0.0, 0.0),
                Point3::new(1.0, 0.0, 0.0),
                Point3::new(1.0, 1.0, 0.0),
                Point3::new(0.0, 1.0, 0.0),
            ]))
            .unwrap();
        model.add_geometry_load(g, Load::new("wind", -1.0, Dof::Uz)).unwrap();
        // Built field by field, so the section is never validated.
        let frame = Structure {
            kind: StructureKind::Truss {
                area: -1.0,
                youngs_modulus: 100.0,
            },
            ghost: false,
            visible: true,
            load_panel: false,
            relative_lower_bound: None,
        };
        assert!(model.add_structure(g, frame).is_err());
        let geometry = model.geometry(g).unwrap();
        assert!(geometry.structures().is_empty());
        assert_eq!(geometry.loads().len(), 1);
    }
}
