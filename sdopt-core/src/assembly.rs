//! Finite element system: nodes, elements, global assembly and solution.
//!
//! The system is built in two phases. [`FeaSystem::number_dofs`] runs once per
//! topology: it numbers the free degrees of freedom, discovers load cases and
//! scatters nodal loads. [`FeaSystem::assemble`] runs after every density
//! update and rebuilds the global stiffness from the element contributions.
//! Element stiffness derivation and response recovery run on rayon; triplets
//! are accumulated in element order so the global matrix is deterministic.

use crate::element::{Element, ElementId, NodeId};
use crate::error::{Error, Result};
use crate::geometry::{Load, Point, SpatialIndex};
use crate::solver::{create_solver, LinearSolver, SolverConfig, SolverKind};
use crate::sparse::{dot, CsrMatrix, TripletMatrix};
use crate::types::{Dof, LoadCase, Point3, COINCIDENCE_TOLERANCE, DOFS_PER_NODE};
use log::{debug, info};
use nalgebra::{DMatrix, DVector, Vector6};
use rayon::prelude::*;
use std::collections::{BTreeMap, BTreeSet};

/// A unique mesh point in the FEA system.
#[derive(Debug, Clone)]
pub struct Node {
    position: Point3,
    loads: Vec<Load>,
    constraints: u8,
    signature: u8,
    dofs: [Option<usize>; DOFS_PER_NODE],
    displacements: BTreeMap<LoadCase, Vector6<f64>>,
}

impl Node {
    pub fn new(position: Point3) -> Self {
        Self {
            position,
            loads: Vec::new(),
            constraints: 0,
            signature: 0,
            dofs: [None; DOFS_PER_NODE],
            displacements: BTreeMap::new(),
        }
    }

    /// Node carrying the loads and constraints of `point`.
    pub fn from_point(point: &Point) -> Self {
        let mut node = Self::new(point.position);
        node.merge(point);
        node
    }

    fn merge(&mut self, point: &Point) {
        self.loads.extend(point.loads.iter().cloned());
        self.constraints |= point.constraint_mask();
    }

    pub fn position(&self) -> &Point3 {
        &self.position
    }

    pub fn loads(&self) -> &[Load] {
        &self.loads
    }

    pub fn constraint_mask(&self) -> u8 {
        self.constraints
    }

    pub fn is_constrained(&self, dof: Dof) -> bool {
        self.constraints & dof.bit() != 0
    }

    /// Union of the DOF masks of every element attached to the node.
    pub fn signature(&self) -> u8 {
        self.signature
    }

    /// Global equation number of `dof`, `None` if constrained or unused.
    pub fn dof(&self, dof: Dof) -> Option<usize> {
        self.dofs[dof.index()]
    }

    /// Displacements `[ux, uy, uz, rx, ry, rz]` for `load_case`.
    pub fn displacement(&self, load_case: &LoadCase) -> Option<&Vector6<f64>> {
        self.displacements.get(load_case)
    }
}

/// Density derivative of an element failure measure.
#[derive(Debug, Clone, PartialEq)]
pub struct StressSensitivity {
    /// Failure measure `σ_vm + α I1` at the element center.
    pub measure: f64,
    /// Derivative with respect to each element density.
    pub gradient: Vec<f64>,
}

/// Assembled finite element system.
pub struct FeaSystem {
    nodes: Vec<Node>,
    elements: Vec<Element>,
    index: SpatialIndex,
    config: SolverConfig,
    numbered: bool,
    n_dofs: usize,
    load_cases: Vec<LoadCase>,
    loads: Vec<Vec<f64>>,
    displacements: Vec<Vec<f64>>,
    stiffness: Option<CsrMatrix>,
    solver: Option<Box<dyn LinearSolver>>,
    solved_with: Option<SolverKind>,
}

impl FeaSystem {
    pub fn new(config: SolverConfig) -> Self {
        Self::with_tolerance(config, COINCIDENCE_TOLERANCE)
    }

    /// System whose nodes merge within `tolerance`.
    pub fn with_tolerance(config: SolverConfig, tolerance: f64) -> Self {
        Self {
            nodes: Vec::new(),
            elements: Vec::new(),
            index: SpatialIndex::new(tolerance),
            config,
            numbered: false,
            n_dofs: 0,
            load_cases: Vec::new(),
            loads: Vec::new(),
            displacements: Vec::new(),
            stiffness: None,
            solver: None,
            solved_with: None,
        }
    }

    pub fn config(&self) -> &SolverConfig {
        &self.config
    }

    /// Add a node for `point`, or return the coincident node.
    ///
    /// Loads and constraints of a coincident point are merged into the
    /// existing node.
    pub fn add_node(&mut self, point: &Point) -> NodeId {
        if let Some(existing) = self.find_node(&point.position) {
            self.nodes[existing.0].merge(point);
            if !point.loads.is_empty() || !point.constraints.is_empty() {
                self.invalidate_topology();
            }
            return existing;
        }
        let id = self.nodes.len();
        self.index.insert(&point.position, id);
        self.nodes.push(Node::from_point(point));
        self.invalidate_topology();
        NodeId(id)
    }

    pub fn find_node(&self, position: &Point3) -> Option<NodeId> {
        let nodes = &self.nodes;
        self.index.find(position, |idx| nodes[idx].position).map(NodeId)
    }

    /// Register an element whose nodes already exist in the system.
    pub fn add_element(&mut self, element: Element) -> Result<ElementId> {
        if let Some(bad) = element.nodes().iter().find(|n| n.0 >= self.nodes.len()) {
            return Err(Error::InvalidArgument(format!(
                "element references node {} but the system has {} nodes",
                bad.0,
                self.nodes.len()
            )));
        }
        self.elements.push(element);
        self.invalidate_topology();
        Ok(ElementId(self.elements.len() - 1))
    }

    fn invalidate_topology(&mut self) {
        self.numbered = false;
        self.stiffness = None;
        self.solver = None;
        self.solved_with = None;
    }

    /// Number the free DOFs, discover load cases and build load vectors.
    ///
    /// A DOF is numbered when some attached element uses it and it is not
    /// constrained. Does nothing if the topology is already numbered.
    pub fn number_dofs(&mut self) {
        if self.numbered {
            return;
        }

        for node in &mut self.nodes {
            node.signature = 0;
            node.dofs = [None; DOFS_PER_NODE];
            node.displacements.clear();
        }
        for element in &self.elements {
            let signature = element.signature();
            for node in element.nodes() {
                self.nodes[node.0].signature |= signature;
            }
        }

        let mut next = 0;
        for node in &mut self.nodes {
            for dof in Dof::ALL {
                if node.signature & dof.bit() != 0 && !node.is_constrained(dof) {
                    node.dofs[dof.index()] = Some(next);
                    next += 1;
                }
            }
        }
        self.n_dofs = next;

        let cases: BTreeSet<LoadCase> = self
            .nodes
            .iter()
            .flat_map(|n| n.loads.iter().map(|l| l.load_case.clone()))
            .collect();
        self.load_cases = cases.into_iter().collect();

        let mut dropped = 0;
        self.loads = vec![vec![0.0; self.n_dofs]; self.load_cases.len()];
        for node in &self.nodes {
            for load in &node.loads {
                let case = self.load_cases.partition_point(|c| c < &load.load_case);
                match node.dof(load.dof) {
                    Some(i) => self.loads[case][i] += load.magnitude,
                    None => dropped += 1,
                }
            }
        }
        self.displacements = vec![vec![0.0; self.n_dofs]; self.load_cases.len()];
        self.numbered = true;

        info!(
            "numbered {} DOFs on {} nodes, {} elements, {} load case(s)",
            self.n_dofs,
            self.nodes.len(),
            self.elements.len(),
            self.load_cases.len()
        );
        if dropped > 0 {
            debug!("{} load(s) act on constrained or unused DOFs", dropped);
        }
    }

    /// Rebuild the global stiffness matrix at the current densities.
    pub fn assemble(&mut self) -> Result<()> {
        if !self.numbered {
            return Err(Error::Assembly("assemble called before number_dofs".into()));
        }
        self.elements
            .par_iter_mut()
            .try_for_each(|e| e.derive_stiffness())?;

        let nnz_estimate: usize = self
            .elements
            .iter()
            .map(|e| e.kind().formulation().n_dofs().pow(2))
            .sum();
        let mut triplets = TripletMatrix::with_capacity(self.n_dofs, self.n_dofs, nnz_estimate);
        for element in &self.elements {
            let dofs = element_dofs(&self.nodes, element);
            triplets.add_element_matrix(&dofs, &element.stiffness()?);
        }
        let stiffness = triplets.to_csr()?;
        debug!("assembled {} x {} stiffness with {} nonzeros", self.n_dofs, self.n_dofs, stiffness.nnz());
        self.stiffness = Some(stiffness);
        self.solver = None;
        self.solved_with = None;
        Ok(())
    }

    /// [`FeaSystem::number_dofs`] followed by [`FeaSystem::assemble`].
    pub fn generate_global_system(&mut self) -> Result<()> {
        self.number_dofs();
        self.assemble()
    }

    /// Solve every load case and recompute element responses.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::Assembly`] before the system is assembled. Solver
    /// failures keep their variant and name the load case.
    pub fn solve(&mut self, kind: SolverKind) -> Result<()> {
        let stiffness = self
            .stiffness
            .as_ref()
            .ok_or_else(|| Error::Assembly("solve called before generate_global_system".into()))?;

        for element in &mut self.elements {
            element.clear_responses();
        }
        self.solver = None;
        self.solved_with = None;

        if self.n_dofs > 0 && !self.load_cases.is_empty() {
            let mut solver = create_solver(kind, &self.config);
            solver
                .compute(stiffness)
                .map_err(|e| for_load_case(&self.load_cases[0], e))?;
            for (case, (f, u)) in self
                .load_cases
                .iter()
                .zip(self.loads.iter().zip(self.displacements.iter_mut()))
            {
                *u = solver.solve(f).map_err(|e| for_load_case(case, e))?;
                info!("solved load case '{}' with {}", case, solver.name());
            }
            self.solver = Some(solver);
        } else {
            for u in &mut self.displacements {
                u.iter_mut().for_each(|v| *v = 0.0);
            }
        }
        self.solved_with = Some(kind);

        for node in &mut self.nodes {
            node.displacements.clear();
            for (case, u) in self.load_cases.iter().zip(&self.displacements) {
                let mut d = Vector6::zeros();
                for dof in Dof::ALL {
                    if let Some(i) = node.dofs[dof.index()] {
                        d[dof.index()] = u[i];
                    }
                }
                node.displacements.insert(case.clone(), d);
            }
        }

        let nodes = &self.nodes;
        let cases = &self.load_cases;
        let displacements = &self.displacements;
        self.elements.par_iter_mut().try_for_each(|element| {
            for (case, u) in cases.iter().zip(displacements) {
                let ue = gather(nodes, element, u);
                element.compute_response(case, &ue)?;
            }
            Ok::<(), Error>(())
        })?;
        Ok(())
    }

    /// Solve Kᵀ λ = r for each right-hand side with the stored factorization.
    ///
    /// # Errors
    ///
    /// [`Error::Solver`] if the last solve was iterative or no solve happened.
    pub fn solve_adjoint(&self, rhs: &[Vec<f64>]) -> Result<Vec<Vec<f64>>> {
        let kind = self
            .solved_with
            .ok_or_else(|| Error::Solver("adjoint solve requested before solve".into()))?;
        if !kind.is_direct() {
            return Err(Error::Solver(format!(
                "adjoint solve needs a direct factorization, last solve used {}",
                kind
            )));
        }
        if let Some(bad) = rhs.iter().find(|r| r.len() != self.n_dofs) {
            return Err(Error::InvalidArgument(format!(
                "adjoint right-hand side has {} entries, system has {} DOFs",
                bad.len(),
                self.n_dofs
            )));
        }
        match &self.solver {
            Some(solver) => rhs.iter().map(|r| solver.solve_adjoint(r)).collect(),
            // Nothing was factorized: no DOFs or no load cases.
            None if self.n_dofs == 0 => Ok(rhs.iter().map(|_| Vec::new()).collect()),
            None => {
                let stiffness = self
                    .stiffness
                    .as_ref()
                    .ok_or_else(|| Error::Assembly("system is not assembled".into()))?;
                let mut solver = create_solver(kind, &self.config);
                solver.compute(stiffness)?;
                rhs.iter().map(|r| solver.solve_adjoint(r)).collect()
            }
        }
    }

    /// Whether the assembled stiffness is singular or ill-conditioned.
    ///
    /// Uses the 2-norm condition number from a dense SVD against
    /// [`SolverConfig::singularity_threshold`].
    pub fn is_singular(&self) -> Result<bool> {
        let stiffness = self
            .stiffness
            .as_ref()
            .ok_or_else(|| Error::Assembly("system is not assembled".into()))?;
        if stiffness.nnz() == 0 {
            return Ok(true);
        }
        let singular_values = DMatrix::from(stiffness).svd(false, false).singular_values;
        let max = singular_values.max();
        let min = singular_values.min();
        let condition = max / min;
        debug!("stiffness condition number {:e}", condition);
        Ok(min <= 0.0 || !condition.is_finite() || condition > self.config.singularity_threshold)
    }

    /// External work `fᵀu` for `load_case`.
    pub fn compliance(&self, load_case: &LoadCase) -> Result<f64> {
        let i = self.case_index(load_case)?;
        Ok(dot(&self.loads[i], &self.displacements[i]))
    }

    /// Compliance summed over all load cases.
    pub fn total_compliance(&self) -> f64 {
        self.loads
            .iter()
            .zip(&self.displacements)
            .map(|(f, u)| dot(f, u))
            .sum()
    }

    /// Derivative of the total compliance with respect to each element
    /// density, from the last solve.
    pub fn compliance_sensitivities(&self) -> Vec<f64> {
        self.elements
            .par_iter()
            .map(|e| {
                self.load_cases
                    .iter()
                    .map(|case| e.compliance_sensitivity(case))
                    .sum::<f64>()
            })
            .collect()
    }

    /// Failure measure of `element` under `load_case` and its derivative with
    /// respect to every element density, by the adjoint method.
    pub fn stress_sensitivity(&self, load_case: &LoadCase, element: ElementId, alpha: f64) -> Result<StressSensitivity> {
        let case = self.case_index(load_case)?;
        let target = self.element(element)?;
        let u = &self.displacements[case];

        let dofs = element_dofs(&self.nodes, target);
        let (explicit, local_load) = target.failure_measure_terms(&gather(&self.nodes, target, u), alpha)?;
        let mut adjoint_load = vec![0.0; self.n_dofs];
        for (dof, value) in dofs.iter().zip(local_load.iter()) {
            if let Some(i) = dof {
                adjoint_load[*i] += value;
            }
        }
        let lambda = self
            .solve_adjoint(&[adjoint_load])?
            .pop()
            .unwrap_or_default();
        let lambda = if lambda.is_empty() { vec![0.0; self.n_dofs] } else { lambda };

        let gradient = self
            .elements
            .par_iter()
            .enumerate()
            .map(|(j, e)| -> Result<f64> {
                let unit = e
                    .unit_stiffness()
                    .ok_or_else(|| Error::Assembly("element stiffness has not been derived".into()))?;
                let uj = gather(&self.nodes, e, u);
                let lj = gather(&self.nodes, e, &lambda);
                let implicit = -e.stiffness_scale_derivative() * lj.dot(&(&unit.total * uj));
                Ok(if j == element.0 { implicit + explicit } else { implicit })
            })
            .collect::<Result<Vec<f64>>>()?;

        Ok(StressSensitivity {
            measure: target.stress_at_center(load_case).drucker_prager(alpha),
            gradient,
        })
    }

    fn case_index(&self, load_case: &LoadCase) -> Result<usize> {
        self.load_cases
            .binary_search(load_case)
            .map_err(|_| Error::InvalidArgument(format!("unknown load case '{}'", load_case)))
    }

    pub fn n_dofs(&self) -> usize {
        self.n_dofs
    }

    pub fn is_numbered(&self) -> bool {
        self.numbered
    }

    /// Discovered load cases in sorted order.
    pub fn load_cases(&self) -> &[LoadCase] {
        &self.load_cases
    }

    pub fn load_vector(&self, load_case: &LoadCase) -> Result<&[f64]> {
        Ok(&self.loads[self.case_index(load_case)?])
    }

    pub fn solution(&self, load_case: &LoadCase) -> Result<&[f64]> {
        Ok(&self.displacements[self.case_index(load_case)?])
    }

    pub fn stiffness(&self) -> Option<&CsrMatrix> {
        self.stiffness.as_ref()
    }

    /// Solver used by the last successful [`FeaSystem::solve`].
    pub fn solved_with(&self) -> Option<SolverKind> {
        self.solved_with
    }

    pub fn displacement(&self, node: NodeId, load_case: &LoadCase) -> Result<Vector6<f64>> {
        self.case_index(load_case)?;
        self.node(node)?
            .displacement(load_case)
            .copied()
            .ok_or_else(|| Error::Solver(format!("load case '{}' has not been solved", load_case)))
    }

    pub fn node(&self, id: NodeId) -> Result<&Node> {
        self.nodes
            .get(id.0)
            .ok_or_else(|| Error::InvalidArgument(format!("unknown node {}", id.0)))
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn element(&self, id: ElementId) -> Result<&Element> {
        self.elements
            .get(id.0)
            .ok_or_else(|| Error::InvalidArgument(format!("unknown element {}", id.0)))
    }

    pub fn element_mut(&mut self, id: ElementId) -> Result<&mut Element> {
        self.elements
            .get_mut(id.0)
            .ok_or_else(|| Error::InvalidArgument(format!("unknown element {}", id.0)))
    }

    pub fn elements(&self) -> &[Element] {
        &self.elements
    }

    /// Mutable elements for density updates. Call [`FeaSystem::assemble`]
    /// before the next solve.
    pub fn elements_mut(&mut self) -> &mut [Element] {
        self.stiffness = None;
        self.solver = None;
        self.solved_with = None;
        &mut self.elements
    }
}

/// Global equation numbers of the element DOFs in element order.
fn element_dofs(nodes: &[Node], element: &Element) -> Vec<Option<usize>> {
    let node_dofs = element.kind().formulation().node_dofs();
    element
        .nodes()
        .iter()
        .flat_map(|n| node_dofs.iter().map(move |&d| nodes[n.0].dof(d)))
        .collect()
}

/// Element slice of a global vector; constrained DOFs read as zero.
fn gather(nodes: &[Node], element: &Element, global: &[f64]) -> DVector<f64> {
    let dofs = element_dofs(nodes, element);
    DVector::from_iterator(dofs.len(), dofs.iter().map(|d| d.map_or(0.0, |i| global[i])))
}

fn for_load_case(case: &LoadCase, error: Error) -> Error {
    match error {
        Error::Solver(msg) => Error::Solver(format!("load case '{}': {}", case, msg)),
        Error::SingularMatrix(msg) => Error::SingularMatrix(format!("load case '{}': {}", case, msg)),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::element::{ElementKind, Truss};
    use crate::geometry::Constraint;
    use crate::material::Material;
    use approx::assert_relative_eq;

    const E: f64 = 1000.0;
    const AREA: f64 = 0.1;

    fn point(x: f64, constraints: &[Dof], loads: &[(&str, Dof, f64)]) -> Point {
        let mut p = Point::new(Point3::new(x, 0.0, 0.0));
        for &dof in constraints {
            p.add_constraint(Constraint::new(dof));
        }
        for &(case, dof, magnitude) in loads {
            p.loads.push(Load::new(case, magnitude, dof));
        }
        p
    }

    fn bar(system: &FeaSystem, a: NodeId, b: NodeId) -> Element {
        let kind = ElementKind::Truss(Truss::new(AREA, Material::uniaxial(E).unwrap()));
        let coords = vec![system.nodes()[a.0].position, system.nodes()[b.0].position];
        Element::new(kind, vec![a, b], coords, 1e-6).unwrap()
    }

    /// Fixed node at x = 0, bar to a node at x = 1 pulled along x.
    fn single_bar(loads: &[(&str, Dof, f64)]) -> FeaSystem {
        let mut system = FeaSystem::new(SolverConfig::default());
        let a = system.add_node(&point(0.0, &Dof::TRANSLATIONS, &[]));
        let b = system.add_node(&point(1.0, &[Dof::Uy, Dof::Uz], loads));
        let e = bar(&system, a, b);
        system.add_element(e).unwrap();
        system
    }

    #[test]
    fn test_add_node_deduplicates() {
        let mut system = FeaSystem::new(SolverConfig::default());
        let a = system.add_node(&point(0.0, &[], &[]));
        let b = system.add_node(&point(1e-9, &[Dof::Ux], &[]));
        assert_eq!(a, b);
        assert_eq!(system.nodes().len(), 1);
        assert!(system.nodes()[0].is_constrained(Dof::Ux));
    }

    #[test]
    fn test_numbering_skips_unused_and_constrained_dofs() {
        let mut system = single_bar(&[("wind", Dof::Ux, 10.0), ("wind", Dof::Rz, 5.0)]);
        system.number_dofs();
        assert_eq!(system.n_dofs(), 1);
        assert_eq!(system.nodes()[1].dof(Dof::Ux), Some(0));
        assert_eq!(system.nodes()[1].dof(Dof::Rz), None);
        assert_eq!(system.nodes()[1].signature(), 0b111);
        assert_eq!(system.load_vector(&"wind".into()).unwrap(), &[10.0]);

        system.number_dofs();
        assert_eq!(system.n_dofs(), 1);
    }

    #[test]
    fn test_load_cases_sorted() {
        let mut system = single_bar(&[("b", Dof::Ux, 1.0), ("a", Dof::Ux, 2.0)]);
        system.number_dofs();
        assert_eq!(system.load_cases(), &[LoadCase::new("a"), LoadCase::new("b")]);
    }

    #[test]
    fn test_solve_requires_assembly() {
        let mut system = single_bar(&[("a", Dof::Ux, 1.0)]);
        assert!(matches!(system.solve(SolverKind::FaerCholesky), Err(Error::Assembly(_))));
        assert!(matches!(system.assemble(), Err(Error::Assembly(_))));
    }

    #[test]
    fn test_single_bar_with_every_solver() {
        for kind in SolverKind::ALL {
            let mut system = single_bar(&[("a", Dof::Ux, 10.0)]);
            system.generate_global_system().unwrap();
            system.solve(kind).unwrap();

            // u = PL / EA
            let u = system.displacement(NodeId(1), &"a".into()).unwrap();
            assert_relative_eq!(u[0], 0.1, max_relative = 1e-8);
            assert_relative_eq!(system.compliance(&"a".into()).unwrap(), 1.0, max_relative = 1e-8);
            let energy = system.elements()[0].response(&"a".into()).unwrap().energy;
            assert_relative_eq!(energy.total, 0.5, max_relative = 1e-8);
            assert_eq!(system.solved_with(), Some(kind));
        }
    }

    #[test]
    fn test_adjoint_reuses_direct_factorization() {
        let mut system = single_bar(&[("a", Dof::Ux, 10.0)]);
        system.generate_global_system().unwrap();
        assert!(matches!(system.solve_adjoint(&[vec![1.0]]), Err(Error::Solver(_))));

        system.solve(SolverKind::Ldl).unwrap();
        let lambda = system.solve_adjoint(&[vec![10.0], vec![1.0]]).unwrap();
        assert_relative_eq!(lambda[0][0], 0.1, max_relative = 1e-12);
        assert_relative_eq!(lambda[1][0], 0.01, max_relative = 1e-12);
        assert!(matches!(system.solve_adjoint(&[vec![1.0, 2.0]]), Err(Error::InvalidArgument(_))));

        system.solve(SolverKind::BiCgStab).unwrap();
        assert!(matches!(system.solve_adjoint(&[vec![1.0]]), Err(Error::Solver(_))));
    }

    #[test]
    fn test_unrestrained_bar_is_singular() {
        let mut system = FeaSystem::new(SolverConfig::default());
        let a = system.add_node(&point(0.0, &[], &[]));
        let b = system.add_node(&point(1.0, &[], &[("gust", Dof::Ux, 1.0)]));
        let e = bar(&system, a, b);
        system.add_element(e).unwrap();
        system.generate_global_system().unwrap();
        assert!(system.is_singular().unwrap());

        let err = system.solve(SolverKind::Ldl).unwrap_err();
        assert!(matches!(err, Error::SingularMatrix(_)));
        assert!(err.to_string().contains("gust"));
    }

    #[test]
    fn test_restrained_bar_is_not_singular() {
        let mut system = single_bar(&[("a", Dof::Ux, 1.0)]);
        system.generate_global_system().unwrap();
        assert!(!system.is_singular().unwrap());
    }

    #[test]
    fn test_empty_system() {
        let mut system = FeaSystem::new(SolverConfig::default());
        system.add_node(&point(0.0, &[], &[("a", Dof::Ux, 1.0)]));
        system.generate_global_system().unwrap();
        assert_eq!(system.n_dofs(), 0);
        assert!(system.is_singular().unwrap());
        system.solve(SolverKind::FaerCholesky).unwrap();
        assert_eq!(system.total_compliance(), 0.0);
    }

    #[test]
    fn test_density_update_reassembles() {
        let mut system = single_bar(&[("a", Dof::Ux, 10.0)]);
        system.generate_global_system().unwrap();
        system.elements_mut()[0].set_density(0.5, 1.0);
        assert!(matches!(system.solve(SolverKind::FaerCholesky), Err(Error::Assembly(_))));
        system.generate_global_system().unwrap();
        system.solve(SolverKind::FaerCholesky).unwrap();
        let scale = system.elements()[0].stiffness_scale();
        let u = system.displacement(NodeId(1), &"a".into()).unwrap();
        assert_relative_eq!(u[0], 0.1 / scale, max_relative = 1e-8);
    }

    /// Two parallel bars between the same nodes share the load by stiffness,
    /// so the stress in the first depends on both densities.
    fn parallel_bars(rho: [f64; 2]) -> FeaSystem {
        let mut system = single_bar(&[("a", Dof::Ux, 10.0)]);
        let e = bar(&system, NodeId(0), NodeId(1));
        system.add_element(e).unwrap();
        for (element, &r) in system.elements_mut().iter_mut().zip(&rho) {
            element.set_density(r, 3.0);
        }
        system.generate_global_system().unwrap();
        system.solve(SolverKind::FaerCholesky).unwrap();
        system
    }

    #[test]
    fn test_stress_sensitivity_matches_finite_difference() {
        let rho = [0.6, 0.8];
        let alpha = 0.1;
        let case = LoadCase::new("a");
        let system = parallel_bars(rho);
        let sensitivity = system.stress_sensitivity(&case, ElementId(0), alpha).unwrap();

        let h = 1e-6;
        for j in 0..2 {
            let mut up = rho;
            up[j] += h;
            let mut down = rho;
            down[j] -= h;
            let measure = |r| {
                parallel_bars(r).elements()[0]
                    .stress_at_center(&case)
                    .drucker_prager(alpha)
            };
            let fd = (measure(up) - measure(down)) / (2.0 * h);
            assert_relative_eq!(sensitivity.gradient[j], fd, max_relative = 1e-5);
        }
    }

    #[test]
    fn test_compliance_sensitivities_negative() {
        let system = parallel_bars([0.5, 0.9]);
        let sensitivities = system.compliance_sensitivities();
        assert_eq!(sensitivities.len(), 2);
        assert!(sensitivities.iter().all(|s| *s < 0.0));
    }
}
