//! Element library.
//!
//! Each element kind implements [`Formulation`], which derives stiffness at the
//! solid modulus `E0`. The [`Element`] wrapper owns one formulation plus the
//! design state used by topology optimization (density and penalty) and
//! scales the unit stiffness by the SIMP ratio `E / E0`.
//!
//! # Submodules
//!
//! - [`gauss`] - Gauss quadrature rules for numerical integration
//! - [`truss`], [`beam`], [`flat_shell`], [`hex8`] - element kinds

use crate::error::{Error, Result};
use crate::geometry::GeometryId;
use crate::material::Simp;
use crate::types::{Dof, LoadCase, Point3, StressTensor};
use nalgebra::{DMatrix, DVector, Matrix3, Vector6};
use std::collections::BTreeMap;

pub mod beam;
pub mod flat_shell;
pub mod gauss;
pub mod hex8;
pub mod truss;

pub use beam::Beam;
pub use flat_shell::FlatShell;
pub use gauss::{gauss_1d, gauss_hex, gauss_quad, GaussPoint};
pub use hex8::Hexahedron;
pub use truss::Truss;

/// Handle of a node inside an [`crate::assembly::FeaSystem`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub usize);

/// Handle of an element inside an [`crate::assembly::FeaSystem`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ElementId(pub usize);

/// Element stiffness in global axes, split by deformation mode.
///
/// `total` is the matrix assembled into the global system. It equals the sum
/// of the parts plus any stabilization term that carries no physical energy.
#[derive(Debug, Clone, PartialEq)]
pub struct LocalStiffness {
    pub total: DMatrix<f64>,
    pub axial: DMatrix<f64>,
    pub shear: DMatrix<f64>,
    pub bending: DMatrix<f64>,
}

impl LocalStiffness {
    /// Stiffness with a single deformation mode.
    pub fn axial_only(k: DMatrix<f64>) -> Self {
        let zeros = DMatrix::zeros(k.nrows(), k.ncols());
        Self {
            total: k.clone(),
            axial: k,
            shear: zeros.clone(),
            bending: zeros,
        }
    }

    fn energies(&self, u: &DVector<f64>) -> EnergyBreakdown {
        let quad = |k: &DMatrix<f64>| 0.5 * u.dot(&(k * u));
        EnergyBreakdown {
            total: quad(&self.total),
            axial: quad(&self.axial),
            shear: quad(&self.shear),
            bending: quad(&self.bending),
        }
    }
}

/// Strain energy by deformation mode.
///
/// For flat shells `axial` holds membrane normal energy and `shear` membrane
/// shear energy. For beams `shear` holds torsion.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct EnergyBreakdown {
    pub total: f64,
    pub axial: f64,
    pub shear: f64,
    pub bending: f64,
}

impl EnergyBreakdown {
    pub fn scaled(self, factor: f64) -> Self {
        Self {
            total: self.total * factor,
            axial: self.axial * factor,
            shear: self.shear * factor,
            bending: self.bending * factor,
        }
    }
}

impl std::ops::AddAssign for EnergyBreakdown {
    fn add_assign(&mut self, rhs: Self) {
        self.total += rhs.total;
        self.axial += rhs.axial;
        self.shear += rhs.shear;
        self.bending += rhs.bending;
    }
}

/// Post-processed state of an element under one load case.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ElementResponse {
    pub energy: EnergyBreakdown,
    /// Stress at the element center.
    pub stress: StressTensor,
}

/// Finite element formulation at the solid modulus.
///
/// Element DOF vectors list the [`Formulation::node_dofs`] of node 0, then
/// node 1, and so on, all in global axes.
/// Reject a coordinate slice that does not hold one point per node.
pub(crate) fn check_node_count(name: &str, expected: usize, coords: &[Point3]) -> Result<()> {
    if coords.len() != expected {
        return Err(Error::Element(format!(
            "{} requires {} node coordinates, got {}",
            name,
            expected,
            coords.len()
        )));
    }
    Ok(())
}

pub trait Formulation: Send + Sync {
    fn n_nodes(&self) -> usize;

    /// DOFs this formulation uses at each node.
    fn node_dofs(&self) -> &'static [Dof];

    fn n_dofs(&self) -> usize {
        self.n_nodes() * self.node_dofs().len()
    }

    /// Stiffness at `E0`, split by deformation mode.
    fn stiffness(&self, coords: &[Point3]) -> Result<LocalStiffness>;

    /// Structural volume (length × area, area × thickness, or solid volume).
    fn volume(&self, coords: &[Point3]) -> Result<f64>;

    /// 6 × n_dofs map from element displacements to Voigt stress at the
    /// element center, at `E0`.
    fn stress_operator(&self, coords: &[Point3]) -> Result<DMatrix<f64>>;

    /// Energies and center stress for element displacements `u`, at `E0`.
    fn response(
        &self,
        coords: &[Point3],
        stiffness: &LocalStiffness,
        u: &DVector<f64>,
    ) -> Result<ElementResponse> {
        let stress = self.stress_operator(coords)? * u;
        Ok(ElementResponse {
            energy: stiffness.energies(u),
            stress: StressTensor(Vector6::from_iterator(stress.iter().copied())),
        })
    }
}

/// Closed set of element kinds.
#[derive(Debug, Clone, PartialEq)]
pub enum ElementKind {
    Truss(Truss),
    Beam(Beam),
    FlatShell(FlatShell),
    Hexahedron(Hexahedron),
}

impl ElementKind {
    pub fn formulation(&self) -> &dyn Formulation {
        match self {
            ElementKind::Truss(e) => e,
            ElementKind::Beam(e) => e,
            ElementKind::FlatShell(e) => e,
            ElementKind::Hexahedron(e) => e,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ElementKind::Truss(_) => "truss",
            ElementKind::Beam(_) => "beam",
            ElementKind::FlatShell(_) => "flat_shell",
            ElementKind::Hexahedron(_) => "hexahedron",
        }
    }

    /// Solid modulus of the element material.
    pub fn youngs_modulus(&self) -> f64 {
        match self {
            ElementKind::Truss(e) => e.material.youngs_modulus,
            ElementKind::Beam(e) => e.material.youngs_modulus,
            ElementKind::FlatShell(e) => e.material.youngs_modulus,
            ElementKind::Hexahedron(e) => e.material.youngs_modulus,
        }
    }

    pub fn is_flat_shell(&self) -> bool {
        matches!(self, ElementKind::FlatShell(_))
    }
}

/// Model entity an element was generated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ElementOrigin {
    pub geometry: GeometryId,
    /// Index into the geometry's structure list.
    pub structure: usize,
}

/// Flags copied from the generating structure.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ElementFlags {
    pub ghost: bool,
    pub visible: bool,
    pub load_panel: bool,
}

/// An element in an FEA system: formulation, connectivity and design state.
#[derive(Debug, Clone)]
pub struct Element {
    kind: ElementKind,
    nodes: Vec<NodeId>,
    coords: Vec<Point3>,
    simp: Simp,
    density: f64,
    penalty: f64,
    flags: ElementFlags,
    origin: Option<ElementOrigin>,
    volume: f64,
    unit_stiffness: Option<LocalStiffness>,
    responses: BTreeMap<LoadCase, ElementResponse>,
}

impl Element {
    /// Create an element at full density.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Element`] if the node and coordinate counts do not
    /// match the kind, or the geometry is degenerate.
    pub fn new(
        kind: ElementKind,
        nodes: Vec<NodeId>,
        coords: Vec<Point3>,
        relative_lower_bound: f64,
    ) -> Result<Self> {
        let formulation = kind.formulation();
        if nodes.len() != formulation.n_nodes() || coords.len() != formulation.n_nodes() {
            return Err(Error::Element(format!(
                "{} requires {} nodes, got {} nodes and {} coordinates",
                kind.name(),
                formulation.n_nodes(),
                nodes.len(),
                coords.len()
            )));
        }
        let volume = formulation.volume(&coords)?;
        let simp = Simp::new(kind.youngs_modulus(), relative_lower_bound);
        Ok(Self {
            kind,
            nodes,
            coords,
            simp,
            density: 1.0,
            penalty: 1.0,
            flags: ElementFlags {
                ghost: false,
                visible: true,
                load_panel: false,
            },
            origin: None,
            volume,
            unit_stiffness: None,
            responses: BTreeMap::new(),
        })
    }

    pub fn with_flags(mut self, flags: ElementFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn with_origin(mut self, origin: ElementOrigin) -> Self {
        self.origin = Some(origin);
        self
    }

    pub fn kind(&self) -> &ElementKind {
        &self.kind
    }

    pub fn nodes(&self) -> &[NodeId] {
        &self.nodes
    }

    pub fn coords(&self) -> &[Point3] {
        &self.coords
    }

    pub fn flags(&self) -> ElementFlags {
        self.flags
    }

    pub fn is_ghost(&self) -> bool {
        self.flags.ghost || self.flags.load_panel
    }

    pub fn origin(&self) -> Option<ElementOrigin> {
        self.origin
    }

    pub fn volume(&self) -> f64 {
        self.volume
    }

    pub fn density(&self) -> f64 {
        self.density
    }

    pub fn penalty(&self) -> f64 {
        self.penalty
    }

    pub fn simp(&self) -> Simp {
        self.simp
    }

    /// Set density (clamped to (0, 1]) and penalty.
    pub fn set_density(&mut self, density: f64, penalty: f64) {
        self.density = Simp::clamp_density(density);
        self.penalty = penalty;
    }

    /// Penalized modulus at the current density.
    pub fn modulus(&self) -> f64 {
        self.simp.modulus(self.density, self.penalty)
    }

    /// Ratio `E / E0` applied to the unit stiffness.
    pub fn stiffness_scale(&self) -> f64 {
        self.modulus() / self.simp.e0
    }

    /// Derivative of [`Element::stiffness_scale`] with respect to density.
    pub fn stiffness_scale_derivative(&self) -> f64 {
        self.simp.modulus_derivative(self.density, self.penalty) / self.simp.e0
    }

    /// DOF bitmask this element contributes to each of its nodes.
    pub fn signature(&self) -> u8 {
        self.kind
            .formulation()
            .node_dofs()
            .iter()
            .fold(0, |mask, dof| mask | dof.bit())
    }

    /// Derive the unit stiffness if it is not cached yet.
    pub fn derive_stiffness(&mut self) -> Result<()> {
        if self.unit_stiffness.is_none() {
            self.unit_stiffness = Some(self.kind.formulation().stiffness(&self.coords)?);
        }
        Ok(())
    }

    pub fn unit_stiffness(&self) -> Option<&LocalStiffness> {
        self.unit_stiffness.as_ref()
    }

    /// Stiffness at the current density.
    pub fn stiffness(&self) -> Result<DMatrix<f64>> {
        Ok(self.derived()?.total.clone() * self.stiffness_scale())
    }

    fn derived(&self) -> Result<&LocalStiffness> {
        self.unit_stiffness.as_ref().ok_or_else(|| {
            Error::Assembly(format!("{} stiffness has not been derived", self.kind.name()))
        })
    }

    /// Compute the response to element displacements `u` for `load_case`.
    pub fn compute_response(&mut self, load_case: &LoadCase, u: &DVector<f64>) -> Result<()> {
        let scale = self.stiffness_scale();
        let unit = self
            .kind
            .formulation()
            .response(&self.coords, self.derived()?, u)?;
        self.responses.insert(
            load_case.clone(),
            ElementResponse {
                energy: unit.energy.scaled(scale),
                stress: StressTensor(unit.stress.0 * scale),
            },
        );
        Ok(())
    }

    pub fn response(&self, load_case: &LoadCase) -> Option<&ElementResponse> {
        self.responses.get(load_case)
    }

    pub fn responses(&self) -> &BTreeMap<LoadCase, ElementResponse> {
        &self.responses
    }

    pub fn clear_responses(&mut self) {
        self.responses.clear();
    }

    /// Sum of energies over all load cases.
    pub fn total_energy(&self) -> EnergyBreakdown {
        let mut sum = EnergyBreakdown::default();
        for response in self.responses.values() {
            sum += response.energy;
        }
        sum
    }

    /// Stress at center for `load_case`, zero if not analyzed.
    pub fn stress_at_center(&self, load_case: &LoadCase) -> StressTensor {
        self.responses
            .get(load_case)
            .map(|r| r.stress)
            .unwrap_or_default()
    }

    /// Stress operator at the current density.
    pub fn stress_operator(&self) -> Result<DMatrix<f64>> {
        Ok(self.kind.formulation().stress_operator(&self.coords)? * self.stiffness_scale())
    }

    /// Compliance sensitivity `dC/dρ = −(dE/dρ / E) uᵀ K u` for `load_case`.
    pub fn compliance_sensitivity(&self, load_case: &LoadCase) -> f64 {
        let energy = self
            .responses
            .get(load_case)
            .map_or(0.0, |r| r.energy.total);
        -2.0 * energy * self.stiffness_scale_derivative() / self.stiffness_scale()
    }

    /// Explicit density derivative of the failure measure and its gradient
    /// with respect to the element displacements.
    pub fn failure_measure_terms(&self, u: &DVector<f64>, alpha: f64) -> Result<(f64, DVector<f64>)> {
        let operator = self.kind.formulation().stress_operator(&self.coords)?;
        let unit_stress = &operator * u;
        let stress = StressTensor(Vector6::from_iterator(
            unit_stress.iter().map(|s| s * self.stiffness_scale()),
        ));
        let gradient = DVector::from_iterator(6, stress.drucker_prager_gradient(alpha).iter().copied());
        let explicit = gradient.dot(&unit_stress) * self.stiffness_scale_derivative();
        let adjoint_load = operator.transpose() * gradient * self.stiffness_scale();
        Ok((explicit, adjoint_load))
    }
}

/// Rotation matrix with rows `e1`, `e2`, `e3` (local axes in global terms).
pub(crate) fn rotation(e1: &Point3, e2: &Point3, e3: &Point3) -> Matrix3<f64> {
    Matrix3::from_rows(&[e1.transpose(), e2.transpose(), e3.transpose()])
}

/// Block-diagonal transformation with `blocks` copies of `r`.
pub(crate) fn block_transform(r: &Matrix3<f64>, blocks: usize) -> DMatrix<f64> {
    let mut t = DMatrix::zeros(3 * blocks, 3 * blocks);
    for b in 0..blocks {
        t.view_mut((3 * b, 3 * b), (3, 3)).copy_from(r);
    }
    t
}

/// `Tᵀ K T`.
pub(crate) fn to_global(k: &DMatrix<f64>, t: &DMatrix<f64>) -> DMatrix<f64> {
    t.transpose() * k * t
}
