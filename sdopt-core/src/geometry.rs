//! Geometry and structure data model.
//!
//! Points live in a [`PointStore`] arena and are addressed by [`PointId`].
//! Insertion deduplicates coincident points through a hashed spatial grid, so
//! two geometries sharing a corner share the same point (and therefore the
//! same loads and constraints).
//!
//! A [`Geometry`] is a line segment, quadrilateral or hexahedron defined by
//! its corner points. It carries structure assignments, geometry-level loads
//! and constraints, and the mesh generated for it.

use crate::error::{Error, Result};
use crate::mesh::{ElementPointGroup, GeometryMesh};
use crate::structure::{Structure, StructureKind};
use crate::types::{Dof, LoadCase, Point3};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Handle of a point inside a [`PointStore`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PointId(pub usize);

/// Handle of a geometry inside an analysis model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GeometryId(pub usize);

/// A load acting on one degree of freedom in one load case.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Load {
    pub load_case: LoadCase,
    pub magnitude: f64,
    pub dof: Dof,
}

impl Load {
    pub fn new(load_case: impl Into<LoadCase>, magnitude: f64, dof: Dof) -> Self {
        Self {
            load_case: load_case.into(),
            magnitude,
            dof,
        }
    }

    /// Copy of this load with its magnitude multiplied by `factor`.
    pub fn scaled(&self, factor: f64) -> Self {
        Self {
            load_case: self.load_case.clone(),
            magnitude: self.magnitude * factor,
            dof: self.dof,
        }
    }
}

/// A degree of freedom held at zero displacement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Constraint {
    pub dof: Dof,
}

impl Constraint {
    pub fn new(dof: Dof) -> Self {
        Self { dof }
    }

    /// One constraint per DOF: a fully clamped point.
    pub fn fixed() -> Vec<Self> {
        Dof::ALL.iter().map(|&dof| Self { dof }).collect()
    }

    /// Translational constraints only: a pinned point.
    pub fn pinned() -> Vec<Self> {
        Dof::TRANSLATIONS.iter().map(|&dof| Self { dof }).collect()
    }
}

/// A located point carrying loads and constraints.
#[derive(Debug, Clone, PartialEq)]
pub struct Point {
    pub position: Point3,
    pub loads: Vec<Load>,
    pub constraints: Vec<Constraint>,
}

impl Point {
    pub fn new(position: Point3) -> Self {
        Self {
            position,
            loads: Vec::new(),
            constraints: Vec::new(),
        }
    }

    /// Bitmask of constrained DOFs.
    pub fn constraint_mask(&self) -> u8 {
        self.constraints.iter().fold(0, |mask, c| mask | c.dof.bit())
    }

    pub fn add_constraint(&mut self, constraint: Constraint) {
        if !self.constraints.contains(&constraint) {
            self.constraints.push(constraint);
        }
    }
}

/// Hashed uniform grid used to find coincident points in constant time.
///
/// The cell edge equals the tolerance, so every point within tolerance of a
/// query lies in one of the 27 cells around it.
#[derive(Debug, Clone)]
pub(crate) struct SpatialIndex {
    tolerance: f64,
    cells: HashMap<(i64, i64, i64), Vec<usize>>,
}

impl SpatialIndex {
    pub(crate) fn new(tolerance: f64) -> Self {
        Self {
            tolerance: tolerance.max(f64::EPSILON),
            cells: HashMap::new(),
        }
    }

    fn cell_of(&self, p: &Point3) -> (i64, i64, i64) {
        let c = |v: f64| (v / self.tolerance).floor() as i64;
        (c(p.x), c(p.y), c(p.z))
    }

    /// Index of the closest stored point within tolerance of `p`.
    pub(crate) fn find(&self, p: &Point3, position_of: impl Fn(usize) -> Point3) -> Option<usize> {
        let (cx, cy, cz) = self.cell_of(p);
        let mut best: Option<(usize, f64)> = None;
        for dx in -1..=1 {
            for dy in -1..=1 {
                for dz in -1..=1 {
                    let Some(bucket) = self.cells.get(&(cx + dx, cy + dy, cz + dz)) else {
                        continue;
                    };
                    for &idx in bucket {
                        let distance = (position_of(idx) - p).norm();
                        if distance <= self.tolerance
                            && best.map_or(true, |(_, d)| distance < d)
                        {
                            best = Some((idx, distance));
                        }
                    }
                }
            }
        }
        best.map(|(idx, _)| idx)
    }

    pub(crate) fn insert(&mut self, p: &Point3, idx: usize) {
        let key = self.cell_of(p);
        self.cells.entry(key).or_default().push(idx);
    }

    pub(crate) fn clear(&mut self) {
        self.cells.clear();
    }
}

/// Arena of deduplicated points.
#[derive(Debug, Clone)]
pub struct PointStore {
    points: Vec<Point>,
    index: SpatialIndex,
    tolerance: f64,
}

impl PointStore {
    pub fn new(tolerance: f64) -> Self {
        Self {
            points: Vec::new(),
            index: SpatialIndex::new(tolerance),
            tolerance,
        }
    }

    pub fn tolerance(&self) -> f64 {
        self.tolerance
    }

    /// Insert a point, reusing a coincident one if present.
    ///
    /// Returns the handle and whether a new point was created.
    pub fn insert(&mut self, position: Point3) -> (PointId, bool) {
        if let Some(existing) = self.find(&position) {
            return (existing, false);
        }
        let idx = self.points.len();
        self.index.insert(&position, idx);
        self.points.push(Point::new(position));
        (PointId(idx), true)
    }

    /// Handle of a point coincident with `position`, if any.
    pub fn find(&self, position: &Point3) -> Option<PointId> {
        self.index
            .find(position, |idx| self.points[idx].position)
            .map(PointId)
    }

    pub fn get(&self, id: PointId) -> Option<&Point> {
        self.points.get(id.0)
    }

    pub fn get_mut(&mut self, id: PointId) -> Option<&mut Point> {
        self.points.get_mut(id.0)
    }

    /// Point by handle, failing with a descriptive error on a stale handle.
    pub fn point(&self, id: PointId) -> Result<&Point> {
        self.get(id)
            .ok_or_else(|| Error::InvalidArgument(format!("unknown point handle {}", id.0)))
    }

    pub fn point_mut(&mut self, id: PointId) -> Result<&mut Point> {
        self.points
            .get_mut(id.0)
            .ok_or_else(|| Error::InvalidArgument(format!("unknown point handle {}", id.0)))
    }

    pub fn position(&self, id: PointId) -> Result<Point3> {
        self.point(id).map(|p| p.position)
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (PointId, &Point)> {
        self.points.iter().enumerate().map(|(i, p)| (PointId(i), p))
    }

    pub fn clear(&mut self) {
        self.points.clear();
        self.index.clear();
    }
}

/// The three shapes a geometry can take.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GeometryKind {
    LineSegment,
    Quadrilateral,
    QuadHexahedron,
}

impl GeometryKind {
    /// Number of defining corner points.
    pub fn n_points(self) -> usize {
        match self {
            GeometryKind::LineSegment => 2,
            GeometryKind::Quadrilateral => 4,
            GeometryKind::QuadHexahedron => 8,
        }
    }

    /// Whether a structure of `kind` can be generated on this geometry.
    pub fn accepts(self, kind: &StructureKind) -> bool {
        match (self, kind) {
            (_, StructureKind::None) => true,
            (GeometryKind::LineSegment, StructureKind::Truss { .. })
            | (GeometryKind::LineSegment, StructureKind::Beam { .. }) => true,
            (GeometryKind::Quadrilateral, StructureKind::FlatShell { .. })
            | (GeometryKind::Quadrilateral, StructureKind::Truss { .. })
            | (GeometryKind::Quadrilateral, StructureKind::Beam { .. }) => true,
            (GeometryKind::QuadHexahedron, StructureKind::QuadHexahedron { .. }) => true,
            _ => false,
        }
    }
}

/// Corner coordinates of a geometry handed in by the geometry collaborator.
///
/// Quadrilateral corners run counter-clockwise. Hexahedron corners list the
/// bottom face counter-clockwise, then the top face in the same order.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum GeometryShape {
    LineSegment([Point3; 2]),
    Quadrilateral([Point3; 4]),
    QuadHexahedron([Point3; 8]),
}

impl GeometryShape {
    pub fn kind(&self) -> GeometryKind {
        match self {
            GeometryShape::LineSegment(_) => GeometryKind::LineSegment,
            GeometryShape::Quadrilateral(_) => GeometryKind::Quadrilateral,
            GeometryShape::QuadHexahedron(_) => GeometryKind::QuadHexahedron,
        }
    }

    pub fn corners(&self) -> &[Point3] {
        match self {
            GeometryShape::LineSegment(p) => p,
            GeometryShape::Quadrilateral(p) => p,
            GeometryShape::QuadHexahedron(p) => p,
        }
    }

    /// Axis-aligned box spanned by two opposite corners.
    pub fn cuboid(min: Point3, max: Point3) -> Self {
        let (a, b) = (min.inf(&max), min.sup(&max));
        GeometryShape::QuadHexahedron([
            Point3::new(a.x, a.y, a.z),
            Point3::new(b.x, a.y, a.z),
            Point3::new(b.x, b.y, a.z),
            Point3::new(a.x, b.y, a.z),
            Point3::new(a.x, a.y, b.z),
            Point3::new(b.x, a.y, b.z),
            Point3::new(b.x, b.y, b.z),
            Point3::new(a.x, b.y, b.z),
        ])
    }
}

/// A structural geometry with its assignments and generated mesh.
#[derive(Debug, Clone)]
pub struct Geometry {
    kind: GeometryKind,
    points: Vec<PointId>,
    structures: Vec<Structure>,
    loads: Vec<Load>,
    constraints: Vec<Constraint>,
    mesh: GeometryMesh,
}

impl Geometry {
    pub(crate) fn new(kind: GeometryKind, points: Vec<PointId>) -> Result<Self> {
        if points.len() != kind.n_points() {
            return Err(Error::Mesh(format!(
                "{:?} requires {} points, got {}",
                kind,
                kind.n_points(),
                points.len()
            )));
        }
        let mut distinct = points.clone();
        distinct.sort();
        distinct.dedup();
        if distinct.len() != points.len() {
            return Err(Error::InvalidArgument(format!(
                "{:?} has coincident corner points",
                kind
            )));
        }
        Ok(Self {
            kind,
            points,
            structures: Vec::new(),
            loads: Vec::new(),
            constraints: Vec::new(),
            mesh: GeometryMesh::default(),
        })
    }

    pub fn kind(&self) -> GeometryKind {
        self.kind
    }

    /// Defining corner points in order.
    pub fn points(&self) -> &[PointId] {
        &self.points
    }

    pub fn structures(&self) -> &[Structure] {
        &self.structures
    }

    pub fn loads(&self) -> &[Load] {
        &self.loads
    }

    pub fn constraints(&self) -> &[Constraint] {
        &self.constraints
    }

    /// Whether `points` describe the same corner set as this geometry.
    pub fn same_entity(&self, kind: GeometryKind, points: &[PointId]) -> bool {
        if kind != self.kind || points.len() != self.points.len() {
            return false;
        }
        let mut a = self.points.clone();
        let mut b = points.to_vec();
        a.sort();
        b.sort();
        a == b
    }

    pub(crate) fn add_structure(&mut self, structure: Structure) -> Result<()> {
        if !self.kind.accepts(&structure.kind) {
            return Err(Error::InvalidArgument(format!(
                "cannot assign a {} structure to a {:?}",
                structure.kind.name(),
                self.kind
            )));
        }
        self.structures.push(structure);
        Ok(())
    }

    pub(crate) fn add_load(&mut self, load: Load) {
        self.loads.push(load);
    }

    pub(crate) fn add_constraint(&mut self, constraint: Constraint) {
        if !self.constraints.contains(&constraint) {
            self.constraints.push(constraint);
        }
    }

    /// Mesh points generated for this geometry, in lattice order.
    pub fn meshed_points(&self) -> &[PointId] {
        &self.mesh.points
    }

    /// Element-defining point tuples generated for this geometry.
    pub fn element_groups(&self) -> &[ElementPointGroup] {
        &self.mesh.groups
    }

    pub fn mesh(&self) -> &GeometryMesh {
        &self.mesh
    }

    pub(crate) fn set_mesh(&mut self, mesh: GeometryMesh) {
        self.mesh = mesh;
    }

    pub fn clear_mesh(&mut self) {
        self.mesh = GeometryMesh::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_point_store_deduplicates_within_tolerance() {
        let mut store = PointStore::new(1e-6);
        let (a, created_a) = store.insert(Point3::new(1.0, 2.0, 3.0));
        let (b, created_b) = store.insert(Point3::new(1.0 + 4e-7, 2.0, 3.0 - 4e-7));
        let (c, created_c) = store.insert(Point3::new(1.0 + 1e-3, 2.0, 3.0));
        assert!(created_a && !created_b && created_c);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_point_store_finds_across_cell_boundaries() {
        let mut store = PointStore::new(1e-3);
        let (a, _) = store.insert(Point3::new(0.0, 0.0, 0.0));
        // Just across a cell boundary, still within tolerance.
        assert_eq!(store.find(&Point3::new(-5e-4, -5e-4, 0.0)), Some(a));
        assert_eq!(store.find(&Point3::new(2e-3, 0.0, 0.0)), None);
    }

    #[test]
    fn test_geometry_rejects_incompatible_structure() {
        let mut hex = Geometry::new(
            GeometryKind::QuadHexahedron,
            (0..8).map(PointId).collect(),
        )
        .unwrap();
        let beam = Structure::beam(0.1, 0.2, 1.0, 0.3).unwrap();
        assert!(matches!(
            hex.add_structure(beam),
            Err(Error::InvalidArgument(_))
        ));
        assert!(hex.structures().is_empty());
        hex.add_structure(Structure::quad_hexahedron(1.0, 0.3).unwrap())
            .unwrap();
        assert_eq!(hex.structures().len(), 1);
    }

    #[test]
    fn test_same_entity_ignores_point_order() {
        let quad = Geometry::new(
            GeometryKind::Quadrilateral,
            vec![PointId(0), PointId(1), PointId(2), PointId(3)],
        )
        .unwrap();
        assert!(quad.same_entity(
            GeometryKind::Quadrilateral,
            &[PointId(2), PointId(3), PointId(0), PointId(1)]
        ));
        assert!(!quad.same_entity(
            GeometryKind::Quadrilateral,
            &[PointId(2), PointId(3), PointId(0), PointId(4)]
        ));
    }

    #[test]
    fn test_constraint_presets() {
        let mut point = Point::new(Point3::zeros());
        for c in Constraint::pinned() {
            point.add_constraint(c);
        }
        point.add_constraint(Constraint::new(Dof::Ux));
        assert_eq!(point.constraints.len(), 3);
        assert_eq!(point.constraint_mask(), 0b111);
    }
}
