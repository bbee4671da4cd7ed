//! Structured meshing of geometries.
//!
//! Every geometry is discretized into a regular lattice of mesh points by
//! linear, bilinear or trilinear interpolation of its corners. Mesh points go
//! into a shared [`PointStore`], so coincident points of neighbouring
//! geometries become one point and the resulting elements are connected.
//!
//! Geometry-level loads are lumped onto the lattice points in proportion to the
//! share of the geometry each point represents: for every element corner the
//! region bounded by the corner, the midpoints of its incident edges, the
//! centers of its incident faces and the element center.

use crate::element::gauss::gauss_1d;
use crate::error::{Error, Result};
use crate::geometry::{Geometry, GeometryKind, PointId, PointStore};
use crate::structure::StructureKind;
use crate::types::Point3;
use log::debug;
use nalgebra::Matrix3;
use serde::{Deserialize, Serialize};

/// Natural coordinates of a bilinear cell corner, counter-clockwise.
const QUAD_XI: [f64; 4] = [-1.0, 1.0, 1.0, -1.0];
const QUAD_ETA: [f64; 4] = [-1.0, -1.0, 1.0, 1.0];

/// Natural coordinates of a trilinear cell corner, bottom face then top face.
const HEX_XI: [f64; 8] = [-1.0, 1.0, 1.0, -1.0, -1.0, 1.0, 1.0, -1.0];
const HEX_ETA: [f64; 8] = [-1.0, -1.0, 1.0, 1.0, -1.0, -1.0, 1.0, 1.0];
const HEX_ZETA: [f64; 8] = [-1.0, -1.0, -1.0, -1.0, 1.0, 1.0, 1.0, 1.0];

/// Number of lattice cells along each parametric axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Subdivision {
    /// The same count along every axis.
    Uniform(usize),
    /// Explicit counts; lower-dimensional geometries use the leading ones.
    PerAxis { nx: usize, ny: usize, nz: usize },
}

impl Subdivision {
    /// Cell counts along the three parametric axes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if any count is zero.
    pub fn counts(self) -> Result<[usize; 3]> {
        let counts = match self {
            Subdivision::Uniform(n) => [n, n, n],
            Subdivision::PerAxis { nx, ny, nz } => [nx, ny, nz],
        };
        if counts.contains(&0) {
            return Err(Error::InvalidArgument(format!(
                "mesh subdivision must be positive, got {:?}",
                self
            )));
        }
        Ok(counts)
    }
}

impl Default for Subdivision {
    fn default() -> Self {
        Subdivision::Uniform(1)
    }
}

/// Points of one element, tied to the structure that generated it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElementPointGroup {
    /// Index into the geometry's structure list.
    pub structure: usize,
    pub points: Vec<PointId>,
}

/// Mesh generated for a single geometry.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GeometryMesh {
    /// Lattice points in row-major order (x fastest).
    pub points: Vec<PointId>,
    pub groups: Vec<ElementPointGroup>,
}

impl GeometryMesh {
    pub fn is_empty(&self) -> bool {
        self.points.is_empty() && self.groups.is_empty()
    }
}

/// Switches that alter which structures produce elements.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MeshOptions {
    /// Leave out ghost and load-panel structures.
    pub skip_ghost: bool,
}

/// Regular lattice over one geometry.
struct Lattice {
    kind: GeometryKind,
    counts: [usize; 3],
    ids: Vec<PointId>,
    positions: Vec<Point3>,
}

impl Lattice {
    fn index(&self, i: usize, j: usize, k: usize) -> usize {
        let [nx, ny, _] = self.counts;
        i + (nx + 1) * (j + (ny + 1) * k)
    }

    /// Lattice indices of every cell, corners ordered like the geometry.
    fn cells(&self) -> Vec<Vec<usize>> {
        let [nx, ny, nz] = self.counts;
        let mut cells = Vec::new();
        match self.kind {
            GeometryKind::LineSegment => {
                for i in 0..nx {
                    cells.push(vec![i, i + 1]);
                }
            }
            GeometryKind::Quadrilateral => {
                for j in 0..ny {
                    for i in 0..nx {
                        cells.push(vec![
                            self.index(i, j, 0),
                            self.index(i + 1, j, 0),
                            self.index(i + 1, j + 1, 0),
                            self.index(i, j + 1, 0),
                        ]);
                    }
                }
            }
            GeometryKind::QuadHexahedron => {
                for k in 0..nz {
                    for j in 0..ny {
                        for i in 0..nx {
                            cells.push(vec![
                                self.index(i, j, k),
                                self.index(i + 1, j, k),
                                self.index(i + 1, j + 1, k),
                                self.index(i, j + 1, k),
                                self.index(i, j, k + 1),
                                self.index(i + 1, j, k + 1),
                                self.index(i + 1, j + 1, k + 1),
                                self.index(i, j + 1, k + 1),
                            ]);
                        }
                    }
                }
            }
        }
        cells
    }

    /// Every lattice edge of a quadrilateral exactly once.
    fn quad_edges(&self) -> Vec<[usize; 2]> {
        let [nx, ny, _] = self.counts;
        let mut edges = Vec::with_capacity(nx * (ny + 1) + ny * (nx + 1));
        for j in 0..=ny {
            for i in 0..nx {
                edges.push([self.index(i, j, 0), self.index(i + 1, j, 0)]);
            }
        }
        for i in 0..=nx {
            for j in 0..ny {
                edges.push([self.index(i, j, 0), self.index(i, j + 1, 0)]);
            }
        }
        edges
    }
}

/// Position at parametric coordinates `(u, v, w)` in `[0, 1]³`.
fn interpolate(kind: GeometryKind, corners: &[Point3], u: f64, v: f64, w: f64) -> Point3 {
    match kind {
        GeometryKind::LineSegment => corners[0] * (1.0 - u) + corners[1] * u,
        GeometryKind::Quadrilateral => {
            corners[0] * ((1.0 - u) * (1.0 - v))
                + corners[1] * (u * (1.0 - v))
                + corners[2] * (u * v)
                + corners[3] * ((1.0 - u) * v)
        }
        GeometryKind::QuadHexahedron => {
            let bottom = interpolate(GeometryKind::Quadrilateral, &corners[..4], u, v, 0.0);
            let top = interpolate(GeometryKind::Quadrilateral, &corners[4..], u, v, 0.0);
            bottom * (1.0 - w) + top * w
        }
    }
}

/// Measure of the partition region of each corner of a lattice cell.
///
/// The regions are the images of the parametric quadrants (octants) adjacent
/// to each corner, integrated with a 2-point Gauss rule per axis.
pub(crate) fn corner_measures(kind: GeometryKind, cell: &[Point3]) -> Vec<f64> {
    let rule = gauss_1d(2);
    match kind {
        GeometryKind::LineSegment => {
            let half = 0.5 * (cell[1] - cell[0]).norm();
            vec![half, half]
        }
        GeometryKind::Quadrilateral => (0..4)
            .map(|corner| {
                let mut area = 0.0;
                for &(gu, wu) in &rule {
                    for &(gv, wv) in &rule {
                        let xi = 0.5 * QUAD_XI[corner] + 0.5 * gu;
                        let eta = 0.5 * QUAD_ETA[corner] + 0.5 * gv;
                        let mut d_xi = Point3::zeros();
                        let mut d_eta = Point3::zeros();
                        for a in 0..4 {
                            d_xi += cell[a] * (0.25 * QUAD_XI[a] * (1.0 + QUAD_ETA[a] * eta));
                            d_eta += cell[a] * (0.25 * QUAD_ETA[a] * (1.0 + QUAD_XI[a] * xi));
                        }
                        area += d_xi.cross(&d_eta).norm() * wu * wv * 0.25;
                    }
                }
                area
            })
            .collect(),
        GeometryKind::QuadHexahedron => (0..8)
            .map(|corner| {
                let mut volume = 0.0;
                for &(gu, wu) in &rule {
                    for &(gv, wv) in &rule {
                        for &(gw, ww) in &rule {
                            let xi = 0.5 * HEX_XI[corner] + 0.5 * gu;
                            let eta = 0.5 * HEX_ETA[corner] + 0.5 * gv;
                            let zeta = 0.5 * HEX_ZETA[corner] + 0.5 * gw;
                            let mut j = Matrix3::<f64>::zeros();
                            for a in 0..8 {
                                let dn = [
                                    0.125 * HEX_XI[a] * (1.0 + HEX_ETA[a] * eta) * (1.0 + HEX_ZETA[a] * zeta),
                                    0.125 * (1.0 + HEX_XI[a] * xi) * HEX_ETA[a] * (1.0 + HEX_ZETA[a] * zeta),
                                    0.125 * (1.0 + HEX_XI[a] * xi) * (1.0 + HEX_ETA[a] * eta) * HEX_ZETA[a],
                                ];
                                for r in 0..3 {
                                    for c in 0..3 {
                                        j[(r, c)] += dn[r] * cell[a][c];
                                    }
                                }
                            }
                            volume += j.determinant().abs() * wu * wv * ww * 0.125;
                        }
                    }
                }
                volume
            })
            .collect(),
    }
}

/// Discretize `geometry` and record the result on it.
///
/// Corner positions are read from `user_points`. Lattice points are inserted
/// into `mesh_points`; a lattice point created here inherits the loads and
/// constraints of a coincident user point. Geometry constraints go to every
/// lattice point and geometry loads are lumped onto them.
///
/// `mesh_points` is expected to be fresh for each full mesh build, otherwise
/// lumped loads are added twice.
///
/// # Errors
///
/// Returns [`Error::InvalidArgument`] for a zero subdivision and
/// [`Error::Mesh`] when the lattice degenerates.
pub fn mesh_geometry(
    geometry: &mut Geometry,
    user_points: &PointStore,
    subdivision: Subdivision,
    mesh_points: &mut PointStore,
    options: MeshOptions,
) -> Result<()> {
    let kind = geometry.kind();
    let [nx, ny, nz] = subdivision.counts()?;
    let counts = match kind {
        GeometryKind::LineSegment => [nx, 0, 0],
        GeometryKind::Quadrilateral => [nx, ny, 0],
        GeometryKind::QuadHexahedron => [nx, ny, nz],
    };
    let corners = geometry
        .points()
        .iter()
        .map(|&id| user_points.position(id))
        .collect::<Result<Vec<_>>>()?;

    let mut lattice = Lattice {
        kind,
        counts,
        ids: Vec::new(),
        positions: Vec::new(),
    };
    let param = |i: usize, n: usize| if n == 0 { 0.0 } else { i as f64 / n as f64 };
    for k in 0..=counts[2] {
        for j in 0..=counts[1] {
            for i in 0..=counts[0] {
                let position = interpolate(
                    kind,
                    &corners,
                    param(i, counts[0]),
                    param(j, counts[1]),
                    param(k, counts[2]),
                );
                let (id, created) = mesh_points.insert(position);
                if created {
                    if let Some(source) = user_points.find(&position).and_then(|u| user_points.get(u)) {
                        let (loads, constraints) = (source.loads.clone(), source.constraints.clone());
                        let target = mesh_points.point_mut(id)?;
                        target.loads.extend(loads);
                        for c in constraints {
                            target.add_constraint(c);
                        }
                    }
                }
                lattice.ids.push(id);
                lattice.positions.push(position);
            }
        }
    }

    let cells = lattice.cells();
    for cell in &cells {
        let mut ids: Vec<PointId> = cell.iter().map(|&c| lattice.ids[c]).collect();
        ids.sort();
        ids.dedup();
        if ids.len() != cell.len() {
            return Err(Error::Mesh(format!(
                "{:?} lattice has a collapsed cell; check the corner points",
                kind
            )));
        }
    }

    let mut groups = Vec::new();
    for (index, structure) in geometry.structures().iter().enumerate() {
        if options.skip_ghost && (structure.ghost || structure.load_panel) {
            continue;
        }
        let to_group = |lattice_points: &[usize]| ElementPointGroup {
            structure: index,
            points: lattice_points.iter().map(|&c| lattice.ids[c]).collect(),
        };
        match (kind, &structure.kind) {
            (_, StructureKind::None) => {}
            (GeometryKind::Quadrilateral, StructureKind::Truss { .. })
            | (GeometryKind::Quadrilateral, StructureKind::Beam { .. }) => {
                groups.extend(lattice.quad_edges().iter().map(|e| to_group(&e[..])));
            }
            _ => groups.extend(cells.iter().map(|c| to_group(c.as_slice()))),
        }
    }

    for constraint in geometry.constraints() {
        for &id in &lattice.ids {
            mesh_points.point_mut(id)?.add_constraint(*constraint);
        }
    }

    if !geometry.loads().is_empty() {
        let mut weights = vec![0.0; lattice.ids.len()];
        for cell in &cells {
            let cell_positions: Vec<Point3> = cell.iter().map(|&c| lattice.positions[c]).collect();
            for (&c, measure) in cell.iter().zip(corner_measures(kind, &cell_positions)) {
                weights[c] += measure;
            }
        }
        let total: f64 = weights.iter().sum();
        if total.is_nan() || total <= 0.0 {
            return Err(Error::Mesh(format!(
                "{:?} has zero measure, cannot distribute its loads",
                kind
            )));
        }
        for (&id, weight) in lattice.ids.iter().zip(&weights) {
            let point = mesh_points.point_mut(id)?;
            for load in geometry.loads() {
                point.loads.push(load.scaled(weight / total));
            }
        }
    }

    debug!(
        "meshed {:?} into {} points and {} element groups",
        kind,
        lattice.ids.len(),
        groups.len()
    );
    geometry.set_mesh(GeometryMesh {
        points: lattice.ids,
        groups,
    });
    Ok(())
}
