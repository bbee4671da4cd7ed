//! SDOPT Core - Structural Design Optimization
//!
//! Linear static finite element analysis and topology optimization for
//! conceptual structural design:
//! - Geometry model of points, line segments, quadrilaterals and hexahedra
//!   carrying structures, loads and constraints
//! - Structured meshing with coincident-point merging and load lumping
//! - Truss, beam, flat shell and hexahedral elements with SIMP density scaling
//! - Parallel element stiffness derivation using Rayon
//! - Direct and iterative linear solvers, adjoint solves
//! - Compliance minimization with the Method of Moving Asymptotes
//!
//! # Architecture
//!
//! - [`AnalysisModel`]: owns points and geometries, meshes them and runs
//!   analyses
//! - [`FeaSystem`]: nodes, elements, DOF numbering, assembly and solves
//! - [`Element`]: one element with its [`element::Formulation`] and design
//!   density
//! - [`LinearSolver`] trait: linear system solution strategies
//! - [`mma_update`]: one MMA iteration for a general nonlinear program

pub mod types;
pub mod error;
pub mod material;
pub mod structure;
pub mod geometry;
pub mod mesh;
pub mod element;
pub mod sparse;
pub mod solver;
pub mod assembly;
pub mod results;
pub mod model;
pub mod optimization;

pub use types::{BoundingBox, Dof, LoadCase, Point3, StressTensor};
pub use error::{Error, Result};
pub use material::{Material, Simp};
pub use structure::{Structure, StructureKind};
pub use geometry::{Constraint, Geometry, GeometryId, GeometryKind, GeometryShape, Load, Point, PointId};
pub use mesh::Subdivision;
pub use element::{Element, ElementId, ElementKind, NodeId};
pub use sparse::CsrMatrix;
pub use solver::{LinearSolver, SolverConfig, SolverKind};
pub use assembly::FeaSystem;
pub use results::SdResults;
pub use model::{AnalysisModel, ModelSettings, ModelState};
pub use optimization::{mma_update, MmaSettings, OptimizationReport, TopologySettings};
