#![cfg_attr(docsrs, feature(doc_cfg))]
//! # mesh-decomp
//!
//! mesh-decomp decomposes a simplex background mesh along one or more
//! implicit interfaces. Every edge crossed by an interface receives a new
//! vertex, and every cut cell is replaced by children taken from a fixed
//! library of subdivision templates, so that each resulting cell lies on one
//! side of every interface and neighbouring cells agree on their shared faces.
//!
//! ## Features
//! - Triangle (2D) and tetrahedron (3D) background meshes with global ids and
//!   owner ranks
//! - Analytic level-set interfaces behind a pluggable [`GeometryEngine`](geometry::engine::GeometryEngine)
//! - Deduplicated node requests with collision-free global ids across ranks
//! - Canonical cut classification (permutation keys) and memoized templates
//! - All-or-nothing interface passes driven by an explicit state machine
//!
//! ## Determinism
//!
//! Edges, requests and cut cells are visited in an order fixed by the input
//! mesh, so repeated runs produce identical meshes, ids and request logs.
//!
//! ## Usage
//!
//! ```no_run
//! use mesh_decomp::prelude::*;
//!
//! let background = tet_mesh(4, 4, 4, [0.0; 3], [1.0; 3])?;
//! let engine = LevelSetEngine::new(vec![LevelSet::sphere(&[0.5, 0.5, 0.5], 0.3)]);
//! let mut generator = IntegrationMeshGenerator::new(engine);
//! let (cut_mesh, log, _) = generator.generate(&background)?;
//! println!("{} cells, {} new vertices", cut_mesh.num_cells(), log.request_log().count());
//! # Ok::<(), MeshDecompError>(())
//! ```
//!
//! Enable the `rayon` feature to classify cut cells in parallel, and
//! `strict-invariants` to check the mesh invariants after every pass in
//! release builds.

pub mod algs;
pub mod data;
pub mod debug_invariants;
pub mod decomposition;
pub mod geometry;
pub mod mesh_error;
pub mod mesh_generation;
pub mod topology;

pub use debug_invariants::DebugInvariants;

/// A convenient prelude to import the most-used traits & types:
pub mod prelude {
    pub use crate::algs::communicator::{Communicator, LocalComm, NoComm};
    pub use crate::data::cut_mesh::CutMesh;
    pub use crate::data::decomposition_data::{DecompositionData, NodeRequest};
    pub use crate::debug_invariants::DebugInvariants;
    pub use crate::decomposition::templates::TemplateLibrary;
    pub use crate::decomposition::{DecompositionAlgorithm, DecompositionAlgorithmType, PassState};
    pub use crate::geometry::engine::GeometryEngine;
    pub use crate::geometry::level_set::{LevelSet, LevelSetEngine};
    pub use crate::mesh_error::MeshDecompError;
    pub use crate::mesh_generation::structured::{tet_mesh, tri_mesh};
    pub use crate::mesh_generation::{DecompositionOptions, IntegrationMeshGenerator, MeshGenerationData};
    pub use crate::topology::background::{BackgroundMesh, SimplexBackgroundMesh};
    pub use crate::topology::cell_type::{CellTopology, EntityRank, EntityRef};
}
