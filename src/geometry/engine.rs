//! Interface evaluation consumed by the decomposition.
//!
//! A [`GeometryEngine`] answers edge queries against one of several
//! independently indexed interfaces. A crossing found by
//! [`GeometryEngine::geometric_query`] is held in a single-slot queue until
//! the caller either admits it as a new node or discards it; a second query
//! while a crossing is queued, or an admit with nothing queued, is a protocol
//! error.
//!
//! Engines journal what a pass changes (admitted nodes, interface-vertex
//! flags) between [`GeometryEngine::begin_pass`] and the end of the pass, so
//! a failed pass can be undone with [`GeometryEngine::rollback_pass`].

use crate::mesh_error::MeshDecompError;
use serde::{Deserialize, Serialize};

/// One edge to be tested against an interface.
#[derive(Clone, Copy, Debug)]
pub struct EdgeQuery<'a> {
    /// Interface index.
    pub geometry: usize,
    /// Cut-mesh vertex indices of the endpoints.
    pub vertices: [usize; 2],
    /// Global ids of the endpoints.
    pub vertex_ids: [u64; 2],
    /// Physical coordinates of the endpoints.
    pub coords: [&'a [f64]; 2],
    /// Background cell providing the parametric frame.
    pub background_cell: usize,
    /// Parametric coordinates of the endpoints in `background_cell`.
    pub local_coords: [&'a [f64]; 2],
}

/// Answer to an [`EdgeQuery`].
#[derive(Clone, Debug, Default, PartialEq)]
pub struct EdgeIntersection {
    /// The interface crosses or touches the edge.
    pub intersected: bool,
    /// Crossing position in `(0, 1)` measured from the first endpoint; `None`
    /// when the edge is not crossed in its interior.
    pub parametric_position: Option<f64>,
    pub first_endpoint_on_interface: bool,
    pub second_endpoint_on_interface: bool,
    /// Physical coordinates of the crossing.
    pub coords: Option<Vec<f64>>,
}

impl EdgeIntersection {
    /// The edge is crossed in its interior and a new node is queued.
    pub fn is_interior_crossing(&self) -> bool {
        self.intersected && !self.first_endpoint_on_interface && !self.second_endpoint_on_interface
    }
}

/// A crossing waiting to be admitted.
#[derive(Clone, Debug, PartialEq)]
pub struct QueuedIntersection {
    pub geometry: usize,
    pub parent_vertices: [usize; 2],
    pub parametric_position: f64,
    pub coords: Vec<f64>,
}

/// A crossing admitted as a mesh node.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AdmittedNode {
    pub node_index: usize,
    pub geometry: usize,
    pub parent_vertices: [usize; 2],
    pub parametric_position: f64,
    pub coords: Vec<f64>,
    pub id: Option<u64>,
    pub owner: Option<usize>,
}

/// Interface evaluator.
pub trait GeometryEngine {
    /// Number of interfaces the engine can evaluate.
    fn num_geometries(&self) -> usize;

    /// Distance below which a vertex counts as lying on an interface.
    /// Engines without a notion of tolerance ignore it.
    fn set_interface_tolerance(&mut self, _tolerance: f64) {}

    /// Whether the cell with these corner coordinates is cut or touched by
    /// interface `geometry`.
    fn is_intersected_cell(
        &self,
        geometry: usize,
        background_cell: usize,
        vertex_coords: &[&[f64]],
    ) -> Result<bool, MeshDecompError>;

    /// Test one edge. An interior crossing is queued.
    fn geometric_query(&mut self, query: &EdgeQuery<'_>) -> Result<EdgeIntersection, MeshDecompError>;

    /// The crossing currently queued, if any.
    fn queued_intersection(&self) -> Option<&QueuedIntersection>;

    /// Admit the queued crossing as node `node_index`.
    fn admit_queued_intersection(&mut self, node_index: usize) -> Result<(), MeshDecompError>;

    /// Drop the queued crossing without admitting it.
    fn discard_queued_intersection(&mut self);

    /// Flag an existing vertex as lying on interface `geometry`.
    fn induce_as_interface_vertex(&mut self, geometry: usize, vertex: usize);

    fn is_interface_vertex(&self, geometry: usize, vertex: usize) -> bool;

    /// Record the final id and owner of an admitted node.
    fn update_admitted_node(&mut self, node_index: usize, id: u64, owner: usize) -> Result<(), MeshDecompError>;

    fn admitted_nodes(&self) -> &[AdmittedNode];

    /// Start journaling changes of a pass.
    fn begin_pass(&mut self);

    /// Undo every change since the last [`GeometryEngine::begin_pass`].
    fn rollback_pass(&mut self);
}
