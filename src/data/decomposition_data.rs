//! Pass-scoped registry of new-node requests.
//!
//! One interface pass registers a request for every intersected edge. A
//! request is keyed by its parent background entity (index and rank) and a
//! secondary key derived from the edge's endpoint ids, so an edge reached
//! through several cells collapses onto one request and one new vertex.
//!
//! The request at position `i` of a pass becomes cut-mesh vertex
//! `first_node_index + i`. When the pass completes its requests move to the
//! log returned by [`DecompositionData::request_log`].

use crate::debug_invariants::{DebugInvariants, ensure};
use crate::mesh_error::MeshDecompError;
use crate::topology::cell_type::{EntityRank, EntityRef};
use hashbrown::{HashMap, HashSet};
use serde::{Deserialize, Serialize};

/// Coordinates of two requests with the same key may differ by at most this
/// (relative to the larger coordinate magnitude) before they are considered
/// two distinct vertices.
const SAME_VERTEX_TOL: f64 = 1e-9;

/// A request for one new vertex on an intersected edge.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NodeRequest {
    /// Decomposition id of the pass that created the request.
    pub decomp_id: usize,
    /// Smallest background entity containing the edge.
    pub parent: EntityRef,
    /// Global id of `parent`.
    pub parent_id: u64,
    /// Order-independent key of the edge's endpoint ids.
    pub secondary_key: u64,
    /// Rank that owns the new vertex.
    pub owner: usize,
    /// Physical coordinates.
    pub coords: Vec<f64>,
    /// Cut-mesh endpoints of the edge, as stored in the edge connectivity.
    pub edge_vertices: [usize; 2],
    /// Position of the crossing along the edge, `0` at `edge_vertices[0]`.
    pub edge_position: f64,
    /// Cut-mesh vertex index assigned at registration.
    pub vertex_index: usize,
    /// Global id, once assigned.
    pub node_id: Option<u64>,
    /// Cell groups the vertex belongs to, with its parametric coordinates in
    /// each group's background cell.
    pub group_local_coords: Vec<(usize, Vec<f64>)>,
}

impl NodeRequest {
    pub fn new(
        parent: EntityRef,
        parent_id: u64,
        secondary_key: u64,
        owner: usize,
        coords: Vec<f64>,
    ) -> Self {
        Self {
            decomp_id: 0,
            parent,
            parent_id,
            secondary_key,
            owner,
            coords,
            edge_vertices: [0, 0],
            edge_position: 0.0,
            vertex_index: usize::MAX,
            node_id: None,
            group_local_coords: Vec::new(),
        }
    }

    /// Record the edge the request was created on.
    pub fn on_edge(mut self, edge_vertices: [usize; 2], position: f64) -> Self {
        self.edge_vertices = edge_vertices;
        self.edge_position = position;
        self
    }

    fn same_location(&self, coords: &[f64]) -> bool {
        if self.coords.len() != coords.len() {
            return false;
        }
        let scale = self
            .coords
            .iter()
            .chain(coords)
            .fold(1.0_f64, |m, c| m.max(c.abs()));
        self.coords
            .iter()
            .zip(coords)
            .all(|(a, b)| (a - b).abs() <= SAME_VERTEX_TOL * scale)
    }
}

type LocalKey = (EntityRank, usize, u64);
type GlobalKey = (EntityRank, u64, u64);

/// Registry of node requests for the current pass plus the log of all
/// completed passes.
#[derive(Clone, Debug, Default)]
pub struct DecompositionData {
    decomp_id: usize,
    first_node_index: usize,
    requests: Vec<NodeRequest>,
    lookup: HashMap<LocalKey, usize>,
    global_lookup: HashMap<GlobalKey, usize>,
    completed: Vec<NodeRequest>,
    num_new_cells: usize,
}

impl DecompositionData {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a pass. Requests still registered from an unfinished pass are
    /// discarded.
    pub fn begin_pass(&mut self, decomp_id: usize, first_node_index: usize) {
        if !self.requests.is_empty() {
            log::warn!(
                "discarding {} requests of unfinished pass {}",
                self.requests.len(),
                self.decomp_id
            );
        }
        self.abort_pass();
        self.decomp_id = decomp_id;
        self.first_node_index = first_node_index;
    }

    /// Drop every request of the current pass.
    pub fn abort_pass(&mut self) {
        self.requests.clear();
        self.lookup.clear();
        self.global_lookup.clear();
    }

    /// Retire the requests of the current pass into the log.
    pub fn complete_pass(&mut self, new_cells: usize) {
        self.num_new_cells += new_cells;
        self.completed.append(&mut self.requests);
        self.lookup.clear();
        self.global_lookup.clear();
    }

    pub fn decomp_id(&self) -> usize {
        self.decomp_id
    }

    /// Cut-mesh index of the first vertex created by this pass.
    pub fn first_node_index(&self) -> usize {
        self.first_node_index
    }

    pub fn num_requests(&self) -> usize {
        self.requests.len()
    }

    /// Requests of the current pass in registration order.
    pub fn requests(&self) -> &[NodeRequest] {
        &self.requests
    }

    pub fn request(&self, index: usize) -> Result<&NodeRequest, MeshDecompError> {
        self.requests
            .get(index)
            .ok_or(MeshDecompError::IndexOutOfBounds {
                what: "node request",
                index,
                len: self.requests.len(),
            })
    }

    fn request_mut(&mut self, index: usize) -> Result<&mut NodeRequest, MeshDecompError> {
        let len = self.requests.len();
        self.requests
            .get_mut(index)
            .ok_or(MeshDecompError::IndexOutOfBounds {
                what: "node request",
                index,
                len,
            })
    }

    /// Vertex index of the request with this key, if registered.
    pub fn request_exists(
        &self,
        parent_index: usize,
        rank: EntityRank,
        secondary_key: u64,
    ) -> Option<usize> {
        self.lookup
            .get(&(rank, parent_index, secondary_key))
            .map(|&r| self.requests[r].vertex_index)
    }

    /// Register a request whose key must not exist yet. Returns its vertex index.
    pub fn register_new_request(&mut self, mut request: NodeRequest) -> Result<usize, MeshDecompError> {
        let key = (request.parent.rank, request.parent.index, request.secondary_key);
        if let Some(existing) = self.request_exists(key.1, key.0, key.2) {
            return Err(MeshDecompError::DuplicateRequest {
                parent_index: key.1,
                rank: key.0,
                secondary_key: key.2,
                existing,
            });
        }
        let slot = self.requests.len();
        request.decomp_id = self.decomp_id;
        request.vertex_index = self.first_node_index + slot;
        let vertex_index = request.vertex_index;
        self.lookup.insert(key, slot);
        self.global_lookup
            .insert((key.0, request.parent_id, key.2), slot);
        self.requests.push(request);
        Ok(vertex_index)
    }

    /// Register a request or return the vertex of the request that already
    /// holds its key. The flag is `true` when the request existed.
    ///
    /// Two requests with one key but different coordinates would have to
    /// become two vertices; that is reported as [`MeshDecompError::DuplicateRequest`].
    pub fn register_or_get(&mut self, request: NodeRequest) -> Result<(usize, bool), MeshDecompError> {
        let key = (request.parent.rank, request.parent.index, request.secondary_key);
        match self.lookup.get(&key) {
            Some(&slot) => {
                let existing = &self.requests[slot];
                if !existing.same_location(&request.coords) {
                    return Err(MeshDecompError::DuplicateRequest {
                        parent_index: key.1,
                        rank: key.0,
                        secondary_key: key.2,
                        existing: existing.vertex_index,
                    });
                }
                Ok((existing.vertex_index, true))
            }
            None => self.register_new_request(request).map(|v| (v, false)),
        }
    }

    /// Request of the current pass with this globally meaningful key.
    pub fn find_by_global_key(
        &self,
        rank: EntityRank,
        parent_id: u64,
        secondary_key: u64,
    ) -> Option<&NodeRequest> {
        self.global_lookup
            .get(&(rank, parent_id, secondary_key))
            .map(|&r| &self.requests[r])
    }

    pub fn set_node_id(&mut self, request: usize, id: u64) -> Result<(), MeshDecompError> {
        self.request_mut(request)?.node_id = Some(id);
        Ok(())
    }

    /// Associate the vertex of `request` with cell group `group`.
    pub fn associate_cell_group(
        &mut self,
        request: usize,
        group: usize,
        local_coords: Vec<f64>,
    ) -> Result<(), MeshDecompError> {
        let req = self.request_mut(request)?;
        match req.group_local_coords.iter_mut().find(|(g, _)| *g == group) {
            Some(entry) => entry.1 = local_coords,
            None => req.group_local_coords.push((group, local_coords)),
        }
        Ok(())
    }

    /// Every request of completed passes followed by the current pass.
    pub fn request_log(&self) -> impl Iterator<Item = &NodeRequest> {
        self.completed.iter().chain(self.requests.iter())
    }

    /// Net number of cells added by completed passes.
    pub fn num_new_cells(&self) -> usize {
        self.num_new_cells
    }
}

impl DebugInvariants for DecompositionData {
    fn validate_invariants(&self) -> Result<(), MeshDecompError> {
        ensure(self.lookup.len() == self.requests.len(), || {
            format!(
                "{} registry keys for {} requests",
                self.lookup.len(),
                self.requests.len()
            )
        })?;
        let mut ids = HashSet::new();
        for (slot, req) in self.requests.iter().enumerate() {
            ensure(req.vertex_index == self.first_node_index + slot, || {
                format!("request {slot} maps to vertex {}", req.vertex_index)
            })?;
            ensure(
                self.lookup.get(&(req.parent.rank, req.parent.index, req.secondary_key))
                    == Some(&slot),
                || format!("request {slot} is not reachable through its key"),
            )?;
            if let Some(id) = req.node_id {
                ensure(ids.insert(id), || format!("node id {id} assigned twice"))?;
            }
        }
        Ok(())
    }
}
