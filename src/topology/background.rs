//! Background mesh interface and an in-memory simplex implementation.
//!
//! The decomposition only needs a narrow view of the background mesh: entity
//! closures and owners for edge ancestry, cell connectivity and coordinates to
//! seed the cut mesh, and a lookup from a vertex set to the entity it spans.
//!
//! # Entity numbering
//! [`SimplexBackgroundMesh`] derives edges (and faces for tetrahedral meshes)
//! from the cells in first-encounter order. Their global ids pair the sorted
//! global ids of their vertices, so independently built partitions of the
//! same mesh agree on them. The owner of a derived entity is the smallest
//! owner among the cells that contain it. A ghostless partition only sees its
//! own cells, so entities on the partition boundary get their owners from
//! [`SimplexBackgroundMesh::distributed`], which agrees on them across ranks.

use crate::algs::communicator::{CommTag, Communicator};
use crate::algs::ownership::{DEFAULT_OWNERSHIP_TAG, reconcile_shared_owners};
use crate::algs::pairing::sorted_ids_key;
use crate::mesh_error::MeshDecompError;
use crate::topology::cell_type::{CellTopology, EntityRank};
use hashbrown::HashMap;
use itertools::Itertools;
use std::collections::BTreeSet;

/// Read-only queries the decomposition issues against the background mesh.
pub trait BackgroundMesh {
    /// Spatial dimension (2 or 3).
    fn spatial_dim(&self) -> usize;
    /// Number of entities of `rank`.
    fn num_entities(&self, rank: EntityRank) -> usize;
    /// Owning process rank of an entity.
    fn entity_owner(&self, index: usize, rank: EntityRank) -> Result<usize, MeshDecompError>;
    /// Global id of an entity.
    fn entity_id(&self, index: usize, rank: EntityRank) -> Result<u64, MeshDecompError>;
    /// Background vertices in the closure of an entity, sorted ascending.
    fn entity_vertices(&self, index: usize, rank: EntityRank)
        -> Result<Vec<usize>, MeshDecompError>;
    /// The lower-dimensional entity (vertex, edge or face) spanned exactly by
    /// `sorted_vertices`, if any.
    fn find_entity(&self, sorted_vertices: &[usize]) -> Option<(usize, EntityRank)>;
    /// Reference topology of a cell.
    fn cell_topology(&self, cell: usize) -> Result<CellTopology, MeshDecompError>;
    /// Corner vertices of a cell in reference order.
    fn cell_vertices(&self, cell: usize) -> Result<&[usize], MeshDecompError>;
    /// Physical coordinates of a background vertex.
    fn vertex_coords(&self, vertex: usize) -> Result<&[f64], MeshDecompError>;
}

/// All-triangle (2D) or all-tetrahedron (3D) background mesh.
#[derive(Clone, Debug)]
pub struct SimplexBackgroundMesh {
    topology: CellTopology,
    coords: Vec<Vec<f64>>,
    vertex_ids: Vec<u64>,
    vertex_owners: Vec<usize>,
    cells: Vec<Vec<usize>>,
    cell_ids: Vec<u64>,
    cell_owners: Vec<usize>,
    edges: Vec<Vec<usize>>,
    edge_owners: Vec<usize>,
    faces: Vec<Vec<usize>>,
    face_owners: Vec<usize>,
    lookup: HashMap<Vec<usize>, (usize, EntityRank)>,
}

impl SimplexBackgroundMesh {
    /// Build a serial mesh: global ids are `index + 1`, every entity is owned by rank 0.
    pub fn new(
        spatial_dim: usize,
        coords: Vec<Vec<f64>>,
        cells: Vec<Vec<usize>>,
    ) -> Result<Self, MeshDecompError> {
        let vertex_ids = (1..=coords.len() as u64).collect();
        let cell_ids = (1..=cells.len() as u64).collect();
        let owners = vec![0; cells.len()];
        Self::with_partition(spatial_dim, coords, cells, vertex_ids, cell_ids, owners)
    }

    /// Build a (possibly partial) mesh with explicit global ids and cell owners.
    ///
    /// Owners of vertices, edges and faces are derived from the local cells
    /// alone. That is right for a replicated mesh or one that carries a ghost
    /// layer; a partition without ghosts should be built with
    /// [`distributed`](Self::distributed).
    pub fn with_partition(
        spatial_dim: usize,
        coords: Vec<Vec<f64>>,
        cells: Vec<Vec<usize>>,
        vertex_ids: Vec<u64>,
        cell_ids: Vec<u64>,
        cell_owners: Vec<usize>,
    ) -> Result<Self, MeshDecompError> {
        let topology = CellTopology::for_dimension(spatial_dim)?;
        if vertex_ids.len() != coords.len() {
            return Err(MeshDecompError::InvalidGeometry(format!(
                "{} vertex ids for {} vertices",
                vertex_ids.len(),
                coords.len()
            )));
        }
        if cell_ids.len() != cells.len() || cell_owners.len() != cells.len() {
            return Err(MeshDecompError::InvalidGeometry(format!(
                "{} cells but {} ids and {} owners",
                cells.len(),
                cell_ids.len(),
                cell_owners.len()
            )));
        }
        for (idx, c) in coords.iter().enumerate() {
            if c.len() != spatial_dim {
                return Err(MeshDecompError::InvalidGeometry(format!(
                    "vertex {idx} has dimension {}, expected {spatial_dim}",
                    c.len()
                )));
            }
        }
        for (idx, cell) in cells.iter().enumerate() {
            if cell.len() != topology.num_vertices() {
                return Err(MeshDecompError::InvalidGeometry(format!(
                    "cell {idx} has {} vertices, expected {}",
                    cell.len(),
                    topology.num_vertices()
                )));
            }
            if let Some(&v) = cell.iter().find(|&&v| v >= coords.len()) {
                return Err(MeshDecompError::InvalidGeometry(format!(
                    "cell {idx} references missing vertex {v}"
                )));
            }
            if !cell.iter().all_unique() {
                return Err(MeshDecompError::InvalidGeometry(format!(
                    "cell {idx} repeats a vertex: {cell:?}"
                )));
            }
        }

        let mut mesh = Self {
            topology,
            vertex_owners: vec![usize::MAX; coords.len()],
            coords,
            vertex_ids,
            cells,
            cell_ids,
            cell_owners,
            edges: Vec::new(),
            edge_owners: Vec::new(),
            faces: Vec::new(),
            face_owners: Vec::new(),
            lookup: HashMap::new(),
        };
        mesh.derive_entities();
        Ok(mesh)
    }

    /// One rank's part of a partition without ghost cells. Entities on the
    /// partition boundary take the smallest owner any rank derives for them.
    /// Collective: every rank of `comm` calls it.
    pub fn distributed<C: Communicator>(
        spatial_dim: usize,
        coords: Vec<Vec<f64>>,
        cells: Vec<Vec<usize>>,
        vertex_ids: Vec<u64>,
        cell_ids: Vec<u64>,
        cell_owners: Vec<usize>,
        comm: &C,
    ) -> Result<Self, MeshDecompError> {
        let mut mesh = Self::with_partition(spatial_dim, coords, cells, vertex_ids, cell_ids, cell_owners)?;
        reconcile_shared_owners(&mut mesh, comm, CommTag::new(DEFAULT_OWNERSHIP_TAG))?;
        Ok(mesh)
    }

    fn derive_entities(&mut self) {
        for v in 0..self.coords.len() {
            self.lookup.insert(vec![v], (v, EntityRank::Node));
        }
        for (cell_idx, cell) in self.cells.iter().enumerate() {
            let owner = self.cell_owners[cell_idx];
            for &v in cell {
                self.vertex_owners[v] = self.vertex_owners[v].min(owner);
            }
            for [a, b] in self.topology.node_to_edge_map() {
                let key = sorted(&[cell[*a], cell[*b]]);
                register(&mut self.lookup, &mut self.edges, &mut self.edge_owners, key, owner, EntityRank::Edge);
            }
            if self.topology == CellTopology::Tet4 {
                for skip in 0..4 {
                    let face: Vec<usize> = (0..4).filter(|&c| c != skip).map(|c| cell[c]).collect();
                    register(&mut self.lookup, &mut self.faces, &mut self.face_owners, sorted(&face), owner, EntityRank::Face);
                }
            }
        }
        // vertices not referenced by any cell keep a local owner of 0
        for owner in &mut self.vertex_owners {
            if *owner == usize::MAX {
                *owner = 0;
            }
        }
    }

    /// Reference topology shared by every cell.
    pub fn topology(&self) -> CellTopology {
        self.topology
    }

    /// Number of cells.
    pub fn num_cells(&self) -> usize {
        self.cells.len()
    }

    /// Number of vertices.
    pub fn num_vertices(&self) -> usize {
        self.coords.len()
    }

    /// Vertices, edges and faces in the closure of facets held by a single
    /// local cell, as `(rank, index)` in ascending order.
    pub fn boundary_closure(&self) -> Vec<(EntityRank, usize)> {
        let facet_len = self.topology.num_vertices() - 1;
        let facets = self
            .cells
            .iter()
            .flat_map(|cell| cell.iter().copied().combinations(facet_len).map(|f| sorted(&f)))
            .counts();
        let mut out = BTreeSet::new();
        for facet in facets.into_iter().filter(|(_, n)| *n == 1).map(|(f, _)| f) {
            for len in 1..=facet_len {
                for sub in facet.iter().copied().combinations(len) {
                    if let Some(&(index, rank)) = self.lookup.get(&sub) {
                        out.insert((rank, index));
                    }
                }
            }
        }
        out.into_iter().collect()
    }

    /// Lower the owner of an entity to `owner` if that is smaller; returns
    /// whether it changed.
    pub(crate) fn lower_owner(&mut self, index: usize, rank: EntityRank, owner: usize) -> Result<bool, MeshDecompError> {
        let owners = match rank {
            EntityRank::Node => &mut self.vertex_owners,
            EntityRank::Edge => &mut self.edge_owners,
            EntityRank::Face => &mut self.face_owners,
            EntityRank::Element => &mut self.cell_owners,
        };
        let slot = owners
            .get_mut(index)
            .ok_or(MeshDecompError::EntityOutOfRange { index, rank })?;
        if owner < *slot {
            *slot = owner;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    fn closure(&self, index: usize, rank: EntityRank) -> Option<&[usize]> {
        match rank {
            EntityRank::Node => (index < self.coords.len()).then_some(&[][..]),
            EntityRank::Edge => self.edges.get(index).map(Vec::as_slice),
            EntityRank::Face => self.faces.get(index).map(Vec::as_slice),
            EntityRank::Element => self.cells.get(index).map(Vec::as_slice),
        }
    }
}

fn sorted(vertices: &[usize]) -> Vec<usize> {
    let mut v = vertices.to_vec();
    v.sort_unstable();
    v
}

fn register(
    lookup: &mut HashMap<Vec<usize>, (usize, EntityRank)>,
    entities: &mut Vec<Vec<usize>>,
    owners: &mut Vec<usize>,
    key: Vec<usize>,
    owner: usize,
    rank: EntityRank,
) {
    match lookup.get(&key) {
        Some(&(idx, _)) => owners[idx] = owners[idx].min(owner),
        None => {
            lookup.insert(key.clone(), (entities.len(), rank));
            entities.push(key);
            owners.push(owner);
        }
    }
}

impl BackgroundMesh for SimplexBackgroundMesh {
    fn spatial_dim(&self) -> usize {
        self.topology.dimension()
    }

    fn num_entities(&self, rank: EntityRank) -> usize {
        match rank {
            EntityRank::Node => self.coords.len(),
            EntityRank::Edge => self.edges.len(),
            EntityRank::Face => self.faces.len(),
            EntityRank::Element => self.cells.len(),
        }
    }

    fn entity_owner(&self, index: usize, rank: EntityRank) -> Result<usize, MeshDecompError> {
        let owners = match rank {
            EntityRank::Node => &self.vertex_owners,
            EntityRank::Edge => &self.edge_owners,
            EntityRank::Face => &self.face_owners,
            EntityRank::Element => &self.cell_owners,
        };
        owners
            .get(index)
            .copied()
            .ok_or(MeshDecompError::EntityOutOfRange { index, rank })
    }

    fn entity_id(&self, index: usize, rank: EntityRank) -> Result<u64, MeshDecompError> {
        match rank {
            EntityRank::Node => self.vertex_ids.get(index).copied(),
            EntityRank::Element => self.cell_ids.get(index).copied(),
            EntityRank::Edge | EntityRank::Face => {
                let closure = self
                    .closure(index, rank)
                    .ok_or(MeshDecompError::EntityOutOfRange { index, rank })?;
                let ids: Vec<u64> = closure.iter().map(|&v| self.vertex_ids[v]).collect();
                return sorted_ids_key(&ids);
            }
        }
        .ok_or(MeshDecompError::EntityOutOfRange { index, rank })
    }

    fn entity_vertices(
        &self,
        index: usize,
        rank: EntityRank,
    ) -> Result<Vec<usize>, MeshDecompError> {
        if rank == EntityRank::Node {
            return if index < self.coords.len() {
                Ok(vec![index])
            } else {
                Err(MeshDecompError::EntityOutOfRange { index, rank })
            };
        }
        self.closure(index, rank)
            .map(sorted)
            .ok_or(MeshDecompError::EntityOutOfRange { index, rank })
    }

    fn find_entity(&self, sorted_vertices: &[usize]) -> Option<(usize, EntityRank)> {
        self.lookup.get(sorted_vertices).copied()
    }

    fn cell_topology(&self, cell: usize) -> Result<CellTopology, MeshDecompError> {
        if cell < self.cells.len() {
            Ok(self.topology)
        } else {
            Err(MeshDecompError::EntityOutOfRange {
                index: cell,
                rank: EntityRank::Element,
            })
        }
    }

    fn cell_vertices(&self, cell: usize) -> Result<&[usize], MeshDecompError> {
        self.cells
            .get(cell)
            .map(Vec::as_slice)
            .ok_or(MeshDecompError::EntityOutOfRange {
                index: cell,
                rank: EntityRank::Element,
            })
    }

    fn vertex_coords(&self, vertex: usize) -> Result<&[f64], MeshDecompError> {
        self.coords
            .get(vertex)
            .map(Vec::as_slice)
            .ok_or(MeshDecompError::EntityOutOfRange {
                index: vertex,
                rank: EntityRank::Node,
            })
    }
}
