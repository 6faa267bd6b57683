//! Arena storage of the interface-conforming mesh.
//!
//! Vertices and cells are addressed by stable indices. Every background cell
//! owns one [`CellGroup`] (the cells that subdivide it) and one
//! [`VertexGroup`] (the vertices that lie in its closure together with their
//! parametric coordinates in it). Group `g` always belongs to background cell
//! `g`.
//!
//! Mutation happens only through the two bulk commits. Both validate their
//! whole input before touching the arena, so a rejected commit leaves the
//! mesh unchanged.

use crate::debug_invariants::{DebugInvariants, ensure};
use crate::mesh_error::MeshDecompError;
use crate::topology::background::BackgroundMesh;
use crate::topology::cell_type::{CellTopology, EntityRank, EntityRef};
use hashbrown::{HashMap, HashSet};
use serde::{Deserialize, Serialize};

/// A vertex of the cut mesh.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Vertex {
    pub id: u64,
    pub owner: usize,
    pub coords: Vec<f64>,
    /// Smallest background entity the vertex lies in.
    pub parent: EntityRef,
}

/// A cell of the cut mesh.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Cell {
    pub vertices: Vec<usize>,
    pub topology: CellTopology,
    /// Cell group (= background cell) the cell subdivides.
    pub group: usize,
}

/// Cells that subdivide one background cell.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CellGroup {
    pub background_cell: usize,
    pub cells: Vec<usize>,
}

/// Vertices in the closure of one background cell and their parametric
/// coordinates in that cell.
#[derive(Clone, Debug, PartialEq)]
pub struct VertexGroup {
    pub background_cell: usize,
    vertices: Vec<usize>,
    local_coords: HashMap<usize, Vec<f64>>,
}

impl VertexGroup {
    fn new(background_cell: usize) -> Self {
        Self {
            background_cell,
            vertices: Vec::new(),
            local_coords: HashMap::new(),
        }
    }

    /// Member vertices in insertion order.
    pub fn vertices(&self) -> &[usize] {
        &self.vertices
    }

    pub fn contains(&self, vertex: usize) -> bool {
        self.local_coords.contains_key(&vertex)
    }

    /// Parametric coordinates of `vertex` in this group's background cell.
    pub fn local_coords(&self, group: usize, vertex: usize) -> Result<&[f64], MeshDecompError> {
        self.local_coords
            .get(&vertex)
            .map(Vec::as_slice)
            .ok_or(MeshDecompError::MissingLocalCoords { group, vertex })
    }

    fn insert(&mut self, vertex: usize, coords: Vec<f64>) {
        if self.local_coords.insert(vertex, coords).is_none() {
            self.vertices.push(vertex);
        }
    }
}

/// A vertex to append, produced from a node request.
#[derive(Clone, Debug, PartialEq)]
pub struct NewVertex {
    /// Index the vertex must land on.
    pub index: usize,
    pub id: u64,
    pub owner: usize,
    pub coords: Vec<f64>,
    pub parent: EntityRef,
    /// `(group, parametric coordinates)` memberships.
    pub groups: Vec<(usize, Vec<f64>)>,
}

/// A cell produced by subdividing a cut cell.
#[derive(Clone, Debug, PartialEq)]
pub struct NewCell {
    pub vertices: Vec<usize>,
    pub topology: CellTopology,
    pub group: usize,
    /// Existing cell this one overwrites; `None` appends.
    pub replaces: Option<usize>,
}

/// Sizes of the mesh before a pass. Cells overwritten after it are journaled
/// by the mesh until the checkpoint is rolled back or released.
#[derive(Debug)]
#[must_use]
pub struct CutMeshCheckpoint {
    num_vertices: usize,
    num_cells: usize,
}

/// The interface-conforming mesh.
#[derive(Clone, Debug, PartialEq)]
pub struct CutMesh {
    spatial_dim: usize,
    vertices: Vec<Vertex>,
    cells: Vec<Cell>,
    cell_groups: Vec<CellGroup>,
    vertex_groups: Vec<VertexGroup>,
    /// Original contents of cells overwritten since the open checkpoint.
    journal: Option<Vec<(usize, Cell)>>,
}

impl CutMesh {
    /// Copy the background mesh: one cell and one group per background cell,
    /// corners placed at their reference coordinates.
    pub fn from_background<B: BackgroundMesh + ?Sized>(background: &B) -> Result<Self, MeshDecompError> {
        let spatial_dim = background.spatial_dim();
        let num_vertices = background.num_entities(EntityRank::Node);
        let num_cells = background.num_entities(EntityRank::Element);

        let mut vertices = Vec::with_capacity(num_vertices);
        for v in 0..num_vertices {
            vertices.push(Vertex {
                id: background.entity_id(v, EntityRank::Node)?,
                owner: background.entity_owner(v, EntityRank::Node)?,
                coords: background.vertex_coords(v)?.to_vec(),
                parent: EntityRef::new(v, EntityRank::Node),
            });
        }

        let mut cells = Vec::with_capacity(num_cells);
        let mut cell_groups = Vec::with_capacity(num_cells);
        let mut vertex_groups = Vec::with_capacity(num_cells);
        for c in 0..num_cells {
            let topology = background.cell_topology(c)?;
            let corners = background.cell_vertices(c)?;
            let mut group = VertexGroup::new(c);
            for (ordinal, &v) in corners.iter().enumerate() {
                group.insert(v, topology.reference_corner(ordinal)?.to_vec());
            }
            vertex_groups.push(group);
            cell_groups.push(CellGroup {
                background_cell: c,
                cells: vec![c],
            });
            cells.push(Cell {
                vertices: corners.to_vec(),
                topology,
                group: c,
            });
        }

        Ok(Self {
            spatial_dim,
            vertices,
            cells,
            cell_groups,
            vertex_groups,
            journal: None,
        })
    }

    pub fn spatial_dim(&self) -> usize {
        self.spatial_dim
    }

    pub fn num_vertices(&self) -> usize {
        self.vertices.len()
    }

    pub fn num_cells(&self) -> usize {
        self.cells.len()
    }

    pub fn num_cell_groups(&self) -> usize {
        self.cell_groups.len()
    }

    pub fn vertices(&self) -> &[Vertex] {
        &self.vertices
    }

    pub fn cells(&self) -> &[Cell] {
        &self.cells
    }

    pub fn vertex(&self, index: usize) -> Result<&Vertex, MeshDecompError> {
        self.vertices
            .get(index)
            .ok_or(MeshDecompError::IndexOutOfBounds {
                what: "vertex",
                index,
                len: self.vertices.len(),
            })
    }

    pub fn cell(&self, index: usize) -> Result<&Cell, MeshDecompError> {
        self.cells
            .get(index)
            .ok_or(MeshDecompError::IndexOutOfBounds {
                what: "cell",
                index,
                len: self.cells.len(),
            })
    }

    pub fn cell_group(&self, index: usize) -> Result<&CellGroup, MeshDecompError> {
        self.cell_groups
            .get(index)
            .ok_or(MeshDecompError::IndexOutOfBounds {
                what: "cell group",
                index,
                len: self.cell_groups.len(),
            })
    }

    pub fn vertex_group(&self, index: usize) -> Result<&VertexGroup, MeshDecompError> {
        self.vertex_groups
            .get(index)
            .ok_or(MeshDecompError::IndexOutOfBounds {
                what: "vertex group",
                index,
                len: self.vertex_groups.len(),
            })
    }

    /// Index the next vertex or cell will receive.
    pub fn first_available_index(&self, rank: EntityRank) -> Result<usize, MeshDecompError> {
        match rank {
            EntityRank::Node => Ok(self.vertices.len()),
            EntityRank::Element => Ok(self.cells.len()),
            other => Err(MeshDecompError::InvariantViolation(format!(
                "the cut mesh does not store {other:?} entities"
            ))),
        }
    }

    /// Largest vertex id present, `0` for an empty mesh.
    pub fn max_vertex_id(&self) -> u64 {
        self.vertices.iter().map(|v| v.id).max().unwrap_or(0)
    }

    /// Coordinates of the corners of a cell, in cell order.
    pub fn cell_coords(&self, cell: usize) -> Result<Vec<&[f64]>, MeshDecompError> {
        self.cell(cell)?
            .vertices
            .iter()
            .map(|&v| self.vertex(v).map(|v| v.coords.as_slice()))
            .collect()
    }

    /// Append vertices and register their group memberships.
    pub fn commit_vertices(&mut self, new_vertices: Vec<NewVertex>) -> Result<(), MeshDecompError> {
        let base = self.vertices.len();
        for (offset, nv) in new_vertices.iter().enumerate() {
            if nv.index != base + offset {
                return Err(MeshDecompError::InvariantViolation(format!(
                    "new vertex {} committed at position {}",
                    nv.index,
                    base + offset
                )));
            }
            if nv.coords.len() != self.spatial_dim {
                return Err(MeshDecompError::InvalidGeometry(format!(
                    "new vertex {} has {} coordinates in a {}D mesh",
                    nv.index,
                    nv.coords.len(),
                    self.spatial_dim
                )));
            }
            for (group, local) in &nv.groups {
                if *group >= self.vertex_groups.len() {
                    return Err(MeshDecompError::IndexOutOfBounds {
                        what: "vertex group",
                        index: *group,
                        len: self.vertex_groups.len(),
                    });
                }
                if local.len() != self.spatial_dim {
                    return Err(MeshDecompError::MissingLocalCoords {
                        group: *group,
                        vertex: nv.index,
                    });
                }
            }
        }

        for nv in new_vertices {
            for (group, local) in nv.groups {
                self.vertex_groups[group].insert(nv.index, local);
            }
            self.vertices.push(Vertex {
                id: nv.id,
                owner: nv.owner,
                coords: nv.coords,
                parent: nv.parent,
            });
        }
        Ok(())
    }

    /// Overwrite and append cells.
    pub fn commit_cells(&mut self, new_cells: Vec<NewCell>) -> Result<(), MeshDecompError> {
        let mut replaced = HashSet::new();
        for nc in &new_cells {
            if nc.vertices.len() != nc.topology.num_vertices() {
                return Err(MeshDecompError::InvariantViolation(format!(
                    "{:?} cell with {} vertices",
                    nc.topology,
                    nc.vertices.len()
                )));
            }
            if let Some(&v) = nc.vertices.iter().find(|&&v| v >= self.vertices.len()) {
                return Err(MeshDecompError::IndexOutOfBounds {
                    what: "vertex",
                    index: v,
                    len: self.vertices.len(),
                });
            }
            if nc.group >= self.cell_groups.len() {
                return Err(MeshDecompError::IndexOutOfBounds {
                    what: "cell group",
                    index: nc.group,
                    len: self.cell_groups.len(),
                });
            }
            if let Some(old) = nc.replaces {
                let cell = self.cell(old)?;
                if cell.group != nc.group {
                    return Err(MeshDecompError::InvariantViolation(format!(
                        "cell {old} of group {} replaced by a cell of group {}",
                        cell.group, nc.group
                    )));
                }
                if !replaced.insert(old) {
                    return Err(MeshDecompError::InvariantViolation(format!(
                        "cell {old} replaced twice"
                    )));
                }
            }
        }

        for nc in new_cells {
            let cell = Cell {
                vertices: nc.vertices,
                topology: nc.topology,
                group: nc.group,
            };
            match nc.replaces {
                Some(old) => {
                    let original = std::mem::replace(&mut self.cells[old], cell);
                    if let Some(journal) = &mut self.journal {
                        journal.push((old, original));
                    }
                }
                None => {
                    self.cell_groups[nc.group].cells.push(self.cells.len());
                    self.cells.push(cell);
                }
            }
        }
        Ok(())
    }

    /// Start journaling overwritten cells. One checkpoint is open at a time;
    /// taking another discards the previous journal.
    pub fn checkpoint(&mut self) -> CutMeshCheckpoint {
        self.journal = Some(Vec::new());
        CutMeshCheckpoint {
            num_vertices: self.vertices.len(),
            num_cells: self.cells.len(),
        }
    }

    /// Keep everything committed since `checkpoint`.
    pub fn release(&mut self, _checkpoint: CutMeshCheckpoint) {
        self.journal = None;
    }

    /// Undo every commit since `checkpoint`.
    pub fn rollback(&mut self, checkpoint: CutMeshCheckpoint) {
        let CutMeshCheckpoint { num_vertices, num_cells } = checkpoint;
        // latest write first, so a cell overwritten twice ends at its original
        for (index, original) in self.journal.take().unwrap_or_default().into_iter().rev() {
            self.cells[index] = original;
        }
        self.vertices.truncate(num_vertices);
        self.cells.truncate(num_cells);
        // appended entries sit at the end of every group
        for group in &mut self.cell_groups {
            while group.cells.last().is_some_and(|&c| c >= num_cells) {
                group.cells.pop();
            }
        }
        for group in &mut self.vertex_groups {
            while let Some(&v) = group.vertices.last().filter(|&&v| v >= num_vertices) {
                group.vertices.pop();
                group.local_coords.remove(&v);
            }
        }
    }

    /// Release spare capacity accumulated by the commits.
    pub fn trim_data(&mut self) {
        self.vertices.shrink_to_fit();
        self.cells.shrink_to_fit();
        for group in &mut self.cell_groups {
            group.cells.shrink_to_fit();
        }
        for group in &mut self.vertex_groups {
            group.vertices.shrink_to_fit();
            group.local_coords.shrink_to_fit();
        }
    }
}

impl DebugInvariants for CutMesh {
    fn validate_invariants(&self) -> Result<(), MeshDecompError> {
        ensure(self.cell_groups.len() == self.vertex_groups.len(), || {
            "cell and vertex group counts differ".into()
        })?;
        let mut seen = vec![false; self.cells.len()];
        for (g, group) in self.cell_groups.iter().enumerate() {
            for &c in &group.cells {
                ensure(c < self.cells.len() && self.cells[c].group == g, || {
                    format!("group {g} lists cell {c} of another group")
                })?;
                ensure(!std::mem::replace(&mut seen[c], true), || {
                    format!("cell {c} listed twice")
                })?;
            }
        }
        for (c, cell) in self.cells.iter().enumerate() {
            ensure(seen[c], || format!("cell {c} belongs to no group"))?;
            ensure(cell.vertices.len() == cell.topology.num_vertices(), || {
                format!("cell {c} has {} vertices", cell.vertices.len())
            })?;
            let group = &self.vertex_groups[cell.group];
            for &v in &cell.vertices {
                ensure(v < self.vertices.len(), || format!("cell {c} uses missing vertex {v}"))?;
                ensure(group.contains(v), || {
                    format!("vertex {v} of cell {c} has no coordinates in group {}", cell.group)
                })?;
            }
        }
        let mut ids = HashSet::with_capacity(self.vertices.len());
        for (v, vertex) in self.vertices.iter().enumerate() {
            ensure(ids.insert(vertex.id), || format!("vertex {v} repeats id {}", vertex.id))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::background::SimplexBackgroundMesh;

    fn square() -> CutMesh {
        let bg = SimplexBackgroundMesh::new(
            2,
            vec![vec![0.0, 0.0], vec![1.0, 0.0], vec![1.0, 1.0], vec![0.0, 1.0]],
            vec![vec![0, 1, 2], vec![0, 2, 3]],
        )
        .unwrap();
        CutMesh::from_background(&bg).unwrap()
    }

    fn midpoint(index: usize) -> NewVertex {
        NewVertex {
            index,
            id: 5,
            owner: 0,
            coords: vec![0.5, 0.5],
            parent: EntityRef::new(0, EntityRank::Edge),
            groups: vec![(0, vec![0.5, 0.5]), (1, vec![0.5, 0.0])],
        }
    }

    #[test]
    fn seeded_from_background() {
        let mesh = square();
        assert_eq!(mesh.num_vertices(), 4);
        assert_eq!(mesh.num_cells(), 2);
        assert_eq!(mesh.vertex_group(1).unwrap().local_coords(1, 3).unwrap(), &[0.0, 1.0]);
        assert_eq!(mesh.max_vertex_id(), 4);
        mesh.validate_invariants().unwrap();
    }

    #[test]
    fn commits_split_a_cell() {
        let mut mesh = square();
        mesh.commit_vertices(vec![midpoint(4)]).unwrap();
        mesh.commit_cells(vec![
            NewCell { vertices: vec![0, 1, 4], topology: CellTopology::Tri3, group: 0, replaces: Some(0) },
            NewCell { vertices: vec![1, 2, 4], topology: CellTopology::Tri3, group: 0, replaces: None },
        ])
        .unwrap();
        assert_eq!(mesh.num_cells(), 3);
        assert_eq!(mesh.cell_group(0).unwrap().cells, vec![0, 2]);
        assert_eq!(mesh.cell(0).unwrap().vertices, vec![0, 1, 4]);
        mesh.validate_invariants().unwrap();
    }

    #[test]
    fn rejected_commit_leaves_mesh_untouched() {
        let mut mesh = square();
        let before = mesh.clone();
        assert!(mesh.commit_vertices(vec![midpoint(7)]).is_err());
        let err = mesh.commit_cells(vec![
            NewCell { vertices: vec![0, 1, 2], topology: CellTopology::Tri3, group: 0, replaces: Some(0) },
            NewCell { vertices: vec![0, 1, 9], topology: CellTopology::Tri3, group: 0, replaces: None },
        ]);
        assert!(err.is_err());
        assert_eq!(mesh, before);
    }

    #[test]
    fn rollback_restores_checkpoint() {
        let mut mesh = square();
        let checkpoint = mesh.checkpoint();
        mesh.commit_vertices(vec![midpoint(4)]).unwrap();
        mesh.rollback(checkpoint);
        assert_eq!(mesh.num_vertices(), 4);
        assert!(!mesh.vertex_group(0).unwrap().contains(4));
    }

    fn split_both(mesh: &mut CutMesh) {
        mesh.commit_vertices(vec![midpoint(mesh.num_vertices())]).unwrap();
        let m = mesh.num_vertices() - 1;
        mesh.commit_cells(vec![
            NewCell { vertices: vec![0, 1, m], topology: CellTopology::Tri3, group: 0, replaces: Some(0) },
            NewCell { vertices: vec![1, 2, m], topology: CellTopology::Tri3, group: 0, replaces: None },
            NewCell { vertices: vec![0, m, 3], topology: CellTopology::Tri3, group: 1, replaces: Some(1) },
        ])
        .unwrap();
    }

    #[test]
    fn rollback_undoes_overwritten_and_appended_cells() {
        let mut mesh = square();
        split_both(&mut mesh);
        let before = mesh.clone();

        let checkpoint = mesh.checkpoint();
        mesh.commit_vertices(vec![midpoint(5)]).unwrap();
        mesh.commit_cells(vec![
            NewCell { vertices: vec![0, 1, 5], topology: CellTopology::Tri3, group: 0, replaces: Some(0) },
            NewCell { vertices: vec![0, 5, 4], topology: CellTopology::Tri3, group: 0, replaces: None },
        ])
        .unwrap();
        // the same slot again in a later commit of the pass
        mesh.commit_cells(vec![NewCell {
            vertices: vec![1, 4, 5],
            topology: CellTopology::Tri3,
            group: 0,
            replaces: Some(0),
        }])
        .unwrap();
        assert_eq!(mesh.num_cells(), 4);

        mesh.rollback(checkpoint);
        assert_eq!(mesh, before);
        mesh.validate_invariants().unwrap();
    }

    #[test]
    fn released_checkpoint_keeps_the_pass() {
        let mut mesh = square();
        let checkpoint = mesh.checkpoint();
        split_both(&mut mesh);
        mesh.release(checkpoint);

        let mut expected = square();
        split_both(&mut expected);
        assert_eq!(mesh, expected);
        assert_eq!(mesh.num_cells(), 3);
    }
}
