//! Edge topology of the cells taking part in one interface pass.
//!
//! Edges are keyed by their sorted cut-mesh vertex pair and numbered in
//! first-encounter order while walking the cells, so the numbering is
//! deterministic for a given cell list. Each edge records every incident
//! cell together with the edge's ordinal inside that cell.
//!
//! The ancestry of an edge is the smallest background entity whose closure
//! contains both endpoints. Two endpoints on one background edge give that
//! edge, three background vertices in 3D give a face, anything else falls back
//! to the edge's representative background cell.

use crate::data::cut_mesh::CutMesh;
use crate::mesh_error::MeshDecompError;
use crate::topology::background::BackgroundMesh;
use crate::topology::cell_type::{EntityRank, EntityRef};
use hashbrown::HashMap;
use itertools::Itertools;

/// Unique edges of a cell list and their incidences.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct EdgeConnectivity {
    /// Endpoints of each edge, smaller vertex index first.
    pub edge_vertices: Vec<[usize; 2]>,
    /// Cells incident to each edge.
    pub edge_to_cell: Vec<Vec<usize>>,
    /// Ordinal of the edge inside each incident cell, parallel to `edge_to_cell`.
    pub edge_to_cell_edge_ordinal: Vec<Vec<usize>>,
}

impl EdgeConnectivity {
    pub fn num_edges(&self) -> usize {
        self.edge_vertices.len()
    }
}

/// All cells of the given cell groups, group by group.
pub fn cells_of_groups(cut_mesh: &CutMesh, groups: &[usize]) -> Result<Vec<usize>, MeshDecompError> {
    let mut cells = Vec::new();
    for &g in groups {
        cells.extend_from_slice(&cut_mesh.cell_group(g)?.cells);
    }
    Ok(cells)
}

/// Derive the unique edges of `cells`.
pub fn build_edge_connectivity(cut_mesh: &CutMesh, cells: &[usize]) -> Result<EdgeConnectivity, MeshDecompError> {
    let mut conn = EdgeConnectivity::default();
    let mut index: HashMap<[usize; 2], usize> = HashMap::new();
    for &c in cells {
        let cell = cut_mesh.cell(c)?;
        for (ordinal, [a, b]) in cell.topology.node_to_edge_map().iter().enumerate() {
            let (va, vb) = (cell.vertices[*a], cell.vertices[*b]);
            let key = [va.min(vb), va.max(vb)];
            let edge = *index.entry(key).or_insert_with(|| {
                conn.edge_vertices.push(key);
                conn.edge_to_cell.push(Vec::new());
                conn.edge_to_cell_edge_ordinal.push(Vec::new());
                conn.edge_vertices.len() - 1
            });
            conn.edge_to_cell[edge].push(c);
            conn.edge_to_cell_edge_ordinal[edge].push(ordinal);
        }
    }
    Ok(conn)
}

/// Background cell whose parametric frame is used for each edge: the group of
/// the first incident cell.
pub fn select_background_cell_for_edge(
    conn: &EdgeConnectivity,
    cut_mesh: &CutMesh,
) -> Result<Vec<usize>, MeshDecompError> {
    conn.edge_to_cell
        .iter()
        .enumerate()
        .map(|(e, cells)| {
            let &first = cells.first().ok_or(MeshDecompError::OrphanEdge(e))?;
            Ok(cut_mesh.cell_group(cut_mesh.cell(first)?.group)?.background_cell)
        })
        .collect()
}

/// Parent background entity of each edge.
pub fn deduce_edge_ancestry<B: BackgroundMesh + ?Sized>(
    conn: &EdgeConnectivity,
    cut_mesh: &CutMesh,
    background: &B,
    edge_background_cell: &[usize],
) -> Result<Vec<EntityRef>, MeshDecompError> {
    let dim = background.spatial_dim();
    conn.edge_vertices
        .iter()
        .zip(edge_background_cell)
        .map(|(&[v0, v1], &bg_cell)| {
            let p0 = cut_mesh.vertex(v0)?.parent;
            let p1 = cut_mesh.vertex(v1)?.parent;
            let union: Vec<usize> = background
                .entity_vertices(p0.index, p0.rank)?
                .into_iter()
                .chain(background.entity_vertices(p1.index, p1.rank)?)
                .sorted_unstable()
                .dedup()
                .collect();

            if union.len() < dim + 1 {
                if let Some((index, rank)) = background.find_entity(&union) {
                    return Ok(EntityRef::new(index, rank));
                }
            }
            let closure = background.cell_vertices(bg_cell)?;
            if union.iter().any(|v| !closure.contains(v)) {
                return Err(MeshDecompError::UnknownEntity(union));
            }
            Ok(EntityRef::new(bg_cell, EntityRank::Element))
        })
        .collect()
}
