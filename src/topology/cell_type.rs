//! Reference cell topologies and entity ranks.
//!
//! The decomposition only operates on linear simplices. Corner and edge
//! numbering follows the usual reference layout:
//!
//! - [`CellTopology::Tri3`]: corners `(0,1,2)` counter-clockwise, edges
//!   `e0=(0,1)`, `e1=(1,2)`, `e2=(2,0)`.
//! - [`CellTopology::Tet4`]: corners `(0,1,2,3)`, edges `e0=(0,1)`,
//!   `e1=(1,2)`, `e2=(0,2)`, `e3=(0,3)`, `e4=(1,3)`, `e5=(2,3)`.
//!
//! Edge ordinals are what the cut classifier encodes into permutation keys, so
//! this table must never change.

use crate::mesh_error::MeshDecompError;
use serde::{Deserialize, Serialize};

/// Topological rank of a mesh entity.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize, Deserialize)]
pub enum EntityRank {
    /// 0D vertex.
    Node,
    /// 1D edge.
    Edge,
    /// 2D face.
    Face,
    /// Top-dimensional cell.
    Element,
}

impl EntityRank {
    /// Numeric rank (0 for nodes, 3 for elements).
    pub fn as_u8(self) -> u8 {
        match self {
            EntityRank::Node => 0,
            EntityRank::Edge => 1,
            EntityRank::Face => 2,
            EntityRank::Element => 3,
        }
    }

    /// Inverse of [`EntityRank::as_u8`].
    pub fn from_u8(raw: u8) -> Option<Self> {
        match raw {
            0 => Some(EntityRank::Node),
            1 => Some(EntityRank::Edge),
            2 => Some(EntityRank::Face),
            3 => Some(EntityRank::Element),
            _ => None,
        }
    }
}

/// A background mesh entity addressed by local index and rank.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize, Deserialize)]
pub struct EntityRef {
    pub index: usize,
    pub rank: EntityRank,
}

impl EntityRef {
    pub const fn new(index: usize, rank: EntityRank) -> Self {
        Self { index, rank }
    }
}

/// Linear simplex topologies supported by the decomposition.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Serialize, Deserialize)]
pub enum CellTopology {
    /// 3-node triangle.
    Tri3,
    /// 4-node tetrahedron.
    Tet4,
}

const TRI3_EDGES: [[usize; 2]; 3] = [[0, 1], [1, 2], [2, 0]];
const TET4_EDGES: [[usize; 2]; 6] = [[0, 1], [1, 2], [0, 2], [0, 3], [1, 3], [2, 3]];

const TRI3_CORNERS: [[f64; 2]; 3] = [[0.0, 0.0], [1.0, 0.0], [0.0, 1.0]];
const TET4_CORNERS: [[f64; 3]; 4] = [
    [0.0, 0.0, 0.0],
    [1.0, 0.0, 0.0],
    [0.0, 1.0, 0.0],
    [0.0, 0.0, 1.0],
];

impl CellTopology {
    /// Simplex topology for a spatial dimension.
    pub fn for_dimension(dim: usize) -> Result<Self, MeshDecompError> {
        match dim {
            2 => Ok(CellTopology::Tri3),
            3 => Ok(CellTopology::Tet4),
            d => Err(MeshDecompError::UnsupportedSpatialDimension(d)),
        }
    }

    /// Topological dimension.
    pub fn dimension(self) -> usize {
        match self {
            CellTopology::Tri3 => 2,
            CellTopology::Tet4 => 3,
        }
    }

    /// Number of corner vertices.
    pub fn num_vertices(self) -> usize {
        self.dimension() + 1
    }

    /// Number of edges.
    pub fn num_edges(self) -> usize {
        self.node_to_edge_map().len()
    }

    /// Dimension of the parametric coordinates of a point inside the cell.
    pub fn local_coord_dim(self) -> usize {
        self.dimension()
    }

    /// Largest number of intersected edges a single interface can produce.
    pub fn max_intersected_edges(self) -> usize {
        match self {
            CellTopology::Tri3 => 2,
            CellTopology::Tet4 => 4,
        }
    }

    /// Edge ordinal → corner ordinals.
    pub fn node_to_edge_map(self) -> &'static [[usize; 2]] {
        match self {
            CellTopology::Tri3 => &TRI3_EDGES,
            CellTopology::Tet4 => &TET4_EDGES,
        }
    }

    /// Corner ordinals of edge `ordinal`.
    pub fn edge_vertices(self, ordinal: usize) -> Result<[usize; 2], MeshDecompError> {
        let map = self.node_to_edge_map();
        map.get(ordinal)
            .copied()
            .ok_or(MeshDecompError::IndexOutOfBounds {
                what: "edge ordinal",
                index: ordinal,
                len: map.len(),
            })
    }

    /// Corner shared by two distinct edges, or `None` when the edges are
    /// opposite (3D) or identical.
    pub fn shared_vertex_between_edges(
        self,
        first: usize,
        second: usize,
    ) -> Result<Option<usize>, MeshDecompError> {
        let a = self.edge_vertices(first)?;
        let b = self.edge_vertices(second)?;
        if first == second {
            return Ok(None);
        }
        Ok(a.into_iter().find(|v| b.contains(v)))
    }

    /// The corner at the other end of `edge` from `corner`.
    pub fn opposite_vertex_on_edge(self, edge: usize, corner: usize) -> Result<usize, MeshDecompError> {
        let [a, b] = self.edge_vertices(edge)?;
        if corner == a {
            Ok(b)
        } else if corner == b {
            Ok(a)
        } else {
            Err(MeshDecompError::InvariantViolation(format!(
                "corner {corner} is not on edge {edge} of {self:?}"
            )))
        }
    }

    /// Edge ordinal joining two corners.
    pub fn edge_between(self, a: usize, b: usize) -> Option<usize> {
        self.node_to_edge_map()
            .iter()
            .position(|e| (e[0] == a && e[1] == b) || (e[0] == b && e[1] == a))
    }

    /// Parametric coordinates of a corner in the reference cell.
    pub fn reference_corner(self, corner: usize) -> Result<&'static [f64], MeshDecompError> {
        let out_of_range = MeshDecompError::IndexOutOfBounds {
            what: "corner",
            index: corner,
            len: self.num_vertices(),
        };
        match self {
            CellTopology::Tri3 => TRI3_CORNERS.get(corner).map(|c| c.as_slice()),
            CellTopology::Tet4 => TET4_CORNERS.get(corner).map(|c| c.as_slice()),
        }
        .ok_or(out_of_range)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tet_shared_vertices() {
        let tet = CellTopology::Tet4;
        assert_eq!(tet.shared_vertex_between_edges(0, 2).unwrap(), Some(0));
        assert_eq!(tet.shared_vertex_between_edges(1, 4).unwrap(), Some(1));
        // (0,1) and (2,3) are opposite
        assert_eq!(tet.shared_vertex_between_edges(0, 5).unwrap(), None);
        assert_eq!(tet.shared_vertex_between_edges(1, 3).unwrap(), None);
        assert_eq!(tet.shared_vertex_between_edges(2, 4).unwrap(), None);
        assert_eq!(tet.shared_vertex_between_edges(3, 3).unwrap(), None);
        assert!(tet.shared_vertex_between_edges(0, 6).is_err());
    }

    #[test]
    fn every_triangle_edge_pair_shares_a_corner() {
        let tri = CellTopology::Tri3;
        for a in 0..3 {
            for b in 0..3 {
                if a != b {
                    assert!(tri.shared_vertex_between_edges(a, b).unwrap().is_some());
                }
            }
        }
    }

    #[test]
    fn edge_lookup_is_symmetric() {
        let tet = CellTopology::Tet4;
        for (ord, [a, b]) in tet.node_to_edge_map().iter().copied().enumerate() {
            assert_eq!(tet.edge_between(a, b), Some(ord));
            assert_eq!(tet.edge_between(b, a), Some(ord));
            assert_eq!(tet.opposite_vertex_on_edge(ord, a).unwrap(), b);
        }
        assert!(tet.opposite_vertex_on_edge(0, 3).is_err());
    }

    #[test]
    fn dimension_dispatch() {
        assert_eq!(CellTopology::for_dimension(2).unwrap(), CellTopology::Tri3);
        assert_eq!(CellTopology::for_dimension(3).unwrap(), CellTopology::Tet4);
        assert_eq!(
            CellTopology::for_dimension(4),
            Err(MeshDecompError::UnsupportedSpatialDimension(4))
        );
    }
}
