//! Cut-pattern classification.
//!
//! A cut cell is described by its intersected edges, each paired with the
//! vertex inserted on it. The pairs are put in a canonical order (by edge
//! ordinal in 2D, by inserted-vertex global id in 3D) and the ordered edge
//! ordinals are folded into a [`PermutationKey`]:
//!
//! | dim | cut edges | key                                      |
//! |-----|-----------|------------------------------------------|
//! | 2   | 1         | `o + 10`                                 |
//! | 2   | 2         | `o0 + o1`                                |
//! | 3   | 1         | `10000 + o`                              |
//! | 3   | 2         | `10000 + 100 (oL + 1) + 10 (oH + 1)`     |
//! | 3   | 3         | `oL + 10 oM + 100 oH`                    |
//! | 3   | 4         | `oL + 10 oML + 100 oMH + 1000 oH`        |
//!
//! Keys are only unique together with the cut-edge count (a 4-edge key with
//! `oH = 0` is a valid 3-edge key), so the count travels with the key.
//!
//! The canonical node list handed to the rewriter is the cell's corners in
//! [`corner_order`] followed by the inserted vertices in canonical order.

use crate::mesh_error::MeshDecompError;
use crate::topology::cell_type::CellTopology;
use serde::{Deserialize, Serialize};

/// Discrete cut-pattern key.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize, Deserialize)]
pub struct PermutationKey {
    pub dim: usize,
    pub edge_count: usize,
    pub value: u32,
}

impl PermutationKey {
    fn missing(self) -> MeshDecompError {
        MeshDecompError::MissingTemplate {
            dim: self.dim,
            edge_count: self.edge_count,
            key: self.value,
        }
    }
}

/// An intersected edge of a cell and the vertex inserted on it.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct CutEdge {
    /// Edge ordinal within the cell.
    pub ordinal: usize,
    /// Cut-mesh index of the inserted vertex.
    pub vertex: usize,
    /// Global id of the inserted vertex.
    pub vertex_id: u64,
}

/// Result of classifying one cut cell.
#[derive(Clone, Debug, PartialEq)]
pub struct ClassifiedCell {
    pub cell: usize,
    pub topology: CellTopology,
    pub key: PermutationKey,
    /// Corners in canonical order, then inserted vertices in canonical order.
    pub canonical_nodes: Vec<usize>,
}

/// Put cut edges in canonical order.
pub fn sort_cut_edges(topology: CellTopology, cuts: &mut [CutEdge]) {
    match topology {
        CellTopology::Tri3 => sort_cut_edges_2d(cuts),
        CellTopology::Tet4 => sort_cut_edges_3d(cuts),
    }
}

fn sort_cut_edges_2d(cuts: &mut [CutEdge]) {
    cuts.sort_by_key(|c| c.ordinal);
}

fn sort_cut_edges_3d(cuts: &mut [CutEdge]) {
    cuts.sort_by_key(|c| (c.vertex_id, c.ordinal));
}

/// Classify a cut cell with corner vertices `corners` (cell order).
pub fn classify_cut_cell(
    cell: usize,
    topology: CellTopology,
    corners: &[usize],
    cuts: &[CutEdge],
) -> Result<ClassifiedCell, MeshDecompError> {
    let n = cuts.len();
    let max = topology.max_intersected_edges();
    if n > max {
        return Err(MeshDecompError::TooManyIntersectedEdges {
            cell,
            count: n,
            max,
            dim: topology.dimension(),
        });
    }
    if corners.len() != topology.num_vertices() {
        return Err(MeshDecompError::InvariantViolation(format!(
            "cell {cell} has {} corners, {topology:?} needs {}",
            corners.len(),
            topology.num_vertices()
        )));
    }

    let mut sorted = cuts.to_vec();
    sort_cut_edges(topology, &mut sorted);
    let ordinals: Vec<usize> = sorted.iter().map(|c| c.ordinal).collect();
    let invalid = |reason| MeshDecompError::InvalidCutPattern {
        cell,
        edges: ordinals.clone(),
        reason,
    };
    if n == 0 {
        return Err(invalid("no intersected edges"));
    }
    if ordinals.iter().any(|&o| o >= topology.num_edges()) {
        return Err(invalid("edge ordinal out of range"));
    }
    if (1..n).any(|i| ordinals[..i].contains(&ordinals[i])) {
        return Err(invalid("edge cut twice"));
    }

    let order = corner_order(topology, &ordinals).map_err(invalid)?;
    let value = permutation_key(topology, &ordinals);
    let canonical_nodes = order
        .iter()
        .map(|&c| corners[c])
        .chain(sorted.iter().map(|c| c.vertex))
        .collect();

    Ok(ClassifiedCell {
        cell,
        topology,
        key: PermutationKey {
            dim: topology.dimension(),
            edge_count: n,
            value,
        },
        canonical_nodes,
    })
}

/// Key of canonically ordered cut-edge ordinals.
pub fn permutation_key(topology: CellTopology, ordinals: &[usize]) -> u32 {
    let o: Vec<u32> = ordinals.iter().map(|&o| o as u32).collect();
    match (topology, o.as_slice()) {
        (CellTopology::Tri3, [a]) => a + 10,
        (CellTopology::Tri3, [a, b]) => a + b,
        (CellTopology::Tet4, [a]) => 10000 + a,
        (CellTopology::Tet4, [l, h]) => 10000 + 100 * (l + 1) + 10 * (h + 1),
        (_, digits) => digits
            .iter()
            .rev()
            .fold(0, |acc, d| acc * 10 + d),
    }
}

/// Recover the canonically ordered ordinals of a key.
pub fn decode_key(topology: CellTopology, key: PermutationKey) -> Result<Vec<usize>, MeshDecompError> {
    if key.dim != topology.dimension() {
        return Err(key.missing());
    }
    let v = key.value as usize;
    let ordinals = match (topology, key.edge_count) {
        (CellTopology::Tri3, 1) => vec![v.checked_sub(10).ok_or_else(|| key.missing())?],
        (CellTopology::Tri3, 2) => match v {
            1 => vec![0, 1],
            2 => vec![0, 2],
            3 => vec![1, 2],
            _ => return Err(key.missing()),
        },
        (CellTopology::Tet4, 1) => vec![v.checked_sub(10000).ok_or_else(|| key.missing())?],
        (CellTopology::Tet4, 2) => {
            let r = v.checked_sub(10000).ok_or_else(|| key.missing())?;
            let l = (r / 100).checked_sub(1).ok_or_else(|| key.missing())?;
            let h = (r / 10 % 10).checked_sub(1).ok_or_else(|| key.missing())?;
            vec![l, h]
        }
        (CellTopology::Tet4, n @ (3 | 4)) => (0..n).map(|i| v / 10usize.pow(i as u32) % 10).collect(),
        _ => return Err(key.missing()),
    };
    let distinct = (1..ordinals.len()).all(|i| !ordinals[..i].contains(&ordinals[i]));
    if !distinct
        || ordinals.iter().any(|&o| o >= topology.num_edges())
        || permutation_key(topology, &ordinals) != key.value
    {
        return Err(key.missing());
    }
    Ok(ordinals)
}

/// Corner ordinals of the cell in canonical order for the given canonically
/// ordered cut edges, or the reason the pattern is not supported.
///
/// Corners stay in cell order except for three and four cut edges in 3D:
/// - three edges must meet at one corner `N0`; `N1..N3` are the far ends of
///   the low, mid and high edges;
/// - four edges must split the corners two against two; the order is built
///   from the corners shared by neighbouring cut edges, with one branch per
///   choice of the opposite (non-touching) edge pair.
pub fn corner_order(topology: CellTopology, ordinals: &[usize]) -> Result<Vec<usize>, &'static str> {
    let shared = |a: usize, b: usize| {
        topology
            .shared_vertex_between_edges(a, b)
            .map_err(|_| "edge ordinal out of range")
    };
    let far_end = |edge: usize, corner: usize| {
        topology
            .opposite_vertex_on_edge(edge, corner)
            .map_err(|_| "cut edges do not meet at one corner")
    };
    let identity: Vec<usize> = (0..topology.num_vertices()).collect();

    match (topology, ordinals) {
        (CellTopology::Tri3, [_] | [_, _]) | (CellTopology::Tet4, [_]) => Ok(identity),
        (CellTopology::Tet4, &[l, h]) => {
            shared(l, h)?.ok_or("two cut edges on opposite sides of the cell")?;
            Ok(identity)
        }
        (CellTopology::Tet4, &[l, m, h]) => {
            let n0 = shared(l, m)?.ok_or("low and mid cut edges share no corner")?;
            if shared(l, h)? != Some(n0) || shared(m, h)? != Some(n0) {
                return Err("cut edges do not meet at one corner");
            }
            Ok(vec![n0, far_end(l, n0)?, far_end(m, n0)?, far_end(h, n0)?])
        }
        (CellTopology::Tet4, &[l, ml, mh, h]) => {
            let pairs = if shared(l, h)?.is_none() {
                [(h, mh), (h, ml), (l, mh), (l, ml)]
            } else if shared(mh, h)?.is_none() {
                [(h, l), (h, ml), (l, mh), (ml, mh)]
            } else if shared(ml, h)?.is_none() {
                [(h, l), (h, mh), (l, ml), (ml, mh)]
            } else {
                return Err("no pair of cut edges is opposite");
            };
            let mut order = Vec::with_capacity(4);
            for (a, b) in pairs {
                let corner = shared(a, b)?.ok_or("four cut edges do not split the corners two against two")?;
                if order.contains(&corner) {
                    return Err("four cut edges do not split the corners two against two");
                }
                order.push(corner);
            }
            let uncut: Vec<usize> = (0..topology.num_edges())
                .filter(|e| !ordinals.contains(e))
                .collect();
            if shared(uncut[0], uncut[1])?.is_some() {
                return Err("four cut edges do not split the corners two against two");
            }
            Ok(order)
        }
        _ => Err("unsupported number of cut edges"),
    }
}
