//! Subdivision templates and their process-wide cache.
//!
//! A template lists the children of a cut cell as slot indices into the
//! canonical node list: slots `0..=dim` are the corners in canonical order,
//! the following slots the inserted vertices in canonical order.
//!
//! Templates are generated from the key on first use. Cut regions that are
//! not simplices are split as follows:
//!
//! - a quadrilateral (2D) is split from the first inserted vertex;
//! - a pyramid (3D) is split along the diagonal of its base through the
//!   lowest-ranked base vertex;
//! - a prism (3D) is split with the lowest-ranked vertex as the common apex
//!   of its two quadrilateral faces, the third face along its diagonal
//!   through its lowest-ranked vertex.
//!
//! Inserted vertices rank before corners and among themselves in slot order.
//! In 3D that order is the global-id order, so two cells sharing a face
//! always split it along the same diagonal.

use crate::decomposition::classifier::{PermutationKey, corner_order, decode_key};
use crate::mesh_error::MeshDecompError;
use crate::topology::cell_type::CellTopology;
use hashbrown::HashMap;
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use std::sync::Arc;

/// Children of one cut pattern, as slots into the canonical node list.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SubdivisionTemplate {
    pub key: PermutationKey,
    pub child_topology: CellTopology,
    /// Corners plus inserted vertices.
    pub num_input_nodes: usize,
    pub children: Vec<Vec<usize>>,
}

impl SubdivisionTemplate {
    pub fn child_count(&self) -> usize {
        self.children.len()
    }

    /// Generate the template of `key`.
    pub fn build(key: PermutationKey) -> Result<Self, MeshDecompError> {
        let topology = CellTopology::for_dimension(key.dim)?;
        let ordinals = decode_key(topology, key)?;
        let missing = || MeshDecompError::MissingTemplate {
            dim: key.dim,
            edge_count: key.edge_count,
            key: key.value,
        };
        let order = corner_order(topology, &ordinals).map_err(|_| missing())?;
        let layout = SlotLayout::new(topology, &order, &ordinals);

        let children = match (topology, ordinals.len()) {
            (CellTopology::Tri3, 1) => tri_one_cut(&layout)?,
            (CellTopology::Tri3, 2) => tri_two_cuts(&layout)?,
            (CellTopology::Tet4, 1) => tet_one_cut(&layout)?,
            (CellTopology::Tet4, 2) => tet_two_cuts(&layout)?,
            (CellTopology::Tet4, 3) => tet_three_cuts(&layout),
            (CellTopology::Tet4, 4) => tet_four_cuts(&layout)?,
            _ => return Err(missing()),
        };
        Ok(Self {
            key,
            child_topology: topology,
            num_input_nodes: topology.num_vertices() + ordinals.len(),
            children,
        })
    }
}

/// Slot bookkeeping for one key: which slot holds which corner and which
/// slot holds the vertex of which cut edge.
struct SlotLayout {
    topology: CellTopology,
    corner_of_slot: Vec<usize>,
    ordinals: Vec<usize>,
}

impl SlotLayout {
    fn new(topology: CellTopology, order: &[usize], ordinals: &[usize]) -> Self {
        Self {
            topology,
            corner_of_slot: order.to_vec(),
            ordinals: ordinals.to_vec(),
        }
    }

    fn num_corners(&self) -> usize {
        self.corner_of_slot.len()
    }

    /// Corner slots of the `i`-th cut edge.
    fn edge_slots(&self, i: usize) -> Result<[usize; 2], MeshDecompError> {
        let [a, b] = self.topology.edge_vertices(self.ordinals[i])?;
        Ok([self.slot_of_corner(a)?, self.slot_of_corner(b)?])
    }

    fn slot_of_corner(&self, corner: usize) -> Result<usize, MeshDecompError> {
        self.corner_of_slot
            .iter()
            .position(|&c| c == corner)
            .ok_or_else(|| MeshDecompError::InvariantViolation(format!("corner {corner} has no slot")))
    }

    /// Slot of the vertex inserted on the edge between two corner slots.
    fn cut_slot(&self, a: usize, b: usize) -> Option<usize> {
        let edge = self
            .topology
            .edge_between(self.corner_of_slot[a], self.corner_of_slot[b])?;
        self.ordinals
            .iter()
            .position(|&o| o == edge)
            .map(|i| self.num_corners() + i)
    }

    /// Corner slots not in `used`.
    fn other_corners(&self, used: &[usize]) -> Vec<usize> {
        (0..self.num_corners()).filter(|s| !used.contains(s)).collect()
    }

    fn rank(&self, slot: usize) -> usize {
        let nc = self.num_corners();
        if slot >= nc { slot - nc } else { 1000 + slot }
    }

    /// Shared corner slot and far-end slots of cut edges `i` and `j`.
    fn fan(&self, i: usize, j: usize) -> Result<(usize, usize, usize), MeshDecompError> {
        let [a0, a1] = self.edge_slots(i)?;
        let [b0, b1] = self.edge_slots(j)?;
        let s = if a0 == b0 || a0 == b1 {
            a0
        } else if a1 == b0 || a1 == b1 {
            a1
        } else {
            return Err(MeshDecompError::InvariantViolation(
                "cut edges of a fan share no corner".into(),
            ));
        };
        let p = if a0 == s { a1 } else { a0 };
        let q = if b0 == s { b1 } else { b0 };
        Ok((s, p, q))
    }
}

fn tri_one_cut(l: &SlotLayout) -> Result<Vec<Vec<usize>>, MeshDecompError> {
    let [a, b] = l.edge_slots(0)?;
    let c = l.other_corners(&[a, b])[0];
    let m = l.num_corners();
    Ok(vec![vec![a, m, c], vec![m, b, c]])
}

fn tri_two_cuts(l: &SlotLayout) -> Result<Vec<Vec<usize>>, MeshDecompError> {
    let (s, p, q) = l.fan(0, 1)?;
    let (lo, hi) = (l.num_corners(), l.num_corners() + 1);
    Ok(vec![vec![s, lo, hi], vec![lo, p, q], vec![lo, q, hi]])
}

fn tet_one_cut(l: &SlotLayout) -> Result<Vec<Vec<usize>>, MeshDecompError> {
    let [a, b] = l.edge_slots(0)?;
    let rest = l.other_corners(&[a, b]);
    let (c, d) = (rest[0], rest[1]);
    let m = l.num_corners();
    Ok(vec![vec![a, m, c, d], vec![m, b, c, d]])
}

fn tet_two_cuts(l: &SlotLayout) -> Result<Vec<Vec<usize>>, MeshDecompError> {
    let (s, p, q) = l.fan(0, 1)?;
    let r = l.other_corners(&[s, p, q])[0];
    let (lo, hi) = (l.num_corners(), l.num_corners() + 1);
    let mut children = vec![vec![s, lo, hi, r]];
    children.extend(split_pyramid(l, r, [lo, p, q, hi]));
    Ok(children)
}

fn tet_three_cuts(l: &SlotLayout) -> Vec<Vec<usize>> {
    // slot 0 is the corner all three cut edges meet at, slots 1..=3 their far
    // ends in the order of the inserted vertices 4..=6
    let mut children = vec![vec![0, 4, 5, 6]];
    children.extend(split_prism(l, [1, 2, 3, 4, 5, 6]));
    children
}

fn tet_four_cuts(l: &SlotLayout) -> Result<Vec<Vec<usize>>, MeshDecompError> {
    let a0 = 0;
    let a1 = (1..4)
        .find(|&s| l.cut_slot(a0, s).is_none())
        .ok_or_else(|| MeshDecompError::InvariantViolation("corner 0 is cut from every corner".into()))?;
    let b = l.other_corners(&[a0, a1]);
    let (b0, b1) = (b[0], b[1]);
    let m = |a: usize, b: usize| {
        l.cut_slot(a, b).ok_or_else(|| {
            MeshDecompError::InvariantViolation(format!("edge between slots {a} and {b} is not cut"))
        })
    };
    let (m00, m01, m10, m11) = (m(a0, b0)?, m(a0, b1)?, m(a1, b0)?, m(a1, b1)?);
    let mut children = Vec::with_capacity(6);
    children.extend(split_prism(l, [a0, m00, m01, a1, m10, m11]));
    children.extend(split_prism(l, [b0, m00, m10, b1, m01, m11]));
    Ok(children)
}

/// Split a pyramid with apex `apex` over the quadrilateral `quad` (cyclic).
fn split_pyramid(l: &SlotLayout, apex: usize, quad: [usize; 4]) -> [Vec<usize>; 2] {
    let [q0, q1, q2, q3] = quad;
    let best = quad.iter().copied().min_by_key(|&s| l.rank(s)).unwrap_or(q0);
    if best == q0 || best == q2 {
        [vec![apex, q0, q1, q2], vec![apex, q0, q2, q3]]
    } else {
        [vec![apex, q1, q2, q3], vec![apex, q1, q3, q0]]
    }
}

/// Relabelings of a prism `[b0, b1, b2, t0, t1, t2]` (bottom, top; `bi` below
/// `ti`) that bring vertex `i` to position 0.
const PRISM_RELABEL: [[usize; 6]; 6] = [
    [0, 1, 2, 3, 4, 5],
    [1, 2, 0, 4, 5, 3],
    [2, 0, 1, 5, 3, 4],
    [3, 5, 4, 0, 2, 1],
    [4, 3, 5, 1, 0, 2],
    [5, 4, 3, 2, 1, 0],
];

/// Split a prism into three tetrahedra.
fn split_prism(l: &SlotLayout, prism: [usize; 6]) -> [Vec<usize>; 3] {
    let first = (0..6).min_by_key(|&i| l.rank(prism[i])).unwrap_or(0);
    let w = PRISM_RELABEL[first].map(|i| prism[i]);
    let r = |i: usize| l.rank(w[i]);
    if r(1).min(r(5)) < r(2).min(r(4)) {
        [
            vec![w[0], w[1], w[2], w[5]],
            vec![w[0], w[1], w[5], w[4]],
            vec![w[0], w[4], w[5], w[3]],
        ]
    } else {
        [
            vec![w[0], w[1], w[2], w[4]],
            vec![w[0], w[4], w[2], w[5]],
            vec![w[0], w[4], w[5], w[3]],
        ]
    }
}

/// Memoized template lookup.
#[derive(Debug, Default)]
pub struct TemplateLibrary {
    cache: RwLock<HashMap<PermutationKey, Arc<SubdivisionTemplate>>>,
}

static GLOBAL: Lazy<Arc<TemplateLibrary>> = Lazy::new(|| Arc::new(TemplateLibrary::new()));

impl TemplateLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide library.
    pub fn global() -> Arc<TemplateLibrary> {
        GLOBAL.clone()
    }

    /// Template for `key`, generated on first use. A key that does not
    /// describe a supported cut pattern of `spatial_dim` is an error.
    pub fn load_template(
        &self,
        spatial_dim: usize,
        key: PermutationKey,
    ) -> Result<Arc<SubdivisionTemplate>, MeshDecompError> {
        if key.dim != spatial_dim {
            return Err(MeshDecompError::MissingTemplate {
                dim: spatial_dim,
                edge_count: key.edge_count,
                key: key.value,
            });
        }
        if let Some(t) = self.cache.read().get(&key) {
            return Ok(t.clone());
        }
        let built = Arc::new(SubdivisionTemplate::build(key)?);
        log::trace!(
            "generated template {} ({}D, {} cut edges): {} children",
            key.value,
            key.dim,
            key.edge_count,
            built.child_count()
        );
        Ok(self.cache.write().entry(key).or_insert(built).clone())
    }

    pub fn contains(&self, key: &PermutationKey) -> bool {
        self.cache.read().contains_key(key)
    }

    /// Number of cached templates.
    pub fn len(&self) -> usize {
        self.cache.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.cache.write().clear();
    }
}
