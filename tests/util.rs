#![allow(dead_code)]
use mesh_decomp::data::cut_mesh::CutMesh;
use mesh_decomp::geometry::engine::{
    AdmittedNode, EdgeIntersection, EdgeQuery, GeometryEngine, QueuedIntersection,
};
use mesh_decomp::geometry::quality::signed_measure;
use mesh_decomp::mesh_error::MeshDecompError;
use mesh_decomp::topology::background::SimplexBackgroundMesh;
use mesh_decomp::topology::cell_type::CellTopology;
use std::collections::{HashMap, HashSet};

/// Reference tetrahedron, vertex ids 1..=4.
pub fn unit_tet() -> SimplexBackgroundMesh {
    SimplexBackgroundMesh::new(
        3,
        vec![
            vec![0.0, 0.0, 0.0],
            vec![1.0, 0.0, 0.0],
            vec![0.0, 1.0, 0.0],
            vec![0.0, 0.0, 1.0],
        ],
        vec![vec![0, 1, 2, 3]],
    )
    .unwrap()
}

/// Reference triangle, vertex ids 1..=3.
pub fn unit_triangle() -> SimplexBackgroundMesh {
    SimplexBackgroundMesh::new(
        2,
        vec![vec![0.0, 0.0], vec![1.0, 0.0], vec![0.0, 1.0]],
        vec![vec![0, 1, 2]],
    )
    .unwrap()
}

/// Engine answering edge queries from a script keyed by endpoint global ids.
/// Every cell counts as intersected.
#[derive(Debug, Default)]
pub struct ScriptedEngine {
    num_geometries: usize,
    /// `(geometry, smaller id, larger id)` → position from the smaller id.
    crossings: HashMap<(usize, u64, u64), f64>,
    touching: HashSet<(usize, u64)>,
    queued: Option<QueuedIntersection>,
    admitted: Vec<AdmittedNode>,
    flags: HashSet<(usize, usize)>,
    pass_admitted: usize,
    pass_flags: Vec<(usize, usize)>,
}

impl ScriptedEngine {
    pub fn new(num_geometries: usize) -> Self {
        Self {
            num_geometries,
            ..Self::default()
        }
    }

    /// Edge between vertex ids `a` and `b` is crossed at `t` measured from `a`.
    pub fn cross(mut self, geometry: usize, a: u64, b: u64, t: f64) -> Self {
        let (key, t) = if a < b { ((geometry, a, b), t) } else { ((geometry, b, a), 1.0 - t) };
        self.crossings.insert(key, t);
        self
    }

    /// Vertex id `id` lies on interface `geometry`.
    pub fn touch(mut self, geometry: usize, id: u64) -> Self {
        self.touching.insert((geometry, id));
        self
    }
}

impl GeometryEngine for ScriptedEngine {
    fn num_geometries(&self) -> usize {
        self.num_geometries
    }

    fn is_intersected_cell(&self, _: usize, _: usize, _: &[&[f64]]) -> Result<bool, MeshDecompError> {
        Ok(true)
    }

    fn geometric_query(&mut self, query: &EdgeQuery<'_>) -> Result<EdgeIntersection, MeshDecompError> {
        if self.queued.is_some() {
            return Err(MeshDecompError::QueryProtocol("query while queued".into()));
        }
        let g = query.geometry;
        let [i0, i1] = query.vertex_ids;
        let on0 = self.touching.contains(&(g, i0));
        let on1 = self.touching.contains(&(g, i1));
        if on0 || on1 {
            return Ok(EdgeIntersection {
                intersected: true,
                first_endpoint_on_interface: on0,
                second_endpoint_on_interface: on1,
                ..EdgeIntersection::default()
            });
        }
        let Some(&t_low) = self.crossings.get(&(g, i0.min(i1), i0.max(i1))) else {
            return Ok(EdgeIntersection::default());
        };
        let t = if i0 < i1 { t_low } else { 1.0 - t_low };
        let coords: Vec<f64> = query.coords[0]
            .iter()
            .zip(query.coords[1])
            .map(|(a, b)| a + t * (b - a))
            .collect();
        self.queued = Some(QueuedIntersection {
            geometry: g,
            parent_vertices: query.vertices,
            parametric_position: t,
            coords: coords.clone(),
        });
        Ok(EdgeIntersection {
            intersected: true,
            parametric_position: Some(t),
            coords: Some(coords),
            ..EdgeIntersection::default()
        })
    }

    fn queued_intersection(&self) -> Option<&QueuedIntersection> {
        self.queued.as_ref()
    }

    fn admit_queued_intersection(&mut self, node_index: usize) -> Result<(), MeshDecompError> {
        let q = self
            .queued
            .take()
            .ok_or_else(|| MeshDecompError::QueryProtocol("nothing queued".into()))?;
        self.admitted.push(AdmittedNode {
            node_index,
            geometry: q.geometry,
            parent_vertices: q.parent_vertices,
            parametric_position: q.parametric_position,
            coords: q.coords,
            id: None,
            owner: None,
        });
        Ok(())
    }

    fn discard_queued_intersection(&mut self) {
        self.queued = None;
    }

    fn induce_as_interface_vertex(&mut self, geometry: usize, vertex: usize) {
        if self.flags.insert((geometry, vertex)) {
            self.pass_flags.push((geometry, vertex));
        }
    }

    fn is_interface_vertex(&self, geometry: usize, vertex: usize) -> bool {
        self.flags.contains(&(geometry, vertex))
    }

    fn update_admitted_node(&mut self, node_index: usize, id: u64, owner: usize) -> Result<(), MeshDecompError> {
        let node = self
            .admitted
            .iter_mut()
            .find(|n| n.node_index == node_index)
            .ok_or_else(|| MeshDecompError::QueryProtocol(format!("node {node_index} unknown")))?;
        node.id = Some(id);
        node.owner = Some(owner);
        Ok(())
    }

    fn admitted_nodes(&self) -> &[AdmittedNode] {
        &self.admitted
    }

    fn begin_pass(&mut self) {
        self.queued = None;
        self.pass_admitted = self.admitted.len();
        self.pass_flags.clear();
    }

    fn rollback_pass(&mut self) {
        self.queued = None;
        self.admitted.truncate(self.pass_admitted);
        for f in self.pass_flags.drain(..) {
            self.flags.remove(&f);
        }
    }
}

/// Facets (cell edges in 2D, faces in 3D) as sorted vertex lists, with the
/// number of cells sharing each.
pub fn facet_counts(mesh: &CutMesh) -> HashMap<Vec<usize>, usize> {
    let mut counts = HashMap::new();
    for cell in mesh.cells() {
        let n = cell.vertices.len();
        for skip in 0..n {
            let mut facet: Vec<usize> = (0..n).filter(|&i| i != skip).map(|i| cell.vertices[i]).collect();
            facet.sort_unstable();
            *counts.entry(facet).or_insert(0) += 1;
        }
    }
    counts
}

/// Panics unless every facet is shared by two cells or lies on the boundary
/// of the box `[lo, hi]^d`.
pub fn assert_conforming(mesh: &CutMesh, lo: f64, hi: f64) {
    let on_boundary = |facet: &[usize]| {
        (0..mesh.spatial_dim()).any(|axis| {
            [lo, hi].iter().any(|&side| {
                facet
                    .iter()
                    .all(|&v| (mesh.vertices()[v].coords[axis] - side).abs() < 1e-12)
            })
        })
    };
    for (facet, count) in facet_counts(mesh) {
        assert!(count <= 2, "facet {facet:?} shared by {count} cells");
        if count == 1 {
            assert!(on_boundary(&facet), "hanging facet {facet:?}");
        }
    }
}

/// Sum of the absolute cell measures.
pub fn total_measure(mesh: &CutMesh) -> f64 {
    (0..mesh.num_cells())
        .map(|c| {
            let topology: CellTopology = mesh.cells()[c].topology;
            signed_measure(topology, &mesh.cell_coords(c).unwrap()).unwrap().abs()
        })
        .sum()
}

/// Panics if two vertices share coordinates or an id.
pub fn assert_unique_vertices(mesh: &CutMesh) {
    let vs = mesh.vertices();
    let ids: HashSet<u64> = vs.iter().map(|v| v.id).collect();
    assert_eq!(ids.len(), vs.len(), "duplicate vertex ids");
    for i in 0..vs.len() {
        for j in i + 1..vs.len() {
            let d: f64 = vs[i]
                .coords
                .iter()
                .zip(&vs[j].coords)
                .map(|(a, b)| (a - b).abs())
                .sum();
            assert!(d > 1e-10, "vertices {i} and {j} coincide at {:?}", vs[i].coords);
        }
    }
}

/// Panics unless every cell lies on one side of the plane `n · (x - p) = 0`.
pub fn assert_one_side(mesh: &CutMesh, point: &[f64], normal: &[f64]) {
    for (c, _) in mesh.cells().iter().enumerate() {
        let phis: Vec<f64> = mesh
            .cell_coords(c)
            .unwrap()
            .iter()
            .map(|x| normal.iter().zip(point).zip(x.iter()).map(|((n, p), xi)| n * (xi - p)).sum())
            .collect();
        let min = phis.iter().cloned().fold(f64::INFINITY, f64::min);
        let max = phis.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        assert!(min > -1e-9 || max < 1e-9, "cell {c} straddles the plane: {phis:?}");
    }
}
