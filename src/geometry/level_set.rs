//! Analytic level-set interfaces.
//!
//! Each interface is the zero set of a scalar function, negative on one side
//! and positive on the other. Crossings are located by linear interpolation of
//! the endpoint values, which is exact for planes.

use crate::geometry::engine::{AdmittedNode, EdgeIntersection, EdgeQuery, GeometryEngine, QueuedIntersection};
use crate::mesh_error::MeshDecompError;
use hashbrown::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

/// Default on-interface tolerance.
pub const DEFAULT_TOLERANCE: f64 = 1e-12;

/// Scalar field whose zero set is an interface.
#[derive(Clone)]
pub enum LevelSet {
    /// `n · (x - p)`.
    Plane { point: Vec<f64>, normal: Vec<f64> },
    /// `|x - c| - r`, negative inside.
    Sphere { center: Vec<f64>, radius: f64 },
    /// Any user function of the physical coordinates.
    Custom(Arc<dyn Fn(&[f64]) -> f64 + Send + Sync>),
}

impl fmt::Debug for LevelSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LevelSet::Plane { point, normal } => f
                .debug_struct("Plane")
                .field("point", point)
                .field("normal", normal)
                .finish(),
            LevelSet::Sphere { center, radius } => f
                .debug_struct("Sphere")
                .field("center", center)
                .field("radius", radius)
                .finish(),
            LevelSet::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

impl LevelSet {
    pub fn plane(point: &[f64], normal: &[f64]) -> Self {
        LevelSet::Plane {
            point: point.to_vec(),
            normal: normal.to_vec(),
        }
    }

    pub fn sphere(center: &[f64], radius: f64) -> Self {
        LevelSet::Sphere {
            center: center.to_vec(),
            radius,
        }
    }

    pub fn custom(f: impl Fn(&[f64]) -> f64 + Send + Sync + 'static) -> Self {
        LevelSet::Custom(Arc::new(f))
    }

    /// Field value at `x`.
    pub fn evaluate(&self, x: &[f64]) -> Result<f64, MeshDecompError> {
        match self {
            LevelSet::Plane { point, normal } => {
                check_dim(point.len(), x.len())?;
                check_dim(normal.len(), x.len())?;
                Ok(normal
                    .iter()
                    .zip(point)
                    .zip(x)
                    .map(|((n, p), xi)| n * (xi - p))
                    .sum())
            }
            LevelSet::Sphere { center, radius } => {
                check_dim(center.len(), x.len())?;
                let dist = center
                    .iter()
                    .zip(x)
                    .map(|(c, xi)| (xi - c) * (xi - c))
                    .sum::<f64>()
                    .sqrt();
                Ok(dist - radius)
            }
            LevelSet::Custom(f) => {
                let value = f(x);
                if value.is_finite() {
                    Ok(value)
                } else {
                    Err(MeshDecompError::InvalidGeometry(format!(
                        "level set is not finite at {x:?}"
                    )))
                }
            }
        }
    }
}

fn check_dim(expected: usize, got: usize) -> Result<(), MeshDecompError> {
    if expected == got {
        Ok(())
    } else {
        Err(MeshDecompError::InvalidGeometry(format!(
            "level set defined in {expected}D evaluated at a {got}D point"
        )))
    }
}

/// [`GeometryEngine`] over a list of analytic level sets.
#[derive(Debug)]
pub struct LevelSetEngine {
    level_sets: Vec<LevelSet>,
    tolerance: f64,
    queued: Option<QueuedIntersection>,
    admitted: Vec<AdmittedNode>,
    admitted_by_index: HashMap<usize, usize>,
    interface_vertices: Vec<HashSet<usize>>,
    pass_admitted_start: usize,
    pass_flags: Vec<(usize, usize)>,
}

impl LevelSetEngine {
    pub fn new(level_sets: Vec<LevelSet>) -> Self {
        let n = level_sets.len();
        Self {
            level_sets,
            tolerance: DEFAULT_TOLERANCE,
            queued: None,
            admitted: Vec::new(),
            admitted_by_index: HashMap::new(),
            interface_vertices: vec![HashSet::new(); n],
            pass_admitted_start: 0,
            pass_flags: Vec::new(),
        }
    }

    pub fn with_tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = tolerance;
        self
    }

    pub fn tolerance(&self) -> f64 {
        self.tolerance
    }

    pub fn level_set(&self, geometry: usize) -> Result<&LevelSet, MeshDecompError> {
        self.level_sets
            .get(geometry)
            .ok_or(MeshDecompError::IndexOutOfBounds {
                what: "geometry",
                index: geometry,
                len: self.level_sets.len(),
            })
    }
}

impl GeometryEngine for LevelSetEngine {
    fn num_geometries(&self) -> usize {
        self.level_sets.len()
    }

    fn set_interface_tolerance(&mut self, tolerance: f64) {
        self.tolerance = tolerance;
    }

    fn is_intersected_cell(
        &self,
        geometry: usize,
        _background_cell: usize,
        vertex_coords: &[&[f64]],
    ) -> Result<bool, MeshDecompError> {
        let ls = self.level_set(geometry)?;
        let mut min = f64::INFINITY;
        let mut max = f64::NEG_INFINITY;
        for x in vertex_coords {
            let phi = ls.evaluate(x)?;
            min = min.min(phi);
            max = max.max(phi);
        }
        Ok(min < self.tolerance && max > -self.tolerance)
    }

    fn geometric_query(&mut self, query: &EdgeQuery<'_>) -> Result<EdgeIntersection, MeshDecompError> {
        if let Some(q) = &self.queued {
            return Err(MeshDecompError::QueryProtocol(format!(
                "edge {:?} queried while the crossing on edge {:?} is still queued",
                query.vertices, q.parent_vertices
            )));
        }
        let ls = self.level_set(query.geometry)?;
        let phi0 = ls.evaluate(query.coords[0])?;
        let phi1 = ls.evaluate(query.coords[1])?;
        let on0 = phi0.abs() < self.tolerance;
        let on1 = phi1.abs() < self.tolerance;

        if on0 || on1 {
            return Ok(EdgeIntersection {
                intersected: true,
                parametric_position: None,
                first_endpoint_on_interface: on0,
                second_endpoint_on_interface: on1,
                coords: None,
            });
        }
        if phi0.signum() == phi1.signum() {
            return Ok(EdgeIntersection::default());
        }

        let t = (phi0 / (phi0 - phi1)).clamp(0.0, 1.0);
        let coords: Vec<f64> = query.coords[0]
            .iter()
            .zip(query.coords[1])
            .map(|(a, b)| a + t * (b - a))
            .collect();
        log::trace!(
            "geometry {} crosses edge {:?} at t = {t:.6}",
            query.geometry,
            query.vertices
        );
        self.queued = Some(QueuedIntersection {
            geometry: query.geometry,
            parent_vertices: query.vertices,
            parametric_position: t,
            coords: coords.clone(),
        });
        Ok(EdgeIntersection {
            intersected: true,
            parametric_position: Some(t),
            first_endpoint_on_interface: false,
            second_endpoint_on_interface: false,
            coords: Some(coords),
        })
    }

    fn queued_intersection(&self) -> Option<&QueuedIntersection> {
        self.queued.as_ref()
    }

    fn admit_queued_intersection(&mut self, node_index: usize) -> Result<(), MeshDecompError> {
        if self.admitted_by_index.contains_key(&node_index) {
            return Err(MeshDecompError::QueryProtocol(format!(
                "node {node_index} admitted twice"
            )));
        }
        let queued = self.queued.take().ok_or_else(|| {
            MeshDecompError::QueryProtocol(format!(
                "admit of node {node_index} without a queued intersection"
            ))
        })?;
        self.admitted_by_index.insert(node_index, self.admitted.len());
        self.admitted.push(AdmittedNode {
            node_index,
            geometry: queued.geometry,
            parent_vertices: queued.parent_vertices,
            parametric_position: queued.parametric_position,
            coords: queued.coords,
            id: None,
            owner: None,
        });
        Ok(())
    }

    fn discard_queued_intersection(&mut self) {
        self.queued = None;
    }

    fn induce_as_interface_vertex(&mut self, geometry: usize, vertex: usize) {
        if let Some(set) = self.interface_vertices.get_mut(geometry) {
            if set.insert(vertex) {
                self.pass_flags.push((geometry, vertex));
            }
        }
    }

    fn is_interface_vertex(&self, geometry: usize, vertex: usize) -> bool {
        let flagged = self
            .interface_vertices
            .get(geometry)
            .is_some_and(|s| s.contains(&vertex));
        flagged
            || self
                .admitted_by_index
                .get(&vertex)
                .is_some_and(|&a| self.admitted[a].geometry == geometry)
    }

    fn update_admitted_node(&mut self, node_index: usize, id: u64, owner: usize) -> Result<(), MeshDecompError> {
        let &pos = self.admitted_by_index.get(&node_index).ok_or_else(|| {
            MeshDecompError::QueryProtocol(format!("node {node_index} was never admitted"))
        })?;
        let node = &mut self.admitted[pos];
        node.id = Some(id);
        node.owner = Some(owner);
        Ok(())
    }

    fn admitted_nodes(&self) -> &[AdmittedNode] {
        &self.admitted
    }

    fn begin_pass(&mut self) {
        self.queued = None;
        self.pass_admitted_start = self.admitted.len();
        self.pass_flags.clear();
    }

    fn rollback_pass(&mut self) {
        self.queued = None;
        for node in self.admitted.drain(self.pass_admitted_start..) {
            self.admitted_by_index.remove(&node.node_index);
        }
        for (geometry, vertex) in self.pass_flags.drain(..) {
            self.interface_vertices[geometry].remove(&vertex);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn query<'a>(coords: [&'a [f64]; 2]) -> EdgeQuery<'a> {
        EdgeQuery {
            geometry: 0,
            vertices: [0, 1],
            vertex_ids: [1, 2],
            coords,
            background_cell: 0,
            local_coords: coords,
        }
    }

    #[test]
    fn plane_crossing_is_located_linearly() {
        let mut engine = LevelSetEngine::new(vec![LevelSet::plane(&[0.4, 0.0], &[1.0, 0.0])]);
        let hit = engine.geometric_query(&query([&[0.0, 0.0], &[1.0, 0.0]])).unwrap();
        assert!(hit.is_interior_crossing());
        assert!((hit.parametric_position.unwrap() - 0.4).abs() < 1e-14);
        assert!(engine.queued_intersection().is_some());
        engine.admit_queued_intersection(7).unwrap();
        assert!(engine.is_interface_vertex(0, 7));
        assert_eq!(engine.admitted_nodes().len(), 1);
    }

    #[test]
    fn queue_protocol_is_enforced() {
        let mut engine = LevelSetEngine::new(vec![LevelSet::plane(&[0.5, 0.0], &[1.0, 0.0])]);
        let edge = query([&[0.0, 0.0], &[1.0, 0.0]]);
        engine.geometric_query(&edge).unwrap();
        assert!(matches!(engine.geometric_query(&edge), Err(MeshDecompError::QueryProtocol(_))));
        engine.admit_queued_intersection(4).unwrap();
        assert!(matches!(
            engine.admit_queued_intersection(5),
            Err(MeshDecompError::QueryProtocol(_))
        ));
        engine.geometric_query(&edge).unwrap();
        assert!(engine.admit_queued_intersection(4).is_err());
    }

    #[test]
    fn endpoint_on_interface_queues_nothing() {
        let mut engine = LevelSetEngine::new(vec![LevelSet::plane(&[0.0, 0.0], &[1.0, 0.0])]);
        let hit = engine.geometric_query(&query([&[0.0, 0.0], &[1.0, 0.0]])).unwrap();
        assert!(hit.intersected && hit.first_endpoint_on_interface);
        assert!(!hit.second_endpoint_on_interface);
        assert!(engine.queued_intersection().is_none());
    }

    #[test]
    fn rollback_forgets_the_pass() {
        let mut engine = LevelSetEngine::new(vec![LevelSet::sphere(&[0.0, 0.0], 0.5)]);
        engine.begin_pass();
        engine.geometric_query(&query([&[0.0, 0.0], &[1.0, 0.0]])).unwrap();
        engine.admit_queued_intersection(3).unwrap();
        engine.induce_as_interface_vertex(0, 1);
        engine.rollback_pass();
        assert!(engine.admitted_nodes().is_empty());
        assert!(!engine.is_interface_vertex(0, 1));
        assert!(!engine.is_interface_vertex(0, 3));
    }

    #[test]
    fn cells_touching_the_interface_count_as_intersected() {
        let engine = LevelSetEngine::new(vec![LevelSet::plane(&[1.0, 0.0], &[1.0, 0.0])]);
        let touching: [&[f64]; 3] = [&[0.0, 0.0], &[1.0, 0.0], &[0.0, 1.0]];
        let away: [&[f64]; 3] = [&[0.0, 0.0], &[0.5, 0.0], &[0.0, 1.0]];
        assert!(engine.is_intersected_cell(0, 0, &touching).unwrap());
        assert!(!engine.is_intersected_cell(0, 0, &away).unwrap());
    }
}
