//! Node-hierarchy decomposition.
//!
//! For each active interface the cell groups it intersects are decomposed in
//! one pass:
//!
//! 1. unique edges of the group cells, their representative background cell
//!    and parent background entity;
//! 2. one geometric query per edge; an interior crossing registers a node
//!    request keyed by (parent entity, pairing of the endpoint ids), an
//!    endpoint on the interface flags that vertex instead;
//! 3. global ids for the requests, parametric coordinates of every new
//!    vertex in each cell group its edge touches;
//! 4. vertex commit;
//! 5. classification of each cut cell into a permutation key and template;
//! 6. child connectivity from the templates;
//! 7. cell commit.
//!
//! A pass either completes or leaves the cut mesh, the registry and the
//! engine as they were before it started.

use crate::algs::communicator::Communicator;
use crate::algs::pairing::edge_secondary_key;
use crate::data::cut_mesh::{CutMesh, NewCell};
use crate::data::decomposition_data::{DecompositionData, NodeRequest};
use crate::debug_invariants::DebugInvariants;
use crate::decomposition::classifier::{ClassifiedCell, CutEdge, classify_cut_cell};
use crate::decomposition::rewriter::{RewriteOptions, rewrite_cell};
use crate::decomposition::templates::SubdivisionTemplate;
use crate::decomposition::{PassState, PassTracker};
use crate::geometry::engine::{EdgeQuery, GeometryEngine};
use crate::mesh_error::MeshDecompError;
use crate::mesh_generation::{IntegrationMeshGenerator, MeshGenerationData, PassSummary};
use crate::topology::background::BackgroundMesh;
use crate::topology::cell_type::{CellTopology, EntityRank, EntityRef};
use crate::topology::edges::EdgeConnectivity;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Working state of the pass in progress.
#[derive(Debug, Default)]
struct PassContext {
    geometry: usize,
    decomp_id: usize,
    edges: EdgeConnectivity,
    edge_background_cell: Vec<usize>,
    ancestry: Vec<EntityRef>,
    /// Edge each request of the pass was created on.
    request_edges: Vec<usize>,
    /// Intersected edges of every cut cell.
    cell_cuts: BTreeMap<usize, Vec<CutEdge>>,
    classified: Vec<(ClassifiedCell, Arc<SubdivisionTemplate>)>,
    new_cells: Vec<NewCell>,
    net_new_cells: usize,
}

/// The node-hierarchy strategy. The phase methods may be driven one by one;
/// [`NodeHierarchyInterface::perform`] runs them all for every interface.
#[derive(Debug, Default)]
pub struct NodeHierarchyInterface {
    tracker: PassTracker,
    pass: PassContext,
}

impl NodeHierarchyInterface {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> PassState {
        self.tracker.state()
    }

    /// Intersected edges per cut cell of the current pass.
    pub fn cut_cells(&self) -> &BTreeMap<usize, Vec<CutEdge>> {
        &self.pass.cell_cuts
    }

    /// Classified cut cells of the current pass, in cell order.
    pub fn classified_cells(&self) -> impl Iterator<Item = &ClassifiedCell> {
        self.pass.classified.iter().map(|(c, _)| c)
    }

    /// Decompose `cut_mesh` against every active interface of `generator`.
    pub fn perform<E, C, B>(
        &mut self,
        mesh_gen_data: &mut MeshGenerationData,
        data: &mut DecompositionData,
        cut_mesh: &mut CutMesh,
        background: &B,
        generator: &mut IntegrationMeshGenerator<E, C>,
    ) -> Result<(), MeshDecompError>
    where
        E: GeometryEngine,
        C: Communicator,
        B: BackgroundMesh + ?Sized,
    {
        self.tracker.require(PassState::Idle)?;
        let geometries = generator.active_geometries().to_vec();
        for geometry in geometries {
            let groups = match generator.compute_intersected_cells(geometry, cut_mesh) {
                Ok(groups) => groups,
                Err(e) => {
                    generator.report_pass_failure(cut_mesh);
                    return Err(e);
                }
            };
            log::debug!("geometry {geometry}: {} intersected cell groups", groups.len());
            mesh_gen_data.record_intersected(geometry, groups.clone());
            if groups.is_empty() {
                log::warn!("geometry {geometry} does not intersect the mesh");
                // every rank takes part in id assignment
                if generator.comm().size() == 1 {
                    continue;
                }
            }

            let checkpoint = cut_mesh.checkpoint();
            generator.engine_mut().begin_pass();
            match self.run_pass(geometry, &groups, data, cut_mesh, background, generator) {
                Ok(summary) => {
                    cut_mesh.release(checkpoint);
                    mesh_gen_data.passes.push(summary);
                }
                Err(e) => {
                    log::debug!("pass over geometry {geometry} failed, rolling back: {e}");
                    cut_mesh.rollback(checkpoint);
                    self.abort(data, generator);
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    fn run_pass<E, C, B>(
        &mut self,
        geometry: usize,
        groups: &[usize],
        data: &mut DecompositionData,
        cut_mesh: &mut CutMesh,
        background: &B,
        generator: &mut IntegrationMeshGenerator<E, C>,
    ) -> Result<PassSummary, MeshDecompError>
    where
        E: GeometryEngine,
        C: Communicator,
        B: BackgroundMesh + ?Sized,
    {
        // peers are waiting in id assignment; a local failure has to reach them
        let local = self
            .build_edges(geometry, groups, cut_mesh, background, generator)
            .and_then(|()| self.query_intersections(data, cut_mesh, background, generator));
        if let Err(e) = local {
            generator.report_pass_failure(cut_mesh);
            return Err(e);
        }

        let outcome = self.request_vertices(data, cut_mesh, generator).and_then(|()| {
            self.commit_vertices(data, cut_mesh, generator)?;
            self.classify_cells(cut_mesh, generator)?;
            self.rewrite_cells(cut_mesh, generator)?;
            self.commit_cells(cut_mesh, generator)
        });
        match outcome {
            // every rank saw the same summaries, or the exchange itself is broken
            Err(e @ (MeshDecompError::PeerFailed { .. } | MeshDecompError::CommError { .. })) => return Err(e),
            Err(e) => {
                if let Err(vote) = generator.agree_on_pass(false) {
                    log::debug!("closing vote after local failure: {vote}");
                }
                return Err(e);
            }
            Ok(()) => generator.agree_on_pass(true)?,
        }
        self.finish(data, cut_mesh, generator)
    }

    /// `IDLE → EDGES_BUILT`: edges, representative cells and ancestry of the
    /// cells in `groups`.
    pub fn build_edges<E, C, B>(
        &mut self,
        geometry: usize,
        groups: &[usize],
        cut_mesh: &CutMesh,
        background: &B,
        generator: &IntegrationMeshGenerator<E, C>,
    ) -> Result<(), MeshDecompError>
    where
        E: GeometryEngine,
        C: Communicator,
        B: BackgroundMesh + ?Sized,
    {
        self.tracker.require(PassState::Idle)?;
        let cells = generator.extract_cells(cut_mesh, groups)?;
        let edges = generator.build_edges(cut_mesh, &cells)?;
        let edge_background_cell = generator.select_background_cells(&edges, cut_mesh)?;
        let ancestry = generator.deduce_ancestry(&edges, cut_mesh, background, &edge_background_cell)?;
        log::debug!(
            "geometry {geometry}: {} cells, {} edges",
            cells.len(),
            edges.num_edges()
        );
        self.pass = PassContext {
            geometry,
            decomp_id: generator.options().algorithm.decomp_id(geometry),
            edges,
            edge_background_cell,
            ancestry,
            ..PassContext::default()
        };
        self.tracker.advance(PassState::Idle)?;
        Ok(())
    }

    /// `EDGES_BUILT → INTERSECTIONS_QUERIED`: query every edge and register
    /// a node request per crossing.
    pub fn query_intersections<E, C, B>(
        &mut self,
        data: &mut DecompositionData,
        cut_mesh: &CutMesh,
        background: &B,
        generator: &mut IntegrationMeshGenerator<E, C>,
    ) -> Result<(), MeshDecompError>
    where
        E: GeometryEngine,
        C: Communicator,
        B: BackgroundMesh + ?Sized,
    {
        self.tracker.require(PassState::EdgesBuilt)?;
        data.begin_pass(self.pass.decomp_id, cut_mesh.first_available_index(EntityRank::Node)?);
        let pass = &mut self.pass;
        let geometry = pass.geometry;
        let engine = generator.engine_mut();
        let mut on_interface = 0;

        for e in 0..pass.edges.num_edges() {
            let [v0, v1] = pass.edges.edge_vertices[e];
            let background_cell = pass.edge_background_cell[e];
            let (a, b) = (cut_mesh.vertex(v0)?, cut_mesh.vertex(v1)?);
            let group = cut_mesh.vertex_group(background_cell)?;
            let query = EdgeQuery {
                geometry,
                vertices: [v0, v1],
                vertex_ids: [a.id, b.id],
                coords: [a.coords.as_slice(), b.coords.as_slice()],
                background_cell,
                local_coords: [
                    group.local_coords(background_cell, v0)?,
                    group.local_coords(background_cell, v1)?,
                ],
            };
            let hit = engine.geometric_query(&query)?;
            if !hit.intersected {
                continue;
            }

            if hit.first_endpoint_on_interface || hit.second_endpoint_on_interface {
                if engine.queued_intersection().is_some() {
                    engine.discard_queued_intersection();
                }
                for (on, v) in [(hit.first_endpoint_on_interface, v0), (hit.second_endpoint_on_interface, v1)] {
                    if on {
                        engine.induce_as_interface_vertex(geometry, v);
                    }
                }
                on_interface += 1;
                log::trace!("edge {e} ({v0}, {v1}) touches geometry {geometry} at an endpoint");
                continue;
            }

            let (Some(t), Some(coords)) = (hit.parametric_position, hit.coords) else {
                return Err(MeshDecompError::QueryProtocol(format!(
                    "edge {e} ({v0}, {v1}) reported as crossed without a crossing point"
                )));
            };
            let parent = pass.ancestry[e];
            let request = NodeRequest::new(
                parent,
                background.entity_id(parent.index, parent.rank)?,
                edge_secondary_key(a.id, b.id)?,
                background.entity_owner(parent.index, parent.rank)?,
                coords,
            )
            .on_edge([v0, v1], t);
            let (vertex, existed) = data.register_or_get(request)?;
            if existed {
                engine.discard_queued_intersection();
            } else {
                engine.admit_queued_intersection(vertex)?;
                pass.request_edges.push(e);
            }
            log::trace!("edge {e} ({v0}, {v1}) crossed at t = {t:.6}: vertex {vertex}");

            for (&cell, &ordinal) in pass.edges.edge_to_cell[e]
                .iter()
                .zip(&pass.edges.edge_to_cell_edge_ordinal[e])
            {
                pass.cell_cuts.entry(cell).or_default().push(CutEdge {
                    ordinal,
                    vertex,
                    vertex_id: 0,
                });
            }
        }

        // reject unsupported cells before anything is committed
        for (&cell, cuts) in &pass.cell_cuts {
            let topology = cut_mesh.cell(cell)?.topology;
            if cuts.len() > topology.max_intersected_edges() {
                return Err(MeshDecompError::TooManyIntersectedEdges {
                    cell,
                    count: cuts.len(),
                    max: topology.max_intersected_edges(),
                    dim: topology.dimension(),
                });
            }
        }
        log::debug!(
            "geometry {geometry}: {} new vertices, {} edges touching at an endpoint, {} cut cells",
            data.num_requests(),
            on_interface,
            pass.cell_cuts.len()
        );
        self.tracker.advance(PassState::EdgesBuilt)?;
        Ok(())
    }

    /// `INTERSECTIONS_QUERIED → VERTICES_REQUESTED`: global ids and cell
    /// group coordinates of the new vertices.
    pub fn request_vertices<E, C>(
        &mut self,
        data: &mut DecompositionData,
        cut_mesh: &CutMesh,
        generator: &mut IntegrationMeshGenerator<E, C>,
    ) -> Result<(), MeshDecompError>
    where
        E: GeometryEngine,
        C: Communicator,
    {
        self.tracker.require(PassState::IntersectionsQueried)?;
        generator.assign_node_ids(data, cut_mesh)?;
        self.associate_new_vertices_with_cell_groups(data, cut_mesh)?;

        let engine = generator.engine_mut();
        for req in data.requests() {
            let id = req.node_id.ok_or_else(|| {
                MeshDecompError::InvariantViolation(format!("request for vertex {} has no id", req.vertex_index))
            })?;
            engine.update_admitted_node(req.vertex_index, id, req.owner)?;
        }
        self.tracker.advance(PassState::IntersectionsQueried)?;
        Ok(())
    }

    /// Interpolate the parametric coordinates of every new vertex in each
    /// cell group its edge belongs to.
    fn associate_new_vertices_with_cell_groups(
        &self,
        data: &mut DecompositionData,
        cut_mesh: &CutMesh,
    ) -> Result<(), MeshDecompError> {
        let edges = &self.pass.edges;
        for (r, &e) in self.pass.request_edges.iter().enumerate() {
            let ([v0, v1], t) = {
                let req = data.request(r)?;
                (req.edge_vertices, req.edge_position)
            };
            let mut groups = edges.edge_to_cell[e]
                .iter()
                .map(|&c| cut_mesh.cell(c).map(|c| c.group))
                .collect::<Result<Vec<_>, _>>()?;
            groups.sort_unstable();
            groups.dedup();
            for g in groups {
                let vertex_group = cut_mesh.vertex_group(g)?;
                let x0 = vertex_group.local_coords(g, v0)?;
                let x1 = vertex_group.local_coords(g, v1)?;
                let xi = x0.iter().zip(x1).map(|(a, b)| (1.0 - t) * a + t * b).collect();
                data.associate_cell_group(r, g, xi)?;
            }
        }
        Ok(())
    }

    /// `VERTICES_REQUESTED → VERTICES_COMMITTED`.
    pub fn commit_vertices<E, C>(
        &mut self,
        data: &DecompositionData,
        cut_mesh: &mut CutMesh,
        generator: &IntegrationMeshGenerator<E, C>,
    ) -> Result<(), MeshDecompError>
    where
        E: GeometryEngine,
        C: Communicator,
    {
        self.tracker.require(PassState::VerticesRequested)?;
        generator.commit_vertices(data, cut_mesh)?;
        self.tracker.advance(PassState::VerticesRequested)?;
        Ok(())
    }

    /// `VERTICES_COMMITTED → CELLS_CLASSIFIED`: permutation key, canonical
    /// nodes and template of every cut cell.
    pub fn classify_cells<E, C>(
        &mut self,
        cut_mesh: &CutMesh,
        generator: &IntegrationMeshGenerator<E, C>,
    ) -> Result<(), MeshDecompError>
    where
        E: GeometryEngine,
        C: Communicator,
    {
        self.tracker.require(PassState::VerticesCommitted)?;
        let mut work = Vec::with_capacity(self.pass.cell_cuts.len());
        for (&cell, cuts) in &self.pass.cell_cuts {
            let c = cut_mesh.cell(cell)?;
            let cuts = cuts
                .iter()
                .map(|cut| {
                    Ok(CutEdge {
                        vertex_id: cut_mesh.vertex(cut.vertex)?.id,
                        ..*cut
                    })
                })
                .collect::<Result<Vec<_>, MeshDecompError>>()?;
            work.push((cell, c.topology, c.vertices.clone(), cuts));
        }

        let dim = cut_mesh.spatial_dim();
        let templates = generator.templates();
        self.pass.classified = classify_all(&work)?
            .into_iter()
            .map(|cc| {
                let template = templates.load_template(dim, cc.key)?;
                Ok((cc, template))
            })
            .collect::<Result<_, MeshDecompError>>()?;
        log::debug!("classified {} cut cells", self.pass.classified.len());
        self.tracker.advance(PassState::VerticesCommitted)?;
        Ok(())
    }

    /// `CELLS_CLASSIFIED → CELLS_REWRITTEN`: child cells of every cut cell.
    pub fn rewrite_cells<E, C>(
        &mut self,
        cut_mesh: &CutMesh,
        generator: &IntegrationMeshGenerator<E, C>,
    ) -> Result<(), MeshDecompError>
    where
        E: GeometryEngine,
        C: Communicator,
    {
        self.tracker.require(PassState::CellsClassified)?;
        let options = RewriteOptions {
            orient_children: generator.options().orient_children,
            validate_cells: generator.options().validate_cells,
        };
        let mut new_cells = Vec::new();
        let mut net_new_cells = 0;
        for (classified, template) in &self.pass.classified {
            let children = rewrite_cell(cut_mesh, classified, template, options)?;
            net_new_cells += children.len() - 1;
            new_cells.extend(children);
        }
        self.pass.new_cells = new_cells;
        self.pass.net_new_cells = net_new_cells;
        self.tracker.advance(PassState::CellsClassified)?;
        Ok(())
    }

    /// `CELLS_REWRITTEN → COMMITTED`.
    pub fn commit_cells<E, C>(
        &mut self,
        cut_mesh: &mut CutMesh,
        generator: &IntegrationMeshGenerator<E, C>,
    ) -> Result<(), MeshDecompError>
    where
        E: GeometryEngine,
        C: Communicator,
    {
        self.tracker.require(PassState::CellsRewritten)?;
        generator.commit_cells(cut_mesh, std::mem::take(&mut self.pass.new_cells))?;
        self.tracker.advance(PassState::CellsRewritten)?;
        Ok(())
    }

    /// `COMMITTED → IDLE`: compact the mesh and retire the requests.
    pub fn finish<E, C>(
        &mut self,
        data: &mut DecompositionData,
        cut_mesh: &mut CutMesh,
        generator: &IntegrationMeshGenerator<E, C>,
    ) -> Result<PassSummary, MeshDecompError>
    where
        E: GeometryEngine,
        C: Communicator,
    {
        self.tracker.require(PassState::Committed)?;
        cut_mesh.trim_data();
        if generator.options().validate_invariants {
            cut_mesh.validate_invariants()?;
            data.validate_invariants()?;
        } else {
            cut_mesh.debug_assert_invariants();
            data.debug_assert_invariants();
        }

        let pass = std::mem::take(&mut self.pass);
        let summary = PassSummary {
            geometry: pass.geometry,
            decomp_id: pass.decomp_id,
            num_edges: pass.edges.num_edges(),
            num_new_vertices: data.num_requests(),
            num_cut_cells: pass.classified.len(),
            num_new_cells: pass.net_new_cells,
        };
        data.complete_pass(pass.net_new_cells);
        log::debug!(
            "pass {} done: {} new vertices, {} new cells",
            summary.decomp_id,
            summary.num_new_vertices,
            summary.num_new_cells
        );
        self.tracker.advance(PassState::Committed)?;
        Ok(summary)
    }

    /// Drop the pass in progress: registry requests, engine journal and
    /// state. The caller restores the cut mesh.
    pub fn abort<E, C>(&mut self, data: &mut DecompositionData, generator: &mut IntegrationMeshGenerator<E, C>)
    where
        E: GeometryEngine,
        C: Communicator,
    {
        data.abort_pass();
        generator.engine_mut().rollback_pass();
        self.pass = PassContext::default();
        self.tracker.reset();
    }
}

type ClassifyWork = (usize, CellTopology, Vec<usize>, Vec<CutEdge>);

#[cfg(feature = "rayon")]
fn classify_all(work: &[ClassifyWork]) -> Result<Vec<ClassifiedCell>, MeshDecompError> {
    use rayon::prelude::*;
    work.par_iter()
        .map(|(cell, topology, corners, cuts)| classify_cut_cell(*cell, *topology, corners, cuts))
        .collect()
}

#[cfg(not(feature = "rayon"))]
fn classify_all(work: &[ClassifyWork]) -> Result<Vec<ClassifiedCell>, MeshDecompError> {
    work.iter()
        .map(|(cell, topology, corners, cuts)| classify_cut_cell(*cell, *topology, corners, cuts))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::level_set::{LevelSet, LevelSetEngine};
    use crate::mesh_generation::structured::tri_mesh;

    fn vertical_line(x: f64) -> IntegrationMeshGenerator<LevelSetEngine> {
        IntegrationMeshGenerator::new(LevelSetEngine::new(vec![LevelSet::plane(&[x, 0.0], &[1.0, 0.0])]))
    }

    #[test]
    fn phases_must_run_in_order() {
        let bg = tri_mesh(1, 1, [0.0, 0.0], [1.0, 1.0]).unwrap();
        let mut cut_mesh = CutMesh::from_background(&bg).unwrap();
        let mut data = DecompositionData::new();
        let mut generator = vertical_line(0.5);
        let mut nh = NodeHierarchyInterface::new();

        let err = nh.classify_cells(&cut_mesh, &generator).unwrap_err();
        assert_eq!(
            err,
            MeshDecompError::StateTransition {
                expected: "VERTICES_COMMITTED",
                found: "IDLE",
            }
        );
        nh.build_edges(0, &[0, 1], &cut_mesh, &bg, &generator).unwrap();
        assert!(nh.commit_vertices(&data, &mut cut_mesh, &generator).is_err());
        nh.query_intersections(&mut data, &cut_mesh, &bg, &mut generator).unwrap();
        assert_eq!(nh.state(), PassState::IntersectionsQueried);
        assert!(nh.build_edges(0, &[0, 1], &cut_mesh, &bg, &generator).is_err());
        assert_eq!(cut_mesh.num_vertices(), 4);
    }

    #[test]
    fn manual_phases_complete_a_pass() {
        let bg = tri_mesh(1, 1, [0.0, 0.0], [1.0, 1.0]).unwrap();
        let mut cut_mesh = CutMesh::from_background(&bg).unwrap();
        let mut data = DecompositionData::new();
        let mut generator = vertical_line(0.25);
        let mut nh = NodeHierarchyInterface::new();

        nh.build_edges(0, &[0, 1], &cut_mesh, &bg, &generator).unwrap();
        nh.query_intersections(&mut data, &cut_mesh, &bg, &mut generator).unwrap();
        // x = 0.25 crosses the bottom edge, the diagonal and the top edge
        assert_eq!(data.num_requests(), 3);
        assert_eq!(nh.cut_cells().len(), 2);
        nh.request_vertices(&mut data, &cut_mesh, &mut generator).unwrap();
        nh.commit_vertices(&data, &mut cut_mesh, &generator).unwrap();
        nh.classify_cells(&cut_mesh, &generator).unwrap();
        assert!(nh.classified_cells().all(|c| c.key.edge_count == 2));
        nh.rewrite_cells(&cut_mesh, &generator).unwrap();
        nh.commit_cells(&mut cut_mesh, &generator).unwrap();
        let summary = nh.finish(&mut data, &mut cut_mesh, &generator).unwrap();

        assert_eq!(nh.state(), PassState::Idle);
        assert_eq!(summary.num_new_vertices, 3);
        assert_eq!(summary.num_new_cells, 4);
        assert_eq!(cut_mesh.num_cells(), 6);
        assert_eq!(data.num_new_cells(), 4);
        assert_eq!(generator.engine().admitted_nodes().len(), 3);
        assert!(generator.engine().admitted_nodes().iter().all(|n| n.id.is_some()));
    }
}
