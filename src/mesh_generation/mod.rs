//! Integration mesh generation: the outer decomposition driver.
//!
//! [`IntegrationMeshGenerator`] owns the geometry engine, the communicator
//! and the [`DecompositionOptions`]. [`IntegrationMeshGenerator::generate`]
//! copies a background mesh into a [`CutMesh`] and runs the configured
//! strategy once per active interface. The helper operations used by the
//! strategy (cell extraction, edge building, ancestry, id assignment and the
//! two commits) live here so that every strategy shares them.

pub mod structured;

use crate::algs::communicator::{CommTag, Communicator, NoComm, NodeIdCommTags};
use crate::algs::node_ids::{agree_on_outcome, assign_node_ids, report_failure};
use crate::data::cut_mesh::{CutMesh, NewCell, NewVertex};
use crate::data::decomposition_data::DecompositionData;
use crate::decomposition::templates::TemplateLibrary;
use crate::decomposition::{DecompositionAlgorithm, DecompositionAlgorithmType};
use crate::geometry::engine::GeometryEngine;
use crate::mesh_error::MeshDecompError;
use crate::topology::background::BackgroundMesh;
use crate::topology::cell_type::EntityRef;
use crate::topology::edges::{
    EdgeConnectivity, build_edge_connectivity, cells_of_groups, deduce_edge_ancestry,
    select_background_cell_for_edge,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Default base tag of the id assignment messages.
pub const DEFAULT_COMM_TAG: u16 = 0xD100;

/// Configuration of a decomposition run.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecompositionOptions {
    pub algorithm: DecompositionAlgorithmType,
    /// Overrides the engine's on-interface tolerance when set.
    pub interface_tolerance: Option<f64>,
    /// Orient every child like its parent cell.
    pub orient_children: bool,
    /// Reject degenerate children and children that do not tile their parent.
    pub validate_cells: bool,
    /// Check the cut mesh and registry invariants after every pass, also in
    /// release builds.
    pub validate_invariants: bool,
    /// Base message tag; id assignment and the closing vote use five
    /// consecutive tags.
    pub comm_tag: u16,
}

impl Default for DecompositionOptions {
    fn default() -> Self {
        Self {
            algorithm: DecompositionAlgorithmType::default(),
            interface_tolerance: None,
            orient_children: true,
            validate_cells: true,
            validate_invariants: false,
            comm_tag: DEFAULT_COMM_TAG,
        }
    }
}

/// What one interface pass did.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PassSummary {
    pub geometry: usize,
    pub decomp_id: usize,
    pub num_edges: usize,
    pub num_new_vertices: usize,
    pub num_cut_cells: usize,
    /// Cells added (children minus the cells they replace).
    pub num_new_cells: usize,
}

/// Intersection bookkeeping of a decomposition run.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MeshGenerationData {
    /// Background cells cut or touched by each interface, indexed by geometry.
    pub intersected_cells: Vec<Vec<usize>>,
    /// Completed passes in execution order.
    pub passes: Vec<PassSummary>,
}

impl MeshGenerationData {
    pub fn new(num_geometries: usize) -> Self {
        Self {
            intersected_cells: vec![Vec::new(); num_geometries],
            passes: Vec::new(),
        }
    }

    /// Background cells intersected by any interface, ascending.
    pub fn all_intersected_cells(&self) -> Vec<usize> {
        let mut all: Vec<usize> = self.intersected_cells.iter().flatten().copied().collect();
        all.sort_unstable();
        all.dedup();
        all
    }

    pub(crate) fn record_intersected(&mut self, geometry: usize, cells: Vec<usize>) {
        if self.intersected_cells.len() <= geometry {
            self.intersected_cells.resize(geometry + 1, Vec::new());
        }
        self.intersected_cells[geometry] = cells;
    }
}

/// Outer driver of the decomposition.
#[derive(Debug)]
pub struct IntegrationMeshGenerator<E: GeometryEngine, C: Communicator = NoComm> {
    engine: E,
    comm: C,
    options: DecompositionOptions,
    active_geometries: Vec<usize>,
    templates: Arc<TemplateLibrary>,
}

impl<E: GeometryEngine> IntegrationMeshGenerator<E, NoComm> {
    /// Serial generator over every interface of `engine`.
    pub fn new(engine: E) -> Self {
        Self::with_comm(engine, NoComm)
    }
}

impl<E: GeometryEngine, C: Communicator> IntegrationMeshGenerator<E, C> {
    pub fn with_comm(engine: E, comm: C) -> Self {
        let active_geometries = (0..engine.num_geometries()).collect();
        Self {
            engine,
            comm,
            options: DecompositionOptions::default(),
            active_geometries,
            templates: TemplateLibrary::global(),
        }
    }

    pub fn with_options(mut self, options: DecompositionOptions) -> Self {
        self.options = options;
        self
    }

    /// Decompose only these interfaces, in this order.
    pub fn with_active_geometries(mut self, geometries: Vec<usize>) -> Self {
        self.active_geometries = geometries;
        self
    }

    /// Use a private template library instead of the process-wide one.
    pub fn with_templates(mut self, templates: Arc<TemplateLibrary>) -> Self {
        self.templates = templates;
        self
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut E {
        &mut self.engine
    }

    pub fn into_engine(self) -> E {
        self.engine
    }

    pub fn comm(&self) -> &C {
        &self.comm
    }

    pub fn options(&self) -> &DecompositionOptions {
        &self.options
    }

    pub fn active_geometries(&self) -> &[usize] {
        &self.active_geometries
    }

    pub fn templates(&self) -> &TemplateLibrary {
        &self.templates
    }

    /// Decompose `background` against every active interface.
    pub fn generate<B: BackgroundMesh + ?Sized>(
        &mut self,
        background: &B,
    ) -> Result<(CutMesh, DecompositionData, MeshGenerationData), MeshDecompError> {
        let mut cut_mesh = match CutMesh::from_background(background) {
            Ok(cut_mesh) => cut_mesh,
            Err(e) => {
                report_failure(&self.comm, 0, self.comm_tags());
                return Err(e);
            }
        };
        let mut data = DecompositionData::new();
        let mut mesh_gen_data = MeshGenerationData::new(self.engine.num_geometries());
        self.decompose(&mut mesh_gen_data, &mut data, &mut cut_mesh, background)?;
        Ok((cut_mesh, data, mesh_gen_data))
    }

    /// Decompose an existing cut mesh further. Passes completed before a
    /// failing pass stay applied.
    pub fn decompose<B: BackgroundMesh + ?Sized>(
        &mut self,
        mesh_gen_data: &mut MeshGenerationData,
        data: &mut DecompositionData,
        cut_mesh: &mut CutMesh,
        background: &B,
    ) -> Result<(), MeshDecompError> {
        if let Err(e) = self.check_inputs(cut_mesh, background) {
            self.report_pass_failure(cut_mesh);
            return Err(e);
        }
        if let Some(tolerance) = self.options.interface_tolerance {
            self.engine.set_interface_tolerance(tolerance);
        }
        log::debug!(
            "rank {}: decomposing {} cells against {} interfaces with {:?}",
            self.comm.rank(),
            cut_mesh.num_cells(),
            self.active_geometries.len(),
            self.options.algorithm
        );
        let mut algorithm = DecompositionAlgorithm::new(self.options.algorithm);
        algorithm.perform(mesh_gen_data, data, cut_mesh, background, self)
    }

    fn check_inputs<B: BackgroundMesh + ?Sized>(&self, cut_mesh: &CutMesh, background: &B) -> Result<(), MeshDecompError> {
        if cut_mesh.spatial_dim() != background.spatial_dim() {
            return Err(MeshDecompError::InvalidGeometry(format!(
                "{}D cut mesh over a {}D background mesh",
                cut_mesh.spatial_dim(),
                background.spatial_dim()
            )));
        }
        let num_geometries = self.engine.num_geometries();
        if let Some(&g) = self.active_geometries.iter().find(|&&g| g >= num_geometries) {
            return Err(MeshDecompError::IndexOutOfBounds {
                what: "geometry",
                index: g,
                len: num_geometries,
            });
        }
        Ok(())
    }

    /// Cell groups whose vertices straddle or touch interface `geometry`.
    pub fn compute_intersected_cells(
        &self,
        geometry: usize,
        cut_mesh: &CutMesh,
    ) -> Result<Vec<usize>, MeshDecompError> {
        let mut hits = Vec::new();
        for g in 0..cut_mesh.num_cell_groups() {
            let group = cut_mesh.vertex_group(g)?;
            let coords = group
                .vertices()
                .iter()
                .map(|&v| cut_mesh.vertex(v).map(|v| v.coords.as_slice()))
                .collect::<Result<Vec<_>, _>>()?;
            if self.engine.is_intersected_cell(geometry, group.background_cell, &coords)? {
                hits.push(g);
            }
        }
        Ok(hits)
    }

    /// Cut-mesh cells of the given groups.
    pub fn extract_cells(&self, cut_mesh: &CutMesh, groups: &[usize]) -> Result<Vec<usize>, MeshDecompError> {
        cells_of_groups(cut_mesh, groups)
    }

    pub fn build_edges(&self, cut_mesh: &CutMesh, cells: &[usize]) -> Result<EdgeConnectivity, MeshDecompError> {
        build_edge_connectivity(cut_mesh, cells)
    }

    pub fn select_background_cells(
        &self,
        edges: &EdgeConnectivity,
        cut_mesh: &CutMesh,
    ) -> Result<Vec<usize>, MeshDecompError> {
        select_background_cell_for_edge(edges, cut_mesh)
    }

    pub fn deduce_ancestry<B: BackgroundMesh + ?Sized>(
        &self,
        edges: &EdgeConnectivity,
        cut_mesh: &CutMesh,
        background: &B,
        edge_background_cell: &[usize],
    ) -> Result<Vec<EntityRef>, MeshDecompError> {
        deduce_edge_ancestry(edges, cut_mesh, background, edge_background_cell)
    }

    fn comm_tags(&self) -> NodeIdCommTags {
        NodeIdCommTags::from_base(CommTag::new(self.options.comm_tag))
    }

    /// Global ids for the requests of the current pass.
    pub fn assign_node_ids(&self, data: &mut DecompositionData, cut_mesh: &CutMesh) -> Result<(), MeshDecompError> {
        assign_node_ids(data, &self.comm, cut_mesh.max_vertex_id(), self.comm_tags())
    }

    /// Tell the other ranks that this rank's pass failed before id assignment.
    pub fn report_pass_failure(&self, cut_mesh: &CutMesh) {
        report_failure(&self.comm, cut_mesh.max_vertex_id(), self.comm_tags());
    }

    /// Closing vote of a pass; fails if any other rank failed after id assignment.
    pub fn agree_on_pass(&self, local: bool) -> Result<(), MeshDecompError> {
        agree_on_outcome(&self.comm, local, self.comm_tags())
    }

    /// Append one vertex per request of the current pass.
    pub fn commit_vertices(&self, data: &DecompositionData, cut_mesh: &mut CutMesh) -> Result<(), MeshDecompError> {
        let new_vertices = data
            .requests()
            .iter()
            .map(|req| {
                let id = req.node_id.ok_or_else(|| {
                    MeshDecompError::InvariantViolation(format!(
                        "vertex {} committed before its id was assigned",
                        req.vertex_index
                    ))
                })?;
                Ok(NewVertex {
                    index: req.vertex_index,
                    id,
                    owner: req.owner,
                    coords: req.coords.clone(),
                    parent: req.parent,
                    groups: req.group_local_coords.clone(),
                })
            })
            .collect::<Result<Vec<_>, MeshDecompError>>()?;
        log::debug!("committing {} vertices", new_vertices.len());
        cut_mesh.commit_vertices(new_vertices)
    }

    pub fn commit_cells(&self, cut_mesh: &mut CutMesh, new_cells: Vec<NewCell>) -> Result<(), MeshDecompError> {
        log::debug!("committing {} cells", new_cells.len());
        cut_mesh.commit_cells(new_cells)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::level_set::{LevelSet, LevelSetEngine};

    #[test]
    fn options_default_and_serialize() {
        let options = DecompositionOptions::default();
        assert!(options.orient_children && options.validate_cells);
        assert_eq!(options.interface_tolerance, None);
        let json = serde_json::to_string(&options).unwrap();
        let back: DecompositionOptions = serde_json::from_str(&json).unwrap();
        assert_eq!(back, options);
        let partial: DecompositionOptions = serde_json::from_str(r#"{"validate_cells": false}"#).unwrap();
        assert!(!partial.validate_cells && partial.orient_children);
    }

    #[test]
    fn intersected_cells_follow_the_plane() {
        let bg = structured::tri_mesh(4, 1, [0.0, 0.0], [4.0, 1.0]).unwrap();
        let cut_mesh = CutMesh::from_background(&bg).unwrap();
        let engine = LevelSetEngine::new(vec![LevelSet::plane(&[1.5, 0.0], &[1.0, 0.0])]);
        let generator = IntegrationMeshGenerator::new(engine);
        // only the two triangles of the second square straddle x = 1.5
        assert_eq!(generator.compute_intersected_cells(0, &cut_mesh).unwrap(), vec![2, 3]);
    }

    #[test]
    fn unknown_active_geometry_is_rejected() {
        let bg = structured::tri_mesh(1, 1, [0.0, 0.0], [1.0, 1.0]).unwrap();
        let engine = LevelSetEngine::new(vec![LevelSet::plane(&[0.5, 0.0], &[1.0, 0.0])]);
        let mut generator = IntegrationMeshGenerator::new(engine).with_active_geometries(vec![1]);
        assert_eq!(
            generator.generate(&bg).unwrap_err(),
            MeshDecompError::IndexOutOfBounds {
                what: "geometry",
                index: 1,
                len: 1,
            }
        );
    }
}
