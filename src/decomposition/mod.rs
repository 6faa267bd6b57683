//! Decomposition strategies and the per-pass state machine they run on.
//!
//! A strategy is selected by [`DecompositionAlgorithmType`] and dispatched
//! through [`DecompositionAlgorithm`]. Every interface pass walks the states
//! of [`PassState`] strictly in order; [`PassTracker`] rejects a phase that
//! runs out of turn.

pub mod classifier;
pub mod node_hierarchy;
pub mod rewriter;
pub mod templates;

use crate::data::cut_mesh::CutMesh;
use crate::data::decomposition_data::DecompositionData;
use crate::geometry::engine::GeometryEngine;
use crate::algs::communicator::Communicator;
use crate::mesh_error::MeshDecompError;
use crate::mesh_generation::{IntegrationMeshGenerator, MeshGenerationData};
use crate::topology::background::BackgroundMesh;
use node_hierarchy::NodeHierarchyInterface;
use serde::{Deserialize, Serialize};

/// Available decomposition strategies.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DecompositionAlgorithmType {
    /// Edge-crossing node insertion followed by template subdivision.
    #[default]
    NodeHierarchy,
}

impl DecompositionAlgorithmType {
    /// Numeric signature of the strategy.
    pub const fn signature(self) -> usize {
        match self {
            DecompositionAlgorithmType::NodeHierarchy => 102,
        }
    }

    /// Id of the pass of this strategy over interface `geometry`.
    pub const fn decomp_id(self, geometry: usize) -> usize {
        10_000 * geometry + self.signature()
    }
}

/// A strategy together with its pass state.
#[derive(Debug)]
pub enum DecompositionAlgorithm {
    NodeHierarchy(NodeHierarchyInterface),
}

impl DecompositionAlgorithm {
    pub fn new(kind: DecompositionAlgorithmType) -> Self {
        match kind {
            DecompositionAlgorithmType::NodeHierarchy => {
                DecompositionAlgorithm::NodeHierarchy(NodeHierarchyInterface::new())
            }
        }
    }

    pub fn kind(&self) -> DecompositionAlgorithmType {
        match self {
            DecompositionAlgorithm::NodeHierarchy(_) => DecompositionAlgorithmType::NodeHierarchy,
        }
    }

    /// Run one pass per active interface of `generator`.
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
        match self {
            DecompositionAlgorithm::NodeHierarchy(nh) => {
                nh.perform(mesh_gen_data, data, cut_mesh, background, generator)
            }
        }
    }
}

/// Phases of one interface pass.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum PassState {
    #[default]
    Idle,
    EdgesBuilt,
    IntersectionsQueried,
    VerticesRequested,
    VerticesCommitted,
    CellsClassified,
    CellsRewritten,
    Committed,
}

impl PassState {
    pub const fn as_str(self) -> &'static str {
        match self {
            PassState::Idle => "IDLE",
            PassState::EdgesBuilt => "EDGES_BUILT",
            PassState::IntersectionsQueried => "INTERSECTIONS_QUERIED",
            PassState::VerticesRequested => "VERTICES_REQUESTED",
            PassState::VerticesCommitted => "VERTICES_COMMITTED",
            PassState::CellsClassified => "CELLS_CLASSIFIED",
            PassState::CellsRewritten => "CELLS_REWRITTEN",
            PassState::Committed => "COMMITTED",
        }
    }

    /// The state that follows this one.
    pub const fn next(self) -> PassState {
        match self {
            PassState::Idle => PassState::EdgesBuilt,
            PassState::EdgesBuilt => PassState::IntersectionsQueried,
            PassState::IntersectionsQueried => PassState::VerticesRequested,
            PassState::VerticesRequested => PassState::VerticesCommitted,
            PassState::VerticesCommitted => PassState::CellsClassified,
            PassState::CellsClassified => PassState::CellsRewritten,
            PassState::CellsRewritten => PassState::Committed,
            PassState::Committed => PassState::Idle,
        }
    }
}

/// Current [`PassState`] of a strategy.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PassTracker {
    state: PassState,
}

impl PassTracker {
    pub fn state(&self) -> PassState {
        self.state
    }

    /// Move from `from` to its successor, failing if the pass is elsewhere.
    pub fn advance(&mut self, from: PassState) -> Result<PassState, MeshDecompError> {
        if self.state != from {
            return Err(MeshDecompError::StateTransition {
                expected: from.as_str(),
                found: self.state.as_str(),
            });
        }
        self.state = from.next();
        Ok(self.state)
    }

    /// Fail unless the pass is in `expected`.
    pub fn require(&self, expected: PassState) -> Result<(), MeshDecompError> {
        if self.state == expected {
            Ok(())
        } else {
            Err(MeshDecompError::StateTransition {
                expected: expected.as_str(),
                found: self.state.as_str(),
            })
        }
    }

    pub fn reset(&mut self) {
        self.state = PassState::Idle;
    }
}
