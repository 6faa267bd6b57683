//! MeshDecompError: unified error type for mesh-decomp public APIs
//!
//! Every fallible operation of the decomposition engine returns this type.
//! Errors are fatal to the interface pass that raised them: the driver rolls
//! the cut mesh back to its state before the pass and reports the error, it
//! never retries.

use crate::topology::cell_type::EntityRank;
use thiserror::Error;

/// Unified error type for decomposition operations.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum MeshDecompError {
    /// Only 2D (triangle) and 3D (tetrahedron) meshes can be decomposed.
    #[error("unsupported spatial dimension {0}: only 2D and 3D meshes are supported")]
    UnsupportedSpatialDimension(usize),
    /// A cell topology the template library has no reference data for.
    #[error("unsupported cell topology: {0}")]
    UnsupportedCellTopology(String),
    /// A cut cell has more intersected edges than any template can represent.
    #[error(
        "cell {cell} has {count} intersected edges, at most {max} are supported in {dim}D"
    )]
    TooManyIntersectedEdges {
        cell: usize,
        count: usize,
        max: usize,
        dim: usize,
    },
    /// No subdivision template exists for this permutation key.
    #[error("no subdivision template for permutation key {key} ({edge_count} cut edges, {dim}D)")]
    MissingTemplate {
        dim: usize,
        edge_count: usize,
        key: u32,
    },
    /// The intersected edges of a cell do not form a supported cut pattern.
    #[error("cell {cell}: cut pattern on edges {edges:?} is not a supported topology ({reason})")]
    InvalidCutPattern {
        cell: usize,
        edges: Vec<usize>,
        reason: &'static str,
    },
    /// A registry key was registered twice.
    #[error(
        "request on {rank:?} {parent_index} with secondary key {secondary_key} already maps to node {existing}"
    )]
    DuplicateRequest {
        parent_index: usize,
        rank: EntityRank,
        secondary_key: u64,
        existing: usize,
    },
    /// A decomposition phase ran out of order.
    #[error("decomposition pass out of order: expected state {expected}, found {found}")]
    StateTransition {
        expected: &'static str,
        found: &'static str,
    },
    /// The queue/admit protocol of the geometry engine was violated.
    #[error("geometry query protocol violation: {0}")]
    QueryProtocol(String),
    /// A vertex is referenced by a cell group but has no parametric coordinates there.
    #[error("vertex {vertex} has no parametric coordinates in vertex group {group}")]
    MissingLocalCoords { group: usize, vertex: usize },
    /// A background entity index is out of range for its rank.
    #[error("{rank:?} entity {index} does not exist in the background mesh")]
    EntityOutOfRange { index: usize, rank: EntityRank },
    /// A background vertex set does not match any background entity.
    #[error("no background entity has vertex closure {0:?}")]
    UnknownEntity(Vec<usize>),
    /// Generic out-of-bounds access into one of the arenas.
    #[error("{what} index {index} out of bounds (len {len})")]
    IndexOutOfBounds {
        what: &'static str,
        index: usize,
        len: usize,
    },
    /// An edge in the connectivity has no incident cell.
    #[error("edge {0} is not connected to any cell")]
    OrphanEdge(usize),
    /// Degenerate or malformed geometry.
    #[error("invalid geometry: {0}")]
    InvalidGeometry(String),
    /// A request owned by another rank is unknown to that rank.
    #[error(
        "request ({rank:?}, secondary key {secondary_key}) owned by rank {owner} is unknown to its owner"
    )]
    UnresolvedRemoteRequest {
        owner: usize,
        rank: EntityRank,
        secondary_key: u64,
    },
    /// Communication failure with a neighbor rank.
    #[error("communication error with rank {neighbor}: {message}")]
    CommError { neighbor: usize, message: String },
    /// Another rank failed the current pass; every rank abandons it.
    #[error("rank {peer} failed the current pass")]
    PeerFailed { peer: usize },
    /// Integer pairing or id counter left the `u64` range.
    #[error("identifier overflow while combining {0} and {1}")]
    IdOverflow(u64, u64),
    /// Any other internal invariant that does not hold.
    #[error("invariant violated: {0}")]
    InvariantViolation(String),
}
