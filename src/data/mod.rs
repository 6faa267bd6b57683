//! Data module: the cut mesh and the node request registry

pub mod cut_mesh;
pub mod decomposition_data;

pub use cut_mesh::CutMesh;
pub use decomposition_data::{DecompositionData, NodeRequest};
