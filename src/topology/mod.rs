//! Reference cells, the background mesh and pass-local edge topology.

pub mod background;
pub mod cell_type;
pub mod edges;

pub use background::{BackgroundMesh, SimplexBackgroundMesh};
pub use cell_type::{CellTopology, EntityRank, EntityRef};
