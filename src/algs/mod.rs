//! Pairing keys, wire records, shared-entity ownership and the rank-to-rank
//! id assignment.

pub mod communicator;
pub mod node_ids;
pub mod ownership;
pub mod pairing;
pub mod wire;

pub use communicator::{Communicator, LocalComm, NoComm};
pub use node_ids::assign_node_ids;
