//! Interface evaluation and cell measures.

pub mod engine;
pub mod level_set;
pub mod quality;
