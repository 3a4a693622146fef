//! Procedural terrain generation

pub mod generator;
pub use generator::{MaterialLayers, TerrainGenerator, WorldGenParams};
