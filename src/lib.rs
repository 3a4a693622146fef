//! Chunkworld - chunked voxel world with instanced render sync, streaming and seeded terrain

pub mod core;
pub mod render;
pub mod voxel;
pub mod terrain;
pub mod streaming;
pub mod session;
