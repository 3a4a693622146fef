//! Dynamic chunk loading and world persistence

pub mod config;
pub mod disk_io;
pub mod manager;
pub mod world_store;

pub use config::StreamingConfig;
pub use disk_io::{
    ChunkRecord, WorldMeta,
    chunk_path, meta_path, world_dir,
    save_world, load_meta, load_chunk_record,
    world_exists, chunk_exists,
};
pub use manager::{ChunkStreamingManager, RendererFactory, StreamingReport};
pub use world_store::{Completion, Ticket, WorldStore};
