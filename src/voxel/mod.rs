//! Voxel data structures and operations

pub mod block;
pub mod chunk;
pub mod chunk_handle;
pub mod instancing;
pub mod render_chunk;

pub use block::{BlockId, BlockRegistry, BlockType};
pub use chunk::{ChunkCoord, VoxelChunk};
pub use chunk_handle::{ChunkArena, ChunkHandle, ChunkState};
pub use instancing::{EditOutcome, InstanceSyncTable};
pub use render_chunk::{ChunkInterface, RenderChunk};
