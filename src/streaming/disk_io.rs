//! World serialization and disk I/O
//!
//! Layout under the save root:
//!
//! ```text
//! <root>/<world>/world_meta.json
//! <root>/<world>/chunks/chunk_<X>_<Y>.json
//! ```

use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::core::{Error, Result};
use crate::voxel::block::BlockId;
use crate::voxel::chunk::{ChunkCoord, VoxelChunk};

pub const META_FILE_NAME: &str = "world_meta.json";
pub const CHUNKS_DIR_NAME: &str = "chunks";

/// World-level save data
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WorldMeta {
    #[serde(alias = "Version")]
    pub version: i32,
    #[serde(alias = "Seed")]
    pub seed: i32,
    #[serde(alias = "WorldName")]
    pub world_name: String,
    #[serde(alias = "PlayerLocation")]
    pub player_location: [f32; 3],
    /// Pitch, yaw, roll
    #[serde(alias = "PlayerRotation")]
    pub player_rotation: [f32; 3],
    /// Unix seconds, as a string
    #[serde(alias = "LastSavedTime")]
    pub last_saved_time: String,
    /// Every chunk with a record on disk
    #[serde(alias = "Chunks")]
    pub chunks: Vec<ChunkCoord>,
}

impl Default for WorldMeta {
    fn default() -> Self {
        Self {
            version: 1,
            seed: 0,
            world_name: "Unknown".to_string(),
            player_location: [0.0; 3],
            player_rotation: [0.0; 3],
            last_saved_time: String::new(),
            chunks: Vec::new(),
        }
    }
}

impl WorldMeta {
    pub fn new(world_name: impl Into<String>, seed: i32) -> Self {
        Self {
            world_name: world_name.into(),
            seed,
            ..Default::default()
        }
    }

    /// Stamp `last_saved_time` with the current time
    pub fn touch(&mut self) {
        let secs = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        self.last_saved_time = secs.to_string();
    }
}

/// Saved block data of one chunk
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ChunkRecord {
    #[serde(rename = "X")]
    pub x: i32,
    #[serde(rename = "Y")]
    pub y: i32,
    /// Ids must fit a `BlockId` (0..=65535). A file holding a negative or
    /// larger id fails to parse and the chunk is regenerated.
    pub blocks: Vec<BlockId>,
}

impl ChunkRecord {
    pub fn from_chunk(chunk: &VoxelChunk) -> Self {
        let coord = chunk.coord();
        Self {
            x: coord.x,
            y: coord.y,
            blocks: chunk.blocks().to_vec(),
        }
    }

    pub fn coord(&self) -> ChunkCoord {
        ChunkCoord::new(self.x, self.y)
    }
}

/// Directory holding one world
pub fn world_dir(root: &Path, world_name: &str) -> PathBuf {
    root.join(world_name)
}

/// Path of a world's meta file
pub fn meta_path(root: &Path, world_name: &str) -> PathBuf {
    world_dir(root, world_name).join(META_FILE_NAME)
}

/// Get the file path for a chunk
pub fn chunk_path(root: &Path, world_name: &str, coord: ChunkCoord) -> PathBuf {
    world_dir(root, world_name)
        .join(CHUNKS_DIR_NAME)
        .join(format!("chunk_{}_{}.json", coord.x, coord.y))
}

fn check_world_name(world_name: &str) -> Result<()> {
    if world_name.is_empty() {
        return Err(Error::PersistenceIo("world name is empty".into()));
    }
    Ok(())
}

/// Check if a world has a meta file
pub fn world_exists(root: &Path, world_name: &str) -> bool {
    !world_name.is_empty() && meta_path(root, world_name).is_file()
}

/// Check if a chunk record exists on disk
pub fn chunk_exists(root: &Path, world_name: &str, coord: ChunkCoord) -> bool {
    !world_name.is_empty() && chunk_path(root, world_name, coord).is_file()
}

/// Write the meta file, then every chunk record. Stops at the first failure.
pub async fn save_world(root: &Path, world_name: &str, meta: &WorldMeta, chunks: &[ChunkRecord]) -> Result<()> {
    check_world_name(world_name)?;

    let chunk_dir = world_dir(root, world_name).join(CHUNKS_DIR_NAME);
    tokio::fs::create_dir_all(&chunk_dir).await?;

    let meta_json = serde_json::to_vec_pretty(meta)?;
    tokio::fs::write(meta_path(root, world_name), meta_json).await?;

    for record in chunks {
        let json = serde_json::to_vec(record)?;
        tokio::fs::write(chunk_path(root, world_name, record.coord()), json).await?;
    }

    Ok(())
}

/// Load a world's meta file
pub async fn load_meta(root: &Path, world_name: &str) -> Result<WorldMeta> {
    check_world_name(world_name)?;
    let bytes = tokio::fs::read(meta_path(root, world_name)).await?;
    Ok(serde_json::from_slice(&bytes)?)
}

/// Load one chunk record, blocking the calling thread
pub fn load_chunk_record(root: &Path, world_name: &str, coord: ChunkCoord) -> Result<ChunkRecord> {
    check_world_name(world_name)?;
    let bytes = std::fs::read(chunk_path(root, world_name, coord))?;
    let record: ChunkRecord = serde_json::from_slice(&bytes)?;
    if record.coord() != coord {
        return Err(Error::PersistenceIo(format!(
            "chunk file for ({}, {}) holds ({}, {})",
            coord.x, coord.y, record.x, record.y
        )));
    }
    Ok(record)
}
