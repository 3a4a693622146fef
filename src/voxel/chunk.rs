//! Chunk system: flat block-id grids for fixed-size regions of the world

use crate::core::{Error, Result};
use crate::render::InstanceTransform;
use crate::voxel::block::{BlockId, AIR};
use glam::Vec3;
use serde::{Deserialize, Serialize};

/// Integer coordinate identifying a chunk on the horizontal (X/Y) grid. Z is up
/// and not chunked: a chunk spans the full world height.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub struct ChunkCoord {
    pub x: i32,
    pub y: i32,
}

impl ChunkCoord {
    /// Create a new chunk coordinate
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    /// Convert world position to chunk coordinate
    ///
    /// `chunk_world_size` is the edge length of one chunk in world units
    /// (`chunk_size * cell_size`).
    pub fn from_world_pos(pos: Vec3, chunk_world_size: f32) -> Self {
        Self {
            x: (pos.x / chunk_world_size).floor() as i32,
            y: (pos.y / chunk_world_size).floor() as i32,
        }
    }

    /// World-space origin (minimum corner, z = 0) of this chunk
    pub fn world_origin(&self, chunk_world_size: f32) -> Vec3 {
        Vec3::new(
            self.x as f32 * chunk_world_size,
            self.y as f32 * chunk_world_size,
            0.0,
        )
    }

    /// Squared grid distance `dx² + dy²`
    pub fn distance_sq(&self, other: ChunkCoord) -> i64 {
        let dx = (self.x - other.x) as i64;
        let dy = (self.y - other.y) as i64;
        dx * dx + dy * dy
    }

    /// Coordinate offset by `(dx, dy)`
    pub fn offset(&self, dx: i32, dy: i32) -> Self {
        Self::new(self.x + dx, self.y + dy)
    }
}

/// Block data for one chunk
///
/// Cells are stored flat, `index = x + y * size_x + z * size_x * size_y`.
#[derive(Clone, Debug)]
pub struct VoxelChunk {
    coord: ChunkCoord,
    size_x: u32,
    size_y: u32,
    size_z: u32,
    /// World units per voxel edge
    cell_size: f32,
    blocks: Vec<BlockId>,
    /// Blocks changed since the renderer was last synchronized
    dirty: bool,
}

impl VoxelChunk {
    /// Create an all-air chunk. Sizes are clamped to at least 1.
    pub fn new(coord: ChunkCoord, size_x: u32, size_y: u32, size_z: u32, cell_size: f32) -> Self {
        let mut chunk = Self {
            coord,
            size_x: 1,
            size_y: 1,
            size_z: 1,
            cell_size,
            blocks: Vec::new(),
            dirty: false,
        };
        chunk.initialize(size_x, size_y, size_z, cell_size);
        chunk
    }

    /// Reset dimensions and block storage. All cells become air.
    pub fn initialize(&mut self, size_x: u32, size_y: u32, size_z: u32, cell_size: f32) {
        self.size_x = size_x.max(1);
        self.size_y = size_y.max(1);
        self.size_z = size_z.max(1);
        self.cell_size = cell_size;
        self.blocks = vec![AIR; self.volume()];
        self.dirty = false;
    }

    pub fn coord(&self) -> ChunkCoord {
        self.coord
    }

    pub(crate) fn set_coord(&mut self, coord: ChunkCoord) {
        self.coord = coord;
    }

    /// `(size_x, size_y, size_z)`
    pub fn dimensions(&self) -> (u32, u32, u32) {
        (self.size_x, self.size_y, self.size_z)
    }

    pub fn cell_size(&self) -> f32 {
        self.cell_size
    }

    /// Number of cells
    pub fn volume(&self) -> usize {
        self.size_x as usize * self.size_y as usize * self.size_z as usize
    }

    /// Flat index of `(x, y, z)`, or `None` when outside the volume
    pub fn index_of(&self, x: i32, y: i32, z: i32) -> Option<usize> {
        if x < 0 || y < 0 || z < 0 {
            return None;
        }
        let (x, y, z) = (x as u32, y as u32, z as u32);
        if x >= self.size_x || y >= self.size_y || z >= self.size_z {
            return None;
        }
        Some(x as usize + y as usize * self.size_x as usize + z as usize * (self.size_x * self.size_y) as usize)
    }

    /// Cell position of a flat index
    pub fn position_of(&self, index: usize) -> (u32, u32, u32) {
        let layer = (self.size_x * self.size_y) as usize;
        let z = index / layer;
        let rem = index % layer;
        let y = rem / self.size_x as usize;
        let x = rem % self.size_x as usize;
        (x as u32, y as u32, z as u32)
    }

    /// Block at `(x, y, z)`; air for anything outside the volume
    pub fn get_block(&self, x: i32, y: i32, z: i32) -> BlockId {
        self.index_of(x, y, z).map_or(AIR, |i| self.blocks[i])
    }

    /// Overwrite one cell. Returns false (and changes nothing) when out of bounds.
    ///
    /// Does not talk to the renderer; route edits through the chunk's
    /// [`InstanceSyncTable`](crate::voxel::instancing::InstanceSyncTable).
    pub fn set_block(&mut self, x: i32, y: i32, z: i32, id: BlockId) -> bool {
        match self.index_of(x, y, z) {
            Some(i) => {
                self.blocks[i] = id;
                true
            }
            None => false,
        }
    }

    /// Like [`set_block`](Self::set_block) but reports the failing coordinate
    pub fn try_set_block(&mut self, x: i32, y: i32, z: i32, id: BlockId) -> Result<()> {
        if self.set_block(x, y, z, id) {
            Ok(())
        } else {
            Err(Error::OutOfBounds { x, y, z })
        }
    }

    /// Replace every cell at once. Length must equal the chunk volume.
    pub fn replace_all(&mut self, new_blocks: Vec<BlockId>) -> Result<()> {
        if new_blocks.len() != self.volume() {
            return Err(Error::ShapeMismatch {
                expected: self.volume(),
                actual: new_blocks.len(),
            });
        }
        self.blocks = new_blocks;
        self.dirty = true;
        Ok(())
    }

    pub fn blocks(&self) -> &[BlockId] {
        &self.blocks
    }

    /// Number of non-air cells
    pub fn solid_count(&self) -> usize {
        self.blocks.iter().filter(|&&b| b != AIR).count()
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    /// Called once the renderer matches `blocks`
    pub fn mark_clean(&mut self) {
        self.dirty = false;
    }

    /// Render transform for the cell at `index`, local to the chunk origin
    pub fn cell_transform(&self, index: usize) -> InstanceTransform {
        let (x, y, z) = self.position_of(index);
        InstanceTransform::for_cell(x, y, z, self.cell_size)
    }
}
