//! Noise-based procedural terrain generation

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use noise::{NoiseFn, Perlin};
use serde::{Deserialize, Serialize};

use crate::core::{Error, Result};
use crate::voxel::block::{self, BlockId, AIR};
use crate::voxel::chunk::VoxelChunk;

/// Parameters controlling terrain generation for one world
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorldGenParams {
    pub seed: i32,
    pub terrain_scale: f32,     // Noise frequency (smaller = smoother)
    pub height_multiplier: f32, // Height of a noise value of 1.0, in voxels
    pub world_height: u32,      // Voxels per column
    pub chunk_size: u32,        // Voxels per chunk edge on X and Y
}

impl Default for WorldGenParams {
    fn default() -> Self {
        Self {
            seed: 12345,
            terrain_scale: 0.03,
            height_multiplier: 10.0,
            world_height: 16,
            chunk_size: 16,
        }
    }
}

impl WorldGenParams {
    pub fn validate(&self) -> Result<()> {
        if self.world_height < 1 {
            return Err(Error::InvalidConfig("world_height must be at least 1".into()));
        }
        if self.chunk_size < 1 {
            return Err(Error::InvalidConfig("chunk_size must be at least 1".into()));
        }
        if !(self.terrain_scale.is_finite() && self.terrain_scale > 0.0) {
            return Err(Error::InvalidConfig(format!(
                "terrain_scale must be positive, got {}",
                self.terrain_scale
            )));
        }
        if !(self.height_multiplier.is_finite() && self.height_multiplier >= 0.0) {
            return Err(Error::InvalidConfig(format!(
                "height_multiplier must be non-negative, got {}",
                self.height_multiplier
            )));
        }
        Ok(())
    }

    /// Cells in one generated chunk
    pub fn chunk_volume(&self) -> usize {
        self.chunk_size as usize * self.chunk_size as usize * self.world_height as usize
    }
}

/// Block ids used for each layer of a column
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MaterialLayers {
    pub bedrock: BlockId,
    pub surface: BlockId,
    pub subsurface: BlockId,
    pub fill: BlockId,
}

impl Default for MaterialLayers {
    fn default() -> Self {
        Self {
            bedrock: block::BEDROCK,
            surface: block::GRASS,
            subsurface: block::DIRT,
            fill: block::STONE,
        }
    }
}

impl MaterialLayers {
    /// Material at height `z` in a column whose top solid cell is `surface_z`
    pub fn block_at(&self, z: i32, surface_z: i32) -> BlockId {
        if z > surface_z {
            AIR
        } else if z == 0 {
            self.bedrock
        } else if z == surface_z {
            self.surface
        } else if z >= surface_z - 2 {
            self.subsurface
        } else {
            self.fill
        }
    }
}

/// Height field and chunk filler over a per-seed noise cache
///
/// One generator is shared by everything generating a world, including
/// worker threads. The cache lock only covers the lookup; sampling runs on
/// the shared immutable noise source.
pub struct TerrainGenerator {
    noise_cache: Mutex<HashMap<i32, Arc<Perlin>>>,
    materials: MaterialLayers,
}

impl TerrainGenerator {
    pub fn new() -> Self {
        Self::with_materials(MaterialLayers::default())
    }

    pub fn with_materials(materials: MaterialLayers) -> Self {
        Self {
            noise_cache: Mutex::new(HashMap::new()),
            materials,
        }
    }

    pub fn materials(&self) -> &MaterialLayers {
        &self.materials
    }

    fn noise_for(&self, seed: i32) -> Arc<Perlin> {
        let mut cache = self.noise_cache.lock().unwrap_or_else(|e| e.into_inner());
        cache
            .entry(seed)
            .or_insert_with(|| {
                log::debug!("Creating noise source for seed {seed}");
                Arc::new(Perlin::new(seed as u32))
            })
            .clone()
    }

    /// Seeds with a cached noise source, sorted
    pub fn cached_seeds(&self) -> Vec<i32> {
        let cache = self.noise_cache.lock().unwrap_or_else(|e| e.into_inner());
        let mut seeds: Vec<i32> = cache.keys().copied().collect();
        seeds.sort_unstable();
        seeds
    }

    /// Surface height of the column at world voxel position `(world_x, world_y)`,
    /// in `[0, world_height - 1]`
    pub fn height_at(&self, world_x: i32, world_y: i32, params: &WorldGenParams) -> i32 {
        let noise = self.noise_for(params.seed);
        self.sample_height(&noise, world_x, world_y, params)
    }

    fn sample_height(&self, noise: &Perlin, world_x: i32, world_y: i32, params: &WorldGenParams) -> i32 {
        let scale = params.terrain_scale as f64;
        let value = noise.get([world_x as f64 * scale, world_y as f64 * scale]);

        // Map [-1, 1] to [0, 1]
        let normalized = (value + 1.0) * 0.5;
        let height = (normalized * params.height_multiplier as f64).round() as i32;
        let top = params.world_height.max(1) as i32 - 1;
        height.clamp(0, top)
    }

    /// Heights for every column of a chunk, stored at `x + y * chunk_size`
    pub fn chunk_heights(&self, chunk_x: i32, chunk_y: i32, params: &WorldGenParams) -> Vec<i32> {
        let noise = self.noise_for(params.seed);
        let size = params.chunk_size as i32;
        let base_x = chunk_x * size;
        let base_y = chunk_y * size;

        let mut heights = Vec::with_capacity((size * size) as usize);
        for y in 0..size {
            for x in 0..size {
                heights.push(self.sample_height(&noise, base_x + x, base_y + y, params));
            }
        }
        heights
    }

    /// Block data for a whole chunk, in chunk cell order
    pub fn generate_blocks(&self, chunk_x: i32, chunk_y: i32, params: &WorldGenParams) -> Vec<BlockId> {
        let size = params.chunk_size as usize;
        let layer = size * size;
        let heights = self.chunk_heights(chunk_x, chunk_y, params);

        let mut blocks = vec![AIR; params.chunk_volume()];
        for (column, &surface_z) in heights.iter().enumerate() {
            for z in 0..=surface_z {
                blocks[column + z as usize * layer] = self.materials.block_at(z, surface_z);
            }
        }
        blocks
    }

    /// Fill `chunk` with terrain for chunk-grid position `(chunk_x, chunk_y)`.
    ///
    /// The chunk must be `chunk_size × chunk_size × world_height`.
    pub fn fill_chunk(
        &self,
        chunk: &mut VoxelChunk,
        chunk_x: i32,
        chunk_y: i32,
        params: &WorldGenParams,
    ) -> Result<()> {
        let expected = (params.chunk_size, params.chunk_size, params.world_height);
        if chunk.dimensions() != expected {
            return Err(Error::ShapeMismatch {
                expected: params.chunk_volume(),
                actual: chunk.volume(),
            });
        }

        chunk.replace_all(self.generate_blocks(chunk_x, chunk_y, params))?;
        log::trace!("Filled chunk ({chunk_x}, {chunk_y}) with {} solid blocks", chunk.solid_count());
        Ok(())
    }
}

impl Default for TerrainGenerator {
    fn default() -> Self {
        Self::new()
    }
}
