//! Block ids and the block type registry

use std::collections::HashMap;

/// Material identifier stored in every voxel cell. `0` is air.
pub type BlockId = u16;

/// Empty cell, never rendered
pub const AIR: BlockId = 0;
/// Terrain surface layer
pub const GRASS: BlockId = 1;
/// Bottom layer of every column
pub const BEDROCK: BlockId = 2;
/// Deep fill below the subsurface band
pub const STONE: BlockId = 3;
/// Band right below the surface
pub const DIRT: BlockId = 7;

/// Definition of a block type
#[derive(Clone, Debug, PartialEq)]
pub struct BlockType {
    pub id: BlockId,
    pub name: String,
    /// Time needed to break the block
    pub durability: f32,
    /// false for indestructible blocks such as bedrock
    pub destructible: bool,
}

impl BlockType {
    pub fn new(id: BlockId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            durability: 100.0,
            destructible: true,
        }
    }

    pub fn with_durability(mut self, durability: f32) -> Self {
        self.durability = durability;
        self
    }

    pub fn indestructible(mut self) -> Self {
        self.destructible = false;
        self
    }
}

/// Runtime registry of block definitions, searchable by id and by name
#[derive(Debug, Default)]
pub struct BlockRegistry {
    blocks: Vec<BlockType>,
    by_id: HashMap<BlockId, usize>,
    by_name: HashMap<String, usize>,
}

impl BlockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry pre-filled with the blocks the terrain generator emits
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(BlockType::new(AIR, "air"));
        registry.register(BlockType::new(GRASS, "grass").with_durability(60.0));
        registry.register(BlockType::new(BEDROCK, "bedrock").indestructible());
        registry.register(BlockType::new(STONE, "stone").with_durability(150.0));
        registry.register(BlockType::new(DIRT, "dirt").with_durability(50.0));
        registry
    }

    /// Register a block. Air is only reachable by name, unnamed blocks only by id.
    /// Re-registering an id or name replaces the previous mapping.
    pub fn register(&mut self, block: BlockType) {
        let index = self.blocks.len();
        if block.id != AIR {
            self.by_id.insert(block.id, index);
        }
        if !block.name.is_empty() {
            self.by_name.insert(block.name.clone(), index);
        }
        log::trace!("Registered block {} ({:?})", block.id, block.name);
        self.blocks.push(block);
    }

    pub fn find_by_id(&self, id: BlockId) -> Option<&BlockType> {
        self.by_id.get(&id).map(|&i| &self.blocks[i])
    }

    pub fn find_by_name(&self, name: &str) -> Option<&BlockType> {
        self.by_name.get(name).map(|&i| &self.blocks[i])
    }

    /// Number of ids currently resolvable
    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}
