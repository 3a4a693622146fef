//! Renderable chunk: block data, instance table and renderer binding in one place

use crate::core::{Error, Result};
use crate::render::InstanceRenderer;
use crate::voxel::block::BlockId;
use crate::voxel::chunk::{ChunkCoord, VoxelChunk};
use crate::voxel::instancing::{EditOutcome, InstanceSyncTable};
use glam::Vec3;

/// What the rest of the world needs from a chunk
pub trait ChunkInterface {
    /// Replace every block; the length must match the chunk volume
    fn set_voxel_data(&mut self, blocks: Vec<BlockId>) -> Result<()>;
    fn set_coordinate(&mut self, coord: ChunkCoord);
    fn coordinate(&self) -> ChunkCoord;
    /// Bring the renderer in line with the block data
    fn refresh(&mut self) -> Result<()>;
    fn voxel_data(&self) -> &[BlockId];
}

/// The one concrete chunk type
pub struct RenderChunk {
    voxels: VoxelChunk,
    table: InstanceSyncTable,
    renderer: Option<Box<dyn InstanceRenderer>>,
    /// Table and renderer were built from `voxels` at least once
    built: bool,
}

impl RenderChunk {
    pub fn new(voxels: VoxelChunk) -> Self {
        let table = InstanceSyncTable::new(voxels.volume());
        Self {
            voxels,
            table,
            renderer: None,
            built: false,
        }
    }

    /// Attach a renderer. The next [`refresh`](ChunkInterface::refresh) rebuilds into it.
    pub fn bind_renderer(&mut self, renderer: Box<dyn InstanceRenderer>) {
        self.renderer = Some(renderer);
        self.built = false;
    }

    pub fn has_renderer(&self) -> bool {
        self.renderer.is_some()
    }

    pub fn renderer(&self) -> Option<&dyn InstanceRenderer> {
        self.renderer.as_deref()
    }

    pub fn voxels(&self) -> &VoxelChunk {
        &self.voxels
    }

    /// Mutable block grid for bulk fills. Marks the chunk dirty.
    pub fn voxels_mut(&mut self) -> &mut VoxelChunk {
        self.voxels.mark_dirty();
        &mut self.voxels
    }

    pub fn table(&self) -> &InstanceSyncTable {
        &self.table
    }

    /// World-space origin of the chunk (renderer transforms are relative to it)
    pub fn world_origin(&self) -> Vec3 {
        let (size_x, _, _) = self.voxels.dimensions();
        self.voxels.coord().world_origin(size_x as f32 * self.voxels.cell_size())
    }

    pub fn get_block(&self, x: i32, y: i32, z: i32) -> BlockId {
        self.voxels.get_block(x, y, z)
    }

    /// Renderer matches the block data, so edits can be applied as deltas
    pub fn is_in_sync(&self) -> bool {
        self.built && self.renderer.is_some() && !self.voxels.is_dirty()
    }

    /// Set one block.
    ///
    /// With `update_mesh` and a chunk that is in sync, the change is pushed to
    /// the renderer immediately as a single add, remove or update. Otherwise
    /// the chunk is only marked dirty and the next refresh rebuilds it.
    /// Returns the applied edit, or `None` when the sync was deferred.
    pub fn set_block(&mut self, x: i32, y: i32, z: i32, id: BlockId, update_mesh: bool) -> Result<Option<EditOutcome>> {
        let cell = self.voxels.index_of(x, y, z).ok_or(Error::OutOfBounds { x, y, z })?;
        let old = self.voxels.get_block(x, y, z);
        if old == id {
            return Ok(Some(EditOutcome::Unchanged));
        }

        let in_sync = self.is_in_sync();
        self.voxels.set_block(x, y, z, id);

        match self.renderer.as_deref_mut() {
            Some(renderer) if update_mesh && in_sync => {
                let transform = self.voxels.cell_transform(cell);
                let outcome = self.table.apply_edit(cell, old, id, transform, renderer);
                log::trace!("Block ({x}, {y}, {z}) {old} -> {id}: {outcome:?}");
                Ok(Some(outcome))
            }
            _ => {
                self.voxels.mark_dirty();
                Ok(None)
            }
        }
    }

    /// Drop all render instances. Block data is kept.
    pub fn release(&mut self) {
        if let Some(renderer) = self.renderer.as_deref_mut() {
            renderer.clear_all_instances();
        }
        self.table.reset(self.voxels.volume());
        self.built = false;
    }

    pub fn is_dirty(&self) -> bool {
        self.voxels.is_dirty() || !self.built
    }
}

impl ChunkInterface for RenderChunk {
    fn set_voxel_data(&mut self, blocks: Vec<BlockId>) -> Result<()> {
        self.voxels.replace_all(blocks)
    }

    fn set_coordinate(&mut self, coord: ChunkCoord) {
        self.voxels.set_coord(coord);
    }

    fn coordinate(&self) -> ChunkCoord {
        self.voxels.coord()
    }

    fn refresh(&mut self) -> Result<()> {
        let coord = self.voxels.coord();
        let Some(renderer) = self.renderer.as_deref_mut() else {
            return Err(Error::RendererUnavailable { x: coord.x, y: coord.y });
        };

        if self.voxels.is_dirty() || !self.built {
            self.table.rebuild_all(&self.voxels, renderer);
            self.voxels.mark_clean();
            self.built = true;
        }
        Ok(())
    }

    fn voxel_data(&self) -> &[BlockId] {
        self.voxels.blocks()
    }
}
