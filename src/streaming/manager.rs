//! Chunk streaming around a moving reference point
//!
//! The manager is the sole owner of every live chunk. Each coordinate moves
//! through `Unloaded -> Loading -> Loaded -> Unloaded`; a chunk whose render
//! instances could not be built yet stays `Loading` until
//! [`ChunkStreamingManager::refresh_dirty`] succeeds for it.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::PathBuf;
use std::sync::Arc;

use glam::Vec3;

use crate::core::{Error, Result};
use crate::render::InstanceRenderer;
use crate::streaming::config::StreamingConfig;
use crate::streaming::disk_io::{self, ChunkRecord};
use crate::streaming::world_store::WorldStore;
use crate::terrain::{TerrainGenerator, WorldGenParams};
use crate::voxel::block::{BlockId, AIR};
use crate::voxel::chunk::{ChunkCoord, VoxelChunk};
use crate::voxel::chunk_handle::{ChunkArena, ChunkHandle, ChunkState};
use crate::voxel::instancing::EditOutcome;
use crate::voxel::render_chunk::{ChunkInterface, RenderChunk};

/// Creates the renderer for a newly loaded chunk. `None` means no renderer is
/// available yet; the chunk is kept and retried by `refresh_dirty`.
pub type RendererFactory = Box<dyn FnMut(ChunkCoord) -> Option<Box<dyn InstanceRenderer>>>;

/// What one `update` call changed
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StreamingReport {
    /// Newly loaded chunks, in scan order
    pub loaded: Vec<ChunkCoord>,
    /// Removed chunks, sorted
    pub unloaded: Vec<ChunkCoord>,
    /// Chunks that failed to load this time, in scan order
    pub failed: Vec<ChunkCoord>,
}

impl StreamingReport {
    pub fn is_empty(&self) -> bool {
        self.loaded.is_empty() && self.unloaded.is_empty() && self.failed.is_empty()
    }
}

/// Saved world the manager restores chunks from
struct BoundWorld {
    root: PathBuf,
    name: String,
}

/// Owns live chunks and decides which ones exist
pub struct ChunkStreamingManager {
    generator: Arc<TerrainGenerator>,
    params: Option<WorldGenParams>,
    config: StreamingConfig,
    renderer_factory: Option<RendererFactory>,
    world: Option<BoundWorld>,

    chunks: ChunkArena<RenderChunk>,
    loaded_chunks: HashMap<ChunkCoord, ChunkHandle>,
    /// Loaded but render instances not built yet
    pending_refresh: BTreeSet<ChunkCoord>,
    /// Edited since the last save
    modified: BTreeSet<ChunkCoord>,
    /// Edited chunks that were unloaded before being saved
    unsaved: BTreeMap<ChunkCoord, ChunkRecord>,
    /// Latest record handed out for saving, per chunk, until the save is settled
    in_flight: BTreeMap<ChunkCoord, ChunkRecord>,
}

impl ChunkStreamingManager {
    pub fn new(generator: Arc<TerrainGenerator>, config: StreamingConfig) -> Self {
        Self {
            generator,
            params: None,
            config,
            renderer_factory: None,
            world: None,
            chunks: ChunkArena::new(),
            loaded_chunks: HashMap::new(),
            pending_refresh: BTreeSet::new(),
            modified: BTreeSet::new(),
            unsaved: BTreeMap::new(),
            in_flight: BTreeMap::new(),
        }
    }

    pub fn params(&self) -> Option<&WorldGenParams> {
        self.params.as_ref()
    }

    pub fn config(&self) -> &StreamingConfig {
        &self.config
    }

    pub fn generator(&self) -> &Arc<TerrainGenerator> {
        &self.generator
    }

    /// Set world generation parameters.
    ///
    /// Loaded chunks built with different parameters are unloaded.
    pub fn set_params(&mut self, params: WorldGenParams) -> Result<()> {
        params.validate()?;
        if self.params.as_ref() == Some(&params) {
            return Ok(());
        }
        if !self.loaded_chunks.is_empty() {
            log::info!("World parameters changed, unloading {} chunks", self.loaded_chunks.len());
            self.unload_all();
        }
        self.params = Some(params);
        Ok(())
    }

    /// Change cell size or view radius. Unloads everything when the cell size changes.
    pub fn set_config(&mut self, config: StreamingConfig) -> Result<()> {
        config.validate()?;
        if config.cell_size != self.config.cell_size && !self.loaded_chunks.is_empty() {
            self.unload_all();
        }
        self.config = config;
        Ok(())
    }

    pub fn set_renderer_factory(&mut self, factory: RendererFactory) {
        self.renderer_factory = Some(factory);
    }

    /// Restore chunks from `world_name` under the store's root when a record exists
    pub fn bind_store(&mut self, store: &WorldStore, world_name: impl Into<String>) {
        let name = world_name.into();
        log::debug!("Streaming bound to saved world '{}'", name);
        self.world = Some(BoundWorld {
            root: store.root().to_path_buf(),
            name,
        });
    }

    pub fn unbind_store(&mut self) {
        self.world = None;
    }

    /// Edge length of one chunk in world units
    pub fn chunk_world_size(&self) -> Option<f32> {
        self.params
            .as_ref()
            .map(|p| p.chunk_size as f32 * self.config.cell_size)
    }

    fn ready_params(&self) -> Result<WorldGenParams> {
        let params = self
            .params
            .clone()
            .ok_or_else(|| Error::NotReady("world generation parameters not set".into()))?;
        if self.renderer_factory.is_none() {
            return Err(Error::NotReady("renderer factory not set".into()));
        }
        Ok(params)
    }

    /// Stream chunks around `reference_point`.
    ///
    /// Unloads chunks farther than `radius + 1` (squared grid distance), then
    /// loads every missing chunk in the `[-radius, radius]` square that lies
    /// within that same distance. A negative radius counts as zero.
    pub fn update(&mut self, reference_point: Vec3, radius: i32) -> Result<StreamingReport> {
        let params = self.ready_params()?;
        let radius = radius.max(0);
        let chunk_world_size = params.chunk_size as f32 * self.config.cell_size;
        let center = ChunkCoord::from_world_pos(reference_point, chunk_world_size);
        let keep_sq = (radius as i64 + 1).pow(2);

        let mut report = StreamingReport::default();

        let mut to_unload: Vec<ChunkCoord> = self
            .loaded_chunks
            .iter()
            .filter(|(coord, handle)| coord.distance_sq(center) > keep_sq || !self.chunks.contains(**handle))
            .map(|(coord, _)| *coord)
            .collect();
        to_unload.sort_unstable();
        for coord in to_unload {
            self.unload_chunk(coord);
            report.unloaded.push(coord);
        }

        for dx in -radius..=radius {
            for dy in -radius..=radius {
                let coord = center.offset(dx, dy);
                if coord.distance_sq(center) > keep_sq || self.loaded_chunks.contains_key(&coord) {
                    continue;
                }
                match self.request_chunk(coord.x, coord.y) {
                    Ok(_) => report.loaded.push(coord),
                    Err(e) => {
                        log::warn!("Failed to load chunk ({}, {}): {}", coord.x, coord.y, e);
                        report.failed.push(coord);
                    }
                }
            }
        }

        if !report.is_empty() {
            log::debug!(
                "Streaming around ({}, {}): +{} -{} ({} failed), {} loaded",
                center.x,
                center.y,
                report.loaded.len(),
                report.unloaded.len(),
                report.failed.len(),
                self.loaded_chunks.len()
            );
        }
        Ok(report)
    }

    /// Load the chunk at `(chunk_x, chunk_y)` if it isn't loaded yet
    pub fn request_chunk(&mut self, chunk_x: i32, chunk_y: i32) -> Result<ChunkHandle> {
        let coord = ChunkCoord::new(chunk_x, chunk_y);
        if let Some(&handle) = self.loaded_chunks.get(&coord) {
            if self.chunks.contains(handle) {
                return Ok(handle);
            }
            self.loaded_chunks.remove(&coord);
        }

        let params = self.ready_params()?;
        let voxels = VoxelChunk::new(
            coord,
            params.chunk_size,
            params.chunk_size,
            params.world_height,
            self.config.cell_size,
        );
        let mut chunk = RenderChunk::new(voxels);

        if !self.restore_blocks(&mut chunk) {
            self.generator.fill_chunk(chunk.voxels_mut(), chunk_x, chunk_y, &params)?;
        }

        if let Some(renderer) = self.renderer_factory.as_mut().and_then(|make| make(coord)) {
            chunk.bind_renderer(renderer);
        }
        match chunk.refresh() {
            Ok(()) => {}
            Err(e) if e.is_retryable() => {
                log::debug!("Chunk ({}, {}) waiting for a renderer", chunk_x, chunk_y);
                self.pending_refresh.insert(coord);
            }
            Err(e) => return Err(e),
        }

        let handle = self.chunks.insert(chunk);
        self.loaded_chunks.insert(coord, handle);
        log::trace!("Loaded chunk ({}, {})", chunk_x, chunk_y);
        Ok(handle)
    }

    /// Fill `chunk` from an unsaved edit or a saved record. Returns false when
    /// the chunk has to be generated.
    fn restore_blocks(&mut self, chunk: &mut RenderChunk) -> bool {
        let coord = chunk.coordinate();

        if let Some(record) = self.unsaved.remove(&coord) {
            match chunk.set_voxel_data(record.blocks) {
                Ok(()) => {
                    self.modified.insert(coord);
                    return true;
                }
                Err(e) => log::warn!("Dropping unsaved edits of chunk ({}, {}): {}", coord.x, coord.y, e),
            }
        }

        if let Some(record) = self.in_flight.get(&coord) {
            match chunk.set_voxel_data(record.blocks.clone()) {
                Ok(()) => {
                    log::trace!("Restored chunk ({}, {}) from a save in flight", coord.x, coord.y);
                    return true;
                }
                Err(e) => log::warn!("Record in flight for chunk ({}, {}) unusable: {}", coord.x, coord.y, e),
            }
        }

        let Some(world) = &self.world else {
            return false;
        };
        if !disk_io::chunk_exists(&world.root, &world.name, coord) {
            return false;
        }
        match disk_io::load_chunk_record(&world.root, &world.name, coord)
            .and_then(|record| chunk.set_voxel_data(record.blocks))
        {
            Ok(()) => {
                log::trace!("Restored chunk ({}, {}) from '{}'", coord.x, coord.y, world.name);
                true
            }
            Err(e) => {
                log::warn!(
                    "Saved chunk ({}, {}) of '{}' unusable, regenerating: {}",
                    coord.x,
                    coord.y,
                    world.name,
                    e
                );
                false
            }
        }
    }

    /// Release and drop one chunk. Unsaved edits are kept for the next save.
    pub fn unload_chunk(&mut self, coord: ChunkCoord) -> bool {
        self.pending_refresh.remove(&coord);
        let Some(handle) = self.loaded_chunks.remove(&coord) else {
            return false;
        };
        let Some(mut chunk) = self.chunks.remove(handle) else {
            self.modified.remove(&coord);
            return false;
        };

        if self.modified.remove(&coord) {
            self.unsaved.insert(coord, ChunkRecord::from_chunk(chunk.voxels()));
        }
        chunk.release();
        log::trace!("Unloaded chunk ({}, {})", coord.x, coord.y);
        true
    }

    /// Unload every chunk
    pub fn unload_all(&mut self) {
        let mut coords: Vec<ChunkCoord> = self.loaded_chunks.keys().copied().collect();
        coords.sort_unstable();
        for coord in coords {
            self.unload_chunk(coord);
        }
    }

    /// Retry building render instances for chunks that are dirty or still
    /// waiting for a renderer. Returns how many chunks were rebuilt.
    pub fn refresh_dirty(&mut self) -> usize {
        let mut refreshed = 0;
        let mut coords: Vec<ChunkCoord> = self.loaded_chunks.keys().copied().collect();
        coords.sort_unstable();

        for coord in coords {
            let Some(&handle) = self.loaded_chunks.get(&coord) else {
                continue;
            };
            let Some(chunk) = self.chunks.get_mut(handle) else {
                continue;
            };
            if !chunk.is_dirty() {
                continue;
            }
            if !chunk.has_renderer() {
                if let Some(renderer) = self.renderer_factory.as_mut().and_then(|make| make(coord)) {
                    chunk.bind_renderer(renderer);
                }
            }
            match chunk.refresh() {
                Ok(()) => {
                    self.pending_refresh.remove(&coord);
                    refreshed += 1;
                }
                Err(e) => {
                    log::debug!("Chunk ({}, {}) still not refreshed: {}", coord.x, coord.y, e);
                    self.pending_refresh.insert(coord);
                }
            }
        }
        refreshed
    }

    /// Voxel coordinate containing world position `pos`
    pub fn world_to_voxel(&self, pos: Vec3) -> (i32, i32, i32) {
        let cell = self.config.cell_size;
        (
            (pos.x / cell).floor() as i32,
            (pos.y / cell).floor() as i32,
            (pos.z / cell).floor() as i32,
        )
    }

    /// Chunk and chunk-local cell of world voxel `(x, y)`
    fn locate(&self, x: i32, y: i32) -> Option<(ChunkCoord, i32, i32)> {
        let size = self.params.as_ref()?.chunk_size as i32;
        Some((
            ChunkCoord::new(x.div_euclid(size), y.div_euclid(size)),
            x.rem_euclid(size),
            y.rem_euclid(size),
        ))
    }

    /// Block at world voxel `(x, y, z)`; air when its chunk isn't loaded
    pub fn get_block_at(&self, x: i32, y: i32, z: i32) -> BlockId {
        self.locate(x, y)
            .and_then(|(coord, lx, ly)| {
                let chunk = self.chunk(*self.loaded_chunks.get(&coord)?)?;
                Some(chunk.get_block(lx, ly, z))
            })
            .unwrap_or(AIR)
    }

    /// Set the block at world voxel `(x, y, z)`, updating render instances in place
    pub fn set_block_at(&mut self, x: i32, y: i32, z: i32, id: BlockId) -> Result<Option<EditOutcome>> {
        let (coord, lx, ly) = self
            .locate(x, y)
            .ok_or_else(|| Error::NotReady("world generation parameters not set".into()))?;
        let handle = *self
            .loaded_chunks
            .get(&coord)
            .ok_or_else(|| Error::NotReady(format!("chunk ({}, {}) is not loaded", coord.x, coord.y)))?;
        let chunk = self
            .chunks
            .get_mut(handle)
            .ok_or_else(|| Error::NotReady(format!("chunk ({}, {}) is not loaded", coord.x, coord.y)))?;

        let outcome = chunk
            .set_block(lx, ly, z, id, true)
            .map_err(|_| Error::OutOfBounds { x, y, z })?;
        if outcome != Some(EditOutcome::Unchanged) {
            self.modified.insert(coord);
        }
        Ok(outcome)
    }

    /// Mark a loaded chunk as edited, for changes made through `chunk_mut`
    pub fn mark_modified(&mut self, coord: ChunkCoord) {
        if self.loaded_chunks.contains_key(&coord) {
            self.modified.insert(coord);
        }
    }

    /// Check if anything changed since the last `take_modified_records`
    pub fn has_modified(&self) -> bool {
        !self.modified.is_empty() || !self.unsaved.is_empty()
    }

    /// Records of every chunk edited since the last call, sorted by coordinate.
    /// Clears the modified set.
    ///
    /// The records stay in flight until passed to [`confirm_records`](Self::confirm_records)
    /// or [`requeue_records`](Self::requeue_records). Chunks reloaded meanwhile
    /// are restored from them.
    pub fn take_modified_records(&mut self) -> Vec<ChunkRecord> {
        let mut records = std::mem::take(&mut self.unsaved);
        for coord in std::mem::take(&mut self.modified) {
            let chunk = self
                .loaded_chunks
                .get(&coord)
                .and_then(|&handle| self.chunks.get(handle));
            if let Some(chunk) = chunk {
                records.insert(coord, ChunkRecord::from_chunk(chunk.voxels()));
            }
        }
        for (coord, record) in &records {
            self.in_flight.insert(*coord, record.clone());
        }
        records.into_values().collect()
    }

    /// Settle records whose save succeeded
    pub fn confirm_records(&mut self, records: &[ChunkRecord]) {
        for record in records {
            let coord = record.coord();
            if self.in_flight.get(&coord) == Some(record) {
                self.in_flight.remove(&coord);
            }
        }
    }

    /// Put back records whose save failed so the next save retries them.
    ///
    /// Chunks edited again in the meantime keep their newer state, and records
    /// superseded by a later save in flight are dropped.
    pub fn requeue_records(&mut self, records: Vec<ChunkRecord>) {
        for record in records {
            let coord = record.coord();
            if self.in_flight.get(&coord) != Some(&record) {
                log::trace!("Record of chunk ({}, {}) superseded, not requeued", coord.x, coord.y);
                continue;
            }
            self.in_flight.remove(&coord);

            let Some(handle) = self.handle_at(coord) else {
                self.unsaved.entry(coord).or_insert(record);
                continue;
            };
            if !self.modified.contains(&coord) {
                if let Some(chunk) = self.chunks.get_mut(handle) {
                    if chunk.voxel_data() != &record.blocks[..] {
                        if let Err(e) = chunk.set_voxel_data(record.blocks.clone()) {
                            log::warn!("Requeued chunk ({}, {}) kept for the next save: {}", coord.x, coord.y, e);
                            self.unsaved.insert(coord, record);
                            continue;
                        }
                        if chunk.refresh().is_err() {
                            self.pending_refresh.insert(coord);
                        }
                    }
                }
            }
            self.modified.insert(coord);
        }
    }

    /// Check if a save of chunk `coord` has not been settled yet
    pub fn is_in_flight(&self, coord: ChunkCoord) -> bool {
        self.in_flight.contains_key(&coord)
    }

    pub fn chunk(&self, handle: ChunkHandle) -> Option<&RenderChunk> {
        self.chunks.get(handle)
    }

    /// Direct chunk access. Edits made here are not tracked for saving unless
    /// followed by [`mark_modified`](Self::mark_modified).
    pub fn chunk_mut(&mut self, handle: ChunkHandle) -> Option<&mut RenderChunk> {
        self.chunks.get_mut(handle)
    }

    pub fn handle_at(&self, coord: ChunkCoord) -> Option<ChunkHandle> {
        self.loaded_chunks
            .get(&coord)
            .copied()
            .filter(|&handle| self.chunks.contains(handle))
    }

    pub fn chunk_state(&self, coord: ChunkCoord) -> ChunkState {
        match self.handle_at(coord) {
            None => ChunkState::Unloaded,
            Some(_) if self.pending_refresh.contains(&coord) => ChunkState::Loading,
            Some(_) => ChunkState::Loaded,
        }
    }

    /// Loaded coordinates, sorted
    pub fn loaded_coords(&self) -> Vec<ChunkCoord> {
        let mut coords: Vec<ChunkCoord> = self.loaded_chunks.keys().copied().collect();
        coords.sort_unstable();
        coords
    }

    pub fn loaded_count(&self) -> usize {
        self.loaded_chunks.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::InstanceBuffer;
    use crate::voxel::block;
    use std::cell::Cell;
    use std::rc::Rc;

    fn small_params() -> WorldGenParams {
        WorldGenParams {
            chunk_size: 4,
            world_height: 8,
            height_multiplier: 6.0,
            ..Default::default()
        }
    }

    fn manager() -> ChunkStreamingManager {
        let mut m = ChunkStreamingManager::new(Arc::new(TerrainGenerator::new()), StreamingConfig::default());
        m.set_params(small_params()).unwrap();
        m.set_renderer_factory(Box::new(|_| Some(Box::new(InstanceBuffer::new()) as Box<dyn InstanceRenderer>)));
        m
    }

    /// Centre of chunk `(x, y)` in world space with the default 128 cell size
    fn chunk_center(x: i32, y: i32) -> Vec3 {
        let size = 4.0 * 128.0;
        Vec3::new((x as f32 + 0.5) * size, (y as f32 + 0.5) * size, 0.0)
    }

    #[test]
    fn test_not_ready_without_params_or_factory() {
        let mut m = ChunkStreamingManager::new(Arc::new(TerrainGenerator::new()), StreamingConfig::default());
        assert!(matches!(m.request_chunk(0, 0), Err(Error::NotReady(_))));
        m.set_params(small_params()).unwrap();
        assert!(matches!(m.update(Vec3::ZERO, 1), Err(Error::NotReady(_))));
        assert_eq!(m.loaded_count(), 0);
    }

    #[test]
    fn test_invalid_params_rejected() {
        let mut m = manager();
        let bad = WorldGenParams { chunk_size: 0, ..Default::default() };
        assert!(matches!(m.set_params(bad), Err(Error::InvalidConfig(_))));
        assert_eq!(m.params(), Some(&small_params()));
    }

    #[test]
    fn test_radius_zero_loads_center_only() {
        let mut m = manager();
        let report = m.update(chunk_center(3, -2), 0).unwrap();
        assert_eq!(report.loaded, vec![ChunkCoord::new(3, -2)]);
        assert!(report.unloaded.is_empty());
        assert_eq!(m.loaded_coords(), vec![ChunkCoord::new(3, -2)]);
    }

    #[test]
    fn test_negative_radius_is_zero() {
        let mut m = manager();
        let report = m.update(chunk_center(0, 0), -5).unwrap();
        assert_eq!(report.loaded, vec![ChunkCoord::new(0, 0)]);
    }

    #[test]
    fn test_update_scan_order_and_count() {
        let mut m = manager();
        let report = m.update(chunk_center(0, 0), 1).unwrap();
        let expected: Vec<ChunkCoord> = (-1..=1)
            .flat_map(|dx| (-1..=1).map(move |dy| ChunkCoord::new(dx, dy)))
            .collect();
        assert_eq!(report.loaded, expected);
        assert_eq!(m.loaded_count(), 9);

        for coord in &expected {
            assert_eq!(m.chunk_state(*coord), ChunkState::Loaded);
        }
        assert_eq!(m.chunk_state(ChunkCoord::new(5, 5)), ChunkState::Unloaded);
    }

    #[test]
    fn test_update_idempotent() {
        let mut m = manager();
        m.update(chunk_center(1, 1), 2).unwrap();
        let before = m.loaded_coords();
        let handles: Vec<_> = before.iter().map(|&c| m.handle_at(c)).collect();

        let report = m.update(chunk_center(1, 1), 2).unwrap();
        assert!(report.is_empty());
        assert_eq!(m.loaded_coords(), before);
        let after: Vec<_> = before.iter().map(|&c| m.handle_at(c)).collect();
        assert_eq!(handles, after);
    }

    #[test]
    fn test_loaded_chunks_stay_within_radius() {
        let mut m = manager();
        for (x, radius) in [(0, 3), (2, 3), (7, 1), (7, 4)] {
            m.update(chunk_center(x, 0), radius).unwrap();
            let center = ChunkCoord::new(x, 0);
            let limit = (radius as i64 + 1).pow(2);
            for coord in m.loaded_coords() {
                assert!(coord.distance_sq(center) <= limit, "{coord:?} outside radius {radius}");
            }
            // Repeating the same update changes nothing
            assert!(m.update(chunk_center(x, 0), radius).unwrap().is_empty());
        }
    }

    #[test]
    fn test_moving_unloads_far_chunks() {
        let mut m = manager();
        m.update(chunk_center(0, 0), 1).unwrap();
        let old = m.handle_at(ChunkCoord::new(-1, 0)).unwrap();

        // One chunk east: (-1, 0) is at distance² 4 and stays, the west corners go
        let report = m.update(chunk_center(1, 0), 1).unwrap();
        assert_eq!(report.unloaded, vec![ChunkCoord::new(-1, -1), ChunkCoord::new(-1, 1)]);
        assert_eq!(
            report.loaded,
            vec![ChunkCoord::new(2, -1), ChunkCoord::new(2, 0), ChunkCoord::new(2, 1)]
        );
        assert!(m.chunk(old).is_some());

        let report = m.update(chunk_center(3, 0), 1).unwrap();
        assert!(report.unloaded.contains(&ChunkCoord::new(-1, 0)));
        let mut sorted = report.unloaded.clone();
        sorted.sort();
        assert_eq!(sorted, report.unloaded);
        assert!(m.chunk(old).is_none());
    }

    #[test]
    fn test_request_chunk_idempotent() {
        let mut m = manager();
        let a = m.request_chunk(2, 3).unwrap();
        let b = m.request_chunk(2, 3).unwrap();
        assert_eq!(a, b);
        assert_eq!(m.loaded_count(), 1);
    }

    #[test]
    fn test_loaded_chunk_matches_generator() {
        let mut m = manager();
        let handle = m.request_chunk(-1, 4).unwrap();
        let expected = m.generator().generate_blocks(-1, 4, &small_params());
        let chunk = m.chunk(handle).unwrap();
        assert_eq!(chunk.voxel_data(), &expected[..]);

        let renderer = chunk.renderer().unwrap();
        assert_eq!(renderer.instance_count(), chunk.voxels().solid_count());
        assert!(chunk.table().is_consistent(renderer));
    }

    #[test]
    fn test_renderer_unavailable_then_refresh() {
        let mut m = manager();
        let available = Rc::new(Cell::new(false));
        let flag = available.clone();
        m.set_renderer_factory(Box::new(move |_| {
            flag.get().then(|| Box::new(InstanceBuffer::new()) as Box<dyn InstanceRenderer>)
        }));

        let report = m.update(chunk_center(0, 0), 0).unwrap();
        assert_eq!(report.loaded.len(), 1);
        assert_eq!(m.chunk_state(ChunkCoord::new(0, 0)), ChunkState::Loading);
        assert_eq!(m.refresh_dirty(), 0);

        available.set(true);
        assert_eq!(m.refresh_dirty(), 1);
        assert_eq!(m.chunk_state(ChunkCoord::new(0, 0)), ChunkState::Loaded);
        assert_eq!(m.refresh_dirty(), 0);
    }

    #[test]
    fn test_block_edits_across_chunks() {
        let mut m = manager();
        m.update(chunk_center(0, 0), 1).unwrap();

        // World voxel (-1, 5) lives in chunk (-1, 1) at local (3, 1)
        let top = 7;
        let outcome = m.set_block_at(-1, 5, top, 9).unwrap();
        assert!(matches!(outcome, Some(EditOutcome::Added { .. })));
        assert_eq!(m.get_block_at(-1, 5, top), 9);
        let chunk = m.chunk(m.handle_at(ChunkCoord::new(-1, 1)).unwrap()).unwrap();
        assert_eq!(chunk.get_block(3, 1, top), 9);
        assert!(chunk.table().is_consistent(chunk.renderer().unwrap()));

        assert_eq!(m.set_block_at(-1, 5, top, 9).unwrap(), Some(EditOutcome::Unchanged));
        assert!(matches!(m.set_block_at(-1, 5, 8, 1), Err(Error::OutOfBounds { x: -1, y: 5, z: 8 })));
        assert!(matches!(m.set_block_at(100, 0, 0, 1), Err(Error::NotReady(_))));
        assert_eq!(m.get_block_at(100, 0, 0), AIR);
    }

    #[test]
    fn test_modified_records() {
        let mut m = manager();
        m.update(chunk_center(0, 0), 0).unwrap();
        assert!(!m.has_modified());

        m.set_block_at(1, 1, 7, block::STONE).unwrap();
        assert!(m.has_modified());

        let records = m.take_modified_records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].coord(), ChunkCoord::new(0, 0));
        assert!(m.take_modified_records().is_empty());
    }

    #[test]
    fn test_unsaved_edits_survive_unload() {
        let mut m = manager();
        m.update(chunk_center(0, 0), 0).unwrap();
        m.set_block_at(2, 2, 7, 11).unwrap();

        m.update(chunk_center(10, 10), 0).unwrap();
        assert_eq!(m.chunk_state(ChunkCoord::new(0, 0)), ChunkState::Unloaded);
        assert!(m.has_modified());

        // Coming back restores the edit instead of regenerating
        m.update(chunk_center(0, 0), 0).unwrap();
        assert_eq!(m.get_block_at(2, 2, 7), 11);

        let records = m.take_modified_records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].blocks[2 + 2 * 4 + 7 * 16], 11);
    }

    #[test]
    fn test_requeue_records() {
        let mut m = manager();
        m.update(chunk_center(0, 0), 0).unwrap();
        m.set_block_at(0, 0, 7, 4).unwrap();
        let records = m.take_modified_records();
        assert!(!m.has_modified());

        m.requeue_records(records);
        assert_eq!(m.take_modified_records().len(), 1);
    }

    #[test]
    fn test_edit_survives_reload_during_failed_save() {
        let mut m = manager();
        m.update(chunk_center(0, 0), 0).unwrap();
        m.set_block_at(2, 2, 7, 11).unwrap();
        let records = m.take_modified_records();
        assert!(m.is_in_flight(ChunkCoord::new(0, 0)));

        // Leave and come back before the save settles
        m.update(chunk_center(10, 10), 0).unwrap();
        m.update(chunk_center(0, 0), 0).unwrap();
        assert_eq!(m.get_block_at(2, 2, 7), 11);

        m.requeue_records(records);
        assert!(!m.is_in_flight(ChunkCoord::new(0, 0)));
        let requeued = m.take_modified_records();
        assert_eq!(requeued.len(), 1);
        assert_eq!(requeued[0].blocks[2 + 2 * 4 + 7 * 16], 11);
    }

    #[test]
    fn test_failed_save_requeued_while_unloaded() {
        let mut m = manager();
        m.update(chunk_center(0, 0), 0).unwrap();
        m.set_block_at(1, 1, 7, 13).unwrap();
        let records = m.take_modified_records();

        m.update(chunk_center(10, 10), 0).unwrap();
        m.requeue_records(records);

        m.update(chunk_center(0, 0), 0).unwrap();
        assert_eq!(m.get_block_at(1, 1, 7), 13);
        assert_eq!(m.take_modified_records().len(), 1);
    }

    #[test]
    fn test_superseded_record_not_requeued() {
        let mut m = manager();
        m.update(chunk_center(0, 0), 0).unwrap();
        m.set_block_at(0, 0, 7, 4).unwrap();
        let first = m.take_modified_records();
        m.set_block_at(0, 0, 7, 5).unwrap();
        let second = m.take_modified_records();

        // The older save fails after the newer one was issued
        m.requeue_records(first);
        assert!(!m.has_modified());
        assert_eq!(m.get_block_at(0, 0, 7), 5);

        m.confirm_records(&second);
        assert!(!m.is_in_flight(ChunkCoord::new(0, 0)));
    }

    #[test]
    fn test_restores_saved_chunks() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = WorldStore::new(dir.path()).unwrap();
        let params = small_params();

        let mut blocks = vec![AIR; params.chunk_volume()];
        blocks[0] = block::BEDROCK;
        blocks[5] = 42;
        let record = ChunkRecord { x: 0, y: 0, blocks: blocks.clone() };
        store.save_world_async("saved", disk_io::WorldMeta::new("saved", params.seed), vec![record]);
        store.wait_all(std::time::Duration::from_secs(10)).unwrap();

        let mut m = manager();
        m.bind_store(&store, "saved");
        let handle = m.request_chunk(0, 0).unwrap();
        assert_eq!(m.chunk(handle).unwrap().voxel_data(), &blocks[..]);
        assert_eq!(m.chunk(handle).unwrap().renderer().unwrap().instance_count(), 2);

        // No record for this one, so it is generated
        let handle = m.request_chunk(1, 0).unwrap();
        let expected = m.generator().generate_blocks(1, 0, &params);
        assert_eq!(m.chunk(handle).unwrap().voxel_data(), &expected[..]);
    }

    #[test]
    fn test_params_change_unloads() {
        let mut m = manager();
        m.update(chunk_center(0, 0), 1).unwrap();
        m.set_params(WorldGenParams { seed: 99, ..small_params() }).unwrap();
        assert_eq!(m.loaded_count(), 0);
    }
}
