//! Cell ↔ render-instance bookkeeping for one chunk
//!
//! The renderer keeps instances in a dense range `[0, instance_count)` and
//! removes with swap-with-last. [`InstanceSyncTable`] mirrors that exactly so a
//! single block edit costs one add, one remove or one shading update, never a
//! rebuild.

use crate::render::{shading_for_block, InstanceRenderer, InstanceTransform};
use crate::voxel::block::{BlockId, AIR};
use crate::voxel::chunk::VoxelChunk;

/// Result of [`InstanceSyncTable::apply_edit`]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EditOutcome {
    /// Nothing to do (same id, or removing a cell that has no instance)
    Unchanged,
    /// New instance appended at `slot`
    Added { slot: usize },
    /// Existing instance at `slot` got new shading data
    Updated { slot: usize },
    /// Instance at `slot` removed; `moved_cell` is the cell whose instance was
    /// swapped into `slot`, if any
    Removed { slot: usize, moved_cell: Option<usize> },
}

/// Bidirectional cell index / instance slot mapping
#[derive(Clone, Debug, Default)]
pub struct InstanceSyncTable {
    /// Instance slot per cell, `-1` for none
    cell_to_instance: Vec<i32>,
    /// Cell per instance slot
    instance_to_cell: Vec<usize>,
}

impl InstanceSyncTable {
    /// Empty table for a chunk with `cell_count` cells
    pub fn new(cell_count: usize) -> Self {
        Self {
            cell_to_instance: vec![-1; cell_count],
            instance_to_cell: Vec::new(),
        }
    }

    /// Forget all instances and resize to `cell_count` cells. Does not touch the renderer.
    pub fn reset(&mut self, cell_count: usize) {
        self.cell_to_instance.clear();
        self.cell_to_instance.resize(cell_count, -1);
        self.instance_to_cell.clear();
    }

    /// Throw away every renderer instance and re-emit one per non-air cell,
    /// scanning x fastest, then y, then z.
    pub fn rebuild_all(&mut self, chunk: &VoxelChunk, renderer: &mut dyn InstanceRenderer) {
        renderer.clear_all_instances();
        self.reset(chunk.volume());

        for (cell, &id) in chunk.blocks().iter().enumerate() {
            if id == AIR {
                continue;
            }
            let slot = renderer.add_instance(chunk.cell_transform(cell));
            renderer.set_instance_shading_data(slot, &shading_for_block(id));
            self.cell_to_instance[cell] = slot as i32;
            self.instance_to_cell.push(cell);
        }

        log::trace!(
            "Rebuilt chunk ({}, {}): {} instances",
            chunk.coord().x,
            chunk.coord().y,
            self.instance_to_cell.len()
        );
    }

    /// Apply a single block change at flat index `cell`.
    ///
    /// # Panics
    ///
    /// If `cell` is outside the table, or the renderer breaks its contract
    /// (slot numbering differs from the table's).
    pub fn apply_edit(
        &mut self,
        cell: usize,
        old_id: BlockId,
        new_id: BlockId,
        transform: InstanceTransform,
        renderer: &mut dyn InstanceRenderer,
    ) -> EditOutcome {
        assert!(
            cell < self.cell_to_instance.len(),
            "cell {cell} outside chunk of {} cells",
            self.cell_to_instance.len()
        );

        if old_id == new_id {
            return EditOutcome::Unchanged;
        }

        if new_id == AIR {
            return self.remove_cell(cell, renderer);
        }

        if let Some(slot) = self.instance_of(cell) {
            renderer.set_instance_shading_data(slot, &shading_for_block(new_id));
            return EditOutcome::Updated { slot };
        }

        let slot = renderer.add_instance(transform);
        assert_eq!(
            slot,
            self.instance_to_cell.len(),
            "renderer returned slot {slot}, expected the next dense slot"
        );
        renderer.set_instance_shading_data(slot, &shading_for_block(new_id));
        self.cell_to_instance[cell] = slot as i32;
        self.instance_to_cell.push(cell);
        EditOutcome::Added { slot }
    }

    fn remove_cell(&mut self, cell: usize, renderer: &mut dyn InstanceRenderer) -> EditOutcome {
        let Some(removed) = self.instance_of(cell) else {
            return EditOutcome::Unchanged;
        };
        assert_eq!(
            renderer.instance_count(),
            self.instance_to_cell.len(),
            "renderer instance count out of sync"
        );

        let last = self.instance_to_cell.len() - 1;
        let mut moved_cell = None;
        if removed != last {
            if let Some(data) = renderer.instance_shading_data(last) {
                renderer.set_instance_shading_data(removed, &data);
            }
            let last_cell = self.instance_to_cell[last];
            self.cell_to_instance[last_cell] = removed as i32;
            self.instance_to_cell[removed] = last_cell;
            moved_cell = Some(last_cell);
        }

        let ok = renderer.remove_instance(removed);
        assert!(ok, "renderer rejected removal of slot {removed}");
        self.instance_to_cell.pop();
        self.cell_to_instance[cell] = -1;

        EditOutcome::Removed { slot: removed, moved_cell }
    }

    /// Instance slot of `cell`, if it has one
    pub fn instance_of(&self, cell: usize) -> Option<usize> {
        match self.cell_to_instance.get(cell) {
            Some(&slot) if slot >= 0 => Some(slot as usize),
            _ => None,
        }
    }

    /// Cell that owns instance `slot`
    pub fn cell_of(&self, slot: usize) -> Option<usize> {
        self.instance_to_cell.get(slot).copied()
    }

    pub fn instance_count(&self) -> usize {
        self.instance_to_cell.len()
    }

    pub fn cell_count(&self) -> usize {
        self.cell_to_instance.len()
    }

    /// Check both mapping directions agree and match the renderer's count
    pub fn is_consistent(&self, renderer: &dyn InstanceRenderer) -> bool {
        if self.instance_to_cell.len() != renderer.instance_count() {
            return false;
        }

        let mapped = self.cell_to_instance.iter().filter(|&&s| s >= 0).count();
        if mapped != self.instance_to_cell.len() {
            return false;
        }

        self.cell_to_instance.iter().enumerate().all(|(cell, &slot)| {
            slot < 0 || self.instance_to_cell.get(slot as usize) == Some(&cell)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::InstanceBuffer;
    use crate::voxel::chunk::ChunkCoord;

    fn chunk4() -> VoxelChunk {
        VoxelChunk::new(ChunkCoord::new(0, 0), 4, 4, 4, 128.0)
    }

    /// Edit a block and keep the table in step, the way RenderChunk does
    fn edit(
        chunk: &mut VoxelChunk,
        table: &mut InstanceSyncTable,
        renderer: &mut InstanceBuffer,
        x: i32,
        y: i32,
        z: i32,
        id: BlockId,
    ) -> EditOutcome {
        let cell = chunk.index_of(x, y, z).unwrap();
        let old = chunk.get_block(x, y, z);
        chunk.set_block(x, y, z, id);
        table.apply_edit(cell, old, id, chunk.cell_transform(cell), renderer)
    }

    /// Small deterministic generator so the edit sequences are reproducible
    struct Lcg(u64);

    impl Lcg {
        fn next(&mut self) -> u32 {
            self.0 = self.0.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            (self.0 >> 33) as u32
        }
    }

    #[test]
    fn test_rebuild_all_scan_order() {
        let mut chunk = chunk4();
        chunk.set_block(3, 0, 0, 2);
        chunk.set_block(0, 1, 0, 3);
        chunk.set_block(0, 0, 1, 4);
        chunk.set_block(1, 0, 0, 1);

        let mut renderer = InstanceBuffer::new();
        let mut table = InstanceSyncTable::new(chunk.volume());
        table.rebuild_all(&chunk, &mut renderer);

        assert_eq!(table.instance_count(), 4);
        // x fastest, then y, then z
        let cells: Vec<usize> = (0..4).map(|s| table.cell_of(s).unwrap()).collect();
        assert_eq!(cells, vec![1, 3, 4, 16]);
        let ids: Vec<u16> = (0..4).map(|s| renderer.block_id(s).unwrap()).collect();
        assert_eq!(ids, vec![1, 2, 3, 4]);
        assert!(table.is_consistent(&renderer));
    }

    #[test]
    fn test_rebuild_clears_previous_instances() {
        let mut chunk = chunk4();
        chunk.set_block(0, 0, 0, 1);
        let mut renderer = InstanceBuffer::new();
        let mut table = InstanceSyncTable::new(chunk.volume());
        table.rebuild_all(&chunk, &mut renderer);
        table.rebuild_all(&chunk, &mut renderer);
        assert_eq!(renderer.instance_count(), 1);
        assert!(table.is_consistent(&renderer));
    }

    #[test]
    fn test_set_twice_then_clear() {
        let mut chunk = chunk4();
        let mut renderer = InstanceBuffer::new();
        let mut table = InstanceSyncTable::new(chunk.volume());
        table.rebuild_all(&chunk, &mut renderer);
        let cell = chunk.index_of(1, 1, 1).unwrap();

        let first = edit(&mut chunk, &mut table, &mut renderer, 1, 1, 1, 5);
        assert_eq!(first, EditOutcome::Added { slot: 0 });
        let second = edit(&mut chunk, &mut table, &mut renderer, 1, 1, 1, 5);
        assert_eq!(second, EditOutcome::Unchanged);
        assert_eq!(renderer.instance_count(), 1);
        assert_eq!(renderer.block_id(0), Some(5));

        let removed = edit(&mut chunk, &mut table, &mut renderer, 1, 1, 1, 0);
        assert_eq!(removed, EditOutcome::Removed { slot: 0, moved_cell: None });
        assert_eq!(renderer.instance_count(), 0);
        assert_eq!(table.instance_of(cell), None);
        assert_eq!(table.cell_to_instance[cell], -1);
        assert!(table.is_consistent(&renderer));
    }

    #[test]
    fn test_change_block_updates_in_place() {
        let mut chunk = chunk4();
        let mut renderer = InstanceBuffer::new();
        let mut table = InstanceSyncTable::new(chunk.volume());

        edit(&mut chunk, &mut table, &mut renderer, 2, 2, 2, 3);
        let outcome = edit(&mut chunk, &mut table, &mut renderer, 2, 2, 2, 7);
        assert_eq!(outcome, EditOutcome::Updated { slot: 0 });
        assert_eq!(renderer.instance_count(), 1);
        assert_eq!(renderer.block_id(0), Some(7));
    }

    #[test]
    fn test_remove_swaps_last_into_hole() {
        let mut chunk = chunk4();
        let mut renderer = InstanceBuffer::new();
        let mut table = InstanceSyncTable::new(chunk.volume());

        edit(&mut chunk, &mut table, &mut renderer, 0, 0, 0, 1);
        edit(&mut chunk, &mut table, &mut renderer, 1, 0, 0, 2);
        edit(&mut chunk, &mut table, &mut renderer, 2, 0, 0, 3);

        let outcome = edit(&mut chunk, &mut table, &mut renderer, 0, 0, 0, 0);
        assert_eq!(outcome, EditOutcome::Removed { slot: 0, moved_cell: Some(2) });
        assert_eq!(table.instance_of(2), Some(0));
        assert_eq!(table.cell_of(0), Some(2));
        assert_eq!(renderer.block_id(0), Some(3));
        assert_eq!(renderer.transform(0).unwrap().translation.x, 256.0);
        assert!(table.is_consistent(&renderer));
    }

    #[test]
    fn test_remove_without_instance_is_noop() {
        let chunk = chunk4();
        let mut renderer = InstanceBuffer::new();
        let mut table = InstanceSyncTable::new(chunk.volume());
        let cell = chunk.index_of(0, 0, 0).unwrap();
        let outcome = table.apply_edit(cell, 3, 0, chunk.cell_transform(cell), &mut renderer);
        assert_eq!(outcome, EditOutcome::Unchanged);
        assert_eq!(renderer.stats().removes, 0);
    }

    #[test]
    fn test_single_edits_never_clear() {
        let mut chunk = chunk4();
        let mut renderer = InstanceBuffer::new();
        let mut table = InstanceSyncTable::new(chunk.volume());
        table.rebuild_all(&chunk, &mut renderer);
        let clears = renderer.stats().clears;

        edit(&mut chunk, &mut table, &mut renderer, 0, 0, 0, 1);
        edit(&mut chunk, &mut table, &mut renderer, 3, 3, 3, 2);
        edit(&mut chunk, &mut table, &mut renderer, 0, 0, 0, 0);
        edit(&mut chunk, &mut table, &mut renderer, 3, 3, 3, 4);

        assert_eq!(renderer.stats().clears, clears);
    }

    #[test]
    fn test_bijection_holds_over_random_edits() {
        let mut chunk = chunk4();
        let mut renderer = InstanceBuffer::new();
        let mut table = InstanceSyncTable::new(chunk.volume());
        table.rebuild_all(&chunk, &mut renderer);

        let mut rng = Lcg(42);
        for step in 0..2000 {
            let x = (rng.next() % 4) as i32;
            let y = (rng.next() % 4) as i32;
            let z = (rng.next() % 4) as i32;
            // Bias towards air so removals happen often
            let id = match rng.next() % 3 {
                0 => 0,
                _ => (rng.next() % 8) as u16,
            };
            edit(&mut chunk, &mut table, &mut renderer, x, y, z, id);
            assert!(table.is_consistent(&renderer), "inconsistent after step {step}");
            assert_eq!(table.instance_count(), chunk.solid_count());
        }
    }

    #[test]
    fn test_incremental_matches_rebuild() {
        let mut chunk = chunk4();
        let mut incremental = InstanceBuffer::new();
        let mut table = InstanceSyncTable::new(chunk.volume());
        table.rebuild_all(&chunk, &mut incremental);

        let mut rng = Lcg(7);
        for _ in 0..500 {
            let x = (rng.next() % 4) as i32;
            let y = (rng.next() % 4) as i32;
            let z = (rng.next() % 4) as i32;
            let id = (rng.next() % 4) as u16;
            edit(&mut chunk, &mut table, &mut incremental, x, y, z, id);
        }

        let mut rebuilt = InstanceBuffer::new();
        let mut fresh = InstanceSyncTable::new(chunk.volume());
        fresh.rebuild_all(&chunk, &mut rebuilt);

        assert_eq!(incremental.instance_set(), rebuilt.instance_set());
    }

    #[test]
    fn test_removal_order_independent() {
        let positions = [(0, 0, 0), (1, 0, 0), (2, 1, 0), (3, 3, 3), (1, 2, 3), (0, 3, 1)];
        let removals = [(1, 0, 0), (3, 3, 3), (0, 3, 1)];

        let run = |order: &[(i32, i32, i32)]| {
            let mut chunk = chunk4();
            let mut renderer = InstanceBuffer::new();
            let mut table = InstanceSyncTable::new(chunk.volume());
            for (i, &(x, y, z)) in positions.iter().enumerate() {
                edit(&mut chunk, &mut table, &mut renderer, x, y, z, i as u16 + 1);
            }
            for &(x, y, z) in order {
                edit(&mut chunk, &mut table, &mut renderer, x, y, z, 0);
            }
            assert!(table.is_consistent(&renderer));
            renderer.instance_set()
        };

        let forward = run(&removals);
        let mut reversed = removals;
        reversed.reverse();
        let backward = run(&reversed);
        let rotated = run(&[removals[1], removals[2], removals[0]]);

        assert_eq!(forward.len(), 3);
        assert_eq!(forward, backward);
        assert_eq!(forward, rotated);
    }

    #[test]
    #[should_panic]
    fn test_cell_outside_volume_panics() {
        let mut renderer = InstanceBuffer::new();
        let mut table = InstanceSyncTable::new(64);
        table.apply_edit(64, 0, 1, InstanceTransform::for_cell(0, 0, 0, 1.0), &mut renderer);
    }
}
