//! ChunkHandle - generation-checked references into the chunk arena.
//!
//! The streaming manager owns every live chunk through a [`ChunkArena`].
//! Everyone else holds a [`ChunkHandle`], which stops resolving as soon as the
//! chunk it pointed at is unloaded, even if the slot is later reused.

/// State of a chunk coordinate in the streaming system.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChunkState {
    /// No chunk exists for the coordinate
    Unloaded,
    /// Chunk is allocated and being filled
    Loading,
    /// Chunk is filled and its render instances are built (or pending retry)
    Loaded,
}

impl ChunkState {
    /// Check if chunk data is available for reading.
    pub fn is_ready(&self) -> bool {
        matches!(self, ChunkState::Loaded)
    }
}

/// Non-owning reference to a chunk in a [`ChunkArena`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ChunkHandle {
    index: u32,
    generation: u32,
}

impl ChunkHandle {
    /// Slot index in the arena
    pub fn index(&self) -> u32 {
        self.index
    }

    /// Generation the handle was issued for
    pub fn generation(&self) -> u32 {
        self.generation
    }
}

struct Slot<T> {
    generation: u32,
    value: Option<T>,
}

/// Slot storage with generation counters and a free list
pub struct ChunkArena<T> {
    slots: Vec<Slot<T>>,
    free_slots: Vec<u32>,
    len: usize,
}

impl<T> ChunkArena<T> {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free_slots: Vec::new(),
            len: 0,
        }
    }

    /// Store `value`, reusing a freed slot when one is available
    pub fn insert(&mut self, value: T) -> ChunkHandle {
        self.len += 1;
        if let Some(index) = self.free_slots.pop() {
            let slot = &mut self.slots[index as usize];
            slot.value = Some(value);
            return ChunkHandle {
                index,
                generation: slot.generation,
            };
        }

        let index = self.slots.len() as u32;
        self.slots.push(Slot {
            generation: 0,
            value: Some(value),
        });
        ChunkHandle { index, generation: 0 }
    }

    pub fn get(&self, handle: ChunkHandle) -> Option<&T> {
        self.slots
            .get(handle.index as usize)
            .filter(|slot| slot.generation == handle.generation)
            .and_then(|slot| slot.value.as_ref())
    }

    pub fn get_mut(&mut self, handle: ChunkHandle) -> Option<&mut T> {
        self.slots
            .get_mut(handle.index as usize)
            .filter(|slot| slot.generation == handle.generation)
            .and_then(|slot| slot.value.as_mut())
    }

    /// Take the value out and invalidate every handle to it
    pub fn remove(&mut self, handle: ChunkHandle) -> Option<T> {
        let slot = self.slots.get_mut(handle.index as usize)?;
        if slot.generation != handle.generation {
            return None;
        }
        let value = slot.value.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free_slots.push(handle.index);
        self.len -= 1;
        Some(value)
    }

    pub fn contains(&self, handle: ChunkHandle) -> bool {
        self.get(handle).is_some()
    }

    /// Number of live values
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Iterate live values with their handles
    pub fn iter(&self) -> impl Iterator<Item = (ChunkHandle, &T)> {
        self.slots.iter().enumerate().filter_map(|(i, slot)| {
            slot.value.as_ref().map(|v| {
                (
                    ChunkHandle {
                        index: i as u32,
                        generation: slot.generation,
                    },
                    v,
                )
            })
        })
    }
}

impl<T> Default for ChunkArena<T> {
    fn default() -> Self {
        Self::new()
    }
}
