//! In-memory instance container implementing the renderer contract
//!
//! Stores transforms and a flat shading buffer (`floats_per_instance` floats
//! per slot), the same layout a batched instanced mesh keeps on the CPU side
//! before upload. Also counts operations so callers can verify that single
//! block edits never trigger a full rebuild.

use super::{InstanceRenderer, InstanceTransform, SHADING_FLOATS_PER_INSTANCE};

/// Operation counters (cumulative since creation)
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct InstanceStats {
    pub adds: u64,
    pub removes: u64,
    pub shading_updates: u64,
    pub clears: u64,
}

/// Dense, swap-remove instance storage
#[derive(Clone, Debug)]
pub struct InstanceBuffer {
    transforms: Vec<InstanceTransform>,
    shading: Vec<f32>,
    floats_per_instance: usize,
    stats: InstanceStats,
}

impl InstanceBuffer {
    /// Create an empty buffer with the default shading stride
    pub fn new() -> Self {
        Self::with_stride(SHADING_FLOATS_PER_INSTANCE)
    }

    /// Create an empty buffer with `floats_per_instance` shading floats per slot (min 1)
    pub fn with_stride(floats_per_instance: usize) -> Self {
        Self {
            transforms: Vec::new(),
            shading: Vec::new(),
            floats_per_instance: floats_per_instance.max(1),
            stats: InstanceStats::default(),
        }
    }

    /// Shading floats per slot
    pub fn stride(&self) -> usize {
        self.floats_per_instance
    }

    /// Transform at `slot`
    pub fn transform(&self, slot: usize) -> Option<&InstanceTransform> {
        self.transforms.get(slot)
    }

    /// Block id stored in the first shading float of `slot`
    pub fn block_id(&self, slot: usize) -> Option<u16> {
        self.shading.get(slot * self.floats_per_instance).map(|&v| v as u16)
    }

    /// Operation counters
    pub fn stats(&self) -> InstanceStats {
        self.stats
    }

    /// Multiset of `(translation bits, block id)` pairs, sorted, independent of slot order
    pub fn instance_set(&self) -> Vec<([u32; 3], u16)> {
        let mut set: Vec<([u32; 3], u16)> = self
            .transforms
            .iter()
            .enumerate()
            .map(|(slot, tf)| {
                let t = tf.translation;
                ([t.x.to_bits(), t.y.to_bits(), t.z.to_bits()], self.block_id(slot).unwrap_or(0))
            })
            .collect();
        set.sort_unstable();
        set
    }
}

impl Default for InstanceBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl InstanceRenderer for InstanceBuffer {
    fn add_instance(&mut self, transform: InstanceTransform) -> usize {
        let slot = self.transforms.len();
        self.transforms.push(transform);
        self.shading.resize(self.transforms.len() * self.floats_per_instance, 0.0);
        self.stats.adds += 1;
        slot
    }

    fn remove_instance(&mut self, slot: usize) -> bool {
        if slot >= self.transforms.len() {
            return false;
        }

        let stride = self.floats_per_instance;
        let last = self.transforms.len() - 1;
        if slot != last {
            let (head, tail) = self.shading.split_at_mut(last * stride);
            head[slot * stride..(slot + 1) * stride].copy_from_slice(&tail[..stride]);
        }
        self.transforms.swap_remove(slot);
        self.shading.truncate(last * stride);
        self.stats.removes += 1;
        true
    }

    fn set_instance_shading_data(&mut self, slot: usize, values: &[f32]) -> bool {
        if slot >= self.transforms.len() {
            return false;
        }
        let stride = self.floats_per_instance;
        let n = values.len().min(stride);
        let base = slot * stride;
        self.shading[base..base + n].copy_from_slice(&values[..n]);
        self.stats.shading_updates += 1;
        true
    }

    fn instance_shading_data(&self, slot: usize) -> Option<Vec<f32>> {
        if slot >= self.transforms.len() {
            return None;
        }
        let stride = self.floats_per_instance;
        Some(self.shading[slot * stride..(slot + 1) * stride].to_vec())
    }

    fn clear_all_instances(&mut self) {
        self.transforms.clear();
        self.shading.clear();
        self.stats.clears += 1;
    }

    fn instance_count(&self) -> usize {
        self.transforms.len()
    }
}
