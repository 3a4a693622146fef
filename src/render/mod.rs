//! Batched instance rendering contract
//!
//! The renderer itself is an external service. Chunks only talk to it through
//! [`InstanceRenderer`], which models a single batched-instance container with
//! a dense slot range `[0, instance_count)`.

pub mod instance_buffer;

pub use instance_buffer::InstanceBuffer;

use glam::Vec3;

/// Number of shading floats carried per instance: block id, destroy stage
pub const SHADING_FLOATS_PER_INSTANCE: usize = 2;

/// Reference mesh edge length the instance scale is expressed against
pub const BASE_MESH_SIZE: f32 = 128.0;

/// Placement of one render instance, local to its chunk
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct InstanceTransform {
    pub translation: Vec3,
    /// Uniform scale relative to [`BASE_MESH_SIZE`]
    pub scale: f32,
}

impl InstanceTransform {
    pub fn new(translation: Vec3, scale: f32) -> Self {
        Self { translation, scale }
    }

    /// Transform for the voxel at integer cell position `(x, y, z)`
    pub fn for_cell(x: u32, y: u32, z: u32, cell_size: f32) -> Self {
        Self {
            translation: Vec3::new(x as f32, y as f32, z as f32) * cell_size,
            scale: cell_size / BASE_MESH_SIZE,
        }
    }
}

/// Contract a batched-instance renderer must satisfy.
///
/// `remove_instance` must use swap-with-last semantics: the instance in the
/// last slot moves into the removed slot and the range shrinks by one. The
/// instance sync table mirrors exactly that behavior so slot indices never
/// drift apart.
pub trait InstanceRenderer {
    /// Append an instance, returning its slot
    fn add_instance(&mut self, transform: InstanceTransform) -> usize;

    /// Remove the instance at `slot` (swap-with-last). Returns false if the slot is invalid.
    fn remove_instance(&mut self, slot: usize) -> bool;

    /// Overwrite the per-instance shading data at `slot`
    fn set_instance_shading_data(&mut self, slot: usize, values: &[f32]) -> bool;

    /// Read back the per-instance shading data at `slot`
    fn instance_shading_data(&self, slot: usize) -> Option<Vec<f32>>;

    /// Drop every instance
    fn clear_all_instances(&mut self);

    /// Number of live instances
    fn instance_count(&self) -> usize;
}

/// Shading payload for a block: id in the first float, remaining floats zeroed
pub fn shading_for_block(block_id: u16) -> [f32; SHADING_FLOATS_PER_INSTANCE] {
    let mut data = [0.0; SHADING_FLOATS_PER_INSTANCE];
    data[0] = block_id as f32;
    data
}
