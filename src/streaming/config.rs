//! Streaming configuration

use serde::{Deserialize, Serialize};

use crate::core::{Error, Result};

/// How chunks are laid out in world space and how far around the viewer they stream
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamingConfig {
    /// World units per voxel edge
    pub cell_size: f32,
    /// Chunks kept loaded in each direction around the viewer
    pub view_radius: i32,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            cell_size: 128.0,
            view_radius: 2,
        }
    }
}

impl StreamingConfig {
    pub fn validate(&self) -> Result<()> {
        if !(self.cell_size.is_finite() && self.cell_size > 0.0) {
            return Err(Error::InvalidConfig(format!(
                "cell_size must be positive, got {}",
                self.cell_size
            )));
        }
        if self.view_radius < 0 {
            return Err(Error::InvalidConfig(format!(
                "view_radius must not be negative, got {}",
                self.view_radius
            )));
        }
        Ok(())
    }
}
