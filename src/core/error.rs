//! Error types for chunkworld

use thiserror::Error;

/// Main error type for the crate
///
/// Every variant is a local, recoverable condition. A failure in one chunk is
/// logged and retried (or the chunk is left unloaded); it never takes down the
/// whole world.
#[derive(Debug, Error)]
pub enum Error {
    /// Coordinate outside the chunk volume (write paths only, reads return air)
    #[error("coordinate ({x}, {y}, {z}) is outside the chunk volume")]
    OutOfBounds { x: i32, y: i32, z: i32 },

    /// Bulk block data whose length disagrees with the chunk volume
    #[error("block data has {actual} entries but the chunk volume is {expected}")]
    ShapeMismatch { expected: usize, actual: usize },

    /// Streaming or generation requested before configuration is available
    #[error("world is not ready: {0}")]
    NotReady(String),

    /// No renderer bound to the chunk; it stays dirty until the next refresh
    #[error("renderer unavailable for chunk ({x}, {y})")]
    RendererUnavailable { x: i32, y: i32 },

    /// Storage failure while saving or loading world data
    #[error("persistence error: {0}")]
    PersistenceIo(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Whether the caller should simply try again later
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::NotReady(_) | Error::RendererUnavailable { .. })
    }
}
