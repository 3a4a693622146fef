//! World session: configuration, streaming and persistence for one world
//!
//! A session streams chunks around the player once configured, saves edited
//! chunks on request and applies a loaded world's seed and player transform.

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use glam::Vec3;
use serde::{Deserialize, Serialize};

use crate::core::{Error, Result};
use crate::streaming::{
    ChunkRecord, ChunkStreamingManager, Completion, RendererFactory, StreamingConfig, StreamingReport, Ticket,
    WorldMeta, WorldStore,
};
use crate::terrain::{TerrainGenerator, WorldGenParams};
use crate::voxel::block::BlockRegistry;
use crate::voxel::chunk::ChunkCoord;

/// Format version written to new meta files
pub const WORLD_FORMAT_VERSION: i32 = 1;

/// Everything needed to open a world
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorldConfig {
    pub world_name: String,
    pub save_root: PathBuf,
    pub generation: WorldGenParams,
    pub streaming: StreamingConfig,
}

impl Default for WorldConfig {
    fn default() -> Self {
        Self {
            world_name: "World".to_string(),
            save_root: PathBuf::from("saves"),
            generation: WorldGenParams::default(),
            streaming: StreamingConfig::default(),
        }
    }
}

impl WorldConfig {
    pub fn validate(&self) -> Result<()> {
        if self.world_name.is_empty() {
            return Err(Error::InvalidConfig("world_name must not be empty".into()));
        }
        self.generation.validate()?;
        self.streaming.validate()
    }

    /// Load and validate a config file. Missing fields take their defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        let config: WorldConfig = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }
}

/// One open world
pub struct WorldSession {
    config: WorldConfig,
    store: WorldStore,
    streaming: ChunkStreamingManager,
    blocks: BlockRegistry,
    player_location: Vec3,
    /// Pitch, yaw, roll
    player_rotation: Vec3,
    /// Chunks with a record on disk
    saved_chunks: BTreeSet<ChunkCoord>,
    /// Records handed to the store, kept until the save reports back
    in_flight_saves: HashMap<Ticket, Vec<ChunkRecord>>,
    pending_load: Option<Ticket>,
}

impl WorldSession {
    pub fn new(config: WorldConfig, renderer_factory: RendererFactory) -> Result<Self> {
        config.validate()?;

        let store = WorldStore::new(config.save_root.clone())?;
        let mut streaming = ChunkStreamingManager::new(Arc::new(TerrainGenerator::new()), config.streaming.clone());
        streaming.set_params(config.generation.clone())?;
        streaming.set_renderer_factory(renderer_factory);
        streaming.bind_store(&store, config.world_name.clone());

        log::info!(
            "Opened world '{}' (seed {}, {}x{}x{} chunks)",
            config.world_name,
            config.generation.seed,
            config.generation.chunk_size,
            config.generation.chunk_size,
            config.generation.world_height
        );

        Ok(Self {
            config,
            store,
            streaming,
            blocks: BlockRegistry::with_defaults(),
            player_location: Vec3::ZERO,
            player_rotation: Vec3::ZERO,
            saved_chunks: BTreeSet::new(),
            in_flight_saves: HashMap::new(),
            pending_load: None,
        })
    }

    pub fn config(&self) -> &WorldConfig {
        &self.config
    }

    pub fn streaming(&self) -> &ChunkStreamingManager {
        &self.streaming
    }

    pub fn streaming_mut(&mut self) -> &mut ChunkStreamingManager {
        &mut self.streaming
    }

    /// Block definitions for this world
    pub fn blocks(&self) -> &BlockRegistry {
        &self.blocks
    }

    pub fn blocks_mut(&mut self) -> &mut BlockRegistry {
        &mut self.blocks
    }

    pub fn store(&self) -> &WorldStore {
        &self.store
    }

    pub fn player_location(&self) -> Vec3 {
        self.player_location
    }

    pub fn player_rotation(&self) -> Vec3 {
        self.player_rotation
    }

    pub fn set_player_rotation(&mut self, rotation: Vec3) {
        self.player_rotation = rotation;
    }

    /// Check if this world has been saved before
    pub fn world_exists(&self) -> bool {
        self.store.world_exists(&self.config.world_name)
    }

    /// Move the player and stream chunks around them
    pub fn update(&mut self, player_location: Vec3) -> Result<StreamingReport> {
        self.player_location = player_location;
        let report = self.streaming.update(player_location, self.config.streaming.view_radius)?;
        self.streaming.refresh_dirty();
        Ok(report)
    }

    /// Save edited chunks and the world meta. Completes through [`poll`](Self::poll).
    pub fn save(&mut self) -> Ticket {
        let records = self.streaming.take_modified_records();

        let mut chunks = self.saved_chunks.clone();
        chunks.extend(records.iter().map(ChunkRecord::coord));

        let mut meta = WorldMeta::new(self.config.world_name.clone(), self.config.generation.seed);
        meta.version = WORLD_FORMAT_VERSION;
        meta.player_location = self.player_location.to_array();
        meta.player_rotation = self.player_rotation.to_array();
        meta.chunks = chunks.into_iter().collect();
        meta.touch();

        log::info!("Saving world '{}' ({} edited chunks)", self.config.world_name, records.len());
        let ticket = self
            .store
            .save_world_async(&self.config.world_name, meta, records.clone());
        self.in_flight_saves.insert(ticket, records);
        ticket
    }

    /// Read the saved meta. Applied to the session when it completes.
    pub fn load(&mut self) -> Ticket {
        let ticket = self.store.load_world_meta_async(&self.config.world_name);
        self.pending_load = Some(ticket);
        ticket
    }

    /// Handle finished saves and loads (non-blocking)
    pub fn poll(&mut self) -> Vec<Completion> {
        let completions = self.store.poll_completions();
        for completion in &completions {
            self.handle_completion(completion);
        }
        completions
    }

    /// Block until every outstanding save and load has completed.
    ///
    /// On timeout the completions that did arrive are handled by the next
    /// [`poll`](Self::poll).
    pub fn flush(&mut self, timeout: Duration) -> Result<Vec<Completion>> {
        let completions = self.store.wait_all(timeout)?;
        for completion in &completions {
            self.handle_completion(completion);
        }
        Ok(completions)
    }

    fn handle_completion(&mut self, completion: &Completion) {
        match completion {
            Completion::Saved { ticket, success, .. } => {
                let Some(records) = self.in_flight_saves.remove(ticket) else {
                    return;
                };
                if *success {
                    self.saved_chunks.extend(records.iter().map(ChunkRecord::coord));
                    self.streaming.confirm_records(&records);
                } else {
                    log::warn!(
                        "Save of '{}' failed, {} chunks queued for the next save",
                        self.config.world_name,
                        records.len()
                    );
                    self.streaming.requeue_records(records);
                }
            }
            Completion::MetaLoaded { ticket, meta, .. } => {
                if self.pending_load != Some(*ticket) {
                    log::debug!("Ignoring superseded meta load {:?}", ticket);
                    return;
                }
                self.pending_load = None;
                if let Some(meta) = meta {
                    self.apply_meta(meta);
                }
            }
        }
    }

    fn apply_meta(&mut self, meta: &WorldMeta) {
        self.player_location = Vec3::from_array(meta.player_location);
        self.player_rotation = Vec3::from_array(meta.player_rotation);
        self.saved_chunks = meta.chunks.iter().copied().collect();

        if meta.seed != self.config.generation.seed {
            let params = WorldGenParams {
                seed: meta.seed,
                ..self.config.generation.clone()
            };
            match self.streaming.set_params(params.clone()) {
                Ok(()) => self.config.generation = params,
                Err(e) => log::warn!("Saved seed {} not applied: {}", meta.seed, e),
            }
        }

        log::info!(
            "Loaded world '{}' (seed {}, {} saved chunks)",
            self.config.world_name,
            self.config.generation.seed,
            self.saved_chunks.len()
        );
    }
}
