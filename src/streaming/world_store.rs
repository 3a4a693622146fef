//! Async world persistence on a dedicated runtime
//!
//! Save and load requests run as tokio tasks. Their completions go through a
//! channel and only surface when the owner calls [`WorldStore::poll_completions`]
//! from the update thread.
//!
//! Requests for the same world are not ordered against each other: two saves
//! in flight may land in either order, and an older load can finish after a
//! newer one. Callers that care must wait for one completion before issuing
//! the next request.

use std::collections::HashSet;
use std::mem;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::runtime::Runtime;
use tokio::sync::mpsc;

use crate::core::{Error, Result};
use crate::streaming::disk_io::{self, ChunkRecord, WorldMeta};
use crate::voxel::chunk::ChunkCoord;

/// Identifies one async request
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Ticket(u64);

/// Result of an async request
#[derive(Debug)]
pub enum Completion {
    /// Meta and chunk records written (or not)
    Saved {
        ticket: Ticket,
        world: String,
        success: bool,
    },
    /// Meta file read; `None` on failure
    MetaLoaded {
        ticket: Ticket,
        world: String,
        meta: Option<WorldMeta>,
    },
}

impl Completion {
    pub fn ticket(&self) -> Ticket {
        match self {
            Completion::Saved { ticket, .. } | Completion::MetaLoaded { ticket, .. } => *ticket,
        }
    }

    pub fn world(&self) -> &str {
        match self {
            Completion::Saved { world, .. } | Completion::MetaLoaded { world, .. } => world,
        }
    }

    pub fn success(&self) -> bool {
        match self {
            Completion::Saved { success, .. } => *success,
            Completion::MetaLoaded { meta, .. } => meta.is_some(),
        }
    }
}

/// JSON file-backed world persistence
pub struct WorldStore {
    root: PathBuf,
    runtime: Runtime,
    completion_tx: mpsc::UnboundedSender<Completion>,
    completion_rx: mpsc::UnboundedReceiver<Completion>,
    /// Tickets issued but not yet polled
    pending: HashSet<Ticket>,
    /// Received by a `wait_all` that timed out, handed out by the next poll
    undelivered: Vec<Completion>,
    next_ticket: u64,
}

impl WorldStore {
    /// Create a store rooted at `root`. The directory is created on first save.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .thread_name("world-store")
            .enable_all()
            .build()?;
        let (completion_tx, completion_rx) = mpsc::unbounded_channel();

        Ok(Self {
            root: root.into(),
            runtime,
            completion_tx,
            completion_rx,
            pending: HashSet::new(),
            undelivered: Vec::new(),
            next_ticket: 0,
        })
    }

    /// Get the save root
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn issue_ticket(&mut self) -> Ticket {
        let ticket = Ticket(self.next_ticket);
        self.next_ticket += 1;
        self.pending.insert(ticket);
        ticket
    }

    /// Check if a world has been saved under this root
    pub fn world_exists(&self, world_name: &str) -> bool {
        disk_io::world_exists(&self.root, world_name)
    }

    /// Check if a chunk record exists for `world_name`
    pub fn has_chunk(&self, world_name: &str, coord: ChunkCoord) -> bool {
        disk_io::chunk_exists(&self.root, world_name, coord)
    }

    /// Write `meta` and then every record in `chunks`.
    ///
    /// An empty world name completes immediately with failure.
    pub fn save_world_async(&mut self, world_name: &str, meta: WorldMeta, chunks: Vec<ChunkRecord>) -> Ticket {
        let ticket = self.issue_ticket();
        let world = world_name.to_string();

        if world.is_empty() {
            log::warn!("Save requested with an empty world name");
            let _ = self.completion_tx.send(Completion::Saved {
                ticket,
                world,
                success: false,
            });
            return ticket;
        }

        let root = self.root.clone();
        let tx = self.completion_tx.clone();
        self.runtime.spawn(async move {
            let success = match disk_io::save_world(&root, &world, &meta, &chunks).await {
                Ok(()) => {
                    log::info!("Saved world '{}' ({} chunks)", world, chunks.len());
                    true
                }
                Err(e) => {
                    log::error!("Failed to save world '{}': {}", world, e);
                    false
                }
            };
            let _ = tx.send(Completion::Saved { ticket, world, success });
        });

        ticket
    }

    /// Read a world's meta file.
    ///
    /// An empty world name completes immediately with failure.
    pub fn load_world_meta_async(&mut self, world_name: &str) -> Ticket {
        let ticket = self.issue_ticket();
        let world = world_name.to_string();

        if world.is_empty() {
            log::warn!("Load requested with an empty world name");
            let _ = self.completion_tx.send(Completion::MetaLoaded { ticket, world, meta: None });
            return ticket;
        }

        let root = self.root.clone();
        let tx = self.completion_tx.clone();
        self.runtime.spawn(async move {
            let meta = match disk_io::load_meta(&root, &world).await {
                Ok(meta) => {
                    log::info!("Loaded meta for world '{}'", world);
                    Some(meta)
                }
                Err(e) => {
                    log::error!("Failed to load meta for world '{}': {}", world, e);
                    None
                }
            };
            let _ = tx.send(Completion::MetaLoaded { ticket, world, meta });
        });

        ticket
    }

    /// Read one chunk record on the calling thread
    pub fn load_chunk_sync(&self, world_name: &str, coord: ChunkCoord) -> Result<ChunkRecord> {
        disk_io::load_chunk_record(&self.root, world_name, coord)
    }

    /// Poll for finished requests (non-blocking)
    pub fn poll_completions(&mut self) -> Vec<Completion> {
        let mut completions = mem::take(&mut self.undelivered);
        while let Ok(completion) = self.completion_rx.try_recv() {
            self.pending.remove(&completion.ticket());
            completions.push(completion);
        }
        completions
    }

    /// Get the number of requests not yet polled
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Check if a request has not been polled yet
    pub fn is_pending(&self, ticket: Ticket) -> bool {
        self.pending.contains(&ticket)
    }

    /// Block until every pending request has completed or `timeout` passes.
    /// Completions are returned in arrival order.
    ///
    /// On timeout, completions received so far are kept for the next
    /// [`poll_completions`](Self::poll_completions).
    pub fn wait_all(&mut self, timeout: Duration) -> Result<Vec<Completion>> {
        let mut completions = mem::take(&mut self.undelivered);
        for completion in &completions {
            self.pending.remove(&completion.ticket());
        }
        let rx = &mut self.completion_rx;
        let pending = &mut self.pending;

        let finished = self.runtime.block_on(async {
            tokio::time::timeout(timeout, async {
                while !pending.is_empty() {
                    match rx.recv().await {
                        Some(completion) => {
                            pending.remove(&completion.ticket());
                            completions.push(completion);
                        }
                        None => break,
                    }
                }
            })
            .await
        });

        match finished {
            Ok(()) => Ok(completions),
            Err(_) => {
                let still_pending = self.pending.len();
                for completion in &completions {
                    self.pending.insert(completion.ticket());
                }
                self.undelivered = completions;
                Err(Error::PersistenceIo(format!(
                    "{} requests still pending after {:?}",
                    still_pending, timeout
                )))
            }
        }
    }
}

impl Drop for WorldStore {
    fn drop(&mut self) {
        if self.pending.is_empty() {
            return;
        }
        // Let in-flight saves finish before the runtime goes away
        log::debug!("Flushing {} pending persistence requests", self.pending.len());
        if let Err(e) = self.wait_all(Duration::from_secs(10)) {
            log::warn!("{}", e);
        }
    }
}
