//! Durable local state for the sync engine.
//!
//! Two keys must round-trip process restarts: the JSON-serialized pending
//! changes blob and the last-sync-timestamp cursor.

use std::fs;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;

use crate::error::{Error, Result};
use crate::models::PushBatch;

const PENDING_FILE: &str = "pending-changes.json";
const CHECKPOINT_FILE: &str = "last-sync-timestamp";

/// Trait for the engine's two durable keys.
///
/// A missing key loads as its default (empty map / zero checkpoint);
/// only corrupt or unreadable state is an error.
pub trait StateStore: Send + Sync {
    /// Load the pending changes blob
    fn load_pending(&self) -> Result<PushBatch>;

    /// Persist the pending changes blob wholesale
    fn save_pending(&self, pending: &PushBatch) -> Result<()>;

    /// Load the last-sync-timestamp cursor (0 if never synced)
    fn load_checkpoint(&self) -> Result<i64>;

    /// Persist the last-sync-timestamp cursor
    fn save_checkpoint(&self, timestamp: i64) -> Result<()>;
}

/// File-backed store keeping both keys under a state directory.
///
/// Writes go through a temp file and rename so a crash mid-write cannot
/// leave a torn blob behind.
pub struct JsonFileStore {
    dir: PathBuf,
}

impl JsonFileStore {
    /// Create a store rooted at `dir`, creating the directory if needed.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    fn pending_path(&self) -> PathBuf {
        self.dir.join(PENDING_FILE)
    }

    fn checkpoint_path(&self) -> PathBuf {
        self.dir.join(CHECKPOINT_FILE)
    }

    fn write_atomic(&self, path: &Path, contents: &[u8]) -> Result<()> {
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, contents)?;
        fs::rename(&tmp, path)?;
        Ok(())
    }
}

impl StateStore for JsonFileStore {
    fn load_pending(&self) -> Result<PushBatch> {
        let path = self.pending_path();
        if !path.exists() {
            return Ok(PushBatch::default());
        }
        let raw = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    fn save_pending(&self, pending: &PushBatch) -> Result<()> {
        let encoded = serde_json::to_vec(pending)?;
        self.write_atomic(&self.pending_path(), &encoded)
    }

    fn load_checkpoint(&self) -> Result<i64> {
        let path = self.checkpoint_path();
        if !path.exists() {
            return Ok(0);
        }
        let raw = fs::read_to_string(path)?;
        raw.trim()
            .parse()
            .map_err(|_| Error::Storage(format!("invalid checkpoint value: {}", raw.trim())))
    }

    fn save_checkpoint(&self, timestamp: i64) -> Result<()> {
        self.write_atomic(&self.checkpoint_path(), timestamp.to_string().as_bytes())
    }
}

/// In-memory store (useful for testing and ephemeral sessions).
#[derive(Default)]
pub struct MemoryStore {
    pending: Mutex<PushBatch>,
    checkpoint: Mutex<i64>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl StateStore for MemoryStore {
    fn load_pending(&self) -> Result<PushBatch> {
        Ok(self.pending.lock().clone())
    }

    fn save_pending(&self, pending: &PushBatch) -> Result<()> {
        *self.pending.lock() = pending.clone();
        Ok(())
    }

    fn load_checkpoint(&self) -> Result<i64> {
        Ok(*self.checkpoint.lock())
    }

    fn save_checkpoint(&self, timestamp: i64) -> Result<()> {
        *self.checkpoint.lock() = timestamp;
        Ok(())
    }
}
