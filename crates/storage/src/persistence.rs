//! Authority state persistence.
//!
//! The whole authority state is one JSON document:
//!
//! ```text
//! {
//!   "secret_key": "<hex ed25519 seed>",
//!   "identities": {
//!     "<identity>": {
//!       "next_version": 3,
//!       "height": 4,
//!       "root2data": { "<root hex>": { "version": 2, "items": [[3, ["42"]]] } }
//!     }
//!   }
//! }
//! ```
//!
//! It is rewritten in full on every accepted store and on every GC sweep
//! that removed something.
//!
//! ## Contract
//!
//! - `save()` either replaces the whole document or leaves the previous one
//! - `load()` returns `None` when nothing was ever saved
//! - No panic or unwrap allowed

use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use ocs_common::wire::WireItem;
use ocs_common::{CryptoError, DatasetId, Hash32, Version};

// ════════════════════════════════════════════════════════════════════════════════
// PERSISTENCE ERROR
// ════════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("state I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("state document is not valid JSON: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("stored signing key is unusable: {0}")]
    CorruptKey(#[from] CryptoError),

    #[error("state store unavailable: {0}")]
    Unavailable(String),
}

// ════════════════════════════════════════════════════════════════════════════════
// DOCUMENT
// ════════════════════════════════════════════════════════════════════════════════

/// Stored item list for one root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub version: Version,
    pub items: Vec<WireItem>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityState {
    pub next_version: Version,
    pub height: u8,
    pub root2data: BTreeMap<Hash32, Snapshot>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateDocument {
    /// Hex Ed25519 seed. Absent only before first start.
    #[serde(default)]
    pub secret_key: Option<String>,
    #[serde(default)]
    pub identities: BTreeMap<DatasetId, IdentityState>,
}

// ════════════════════════════════════════════════════════════════════════════════
// STATE STORE TRAIT
// ════════════════════════════════════════════════════════════════════════════════

/// Backend holding the authority's state document.
pub trait StateStore: Send + Sync {
    fn load(&self) -> Result<Option<StateDocument>, PersistenceError>;

    /// Durably replaces the stored document. Must not return `Ok` before
    /// the bytes are on stable storage.
    fn save(&self, doc: &StateDocument) -> Result<(), PersistenceError>;
}

// ════════════════════════════════════════════════════════════════════════════════
// FILE STORE
// ════════════════════════════════════════════════════════════════════════════════

/// JSON file backend. Writes go to a temp file next to the target, are
/// fsynced, then renamed over it.
#[derive(Debug, Clone)]
pub struct FileStateStore {
    path: PathBuf,
}

impl FileStateStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn atomic_write(&self, data: &[u8]) -> Result<(), PersistenceError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        // temp file name: <state>.tmp.<millis>
        let ts = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or_default();
        let tmp = self.path.with_extension(format!("tmp.{}", ts));
        {
            let mut f = OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(&tmp)?;
            f.write_all(data)?;
            f.sync_all()?;
        }
        if let Err(e) = fs::rename(&tmp, &self.path) {
            let _ = fs::remove_file(&tmp);
            return Err(e.into());
        }
        Ok(())
    }
}

impl StateStore for FileStateStore {
    fn load(&self) -> Result<Option<StateDocument>, PersistenceError> {
        if !self.path.exists() {
            return Ok(None);
        }
        let raw = fs::read(&self.path)?;
        Ok(Some(serde_json::from_slice(&raw)?))
    }

    fn save(&self, doc: &StateDocument) -> Result<(), PersistenceError> {
        let data = serde_json::to_vec_pretty(doc)?;
        self.atomic_write(&data)
    }
}

// ════════════════════════════════════════════════════════════════════════════════
// MEMORY STORE
// ════════════════════════════════════════════════════════════════════════════════

/// In-memory backend for tests and ephemeral runs. Can be told to fail
/// upcoming saves.
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    doc: Mutex<Option<StateDocument>>,
    failing_saves: AtomicUsize,
    saves: AtomicUsize,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_document(doc: StateDocument) -> Self {
        Self {
            doc: Mutex::new(Some(doc)),
            ..Self::default()
        }
    }

    /// The next `n` calls to `save` fail with `Unavailable`.
    pub fn fail_next_saves(&self, n: usize) {
        self.failing_saves.store(n, Ordering::SeqCst);
    }

    /// Successful saves so far.
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    pub fn snapshot(&self) -> Option<StateDocument> {
        self.doc.lock().clone()
    }
}

impl StateStore for MemoryStateStore {
    fn load(&self) -> Result<Option<StateDocument>, PersistenceError> {
        Ok(self.doc.lock().clone())
    }

    fn save(&self, doc: &StateDocument) -> Result<(), PersistenceError> {
        let failing = self
            .failing_saves
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if failing.is_ok() {
            return Err(PersistenceError::Unavailable("injected save failure".to_string()));
        }
        *self.doc.lock() = Some(doc.clone());
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
