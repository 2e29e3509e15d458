//! # Storage Authority
//!
//! Sole holder of full dataset contents. Every accepted `store` produces a
//! snapshot keyed by its Merkle root, a fresh version number and a signed
//! attestation over `(root, version)`.
//!
//! ## Identity Table
//!
//! ```text
//! identities: RwLock<HashMap<DatasetId, Arc<IdentitySlot>>>
//!                                           │
//!                     ┌─────────────────────┴───────────────────┐
//!                     │ writer: Mutex<()>                       │ serialises store/GC
//!                     │ record: RwLock<Option<Arc<IdentityRecord>>> │ swapped whole
//!                     └─────────────────────────────────────────┘
//! ```
//!
//! Readers clone the record `Arc` and never wait on a writer's hashing or
//! disk I/O. A writer builds the next record off to the side and swaps it
//! in only after the state document is durable.
//!
//! ## Lock Order
//!
//! identity `writer` → `persist_lock`. Never the reverse. A record is
//! published while `persist_lock` is still held so that every saved document
//! contains every published record.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use thiserror::Error;
use tracing::{debug, info, warn};

use ocs_common::merkle::{hash_leaf, leaf_capacity, MerkleError, MAX_TREE_HEIGHT};
use ocs_common::wire::{
    WireItem, ERR_DUPLICATE_INDEX, ERR_HEIGHT_MISMATCH, ERR_HEIGHT_OUT_OF_RANGE,
    ERR_INDEX_OUT_OF_RANGE, ERR_INTERNAL, ERR_TOO_MANY_ITEMS, ERR_UNKNOWN_ROOT,
};
use ocs_common::{
    AttestationSignature, AuthorityKeypair, AuthorityPublicKey, CommitmentRecord, DatasetId,
    Hash32, LeafIndex, MerkleCommitmentTree, Version,
};

use crate::persistence::{IdentityState, PersistenceError, Snapshot, StateDocument, StateStore};

// ════════════════════════════════════════════════════════════════════════════════
// ERROR
// ════════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Error)]
pub enum AuthorityError {
    #[error("height {height} outside supported range 1..={max}")]
    HeightOutOfRange { height: u8, max: u8 },

    #[error("identity {identity} has height {expected}, request used {found}")]
    HeightMismatch {
        identity: DatasetId,
        expected: u8,
        found: u8,
    },

    #[error("{count} items exceed tree capacity {capacity}")]
    TooManyItems { count: usize, capacity: u64 },

    #[error("leaf index {index} outside capacity {capacity}")]
    IndexOutOfRange { index: LeafIndex, capacity: u64 },

    #[error("leaf index {0} appears more than once")]
    DuplicateIndex(LeafIndex),

    #[error("no snapshot for root {root} under identity {identity}")]
    UnknownRoot { identity: DatasetId, root: Hash32 },

    #[error("state not persisted: {0}")]
    Persistence(#[from] PersistenceError),
}

impl AuthorityError {
    /// Wire code used in the HTTP error body.
    pub fn code(&self) -> &'static str {
        match self {
            AuthorityError::HeightOutOfRange { .. } => ERR_HEIGHT_OUT_OF_RANGE,
            AuthorityError::HeightMismatch { .. } => ERR_HEIGHT_MISMATCH,
            AuthorityError::TooManyItems { .. } => ERR_TOO_MANY_ITEMS,
            AuthorityError::IndexOutOfRange { .. } => ERR_INDEX_OUT_OF_RANGE,
            AuthorityError::DuplicateIndex(_) => ERR_DUPLICATE_INDEX,
            AuthorityError::UnknownRoot { .. } => ERR_UNKNOWN_ROOT,
            AuthorityError::Persistence(_) => ERR_INTERNAL,
        }
    }
}

impl From<MerkleError> for AuthorityError {
    fn from(e: MerkleError) -> Self {
        match e {
            MerkleError::InvalidHeight { height, max } => {
                AuthorityError::HeightOutOfRange { height, max }
            }
            MerkleError::IndexOutOfRange {
                index, capacity, ..
            } => AuthorityError::IndexOutOfRange { index, capacity },
        }
    }
}

// ════════════════════════════════════════════════════════════════════════════════
// IDENTITY RECORD
// ════════════════════════════════════════════════════════════════════════════════

/// Immutable view of one identity. Replaced whole on every change.
#[derive(Debug, Clone)]
pub struct IdentityRecord {
    pub height: u8,
    pub next_version: Version,
    pub snapshots: HashMap<Hash32, Arc<Snapshot>>,
}

impl IdentityRecord {
    fn empty(height: u8) -> Self {
        Self {
            height,
            next_version: 1,
            snapshots: HashMap::new(),
        }
    }

    fn from_state(state: IdentityState) -> Self {
        Self {
            height: state.height,
            next_version: state.next_version,
            snapshots: state
                .root2data
                .into_iter()
                .map(|(root, snap)| (root, Arc::new(snap)))
                .collect(),
        }
    }

    fn to_state(&self) -> IdentityState {
        IdentityState {
            next_version: self.next_version,
            height: self.height,
            root2data: self
                .snapshots
                .iter()
                .map(|(root, snap)| (*root, Snapshot::clone(snap)))
                .collect(),
        }
    }
}

#[derive(Default)]
struct IdentitySlot {
    writer: Mutex<()>,
    /// `None` until the first store for this identity is durable.
    record: RwLock<Option<Arc<IdentityRecord>>>,
}

impl IdentitySlot {
    fn current(&self) -> Option<Arc<IdentityRecord>> {
        self.record.read().clone()
    }
}

// ════════════════════════════════════════════════════════════════════════════════
// STORAGE AUTHORITY
// ════════════════════════════════════════════════════════════════════════════════

pub struct StorageAuthority {
    keypair: AuthorityKeypair,
    max_height: u8,
    identities: RwLock<HashMap<DatasetId, Arc<IdentitySlot>>>,
    state: Arc<dyn StateStore>,
    persist_lock: Mutex<()>,
}

impl std::fmt::Debug for StorageAuthority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageAuthority")
            .field("public_key", &self.keypair.public_key())
            .field("max_height", &self.max_height)
            .field("identities", &self.identity_count())
            .finish()
    }
}

impl StorageAuthority {
    /// Loads state from `state`, generating and persisting a signing key on
    /// first start.
    pub fn open(state: Arc<dyn StateStore>, max_height: u8) -> Result<Self, AuthorityError> {
        if max_height == 0 || max_height > MAX_TREE_HEIGHT {
            return Err(AuthorityError::HeightOutOfRange {
                height: max_height,
                max: MAX_TREE_HEIGHT,
            });
        }

        let doc = state.load()?.unwrap_or_default();
        let (keypair, fresh_key) = match doc.secret_key.as_deref() {
            Some(secret) => (
                AuthorityKeypair::from_secret_hex(secret).map_err(PersistenceError::from)?,
                false,
            ),
            None => (AuthorityKeypair::generate(), true),
        };

        let identities: HashMap<DatasetId, Arc<IdentitySlot>> = doc
            .identities
            .into_iter()
            .map(|(id, st)| {
                let slot = IdentitySlot {
                    writer: Mutex::new(()),
                    record: RwLock::new(Some(Arc::new(IdentityRecord::from_state(st)))),
                };
                (id, Arc::new(slot))
            })
            .collect();

        let authority = Self {
            keypair,
            max_height,
            identities: RwLock::new(identities),
            state,
            persist_lock: Mutex::new(()),
        };

        if fresh_key {
            authority.persist()?;
            info!("generated authority signing key {}", authority.keypair.public_key());
        }
        info!(
            "authority ready: {} identities, max height {}, public key {}",
            authority.identity_count(),
            max_height,
            authority.keypair.public_key()
        );
        Ok(authority)
    }

    pub fn max_height(&self) -> u8 {
        self.max_height
    }

    /// The signing key is server-wide; `identity` is accepted so callers
    /// need not assume that.
    pub fn public_key(&self, _identity: &DatasetId) -> AuthorityPublicKey {
        self.keypair.public_key()
    }

    /// Key served when no identity is given.
    pub fn default_public_key(&self) -> AuthorityPublicKey {
        self.keypair.public_key()
    }

    // ════════════════════════════════════════════════════════════════════════
    // STORE
    // ════════════════════════════════════════════════════════════════════════

    fn check_request(&self, height: u8, items: &[WireItem]) -> Result<u64, AuthorityError> {
        if height == 0 || height > self.max_height {
            return Err(AuthorityError::HeightOutOfRange {
                height,
                max: self.max_height,
            });
        }
        let capacity = leaf_capacity(height)?;
        if items.len() as u64 > capacity {
            return Err(AuthorityError::TooManyItems {
                count: items.len(),
                capacity,
            });
        }
        let mut seen = HashSet::with_capacity(items.len());
        for (index, _) in items {
            if *index >= capacity {
                return Err(AuthorityError::IndexOutOfRange {
                    index: *index,
                    capacity,
                });
            }
            if !seen.insert(*index) {
                return Err(AuthorityError::DuplicateIndex(*index));
            }
        }
        Ok(capacity)
    }

    fn slot_or_insert(&self, identity: &DatasetId) -> Arc<IdentitySlot> {
        if let Some(slot) = self.identities.read().get(identity) {
            return slot.clone();
        }
        self.identities
            .write()
            .entry(identity.clone())
            .or_default()
            .clone()
    }

    /// Stores the full item list for `identity` and attests to its root.
    ///
    /// Every accepted call consumes exactly one version, even with zero
    /// items or a root that was stored before. Nothing is signed unless the
    /// new state is durable.
    pub fn store(
        &self,
        identity: &DatasetId,
        height: u8,
        items: Vec<WireItem>,
    ) -> Result<(Version, AttestationSignature), AuthorityError> {
        self.check_request(height, &items)?;
        let tree = MerkleCommitmentTree::from_leaves(
            height,
            items.iter().map(|(index, value)| (*index, hash_leaf(value))),
        )?;
        let root = tree.get_root();
        let item_count = items.len();

        let slot = self.slot_or_insert(identity);
        let _writer = slot.writer.lock();

        let base = match slot.current() {
            Some(record) if record.height != height => {
                return Err(AuthorityError::HeightMismatch {
                    identity: identity.clone(),
                    expected: record.height,
                    found: height,
                });
            }
            Some(record) => record,
            None => Arc::new(IdentityRecord::empty(height)),
        };

        let version = base.next_version;
        let mut next = IdentityRecord::clone(&base);
        next.snapshots
            .insert(root, Arc::new(Snapshot { version, items }));
        next.next_version = version + 1;
        let next = Arc::new(next);

        {
            let _persist = self.persist_lock.lock();
            let doc = self.build_document(Some((identity, &next)));
            if let Err(e) = self.state.save(&doc) {
                warn!("store for {} not persisted: {}", identity, e);
                return Err(e.into());
            }
            *slot.record.write() = Some(next);
        }

        let signature = self.keypair.sign_attestation(&root, version);
        info!(
            "stored {} items for {} at version {} (root {})",
            item_count,
            identity,
            version,
            root.short()
        );
        Ok((version, signature))
    }

    // ════════════════════════════════════════════════════════════════════════
    // FETCH
    // ════════════════════════════════════════════════════════════════════════

    /// Items stored for exactly `root`.
    pub fn fetch(&self, identity: &DatasetId, root: &Hash32) -> Result<Vec<WireItem>, AuthorityError> {
        self.snapshot(identity, root)
            .map(|snap| snap.items.clone())
            .ok_or_else(|| AuthorityError::UnknownRoot {
                identity: identity.clone(),
                root: *root,
            })
    }

    fn record(&self, identity: &DatasetId) -> Option<Arc<IdentityRecord>> {
        let slot = self.identities.read().get(identity).cloned()?;
        slot.current()
    }

    pub fn snapshot(&self, identity: &DatasetId, root: &Hash32) -> Option<Arc<Snapshot>> {
        self.record(identity)?.snapshots.get(root).cloned()
    }

    // ════════════════════════════════════════════════════════════════════════
    // STATS
    // ════════════════════════════════════════════════════════════════════════

    pub fn identity_count(&self) -> usize {
        self.identities
            .read()
            .values()
            .filter(|slot| slot.current().is_some())
            .count()
    }

    pub fn snapshot_count(&self, identity: &DatasetId) -> usize {
        self.record(identity).map(|r| r.snapshots.len()).unwrap_or(0)
    }

    /// Version the next accepted store for `identity` will receive.
    pub fn next_version(&self, identity: &DatasetId) -> Version {
        self.record(identity).map(|r| r.next_version).unwrap_or(1)
    }

    pub fn height_of(&self, identity: &DatasetId) -> Option<u8> {
        self.record(identity).map(|r| r.height)
    }

    // ════════════════════════════════════════════════════════════════════════
    // GC SUPPORT
    // ════════════════════════════════════════════════════════════════════════

    pub(crate) fn identities(&self) -> Vec<DatasetId> {
        self.identities
            .read()
            .iter()
            .filter(|(_, slot)| slot.current().is_some())
            .map(|(id, _)| id.clone())
            .collect()
    }

    pub(crate) fn snapshot_versions(&self, identity: &DatasetId) -> Vec<(Hash32, Version)> {
        self.record(identity)
            .map(|r| r.snapshots.iter().map(|(root, s)| (*root, s.version)).collect())
            .unwrap_or_default()
    }

    /// Drops `roots` from `identity` where the stored snapshot is still
    /// older than `confirmed`. The confirmed root itself is never dropped.
    /// Publishes without persisting; callers persist once afterwards.
    pub(crate) fn prune(
        &self,
        identity: &DatasetId,
        roots: &[Hash32],
        confirmed: &CommitmentRecord,
    ) -> usize {
        let Some(slot) = self.identities.read().get(identity).cloned() else {
            return 0;
        };
        let _writer = slot.writer.lock();
        let Some(current) = slot.current() else {
            return 0;
        };

        let mut next = IdentityRecord::clone(&current);
        let mut removed = 0;
        for root in roots {
            if *root == confirmed.root {
                continue;
            }
            let stale = next
                .snapshots
                .get(root)
                .map(|s| s.version < confirmed.version)
                .unwrap_or(false);
            if stale {
                next.snapshots.remove(root);
                removed += 1;
                debug!("pruned snapshot {} of {}", root.short(), identity);
            }
        }
        if removed > 0 {
            *slot.record.write() = Some(Arc::new(next));
        }
        removed
    }

    /// Writes the current published state.
    pub fn persist(&self) -> Result<(), PersistenceError> {
        let _persist = self.persist_lock.lock();
        let doc = self.build_document(None);
        self.state.save(&doc)
    }

    fn build_document(&self, pending: Option<(&DatasetId, &Arc<IdentityRecord>)>) -> StateDocument {
        let mut doc = StateDocument {
            secret_key: Some(self.keypair.secret_hex()),
            identities: Default::default(),
        };
        for (id, slot) in self.identities.read().iter() {
            let record = match pending {
                Some((pending_id, record)) if pending_id == id => Some(record.clone()),
                _ => slot.current(),
            };
            if let Some(record) = record {
                doc.identities.insert(id.clone(), record.to_state());
            }
        }
        doc
    }
}
