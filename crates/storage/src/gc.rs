//! # Snapshot Garbage Collection
//!
//! Removes snapshots the ledger has moved past. Validators only ever need
//! the snapshot for the ledger's *current* root, so anything stored with a
//! version below the confirmed version is unreachable.
//!
//! ## Prinsip Kunci
//!
//! - `scan()` reads the ledger once per identity and lists candidates; it
//!   deletes nothing
//! - `collect()` removes only scanned candidates, re-checking each under the
//!   identity's writer lock
//! - The confirmed snapshot itself is never removed
//! - Identities the ledger does not know are skipped, not emptied
//! - One persist per sweep
//!
//! ```text
//! ledger: (root_c, v_c)
//!
//! snapshots:  v1  v2  v3 │ v_c  v_c+1 ...
//!             └─ remove ─┘ └──── keep ────┘
//! ```

use std::collections::BTreeMap;
use std::fmt::{self, Display};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use ocs_common::{CommitmentRecord, DatasetId, Hash32, LedgerReader, Version};

use crate::authority::StorageAuthority;
use crate::persistence::PersistenceError;

// ════════════════════════════════════════════════════════════════════════════════
// GC ERROR
// ════════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Error)]
pub enum GcError {
    #[error("sweep not persisted: {0}")]
    Persistence(#[from] PersistenceError),
}

// ════════════════════════════════════════════════════════════════════════════════
// SCAN RESULT
// ════════════════════════════════════════════════════════════════════════════════

/// Snapshot eligible for removal at scan time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GcCandidate {
    pub root: Hash32,
    pub version: Version,
}

#[derive(Debug, Clone, Default)]
pub struct GcScanResult {
    /// Per identity: the ledger record read during the scan and the
    /// snapshots below it.
    pub candidates: BTreeMap<DatasetId, (CommitmentRecord, Vec<GcCandidate>)>,
    /// Identities with no ledger account.
    pub skipped_unknown: Vec<DatasetId>,
    /// Identities whose ledger query failed.
    pub failed: Vec<DatasetId>,
}

impl GcScanResult {
    pub fn total_collectible(&self) -> usize {
        self.candidates.values().map(|(_, c)| c.len()).sum()
    }

    pub fn has_collectible(&self) -> bool {
        self.total_collectible() > 0
    }

    pub fn contains(&self, identity: &DatasetId, root: &Hash32) -> bool {
        self.candidates
            .get(identity)
            .map(|(_, c)| c.iter().any(|cand| cand.root == *root))
            .unwrap_or(false)
    }
}

impl Display for GcScanResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "GcScanResult {{ identities: {}, collectible: {}, unknown: {}, failed: {} }}",
            self.candidates.len(),
            self.total_collectible(),
            self.skipped_unknown.len(),
            self.failed.len()
        )
    }
}

// ════════════════════════════════════════════════════════════════════════════════
// COLLECTOR
// ════════════════════════════════════════════════════════════════════════════════

pub struct SnapshotCollector {
    authority: Arc<StorageAuthority>,
    ledger: Arc<dyn LedgerReader>,
}

impl fmt::Debug for SnapshotCollector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SnapshotCollector")
            .field("authority", &self.authority)
            .field("ledger", &"<LedgerReader>")
            .finish()
    }
}

impl SnapshotCollector {
    pub fn new(authority: Arc<StorageAuthority>, ledger: Arc<dyn LedgerReader>) -> Self {
        Self { authority, ledger }
    }

    /// Lists snapshots older than each identity's confirmed version.
    pub async fn scan(&self) -> GcScanResult {
        let mut result = GcScanResult::default();

        for identity in self.authority.identities() {
            let confirmed = match self.ledger.confirmed_commitment(&identity).await {
                Ok(Some(record)) => record,
                Ok(None) => {
                    debug!("GC scan: {} unknown to ledger, skipped", identity);
                    result.skipped_unknown.push(identity);
                    continue;
                }
                Err(e) => {
                    warn!("GC scan: ledger query for {} failed: {}", identity, e);
                    result.failed.push(identity);
                    continue;
                }
            };

            let stale: Vec<GcCandidate> = self
                .authority
                .snapshot_versions(&identity)
                .into_iter()
                .filter(|(root, version)| *version < confirmed.version && *root != confirmed.root)
                .map(|(root, version)| GcCandidate { root, version })
                .collect();

            if !stale.is_empty() {
                debug!(
                    "GC scan: {} has {} snapshots below {}",
                    identity,
                    stale.len(),
                    confirmed
                );
                result.candidates.insert(identity, (confirmed, stale));
            }
        }

        debug!("GC scan complete: {}", result);
        result
    }

    /// Removes the scanned candidates and persists once if anything went.
    pub fn collect(&self, result: &GcScanResult) -> Result<usize, GcError> {
        let mut removed = 0;
        for (identity, (confirmed, candidates)) in &result.candidates {
            let roots: Vec<Hash32> = candidates.iter().map(|c| c.root).collect();
            removed += self.authority.prune(identity, &roots, confirmed);
        }

        if removed > 0 {
            if let Err(e) = self.authority.persist() {
                error!("GC collect: removed {} snapshots but persist failed: {}", removed, e);
                return Err(e.into());
            }
        }
        Ok(removed)
    }

    /// Full sweep (scan + collect).
    pub async fn run(&self) -> Result<(GcScanResult, usize), GcError> {
        let scan = self.scan().await;
        let removed = if scan.has_collectible() {
            self.collect(&scan)?
        } else {
            0
        };
        if removed > 0 || !scan.failed.is_empty() {
            info!(
                "GC sweep: removed {} snapshots ({} identities skipped, {} ledger errors)",
                removed,
                scan.skipped_unknown.len(),
                scan.failed.len()
            );
        }
        Ok((scan, removed))
    }

    /// Sweeps every `interval` until the returned task is aborted.
    pub fn spawn(self: Arc<Self>, interval: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // first tick fires immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if let Err(e) = self.run().await {
                    warn!("GC sweep failed: {}", e);
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::MemoryStateStore;
    use async_trait::async_trait;
    use ocs_common::LedgerQueryError;
    use ocs_common::merkle::{hash_leaf, MerkleCommitmentTree};
    use ocs_common::wire::WireItem;
    use ocs_common::Scalar;
    use parking_lot::Mutex;
    use std::collections::HashMap;

    #[derive(Default)]
    struct MockLedger {
        records: Mutex<HashMap<DatasetId, CommitmentRecord>>,
        broken: Mutex<Vec<DatasetId>>,
    }

    #[async_trait]
    impl LedgerReader for MockLedger {
        async fn confirmed_commitment(
            &self,
            identity: &DatasetId,
        ) -> Result<Option<CommitmentRecord>, LedgerQueryError> {
            if self.broken.lock().contains(identity) {
                return Err(LedgerQueryError::Unavailable("down".to_string()));
            }
            Ok(self.records.lock().get(identity).copied())
        }
    }

    fn id(s: &str) -> DatasetId {
        DatasetId::new(s).expect("identity")
    }

    fn data(v: u64) -> Vec<WireItem> {
        vec![(0, vec![Scalar::from_u64(v)])]
    }

    fn root_of(items: &[WireItem]) -> Hash32 {
        MerkleCommitmentTree::from_leaves(4, items.iter().map(|(i, v)| (*i, hash_leaf(v))))
            .expect("tree")
            .get_root()
    }

    /// Stores versions 1..=n for `identity`, returning their roots.
    fn fill(authority: &StorageAuthority, identity: &DatasetId, n: u64) -> Vec<Hash32> {
        (1..=n)
            .map(|v| {
                authority.store(identity, 4, data(v)).expect("store");
                root_of(&data(v))
            })
            .collect()
    }

    fn setup() -> (Arc<MemoryStateStore>, Arc<StorageAuthority>, Arc<MockLedger>, SnapshotCollector) {
        let store = Arc::new(MemoryStateStore::new());
        let authority = Arc::new(StorageAuthority::open(store.clone(), 8).expect("open"));
        let ledger = Arc::new(MockLedger::default());
        let collector = SnapshotCollector::new(authority.clone(), ledger.clone());
        (store, authority, ledger, collector)
    }

    #[tokio::test]
    async fn test_scan_does_not_delete() {
        let (_store, authority, ledger, collector) = setup();
        let roots = fill(&authority, &id("alpha"), 4);
        ledger
            .records
            .lock()
            .insert(id("alpha"), CommitmentRecord::new(roots[2], 3));

        let scan = collector.scan().await;
        assert!(scan.has_collectible());
        assert_eq!(scan.total_collectible(), 2);
        assert!(scan.contains(&id("alpha"), &roots[0]));
        assert!(scan.contains(&id("alpha"), &roots[1]));
        assert!(!scan.contains(&id("alpha"), &roots[2]));
        assert_eq!(authority.snapshot_count(&id("alpha")), 4);
    }

    #[tokio::test]
    async fn test_run_removes_below_confirmed_and_persists_once() {
        let (store, authority, ledger, collector) = setup();
        let roots = fill(&authority, &id("alpha"), 4);
        ledger
            .records
            .lock()
            .insert(id("alpha"), CommitmentRecord::new(roots[2], 3));
        let saves_before = store.save_count();

        let (_, removed) = collector.run().await.expect("run");
        assert_eq!(removed, 2);
        assert_eq!(store.save_count(), saves_before + 1);
        assert!(authority.fetch(&id("alpha"), &roots[2]).is_ok());
        assert!(authority.fetch(&id("alpha"), &roots[3]).is_ok());
        assert!(authority.fetch(&id("alpha"), &roots[0]).is_err());

        let doc = store.snapshot().expect("doc");
        assert_eq!(doc.identities[&id("alpha")].root2data.len(), 2);

        // nothing left: no extra save
        let (_, removed) = collector.run().await.expect("run again");
        assert_eq!(removed, 0);
        assert_eq!(store.save_count(), saves_before + 1);
    }

    #[tokio::test]
    async fn test_unknown_and_failing_identities_untouched() {
        let (_store, authority, ledger, collector) = setup();
        fill(&authority, &id("alpha"), 3);
        fill(&authority, &id("beta"), 3);
        ledger.broken.lock().push(id("beta"));

        let (scan, removed) = collector.run().await.expect("run");
        assert_eq!(removed, 0);
        assert!(!scan.has_collectible());
        assert_eq!(scan.skipped_unknown, vec![id("alpha")]);
        assert_eq!(scan.failed, vec![id("beta")]);
        assert_eq!(authority.snapshot_count(&id("alpha")), 3);
        assert_eq!(authority.snapshot_count(&id("beta")), 3);
    }

    #[tokio::test]
    async fn test_collect_rechecks_versions() {
        let (_store, authority, ledger, collector) = setup();
        let roots = fill(&authority, &id("alpha"), 3);
        ledger
            .records
            .lock()
            .insert(id("alpha"), CommitmentRecord::new(roots[2], 3));
        let scan = collector.scan().await;
        assert!(scan.contains(&id("alpha"), &roots[0]));

        // root of version 1 stored again between scan and collect: now v4
        authority.store(&id("alpha"), 4, data(1)).expect("restore");
        let removed = collector.collect(&scan).expect("collect");
        assert_eq!(removed, 1);
        assert!(authority.fetch(&id("alpha"), &roots[0]).is_ok());
        assert!(authority.fetch(&id("alpha"), &roots[1]).is_err());
    }

    #[tokio::test]
    async fn test_collect_persist_failure_reported() {
        let (store, authority, ledger, collector) = setup();
        let roots = fill(&authority, &id("alpha"), 2);
        ledger
            .records
            .lock()
            .insert(id("alpha"), CommitmentRecord::new(roots[1], 2));
        store.fail_next_saves(1);
        let err = collector.run().await.unwrap_err();
        assert!(matches!(err, GcError::Persistence(_)));
    }

    #[tokio::test]
    async fn test_spawn_sweeps_on_interval() {
        let (_store, authority, ledger, collector) = setup();
        let roots = fill(&authority, &id("alpha"), 3);
        ledger
            .records
            .lock()
            .insert(id("alpha"), CommitmentRecord::new(roots[2], 3));

        let handle = Arc::new(collector).spawn(Duration::from_millis(20));
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(authority.snapshot_count(&id("alpha")), 1);
        handle.abort();
    }
}
