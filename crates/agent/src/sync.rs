//! # Sync Cycle
//!
//! One cycle moves a dataset from the ledger's confirmed commitment to the
//! next one:
//!
//! ```text
//! ledger.confirmed_commitment ──▶ (root, version)
//!        │ root == empty_root(height) ? start empty : authority.fetch(root)
//!        ▼
//! rebuild tree ─▶ witness(index) ─▶ set leaf ─▶ authority.store(all items)
//!        │                                              │ (version, signature)
//!        ▼                                              ▼
//!                ledger.submit_update(UpdateProof) ──▶ new (root, version)
//! ```
//!
//! ## Prinsip Kunci
//!
//! - The client holds no durable state; every cycle starts from the ledger.
//! - Losing a race to another writer is expected. The ledger rejects the
//!   stale proof and [`SyncClient::sync_with_retry`] restarts the cycle.

use std::collections::BTreeMap;
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info};

use ocs_chain::{Ledger, LedgerError};
use ocs_common::merkle::{empty_root, hash_leaf};
use ocs_common::{
    Attestation, CommitmentRecord, DatasetId, Hash32, LeafIndex, LeafValue, LedgerQueryError,
    MerkleCommitmentTree, MerkleError, Update, UpdateProof,
};

use crate::client::{AuthorityApi, ClientError};
use crate::retry::{retry_with_backoff, RetryConfig, RetryResult};

// ════════════════════════════════════════════════════════════════════════════
// ERROR
// ════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("identity {0} has no ledger account")]
    UnknownIdentity(DatasetId),

    #[error(transparent)]
    Authority(#[from] ClientError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error("ledger query failed: {0}")]
    LedgerQuery(#[from] LedgerQueryError),

    #[error(transparent)]
    Merkle(#[from] MerkleError),

    /// The fetched snapshot does not hash to the root the ledger confirms.
    #[error("snapshot root {found} does not match confirmed root {expected}")]
    SnapshotMismatch { expected: Hash32, found: Hash32 },

    #[error("next value rejected: {0}")]
    NextValue(String),

    #[error("gave up after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: Box<SyncError> },
}

impl SyncError {
    /// True when restarting the whole cycle from a fresh ledger read may
    /// succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Ledger(e) => e.is_retryable(),
            SyncError::Authority(e) => e.is_unknown_root() || e.is_transport(),
            SyncError::LedgerQuery(LedgerQueryError::Unavailable(_)) => true,
            _ => false,
        }
    }
}

// ════════════════════════════════════════════════════════════════════════════
// NEXT-VALUE FUNCTIONS
// ════════════════════════════════════════════════════════════════════════════

/// Counter step: an empty leaf becomes `[1]`, `[n]` becomes `[n + 1]`.
pub fn increment_leaf(old: Option<&LeafValue>) -> Result<LeafValue, String> {
    match old.map(Vec::as_slice) {
        None => Ok(vec![ocs_common::Scalar::from_u64(1)]),
        Some([n]) => n
            .checked_add_u64(1)
            .map(|next| vec![next])
            .ok_or_else(|| "counter overflow".to_string()),
        Some(other) => Err(format!(
            "counter leaf must hold 1 scalar, found {}",
            other.len()
        )),
    }
}

// ════════════════════════════════════════════════════════════════════════════
// CLIENT
// ════════════════════════════════════════════════════════════════════════════

/// Result of one committed cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleOutcome {
    pub old: CommitmentRecord,
    pub new: CommitmentRecord,
    pub index: LeafIndex,
    /// `None` when the leaf was empty.
    pub old_value: Option<LeafValue>,
    pub new_value: LeafValue,
}

pub struct SyncClient {
    authority: Arc<dyn AuthorityApi>,
    ledger: Arc<dyn Ledger>,
    retry: RetryConfig,
}

impl SyncClient {
    pub fn new(authority: Arc<dyn AuthorityApi>, ledger: Arc<dyn Ledger>) -> Self {
        Self {
            authority,
            ledger,
            retry: RetryConfig::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn retry_config(&self) -> &RetryConfig {
        &self.retry
    }

    /// Loads the confirmed snapshot into a tree and its item map.
    async fn load(
        &self,
        identity: &DatasetId,
        height: u8,
        confirmed: &CommitmentRecord,
    ) -> Result<(MerkleCommitmentTree, BTreeMap<LeafIndex, LeafValue>), SyncError> {
        // no snapshot is ever stored for the empty tree
        let items: BTreeMap<LeafIndex, LeafValue> = if confirmed.root == empty_root(height)? {
            debug!("{} is at the empty root, skipping fetch", identity);
            BTreeMap::new()
        } else {
            self.authority
                .fetch(identity, &confirmed.root)
                .await?
                .into_iter()
                .collect()
        };

        let tree = MerkleCommitmentTree::from_leaves(
            height,
            items.iter().map(|(index, value)| (*index, hash_leaf(value))),
        )?;
        let found = tree.get_root();
        if found != confirmed.root {
            return Err(SyncError::SnapshotMismatch {
                expected: confirmed.root,
                found,
            });
        }
        Ok((tree, items))
    }

    /// Runs one cycle that rewrites the leaf at `index` with
    /// `next_value(old)` and commits it on the ledger.
    pub async fn run_cycle<F>(
        &self,
        identity: &DatasetId,
        height: u8,
        index: LeafIndex,
        next_value: &F,
    ) -> Result<CycleOutcome, SyncError>
    where
        F: Fn(Option<&LeafValue>) -> Result<LeafValue, String> + Sync,
    {
        let old = self
            .ledger
            .confirmed_commitment(identity)
            .await?
            .ok_or_else(|| SyncError::UnknownIdentity(identity.clone()))?;
        let (mut tree, mut items) = self.load(identity, height, &old).await?;

        let witness = tree.get_witness(index)?;
        let old_value = items.get(&index).cloned();
        let new_value = next_value(old_value.as_ref()).map_err(SyncError::NextValue)?;
        tree.set_leaf(index, hash_leaf(&new_value))?;
        let local_root = tree.get_root();
        items.insert(index, new_value.clone());

        let (version, signature) = self
            .authority
            .store(identity, height, items.into_iter().collect())
            .await?;
        debug!("{} stored as version {} (local root {})", identity, version, local_root.short());

        let proof = UpdateProof {
            old,
            updates: vec![Update {
                old_leaf: old_value.clone().unwrap_or_default(),
                old_leaf_is_empty: old_value.is_none(),
                new_leaf: new_value.clone(),
                new_leaf_is_empty: false,
                witness,
            }],
            attestation: Attestation {
                root: local_root,
                version,
                signature,
            },
        };
        let new = self.ledger.submit_update(identity, proof).await?;
        info!("{} leaf {}: {} -> {}", identity, index, old, new);

        Ok(CycleOutcome {
            old,
            new,
            index,
            old_value,
            new_value,
        })
    }

    /// [`run_cycle`](Self::run_cycle) restarted from a fresh ledger read
    /// while the failure is retryable, with backoff from the retry config.
    pub async fn sync_with_retry<F>(
        &self,
        identity: &DatasetId,
        height: u8,
        index: LeafIndex,
        next_value: &F,
    ) -> Result<CycleOutcome, SyncError>
    where
        F: Fn(Option<&LeafValue>) -> Result<LeafValue, String> + Sync,
    {
        let result = retry_with_backoff(&self.retry, SyncError::is_retryable, || {
            self.run_cycle(identity, height, index, next_value)
        })
        .await;

        match result {
            RetryResult::Success { value, attempts } => {
                if attempts > 1 {
                    info!("{} committed after {} attempts", identity, attempts);
                }
                Ok(value)
            }
            RetryResult::Aborted { error, .. } => Err(error),
            RetryResult::Exhausted { last_error, attempts } => Err(SyncError::Exhausted {
                attempts,
                last: Box::new(last_error),
            }),
        }
    }
}

// ════════════════════════════════════════════════════════════════════════════
// UNIT TESTS
// ════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use ocs_chain::CommitmentLedger;
    use ocs_common::wire::WireItem;
    use ocs_common::{AttestationSignature, AuthorityPublicKey, Scalar, Version};
    use ocs_storage::{MemoryStateStore, StorageAuthority};
    use ocs_validator::{policy_by_name, ValidationError};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    const HEIGHT: u8 = 4;

    fn id(s: &str) -> DatasetId {
        DatasetId::new(s).expect("identity")
    }

    fn counter(v: u64) -> LeafValue {
        vec![Scalar::from_u64(v)]
    }

    fn fast_retry(max_attempts: u32) -> RetryConfig {
        RetryConfig {
            max_attempts,
            ..RetryConfig::no_retry()
        }
    }

    struct Fixture {
        authority: Arc<StorageAuthority>,
        ledger: Arc<CommitmentLedger>,
    }

    fn fixture(policy: &str) -> Fixture {
        let authority = Arc::new(
            StorageAuthority::open(Arc::new(MemoryStateStore::new()), 8).expect("open"),
        );
        let ledger = Arc::new(CommitmentLedger::new());
        ledger
            .deploy_with_policy(
                id("alpha"),
                HEIGHT,
                authority.default_public_key(),
                policy_by_name(policy).expect("policy"),
            )
            .expect("deploy");
        Fixture { authority, ledger }
    }

    impl Fixture {
        fn client(&self) -> SyncClient {
            SyncClient::new(self.authority.clone(), self.ledger.clone())
        }
    }

    /// Counts fetches so tests can see whether the empty-root shortcut ran.
    struct CountingAuthority {
        inner: Arc<StorageAuthority>,
        fetches: AtomicUsize,
    }

    #[async_trait]
    impl AuthorityApi for CountingAuthority {
        async fn fetch(&self, identity: &DatasetId, root: &Hash32) -> Result<Vec<WireItem>, ClientError> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            AuthorityApi::fetch(self.inner.as_ref(), identity, root).await
        }

        async fn store(
            &self,
            identity: &DatasetId,
            height: u8,
            items: Vec<WireItem>,
        ) -> Result<(Version, AttestationSignature), ClientError> {
            AuthorityApi::store(self.inner.as_ref(), identity, height, items).await
        }

        async fn public_key(&self, identity: &DatasetId) -> Result<AuthorityPublicKey, ClientError> {
            AuthorityApi::public_key(self.inner.as_ref(), identity).await
        }
    }

    /// Lets a second writer commit once, right before the first store.
    struct RacingAuthority {
        inner: Arc<StorageAuthority>,
        ledger: Arc<CommitmentLedger>,
        fired: AtomicBool,
    }

    #[async_trait]
    impl AuthorityApi for RacingAuthority {
        async fn fetch(&self, identity: &DatasetId, root: &Hash32) -> Result<Vec<WireItem>, ClientError> {
            AuthorityApi::fetch(self.inner.as_ref(), identity, root).await
        }

        async fn store(
            &self,
            identity: &DatasetId,
            height: u8,
            items: Vec<WireItem>,
        ) -> Result<(Version, AttestationSignature), ClientError> {
            if !self.fired.swap(true, Ordering::SeqCst) {
                let rival = SyncClient::new(self.inner.clone(), self.ledger.clone());
                rival
                    .run_cycle(identity, height, 2, &increment_leaf)
                    .await
                    .map_err(|e| ClientError::Transport(e.to_string()))?;
            }
            AuthorityApi::store(self.inner.as_ref(), identity, height, items).await
        }

        async fn public_key(&self, identity: &DatasetId) -> Result<AuthorityPublicKey, ClientError> {
            AuthorityApi::public_key(self.inner.as_ref(), identity).await
        }
    }

    #[test]
    fn test_client_starts_with_default_retry() {
        let fx = fixture("any");
        assert_eq!(fx.client().retry_config(), &RetryConfig::default());
    }

    // ── increment_leaf ───────────────────────────────────────────────────

    #[test]
    fn test_increment_leaf() {
        assert_eq!(increment_leaf(None), Ok(counter(1)));
        assert_eq!(increment_leaf(Some(&counter(41))), Ok(counter(42)));
        assert!(increment_leaf(Some(&Vec::new())).is_err());
        assert!(increment_leaf(Some(&vec![Scalar::ZERO, Scalar::ZERO])).is_err());
    }

    // ── cycles ───────────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_first_cycle_skips_fetch() {
        let fx = fixture("increment-by-one");
        let counting = Arc::new(CountingAuthority {
            inner: fx.authority.clone(),
            fetches: AtomicUsize::new(0),
        });
        let client = SyncClient::new(counting.clone(), fx.ledger.clone());

        let outcome = client
            .run_cycle(&id("alpha"), HEIGHT, 3, &increment_leaf)
            .await
            .expect("cycle");
        assert_eq!(counting.fetches.load(Ordering::SeqCst), 0);
        assert_eq!(outcome.old.version, 0);
        assert_eq!(outcome.new.version, 1);
        assert_eq!(outcome.old_value, None);
        assert_eq!(outcome.new_value, counter(1));

        let outcome = client
            .run_cycle(&id("alpha"), HEIGHT, 3, &increment_leaf)
            .await
            .expect("second cycle");
        assert_eq!(counting.fetches.load(Ordering::SeqCst), 1);
        assert_eq!(outcome.old_value, Some(counter(1)));
        assert_eq!(outcome.new_value, counter(2));
        assert_eq!(outcome.new.version, 2);
        assert_eq!(fx.ledger.read_commitment(&id("alpha")).expect("read"), outcome.new);
    }

    #[tokio::test]
    async fn test_cycle_keeps_other_leaves() {
        let fx = fixture("any");
        let client = fx.client();
        client.run_cycle(&id("alpha"), HEIGHT, 0, &increment_leaf).await.expect("leaf 0");
        let outcome = client
            .run_cycle(&id("alpha"), HEIGHT, 7, &|_: Option<&LeafValue>| Ok::<_, String>(counter(99)))
            .await
            .expect("leaf 7");

        let items = fx
            .authority
            .fetch(&id("alpha"), &outcome.new.root)
            .expect("snapshot");
        assert_eq!(items, vec![(0, counter(1)), (7, counter(99))]);
    }

    #[tokio::test]
    async fn test_unknown_identity() {
        let fx = fixture("any");
        let err = fx
            .client()
            .run_cycle(&id("ghost"), HEIGHT, 0, &increment_leaf)
            .await
            .expect_err("no account");
        assert!(matches!(err, SyncError::UnknownIdentity(_)));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_index_out_of_range_stores_nothing() {
        let fx = fixture("any");
        let err = fx
            .client()
            .run_cycle(&id("alpha"), HEIGHT, 8, &increment_leaf)
            .await
            .expect_err("capacity is 8");
        assert!(matches!(err, SyncError::Merkle(MerkleError::IndexOutOfRange { .. })));
        assert_eq!(fx.authority.next_version(&id("alpha")), 1);
    }

    #[tokio::test]
    async fn test_lost_race_is_stale_then_retried() {
        let fx = fixture("increment-by-one");
        let racing = || {
            Arc::new(RacingAuthority {
                inner: fx.authority.clone(),
                ledger: fx.ledger.clone(),
                fired: AtomicBool::new(false),
            })
        };

        let client = SyncClient::new(racing(), fx.ledger.clone());
        let err = client
            .run_cycle(&id("alpha"), HEIGHT, 2, &increment_leaf)
            .await
            .expect_err("rival committed first");
        assert!(matches!(err, SyncError::Ledger(LedgerError::StaleCommitment { .. })));
        assert!(err.is_retryable());

        // the rival moved leaf 2 to 1; the retry must read that and write 2
        let client = SyncClient::new(racing(), fx.ledger.clone()).with_retry(fast_retry(3));
        let outcome = client
            .sync_with_retry(&id("alpha"), HEIGHT, 2, &increment_leaf)
            .await
            .expect("retry commits");
        assert_eq!(outcome.old_value, Some(counter(2)));
        assert_eq!(outcome.new_value, counter(3));
        assert_eq!(fx.ledger.read_commitment(&id("alpha")).expect("read"), outcome.new);
    }

    #[tokio::test]
    async fn test_single_attempt_exhausts_on_race() {
        let fx = fixture("any");
        let racing = Arc::new(RacingAuthority {
            inner: fx.authority.clone(),
            ledger: fx.ledger.clone(),
            fired: AtomicBool::new(false),
        });
        let client = SyncClient::new(racing, fx.ledger.clone()).with_retry(fast_retry(1));
        assert_eq!(client.retry_config().max_attempts, 1);
        let err = client
            .sync_with_retry(&id("alpha"), HEIGHT, 5, &increment_leaf)
            .await
            .expect_err("no second attempt");
        match err {
            SyncError::Exhausted { attempts, last } => {
                assert_eq!(attempts, 1);
                assert!(matches!(*last, SyncError::Ledger(LedgerError::StaleCommitment { .. })));
            }
            other => panic!("expected Exhausted, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_policy_violation_is_not_retried() {
        let fx = fixture("increment-by-one");
        let client = fx.client().with_retry(fast_retry(5));
        let err = client
            .sync_with_retry(&id("alpha"), HEIGHT, 1, &|_: Option<&LeafValue>| Ok::<_, String>(counter(5)))
            .await
            .expect_err("policy");
        assert!(matches!(
            err,
            SyncError::Ledger(LedgerError::Rejected(ValidationError::PolicyViolation { index: 1, .. }))
        ));
        // one store happened, and only one
        assert_eq!(fx.authority.next_version(&id("alpha")), 2);
    }

    #[tokio::test]
    async fn test_next_value_error_stops_before_store() {
        let fx = fixture("any");
        let err = fx
            .client()
            .run_cycle(&id("alpha"), HEIGHT, 1, &|_: Option<&LeafValue>| Err::<LeafValue, _>("nope".to_string()))
            .await
            .expect_err("refused");
        assert!(matches!(err, SyncError::NextValue(_)));
        assert_eq!(fx.authority.next_version(&id("alpha")), 1);
    }
}
