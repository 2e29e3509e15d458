//! End-to-end sync cycles over HTTP: a real authority server, a real
//! ledger RPC server, and the agent's HTTP clients in between.
//! Run with: cargo test -p ocs-agent --test sync_e2e

use std::sync::Arc;

use ocs_agent::{
    increment_leaf, AuthorityApi, RetryConfig, StorageClient, SyncClient, SyncError,
};
use ocs_chain::{rpc, CommitmentLedger, HttpLedgerClient};
use ocs_common::{DatasetId, LeafValue, Scalar};
use ocs_storage::{server, MemoryStateStore, SnapshotCollector, StorageAuthority};

// ============================================================
// HELPERS
// ============================================================

const HEIGHT: u8 = 5;

struct Stack {
    authority: Arc<StorageAuthority>,
    ledger: Arc<CommitmentLedger>,
    authority_url: String,
    ledger_url: String,
}

async fn serve(app: axum::Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("serve");
    });
    format!("http://{}", addr)
}

async fn spawn_stack() -> Stack {
    let authority = Arc::new(
        StorageAuthority::open(Arc::new(MemoryStateStore::new()), 8).expect("open"),
    );
    let ledger = Arc::new(CommitmentLedger::new());
    let authority_url = serve(server::router(authority.clone())).await;
    let ledger_url = serve(rpc::router(ledger.clone())).await;
    Stack {
        authority,
        ledger,
        authority_url,
        ledger_url,
    }
}

impl Stack {
    fn storage_client(&self) -> StorageClient {
        StorageClient::new(&self.authority_url).expect("storage client")
    }

    fn ledger_client(&self) -> HttpLedgerClient {
        HttpLedgerClient::new(&self.ledger_url).expect("ledger client")
    }

    fn sync_client(&self, retry: RetryConfig) -> SyncClient {
        SyncClient::new(Arc::new(self.storage_client()), Arc::new(self.ledger_client()))
            .with_retry(retry)
    }

    async fn deploy(&self, identity: &DatasetId, policy: &str) {
        let key = self
            .storage_client()
            .public_key(identity)
            .await
            .expect("public key");
        self.ledger_client()
            .deploy(identity, HEIGHT, key, Some(policy))
            .await
            .expect("deploy");
    }
}

fn id(s: &str) -> DatasetId {
    DatasetId::new(s).expect("identity")
}

fn counter(v: u64) -> LeafValue {
    vec![Scalar::from_u64(v)]
}

fn quick_retry(max_attempts: u32) -> RetryConfig {
    RetryConfig {
        max_attempts,
        initial_delay_ms: 5,
        max_delay_ms: 50,
        backoff_multiplier: 2.0,
        jitter: true,
    }
}

// ============================================================
// TESTS
// ============================================================

#[tokio::test]
async fn test_http_cycles_commit_counter() {
    let stack = spawn_stack().await;
    let identity = id("alpha");
    stack.deploy(&identity, "increment-by-one").await;

    let client = stack.sync_client(quick_retry(3));
    for expected in 1..=3u64 {
        let outcome = client
            .sync_with_retry(&identity, HEIGHT, 4, &increment_leaf)
            .await
            .expect("cycle");
        assert_eq!(outcome.new_value, counter(expected));
        assert_eq!(outcome.new.version, expected);
    }

    let confirmed = stack.ledger_client().read_commitment(&identity).await.expect("status");
    assert_eq!(confirmed.version, 3);
    let items = stack
        .storage_client()
        .fetch(&identity, &confirmed.root)
        .await
        .expect("fetch");
    assert_eq!(items, vec![(4, counter(3))]);
}

#[tokio::test]
async fn test_concurrent_writers_converge() {
    let stack = Arc::new(spawn_stack().await);
    let identity = id("contended");
    stack.deploy(&identity, "increment-by-one").await;

    let writers = 3;
    let per_writer = 4u64;
    let handles: Vec<_> = (0..writers)
        .map(|_| {
            let client = stack.sync_client(quick_retry(40));
            let identity = identity.clone();
            tokio::spawn(async move {
                for _ in 0..per_writer {
                    client
                        .sync_with_retry(&identity, HEIGHT, 0, &increment_leaf)
                        .await
                        .expect("writer commits eventually");
                }
            })
        })
        .collect();
    for h in handles {
        h.await.expect("join");
    }

    let confirmed = stack.ledger.read_commitment(&identity).expect("read");
    let total = writers * per_writer;
    // every lost race still consumed an authority version
    assert!(confirmed.version >= total);
    let items = stack.authority.fetch(&identity, &confirmed.root).expect("snapshot");
    assert_eq!(items, vec![(0, counter(total))]);
}

#[tokio::test]
async fn test_policy_rejection_surfaces_over_http() {
    let stack = spawn_stack().await;
    let identity = id("strict");
    stack.deploy(&identity, "increment-by-one").await;

    let jump = |_: Option<&LeafValue>| Ok::<_, String>(counter(10));
    let err = stack
        .sync_client(RetryConfig::no_retry())
        .sync_with_retry(&identity, HEIGHT, 2, &jump)
        .await
        .expect_err("policy rejects a jump");
    assert!(err.to_string().contains("policy"), "{}", err);
    assert_eq!(stack.ledger.read_commitment(&identity).expect("read").version, 0);
}

#[tokio::test]
async fn test_remote_policy_rejection_is_not_retried() {
    let stack = spawn_stack().await;
    let identity = id("strict");
    stack.deploy(&identity, "increment-by-one").await;

    let jump = |_: Option<&LeafValue>| Ok::<_, String>(counter(10));
    let client = stack.sync_client(quick_retry(5));
    let err = client
        .sync_with_retry(&identity, HEIGHT, 2, &jump)
        .await
        .expect_err("policy rejects a jump");
    assert!(!matches!(err, SyncError::Exhausted { .. }), "{}", err);
    assert!(!err.is_retryable());
    assert!(err.to_string().contains("PolicyViolation"), "{}", err);
    // a single store: the version after it is the only one consumed
    assert_eq!(stack.authority.next_version(&identity), 2);
    assert_eq!(stack.ledger.read_commitment(&identity).expect("read").version, 0);
}

#[tokio::test]
async fn test_unknown_identity_is_not_retried() {
    let stack = spawn_stack().await;
    let err = stack
        .sync_client(quick_retry(5))
        .sync_with_retry(&id("ghost"), HEIGHT, 0, &increment_leaf)
        .await
        .expect_err("not deployed");
    assert!(matches!(err, SyncError::UnknownIdentity(_)));
}

#[tokio::test]
async fn test_gc_keeps_confirmed_snapshot_for_next_cycle() {
    let stack = spawn_stack().await;
    let identity = id("alpha");
    stack.deploy(&identity, "any").await;

    let client = stack.sync_client(quick_retry(3));
    for _ in 0..3 {
        client
            .sync_with_retry(&identity, HEIGHT, 1, &increment_leaf)
            .await
            .expect("cycle");
    }
    assert_eq!(stack.authority.snapshot_count(&identity), 3);

    let collector = SnapshotCollector::new(stack.authority.clone(), Arc::new(stack.ledger_client()));
    let (_, removed) = collector.run().await.expect("sweep");
    assert_eq!(removed, 2);
    assert_eq!(stack.authority.snapshot_count(&identity), 1);

    let outcome = client
        .sync_with_retry(&identity, HEIGHT, 1, &increment_leaf)
        .await
        .expect("cycle after gc");
    assert_eq!(outcome.old_value, Some(counter(3)));
    assert_eq!(outcome.new_value, counter(4));
}
