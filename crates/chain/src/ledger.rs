//! In-memory commitment ledger.
//!
//! One account per dataset identity. Each account owns its validator
//! (authority key, height, leaf policy fixed at deploy time) and the
//! confirmed record. Writes for one identity are serialised by the
//! account's mutex; different identities do not contend beyond the map
//! lookup.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use tracing::{info, warn};

use ocs_common::merkle::empty_root;
use ocs_common::{
    AuthorityPublicKey, CommitmentRecord, DatasetId, LedgerQueryError, LedgerReader, UpdateProof,
};
use ocs_validator::{AnyTransition, LeafPolicy, UpdateValidator};

use crate::{LedgerError, LedgerWriter};

struct LedgerAccount {
    validator: UpdateValidator,
    record: CommitmentRecord,
}

/// Account metadata as reported by [`CommitmentLedger::account_info`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountInfo {
    pub record: CommitmentRecord,
    pub height: u8,
    pub authority: AuthorityPublicKey,
    pub policy: &'static str,
}

#[derive(Default)]
pub struct CommitmentLedger {
    accounts: RwLock<HashMap<DatasetId, Arc<Mutex<LedgerAccount>>>>,
}

impl CommitmentLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates the account with genesis record `(empty_root(height), 0)`
    /// and a permissive leaf policy.
    pub fn deploy(
        &self,
        identity: DatasetId,
        height: u8,
        authority: AuthorityPublicKey,
    ) -> Result<CommitmentRecord, LedgerError> {
        self.deploy_with_policy(identity, height, authority, Box::new(AnyTransition))
    }

    pub fn deploy_with_policy(
        &self,
        identity: DatasetId,
        height: u8,
        authority: AuthorityPublicKey,
        policy: Box<dyn LeafPolicy>,
    ) -> Result<CommitmentRecord, LedgerError> {
        let genesis = CommitmentRecord::new(empty_root(height)?, 0);
        let policy_name = policy.name();

        let mut accounts = self.accounts.write();
        if accounts.contains_key(&identity) {
            return Err(LedgerError::AlreadyDeployed(identity));
        }
        accounts.insert(
            identity.clone(),
            Arc::new(Mutex::new(LedgerAccount {
                validator: UpdateValidator::new(authority, height, policy),
                record: genesis,
            })),
        );
        info!(
            "deployed account {} (height {}, policy {}, genesis {})",
            identity, height, policy_name, genesis
        );
        Ok(genesis)
    }

    fn account(&self, identity: &DatasetId) -> Result<Arc<Mutex<LedgerAccount>>, LedgerError> {
        self.accounts
            .read()
            .get(identity)
            .cloned()
            .ok_or_else(|| LedgerError::UnknownIdentity(identity.clone()))
    }

    pub fn read_commitment(&self, identity: &DatasetId) -> Result<CommitmentRecord, LedgerError> {
        Ok(self.account(identity)?.lock().record)
    }

    pub fn account_info(&self, identity: &DatasetId) -> Result<AccountInfo, LedgerError> {
        let account = self.account(identity)?;
        let account = account.lock();
        Ok(AccountInfo {
            record: account.record,
            height: account.validator.height(),
            authority: *account.validator.authority(),
            policy: account.validator.policy_name(),
        })
    }

    /// Applies `proof` if it was built against the current record and
    /// passes validation. The record is replaced only on success.
    pub fn write_commitment(
        &self,
        identity: &DatasetId,
        proof: UpdateProof,
    ) -> Result<CommitmentRecord, LedgerError> {
        let account = self.account(identity)?;
        let mut account = account.lock();

        if proof.old != account.record {
            warn!(
                "stale proof for {}: built on {}, ledger at {}",
                identity, proof.old, account.record
            );
            return Err(LedgerError::StaleCommitment {
                current: account.record,
                claimed: proof.old,
            });
        }

        let next = account
            .validator
            .validate(&account.record, &proof.updates, proof.attestation)?;
        info!(
            "account {} advanced {} -> {} ({} updates)",
            identity,
            account.record,
            next,
            proof.updates.len()
        );
        account.record = next;
        Ok(next)
    }

    pub fn account_count(&self) -> usize {
        self.accounts.read().len()
    }
}

#[async_trait]
impl LedgerReader for CommitmentLedger {
    async fn confirmed_commitment(
        &self,
        identity: &DatasetId,
    ) -> Result<Option<CommitmentRecord>, LedgerQueryError> {
        match self.read_commitment(identity) {
            Ok(record) => Ok(Some(record)),
            Err(LedgerError::UnknownIdentity(_)) => Ok(None),
            Err(e) => Err(LedgerQueryError::Unavailable(e.to_string())),
        }
    }
}

#[async_trait]
impl LedgerWriter for CommitmentLedger {
    async fn submit_update(
        &self,
        identity: &DatasetId,
        proof: UpdateProof,
    ) -> Result<CommitmentRecord, LedgerError> {
        self.write_commitment(identity, proof)
    }
}
