//! reqwest client for the ledger RPC in [`crate::rpc`].

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};

use ocs_common::{
    AuthorityPublicKey, CommitmentRecord, DatasetId, LedgerQueryError, LedgerReader, UpdateProof,
};

use crate::rpc::{
    DeployReq, LedgerErrorBody, ERR_ALREADY_DEPLOYED, ERR_STALE_COMMITMENT, ERR_UNKNOWN_IDENTITY,
};
use crate::{LedgerError, LedgerWriter};

#[derive(Clone, Debug)]
pub struct HttpLedgerClient {
    base: String,
    client: Client,
}

impl HttpLedgerClient {
    pub fn new(base: impl Into<String>) -> Result<Self, LedgerError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| LedgerError::Transport(e.to_string()))?;
        Ok(HttpLedgerClient {
            base: base.into().trim_end_matches('/').to_string(),
            client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base
    }

    pub async fn deploy(
        &self,
        identity: &DatasetId,
        height: u8,
        authority_key: AuthorityPublicKey,
        policy: Option<&str>,
    ) -> Result<CommitmentRecord, LedgerError> {
        let url = format!("{}/deploy", self.base);
        let body = DeployReq {
            identity: identity.clone(),
            height,
            authority_key,
            policy: policy.map(str::to_string),
        };
        let resp = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(transport)?;
        decode_record(resp, identity).await
    }

    pub async fn read_commitment(&self, identity: &DatasetId) -> Result<CommitmentRecord, LedgerError> {
        let url = format!("{}/commitment/{}", self.base, identity);
        let resp = self.client.get(&url).send().await.map_err(transport)?;
        decode_record(resp, identity).await
    }
}

fn transport(e: reqwest::Error) -> LedgerError {
    LedgerError::Transport(e.to_string())
}

/// Maps a ledger RPC response back onto [`LedgerError`].
async fn decode_record(
    resp: reqwest::Response,
    identity: &DatasetId,
) -> Result<CommitmentRecord, LedgerError> {
    let status = resp.status();
    if status.is_success() {
        return resp.json::<CommitmentRecord>().await.map_err(transport);
    }

    let text = resp.text().await.unwrap_or_default();
    let Ok(body) = serde_json::from_str::<LedgerErrorBody>(&text) else {
        return Err(LedgerError::Transport(format!("ledger returned {} {}", status, text)));
    };
    let code = body.error.code.as_str();
    match (status, code) {
        (StatusCode::NOT_FOUND, ERR_UNKNOWN_IDENTITY) => {
            Err(LedgerError::UnknownIdentity(identity.clone()))
        }
        (_, ERR_ALREADY_DEPLOYED) => Err(LedgerError::AlreadyDeployed(identity.clone())),
        (_, ERR_STALE_COMMITMENT) => match body.current {
            Some(current) => Err(LedgerError::StaleCommitment {
                current,
                // the claimed record is the caller's own and not echoed back
                claimed: current,
            }),
            None => Err(LedgerError::RemoteRejected {
                code: body.error.code,
                message: body.error.message,
            }),
        },
        _ => Err(LedgerError::RemoteRejected {
            code: body.error.code,
            message: body.error.message,
        }),
    }
}

#[async_trait]
impl LedgerReader for HttpLedgerClient {
    async fn confirmed_commitment(
        &self,
        identity: &DatasetId,
    ) -> Result<Option<CommitmentRecord>, LedgerQueryError> {
        match self.read_commitment(identity).await {
            Ok(record) => Ok(Some(record)),
            Err(LedgerError::UnknownIdentity(_)) => Ok(None),
            Err(LedgerError::Transport(msg)) => Err(LedgerQueryError::Unavailable(msg)),
            Err(e) => Err(LedgerQueryError::Malformed(e.to_string())),
        }
    }
}

#[async_trait]
impl LedgerWriter for HttpLedgerClient {
    async fn submit_update(
        &self,
        identity: &DatasetId,
        proof: UpdateProof,
    ) -> Result<CommitmentRecord, LedgerError> {
        let claimed = proof.old;
        let url = format!("{}/update/{}", self.base, identity);
        let resp = self
            .client
            .post(&url)
            .json(&proof)
            .send()
            .await
            .map_err(transport)?;
        match decode_record(resp, identity).await {
            Err(LedgerError::StaleCommitment { current, .. }) => {
                Err(LedgerError::StaleCommitment { current, claimed })
            }
            other => other,
        }
    }
}
