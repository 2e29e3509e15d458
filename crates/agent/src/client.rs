//! Access to a storage authority.
//!
//! [`AuthorityApi`] is the seam the sync cycle talks through. It is
//! implemented over HTTP by [`StorageClient`] and in-process by
//! [`StorageAuthority`] itself.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use thiserror::Error;
use tracing::debug;

use ocs_common::wire::{
    ErrorBody, FetchResponse, PublicKeyResponse, StoreRequest, StoreResponse, WireItem,
    ERR_UNKNOWN_ROOT,
};
use ocs_common::{AttestationSignature, AuthorityPublicKey, DatasetId, Hash32, Version};
use ocs_storage::{AuthorityError, StorageAuthority};

// ════════════════════════════════════════════════════════════════════════════
// ERROR
// ════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Error)]
pub enum ClientError {
    /// The authority answered with a structured error body.
    #[error("authority rejected request ({code}): {message}")]
    Api {
        status: u16,
        code: String,
        message: String,
    },

    #[error("authority transport error: {0}")]
    Transport(String),

    #[error("unexpected authority response: {0}")]
    Decode(String),
}

impl ClientError {
    /// The requested snapshot is not held by the authority, typically
    /// because GC removed it after another writer moved the ledger on.
    pub fn is_unknown_root(&self) -> bool {
        matches!(self, ClientError::Api { code, .. } if code == ERR_UNKNOWN_ROOT)
    }

    pub fn is_transport(&self) -> bool {
        matches!(self, ClientError::Transport(_))
    }
}

impl From<AuthorityError> for ClientError {
    fn from(e: AuthorityError) -> Self {
        let status = match e {
            AuthorityError::HeightMismatch { .. } => 409,
            AuthorityError::UnknownRoot { .. } => 404,
            AuthorityError::Persistence(_) => 500,
            _ => 400,
        };
        ClientError::Api {
            status,
            code: e.code().to_string(),
            message: e.to_string(),
        }
    }
}

// ════════════════════════════════════════════════════════════════════════════
// SEAM
// ════════════════════════════════════════════════════════════════════════════

#[async_trait]
pub trait AuthorityApi: Send + Sync {
    async fn fetch(&self, identity: &DatasetId, root: &Hash32) -> Result<Vec<WireItem>, ClientError>;

    async fn store(
        &self,
        identity: &DatasetId,
        height: u8,
        items: Vec<WireItem>,
    ) -> Result<(Version, AttestationSignature), ClientError>;

    async fn public_key(&self, identity: &DatasetId) -> Result<AuthorityPublicKey, ClientError>;
}

#[async_trait]
impl AuthorityApi for StorageAuthority {
    async fn fetch(&self, identity: &DatasetId, root: &Hash32) -> Result<Vec<WireItem>, ClientError> {
        Ok(StorageAuthority::fetch(self, identity, root)?)
    }

    async fn store(
        &self,
        identity: &DatasetId,
        height: u8,
        items: Vec<WireItem>,
    ) -> Result<(Version, AttestationSignature), ClientError> {
        Ok(StorageAuthority::store(self, identity, height, items)?)
    }

    async fn public_key(&self, identity: &DatasetId) -> Result<AuthorityPublicKey, ClientError> {
        Ok(StorageAuthority::public_key(self, identity))
    }
}

// ════════════════════════════════════════════════════════════════════════════
// HTTP CLIENT
// ════════════════════════════════════════════════════════════════════════════

#[derive(Clone, Debug)]
pub struct StorageClient {
    base: String,
    client: Client,
}

impl StorageClient {
    pub fn new(base: impl Into<String>) -> Result<Self, ClientError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(transport)?;
        Ok(StorageClient {
            base: base.into().trim_end_matches('/').to_string(),
            client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base
    }
}

fn transport(e: reqwest::Error) -> ClientError {
    ClientError::Transport(e.to_string())
}

/// Decodes a success body as `T`, or maps the error body onto
/// [`ClientError::Api`].
async fn decode<T: serde::de::DeserializeOwned>(resp: reqwest::Response) -> Result<T, ClientError> {
    let status = resp.status();
    let text = resp.text().await.map_err(transport)?;
    if status.is_success() {
        return serde_json::from_str(&text).map_err(|e| ClientError::Decode(e.to_string()));
    }
    match serde_json::from_str::<ErrorBody>(&text) {
        Ok(body) => Err(ClientError::Api {
            status: status.as_u16(),
            code: body.error.code,
            message: body.error.message,
        }),
        Err(_) => Err(ClientError::Decode(format!("{} {}", status, text))),
    }
}

#[async_trait]
impl AuthorityApi for StorageClient {
    async fn fetch(&self, identity: &DatasetId, root: &Hash32) -> Result<Vec<WireItem>, ClientError> {
        let url = format!("{}/data", self.base);
        let resp = self
            .client
            .get(&url)
            .query(&[("identity", identity.as_str()), ("root", root.to_hex().as_str())])
            .send()
            .await
            .map_err(transport)?;
        let body: FetchResponse = decode(resp).await?;
        debug!("fetched {} items for {} at {}", body.items.len(), identity, root.short());
        Ok(body.items)
    }

    async fn store(
        &self,
        identity: &DatasetId,
        height: u8,
        items: Vec<WireItem>,
    ) -> Result<(Version, AttestationSignature), ClientError> {
        let url = format!("{}/data", self.base);
        let body = StoreRequest {
            identity: identity.clone(),
            height,
            items,
        };
        let resp = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(transport)?;
        let stored: StoreResponse = decode(resp).await?;
        Ok((stored.version, stored.signature))
    }

    async fn public_key(&self, identity: &DatasetId) -> Result<AuthorityPublicKey, ClientError> {
        let url = format!("{}/publicKey", self.base);
        let resp = self
            .client
            .get(&url)
            .query(&[("identity", identity.as_str())])
            .send()
            .await
            .map_err(transport)?;
        let body: PublicKeyResponse = decode(resp).await?;
        Ok(body.public_key)
    }
}
