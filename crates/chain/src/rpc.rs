//! HTTP surface of the reference ledger.
//!
//! | Endpoint | Method | Body | Response |
//! |----------|--------|------|----------|
//! | `/deploy` | POST | [`DeployReq`] | [`CommitmentRecord`] |
//! | `/commitment/:identity` | GET | - | [`CommitmentRecord`] |
//! | `/update/:identity` | POST | [`UpdateProof`] | [`CommitmentRecord`] |
//! | `/health` | GET | - | `{status, accounts}` |
//!
//! Errors use the `{ "error": { code, message } }` body; a stale proof also
//! carries the ledger's `current` record. A rejected transition uses the
//! validator's verdict name (`PolicyViolation`, `StaleOrForgedWitness`, ...)
//! as its code.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::warn;

use ocs_common::wire::ErrorDetail;
use ocs_common::{AuthorityPublicKey, CommitmentRecord, DatasetId, UpdateProof};
use ocs_validator::policy_by_name;

use crate::{CommitmentLedger, LedgerError};

pub const ERR_UNKNOWN_IDENTITY: &str = "UnknownIdentity";
pub const ERR_ALREADY_DEPLOYED: &str = "AlreadyDeployed";
pub const ERR_INVALID_HEIGHT: &str = "InvalidHeight";
pub const ERR_STALE_COMMITMENT: &str = "StaleCommitment";
pub const ERR_BAD_REQUEST: &str = "BadRequest";

/// Request body for creating a ledger account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeployReq {
    pub identity: DatasetId,
    pub height: u8,
    #[serde(rename = "authorityKey")]
    pub authority_key: AuthorityPublicKey,
    /// Leaf policy name; `"any"` when omitted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerErrorBody {
    pub error: ErrorDetail,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current: Option<CommitmentRecord>,
}

fn error_response(err: &LedgerError) -> (StatusCode, Json<Value>) {
    let (status, code, current) = match err {
        LedgerError::UnknownIdentity(_) => (StatusCode::NOT_FOUND, ERR_UNKNOWN_IDENTITY, None),
        LedgerError::AlreadyDeployed(_) => (StatusCode::CONFLICT, ERR_ALREADY_DEPLOYED, None),
        LedgerError::InvalidHeight(_) => (StatusCode::BAD_REQUEST, ERR_INVALID_HEIGHT, None),
        LedgerError::StaleCommitment { current, .. } => {
            (StatusCode::CONFLICT, ERR_STALE_COMMITMENT, Some(*current))
        }
        // the verdict name is the code
        LedgerError::Rejected(v) => (StatusCode::UNPROCESSABLE_ENTITY, v.code(), None),
        LedgerError::RemoteRejected { code, .. } => {
            (StatusCode::UNPROCESSABLE_ENTITY, code.as_str(), None)
        }
        LedgerError::Transport(_) => (StatusCode::BAD_GATEWAY, "Transport", None),
    };
    let body = LedgerErrorBody {
        error: ErrorDetail {
            code: code.to_string(),
            message: err.to_string(),
        },
        current,
    };
    (status, Json(json!(body)))
}

async fn deploy(
    State(ledger): State<Arc<CommitmentLedger>>,
    Json(req): Json<DeployReq>,
) -> (StatusCode, Json<Value>) {
    let policy_name = req.policy.as_deref().unwrap_or("any");
    let Some(policy) = policy_by_name(policy_name) else {
        let body = ErrorDetail {
            code: ERR_BAD_REQUEST.to_string(),
            message: format!("unknown leaf policy: {}", policy_name),
        };
        return (StatusCode::BAD_REQUEST, Json(json!({ "error": body })));
    };
    match ledger.deploy_with_policy(req.identity, req.height, req.authority_key, policy) {
        Ok(record) => (StatusCode::OK, Json(json!(record))),
        Err(e) => error_response(&e),
    }
}

async fn get_commitment(
    Path(identity): Path<DatasetId>,
    State(ledger): State<Arc<CommitmentLedger>>,
) -> (StatusCode, Json<Value>) {
    match ledger.read_commitment(&identity) {
        Ok(record) => (StatusCode::OK, Json(json!(record))),
        Err(e) => error_response(&e),
    }
}

async fn post_update(
    Path(identity): Path<DatasetId>,
    State(ledger): State<Arc<CommitmentLedger>>,
    Json(proof): Json<UpdateProof>,
) -> (StatusCode, Json<Value>) {
    match ledger.write_commitment(&identity, proof) {
        Ok(record) => (StatusCode::OK, Json(json!(record))),
        Err(e) => {
            warn!("update for {} rejected: {}", identity, e);
            error_response(&e)
        }
    }
}

async fn health(State(ledger): State<Arc<CommitmentLedger>>) -> Json<Value> {
    Json(json!({ "status": "ok", "accounts": ledger.account_count() }))
}

pub fn router(ledger: Arc<CommitmentLedger>) -> Router {
    Router::new()
        .route("/deploy", post(deploy))
        .route("/commitment/:identity", get(get_commitment))
        .route("/update/:identity", post(post_update))
        .route("/health", get(health))
        .with_state(ledger)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ocs_common::{AuthorityKeypair, Hash32};
    use ocs_validator::ValidationError;

    #[test]
    fn test_stale_error_carries_current() {
        let current = CommitmentRecord::new(Hash32::new([1u8; 32]), 3);
        let err = LedgerError::StaleCommitment {
            current,
            claimed: CommitmentRecord::new(Hash32::new([2u8; 32]), 2),
        };
        let (status, Json(body)) = error_response(&err);
        assert_eq!(status, StatusCode::CONFLICT);
        let parsed: LedgerErrorBody = serde_json::from_value(body).expect("body");
        assert_eq!(parsed.error.code, ERR_STALE_COMMITMENT);
        assert_eq!(parsed.current, Some(current));
    }

    #[test]
    fn test_rejection_status() {
        let (status, Json(body)) = error_response(&LedgerError::Rejected(ValidationError::BadSignature));
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["error"]["code"], "BadSignature");
        assert!(body.get("current").is_none());

        let violation = ValidationError::PolicyViolation {
            position: 0,
            index: 2,
            reason: "counter must grow by one".into(),
        };
        let (status, Json(body)) = error_response(&LedgerError::Rejected(violation));
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["error"]["code"], "PolicyViolation");

        let relayed = LedgerError::RemoteRejected {
            code: "NonIncreasingVersion".into(),
            message: "version 2 is not greater than current version 2".into(),
        };
        let (_, Json(body)) = error_response(&relayed);
        assert_eq!(body["error"]["code"], "NonIncreasingVersion");
    }

    #[test]
    fn test_deploy_req_field_names() {
        let pk = AuthorityKeypair::generate().public_key();
        let req = DeployReq {
            identity: DatasetId::new("abc").expect("id"),
            height: 4,
            authority_key: pk,
            policy: None,
        };
        let v = serde_json::to_value(&req).expect("serialize");
        assert_eq!(v["authorityKey"], pk.to_base58());
        assert!(v.get("policy").is_none());
    }
}
