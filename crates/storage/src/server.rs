//! HTTP surface of the storage authority.
//!
//! | Endpoint | Method | Body / Query | Response |
//! |----------|--------|--------------|----------|
//! | `/data` | POST | `StoreRequest` | `StoreResponse` |
//! | `/data` | GET | `FetchQuery` | `FetchResponse` |
//! | `/publicKey`, `/public_key` | GET | `?identity` (optional) | `PublicKeyResponse` |
//! | `/health` | GET | - | `{status, identities}` |

use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, rejection::QueryRejection, Query, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, warn};

use ocs_common::wire::{
    ErrorBody, FetchQuery, FetchResponse, PublicKeyResponse, StoreRequest, StoreResponse,
    ERR_BAD_REQUEST, ERR_INTERNAL,
};
use ocs_common::DatasetId;

use crate::authority::{AuthorityError, StorageAuthority};

fn status_for(err: &AuthorityError) -> StatusCode {
    match err {
        AuthorityError::HeightMismatch { .. } => StatusCode::CONFLICT,
        AuthorityError::UnknownRoot { .. } => StatusCode::NOT_FOUND,
        AuthorityError::HeightOutOfRange { .. }
        | AuthorityError::TooManyItems { .. }
        | AuthorityError::IndexOutOfRange { .. }
        | AuthorityError::DuplicateIndex(_) => StatusCode::BAD_REQUEST,
        AuthorityError::Persistence(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_response(err: &AuthorityError) -> (StatusCode, Json<Value>) {
    (status_for(err), Json(json!(ErrorBody::new(err.code(), err.to_string()))))
}

fn bad_request(message: String) -> (StatusCode, Json<Value>) {
    (
        StatusCode::BAD_REQUEST,
        Json(json!(ErrorBody::new(ERR_BAD_REQUEST, message))),
    )
}

async fn store_data(
    State(authority): State<Arc<StorageAuthority>>,
    payload: Result<Json<StoreRequest>, JsonRejection>,
) -> (StatusCode, Json<Value>) {
    let Json(req) = match payload {
        Ok(p) => p,
        Err(e) => return bad_request(e.body_text()),
    };
    let identity = req.identity.clone();

    // hashing and fsync stay off the async workers
    let task = tokio::task::spawn_blocking(move || {
        authority.store(&req.identity, req.height, req.items)
    });
    match task.await {
        Ok(Ok((version, signature))) => {
            (StatusCode::OK, Json(json!(StoreResponse { version, signature })))
        }
        Ok(Err(e)) => {
            warn!("store for {} rejected: {}", identity, e);
            error_response(&e)
        }
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!(ErrorBody::new(ERR_INTERNAL, e.to_string()))),
        ),
    }
}

async fn fetch_data(
    State(authority): State<Arc<StorageAuthority>>,
    query: Result<Query<FetchQuery>, QueryRejection>,
) -> (StatusCode, Json<Value>) {
    let Query(q) = match query {
        Ok(q) => q,
        Err(e) => return bad_request(e.body_text()),
    };
    match authority.fetch(&q.identity, &q.root) {
        Ok(items) => {
            debug!("fetch {} root {}: {} items", q.identity, q.root.short(), items.len());
            (StatusCode::OK, Json(json!(FetchResponse { items })))
        }
        Err(e) => error_response(&e),
    }
}

#[derive(Debug, Deserialize)]
struct PublicKeyQuery {
    identity: Option<DatasetId>,
}

async fn public_key(
    State(authority): State<Arc<StorageAuthority>>,
    query: Result<Query<PublicKeyQuery>, QueryRejection>,
) -> (StatusCode, Json<Value>) {
    let Query(q) = match query {
        Ok(q) => q,
        Err(e) => return bad_request(e.body_text()),
    };
    let public_key = match q.identity {
        Some(identity) => authority.public_key(&identity),
        None => authority.default_public_key(),
    };
    (StatusCode::OK, Json(json!(PublicKeyResponse { public_key })))
}

async fn health(State(authority): State<Arc<StorageAuthority>>) -> Json<Value> {
    Json(json!({ "status": "ok", "identities": authority.identity_count() }))
}

pub fn router(authority: Arc<StorageAuthority>) -> Router {
    Router::new()
        .route("/data", get(fetch_data).post(store_data))
        .route("/publicKey", get(public_key))
        .route("/public_key", get(public_key))
        .route("/health", get(health))
        .with_state(authority)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::PersistenceError;
    use ocs_common::wire::{ERR_HEIGHT_MISMATCH, ERR_UNKNOWN_ROOT};
    use ocs_common::Hash32;

    #[test]
    fn test_status_mapping() {
        let id = DatasetId::new("alpha").expect("id");
        let cases = [
            (
                AuthorityError::HeightMismatch { identity: id.clone(), expected: 4, found: 5 },
                StatusCode::CONFLICT,
            ),
            (
                AuthorityError::UnknownRoot { identity: id, root: Hash32::default() },
                StatusCode::NOT_FOUND,
            ),
            (AuthorityError::DuplicateIndex(1), StatusCode::BAD_REQUEST),
            (AuthorityError::HeightOutOfRange { height: 9, max: 8 }, StatusCode::BAD_REQUEST),
            (
                AuthorityError::Persistence(PersistenceError::Unavailable("disk".into())),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (err, status) in cases {
            assert_eq!(status_for(&err), status, "{}", err);
        }
    }

    #[test]
    fn test_error_body_shape() {
        let id = DatasetId::new("alpha").expect("id");
        let (_, Json(body)) = error_response(&AuthorityError::HeightMismatch {
            identity: id.clone(),
            expected: 4,
            found: 5,
        });
        assert_eq!(body["error"]["code"], ERR_HEIGHT_MISMATCH);
        let (_, Json(body)) = error_response(&AuthorityError::UnknownRoot {
            identity: id,
            root: Hash32::default(),
        });
        assert_eq!(body["error"]["code"], ERR_UNKNOWN_ROOT);
        assert!(body["error"]["message"].as_str().unwrap_or("").contains("alpha"));
    }
}
