//! Health & readiness handlers.
//!
//! - GET /healthz  -> simple liveness ("ok")
//! - GET /readyz   -> readiness that checks the storage root is listable and writable

use crate::services::storage_directory::{StorageDirectory, StorageResult};
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use std::collections::HashMap;
use tracing::warn;

/// `GET /healthz`
///
/// Liveness probe; never performs I/O.
pub async fn healthz() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "ok".into(),
        }),
    )
}

/// `GET /readyz`
///
/// Ready when the storage root can be listed and a scratch file can be
/// written, read back and removed in the staging area. HTTP 503 otherwise.
pub async fn readyz(State(storage): State<StorageDirectory>) -> impl IntoResponse {
    let mut checks = HashMap::new();
    checks.insert("listing", CheckStatus::from(storage.list().await.map(drop)));
    checks.insert("disk", CheckStatus::from(storage.check_writable().await));

    let overall_ok = checks.values().all(|check| check.ok);
    let body = ReadyResponse {
        status: if overall_ok { "ok".into() } else { "error".into() },
        checks,
    };

    let status = if overall_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(body))
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
}

#[derive(Serialize)]
struct ReadyResponse {
    status: String,
    checks: HashMap<&'static str, CheckStatus>,
}

#[derive(Serialize)]
struct CheckStatus {
    ok: bool,
    error: Option<String>,
}

impl From<StorageResult<()>> for CheckStatus {
    fn from(result: StorageResult<()>) -> Self {
        match result {
            Ok(()) => Self { ok: true, error: None },
            Err(err) => {
                warn!("readiness check failed: {}", err);
                Self {
                    ok: false,
                    error: Some(err.to_string()),
                }
            }
        }
    }
}
