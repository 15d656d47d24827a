//! Defines routes for the flat file store.
//!
//! ## Structure
//! - `POST   /upload`              — multipart upload (field `file`)
//! - `GET    /files`               — list stored files with download locators
//! - `GET    /download/{filename}` — stream one file as an attachment
//! - `DELETE /delete/{filename}`   — remove one file
//! - `GET    /healthz`, `/readyz`  — liveness and readiness probes
//!
//! `{filename}` is a single percent-decoded path segment; it is validated by
//! the storage layer before any filesystem access.

use crate::{
    handlers::{
        file_handlers::{delete_file, download_file, list_files, upload_file},
        health_handlers::{healthz, readyz},
    },
    services::storage_directory::StorageDirectory,
};
use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{delete, get, post},
};
use tower_http::trace::TraceLayer;

/// Build the router carrying `StorageDirectory` as shared state.
///
/// `max_upload_bytes` caps the request body accepted by `POST /upload`.
pub fn routes(max_upload_bytes: usize) -> Router<StorageDirectory> {
    Router::new()
        // health endpoints (mounted at root)
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route(
            "/upload",
            post(upload_file).layer(DefaultBodyLimit::max(max_upload_bytes)),
        )
        .route("/files", get(list_files))
        .route("/download/{filename}", get(download_file))
        .route("/delete/{filename}", delete(delete_file))
        .layer(TraceLayer::new_for_http())
}
