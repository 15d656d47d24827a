//! HTTP handlers for upload, listing, download and deletion.
//! Request and response bodies are streamed; every filesystem concern is
//! delegated to `StorageDirectory`.

use crate::{
    errors::AppError,
    models::{file_entry::FileEntry, stored_object::StoredObject},
    services::storage_directory::{StorageDirectory, StorageError},
};
use axum::{
    Json,
    body::Body,
    extract::{Multipart, Path, State, multipart::MultipartRejection},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::Response,
};
use futures::StreamExt;
use serde::Serialize;
use std::io;
use tokio_util::io::ReaderStream;
use tracing::{error, info};

/// Multipart field carrying the uploaded file.
pub const FILE_FIELD: &str = "file";

#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub message: String,
    pub filename: String,
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
}

/// `POST /upload` — store the multipart `file` part under its original name.
///
/// Only the first `file` part carrying a filename is stored; other fields are
/// skipped. A request body over the configured limit is answered with 413.
pub async fn upload_file(
    State(storage): State<StorageDirectory>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<UploadResponse>, AppError> {
    let mut multipart = multipart.map_err(|rejection| {
        AppError::bad_request("No file uploaded").with_details(rejection.body_text())
    })?;

    while let Some(field) = multipart.next_field().await.map_err(|err| {
        AppError::new(err.status(), "Upload failed").with_details(err.body_text())
    })? {
        if field.name() != Some(FILE_FIELD) {
            continue;
        }
        let Some(filename) = field.file_name().map(str::to_owned) else {
            continue;
        };

        // Body errors (limit exceeded, malformed part) keep their own status
        // rather than being reported as a storage failure.
        let mut body_status = None;
        let stream = field.map(|chunk| {
            chunk.map_err(|err| {
                body_status = Some(err.status());
                io::Error::new(io::ErrorKind::Other, err)
            })
        });
        let created = storage.create(&filename, stream).await;
        created.map_err(|err| match (err, body_status) {
            (StorageError::Io(err), Some(status)) => {
                info!("upload of {} aborted: {}", filename, err);
                AppError::new(status, "Upload failed").with_details(err.to_string())
            }
            (err, _) => storage_failure(err, "Upload failed"),
        })?;

        return Ok(Json(UploadResponse {
            message: "Uploaded".into(),
            filename,
        }));
    }

    Err(AppError::bad_request("No file uploaded"))
}

/// `GET /files` — every stored file with its download locator.
pub async fn list_files(
    State(storage): State<StorageDirectory>,
) -> Result<Json<Vec<FileEntry>>, AppError> {
    let objects = storage
        .list()
        .await
        .map_err(|err| storage_failure(err, "Unable to read uploads"))?;

    Ok(Json(objects.into_iter().map(FileEntry::from).collect()))
}

/// `GET /download/{filename}` — stream a file back as an attachment.
///
/// Errors after the headers have been sent cannot change the status any
/// more; they are logged and the connection is cut short.
pub async fn download_file(
    State(storage): State<StorageDirectory>,
    Path(filename): Path<String>,
) -> Result<Response, AppError> {
    let (meta, file) = storage
        .read(&filename)
        .await
        .map_err(|err| storage_failure(err, "Download failed"))?;

    let name = meta.name.clone();
    let stream = ReaderStream::new(file).inspect(move |chunk| {
        if let Err(err) = chunk {
            error!("download error for {}: {}", name, err);
        }
    });

    let mut response = Response::new(Body::from_stream(stream));
    *response.status_mut() = StatusCode::OK;
    set_download_headers(response.headers_mut(), &meta);

    Ok(response)
}

/// `DELETE /delete/{filename}`
pub async fn delete_file(
    State(storage): State<StorageDirectory>,
    Path(filename): Path<String>,
) -> Result<Json<MessageResponse>, AppError> {
    storage
        .delete(&filename)
        .await
        .map_err(|err| storage_failure(err, "Failed to delete file"))?;

    Ok(Json(MessageResponse {
        message: "Deleted".into(),
    }))
}

/// Translate a storage outcome into the response for one operation.
/// `failure` is the message used when the filesystem itself failed.
fn storage_failure(err: StorageError, failure: &str) -> AppError {
    match err {
        StorageError::InvalidName(name) => {
            info!("rejected unsafe file name {:?}", name);
            AppError::bad_request("Invalid filename").with_filename(name)
        }
        StorageError::AlreadyExists(name) => {
            AppError::conflict("File already exists").with_filename(name)
        }
        StorageError::NotFound(name) => AppError::not_found("File not found").with_filename(name),
        StorageError::Io(err) => {
            error!("{}: {}", failure, err);
            AppError::internal(failure).with_details(err.to_string())
        }
    }
}

fn set_download_headers(headers: &mut HeaderMap, meta: &StoredObject) {
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/octet-stream"),
    );
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(meta.size));

    if let Ok(value) = HeaderValue::from_str(&content_disposition(&meta.name)) {
        headers.insert(header::CONTENT_DISPOSITION, value);
    }

    let last_modified = meta
        .modified
        .format("%a, %d %b %Y %H:%M:%S GMT")
        .to_string();
    if let Ok(value) = HeaderValue::from_str(&last_modified) {
        headers.insert(header::LAST_MODIFIED, value);
    }
}

/// `attachment` disposition naming the original file.
///
/// The quoted `filename` is an ASCII approximation for old clients; the
/// RFC 5987 `filename*` parameter carries the exact UTF-8 name.
fn content_disposition(name: &str) -> String {
    let fallback: String = name
        .chars()
        .map(|c| match c {
            '"' | '\\' => '_',
            c if c.is_ascii_graphic() || c == ' ' => c,
            _ => '_',
        })
        .collect();

    format!(
        "attachment; filename=\"{}\"; filename*=UTF-8''{}",
        fallback,
        urlencoding::encode(name)
    )
}
