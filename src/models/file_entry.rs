//! Client-visible projection of a stored object, as returned by `GET /files`.

use crate::models::stored_object::StoredObject;
use chrono::SecondsFormat;
use serde::{Deserialize, Serialize};

/// Route prefix under which objects are downloadable.
pub const DOWNLOAD_PREFIX: &str = "/download/";

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct FileEntry {
    pub name: String,

    /// Percent-encoded download locator, e.g. `/download/my%20file.txt`.
    pub url: String,

    pub size: u64,

    /// RFC 3339 timestamp with millisecond precision in UTC.
    pub mtime: String,
}

impl From<StoredObject> for FileEntry {
    fn from(obj: StoredObject) -> Self {
        Self {
            url: download_url(&obj.name),
            size: obj.size,
            mtime: obj.modified.to_rfc3339_opts(SecondsFormat::Millis, true),
            name: obj.name,
        }
    }
}

/// Stable locator for `name` that the download route decodes back verbatim.
pub fn download_url(name: &str) -> String {
    format!("{}{}", DOWNLOAD_PREFIX, urlencoding::encode(name))
}
