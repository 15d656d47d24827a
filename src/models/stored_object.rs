//! Represents one file held in the storage directory.

use chrono::{DateTime, Utc};
use std::{fs::Metadata, time::UNIX_EPOCH};

/// A single stored object as seen on disk.
///
/// The name is both the display name and the storage key; size and
/// modification time are read from the filesystem, never cached.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoredObject {
    /// Unique key within the storage directory.
    pub name: String,

    /// Length of the content in bytes.
    pub size: u64,

    /// Time of the last write.
    pub modified: DateTime<Utc>,
}

impl StoredObject {
    /// Build a snapshot from filesystem metadata.
    ///
    /// Platforms without mtime support report the Unix epoch.
    pub fn from_metadata(name: impl Into<String>, meta: &Metadata) -> Self {
        let modified = meta.modified().unwrap_or(UNIX_EPOCH);

        Self {
            name: name.into(),
            size: meta.len(),
            modified: DateTime::<Utc>::from(modified),
        }
    }
}
