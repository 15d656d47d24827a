//! src/services/storage_directory.rs
//!
//! StorageDirectory — the flat namespace of stored files. Every name maps to
//! exactly one file directly beneath `root`; names are checked by
//! [`name_validator`](super::name_validator) before any path is built.
//!
//! Uploads are streamed into `root/.staging/` and then hard-linked onto the
//! final name. `link(2)` refuses to replace an existing entry, which gives
//! at-most-one-winner semantics for concurrent creates of the same name and
//! guarantees a half-written file is never visible under its final name.

use crate::{models::stored_object::StoredObject, services::name_validator};
use bytes::Bytes;
use futures::{Stream, StreamExt, pin_mut};
use std::{
    io::{self, ErrorKind},
    path::{Path, PathBuf},
    sync::Arc,
};
use thiserror::Error;
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Subdirectory of the root holding in-flight uploads.
pub const STAGING_DIR: &str = ".staging";

/// Name prefix of in-flight upload files inside the staging area.
const STAGED_PREFIX: &str = ".tmp-";

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("invalid file name `{0}`")]
    InvalidName(String),
    #[error("file `{0}` already exists")]
    AlreadyExists(String),
    #[error("file `{0}` not found")]
    NotFound(String),
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Handle to the storage root.
///
/// Cheap to clone; constructed once at startup and shared with every handler
/// as router state.
#[derive(Clone, Debug)]
pub struct StorageDirectory {
    root: Arc<PathBuf>,
}

impl StorageDirectory {
    /// Wrap `root` without touching the filesystem.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: Arc::new(root.into()),
        }
    }

    /// Create the root and its staging area if missing, then return a handle.
    ///
    /// Idempotent: stored files are left alone. Staging files orphaned by a
    /// previous process (killed mid-upload) are swept.
    pub async fn open(root: impl Into<PathBuf>) -> StorageResult<Self> {
        let dir = Self::new(root);
        fs::create_dir_all(dir.staging_dir()).await?;
        let swept = dir.sweep_staging().await?;
        if swept > 0 {
            info!("removed {} orphaned staging file(s)", swept);
        }
        info!("storage directory ready at {}", dir.root.display());
        Ok(dir)
    }

    pub fn staging_dir(&self) -> PathBuf {
        self.root.join(STAGING_DIR)
    }

    /// Map a name to its path under the root.
    ///
    /// This is the only place paths are derived from names, so an unsafe name
    /// is rejected here before any filesystem call is made.
    fn resolve(&self, name: &str) -> StorageResult<PathBuf> {
        if !name_validator::is_safe(name) {
            return Err(StorageError::InvalidName(name.to_string()));
        }
        Ok(self.root.join(name))
    }

    /// Whether an entry with this name is present.
    pub async fn exists(&self, name: &str) -> StorageResult<bool> {
        let path = self.resolve(name)?;
        Ok(fs::try_exists(&path).await?)
    }

    /// Stream `stream` into a new file called `name`.
    ///
    /// - Fails fast with `AlreadyExists` before reading the stream when the
    ///   name is already taken.
    /// - Writes into a uniquely named staging file and fsyncs it.
    /// - Hard-links the staging file onto the final name; if another writer
    ///   got there first the link fails and this call reports `AlreadyExists`.
    ///
    /// The staging file is removed on every path, including when this future
    /// is dropped mid-stream (client disconnect, shutdown), so a failed or
    /// aborted upload leaves nothing behind.
    pub async fn create<S>(&self, name: &str, stream: S) -> StorageResult<StoredObject>
    where
        S: Stream<Item = io::Result<Bytes>>,
    {
        let file_path = self.resolve(name)?;
        if self.exists(name).await? {
            return Err(StorageError::AlreadyExists(name.to_string()));
        }

        let staged = StagedFile::new(self.staging_dir());
        // Opened synchronously: a cancelled async open could still create the
        // file on the blocking pool after the guard has already run.
        let mut file = File::from_std(
            std::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(staged.path())?,
        );

        let mut size_bytes: u64 = 0;
        pin_mut!(stream);
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            size_bytes += chunk.len() as u64;
            file.write_all(&chunk).await?;
        }
        file.flush().await?;
        file.sync_all().await?;
        drop(file);

        let linked = fs::hard_link(staged.path(), &file_path).await;
        staged.discard().await;
        match linked {
            Ok(()) => {}
            Err(err) if err.kind() == ErrorKind::AlreadyExists => {
                debug!("lost create race for {}", file_path.display());
                return Err(StorageError::AlreadyExists(name.to_string()));
            }
            Err(err) => return Err(StorageError::Io(err)),
        }

        let meta = fs::metadata(&file_path).await?;
        info!("stored {} ({} bytes)", name, size_bytes);
        Ok(StoredObject::from_metadata(name, &meta))
    }

    /// Snapshot every stored file, sorted by name.
    ///
    /// Not isolated from concurrent mutation: entries deleted between the
    /// directory read and the stat are skipped, and names that are not valid
    /// UTF-8 (only possible through operator action) are ignored.
    pub async fn list(&self) -> StorageResult<Vec<StoredObject>> {
        let mut entries = fs::read_dir(self.root.as_path()).await?;
        let mut objects = Vec::new();

        while let Some(entry) = entries.next_entry().await? {
            let Ok(name) = entry.file_name().into_string() else {
                warn!("skipping non UTF-8 entry {:?}", entry.path());
                continue;
            };
            let meta = match entry.metadata().await {
                Ok(meta) => meta,
                Err(err) if err.kind() == ErrorKind::NotFound => {
                    debug!("{} vanished during listing", name);
                    continue;
                }
                Err(err) => return Err(StorageError::Io(err)),
            };
            if !meta.is_file() {
                continue;
            }
            objects.push(StoredObject::from_metadata(name, &meta));
        }

        objects.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(objects)
    }

    /// Open a stored file for reading.
    ///
    /// Returns its metadata and a handle positioned at the start, ready to be
    /// streamed out.
    pub async fn read(&self, name: &str) -> StorageResult<(StoredObject, File)> {
        let file_path = self.resolve(name)?;
        let meta = self.file_metadata(name, &file_path).await?;
        let file = File::open(&file_path)
            .await
            .map_err(|err| not_found_or_io(name, err))?;

        Ok((StoredObject::from_metadata(name, &meta), file))
    }

    /// Remove a stored file.
    pub async fn delete(&self, name: &str) -> StorageResult<()> {
        let file_path = self.resolve(name)?;
        self.file_metadata(name, &file_path).await?;
        fs::remove_file(&file_path)
            .await
            .map_err(|err| not_found_or_io(name, err))?;

        info!("deleted {}", name);
        Ok(())
    }

    /// Write, read back and remove a scratch file in the staging area.
    ///
    /// Used by the readiness probe; the scratch file never appears in `list`.
    pub async fn check_writable(&self) -> StorageResult<()> {
        let staged = StagedFile::new(self.staging_dir());
        fs::write(staged.path(), b"readyz").await?;
        let read_back = fs::read(staged.path()).await?;
        staged.discard().await;
        if read_back != b"readyz" {
            return Err(StorageError::Io(io::Error::new(
                ErrorKind::InvalidData,
                "staging file content mismatch",
            )));
        }
        Ok(())
    }

    /// Remove every `.tmp-*` entry left in the staging area.
    async fn sweep_staging(&self) -> StorageResult<usize> {
        let mut entries = fs::read_dir(self.staging_dir()).await?;
        let mut swept = 0;
        while let Some(entry) = entries.next_entry().await? {
            let is_staged = entry
                .file_name()
                .to_str()
                .is_some_and(|name| name.starts_with(STAGED_PREFIX));
            if !is_staged {
                continue;
            }
            match fs::remove_file(entry.path()).await {
                Ok(()) => swept += 1,
                Err(err) if err.kind() == ErrorKind::NotFound => {}
                Err(err) => return Err(StorageError::Io(err)),
            }
        }
        Ok(swept)
    }

    /// Metadata for a regular file under the root; anything else (the staging
    /// directory, a missing entry) is reported as `NotFound`.
    async fn file_metadata(&self, name: &str, path: &Path) -> StorageResult<std::fs::Metadata> {
        let meta = fs::symlink_metadata(path)
            .await
            .map_err(|err| not_found_or_io(name, err))?;
        if !meta.is_file() {
            return Err(StorageError::NotFound(name.to_string()));
        }
        Ok(meta)
    }
}

fn not_found_or_io(name: &str, err: io::Error) -> StorageError {
    if err.kind() == ErrorKind::NotFound {
        StorageError::NotFound(name.to_string())
    } else {
        StorageError::Io(err)
    }
}

/// A uniquely named file in the staging area, removed when dropped.
///
/// `discard` removes it without blocking the runtime on the success path;
/// `Drop` covers early returns and cancellation of the owning future.
struct StagedFile {
    path: PathBuf,
    armed: bool,
}

impl StagedFile {
    fn new(staging_dir: PathBuf) -> Self {
        Self {
            path: staging_dir.join(format!("{}{}", STAGED_PREFIX, Uuid::new_v4())),
            armed: true,
        }
    }

    fn path(&self) -> &Path {
        &self.path
    }

    async fn discard(mut self) {
        self.armed = false;
        if let Err(err) = fs::remove_file(&self.path).await {
            log_discard_failure(&self.path, err);
        }
    }
}

impl Drop for StagedFile {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        debug!("discarding staging file {}", self.path.display());
        if let Err(err) = std::fs::remove_file(&self.path) {
            log_discard_failure(&self.path, err);
        }
    }
}

fn log_discard_failure(path: &Path, err: io::Error) {
    if err.kind() != ErrorKind::NotFound {
        warn!("failed to remove staging file {}: {}", path.display(), err);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio::io::AsyncReadExt;

    fn body(data: &'static [u8]) -> impl Stream<Item = io::Result<Bytes>> {
        stream::iter(vec![Ok(Bytes::from_static(data))])
    }

    async fn temp_store() -> (TempDir, StorageDirectory) {
        let tmp = TempDir::new().unwrap();
        let store = StorageDirectory::open(tmp.path().join("uploads"))
            .await
            .unwrap();
        (tmp, store)
    }

    async fn read_all(store: &StorageDirectory, name: &str) -> Vec<u8> {
        let (_, mut file) = store.read(name).await.unwrap();
        let mut buf = Vec::new();
        file.read_to_end(&mut buf).await.unwrap();
        buf
    }

    async fn staging_is_empty(store: &StorageDirectory) -> bool {
        let mut entries = fs::read_dir(store.staging_dir()).await.unwrap();
        entries.next_entry().await.unwrap().is_none()
    }

    #[tokio::test]
    async fn open_is_idempotent() {
        let (tmp, store) = temp_store().await;
        store.create("keep.txt", body(b"keep")).await.unwrap();

        let reopened = StorageDirectory::open(tmp.path().join("uploads"))
            .await
            .unwrap();
        assert!(reopened.exists("keep.txt").await.unwrap());
    }

    #[tokio::test]
    async fn create_then_read_round_trips_bytes() {
        let (_tmp, store) = temp_store().await;
        let chunks = stream::iter(vec![
            Ok(Bytes::from_static(b"hello, ")),
            Ok(Bytes::from_static(b"world")),
        ]);

        let obj = store.create("greeting.txt", chunks).await.unwrap();
        assert_eq!(obj.name, "greeting.txt");
        assert_eq!(obj.size, 12);
        assert_eq!(read_all(&store, "greeting.txt").await, b"hello, world");
        assert!(staging_is_empty(&store).await);
    }

    #[tokio::test]
    async fn second_create_is_rejected_and_keeps_first_content() {
        let (_tmp, store) = temp_store().await;
        store.create("dup.txt", body(b"first")).await.unwrap();

        let err = store.create("dup.txt", body(b"second")).await.unwrap_err();
        assert!(matches!(err, StorageError::AlreadyExists(name) if name == "dup.txt"));
        assert_eq!(read_all(&store, "dup.txt").await, b"first");
    }

    #[tokio::test]
    async fn concurrent_creates_have_exactly_one_winner() {
        let (_tmp, store) = temp_store().await;

        let (a, b) = tokio::join!(
            store.create("race.bin", body(b"payload-a")),
            store.create("race.bin", body(b"payload-b")),
        );

        let winner = match (&a, &b) {
            (Ok(_), Err(StorageError::AlreadyExists(_))) => b"payload-a".to_vec(),
            (Err(StorageError::AlreadyExists(_)), Ok(_)) => b"payload-b".to_vec(),
            other => panic!("expected exactly one winner, got {:?}", other),
        };
        assert_eq!(read_all(&store, "race.bin").await, winner);
        assert!(staging_is_empty(&store).await);
    }

    #[tokio::test]
    async fn failed_stream_leaves_no_partial_file() {
        let (_tmp, store) = temp_store().await;
        let chunks = stream::iter(vec![
            Ok(Bytes::from_static(b"partial")),
            Err(io::Error::new(ErrorKind::ConnectionReset, "client went away")),
        ]);

        let err = store.create("broken.bin", chunks).await.unwrap_err();
        assert!(matches!(err, StorageError::Io(_)));
        assert!(!store.exists("broken.bin").await.unwrap());
        assert!(staging_is_empty(&store).await);
    }

    #[tokio::test]
    async fn cancelled_create_removes_staging_file() {
        let (_tmp, store) = temp_store().await;
        let stalled = stream::iter(vec![Ok(Bytes::from_static(b"partial"))])
            .chain(stream::pending::<io::Result<Bytes>>());

        let outcome = tokio::time::timeout(
            Duration::from_millis(200),
            store.create("aborted.bin", stalled),
        )
        .await;

        assert!(outcome.is_err(), "upload should still be waiting on the body");
        assert!(staging_is_empty(&store).await);
        assert!(!store.exists("aborted.bin").await.unwrap());
    }

    #[tokio::test]
    async fn open_sweeps_orphaned_staging_files() {
        let (tmp, store) = temp_store().await;
        store.create("kept.txt", body(b"kept")).await.unwrap();
        std::fs::write(store.staging_dir().join(".tmp-left-by-crash"), b"junk").unwrap();

        let reopened = StorageDirectory::open(tmp.path().join("uploads"))
            .await
            .unwrap();
        assert!(staging_is_empty(&reopened).await);
        assert_eq!(read_all(&reopened, "kept.txt").await, b"kept");
    }

    #[tokio::test]
    async fn check_writable_leaves_no_trace() {
        let (_tmp, store) = temp_store().await;
        store.check_writable().await.unwrap();
        assert!(staging_is_empty(&store).await);

        fs::remove_dir(store.staging_dir()).await.unwrap();
        assert!(matches!(
            store.check_writable().await,
            Err(StorageError::Io(_))
        ));
    }

    #[tokio::test]
    async fn unsafe_names_are_rejected_before_touching_disk() {
        // Root is never created: any filesystem access would surface as Io.
        let tmp = TempDir::new().unwrap();
        let store = StorageDirectory::new(tmp.path().join("missing"));

        for name in ["..", "../escape.txt", "a..b", "/etc/passwd", "dir/file"] {
            assert!(matches!(
                store.create(name, body(b"x")).await,
                Err(StorageError::InvalidName(_))
            ));
            assert!(matches!(
                store.read(name).await,
                Err(StorageError::InvalidName(_))
            ));
            assert!(matches!(
                store.delete(name).await,
                Err(StorageError::InvalidName(_))
            ));
            assert!(matches!(
                store.exists(name).await,
                Err(StorageError::InvalidName(_))
            ));
        }
        assert!(!tmp.path().join("missing").exists());
    }

    #[tokio::test]
    async fn list_reports_names_and_sizes() {
        let (_tmp, store) = temp_store().await;
        assert!(store.list().await.unwrap().is_empty());

        store.create("a", body(b"1")).await.unwrap();
        store.create("b", body(b"333")).await.unwrap();

        let listed = store.list().await.unwrap();
        let summary: Vec<_> = listed.iter().map(|o| (o.name.as_str(), o.size)).collect();
        assert_eq!(summary, vec![("a", 1), ("b", 3)]);
    }

    #[tokio::test]
    async fn delete_removes_object_from_listing_and_reads() {
        let (_tmp, store) = temp_store().await;
        store.create("gone.txt", body(b"bye")).await.unwrap();

        store.delete("gone.txt").await.unwrap();
        assert!(store.list().await.unwrap().is_empty());
        assert!(matches!(
            store.read("gone.txt").await,
            Err(StorageError::NotFound(_))
        ));
        assert!(matches!(
            store.delete("gone.txt").await,
            Err(StorageError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn staging_directory_is_not_addressable() {
        let (_tmp, store) = temp_store().await;
        assert!(matches!(
            store.read(STAGING_DIR).await,
            Err(StorageError::NotFound(_))
        ));
        assert!(matches!(
            store.delete(STAGING_DIR).await,
            Err(StorageError::NotFound(_))
        ));
        assert!(matches!(
            store.create(STAGING_DIR, body(b"x")).await,
            Err(StorageError::AlreadyExists(_))
        ));
    }
}
