//! Retention store: the directory downloaded bundles are kept in
//!
//! Writes go through a temporary file in the same directory that is synced and then
//! renamed over the final name, so an interrupted cycle never leaves a truncated
//! bundle behind under a managed name. Writers share a lock that the pruner takes
//! exclusively while it scans the directory, so any temporary file it sees belongs
//! to a writer that died and can be swept.

use crate::error::{Error, Result};
use crate::retention::ArtifactName;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{RwLock, RwLockWriteGuard};

/// Prefix of in-flight temporary files; never parseable as an artifact name
pub const PARTIAL_PREFIX: &str = ".partial-";

/// Whether `name` is a temporary file left by [`BundleStore::write`]
pub fn is_partial(name: &str) -> bool {
    name.starts_with(PARTIAL_PREFIX)
}

/// A regular file found in the store
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoreEntry {
    /// File name
    pub name: String,
    /// Full path
    pub path: PathBuf,
}

/// Directory holding collected bundles
#[derive(Debug)]
pub struct BundleStore {
    root: PathBuf,
    scan_lock: Arc<RwLock<()>>,
}

impl BundleStore {
    /// Create a store rooted at `root` (the directory is created by [`ensure`](Self::ensure))
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            scan_lock: Arc::new(RwLock::new(())),
        }
    }

    /// Store directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create the store directory and any missing parents
    pub async fn ensure(&self) -> Result<()> {
        tokio::fs::create_dir_all(&self.root).await.map_err(|e| {
            Error::config(
                "download_path",
                format!("cannot create {}: {e}", self.root.display()),
            )
        })
    }

    /// Final path of an artifact
    pub fn path_for(&self, name: &ArtifactName) -> PathBuf {
        self.root.join(name.to_string())
    }

    /// Atomically write an artifact, replacing any previous file of the same name
    ///
    /// The shared lock travels with the blocking task, so a write abandoned by a
    /// cancelled caller still keeps the pruner out until it has finished.
    pub async fn write(&self, name: &ArtifactName, bytes: Vec<u8>) -> Result<PathBuf> {
        let shared = Arc::clone(&self.scan_lock).read_owned().await;
        let root = self.root.clone();
        let dest = self.path_for(name);
        let target = dest.clone();

        tokio::task::spawn_blocking(move || {
            let _shared = shared;
            write_atomic(&root, &target, &bytes)
        })
        .await
        .map_err(|e| Error::Other(format!("bundle write task failed: {e}")))??;
        Ok(dest)
    }

    /// Regular files currently in the store (directories, symlinks and non-UTF-8 names are skipped)
    pub async fn entries(&self) -> Result<Vec<StoreEntry>> {
        let mut dir = tokio::fs::read_dir(&self.root).await?;
        let mut entries = Vec::new();
        while let Some(entry) = dir.next_entry().await? {
            let file_type = match entry.file_type().await {
                Ok(t) => t,
                Err(e) => {
                    tracing::debug!(path = ?entry.path(), error = %e, "skipping unreadable entry");
                    continue;
                }
            };
            if !file_type.is_file() {
                continue;
            }
            let Ok(name) = entry.file_name().into_string() else {
                continue;
            };
            entries.push(StoreEntry {
                name,
                path: entry.path(),
            });
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    /// Block artifact writes for the lifetime of the guard
    pub async fn lock_exclusive(&self) -> RwLockWriteGuard<'_, ()> {
        self.scan_lock.write().await
    }
}

fn write_atomic(dir: &Path, dest: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut tmp = tempfile::Builder::new()
        .prefix(PARTIAL_PREFIX)
        .tempfile_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(dest).map_err(|e| e.error)?;

    // make the rename itself durable
    #[cfg(unix)]
    if let Ok(handle) = std::fs::File::open(dir) {
        let _ = handle.sync_all();
    }
    Ok(())
}
