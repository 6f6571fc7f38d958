//! Atomic, durable storage of a single value.
//!
//! The cell keeps an in-memory view guarded by a lock and a versioned JSON
//! snapshot on disk. Writes go to a temporary file in the same directory,
//! are flushed to stable storage, and are then renamed over the target, so a
//! crash at any point leaves either the old snapshot or the new one, never
//! a torn write.

use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::io::AsyncWriteExt;

/// On-disk snapshot format version. Bumped on incompatible layout changes.
const FORMAT_VERSION: u32 = 1;

/// Failures of the persistent cell.
#[derive(Debug, Error)]
pub enum CellError {
    /// The snapshot on disk was written by an incompatible format version.
    /// Fatal at startup; the process must not adopt state it cannot read.
    #[error(
        "incompatible state file {path:?}: version {found}, expected {expected}"
    )]
    StateIncompatible {
        path: PathBuf,
        found: u32,
        expected: u32,
    },
    #[error("state file i/o failed")]
    Io(#[from] io::Error),
    #[error("state serialization failed")]
    Serde(#[from] serde_json::Error),
}

#[derive(Serialize, Deserialize)]
struct Envelope<T> {
    version: u32,
    value: T,
}

/// Atomic, durable get/set of a single value.
///
/// Clones share the same state; the cell is thread-safe. `get` returns the
/// last successfully set value and never blocks on I/O; `set` is durable
/// once it returns.
pub struct AtomicPersistentCell<T> {
    inner: Arc<Inner<T>>,
}

struct Inner<T> {
    path: PathBuf,
    tmp: PathBuf,
    state: RwLock<T>,
}

impl<T> Clone for AtomicPersistentCell<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> AtomicPersistentCell<T>
where
    T: Clone + Serialize + DeserializeOwned + Send + Sync,
{
    /// Open the cell at `path`, loading the stored snapshot if one exists
    /// and adopting `initial` otherwise. A temporary artifact left behind by
    /// an interrupted write is discarded.
    pub async fn open(
        path: impl Into<PathBuf>,
        initial: T,
    ) -> Result<Self, CellError> {
        let path = path.into();
        let tmp = tmp_path(&path);

        match tokio::fs::remove_file(&tmp).await {
            Ok(()) => {
                tracing::warn!(
                    path = %tmp.display(),
                    "discarded interrupted state write"
                );
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => return Err(err.into()),
        }

        let value = match tokio::fs::read(&path).await {
            Ok(bytes) => {
                let envelope: Envelope<T> = serde_json::from_slice(&bytes)?;
                if envelope.version != FORMAT_VERSION {
                    return Err(CellError::StateIncompatible {
                        path,
                        found: envelope.version,
                        expected: FORMAT_VERSION,
                    });
                }
                envelope.value
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => initial,
            Err(err) => return Err(err.into()),
        };

        Ok(Self {
            inner: Arc::new(Inner {
                path,
                tmp,
                state: RwLock::new(value),
            }),
        })
    }

    /// The last successfully set value, or the initial value.
    pub fn get(&self) -> T {
        self.inner.state.read().clone()
    }

    /// Atomically replace the stored value.
    ///
    /// The in-memory view is updated only after the snapshot has reached
    /// stable storage; on failure the previous value remains observable
    /// everywhere.
    pub async fn set(&self, value: T) -> Result<(), CellError> {
        let envelope = Envelope {
            version: FORMAT_VERSION,
            value,
        };
        let bytes = serde_json::to_vec_pretty(&envelope)?;

        let mut file = tokio::fs::File::create(&self.inner.tmp).await?;
        file.write_all(&bytes).await?;
        file.sync_all().await?;
        drop(file);

        tokio::fs::rename(&self.inner.tmp, &self.inner.path).await?;

        // Rename durability needs the parent directory flushed on some
        // filesystems; best effort.
        #[cfg(unix)]
        if let Some(parent) = self.inner.path.parent() {
            if let Ok(dir) = tokio::fs::File::open(parent).await {
                let _ = dir.sync_all().await;
            }
        }

        *self.inner.state.write() = envelope.value;
        Ok(())
    }

    /// Location of the snapshot.
    pub fn path(&self) -> &Path {
        &self.inner.path
    }
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}
