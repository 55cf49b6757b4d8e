//! One in-memory collection guarded by a reader/writer lock, with its
//! canonical JSON file on disk.
//!
//! Readers share the lock; writers hold it exclusively for the duration of
//! a synchronous closure, so no I/O ever happens under the data lock. After
//! a mutation the collection's flusher is woken; it deep-copies the data
//! under the read lock and atomically replaces the file. A second mutex
//! serializes flushes (and reloads) of the same collection.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, SystemTime};

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::fs;
use tokio::sync::{Mutex, Notify, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::error::Result;
use crate::persist::write_atomic;

/// How a collection is rendered on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotFormat {
    /// Single-line JSON, used for the largest collection (users).
    Compact,
    /// Indented JSON for human inspection.
    Pretty,
}

struct Inner<T> {
    name: &'static str,
    path: PathBuf,
    format: SnapshotFormat,
    data: RwLock<T>,
    /// Held while a snapshot is written or the file is reloaded.
    flush_lock: Mutex<()>,
    dirty: Notify,
    /// Modification time of the file as we last wrote or read it.
    synced_mtime: StdMutex<Option<SystemTime>>,
}

pub struct Collection<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for Collection<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Collection<T>
where
    T: Clone + Default + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    /// An empty collection backed by `path`. Nothing is read until
    /// [`Collection::load`].
    pub fn new(name: &'static str, path: impl Into<PathBuf>, format: SnapshotFormat) -> Self {
        Self {
            inner: Arc::new(Inner {
                name,
                path: path.into(),
                format,
                data: RwLock::new(T::default()),
                flush_lock: Mutex::new(()),
                dirty: Notify::new(),
                synced_mtime: StdMutex::new(None),
            }),
        }
    }

    pub fn name(&self) -> &'static str {
        self.inner.name
    }

    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    /// Replace the in-memory contents with the file on disk.
    ///
    /// A missing file yields an empty collection. An unreadable or malformed
    /// file leaves the current contents untouched and returns the error.
    pub async fn load(&self) -> Result<()> {
        let path = &self.inner.path;
        let bytes = match fs::read(path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                info!(collection = self.name(), path = %path.display(), "No snapshot on disk, starting empty");
                *self.inner.data.write().await = T::default();
                self.set_synced_mtime(None);
                return Ok(());
            }
            Err(e) => {
                error!(collection = self.name(), path = %path.display(), error = %e, "Failed to read snapshot, keeping in-memory state");
                return Err(e.into());
            }
        };

        match serde_json::from_slice::<T>(&bytes) {
            Ok(value) => {
                *self.inner.data.write().await = value;
                self.set_synced_mtime(file_mtime(path).await);
                info!(collection = self.name(), bytes = bytes.len(), "Loaded snapshot");
                Ok(())
            }
            Err(e) => {
                error!(collection = self.name(), path = %path.display(), error = %e, "Malformed snapshot, keeping in-memory state");
                Err(e.into())
            }
        }
    }

    /// Deep copy of the current contents, taken under the read lock.
    pub async fn snapshot(&self) -> T {
        self.inner.data.read().await.clone()
    }

    /// Run `f` under the shared lock.
    pub async fn read<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        let guard = self.inner.data.read().await;
        f(&guard)
    }

    /// Run `f` under the exclusive lock, then schedule a flush.
    pub async fn mutate<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        let out = {
            let mut guard = self.inner.data.write().await;
            f(&mut guard)
        };
        self.schedule_flush();
        out
    }

    /// Like [`Collection::mutate`], but only schedules a flush on success.
    /// `f` must not modify the data before deciding to fail.
    pub async fn try_mutate<R>(&self, f: impl FnOnce(&mut T) -> Result<R>) -> Result<R> {
        let out = {
            let mut guard = self.inner.data.write().await;
            f(&mut guard)
        };
        if out.is_ok() {
            self.schedule_flush();
        }
        out
    }

    /// Shared guard for operations spanning several collections.
    pub async fn read_guard(&self) -> RwLockReadGuard<'_, T> {
        self.inner.data.read().await
    }

    /// Exclusive guard for operations spanning several collections. The
    /// caller schedules the flush after dropping the guard.
    pub async fn write_guard(&self) -> RwLockWriteGuard<'_, T> {
        self.inner.data.write().await
    }

    /// Ask the flusher to write a snapshot soon. Never blocks; any number of
    /// calls before the flusher wakes collapse into one write.
    pub fn schedule_flush(&self) {
        self.inner.dirty.notify_one();
    }

    /// Write a snapshot now.
    pub async fn flush(&self) -> Result<()> {
        let _serial = self.inner.flush_lock.lock().await;

        let snapshot = self.snapshot().await;
        let bytes = match self.inner.format {
            SnapshotFormat::Compact => serde_json::to_vec(&snapshot)?,
            SnapshotFormat::Pretty => serde_json::to_vec_pretty(&snapshot)?,
        };
        drop(snapshot);

        write_atomic(&self.inner.path, &bytes).await?;
        self.set_synced_mtime(file_mtime(&self.inner.path).await);

        debug!(collection = self.name(), bytes = bytes.len(), "Snapshot written");
        Ok(())
    }

    /// Background task that flushes after each burst of mutations.
    pub fn spawn_flusher(&self, coalesce: Duration) -> JoinHandle<()> {
        let this = self.clone();
        tokio::spawn(async move {
            loop {
                this.inner.dirty.notified().await;
                if !coalesce.is_zero() {
                    tokio::time::sleep(coalesce).await;
                }
                if let Err(e) = this.flush().await {
                    error!(
                        collection = this.name(),
                        error = %e,
                        "Snapshot failed, previous file stays authoritative"
                    );
                }
            }
        })
    }

    /// Background task that reloads the collection when its file is changed
    /// by someone other than our own flusher.
    pub fn spawn_watcher(&self, poll: Duration, debounce: Duration) -> JoinHandle<()> {
        let this = self.clone();
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(poll).await;
                if !this.changed_on_disk().await {
                    continue;
                }

                tokio::time::sleep(debounce).await;

                let _serial = this.inner.flush_lock.lock().await;
                let Some(observed) = file_mtime(&this.inner.path).await else {
                    continue;
                };
                if this.synced_mtime() == Some(observed) {
                    continue;
                }

                match this.load().await {
                    Ok(()) => info!(collection = this.name(), "Reloaded after external change"),
                    Err(e) => {
                        // Only retry once the file changes again.
                        this.set_synced_mtime(Some(observed));
                        warn!(collection = this.name(), error = %e, "Reload failed, keeping in-memory state");
                    }
                }
            }
        })
    }

    async fn changed_on_disk(&self) -> bool {
        let _serial = self.inner.flush_lock.lock().await;
        match file_mtime(&self.inner.path).await {
            Some(mtime) => self.synced_mtime() != Some(mtime),
            None => false,
        }
    }

    fn synced_mtime(&self) -> Option<SystemTime> {
        self.inner
            .synced_mtime
            .lock()
            .map(|g| *g)
            .unwrap_or_else(|poisoned| *poisoned.into_inner())
    }

    fn set_synced_mtime(&self, mtime: Option<SystemTime>) {
        match self.inner.synced_mtime.lock() {
            Ok(mut g) => *g = mtime,
            Err(poisoned) => *poisoned.into_inner() = mtime,
        }
    }
}

async fn file_mtime(path: &Path) -> Option<SystemTime> {
    fs::metadata(path).await.ok()?.modified().ok()
}
