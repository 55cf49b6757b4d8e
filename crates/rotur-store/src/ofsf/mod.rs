//! OFSF: per-user store of small positional records ("file entries").
//!
//! Layout: `<root>/<user>/<uuid>.json`, each holding
//! `{"entry": [...up to 14 values...], "index": N}`. A user's size is the
//! sum of those file sizes and is checked against the tier quota after each
//! update batch.
//!
//! One reader/writer lock covers the whole store. Updates and legacy
//! migration hold it exclusively; reads share it.

mod migration;

use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use rotur_shared::constants::OFSF_ENTRY_FIELDS;
use rotur_shared::types::{fold_username, validate_path_component};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::fs;
use tokio::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, info, warn};

use crate::error::{Result, StoreError};
use crate::persist::write_atomic;
use crate::store::Store;

pub(crate) use migration::legacy_path;

/// On-disk shape of one entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntryFile {
    pub entry: Vec<Value>,
    #[serde(default)]
    pub index: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CommandKind {
    Add,
    Replace,
    Delete,
}

/// One command of an update batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    pub command: CommandKind,
    pub uuid: String,
    /// ADD: the entry's fields. REPLACE: the new value of one field.
    #[serde(default)]
    pub dta: Option<Value>,
    /// REPLACE: 1-based field position.
    #[serde(default)]
    pub idx: Option<usize>,
}

impl Command {
    pub fn add(uuid: &str, fields: Vec<Value>) -> Self {
        Self {
            command: CommandKind::Add,
            uuid: uuid.to_string(),
            dta: Some(Value::Array(fields)),
            idx: None,
        }
    }

    pub fn replace(uuid: &str, idx: usize, value: Value) -> Self {
        Self {
            command: CommandKind::Replace,
            uuid: uuid.to_string(),
            dta: Some(value),
            idx: Some(idx),
        }
    }

    pub fn delete(uuid: &str) -> Self {
        Self {
            command: CommandKind::Delete,
            uuid: uuid.to_string(),
            dta: None,
            idx: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum CommandStatus {
    Applied,
    Skipped(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommandOutcome {
    pub command: CommandKind,
    pub uuid: String,
    #[serde(flatten)]
    pub status: CommandStatus,
}

/// Result of a batch that stayed within quota.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UpdateReport {
    pub results: Vec<CommandOutcome>,
    pub used: u64,
    pub available: i64,
}

struct OfsfInner {
    root: PathBuf,
    lock: RwLock<()>,
}

/// Handle to the OFSF root. Cheap to clone.
#[derive(Clone)]
pub struct OfsfStore {
    inner: Arc<OfsfInner>,
}

pub(crate) fn user_dir(root: &Path, user: &str) -> PathBuf {
    root.join(user)
}

pub(crate) fn entry_path(dir: &Path, uuid: &str) -> PathBuf {
    dir.join(format!("{uuid}.json"))
}

fn skipped(reason: &str) -> CommandStatus {
    CommandStatus::Skipped(reason.to_string())
}

fn is_entry_file(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == "json")
}

impl OfsfStore {
    pub fn new(root: PathBuf) -> Self {
        Self {
            inner: Arc::new(OfsfInner {
                root,
                lock: RwLock::new(()),
            }),
        }
    }

    pub fn root(&self) -> &Path {
        &self.inner.root
    }

    fn dir(&self, user: &str) -> PathBuf {
        user_dir(&self.inner.root, user)
    }

    /// Exclusive lock with `user`'s legacy file already migrated.
    async fn write_lock(&self, user: &str) -> Result<RwLockWriteGuard<'_, ()>> {
        validate_path_component(user)?;
        let guard = self.inner.lock.write().await;
        migration::migrate_legacy(&self.inner.root, user).await?;
        Ok(guard)
    }

    /// Shared lock with `user`'s legacy file already migrated. Only takes
    /// the exclusive lock when there is something to migrate.
    async fn read_lock(&self, user: &str) -> Result<RwLockReadGuard<'_, ()>> {
        validate_path_component(user)?;
        let legacy = legacy_path(&self.inner.root, user);
        if fs::try_exists(&legacy).await.unwrap_or(false) {
            let guard = self.write_lock(user).await?;
            return Ok(guard.downgrade());
        }
        Ok(self.inner.lock.read().await)
    }

    /// Apply a batch of commands in order, then check the quota.
    ///
    /// Commands that cannot apply are skipped and reported; they never abort
    /// the batch. Exceeding `quota` fails with [`StoreError::QuotaExceeded`]
    /// but the applied commands stay on disk.
    pub async fn update(
        &self,
        user: &str,
        quota: u64,
        commands: Vec<Command>,
    ) -> Result<UpdateReport> {
        let _guard = self.write_lock(user).await?;
        let dir = self.dir(user);

        let mut results = Vec::with_capacity(commands.len());
        for cmd in commands {
            let status = self.apply(&dir, &cmd).await?;
            if let CommandStatus::Skipped(reason) = &status {
                debug!(user, uuid = %cmd.uuid, reason = %reason, "OFSF command skipped");
            }
            results.push(CommandOutcome {
                command: cmd.command,
                uuid: cmd.uuid,
                status,
            });
        }

        let used = dir_size(&dir).await?;
        let available = quota as i64 - used as i64;
        if used > quota {
            warn!(user, used, quota, "OFSF quota exceeded");
            return Err(StoreError::QuotaExceeded { used, available });
        }
        Ok(UpdateReport {
            results,
            used,
            available,
        })
    }

    async fn apply(&self, dir: &Path, cmd: &Command) -> Result<CommandStatus> {
        if validate_path_component(&cmd.uuid).is_err() {
            return Ok(skipped("invalid uuid"));
        }
        let path = entry_path(dir, &cmd.uuid);

        match cmd.command {
            CommandKind::Add => {
                if fs::try_exists(&path).await? {
                    return Ok(skipped("uuid already exists"));
                }
                let Some(Value::Array(fields)) = &cmd.dta else {
                    return Ok(skipped("dta must be a list"));
                };
                if fields.len() > OFSF_ENTRY_FIELDS {
                    return Ok(skipped("too many fields"));
                }
                let file = EntryFile {
                    entry: fields.clone(),
                    index: 0,
                };
                write_atomic(&path, &serde_json::to_vec(&file)?).await?;
            }
            CommandKind::Replace => {
                let Some(mut file) = read_entry(&path).await? else {
                    return Ok(skipped("uuid not found"));
                };
                let slot = cmd
                    .idx
                    .and_then(|idx| idx.checked_sub(1))
                    .filter(|&i| i < file.entry.len());
                let Some(slot) = slot else {
                    return Ok(skipped("idx out of range"));
                };
                file.entry[slot] = cmd.dta.clone().unwrap_or(Value::Null);
                write_atomic(&path, &serde_json::to_vec(&file)?).await?;
            }
            CommandKind::Delete => match fs::remove_file(&path).await {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => return Ok(skipped("uuid not found")),
                Err(e) => return Err(e.into()),
            },
        }
        Ok(CommandStatus::Applied)
    }

    /// Every entry of `user`, ordered by `index` then UUID.
    async fn entries(&self, user: &str) -> Result<Vec<(String, EntryFile)>> {
        let dir = self.dir(user);
        let mut read_dir = match fs::read_dir(&dir).await {
            Ok(rd) => rd,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut entries = Vec::new();
        while let Some(dirent) = read_dir.next_entry().await? {
            let path = dirent.path();
            if !is_entry_file(&path) {
                continue;
            }
            let Some(uuid) = path.file_stem().and_then(|s| s.to_str()).map(str::to_string) else {
                continue;
            };
            match read_entry(&path).await {
                Ok(Some(file)) => entries.push((uuid, file)),
                Ok(None) => {}
                Err(e) => warn!(path = %path.display(), error = %e, "Skipping unreadable OFSF entry"),
            }
        }
        entries.sort_by(|(ua, a), (ub, b)| a.index.cmp(&b.index).then_with(|| ua.cmp(ub)));
        Ok(entries)
    }

    /// All fields of all entries, concatenated. With a `threshold`, string
    /// fields longer than that many bytes are replaced by `false`.
    pub async fn index(&self, user: &str, threshold: Option<usize>) -> Result<Vec<Value>> {
        let _guard = self.read_lock(user).await?;
        let entries = self.entries(user).await?;
        let fields = entries
            .into_iter()
            .flat_map(|(_, file)| file.entry)
            .map(|v| match (threshold, &v) {
                (Some(max), Value::String(s)) if s.len() > max => Value::Bool(false),
                _ => v,
            })
            .collect();
        Ok(fields)
    }

    /// UUID -> fields for every entry.
    pub async fn dump(&self, user: &str) -> Result<BTreeMap<String, Vec<Value>>> {
        let _guard = self.read_lock(user).await?;
        let entries = self.entries(user).await?;
        Ok(entries.into_iter().map(|(uuid, file)| (uuid, file.entry)).collect())
    }

    pub async fn get(&self, user: &str, uuid: &str) -> Result<Vec<Value>> {
        let _guard = self.read_lock(user).await?;
        validate_path_component(uuid)?;
        read_entry(&entry_path(&self.dir(user), uuid))
            .await?
            .map(|file| file.entry)
            .ok_or_else(|| StoreError::not_found(format!("Entry '{uuid}'")))
    }

    /// Bytes used by `user`.
    pub async fn size(&self, user: &str) -> Result<u64> {
        let _guard = self.read_lock(user).await?;
        dir_size(&self.dir(user)).await
    }

    /// Remove every entry of `user`, and any unmigrated legacy file.
    pub async fn delete_all(&self, user: &str) -> Result<()> {
        validate_path_component(user)?;
        let _guard = self.inner.lock.write().await;
        match fs::remove_dir_all(self.dir(user)).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        match fs::remove_file(legacy_path(&self.inner.root, user)).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        info!(user, "Deleted OFSF data");
        Ok(())
    }
}

async fn read_entry(path: &Path) -> Result<Option<EntryFile>> {
    match fs::read(path).await {
        Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

async fn dir_size(dir: &Path) -> Result<u64> {
    let mut read_dir = match fs::read_dir(dir).await {
        Ok(rd) => rd,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e.into()),
    };
    let mut total = 0;
    while let Some(dirent) = read_dir.next_entry().await? {
        if is_entry_file(&dirent.path()) {
            total += dirent.metadata().await?.len();
        }
    }
    Ok(total)
}

impl Store {
    /// Apply an OFSF batch against the user's tier quota.
    pub async fn ofsf_update(
        &self,
        username: &str,
        commands: Vec<Command>,
    ) -> Result<UpdateReport> {
        let user = self.get_user(username).await?;
        let folded = fold_username(&user.username);
        self.ofsf()
            .update(&folded, user.tier.ofsf_quota(), commands)
            .await
    }
}
