//! One-time conversion of the legacy `<root>/<user>.ofsf` file into
//! per-entry files.
//!
//! The legacy file is a flat JSON list. Every 14 consecutive values form one
//! entry whose last value is its UUID. Entries are written out with their
//! position as `index`, then the legacy file is removed. A second run finds
//! no legacy file and does nothing.

use std::io::ErrorKind;
use std::path::Path;

use rotur_shared::constants::{OFSF_ENTRY_FIELDS, OFSF_LEGACY_EXT};
use rotur_shared::types::validate_path_component;
use serde_json::Value;
use tokio::fs;
use tracing::{info, warn};

use super::{entry_path, user_dir, EntryFile};
use crate::error::{Result, StoreError};
use crate::persist::write_atomic;

pub(crate) fn legacy_path(root: &Path, user: &str) -> std::path::PathBuf {
    root.join(format!("{user}.{OFSF_LEGACY_EXT}"))
}

/// UUID carried in the last field of a legacy entry.
fn entry_uuid(fields: &[Value]) -> Option<String> {
    match fields.last()? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Migrate `user`'s legacy file if there is one. Returns the number of
/// entries written. The caller holds the store's write lock.
pub(crate) async fn migrate_legacy(root: &Path, user: &str) -> Result<usize> {
    let legacy = legacy_path(root, user);
    let bytes = match fs::read(&legacy).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e.into()),
    };

    let values: Vec<Value> = serde_json::from_slice(&bytes)?;
    if values.len() % OFSF_ENTRY_FIELDS != 0 {
        warn!(user, len = values.len(), "Legacy OFSF list is not a whole number of entries");
        return Err(StoreError::BadInput(format!(
            "Legacy file holds {} values, not a multiple of {OFSF_ENTRY_FIELDS}",
            values.len()
        )));
    }

    // Validate every UUID before writing anything.
    let entries = values
        .chunks(OFSF_ENTRY_FIELDS)
        .map(|fields| {
            let uuid = entry_uuid(fields)
                .ok_or_else(|| StoreError::BadInput("Legacy entry without a UUID".to_string()))?;
            validate_path_component(&uuid)?;
            Ok((uuid, fields.to_vec()))
        })
        .collect::<Result<Vec<_>>>()?;

    let dir = user_dir(root, user);
    for (index, (uuid, entry)) in entries.iter().enumerate() {
        let file = EntryFile {
            entry: entry.clone(),
            index: index as i64,
        };
        write_atomic(&entry_path(&dir, uuid), &serde_json::to_vec(&file)?).await?;
    }
    fs::remove_file(&legacy).await?;

    info!(user, entries = entries.len(), "Migrated legacy OFSF file");
    Ok(entries.len())
}
