//! Atomic file replacement.
//!
//! Every snapshot and every OFSF entry goes through [`write_atomic`]: the
//! bytes are written to `<path>.tmp`, synced, and renamed over `<path>`.
//! A reader therefore sees either the previous file or the new one, never a
//! partial write.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use crate::error::Result;

/// Path of the temporary sibling used while replacing `path`.
pub fn temp_path(path: &Path) -> PathBuf {
    let mut name: OsString = path.file_name().map(OsString::from).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Replace `path` with `bytes`. On failure the previous file is untouched.
pub async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).await?;
        }
    }

    let tmp = temp_path(path);
    if let Err(e) = write_and_sync(&tmp, bytes).await {
        if let Err(cleanup) = fs::remove_file(&tmp).await {
            debug!(path = %tmp.display(), error = %cleanup, "No temp file to clean up");
        }
        return Err(e);
    }

    if let Err(e) = fs::rename(&tmp, path).await {
        warn!(path = %path.display(), error = %e, "Rename over snapshot failed");
        let _ = fs::remove_file(&tmp).await;
        return Err(e.into());
    }

    Ok(())
}

async fn write_and_sync(tmp: &Path, bytes: &[u8]) -> Result<()> {
    let mut file = fs::File::create(tmp).await?;
    file.write_all(bytes).await?;
    file.flush().await?;
    file.sync_all().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_write_replaces_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("posts.json");

        write_atomic(&path, b"[1]").await.unwrap();
        write_atomic(&path, b"[1,2]").await.unwrap();

        assert_eq!(fs::read(&path).await.unwrap(), b"[1,2]");
        assert!(!temp_path(&path).exists());
    }

    #[tokio::test]
    async fn test_creates_parent_directories() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("deeper").join("keys.json");

        write_atomic(&path, b"{}").await.unwrap();
        assert!(path.exists());
    }

    #[tokio::test]
    async fn test_failed_write_keeps_previous_snapshot() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("users.json");
        write_atomic(&path, b"{\"a\":1}").await.unwrap();

        // A directory squatting on the temp path makes the write fail.
        std::fs::create_dir(temp_path(&path)).unwrap();
        assert!(write_atomic(&path, b"{\"a\":2}").await.is_err());

        assert_eq!(fs::read(&path).await.unwrap(), b"{\"a\":1}");
    }

    #[test]
    fn test_temp_path_is_sibling() {
        let p = Path::new("/data/users.json");
        assert_eq!(temp_path(p), PathBuf::from("/data/users.json.tmp"));
    }
}
