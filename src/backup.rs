//! Pre-mutation snapshots of config files.
//!
//! 文件名格式: original.ext -> original.ext.bak.<unix 毫秒>
//! A snapshot is flushed to disk before `snapshot` returns, so callers may
//! only start writing the original once they hold the returned record.

use crate::error::{MirrorError, Result};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupRecord {
    pub original_path: PathBuf,
    pub backup_path: PathBuf,
    /// Unix milliseconds, also the suffix of `backup_path`.
    pub timestamp: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackupOutcome {
    Created(BackupRecord),
    /// The original did not exist; undoing the write means deleting the file.
    NothingToBackUp,
}

fn backup_prefix(path: &Path) -> String {
    let file_name = path.file_name().unwrap_or_default().to_string_lossy();
    format!("{}.bak.", file_name)
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

/// Copy `path` verbatim to a fresh sibling backup and fsync it.
pub async fn snapshot(path: &Path) -> Result<BackupOutcome> {
    let content = match fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            debug!(path = %path.display(), "nothing to back up");
            return Ok(BackupOutcome::NothingToBackUp);
        }
        Err(e) => return Err(e.into()),
    };

    let prefix = backup_prefix(path);
    let mut timestamp = now_millis();

    // 同一毫秒内的重复备份: 时间戳递增, 绝不覆盖已有备份
    let (mut file, backup_path) = loop {
        let candidate = path.with_file_name(format!("{}{}", prefix, timestamp));
        match fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&candidate)
            .await
        {
            Ok(file) => break (file, candidate),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => timestamp += 1,
            Err(e) => return Err(MirrorError::write(&candidate, e)),
        }
    };

    file.write_all(&content)
        .await
        .map_err(|e| MirrorError::write(&backup_path, e))?;
    file.sync_all()
        .await
        .map_err(|e| MirrorError::write(&backup_path, e))?;
    drop(file);
    sync_parent(&backup_path).await;

    info!(backup = %backup_path.display(), "backup created");
    Ok(BackupOutcome::Created(BackupRecord {
        original_path: path.to_path_buf(),
        backup_path,
        timestamp,
    }))
}

/// The most recent backup of `path`, by timestamp.
pub async fn latest(path: &Path) -> Result<Option<BackupRecord>> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let prefix = backup_prefix(path);

    let mut entries = match fs::read_dir(parent).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    let mut newest: Option<BackupRecord> = None;
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name().to_string_lossy().to_string();
        // Numeric compare: stamps of different widths must not sort as strings.
        let Some(timestamp) = name
            .strip_prefix(&prefix)
            .and_then(|stamp| stamp.parse::<u64>().ok())
        else {
            continue;
        };
        if newest.as_ref().is_none_or(|n| timestamp > n.timestamp) {
            newest = Some(BackupRecord {
                original_path: path.to_path_buf(),
                backup_path: entry.path(),
                timestamp,
            });
        }
    }

    Ok(newest)
}

/// Copy the backup back over the original, whatever the original holds now.
pub async fn restore(record: &BackupRecord) -> Result<()> {
    let content = match fs::read(&record.backup_path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            return Err(MirrorError::BackupMissing {
                path: record.original_path.clone(),
            })
        }
        Err(e) => return Err(e.into()),
    };

    info!(
        backup = %record.backup_path.display(),
        target = %record.original_path.display(),
        "restoring from backup"
    );
    replace_file(&record.original_path, &content).await
}

/// Write `content` to `path` via a synced sibling temp file and a rename, so
/// the path holds either the old or the new bytes, never a torn mix.
pub async fn replace_file(path: &Path, content: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .await
            .map_err(|e| MirrorError::write(parent, e))?;
    }

    let file_name = path.file_name().unwrap_or_default().to_string_lossy();
    let tmp_path = path.with_file_name(format!(".{}.tmp", file_name));
    let permissions = fs::metadata(path).await.ok().map(|m| m.permissions());

    let result = async {
        let mut file = fs::File::create(&tmp_path).await?;
        file.write_all(content).await?;
        file.sync_all().await?;
        drop(file);
        if let Some(permissions) = permissions {
            fs::set_permissions(&tmp_path, permissions).await?;
        }
        fs::rename(&tmp_path, path).await
    }
    .await;

    if let Err(e) = result {
        let _ = fs::remove_file(&tmp_path).await;
        return Err(MirrorError::write(path, e));
    }

    sync_parent(path).await;
    debug!(path = %path.display(), bytes = content.len(), "config written");
    Ok(())
}

async fn sync_parent(path: &Path) {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        // Not every filesystem supports fsync on a directory.
        if let Ok(dir) = fs::File::open(parent).await {
            let _ = dir.sync_all().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_snapshot_absent_file() -> Result<()> {
        let dir = tempdir()?;
        let outcome = snapshot(&dir.path().join("pip.conf")).await?;
        assert_eq!(outcome, BackupOutcome::NothingToBackUp);
        assert!(latest(&dir.path().join("pip.conf")).await?.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn test_snapshot_never_overwrites() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("daemon.json");
        fs::write(&path, "{}").await?;

        let BackupOutcome::Created(first) = snapshot(&path).await? else {
            panic!("expected a backup");
        };
        fs::write(&path, "{\"a\": 1}").await?;
        let BackupOutcome::Created(second) = snapshot(&path).await? else {
            panic!("expected a backup");
        };

        assert_ne!(first.backup_path, second.backup_path);
        assert!(second.timestamp > first.timestamp);
        assert_eq!(fs::read_to_string(&first.backup_path).await?, "{}");
        assert_eq!(fs::read_to_string(&second.backup_path).await?, "{\"a\": 1}");

        let newest = latest(&path).await?.expect("backup exists");
        assert_eq!(newest, second);
        Ok(())
    }

    #[tokio::test]
    async fn test_latest_sorts_numerically() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("sources.list");
        fs::write(dir.path().join("sources.list.bak.999"), "old").await?;
        fs::write(dir.path().join("sources.list.bak.1000"), "new").await?;
        fs::write(dir.path().join("sources.list.bak.junk"), "x").await?;
        fs::write(dir.path().join("other.list.bak.5000"), "x").await?;

        let newest = latest(&path).await?.expect("backup exists");
        assert_eq!(newest.timestamp, 1000);
        Ok(())
    }

    #[tokio::test]
    async fn test_restore_roundtrip_and_missing() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join(".npmrc");
        let original = "registry=https://registry.npmjs.org/\n# keep me\n";
        fs::write(&path, original).await?;

        let BackupOutcome::Created(record) = snapshot(&path).await? else {
            panic!("expected a backup");
        };
        replace_file(&path, b"registry=https://elsewhere/\n").await?;
        restore(&record).await?;
        assert_eq!(fs::read_to_string(&path).await?, original);

        fs::remove_file(&record.backup_path).await?;
        let err = restore(&record).await.unwrap_err();
        assert_eq!(err.kind(), "backup-missing");
        Ok(())
    }

    #[tokio::test]
    async fn test_replace_file_creates_parents() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("pip").join("pip.conf");
        replace_file(&path, b"[global]\n").await?;
        assert_eq!(fs::read_to_string(&path).await?, "[global]\n");
        assert!(!dir.path().join("pip").join(".pip.conf.tmp").exists());
        Ok(())
    }
}
