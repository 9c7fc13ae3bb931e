//! Timestamped backups and their retention.
//!
//! Every open of an existing wallet copies it to
//! `<backup_dir>/<name>.<dd-mm-yyyy-HH-MM>.<ext>`. The retention set is
//! rebuilt from a directory scan each time; nothing is cached between opens.

use crate::core::paths;
use crate::error::{IoOp, WalletError, WalletResult};
use chrono::{DateTime, Local};
use regex::Regex;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupEntry {
    pub source_path: PathBuf,
    pub backup_path: PathBuf,
    pub timestamp: SystemTime,
}

/// Copy `primary` into `backup_dir`, overwriting a same-minute copy.
///
/// The copy's modification time is set to `now` so ordering follows the
/// stamp in its name rather than whenever the filesystem wrote it.
pub fn take_backup(primary: &Path, backup_dir: &Path, now: DateTime<Local>) -> WalletResult<BackupEntry> {
    let stamp = now.format(paths::BACKUP_TIMESTAMP_FORMAT).to_string();
    let file_name =
        paths::backup_file_name(primary, &stamp).ok_or_else(|| WalletError::InvalidPath(primary.to_path_buf()))?;
    fs::create_dir_all(backup_dir).map_err(|e| WalletError::io(IoOp::CreateDir, backup_dir, e))?;

    let backup_path = backup_dir.join(file_name);
    fs::copy(primary, &backup_path).map_err(|e| WalletError::io(IoOp::Copy, &backup_path, e))?;

    let timestamp = SystemTime::from(now);
    File::options()
        .write(true)
        .open(&backup_path)
        .and_then(|f| f.set_modified(timestamp))
        .map_err(|e| WalletError::io(IoOp::Write, &backup_path, e))?;

    debug!(backup = %backup_path.display(), "wallet backed up");
    Ok(BackupEntry { source_path: primary.to_path_buf(), backup_path, timestamp })
}

/// Backups of one wallet name, newest first.
#[derive(Debug, Clone)]
pub struct RetentionSet {
    source_path: PathBuf,
    entries: Vec<BackupEntry>,
}

impl RetentionSet {
    /// Scan `backup_dir` for `<name>*.<ext>` files belonging to `source`.
    /// A missing directory yields an empty set.
    pub fn scan(backup_dir: &Path, source: &Path) -> WalletResult<Self> {
        let pattern = backup_pattern(source)?;
        let mut entries = Vec::new();
        let dir = match fs::read_dir(backup_dir) {
            Ok(dir) => dir,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Self { source_path: source.to_path_buf(), entries });
            }
            Err(e) => return Err(WalletError::io(IoOp::Scan, backup_dir, e)),
        };

        for entry in dir {
            let entry = entry.map_err(|e| WalletError::io(IoOp::Scan, backup_dir, e))?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if !pattern.is_match(name) {
                continue;
            }
            let meta = entry.metadata().map_err(|e| WalletError::io(IoOp::Scan, entry.path(), e))?;
            if !meta.is_file() {
                continue;
            }
            let timestamp = meta.modified().map_err(|e| WalletError::io(IoOp::Scan, entry.path(), e))?;
            entries.push(BackupEntry { source_path: source.to_path_buf(), backup_path: entry.path(), timestamp });
        }

        entries.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then_with(|| b.backup_path.cmp(&a.backup_path)));
        Ok(Self { source_path: source.to_path_buf(), entries })
    }

    pub fn source_path(&self) -> &Path {
        &self.source_path
    }

    pub fn entries(&self) -> &[BackupEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Delete everything past the `keep` newest. Returns what was evicted;
    /// entries that fail to delete are logged and stay in the set.
    pub fn enforce(&mut self, keep: usize) -> Vec<BackupEntry> {
        if self.entries.len() <= keep {
            return Vec::new();
        }
        let evicted = self.entries.split_off(keep);
        let mut removed = Vec::with_capacity(evicted.len());
        for entry in evicted {
            match fs::remove_file(&entry.backup_path) {
                Ok(()) => {
                    debug!(backup = %entry.backup_path.display(), "old backup removed");
                    removed.push(entry);
                }
                Err(e) => {
                    warn!(backup = %entry.backup_path.display(), error = %e, "failed to remove old backup");
                    self.entries.push(entry);
                }
            }
        }
        removed
    }
}

fn backup_pattern(source: &Path) -> WalletResult<Regex> {
    let name = paths::wallet_name(source).ok_or_else(|| WalletError::InvalidPath(source.to_path_buf()))?;
    let pattern = match paths::extension(source) {
        Some(ext) => format!("^{}.*\\.{}$", regex::escape(&name), regex::escape(ext)),
        None => format!("^{}.*$", regex::escape(&name)),
    };
    Regex::new(&pattern).map_err(|_| WalletError::InvalidPath(source.to_path_buf()))
}
