//! Path and file-name constants for the wallet data directory
//!
//! Layout:
//!
//! ```text
//! <data_dir>/
//!   ├── settings.json
//!   ├── wallet.wallet          primary wallet file
//!   ├── wallet.wallet.temp     in-flight save, promoted on success
//!   └── backup/
//!         └── wallet.17-10-2026-09-05.wallet
//! ```

use std::ffi::OsString;
use std::path::{Path, PathBuf};

pub const BACKUP_DIR: &str = "backup";
pub const SETTINGS_FILE: &str = "settings.json";
pub const DEFAULT_WALLET_FILE: &str = "wallet.wallet";

pub const TEMP_SUFFIX: &str = ".temp";
pub const WALLET_EXTENSION: &str = "wallet";
pub const LEGACY_EXTENSION: &str = "keys";

/// Number of backups kept per wallet name.
pub const MAX_BACKUPS: usize = 10;

/// One-minute granularity: opens within the same minute share a backup.
pub const BACKUP_TIMESTAMP_FORMAT: &str = "%d-%m-%Y-%H-%M";

/// `<path>.temp`, next to the file it will replace.
pub fn temp_path(path: &Path) -> PathBuf {
    let mut name: OsString = path.as_os_str().to_owned();
    name.push(TEMP_SUFFIX);
    PathBuf::from(name)
}

/// Wallet name used for backup grouping: the file name up to its first dot.
pub fn wallet_name(path: &Path) -> Option<String> {
    let file_name = path.file_name()?.to_str()?;
    let name = file_name.split('.').next().unwrap_or(file_name);
    if name.is_empty() {
        None
    } else {
        Some(name.to_string())
    }
}

pub fn extension(path: &Path) -> Option<&str> {
    path.extension().and_then(|e| e.to_str())
}

pub fn is_legacy(path: &Path) -> bool {
    extension(path) == Some(LEGACY_EXTENSION)
}

/// `foo.keys` -> `foo.wallet`. Other paths are returned unchanged.
pub fn legacy_target(path: &Path) -> PathBuf {
    if is_legacy(path) {
        path.with_extension(WALLET_EXTENSION)
    } else {
        path.to_path_buf()
    }
}

/// Append `.wallet` unless the path already ends with it.
pub fn ensure_wallet_extension(path: &Path) -> PathBuf {
    if extension(path) == Some(WALLET_EXTENSION) {
        return path.to_path_buf();
    }
    let mut name: OsString = path.as_os_str().to_owned();
    name.push(".");
    name.push(WALLET_EXTENSION);
    PathBuf::from(name)
}

/// `wallet.wallet` + `17-10-2026-09-05` -> `wallet.17-10-2026-09-05.wallet`.
///
/// The stamp is inserted before the final extension; files without one get
/// the stamp appended.
pub fn backup_file_name(source: &Path, stamp: &str) -> Option<String> {
    let file_name = source.file_name()?.to_str()?;
    match extension(source) {
        Some(ext) => {
            let stem = &file_name[..file_name.len() - ext.len() - 1];
            Some(format!("{stem}.{stamp}.{ext}"))
        }
        None => Some(format!("{file_name}.{stamp}")),
    }
}
