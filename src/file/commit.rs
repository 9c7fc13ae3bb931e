//! Promotion of finished saves.
//!
//! Every save is written to `<dest>.temp` first. A primary save replaces the
//! wallet file by remove-then-rename; a snapshot is copied to its destination
//! and never touches the primary.

use crate::core::paths;
use crate::error::{IoOp, WalletError, WalletResult};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveKind {
    Primary,
    Snapshot,
}

/// A save whose bytes are on disk in `temp_path` but not yet committed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingSave {
    pub temp_path: PathBuf,
    pub final_path: PathBuf,
    pub kind: SaveKind,
}

impl PendingSave {
    pub fn primary(wallet_file: &Path) -> Self {
        Self { temp_path: paths::temp_path(wallet_file), final_path: wallet_file.to_path_buf(), kind: SaveKind::Primary }
    }

    pub fn snapshot(destination: &Path) -> Self {
        Self {
            temp_path: paths::temp_path(destination),
            final_path: destination.to_path_buf(),
            kind: SaveKind::Snapshot,
        }
    }

    pub fn is_backup_copy(&self) -> bool {
        self.kind == SaveKind::Snapshot
    }
}

/// Finish `pending`. A failed write only discards the temp file.
pub(crate) fn commit(pending: &PendingSave, succeeded: bool) -> WalletResult<()> {
    if !succeeded {
        discard(&pending.temp_path);
        return Ok(());
    }
    match pending.kind {
        SaveKind::Primary => promote(&pending.temp_path, &pending.final_path),
        SaveKind::Snapshot => {
            let copied = copy_out(&pending.temp_path, &pending.final_path);
            discard(&pending.temp_path);
            copied
        }
    }
}

fn promote(temp: &Path, target: &Path) -> WalletResult<()> {
    match fs::remove_file(target) {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => return Err(WalletError::io(IoOp::Remove, target, e)),
    }
    fs::rename(temp, target).map_err(|e| WalletError::io(IoOp::Rename, temp, e))?;
    debug!(path = %target.display(), "save promoted");
    Ok(())
}

fn copy_out(temp: &Path, destination: &Path) -> WalletResult<()> {
    fs::copy(temp, destination).map_err(|e| WalletError::io(IoOp::Copy, destination, e))?;
    debug!(path = %destination.display(), "snapshot written");
    Ok(())
}

fn discard(temp: &Path) {
    match fs::remove_file(temp) {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => warn!(path = %temp.display(), error = %e, "failed to discard temp file"),
    }
}
