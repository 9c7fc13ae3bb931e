//! Lock-guarded wallet file handle.

use crate::error::{IoOp, WalletError, WalletResult};
use std::fs::File;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use tokio::sync::OwnedMutexGuard;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileMode {
    Read,
    /// Create or truncate.
    Write,
}

impl FileMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileMode::Read => "read",
            FileMode::Write => "write",
        }
    }
}

/// Exclusive handle on one wallet file.
///
/// The file lock is held for as long as the handle lives. Dropping it closes
/// the file and then frees the lock; [`WalletFileHandle::release`] does the
/// same but also syncs writes and reports the outcome.
#[derive(Debug)]
pub struct WalletFileHandle {
    // Field order matters: the file is closed before the lock is freed.
    file: File,
    path: PathBuf,
    mode: FileMode,
    _guard: OwnedMutexGuard<()>,
}

impl WalletFileHandle {
    pub(crate) fn open(path: &Path, mode: FileMode, guard: OwnedMutexGuard<()>) -> WalletResult<Self> {
        let file = match mode {
            FileMode::Read => File::open(path),
            FileMode::Write => File::create(path),
        }
        .map_err(|e| WalletError::io(IoOp::Open, path, e))?;
        debug!(path = %path.display(), mode = mode.as_str(), "wallet file acquired");
        Ok(Self { file, path: path.to_path_buf(), mode, _guard: guard })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn mode(&self) -> FileMode {
        self.mode
    }

    pub fn release(self) -> WalletResult<()> {
        self.into_guard().map(drop)
    }

    /// Sync and close the file but keep holding the lock.
    pub(crate) fn into_guard(self) -> WalletResult<OwnedMutexGuard<()>> {
        let Self { mut file, path, mode, _guard: guard } = self;
        let synced = match mode {
            FileMode::Write => file
                .flush()
                .map_err(|e| WalletError::io(IoOp::Write, &path, e))
                .and_then(|()| file.sync_all().map_err(|e| WalletError::io(IoOp::Sync, &path, e))),
            FileMode::Read => Ok(()),
        };
        drop(file);
        synced?;
        debug!(path = %path.display(), "wallet file released");
        Ok(guard)
    }
}

impl Read for WalletFileHandle {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.file.read(buf)
    }
}

impl Write for WalletFileHandle {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.file.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}
