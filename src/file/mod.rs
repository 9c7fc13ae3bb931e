//! WalletFileManager - serialized access to the wallet file
//!
//! One lock guards the wallet file. Every operation that touches it (load,
//! save, backup, commit, legacy import) takes the lock first and frees it on
//! every exit path. Handles carry the lock guard, so a handle that goes out
//! of scope on an error path still frees it.
//!
//! ```text
//! acquire(path, mode) ── lock ──► open ──► WalletFileHandle
//!                                   │ fails
//!                                   └──► lock freed, error returned
//! release(handle) ── flush + sync ──► close ──► lock freed
//! ```
//!
//! Waiting for the lock has no timeout.

mod backup;
mod commit;
mod handle;

pub use backup::{take_backup, BackupEntry, RetentionSet};
pub use commit::{PendingSave, SaveKind};
pub use handle::{FileMode, WalletFileHandle};

use crate::clock::{Clock, SystemClock};
use crate::core::paths;
use crate::engine::LegacyImporter;
use crate::error::{WalletError, WalletResult};
use crate::session::WalletConfig;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info, warn};

/// Lock held without an open file, e.g. for the length of a send.
pub type FileLockGuard = OwnedMutexGuard<()>;

pub struct WalletFileManager {
    lock: Arc<Mutex<()>>,
    backup_dir: PathBuf,
    max_backups: usize,
    clock: Arc<dyn Clock>,
}

impl WalletFileManager {
    pub fn new(backup_dir: impl Into<PathBuf>) -> Self {
        Self {
            lock: Arc::new(Mutex::new(())),
            backup_dir: backup_dir.into(),
            max_backups: paths::MAX_BACKUPS,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn from_config(config: &WalletConfig, clock: Arc<dyn Clock>) -> Self {
        Self::new(config.backup_dir()).with_max_backups(config.max_backups).with_clock(clock)
    }

    /// At least one backup is always kept.
    pub fn with_max_backups(mut self, max: usize) -> Self {
        self.max_backups = max.max(1);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn backup_dir(&self) -> &Path {
        &self.backup_dir
    }

    pub fn max_backups(&self) -> usize {
        self.max_backups
    }

    /// Lock, then open `path`. The lock is dropped again if the open fails.
    pub async fn acquire(&self, path: &Path, mode: FileMode) -> WalletResult<WalletFileHandle> {
        if path.as_os_str().is_empty() {
            return Err(WalletError::EmptyPath);
        }
        let guard = self.lock.clone().lock_owned().await;
        WalletFileHandle::open(path, mode, guard)
    }

    pub fn release(&self, handle: WalletFileHandle) -> WalletResult<()> {
        handle.release()
    }

    /// Take the lock without opening anything.
    pub async fn hold(&self) -> FileLockGuard {
        self.lock.clone().lock_owned().await
    }

    pub fn is_locked(&self) -> bool {
        self.lock.try_lock().is_err()
    }

    /// Copy `primary` into the backup directory.
    ///
    /// Never fails: a copy problem is logged and the open goes on without a
    /// backup. Trimming is left to [`WalletFileManager::rotate_backups`], once
    /// the open is known to be genuine.
    pub async fn backup_on_open(&self, primary: &Path) -> Option<BackupEntry> {
        let _guard = self.hold().await;
        match take_backup(primary, &self.backup_dir, self.clock.now()) {
            Ok(entry) => Some(entry),
            Err(e) => {
                warn!(wallet = %primary.display(), error = %e, "wallet backup failed");
                None
            }
        }
    }

    /// Trim the backups of `primary` to the newest `max_backups`.
    pub async fn rotate_backups(&self, primary: &Path) -> Vec<BackupEntry> {
        let _guard = self.hold().await;
        match RetentionSet::scan(&self.backup_dir, primary) {
            Ok(mut set) => {
                let removed = set.enforce(self.max_backups);
                if !removed.is_empty() {
                    info!(removed = removed.len(), kept = set.len(), "backups rotated");
                }
                removed
            }
            Err(e) => {
                warn!(dir = %self.backup_dir.display(), error = %e, "backup scan failed");
                Vec::new()
            }
        }
    }

    /// Current backups of `primary`, newest first.
    pub fn retention_set(&self, primary: &Path) -> WalletResult<RetentionSet> {
        RetentionSet::scan(&self.backup_dir, primary)
    }

    /// Promote or discard a finished save under the file lock.
    pub async fn commit_save(&self, pending: &PendingSave, succeeded: bool) -> WalletResult<()> {
        let _guard = self.hold().await;
        commit::commit(pending, succeeded)
    }

    /// Convert a legacy `.keys` file into `<name>.wallet` next to it.
    ///
    /// The import is written to `<name>.wallet.temp` and promoted only once
    /// it succeeds. A failed import discards the temp file and leaves any
    /// existing `<name>.wallet` as it was.
    pub async fn import_legacy(
        &self,
        legacy: &Path,
        password: &str,
        importer: &dyn LegacyImporter,
    ) -> WalletResult<PathBuf> {
        let target = paths::legacy_target(legacy);
        if target == legacy {
            return Err(WalletError::InvalidPath(legacy.to_path_buf()));
        }
        let pending = PendingSave::primary(&target);
        let mut handle = self.acquire(&pending.temp_path, FileMode::Write).await?;
        if let Err(err) = importer.import(legacy, password, &mut handle) {
            drop(handle);
            let _guard = self.hold().await;
            commit::commit(&pending, false)?;
            debug!(path = %pending.temp_path.display(), "partial import discarded");
            return Err(err.into());
        }
        let _guard = handle.into_guard()?;
        commit::commit(&pending, true)?;
        info!(from = %legacy.display(), to = %target.display(), "legacy keys imported");
        Ok(target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::engine::{AccountKeys, EngineErrorCode, EngineResult, LocalEngine, LocalLegacyImporter, WalletEngine};
    use crate::error::IoOp;
    use chrono::{Duration, Local, TimeZone};
    use std::fs;
    use std::io::{Read, Write};
    use tempfile::TempDir;

    fn manager(dir: &TempDir) -> (WalletFileManager, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(Local.with_ymd_and_hms(2026, 10, 17, 9, 0, 0).unwrap()));
        let manager = WalletFileManager::new(dir.path().join("backup")).with_clock(clock.clone());
        (manager, clock)
    }

    #[tokio::test]
    async fn acquire_holds_lock_until_release() {
        let dir = TempDir::new().expect("tempdir");
        let (files, _) = manager(&dir);
        let path = dir.path().join("wallet.wallet");

        let mut handle = files.acquire(&path, FileMode::Write).await.unwrap();
        assert!(files.is_locked());
        handle.write_all(b"data").unwrap();
        files.release(handle).unwrap();
        assert!(!files.is_locked());

        let mut handle = files.acquire(&path, FileMode::Read).await.unwrap();
        let mut buf = String::new();
        handle.read_to_string(&mut buf).unwrap();
        assert_eq!(buf, "data");
    }

    #[tokio::test]
    async fn failed_open_frees_lock() {
        let dir = TempDir::new().expect("tempdir");
        let (files, _) = manager(&dir);

        let err = files.acquire(&dir.path().join("missing.wallet"), FileMode::Read).await.unwrap_err();
        assert!(matches!(err, WalletError::Io { op: IoOp::Open, .. }));
        assert!(!files.is_locked());

        assert!(matches!(files.acquire(Path::new(""), FileMode::Read).await, Err(WalletError::EmptyPath)));
        assert!(!files.is_locked());
    }

    #[tokio::test]
    async fn dropped_handle_frees_lock() {
        let dir = TempDir::new().expect("tempdir");
        let (files, _) = manager(&dir);
        let path = dir.path().join("wallet.wallet");

        let result: WalletResult<()> = async {
            let _handle = files.acquire(&path, FileMode::Write).await?;
            Err(WalletError::Cancelled)
        }
        .await;
        assert!(result.is_err());
        assert!(!files.is_locked());
    }

    #[tokio::test]
    async fn backup_on_open_copies_and_rotation_trims() {
        let dir = TempDir::new().expect("tempdir");
        let (files, clock) = manager(&dir);
        let files = files.with_max_backups(3);
        let path = dir.path().join("wallet.wallet");
        fs::write(&path, b"{}").unwrap();

        for _ in 0..5 {
            assert!(files.backup_on_open(&path).await.is_some());
            clock.advance(Duration::minutes(1));
        }
        assert_eq!(files.retention_set(&path).unwrap().len(), 5);

        let removed = files.rotate_backups(&path).await;
        assert_eq!(removed.len(), 2);
        assert_eq!(files.retention_set(&path).unwrap().len(), 3);
        assert!(!files.is_locked());
    }

    #[tokio::test]
    async fn zero_retention_keeps_newest_backup() {
        let dir = TempDir::new().expect("tempdir");
        let (files, _) = manager(&dir);
        let files = files.with_max_backups(0);
        assert_eq!(files.max_backups(), 1);

        let path = dir.path().join("wallet.wallet");
        fs::write(&path, b"{}").unwrap();
        let entry = files.backup_on_open(&path).await.unwrap();
        assert!(files.rotate_backups(&path).await.is_empty());
        assert!(entry.backup_path.exists());
    }

    #[tokio::test]
    async fn backup_of_missing_file_is_skipped() {
        let dir = TempDir::new().expect("tempdir");
        let (files, _) = manager(&dir);
        assert!(files.backup_on_open(&dir.path().join("nope.wallet")).await.is_none());
        assert!(!files.is_locked());
    }

    struct FailingImporter;

    impl LegacyImporter for FailingImporter {
        fn import(&self, _: &Path, _: &str, sink: &mut dyn Write) -> EngineResult<()> {
            let _ = sink.write_all(b"partial");
            Err(EngineErrorCode::InternalWalletError.into())
        }
    }

    #[tokio::test]
    async fn failed_import_removes_partial_target() {
        let dir = TempDir::new().expect("tempdir");
        let (files, _) = manager(&dir);
        let legacy = dir.path().join("old.keys");
        fs::write(&legacy, b"{}").unwrap();

        let err = files.import_legacy(&legacy, "", &FailingImporter).await.unwrap_err();
        assert!(matches!(err, WalletError::Engine(_)));
        assert!(!dir.path().join("old.wallet").exists());
        assert!(!dir.path().join("old.wallet.temp").exists());
        assert!(!files.is_locked());
    }

    #[tokio::test]
    async fn failed_import_keeps_existing_wallet() {
        let dir = TempDir::new().expect("tempdir");
        let (files, _) = manager(&dir);
        let legacy = dir.path().join("old.keys");
        fs::write(&legacy, b"{}").unwrap();
        let existing = dir.path().join("old.wallet");
        fs::write(&existing, b"existing wallet").unwrap();

        assert!(files.import_legacy(&legacy, "", &FailingImporter).await.is_err());
        assert_eq!(fs::read(&existing).unwrap(), b"existing wallet");
        assert!(!dir.path().join("old.wallet.temp").exists());
        assert!(!files.is_locked());
    }

    #[tokio::test]
    async fn import_writes_wallet_next_to_keys() {
        let dir = TempDir::new().expect("tempdir");
        let (files, _) = manager(&dir);
        let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
        let mut engine = LocalEngine::new(tx, 0);
        engine.init_and_generate("").unwrap();
        let keys: AccountKeys = engine.account_keys().unwrap();
        let legacy = dir.path().join("old.keys");
        LocalLegacyImporter::write_keys(&legacy, &keys, "pw").unwrap();

        let target = files.import_legacy(&legacy, "pw", &LocalLegacyImporter).await.unwrap();
        assert_eq!(target, dir.path().join("old.wallet"));
        assert!(target.exists());

        let imported = fs::read(&target).unwrap();
        let err = files.import_legacy(&legacy, "bad", &LocalLegacyImporter).await.unwrap_err();
        assert!(err.is_wrong_password());
        assert_eq!(fs::read(&target).unwrap(), imported);
        assert!(!dir.path().join("old.wallet.temp").exists());
    }
}
