//! Session lifecycle: open, wrong password, saves, snapshots, legacy import,
//! sends and the lock discipline around them.

use chrono::{Local, TimeZone};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;
use walletfile::engine::EngineEvent;
use walletfile::session::SignalReceiver;
use walletfile::{
    AccountKeys, LifecycleState, LocalEngineFactory, LocalLegacyImporter, ManualClock, SessionSignal, Transfer,
    WalletConfig, WalletError, WalletSession,
};

const OPENING_BALANCE: u64 = 10_000;

fn session_with(config: WalletConfig) -> (WalletSession, SignalReceiver) {
    let clock = Arc::new(ManualClock::new(Local.with_ymd_and_hms(2026, 10, 17, 9, 30, 0).unwrap()));
    WalletSession::new(
        config,
        Arc::new(LocalEngineFactory::new().with_opening_balance(OPENING_BALANCE)),
        Arc::new(LocalLegacyImporter),
        clock,
    )
}

fn session(dir: &TempDir) -> (WalletSession, SignalReceiver) {
    session_with(WalletConfig::new(dir.path()))
}

fn drain(rx: &mut SignalReceiver) -> Vec<SessionSignal> {
    let mut out = Vec::new();
    while let Ok(signal) = rx.try_recv() {
        out.push(signal);
    }
    out
}

fn transitions(signals: &[SessionSignal]) -> Vec<(LifecycleState, LifecycleState)> {
    signals
        .iter()
        .filter_map(|s| match s {
            SessionSignal::LifecycleChanged { from, to } => Some((*from, *to)),
            _ => None,
        })
        .collect()
}

fn temp_files(dir: &Path) -> Vec<PathBuf> {
    fs::read_dir(dir)
        .unwrap()
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.to_string_lossy().ends_with(".temp"))
        .collect()
}

/// Generate a wallet on disk and unload it again.
async fn create_wallet(dir: &TempDir, password: &str) {
    let (mut session, _rx) = session(dir);
    session.open("").await.expect("open");
    session.settle().await;
    if !password.is_empty() {
        session.change_password("", password).await.expect("change password");
        session.settle().await;
    }
    session.close().await.expect("close");
}

#[tokio::test]
async fn open_existing_wallet_takes_backup_and_loads() {
    let dir = TempDir::new().expect("tempdir");
    create_wallet(&dir, "").await;

    let (mut session, mut rx) = session(&dir);
    session.open("").await.unwrap();
    session.settle().await;

    assert_eq!(session.state(), LifecycleState::Loaded);
    assert!(dir.path().join("backup").join("wallet.17-10-2026-09-30.wallet").exists());
    let signals = drain(&mut rx);
    assert_eq!(
        transitions(&signals)[..2],
        [
            (LifecycleState::Closed, LifecycleState::Opening),
            (LifecycleState::Opening, LifecycleState::Loaded),
        ]
    );
    assert!(signals.contains(&SessionSignal::state_changed("Opening wallet")));
    assert!(signals.contains(&SessionSignal::ReloadTransactions));
    assert!(signals.contains(&SessionSignal::InitCompleted { error: None }));
    assert_eq!(session.actual_balance(), OPENING_BALANCE);
}

#[tokio::test]
async fn wrong_password_reprompts_without_deleting_backups() {
    let dir = TempDir::new().expect("tempdir");
    create_wallet(&dir, "secret").await;
    let backup_dir = dir.path().join("backup");
    fs::create_dir_all(&backup_dir).unwrap();
    let older = backup_dir.join("wallet.16-10-2026-08-00.wallet");
    fs::write(&older, b"{}").unwrap();

    let (mut session, mut rx) = session(&dir);
    session.open("guess").await.unwrap();
    session.settle().await;

    assert_eq!(session.state(), LifecycleState::Closed);
    assert!(session.is_encrypted());
    assert!(older.exists());
    assert!(session.account_keys().is_none());
    let signals = drain(&mut rx);
    assert!(signals.contains(&SessionSignal::OpenWithPassword { was_encrypted: true }));
    assert!(signals.iter().any(|s| matches!(s, SessionSignal::InitCompleted { error: Some(_) })));

    // Re-prompted password works.
    session.open("secret").await.unwrap();
    session.settle().await;
    assert_eq!(session.state(), LifecycleState::Loaded);
}

#[tokio::test]
async fn wrong_password_at_full_retention_deletes_no_backup() {
    let dir = TempDir::new().expect("tempdir");
    create_wallet(&dir, "secret").await;
    let backup_dir = dir.path().join("backup");
    fs::create_dir_all(&backup_dir).unwrap();
    let planted: Vec<PathBuf> = (0..10)
        .map(|minute| backup_dir.join(format!("wallet.16-10-2026-08-{minute:02}.wallet")))
        .collect();
    for path in &planted {
        fs::write(path, b"{}").unwrap();
    }

    let (mut session, mut rx) = session(&dir);
    session.open("guess").await.unwrap();
    session.settle().await;

    assert_eq!(session.state(), LifecycleState::Closed);
    assert!(drain(&mut rx).contains(&SessionSignal::OpenWithPassword { was_encrypted: true }));
    assert!(planted.iter().all(|p| p.exists()));
    assert_eq!(session.backups().unwrap().len(), 11);

    session.open("secret").await.unwrap();
    session.settle().await;
    assert_eq!(session.state(), LifecycleState::Loaded);
    assert_eq!(session.backups().unwrap().len(), 10);
    assert!(backup_dir.join("wallet.17-10-2026-09-30.wallet").exists());
}

#[tokio::test]
async fn empty_password_on_encrypted_wallet_reports_not_encrypted_attempt() {
    let dir = TempDir::new().expect("tempdir");
    create_wallet(&dir, "secret").await;

    let (mut session, mut rx) = session(&dir);
    session.open("").await.unwrap();
    session.settle().await;
    assert!(drain(&mut rx).contains(&SessionSignal::OpenWithPassword { was_encrypted: false }));
    assert!(session.is_encrypted());
}

#[tokio::test]
async fn snapshot_never_replaces_primary() {
    let dir = TempDir::new().expect("tempdir");
    create_wallet(&dir, "").await;
    let primary = dir.path().join("wallet.wallet");

    let (mut session, mut rx) = session(&dir);
    session.open("").await.unwrap();
    session.settle().await;
    drain(&mut rx);
    let before = fs::read(&primary).unwrap();

    let snapshot = session.backup(dir.path().join("snapshot")).await.unwrap();
    assert_eq!(snapshot, dir.path().join("snapshot.wallet"));
    assert_eq!(session.state(), LifecycleState::Loaded);
    session.settle().await;

    assert_eq!(fs::read(&primary).unwrap(), before);
    assert!(snapshot.exists());
    assert_eq!(session.state(), LifecycleState::Loaded);
    assert!(temp_files(dir.path()).is_empty());
    assert!(drain(&mut rx).contains(&SessionSignal::SaveCompleted { error: None, snapshot: true }));

    // A normal save does replace it.
    session.change_password("", "new").await.unwrap();
    session.settle().await;
    assert_eq!(session.state(), LifecycleState::Saved);
    assert_ne!(fs::read(&primary).unwrap(), before);
    assert!(temp_files(dir.path()).is_empty());

    // The snapshot still opens with the old (empty) password.
    let (mut copy, _rx) = session_with(WalletConfig::new(dir.path()).with_wallet_file(&snapshot));
    copy.open("").await.unwrap();
    copy.settle().await;
    assert!(copy.state().is_open());
    assert_eq!(copy.address(), session.address());
}

#[tokio::test]
async fn failed_snapshot_releases_lock() {
    let dir = TempDir::new().expect("tempdir");
    let (mut session, _rx) = session(&dir);
    session.open("").await.unwrap();
    session.settle().await;

    let err = session.backup(dir.path().join("missing").join("snap")).await.unwrap_err();
    assert!(matches!(err, WalletError::Io { .. }));
    assert!(!session.files().is_locked());

    // Wallet stays usable.
    session.save(true, true).await.unwrap();
    session.settle().await;
    assert_eq!(session.state(), LifecycleState::Saved);
}

#[tokio::test]
async fn legacy_keys_are_imported() {
    let dir = TempDir::new().expect("tempdir");
    let keys = {
        let (mut session, _rx) = session(&dir);
        session.open("").await.unwrap();
        session.settle().await;
        let keys: AccountKeys = session.account_keys().unwrap();
        session.close().await.unwrap();
        fs::remove_file(dir.path().join("wallet.wallet")).unwrap();
        keys
    };
    let legacy = dir.path().join("old.keys");
    LocalLegacyImporter::write_keys(&legacy, &keys, "pw").unwrap();

    let (mut session, mut rx) = session_with(WalletConfig::new(dir.path()).with_wallet_file(&legacy));
    let err = session.open("nope").await.unwrap_err();
    assert!(err.is_wrong_password());
    assert_eq!(session.state(), LifecycleState::Closed);
    assert!(drain(&mut rx).contains(&SessionSignal::OpenWithPassword { was_encrypted: true }));
    assert!(!dir.path().join("old.wallet").exists());

    session.open("pw").await.unwrap();
    session.settle().await;
    assert_eq!(session.state(), LifecycleState::Loaded);
    assert_eq!(session.wallet_file(), dir.path().join("old.wallet"));
    assert_eq!(session.account_keys().unwrap(), keys);
    assert!(dir.path().join("backup").join("old.17-10-2026-09-30.keys").exists());
    assert!(!session.files().is_locked());
}

#[tokio::test]
async fn failed_legacy_import_keeps_existing_wallet() {
    let dir = TempDir::new().expect("tempdir");
    let keys = {
        let (mut session, _rx) = session(&dir);
        session.open("").await.unwrap();
        session.settle().await;
        let keys: AccountKeys = session.account_keys().unwrap();
        session.close().await.unwrap();
        keys
    };
    let legacy = dir.path().join("old.keys");
    LocalLegacyImporter::write_keys(&legacy, &keys, "pw").unwrap();
    let existing = dir.path().join("old.wallet");
    fs::write(&existing, b"existing wallet").unwrap();

    let (mut session, _rx) = session_with(WalletConfig::new(dir.path()).with_wallet_file(&legacy));
    let err = session.open("nope").await.unwrap_err();
    assert!(err.is_wrong_password());
    assert_eq!(session.state(), LifecycleState::Closed);
    assert_eq!(fs::read(&existing).unwrap(), b"existing wallet");
    assert!(temp_files(dir.path()).is_empty());
    assert!(!session.files().is_locked());
}

#[tokio::test]
async fn corrupt_wallet_fails_open() {
    let dir = TempDir::new().expect("tempdir");
    fs::write(dir.path().join("wallet.wallet"), b"not a wallet").unwrap();

    let (mut session, mut rx) = session(&dir);
    session.open("").await.unwrap();
    session.settle().await;
    assert_eq!(session.state(), LifecycleState::FailedOpen);
    assert!(session.account_keys().is_none());
    assert!(!drain(&mut rx).iter().any(|s| matches!(s, SessionSignal::OpenWithPassword { .. })));
    assert!(!session.files().is_locked());

    session.close().await.unwrap();
    assert_eq!(session.state(), LifecycleState::Closed);
}

#[tokio::test]
async fn send_holds_lock_until_completion_and_saves() {
    let dir = TempDir::new().expect("tempdir");
    let (mut session, mut rx) = session(&dir);
    session.open("").await.unwrap();
    session.settle().await;
    drain(&mut rx);

    let transfers = vec![Transfer { address: "WFdestination".into(), amount: 1_000 }];
    let id = session.send_transaction(&transfers, 10, Some("memo"), 0).await.unwrap();
    assert!(session.files().is_locked());

    session.settle().await;
    assert!(!session.files().is_locked());
    assert_eq!(session.actual_balance(), OPENING_BALANCE - 1_010);
    assert_eq!(session.transaction_count(), 1);
    assert_eq!(session.transaction(id).unwrap().payment_id.as_deref(), Some("memo"));

    let signals = drain(&mut rx);
    assert!(signals.contains(&SessionSignal::SendTransactionCompleted { id, error: None }));
    assert!(signals.contains(&SessionSignal::TransactionCreated { id }));
    assert!(signals.contains(&SessionSignal::SaveCompleted { error: None, snapshot: false }));
}

#[tokio::test]
async fn rejected_send_releases_lock() {
    let dir = TempDir::new().expect("tempdir");
    let (mut session, _rx) = session(&dir);
    session.open("").await.unwrap();
    session.settle().await;

    let too_much = vec![Transfer { address: "WFdestination".into(), amount: 1_000_000 }];
    let err = session.send_transaction(&too_much, 0, None, 0).await.unwrap_err();
    assert!(matches!(err, WalletError::Engine(_)));
    assert!(!session.files().is_locked());
}

#[tokio::test]
async fn close_waits_for_outstanding_send() {
    let dir = TempDir::new().expect("tempdir");
    let (mut session, _rx) = session(&dir);
    session.open("").await.unwrap();
    session.settle().await;

    let transfers = vec![Transfer { address: "WFdestination".into(), amount: 2_500 }];
    session.send_transaction(&transfers, 0, None, 0).await.unwrap();
    session.close().await.unwrap();
    assert!(!session.files().is_locked());

    let (mut reopened, _rx) = self::session(&dir);
    reopened.open("").await.unwrap();
    reopened.settle().await;
    assert_eq!(reopened.actual_balance(), OPENING_BALANCE - 2_500);
    assert_eq!(reopened.transfer_count(), 1);
    assert_eq!(reopened.transfer(0).unwrap().amount, 2_500);
}

#[tokio::test]
async fn reset_drops_cached_state() {
    let dir = TempDir::new().expect("tempdir");
    let (mut session, _rx) = session(&dir);
    session.open("").await.unwrap();
    session.settle().await;
    let address = session.address();
    session.reset().await.unwrap();
    assert_eq!(session.state(), LifecycleState::Closed);

    let (mut reopened, _rx) = self::session(&dir);
    reopened.open("").await.unwrap();
    reopened.settle().await;
    assert_eq!(reopened.address(), address);
    assert_eq!(reopened.actual_balance(), 0);
}

#[tokio::test]
async fn external_transactions_buffer_until_synchronized() {
    let dir = TempDir::new().expect("tempdir");
    let (mut session, mut rx) = session(&dir);
    session.open("").await.unwrap();
    session.settle().await;
    session.pump().await;
    assert!(session.is_synchronized());
    drain(&mut rx);

    let events = session.event_sender();
    events.send(EngineEvent::ExternalTransactionCreated(1)).unwrap();
    events.send(EngineEvent::SynchronizationProgress { current: 2, total: 9 }).unwrap();
    events.send(EngineEvent::ExternalTransactionCreated(3)).unwrap();
    events.send(EngineEvent::ExternalTransactionCreated(4)).unwrap();
    events.send(EngineEvent::SynchronizationCompleted(Ok(()))).unwrap();
    assert_eq!(session.pump().await, 5);

    let created: Vec<_> = drain(&mut rx)
        .into_iter()
        .filter_map(|s| match s {
            SessionSignal::TransactionCreated { id } => Some(id),
            _ => None,
        })
        .collect();
    assert_eq!(created, vec![1, 4]);
}

#[tokio::test]
async fn create_with_keys_restores_address() {
    let dir = TempDir::new().expect("tempdir");
    let (keys, address) = {
        let (mut session, _rx) = session(&dir);
        session.open("").await.unwrap();
        session.settle().await;
        let keys = session.account_keys().unwrap();
        let address = session.address();
        session.close().await.unwrap();
        (keys, address)
    };

    let other = TempDir::new().expect("tempdir");
    let (mut session, mut rx) = session(&other);
    session.create_with_keys(&keys).await.unwrap();
    session.settle().await;
    assert_eq!(session.address(), address);
    assert!(other.path().join("wallet.wallet").exists());
    assert!(drain(&mut rx).contains(&SessionSignal::state_changed("Importing keys")));
}
