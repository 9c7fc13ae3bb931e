//! Walletfile: the wallet-file lifecycle of a desktop wallet.
//!
//! Locked open and save, atomic promotion of saves, and timestamped backups
//! with bounded retention. The wallet engine (keys, balances, transactions)
//! sits behind a trait; the crate drives it and routes its completions.
//!
//! # Architecture
//!
//! ```text
//! UI / CLI
//!   │  open, save, backup, change_password, send, close, reset
//!   ▼
//! WalletSession ───────────────► WalletFileManager
//!   │   ▲                          ├── lock (one holder at a time)
//!   │   │ EngineEvent queue        ├── backup_on_open + retention (10)
//!   ▼   │                          └── commit_save (.temp → wallet)
//! WalletEngine (LocalEngine)
//!   │
//!   └──► SessionSignal queue ──► UI
//! ```
//!
//! # Files
//!
//! | Path | Role |
//! |------|------|
//! | `<data_dir>/wallet.wallet` | primary wallet file |
//! | `<wallet>.temp` | in-flight save |
//! | `<data_dir>/backup/<name>.<dd-mm-yyyy-HH-MM>.<ext>` | backup taken on open |
//! | `<data_dir>/settings.json` | wallet path and encryption flag |
//!
//! # Usage
//!
//! ```ignore
//! use walletfile::{WalletConfig, WalletSession};
//!
//! let (mut session, mut signals) = WalletSession::local(WalletConfig::new("/tmp/wallet"));
//! session.open("").await?;
//! session.settle().await;
//! session.backup("/tmp/snapshot").await?;
//! session.close().await?;
//! ```

pub mod clock;
pub mod core;
pub mod engine;
pub mod error;
pub mod file;
pub mod logging;
pub mod runtime;
pub mod session;

pub use clock::{Clock, ManualClock, SystemClock};
pub use engine::{
    AccountKeys, EngineError, EngineErrorCode, EngineEvent, EngineFactory, LegacyImporter, LocalEngine,
    LocalEngineFactory, LocalLegacyImporter, SaveOptions, TransactionId, Transfer, WalletEngine, WalletTransaction,
};
pub use error::{IoOp, WalletError, WalletResult};
pub use file::{BackupEntry, FileMode, PendingSave, RetentionSet, SaveKind, WalletFileHandle, WalletFileManager};
pub use runtime::{install_signal_handlers, run_session, Shutdown};
pub use session::{LifecycleState, SessionSignal, Settings, SettingsStore, WalletConfig, WalletSession, Wakeup};
