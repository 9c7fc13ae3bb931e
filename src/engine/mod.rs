//! Wallet engine seam.
//!
//! The engine owns keys, balances and transaction history. This crate only
//! drives it: it hands the engine a locked file to load from or save into and
//! consumes the [`EngineEvent`]s the engine pushes back.
//!
//! ```text
//! WalletSession ── init_and_load / save / send ──► WalletEngine
//!       ▲                                               │
//!       └──────────── EngineEvent (mpsc queue) ◄────────┘
//! ```
//!
//! Events are drained in delivery order by the session on its owning task,
//! so engine threads never touch session state directly.

mod error;
mod legacy;
mod local;

pub use error::{EngineError, EngineErrorCode, EngineResult};
pub use legacy::{LegacyImporter, LocalLegacyImporter};
pub use local::{LocalEngine, LocalEngineFactory};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::{Read, Write};
use tokio::sync::mpsc;
use zeroize::{Zeroize, ZeroizeOnDrop};

pub type TransactionId = u64;

pub type EventSender = mpsc::UnboundedSender<EngineEvent>;
pub type EventReceiver = mpsc::UnboundedReceiver<EngineEvent>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transfer {
    pub address: String,
    pub amount: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletTransaction {
    pub id: TransactionId,
    /// Net effect on the balance; outgoing transactions are negative.
    pub total_amount: i64,
    pub fee: u64,
    pub transfers: Vec<Transfer>,
    pub payment_id: Option<String>,
    pub timestamp: i64,
}

impl WalletTransaction {
    pub fn transfer_count(&self) -> usize {
        self.transfers.len()
    }
}

/// Hex-encoded key pairs of an account.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct AccountKeys {
    pub spend_public_key: String,
    pub spend_secret_key: String,
    pub view_public_key: String,
    pub view_secret_key: String,
}

impl fmt::Debug for AccountKeys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccountKeys")
            .field("spend_public_key", &self.spend_public_key)
            .field("view_public_key", &self.view_public_key)
            .finish_non_exhaustive()
    }
}

/// What a save writes: transaction details and/or the balance cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SaveOptions {
    pub details: bool,
    pub cache: bool,
}

impl SaveOptions {
    pub const FULL: SaveOptions = SaveOptions { details: true, cache: true };
    pub const SNAPSHOT: SaveOptions = SaveOptions { details: true, cache: false };
    pub const BARE: SaveOptions = SaveOptions { details: false, cache: false };
}

/// Completion and notification messages pushed by the engine.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    InitCompleted(EngineResult<()>),
    SaveCompleted(EngineResult<()>),
    SynchronizationProgress { current: u32, total: u32 },
    SynchronizationCompleted(EngineResult<()>),
    ActualBalanceUpdated(u64),
    PendingBalanceUpdated(u64),
    ExternalTransactionCreated(TransactionId),
    TransactionUpdated(TransactionId),
    SendTransactionCompleted { id: TransactionId, result: EngineResult<()> },
}

/// Wallet engine driven by the session.
///
/// `init_*`, `save` and `send_transaction` report their outcome through the
/// event queue. An `Err` return means the call was rejected before any work
/// was scheduled and no completion event will follow.
pub trait WalletEngine: Send {
    fn init_and_load(&mut self, source: &mut dyn Read, password: &str) -> EngineResult<()>;
    fn init_and_generate(&mut self, password: &str) -> EngineResult<()>;
    fn init_with_keys(&mut self, keys: &AccountKeys, password: &str) -> EngineResult<()>;

    /// Write the wallet into `sink`. The write itself is complete when this
    /// returns `Ok`; `SaveCompleted` follows on the queue.
    fn save(&mut self, sink: &mut dyn Write, options: SaveOptions) -> EngineResult<()>;

    fn change_password(&mut self, old: &str, new: &str) -> EngineResult<()>;

    fn send_transaction(
        &mut self,
        transfers: &[Transfer],
        fee: u64,
        payment_id: Option<&str>,
        mixin: u64,
    ) -> EngineResult<TransactionId>;

    fn address(&self) -> EngineResult<String>;
    fn actual_balance(&self) -> EngineResult<u64>;
    fn pending_balance(&self) -> EngineResult<u64>;
    fn transaction_count(&self) -> EngineResult<usize>;
    fn transfer_count(&self) -> EngineResult<usize>;
    fn transaction(&self, id: TransactionId) -> EngineResult<Option<WalletTransaction>>;
    fn transfer(&self, index: usize) -> EngineResult<Option<Transfer>>;
    fn account_keys(&self) -> EngineResult<AccountKeys>;

    /// Stop posting events. Called before the engine is dropped.
    fn shutdown(&mut self);
}

/// Creates one engine per open wallet, wired to the session's event queue.
pub trait EngineFactory: Send + Sync {
    fn create(&self, events: EventSender) -> Box<dyn WalletEngine>;
}
