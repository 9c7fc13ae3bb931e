//! Signals the session sends to its UI consumer.

use super::LifecycleState;
use crate::engine::TransactionId;
use serde::Serialize;
use tokio::sync::mpsc;

pub type SignalSender = mpsc::UnboundedSender<SessionSignal>;
pub type SignalReceiver = mpsc::UnboundedReceiver<SessionSignal>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "signal", rename_all = "snake_case")]
pub enum SessionSignal {
    /// Human-readable status line ("Opening wallet", "Ready", ...).
    StateChanged { text: String },
    LifecycleChanged { from: LifecycleState, to: LifecycleState },
    /// The password was wrong; ask again.
    OpenWithPassword { was_encrypted: bool },
    InitCompleted { error: Option<String> },
    CloseCompleted,
    SaveCompleted { error: Option<String>, snapshot: bool },
    ActualBalanceUpdated { balance: u64 },
    PendingBalanceUpdated { balance: u64 },
    AddressUpdated { address: String },
    ReloadTransactions,
    SynchronizationProgress { current: u32, total: u32 },
    SynchronizationCompleted { error: Option<String> },
    TransactionCreated { id: TransactionId },
    TransactionUpdated { id: TransactionId },
    SendTransactionCompleted { id: TransactionId, error: Option<String> },
}

impl SessionSignal {
    pub fn state_changed(text: impl Into<String>) -> Self {
        SessionSignal::StateChanged { text: text.into() }
    }
}
