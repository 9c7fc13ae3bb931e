//! WalletSession - owns the open wallet and drives its file lifecycle
//!
//! The session is the single consumer of the engine's event queue. Commands
//! (`open`, `save`, `backup`, `send_transaction`, `close`, ...) start work;
//! completions arrive as [`EngineEvent`]s and are applied in delivery order
//! by [`WalletSession::next_event`], [`WalletSession::pump`] or
//! [`WalletSession::settle`]. UI-facing effects go out as [`SessionSignal`]s.
//!
//! Every command first settles outstanding work (a load, a save, a send), so
//! two operations never race on the wallet file.

mod config;
mod signals;
mod state;

pub use config::{default_data_dir, Settings, SettingsStore, WalletConfig, ENV_MAX_BACKUPS, ENV_ROOT, ENV_WALLET};
pub use signals::{SessionSignal, SignalReceiver, SignalSender};
pub use state::LifecycleState;

use crate::clock::{Clock, SystemClock};
use crate::core::paths;
use crate::engine::{
    AccountKeys, EngineEvent, EngineFactory, EngineResult, EventReceiver, EventSender, LegacyImporter,
    LocalEngineFactory, LocalLegacyImporter, SaveOptions, TransactionId, Transfer, WalletEngine, WalletTransaction,
};
use crate::error::{IoOp, WalletError, WalletResult};
use crate::file::{FileLockGuard, FileMode, PendingSave, RetentionSet, WalletFileManager};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Delay before a transaction seen mid-sync is announced anyway.
const NOTIFY_DELAY: Duration = Duration::from_millis(500);

/// What woke [`WalletSession::wait_event`].
#[derive(Debug)]
pub enum Wakeup {
    Event(Option<EngineEvent>),
    NotifyTimer,
}

pub struct WalletSession {
    config: WalletConfig,
    files: WalletFileManager,
    settings: SettingsStore,
    factory: Arc<dyn EngineFactory>,
    importer: Arc<dyn LegacyImporter>,
    engine: Option<Box<dyn WalletEngine>>,
    state: LifecycleState,
    events_tx: EventSender,
    events_rx: EventReceiver,
    signals: SignalSender,
    pending_save: Option<PendingSave>,
    pending_send: Option<FileLockGuard>,
    deferred_save: Option<SaveOptions>,
    /// Wallet backed up by the current open, trimmed once the load settles.
    pending_rotation: Option<PathBuf>,
    synchronized: bool,
    last_external_tx: Option<TransactionId>,
    notify_deadline: Option<Instant>,
}

impl WalletSession {
    pub fn new(
        config: WalletConfig,
        factory: Arc<dyn EngineFactory>,
        importer: Arc<dyn LegacyImporter>,
        clock: Arc<dyn Clock>,
    ) -> (Self, SignalReceiver) {
        let files = WalletFileManager::from_config(&config, clock);
        let mut settings = SettingsStore::load(config.settings_path());
        if let Some(path) = &config.wallet_file {
            if settings.wallet_file() != Some(path.as_path()) {
                settings.override_wallet_file(path.clone());
            }
        }
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (signals, signals_rx) = mpsc::unbounded_channel();
        let session = Self {
            config,
            files,
            settings,
            factory,
            importer,
            engine: None,
            state: LifecycleState::Closed,
            events_tx,
            events_rx,
            signals,
            pending_save: None,
            pending_send: None,
            deferred_save: None,
            pending_rotation: None,
            synchronized: false,
            last_external_tx: None,
            notify_deadline: None,
        };
        (session, signals_rx)
    }

    /// Session over the built-in [`crate::engine::LocalEngine`].
    pub fn local(config: WalletConfig) -> (Self, SignalReceiver) {
        Self::new(config, Arc::new(LocalEngineFactory::new()), Arc::new(LocalLegacyImporter), Arc::new(SystemClock))
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn config(&self) -> &WalletConfig {
        &self.config
    }

    pub fn files(&self) -> &WalletFileManager {
        &self.files
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    pub fn is_open(&self) -> bool {
        self.engine.is_some() && self.state.is_open()
    }

    pub fn is_encrypted(&self) -> bool {
        self.settings.is_encrypted()
    }

    pub fn is_synchronized(&self) -> bool {
        self.synchronized
    }

    pub fn wallet_file(&self) -> PathBuf {
        self.settings
            .wallet_file()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.config.default_wallet_file())
    }

    pub fn set_wallet_file(&mut self, path: impl Into<PathBuf>) {
        self.settings.set_wallet_file(path);
    }

    /// Backups of the current wallet file, newest first.
    pub fn backups(&self) -> WalletResult<RetentionSet> {
        self.files.retention_set(&self.wallet_file())
    }

    /// Sender wired to the session's engine queue.
    pub fn event_sender(&self) -> EventSender {
        self.events_tx.clone()
    }

    // =========================================================================
    // Commands
    // =========================================================================

    /// Open the configured wallet file, or generate a new wallet if it does
    /// not exist yet. Completion arrives as an `InitCompleted` event.
    pub async fn open(&mut self, password: &str) -> WalletResult<()> {
        self.settle().await;
        self.ensure_closed("open")?;

        let path = self.wallet_file();
        self.settings.set_wallet_file(&path);
        self.settings.set_encrypted(!password.is_empty());
        self.transition(LifecycleState::Opening);
        self.emit(SessionSignal::state_changed("Opening wallet"));
        self.engine = Some(self.factory.create(self.events_tx.clone()));

        if let Err(err) = self.start_open(&path, password).await {
            self.finish_rotation(err.is_wrong_password()).await;
            self.fail_open(&err);
            return Err(err);
        }
        Ok(())
    }

    async fn start_open(&mut self, path: &Path, password: &str) -> WalletResult<()> {
        if !path.exists() {
            let target = paths::legacy_target(path);
            if target != path {
                self.settings.set_wallet_file(&target);
            }
            if let Some(parent) = target.parent().filter(|p| !p.as_os_str().is_empty()) {
                fs::create_dir_all(parent).map_err(|e| WalletError::io(IoOp::CreateDir, parent, e))?;
            }
            self.settings.set_encrypted(false);
            info!(wallet = %target.display(), "generating new wallet");
            return Ok(self.engine_mut()?.init_and_generate("")?);
        }

        if self.files.backup_on_open(path).await.is_some() {
            self.pending_rotation = Some(path.to_path_buf());
        }

        let path = if paths::is_legacy(path) {
            let target = self.files.import_legacy(path, password, self.importer.as_ref()).await?;
            self.settings.set_wallet_file(&target);
            target
        } else {
            path.to_path_buf()
        };

        info!(wallet = %path.display(), "loading wallet");
        let mut handle = self.files.acquire(&path, FileMode::Read).await?;
        let loaded = self.engine_mut().and_then(|engine| Ok(engine.init_and_load(&mut handle, password)?));
        let released = self.files.release(handle);
        loaded?;
        released
    }

    /// Initialise a new wallet from existing keys.
    pub async fn create_with_keys(&mut self, keys: &AccountKeys) -> WalletResult<()> {
        self.settle().await;
        self.ensure_closed("import keys")?;

        let path = self.wallet_file();
        self.settings.set_wallet_file(path);
        self.settings.set_encrypted(false);
        self.transition(LifecycleState::Opening);
        self.emit(SessionSignal::state_changed("Importing keys"));
        self.engine = Some(self.factory.create(self.events_tx.clone()));

        let result = self.engine_mut().and_then(|engine| Ok(engine.init_with_keys(keys, "")?));
        if let Err(err) = result {
            self.fail_open(&err);
            return Err(err);
        }
        Ok(())
    }

    /// Save to the wallet file through `<wallet>.temp`.
    pub async fn save(&mut self, details: bool, cache: bool) -> WalletResult<()> {
        self.settle().await;
        let path = self.wallet_file();
        self.start_save(PendingSave::primary(&path), SaveOptions { details, cache }).await
    }

    /// Write a snapshot to `path` (`.wallet` appended if missing). The
    /// primary wallet file is not touched.
    pub async fn backup(&mut self, path: impl AsRef<Path>) -> WalletResult<PathBuf> {
        let path = path.as_ref();
        if path.as_os_str().is_empty() {
            return Err(WalletError::EmptyPath);
        }
        self.settle().await;
        let destination = paths::ensure_wallet_extension(path);
        self.start_save(PendingSave::snapshot(&destination), SaveOptions::SNAPSHOT).await?;
        Ok(destination)
    }

    pub async fn change_password(&mut self, old: &str, new: &str) -> WalletResult<()> {
        self.settle().await;
        self.ensure_open("change password")?;
        self.engine_mut()?.change_password(old, new)?;
        self.settings.set_encrypted(!new.is_empty());
        info!("wallet password changed");
        self.save(true, true).await
    }

    /// Send funds. The file lock is held until the engine reports back.
    pub async fn send_transaction(
        &mut self,
        transfers: &[Transfer],
        fee: u64,
        payment_id: Option<&str>,
        mixin: u64,
    ) -> WalletResult<TransactionId> {
        self.settle().await;
        self.ensure_open("send")?;
        let guard = self.files.hold().await;
        let id = self.engine_mut()?.send_transaction(transfers, fee, payment_id, mixin)?;
        self.pending_send = Some(guard);
        debug!(id, "transaction submitted");
        Ok(id)
    }

    /// Save everything, then unload the wallet.
    pub async fn close(&mut self) -> WalletResult<()> {
        self.shut_down(SaveOptions::FULL, "close").await
    }

    /// Save keys only, then unload the wallet.
    pub async fn reset(&mut self) -> WalletResult<()> {
        self.shut_down(SaveOptions::BARE, "reset").await
    }

    async fn shut_down(&mut self, options: SaveOptions, operation: &'static str) -> WalletResult<()> {
        self.settle().await;
        if self.engine.is_none() {
            if self.state == LifecycleState::Closed {
                return Err(WalletError::WrongState { state: self.state, operation });
            }
            self.transition(LifecycleState::Closed);
            return Ok(());
        }

        if self.state.is_open() {
            let path = self.wallet_file();
            match self.start_save(PendingSave::primary(&path), options).await {
                Ok(()) => self.settle().await,
                Err(e) => warn!(error = %e, operation, "save before unload failed"),
            }
        }

        let guard = self.files.hold().await;
        self.teardown_engine();
        self.transition(LifecycleState::Closed);
        self.emit(SessionSignal::CloseCompleted);
        drop(guard);
        info!(operation, "wallet unloaded");
        Ok(())
    }

    // =========================================================================
    // Event loop
    // =========================================================================

    /// Apply events until no load, save or send is outstanding.
    pub async fn settle(&mut self) {
        while self.is_busy() {
            let wake = self.wait_event().await;
            self.handle_wake(wake).await;
        }
    }

    /// Wait for and apply one event or timer tick.
    pub async fn next_event(&mut self) {
        let wake = self.wait_event().await;
        self.handle_wake(wake).await;
    }

    /// Wait for the next event or the notification timer. Cancel-safe.
    pub async fn wait_event(&mut self) -> Wakeup {
        match self.notify_deadline {
            Some(deadline) => tokio::select! {
                event = self.events_rx.recv() => Wakeup::Event(event),
                _ = tokio::time::sleep_until(deadline) => Wakeup::NotifyTimer,
            },
            None => Wakeup::Event(self.events_rx.recv().await),
        }
    }

    pub async fn handle_wake(&mut self, wake: Wakeup) {
        match wake {
            Wakeup::Event(Some(event)) => self.dispatch(event).await,
            Wakeup::Event(None) => {}
            Wakeup::NotifyTimer => self.on_notify_timer(),
        }
        self.run_deferred_save().await;
    }

    /// Apply whatever is already queued without waiting. Returns the number
    /// of events handled.
    pub async fn pump(&mut self) -> usize {
        let mut handled = 0;
        loop {
            if self.notify_deadline.is_some_and(|deadline| deadline <= Instant::now()) {
                self.handle_wake(Wakeup::NotifyTimer).await;
            }
            match self.events_rx.try_recv() {
                Ok(event) => {
                    self.handle_wake(Wakeup::Event(Some(event))).await;
                    handled += 1;
                }
                Err(_) => return handled,
            }
        }
    }

    fn is_busy(&self) -> bool {
        self.engine.is_some()
            && (self.state == LifecycleState::Opening || self.pending_save.is_some() || self.pending_send.is_some())
    }

    async fn dispatch(&mut self, event: EngineEvent) {
        if self.engine.is_none() {
            debug!(?event, "event without a wallet ignored");
            return;
        }
        match event {
            EngineEvent::InitCompleted(result) => self.on_init_completed(result).await,
            EngineEvent::SaveCompleted(result) => self.on_save_completed(result).await,
            EngineEvent::SynchronizationProgress { current, total } => {
                self.synchronized = false;
                self.emit(SessionSignal::state_changed(format!("Synchronizing {current}/{total}")));
                self.emit(SessionSignal::SynchronizationProgress { current, total });
                self.notify_deadline = Some(Instant::now() + NOTIFY_DELAY);
            }
            EngineEvent::SynchronizationCompleted(result) => self.on_sync_completed(result),
            EngineEvent::ActualBalanceUpdated(balance) => {
                self.emit(SessionSignal::ActualBalanceUpdated { balance });
            }
            EngineEvent::PendingBalanceUpdated(balance) => {
                self.emit(SessionSignal::PendingBalanceUpdated { balance });
            }
            EngineEvent::ExternalTransactionCreated(id) => {
                if self.synchronized {
                    self.emit(SessionSignal::TransactionCreated { id });
                } else {
                    self.last_external_tx = Some(id);
                }
            }
            EngineEvent::TransactionUpdated(id) => self.emit(SessionSignal::TransactionUpdated { id }),
            EngineEvent::SendTransactionCompleted { id, result } => self.on_send_completed(id, result),
        }
    }

    async fn on_init_completed(&mut self, result: EngineResult<()>) {
        if self.state != LifecycleState::Opening {
            debug!(state = %self.state, "stray init completion ignored");
            return;
        }
        self.finish_rotation(result.as_ref().is_err_and(|e| e.is_wrong_password())).await;
        match result {
            Ok(()) => {
                self.transition(LifecycleState::Loaded);
                self.emit(SessionSignal::ActualBalanceUpdated { balance: self.actual_balance() });
                self.emit(SessionSignal::PendingBalanceUpdated { balance: self.pending_balance() });
                self.emit(SessionSignal::AddressUpdated { address: self.address() });
                self.emit(SessionSignal::ReloadTransactions);
                self.emit(SessionSignal::state_changed("Ready"));
                self.emit(SessionSignal::InitCompleted { error: None });
                if !self.wallet_file().exists() {
                    self.deferred_save = Some(SaveOptions::FULL);
                }
            }
            Err(err) => {
                self.emit(SessionSignal::InitCompleted { error: Some(err.to_string()) });
                self.fail_open(&err.into());
            }
        }
    }

    async fn on_save_completed(&mut self, result: EngineResult<()>) {
        let Some(pending) = self.pending_save.take() else {
            debug!("save completion without a pending save");
            return;
        };
        let mut error = result.err().map(WalletError::from);
        if let Err(e) = self.files.commit_save(&pending, error.is_none()).await {
            error = Some(e);
        }
        let snapshot = pending.is_backup_copy();
        if !snapshot {
            if error.is_none() {
                self.transition(LifecycleState::Saved);
                self.emit(SessionSignal::state_changed("Ready"));
            } else {
                self.transition(LifecycleState::Loaded);
            }
        }
        match &error {
            Some(e) => warn!(path = %pending.final_path.display(), error = %e, "save failed"),
            None => info!(path = %pending.final_path.display(), snapshot, "wallet saved"),
        }
        self.emit(SessionSignal::SaveCompleted { error: error.map(|e| e.to_string()), snapshot });
    }

    fn on_sync_completed(&mut self, result: EngineResult<()>) {
        match result {
            Ok(()) => {
                self.synchronized = true;
                self.notify_deadline = None;
                if let Some(id) = self.last_external_tx.take() {
                    self.emit(SessionSignal::TransactionCreated { id });
                }
                self.emit(SessionSignal::SynchronizationCompleted { error: None });
            }
            Err(err) => {
                warn!(error = %err, "synchronization failed");
                self.emit(SessionSignal::SynchronizationCompleted { error: Some(err.to_string()) });
            }
        }
    }

    fn on_send_completed(&mut self, id: TransactionId, result: EngineResult<()>) {
        self.pending_send = None;
        match result {
            Ok(()) => {
                self.emit(SessionSignal::SendTransactionCompleted { id, error: None });
                if self.transaction(id).is_some_and(|tx| tx.transfer_count() > 0) {
                    self.emit(SessionSignal::TransactionCreated { id });
                    self.deferred_save = Some(SaveOptions::FULL);
                }
            }
            Err(err) => {
                warn!(id, error = %err, "send failed");
                self.emit(SessionSignal::SendTransactionCompleted { id, error: Some(err.to_string()) });
            }
        }
    }

    fn on_notify_timer(&mut self) {
        self.notify_deadline = None;
        if let Some(id) = self.last_external_tx.take() {
            self.emit(SessionSignal::TransactionCreated { id });
        }
    }

    /// Saves requested by event handlers run once the file is free.
    async fn run_deferred_save(&mut self) {
        if self.pending_save.is_some() || self.pending_send.is_some() || !self.state.is_open() {
            return;
        }
        let Some(options) = self.deferred_save.take() else { return };
        let path = self.wallet_file();
        if let Err(e) = self.start_save(PendingSave::primary(&path), options).await {
            warn!(error = %e, "automatic save failed");
        }
    }

    // =========================================================================
    // Internals
    // =========================================================================

    /// Have the engine write into `pending.temp_path`. The commit happens when
    /// the engine's `SaveCompleted` is applied.
    async fn start_save(&mut self, pending: PendingSave, options: SaveOptions) -> WalletResult<()> {
        self.ensure_open("save")?;
        let mut handle = self.files.acquire(&pending.temp_path, FileMode::Write).await?;
        let written = self.engine_mut().and_then(|engine| Ok(engine.save(&mut handle, options)?));
        let released = self.files.release(handle);

        if let Err(err) = written.and(released) {
            if let Err(e) = self.files.commit_save(&pending, false).await {
                debug!(error = %e, "temp cleanup failed");
            }
            return Err(err);
        }

        if !pending.is_backup_copy() {
            self.transition(LifecycleState::Saving);
        }
        debug!(path = %pending.temp_path.display(), "save written");
        self.pending_save = Some(pending);
        self.emit(SessionSignal::state_changed("Saving data"));
        Ok(())
    }

    /// Trim the backups this open added to. A rejected password leaves the
    /// backup directory untouched.
    async fn finish_rotation(&mut self, password_rejected: bool) {
        let Some(primary) = self.pending_rotation.take() else {
            return;
        };
        if password_rejected {
            debug!(wallet = %primary.display(), "backup rotation skipped");
        } else {
            self.files.rotate_backups(&primary).await;
        }
    }

    fn fail_open(&mut self, err: &WalletError) {
        self.teardown_engine();
        if err.is_wrong_password() {
            let was_encrypted = self.settings.is_encrypted();
            self.settings.set_encrypted(true);
            info!(was_encrypted, "wallet needs a password");
            self.emit(SessionSignal::OpenWithPassword { was_encrypted });
            self.transition(LifecycleState::Closed);
        } else {
            warn!(error = %err, "wallet open failed");
            self.transition(LifecycleState::FailedOpen);
        }
    }

    /// Drop the engine and everything tied to it.
    fn teardown_engine(&mut self) {
        if let Some(mut engine) = self.engine.take() {
            engine.shutdown();
        }
        self.pending_save = None;
        self.pending_send = None;
        self.deferred_save = None;
        self.pending_rotation = None;
        self.synchronized = false;
        self.last_external_tx = None;
        self.notify_deadline = None;
        while self.events_rx.try_recv().is_ok() {}
    }

    fn transition(&mut self, to: LifecycleState) {
        let from = self.state;
        if from == to {
            return;
        }
        if !from.can_transition_to(to) {
            warn!(%from, %to, "unexpected lifecycle transition");
        }
        self.state = to;
        info!(%from, %to, "wallet state");
        self.emit(SessionSignal::LifecycleChanged { from, to });
    }

    fn ensure_closed(&self, operation: &'static str) -> WalletResult<()> {
        if self.engine.is_some() || !matches!(self.state, LifecycleState::Closed | LifecycleState::FailedOpen) {
            return Err(WalletError::WrongState { state: self.state, operation });
        }
        Ok(())
    }

    fn ensure_open(&self, operation: &'static str) -> WalletResult<()> {
        if !self.is_open() {
            return Err(WalletError::WrongState { state: self.state, operation });
        }
        Ok(())
    }

    fn engine_mut(&mut self) -> WalletResult<&mut Box<dyn WalletEngine>> {
        let state = self.state;
        self.engine.as_mut().ok_or(WalletError::WrongState { state, operation: "use engine" })
    }

    fn emit(&self, signal: SessionSignal) {
        let _ = self.signals.send(signal);
    }

    // =========================================================================
    // Queries (neutral values while no wallet is loaded)
    // =========================================================================

    pub fn address(&self) -> String {
        self.engine.as_ref().and_then(|e| e.address().ok()).unwrap_or_default()
    }

    pub fn actual_balance(&self) -> u64 {
        self.engine.as_ref().and_then(|e| e.actual_balance().ok()).unwrap_or(0)
    }

    pub fn pending_balance(&self) -> u64 {
        self.engine.as_ref().and_then(|e| e.pending_balance().ok()).unwrap_or(0)
    }

    pub fn transaction_count(&self) -> usize {
        self.engine.as_ref().and_then(|e| e.transaction_count().ok()).unwrap_or(0)
    }

    pub fn transfer_count(&self) -> usize {
        self.engine.as_ref().and_then(|e| e.transfer_count().ok()).unwrap_or(0)
    }

    pub fn transaction(&self, id: TransactionId) -> Option<WalletTransaction> {
        self.engine.as_ref().and_then(|e| e.transaction(id).ok().flatten())
    }

    pub fn transfer(&self, index: usize) -> Option<Transfer> {
        self.engine.as_ref().and_then(|e| e.transfer(index).ok().flatten())
    }

    pub fn account_keys(&self) -> Option<AccountKeys> {
        self.engine.as_ref().and_then(|e| e.account_keys().ok())
    }
}
