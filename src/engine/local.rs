//! LocalEngine - reference engine backed by a JSON wallet container
//!
//! Stands in for the external wallet library so the file lifecycle can run
//! end to end. No chain, no signing: keys are random bytes, "public" keys are
//! their blake3 digests, and sends only move the local balance.
//!
//! Container format (`version: 1`):
//!
//! | Field | Contents |
//! |-------|----------|
//! | `salt` | base64, 16 bytes |
//! | `verifier` | blake3 hex of the password-derived key |
//! | `*_public_key` | hex |
//! | `*_secret_key` | hex, masked with a keyed blake3 stream |
//! | `transactions` | present when saved with `details` |
//! | `cache` | balances, present when saved with `cache` |

use super::{
    AccountKeys, EngineError, EngineErrorCode, EngineEvent, EngineFactory, EngineResult,
    EventSender, SaveOptions, TransactionId, Transfer, WalletEngine, WalletTransaction,
};
use base64::Engine as _;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;
use zeroize::Zeroizing;

const CONTAINER_VERSION: u32 = 1;
const KDF_CONTEXT: &str = "walletfile local engine 2026-10 password key";
pub(crate) const SPEND_LABEL: &[u8] = b"spend";
pub(crate) const VIEW_LABEL: &[u8] = b"view";

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct WalletContainer {
    version: u32,
    salt: String,
    verifier: String,
    spend_public_key: String,
    view_public_key: String,
    spend_secret_key: String,
    view_secret_key: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    transactions: Vec<WalletTransaction>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    cache: Option<BalanceCache>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
struct BalanceCache {
    actual_balance: u64,
    pending_balance: u64,
}

pub(crate) struct LocalWallet {
    keys: AccountKeys,
    salt: [u8; 16],
    key: Zeroizing<[u8; 32]>,
    actual_balance: u64,
    pending_balance: u64,
    transactions: Vec<WalletTransaction>,
}

impl LocalWallet {
    pub(crate) fn new(keys: AccountKeys, password: &str, opening_balance: u64) -> Self {
        let salt = random_salt();
        let key = derive_key(password, &salt);
        Self {
            keys,
            salt,
            key,
            actual_balance: opening_balance,
            pending_balance: 0,
            transactions: Vec::new(),
        }
    }

    pub(crate) fn from_container(raw: &str, password: &str) -> EngineResult<Self> {
        let container: WalletContainer = serde_json::from_str(raw)
            .map_err(|e| EngineError::with_detail(EngineErrorCode::WrongVersion, e))?;
        if container.version != CONTAINER_VERSION {
            return Err(EngineError::with_detail(
                EngineErrorCode::WrongVersion,
                format!("container version {}", container.version),
            ));
        }
        let salt = decode_salt(&container.salt)?;
        let key = derive_key(password, &salt);
        if verifier(&key) != container.verifier {
            return Err(EngineErrorCode::WrongPassword.into());
        }
        let spend = unmask_secret(&key, SPEND_LABEL, &container.spend_secret_key)?;
        let view = unmask_secret(&key, VIEW_LABEL, &container.view_secret_key)?;
        let keys = keys_from_secrets(&spend, &view);
        if keys.spend_public_key != container.spend_public_key
            || keys.view_public_key != container.view_public_key
        {
            return Err(EngineError::with_detail(
                EngineErrorCode::InternalWalletError,
                "public keys do not match secret keys",
            ));
        }
        let cache = container.cache.unwrap_or(BalanceCache { actual_balance: 0, pending_balance: 0 });
        Ok(Self {
            keys,
            salt,
            key,
            actual_balance: cache.actual_balance,
            pending_balance: cache.pending_balance,
            transactions: container.transactions,
        })
    }

    pub(crate) fn to_container(&self, options: SaveOptions) -> EngineResult<WalletContainer> {
        Ok(WalletContainer {
            version: CONTAINER_VERSION,
            salt: encode_salt(&self.salt),
            verifier: verifier(&self.key),
            spend_public_key: self.keys.spend_public_key.clone(),
            view_public_key: self.keys.view_public_key.clone(),
            spend_secret_key: mask_secret(&self.key, SPEND_LABEL, &self.keys.spend_secret_key)?,
            view_secret_key: mask_secret(&self.key, VIEW_LABEL, &self.keys.view_secret_key)?,
            transactions: if options.details { self.transactions.clone() } else { Vec::new() },
            cache: options.cache.then_some(BalanceCache {
                actual_balance: self.actual_balance,
                pending_balance: self.pending_balance,
            }),
        })
    }

    fn address(&self) -> String {
        let mut hasher = blake3::Hasher::new();
        hasher.update(self.keys.spend_public_key.as_bytes());
        hasher.update(self.keys.view_public_key.as_bytes());
        format!("WF{}", &hasher.finalize().to_hex()[..40])
    }

    fn check_password(&self, password: &str) -> bool {
        verifier(&derive_key(password, &self.salt)) == verifier(&self.key)
    }

    fn set_password(&mut self, password: &str) {
        self.salt = random_salt();
        self.key = derive_key(password, &self.salt);
    }
}

struct LocalState {
    wallet: Option<LocalWallet>,
    events: Option<EventSender>,
}

impl LocalState {
    fn post(&self, event: EngineEvent) {
        if let Some(events) = &self.events {
            let _ = events.send(event);
        }
    }

    fn wallet(&self) -> EngineResult<&LocalWallet> {
        self.wallet.as_ref().ok_or_else(|| EngineErrorCode::NotInitialized.into())
    }

    fn wallet_mut(&mut self) -> EngineResult<&mut LocalWallet> {
        self.wallet.as_mut().ok_or_else(|| EngineErrorCode::NotInitialized.into())
    }
}

pub struct LocalEngine {
    state: Arc<Mutex<LocalState>>,
    opening_balance: u64,
}

impl LocalEngine {
    pub fn new(events: EventSender, opening_balance: u64) -> Self {
        Self {
            state: Arc::new(Mutex::new(LocalState { wallet: None, events: Some(events) })),
            opening_balance,
        }
    }

    fn lock(&self) -> MutexGuard<'_, LocalState> {
        lock_state(&self.state)
    }

    fn install(&self, wallet: LocalWallet) -> EngineResult<()> {
        let mut state = self.lock();
        if state.wallet.is_some() {
            return Err(EngineErrorCode::AlreadyInitialized.into());
        }
        state.wallet = Some(wallet);
        state.post(EngineEvent::InitCompleted(Ok(())));
        // Nothing to fetch from a chain, so the wallet is synchronized at once.
        state.post(EngineEvent::SynchronizationCompleted(Ok(())));
        Ok(())
    }
}

fn lock_state(state: &Mutex<LocalState>) -> MutexGuard<'_, LocalState> {
    state.lock().unwrap_or_else(|p| p.into_inner())
}

impl WalletEngine for LocalEngine {
    fn init_and_load(&mut self, source: &mut dyn Read, password: &str) -> EngineResult<()> {
        if self.lock().wallet.is_some() {
            return Err(EngineErrorCode::AlreadyInitialized.into());
        }
        let mut raw = String::new();
        source
            .read_to_string(&mut raw)
            .map_err(|e| EngineError::with_detail(EngineErrorCode::InternalWalletError, e))?;
        match LocalWallet::from_container(&raw, password) {
            Ok(wallet) => self.install(wallet),
            Err(err) => {
                debug!(error = %err, "wallet load failed");
                self.lock().post(EngineEvent::InitCompleted(Err(err)));
                Ok(())
            }
        }
    }

    fn init_and_generate(&mut self, password: &str) -> EngineResult<()> {
        let mut spend = Zeroizing::new([0u8; 32]);
        let mut view = Zeroizing::new([0u8; 32]);
        let mut rng = rand::thread_rng();
        rng.try_fill_bytes(&mut spend[..])
            .map_err(|e| EngineError::with_detail(EngineErrorCode::KeyGenerationError, e))?;
        rng.try_fill_bytes(&mut view[..])
            .map_err(|e| EngineError::with_detail(EngineErrorCode::KeyGenerationError, e))?;
        let keys = keys_from_secrets(&spend[..], &view[..]);
        self.install(LocalWallet::new(keys, password, self.opening_balance))
    }

    fn init_with_keys(&mut self, keys: &AccountKeys, password: &str) -> EngineResult<()> {
        let spend = decode_hex(&keys.spend_secret_key)?;
        let view = decode_hex(&keys.view_secret_key)?;
        let derived = keys_from_secrets(&spend, &view);
        if derived.spend_public_key != keys.spend_public_key || derived.view_public_key != keys.view_public_key {
            return Err(EngineError::with_detail(
                EngineErrorCode::WrongParameters,
                "public keys do not match secret keys",
            ));
        }
        self.install(LocalWallet::new(derived, password, self.opening_balance))
    }

    fn save(&mut self, sink: &mut dyn Write, options: SaveOptions) -> EngineResult<()> {
        let state = self.lock();
        let container = state.wallet()?.to_container(options)?;
        let json = serde_json::to_vec_pretty(&container)
            .map_err(|e| EngineError::with_detail(EngineErrorCode::InternalWalletError, e))?;
        sink.write_all(&json)
            .and_then(|_| sink.flush())
            .map_err(|e| EngineError::with_detail(EngineErrorCode::InternalWalletError, e))?;
        state.post(EngineEvent::SaveCompleted(Ok(())));
        Ok(())
    }

    fn change_password(&mut self, old: &str, new: &str) -> EngineResult<()> {
        let mut state = self.lock();
        let wallet = state.wallet_mut()?;
        if !wallet.check_password(old) {
            return Err(EngineErrorCode::WrongPassword.into());
        }
        wallet.set_password(new);
        Ok(())
    }

    fn send_transaction(
        &mut self,
        transfers: &[Transfer],
        fee: u64,
        payment_id: Option<&str>,
        _mixin: u64,
    ) -> EngineResult<TransactionId> {
        if transfers.is_empty() {
            return Err(EngineErrorCode::ZeroDestination.into());
        }
        let mut sent: u64 = 0;
        for transfer in transfers {
            if transfer.address.is_empty() {
                return Err(EngineErrorCode::BadAddress.into());
            }
            let amount = u64::try_from(transfer.amount)
                .ok()
                .filter(|a| *a > 0)
                .ok_or(EngineError::new(EngineErrorCode::WrongAmount))?;
            sent = sent.checked_add(amount).ok_or(EngineError::new(EngineErrorCode::SumOverflow))?;
        }
        let total = sent.checked_add(fee).ok_or(EngineError::new(EngineErrorCode::SumOverflow))?;
        let total_amount = i64::try_from(total).map_err(|_| EngineError::new(EngineErrorCode::SumOverflow))?;

        let id = {
            let state = self.lock();
            let wallet = state.wallet()?;
            if total > wallet.actual_balance {
                return Err(EngineErrorCode::WrongAmount.into());
            }
            wallet.transactions.len() as TransactionId
        };

        let transaction = WalletTransaction {
            id,
            total_amount: -total_amount,
            fee,
            transfers: transfers.to_vec(),
            payment_id: payment_id.map(str::to_string),
            timestamp: chrono::Utc::now().timestamp(),
        };
        let shared = self.state.clone();
        let relay = move || complete_send(&shared, transaction, total);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn_blocking(relay);
            }
            Err(_) => relay(),
        }
        Ok(id)
    }

    fn address(&self) -> EngineResult<String> {
        Ok(self.lock().wallet()?.address())
    }

    fn actual_balance(&self) -> EngineResult<u64> {
        Ok(self.lock().wallet()?.actual_balance)
    }

    fn pending_balance(&self) -> EngineResult<u64> {
        Ok(self.lock().wallet()?.pending_balance)
    }

    fn transaction_count(&self) -> EngineResult<usize> {
        Ok(self.lock().wallet()?.transactions.len())
    }

    fn transfer_count(&self) -> EngineResult<usize> {
        Ok(self.lock().wallet()?.transactions.iter().map(|t| t.transfer_count()).sum())
    }

    fn transaction(&self, id: TransactionId) -> EngineResult<Option<WalletTransaction>> {
        Ok(self.lock().wallet()?.transactions.iter().find(|t| t.id == id).cloned())
    }

    fn transfer(&self, index: usize) -> EngineResult<Option<Transfer>> {
        Ok(self
            .lock()
            .wallet()?
            .transactions
            .iter()
            .flat_map(|t| t.transfers.iter())
            .nth(index)
            .cloned())
    }

    fn account_keys(&self) -> EngineResult<AccountKeys> {
        Ok(self.lock().wallet()?.keys.clone())
    }

    fn shutdown(&mut self) {
        let mut state = self.lock();
        state.events = None;
        state.wallet = None;
    }
}

/// Runs off the caller's thread: books the transaction and reports back.
fn complete_send(state: &Mutex<LocalState>, transaction: WalletTransaction, total: u64) {
    let mut state = lock_state(state);
    let id = transaction.id;
    let balance = match state.wallet.as_mut() {
        Some(wallet) => {
            wallet.actual_balance = wallet.actual_balance.saturating_sub(total);
            wallet.transactions.push(transaction);
            wallet.actual_balance
        }
        None => return,
    };
    state.post(EngineEvent::ActualBalanceUpdated(balance));
    state.post(EngineEvent::SendTransactionCompleted { id, result: Ok(()) });
}

#[derive(Debug, Clone, Copy, Default)]
pub struct LocalEngineFactory {
    opening_balance: u64,
}

impl LocalEngineFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Balance credited to freshly generated or key-imported wallets.
    pub fn with_opening_balance(mut self, amount: u64) -> Self {
        self.opening_balance = amount;
        self
    }
}

impl EngineFactory for LocalEngineFactory {
    fn create(&self, events: EventSender) -> Box<dyn WalletEngine> {
        Box::new(LocalEngine::new(events, self.opening_balance))
    }
}

// =============================================================================
// Key material helpers (shared with the legacy importer)
// =============================================================================

pub(crate) fn derive_key(password: &str, salt: &[u8]) -> Zeroizing<[u8; 32]> {
    let mut hasher = blake3::Hasher::new_derive_key(KDF_CONTEXT);
    hasher.update(salt);
    hasher.update(password.as_bytes());
    Zeroizing::new(*hasher.finalize().as_bytes())
}

pub(crate) fn verifier(key: &[u8; 32]) -> String {
    blake3::hash(key).to_hex().to_string()
}

pub(crate) fn random_salt() -> [u8; 16] {
    let mut salt = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut salt);
    salt
}

pub(crate) fn encode_salt(salt: &[u8; 16]) -> String {
    base64::engine::general_purpose::STANDARD.encode(salt)
}

pub(crate) fn decode_salt(value: &str) -> EngineResult<[u8; 16]> {
    base64::engine::general_purpose::STANDARD
        .decode(value)
        .ok()
        .and_then(|bytes| <[u8; 16]>::try_from(bytes.as_slice()).ok())
        .ok_or_else(|| EngineError::with_detail(EngineErrorCode::WrongVersion, "bad salt"))
}

fn keystream(key: &[u8; 32], label: &[u8], len: usize) -> Zeroizing<Vec<u8>> {
    let mut stream = Zeroizing::new(vec![0u8; len]);
    blake3::Hasher::new_keyed(key).update(label).finalize_xof().fill(&mut stream);
    stream
}

fn decode_hex(value: &str) -> EngineResult<Zeroizing<Vec<u8>>> {
    hex::decode(value)
        .map(Zeroizing::new)
        .map_err(|e| EngineError::with_detail(EngineErrorCode::WrongParameters, e))
}

pub(crate) fn mask_secret(key: &[u8; 32], label: &[u8], secret_hex: &str) -> EngineResult<String> {
    let secret = decode_hex(secret_hex)?;
    let stream = keystream(key, label, secret.len());
    let masked: Vec<u8> = secret.iter().zip(stream.iter()).map(|(a, b)| a ^ b).collect();
    Ok(hex::encode(masked))
}

pub(crate) fn unmask_secret(key: &[u8; 32], label: &[u8], masked_hex: &str) -> EngineResult<Zeroizing<Vec<u8>>> {
    let masked = hex::decode(masked_hex)
        .map_err(|e| EngineError::with_detail(EngineErrorCode::WrongVersion, e))?;
    let stream = keystream(key, label, masked.len());
    Ok(Zeroizing::new(masked.iter().zip(stream.iter()).map(|(a, b)| a ^ b).collect()))
}

pub(crate) fn keys_from_secrets(spend: &[u8], view: &[u8]) -> AccountKeys {
    AccountKeys {
        spend_public_key: blake3::hash(spend).to_hex().to_string(),
        spend_secret_key: hex::encode(spend),
        view_public_key: blake3::hash(view).to_hex().to_string(),
        view_secret_key: hex::encode(view),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn engine() -> (LocalEngine, mpsc::UnboundedReceiver<EngineEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (LocalEngine::new(tx, 5_000), rx)
    }

    fn saved(engine: &mut LocalEngine, options: SaveOptions) -> Vec<u8> {
        let mut out = Vec::new();
        engine.save(&mut out, options).unwrap();
        out
    }

    #[test]
    fn generate_save_load_roundtrip() {
        let (mut first, mut rx) = engine();
        first.init_and_generate("pw").unwrap();
        assert_eq!(rx.try_recv().unwrap(), EngineEvent::InitCompleted(Ok(())));
        let bytes = saved(&mut first, SaveOptions::FULL);

        let (mut second, mut rx2) = engine();
        second.init_and_load(&mut bytes.as_slice(), "pw").unwrap();
        assert_eq!(rx2.try_recv().unwrap(), EngineEvent::InitCompleted(Ok(())));
        assert_eq!(second.address().unwrap(), first.address().unwrap());
        assert_eq!(second.actual_balance().unwrap(), 5_000);
        assert_eq!(second.account_keys().unwrap(), first.account_keys().unwrap());
    }

    #[test]
    fn wrong_password_reported_as_init_event() {
        let (mut first, _rx) = engine();
        first.init_and_generate("right").unwrap();
        let bytes = saved(&mut first, SaveOptions::FULL);

        let (mut second, mut rx) = engine();
        second.init_and_load(&mut bytes.as_slice(), "wrong").unwrap();
        match rx.try_recv().unwrap() {
            EngineEvent::InitCompleted(Err(e)) => assert!(e.is_wrong_password()),
            other => panic!("unexpected event {other:?}"),
        }
        assert!(second.address().is_err());
    }

    #[test]
    fn secrets_are_not_stored_in_clear() {
        let (mut engine, _rx) = engine();
        engine.init_and_generate("").unwrap();
        let keys = engine.account_keys().unwrap();
        let text = String::from_utf8(saved(&mut engine, SaveOptions::FULL)).unwrap();
        assert!(text.contains(&keys.spend_public_key));
        assert!(!text.contains(&keys.spend_secret_key));
    }

    #[test]
    fn bare_save_drops_cache() {
        let (mut first, _rx) = engine();
        first.init_and_generate("").unwrap();
        let bytes = saved(&mut first, SaveOptions::BARE);

        let (mut second, _rx2) = engine();
        second.init_and_load(&mut bytes.as_slice(), "").unwrap();
        assert_eq!(second.actual_balance().unwrap(), 0);
    }

    #[test]
    fn change_password_checks_old() {
        let (mut engine, _rx) = engine();
        engine.init_and_generate("").unwrap();
        let err = engine.change_password("nope", "new").unwrap_err();
        assert!(err.is_wrong_password());
        engine.change_password("", "new").unwrap();
        let bytes = saved(&mut engine, SaveOptions::FULL);

        let (mut reloaded, mut rx) = self::engine();
        reloaded.init_and_load(&mut bytes.as_slice(), "new").unwrap();
        assert_eq!(rx.try_recv().unwrap(), EngineEvent::InitCompleted(Ok(())));
    }

    #[test]
    fn send_without_runtime_completes_inline() {
        let (mut engine, mut rx) = engine();
        engine.init_and_generate("").unwrap();
        while rx.try_recv().is_ok() {}

        let transfers = vec![Transfer { address: "WFdest".into(), amount: 1_000 }];
        let id = engine.send_transaction(&transfers, 10, None, 0).unwrap();
        assert_eq!(rx.try_recv().unwrap(), EngineEvent::ActualBalanceUpdated(3_990));
        assert_eq!(
            rx.try_recv().unwrap(),
            EngineEvent::SendTransactionCompleted { id, result: Ok(()) }
        );
        let tx = engine.transaction(id).unwrap().unwrap();
        assert_eq!(tx.total_amount, -1_010);
        assert_eq!(engine.transfer_count().unwrap(), 1);
    }

    #[test]
    fn send_rejects_bad_requests() {
        let (mut engine, _rx) = engine();
        engine.init_and_generate("").unwrap();
        let code = |r: EngineResult<TransactionId>| r.unwrap_err().code();

        assert_eq!(code(engine.send_transaction(&[], 0, None, 0)), EngineErrorCode::ZeroDestination);
        let empty = [Transfer { address: String::new(), amount: 1 }];
        assert_eq!(code(engine.send_transaction(&empty, 0, None, 0)), EngineErrorCode::BadAddress);
        let too_much = [Transfer { address: "WFx".into(), amount: 10_000 }];
        assert_eq!(code(engine.send_transaction(&too_much, 0, None, 0)), EngineErrorCode::WrongAmount);
    }

    #[test]
    fn shutdown_stops_events() {
        let (mut engine, mut rx) = engine();
        engine.shutdown();
        let _ = engine.init_and_generate("");
        assert!(rx.try_recv().is_err());
    }
}
