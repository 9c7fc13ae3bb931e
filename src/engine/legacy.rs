//! Legacy `.keys` import.
//!
//! Older wallets stored only the account keys. Importing converts them into
//! a full wallet container written to the caller's sink; the caller owns the
//! target file and its lock.

use super::local::{
    decode_salt, derive_key, encode_salt, keys_from_secrets, mask_secret, random_salt, unmask_secret, verifier,
    LocalWallet, SPEND_LABEL, VIEW_LABEL,
};
use super::{AccountKeys, EngineError, EngineErrorCode, EngineResult, SaveOptions};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::Path;

pub trait LegacyImporter: Send + Sync {
    /// Convert `legacy_path` into a wallet container written to `sink`.
    fn import(&self, legacy_path: &Path, password: &str, sink: &mut dyn Write) -> EngineResult<()>;
}

#[derive(Debug, Serialize, Deserialize)]
struct LegacyKeysFile {
    salt: String,
    verifier: String,
    spend_secret_key: String,
    view_secret_key: String,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct LocalLegacyImporter;

impl LocalLegacyImporter {
    /// Write `keys` in the legacy layout, protected by `password`.
    pub fn write_keys(path: &Path, keys: &AccountKeys, password: &str) -> EngineResult<()> {
        let salt = random_salt();
        let key = derive_key(password, &salt);
        let file = LegacyKeysFile {
            salt: encode_salt(&salt),
            verifier: verifier(&key),
            spend_secret_key: mask_secret(&key, SPEND_LABEL, &keys.spend_secret_key)?,
            view_secret_key: mask_secret(&key, VIEW_LABEL, &keys.view_secret_key)?,
        };
        let json = serde_json::to_vec_pretty(&file)
            .map_err(|e| EngineError::with_detail(EngineErrorCode::InternalWalletError, e))?;
        fs::write(path, json).map_err(|e| EngineError::with_detail(EngineErrorCode::InternalWalletError, e))
    }
}

impl LegacyImporter for LocalLegacyImporter {
    fn import(&self, legacy_path: &Path, password: &str, sink: &mut dyn Write) -> EngineResult<()> {
        let raw = fs::read_to_string(legacy_path)
            .map_err(|e| EngineError::with_detail(EngineErrorCode::WalletNotFound, e))?;
        let legacy: LegacyKeysFile = serde_json::from_str(&raw)
            .map_err(|e| EngineError::with_detail(EngineErrorCode::WrongVersion, e))?;

        let salt = decode_salt(&legacy.salt)?;
        let key = derive_key(password, &salt);
        if verifier(&key) != legacy.verifier {
            return Err(EngineErrorCode::WrongPassword.into());
        }
        let spend = unmask_secret(&key, SPEND_LABEL, &legacy.spend_secret_key)?;
        let view = unmask_secret(&key, VIEW_LABEL, &legacy.view_secret_key)?;

        let wallet = LocalWallet::new(keys_from_secrets(&spend, &view), password, 0);
        let json = serde_json::to_vec_pretty(&wallet.to_container(SaveOptions::FULL)?)
            .map_err(|e| EngineError::with_detail(EngineErrorCode::InternalWalletError, e))?;
        sink.write_all(&json)
            .and_then(|_| sink.flush())
            .map_err(|e| EngineError::with_detail(EngineErrorCode::InternalWalletError, e))
    }
}
