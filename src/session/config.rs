//! Session configuration and persisted settings.

use crate::core::paths;
use crate::error::{IoOp, WalletError, WalletResult};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;

pub const ENV_ROOT: &str = "WALLETFILE_ROOT";
pub const ENV_WALLET: &str = "WALLETFILE_WALLET";
pub const ENV_MAX_BACKUPS: &str = "WALLETFILE_MAX_BACKUPS";

/// Where the wallet lives and how many backups to keep.
#[derive(Debug, Clone)]
pub struct WalletConfig {
    pub data_dir: PathBuf,
    /// Overrides the wallet file stored in settings.
    pub wallet_file: Option<PathBuf>,
    pub backup_dir_name: String,
    pub max_backups: usize,
}

impl WalletConfig {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            wallet_file: None,
            backup_dir_name: paths::BACKUP_DIR.to_string(),
            max_backups: paths::MAX_BACKUPS,
        }
    }

    /// `WALLETFILE_ROOT`, `WALLETFILE_WALLET`, `WALLETFILE_MAX_BACKUPS`.
    pub fn from_env() -> Self {
        let data_dir = std::env::var(ENV_ROOT)
            .ok()
            .filter(|v| !v.trim().is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(default_data_dir);
        let mut config = Self::new(data_dir);
        if let Some(wallet) = std::env::var(ENV_WALLET).ok().filter(|v| !v.trim().is_empty()) {
            config.wallet_file = Some(PathBuf::from(wallet));
        }
        if let Ok(raw) = std::env::var(ENV_MAX_BACKUPS) {
            match raw.trim().parse::<usize>() {
                Ok(max) if max > 0 => config.max_backups = max,
                _ => warn!(value = %raw, "ignoring {ENV_MAX_BACKUPS}, expected a positive number"),
            }
        }
        config
    }

    pub fn with_wallet_file(mut self, path: impl Into<PathBuf>) -> Self { self.wallet_file = Some(path.into()); self }
    pub fn with_backup_dir_name(mut self, name: impl Into<String>) -> Self { self.backup_dir_name = name.into(); self }
    /// Clamped to at least one.
    pub fn with_max_backups(mut self, max: usize) -> Self { self.max_backups = max.max(1); self }

    pub fn backup_dir(&self) -> PathBuf {
        self.data_dir.join(&self.backup_dir_name)
    }

    pub fn settings_path(&self) -> PathBuf {
        self.data_dir.join(paths::SETTINGS_FILE)
    }

    pub fn default_wallet_file(&self) -> PathBuf {
        self.data_dir.join(paths::DEFAULT_WALLET_FILE)
    }
}

impl Default for WalletConfig {
    fn default() -> Self {
        Self::new(default_data_dir())
    }
}

pub fn default_data_dir() -> PathBuf {
    dirs::data_local_dir().unwrap_or_else(|| PathBuf::from(".")).join("walletfile")
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub wallet_file: Option<PathBuf>,
    #[serde(default)]
    pub encrypted: bool,
}

/// Settings backed by `settings.json`.
///
/// Setters persist immediately; a failed write is logged and the in-memory
/// value still changes.
#[derive(Debug)]
pub struct SettingsStore {
    path: PathBuf,
    settings: Settings,
}

impl SettingsStore {
    /// Load `path`, falling back to defaults when it is missing or unreadable.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let settings = match fs::read_to_string(&path) {
            Ok(raw) => serde_json::from_str(&raw).unwrap_or_else(|e| {
                warn!(path = %path.display(), error = %e, "settings unreadable, using defaults");
                Settings::default()
            }),
            Err(_) => Settings::default(),
        };
        Self { path, settings }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn wallet_file(&self) -> Option<&Path> {
        self.settings.wallet_file.as_deref()
    }

    pub fn is_encrypted(&self) -> bool {
        self.settings.encrypted
    }

    pub fn set_wallet_file(&mut self, path: impl Into<PathBuf>) {
        self.settings.wallet_file = Some(path.into());
        self.persist();
    }

    /// Change the wallet file in memory only. The next setter that persists
    /// writes it out.
    pub fn override_wallet_file(&mut self, path: impl Into<PathBuf>) {
        self.settings.wallet_file = Some(path.into());
    }

    pub fn set_encrypted(&mut self, encrypted: bool) {
        if self.settings.encrypted != encrypted {
            self.settings.encrypted = encrypted;
            self.persist();
        }
    }

    pub fn save(&self) -> WalletResult<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| WalletError::io(IoOp::CreateDir, parent, e))?;
        }
        let json = serde_json::to_string_pretty(&self.settings).map_err(|e| WalletError::Settings(e.to_string()))?;
        fs::write(&self.path, json).map_err(|e| WalletError::io(IoOp::Write, &self.path, e))
    }

    fn persist(&self) {
        if let Err(e) = self.save() {
            warn!(error = %e, "failed to persist settings");
        }
    }
}
