//! Error taxonomy for wallet-file operations.
//!
//! `WrongPassword` is the only recoverable failure: it drives a password
//! re-prompt. Everything else tears the in-memory wallet down.

use crate::engine::{EngineError, EngineErrorCode};
use crate::session::LifecycleState;
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// File-system step that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoOp {
    Open,
    Read,
    Write,
    Sync,
    Copy,
    Rename,
    Remove,
    CreateDir,
    Scan,
}

impl IoOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            IoOp::Open => "open",
            IoOp::Read => "read",
            IoOp::Write => "write",
            IoOp::Sync => "sync",
            IoOp::Copy => "copy",
            IoOp::Rename => "rename",
            IoOp::Remove => "remove",
            IoOp::CreateDir => "create dir",
            IoOp::Scan => "scan",
        }
    }
}

impl fmt::Display for IoOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum WalletError {
    #[error("wrong password")]
    WrongPassword,

    #[error("{op} {}: {source}", .path.display())]
    Io {
        op: IoOp,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("engine: {0}")]
    Engine(EngineError),

    #[error("cannot {operation} while wallet is {state}")]
    WrongState {
        state: LifecycleState,
        operation: &'static str,
    },

    #[error("operation cancelled")]
    Cancelled,

    #[error("wallet file path is empty")]
    EmptyPath,

    #[error("invalid wallet path: {}", .0.display())]
    InvalidPath(PathBuf),

    #[error("settings: {0}")]
    Settings(String),
}

pub type WalletResult<T> = Result<T, WalletError>;

impl WalletError {
    pub fn io(op: IoOp, path: impl AsRef<Path>, source: std::io::Error) -> Self {
        WalletError::Io { op, path: path.as_ref().to_path_buf(), source }
    }

    pub fn is_wrong_password(&self) -> bool {
        matches!(self, WalletError::WrongPassword)
    }
}

impl From<EngineError> for WalletError {
    fn from(err: EngineError) -> Self {
        match err.code() {
            EngineErrorCode::WrongPassword => WalletError::WrongPassword,
            EngineErrorCode::OperationCancelled => WalletError::Cancelled,
            _ => WalletError::Engine(err),
        }
    }
}
