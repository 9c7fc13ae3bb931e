//! Engine error codes and their user-facing messages.

use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EngineErrorCode {
    NotInitialized,
    WrongPassword,
    AlreadyInitialized,
    InternalWalletError,
    MixinCountTooBig,
    BadAddress,
    TransactionSizeTooBig,
    WrongAmount,
    SumOverflow,
    ZeroDestination,
    TxCancelImpossible,
    WrongState,
    OperationCancelled,
    TxTransferImpossible,
    WrongVersion,
    FeeTooSmall,
    KeyGenerationError,
    IndexOutOfRange,
    AddressAlreadyExists,
    TrackingMode,
    WrongParameters,
    ObjectNotFound,
    WalletNotFound,
    ChangeAddressRequired,
    ChangeAddressNotFound,
    DestinationAddressRequired,
    DestinationAddressNotFound,
    BadPaymentId,
    BadTransactionExtra,
    Unknown,
}

impl EngineErrorCode {
    pub fn message(&self) -> &'static str {
        use EngineErrorCode::*;
        match self {
            NotInitialized => "Object was not initialized",
            WrongPassword => "The password is wrong",
            AlreadyInitialized => "The object is already initialized",
            InternalWalletError => "Internal error occurred",
            MixinCountTooBig => "MixIn count is too big",
            BadAddress => "Bad address",
            TransactionSizeTooBig => "Transaction size is too big",
            WrongAmount => "Wrong amount",
            SumOverflow => "Sum overflow",
            ZeroDestination => "The destination is empty",
            TxCancelImpossible => "Impossible to cancel transaction",
            WrongState => {
                "The wallet is in wrong state (maybe loading or saving), try again later"
            }
            OperationCancelled => "The operation you've requested has been cancelled",
            TxTransferImpossible => "Transaction transfer impossible",
            WrongVersion => "Wrong version",
            FeeTooSmall => "Transaction fee is too small",
            KeyGenerationError => "Cannot generate new key",
            IndexOutOfRange => "Index is out of range",
            AddressAlreadyExists => "Address already exists",
            TrackingMode => "The wallet is in tracking mode",
            WrongParameters => "Wrong parameters passed",
            ObjectNotFound => "Object not found",
            WalletNotFound => "Requested wallet not found",
            ChangeAddressRequired => "Change address required",
            ChangeAddressNotFound => "Change address not found",
            DestinationAddressRequired => "Destination address required",
            DestinationAddressNotFound => "Destination address not found",
            BadPaymentId => "Wrong payment id format",
            BadTransactionExtra => "Wrong transaction extra format",
            Unknown => "Unknown error",
        }
    }
}

impl fmt::Display for EngineErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.message())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct EngineError {
    code: EngineErrorCode,
    message: String,
}

impl EngineError {
    pub fn new(code: EngineErrorCode) -> Self {
        Self { code, message: code.message().to_string() }
    }

    pub fn with_detail(code: EngineErrorCode, detail: impl fmt::Display) -> Self {
        Self { code, message: format!("{}: {}", code.message(), detail) }
    }

    pub fn code(&self) -> EngineErrorCode {
        self.code
    }

    pub fn is_wrong_password(&self) -> bool {
        self.code == EngineErrorCode::WrongPassword
    }
}

impl From<EngineErrorCode> for EngineError {
    fn from(code: EngineErrorCode) -> Self {
        EngineError::new(code)
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
