use serde::{Deserialize, Serialize};
use std::fmt;

/// Storage-layer failures. Fatal to the operation in progress; callers must
/// not fall back silently.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StorageError {
    NotFound(String),
    ReadFailure(String),
    WriteFailure(String),
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            StorageError::NotFound(what) => write!(f, "not found: {}", what),
            StorageError::ReadFailure(msg) => write!(f, "read failure: {}", msg),
            StorageError::WriteFailure(msg) => write!(f, "write failure: {}", msg),
        }
    }
}

impl std::error::Error for StorageError {}

/// Chain-RPC failures. The core never retries; backoff policy belongs to the
/// caller, since broadcast is not idempotent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChainError {
    Unavailable(String),
    Timeout,
    Rejected(String),
}

impl fmt::Display for ChainError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ChainError::Unavailable(msg) => write!(f, "node unavailable: {}", msg),
            ChainError::Timeout => write!(f, "request timed out"),
            ChainError::Rejected(reason) => write!(f, "rejected by node: {}", reason),
        }
    }
}

impl std::error::Error for ChainError {}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum WalletError {
    // Authentication / session
    AuthenticationFailed,
    SessionLocked,
    UnlockThrottled(String),

    // Storage
    Storage(StorageError),
    StaleRecord,

    // Key management
    DerivationExhausted,
    AddressNotFound(String),
    CryptoError(String),
    SignatureError(String),

    // Network
    Chain(ChainError),

    // Validation errors
    ValidationError(String),
    InvalidAddress(String),

    // Application errors
    AlreadyExists(String),
    NotFound(String),
}

impl fmt::Display for WalletError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            WalletError::AuthenticationFailed => write!(f, "Authentication failed: wrong password"),
            WalletError::SessionLocked => write!(f, "Wallet session is locked"),
            WalletError::UnlockThrottled(msg) => write!(f, "Unlock throttled: {}", msg),

            WalletError::Storage(err) => write!(f, "Storage error: {}", err),
            WalletError::StaleRecord => {
                write!(f, "Wallet record changed outside this session")
            }

            WalletError::DerivationExhausted => write!(f, "Derivation index space exhausted"),
            WalletError::AddressNotFound(addr) => write!(f, "Address not found: {}", addr),
            WalletError::CryptoError(msg) => write!(f, "Cryptographic error: {}", msg),
            WalletError::SignatureError(msg) => write!(f, "Signature error: {}", msg),

            WalletError::Chain(err) => write!(f, "Chain error: {}", err),

            WalletError::ValidationError(msg) => write!(f, "Validation error: {}", msg),
            WalletError::InvalidAddress(msg) => write!(f, "Invalid address: {}", msg),

            WalletError::AlreadyExists(msg) => write!(f, "Already exists: {}", msg),
            WalletError::NotFound(msg) => write!(f, "Not found: {}", msg),
        }
    }
}

impl std::error::Error for WalletError {}

pub type WalletResult<T> = Result<T, WalletError>;

// Conversion helpers
impl From<StorageError> for WalletError {
    fn from(error: StorageError) -> Self {
        WalletError::Storage(error)
    }
}

impl From<ChainError> for WalletError {
    fn from(error: ChainError) -> Self {
        WalletError::Chain(error)
    }
}

impl From<std::io::Error> for WalletError {
    fn from(error: std::io::Error) -> Self {
        match error.kind() {
            std::io::ErrorKind::NotFound => {
                WalletError::Storage(StorageError::NotFound(error.to_string()))
            }
            _ => WalletError::Storage(StorageError::WriteFailure(error.to_string())),
        }
    }
}

impl From<serde_json::Error> for WalletError {
    fn from(error: serde_json::Error) -> Self {
        WalletError::ValidationError(format!("JSON error: {}", error))
    }
}
