//! Error types for the Aurum ledger core

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ChainError {
    /// Input rejected by a local rule: bad signature, format, fee or date.
    /// Nothing has been mutated.
    #[error("validation failed: {0}")]
    Validation(String),
    /// A multi-row mutation hit an inconsistent state (insufficient balance,
    /// duplicate id, row-count mismatch). The enclosing ledger transaction
    /// must be rolled back.
    #[error("integrity conflict: {0}")]
    Integrity(String),
    /// The underlying store failed mid-operation. Treated like an integrity
    /// conflict: rollback and unlock.
    #[error("storage error: {0}")]
    Storage(String),
    #[error("cryptographic error: {0}")]
    Crypto(String),
    #[error("serialization error: {0}")]
    Serde(String),
    #[error("configuration error: {0}")]
    Config(String),
    /// The genesis block could not be installed. The process must not keep
    /// operating on an uninitialized chain.
    #[error("bootstrap failed: {0}")]
    Bootstrap(String),
}

impl From<rusqlite::Error> for ChainError {
    fn from(err: rusqlite::Error) -> Self {
        ChainError::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for ChainError {
    fn from(err: serde_json::Error) -> Self {
        ChainError::Serde(err.to_string())
    }
}

/// Convenience alias used across the crate
pub type Result<T> = std::result::Result<T, ChainError>;
