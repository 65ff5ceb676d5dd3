//! Error types for the warden relayer

use crate::chain::ChainRole;
use thiserror::Error;

/// Main error type for the relayer
#[derive(Error, Debug)]
pub enum RelayerError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Ledger storage error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Cannot connect to {role} chain: {message}")]
    Connectivity { role: ChainRole, message: String },

    #[error("Invalid chain role: {0:?} (expected \"source\" or \"destination\")")]
    InvalidChainRole(String),

    #[error("RPC error on {role} chain: {message}")]
    Rpc { role: ChainRole, message: String },

    #[error("Blocks {from_block}..={to_block} could not be scanned: {message}")]
    ScanRange {
        from_block: u64,
        to_block: u64,
        message: String,
    },

    #[error("No warden key configured for the {role} chain")]
    MissingWardenKey { role: ChainRole },

    #[error("Submission rejected on {role} chain: {message}")]
    Submission { role: ChainRole, message: String },

    #[error("No receipt for {tx_hash} after {waited_secs}s")]
    ReceiptTimeout { tx_hash: String, waited_secs: u64 },

    #[error("Event parsing error: {0}")]
    EventParsing(String),

    #[error("Wallet error: {0}")]
    Wallet(String),

    #[error("Contract error: {0}")]
    Contract(String),

    #[error("Invalid state transition from {from} to {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl RelayerError {
    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RelayerError::Rpc { .. }
                | RelayerError::Submission { .. }
                | RelayerError::ScanRange { .. }
        )
    }

    /// Errors that end a pass early instead of being contained per event
    pub fn aborts_pass(&self) -> bool {
        matches!(
            self,
            RelayerError::Config(_)
                | RelayerError::Database(_)
                | RelayerError::Connectivity { .. }
                | RelayerError::InvalidChainRole(_)
        )
    }
}

/// Result type for relayer operations
pub type RelayerResult<T> = Result<T, RelayerError>;
