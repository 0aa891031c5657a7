use alloy::primitives::B256;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failure taxonomy shared by the keystore, the lifecycle state machine and the transaction
/// builder.
///
/// `Authentication` deliberately carries no detail: a wrong password and a corrupted keystore
/// must look the same to the caller.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum WalletError {
    #[error("invalid input: {0}")]
    Validation(String),

    #[error("incorrect password or corrupt keystore")]
    Authentication,

    #[error("signing failed: {0}")]
    Signing(String),

    #[error("node request failed: {0}")]
    Network(String),

    /// The node understood the transaction and refused it (nonce too low, insufficient funds,
    /// underpriced). Resending the same transaction will be refused again.
    #[error("node rejected transaction: {0}")]
    Rejected(String),

    #[error("no receipt for {tx_hash} before the deadline; the transaction may still confirm")]
    Timeout { tx_hash: B256 },

    #[error("{op} is not allowed while the wallet is {state}")]
    InvalidState {
        op: &'static str,
        state: &'static str,
    },

    #[error("user declined")]
    UserDeclined,

    #[error("keystore storage: {0}")]
    Storage(String),
}

impl WalletError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Collapse an `eyre` chain from the transport layer into a retryable network error.
    pub fn network(report: &eyre::Report) -> Self {
        Self::Network(format!("{report:#}"))
    }

    pub fn storage(report: &eyre::Report) -> Self {
        Self::Storage(format!("{report:#}"))
    }

    pub const fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation_error",
            Self::Authentication => "authentication_error",
            Self::Signing(_) => "signing_error",
            Self::Network(_) => "network_error",
            Self::Rejected(_) => "rejected_error",
            Self::Timeout { .. } => "timeout_error",
            Self::InvalidState { .. } => "invalid_state",
            Self::UserDeclined => "user_declined",
            Self::Storage(_) => "storage_error",
        }
    }

    /// Network failures can be retried as-is. A timeout cannot: the broadcast transaction may
    /// still be mined.
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Network(_))
    }
}

/// Machine-readable error line the CLI writes to stderr when a command fails.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorReport {
    pub code: String,
    pub message: String,
}

impl From<&WalletError> for ErrorReport {
    fn from(e: &WalletError) -> Self {
        Self {
            code: e.code().to_owned(),
            message: e.to_string(),
        }
    }
}
