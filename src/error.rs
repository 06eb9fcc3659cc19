//! Error types for the HTLC coordinator

use serde::Serialize;
use thiserror::Error;

/// Main error type for the coordinator
#[derive(Error, Debug)]
pub enum CoordinatorError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Storage error: {0}")]
    Storage(#[from] sqlx::Error),

    #[error("Missing required field: {field}")]
    MissingRequiredField { field: String },

    #[error("Invalid asset identifier: {0}")]
    InvalidAsset(String),

    #[error("Invalid {field}: {message}")]
    InvalidField { field: String, message: String },

    #[error("Unsupported chain: {chain}")]
    UnsupportedChain { chain: String },

    #[error("Order {order_id} not found")]
    NotFound { order_id: String },

    #[error("Timeout waiting for {operation}")]
    Timeout { operation: String },

    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Signing rejected: {0}")]
    SigningRejected(String),

    #[error("No wallet session for {family}")]
    WalletUnavailable { family: String },

    #[error("Failed to switch to chain {chain_id}: {message}")]
    ChainSwitchFailed { chain_id: u64, message: String },

    #[error("Transaction submission failed: {0}")]
    SubmissionFailed(String),

    #[error("Chain connection error for chain {chain_id}: {message}")]
    ChainConnection { chain_id: u64, message: String },

    #[error("Transaction {tx_hash} reverted")]
    TransactionReverted { tx_hash: String },

    #[error("{operation} is not supported for {family}")]
    UnsupportedOperation { family: String, operation: String },

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Coarse classification used for surfacing errors to callers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Input,
    Network,
    Wallet,
    Chain,
    Unimplemented,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Input => "input",
            ErrorKind::Network => "network",
            ErrorKind::Wallet => "wallet",
            ErrorKind::Chain => "chain",
            ErrorKind::Unimplemented => "unimplemented",
            ErrorKind::Internal => "internal",
        }
    }
}

impl CoordinatorError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CoordinatorError::MissingRequiredField { .. }
            | CoordinatorError::InvalidAsset(_)
            | CoordinatorError::InvalidField { .. }
            | CoordinatorError::UnsupportedChain { .. } => ErrorKind::Input,
            CoordinatorError::NotFound { .. }
            | CoordinatorError::Timeout { .. }
            | CoordinatorError::MalformedResponse(_)
            | CoordinatorError::Http(_) => ErrorKind::Network,
            CoordinatorError::SigningRejected(_)
            | CoordinatorError::WalletUnavailable { .. }
            | CoordinatorError::ChainSwitchFailed { .. }
            | CoordinatorError::SubmissionFailed(_) => ErrorKind::Wallet,
            CoordinatorError::ChainConnection { .. }
            | CoordinatorError::TransactionReverted { .. } => ErrorKind::Chain,
            CoordinatorError::UnsupportedOperation { .. } => ErrorKind::Unimplemented,
            CoordinatorError::Config(_)
            | CoordinatorError::Storage(_)
            | CoordinatorError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Check if an automatic rule may fire again without caller involvement
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CoordinatorError::NotFound { .. }
                | CoordinatorError::Timeout { .. }
                | CoordinatorError::MalformedResponse(_)
                | CoordinatorError::Http(_)
                | CoordinatorError::ChainConnection { .. }
                | CoordinatorError::TransactionReverted { .. }
                | CoordinatorError::WalletUnavailable { .. }
        )
    }

    /// Check if the user has to act (approve a prompt, switch network) before a retry
    pub fn requires_user_action(&self) -> bool {
        matches!(
            self,
            CoordinatorError::SigningRejected(_)
                | CoordinatorError::ChainSwitchFailed { .. }
                | CoordinatorError::SubmissionFailed(_)
        )
    }
}

/// Serializable snapshot of an error, kept as order-scoped state
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorReport {
    pub kind: ErrorKind,
    pub message: String,
    pub retryable: bool,
    pub user_action: bool,
}

impl From<&CoordinatorError> for ErrorReport {
    fn from(err: &CoordinatorError) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
            retryable: err.is_retryable(),
            user_action: err.requires_user_action(),
        }
    }
}

/// Result type for coordinator operations
pub type CoordinatorResult<T> = Result<T, CoordinatorError>;
