//! Error types for the transaction admission layer

use ethers::types::{Address, H256};
use std::time::Duration;
use thiserror::Error;

/// Main error type for the admission layer
#[derive(Error, Debug, Clone)]
pub enum AdmissionError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Remote query `{operation}` failed: {message}")]
    RemoteQueryFailed { operation: String, message: String },

    #[error("Failed to build transaction: {0}")]
    BuildFailed(String),

    #[error("Transaction submission failed: {message}{}", secondary(.release_error))]
    SubmissionFailed {
        message: String,
        release_error: Option<String>,
    },

    #[error("Failed to enqueue transaction for confirmation: {message}{}", secondary(.release_error))]
    EnqueueFailed {
        message: String,
        release_error: Option<String>,
    },

    #[error("Timed out after {waited:?} waiting for tx {tx_hash:?}; outcome unknown")]
    SyncSendTimeout { tx_hash: H256, waited: Duration },

    #[error("Transaction {tx_hash:?} not found")]
    TxNotFound { tx_hash: H256 },

    #[error("Transaction {tx_hash:?} failed on chain")]
    TxFailed { tx_hash: H256 },

    #[error("Transaction {tx_hash:?} has {confirmations} / {required} confirmations")]
    TxConfirmPending {
        tx_hash: H256,
        confirmations: u64,
        required: u64,
    },

    #[error("Nonce error for {identity:?}: {message}")]
    Nonce { identity: Address, message: String },

    #[error("Timeout waiting for {operation}")]
    Timeout { operation: String },

    #[error("Wallet error: {0}")]
    Wallet(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

fn secondary(release_error: &Option<String>) -> String {
    match release_error {
        Some(e) => format!(" (nonce release also failed: {})", e),
        None => String::new(),
    }
}

impl AdmissionError {
    /// Wrap a remote collaborator failure with the operation that issued it
    pub fn remote(operation: impl Into<String>, err: impl std::fmt::Display) -> Self {
        AdmissionError::RemoteQueryFailed {
            operation: operation.into(),
            message: err.to_string(),
        }
    }

    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AdmissionError::RemoteQueryFailed { .. }
                | AdmissionError::Timeout { .. }
                | AdmissionError::TxConfirmPending { .. }
                | AdmissionError::TxNotFound { .. }
        )
    }

    /// A sync send timed out: the transaction may still land later
    pub fn is_outcome_unknown(&self) -> bool {
        matches!(self, AdmissionError::SyncSendTimeout { .. })
    }

    /// Attach the error of a best-effort nonce release to a failure
    pub(crate) fn with_release_error(self, release: Option<AdmissionError>) -> Self {
        let release_error = release.map(|e| e.to_string());
        match self {
            AdmissionError::SubmissionFailed { message, .. } => {
                AdmissionError::SubmissionFailed {
                    message,
                    release_error,
                }
            }
            AdmissionError::EnqueueFailed { message, .. } => AdmissionError::EnqueueFailed {
                message,
                release_error,
            },
            other => other,
        }
    }
}

/// Result type for admission operations
pub type AdmissionResult<T> = Result<T, AdmissionError>;
