//! Confirmation tracking
//!
//! The tracker owns submission-for-sync-sends and the polling for finality;
//! the admission layer supplies the hooks it reports through.

mod confirmer;

pub use confirmer::Confirmer;

use crate::error::{AdmissionError, AdmissionResult};
use crate::tx::SignedTransaction;

use async_trait::async_trait;
use ethers::types::H256;
use std::sync::Arc;

/// Callbacks invoked from the tracker's workers
#[async_trait]
pub trait ConfirmHooks: Send + Sync {
    /// The transaction was accepted by the endpoint
    fn on_sent(&self, tx_hash: H256);

    /// The transaction reached the required depth
    fn on_confirmed(&self, tx_hash: H256);

    /// Submission was rejected or the transaction failed on chain
    fn on_error(&self, tx_hash: H256, error: AdmissionError);

    /// Finality decision: `Ok` when final, otherwise `TxNotFound`,
    /// `TxFailed` or `TxConfirmPending`
    async fn confirm_check(&self, tx_hash: H256, required_confirmations: u64)
        -> AdmissionResult<()>;
}

/// Confirmation-tracking collaborator
#[async_trait]
pub trait ConfirmationTracker: Send + Sync {
    /// Queue a signed transaction for submission and tracking
    fn enqueue(&self, tx: SignedTransaction) -> AdmissionResult<()>;

    /// Queue an already submitted transaction for tracking
    fn enqueue_by_hash(&self, tx_hash: H256) -> AdmissionResult<()>;

    /// Start the workers, reporting through `hooks`
    fn start(&self, hooks: Arc<dyn ConfirmHooks>);

    /// Stop the workers and wait for them to exit
    async fn stop(&self);
}
