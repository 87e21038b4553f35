//! Transaction sender: fire-and-forget and confirmation-waiting submission

use super::builder::{BuiltTransaction, TransactionBuilder, TransferRequest};
use super::identity::Identity;
use super::pending::PendingSet;
use super::tracking::SendTracking;
use super::transaction::CallRequest;
use crate::chain::RemoteLedger;
use crate::config::ClientConfig;
use crate::confirm::ConfirmationTracker;
use crate::error::{AdmissionError, AdmissionResult};

use ethers::types::{Address, Bytes, TransactionReceipt, H256, U256};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::{interval, timeout, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Sends transactions on behalf of many callers sharing signing identities
pub struct TransactionSender {
    /// Remote ledger
    ledger: Arc<dyn RemoteLedger>,
    /// Fee caches and nonce allocator
    builder: TransactionBuilder,
    /// Confirmation-tracking collaborator
    tracker: Arc<dyn ConfirmationTracker>,
    /// Hooks and bookkeeping shared with the tracker
    tracking: Arc<SendTracking>,
    /// Bounds building plus immediate submission
    request_timeout: Duration,
    /// Bounds the wait for a synchronous send to settle
    sync_send_timeout: Duration,
    /// How often a synchronous send checks its hash
    poll_interval: Duration,
}

impl TransactionSender {
    /// Create a new transaction sender
    pub fn new(
        config: &ClientConfig,
        ledger: Arc<dyn RemoteLedger>,
        tracker: Arc<dyn ConfirmationTracker>,
    ) -> Self {
        Self::with_builder(config, ledger, tracker, TransactionBuilder::from_config(config))
    }

    /// Create a sender around a preconfigured builder
    pub fn with_builder(
        config: &ClientConfig,
        ledger: Arc<dyn RemoteLedger>,
        tracker: Arc<dyn ConfirmationTracker>,
        builder: TransactionBuilder,
    ) -> Self {
        let tracking = Arc::new(SendTracking::new(
            ledger.clone(),
            builder.allocator().clone(),
        ));

        Self {
            ledger,
            builder,
            tracker,
            tracking,
            request_timeout: config.request_timeout(),
            sync_send_timeout: config.sync_send_timeout(),
            poll_interval: config.sync_send_poll_interval(),
        }
    }

    /// Start the confirmation tracker
    pub fn start(&self) {
        self.tracker.start(self.tracking.clone());
    }

    /// Stop the confirmation tracker
    pub async fn stop(&self) {
        self.tracker.stop().await;
    }

    /// Build and sign without submitting.
    ///
    /// The returned reservation releases the nonce when dropped unless it is
    /// committed after a successful submission.
    pub async fn build(
        &self,
        identity: &Identity,
        request: &TransferRequest,
    ) -> AdmissionResult<BuiltTransaction> {
        self.with_timeout(
            "build transaction",
            self.builder.build(self.ledger.as_ref(), identity, request),
        )
        .await
    }

    /// Submit and return the hash without waiting for confirmation
    pub async fn async_send(
        &self,
        identity: &Identity,
        request: &TransferRequest,
    ) -> AdmissionResult<H256> {
        self.with_timeout("async send", async {
            let BuiltTransaction {
                signed,
                reservation,
            } = self
                .builder
                .build(self.ledger.as_ref(), identity, request)
                .await?;

            match self.ledger.submit(&signed).await {
                Ok(_) => {
                    let nonce = reservation.commit();
                    info!(
                        "Transaction sent: {:?} (from {:?}, nonce {})",
                        signed.hash, signed.from, nonce
                    );
                    crate::metrics::record_tx_submitted("async");
                    Ok(signed.hash)
                }
                Err(e) => {
                    warn!("Submission of {:?} failed: {}", signed.hash, e);
                    let release = reservation.release().err();
                    Err(as_submission_failure(e).with_release_error(release))
                }
            }
        })
        .await
    }

    /// Hand the transaction to the confirmer and wait until it settles.
    ///
    /// `Ok` means the transaction reached a terminal state; whether it
    /// confirmed or reverted is reported through the confirmer's callbacks.
    /// `SyncSendTimeout` means the outcome is unknown, not that it failed.
    pub async fn sync_send(
        &self,
        identity: &Identity,
        request: &TransferRequest,
    ) -> AdmissionResult<H256> {
        let started = Instant::now();
        let BuiltTransaction {
            signed,
            reservation,
        } = self.build(identity, request).await?;
        let tx_hash = signed.hash;

        let _waiter = Waiter::register(self.tracking.clone(), tx_hash);
        self.tracking.record_enqueued(tx_hash, &reservation);

        if let Err(e) = self.tracker.enqueue(signed) {
            warn!("Failed to enqueue {:?}: {}", tx_hash, e);
            self.tracking.forget_enqueued(&tx_hash);
            let release = reservation.release().err();
            return Err(e.with_release_error(release));
        }
        // From here the tracking hooks release the nonce if submission fails
        reservation.commit();

        match timeout(self.sync_send_timeout, self.wait_settled(tx_hash)).await {
            Ok(result) => {
                crate::metrics::record_sync_send_latency(started.elapsed().as_secs_f64());
                result
            }
            Err(_) => {
                warn!(
                    "Timed out after {:?} waiting for {:?}",
                    self.sync_send_timeout, tx_hash
                );
                crate::metrics::record_sync_send_timeout();
                Err(AdmissionError::SyncSendTimeout {
                    tx_hash,
                    waited: self.sync_send_timeout,
                })
            }
        }
    }

    async fn wait_settled(&self, tx_hash: H256) -> AdmissionResult<H256> {
        let mut ticker = interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;

            if let Some(e) = self.tracking.take_rejection(&tx_hash) {
                return Err(e);
            }

            let pending = self.tracking.pending();
            if pending.is_settled(&tx_hash) {
                pending.clear_sent(&tx_hash);
                debug!("Transaction {:?} settled", tx_hash);
                return Ok(tx_hash);
            }
        }
    }

    /// Watch an externally submitted transaction until final
    pub fn track(&self, tx_hash: H256) -> AdmissionResult<()> {
        self.tracker.enqueue_by_hash(tx_hash)
    }

    /// On-chain sequence number of `account`, bypassing the allocator
    pub async fn nonce(&self, account: Address) -> AdmissionResult<u64> {
        self.with_timeout("nonce", self.ledger.sequence_number(account))
            .await
    }

    /// The nonce the allocator would hand out next for `account`
    pub fn peek_nonce(&self, account: Address) -> AdmissionResult<u64> {
        self.builder.allocator().peek(account)
    }

    /// Force the allocator's next nonce for `account`
    pub fn reset_nonce(&self, account: Address, next: u64) -> AdmissionResult<()> {
        self.builder.allocator().reset(account, next)
    }

    /// Get a transaction receipt
    pub async fn receipt(&self, tx_hash: H256) -> AdmissionResult<Option<TransactionReceipt>> {
        self.with_timeout("receipt", self.ledger.receipt(tx_hash))
            .await
    }

    /// Get an account balance
    pub async fn balance(&self, account: Address) -> AdmissionResult<U256> {
        self.with_timeout("balance", self.ledger.balance(account))
            .await
    }

    /// Read-only contract call
    pub async fn query_contract(
        &self,
        to: Address,
        data: impl Into<Bytes>,
    ) -> AdmissionResult<Bytes> {
        let call = CallRequest {
            to: Some(to),
            data: data.into(),
            ..CallRequest::default()
        };
        self.with_timeout("query contract", self.ledger.call(&call))
            .await
    }

    /// "Sent"/"unconfirmed" bookkeeping
    pub fn pending(&self) -> &PendingSet {
        self.tracking.pending()
    }

    pub fn chain_id(&self) -> u64 {
        self.ledger.chain_id()
    }

    async fn with_timeout<T>(
        &self,
        operation: &str,
        fut: impl Future<Output = AdmissionResult<T>>,
    ) -> AdmissionResult<T> {
        timeout(self.request_timeout, fut)
            .await
            .map_err(|_| AdmissionError::Timeout {
                operation: operation.to_string(),
            })?
    }
}

fn as_submission_failure(e: AdmissionError) -> AdmissionError {
    match e {
        AdmissionError::SubmissionFailed { .. } => e,
        other => AdmissionError::SubmissionFailed {
            message: other.to_string(),
            release_error: None,
        },
    }
}

/// Registered while a synchronous send waits; cleans up on every exit path
struct Waiter {
    tracking: Arc<SendTracking>,
    tx_hash: H256,
}

impl Waiter {
    fn register(tracking: Arc<SendTracking>, tx_hash: H256) -> Self {
        tracking.add_waiter(tx_hash);
        Self { tracking, tx_hash }
    }
}

impl Drop for Waiter {
    fn drop(&mut self) {
        self.tracking.remove_waiter(&self.tx_hash);
    }
}
