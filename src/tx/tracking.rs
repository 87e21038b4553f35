//! Confirmation callbacks and the bookkeeping behind synchronous sends

use super::nonce::{NonceAllocator, NonceReservation};
use super::pending::PendingSet;
use crate::chain::{check_confirmation, RemoteLedger};
use crate::confirm::ConfirmHooks;
use crate::error::{AdmissionError, AdmissionResult};

use async_trait::async_trait;
use dashmap::{DashMap, DashSet};
use ethers::types::{Address, H256};
use std::sync::Arc;
use tracing::{info, warn};

/// Nonce held by a transaction handed to the confirmer but not yet sent
#[derive(Debug, Clone, Copy)]
struct Enqueued {
    identity: Address,
    nonce: u64,
    generation: u64,
}

/// Hooks handed to the confirmation tracker.
///
/// A terminal callback for a hash nobody waits on clears "sent" too, so
/// abandoned sends leave nothing behind.
pub struct SendTracking {
    ledger: Arc<dyn RemoteLedger>,
    allocator: Arc<NonceAllocator>,
    pending: PendingSet,
    enqueued: DashMap<H256, Enqueued>,
    waiters: DashSet<H256>,
    /// Submission errors for waited-on hashes that never got sent
    rejected: DashMap<H256, AdmissionError>,
}

impl SendTracking {
    pub fn new(ledger: Arc<dyn RemoteLedger>, allocator: Arc<NonceAllocator>) -> Self {
        Self {
            ledger,
            allocator,
            pending: PendingSet::new(),
            enqueued: DashMap::new(),
            waiters: DashSet::new(),
            rejected: DashMap::new(),
        }
    }

    pub fn pending(&self) -> &PendingSet {
        &self.pending
    }

    /// Remember the nonce of a transaction the confirmer will submit
    pub(crate) fn record_enqueued(&self, tx_hash: H256, reservation: &NonceReservation) {
        self.enqueued.insert(
            tx_hash,
            Enqueued {
                identity: reservation.identity(),
                nonce: reservation.nonce(),
                generation: reservation.generation(),
            },
        );
    }

    /// Enqueueing failed after `record_enqueued`
    pub(crate) fn forget_enqueued(&self, tx_hash: &H256) {
        self.enqueued.remove(tx_hash);
    }

    pub(crate) fn add_waiter(&self, tx_hash: H256) {
        self.waiters.insert(tx_hash);
    }

    pub(crate) fn remove_waiter(&self, tx_hash: &H256) {
        self.waiters.remove(tx_hash);
        self.pending.clear_sent(tx_hash);
        self.rejected.remove(tx_hash);
    }

    pub(crate) fn take_rejection(&self, tx_hash: &H256) -> Option<AdmissionError> {
        self.rejected.remove(tx_hash).map(|(_, e)| e)
    }

    /// Transactions handed to the tracker and not yet reported sent or failed
    #[cfg(test)]
    pub(crate) fn in_flight(&self) -> usize {
        self.enqueued.len()
    }

    fn settle(&self, tx_hash: &H256) {
        self.pending.clear_unconfirmed(tx_hash);
        if !self.waiters.contains(tx_hash) {
            self.pending.clear_sent(tx_hash);
        }
    }
}

#[async_trait]
impl ConfirmHooks for SendTracking {
    fn on_sent(&self, tx_hash: H256) {
        self.enqueued.remove(&tx_hash);
        self.pending.mark_sent(tx_hash);
        crate::metrics::record_tx_submitted("sync");
    }

    fn on_confirmed(&self, tx_hash: H256) {
        info!("Transaction {:?} confirmed", tx_hash);
        self.settle(&tx_hash);
        crate::metrics::record_tx_confirmed();
    }

    fn on_error(&self, tx_hash: H256, error: AdmissionError) {
        warn!("Transaction {:?} failed: {}", tx_hash, error);
        crate::metrics::record_tx_failed();

        if let Some((_, enqueued)) = self.enqueued.remove(&tx_hash) {
            // Never reached the endpoint: its nonce is still unused
            let release = self
                .allocator
                .release_in_generation(enqueued.identity, enqueued.nonce, enqueued.generation)
                .err();
            if let Some(e) = &release {
                warn!("Failed to release nonce {}: {}", enqueued.nonce, e);
            }
            if self.waiters.contains(&tx_hash) {
                self.rejected
                    .insert(tx_hash, error.with_release_error(release));
                // The waiter may have given up in between
                if !self.waiters.contains(&tx_hash) {
                    self.rejected.remove(&tx_hash);
                }
            }
        }

        self.settle(&tx_hash);
    }

    async fn confirm_check(
        &self,
        tx_hash: H256,
        required_confirmations: u64,
    ) -> AdmissionResult<()> {
        check_confirmation(self.ledger.as_ref(), tx_hash, required_confirmations).await
    }
}
