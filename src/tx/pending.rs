//! "Sent" and "unconfirmed" bookkeeping for tracked transaction hashes

use dashmap::DashSet;
use ethers::types::H256;

/// Two independently locked hash sets shared by the sender and the
/// confirmation callbacks
#[derive(Debug, Default)]
pub struct PendingSet {
    sent: DashSet<H256>,
    unconfirmed: DashSet<H256>,
}

impl PendingSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// A hash was submitted: it is both sent and unconfirmed
    pub fn mark_sent(&self, tx_hash: H256) {
        self.sent.insert(tx_hash);
        self.unconfirmed.insert(tx_hash);
    }

    /// Confirmation or terminal failure was observed
    pub fn clear_unconfirmed(&self, tx_hash: &H256) {
        self.unconfirmed.remove(tx_hash);
    }

    /// The waiter observed the terminal state
    pub fn clear_sent(&self, tx_hash: &H256) {
        self.sent.remove(tx_hash);
    }

    pub fn is_sent(&self, tx_hash: &H256) -> bool {
        self.sent.contains(tx_hash)
    }

    pub fn is_unconfirmed(&self, tx_hash: &H256) -> bool {
        self.unconfirmed.contains(tx_hash)
    }

    /// Sent and no longer unconfirmed
    pub fn is_settled(&self, tx_hash: &H256) -> bool {
        self.is_sent(tx_hash) && !self.is_unconfirmed(tx_hash)
    }

    pub fn sent_count(&self) -> usize {
        self.sent.len()
    }

    pub fn unconfirmed_count(&self) -> usize {
        self.unconfirmed.len()
    }
}
