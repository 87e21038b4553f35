//! Transaction admission layer
//!
//! Shared fee caches, per-identity nonce allocation and a sender offering
//! fire-and-forget and confirmation-waiting submission to a remote ledger.

pub mod chain;
pub mod config;
pub mod confirm;
pub mod error;
pub mod metrics;
pub mod tx;
pub mod util;

#[cfg(test)]
pub(crate) mod testing;

pub use chain::{ChainProvider, HeaderInfo, RemoteLedger};
pub use config::Settings;
pub use confirm::{ConfirmHooks, ConfirmationTracker, Confirmer};
pub use error::{AdmissionError, AdmissionResult};
pub use tx::{
    BaseFeeCache, GasPrice, Identity, NonceAllocator, PendingSet, TipCache, TransactionBuilder,
    TransactionSender, TransferRequest,
};
