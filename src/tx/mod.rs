//! Transaction admission: fee caches, nonce allocation, building and sending

mod builder;
mod fees;
mod identity;
mod nonce;
mod pending;
mod sender;
mod tracking;
mod transaction;

pub use builder::{BuiltTransaction, TransactionBuilder, TransferRequest};
pub use fees::{fee_cap, BaseFeeCache, TipCache};
pub use identity::Identity;
pub use nonce::{NonceAllocator, NonceEviction, NonceReservation};
pub use pending::PendingSet;
pub use sender::TransactionSender;
pub use tracking::SendTracking;
pub use transaction::{CallRequest, GasPrice, SignedTransaction, Transaction};
