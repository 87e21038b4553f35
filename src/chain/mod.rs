//! Chain module - the remote ledger seam
//!
//! This module provides:
//! - The `RemoteLedger` contract consumed by caches, allocator and sender
//! - An ethers-backed HTTP implementation (`ChainProvider`)
//! - Confirmation-depth checks and recommended depths per chain

pub mod finality;
pub mod provider;

pub use finality::{check_confirmation, recommended_confirmations};
pub use provider::ChainProvider;

use crate::error::AdmissionResult;
use crate::tx::{CallRequest, SignedTransaction};

use async_trait::async_trait;
use ethers::types::{Address, Bytes, TransactionReceipt, H256, U256};

/// The parts of the latest block header this layer cares about
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeaderInfo {
    pub number: u64,
    /// `None` on endpoints without dynamic-fee pricing
    pub base_fee: Option<U256>,
}

/// Remote ledger client
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RemoteLedger: Send + Sync {
    /// Chain ID transactions are signed for
    fn chain_id(&self) -> u64;

    /// Suggested priority fee (tip)
    async fn suggest_priority_fee(&self) -> AdmissionResult<U256>;

    /// Latest block header
    async fn latest_header(&self) -> AdmissionResult<HeaderInfo>;

    /// Current block number
    async fn block_number(&self) -> AdmissionResult<u64>;

    /// Estimate the gas limit for a call
    async fn estimate_gas(&self, call: &CallRequest) -> AdmissionResult<U256>;

    /// Current on-chain sequence number of an account
    async fn sequence_number(&self, account: Address) -> AdmissionResult<u64>;

    /// Submit a signed transaction
    async fn submit(&self, tx: &SignedTransaction) -> AdmissionResult<H256>;

    /// Transaction receipt, `None` while not mined
    async fn receipt(&self, tx_hash: H256) -> AdmissionResult<Option<TransactionReceipt>>;

    /// Account balance in wei
    async fn balance(&self, account: Address) -> AdmissionResult<U256>;

    /// Read-only contract call
    async fn call(&self, call: &CallRequest) -> AdmissionResult<Bytes>;

    /// Whether the endpoint prices transactions with a base fee
    async fn supports_dynamic_fee(&self) -> AdmissionResult<bool> {
        Ok(self.latest_header().await?.base_fee.is_some())
    }
}
