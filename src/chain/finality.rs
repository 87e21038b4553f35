//! Confirmation-depth checks
//!
//! A transaction is final once its receipt reports success and the chain has
//! grown the required number of blocks past the block that included it.

use super::RemoteLedger;
use crate::error::{AdmissionError, AdmissionResult};

use ethers::types::{H256, U64};
use tracing::debug;

/// Decide whether `tx_hash` reached `required` confirmations.
///
/// Returns `Ok(())` when final, `TxNotFound` when there is no receipt yet,
/// `TxFailed` when the receipt reports a revert and `TxConfirmPending` when
/// the transaction is mined but not yet deep enough.
pub async fn check_confirmation(
    ledger: &dyn RemoteLedger,
    tx_hash: H256,
    required: u64,
) -> AdmissionResult<()> {
    let receipt = ledger
        .receipt(tx_hash)
        .await?
        .ok_or(AdmissionError::TxNotFound { tx_hash })?;

    if receipt.status == Some(U64::zero()) {
        return Err(AdmissionError::TxFailed { tx_hash });
    }

    let Some(included_at) = receipt.block_number.map(|b| b.as_u64()) else {
        // Receipt without a block: still pending inclusion
        return Err(AdmissionError::TxNotFound { tx_hash });
    };

    let current_block = ledger.block_number().await?;
    let confirmations = current_block.saturating_sub(included_at);

    if confirmations < required {
        debug!(
            "Transaction {:?} has {} / {} confirmations",
            tx_hash, confirmations, required
        );
        return Err(AdmissionError::TxConfirmPending {
            tx_hash,
            confirmations,
            required,
        });
    }

    Ok(())
}

/// Get recommended confirmation blocks for a chain
pub fn recommended_confirmations(chain_id: u64) -> u64 {
    match chain_id {
        // Ethereum mainnet
        1 => 32,
        // Ethereum testnets
        11155111 | 5 => 12,
        // Polygon mainnet
        137 => 128,
        // Polygon testnets
        80001 | 80002 => 32,
        // Arbitrum
        42161 | 421614 => 64,
        // Optimism
        10 | 11155420 => 64,
        // Base
        8453 | 84532 => 64,
        // Avalanche (instant finality)
        43114 | 43113 => 1,
        // Local dev chains
        1337 | 31337 => 0,
        // Default conservative
        _ => 64,
    }
}
