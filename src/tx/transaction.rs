//! Transaction shapes shared by the builder, the sender and the ledger seam

use ethers::prelude::*;
use ethers::types::transaction::eip2718::TypedTransaction;

/// Pricing of a transaction: a flat legacy price or a dynamic-fee pair
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GasPrice {
    Legacy(U256),
    Eip1559 {
        max_fee_per_gas: U256,
        max_priority_fee_per_gas: U256,
    },
}

impl GasPrice {
    /// Upper bound on the price paid per unit of gas
    pub fn max_price(&self) -> U256 {
        match self {
            GasPrice::Legacy(price) => *price,
            GasPrice::Eip1559 {
                max_fee_per_gas, ..
            } => *max_fee_per_gas,
        }
    }
}

/// An unsigned transaction with all fields decided
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
    pub chain_id: u64,
    pub nonce: u64,
    pub gas_limit: U256,
    pub gas_price: GasPrice,
    /// `None` deploys a contract
    pub to: Option<Address>,
    pub value: U256,
    pub data: Bytes,
}

impl Transaction {
    /// Convert into the ethers request shape matching the pricing variant
    pub fn to_typed(&self, from: Address) -> TypedTransaction {
        match &self.gas_price {
            GasPrice::Legacy(price) => {
                let mut tx = TransactionRequest::new()
                    .from(from)
                    .value(self.value)
                    .data(self.data.clone())
                    .nonce(self.nonce)
                    .gas(self.gas_limit)
                    .gas_price(*price)
                    .chain_id(self.chain_id);
                if let Some(to) = self.to {
                    tx = tx.to(to);
                }
                TypedTransaction::Legacy(tx)
            }
            GasPrice::Eip1559 {
                max_fee_per_gas,
                max_priority_fee_per_gas,
            } => {
                let mut tx = Eip1559TransactionRequest::new()
                    .from(from)
                    .value(self.value)
                    .data(self.data.clone())
                    .nonce(self.nonce)
                    .gas(self.gas_limit)
                    .max_fee_per_gas(*max_fee_per_gas)
                    .max_priority_fee_per_gas(*max_priority_fee_per_gas)
                    .chain_id(self.chain_id);
                if let Some(to) = self.to {
                    tx = tx.to(to);
                }
                TypedTransaction::Eip1559(tx)
            }
        }
    }
}

/// A signed transaction ready for submission
#[derive(Debug, Clone)]
pub struct SignedTransaction {
    pub hash: H256,
    pub from: Address,
    pub raw: Bytes,
    pub tx: Transaction,
}

impl SignedTransaction {
    pub fn nonce(&self) -> u64 {
        self.tx.nonce
    }
}

/// Parameters for gas estimation and read-only contract calls
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallRequest {
    pub from: Option<Address>,
    pub to: Option<Address>,
    pub value: U256,
    pub data: Bytes,
    /// Price hints; estimation on legacy endpoints passes none
    pub gas_price: Option<GasPrice>,
}

impl CallRequest {
    pub fn to_typed(&self) -> TypedTransaction {
        match &self.gas_price {
            Some(GasPrice::Eip1559 {
                max_fee_per_gas,
                max_priority_fee_per_gas,
            }) => {
                let mut tx = Eip1559TransactionRequest::new()
                    .value(self.value)
                    .data(self.data.clone())
                    .max_fee_per_gas(*max_fee_per_gas)
                    .max_priority_fee_per_gas(*max_priority_fee_per_gas);
                if let Some(from) = self.from {
                    tx = tx.from(from);
                }
                if let Some(to) = self.to {
                    tx = tx.to(to);
                }
                TypedTransaction::Eip1559(tx)
            }
            price => {
                let mut tx = TransactionRequest::new()
                    .value(self.value)
                    .data(self.data.clone());
                if let Some(GasPrice::Legacy(price)) = price {
                    tx = tx.gas_price(*price);
                }
                if let Some(from) = self.from {
                    tx = tx.from(from);
                }
                if let Some(to) = self.to {
                    tx = tx.to(to);
                }
                TypedTransaction::Legacy(tx)
            }
        }
    }
}
