//! Signing identities

use super::transaction::{SignedTransaction, Transaction};
use crate::error::{AdmissionError, AdmissionResult};

use ethers::core::rand::thread_rng;
use ethers::signers::{LocalWallet, Signer};
use ethers::types::Address;

/// A private credential and the sending address derived from it
#[derive(Clone)]
pub struct Identity {
    wallet: LocalWallet,
}

impl Identity {
    /// Parse a hex private key, with or without `0x`
    pub fn from_private_key(key: &str) -> AdmissionResult<Self> {
        let wallet = key
            .trim()
            .trim_start_matches("0x")
            .parse::<LocalWallet>()
            .map_err(|e| AdmissionError::Wallet(format!("Invalid private key: {}", e)))?;
        Ok(Self { wallet })
    }

    /// Load from the private key held in environment variable `var`
    pub fn from_env(var: &str) -> AdmissionResult<Self> {
        let key = std::env::var(var)
            .map_err(|_| AdmissionError::Wallet(format!("{} is not set", var)))?;
        Self::from_private_key(&key)
    }

    /// Fresh random identity
    pub fn random() -> Self {
        Self {
            wallet: LocalWallet::new(&mut thread_rng()),
        }
    }

    pub fn address(&self) -> Address {
        self.wallet.address()
    }

    /// Sign `tx` for its chain
    pub fn sign(&self, tx: Transaction) -> AdmissionResult<SignedTransaction> {
        let from = self.address();
        let typed = tx.to_typed(from);
        let signature = self
            .wallet
            .sign_transaction_sync(&typed)
            .map_err(|e| AdmissionError::BuildFailed(format!("signing failed: {}", e)))?;

        Ok(SignedTransaction {
            hash: typed.hash(&signature),
            raw: typed.rlp_signed(&signature),
            from,
            tx,
        })
    }
}

impl std::fmt::Debug for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Identity")
            .field("address", &self.address())
            .finish()
    }
}
