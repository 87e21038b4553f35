//! Small helpers for callers and tests

use crate::error::{AdmissionError, AdmissionResult};

use ethers::core::rand::{thread_rng, Rng};
use ethers::types::{Address, U256};
use ethers::utils::parse_units;

/// Convert a decimal amount to base units, e.g. `("1.5", 18)` to wei
pub fn to_wei(amount: &str, decimals: u32) -> AdmissionResult<U256> {
    parse_units(amount, decimals)
        .map(Into::into)
        .map_err(|e| AdmissionError::Config(format!("invalid amount {:?}: {}", amount, e)))
}

/// A random address, handy as a throwaway recipient
pub fn random_address() -> Address {
    Address::from(thread_rng().gen::<[u8; 20]>())
}
