//! Transaction builder: price + nonce + payload into a signed transaction

use super::fees::{BaseFeeCache, TipCache};
use super::identity::Identity;
use super::nonce::{NonceAllocator, NonceReservation};
use super::transaction::{CallRequest, GasPrice, SignedTransaction, Transaction};
use crate::chain::RemoteLedger;
use crate::config::ClientConfig;
use crate::error::AdmissionResult;

use ethers::types::{Address, Bytes, U256};
use std::sync::Arc;
use tracing::debug;

/// What to send; the builder decides price, gas limit and nonce
#[derive(Debug, Clone, Default)]
pub struct TransferRequest {
    /// `None` deploys `data` as contract code
    pub to: Option<Address>,
    pub value: U256,
    pub data: Bytes,
    /// Zero asks the ledger for an estimate
    pub gas_limit: u64,
}

impl TransferRequest {
    pub fn transfer(to: Address, value: U256) -> Self {
        Self {
            to: Some(to),
            value,
            ..Self::default()
        }
    }

    pub fn call(to: Address, data: impl Into<Bytes>) -> Self {
        Self {
            to: Some(to),
            data: data.into(),
            ..Self::default()
        }
    }

    pub fn deploy(code: impl Into<Bytes>) -> Self {
        Self {
            data: code.into(),
            ..Self::default()
        }
    }

    pub fn with_value(mut self, value: U256) -> Self {
        self.value = value;
        self
    }

    pub fn with_gas_limit(mut self, gas_limit: u64) -> Self {
        self.gas_limit = gas_limit;
        self
    }
}

/// A signed transaction holding on to the nonce it consumes
#[derive(Debug)]
pub struct BuiltTransaction {
    pub signed: SignedTransaction,
    pub reservation: NonceReservation,
}

impl BuiltTransaction {
    pub fn nonce(&self) -> u64 {
        self.reservation.nonce()
    }
}

/// Composes transactions from the fee caches and the nonce allocator
pub struct TransactionBuilder {
    tip_cache: TipCache,
    base_fee_cache: BaseFeeCache,
    allocator: Arc<NonceAllocator>,
    /// Flat price for endpoints without dynamic fees
    static_gas_price: U256,
}

impl TransactionBuilder {
    pub fn new(
        tip_cache: TipCache,
        base_fee_cache: BaseFeeCache,
        allocator: Arc<NonceAllocator>,
        static_gas_price: U256,
    ) -> Self {
        Self {
            tip_cache,
            base_fee_cache,
            allocator,
            static_gas_price,
        }
    }

    pub fn from_config(config: &ClientConfig) -> Self {
        Self::new(
            TipCache::new(config.tip_cache_ttl()),
            BaseFeeCache::new(config.base_fee_cache_ttl()),
            Arc::new(NonceAllocator::new(config.nonce_cache_capacity)),
            U256::from(config.static_gas_price_wei),
        )
    }

    pub fn allocator(&self) -> &Arc<NonceAllocator> {
        &self.allocator
    }

    /// Price, estimate, number and sign `request` on behalf of `identity`
    pub async fn build(
        &self,
        ledger: &dyn RemoteLedger,
        identity: &Identity,
        request: &TransferRequest,
    ) -> AdmissionResult<BuiltTransaction> {
        let from = identity.address();
        let gas_price = self.gas_price(ledger).await?;

        let gas_limit = if request.gas_limit == 0 {
            let hint = match gas_price {
                GasPrice::Eip1559 { .. } => Some(gas_price.clone()),
                GasPrice::Legacy(_) => None,
            };
            ledger
                .estimate_gas(&CallRequest {
                    from: Some(from),
                    to: request.to,
                    value: request.value,
                    data: request.data.clone(),
                    gas_price: hint,
                })
                .await?
        } else {
            U256::from(request.gas_limit)
        };

        let reservation = self.allocator.reserve(ledger, from).await?;
        let nonce = reservation.nonce();

        let tx = Transaction {
            chain_id: ledger.chain_id(),
            nonce,
            gas_limit,
            gas_price,
            to: request.to,
            value: request.value,
            data: request.data.clone(),
        };

        // A signing failure drops the reservation, releasing the nonce
        let signed = identity.sign(tx)?;

        debug!(
            "Built tx {:?} from {:?} (nonce {}, gas {}, max price {})",
            signed.hash,
            from,
            nonce,
            gas_limit,
            signed.tx.gas_price.max_price()
        );

        Ok(BuiltTransaction {
            signed,
            reservation,
        })
    }

    /// Pricing for this call, probing dynamic-fee support each time
    async fn gas_price(&self, ledger: &dyn RemoteLedger) -> AdmissionResult<GasPrice> {
        if !ledger.supports_dynamic_fee().await? {
            return Ok(GasPrice::Legacy(self.static_gas_price));
        }

        let tip = self.tip_cache.get(ledger).await?;
        let fee_cap = self.base_fee_cache.fee_cap(ledger, tip).await?;

        Ok(GasPrice::Eip1559 {
            max_fee_per_gas: fee_cap,
            max_priority_fee_per_gas: tip,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{dev_identity, FakeLedger};
    use std::collections::HashSet;
    use std::time::Duration;

    fn builder() -> TransactionBuilder {
        TransactionBuilder::new(
            TipCache::new(Duration::from_secs(60)),
            BaseFeeCache::new(Duration::from_secs(60)),
            Arc::new(NonceAllocator::new(16)),
            U256::from(7),
        )
    }

    #[tokio::test]
    async fn test_dynamic_fee_build_estimates_with_prices() {
        let ledger = FakeLedger::new();
        ledger.set_tip(U256::from(2));
        ledger.set_base_fee(Some(U256::from(10)));
        ledger.set_gas_estimate(U256::from(50_000));
        let identity = dev_identity();

        let built = builder()
            .build(
                &ledger,
                &identity,
                &TransferRequest::transfer(Address::repeat_byte(1), U256::from(5)),
            )
            .await
            .unwrap();

        assert_eq!(built.nonce(), 0);
        assert_eq!(built.signed.tx.gas_limit, U256::from(50_000));
        assert_eq!(
            built.signed.tx.gas_price,
            GasPrice::Eip1559 {
                max_fee_per_gas: U256::from(22),
                max_priority_fee_per_gas: U256::from(2),
            }
        );

        let estimate = ledger.last_estimate().unwrap();
        assert_eq!(estimate.from, Some(identity.address()));
        assert_eq!(estimate.gas_price, Some(built.signed.tx.gas_price.clone()));
        built.reservation.commit();
    }

    #[tokio::test]
    async fn test_legacy_build_uses_static_price() {
        let ledger = FakeLedger::new();
        ledger.set_base_fee(None);
        let identity = dev_identity();

        let built = builder()
            .build(&ledger, &identity, &TransferRequest::deploy(vec![0x60, 0x00]))
            .await
            .unwrap();

        assert_eq!(built.signed.tx.gas_price, GasPrice::Legacy(U256::from(7)));
        assert!(built.signed.tx.to.is_none());
        assert!(ledger.last_estimate().unwrap().gas_price.is_none());
        assert_eq!(ledger.tip_queries(), 0);
        built.reservation.commit();
    }

    #[tokio::test]
    async fn test_explicit_gas_limit_skips_estimation() {
        let ledger = FakeLedger::new();
        let identity = dev_identity();

        let built = builder()
            .build(
                &ledger,
                &identity,
                &TransferRequest::transfer(Address::repeat_byte(1), U256::one())
                    .with_gas_limit(21_000),
            )
            .await
            .unwrap();

        assert_eq!(built.signed.tx.gas_limit, U256::from(21_000));
        assert_eq!(ledger.estimate_queries(), 0);
        built.reservation.commit();
    }

    #[tokio::test]
    async fn test_failed_estimate_allocates_nothing() {
        let ledger = FakeLedger::new();
        ledger.fail_estimates(true);
        let identity = dev_identity();
        let builder = builder();

        tokio_test::assert_err!(
            builder
                .build(&ledger, &identity, &TransferRequest::default())
                .await
        );
        assert!(!builder.allocator().contains(identity.address()));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_builds_share_caches_and_unique_nonces() {
        let ledger = Arc::new(FakeLedger::new());
        ledger.set_tip(U256::from(1_000_000_000u64));
        ledger.set_base_fee(Some(U256::from(1_000_000_000u64)));
        ledger.set_gas_estimate(U256::from(21_000));
        let identity = dev_identity();
        ledger.set_sequence_number(identity.address(), 0);
        let builder = Arc::new(builder());

        let handles: Vec<_> = (0..3)
            .map(|_| {
                let builder = builder.clone();
                let ledger = ledger.clone();
                let identity = identity.clone();
                tokio::spawn(async move {
                    builder
                        .build(
                            ledger.as_ref(),
                            &identity,
                            &TransferRequest::transfer(Address::repeat_byte(9), U256::one()),
                        )
                        .await
                })
            })
            .collect();

        let mut nonces = HashSet::new();
        for result in futures::future::join_all(handles).await {
            let built = result.unwrap().unwrap();
            assert_eq!(
                built.signed.tx.gas_price,
                GasPrice::Eip1559 {
                    max_fee_per_gas: U256::from(3_000_000_000u64),
                    max_priority_fee_per_gas: U256::from(1_000_000_000u64),
                }
            );
            nonces.insert(built.reservation.commit());
        }

        assert_eq!(nonces, HashSet::from([0, 1, 2]));
        assert_eq!(builder.allocator().peek(identity.address()).unwrap(), 3);
        assert_eq!(ledger.tip_queries(), 1);
        assert_eq!(ledger.estimate_queries(), 3);
    }
}
