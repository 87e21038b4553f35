//! Chain provider backed by an ethers HTTP client

use super::{HeaderInfo, RemoteLedger};
use crate::error::{AdmissionError, AdmissionResult};
use crate::tx::{CallRequest, SignedTransaction};

use async_trait::async_trait;
use ethers::prelude::*;
use ethers::providers::{Http, Provider};
use std::time::Duration;
use tracing::{debug, error, info};

/// HTTP provider for a single remote endpoint
pub struct ChainProvider {
    /// Endpoint URL
    endpoint: String,
    /// Chain ID reported by the endpoint at connect time
    chain_id: u64,
    /// HTTP provider
    http: Provider<Http>,
}

impl ChainProvider {
    /// Connect to an endpoint and read its chain ID
    pub async fn connect(endpoint: &str) -> AdmissionResult<Self> {
        let http = Provider::<Http>::try_from(endpoint)
            .map_err(|e| {
                AdmissionError::Config(format!("invalid endpoint ({}): {}", endpoint, e))
            })?
            .interval(Duration::from_millis(100));

        let chain_id = http
            .get_chainid()
            .await
            .map_err(|e| AdmissionError::remote("chain_id", e))?
            .as_u64();

        info!("Connected to {} (chain {})", endpoint, chain_id);

        Ok(Self {
            endpoint: endpoint.to_string(),
            chain_id,
            http,
        })
    }

    /// Endpoint URL
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Health check
    pub async fn health_check(&self) -> bool {
        match self.block_number().await {
            Ok(_) => true,
            Err(e) => {
                error!("Health check failed for {}: {}", self.endpoint, e);
                false
            }
        }
    }
}

#[async_trait]
impl RemoteLedger for ChainProvider {
    fn chain_id(&self) -> u64 {
        self.chain_id
    }

    async fn suggest_priority_fee(&self) -> AdmissionResult<U256> {
        let tip: U256 = self
            .http
            .request("eth_maxPriorityFeePerGas", ())
            .await
            .map_err(|e| AdmissionError::remote("suggest_priority_fee", e))?;

        debug!("Suggested priority fee on chain {}: {}", self.chain_id, tip);
        Ok(tip)
    }

    async fn latest_header(&self) -> AdmissionResult<HeaderInfo> {
        let block = self
            .http
            .get_block(BlockNumber::Latest)
            .await
            .map_err(|e| AdmissionError::remote("latest_header", e))?
            .ok_or_else(|| AdmissionError::remote("latest_header", "no latest block"))?;

        Ok(HeaderInfo {
            number: block.number.map(|n| n.as_u64()).unwrap_or_default(),
            base_fee: block.base_fee_per_gas,
        })
    }

    async fn block_number(&self) -> AdmissionResult<u64> {
        self.http
            .get_block_number()
            .await
            .map(|b| b.as_u64())
            .map_err(|e| AdmissionError::remote("block_number", e))
    }

    async fn estimate_gas(&self, call: &CallRequest) -> AdmissionResult<U256> {
        self.http
            .estimate_gas(&call.to_typed(), None)
            .await
            .map_err(|e| AdmissionError::remote("estimate_gas", e))
    }

    async fn sequence_number(&self, account: Address) -> AdmissionResult<u64> {
        self.http
            .get_transaction_count(account, None)
            .await
            .map(|n| n.as_u64())
            .map_err(|e| AdmissionError::remote("sequence_number", e))
    }

    async fn submit(&self, tx: &SignedTransaction) -> AdmissionResult<H256> {
        let pending = self
            .http
            .send_raw_transaction(tx.raw.clone())
            .await
            .map_err(|e| AdmissionError::SubmissionFailed {
                message: e.to_string(),
                release_error: None,
            })?;

        Ok(pending.tx_hash())
    }

    async fn receipt(&self, tx_hash: H256) -> AdmissionResult<Option<TransactionReceipt>> {
        self.http
            .get_transaction_receipt(tx_hash)
            .await
            .map_err(|e| AdmissionError::remote("receipt", e))
    }

    async fn balance(&self, account: Address) -> AdmissionResult<U256> {
        self.http
            .get_balance(account, None)
            .await
            .map_err(|e| AdmissionError::remote("balance", e))
    }

    async fn call(&self, call: &CallRequest) -> AdmissionResult<Bytes> {
        self.http
            .call(&call.to_typed(), None)
            .await
            .map_err(|e| AdmissionError::remote("call", e))
    }
}
