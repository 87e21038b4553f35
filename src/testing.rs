//! In-memory collaborators for unit tests

use crate::chain::{HeaderInfo, RemoteLedger};
use crate::confirm::{ConfirmHooks, ConfirmationTracker};
use crate::error::{AdmissionError, AdmissionResult};
use crate::tx::{CallRequest, Identity, SignedTransaction};

use async_trait::async_trait;
use ethers::types::{Address, Bytes, TransactionReceipt, H256, U256, U64};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Well-known development key
pub const DEV_KEY: &str = "ac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";

pub fn dev_identity() -> Identity {
    Identity::from_private_key(DEV_KEY).unwrap()
}

struct LedgerState {
    tip: U256,
    base_fee: Option<U256>,
    block_number: u64,
    gas_estimate: U256,
    sequence_numbers: HashMap<Address, u64>,
    balances: HashMap<Address, U256>,
    receipts: HashMap<H256, TransactionReceipt>,
    submitted: Vec<(H256, u64)>,
    last_estimate: Option<CallRequest>,
    submit_delay: Option<Duration>,
}

/// Scriptable remote ledger
pub struct FakeLedger {
    chain_id: u64,
    state: Mutex<LedgerState>,
    fail_queries: AtomicBool,
    fail_estimates: AtomicBool,
    fail_submissions: AtomicBool,
    auto_mine: AtomicBool,
    tip_queries: AtomicUsize,
    sequence_queries: AtomicUsize,
    estimate_queries: AtomicUsize,
}

impl Default for FakeLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeLedger {
    pub fn new() -> Self {
        Self {
            chain_id: 31337,
            state: Mutex::new(LedgerState {
                tip: U256::from(1_000_000_000u64),
                base_fee: Some(U256::from(1_000_000_000u64)),
                block_number: 100,
                gas_estimate: U256::from(21_000),
                sequence_numbers: HashMap::new(),
                balances: HashMap::new(),
                receipts: HashMap::new(),
                submitted: Vec::new(),
                last_estimate: None,
                submit_delay: None,
            }),
            fail_queries: AtomicBool::new(false),
            fail_estimates: AtomicBool::new(false),
            fail_submissions: AtomicBool::new(false),
            auto_mine: AtomicBool::new(false),
            tip_queries: AtomicUsize::new(0),
            sequence_queries: AtomicUsize::new(0),
            estimate_queries: AtomicUsize::new(0),
        }
    }

    pub fn with_chain_id(mut self, chain_id: u64) -> Self {
        self.chain_id = chain_id;
        self
    }

    pub fn set_tip(&self, tip: U256) {
        self.state.lock().tip = tip;
    }

    pub fn set_base_fee(&self, base_fee: Option<U256>) {
        self.state.lock().base_fee = base_fee;
    }

    pub fn set_block_number(&self, number: u64) {
        self.state.lock().block_number = number;
    }

    pub fn set_gas_estimate(&self, gas: U256) {
        self.state.lock().gas_estimate = gas;
    }

    pub fn set_sequence_number(&self, account: Address, nonce: u64) {
        self.state.lock().sequence_numbers.insert(account, nonce);
    }

    pub fn set_balance(&self, account: Address, balance: U256) {
        self.state.lock().balances.insert(account, balance);
    }

    pub fn set_submit_delay(&self, delay: Option<Duration>) {
        self.state.lock().submit_delay = delay;
    }

    /// Fee, header, sequence and balance queries fail
    pub fn fail_queries(&self, fail: bool) {
        self.fail_queries.store(fail, Ordering::SeqCst);
    }

    pub fn fail_estimates(&self, fail: bool) {
        self.fail_estimates.store(fail, Ordering::SeqCst);
    }

    pub fn fail_submissions(&self, fail: bool) {
        self.fail_submissions.store(fail, Ordering::SeqCst);
    }

    /// Give every accepted submission a successful receipt at the current block
    pub fn auto_mine(&self, enabled: bool) {
        self.auto_mine.store(enabled, Ordering::SeqCst);
    }

    /// Store a receipt for `tx_hash` at `block`
    pub fn mine(&self, tx_hash: H256, block: u64, success: bool) {
        let receipt = TransactionReceipt {
            transaction_hash: tx_hash,
            block_number: Some(U64::from(block)),
            status: Some(if success { U64::one() } else { U64::zero() }),
            ..TransactionReceipt::default()
        };
        self.state.lock().receipts.insert(tx_hash, receipt);
    }

    pub fn tip_queries(&self) -> usize {
        self.tip_queries.load(Ordering::SeqCst)
    }

    pub fn sequence_queries(&self) -> usize {
        self.sequence_queries.load(Ordering::SeqCst)
    }

    pub fn estimate_queries(&self) -> usize {
        self.estimate_queries.load(Ordering::SeqCst)
    }

    pub fn last_estimate(&self) -> Option<CallRequest> {
        self.state.lock().last_estimate.clone()
    }

    pub fn submitted(&self) -> Vec<H256> {
        self.state.lock().submitted.iter().map(|(h, _)| *h).collect()
    }

    pub fn submitted_nonces(&self) -> Vec<(H256, u64)> {
        self.state.lock().submitted.clone()
    }

    fn check_queries(&self, operation: &str) -> AdmissionResult<()> {
        if self.fail_queries.load(Ordering::SeqCst) {
            return Err(AdmissionError::remote(operation, "connection refused"));
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteLedger for FakeLedger {
    fn chain_id(&self) -> u64 {
        self.chain_id
    }

    async fn suggest_priority_fee(&self) -> AdmissionResult<U256> {
        self.tip_queries.fetch_add(1, Ordering::SeqCst);
        self.check_queries("suggest_priority_fee")?;
        Ok(self.state.lock().tip)
    }

    async fn latest_header(&self) -> AdmissionResult<HeaderInfo> {
        self.check_queries("latest_header")?;
        let state = self.state.lock();
        Ok(HeaderInfo {
            number: state.block_number,
            base_fee: state.base_fee,
        })
    }

    async fn block_number(&self) -> AdmissionResult<u64> {
        self.check_queries("block_number")?;
        Ok(self.state.lock().block_number)
    }

    async fn estimate_gas(&self, call: &CallRequest) -> AdmissionResult<U256> {
        self.estimate_queries.fetch_add(1, Ordering::SeqCst);
        if self.fail_estimates.load(Ordering::SeqCst) {
            return Err(AdmissionError::remote("estimate_gas", "execution reverted"));
        }
        let mut state = self.state.lock();
        state.last_estimate = Some(call.clone());
        Ok(state.gas_estimate)
    }

    async fn sequence_number(&self, account: Address) -> AdmissionResult<u64> {
        self.sequence_queries.fetch_add(1, Ordering::SeqCst);
        self.check_queries("sequence_number")?;
        Ok(self
            .state
            .lock()
            .sequence_numbers
            .get(&account)
            .copied()
            .unwrap_or_default())
    }

    async fn submit(&self, tx: &SignedTransaction) -> AdmissionResult<H256> {
        let delay = self.state.lock().submit_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if self.fail_submissions.load(Ordering::SeqCst) {
            return Err(AdmissionError::SubmissionFailed {
                message: "replacement transaction underpriced".to_string(),
                release_error: None,
            });
        }

        let block = {
            let mut state = self.state.lock();
            state.submitted.push((tx.hash, tx.nonce()));
            state.block_number
        };
        if self.auto_mine.load(Ordering::SeqCst) {
            self.mine(tx.hash, block, true);
        }
        Ok(tx.hash)
    }

    async fn receipt(&self, tx_hash: H256) -> AdmissionResult<Option<TransactionReceipt>> {
        self.check_queries("receipt")?;
        Ok(self.state.lock().receipts.get(&tx_hash).cloned())
    }

    async fn balance(&self, account: Address) -> AdmissionResult<U256> {
        self.check_queries("balance")?;
        Ok(self
            .state
            .lock()
            .balances
            .get(&account)
            .copied()
            .unwrap_or_default())
    }

    async fn call(&self, call: &CallRequest) -> AdmissionResult<Bytes> {
        self.check_queries("call")?;
        // Echo the calldata back
        Ok(call.data.clone())
    }
}

/// Confirmation tracker driven by the test instead of workers
pub struct ManualTracker {
    hooks: Mutex<Option<Arc<dyn ConfirmHooks>>>,
    reject: AtomicBool,
    queued_tx: mpsc::UnboundedSender<SignedTransaction>,
    queued_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<SignedTransaction>>,
    tracked: Mutex<Vec<H256>>,
}

impl Default for ManualTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl ManualTracker {
    pub fn new() -> Self {
        let (queued_tx, queued_rx) = mpsc::unbounded_channel();
        Self {
            hooks: Mutex::new(None),
            reject: AtomicBool::new(false),
            queued_tx,
            queued_rx: tokio::sync::Mutex::new(queued_rx),
            tracked: Mutex::new(Vec::new()),
        }
    }

    pub fn reject_enqueues(&self, reject: bool) {
        self.reject.store(reject, Ordering::SeqCst);
    }

    /// Hooks passed to `start`
    pub fn hooks(&self) -> Arc<dyn ConfirmHooks> {
        self.hooks.lock().clone().expect("tracker not started")
    }

    pub async fn next_enqueued(&self) -> SignedTransaction {
        let mut rx = self.queued_rx.lock().await;
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("nothing enqueued")
            .expect("queue closed")
    }

    pub fn tracked(&self) -> Vec<H256> {
        self.tracked.lock().clone()
    }

    fn check_reject(&self) -> AdmissionResult<()> {
        if self.reject.load(Ordering::SeqCst) {
            return Err(AdmissionError::EnqueueFailed {
                message: "confirmer queue full".to_string(),
                release_error: None,
            });
        }
        Ok(())
    }
}

#[async_trait]
impl ConfirmationTracker for ManualTracker {
    fn enqueue(&self, tx: SignedTransaction) -> AdmissionResult<()> {
        self.check_reject()?;
        self.queued_tx
            .send(tx)
            .map_err(|e| AdmissionError::Internal(e.to_string()))
    }

    fn enqueue_by_hash(&self, tx_hash: H256) -> AdmissionResult<()> {
        self.check_reject()?;
        self.tracked.lock().push(tx_hash);
        Ok(())
    }

    fn start(&self, hooks: Arc<dyn ConfirmHooks>) {
        *self.hooks.lock() = Some(hooks);
    }

    async fn stop(&self) {}
}
