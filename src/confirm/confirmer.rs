//! Bounded-queue confirmer with a pool of polling workers

use super::{ConfirmHooks, ConfirmationTracker};
use crate::chain::{recommended_confirmations, RemoteLedger};
use crate::config::ConfirmerConfig;
use crate::error::{AdmissionError, AdmissionResult};
use crate::tx::SignedTransaction;

use async_trait::async_trait;
use ethers::types::H256;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

enum Job {
    Submit(SignedTransaction),
    Track(H256),
}

/// Submits queued transactions and watches them until final
pub struct Confirmer {
    ledger: Arc<dyn RemoteLedger>,
    workers: usize,
    worker_interval: Duration,
    confirmation_blocks: u64,
    job_tx: mpsc::Sender<Job>,
    job_rx: Arc<Mutex<mpsc::Receiver<Job>>>,
    shutdown_tx: watch::Sender<bool>,
    handles: parking_lot::Mutex<Vec<JoinHandle<()>>>,
    /// Hooks from `start`, used to report jobs dropped at stop
    hooks: parking_lot::Mutex<Option<Arc<dyn ConfirmHooks>>>,
}

impl Confirmer {
    pub fn new(ledger: Arc<dyn RemoteLedger>, config: &ConfirmerConfig) -> Self {
        let (job_tx, job_rx) = mpsc::channel(config.queue_size.max(1));
        let (shutdown_tx, _) = watch::channel(false);
        let confirmation_blocks = config
            .confirmation_blocks
            .unwrap_or_else(|| recommended_confirmations(ledger.chain_id()));

        Self {
            ledger,
            workers: config.workers.max(1),
            worker_interval: config.worker_interval(),
            confirmation_blocks,
            job_tx,
            job_rx: Arc::new(Mutex::new(job_rx)),
            shutdown_tx,
            handles: parking_lot::Mutex::new(Vec::new()),
            hooks: parking_lot::Mutex::new(None),
        }
    }

    pub fn confirmation_blocks(&self) -> u64 {
        self.confirmation_blocks
    }

    fn push(&self, job: Job) -> AdmissionResult<()> {
        if *self.shutdown_tx.borrow() {
            return Err(AdmissionError::EnqueueFailed {
                message: "confirmer stopped".to_string(),
                release_error: None,
            });
        }

        self.job_tx.try_send(job).map_err(|e| {
            let message = match e {
                TrySendError::Full(_) => "confirmer queue full",
                TrySendError::Closed(_) => "confirmer queue closed",
            };
            AdmissionError::EnqueueFailed {
                message: message.to_string(),
                release_error: None,
            }
        })
    }
}

#[async_trait]
impl ConfirmationTracker for Confirmer {
    fn enqueue(&self, tx: SignedTransaction) -> AdmissionResult<()> {
        debug!("Enqueued tx {:?} for submission", tx.hash);
        self.push(Job::Submit(tx))
    }

    fn enqueue_by_hash(&self, tx_hash: H256) -> AdmissionResult<()> {
        debug!("Enqueued tx {:?} for tracking", tx_hash);
        self.push(Job::Track(tx_hash))
    }

    fn start(&self, hooks: Arc<dyn ConfirmHooks>) {
        let mut handles = self.handles.lock();
        if !handles.is_empty() {
            warn!("Confirmer already started");
            return;
        }
        *self.hooks.lock() = Some(hooks.clone());

        for id in 0..self.workers {
            let worker = Worker {
                id,
                ledger: self.ledger.clone(),
                hooks: hooks.clone(),
                jobs: self.job_rx.clone(),
                shutdown: self.shutdown_tx.subscribe(),
                interval: self.worker_interval,
                confirmation_blocks: self.confirmation_blocks,
                watching: Vec::new(),
            };
            handles.push(tokio::spawn(worker.run()));
        }

        info!(
            "Confirmer started with {} workers ({} confirmations)",
            self.workers, self.confirmation_blocks
        );
    }

    async fn stop(&self) {
        self.shutdown_tx.send_replace(true);
        let handles: Vec<_> = std::mem::take(&mut *self.handles.lock());

        for result in futures::future::join_all(handles).await {
            if let Err(e) = result {
                error!("Confirmer worker panicked: {}", e);
            }
        }

        self.drain().await;
        info!("Confirmer stopped");
    }
}

impl Confirmer {
    /// Close the queue and fail every transaction that was never submitted
    async fn drain(&self) {
        let hooks = self.hooks.lock().clone();
        let mut jobs = self.job_rx.lock().await;
        jobs.close();

        while let Ok(job) = jobs.try_recv() {
            match (job, &hooks) {
                (Job::Submit(tx), Some(hooks)) => {
                    warn!("Dropping unsubmitted tx {:?}: confirmer stopped", tx.hash);
                    hooks.on_error(
                        tx.hash,
                        AdmissionError::SubmissionFailed {
                            message: "confirmer stopped".to_string(),
                            release_error: None,
                        },
                    );
                }
                (Job::Submit(tx), None) => {
                    warn!("Dropping unsubmitted tx {:?}: confirmer never started", tx.hash);
                }
                (Job::Track(tx_hash), _) => {
                    debug!("Dropping tracking of {:?}: confirmer stopped", tx_hash);
                }
            }
        }
    }
}

struct Worker {
    id: usize,
    ledger: Arc<dyn RemoteLedger>,
    hooks: Arc<dyn ConfirmHooks>,
    jobs: Arc<Mutex<mpsc::Receiver<Job>>>,
    shutdown: watch::Receiver<bool>,
    interval: Duration,
    confirmation_blocks: u64,
    /// Hashes this worker polls for finality
    watching: Vec<H256>,
}

impl Worker {
    async fn run(mut self) {
        let mut tick = interval(self.interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let jobs = self.jobs.clone();

        loop {
            if *self.shutdown.borrow() {
                break;
            }

            tokio::select! {
                _ = self.shutdown.changed() => break,

                job = next_job(&jobs) => match job {
                    Some(job) => self.handle(job).await,
                    None => break,
                },

                _ = tick.tick() => self.check_watching().await,
            }
        }

        debug!("Confirmer worker {} exited", self.id);
    }

    async fn handle(&mut self, job: Job) {
        match job {
            Job::Submit(tx) => match self.ledger.submit(&tx).await {
                Ok(_) => {
                    debug!("Worker {} submitted tx {:?}", self.id, tx.hash);
                    self.hooks.on_sent(tx.hash);
                    self.watching.push(tx.hash);
                }
                Err(e) => {
                    warn!("Worker {} failed to submit tx {:?}: {}", self.id, tx.hash, e);
                    let error = match e {
                        AdmissionError::SubmissionFailed { .. } => e,
                        other => AdmissionError::SubmissionFailed {
                            message: other.to_string(),
                            release_error: None,
                        },
                    };
                    self.hooks.on_error(tx.hash, error);
                }
            },
            Job::Track(tx_hash) => {
                self.hooks.on_sent(tx_hash);
                self.watching.push(tx_hash);
            }
        }
    }

    async fn check_watching(&mut self) {
        if self.watching.is_empty() {
            return;
        }

        let mut still_pending = Vec::with_capacity(self.watching.len());
        for tx_hash in std::mem::take(&mut self.watching) {
            match self
                .hooks
                .confirm_check(tx_hash, self.confirmation_blocks)
                .await
            {
                Ok(()) => self.hooks.on_confirmed(tx_hash),
                Err(e @ AdmissionError::TxFailed { .. }) => self.hooks.on_error(tx_hash, e),
                Err(AdmissionError::TxNotFound { .. })
                | Err(AdmissionError::TxConfirmPending { .. }) => still_pending.push(tx_hash),
                Err(e) => {
                    warn!("Confirmation check for {:?} failed: {}", tx_hash, e);
                    still_pending.push(tx_hash);
                }
            }
        }
        self.watching = still_pending;
    }
}

async fn next_job(jobs: &Mutex<mpsc::Receiver<Job>>) -> Option<Job> {
    jobs.lock().await.recv().await
}
