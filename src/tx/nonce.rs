//! Nonce allocation for concurrent transaction submission
//!
//! Handles:
//! - Per-identity assign-and-advance under a single allocator lock
//! - Reclaiming numbers that were allocated but never submitted
//! - Bounded residency with LRU eviction and re-synchronization
//!
//! Every time an identity's state is created (first use, re-sync after
//! eviction, `reset`) it gets a new generation. Reservations remember the
//! generation they were issued in, and a release from an older generation is
//! rejected: the number it names is either covered by the re-read chain value
//! or below the floor a `reset` set.

use crate::chain::RemoteLedger;
use crate::error::{AdmissionError, AdmissionResult};

use ethers::types::Address;
use lru::LruCache;
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, warn};

/// Emitted when an identity's nonce state is dropped to respect the capacity
/// bound. The next allocation for that identity re-reads the on-chain value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NonceEviction {
    pub identity: Address,
    /// The in-memory `next` value that was lost
    pub next: u64,
    /// Released numbers that were waiting for reuse
    pub reclaimable: usize,
}

/// Per-identity nonce state
#[derive(Debug)]
struct IdentityNonce {
    /// Next never-issued nonce
    next: u64,
    /// Released nonces below `next`, reissued lowest first
    reclaimed: BTreeSet<u64>,
    generation: u64,
}

impl IdentityNonce {
    fn new(next: u64, generation: u64) -> Self {
        Self {
            next,
            reclaimed: BTreeSet::new(),
            generation,
        }
    }

    fn assign(&mut self) -> u64 {
        if let Some(nonce) = self.reclaimed.pop_first() {
            return nonce;
        }
        let nonce = self.next;
        self.next += 1;
        nonce
    }

    fn peek(&self) -> u64 {
        self.reclaimed.first().copied().unwrap_or(self.next)
    }

    fn release(&mut self, nonce: u64) -> Result<(), String> {
        if nonce >= self.next {
            return Err(format!("nonce {} was never issued (next {})", nonce, self.next));
        }
        if !self.reclaimed.insert(nonce) {
            return Err(format!("nonce {} already released", nonce));
        }

        // Fold a released tail back into `next`
        while self.next > 0 && self.reclaimed.last() == Some(&(self.next - 1)) {
            self.reclaimed.pop_last();
            self.next -= 1;
        }
        Ok(())
    }
}

/// Issues nonces per signing identity
pub struct NonceAllocator {
    /// Identity -> nonce state, bounded
    entries: Mutex<LruCache<Address, IdentityNonce>>,
    /// Eviction notifications
    eviction_tx: broadcast::Sender<NonceEviction>,
    /// Source of per-state generations
    generations: AtomicU64,
}

impl NonceAllocator {
    /// Create an allocator holding at most `capacity` identities
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        let (eviction_tx, _) = broadcast::channel(256);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
            eviction_tx,
            generations: AtomicU64::new(0),
        }
    }

    fn next_generation(&self) -> u64 {
        self.generations.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Subscribe to eviction events
    pub fn subscribe_evictions(&self) -> broadcast::Receiver<NonceEviction> {
        self.eviction_tx.subscribe()
    }

    /// Allocate the next nonce for `identity`.
    ///
    /// The first allocation for an identity (or the first after its eviction)
    /// reads the on-chain sequence number. That query runs outside the lock;
    /// if another caller initialized the identity meanwhile, its state wins.
    pub async fn allocate(
        &self,
        ledger: &dyn RemoteLedger,
        identity: Address,
    ) -> AdmissionResult<u64> {
        self.allocate_tagged(ledger, identity)
            .await
            .map(|(nonce, _)| nonce)
    }

    /// Allocate a nonce held by a reservation that releases it on drop
    pub async fn reserve(
        self: &Arc<Self>,
        ledger: &dyn RemoteLedger,
        identity: Address,
    ) -> AdmissionResult<NonceReservation> {
        let (nonce, generation) = self.allocate_tagged(ledger, identity).await?;
        Ok(NonceReservation {
            allocator: self.clone(),
            identity,
            nonce,
            generation,
            settled: false,
        })
    }

    async fn allocate_tagged(
        &self,
        ledger: &dyn RemoteLedger,
        identity: Address,
    ) -> AdmissionResult<(u64, u64)> {
        if let Some(tagged) = self.try_assign(identity) {
            return Ok(tagged);
        }

        let on_chain = ledger.sequence_number(identity).await?;

        let (tagged, evicted) = {
            let mut entries = self.entries.lock();
            match entries.get_mut(&identity) {
                Some(state) => ((state.assign(), state.generation), None),
                None => {
                    let mut state = IdentityNonce::new(on_chain, self.next_generation());
                    let tagged = (state.assign(), state.generation);
                    let evicted = entries
                        .push(identity, state)
                        .filter(|(evicted, _)| *evicted != identity);
                    debug!("Initialized nonce for {:?}: {}", identity, on_chain);
                    (tagged, evicted)
                }
            }
        };

        if let Some((evicted, state)) = evicted {
            self.on_evict(evicted, state);
        }

        debug!("Allocated nonce {} for {:?}", tagged.0, identity);
        crate::metrics::record_nonce_allocated();
        Ok(tagged)
    }

    fn try_assign(&self, identity: Address) -> Option<(u64, u64)> {
        let tagged = self
            .entries
            .lock()
            .get_mut(&identity)
            .map(|s| (s.assign(), s.generation))?;
        debug!("Allocated nonce {} for {:?}", tagged.0, identity);
        crate::metrics::record_nonce_allocated();
        Some(tagged)
    }

    /// Return an allocated but unconsumed nonce for reuse.
    ///
    /// Applies to the identity's current state; numbers allocated before a
    /// `reset` or an eviction should be released through their reservation.
    pub fn release(&self, identity: Address, nonce: u64) -> AdmissionResult<()> {
        self.release_tagged(identity, nonce, None)
    }

    pub(crate) fn release_in_generation(
        &self,
        identity: Address,
        nonce: u64,
        generation: u64,
    ) -> AdmissionResult<()> {
        self.release_tagged(identity, nonce, Some(generation))
    }

    fn release_tagged(
        &self,
        identity: Address,
        nonce: u64,
        generation: Option<u64>,
    ) -> AdmissionResult<()> {
        let mut entries = self.entries.lock();
        let state = entries.get_mut(&identity).ok_or_else(|| AdmissionError::Nonce {
            identity,
            message: format!("cannot release {}: identity not tracked", nonce),
        })?;

        if let Some(generation) = generation {
            if generation != state.generation {
                return Err(AdmissionError::Nonce {
                    identity,
                    message: format!(
                        "stale release of {}: state was re-synchronized or reset since allocation",
                        nonce
                    ),
                });
            }
        }

        state
            .release(nonce)
            .map_err(|message| AdmissionError::Nonce { identity, message })?;

        warn!("Released nonce {} for {:?}", nonce, identity);
        crate::metrics::record_nonce_released();
        Ok(())
    }

    /// The nonce the next allocation would return, without advancing
    pub fn peek(&self, identity: Address) -> AdmissionResult<u64> {
        self.entries
            .lock()
            .peek(&identity)
            .map(IdentityNonce::peek)
            .ok_or_else(|| AdmissionError::Nonce {
                identity,
                message: "identity has no allocated nonce".to_string(),
            })
    }

    /// Force the next nonce for `identity`, dropping released numbers
    pub fn reset(&self, identity: Address, next: u64) -> AdmissionResult<()> {
        let evicted = {
            let mut entries = self.entries.lock();
            entries
                .push(identity, IdentityNonce::new(next, self.next_generation()))
                .filter(|(evicted, _)| *evicted != identity)
        };

        if let Some((evicted, state)) = evicted {
            self.on_evict(evicted, state);
        }

        debug!("Reset nonce for {:?} to {}", identity, next);
        Ok(())
    }

    /// Whether `identity` currently has resident nonce state
    pub fn contains(&self, identity: Address) -> bool {
        self.entries.lock().contains(&identity)
    }

    fn on_evict(&self, identity: Address, state: IdentityNonce) {
        warn!(
            "Evicted nonce state for {:?} (next {}, {} released); will resync from chain",
            identity,
            state.next,
            state.reclaimed.len()
        );
        crate::metrics::record_nonce_evicted();
        // No subscribers is fine
        let _ = self.eviction_tx.send(NonceEviction {
            identity,
            next: state.next,
            reclaimable: state.reclaimed.len(),
        });
    }
}

/// An allocated nonce that is released on drop unless committed.
///
/// Dropping a reservation covers cancellation: a send abandoned between
/// allocation and submission gives its number back.
pub struct NonceReservation {
    allocator: Arc<NonceAllocator>,
    identity: Address,
    nonce: u64,
    generation: u64,
    settled: bool,
}

impl NonceReservation {
    pub fn nonce(&self) -> u64 {
        self.nonce
    }

    pub fn identity(&self) -> Address {
        self.identity
    }

    pub(crate) fn generation(&self) -> u64 {
        self.generation
    }

    /// The nonce was consumed by a submitted transaction
    pub fn commit(mut self) -> u64 {
        self.settled = true;
        self.nonce
    }

    /// The nonce was not consumed; hand it back
    pub fn release(mut self) -> AdmissionResult<()> {
        self.settled = true;
        self.allocator
            .release_in_generation(self.identity, self.nonce, self.generation)
    }
}

impl Drop for NonceReservation {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        if let Err(e) = self
            .allocator
            .release_in_generation(self.identity, self.nonce, self.generation)
        {
            warn!("Failed to release abandoned nonce {}: {}", self.nonce, e);
        }
    }
}

impl std::fmt::Debug for NonceReservation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NonceReservation")
            .field("identity", &self.identity)
            .field("nonce", &self.nonce)
            .field("generation", &self.generation)
            .field("settled", &self.settled)
            .finish()
    }
}
