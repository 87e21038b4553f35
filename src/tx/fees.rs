//! Time-to-live caches for the priority fee and the base fee
//!
//! Both caches are read-through: a fresh entry is returned without touching
//! the network, a stale one is replaced by querying the remote ledger. A
//! failed refresh is a hard failure for that call; the stale value is never
//! served as a fallback.

use crate::chain::RemoteLedger;
use crate::error::{AdmissionError, AdmissionResult};

use ethers::types::U256;
use std::future::Future;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::Mutex;
use tracing::debug;

type NowFn = Box<dyn Fn() -> i64 + Send + Sync>;

/// Cached fee value and the unix second it expires at
#[derive(Debug, Clone, Copy, Default)]
struct FeeCacheEntry {
    value: Option<U256>,
    expires_at: i64,
}

impl FeeCacheEntry {
    fn fresh_value(&self, now: i64) -> Option<U256> {
        if now < self.expires_at {
            self.value
        } else {
            None
        }
    }
}

/// Read-through TTL cache for a single fee value.
///
/// The lock is held while a refresh is in flight, so racers arriving at an
/// expired entry wait for the winner's value instead of querying again.
struct FeeCache {
    name: &'static str,
    ttl_secs: i64,
    entry: Mutex<FeeCacheEntry>,
    now_fn: NowFn,
}

impl FeeCache {
    fn new(name: &'static str, ttl: Duration) -> Self {
        Self {
            name,
            ttl_secs: i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX),
            entry: Mutex::new(FeeCacheEntry::default()),
            now_fn: Box::new(unix_now),
        }
    }

    async fn get_or_refresh<F, Fut>(&self, fetch: F) -> AdmissionResult<U256>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = AdmissionResult<U256>>,
    {
        let mut entry = self.entry.lock().await;
        if let Some(value) = entry.fresh_value((self.now_fn)()) {
            return Ok(value);
        }

        let value = fetch().await?;

        entry.value = Some(value);
        entry.expires_at = (self.now_fn)().saturating_add(self.ttl_secs);
        crate::metrics::record_fee_cache_refresh(self.name);
        debug!("Refreshed {} cache: {}", self.name, value);

        Ok(value)
    }

    async fn is_expired(&self) -> bool {
        let entry = self.entry.lock().await;
        entry.fresh_value((self.now_fn)()).is_none()
    }
}

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or_default()
}

/// Cache for the suggested priority fee
pub struct TipCache {
    inner: FeeCache,
}

impl TipCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            inner: FeeCache::new("tip", ttl),
        }
    }

    /// Set the clock (unix seconds) used for expiry
    pub fn with_time_fn<F>(mut self, f: F) -> Self
    where
        F: Fn() -> i64 + Send + Sync + 'static,
    {
        self.inner.now_fn = Box::new(f);
        self
    }

    /// Current priority fee, refreshed from the ledger once expired
    pub async fn get(&self, ledger: &dyn RemoteLedger) -> AdmissionResult<U256> {
        self.inner
            .get_or_refresh(|| ledger.suggest_priority_fee())
            .await
    }

    pub async fn is_expired(&self) -> bool {
        self.inner.is_expired().await
    }
}

/// Cache for the latest base fee
pub struct BaseFeeCache {
    inner: FeeCache,
}

impl BaseFeeCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            inner: FeeCache::new("base_fee", ttl),
        }
    }

    /// Set the clock (unix seconds) used for expiry
    pub fn with_time_fn<F>(mut self, f: F) -> Self
    where
        F: Fn() -> i64 + Send + Sync + 'static,
    {
        self.inner.now_fn = Box::new(f);
        self
    }

    /// Current base fee, refreshed from the latest header once expired
    pub async fn get(&self, ledger: &dyn RemoteLedger) -> AdmissionResult<U256> {
        self.inner
            .get_or_refresh(|| async {
                ledger.latest_header().await?.base_fee.ok_or_else(|| {
                    AdmissionError::remote("latest_header", "header carries no base fee")
                })
            })
            .await
    }

    /// Fee cap for `tip` against the cached base fee
    pub async fn fee_cap(&self, ledger: &dyn RemoteLedger, tip: U256) -> AdmissionResult<U256> {
        let base_fee = self.get(ledger).await?;
        fee_cap(tip, base_fee)
    }

    pub async fn is_expired(&self) -> bool {
        self.inner.is_expired().await
    }
}

/// `tip + 2 * base_fee`, leaving headroom for base fee growth until inclusion.
///
/// Fails with `BuildFailed` when the cap does not fit in 256 bits.
pub fn fee_cap(tip: U256, base_fee: U256) -> AdmissionResult<U256> {
    base_fee
        .checked_mul(U256::from(2))
        .and_then(|doubled| doubled.checked_add(tip))
        .ok_or_else(|| {
            AdmissionError::BuildFailed(format!(
                "fee cap overflows (tip {}, base fee {})",
                tip, base_fee
            ))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::{HeaderInfo, MockRemoteLedger};
    use crate::testing::FakeLedger;
    use std::sync::atomic::{AtomicI64, Ordering};
    use std::sync::Arc;

    fn clock(start: i64) -> (Arc<AtomicI64>, impl Fn() -> i64 + Send + Sync + 'static) {
        let now = Arc::new(AtomicI64::new(start));
        let reader = now.clone();
        (now, move || reader.load(Ordering::SeqCst))
    }

    #[tokio::test]
    async fn test_tip_cached_within_ttl() {
        let mut ledger = MockRemoteLedger::new();
        ledger
            .expect_suggest_priority_fee()
            .times(1)
            .returning(|| Ok(U256::from(1_000_000_000u64)));

        let cache = TipCache::new(Duration::from_secs(60));
        assert!(cache.is_expired().await);

        let first = cache.get(&ledger).await.unwrap();
        let second = cache.get(&ledger).await.unwrap();

        assert_eq!(first, U256::from(1_000_000_000u64));
        assert_eq!(first, second);
        assert!(!cache.is_expired().await);
    }

    #[tokio::test]
    async fn test_tip_refreshed_after_ttl() {
        let (now, now_fn) = clock(1_000);
        let ledger = FakeLedger::new();
        ledger.set_tip(U256::from(1));

        let cache = TipCache::new(Duration::from_secs(10)).with_time_fn(now_fn);
        assert_eq!(cache.get(&ledger).await.unwrap(), U256::from(1));

        ledger.set_tip(U256::from(2));
        now.store(1_009, Ordering::SeqCst);
        assert_eq!(cache.get(&ledger).await.unwrap(), U256::from(1));
        assert_eq!(ledger.tip_queries(), 1);

        now.store(1_010, Ordering::SeqCst);
        assert_eq!(cache.get(&ledger).await.unwrap(), U256::from(2));
        assert_eq!(ledger.tip_queries(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_expiry_refreshes_once() {
        let (now, now_fn) = clock(0);
        let ledger = Arc::new(FakeLedger::new());
        ledger.set_tip(U256::from(7));

        let cache = Arc::new(TipCache::new(Duration::from_secs(5)).with_time_fn(now_fn));
        cache.get(ledger.as_ref()).await.unwrap();

        ledger.set_tip(U256::from(8));
        now.store(100, Ordering::SeqCst);

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let cache = cache.clone();
                let ledger = ledger.clone();
                tokio::spawn(async move { cache.get(ledger.as_ref()).await })
            })
            .collect();

        for result in futures::future::join_all(handles).await {
            assert_eq!(result.unwrap().unwrap(), U256::from(8));
        }
        assert_eq!(ledger.tip_queries(), 2);
        assert_eq!(cache.get(ledger.as_ref()).await.unwrap(), U256::from(8));
    }

    #[tokio::test]
    async fn test_failed_refresh_does_not_serve_stale_value() {
        let (now, now_fn) = clock(0);
        let ledger = FakeLedger::new();
        ledger.set_base_fee(Some(U256::from(100)));

        let cache = BaseFeeCache::new(Duration::from_secs(5)).with_time_fn(now_fn);
        assert_eq!(cache.get(&ledger).await.unwrap(), U256::from(100));

        ledger.fail_queries(true);
        now.store(10, Ordering::SeqCst);

        let err = cache.get(&ledger).await.unwrap_err();
        assert!(matches!(err, AdmissionError::RemoteQueryFailed { .. }));
        assert!(cache.is_expired().await);
    }

    #[tokio::test]
    async fn test_fee_cap_uses_cached_base_fee() {
        let mut ledger = MockRemoteLedger::new();
        ledger.expect_latest_header().times(1).returning(|| {
            Ok(HeaderInfo {
                number: 12,
                base_fee: Some(U256::from(1_000_000_000u64)),
            })
        });

        let cache = BaseFeeCache::new(Duration::from_secs(60));
        let tip = U256::from(1_000_000_000u64);

        assert_eq!(
            cache.fee_cap(&ledger, tip).await.unwrap(),
            U256::from(3_000_000_000u64)
        );
        assert_eq!(
            cache.fee_cap(&ledger, U256::zero()).await.unwrap(),
            U256::from(2_000_000_000u64)
        );
    }

    #[tokio::test]
    async fn test_header_without_base_fee_fails() {
        let mut ledger = MockRemoteLedger::new();
        ledger.expect_latest_header().returning(|| {
            Ok(HeaderInfo {
                number: 1,
                base_fee: None,
            })
        });

        let cache = BaseFeeCache::new(Duration::from_secs(60));
        tokio_test::assert_err!(cache.get(&ledger).await);
    }

    #[test]
    fn test_fee_cap_formula() {
        for (tip, base) in [(0u64, 0u64), (1, 0), (0, 1), (2, 3), (1_500_000_000, 42_000_000_000)] {
            assert_eq!(
                fee_cap(U256::from(tip), U256::from(base)).unwrap(),
                U256::from(tip) + U256::from(base) * 2
            );
        }
    }

    #[test]
    fn test_fee_cap_overflow_is_rejected() {
        let half = U256::MAX / 2;
        assert_eq!(fee_cap(U256::one(), half).unwrap(), U256::MAX);

        let err = fee_cap(U256::from(2), half).unwrap_err();
        assert!(matches!(err, AdmissionError::BuildFailed(_)));
        assert!(fee_cap(U256::zero(), half + 1).is_err());
    }
}
