//! Time-bounded cache shared by the aggregator and the fiat rate source
//!
//! Values are stored type-erased behind `Arc` and handed out without
//! copying. Refreshes are single-flight per key: concurrent readers of an
//! absent or expired entry wait on the one computation in progress.

use dashmap::DashMap;
use std::any::Any;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

type Erased = Arc<dyn Any + Send + Sync>;

#[derive(Clone)]
struct CacheEntry {
    value: Erased,
    written_at: Instant,
    ttl: Duration,
}

impl CacheEntry {
    fn age(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.written_at)
    }

    fn is_expired(&self, now: Instant) -> bool {
        self.age(now) > self.ttl
    }
}

#[derive(Default)]
struct Slot {
    entry: Option<CacheEntry>,
    refresh: Arc<Mutex<()>>,
    /// Bumped each time a refresh finishes, successful or not
    generation: u64,
    /// Error of the last refresh when it failed
    failure: Option<Erased>,
}

/// Whether a value came from a current entry or from a degraded fallback
#[derive(Debug, Clone, PartialEq)]
pub enum Freshness {
    Fresh,
    /// Refresh failed; an expired entry of this age was served instead
    Stale { age: Duration, error: String },
}

impl Freshness {
    pub fn is_stale(&self) -> bool {
        matches!(self, Freshness::Stale { .. })
    }
}

/// A cache read: shared value plus how fresh it is
#[derive(Debug)]
pub struct Cached<T> {
    pub value: Arc<T>,
    pub freshness: Freshness,
}

impl<T> Clone for Cached<T> {
    fn clone(&self) -> Self {
        Self {
            value: Arc::clone(&self.value),
            freshness: self.freshness.clone(),
        }
    }
}

impl<T> Cached<T> {
    fn fresh(value: Arc<T>) -> Self {
        Self {
            value,
            freshness: Freshness::Fresh,
        }
    }
}

/// TTL cache with single-flight refresh and bounded stale fallback
pub struct TtlCache {
    slots: DashMap<String, Slot>,
    /// Maximum age an expired entry may reach and still be served on refresh failure.
    /// `None` serves expired entries regardless of age.
    stale_grace: Option<Duration>,
}

impl TtlCache {
    pub fn new(stale_grace: Option<Duration>) -> Self {
        Self {
            slots: DashMap::new(),
            stale_grace,
        }
    }

    /// Non-expired value for `key`, if present and of type `T`
    pub fn get<T>(&self, key: &str) -> Option<Arc<T>>
    where
        T: Send + Sync + 'static,
    {
        let entry = self.slots.get(key)?.entry.clone()?;
        if entry.is_expired(Instant::now()) {
            return None;
        }
        entry.value.downcast::<T>().ok()
    }

    /// Write a value, superseding any previous entry
    pub fn set<T>(&self, key: &str, value: T, ttl: Duration) -> Arc<T>
    where
        T: Send + Sync + 'static,
    {
        self.set_arc(key, Arc::new(value), ttl)
    }

    fn set_arc<T>(&self, key: &str, value: Arc<T>, ttl: Duration) -> Arc<T>
    where
        T: Send + Sync + 'static,
    {
        let erased: Erased = value.clone();
        self.slots.entry(key.to_string()).or_default().entry = Some(CacheEntry {
            value: erased,
            written_at: Instant::now(),
            ttl,
        });
        value
    }

    /// Return the cached value, or run `compute` once and store it for `ttl`
    pub async fn get_or_compute<T, E, F, Fut>(
        &self,
        key: &str,
        ttl: Duration,
        compute: F,
    ) -> Result<Cached<T>, E>
    where
        T: Send + Sync + 'static,
        E: std::fmt::Display + Clone + Send + Sync + 'static,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.get_or_compute_with(key, || async move { compute().await.map(|v| (v, ttl)) })
            .await
    }

    /// Like `get_or_compute`, but `compute` also decides the entry's TTL.
    ///
    /// Callers that queue behind a refresh which then fails share its error
    /// (or the stale fallback) instead of running `compute` themselves.
    pub async fn get_or_compute_with<T, E, F, Fut>(&self, key: &str, compute: F) -> Result<Cached<T>, E>
    where
        T: Send + Sync + 'static,
        E: std::fmt::Display + Clone + Send + Sync + 'static,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<(T, Duration), E>>,
    {
        if let Some(value) = self.get::<T>(key) {
            return Ok(Cached::fresh(value));
        }

        // DashMap guards must not be held across an await
        let (lock, seen) = {
            let slot = self.slots.entry(key.to_string()).or_default();
            (Arc::clone(&slot.refresh), slot.generation)
        };
        let _guard = lock.lock().await;

        // Another caller may have refreshed while we waited
        if let Some(value) = self.get::<T>(key) {
            return Ok(Cached::fresh(value));
        }
        if let Some(error) = self.failure_since::<E>(key, seen) {
            tracing::debug!(key = %key, "Reusing outcome of the refresh that just failed");
            return self.degrade(key, error);
        }

        match compute().await {
            Ok((value, ttl)) => {
                let value = self.set_arc(key, Arc::new(value), ttl);
                self.finish_refresh(key, None);
                Ok(Cached::fresh(value))
            }
            Err(error) => {
                self.finish_refresh(key, Some(Arc::new(error.clone())));
                self.degrade(key, error)
            }
        }
    }

    fn finish_refresh(&self, key: &str, failure: Option<Erased>) {
        let mut slot = self.slots.entry(key.to_string()).or_default();
        slot.generation = slot.generation.wrapping_add(1);
        slot.failure = failure;
    }

    /// Error of a refresh that completed after generation `seen`, if it failed
    fn failure_since<E>(&self, key: &str, seen: u64) -> Option<E>
    where
        E: Clone + Send + Sync + 'static,
    {
        let slot = self.slots.get(key)?;
        if slot.generation == seen {
            return None;
        }
        let failure = slot.failure.clone()?;
        drop(slot);
        failure.downcast::<E>().ok().map(|e| (*e).clone())
    }

    /// Serve the stale entry for a failed refresh, or propagate the error
    fn degrade<T, E>(&self, key: &str, error: E) -> Result<Cached<T>, E>
    where
        T: Send + Sync + 'static,
        E: std::fmt::Display,
    {
        match self.stale::<T>(key) {
            Some((value, age)) => {
                tracing::warn!(
                    key = %key,
                    age_secs = age.as_secs(),
                    error = %error,
                    "Refresh failed, serving stale cache entry"
                );
                Ok(Cached {
                    value,
                    freshness: Freshness::Stale {
                        age,
                        error: error.to_string(),
                    },
                })
            }
            None => Err(error),
        }
    }

    /// Expired entry still within the stale grace window
    fn stale<T>(&self, key: &str) -> Option<(Arc<T>, Duration)>
    where
        T: Send + Sync + 'static,
    {
        let entry = self.slots.get(key)?.entry.clone()?;
        let age = entry.age(Instant::now());
        if let Some(grace) = self.stale_grace {
            if age > entry.ttl + grace {
                return None;
            }
        }
        entry.value.downcast::<T>().ok().map(|v| (v, age))
    }
}

impl Default for TtlCache {
    fn default() -> Self {
        Self::new(Some(Duration::from_secs(600)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test(start_paused = true)]
    async fn test_get_respects_ttl() {
        let cache = TtlCache::default();
        cache.set("k", 7u32, Duration::from_secs(10));
        assert_eq!(cache.get::<u32>("k").as_deref(), Some(&7));

        tokio::time::advance(Duration::from_secs(11)).await;
        assert!(cache.get::<u32>("k").is_none());
    }

    #[tokio::test]
    async fn test_get_wrong_type_is_absent() {
        let cache = TtlCache::default();
        cache.set("k", 7u32, Duration::from_secs(10));
        assert!(cache.get::<String>("k").is_none());
    }

    #[tokio::test]
    async fn test_concurrent_callers_compute_once() {
        let cache = Arc::new(TtlCache::default());
        let calls = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..16 {
            let cache = Arc::clone(&cache);
            let calls = Arc::clone(&calls);
            handles.push(tokio::spawn(async move {
                let calls = &calls;
                cache
                    .get_or_compute("prices", Duration::from_secs(60), move || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        Ok::<_, String>(vec![1u32, 2, 3])
                    })
                    .await
                    .unwrap()
            }));
        }

        let mut results = Vec::new();
        for handle in handles {
            results.push(handle.await.unwrap());
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let first = &results[0].value;
        for r in &results {
            assert!(Arc::ptr_eq(first, &r.value));
            assert_eq!(r.freshness, Freshness::Fresh);
        }
    }

    async fn read_failing_concurrently(cache: Arc<TtlCache>, readers: usize) -> (usize, Vec<Result<Cached<u32>, String>>) {
        let calls = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..readers {
            let cache = Arc::clone(&cache);
            let calls = Arc::clone(&calls);
            handles.push(tokio::spawn(async move {
                let calls = &calls;
                cache
                    .get_or_compute::<u32, _, _, _>("prices", Duration::from_secs(10), move || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        Err("upstream down".to_string())
                    })
                    .await
            }));
        }

        let mut results = Vec::new();
        for handle in handles {
            results.push(handle.await.unwrap());
        }
        (calls.load(Ordering::SeqCst), results)
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_callers_share_failed_refresh() {
        let cache = Arc::new(TtlCache::default());
        cache.set("prices", 42u32, Duration::from_secs(10));
        tokio::time::advance(Duration::from_secs(11)).await;

        let (calls, results) = read_failing_concurrently(cache, 8).await;

        assert_eq!(calls, 1);
        for result in results {
            let read = result.unwrap();
            assert_eq!(*read.value, 42);
            assert!(matches!(read.freshness, Freshness::Stale { ref error, .. } if error == "upstream down"));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_callers_share_failure_without_entry() {
        let (calls, results) = read_failing_concurrently(Arc::new(TtlCache::default()), 8).await;

        assert_eq!(calls, 1);
        for result in results {
            assert_eq!(result.unwrap_err(), "upstream down");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_later_caller_retries_after_failure() {
        let cache = TtlCache::default();
        let calls = AtomicUsize::new(0);
        let calls = &calls;
        let compute = move || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n == 0 {
                    Err("upstream down".to_string())
                } else {
                    Ok((7u32, Duration::from_secs(10)))
                }
            }
        };

        assert!(cache.get_or_compute_with("k", compute).await.is_err());
        let read = cache.get_or_compute_with("k", compute).await.unwrap();
        assert_eq!(*read.value, 7);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_entry_recomputed() {
        let cache = TtlCache::default();
        let calls = AtomicUsize::new(0);
        let calls = &calls;
        let compute = move || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move { Ok::<_, String>(n) }
        };

        let a = cache.get_or_compute("k", Duration::from_secs(5), compute).await.unwrap();
        let b = cache.get_or_compute("k", Duration::from_secs(5), compute).await.unwrap();
        assert_eq!((*a.value, *b.value), (0, 0));

        tokio::time::advance(Duration::from_secs(6)).await;
        let c = cache.get_or_compute("k", Duration::from_secs(5), compute).await.unwrap();
        assert_eq!(*c.value, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_refresh_serves_stale_marked() {
        let cache = TtlCache::new(Some(Duration::from_secs(60)));
        cache.set("rates", 1.5f64, Duration::from_secs(10));
        tokio::time::advance(Duration::from_secs(20)).await;

        let read = cache
            .get_or_compute::<f64, _, _, _>("rates", Duration::from_secs(10), || async {
                Err("upstream down".to_string())
            })
            .await
            .unwrap();

        assert_eq!(*read.value, 1.5);
        match read.freshness {
            Freshness::Stale { age, error } => {
                assert_eq!(age, Duration::from_secs(20));
                assert_eq!(error, "upstream down");
            }
            Freshness::Fresh => panic!("expected stale read"),
        }

        // The failed refresh does not replace the entry
        assert!(cache.get::<f64>("rates").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_beyond_grace_propagates_error() {
        let cache = TtlCache::new(Some(Duration::from_secs(5)));
        cache.set("rates", 1.5f64, Duration::from_secs(10));
        tokio::time::advance(Duration::from_secs(30)).await;

        let result = cache
            .get_or_compute::<f64, _, _, _>("rates", Duration::from_secs(10), || async {
                Err("upstream down".to_string())
            })
            .await;
        assert_eq!(result.unwrap_err(), "upstream down");
    }

    #[tokio::test]
    async fn test_failure_without_entry_propagates() {
        let cache = TtlCache::default();
        let result = cache
            .get_or_compute::<u8, _, _, _>("missing", Duration::from_secs(1), || async {
                Err("boom".to_string())
            })
            .await;
        assert!(result.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_compute_with_sets_returned_ttl() {
        let cache = TtlCache::default();
        cache
            .get_or_compute_with("k", || async { Ok::<_, String>((1u8, Duration::from_secs(3))) })
            .await
            .unwrap();

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(cache.get::<u8>("k").is_some());
        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(cache.get::<u8>("k").is_none());
    }
}
