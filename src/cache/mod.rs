//! # Cache Coordinator
//!
//! Named caches with **at-most-one computation per key**.
//!
//! ## Duplicate suppression
//!
//! The first caller that misses on a key registers an in-flight computation and runs
//! `compute` on its own task. Every concurrent caller for the same key subscribes to that
//! computation and receives the very same outcome; none of them runs `compute` again.
//!
//! ```text
//!  caller A ──miss──► register in-flight ──compute──► store ──► publish ──► A
//!  caller B ──────────► subscribe ────────────────── wait ────────────────► B
//!  caller C ──────────► subscribe ────────────────── wait ────────────────► C
//! ```
//!
//! Failures reach every waiter of the key and are **not** stored: the next lookup
//! recomputes. If the computing caller is dropped mid-way, its waiters elect a new
//! computer among themselves.
//!
//! Invalidating a key whose computation is still running marks that computation stale.
//! It keeps answering the callers that were already waiting, but its value is not
//! stored. Callers arriving after the invalidation wait for it to finish and then
//! compute afresh, so a key never has two computations running at once.
//!
//! ## Eviction
//!
//! Each named cache is bounded by its [`CachePolicy`]: least-recently-used eviction over
//! `max_size` entries, expire-after-write over `ttl`, or both. Names without a configured
//! policy are created on first use with an unbounded policy.

pub mod error;
pub mod key;
mod store;

pub use error::CacheError;
pub use key::CacheKey;
pub use store::CacheStats;

use crate::config::CachePolicy;
use dashmap::DashMap;
use std::collections::BTreeMap;
use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use store::{CachedValue, ComputeGuard, Lookup, NamedCache};
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Owner of every named cache in the process.
pub struct CacheCoordinator {
    caches: DashMap<String, Arc<NamedCache>>,
}

impl CacheCoordinator {
    /// Creates the coordinator with one cache per configured policy.
    pub fn new(policies: &BTreeMap<String, CachePolicy>) -> Self {
        let caches = policies
            .iter()
            .map(|(name, policy)| {
                info!(cache = %name, max_size = ?policy.max_size, ttl = ?policy.ttl, "Cache configured");
                (name.clone(), Arc::new(NamedCache::new(name.clone(), policy.clone())))
            })
            .collect();
        Self { caches }
    }

    fn cache(&self, name: &str) -> Arc<NamedCache> {
        if let Some(cache) = self.existing(name) {
            return cache;
        }
        self.caches
            .entry(name.to_string())
            .or_insert_with(|| {
                debug!(cache = %name, "Cache created with unbounded policy");
                Arc::new(NamedCache::new(name, CachePolicy::unbounded()))
            })
            .value()
            .clone()
    }

    fn existing(&self, name: &str) -> Option<Arc<NamedCache>> {
        self.caches.get(name).map(|cache| cache.value().clone())
    }

    fn all(&self) -> Vec<Arc<NamedCache>> {
        self.caches.iter().map(|cache| cache.value().clone()).collect()
    }

    /// Returns the cached value for `key`, computing it if absent.
    ///
    /// Concurrent callers for the same key share a single call of `compute`.
    pub async fn get_or_compute<V, E, F, Fut>(
        &self,
        cache_name: &str,
        key: impl Into<CacheKey>,
        compute: F,
    ) -> Result<Arc<V>, CacheError>
    where
        V: Send + Sync + 'static,
        E: Display,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        self.resolve(cache_name, key.into(), compute, None).await
    }

    /// Like [`get_or_compute`](Self::get_or_compute), but bounds how long the caller
    /// waits on a computation started by someone else.
    ///
    /// On expiry the caller gets [`CacheError::Timeout`]; the computation itself keeps
    /// running and its other waiters are unaffected. A caller that ends up running the
    /// computation is not subject to the bound.
    pub async fn get_or_compute_with_timeout<V, E, F, Fut>(
        &self,
        cache_name: &str,
        key: impl Into<CacheKey>,
        wait_timeout: Duration,
        compute: F,
    ) -> Result<Arc<V>, CacheError>
    where
        V: Send + Sync + 'static,
        E: Display,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        let deadline = Instant::now() + wait_timeout;
        self.resolve(cache_name, key.into(), compute, Some(deadline))
            .await
    }

    async fn resolve<V, E, F, Fut>(
        &self,
        cache_name: &str,
        key: CacheKey,
        compute: F,
        deadline: Option<Instant>,
    ) -> Result<Arc<V>, CacheError>
    where
        V: Send + Sync + 'static,
        E: Display,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        let cache = self.cache(cache_name);

        let flight = loop {
            match cache.lookup(&key) {
                Lookup::Hit(value) => {
                    debug!(cache = %cache_name, %key, "Hit");
                    return downcast(cache_name, &key, Ok(value));
                }
                Lookup::Compute(flight) => break flight,
                Lookup::Wait {
                    mut receiver,
                    recompute,
                } => {
                    debug!(cache = %cache_name, %key, recompute, "Waiting on in-flight computation");
                    let wait = receiver.wait_for(|outcome| outcome.is_some());
                    let waited = match deadline {
                        Some(deadline) => match tokio::time::timeout_at(deadline, wait).await {
                            Ok(waited) => waited.map(|outcome| outcome.clone()),
                            Err(_) => {
                                warn!(cache = %cache_name, %key, "Wait timed out");
                                return Err(CacheError::Timeout {
                                    cache: cache_name.to_string(),
                                    key: key.to_string(),
                                });
                            }
                        },
                        None => wait.await.map(|outcome| outcome.clone()),
                    };
                    match waited {
                        Ok(Some(_)) if recompute => continue,
                        Ok(Some(outcome)) => return downcast(cache_name, &key, outcome),
                        // The computing caller went away; look up again.
                        Ok(None) | Err(_) => continue,
                    }
                }
            }
        };

        let guard = ComputeGuard::new(&cache, &key, flight);
        debug!(cache = %cache_name, %key, "Miss, computing");
        let outcome: Result<CachedValue, CacheError> = match compute().await {
            Ok(value) => Ok(Arc::new(value) as CachedValue),
            Err(e) => {
                warn!(cache = %cache_name, %key, error = %e, "Computation failed");
                Err(CacheError::Failed {
                    cache: cache_name.to_string(),
                    key: key.to_string(),
                    cause: e.to_string(),
                })
            }
        };
        guard.complete(outcome.clone());
        downcast(cache_name, &key, outcome)
    }

    /// Removes one entry. Returns whether anything was removed.
    ///
    /// A computation in flight for the key still answers its current waiters, but its
    /// result is not stored.
    pub fn invalidate(&self, cache_name: &str, key: impl Into<CacheKey>) -> bool {
        let key = key.into();
        let removed = self
            .existing(cache_name)
            .is_some_and(|cache| cache.invalidate(&key));
        debug!(cache = %cache_name, %key, removed, "Invalidate");
        removed
    }

    /// Clears a whole named cache. Returns the number of entries removed.
    pub fn invalidate_all(&self, cache_name: &str) -> usize {
        let removed = self
            .existing(cache_name)
            .map_or(0, |cache| cache.invalidate_all());
        info!(cache = %cache_name, removed, "Invalidate all");
        removed
    }

    /// Drops expired entries from every cache. Returns the number of entries purged.
    pub fn purge_expired(&self) -> usize {
        self.all().iter().map(|cache| cache.purge_expired()).sum()
    }

    pub fn stats(&self, cache_name: &str) -> Option<CacheStats> {
        self.existing(cache_name).map(|cache| cache.stats())
    }

    pub fn policy(&self, cache_name: &str) -> Option<CachePolicy> {
        self.existing(cache_name).map(|cache| cache.policy().clone())
    }

    /// Empties every cache. Caches are not persisted, so nothing is flushed.
    pub fn clear(&self) {
        let caches = self.all();
        for cache in &caches {
            let removed = cache.invalidate_all();
            debug!(cache = %cache.name(), removed, "Cleared");
        }
        info!(caches = caches.len(), "Cache coordinator cleared");
    }
}

fn downcast<V: Send + Sync + 'static>(
    cache_name: &str,
    key: &CacheKey,
    outcome: Result<CachedValue, CacheError>,
) -> Result<Arc<V>, CacheError> {
    outcome.and_then(|value| {
        value.downcast::<V>().map_err(|_| CacheError::TypeMismatch {
            cache: cache_name.to_string(),
            key: key.to_string(),
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_hit_after_compute() {
        let coordinator = CacheCoordinator::new(&BTreeMap::new());
        let calls = AtomicUsize::new(0);

        for _ in 0..3 {
            let value = coordinator
                .get_or_compute("rates", "tva", || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, String>(19u32)
                })
                .await
                .unwrap();
            assert_eq!(*value, 19);
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let stats = coordinator.stats("rates").unwrap();
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hits, 2);
        assert_eq!(stats.entries, 1);
    }

    #[tokio::test]
    async fn test_failure_is_not_memoized() {
        let coordinator = CacheCoordinator::new(&BTreeMap::new());

        let failed = coordinator
            .get_or_compute("rates", "irg", || async { Err::<u32, _>("upstream down") })
            .await;
        assert_eq!(
            failed,
            Err(CacheError::Failed {
                cache: "rates".to_string(),
                key: "irg".to_string(),
                cause: "upstream down".to_string(),
            })
        );

        let value = coordinator
            .get_or_compute("rates", "irg", || async { Ok::<_, String>(35u32) })
            .await
            .unwrap();
        assert_eq!(*value, 35);
        assert_eq!(coordinator.stats("rates").unwrap().failures, 1);
    }

    #[tokio::test]
    async fn test_type_mismatch() {
        let coordinator = CacheCoordinator::new(&BTreeMap::new());
        coordinator
            .get_or_compute("rates", "tva", || async { Ok::<_, String>(19u32) })
            .await
            .unwrap();

        let wrong = coordinator
            .get_or_compute("rates", "tva", || async { Ok::<_, String>("19%".to_string()) })
            .await;
        assert!(matches!(wrong, Err(CacheError::TypeMismatch { .. })));
    }

    #[tokio::test]
    async fn test_lru_eviction() {
        let mut policies = BTreeMap::new();
        policies.insert("small".to_string(), CachePolicy::unbounded().with_max_size(2));
        let coordinator = CacheCoordinator::new(&policies);

        for key in ["a", "b"] {
            coordinator
                .get_or_compute("small", key, || async { Ok::<_, String>(key.len()) })
                .await
                .unwrap();
        }
        // Touch "a" so that "b" becomes least recently used.
        coordinator
            .get_or_compute("small", "a", || async { Ok::<_, String>(0usize) })
            .await
            .unwrap();
        coordinator
            .get_or_compute("small", "c", || async { Ok::<_, String>(1usize) })
            .await
            .unwrap();

        let stats = coordinator.stats("small").unwrap();
        assert_eq!(stats.entries, 2);
        assert_eq!(stats.evictions, 1);
        assert!(!coordinator.invalidate("small", "b"), "b should have been evicted");
        assert!(coordinator.invalidate("small", "a"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_ttl_expiry() {
        let mut policies = BTreeMap::new();
        policies.insert(
            "fx".to_string(),
            CachePolicy::unbounded().with_ttl(Duration::from_secs(60)),
        );
        let coordinator = CacheCoordinator::new(&policies);
        let calls = AtomicUsize::new(0);
        let lookup = || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok::<_, String>(134.5f64)
        };

        coordinator.get_or_compute("fx", "EUR", lookup).await.unwrap();
        tokio::time::advance(Duration::from_secs(30)).await;
        coordinator.get_or_compute("fx", "EUR", lookup).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        tokio::time::advance(Duration::from_secs(31)).await;
        coordinator.get_or_compute("fx", "EUR", lookup).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        tokio::time::advance(Duration::from_secs(61)).await;
        assert_eq!(coordinator.purge_expired(), 1);
    }
}
