//! Storage of a single named cache: entries, in-flight computations and eviction.
//!
//! All state sits behind one `std::sync::Mutex` that is never held across an `.await`.
//! Waiting on an in-flight computation happens on a `watch` channel outside the lock.

use super::error::CacheError;
use super::key::CacheKey;
use crate::config::CachePolicy;
use std::any::Any;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::debug;

pub(crate) type CachedValue = Arc<dyn Any + Send + Sync>;

/// Outcome slot of an in-flight computation; `None` until the computation resolves.
pub(crate) type Outcome = Option<Result<CachedValue, CacheError>>;

/// A computed value and its freshness marker.
struct CacheEntry {
    value: CachedValue,
    written_at: Instant,
    last_access: u64,
}

/// One computation in progress. Dropping the last handle without publishing an outcome
/// closes the channel, which tells waiters to elect a new computer.
pub(crate) struct InFlight {
    outcome: watch::Sender<Outcome>,
}

/// A registered computation. A stale one was invalidated while running: it still
/// answers the callers that joined before the invalidation, but its value is not
/// stored and later callers recompute once it has finished.
struct Registration {
    flight: Arc<InFlight>,
    stale: bool,
}

#[derive(Default)]
struct CacheState {
    entries: HashMap<CacheKey, CacheEntry>,
    /// Access order: tick of last access to key. The first entry is least recently used.
    recency: BTreeMap<u64, CacheKey>,
    in_flight: HashMap<CacheKey, Registration>,
    tick: u64,
}

impl CacheState {
    fn next_tick(&mut self) -> u64 {
        self.tick += 1;
        self.tick
    }

    fn insert_entry(&mut self, key: CacheKey, value: CachedValue) {
        let tick = self.next_tick();
        self.recency.insert(tick, key.clone());
        let entry = CacheEntry {
            value,
            written_at: Instant::now(),
            last_access: tick,
        };
        if let Some(replaced) = self.entries.insert(key, entry) {
            self.recency.remove(&replaced.last_access);
        }
    }

    fn remove_entry(&mut self, key: &CacheKey) -> bool {
        match self.entries.remove(key) {
            Some(entry) => {
                self.recency.remove(&entry.last_access);
                true
            }
            None => false,
        }
    }

    fn is_current(&self, key: &CacheKey, flight: &Arc<InFlight>) -> bool {
        self.in_flight
            .get(key)
            .is_some_and(|registered| Arc::ptr_eq(&registered.flight, flight))
    }
}

/// Point-in-time counters of a named cache.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
    /// Callers that waited on another caller's computation instead of computing.
    pub coalesced: u64,
    pub failures: u64,
    pub evictions: u64,
}

pub(crate) enum Lookup {
    Hit(CachedValue),
    /// Wait on another caller's computation. With `recompute` set the computation was
    /// invalidated before this caller joined, so its outcome must not be used.
    Wait {
        receiver: watch::Receiver<Outcome>,
        recompute: bool,
    },
    Compute(Arc<InFlight>),
}

pub(crate) struct NamedCache {
    name: String,
    policy: CachePolicy,
    state: Mutex<CacheState>,
    hits: AtomicU64,
    misses: AtomicU64,
    coalesced: AtomicU64,
    failures: AtomicU64,
    evictions: AtomicU64,
}

impl NamedCache {
    pub(crate) fn new(name: impl Into<String>, policy: CachePolicy) -> Self {
        Self {
            name: name.into(),
            policy,
            state: Mutex::new(CacheState::default()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            coalesced: AtomicU64::new(0),
            failures: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn policy(&self) -> &CachePolicy {
        &self.policy
    }

    fn lock(&self) -> MutexGuard<'_, CacheState> {
        // Nothing panics while holding the lock, so a poisoned state is still consistent.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn is_expired(&self, entry: &CacheEntry, now: Instant) -> bool {
        self.policy
            .ttl
            .is_some_and(|ttl| now.saturating_duration_since(entry.written_at) >= ttl)
    }

    /// Resolves a key to a fresh value, an in-flight computation to wait on, or a
    /// newly registered computation the caller must run.
    pub(crate) fn lookup(&self, key: &CacheKey) -> Lookup {
        let now = Instant::now();
        let mut guard = self.lock();
        let state = &mut *guard;
        let tick = state.next_tick();

        let (expired, previous_access) = match state.entries.get_mut(key) {
            Some(entry) if !self.is_expired(entry, now) => {
                let previous = std::mem::replace(&mut entry.last_access, tick);
                let value = entry.value.clone();
                state.recency.remove(&previous);
                state.recency.insert(tick, key.clone());
                self.hits.fetch_add(1, Ordering::Relaxed);
                return Lookup::Hit(value);
            }
            Some(entry) => (true, entry.last_access),
            None => (false, 0),
        };
        if expired {
            state.entries.remove(key);
            state.recency.remove(&previous_access);
            self.evictions.fetch_add(1, Ordering::Relaxed);
            debug!(cache = %self.name, %key, "Expired");
        }

        if let Some(registered) = state.in_flight.get(key) {
            self.coalesced.fetch_add(1, Ordering::Relaxed);
            return Lookup::Wait {
                receiver: registered.flight.outcome.subscribe(),
                recompute: registered.stale,
            };
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        let (outcome, _) = watch::channel(None);
        let flight = Arc::new(InFlight { outcome });
        let registration = Registration {
            flight: flight.clone(),
            stale: false,
        };
        state.in_flight.insert(key.clone(), registration);
        Lookup::Compute(flight)
    }

    /// Publishes a computation outcome to its waiters and stores successful values,
    /// unless the key was invalidated while the computation ran.
    pub(crate) fn complete(
        &self,
        key: &CacheKey,
        flight: &Arc<InFlight>,
        outcome: Result<CachedValue, CacheError>,
    ) {
        {
            let mut state = self.lock();
            if state.is_current(key, flight) {
                let stale = state.in_flight.remove(key).is_some_and(|r| r.stale);
                match &outcome {
                    Ok(_) if stale => {
                        debug!(cache = %self.name, %key, "Discarding result of invalidated computation");
                    }
                    Ok(value) => {
                        state.insert_entry(key.clone(), value.clone());
                        self.evict_overflow(&mut state);
                    }
                    Err(_) => {
                        self.failures.fetch_add(1, Ordering::Relaxed);
                    }
                }
            }
        }
        flight.outcome.send_replace(Some(outcome));
    }

    /// Unregisters a computation whose caller went away before it resolved.
    pub(crate) fn abandon(&self, key: &CacheKey, flight: &Arc<InFlight>) {
        let mut state = self.lock();
        if state.is_current(key, flight) {
            state.in_flight.remove(key);
            debug!(cache = %self.name, %key, "Computation abandoned");
        }
    }

    fn evict_overflow(&self, state: &mut CacheState) {
        let Some(max_size) = self.policy.max_size else {
            return;
        };
        while state.entries.len() > max_size {
            let Some((_, oldest)) = state.recency.pop_first() else {
                break;
            };
            state.entries.remove(&oldest);
            self.evictions.fetch_add(1, Ordering::Relaxed);
            debug!(cache = %self.name, key = %oldest, "Evicted");
        }
    }

    /// Removes the entry and marks a running computation for the key as stale.
    pub(crate) fn invalidate(&self, key: &CacheKey) -> bool {
        let mut state = self.lock();
        let in_flight = match state.in_flight.get_mut(key) {
            Some(registered) => {
                registered.stale = true;
                true
            }
            None => false,
        };
        state.remove_entry(key) || in_flight
    }

    pub(crate) fn invalidate_all(&self) -> usize {
        let mut state = self.lock();
        let removed = state.entries.len();
        state.entries.clear();
        state.recency.clear();
        for registered in state.in_flight.values_mut() {
            registered.stale = true;
        }
        removed
    }

    pub(crate) fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut state = self.lock();
        let expired: Vec<CacheKey> = state
            .entries
            .iter()
            .filter(|(_, entry)| self.is_expired(entry, now))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &expired {
            state.remove_entry(key);
        }
        self.evictions.fetch_add(expired.len() as u64, Ordering::Relaxed);
        expired.len()
    }

    pub(crate) fn stats(&self) -> CacheStats {
        let entries = self.lock().entries.len();
        CacheStats {
            entries,
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            coalesced: self.coalesced.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }
}

/// Unregisters the caller's computation if it is dropped before completing, so that a
/// cancelled or panicking computer never leaves waiters hanging.
pub(crate) struct ComputeGuard<'a> {
    cache: &'a NamedCache,
    key: &'a CacheKey,
    flight: Option<Arc<InFlight>>,
}

impl<'a> ComputeGuard<'a> {
    pub(crate) fn new(cache: &'a NamedCache, key: &'a CacheKey, flight: Arc<InFlight>) -> Self {
        Self {
            cache,
            key,
            flight: Some(flight),
        }
    }

    pub(crate) fn complete(mut self, outcome: Result<CachedValue, CacheError>) {
        if let Some(flight) = self.flight.take() {
            self.cache.complete(self.key, &flight, outcome);
        }
    }
}

impl Drop for ComputeGuard<'_> {
    fn drop(&mut self) {
        if let Some(flight) = self.flight.take() {
            self.cache.abandon(self.key, &flight);
        }
    }
}
