//! Bounded in-memory result caches keyed by operation fingerprint
//!
//! Each cache is a least-recently-used map from [`OperationFingerprint`] to a
//! shared, immutable [`ImageArtifact`]. Lookups promote the entry; inserts past
//! capacity evict the oldest entry. Concurrent misses for the same fingerprint
//! are coalesced: one caller computes while the others wait for its result.
//!
//! Nothing here is persisted. Entries live for the lifetime of the process.

use crate::{
    error::Result,
    fingerprint::OperationFingerprint,
    types::ImageArtifact,
};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use tracing::debug;

/// Cache statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct CacheStats {
    /// Number of entries currently cached
    pub entries: usize,
    /// Configured capacity
    pub capacity: usize,
    /// Lookups answered from the cache
    pub hits: u64,
    /// Lookups that triggered a computation
    pub misses: u64,
    /// Entries dropped to stay within capacity
    pub evictions: u64,
}

impl CacheStats {
    /// Fraction of lookups served from the cache
    #[must_use]
    pub fn hit_ratio(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Completion signal for a computation in progress
struct InFlight {
    done: Mutex<bool>,
    ready: Condvar,
}

impl InFlight {
    fn new() -> Self {
        Self {
            done: Mutex::new(false),
            ready: Condvar::new(),
        }
    }

    fn wait(&self) {
        let mut done = self.done.lock().unwrap_or_else(PoisonError::into_inner);
        while !*done {
            done = self
                .ready
                .wait(done)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    fn finish(&self) {
        *self.done.lock().unwrap_or_else(PoisonError::into_inner) = true;
        self.ready.notify_all();
    }
}

#[derive(Default)]
struct CacheState {
    entries: HashMap<OperationFingerprint, Arc<ImageArtifact>>,
    /// Oldest at the front, most recently used at the back
    order: VecDeque<OperationFingerprint>,
    in_flight: HashMap<OperationFingerprint, Arc<InFlight>>,
    hits: u64,
    misses: u64,
    evictions: u64,
}

impl CacheState {
    fn touch(&mut self, key: &OperationFingerprint) {
        if let Some(pos) = self.order.iter().position(|k| k == key) {
            if let Some(k) = self.order.remove(pos) {
                self.order.push_back(k);
            }
        }
    }

    fn lookup(&mut self, key: &OperationFingerprint) -> Option<Arc<ImageArtifact>> {
        let value = self.entries.get(key).cloned()?;
        self.touch(key);
        Some(value)
    }

    /// Insert and return the evicted keys
    fn insert(
        &mut self,
        key: OperationFingerprint,
        value: Arc<ImageArtifact>,
        capacity: usize,
    ) -> Vec<OperationFingerprint> {
        if self.entries.insert(key.clone(), value).is_some() {
            self.touch(&key);
            return Vec::new();
        }
        self.order.push_back(key);

        let mut evicted = Vec::new();
        while self.entries.len() > capacity {
            let Some(oldest) = self.order.pop_front() else {
                break;
            };
            self.entries.remove(&oldest);
            self.evictions += 1;
            evicted.push(oldest);
        }
        evicted
    }
}

/// Removes the in-flight marker and wakes waiters, even if the computation panics
struct FlightGuard<'a> {
    cache: &'a ArtifactCache,
    key: &'a OperationFingerprint,
    flight: Arc<InFlight>,
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        self.cache.lock().in_flight.remove(self.key);
        self.flight.finish();
    }
}

/// Bounded LRU cache of pipeline results with single-flight computation
pub struct ArtifactCache {
    name: &'static str,
    capacity: usize,
    enabled: bool,
    state: Mutex<CacheState>,
}

impl std::fmt::Debug for ArtifactCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArtifactCache")
            .field("name", &self.name)
            .field("capacity", &self.capacity)
            .field("enabled", &self.enabled)
            .finish_non_exhaustive()
    }
}

impl ArtifactCache {
    /// Create a cache holding at most `capacity` entries (minimum 1)
    #[must_use]
    pub fn new(name: &'static str, capacity: usize) -> Self {
        Self {
            name,
            capacity: capacity.max(1),
            enabled: true,
            state: Mutex::new(CacheState::default()),
        }
    }

    /// Create a pass-through cache that computes every time and stores nothing
    #[must_use]
    pub fn disabled(name: &'static str) -> Self {
        Self {
            enabled: false,
            ..Self::new(name, 1)
        }
    }

    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    // Every mutation leaves the state consistent before it can panic, so a
    // poisoned lock still guards valid data.
    fn lock(&self) -> MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Look up a result, promoting it to most recently used
    pub fn get(&self, key: &OperationFingerprint) -> Option<Arc<ImageArtifact>> {
        if !self.enabled {
            return None;
        }
        let mut state = self.lock();
        let found = state.lookup(key);
        if found.is_some() {
            state.hits += 1;
        } else {
            state.misses += 1;
        }
        found
    }

    /// Store a result, evicting the least recently used entry when full
    pub fn insert(&self, key: OperationFingerprint, value: Arc<ImageArtifact>) {
        if !self.enabled {
            return;
        }
        let evicted = self.lock().insert(key, value, self.capacity);
        for key in evicted {
            debug!(cache = self.name, fingerprint = %key, "Cache eviction");
        }
    }

    /// Whether `key` is currently cached. Does not affect recency.
    #[must_use]
    pub fn contains(&self, key: &OperationFingerprint) -> bool {
        self.lock().entries.contains_key(key)
    }

    /// Return the cached result for `key`, or run `compute` and cache its output.
    ///
    /// At most one computation per fingerprint runs at a time; concurrent
    /// callers wait for it and share the result. A failed computation stores
    /// nothing, and one of the waiters retries.
    ///
    /// # Errors
    /// - Whatever `compute` returns
    pub fn get_or_try_compute<F>(
        &self,
        key: &OperationFingerprint,
        mut compute: F,
    ) -> Result<Arc<ImageArtifact>>
    where
        F: FnMut() -> Result<ImageArtifact>,
    {
        if !self.enabled {
            return compute().map(Arc::new);
        }

        loop {
            let mut state = self.lock();
            if let Some(found) = state.lookup(key) {
                state.hits += 1;
                drop(state);
                debug!(cache = self.name, fingerprint = %key, "💾 Cache hit");
                return Ok(found);
            }

            if let Some(flight) = state.in_flight.get(key).cloned() {
                drop(state);
                debug!(cache = self.name, fingerprint = %key, "⏳ Waiting for in-flight computation");
                flight.wait();
                continue;
            }

            let flight = Arc::new(InFlight::new());
            state.in_flight.insert(key.clone(), Arc::clone(&flight));
            state.misses += 1;
            drop(state);

            debug!(cache = self.name, fingerprint = %key, "🔍 Cache miss");
            let guard = FlightGuard {
                cache: self,
                key,
                flight,
            };
            let value = Arc::new(compute()?);
            self.insert(key.clone(), Arc::clone(&value));
            drop(guard);
            return Ok(value);
        }
    }

    /// Drop every entry
    pub fn clear(&self) {
        let mut state = self.lock();
        state.entries.clear();
        state.order.clear();
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn stats(&self) -> CacheStats {
        let state = self.lock();
        CacheStats {
            entries: state.entries.len(),
            capacity: self.capacity,
            hits: state.hits,
            misses: state.misses,
            evictions: state.evictions,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AutoRenderError;
    use crate::fingerprint::{OperationKind, ParamValue};
    use image::{Rgb, RgbImage};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Barrier;
    use std::time::Duration;

    fn key(n: u32) -> OperationFingerprint {
        OperationFingerprint::new(
            OperationKind::RemoveBackground,
            b"same image",
            vec![ParamValue::Absent, n.into()],
        )
    }

    fn artifact(v: u8) -> ImageArtifact {
        ImageArtifact::from_rgb(RgbImage::from_pixel(1, 1, Rgb([v, v, v])))
    }

    #[test]
    fn test_insert_and_get() {
        let cache = ArtifactCache::new("test", 4);
        assert!(cache.get(&key(1)).is_none());

        cache.insert(key(1), Arc::new(artifact(1)));
        assert_eq!(*cache.get(&key(1)).unwrap(), artifact(1));
        assert!(cache.get(&key(2)).is_none());
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_get_counts_hits_and_misses() {
        let cache = ArtifactCache::new("test", 4);
        assert!(cache.get(&key(1)).is_none());
        cache.insert(key(1), Arc::new(artifact(1)));
        assert!(cache.get(&key(1)).is_some());
        assert!(cache.get(&key(2)).is_none());

        let stats = cache.stats();
        assert_eq!((stats.hits, stats.misses), (1, 2));
        assert!((stats.hit_ratio() - 1.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_capacity_evicts_least_recently_used() {
        let cache = ArtifactCache::new("test", 2);
        cache.insert(key(1), Arc::new(artifact(1)));
        cache.insert(key(2), Arc::new(artifact(2)));
        cache.insert(key(3), Arc::new(artifact(3)));

        assert!(!cache.contains(&key(1)));
        assert!(cache.contains(&key(2)));
        assert!(cache.contains(&key(3)));
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn test_access_promotes_recency() {
        let cache = ArtifactCache::new("test", 2);
        cache.insert(key(1), Arc::new(artifact(1)));
        cache.insert(key(2), Arc::new(artifact(2)));

        // Touch 1 so that 2 becomes the eviction candidate
        assert!(cache.get(&key(1)).is_some());
        cache.insert(key(3), Arc::new(artifact(3)));

        assert!(cache.contains(&key(1)));
        assert!(!cache.contains(&key(2)));
        assert!(cache.contains(&key(3)));
    }

    #[test]
    fn test_reinsert_does_not_grow() {
        let cache = ArtifactCache::new("test", 2);
        cache.insert(key(1), Arc::new(artifact(1)));
        cache.insert(key(1), Arc::new(artifact(9)));
        assert_eq!(cache.len(), 1);
        assert_eq!(*cache.get(&key(1)).unwrap(), artifact(9));
    }

    #[test]
    fn test_get_or_try_compute_memoizes() {
        let cache = ArtifactCache::new("test", 4);
        let calls = AtomicUsize::new(0);
        let compute = || {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(artifact(5))
        };

        let first = cache.get_or_try_compute(&key(1), compute).unwrap();
        let second = cache.get_or_try_compute(&key(1), compute).unwrap();
        assert_eq!(first, second);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert!((stats.hit_ratio() - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_failed_computation_is_not_cached() {
        let cache = ArtifactCache::new("test", 4);
        let result = cache.get_or_try_compute(&key(1), || {
            Err(AutoRenderError::internal("provider exploded"))
        });
        assert!(result.is_err());
        assert!(cache.is_empty());

        let value = cache.get_or_try_compute(&key(1), || Ok(artifact(7))).unwrap();
        assert_eq!(*value, artifact(7));
    }

    #[test]
    fn test_disabled_cache_always_computes() {
        let cache = ArtifactCache::disabled("test");
        let calls = AtomicUsize::new(0);
        for _ in 0..3 {
            cache
                .get_or_try_compute(&key(1), || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(artifact(1))
                })
                .unwrap();
        }
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_concurrent_misses_compute_once() {
        let cache = ArtifactCache::new("test", 4);
        let calls = AtomicUsize::new(0);
        let barrier = Barrier::new(4);

        let results: Vec<Arc<ImageArtifact>> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..4)
                .map(|_| {
                    scope.spawn(|| {
                        barrier.wait();
                        cache
                            .get_or_try_compute(&key(1), || {
                                calls.fetch_add(1, Ordering::SeqCst);
                                std::thread::sleep(Duration::from_millis(50));
                                Ok(artifact(3))
                            })
                            .unwrap()
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(results.iter().all(|r| **r == artifact(3)));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_waiter_retries_after_leader_failure() {
        let cache = ArtifactCache::new("test", 4);
        let calls = AtomicUsize::new(0);
        let barrier = Barrier::new(2);

        let outcomes: Vec<bool> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..2)
                .map(|_| {
                    scope.spawn(|| {
                        barrier.wait();
                        cache
                            .get_or_try_compute(&key(1), || {
                                let n = calls.fetch_add(1, Ordering::SeqCst);
                                std::thread::sleep(Duration::from_millis(20));
                                if n == 0 {
                                    Err(AutoRenderError::internal("first attempt fails"))
                                } else {
                                    Ok(artifact(4))
                                }
                            })
                            .is_ok()
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        // Exactly one caller saw the failure; the other computed again
        assert_eq!(outcomes.iter().filter(|ok| **ok).count(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(*cache.get(&key(1)).unwrap(), artifact(4));
    }

    #[test]
    fn test_clear() {
        let cache = ArtifactCache::new("test", 4);
        cache.insert(key(1), Arc::new(artifact(1)));
        cache.clear();
        assert!(cache.is_empty());
        assert!(cache.get(&key(1)).is_none());
    }
}
