//! LookupCache: least-queried-first cache in front of a resolver

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use ahash::RandomState;
use parking_lot::Mutex;
use tracing::{debug, error, warn};

use crate::clock::{Clock, SystemClock};
use crate::config::CacheConfig;
use crate::error::Result;
use crate::event::Event;
use crate::frequency::FrequencyIndex;
use crate::resolver::{Lookup, Resolver};
use crate::stats::CacheStats;

/// Cached resolver output for one key
struct Entry {
    /// Whole record the resolver populated
    value: Event,
    /// Time of the last successful resolver call
    refreshed_at: Instant,
}

/// Everything guarded by the cache lock
struct State {
    store: HashMap<String, Entry, RandomState>,
    frequency: FrequencyIndex<String>,
}

/// Bounded, staleness-aware cache over a [`Resolver`]
///
/// One instance is built at startup and shared (`Arc<LookupCache>`) by every
/// caller. A single lock covers the store and the frequency index for the
/// whole of [`find`](LookupCache::find), resolver call included, so the
/// resolver runs at most once per miss or stale hit. Dropping the cache
/// logs its final statistics.
pub struct LookupCache {
    /// Store and frequency index
    state: Mutex<State>,

    /// Backing lookup
    resolver: Arc<dyn Resolver>,

    /// Time source for staleness
    clock: Arc<dyn Clock>,

    /// Cache statistics
    stats: CacheStats,

    /// Validated configuration
    config: CacheConfig,
}

impl LookupCache {
    /// Create a cache over `resolver` using the system clock
    ///
    /// # Arguments
    /// * `config` - Capacity, staleness window and result field
    /// * `resolver` - Lookup consulted on misses and stale hits
    ///
    /// # Returns
    /// * `Result<LookupCache>` - Error if the configuration is invalid
    pub fn new(config: CacheConfig, resolver: Arc<dyn Resolver>) -> Result<Self> {
        Self::with_clock(config, resolver, Arc::new(SystemClock))
    }

    /// Create a cache with an explicit time source
    pub fn with_clock(config: CacheConfig, resolver: Arc<dyn Resolver>, clock: Arc<dyn Clock>) -> Result<Self> {
        config.validate()?;

        Ok(Self {
            state: Mutex::new(State {
                store: HashMap::with_capacity_and_hasher(config.capacity, RandomState::new()),
                frequency: FrequencyIndex::with_capacity(config.capacity),
            }),
            resolver,
            clock,
            stats: CacheStats::new(),
            config,
        })
    }

    /// Look up `key`, resolving into `event` on a miss or stale hit
    ///
    /// # Arguments
    /// * `key` - Lookup key (an IP address)
    /// * `event` - Record the resolver populates when it is called
    ///
    /// # Returns
    /// * `Lookup::Found` with the cached result field, `Lookup::NotFound` or
    ///   `Lookup::Failed` when no entry exists for the key
    pub fn find(&self, key: &str, event: &mut Event) -> Lookup {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let now = self.clock.now();
        let stale_after = self.config.stale_after();

        let mut outcome = Lookup::NotFound;
        let stale = state
            .store
            .get(key)
            .map(|entry| now.saturating_duration_since(entry.refreshed_at) >= stale_after);

        match stale {
            Some(false) => self.stats.record_hit(),
            Some(true) => match self.resolver.resolve(key, event) {
                Ok(true) => {
                    if let Some(entry) = state.store.get_mut(key) {
                        entry.value = event.clone();
                        entry.refreshed_at = now;
                    }
                    self.stats.record_refresh();
                    debug!(key, "Refreshed stale entry");
                }
                Ok(false) => {
                    self.stats.record_refresh_failure();
                    warn!(key, "Refresh found nothing, serving stale entry");
                }
                Err(e) => {
                    self.stats.record_refresh_failure();
                    warn!(key, error = %e, "Refresh failed, serving stale entry");
                }
            },
            None => {
                self.stats.record_miss();
                if state.store.len() >= self.config.capacity {
                    self.make_room(state);
                }

                match self.resolver.resolve(key, event) {
                    Ok(true) => {
                        state.store.insert(
                            key.to_string(),
                            Entry {
                                value: event.clone(),
                                refreshed_at: now,
                            },
                        );
                        self.stats.record_insert();
                        debug!(key, cache_size = state.store.len(), "Inserted into cache");
                    }
                    Ok(false) => {
                        self.stats.record_resolver_failure();
                        debug!(key, "Resolver found nothing");
                    }
                    Err(e) => {
                        self.stats.record_resolver_failure();
                        outcome = Lookup::Failed;
                        debug!(key, error = %e, "Resolver failed");
                    }
                }
            }
        }

        // Only keys with an entry are counted, keeping the index in lockstep
        // with the store
        match state.store.get(key) {
            Some(entry) => {
                state.frequency.record_access(key);
                match entry.value.get(&self.config.target) {
                    Some(value) => Lookup::Found(value.clone()),
                    None => Lookup::NotFound,
                }
            }
            None => outcome,
        }
    }

    fn make_room(&self, state: &mut State) {
        match state.frequency.evict_one() {
            Some(evicted) => {
                state.store.remove(&evicted);
                self.stats.record_eviction();
                debug!(key = %evicted, cache_size = state.store.len(), "Evicted least-queried entry");
            }
            None => {
                error!(
                    cache_size = state.store.len(),
                    capacity = self.config.capacity,
                    "Cache full but frequency index is empty"
                );
                debug_assert!(false, "frequency index out of step with store");
            }
        }
    }

    /// Check whether `key` has an entry
    pub fn contains(&self, key: &str) -> bool {
        self.state.lock().store.contains_key(key)
    }

    /// Recorded access count of `key`, if it has an entry
    pub fn access_count(&self, key: &str) -> Option<u64> {
        self.state.lock().frequency.count(key)
    }

    /// Get cache statistics
    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }

    /// Get the configuration the cache was built with
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Get current number of entries
    pub fn len(&self) -> usize {
        self.state.lock().store.len()
    }

    /// Check if the cache holds no entries
    pub fn is_empty(&self) -> bool {
        self.state.lock().store.is_empty()
    }

    /// Get cache capacity
    pub fn capacity(&self) -> usize {
        self.config.capacity
    }
}

impl Drop for LookupCache {
    fn drop(&mut self) {
        debug!(
            entries = self.state.get_mut().store.len(),
            hits = self.stats.hits(),
            misses = self.stats.misses(),
            evictions = self.stats.evictions(),
            "Lookup cache shut down"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::error::Error;
    use crate::resolver::ResolveError;
    use serde_json::json;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use std::time::Duration;

    const DAY: Duration = Duration::from_secs(86_400);

    /// Resolver that counts calls per key and can be told to fail
    #[derive(Default)]
    struct TestResolver {
        calls: parking_lot::Mutex<HashMap<String, usize>>,
        total: AtomicUsize,
        failing: parking_lot::Mutex<HashSet<String>>,
        unknown: parking_lot::Mutex<HashSet<String>>,
        delay: Option<Duration>,
    }

    impl TestResolver {
        fn calls(&self, key: &str) -> usize {
            self.calls.lock().get(key).copied().unwrap_or(0)
        }

        fn fail(&self, key: &str) {
            self.failing.lock().insert(key.to_string());
        }

        fn recover(&self, key: &str) {
            self.failing.lock().remove(key);
        }

        fn forget(&self, key: &str) {
            self.unknown.lock().insert(key.to_string());
        }
    }

    impl Resolver for TestResolver {
        fn resolve(&self, key: &str, event: &mut Event) -> std::result::Result<bool, ResolveError> {
            if let Some(delay) = self.delay {
                thread::sleep(delay);
            }
            self.total.fetch_add(1, Ordering::SeqCst);
            let version = {
                let mut calls = self.calls.lock();
                let n = calls.entry(key.to_string()).or_insert(0);
                *n += 1;
                *n
            };

            if self.failing.lock().contains(key) {
                return Err(ResolveError::Unavailable("backend down".to_string()));
            }
            if self.unknown.lock().contains(key) {
                return Ok(false);
            }

            event.set("ip2proxy", json!({ "key": key, "version": version }));
            Ok(true)
        }
    }

    fn cache_with(capacity: usize) -> (LookupCache, Arc<TestResolver>, Arc<ManualClock>) {
        let resolver = Arc::new(TestResolver::default());
        let clock = Arc::new(ManualClock::new());
        let cache = LookupCache::with_clock(
            CacheConfig::with_capacity(capacity),
            resolver.clone(),
            clock.clone(),
        )
        .unwrap();
        (cache, resolver, clock)
    }

    fn find(cache: &LookupCache, key: &str) -> Lookup {
        cache.find(key, &mut Event::new())
    }

    #[test]
    fn test_new_rejects_bad_config() {
        let resolver: Arc<dyn Resolver> = Arc::new(TestResolver::default());

        let result = LookupCache::new(CacheConfig::with_capacity(0), resolver.clone());
        assert!(matches!(result, Err(Error::InvalidCapacity(0))));

        let config = CacheConfig {
            stale_after_secs: 0,
            ..CacheConfig::default()
        };
        assert!(matches!(LookupCache::new(config, resolver), Err(Error::InvalidStaleness)));
    }

    #[test]
    fn test_miss_then_hit() {
        let (cache, resolver, _clock) = cache_with(10);

        let mut event = Event::new();
        let first = cache.find("8.8.8.8", &mut event);
        assert_eq!(first, Lookup::Found(json!({ "key": "8.8.8.8", "version": 1 })));
        // The resolver wrote into the caller's event
        assert!(event.contains("ip2proxy"));

        let second = find(&cache, "8.8.8.8");
        assert_eq!(second, first);
        assert_eq!(resolver.calls("8.8.8.8"), 1);
        assert_eq!(cache.stats().misses(), 1);
        assert_eq!(cache.stats().hits(), 1);
        assert_eq!(cache.stats().inserts(), 1);
    }

    #[test]
    fn test_idempotent_hits_within_window() {
        let (cache, resolver, clock) = cache_with(10);

        let first = find(&cache, "a");
        for _ in 0..10 {
            clock.advance(Duration::from_secs(3600));
            assert_eq!(find(&cache, "a"), first);
        }

        // 10 hours elapsed, still inside the window
        assert_eq!(resolver.calls("a"), 1);
    }

    #[test]
    fn test_first_access_counts_two() {
        let (cache, _resolver, _clock) = cache_with(10);

        find(&cache, "a");
        assert_eq!(cache.access_count("a"), Some(2));

        find(&cache, "a");
        assert_eq!(cache.access_count("a"), Some(3));
    }

    #[test]
    fn test_scenario_a_evicts_earliest_of_lowest() {
        let (cache, _resolver, _clock) = cache_with(2);

        find(&cache, "a");
        find(&cache, "b");
        find(&cache, "c");

        assert_eq!(cache.len(), 2);
        assert!(!cache.contains("a"));
        assert!(cache.contains("b"));
        assert!(cache.contains("c"));
        assert_eq!(cache.access_count("a"), None);
        assert_eq!(cache.stats().evictions(), 1);
    }

    #[test]
    fn test_scenario_b_hot_key_survives() {
        let (cache, resolver, _clock) = cache_with(10);

        find(&cache, "x");
        for _ in 0..5 {
            find(&cache, "x");
        }
        let others: Vec<String> = (1..=9).map(|i| format!("10.0.0.{}", i)).collect();
        for key in &others {
            find(&cache, key);
        }
        assert_eq!(cache.len(), 10);

        find(&cache, "10.0.0.99");

        assert_eq!(cache.len(), 10);
        assert!(cache.contains("x"));
        assert_eq!(cache.access_count("x"), Some(7));
        // All others are tied at the lowest count; the earliest goes
        assert!(!cache.contains(&others[0]));
        for key in &others[1..] {
            assert!(cache.contains(key));
        }
        assert_eq!(resolver.calls("x"), 1);
    }

    #[test]
    fn test_eviction_prefers_least_queried_over_oldest() {
        let (cache, _resolver, _clock) = cache_with(3);

        find(&cache, "a");
        find(&cache, "b");
        find(&cache, "c");
        find(&cache, "a");
        find(&cache, "b");
        find(&cache, "d");

        assert!(!cache.contains("c"));
        assert!(cache.contains("a"));
        assert!(cache.contains("b"));
        assert!(cache.contains("d"));
    }

    #[test]
    fn test_scenario_c_stale_entry_refreshed() {
        let (cache, resolver, clock) = cache_with(10);

        let old = find(&cache, "y");
        clock.advance(Duration::from_secs(25 * 3600));

        let mut event = Event::new();
        let refreshed = cache.find("y", &mut event);

        assert_eq!(resolver.calls("y"), 2);
        assert_ne!(refreshed, old);
        assert_eq!(refreshed, Lookup::Found(json!({ "key": "y", "version": 2 })));
        assert_eq!(cache.stats().refreshes(), 1);

        // The refreshed value is served from then on
        assert_eq!(find(&cache, "y"), refreshed);
        assert_eq!(resolver.calls("y"), 2);
    }

    #[test]
    fn test_refresh_at_exact_window() {
        let (cache, resolver, clock) = cache_with(10);

        find(&cache, "y");
        clock.advance(DAY - Duration::from_secs(1));
        find(&cache, "y");
        assert_eq!(resolver.calls("y"), 1);

        clock.advance(Duration::from_secs(1));
        find(&cache, "y");
        assert_eq!(resolver.calls("y"), 2);
    }

    #[test]
    fn test_stale_refresh_failure_serves_old_value() {
        let (cache, resolver, clock) = cache_with(10);

        let old = find(&cache, "y");
        clock.advance(DAY * 2);
        resolver.fail("y");

        assert_eq!(find(&cache, "y"), old);
        assert!(cache.contains("y"));
        assert_eq!(cache.stats().refresh_failures(), 1);

        // Timestamp was not bumped, so the next access retries
        resolver.recover("y");
        let refreshed = find(&cache, "y");
        assert_eq!(refreshed, Lookup::Found(json!({ "key": "y", "version": 3 })));
    }

    #[test]
    fn test_stale_refresh_not_found_serves_old_value() {
        let (cache, resolver, clock) = cache_with(10);

        let old = find(&cache, "y");
        clock.advance(DAY);
        resolver.forget("y");

        assert_eq!(find(&cache, "y"), old);
        assert_eq!(cache.access_count("y"), Some(3));
    }

    #[test]
    fn test_refresh_failure_does_not_evict() {
        let (cache, resolver, clock) = cache_with(2);

        find(&cache, "a");
        find(&cache, "b");
        clock.advance(DAY);
        resolver.fail("a");
        find(&cache, "a");

        assert_eq!(cache.len(), 2);
        assert!(cache.contains("a"));
        assert!(cache.contains("b"));
    }

    #[test]
    fn test_scenario_d_failed_insert_leaves_no_trace() {
        let (cache, resolver, _clock) = cache_with(10);

        find(&cache, "a");
        resolver.fail("z");

        assert_eq!(find(&cache, "z"), Lookup::Failed);
        assert_eq!(cache.len(), 1);
        assert!(!cache.contains("z"));
        // Access is recorded only for keys that got an entry
        assert_eq!(cache.access_count("z"), None);
        assert_eq!(cache.stats().resolver_failures(), 1);

        // Nothing negative-cached: the next call tries again
        find(&cache, "z");
        assert_eq!(resolver.calls("z"), 2);
    }

    #[test]
    fn test_not_found_is_distinct_from_failure() {
        let (cache, resolver, _clock) = cache_with(10);

        resolver.forget("192.0.2.1");

        assert_eq!(find(&cache, "192.0.2.1"), Lookup::NotFound);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_failed_insert_at_capacity_still_evicts() {
        let (cache, resolver, _clock) = cache_with(2);

        find(&cache, "a");
        find(&cache, "b");
        resolver.fail("z");
        find(&cache, "z");

        // Room is made before the resolver is consulted
        assert_eq!(cache.len(), 1);
        assert!(!cache.contains("a"));
        assert!(cache.contains("b"));
    }

    #[test]
    fn test_missing_target_field_is_not_found() {
        let resolver = |_: &str, event: &mut Event| -> std::result::Result<bool, ResolveError> {
            event.set("other", 1);
            Ok(true)
        };
        let cache = LookupCache::new(CacheConfig::default(), Arc::new(resolver)).unwrap();

        assert_eq!(find(&cache, "a"), Lookup::NotFound);
        // The record is still cached
        assert!(cache.contains("a"));
    }

    #[test]
    fn test_capacity_bound_and_lockstep() {
        let (cache, resolver, clock) = cache_with(7);

        for i in 0..500u32 {
            let key = format!("10.0.{}.{}", i % 13, (i * 31) % 11);
            if i % 17 == 0 {
                resolver.fail(&key);
            } else {
                resolver.recover(&key);
            }
            if i % 50 == 0 {
                clock.advance(DAY);
            }
            find(&cache, &key);

            let state = cache.state.lock();
            assert!(state.store.len() <= 7);
            assert_eq!(state.store.len(), state.frequency.len());
            for stored in state.store.keys() {
                assert!(state.frequency.contains(stored));
            }
            state.frequency.assert_consistent();
        }
    }

    #[test]
    fn test_concurrent_same_key_resolves_once() {
        let resolver = Arc::new(TestResolver {
            delay: Some(Duration::from_millis(20)),
            ..TestResolver::default()
        });
        let cache = LookupCache::new(CacheConfig::with_capacity(16), resolver.clone()).unwrap();

        thread::scope(|s| {
            for _ in 0..8 {
                s.spawn(|| {
                    assert!(find(&cache, "1.1.1.1").is_found());
                });
            }
        });

        assert_eq!(resolver.calls("1.1.1.1"), 1);
        assert_eq!(cache.access_count("1.1.1.1"), Some(9));
    }

    #[test]
    fn test_concurrent_many_keys_respects_capacity() {
        let resolver = Arc::new(TestResolver::default());
        let cache = LookupCache::new(CacheConfig::with_capacity(32), resolver.clone()).unwrap();

        thread::scope(|s| {
            for t in 0..8u32 {
                let cache = &cache;
                s.spawn(move || {
                    for i in 0..250u32 {
                        let key = format!("172.16.{}.{}", t, i % 50);
                        assert!(find(cache, &key).is_found());
                        assert!(cache.len() <= 32);
                    }
                });
            }
        });

        assert_eq!(cache.len(), 32);
        let stats = cache.stats();
        assert_eq!(stats.hits() + stats.misses(), 2000);
        assert_eq!(stats.inserts(), stats.misses());
        assert_eq!(resolver.total.load(Ordering::SeqCst) as u64, stats.misses());
    }
}
