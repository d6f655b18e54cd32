//! # Explanation Cache
//!
//! SHAP attribution is the expensive step of the pipeline. Identical
//! requests against the same model produce identical attributions, so the
//! pipeline memoizes them in a small LRU cache.
//!
//! Recency uses a logical clock (a monotonic counter) rather than wall time,
//! which keeps eviction order reproducible in tests. Eviction happens in
//! batches so a full cache does not rescan on every insert.

use crate::explainer::Attribution;
use std::collections::BTreeMap;

/// Default number of cached explanations.
pub const DEFAULT_CACHE_CAPACITY: usize = 256;

/// Default number of entries dropped when the cache is full.
pub const DEFAULT_EVICTION_BATCH: usize = 16;

// =============================================================================
// KEYS
// =============================================================================

/// Identity of one explanation: model, explained class and the exact encoded
/// row. Floats are keyed by bit pattern, so `-0.0` and `0.0` differ and NaN
/// matches itself.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ExplanationKey {
    pub model: String,
    pub class: usize,
    pub row: Vec<u64>,
}

impl ExplanationKey {
    #[must_use]
    pub fn new(model: &str, class: usize, encoded: &[f64]) -> Self {
        Self {
            model: model.to_string(),
            class,
            row: encoded.iter().map(|v| v.to_bits()).collect(),
        }
    }
}

// =============================================================================
// LRU CACHE
// =============================================================================

#[derive(Debug, Clone)]
struct Slot<V> {
    value: V,
    last_access: u64,
}

/// Least-recently-used cache with a logical clock.
#[derive(Debug)]
pub struct LruCache<K: Ord + Clone, V: Clone> {
    entries: BTreeMap<K, Slot<V>>,
    capacity: usize,
    eviction_batch: usize,
    clock: u64,
    hits: u64,
    misses: u64,
}

impl<K: Ord + Clone, V: Clone> LruCache<K, V> {
    /// A cache holding at most `capacity` entries (minimum 1).
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: BTreeMap::new(),
            capacity,
            eviction_batch: DEFAULT_EVICTION_BATCH.min(capacity),
            clock: 0,
            hits: 0,
            misses: 0,
        }
    }

    #[must_use]
    pub fn with_eviction_batch(mut self, batch: usize) -> Self {
        self.eviction_batch = batch.clamp(1, self.capacity);
        self
    }

    /// Look up a value, refreshing its recency on a hit.
    pub fn get(&mut self, key: &K) -> Option<V> {
        let now = self.tick();
        match self.entries.get_mut(key) {
            Some(slot) => {
                slot.last_access = now;
                self.hits = self.hits.saturating_add(1);
                Some(slot.value.clone())
            }
            None => {
                self.misses = self.misses.saturating_add(1);
                None
            }
        }
    }

    /// Insert or replace a value, evicting the oldest entries when full.
    pub fn insert(&mut self, key: K, value: V) {
        let now = self.tick();
        if let Some(slot) = self.entries.get_mut(&key) {
            slot.value = value;
            slot.last_access = now;
            return;
        }
        if self.entries.len() >= self.capacity {
            self.evict();
        }
        self.entries.insert(
            key,
            Slot {
                value,
                last_access: now,
            },
        );
    }

    #[must_use]
    pub fn contains(&self, key: &K) -> bool {
        self.entries.contains_key(key)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop every entry. Statistics are kept.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    #[must_use]
    pub fn stats(&self) -> CacheStats {
        let total = self.hits.saturating_add(self.misses);
        CacheStats {
            size: self.entries.len(),
            capacity: self.capacity,
            hits: self.hits,
            misses: self.misses,
            hit_rate_percent: if total == 0 {
                0
            } else {
                (self.hits.saturating_mul(100) / total) as u8
            },
        }
    }

    fn tick(&mut self) -> u64 {
        self.clock = self.clock.saturating_add(1);
        self.clock
    }

    fn evict(&mut self) {
        let mut by_age: Vec<(u64, K)> = self
            .entries
            .iter()
            .map(|(key, slot)| (slot.last_access, key.clone()))
            .collect();
        by_age.sort_by_key(|(last_access, _)| *last_access);

        for (_, key) in by_age.into_iter().take(self.eviction_batch) {
            self.entries.remove(&key);
        }
    }
}

/// Point-in-time cache counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub size: usize,
    pub capacity: usize,
    pub hits: u64,
    pub misses: u64,
    /// Integer percentage, 0-100.
    pub hit_rate_percent: u8,
}

/// The pipeline's attribution cache.
pub type ExplanationCache = LruCache<ExplanationKey, Attribution>;

// =============================================================================
// TESTS
// =============================================================================
