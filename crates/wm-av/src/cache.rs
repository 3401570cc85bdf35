//! Bounded in-memory cache shared by concurrent workers.
//!
//! Entries carry a caller-assigned cost. The cache evicts the least recently
//! accessed entry when either the entry count or the summed cost would go
//! over its limit, and [`ConversionCache::cleanup_idle`] drops entries that
//! have not been touched for the idle window.

use std::hash::Hash;
use std::time::{Duration, Instant};

use dashmap::DashMap;

use wm_core::config::CacheConfig;

struct CacheEntry<V> {
    value: V,
    cost: usize,
    last_accessed: Instant,
}

/// Thread-safe cache keyed by source identity.
pub struct ConversionCache<K, V>
where
    K: Eq + Hash + Clone,
{
    entries: DashMap<K, CacheEntry<V>>,
    max_entries: usize,
    max_cost: usize,
    idle: Duration,
}

impl<K, V> ConversionCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    /// Create a cache. A zero `max_entries` or `max_cost` is treated as one.
    pub fn new(max_entries: usize, max_cost: usize, idle: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            max_entries: max_entries.max(1),
            max_cost: max_cost.max(1),
            idle,
        }
    }

    pub fn from_config(cfg: &CacheConfig) -> Self {
        Self::new(cfg.max_entries, cfg.max_cost, cfg.idle())
    }

    /// Get a value, refreshing its access time.
    pub fn get(&self, key: &K) -> Option<V> {
        self.entries.get_mut(key).map(|mut entry| {
            entry.last_accessed = Instant::now();
            entry.value.clone()
        })
    }

    /// Return the cached value, or insert the one produced by `make`.
    ///
    /// An existing entry is never replaced: when two callers race on the same
    /// key both receive whichever value landed first.
    pub fn get_or_insert_with<F>(&self, key: K, cost: usize, make: F) -> V
    where
        F: FnOnce() -> V,
    {
        if let Some(value) = self.get(&key) {
            return value;
        }

        self.make_room(cost);

        let mut entry = self.entries.entry(key).or_insert_with(|| CacheEntry {
            value: make(),
            cost,
            last_accessed: Instant::now(),
        });
        entry.last_accessed = Instant::now();
        entry.value.clone()
    }

    /// Insert or replace a value.
    pub fn insert(&self, key: K, value: V, cost: usize) {
        if !self.entries.contains_key(&key) {
            self.make_room(cost);
        }
        self.entries.insert(
            key,
            CacheEntry {
                value,
                cost,
                last_accessed: Instant::now(),
            },
        );
    }

    /// Mutate an existing value in place. Returns the updated value, or
    /// `None` if the key is absent.
    pub fn update<F>(&self, key: &K, f: F) -> Option<V>
    where
        F: FnOnce(&mut V),
    {
        self.entries.get_mut(key).map(|mut entry| {
            f(&mut entry.value);
            entry.last_accessed = Instant::now();
            entry.value.clone()
        })
    }

    /// Change the cost of an existing entry, then evict least recently used
    /// entries until the total cost fits again. The reweighed entry is never
    /// the one evicted. Returns `false` if the key is absent.
    pub fn reweigh(&self, key: &K, cost: usize) -> bool {
        match self.entries.get_mut(key) {
            Some(mut entry) => {
                entry.cost = cost;
                entry.last_accessed = Instant::now();
            }
            None => return false,
        }
        while self.entries.len() > 1 && self.total_cost() > self.max_cost {
            let oldest = self
                .entries
                .iter()
                .filter(|entry| entry.key() != key)
                .min_by_key(|entry| entry.last_accessed)
                .map(|entry| entry.key().clone());
            match oldest {
                Some(victim) => {
                    self.entries.remove(&victim);
                }
                None => break,
            }
        }
        true
    }

    pub fn remove(&self, key: &K) -> Option<V> {
        self.entries.remove(key).map(|(_, entry)| entry.value)
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Sum of the costs of all cached entries.
    pub fn total_cost(&self) -> usize {
        self.entries.iter().map(|entry| entry.cost).sum()
    }

    /// Drop entries untouched for longer than the idle window.
    /// Returns how many were removed.
    pub fn cleanup_idle(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries
            .retain(|_, entry| now.duration_since(entry.last_accessed) < self.idle);
        before.saturating_sub(self.entries.len())
    }

    fn make_room(&self, incoming_cost: usize) {
        while !self.entries.is_empty()
            && (self.entries.len() >= self.max_entries
                || self.total_cost().saturating_add(incoming_cost) > self.max_cost)
        {
            if !self.evict_oldest() {
                break;
            }
        }
    }

    fn evict_oldest(&self) -> bool {
        let oldest = self
            .entries
            .iter()
            .min_by_key(|entry| entry.last_accessed)
            .map(|entry| entry.key().clone());

        match oldest {
            Some(key) => {
                self.entries.remove(&key);
                tracing::trace!("evicted least recently used cache entry");
                true
            }
            None => false,
        }
    }
}
