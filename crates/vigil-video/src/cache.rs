//! Bounded per-key cache
//!
//! Associative store keyed by opaque string with least-recently-used
//! eviction. Stamps come from a logical counter, not wall time, so reuse
//! order is exact. Eviction scans linearly; fine for the low-thousands
//! capacities this is used at.

use std::collections::HashMap;

/// Capacity-bounded LRU map
#[derive(Debug)]
pub struct BoundedCache<V> {
    entries: HashMap<String, Entry<V>>,
    capacity: usize,
    clock: u64,
}

#[derive(Debug)]
struct Entry<V> {
    value: V,
    last_used: u64,
}

impl<V> BoundedCache<V> {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: HashMap::new(),
            capacity: capacity.max(1),
            clock: 0,
        }
    }

    /// Look up a value, marking it most recently used
    pub fn get(&mut self, key: &str) -> Option<&V> {
        self.clock += 1;
        let clock = self.clock;
        let entry = self.entries.get_mut(key)?;
        entry.last_used = clock;
        Some(&entry.value)
    }

    /// Insert a value, evicting the least-recently-used entry when full
    pub fn insert(&mut self, key: &str, value: V) {
        self.clock += 1;
        if !self.entries.contains_key(key) && self.entries.len() >= self.capacity {
            self.evict_lru();
        }
        self.entries.insert(
            key.to_string(),
            Entry {
                value,
                last_used: self.clock,
            },
        );
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    fn evict_lru(&mut self) {
        let oldest = self
            .entries
            .iter()
            .min_by_key(|(_, entry)| entry.last_used)
            .map(|(key, _)| key.clone());
        if let Some(key) = oldest {
            self.entries.remove(&key);
        }
    }
}
