//! Least-frequently-used cache.
//!
//! Each entry counts how often it was set or read, and remembers the tick of
//! its last access. A full cache evicts the entry with the lowest count; on
//! equal counts the one accessed longest ago goes first. Finding the victim
//! is a linear scan, so inserts into a full cache are O(n).

use crate::cache::{effective_capacity, Cache, Deadlines};
use std::collections::HashMap;
use std::hash::Hash;
use std::time::Instant;

#[derive(Debug)]
struct Counted<V> {
    value: V,
    freq: u64,
    tick: u64,
}

#[derive(Debug)]
pub struct LfuCache<K, V> {
    entries: HashMap<K, Counted<V>>,
    deadlines: Deadlines<K>,
    capacity: usize,
    clock: u64,
}

impl<K: Hash + Eq + Clone, V> LfuCache<K, V> {
    /// Creates an empty cache. A capacity of 0 means unbounded.
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: HashMap::new(),
            deadlines: Deadlines::default(),
            capacity: effective_capacity(capacity),
            clock: 0,
        }
    }

    fn next_tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    /// Drops an expired key. Returns whether the key is still live.
    fn check_live(&mut self, key: &K) -> bool {
        if !self.entries.contains_key(key) {
            return false;
        }
        if self.deadlines.is_expired(key, Instant::now()) {
            self.entries.remove(key);
            self.deadlines.clear(key);
            return false;
        }
        true
    }

    fn access(&mut self, key: &K) -> Option<&mut Counted<V>> {
        if !self.check_live(key) {
            return None;
        }
        let tick = self.next_tick();
        let entry = self.entries.get_mut(key)?;
        entry.freq += 1;
        entry.tick = tick;
        Some(entry)
    }

    fn evict(&mut self) {
        let victim = self
            .entries
            .iter()
            .min_by_key(|(_, e)| (e.freq, e.tick))
            .map(|(k, _)| k.clone());
        if let Some(key) = victim {
            self.entries.remove(&key);
            self.deadlines.clear(&key);
        }
    }

    /// Access count of a live key.
    pub fn frequency(&self, key: &K) -> Option<u64> {
        self.entries.get(key).map(|e| e.freq)
    }
}

impl<K, V> Cache<K, V> for LfuCache<K, V>
where
    K: Hash + Eq + Clone + Send,
    V: Send,
{
    fn set(&mut self, key: K, value: V) -> bool {
        let tick = self.next_tick();
        if let Some(entry) = self.entries.get_mut(&key) {
            entry.value = value;
            entry.freq += 1;
            entry.tick = tick;
            self.deadlines.clear(&key);
            return false;
        }

        if self.entries.len() >= self.capacity {
            self.evict();
        }
        self.entries.insert(
            key,
            Counted {
                value,
                freq: 1,
                tick,
            },
        );
        true
    }

    fn get(&mut self, key: &K) -> Option<&V> {
        self.access(key).map(|e| &e.value)
    }

    fn get_mut(&mut self, key: &K) -> Option<&mut V> {
        self.access(key).map(|e| &mut e.value)
    }

    fn expire(&mut self, key: &K, at: Instant) -> bool {
        if !self.check_live(key) {
            return false;
        }
        self.deadlines.set(key.clone(), at);
        true
    }

    fn persist(&mut self, key: &K) -> bool {
        self.check_live(key) && self.deadlines.clear(key)
    }

    fn expires_at(&mut self, key: &K) -> Option<Instant> {
        if !self.check_live(key) {
            return None;
        }
        self.deadlines.get(key)
    }

    fn remove(&mut self, key: &K) -> Option<V> {
        if !self.check_live(key) {
            return None;
        }
        self.deadlines.clear(key);
        self.entries.remove(key).map(|e| e.value)
    }

    fn purge(&mut self) {
        *self = Self::new(self.capacity);
    }

    fn len(&self) -> usize {
        self.entries.len()
    }

    fn has(&mut self, key: &K) -> bool {
        self.check_live(key)
    }

    fn for_each(&self, f: &mut dyn FnMut(&K, &V, Option<Instant>) -> bool) {
        let now = Instant::now();
        for (key, entry) in &self.entries {
            if self.deadlines.is_expired(key, now) {
                continue;
            }
            if !f(key, &entry.value, self.deadlines.get(key)) {
                return;
            }
        }
    }

    fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn cache(capacity: usize) -> LfuCache<String, i32> {
        LfuCache::new(capacity)
    }

    #[test]
    fn test_set_get() {
        let mut c = cache(2);
        assert!(c.set("a".into(), 1));
        assert_eq!(c.get(&"a".into()), Some(&1));
        assert_eq!(c.frequency(&"a".into()), Some(2));
        assert!(!c.set("a".into(), 5));
        assert_eq!(c.frequency(&"a".into()), Some(3));
    }

    #[test]
    fn test_evicts_minimum_frequency() {
        let mut c = cache(3);
        c.set("a".into(), 1);
        c.set("b".into(), 2);
        c.set("c".into(), 3);
        c.get(&"a".into());
        c.get(&"a".into());
        c.get(&"c".into());

        c.set("d".into(), 4);
        assert!(!c.has(&"b".into()));
        assert!(c.has(&"a".into()));
        assert!(c.has(&"c".into()));
        assert!(c.has(&"d".into()));
    }

    #[test]
    fn test_ties_evict_least_recent() {
        let mut c = cache(2);
        c.set("a".into(), 1);
        c.set("b".into(), 2);
        c.set("c".into(), 3);
        assert!(!c.has(&"a".into()));
        assert!(c.has(&"b".into()));
    }

    #[test]
    fn test_new_key_can_be_evicted_next() {
        let mut c = cache(2);
        c.set("a".into(), 1);
        c.get(&"a".into());
        c.set("b".into(), 2);
        c.set("c".into(), 3);
        assert!(c.has(&"a".into()));
        assert!(!c.has(&"b".into()));
    }

    #[test]
    fn test_expire_and_lazy_removal() {
        let mut c = cache(2);
        c.set("a".into(), 1);
        assert!(c.expire(&"a".into(), Instant::now() - Duration::from_millis(1)));
        assert_eq!(c.len(), 1);
        assert_eq!(c.get(&"a".into()), None);
        assert_eq!(c.len(), 0);
        assert!(!c.expire(&"a".into(), Instant::now()));
    }

    #[test]
    fn test_remove_and_persist() {
        let mut c = cache(2);
        c.set("a".into(), 1);
        c.expire(&"a".into(), Instant::now() + Duration::from_secs(60));
        assert!(c.persist(&"a".into()));
        assert!(!c.persist(&"a".into()));
        assert_eq!(c.remove(&"a".into()), Some(1));
        assert_eq!(c.remove(&"a".into()), None);
    }

    #[test]
    fn test_purge() {
        let mut c = cache(2);
        c.set("a".into(), 1);
        c.purge();
        assert_eq!(c.len(), 0);
        assert!(!c.has(&"a".into()));
    }

    #[test]
    fn test_for_each_reports_expiration() {
        let mut c = cache(4);
        let at = Instant::now() + Duration::from_secs(30);
        c.set("a".into(), 1);
        c.set("b".into(), 2);
        c.expire(&"b".into(), at);

        let mut seen = Vec::new();
        c.for_each(&mut |k, v, exp| {
            seen.push((k.clone(), *v, exp));
            true
        });
        seen.sort();
        assert_eq!(seen, vec![("a".to_string(), 1, None), ("b".to_string(), 2, Some(at))]);
    }
}
