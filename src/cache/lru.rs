//! Least-recently-used cache.
//!
//! Entries sit in an arena and are threaded onto a doubly linked recency
//! list by index. The head is the most recently used entry, the tail is
//! the eviction candidate. Every operation is O(1).
//!
//! ```text
//!  head                                   tail
//!  [c] <──> [a] <──> [d] <──> [b]
//!   ▲ touched last             ▲ evicted next
//! ```

use crate::cache::{effective_capacity, Cache, Deadlines};
use std::collections::HashMap;
use std::hash::Hash;
use std::time::Instant;

#[derive(Debug)]
struct Slot<K, V> {
    key: K,
    value: V,
    prev: Option<usize>,
    next: Option<usize>,
}

#[derive(Debug)]
pub struct LruCache<K, V> {
    index: HashMap<K, usize>,
    slots: Vec<Option<Slot<K, V>>>,
    free: Vec<usize>,
    head: Option<usize>,
    tail: Option<usize>,
    deadlines: Deadlines<K>,
    capacity: usize,
}

impl<K: Hash + Eq + Clone, V> LruCache<K, V> {
    /// Creates an empty cache. A capacity of 0 means unbounded.
    pub fn new(capacity: usize) -> Self {
        Self {
            index: HashMap::new(),
            slots: Vec::new(),
            free: Vec::new(),
            head: None,
            tail: None,
            deadlines: Deadlines::default(),
            capacity: effective_capacity(capacity),
        }
    }

    fn slot(&self, idx: usize) -> Option<&Slot<K, V>> {
        self.slots.get(idx).and_then(Option::as_ref)
    }

    fn slot_mut(&mut self, idx: usize) -> Option<&mut Slot<K, V>> {
        self.slots.get_mut(idx).and_then(Option::as_mut)
    }

    fn unlink(&mut self, idx: usize) {
        let (prev, next) = match self.slot(idx) {
            Some(slot) => (slot.prev, slot.next),
            None => return,
        };

        match prev.and_then(|p| self.slot_mut(p)) {
            Some(p) => p.next = next,
            None => self.head = next,
        }
        match next.and_then(|n| self.slot_mut(n)) {
            Some(n) => n.prev = prev,
            None => self.tail = prev,
        }
    }

    fn push_front(&mut self, idx: usize) {
        let old_head = self.head;
        if let Some(slot) = self.slot_mut(idx) {
            slot.prev = None;
            slot.next = old_head;
        }
        if let Some(h) = old_head.and_then(|h| self.slot_mut(h)) {
            h.prev = Some(idx);
        }
        self.head = Some(idx);
        if self.tail.is_none() {
            self.tail = Some(idx);
        }
    }

    fn touch(&mut self, idx: usize) {
        if self.head != Some(idx) {
            self.unlink(idx);
            self.push_front(idx);
        }
    }

    fn take(&mut self, idx: usize) -> Option<V> {
        self.unlink(idx);
        let slot = self.slots.get_mut(idx)?.take()?;
        self.free.push(idx);
        self.index.remove(&slot.key);
        self.deadlines.clear(&slot.key);
        Some(slot.value)
    }

    fn evict(&mut self) {
        if let Some(tail) = self.tail {
            self.take(tail);
        }
    }

    /// Index of a live key; an expired key is removed on the way.
    fn live_index(&mut self, key: &K) -> Option<usize> {
        let idx = *self.index.get(key)?;
        if self.deadlines.is_expired(key, Instant::now()) {
            self.take(idx);
            return None;
        }
        Some(idx)
    }
}

impl<K, V> Cache<K, V> for LruCache<K, V>
where
    K: Hash + Eq + Clone + Send,
    V: Send,
{
    fn set(&mut self, key: K, value: V) -> bool {
        if let Some(&idx) = self.index.get(&key) {
            self.deadlines.clear(&key);
            if let Some(slot) = self.slot_mut(idx) {
                slot.value = value;
            }
            self.touch(idx);
            return false;
        }

        if self.index.len() >= self.capacity {
            self.evict();
        }

        let slot = Slot {
            key: key.clone(),
            value,
            prev: None,
            next: None,
        };
        let idx = match self.free.pop() {
            Some(idx) => {
                self.slots[idx] = Some(slot);
                idx
            }
            None => {
                self.slots.push(Some(slot));
                self.slots.len() - 1
            }
        };
        self.index.insert(key, idx);
        self.push_front(idx);
        true
    }

    fn get(&mut self, key: &K) -> Option<&V> {
        let idx = self.live_index(key)?;
        self.touch(idx);
        self.slot(idx).map(|slot| &slot.value)
    }

    fn get_mut(&mut self, key: &K) -> Option<&mut V> {
        let idx = self.live_index(key)?;
        self.touch(idx);
        self.slot_mut(idx).map(|slot| &mut slot.value)
    }

    fn expire(&mut self, key: &K, at: Instant) -> bool {
        if self.live_index(key).is_none() {
            return false;
        }
        self.deadlines.set(key.clone(), at);
        true
    }

    fn persist(&mut self, key: &K) -> bool {
        self.live_index(key).is_some() && self.deadlines.clear(key)
    }

    fn expires_at(&mut self, key: &K) -> Option<Instant> {
        self.live_index(key)?;
        self.deadlines.get(key)
    }

    fn remove(&mut self, key: &K) -> Option<V> {
        let idx = self.live_index(key)?;
        self.take(idx)
    }

    fn purge(&mut self) {
        *self = Self::new(self.capacity);
    }

    fn len(&self) -> usize {
        self.index.len()
    }

    fn has(&mut self, key: &K) -> bool {
        self.live_index(key).is_some()
    }

    fn for_each(&self, f: &mut dyn FnMut(&K, &V, Option<Instant>) -> bool) {
        let now = Instant::now();
        let mut cursor = self.head;
        while let Some(slot) = cursor.and_then(|idx| self.slot(idx)) {
            cursor = slot.next;
            if self.deadlines.is_expired(&slot.key, now) {
                continue;
            }
            if !f(&slot.key, &slot.value, self.deadlines.get(&slot.key)) {
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

    fn cache(capacity: usize) -> LruCache<String, i32> {
        LruCache::new(capacity)
    }

    fn keys_in_order(cache: &LruCache<String, i32>) -> Vec<String> {
        let mut keys = Vec::new();
        cache.for_each(&mut |k, _, _| {
            keys.push(k.clone());
            true
        });
        keys
    }

    #[test]
    fn test_set_get() {
        let mut c = cache(2);
        assert!(c.set("a".into(), 1));
        assert_eq!(c.get(&"a".into()), Some(&1));
        assert!(!c.set("a".into(), 2));
        assert_eq!(c.get(&"a".into()), Some(&2));
        assert_eq!(c.len(), 1);
    }

    #[test]
    fn test_evicts_least_recently_set() {
        let mut c = cache(2);
        c.set("a".into(), 1);
        c.set("b".into(), 2);
        c.set("c".into(), 3);
        assert!(!c.has(&"a".into()));
        assert!(c.has(&"b".into()));
        assert!(c.has(&"c".into()));
    }

    #[test]
    fn test_get_refreshes_recency() {
        let mut c = cache(2);
        c.set("a".into(), 1);
        c.set("b".into(), 2);
        c.get(&"a".into());
        c.set("c".into(), 3);
        assert!(c.has(&"a".into()));
        assert!(!c.has(&"b".into()));
        assert_eq!(keys_in_order(&c), vec!["c", "a"]);
    }

    #[test]
    fn test_eviction_order_follows_access() {
        let mut c = cache(3);
        for (k, v) in [("a", 1), ("b", 2), ("c", 3)] {
            c.set(k.into(), v);
        }
        c.get(&"a".into());
        c.set("b".into(), 20);

        c.set("d".into(), 4);
        assert!(!c.has(&"c".into()));
        c.set("e".into(), 5);
        assert!(!c.has(&"a".into()));
        assert_eq!(keys_in_order(&c), vec!["e", "d", "b"]);
    }

    #[test]
    fn test_remove() {
        let mut c = cache(2);
        c.set("a".into(), 1);
        c.set("b".into(), 2);
        assert_eq!(c.remove(&"a".into()), Some(1));
        assert!(!c.has(&"a".into()));
        assert_eq!(c.remove(&"missing".into()), None);

        // The freed slot is reused without evicting b.
        c.set("c".into(), 3);
        assert!(c.has(&"b".into()));
        assert_eq!(c.slots.len(), 2);
    }

    #[test]
    fn test_expire_and_lazy_removal() {
        let mut c = cache(2);
        c.set("a".into(), 1);
        assert!(c.expire(&"a".into(), Instant::now() + Duration::from_secs(3600)));
        assert!(!c.expire(&"missing".into(), Instant::now()));
        assert!(c.expires_at(&"a".into()).is_some());

        c.set("b".into(), 2);
        assert!(c.expire(&"b".into(), Instant::now() - Duration::from_millis(1)));
        assert_eq!(c.len(), 2);
        assert_eq!(c.get(&"b".into()), None);
        assert_eq!(c.len(), 1);
        assert_eq!(c.expires_at(&"b".into()), None);
    }

    #[test]
    fn test_set_clears_expiration() {
        let mut c = cache(2);
        c.set("a".into(), 1);
        c.expire(&"a".into(), Instant::now() + Duration::from_secs(60));
        c.set("a".into(), 2);
        assert_eq!(c.expires_at(&"a".into()), None);
    }

    #[test]
    fn test_persist() {
        let mut c = cache(2);
        c.set("a".into(), 1);
        assert!(!c.persist(&"a".into()));
        c.expire(&"a".into(), Instant::now() + Duration::from_secs(60));
        assert!(c.persist(&"a".into()));
        assert_eq!(c.expires_at(&"a".into()), None);
    }

    #[test]
    fn test_for_each_skips_expired() {
        let mut c = cache(3);
        c.set("a".into(), 1);
        c.set("b".into(), 2);
        c.expire(&"a".into(), Instant::now() - Duration::from_millis(1));
        assert_eq!(keys_in_order(&c), vec!["b"]);
    }

    #[test]
    fn test_purge() {
        let mut c = cache(2);
        c.set("a".into(), 1);
        c.set("b".into(), 2);
        c.purge();
        assert_eq!(c.len(), 0);
        assert!(!c.has(&"a".into()));
        assert_eq!(c.capacity(), 2);
    }

    #[test]
    fn test_get_mut() {
        let mut c = cache(2);
        c.set("a".into(), 1);
        if let Some(v) = c.get_mut(&"a".into()) {
            *v += 10;
        }
        assert_eq!(c.get(&"a".into()), Some(&11));
    }
}
