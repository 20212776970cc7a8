//! Keyspace: the typed key/value/TTL view that command handlers run against.
//!
//! Two implementations back the two execution strategies:
//!
//! ```text
//!                     ┌──────────────────┐
//!                     │  Keyspace trait  │
//!                     └────────┬─────────┘
//!              ┌───────────────┴───────────────┐
//!              ▼                               ▼
//!   ┌────────────────────┐          ┌────────────────────┐
//!   │    ConcurrentDb    │          │      CacheDb       │
//!   │ dict<K, Entry>     │          │ Box<dyn Cache>     │
//!   │ Entry = value +    │          │ (LRU / LFU + TTL)  │
//!   │   deadline         │          │ owned by one task  │
//!   │ shared, cloneable  │          │                    │
//!   └────────────────────┘          └────────────────────┘
//! ```
//!
//! Both expire keys lazily: a key whose deadline has passed is removed the
//! next time it is touched, and never reported as present.

use crate::cache::{Cache, EvictionPolicy};
use crate::storage::dict::ConcurrentDict;
use crate::storage::value::Value;
use bytes::Bytes;
use rand::seq::IteratorRandom;
use std::sync::Arc;
use std::time::Instant;

/// Keys sampled by `ConcurrentDb::random_key` before falling back to a scan.
const RANDOM_KEY_SAMPLES: usize = 8;

/// Expiration state of a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyTtl {
    Missing,
    Persistent,
    ExpiresAt(Instant),
}

/// When a write through [`Keyspace::put_with`] goes ahead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PutMode {
    #[default]
    Always,
    /// Only if the key is missing (`NX`)
    IfAbsent,
    /// Only if the key exists (`XX`)
    IfExists,
}

impl PutMode {
    fn allows(self, exists: bool) -> bool {
        match self {
            PutMode::Always => true,
            PutMode::IfAbsent => !exists,
            PutMode::IfExists => exists,
        }
    }
}

/// Key-level operations shared by every store.
///
/// Writes through `put*` replace the whole value and its expiration.
/// `update` and `upsert` edit a value in place and keep it; a container
/// they leave empty is deleted.
pub trait Keyspace {
    /// Runs `f` on a live value.
    fn view<R>(&mut self, key: &Bytes, f: impl FnOnce(&Value) -> R) -> Option<R>;

    /// Runs `f` on a live value, in place.
    fn update<R>(&mut self, key: &Bytes, f: impl FnOnce(&mut Value) -> R) -> Option<R>;

    /// Runs `f` on the value, first storing `init()` if the key is missing.
    fn upsert<R>(
        &mut self,
        key: &Bytes,
        init: impl FnOnce() -> Value,
        f: impl FnOnce(&mut Value) -> R,
    ) -> R;

    /// Stores a value together with its deadline (`None` for none), as one
    /// step.
    ///
    /// # Returns
    ///
    /// `None` if `mode` skipped the write, otherwise `Some(true)` when the
    /// key was new.
    fn put_with(
        &mut self,
        key: Bytes,
        value: Value,
        mode: PutMode,
        expires_at: Option<Instant>,
    ) -> Option<bool>;

    /// Stores a value without a deadline. Returns `true` if the key was new.
    fn put(&mut self, key: Bytes, value: Value) -> bool {
        self.put_with(key, value, PutMode::Always, None) == Some(true)
    }

    /// Stores only if the key is missing. Returns `true` if it wrote.
    fn put_if_absent(&mut self, key: Bytes, value: Value) -> bool {
        self.put_with(key, value, PutMode::IfAbsent, None).is_some()
    }

    /// Stores only if the key exists. Returns `true` if it wrote.
    fn put_if_exists(&mut self, key: Bytes, value: Value) -> bool {
        self.put_with(key, value, PutMode::IfExists, None).is_some()
    }

    /// Deletes a key. Returns `true` if it existed.
    fn remove(&mut self, key: &Bytes) -> bool;

    /// Sets an absolute deadline. Returns `false` if the key is missing.
    fn expire_at(&mut self, key: &Bytes, at: Instant) -> bool;

    /// Clears the deadline. Returns `true` if there was one.
    fn persist(&mut self, key: &Bytes) -> bool;

    fn ttl(&mut self, key: &Bytes) -> KeyTtl;

    /// Number of keys, possibly counting expired keys not yet collected.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All live keys.
    fn keys(&mut self) -> Vec<Bytes>;

    fn random_key(&mut self) -> Option<Bytes>;

    /// Deletes every key.
    fn flush(&mut self);

    /// Visits every live entry with its deadline. Stops when `f` returns `false`.
    fn for_each(&mut self, f: &mut dyn FnMut(&Bytes, &Value, Option<Instant>) -> bool);

    fn exists(&mut self, key: &Bytes) -> bool {
        self.view(key, |_| ()).is_some()
    }
}

// ============================================================================
// ConcurrentDb
// ============================================================================

/// A value and its deadline, stored in the same slot so that both are only
/// ever read and changed under that key's shard lock.
#[derive(Debug)]
struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        matches!(self.expires_at, Some(at) if at <= now)
    }
}

/// Empties `slot` if its entry is past its deadline.
fn clear_expired(slot: &mut Option<Entry>, now: Instant) {
    if slot.as_ref().is_some_and(|entry| entry.is_expired(now)) {
        *slot = None;
    }
}

/// A sharded keyspace shared by every connection.
///
/// Cloning is cheap and yields a handle onto the same data. Every operation
/// on a single key runs under that key's shard lock, so operations on the
/// same key are linearizable.
#[derive(Debug, Clone)]
pub struct ConcurrentDb {
    data: Arc<ConcurrentDict<Bytes, Entry>>,
}

impl ConcurrentDb {
    pub fn new(shard_count: usize) -> Self {
        Self {
            data: Arc::new(ConcurrentDict::new(shard_count)),
        }
    }

    /// Runs `f` on a live entry under the shard read lock. An expired entry
    /// is collected afterwards.
    fn read_live<R>(&self, key: &Bytes, f: impl FnOnce(&Entry) -> R) -> Option<R> {
        let now = Instant::now();
        let found = self
            .data
            .with_value(key, |entry| (!entry.is_expired(now)).then(|| f(entry)))?;
        if found.is_none() {
            self.remove_if_expired(key);
        }
        found
    }

    /// The deadline is checked again under the write lock, so an entry
    /// written since the read is left alone.
    fn remove_if_expired(&self, key: &Bytes) {
        let now = Instant::now();
        self.data.compute(key.clone(), |slot| clear_expired(slot, now));
    }

    fn is_live(&self, key: &Bytes, now: Instant) -> bool {
        self.data
            .with_value(key, |entry| !entry.is_expired(now))
            .unwrap_or(false)
    }
}

impl Keyspace for ConcurrentDb {
    fn view<R>(&mut self, key: &Bytes, f: impl FnOnce(&Value) -> R) -> Option<R> {
        self.read_live(key, |entry| f(&entry.value))
    }

    fn update<R>(&mut self, key: &Bytes, f: impl FnOnce(&mut Value) -> R) -> Option<R> {
        let now = Instant::now();
        self.data.compute(key.clone(), |slot| {
            clear_expired(slot, now);
            let entry = slot.as_mut()?;
            let result = f(&mut entry.value);
            if entry.value.is_empty_container() {
                *slot = None;
            }
            Some(result)
        })
    }

    fn upsert<R>(
        &mut self,
        key: &Bytes,
        init: impl FnOnce() -> Value,
        f: impl FnOnce(&mut Value) -> R,
    ) -> R {
        let now = Instant::now();
        self.data.compute(key.clone(), |slot| {
            clear_expired(slot, now);
            let entry = slot.get_or_insert_with(|| Entry {
                value: init(),
                expires_at: None,
            });
            let result = f(&mut entry.value);
            if entry.value.is_empty_container() {
                *slot = None;
            }
            result
        })
    }

    fn put_with(
        &mut self,
        key: Bytes,
        value: Value,
        mode: PutMode,
        expires_at: Option<Instant>,
    ) -> Option<bool> {
        let now = Instant::now();
        self.data.compute(key, |slot| {
            clear_expired(slot, now);
            let existed = slot.is_some();
            if !mode.allows(existed) {
                return None;
            }
            *slot = Some(Entry { value, expires_at });
            Some(!existed)
        })
    }

    fn remove(&mut self, key: &Bytes) -> bool {
        let now = Instant::now();
        self.data.compute(key.clone(), |slot| {
            clear_expired(slot, now);
            slot.take().is_some()
        })
    }

    fn expire_at(&mut self, key: &Bytes, at: Instant) -> bool {
        let now = Instant::now();
        self.data.compute(key.clone(), |slot| {
            clear_expired(slot, now);
            match slot.as_mut() {
                Some(entry) => {
                    entry.expires_at = Some(at);
                    true
                }
                None => false,
            }
        })
    }

    fn persist(&mut self, key: &Bytes) -> bool {
        let now = Instant::now();
        self.data.compute(key.clone(), |slot| {
            clear_expired(slot, now);
            slot.as_mut()
                .map_or(false, |entry| entry.expires_at.take().is_some())
        })
    }

    fn ttl(&mut self, key: &Bytes) -> KeyTtl {
        self.read_live(key, |entry| match entry.expires_at {
            Some(at) => KeyTtl::ExpiresAt(at),
            None => KeyTtl::Persistent,
        })
        .unwrap_or(KeyTtl::Missing)
    }

    fn len(&self) -> usize {
        self.data.len()
    }

    fn keys(&mut self) -> Vec<Bytes> {
        let now = Instant::now();
        let mut keys = Vec::with_capacity(self.data.len());
        self.data.for_each(|key, entry| {
            if !entry.is_expired(now) {
                keys.push(key.clone());
            }
            true
        });
        keys
    }

    fn random_key(&mut self) -> Option<Bytes> {
        let now = Instant::now();
        let sampled = self
            .data
            .random_distinct_keys(RANDOM_KEY_SAMPLES)
            .into_iter()
            .find(|key| self.is_live(key, now));
        if sampled.is_some() {
            return sampled;
        }
        // Every sample had expired; pick from the live keys instead.
        self.keys().into_iter().choose(&mut rand::thread_rng())
    }

    fn flush(&mut self) {
        self.data.clear();
    }

    fn for_each(&mut self, f: &mut dyn FnMut(&Bytes, &Value, Option<Instant>) -> bool) {
        let now = Instant::now();
        self.data.for_each(|key, entry| {
            if entry.is_expired(now) {
                return true;
            }
            f(key, &entry.value, entry.expires_at)
        });
    }
}

// ============================================================================
// CacheDb
// ============================================================================

/// A bounded keyspace owned by a single task.
pub struct CacheDb {
    cache: Box<dyn Cache<Bytes, Value>>,
}

impl std::fmt::Debug for CacheDb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheDb")
            .field("len", &self.cache.len())
            .field("capacity", &self.cache.capacity())
            .finish()
    }
}

impl CacheDb {
    pub fn new(policy: EvictionPolicy, max_keys: usize) -> Self {
        Self::with_cache(policy.build(max_keys))
    }

    pub fn with_cache(cache: Box<dyn Cache<Bytes, Value>>) -> Self {
        Self { cache }
    }
}

impl Keyspace for CacheDb {
    fn view<R>(&mut self, key: &Bytes, f: impl FnOnce(&Value) -> R) -> Option<R> {
        self.cache.get(key).map(f)
    }

    fn update<R>(&mut self, key: &Bytes, f: impl FnOnce(&mut Value) -> R) -> Option<R> {
        let value = self.cache.get_mut(key)?;
        let result = f(value);
        if value.is_empty_container() {
            self.cache.remove(key);
        }
        Some(result)
    }

    fn upsert<R>(
        &mut self,
        key: &Bytes,
        init: impl FnOnce() -> Value,
        f: impl FnOnce(&mut Value) -> R,
    ) -> R {
        if !self.cache.has(key) {
            let mut value = init();
            let result = f(&mut value);
            if !value.is_empty_container() {
                self.cache.set(key.clone(), value);
            }
            return result;
        }

        match self.cache.get_mut(key) {
            Some(value) => {
                let result = f(value);
                if value.is_empty_container() {
                    self.cache.remove(key);
                }
                result
            }
            None => {
                let mut value = init();
                let result = f(&mut value);
                if !value.is_empty_container() {
                    self.cache.set(key.clone(), value);
                }
                result
            }
        }
    }

    fn put_with(
        &mut self,
        key: Bytes,
        value: Value,
        mode: PutMode,
        expires_at: Option<Instant>,
    ) -> Option<bool> {
        if !mode.allows(self.cache.has(&key)) {
            return None;
        }
        match expires_at {
            Some(at) => {
                let added = self.cache.set(key.clone(), value);
                self.cache.expire(&key, at);
                Some(added)
            }
            None => Some(self.cache.set(key, value)),
        }
    }

    fn remove(&mut self, key: &Bytes) -> bool {
        self.cache.remove(key).is_some()
    }

    fn expire_at(&mut self, key: &Bytes, at: Instant) -> bool {
        self.cache.expire(key, at)
    }

    fn persist(&mut self, key: &Bytes) -> bool {
        self.cache.persist(key)
    }

    fn ttl(&mut self, key: &Bytes) -> KeyTtl {
        if !self.cache.has(key) {
            return KeyTtl::Missing;
        }
        match self.cache.expires_at(key) {
            Some(at) => KeyTtl::ExpiresAt(at),
            None => KeyTtl::Persistent,
        }
    }

    fn len(&self) -> usize {
        self.cache.len()
    }

    fn keys(&mut self) -> Vec<Bytes> {
        let mut keys = Vec::with_capacity(self.cache.len());
        self.cache.for_each(&mut |key, _, _| {
            keys.push(key.clone());
            true
        });
        keys
    }

    fn random_key(&mut self) -> Option<Bytes> {
        self.keys().into_iter().choose(&mut rand::thread_rng())
    }

    fn flush(&mut self) {
        self.cache.purge();
    }

    fn for_each(&mut self, f: &mut dyn FnMut(&Bytes, &Value, Option<Instant>) -> bool) {
        self.cache.for_each(f);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::sorted_set::SortedSet;
    use std::collections::VecDeque;
    use std::time::Duration;

    fn key(s: &str) -> Bytes {
        Bytes::copy_from_slice(s.as_bytes())
    }

    fn string(s: &str) -> Value {
        Value::Str(key(s))
    }

    fn get_str(db: &mut impl Keyspace, k: &str) -> Option<Bytes> {
        db.view(&key(k), |v| match v {
            Value::Str(b) => Some(b.clone()),
            _ => None,
        })
        .flatten()
    }

    fn past() -> Instant {
        Instant::now() - Duration::from_millis(1)
    }

    fn future() -> Instant {
        Instant::now() + Duration::from_secs(3600)
    }

    fn put_get_remove(db: &mut impl Keyspace) {
        assert!(db.put(key("a"), string("1")));
        assert!(!db.put(key("a"), string("2")));
        assert_eq!(get_str(db, "a"), Some(key("2")));

        assert!(!db.put_if_absent(key("a"), string("3")));
        assert!(db.put_if_absent(key("b"), string("3")));
        assert!(db.put_if_exists(key("b"), string("4")));
        assert!(!db.put_if_exists(key("c"), string("5")));
        assert_eq!(get_str(db, "b"), Some(key("4")));
        assert!(!db.exists(&key("c")));

        assert_eq!(db.len(), 2);
        assert!(db.remove(&key("a")));
        assert!(!db.remove(&key("a")));
        assert_eq!(db.len(), 1);
    }

    fn lazy_expiry(db: &mut impl Keyspace) {
        db.put(key("gone"), string("x"));
        db.put(key("kept"), string("y"));
        assert!(db.expire_at(&key("gone"), past()));
        assert!(db.expire_at(&key("kept"), future()));
        assert!(!db.expire_at(&key("missing"), future()));

        // Still counted until something touches it.
        assert_eq!(db.len(), 2);
        assert_eq!(db.keys(), vec![key("kept")]);
        assert_eq!(get_str(db, "gone"), None);
        assert_eq!(db.ttl(&key("gone")), KeyTtl::Missing);
        assert_eq!(db.len(), 1);
    }

    fn ttl_states(db: &mut impl Keyspace) {
        assert_eq!(db.ttl(&key("k")), KeyTtl::Missing);
        db.put(key("k"), string("v"));
        assert_eq!(db.ttl(&key("k")), KeyTtl::Persistent);

        let at = future();
        db.expire_at(&key("k"), at);
        assert_eq!(db.ttl(&key("k")), KeyTtl::ExpiresAt(at));

        assert!(db.persist(&key("k")));
        assert!(!db.persist(&key("k")));
        assert_eq!(db.ttl(&key("k")), KeyTtl::Persistent);

        db.expire_at(&key("k"), at);
        db.put(key("k"), string("overwritten"));
        assert_eq!(db.ttl(&key("k")), KeyTtl::Persistent);

        // In-place edits keep the deadline.
        db.expire_at(&key("k"), at);
        db.update(&key("k"), |v| *v = string("edited"));
        assert_eq!(db.ttl(&key("k")), KeyTtl::ExpiresAt(at));
    }

    fn upsert_and_empty_containers(db: &mut impl Keyspace) {
        let len = db.upsert(
            &key("list"),
            || Value::List(VecDeque::new()),
            |v| match v {
                Value::List(l) => {
                    l.push_back(key("x"));
                    l.len()
                }
                _ => 0,
            },
        );
        assert_eq!(len, 1);

        let popped = db.update(&key("list"), |v| match v {
            Value::List(l) => l.pop_front(),
            _ => None,
        });
        assert_eq!(popped, Some(Some(key("x"))));
        assert!(!db.exists(&key("list")));

        // An init that stays empty never lands in the keyspace.
        db.upsert(&key("zset"), || Value::SortedSet(SortedSet::new()), |_| ());
        assert!(!db.exists(&key("zset")));

        assert_eq!(db.update(&key("missing"), |_| ()), None);
    }

    fn keys_flush_and_iteration(db: &mut impl Keyspace) {
        assert_eq!(db.random_key(), None);
        for i in 0..10 {
            db.put(key(&format!("k{}", i)), string("v"));
        }
        db.expire_at(&key("k0"), past());

        let mut keys = db.keys();
        keys.sort();
        assert_eq!(keys.len(), 9);
        assert!(db.random_key().is_some());

        let mut seen = 0;
        db.for_each(&mut |k, _, _| {
            assert_ne!(k, &key("k0"));
            seen += 1;
            true
        });
        assert_eq!(seen, 9);

        db.flush();
        assert_eq!(db.len(), 0);
        assert!(db.keys().is_empty());
    }

    #[test]
    fn test_put_get_remove() {
        put_get_remove(&mut ConcurrentDb::new(4));
        put_get_remove(&mut CacheDb::new(EvictionPolicy::Lru, 0));
        put_get_remove(&mut CacheDb::new(EvictionPolicy::Lfu, 0));
    }

    #[test]
    fn test_lazy_expiry() {
        lazy_expiry(&mut ConcurrentDb::new(4));
        lazy_expiry(&mut CacheDb::new(EvictionPolicy::Lru, 0));
        lazy_expiry(&mut CacheDb::new(EvictionPolicy::Lfu, 0));
    }

    #[test]
    fn test_ttl_states() {
        ttl_states(&mut ConcurrentDb::new(4));
        ttl_states(&mut CacheDb::new(EvictionPolicy::Lru, 0));
        ttl_states(&mut CacheDb::new(EvictionPolicy::Lfu, 0));
    }

    #[test]
    fn test_upsert_and_empty_containers() {
        upsert_and_empty_containers(&mut ConcurrentDb::new(4));
        upsert_and_empty_containers(&mut CacheDb::new(EvictionPolicy::Lru, 0));
    }

    #[test]
    fn test_keys_flush_and_iteration() {
        keys_flush_and_iteration(&mut ConcurrentDb::new(4));
        keys_flush_and_iteration(&mut CacheDb::new(EvictionPolicy::Lfu, 0));
    }

    #[test]
    fn test_concurrent_db_handles_share_data() {
        let mut a = ConcurrentDb::new(4);
        let mut b = a.clone();
        a.put(key("shared"), string("v"));
        assert_eq!(get_str(&mut b, "shared"), Some(key("v")));
    }

    fn put_with_deadline(db: &mut impl Keyspace) {
        let at = future();
        assert_eq!(
            db.put_with(key("k"), string("v"), PutMode::Always, Some(at)),
            Some(true)
        );
        assert_eq!(db.ttl(&key("k")), KeyTtl::ExpiresAt(at));

        assert_eq!(
            db.put_with(key("k"), string("nx"), PutMode::IfAbsent, None),
            None
        );
        assert_eq!(db.ttl(&key("k")), KeyTtl::ExpiresAt(at));

        assert_eq!(
            db.put_with(key("k"), string("xx"), PutMode::IfExists, None),
            Some(false)
        );
        assert_eq!(db.ttl(&key("k")), KeyTtl::Persistent);
        assert_eq!(get_str(db, "k"), Some(key("xx")));

        // An expired key counts as missing.
        db.expire_at(&key("k"), past());
        assert_eq!(
            db.put_with(key("k"), string("again"), PutMode::IfExists, None),
            None
        );
        assert_eq!(
            db.put_with(key("k"), string("again"), PutMode::IfAbsent, None),
            Some(true)
        );
        assert_eq!(get_str(db, "k"), Some(key("again")));
    }

    #[test]
    fn test_put_with_deadline() {
        put_with_deadline(&mut ConcurrentDb::new(4));
        put_with_deadline(&mut CacheDb::new(EvictionPolicy::Lru, 0));
        put_with_deadline(&mut CacheDb::new(EvictionPolicy::Lfu, 0));
    }

    #[test]
    fn test_concurrent_put_survives_expired_read() {
        use std::sync::Barrier;
        use std::thread;

        let db = ConcurrentDb::new(1);
        for _ in 0..200 {
            let mut seed = db.clone();
            seed.put(key("k"), string("old"));
            seed.expire_at(&key("k"), past());

            let barrier = Arc::new(Barrier::new(2));
            let reader = {
                let mut db = db.clone();
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    for _ in 0..50 {
                        db.view(&key("k"), |_| ());
                        db.ttl(&key("k"));
                    }
                })
            };
            let writer = {
                let mut db = db.clone();
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    db.put(key("k"), string("new"));
                })
            };
            writer.join().unwrap();
            reader.join().unwrap();

            let mut db = db.clone();
            assert_eq!(get_str(&mut db, "k"), Some(key("new")));
            assert_eq!(db.ttl(&key("k")), KeyTtl::Persistent);
        }
    }

    #[test]
    fn test_concurrent_put_with_deadline_is_not_inherited() {
        use std::thread;

        // Whichever write lands last, its value and deadline stay paired.
        let db = ConcurrentDb::new(1);
        for _ in 0..200 {
            let mut seed = db.clone();
            seed.flush();
            let at = future();
            let writer = {
                let mut db = db.clone();
                thread::spawn(move || db.put_with(key("k"), string("v"), PutMode::Always, Some(at)))
            };
            let other = {
                let mut db = db.clone();
                thread::spawn(move || db.put(key("k"), string("plain")))
            };
            writer.join().unwrap();
            other.join().unwrap();

            let mut db = db.clone();
            let ttl = db.ttl(&key("k"));
            match get_str(&mut db, "k") {
                Some(v) if v == key("v") => assert_eq!(ttl, KeyTtl::ExpiresAt(at)),
                Some(v) if v == key("plain") => assert_eq!(ttl, KeyTtl::Persistent),
                found => panic!("unexpected value {:?}", found),
            }
        }
    }

    #[test]
    fn test_cache_db_evicts_at_capacity() {
        let mut db = CacheDb::new(EvictionPolicy::Lru, 2);
        db.put(key("a"), string("1"));
        db.put(key("b"), string("2"));
        db.put(key("c"), string("3"));
        assert_eq!(db.len(), 2);
        assert!(!db.exists(&key("a")));
    }
}
