//! Sharded Concurrent Dictionary
//!
//! A hash map split into independently locked shards, so that operations on
//! keys in different shards never wait on each other.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    ConcurrentDict<K, V>                     │
//! │  ┌─────────┐ ┌─────────┐ ┌─────────┐ ┌─────────┐            │
//! │  │ Shard 0 │ │ Shard 1 │ │ Shard 2 │ │ Shard N │            │
//! │  │ RwLock  │ │ RwLock  │ │ RwLock  │ │ RwLock  │            │
//! │  │ HashMap │ │ HashMap │ │ HashMap │ │ HashMap │            │
//! │  └─────────┘ └─────────┘ └─────────┘ └─────────┘            │
//! └─────────────────────────────────────────────────────────────┘
//!                shard = hash(key) mod shard_count
//! ```
//!
//! Every conditional write (`put_if_absent`, `put_if_exists`, `compute`) is
//! decided while holding that key's shard write lock. Whole-map operations
//! (`for_each`, `keys`, `clear`) visit one shard at a time and are therefore
//! not a consistent snapshot under concurrent writers.

use rand::seq::IteratorRandom;
use rand::Rng;
use std::borrow::Borrow;
use std::collections::{HashMap, HashSet};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Default number of shards.
pub const DEFAULT_SHARD_COUNT: usize = 64;

/// Sampling attempts per requested key before `random_distinct_keys`
/// falls back to a full scan.
const DISTINCT_SAMPLE_ATTEMPTS: usize = 4;

/// A lock-striped hash map.
///
/// # Example
///
/// ```
/// use ferrokv::storage::ConcurrentDict;
///
/// let dict: ConcurrentDict<String, i64> = ConcurrentDict::new(16);
/// assert_eq!(dict.put("a".to_string(), 1), 1);
/// assert_eq!(dict.put("a".to_string(), 2), 0);
/// assert_eq!(dict.get("a"), Some(2));
/// assert_eq!(dict.len(), 1);
/// ```
pub struct ConcurrentDict<K, V> {
    shards: Vec<RwLock<HashMap<K, V>>>,
    count: AtomicUsize,
}

impl<K, V> std::fmt::Debug for ConcurrentDict<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConcurrentDict")
            .field("shards", &self.shards.len())
            .field("len", &self.count.load(Ordering::Relaxed))
            .finish()
    }
}

impl<K: Hash + Eq, V> Default for ConcurrentDict<K, V> {
    fn default() -> Self {
        Self::new(DEFAULT_SHARD_COUNT)
    }
}

impl<K: Hash + Eq, V> ConcurrentDict<K, V> {
    /// Creates a dictionary with `shard_count` shards (at least one).
    pub fn new(shard_count: usize) -> Self {
        let shard_count = shard_count.max(1);
        Self {
            shards: (0..shard_count).map(|_| RwLock::new(HashMap::new())).collect(),
            count: AtomicUsize::new(0),
        }
    }

    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    #[inline]
    fn shard_index<Q: Hash + ?Sized>(&self, key: &Q) -> usize {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        (hasher.finish() as usize) % self.shards.len()
    }

    #[inline]
    fn read_shard<Q: Hash + ?Sized>(&self, key: &Q) -> RwLockReadGuard<'_, HashMap<K, V>> {
        read(&self.shards[self.shard_index(key)])
    }

    #[inline]
    fn write_shard<Q: Hash + ?Sized>(&self, key: &Q) -> RwLockWriteGuard<'_, HashMap<K, V>> {
        write(&self.shards[self.shard_index(key)])
    }

    /// Inserts or overwrites a value.
    ///
    /// # Returns
    ///
    /// 1 if the key was newly inserted, 0 if an existing value was replaced.
    pub fn put(&self, key: K, value: V) -> usize {
        let mut shard = self.write_shard(&key);
        match shard.insert(key, value) {
            Some(_) => 0,
            None => {
                self.count.fetch_add(1, Ordering::Relaxed);
                1
            }
        }
    }

    /// Inserts only if the key is absent. Returns 1 if it wrote.
    pub fn put_if_absent(&self, key: K, value: V) -> usize {
        let mut shard = self.write_shard(&key);
        if shard.contains_key(&key) {
            return 0;
        }
        shard.insert(key, value);
        self.count.fetch_add(1, Ordering::Relaxed);
        1
    }

    /// Overwrites only if the key is present. Returns 1 if it wrote.
    pub fn put_if_exists(&self, key: K, value: V) -> usize {
        let mut shard = self.write_shard(&key);
        match shard.get_mut(&key) {
            Some(slot) => {
                *slot = value;
                1
            }
            None => 0,
        }
    }

    /// Removes a key, returning its value.
    pub fn remove<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let removed = self.write_shard(key).remove(key);
        if removed.is_some() {
            self.count.fetch_sub(1, Ordering::Relaxed);
        }
        removed
    }

    pub fn contains_key<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.read_shard(key).contains_key(key)
    }

    /// Runs `f` on a borrowed value while the shard read lock is held.
    pub fn with_value<Q, R>(&self, key: &Q, f: impl FnOnce(&V) -> R) -> Option<R>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.read_shard(key).get(key).map(f)
    }

    /// Atomic read-modify-write of a single slot under the shard write lock.
    ///
    /// `f` sees `Some(value)` for a present key and `None` otherwise; whatever
    /// it leaves in the slot becomes the new state (`None` removes the key).
    pub fn compute<R>(&self, key: K, f: impl FnOnce(&mut Option<V>) -> R) -> R {
        let mut shard = self.write_shard(&key);
        let mut slot = shard.remove(&key);
        let existed = slot.is_some();
        let result = f(&mut slot);
        match (existed, slot) {
            (_, Some(value)) => {
                if !existed {
                    self.count.fetch_add(1, Ordering::Relaxed);
                }
                shard.insert(key, value);
            }
            (true, None) => {
                self.count.fetch_sub(1, Ordering::Relaxed);
            }
            (false, None) => {}
        }
        result
    }

    pub fn len(&self) -> usize {
        self.count.load(Ordering::Relaxed)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Visits every entry, read-locking one shard at a time.
    ///
    /// Stops early when `f` returns `false`.
    pub fn for_each(&self, mut f: impl FnMut(&K, &V) -> bool) {
        for shard in &self.shards {
            let shard = read(shard);
            for (key, value) in shard.iter() {
                if !f(key, value) {
                    return;
                }
            }
        }
    }

    /// Removes every entry.
    pub fn clear(&self) {
        for shard in &self.shards {
            let mut shard = write(shard);
            let removed = shard.len();
            shard.clear();
            self.count.fetch_sub(removed, Ordering::Relaxed);
        }
    }
}

impl<K: Hash + Eq + Clone, V: Clone> ConcurrentDict<K, V> {
    /// Returns a copy of the value.
    pub fn get<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.read_shard(key).get(key).cloned()
    }
}

impl<K: Hash + Eq + Clone, V> ConcurrentDict<K, V> {
    pub fn keys(&self) -> Vec<K> {
        let mut keys = Vec::with_capacity(self.len());
        self.for_each(|key, _| {
            keys.push(key.clone());
            true
        });
        keys
    }

    /// Samples `n` keys at random; the same key may appear more than once.
    pub fn random_keys(&self, n: usize) -> Vec<K> {
        let mut rng = rand::thread_rng();
        let mut result = Vec::with_capacity(n);
        let mut misses = 0;

        while result.len() < n && !self.is_empty() {
            let shard = read(&self.shards[rng.gen_range(0..self.shards.len())]);
            match shard.keys().choose(&mut rng) {
                Some(key) => result.push(key.clone()),
                None => {
                    misses += 1;
                    // A handful of shards hold everything; scan instead.
                    if misses > self.shards.len() * DISTINCT_SAMPLE_ATTEMPTS {
                        drop(shard);
                        let all = self.keys();
                        if all.is_empty() {
                            break;
                        }
                        while result.len() < n {
                            if let Some(key) = all.iter().choose(&mut rng) {
                                result.push(key.clone());
                            }
                        }
                    }
                }
            }
        }

        result
    }

    /// Samples up to `n` distinct keys.
    ///
    /// Returns fewer than `n` only when the dictionary holds fewer keys.
    pub fn random_distinct_keys(&self, n: usize) -> Vec<K> {
        if n == 0 {
            return Vec::new();
        }
        if n >= self.len() {
            return self.keys();
        }

        let mut picked: HashSet<K> = HashSet::with_capacity(n);
        let budget = n * DISTINCT_SAMPLE_ATTEMPTS;
        for _ in 0..budget {
            if picked.len() >= n {
                break;
            }
            for key in self.random_keys(1) {
                picked.insert(key);
            }
        }

        if picked.len() < n {
            let mut rng = rand::thread_rng();
            let rest: Vec<K> = self
                .keys()
                .into_iter()
                .filter(|key| !picked.contains(key))
                .collect();
            let needed = n - picked.len();
            picked.extend(rest.into_iter().choose_multiple(&mut rng, needed));
        }

        picked.into_iter().collect()
    }
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}
