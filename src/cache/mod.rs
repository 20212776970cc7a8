//! Bounded Caches with TTL
//!
//! The serialized store keeps its keyspace in a [`Cache`]: a plain map with
//! a fixed capacity, an eviction policy that picks a victim when an insert
//! would overflow it, and per-key expiration deadlines.
//!
//! ## Policies
//!
//! - [`LruCache`]: evicts the least recently used key.
//! - [`LfuCache`]: evicts the least frequently used key, oldest access first
//!   on ties.
//!
//! ## Expiration
//!
//! Deadlines live in a side table next to the entries. Nothing sweeps them
//! in the background: an expired key is dropped the next time it is looked
//! up, and skipped by [`Cache::for_each`] until then.

pub mod lfu;
pub mod lru;

pub use lfu::LfuCache;
pub use lru::LruCache;

use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::str::FromStr;
use std::time::Instant;
use thiserror::Error;

/// A bounded key-value cache with expiration.
///
/// Lookups take `&mut self` because reading a key updates the policy's
/// bookkeeping (recency or frequency) and may expire it.
pub trait Cache<K, V>: Send {
    /// Inserts or replaces a value, evicting another key if the cache is
    /// full. Replacing a value clears its expiration.
    ///
    /// # Returns
    ///
    /// `true` if the key was not present before.
    fn set(&mut self, key: K, value: V) -> bool;

    /// Returns the live value and records the access.
    fn get(&mut self, key: &K) -> Option<&V>;

    /// Like [`Cache::get`], but mutable.
    fn get_mut(&mut self, key: &K) -> Option<&mut V>;

    /// Sets the absolute expiration instant. Returns `false` for a missing key.
    fn expire(&mut self, key: &K, at: Instant) -> bool;

    /// Clears the expiration. Returns `true` if the key had one.
    fn persist(&mut self, key: &K) -> bool;

    /// The key's expiration instant, if it is live and has one.
    fn expires_at(&mut self, key: &K) -> Option<Instant>;

    /// Removes a key, returning its value.
    fn remove(&mut self, key: &K) -> Option<V>;

    /// Drops every entry. Capacity is unchanged.
    fn purge(&mut self);

    /// Number of stored entries, including expired ones not yet collected.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether the key is live. Does not count as an access.
    fn has(&mut self, key: &K) -> bool;

    /// Visits every live entry with its expiration. Stops when `f` returns
    /// `false`.
    fn for_each(&self, f: &mut dyn FnMut(&K, &V, Option<Instant>) -> bool);

    /// Maximum number of entries.
    fn capacity(&self) -> usize;
}

/// Which key a full cache gives up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EvictionPolicy {
    #[default]
    Lru,
    Lfu,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown eviction policy '{0}' (expected lru or lfu)")]
pub struct UnknownPolicy(String);

impl FromStr for EvictionPolicy {
    type Err = UnknownPolicy;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "lru" => Ok(EvictionPolicy::Lru),
            "lfu" => Ok(EvictionPolicy::Lfu),
            _ => Err(UnknownPolicy(s.to_string())),
        }
    }
}

impl fmt::Display for EvictionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EvictionPolicy::Lru => write!(f, "lru"),
            EvictionPolicy::Lfu => write!(f, "lfu"),
        }
    }
}

impl EvictionPolicy {
    /// Builds an empty cache with this policy. A capacity of 0 means
    /// unbounded.
    pub fn build<K, V>(self, capacity: usize) -> Box<dyn Cache<K, V>>
    where
        K: Hash + Eq + Clone + Send + 'static,
        V: Send + 'static,
    {
        match self {
            EvictionPolicy::Lru => Box::new(LruCache::new(capacity)),
            EvictionPolicy::Lfu => Box::new(LfuCache::new(capacity)),
        }
    }
}

/// Capacity 0 means "no limit".
pub(crate) fn effective_capacity(capacity: usize) -> usize {
    if capacity == 0 {
        usize::MAX
    } else {
        capacity
    }
}

/// Expiration deadlines shared by both cache policies.
#[derive(Debug)]
pub(crate) struct Deadlines<K> {
    at: HashMap<K, Instant>,
}

impl<K: Hash + Eq> Default for Deadlines<K> {
    fn default() -> Self {
        Self { at: HashMap::new() }
    }
}

impl<K: Hash + Eq> Deadlines<K> {
    pub(crate) fn set(&mut self, key: K, at: Instant) {
        self.at.insert(key, at);
    }

    pub(crate) fn clear(&mut self, key: &K) -> bool {
        self.at.remove(key).is_some()
    }

    pub(crate) fn get(&self, key: &K) -> Option<Instant> {
        self.at.get(key).copied()
    }

    pub(crate) fn is_expired(&self, key: &K, now: Instant) -> bool {
        matches!(self.at.get(key), Some(&at) if at <= now)
    }
}
