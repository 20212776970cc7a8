//! Snapshot Persistence
//!
//! A [`Snapshot`] is a point-in-time copy of every live key with its value
//! and expiration. Stores hand snapshots to a [`Persister`] on `SAVE` and on
//! close, and ask it for one at startup.
//!
//! ```text
//!   startup                SAVE / close
//!      │                        │
//!      ▼                        ▼
//! Persister::load()      Snapshot::capture(db)
//!      │                        │
//!      ▼                        ▼
//! Snapshot::restore(db)  Persister::save(&snapshot)   (blocking pool)
//! ```
//!
//! Deadlines are kept as wall-clock times inside a snapshot, since monotonic
//! instants mean nothing to another process.

pub mod file;

pub use file::FilePersister;

use crate::storage::{Keyspace, PutMode, Value};
use bytes::Bytes;
use std::io;
use std::time::{Instant, SystemTime};
use thiserror::Error;

/// Errors raised while saving or loading a snapshot.
#[derive(Debug, Error)]
pub enum PersistError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The snapshot file exists but could not be understood.
    #[error("corrupt snapshot: {0}")]
    Format(String),
}

/// One key in a snapshot.
#[derive(Debug, Clone)]
pub struct SnapshotEntry {
    pub key: Bytes,
    pub value: Value,
    pub expires_at: Option<SystemTime>,
}

/// A point-in-time copy of a keyspace.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    pub entries: Vec<SnapshotEntry>,
}

impl Snapshot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copies every live key out of `db`.
    pub fn capture<K: Keyspace>(db: &mut K) -> Self {
        let now = Instant::now();
        let wall = SystemTime::now();
        let mut entries = Vec::with_capacity(db.len());

        db.for_each(&mut |key, value, deadline| {
            entries.push(SnapshotEntry {
                key: key.clone(),
                value: value.clone(),
                expires_at: deadline
                    .and_then(|at| wall.checked_add(at.saturating_duration_since(now))),
            });
            true
        });

        Self { entries }
    }

    /// Writes every entry into `db`, skipping entries whose deadline has
    /// already passed.
    ///
    /// # Returns
    ///
    /// The number of keys restored.
    pub fn restore<K: Keyspace>(self, db: &mut K) -> usize {
        let now = Instant::now();
        let wall = SystemTime::now();
        let mut restored = 0;

        for entry in self.entries {
            let deadline = match entry.expires_at {
                Some(at) => match at.duration_since(wall) {
                    // Too far away to represent is as good as never.
                    Ok(left) if !left.is_zero() => now.checked_add(left),
                    _ => continue,
                },
                None => None,
            };

            db.put_with(entry.key, entry.value, PutMode::Always, deadline);
            restored += 1;
        }

        restored
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Durable storage for snapshots.
///
/// Both methods block; stores call them from the blocking thread pool.
pub trait Persister: Send + Sync + 'static {
    fn save(&self, snapshot: &Snapshot) -> Result<(), PersistError>;

    /// Loads the last saved snapshot. Nothing saved yet is an empty snapshot.
    fn load(&self) -> Result<Snapshot, PersistError>;
}
