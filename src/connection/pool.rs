//! Buffer Pool
//!
//! Connections come and go far more often than their buffers need to. A
//! [`Pool`] keeps a bounded number of idle buffers around and hands them out
//! wrapped in a [`Pooled`] guard that puts the buffer back when dropped.
//!
//! ```text
//!   Pool::get() ──> Pooled<T> ──(Deref / DerefMut)──> &mut T
//!        ▲                │
//!        │     drop       │
//!        └──── reset() ───┘   (discarded if the pool is full or the
//!                              value grew past MAX_POOLED_CAPACITY)
//! ```

use bytes::BytesMut;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

/// Largest value, in bytes of capacity, a pool takes back. One large
/// request would otherwise pin its buffer for the life of the process.
pub const MAX_POOLED_CAPACITY: usize = 64 * 1024;

/// A value that can be cleared and reused.
pub trait Reusable: Default + Send + 'static {
    fn reset(&mut self);

    /// Bytes the value holds on to after `reset`.
    fn capacity(&self) -> usize;
}

impl Reusable for BytesMut {
    fn reset(&mut self) {
        self.clear();
    }

    fn capacity(&self) -> usize {
        BytesMut::capacity(self)
    }
}

impl Reusable for Vec<u8> {
    fn reset(&mut self) {
        self.clear();
    }

    fn capacity(&self) -> usize {
        Vec::capacity(self)
    }
}

struct Shared<T> {
    idle: Mutex<Vec<T>>,
    max_idle: usize,
    make: fn() -> T,
    created: AtomicU64,
    reused: AtomicU64,
}

/// A bounded pool of reusable values. Cloning yields a handle to the same
/// pool.
pub struct Pool<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for Pool<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> fmt::Debug for Pool<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pool")
            .field("max_idle", &self.shared.max_idle)
            .field("created", &self.shared.created.load(Ordering::Relaxed))
            .field("reused", &self.shared.reused.load(Ordering::Relaxed))
            .finish()
    }
}

impl<T: Reusable> Pool<T> {
    /// Creates a pool that keeps at most `max_idle` values and makes new
    /// ones with `make`.
    pub fn new(max_idle: usize, make: fn() -> T) -> Self {
        Self {
            shared: Arc::new(Shared {
                idle: Mutex::new(Vec::with_capacity(max_idle)),
                max_idle,
                make,
                created: AtomicU64::new(0),
                reused: AtomicU64::new(0),
            }),
        }
    }

    /// Takes an idle value, or makes a new one.
    pub fn get(&self) -> Pooled<T> {
        let idle = self
            .shared
            .idle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop();

        let value = match idle {
            Some(value) => {
                self.shared.reused.fetch_add(1, Ordering::Relaxed);
                value
            }
            None => {
                self.shared.created.fetch_add(1, Ordering::Relaxed);
                (self.shared.make)()
            }
        };

        Pooled {
            value,
            pool: Arc::clone(&self.shared),
        }
    }

    /// Number of values waiting to be reused.
    pub fn idle(&self) -> usize {
        self.shared
            .idle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Values made because none were idle.
    pub fn created(&self) -> u64 {
        self.shared.created.load(Ordering::Relaxed)
    }

    /// Values handed out again after being returned.
    pub fn reused(&self) -> u64 {
        self.shared.reused.load(Ordering::Relaxed)
    }
}

/// A value on loan from a [`Pool`].
pub struct Pooled<T: Reusable> {
    value: T,
    pool: Arc<Shared<T>>,
}

impl<T: Reusable> Deref for Pooled<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.value
    }
}

impl<T: Reusable> DerefMut for Pooled<T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.value
    }
}

impl<T: Reusable + fmt::Debug> fmt::Debug for Pooled<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Pooled").field(&self.value).finish()
    }
}

impl<T: Reusable> Drop for Pooled<T> {
    fn drop(&mut self) {
        let mut value = std::mem::take(&mut self.value);
        if value.capacity() > MAX_POOLED_CAPACITY {
            return;
        }
        value.reset();

        let mut idle = self.pool.idle.lock().unwrap_or_else(PoisonError::into_inner);
        if idle.len() < self.pool.max_idle {
            idle.push(value);
        }
    }
}

/// Read and write buffers shared by every connection.
#[derive(Debug, Clone)]
pub struct BufferPools {
    pub read: Pool<BytesMut>,
    pub write: Pool<Vec<u8>>,
}

/// Starting capacity of a connection's read buffer.
pub const READ_BUFFER_SIZE: usize = 4096;

/// Starting capacity of a connection's write buffer.
pub const WRITE_BUFFER_SIZE: usize = 1024;

impl BufferPools {
    pub fn new(max_idle: usize) -> Self {
        Self {
            read: Pool::new(max_idle, || BytesMut::with_capacity(READ_BUFFER_SIZE)),
            write: Pool::new(max_idle, || Vec::with_capacity(WRITE_BUFFER_SIZE)),
        }
    }
}

impl Default for BufferPools {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reuse_after_drop() {
        let pool: Pool<Vec<u8>> = Pool::new(2, Vec::new);
        {
            let mut buf = pool.get();
            buf.extend_from_slice(b"hello");
        }
        assert_eq!(pool.idle(), 1);

        let buf = pool.get();
        assert!(buf.is_empty());
        assert_eq!(pool.created(), 1);
        assert_eq!(pool.reused(), 1);
    }

    #[test]
    fn test_idle_is_bounded() {
        let pool: Pool<Vec<u8>> = Pool::new(1, Vec::new);
        let a = pool.get();
        let b = pool.get();
        drop(a);
        drop(b);
        assert_eq!(pool.idle(), 1);
        assert_eq!(pool.created(), 2);
    }

    #[test]
    fn test_oversized_values_are_not_kept() {
        let pools = BufferPools::new(4);
        {
            let mut write = pools.write.get();
            write.resize(MAX_POOLED_CAPACITY + 1, 0);
            let mut read = pools.read.get();
            read.extend_from_slice(&vec![0u8; 4 * MAX_POOLED_CAPACITY]);
        }
        assert_eq!(pools.write.idle(), 0);
        assert_eq!(pools.read.idle(), 0);

        {
            let mut write = pools.write.get();
            write.resize(MAX_POOLED_CAPACITY / 2, 0);
        }
        assert_eq!(pools.write.idle(), 1);
        assert!(pools.write.get().capacity() <= MAX_POOLED_CAPACITY);
    }

    #[test]
    fn test_buffer_pools_keep_capacity() {
        let pools = BufferPools::new(4);
        {
            let mut read = pools.read.get();
            read.extend_from_slice(&[0u8; 100]);
        }
        let read = pools.read.get();
        assert!(read.is_empty());
        assert!(read.capacity() >= READ_BUFFER_SIZE);
    }

    #[test]
    fn test_shared_across_threads() {
        let pool: Pool<Vec<u8>> = Pool::new(8, Vec::new);
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let pool = pool.clone();
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        let mut buf = pool.get();
                        buf.push(1);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert!(pool.idle() <= 8);
        assert_eq!(pool.created() + pool.reused(), 400);
    }
}
