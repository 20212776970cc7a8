//! The write side of a client connection.

use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// How long `close` waits for in-flight writes by default.
pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// A client's outgoing stream plus its address.
///
/// Writes are serialized through an async mutex, so `close` can wait for
/// every write already in progress or queued simply by taking the lock.
#[derive(Debug)]
pub struct Connection<W> {
    writer: Mutex<W>,
    addr: SocketAddr,
    drain_timeout: Duration,
    closed: AtomicBool,
}

impl<W: AsyncWrite + Unpin + Send> Connection<W> {
    pub fn new(writer: W, addr: SocketAddr, drain_timeout: Duration) -> Self {
        Self {
            writer: Mutex::new(writer),
            addr,
            drain_timeout,
            closed: AtomicBool::new(false),
        }
    }

    /// Writes and flushes `data`.
    ///
    /// # Returns
    ///
    /// The number of bytes written, which is always `data.len()` on success.
    pub async fn write(&self, data: &[u8]) -> io::Result<usize> {
        if data.is_empty() {
            return Ok(0);
        }
        if self.closed.load(Ordering::Acquire) {
            return Err(io::Error::new(
                io::ErrorKind::NotConnected,
                "connection is closed",
            ));
        }

        let mut writer = self.writer.lock().await;
        writer.write_all(data).await?;
        writer.flush().await?;
        Ok(data.len())
    }

    /// Waits up to the drain timeout for in-flight writes, then shuts the
    /// stream down. Later writes fail; calling `close` again does nothing.
    pub async fn close(&self) -> io::Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        match tokio::time::timeout(self.drain_timeout, self.writer.lock()).await {
            Ok(mut writer) => {
                debug!(client = %self.addr, "Closing connection");
                writer.shutdown().await
            }
            Err(_) => {
                warn!(
                    client = %self.addr,
                    timeout_ms = self.drain_timeout.as_millis() as u64,
                    "Timed out waiting for in-flight writes"
                );
                Ok(())
            }
        }
    }

    pub fn remote_address(&self) -> SocketAddr {
        self.addr
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}
