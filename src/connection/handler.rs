//! Connection Handler Module
//!
//! Each client gets its own handler task that runs in a loop, decoding
//! requests and writing replies.
//!
//! ## Connection Lifecycle
//!
//! ```text
//! 1. Client connects (TCP handshake)
//!        │
//!        ▼
//! 2. ConnectionHandler spawned, buffers taken from the pools
//!        │
//!        ▼
//! 3. ┌──────────────────────────────┐
//!    │      Main Loop               │
//!    │                              │
//!    │  Decoder::next()  ◄──────┐   │
//!    │        │                 │   │
//!    │        ▼                 │   │
//!    │  Store::exec()           │   │
//!    │        │                 │   │
//!    │        ▼                 │   │
//!    │  Connection::write() ────┘   │
//!    └──────────────────────────────┘
//!        │
//!        ▼
//! 4. EOF, fatal protocol error, I/O error or server shutdown
//!        │
//!        ▼
//! 5. Connection::close() drains writes, buffers go back to the pools,
//!    Store::after_client_disconnect()
//! ```
//!
//! ## Protocol Errors
//!
//! A malformed request is answered with an `ERR Protocol error` reply. If
//! the error lost track of frame boundaries the connection is then closed;
//! otherwise decoding resumes with the next request.

use crate::connection::conn::Connection;
use crate::connection::pool::{BufferPools, Pooled};
use crate::database::{ClientId, Store};
use crate::protocol::{Command, DecodeError, Decoder, ProtocolError, Reply};
use bytes::BytesMut;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, ReadHalf, WriteHalf};
use tokio::sync::watch;
use tracing::{debug, info, trace, warn};

/// Statistics for connection handling
#[derive(Debug, Default)]
pub struct ConnectionStats {
    /// Total number of connections accepted
    pub connections_accepted: AtomicU64,
    /// Currently active connections
    pub active_connections: AtomicU64,
    /// Total commands processed
    pub commands_processed: AtomicU64,
    /// Malformed requests received
    pub protocol_errors: AtomicU64,
    /// Total bytes written
    pub bytes_written: AtomicU64,
}

impl ConnectionStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connection_opened(&self) {
        self.connections_accepted.fetch_add(1, Ordering::Relaxed);
        self.active_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_closed(&self) {
        self.active_connections.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn command_processed(&self) {
        self.commands_processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn protocol_error(&self) {
        self.protocol_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn bytes_written(&self, count: usize) {
        self.bytes_written.fetch_add(count as u64, Ordering::Relaxed);
    }
}

/// Everything a handler shares with the server and its sibling handlers.
pub struct ConnectionContext<S> {
    pub store: Arc<S>,
    pub stats: Arc<ConnectionStats>,
    pub pools: BufferPools,
    pub drain_timeout: Duration,

    /// Flips to `true` when the server shuts down.
    pub shutdown: watch::Receiver<bool>,
}

impl<S> Clone for ConnectionContext<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            stats: Arc::clone(&self.stats),
            pools: self.pools.clone(),
            drain_timeout: self.drain_timeout,
            shutdown: self.shutdown.clone(),
        }
    }
}

/// Errors that end a connection.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    /// I/O error (network issue)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The client sent something the decoder could not recover from
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}

/// Handles a single client connection.
pub struct ConnectionHandler<S, T> {
    id: ClientId,
    addr: SocketAddr,
    decoder: Decoder<ReadHalf<T>>,
    conn: Connection<WriteHalf<T>>,
    store: Arc<S>,
    stats: Arc<ConnectionStats>,
    shutdown: watch::Receiver<bool>,

    /// Holds the read buffer's place in the pool while the decoder owns it
    read_buf: Pooled<BytesMut>,
    write_buf: Pooled<Vec<u8>>,
}

impl<S, T> ConnectionHandler<S, T>
where
    S: Store,
    T: AsyncRead + AsyncWrite + Send + 'static,
{
    /// Creates a new connection handler.
    ///
    /// # Arguments
    ///
    /// * `io` - The client stream
    /// * `addr` - The client's socket address
    /// * `id` - Identifier passed to the store with every command
    /// * `ctx` - Shared server state
    pub fn new(io: T, addr: SocketAddr, id: ClientId, ctx: ConnectionContext<S>) -> Self {
        ctx.stats.connection_opened();

        let (reader, writer) = tokio::io::split(io);
        let mut read_buf = ctx.pools.read.get();
        let decoder = Decoder::with_buffer(reader, std::mem::take(&mut *read_buf));

        Self {
            id,
            addr,
            decoder,
            conn: Connection::new(writer, addr, ctx.drain_timeout),
            store: ctx.store,
            stats: ctx.stats,
            shutdown: ctx.shutdown,
            read_buf,
            write_buf: ctx.pools.write.get(),
        }
    }

    /// Runs the connection until the client leaves or the server shuts down.
    pub async fn run(mut self) -> Result<(), ConnectionError> {
        info!(client = %self.addr, id = self.id, "Client connected");

        let result = self.main_loop().await;

        match &result {
            Ok(()) => info!(client = %self.addr, "Client disconnected"),
            Err(ConnectionError::Io(e)) if e.kind() == std::io::ErrorKind::ConnectionReset => {
                debug!(client = %self.addr, "Connection reset by client")
            }
            Err(e) => warn!(client = %self.addr, error = %e, "Connection error"),
        }

        if let Err(e) = self.conn.close().await {
            debug!(client = %self.addr, error = %e, "Error while closing connection");
        }
        self.store.after_client_disconnect(self.id);
        self.stats.connection_closed();

        let Self {
            decoder,
            mut read_buf,
            ..
        } = self;
        *read_buf = decoder.into_buffer();

        result
    }

    async fn main_loop(&mut self) -> Result<(), ConnectionError> {
        if *self.shutdown.borrow() {
            return Ok(());
        }

        loop {
            let frame = tokio::select! {
                frame = self.decoder.next() => frame,
                _ = self.shutdown.changed() => {
                    debug!(client = %self.addr, "Server shutting down");
                    return Ok(());
                }
            };

            let frame = match frame {
                Some(frame) => frame,
                None => return Ok(()),
            };

            match frame {
                Ok(Reply::Array(Some(args))) if args.is_empty() => continue,
                Ok(reply) => match Command::from_reply(reply) {
                    Some(command) => {
                        trace!(client = %self.addr, command = command.name(), "Executing");
                        let reply = self.store.exec(self.id, command).await;
                        self.stats.command_processed();
                        self.send(&reply).await?;
                    }
                    None => {
                        self.stats.protocol_error();
                        let reply = Reply::error("ERR Protocol error: expected array of bulk strings");
                        self.send(&reply).await?;
                    }
                },
                Err(DecodeError::Protocol(e)) => {
                    warn!(client = %self.addr, error = %e, "Protocol error");
                    self.stats.protocol_error();
                    self.send(&Reply::error(format!("ERR Protocol error: {e}")))
                        .await?;
                    if e.is_fatal() {
                        return Err(e.into());
                    }
                }
                Err(DecodeError::Io(e)) => return Err(e.into()),
            }
        }
    }

    async fn send(&mut self, reply: &Reply) -> Result<(), ConnectionError> {
        if matches!(reply, Reply::NoReply) {
            return Ok(());
        }

        self.write_buf.clear();
        reply.serialize_into(&mut self.write_buf);
        let n = self.conn.write(&self.write_buf).await?;
        self.stats.bytes_written(n);
        trace!(client = %self.addr, bytes = n, "Sent reply");
        Ok(())
    }
}

/// Handles a client connection.
///
/// Creates a [`ConnectionHandler`] and runs it to completion; errors have
/// already been logged by the handler.
pub async fn handle_connection<S, T>(io: T, addr: SocketAddr, id: ClientId, ctx: ConnectionContext<S>)
where
    S: Store,
    T: AsyncRead + AsyncWrite + Send + 'static,
{
    let handler = ConnectionHandler::new(io, addr, id, ctx);
    let _ = handler.run().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::CommandTable;
    use crate::database::ConcurrentStore;
    use crate::storage::ConcurrentDb;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    fn test_context(shutdown: watch::Receiver<bool>) -> ConnectionContext<ConcurrentStore> {
        let store = ConcurrentStore::new(
            ConcurrentDb::new(8),
            Arc::new(CommandTable::with_builtins()),
            None,
        );
        ConnectionContext {
            store: Arc::new(store),
            stats: Arc::new(ConnectionStats::new()),
            pools: BufferPools::new(4),
            drain_timeout: Duration::from_secs(1),
            shutdown,
        }
    }

    async fn create_test_server() -> (SocketAddr, ConnectionContext<ConcurrentStore>, watch::Sender<bool>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let ctx = test_context(shutdown_rx);

        let server_ctx = ctx.clone();
        tokio::spawn(async move {
            let mut next_id = 0;
            while let Ok((stream, client_addr)) = listener.accept().await {
                next_id += 1;
                tokio::spawn(handle_connection(stream, client_addr, next_id, server_ctx.clone()));
            }
        });

        (addr, ctx, shutdown_tx)
    }

    async fn read_exactly(client: &mut TcpStream, expected: &[u8]) {
        let mut buf = vec![0u8; expected.len()];
        tokio::time::timeout(Duration::from_secs(2), client.read_exact(&mut buf))
            .await
            .expect("timed out waiting for reply")
            .unwrap();
        assert_eq!(String::from_utf8_lossy(&buf), String::from_utf8_lossy(expected));
    }

    #[tokio::test]
    async fn test_ping_pong() {
        let (addr, _, _shutdown) = create_test_server().await;
        let mut client = TcpStream::connect(addr).await.unwrap();

        client.write_all(b"*1\r\n$4\r\nPING\r\n").await.unwrap();
        read_exactly(&mut client, b"+PONG\r\n").await;

        // Inline form
        client.write_all(b"PING\r\n").await.unwrap();
        read_exactly(&mut client, b"+PONG\r\n").await;
    }

    #[tokio::test]
    async fn test_set_get() {
        let (addr, _, _shutdown) = create_test_server().await;
        let mut client = TcpStream::connect(addr).await.unwrap();

        client
            .write_all(b"*3\r\n$3\r\nSET\r\n$4\r\nname\r\n$5\r\nferro\r\n")
            .await
            .unwrap();
        read_exactly(&mut client, b"+OK\r\n").await;

        client
            .write_all(b"*2\r\n$3\r\nGET\r\n$4\r\nname\r\n")
            .await
            .unwrap();
        read_exactly(&mut client, b"$5\r\nferro\r\n").await;
    }

    #[tokio::test]
    async fn test_pipelining() {
        let (addr, _, _shutdown) = create_test_server().await;
        let mut client = TcpStream::connect(addr).await.unwrap();

        client
            .write_all(b"*3\r\n$3\r\nSET\r\n$2\r\nk1\r\n$2\r\nv1\r\n*3\r\n$3\r\nSET\r\n$2\r\nk2\r\n$2\r\nv2\r\n*2\r\n$3\r\nGET\r\n$2\r\nk1\r\n*2\r\n$3\r\nGET\r\n$2\r\nk2\r\n")
            .await
            .unwrap();
        read_exactly(&mut client, b"+OK\r\n+OK\r\n$2\r\nv1\r\n$2\r\nv2\r\n").await;
    }

    #[tokio::test]
    async fn test_unknown_command_with_line_breaks() {
        let (addr, _, _shutdown) = create_test_server().await;
        let mut client = TcpStream::connect(addr).await.unwrap();

        client
            .write_all(b"*1\r\n$9\r\nfoo\r\n+OK\r\n*1\r\n$4\r\nPING\r\n")
            .await
            .unwrap();
        read_exactly(
            &mut client,
            b"-ERR unknown command 'foo  +ok'\r\n+PONG\r\n",
        )
        .await;
    }

    #[tokio::test]
    async fn test_recoverable_protocol_error() {
        let (addr, ctx, _shutdown) = create_test_server().await;
        let mut client = TcpStream::connect(addr).await.unwrap();

        // Integer frames are not commands; the connection stays open.
        client.write_all(b":5\r\n*1\r\n$4\r\nPING\r\n").await.unwrap();
        read_exactly(
            &mut client,
            b"-ERR Protocol error: expected array of bulk strings\r\n+PONG\r\n",
        )
        .await;
        assert_eq!(ctx.stats.protocol_errors.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn test_fatal_protocol_error_closes_connection() {
        let (addr, _, _shutdown) = create_test_server().await;
        let mut client = TcpStream::connect(addr).await.unwrap();

        client.write_all(b"*1\r\n$x\r\nPING\r\n").await.unwrap();

        let mut received = Vec::new();
        tokio::time::timeout(Duration::from_secs(2), client.read_to_end(&mut received))
            .await
            .expect("connection was not closed")
            .unwrap();
        assert!(received.starts_with(b"-ERR Protocol error"));
    }

    #[tokio::test]
    async fn test_connection_stats() {
        let (addr, ctx, _shutdown) = create_test_server().await;
        let stats = Arc::clone(&ctx.stats);
        assert_eq!(stats.active_connections.load(Ordering::Relaxed), 0);

        let mut client = TcpStream::connect(addr).await.unwrap();
        client.write_all(b"*1\r\n$4\r\nPING\r\n").await.unwrap();
        read_exactly(&mut client, b"+PONG\r\n").await;

        assert_eq!(stats.connections_accepted.load(Ordering::Relaxed), 1);
        assert_eq!(stats.active_connections.load(Ordering::Relaxed), 1);
        assert_eq!(stats.commands_processed.load(Ordering::Relaxed), 1);
        assert_eq!(stats.bytes_written.load(Ordering::Relaxed), 7);

        drop(client);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(stats.active_connections.load(Ordering::Relaxed), 0);

        // Both buffers went back to their pools.
        assert_eq!(ctx.pools.read.idle(), 1);
        assert_eq!(ctx.pools.write.idle(), 1);
    }

    #[tokio::test]
    async fn test_shutdown_closes_idle_connection() {
        let (addr, _, shutdown) = create_test_server().await;
        let mut client = TcpStream::connect(addr).await.unwrap();
        client.write_all(b"*1\r\n$4\r\nPING\r\n").await.unwrap();
        read_exactly(&mut client, b"+PONG\r\n").await;

        shutdown.send(true).unwrap();

        let mut rest = Vec::new();
        tokio::time::timeout(Duration::from_secs(2), client.read_to_end(&mut rest))
            .await
            .expect("connection was not closed")
            .unwrap();
        assert!(rest.is_empty());
    }

    #[tokio::test]
    async fn test_in_memory_stream() {
        let (mut client, server) = tokio::io::duplex(1024);
        let (_tx, rx) = watch::channel(false);
        let ctx = test_context(rx);
        let task = tokio::spawn(handle_connection(
            server,
            "127.0.0.1:9999".parse().unwrap(),
            42,
            ctx.clone(),
        ));

        client
            .write_all(b"*3\r\n$3\r\nSET\r\n$1\r\nk\r\n$1\r\nv\r\n*1\r\n$5\r\nMULTI\r\n")
            .await
            .unwrap();
        client.shutdown().await.unwrap();

        let mut received = Vec::new();
        client.read_to_end(&mut received).await.unwrap();
        assert_eq!(
            String::from_utf8_lossy(&received),
            "+OK\r\n-ERR 'multi' command not supported in this store variant\r\n"
        );
        task.await.unwrap();
    }
}
