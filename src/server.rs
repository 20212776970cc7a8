//! TCP Server
//!
//! Accepts clients and spawns a [`handle_connection`] task for each one.
//!
//! ## Shutdown
//!
//! ```text
//! shutdown future resolves
//!        │
//!        ▼
//! stop accepting, drop the listener
//!        │
//!        ▼
//! watch channel flips to true ──> every handler leaves its loop,
//!        │                        drains its writes, closes
//!        ▼
//! wait for all connection tasks
//!        │
//!        ▼
//! Store::close()  (serialized queue drained, final snapshot written)
//! ```

use crate::commands::CommandTable;
use crate::config::{Config, StoreKind};
use crate::connection::{handle_connection, BufferPools, ConnectionContext, ConnectionStats};
use crate::database::{ClientId, ConcurrentStore, SerializedStore, Store};
use crate::persistence::{FilePersister, Persister};
use crate::storage::{CacheDb, ConcurrentDb};
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

/// Pause after a failed `accept` before trying again.
const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(5);

/// A bound listener plus the store its clients talk to.
pub struct Server<S> {
    listener: TcpListener,
    store: Arc<S>,
    stats: Arc<ConnectionStats>,
    pools: BufferPools,
    drain_timeout: Duration,
}

impl<S: Store> Server<S> {
    pub fn new(listener: TcpListener, store: Arc<S>, drain_timeout: Duration) -> Self {
        Self {
            listener,
            store,
            stats: Arc::new(ConnectionStats::new()),
            pools: BufferPools::default(),
            drain_timeout,
        }
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn stats(&self) -> Arc<ConnectionStats> {
        Arc::clone(&self.stats)
    }

    /// Serves clients until `shutdown` resolves, then closes every
    /// connection and the store.
    pub async fn serve(self, shutdown: impl Future<Output = ()> + Send) {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let ctx = ConnectionContext {
            store: Arc::clone(&self.store),
            stats: Arc::clone(&self.stats),
            pools: self.pools.clone(),
            drain_timeout: self.drain_timeout,
            shutdown: shutdown_rx,
        };

        let mut connections = JoinSet::new();
        let mut next_id: ClientId = 0;
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, addr)) => {
                        next_id += 1;
                        if let Err(e) = stream.set_nodelay(true) {
                            debug!(client = %addr, error = %e, "Failed to set TCP_NODELAY");
                        }
                        connections.spawn(handle_connection(stream, addr, next_id, ctx.clone()));
                    }
                    Err(e) => {
                        error!(error = %e, "Failed to accept connection");
                        tokio::time::sleep(ACCEPT_RETRY_DELAY).await;
                    }
                },
                Some(finished) = connections.join_next(), if !connections.is_empty() => {
                    if let Err(e) = finished {
                        warn!(error = %e, "Connection task failed");
                    }
                }
            }
        }

        info!(
            active = self.stats.active_connections.load(Ordering::Relaxed),
            "Shutting down, closing connections"
        );
        drop(self.listener);
        let _ = shutdown_tx.send(true);

        while let Some(finished) = connections.join_next().await {
            if let Err(e) = finished {
                warn!(error = %e, "Connection task failed");
            }
        }

        self.store.close().await;
        info!(
            connections = self.stats.connections_accepted.load(Ordering::Relaxed),
            commands = self.stats.commands_processed.load(Ordering::Relaxed),
            "Server stopped"
        );
    }
}

/// Builds the store `config` asks for, binds the listener and serves until
/// `shutdown` resolves.
pub async fn run(config: Config, shutdown: impl Future<Output = ()> + Send) -> io::Result<()> {
    let listener = TcpListener::bind(config.bind_address()).await?;
    info!(address = %listener.local_addr()?, store = %config.store, "Listening");

    let persister = config.dbfilename.as_ref().map(|path| {
        info!(path = %path.display(), "Snapshot persistence enabled");
        Arc::new(FilePersister::new(path.clone())) as Arc<dyn Persister>
    });

    match config.store {
        StoreKind::Concurrent => {
            let store = ConcurrentStore::new(
                ConcurrentDb::new(config.shards),
                Arc::new(CommandTable::with_builtins()),
                persister,
            );
            info!(shards = config.shards, "Concurrent store ready");
            Server::new(listener, Arc::new(store), config.drain_timeout)
                .serve(shutdown)
                .await;
        }
        StoreKind::Serialized => {
            let store = SerializedStore::new(
                CacheDb::new(config.eviction, config.max_keys),
                Arc::new(CommandTable::with_builtins()),
                config.queue_size,
                persister,
            );
            info!(
                max_keys = config.max_keys,
                eviction = %config.eviction,
                queue_size = config.queue_size,
                "Serialized store ready"
            );
            Server::new(listener, Arc::new(store), config.drain_timeout)
                .serve(shutdown)
                .await;
        }
    }

    Ok(())
}
