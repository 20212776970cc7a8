//! Serialized execution strategy.
//!
//! A single worker task owns the [`CacheDb`] and executes requests one at a
//! time, in the order they were enqueued. Connection tasks talk to it
//! through a bounded channel and wait for their reply on a oneshot.
//!
//! ```text
//! exec() ──> [ Request | Request | Request ] ──> worker ──> CacheDb
//!    ▲             bounded mpsc queue               │
//!    └──────────────── oneshot reply ───────────────┘
//! ```
//!
//! Closing sends a shutdown message. The worker then closes the queue so new
//! sends fail, finishes everything already queued and hands the keyspace
//! back for the final snapshot.

use super::{check_save, intercept, restore_from, save_reply, write_snapshot};
use super::{ClientId, Intercept, Store, StoreError};
use crate::commands::CommandTable;
use crate::persistence::{Persister, Snapshot};
use crate::protocol::{Command, Reply};
use crate::storage::CacheDb;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, trace, warn};

/// Default capacity of the request queue.
pub const DEFAULT_QUEUE_SIZE: usize = 1024;

enum Message {
    Exec {
        client: ClientId,
        command: Command,
        reply: oneshot::Sender<Reply>,
    },
    Snapshot {
        reply: oneshot::Sender<Snapshot>,
    },
    Shutdown,
}

pub struct SerializedStore {
    tx: mpsc::Sender<Message>,
    worker: Mutex<Option<JoinHandle<CacheDb>>>,
    persister: Option<Arc<dyn Persister>>,
    closing: AtomicBool,
}

impl std::fmt::Debug for SerializedStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerializedStore")
            .field("queue_capacity", &self.tx.max_capacity())
            .field("persistent", &self.persister.is_some())
            .field("closing", &self.closing.load(Ordering::Relaxed))
            .finish()
    }
}

impl SerializedStore {
    /// Spawns the worker task. Must be called from within a tokio runtime.
    ///
    /// # Arguments
    ///
    /// * `db` - The keyspace the worker will own
    /// * `table` - Command handlers
    /// * `queue_size` - Capacity of the request queue (at least 1)
    /// * `persister` - Snapshot storage; its snapshot is loaded into `db` first
    pub fn new(
        mut db: CacheDb,
        table: Arc<CommandTable<CacheDb>>,
        queue_size: usize,
        persister: Option<Arc<dyn Persister>>,
    ) -> Self {
        if let Some(p) = &persister {
            restore_from(p.as_ref(), &mut db);
        }

        let (tx, rx) = mpsc::channel(queue_size.max(1));
        let worker = tokio::spawn(run_worker(db, table, rx));

        Self {
            tx,
            worker: Mutex::new(Some(worker)),
            persister,
            closing: AtomicBool::new(false),
        }
    }

    async fn snapshot(&self) -> Result<Snapshot, StoreError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Message::Snapshot { reply })
            .await
            .map_err(|_| StoreError::Unavailable)?;
        rx.await.map_err(|_| StoreError::Unavailable)
    }
}

async fn run_worker(
    mut db: CacheDb,
    table: Arc<CommandTable<CacheDb>>,
    mut rx: mpsc::Receiver<Message>,
) -> CacheDb {
    debug!("Serialized worker started");

    while let Some(message) = rx.recv().await {
        match message {
            Message::Exec {
                client,
                command,
                reply,
            } => {
                trace!(client, command = command.name(), "Dispatching");
                let result = table.dispatch(&mut db, &command);
                if reply.send(result).is_err() {
                    trace!(client, "Reply dropped, client went away");
                }
            }
            Message::Snapshot { reply } => {
                let _ = reply.send(Snapshot::capture(&mut db));
            }
            Message::Shutdown => {
                // Queued messages are still delivered after close().
                rx.close();
            }
        }
    }

    debug!("Serialized worker stopped");
    db
}

impl Store for SerializedStore {
    async fn exec(&self, client: ClientId, command: Command) -> Reply {
        if self.closing.load(Ordering::Acquire) {
            return StoreError::Unavailable.into();
        }

        match intercept(&command) {
            Some(Intercept::Save) => {
                if let Err(reply) = check_save(&command) {
                    return reply;
                }
                return match self.snapshot().await {
                    Ok(snapshot) => save_reply(self.persister.as_ref(), snapshot).await,
                    Err(e) => e.into(),
                };
            }
            Some(Intercept::Transaction) => {
                return StoreError::Unsupported(command.name().to_string()).into();
            }
            None => {}
        }

        let (reply, rx) = oneshot::channel();
        let message = Message::Exec {
            client,
            command,
            reply,
        };
        if self.tx.send(message).await.is_err() {
            return StoreError::Unavailable.into();
        }
        rx.await.unwrap_or_else(|_| StoreError::Unavailable.into())
    }

    fn after_client_disconnect(&self, client: ClientId) {
        trace!(client, "No per-client state to release");
    }

    async fn close(&self) {
        if self.closing.swap(true, Ordering::AcqRel) {
            return;
        }
        debug!("Closing serialized store");

        if self.tx.send(Message::Shutdown).await.is_err() {
            warn!("Serialized worker already stopped");
        }

        let worker = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(worker) = worker else {
            return;
        };

        let mut db = match worker.await {
            Ok(db) => db,
            Err(e) => {
                error!(error = %e, "Serialized worker failed");
                return;
            }
        };

        if let Some(persister) = &self.persister {
            let snapshot = Snapshot::capture(&mut db);
            if let Err(e) = write_snapshot(Arc::clone(persister), snapshot).await {
                warn!(error = %e, "Final snapshot failed");
            }
        }
    }
}
