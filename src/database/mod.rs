//! Command Execution Engine
//!
//! A [`Store`] turns commands into replies. Two strategies are provided:
//!
//! ```text
//!              ConcurrentStore                       SerializedStore
//!
//!  conn ──┐                             conn ──┐
//!  conn ──┼──> dispatch on caller task  conn ──┼──> mpsc queue ──> worker task
//!  conn ──┘         │                   conn ──┘                      │
//!                   ▼                                                 ▼
//!            ConcurrentDb                                          CacheDb
//!      (sharded dicts, no global lock)                  (owned, LRU/LFU, one at a time)
//! ```
//!
//! Both strategies run the same [`CommandTable`] handlers and answer a few
//! commands themselves:
//!
//! - `SAVE` snapshots the keyspace and hands it to the [`Persister`]
//! - `MULTI`, `EXEC`, `DISCARD` and `WATCH` are rejected
//!
//! Once [`Store::close`] has started, every new command is answered with
//! `ERR store is closing`.
//!
//! [`CommandTable`]: crate::commands::CommandTable

pub mod concurrent;
pub mod serialized;

pub use concurrent::ConcurrentStore;
pub use serialized::SerializedStore;

use crate::commands::CommandError;
use crate::persistence::{PersistError, Persister, Snapshot};
use crate::protocol::{Command, Reply};
use crate::storage::Keyspace;
use std::future::Future;
use std::io;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

/// Identifies a client connection for the lifetime of the server.
pub type ClientId = u64;

/// Errors answered by the store itself rather than by a command handler.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("ERR store is closing")]
    Unavailable,

    #[error("ERR '{0}' command not supported in this store variant")]
    Unsupported(String),

    #[error("ERR saving failed: {0}")]
    Save(#[from] PersistError),
}

impl From<StoreError> for Reply {
    fn from(e: StoreError) -> Self {
        Reply::Error(e.to_string())
    }
}

/// Executes commands on behalf of connections.
pub trait Store: Send + Sync + 'static {
    /// Runs one command and produces its reply.
    fn exec(&self, client: ClientId, command: Command) -> impl Future<Output = Reply> + Send;

    /// Releases anything held for a client that has gone away.
    fn after_client_disconnect(&self, client: ClientId);

    /// Stops accepting commands, finishes queued work and writes a final
    /// snapshot if a persister is configured.
    fn close(&self) -> impl Future<Output = ()> + Send;
}

/// Commands the store answers without consulting the command table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Intercept {
    Save,
    Transaction,
}

const TRANSACTION_COMMANDS: [&str; 4] = ["multi", "exec", "discard", "watch"];

pub(crate) fn intercept(command: &Command) -> Option<Intercept> {
    let name = command.name();
    if name == "save" {
        Some(Intercept::Save)
    } else if TRANSACTION_COMMANDS.contains(&name) {
        Some(Intercept::Transaction)
    } else {
        None
    }
}

/// Checks `SAVE`'s arity; it takes no arguments.
pub(crate) fn check_save(command: &Command) -> Result<(), Reply> {
    if command.args().len() != 1 {
        return Err(CommandError::WrongArity("save".to_string()).into());
    }
    Ok(())
}

/// Writes `snapshot` on the blocking thread pool.
pub(crate) async fn write_snapshot(
    persister: Arc<dyn Persister>,
    snapshot: Snapshot,
) -> Result<(), StoreError> {
    let keys = snapshot.len();
    tokio::task::spawn_blocking(move || persister.save(&snapshot))
        .await
        .map_err(|e| PersistError::Io(io::Error::new(io::ErrorKind::Other, e)))??;
    info!(keys, "Snapshot saved");
    Ok(())
}

/// Answers a `SAVE` for `snapshot`.
pub(crate) async fn save_reply(persister: Option<&Arc<dyn Persister>>, snapshot: Snapshot) -> Reply {
    let persister = match persister {
        Some(p) => Arc::clone(p),
        None => return Reply::error("ERR saving failed: no snapshot file configured"),
    };
    match write_snapshot(persister, snapshot).await {
        Ok(()) => Reply::ok(),
        Err(e) => {
            warn!(error = %e, "SAVE failed");
            e.into()
        }
    }
}

/// Loads the persisted snapshot into `db`. Failures are logged and leave
/// `db` empty.
pub(crate) fn restore_from(persister: &dyn Persister, db: &mut impl Keyspace) {
    match persister.load() {
        Ok(snapshot) => {
            let restored = snapshot.restore(db);
            info!(keys = restored, "Snapshot loaded");
        }
        Err(e) => warn!(error = %e, "Could not load snapshot, starting empty"),
    }
}
