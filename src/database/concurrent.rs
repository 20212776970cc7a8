//! Concurrent execution strategy.
//!
//! Every connection task dispatches directly against a shared
//! [`ConcurrentDb`]. There is no engine-wide lock: two commands only wait on
//! each other when they touch keys in the same shard.

use super::{check_save, intercept, restore_from, save_reply, write_snapshot};
use super::{ClientId, Intercept, Store, StoreError};
use crate::commands::CommandTable;
use crate::persistence::{Persister, Snapshot};
use crate::protocol::{Command, Reply};
use crate::storage::ConcurrentDb;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, trace, warn};

pub struct ConcurrentStore {
    db: ConcurrentDb,
    table: Arc<CommandTable<ConcurrentDb>>,
    persister: Option<Arc<dyn Persister>>,
    closing: AtomicBool,
}

impl std::fmt::Debug for ConcurrentStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConcurrentStore")
            .field("db", &self.db)
            .field("persistent", &self.persister.is_some())
            .field("closing", &self.closing.load(Ordering::Relaxed))
            .finish()
    }
}

impl ConcurrentStore {
    /// Creates a store over `db`, first loading the persisted snapshot into
    /// it when a persister is given.
    pub fn new(
        mut db: ConcurrentDb,
        table: Arc<CommandTable<ConcurrentDb>>,
        persister: Option<Arc<dyn Persister>>,
    ) -> Self {
        if let Some(p) = &persister {
            restore_from(p.as_ref(), &mut db);
        }
        Self {
            db,
            table,
            persister,
            closing: AtomicBool::new(false),
        }
    }

    /// A handle onto the live keyspace.
    pub fn db(&self) -> &ConcurrentDb {
        &self.db
    }
}

impl Store for ConcurrentStore {
    async fn exec(&self, client: ClientId, command: Command) -> Reply {
        if self.closing.load(Ordering::Acquire) {
            return StoreError::Unavailable.into();
        }

        match intercept(&command) {
            Some(Intercept::Save) => {
                if let Err(reply) = check_save(&command) {
                    return reply;
                }
                let mut db = self.db.clone();
                let snapshot = Snapshot::capture(&mut db);
                return save_reply(self.persister.as_ref(), snapshot).await;
            }
            Some(Intercept::Transaction) => {
                return StoreError::Unsupported(command.name().to_string()).into();
            }
            None => {}
        }

        trace!(client, command = command.name(), "Dispatching");
        let mut db = self.db.clone();
        self.table.dispatch(&mut db, &command)
    }

    fn after_client_disconnect(&self, client: ClientId) {
        trace!(client, "No per-client state to release");
    }

    async fn close(&self) {
        if self.closing.swap(true, Ordering::AcqRel) {
            return;
        }
        debug!("Closing concurrent store");

        if let Some(persister) = &self.persister {
            let mut db = self.db.clone();
            let snapshot = Snapshot::capture(&mut db);
            if let Err(e) = write_snapshot(Arc::clone(persister), snapshot).await {
                warn!(error = %e, "Final snapshot failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{cmd, MemoryPersister};
    use super::*;
    use crate::storage::{Keyspace, Value};
    use bytes::Bytes;

    fn store(persister: Option<Arc<dyn Persister>>) -> ConcurrentStore {
        ConcurrentStore::new(
            ConcurrentDb::new(8),
            Arc::new(CommandTable::with_builtins()),
            persister,
        )
    }

    #[tokio::test]
    async fn test_exec() {
        let store = store(None);
        assert_eq!(store.exec(1, cmd(&["SET", "k", "v"])).await, Reply::ok());
        assert_eq!(
            store.exec(2, cmd(&["GET", "k"])).await,
            Reply::bulk(Bytes::from("v"))
        );
        assert_eq!(
            store.exec(1, cmd(&["NOPE"])).await,
            Reply::error("ERR unknown command 'nope'")
        );
    }

    #[tokio::test]
    async fn test_transactions_rejected() {
        let store = store(None);
        for name in ["MULTI", "EXEC", "DISCARD"] {
            assert_eq!(
                store.exec(1, cmd(&[name])).await,
                Reply::error(format!(
                    "ERR '{}' command not supported in this store variant",
                    name.to_lowercase()
                ))
            );
        }
        assert!(store.exec(1, cmd(&["WATCH", "k"])).await.is_error());
    }

    #[tokio::test]
    async fn test_concurrent_clients() {
        let store = Arc::new(store(None));
        let mut handles = Vec::new();
        for client in 0..8u64 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                for i in 0..100 {
                    let key = format!("c{client}:k{i}");
                    store.exec(client, cmd(&["SET", &key, "v"])).await;
                    store.exec(client, cmd(&["INCR", "shared"])).await;
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(store.db().len(), 801);
        assert_eq!(
            store.exec(0, cmd(&["GET", "shared"])).await,
            Reply::bulk(Bytes::from("800"))
        );
    }

    #[tokio::test]
    async fn test_save() {
        let persister = Arc::new(MemoryPersister::default());
        let store = store(Some(persister.clone()));
        store.exec(1, cmd(&["SET", "a", "1"])).await;
        store.exec(1, cmd(&["SET", "b", "2"])).await;

        assert_eq!(store.exec(1, cmd(&["SAVE"])).await, Reply::ok());
        assert_eq!(persister.saves(), 1);
        assert_eq!(persister.last_len(), Some(2));
        assert!(store.exec(1, cmd(&["SAVE", "now"])).await.is_error());
    }

    #[tokio::test]
    async fn test_save_failure_keeps_serving() {
        let store = store(Some(Arc::new(MemoryPersister::failing())));
        store.exec(1, cmd(&["SET", "a", "1"])).await;

        match store.exec(1, cmd(&["SAVE"])).await {
            Reply::Error(msg) => assert!(msg.starts_with("ERR saving failed:")),
            other => panic!("unexpected reply {other:?}"),
        }
        assert_eq!(
            store.exec(1, cmd(&["GET", "a"])).await,
            Reply::bulk(Bytes::from("1"))
        );
    }

    #[tokio::test]
    async fn test_save_without_persister() {
        let store = store(None);
        assert!(store.exec(1, cmd(&["SAVE"])).await.is_error());
    }

    #[tokio::test]
    async fn test_restore_and_close() {
        let mut seed = ConcurrentDb::new(2);
        seed.put(Bytes::from("restored"), Value::Str(Bytes::from("yes")));
        let persister = Arc::new(MemoryPersister::with_initial(Snapshot::capture(&mut seed)));

        let store = store(Some(persister.clone()));
        assert_eq!(
            store.exec(1, cmd(&["GET", "restored"])).await,
            Reply::bulk(Bytes::from("yes"))
        );

        store.close().await;
        assert_eq!(persister.saves(), 1);
        assert_eq!(
            store.exec(1, cmd(&["PING"])).await,
            Reply::error("ERR store is closing")
        );

        // A second close does nothing.
        store.close().await;
        assert_eq!(persister.saves(), 1);
    }
}
