//! Connection and server-level commands.

use super::{CommandError, CommandResult, CommandTable};
use crate::protocol::Reply;
use crate::storage::Keyspace;
use bytes::Bytes;

pub fn register<K: Keyspace>(table: &mut CommandTable<K>) {
    table.register("ping", -1, ping::<K>);
    table.register("echo", 2, echo::<K>);
    table.register("dbsize", 1, dbsize::<K>);
    table.register("flushdb", 1, flushdb::<K>);
}

/// PING [message]
fn ping<K: Keyspace>(_: &mut K, args: &[Bytes]) -> CommandResult {
    match args.len() {
        1 => Ok(Reply::pong()),
        2 => Ok(Reply::bulk(args[1].clone())),
        _ => Err(CommandError::WrongArity("ping".to_string())),
    }
}

/// ECHO message
fn echo<K: Keyspace>(_: &mut K, args: &[Bytes]) -> CommandResult {
    Ok(Reply::bulk(args[1].clone()))
}

/// DBSIZE
fn dbsize<K: Keyspace>(db: &mut K, _: &[Bytes]) -> CommandResult {
    Ok(Reply::integer(db.len() as i64))
}

/// FLUSHDB
fn flushdb<K: Keyspace>(db: &mut K, _: &[Bytes]) -> CommandResult {
    db.flush();
    Ok(Reply::ok())
}
