//! List commands.
//!
//! Lists are `VecDeque`s, so pushes and pops at either end are O(1). A list
//! emptied by a pop is deleted together with its key.

use super::{normalize_range, parse_i64, CommandError, CommandResult, CommandTable};
use crate::protocol::Reply;
use crate::storage::{Keyspace, Value};
use bytes::Bytes;
use std::collections::VecDeque;

pub fn register<K: Keyspace>(table: &mut CommandTable<K>) {
    table.register("lpush", -3, lpush::<K>);
    table.register("rpush", -3, rpush::<K>);
    table.register("lpop", 2, lpop::<K>);
    table.register("rpop", 2, rpop::<K>);
    table.register("llen", 2, llen::<K>);
    table.register("lindex", 3, lindex::<K>);
    table.register("lrange", 4, lrange::<K>);
}

#[derive(Debug, Clone, Copy)]
enum End {
    Left,
    Right,
}

/// LPUSH key element [element ...]
fn lpush<K: Keyspace>(db: &mut K, args: &[Bytes]) -> CommandResult {
    push(db, args, End::Left)
}

/// RPUSH key element [element ...]
fn rpush<K: Keyspace>(db: &mut K, args: &[Bytes]) -> CommandResult {
    push(db, args, End::Right)
}

fn push<K: Keyspace>(db: &mut K, args: &[Bytes], end: End) -> CommandResult {
    let len = db.upsert(
        &args[1],
        || Value::List(VecDeque::new()),
        |v| match v {
            Value::List(list) => {
                for item in &args[2..] {
                    match end {
                        End::Left => list.push_front(item.clone()),
                        End::Right => list.push_back(item.clone()),
                    }
                }
                Ok(list.len())
            }
            _ => Err(CommandError::WrongType),
        },
    )?;

    Ok(Reply::integer(len as i64))
}

/// LPOP key
fn lpop<K: Keyspace>(db: &mut K, args: &[Bytes]) -> CommandResult {
    pop(db, &args[1], End::Left)
}

/// RPOP key
fn rpop<K: Keyspace>(db: &mut K, args: &[Bytes]) -> CommandResult {
    pop(db, &args[1], End::Right)
}

fn pop<K: Keyspace>(db: &mut K, key: &Bytes, end: End) -> CommandResult {
    let popped = db
        .update(key, |v| match v {
            Value::List(list) => Ok(match end {
                End::Left => list.pop_front(),
                End::Right => list.pop_back(),
            }),
            _ => Err(CommandError::WrongType),
        })
        .transpose()?
        .flatten();

    Ok(match popped {
        Some(item) => Reply::bulk(item),
        None => Reply::null_bulk(),
    })
}

/// LLEN key
fn llen<K: Keyspace>(db: &mut K, args: &[Bytes]) -> CommandResult {
    let len = with_list(db, &args[1], |list| list.len())?.unwrap_or(0);
    Ok(Reply::integer(len as i64))
}

/// LINDEX key index
fn lindex<K: Keyspace>(db: &mut K, args: &[Bytes]) -> CommandResult {
    let index = parse_i64(&args[2])?;
    let item = with_list(db, &args[1], |list| {
        let len = list.len() as i64;
        let index = if index < 0 { len + index } else { index };
        if index < 0 || index >= len {
            return None;
        }
        list.get(index as usize).cloned()
    })?
    .flatten();

    Ok(match item {
        Some(item) => Reply::bulk(item),
        None => Reply::null_bulk(),
    })
}

/// LRANGE key start stop
fn lrange<K: Keyspace>(db: &mut K, args: &[Bytes]) -> CommandResult {
    let start = parse_i64(&args[2])?;
    let stop = parse_i64(&args[3])?;
    let items = with_list(db, &args[1], |list| {
        match normalize_range(start, stop, list.len()) {
            Some((start, stop)) => list.range(start..=stop).cloned().collect(),
            None => Vec::new(),
        }
    })?
    .unwrap_or_default();

    Ok(Reply::array(items))
}

/// Runs `f` on the list at `key`; `Ok(None)` if the key is missing.
fn with_list<K: Keyspace, R>(
    db: &mut K,
    key: &Bytes,
    f: impl FnOnce(&VecDeque<Bytes>) -> R,
) -> Result<Option<R>, CommandError> {
    db.view(key, |v| match v {
        Value::List(list) => Ok(f(list)),
        _ => Err(CommandError::WrongType),
    })
    .transpose()
}
