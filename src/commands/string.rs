//! String commands.
//!
//! `SET` accepts the usual modifiers:
//!
//! | Option | Meaning                                |
//! |--------|----------------------------------------|
//! | EX s   | expire after `s` seconds               |
//! | PX ms  | expire after `ms` milliseconds         |
//! | NX     | only set if the key does not exist     |
//! | XX     | only set if the key already exists     |
//!
//! A `SET` that is skipped because of `NX`/`XX` answers a null bulk string.

use super::{is_option, parse_i64, CommandError, CommandResult, CommandTable};
use crate::protocol::Reply;
use crate::storage::{Keyspace, PutMode, Value};
use bytes::Bytes;
use std::time::{Duration, Instant};

pub fn register<K: Keyspace>(table: &mut CommandTable<K>) {
    table.register("set", -3, set::<K>);
    table.register("get", 2, get::<K>);
    table.register("setnx", 3, setnx::<K>);
    table.register("mset", -3, mset::<K>);
    table.register("strlen", 2, strlen::<K>);
    table.register("incr", 2, incr::<K>);
    table.register("incrby", 3, incrby::<K>);
    table.register("decr", 2, decr::<K>);
    table.register("decrby", 3, decrby::<K>);
}

/// SET key value [EX seconds | PX milliseconds] [NX | XX]
fn set<K: Keyspace>(db: &mut K, args: &[Bytes]) -> CommandResult {
    let key = args[1].clone();
    let value = args[2].clone();

    let mut mode = PutMode::Always;
    let mut ttl: Option<Duration> = None;

    let mut i = 3;
    while i < args.len() {
        let opt = &args[i];
        if is_option(opt, "nx") || is_option(opt, "xx") {
            let wanted = if is_option(opt, "nx") {
                PutMode::IfAbsent
            } else {
                PutMode::IfExists
            };
            if mode != PutMode::Always && mode != wanted {
                return Err(CommandError::Syntax);
            }
            mode = wanted;
            i += 1;
        } else if is_option(opt, "ex") || is_option(opt, "px") {
            if ttl.is_some() {
                return Err(CommandError::Syntax);
            }
            let amount = args.get(i + 1).ok_or(CommandError::Syntax)?;
            let amount = parse_i64(amount)?;
            if amount <= 0 {
                return Err(CommandError::InvalidExpireTime("set"));
            }
            ttl = Some(if is_option(opt, "ex") {
                Duration::from_secs(amount as u64)
            } else {
                Duration::from_millis(amount as u64)
            });
            i += 2;
        } else {
            return Err(CommandError::Syntax);
        }
    }

    let expires_at = match ttl {
        Some(ttl) => Some(
            Instant::now()
                .checked_add(ttl)
                .ok_or(CommandError::InvalidExpireTime("set"))?,
        ),
        None => None,
    };

    match db.put_with(key, Value::Str(value), mode, expires_at) {
        Some(_) => Ok(Reply::ok()),
        None => Ok(Reply::null_bulk()),
    }
}

/// GET key
fn get<K: Keyspace>(db: &mut K, args: &[Bytes]) -> CommandResult {
    let value = db
        .view(&args[1], |v| match v {
            Value::Str(s) => Ok(s.clone()),
            _ => Err(CommandError::WrongType),
        })
        .transpose()?;

    Ok(match value {
        Some(v) => Reply::bulk(v),
        None => Reply::null_bulk(),
    })
}

/// SETNX key value
fn setnx<K: Keyspace>(db: &mut K, args: &[Bytes]) -> CommandResult {
    let written = db.put_if_absent(args[1].clone(), Value::Str(args[2].clone()));
    Ok(Reply::integer(written as i64))
}

/// MSET key value [key value ...]
fn mset<K: Keyspace>(db: &mut K, args: &[Bytes]) -> CommandResult {
    if (args.len() - 1) % 2 != 0 {
        return Err(CommandError::WrongArity("mset".to_string()));
    }
    for pair in args[1..].chunks_exact(2) {
        db.put(pair[0].clone(), Value::Str(pair[1].clone()));
    }
    Ok(Reply::ok())
}

/// STRLEN key
fn strlen<K: Keyspace>(db: &mut K, args: &[Bytes]) -> CommandResult {
    let len = db
        .view(&args[1], |v| match v {
            Value::Str(s) => Ok(s.len()),
            _ => Err(CommandError::WrongType),
        })
        .transpose()?
        .unwrap_or(0);

    Ok(Reply::integer(len as i64))
}

/// INCR key
fn incr<K: Keyspace>(db: &mut K, args: &[Bytes]) -> CommandResult {
    incr_by(db, &args[1], 1)
}

/// INCRBY key increment
fn incrby<K: Keyspace>(db: &mut K, args: &[Bytes]) -> CommandResult {
    let delta = parse_i64(&args[2])?;
    incr_by(db, &args[1], delta)
}

/// DECR key
fn decr<K: Keyspace>(db: &mut K, args: &[Bytes]) -> CommandResult {
    incr_by(db, &args[1], -1)
}

/// DECRBY key decrement
fn decrby<K: Keyspace>(db: &mut K, args: &[Bytes]) -> CommandResult {
    let delta = parse_i64(&args[2])?;
    let delta = delta.checked_neg().ok_or(CommandError::Overflow)?;
    incr_by(db, &args[1], delta)
}

/// Adds `delta` to the integer stored at `key`, treating a missing key as 0.
/// The deadline of an existing key is kept.
fn incr_by<K: Keyspace>(db: &mut K, key: &Bytes, delta: i64) -> CommandResult {
    let result = db.upsert(
        key,
        || Value::Str(Bytes::from_static(b"0")),
        |v| match v {
            Value::Str(s) => {
                let current = parse_i64(s)?;
                let next = current.checked_add(delta).ok_or(CommandError::Overflow)?;
                *s = Bytes::from(next.to_string());
                Ok(next)
            }
            _ => Err(CommandError::WrongType),
        },
    )?;

    Ok(Reply::integer(result))
}
