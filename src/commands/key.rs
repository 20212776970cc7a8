//! Generic key commands: deletion, inspection and expiration.
//!
//! Expiration times are kept as monotonic deadlines. `EXPIREAT` converts its
//! wall-clock argument once, at the time the command runs.

use super::{parse_i64, CommandError, CommandResult, CommandTable};
use crate::protocol::Reply;
use crate::storage::{GlobPattern, KeyTtl, Keyspace};
use bytes::Bytes;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

pub fn register<K: Keyspace>(table: &mut CommandTable<K>) {
    table.register("del", -2, del::<K>);
    table.register("exists", -2, exists::<K>);
    table.register("type", 2, key_type::<K>);
    table.register("keys", 2, keys::<K>);
    table.register("randomkey", 1, randomkey::<K>);
    table.register("expire", 3, expire::<K>);
    table.register("pexpire", 3, pexpire::<K>);
    table.register("expireat", 3, expireat::<K>);
    table.register("ttl", 2, ttl::<K>);
    table.register("pttl", 2, pttl::<K>);
    table.register("persist", 2, persist::<K>);
}

/// DEL key [key ...]
fn del<K: Keyspace>(db: &mut K, args: &[Bytes]) -> CommandResult {
    let removed = args[1..].iter().filter(|key| db.remove(key)).count();
    Ok(Reply::integer(removed as i64))
}

/// EXISTS key [key ...]
///
/// A key named more than once is counted each time.
fn exists<K: Keyspace>(db: &mut K, args: &[Bytes]) -> CommandResult {
    let found = args[1..].iter().filter(|key| db.exists(key)).count();
    Ok(Reply::integer(found as i64))
}

/// TYPE key
fn key_type<K: Keyspace>(db: &mut K, args: &[Bytes]) -> CommandResult {
    let name = db.view(&args[1], |v| v.type_name()).unwrap_or("none");
    Ok(Reply::status(name))
}

/// KEYS pattern
fn keys<K: Keyspace>(db: &mut K, args: &[Bytes]) -> CommandResult {
    let pattern = GlobPattern::new(&args[1]);
    let mut keys = db.keys();
    if !pattern.matches_all() {
        keys.retain(|key| pattern.matches(key));
    }
    Ok(Reply::array(keys))
}

/// RANDOMKEY
fn randomkey<K: Keyspace>(db: &mut K, _: &[Bytes]) -> CommandResult {
    Ok(match db.random_key() {
        Some(key) => Reply::bulk(key),
        None => Reply::null_bulk(),
    })
}

/// EXPIRE key seconds
fn expire<K: Keyspace>(db: &mut K, args: &[Bytes]) -> CommandResult {
    let secs = parse_i64(&args[2])?;
    expire_in(db, &args[1], secs.saturating_mul(1000), "expire")
}

/// PEXPIRE key milliseconds
fn pexpire<K: Keyspace>(db: &mut K, args: &[Bytes]) -> CommandResult {
    let millis = parse_i64(&args[2])?;
    expire_in(db, &args[1], millis, "pexpire")
}

/// EXPIREAT key unix-seconds
fn expireat<K: Keyspace>(db: &mut K, args: &[Bytes]) -> CommandResult {
    let at_secs = parse_i64(&args[2])?;
    let now_ms = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0);
    expire_in(
        db,
        &args[1],
        at_secs.saturating_mul(1000).saturating_sub(now_ms),
        "expireat",
    )
}

/// Sets a deadline `millis` from now. A deadline that is already due
/// removes the key at once.
fn expire_in<K: Keyspace>(
    db: &mut K,
    key: &Bytes,
    millis: i64,
    command: &'static str,
) -> CommandResult {
    if millis <= 0 {
        return Ok(Reply::integer(db.remove(key) as i64));
    }
    let at = Instant::now()
        .checked_add(Duration::from_millis(millis as u64))
        .ok_or(CommandError::InvalidExpireTime(command))?;
    Ok(Reply::integer(db.expire_at(key, at) as i64))
}

/// TTL key
fn ttl<K: Keyspace>(db: &mut K, args: &[Bytes]) -> CommandResult {
    Ok(Reply::integer(remaining(db, &args[1], |d| d.as_secs() as i64)))
}

/// PTTL key
fn pttl<K: Keyspace>(db: &mut K, args: &[Bytes]) -> CommandResult {
    Ok(Reply::integer(remaining(db, &args[1], |d| d.as_millis() as i64)))
}

/// -2 for a missing key, -1 for a key without a deadline, otherwise the
/// time left converted by `unit`.
fn remaining<K: Keyspace>(db: &mut K, key: &Bytes, unit: fn(Duration) -> i64) -> i64 {
    match db.ttl(key) {
        KeyTtl::Missing => -2,
        KeyTtl::Persistent => -1,
        KeyTtl::ExpiresAt(at) => unit(at.saturating_duration_since(Instant::now())),
    }
}

/// PERSIST key
fn persist<K: Keyspace>(db: &mut K, args: &[Bytes]) -> CommandResult {
    Ok(Reply::integer(db.persist(&args[1]) as i64))
}
