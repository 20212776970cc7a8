//! Sorted set commands.
//!
//! Members are stored as UTF-8 strings; arguments that are not valid UTF-8
//! are converted lossily. Score ranges use the [`Border`] syntax:
//! `1.5` (inclusive), `(1.5` (exclusive), `-inf`, `+inf`.
//!
//! [`Border`]: crate::storage::Border

use super::{
    format_score, is_option, normalize_range, parse_border, parse_f64, parse_i64, CommandError,
    CommandResult, CommandTable,
};
use crate::protocol::Reply;
use crate::storage::{Border, Element, Keyspace, SortedSet, Value};
use bytes::Bytes;

pub fn register<K: Keyspace>(table: &mut CommandTable<K>) {
    table.register("zadd", -4, zadd::<K>);
    table.register("zscore", 3, zscore::<K>);
    table.register("zcard", 2, zcard::<K>);
    table.register("zrank", 3, zrank::<K>);
    table.register("zrevrank", 3, zrevrank::<K>);
    table.register("zrange", -4, zrange::<K>);
    table.register("zrevrange", -4, zrevrange::<K>);
    table.register("zrangebyscore", -4, zrangebyscore::<K>);
    table.register("zcount", 4, zcount::<K>);
    table.register("zrem", -3, zrem::<K>);
    table.register("zremrangebyscore", 4, zremrangebyscore::<K>);
    table.register("zremrangebyrank", 4, zremrangebyrank::<K>);
}

fn member(arg: &Bytes) -> String {
    String::from_utf8_lossy(arg).into_owned()
}

/// Runs `f` on the sorted set at `key`; `Ok(None)` if the key is missing.
fn with_zset<K: Keyspace, R>(
    db: &mut K,
    key: &Bytes,
    f: impl FnOnce(&SortedSet) -> R,
) -> Result<Option<R>, CommandError> {
    db.view(key, |v| match v {
        Value::SortedSet(set) => Ok(f(set)),
        _ => Err(CommandError::WrongType),
    })
    .transpose()
}

/// Mutates the sorted set at `key`; `Ok(None)` if the key is missing.
fn update_zset<K: Keyspace, R>(
    db: &mut K,
    key: &Bytes,
    f: impl FnOnce(&mut SortedSet) -> R,
) -> Result<Option<R>, CommandError> {
    db.update(key, |v| match v {
        Value::SortedSet(set) => Ok(f(set)),
        _ => Err(CommandError::WrongType),
    })
    .transpose()
}

fn elements_reply(elements: Vec<Element>, with_scores: bool) -> Reply {
    let mut items = Vec::with_capacity(elements.len() * if with_scores { 2 } else { 1 });
    for e in elements {
        let score = e.score;
        items.push(Bytes::from(e.member));
        if with_scores {
            items.push(format_score(score));
        }
    }
    Reply::array(items)
}

/// ZADD key score member [score member ...]
fn zadd<K: Keyspace>(db: &mut K, args: &[Bytes]) -> CommandResult {
    if (args.len() - 2) % 2 != 0 {
        return Err(CommandError::Syntax);
    }
    let pairs = args[2..]
        .chunks_exact(2)
        .map(|pair| Ok((parse_f64(&pair[0])?, member(&pair[1]))))
        .collect::<Result<Vec<_>, CommandError>>()?;

    let added = db.upsert(
        &args[1],
        || Value::SortedSet(SortedSet::new()),
        |v| match v {
            Value::SortedSet(set) => Ok(pairs
                .into_iter()
                .filter(|(score, member)| set.add(member.clone(), *score))
                .count()),
            _ => Err(CommandError::WrongType),
        },
    )?;

    Ok(Reply::integer(added as i64))
}

/// ZSCORE key member
fn zscore<K: Keyspace>(db: &mut K, args: &[Bytes]) -> CommandResult {
    let name = member(&args[2]);
    let score = with_zset(db, &args[1], |set| set.score(&name))?.flatten();
    Ok(match score {
        Some(score) => Reply::bulk(format_score(score)),
        None => Reply::null_bulk(),
    })
}

/// ZCARD key
fn zcard<K: Keyspace>(db: &mut K, args: &[Bytes]) -> CommandResult {
    let len = with_zset(db, &args[1], |set| set.len())?.unwrap_or(0);
    Ok(Reply::integer(len as i64))
}

/// ZRANK key member
fn zrank<K: Keyspace>(db: &mut K, args: &[Bytes]) -> CommandResult {
    rank(db, args, false)
}

/// ZREVRANK key member
fn zrevrank<K: Keyspace>(db: &mut K, args: &[Bytes]) -> CommandResult {
    rank(db, args, true)
}

fn rank<K: Keyspace>(db: &mut K, args: &[Bytes], desc: bool) -> CommandResult {
    let name = member(&args[2]);
    let rank = with_zset(db, &args[1], |set| set.rank(&name, desc))?.flatten();
    Ok(match rank {
        Some(rank) => Reply::integer(rank as i64),
        None => Reply::null_bulk(),
    })
}

/// ZRANGE key start stop [WITHSCORES]
fn zrange<K: Keyspace>(db: &mut K, args: &[Bytes]) -> CommandResult {
    range_by_rank(db, args, false)
}

/// ZREVRANGE key start stop [WITHSCORES]
fn zrevrange<K: Keyspace>(db: &mut K, args: &[Bytes]) -> CommandResult {
    range_by_rank(db, args, true)
}

fn range_by_rank<K: Keyspace>(db: &mut K, args: &[Bytes], desc: bool) -> CommandResult {
    let start = parse_i64(&args[2])?;
    let stop = parse_i64(&args[3])?;
    let with_scores = match &args[4..] {
        [] => false,
        [opt] if is_option(opt, "withscores") => true,
        _ => return Err(CommandError::Syntax),
    };

    let elements = with_zset(db, &args[1], |set| {
        match normalize_range(start, stop, set.len()) {
            Some((start, stop)) => set.range_by_rank(start, stop, desc),
            None => Vec::new(),
        }
    })?
    .unwrap_or_default();

    Ok(elements_reply(elements, with_scores))
}

/// ZRANGEBYSCORE key min max [WITHSCORES] [LIMIT offset count]
///
/// A negative `count` means no limit; a negative `offset` selects nothing.
fn zrangebyscore<K: Keyspace>(db: &mut K, args: &[Bytes]) -> CommandResult {
    let min = parse_border(&args[2])?;
    let max = parse_border(&args[3])?;

    let mut with_scores = false;
    let mut offset: i64 = 0;
    let mut limit: Option<usize> = None;

    let mut i = 4;
    while i < args.len() {
        if is_option(&args[i], "withscores") {
            with_scores = true;
            i += 1;
        } else if is_option(&args[i], "limit") && i + 2 < args.len() {
            offset = parse_i64(&args[i + 1])?;
            let count = parse_i64(&args[i + 2])?;
            limit = usize::try_from(count).ok();
            i += 3;
        } else {
            return Err(CommandError::Syntax);
        }
    }

    if offset < 0 || Border::is_empty_range(&min, &max) {
        return Ok(Reply::empty_array());
    }

    let elements = with_zset(db, &args[1], |set| {
        set.range_by_score(&min, &max, offset as usize, limit, false)
    })?
    .unwrap_or_default();

    Ok(elements_reply(elements, with_scores))
}

/// ZCOUNT key min max
fn zcount<K: Keyspace>(db: &mut K, args: &[Bytes]) -> CommandResult {
    let min = parse_border(&args[2])?;
    let max = parse_border(&args[3])?;
    if Border::is_empty_range(&min, &max) {
        return Ok(Reply::integer(0));
    }
    let count = with_zset(db, &args[1], |set| set.count(&min, &max))?.unwrap_or(0);
    Ok(Reply::integer(count as i64))
}

/// ZREM key member [member ...]
fn zrem<K: Keyspace>(db: &mut K, args: &[Bytes]) -> CommandResult {
    let removed = update_zset(db, &args[1], |set| {
        args[2..]
            .iter()
            .filter(|arg| set.remove(&member(arg)))
            .count()
    })?
    .unwrap_or(0);

    Ok(Reply::integer(removed as i64))
}

/// ZREMRANGEBYSCORE key min max
fn zremrangebyscore<K: Keyspace>(db: &mut K, args: &[Bytes]) -> CommandResult {
    let min = parse_border(&args[2])?;
    let max = parse_border(&args[3])?;
    if Border::is_empty_range(&min, &max) {
        return Ok(Reply::integer(0));
    }
    let removed = update_zset(db, &args[1], |set| set.remove_range_by_score(&min, &max))?
        .unwrap_or(0);
    Ok(Reply::integer(removed as i64))
}

/// ZREMRANGEBYRANK key start stop
fn zremrangebyrank<K: Keyspace>(db: &mut K, args: &[Bytes]) -> CommandResult {
    let start = parse_i64(&args[2])?;
    let stop = parse_i64(&args[3])?;
    let removed = update_zset(db, &args[1], |set| {
        match normalize_range(start, stop, set.len()) {
            Some((start, stop)) => set.remove_range_by_rank(start, stop),
            None => 0,
        }
    })?
    .unwrap_or(0);
    Ok(Reply::integer(removed as i64))
}
