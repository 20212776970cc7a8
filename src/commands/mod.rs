//! Command Table and Handlers
//!
//! Commands are plain functions registered by name in a [`CommandTable`]
//! built once at startup. The table is generic over the [`Keyspace`] it
//! runs against, so the same handlers serve both store strategies.
//!
//! ## Architecture
//!
//! ```text
//! Client Request
//!       │
//!       ▼
//! ┌─────────────────┐
//! │     Decoder     │  (protocol module)
//! └────────┬────────┘
//!          │ Command
//!          ▼
//! ┌─────────────────┐
//! │  CommandTable   │  (this module)
//! │                 │
//! │  - lookup name  │
//! │  - check arity  │
//! │  - run handler  │
//! └────────┬────────┘
//!          │ &mut K: Keyspace
//!          ▼
//! ┌─────────────────┐
//! │  ConcurrentDb   │  or  CacheDb
//! └─────────────────┘
//! ```
//!
//! ## Supported Commands
//!
//! ### Server
//! - `PING`, `ECHO`, `DBSIZE`, `FLUSHDB`
//!
//! ### Strings
//! - `SET`, `GET`, `SETNX`, `MSET`, `STRLEN`
//! - `INCR`, `INCRBY`, `DECR`, `DECRBY`
//!
//! ### Keys
//! - `DEL`, `EXISTS`, `TYPE`, `KEYS`, `RANDOMKEY`
//! - `EXPIRE`, `PEXPIRE`, `EXPIREAT`, `TTL`, `PTTL`, `PERSIST`
//!
//! ### Lists
//! - `LPUSH`, `RPUSH`, `LPOP`, `RPOP`, `LLEN`, `LINDEX`, `LRANGE`
//!
//! ### Sorted Sets
//! - `ZADD`, `ZSCORE`, `ZCARD`, `ZRANK`, `ZREVRANK`, `ZRANGE`, `ZREVRANGE`
//! - `ZRANGEBYSCORE`, `ZCOUNT`, `ZREM`, `ZREMRANGEBYSCORE`, `ZREMRANGEBYRANK`
//!
//! `SAVE` and the transaction commands are answered by the store itself.

pub mod key;
pub mod list;
pub mod server;
pub mod string;
pub mod zset;

use crate::protocol::{Command, Reply};
use crate::storage::skiplist::Border;
use crate::storage::Keyspace;
use bytes::Bytes;
use std::collections::HashMap;
use thiserror::Error;

/// Errors a command can answer with. Each renders as an error reply whose
/// first word is the category (`ERR`, `WRONGTYPE`).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    #[error("ERR unknown command '{0}'")]
    UnknownCommand(String),

    #[error("ERR wrong number of arguments for '{0}' command")]
    WrongArity(String),

    #[error("WRONGTYPE Operation against a key holding the wrong kind of value")]
    WrongType,

    #[error("ERR value is not an integer or out of range")]
    NotInteger,

    #[error("ERR value is not a valid float")]
    NotFloat,

    #[error("ERR min or max is not a float")]
    InvalidBorder,

    #[error("ERR increment or decrement would overflow")]
    Overflow,

    #[error("ERR invalid expire time in '{0}' command")]
    InvalidExpireTime(&'static str),

    #[error("ERR syntax error")]
    Syntax,
}

impl From<CommandError> for Reply {
    fn from(e: CommandError) -> Self {
        Reply::Error(e.to_string())
    }
}

/// What every handler returns.
pub type CommandResult = Result<Reply, CommandError>;

/// A command implementation. `args[0]` is the command name.
pub type Handler<K> = fn(&mut K, &[Bytes]) -> CommandResult;

/// A registered command.
pub struct CommandSpec<K> {
    pub name: &'static str,

    /// Redis-style arity: positive means exactly that many arguments
    /// (name included), negative means at least `-arity`.
    pub arity: i32,

    pub handler: Handler<K>,
}

impl<K> CommandSpec<K> {
    fn accepts(&self, argc: usize) -> bool {
        let argc = argc as i64;
        let arity = self.arity as i64;
        if arity >= 0 {
            argc == arity
        } else {
            argc >= -arity
        }
    }
}

/// Maps lowercase command names to their handlers.
pub struct CommandTable<K> {
    commands: HashMap<&'static str, CommandSpec<K>>,
}

impl<K> std::fmt::Debug for CommandTable<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandTable")
            .field("commands", &self.commands.len())
            .finish()
    }
}

impl<K: Keyspace> Default for CommandTable<K> {
    fn default() -> Self {
        Self::with_builtins()
    }
}

impl<K: Keyspace> CommandTable<K> {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self {
            commands: HashMap::new(),
        }
    }

    /// Creates a table holding every built-in command.
    pub fn with_builtins() -> Self {
        let mut table = Self::new();
        server::register(&mut table);
        string::register(&mut table);
        key::register(&mut table);
        list::register(&mut table);
        zset::register(&mut table);
        table
    }

    /// Registers a command under a lowercase `name`, replacing any
    /// previous registration.
    pub fn register(&mut self, name: &'static str, arity: i32, handler: Handler<K>) {
        self.commands.insert(
            name,
            CommandSpec {
                name,
                arity,
                handler,
            },
        );
    }

    pub fn lookup(&self, name: &str) -> Option<&CommandSpec<K>> {
        self.commands.get(name)
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Resolves, validates and runs a command.
    pub fn dispatch(&self, db: &mut K, command: &Command) -> Reply {
        let spec = match self.lookup(command.name()) {
            Some(spec) => spec,
            None => return CommandError::UnknownCommand(command.name().to_string()).into(),
        };

        if !spec.accepts(command.args().len()) {
            return CommandError::WrongArity(spec.name.to_string()).into();
        }

        match (spec.handler)(db, command.args()) {
            Ok(reply) => reply,
            Err(e) => e.into(),
        }
    }
}

// ============================================================================
// Argument helpers
// ============================================================================

pub(crate) fn parse_i64(arg: &[u8]) -> Result<i64, CommandError> {
    std::str::from_utf8(arg)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or(CommandError::NotInteger)
}

pub(crate) fn parse_f64(arg: &[u8]) -> Result<f64, CommandError> {
    let s = std::str::from_utf8(arg).map_err(|_| CommandError::NotFloat)?;
    let value: f64 = match s.to_ascii_lowercase().as_str() {
        "+inf" | "inf" => f64::INFINITY,
        "-inf" => f64::NEG_INFINITY,
        other => other.parse().map_err(|_| CommandError::NotFloat)?,
    };
    if value.is_nan() {
        return Err(CommandError::NotFloat);
    }
    Ok(value)
}

pub(crate) fn parse_border(arg: &[u8]) -> Result<Border, CommandError> {
    std::str::from_utf8(arg)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or(CommandError::InvalidBorder)
}

/// Case-insensitive comparison of an option argument.
pub(crate) fn is_option(arg: &[u8], name: &str) -> bool {
    arg.eq_ignore_ascii_case(name.as_bytes())
}

/// Resolves Redis-style inclusive `start..=stop` indexes (negative counts
/// from the end) against a sequence of `len` items.
///
/// Returns `None` when the range selects nothing.
pub(crate) fn normalize_range(start: i64, stop: i64, len: usize) -> Option<(usize, usize)> {
    let len = len as i64;
    let start = if start < 0 { (len + start).max(0) } else { start };
    let stop = if stop < 0 { len + stop } else { stop.min(len - 1) };
    if start > stop || start >= len {
        return None;
    }
    Some((start as usize, stop as usize))
}

/// Formats a score the way clients expect (`3`, `1.5`, `inf`).
pub(crate) fn format_score(score: f64) -> Bytes {
    if score.is_infinite() {
        return Bytes::from_static(if score > 0.0 { b"inf" } else { b"-inf" });
    }
    Bytes::from(score.to_string())
}
