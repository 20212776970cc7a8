//! # Ferrokv - An In-Memory, Redis-Compatible Key-Value Store
//!
//! Ferrokv speaks the RESP wire protocol and serves strings, lists and
//! sorted sets with per-key expiry. Commands run under one of two
//! execution strategies, chosen at startup.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                              Ferrokv                                    │
//! │                                                                         │
//! │  ┌─────────────┐    ┌─────────────┐    ┌─────────────┐                  │
//! │  │ TCP Server  │───>│ Connection  │───>│   Store     │                  │
//! │  │ (Listener)  │    │  Handler    │    │ (strategy)  │                  │
//! │  └─────────────┘    └──────┬──────┘    └──────┬──────┘                  │
//! │                            │                  │                         │
//! │                     ┌──────▼──────┐    ┌──────▼──────────────────────┐  │
//! │                     │ RESP codec  │    │  CommandTable handlers      │  │
//! │                     └─────────────┘    └──────┬──────────────────────┘  │
//! │                                               │                         │
//! │                      ┌────────────────────────┴──────────────┐          │
//! │                      ▼                                       ▼          │
//! │  ┌──────────────────────────────────┐   ┌──────────────────────────┐    │
//! │  │ ConcurrentDb                     │   │ CacheDb                  │    │
//! │  │ sharded dict, value + deadline   │   │ LRU / LFU, one worker    │    │
//! │  └──────────────────────────────────┘   └──────────────────────────┘    │
//! │                                                                         │
//! │  Persister: snapshot loaded at startup, written on SAVE and on close    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```no_run
//! use ferrokv::config::Config;
//!
//! #[tokio::main]
//! async fn main() -> std::io::Result<()> {
//!     let config = Config::default();
//!     ferrokv::server::run(config, async {
//!         let _ = tokio::signal::ctrl_c().await;
//!     })
//!     .await
//! }
//! ```
//!
//! ## Supported Commands
//!
//! ### String Commands
//! - `SET key value [EX seconds] [PX milliseconds] [NX|XX]`
//! - `GET key` / `SETNX key value` / `STRLEN key`
//! - `MSET key value [key value ...]`
//! - `INCR key` / `INCRBY key increment` / `DECR key` / `DECRBY key decrement`
//!
//! ### Key Commands
//! - `DEL key [key ...]` / `EXISTS key [key ...]` / `TYPE key`
//! - `EXPIRE key seconds` / `PEXPIRE key milliseconds` / `EXPIREAT key timestamp`
//! - `TTL key` / `PTTL key` / `PERSIST key`
//! - `KEYS pattern` / `RANDOMKEY`
//!
//! ### List Commands
//! - `LPUSH` / `RPUSH` / `LPOP` / `RPOP` / `LLEN` / `LINDEX` / `LRANGE`
//!
//! ### Sorted Set Commands
//! - `ZADD` / `ZSCORE` / `ZCARD` / `ZRANK` / `ZREVRANK`
//! - `ZRANGE` / `ZREVRANGE` / `ZRANGEBYSCORE` / `ZCOUNT`
//! - `ZREM` / `ZREMRANGEBYSCORE` / `ZREMRANGEBYRANK`
//!
//! ### Server Commands
//! - `PING [message]` / `ECHO message` / `DBSIZE` / `FLUSHDB` / `SAVE`
//!
//! ## Module Overview
//!
//! - [`protocol`]: RESP parser, decoder and reply types
//! - [`storage`]: sharded dictionary, skip list, sorted set and keyspaces
//! - [`cache`]: LRU and LFU caches with TTL
//! - [`commands`]: the command table and its handlers
//! - [`database`]: the concurrent and serialized execution strategies
//! - [`persistence`]: snapshots and the snapshot file
//! - [`connection`]: per-client handling, buffer pools, graceful close
//! - [`server`]: accept loop and shutdown
//! - [`config`]: command-line configuration
//!
//! ## Expiry
//!
//! Expired keys are removed lazily, when a command next touches them.
//! There is no background sweeper.

pub mod cache;
pub mod commands;
pub mod config;
pub mod connection;
pub mod database;
pub mod persistence;
pub mod protocol;
pub mod server;
pub mod storage;

// Re-export commonly used types for convenience
pub use commands::{CommandError, CommandTable};
pub use config::Config;
pub use connection::{handle_connection, ConnectionStats};
pub use database::{ConcurrentStore, SerializedStore, Store};
pub use protocol::{Command, ProtocolError, Reply, RespParser};

/// The default port Ferrokv listens on (same as Redis)
pub const DEFAULT_PORT: u16 = 6379;

/// The default host Ferrokv binds to
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Version of Ferrokv
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
