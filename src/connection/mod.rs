//! Connection Handling Module
//!
//! This module manages individual client connections. Each client runs on
//! its own async task, so the server can serve thousands of clients at once.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     TCP Listener                            │
//! │                    (server.rs)                              │
//! └──────────────────────┬──────────────────────────────────────┘
//!                        │ accept()
//!                        ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 ConnectionHandler                           │
//! │                                                             │
//! │  ┌─────────────┐    ┌─────────────┐    ┌─────────────┐      │
//! │  │  Decoder    │───>│ Store::exec │───>│ Connection  │      │
//! │  │ (read half) │    │             │    │ (write half)│      │
//! │  └─────────────┘    └─────────────┘    └─────────────┘      │
//! │         ▲                                     ▲             │
//! │         └──────── BufferPools (RAII) ─────────┘             │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Features
//!
//! - **Pipelining**: several requests in one TCP packet are answered in order
//! - **Pooled buffers**: read and write buffers return to a shared pool
//! - **Graceful close**: in-flight writes drain before the stream shuts down
//! - **Statistics**: connection and command counters

pub mod conn;
pub mod handler;
pub mod pool;

pub use conn::{Connection, DEFAULT_DRAIN_TIMEOUT};
pub use handler::{
    handle_connection, ConnectionContext, ConnectionError, ConnectionHandler, ConnectionStats,
};
pub use pool::{BufferPools, Pool, Pooled, Reusable};
