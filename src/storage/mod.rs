//! Storage Module
//!
//! Data structures that hold the keyspace, from the lowest layer up:
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     Keyspace (trait)                        │
//! │        ConcurrentDb                     CacheDb             │
//! │   ┌────────────────────┐      ┌──────────────────────────┐  │
//! │   │ ConcurrentDict x 2 │      │ Box<dyn Cache> (LRU/LFU) │  │
//! │   └────────────────────┘      └──────────────────────────┘  │
//! └─────────────────────────────────────────────────────────────┘
//!                            │
//!                            ▼
//!               Value: Str | List | SortedSet
//!                                      │
//!                                      ▼
//!                           HashMap + SkipList
//! ```
//!
//! ## Example
//!
//! ```
//! use ferrokv::storage::{ConcurrentDb, Keyspace, Value};
//! use bytes::Bytes;
//!
//! let mut db = ConcurrentDb::new(16);
//! db.put(Bytes::from("name"), Value::Str(Bytes::from("ferro")));
//!
//! let len = db.view(&Bytes::from("name"), |v| match v {
//!     Value::Str(s) => s.len(),
//!     _ => 0,
//! });
//! assert_eq!(len, Some(5));
//! ```

pub mod dict;
pub mod glob;
pub mod keyspace;
pub mod skiplist;
pub mod sorted_set;
pub mod value;

pub use dict::{ConcurrentDict, DEFAULT_SHARD_COUNT};
pub use glob::GlobPattern;
pub use keyspace::{CacheDb, ConcurrentDb, KeyTtl, Keyspace, PutMode};
pub use skiplist::{Border, Element, SkipList};
pub use sorted_set::SortedSet;
pub use value::Value;
