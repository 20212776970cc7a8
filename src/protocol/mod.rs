//! RESP Protocol Implementation
//!
//! This module implements the Redis Serialization Protocol (RESP) used by
//! ferrokv both on the wire and in snapshot files.
//!
//! ## Modules
//!
//! - `types`: the [`Reply`] enum and its serialization
//! - `parser`: incremental, buffer-scanning frame parser
//! - `decoder`: async stream of frames over any `AsyncRead`
//! - `command`: the [`Command`] request type
//!
//! ## Example
//!
//! ```
//! use ferrokv::protocol::{Command, Decoder, Reply};
//! use bytes::Bytes;
//!
//! # tokio_test::block_on(async {
//! let data: &[u8] = b"*2\r\n$3\r\nGET\r\n$4\r\nname\r\n";
//! let mut decoder = Decoder::new(data);
//!
//! let frame = decoder.next().await.unwrap().unwrap();
//! let command = Command::from_reply(frame).unwrap();
//! assert_eq!(command.name(), "get");
//!
//! let response = Reply::bulk(Bytes::from("value"));
//! assert_eq!(response.to_bytes(), b"$5\r\nvalue\r\n");
//! # });
//! ```

pub mod command;
pub mod decoder;
pub mod parser;
pub mod types;

pub use command::Command;
pub use decoder::{DecodeError, Decoder};
pub use parser::{Parsed, ProtocolError, RespParser, MAX_BULK_SIZE, MAX_INLINE_SIZE};
pub use types::Reply;
