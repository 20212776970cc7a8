//! Streaming RESP Decoder
//!
//! Wraps any [`AsyncRead`] and yields decoded frames one at a time.
//!
//! ```text
//!   socket ──read_buf──> BytesMut ──RespParser──> Reply
//!                           ▲                       │
//!                           └──── advance(n) ───────┘
//! ```
//!
//! TCP is a stream protocol, so a single read may carry half a frame or
//! several pipelined frames. The decoder keeps whatever the parser could not
//! use yet and only reads again when the buffer holds no complete frame.

use crate::protocol::parser::{Parsed, ProtocolError, RespParser};
use crate::protocol::types::Reply;
use bytes::{Buf, BytesMut};
use std::io;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::trace;

/// Initial read buffer capacity
const INITIAL_BUFFER_SIZE: usize = 4096;

/// Errors yielded by [`Decoder::next`].
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl DecodeError {
    /// Whether the stream has ended after this error.
    pub fn is_fatal(&self) -> bool {
        match self {
            DecodeError::Protocol(e) => e.is_fatal(),
            DecodeError::Io(_) => true,
        }
    }
}

/// Lazily decodes frames from a reader.
pub struct Decoder<R> {
    reader: R,
    buffer: BytesMut,
    parser: RespParser,
    done: bool,
}

impl<R: AsyncRead + Unpin> Decoder<R> {
    pub fn new(reader: R) -> Self {
        Self::with_buffer(reader, BytesMut::with_capacity(INITIAL_BUFFER_SIZE))
    }

    /// Creates a decoder that reads into a caller-provided buffer.
    ///
    /// The buffer is cleared first; its capacity is kept.
    pub fn with_buffer(reader: R, mut buffer: BytesMut) -> Self {
        buffer.clear();
        Self {
            reader,
            buffer,
            parser: RespParser::new(),
            done: false,
        }
    }

    /// Returns the next frame, a protocol error, or `None` at end of stream.
    ///
    /// After a fatal error or EOF every further call returns `None`. Bytes of
    /// an incomplete frame left at EOF are dropped silently.
    pub async fn next(&mut self) -> Option<Result<Reply, DecodeError>> {
        if self.done {
            return None;
        }

        loop {
            match self.parser.parse(&self.buffer) {
                Some(Parsed::Frame { reply, consumed }) => {
                    self.buffer.advance(consumed);
                    trace!(consumed, remaining = self.buffer.len(), "Decoded frame");
                    return Some(Ok(reply));
                }
                Some(Parsed::Blank { consumed }) => {
                    self.buffer.advance(consumed);
                    continue;
                }
                Some(Parsed::Malformed { error, consumed }) => {
                    self.buffer.advance(consumed);
                    if error.is_fatal() {
                        self.done = true;
                        self.buffer.clear();
                    }
                    return Some(Err(DecodeError::Protocol(error)));
                }
                None => {}
            }

            if self.buffer.capacity() - self.buffer.len() < 1024 {
                self.buffer.reserve(INITIAL_BUFFER_SIZE);
            }

            match self.reader.read_buf(&mut self.buffer).await {
                Ok(0) => {
                    if !self.buffer.is_empty() {
                        trace!(
                            buffered = self.buffer.len(),
                            "Dropping incomplete frame at end of stream"
                        );
                    }
                    self.done = true;
                    return None;
                }
                Ok(n) => trace!(bytes = n, "Read data"),
                Err(e) => {
                    self.done = true;
                    return Some(Err(DecodeError::Io(e)));
                }
            }
        }
    }

    /// Gives back the read buffer so it can be reused.
    pub fn into_buffer(self) -> BytesMut {
        self.buffer
    }
}
