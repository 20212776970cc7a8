//! Incremental RESP Frame Parser
//!
//! The parser looks at a byte buffer and reports what the next frame is,
//! without owning the buffer. The caller (see [`crate::protocol::Decoder`])
//! appends network data, calls [`RespParser::parse`] and advances the buffer
//! by the number of bytes the parser says it consumed.
//!
//! ## Outcomes
//!
//! - `None` - the buffer does not hold a complete frame yet
//! - `Some(Parsed::Frame { .. })` - a complete frame
//! - `Some(Parsed::Blank { .. })` - an empty line, skip it
//! - `Some(Parsed::Malformed { .. })` - a protocol error
//!
//! ## Error Recovery
//!
//! Errors confined to one line (bad terminator, bad `:` integer) are
//! recoverable: the bad line is consumed and scanning continues with the
//! next frame. Errors in bulk or array headers lose track of frame
//! boundaries, so they are fatal and the stream must be dropped.

use crate::protocol::types::{prefix, Reply, CRLF};
use bytes::Bytes;
use std::ops::Range;
use thiserror::Error;

/// Errors that can occur while parsing RESP frames.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// A line ended with `\n` but not `\r\n`
    #[error("line is not terminated by CRLF")]
    MissingCrlf,

    /// An integer frame did not hold a valid signed 64-bit number
    #[error("illegal number '{0}'")]
    InvalidInteger(String),

    /// Bulk header was not a number, or was below -1
    #[error("illegal bulk string header '{0}'")]
    InvalidBulkLength(String),

    /// Array header was not a number, or was below -1
    #[error("illegal array header '{0}'")]
    InvalidArrayLength(String),

    /// An array element did not start with `$`
    #[error("expected bulk string in array, got '{0}'")]
    InvalidArrayElement(String),

    /// The declared bulk body was not followed by CRLF
    #[error("bulk string is not terminated by CRLF")]
    MissingBulkTerminator,

    /// The declared bulk length exceeds the maximum
    #[error("bulk string too large: {size} bytes (max: {max})")]
    MessageTooLarge { size: usize, max: usize },

    /// An inline request grew past the maximum without a line terminator
    #[error("too big inline request")]
    InlineTooLarge,
}

impl ProtocolError {
    /// Fatal errors leave the parser unable to find the next frame boundary.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            ProtocolError::MissingCrlf | ProtocolError::InvalidInteger(_)
        )
    }
}

/// What the parser found at the front of the buffer.
#[derive(Debug, Clone, PartialEq)]
pub enum Parsed {
    /// A complete frame occupying `consumed` bytes
    Frame { reply: Reply, consumed: usize },

    /// An empty line; skip `consumed` bytes
    Blank { consumed: usize },

    /// A protocol error. For recoverable errors `consumed` covers the bad
    /// line; for fatal errors it covers the whole buffer.
    Malformed {
        error: ProtocolError,
        consumed: usize,
    },
}

impl Parsed {
    /// Bytes to drop from the front of the buffer.
    pub fn consumed(&self) -> usize {
        match self {
            Parsed::Frame { consumed, .. }
            | Parsed::Blank { consumed }
            | Parsed::Malformed { consumed, .. } => *consumed,
        }
    }
}

/// Maximum size for a single bulk string (512 MB, same as Redis)
pub const MAX_BULK_SIZE: usize = 512 * 1024 * 1024;

/// Maximum size of an inline request line
pub const MAX_INLINE_SIZE: usize = 64 * 1024;

/// Caps the up-front allocation for an array header, so a client cannot
/// make us reserve memory just by declaring a huge count.
const MAX_PREALLOCATED_ELEMENTS: usize = 1024;

/// A stateless RESP frame parser.
///
/// # Example
///
/// ```
/// use ferrokv::protocol::{Parsed, Reply, RespParser};
/// use bytes::Bytes;
///
/// let parser = RespParser::new();
/// let buf = b"*2\r\n$3\r\nGET\r\n$4\r\nname\r\n";
///
/// match parser.parse(buf) {
///     Some(Parsed::Frame { reply, consumed }) => {
///         assert_eq!(consumed, buf.len());
///         assert_eq!(reply, Reply::array(vec![Bytes::from("GET"), Bytes::from("name")]));
///     }
///     other => panic!("unexpected {:?}", other),
/// }
/// ```
#[derive(Debug, Default, Clone, Copy)]
pub struct RespParser;

impl RespParser {
    pub fn new() -> Self {
        Self
    }

    /// Parses the first frame in `buf`, or returns `None` if it is incomplete.
    pub fn parse(&self, buf: &[u8]) -> Option<Parsed> {
        let line_end = match find_lf(buf) {
            Some(pos) => pos,
            None => {
                if buf.len() > MAX_INLINE_SIZE {
                    return Some(fatal(ProtocolError::InlineTooLarge, buf));
                }
                return None;
            }
        };

        let consumed = line_end + 1;
        if line_end == 0 || buf[line_end - 1] != b'\r' {
            return Some(Parsed::Malformed {
                error: ProtocolError::MissingCrlf,
                consumed,
            });
        }

        let line = &buf[..line_end - 1];
        if line.is_empty() {
            return Some(Parsed::Blank { consumed });
        }

        let content = &line[1..];
        match line[0] {
            prefix::STATUS => Some(Parsed::Frame {
                reply: Reply::Status(String::from_utf8_lossy(content).into_owned()),
                consumed,
            }),
            prefix::ERROR => Some(Parsed::Frame {
                reply: Reply::Error(String::from_utf8_lossy(content).into_owned()),
                consumed,
            }),
            prefix::INTEGER => match parse_i64(content) {
                Some(n) => Some(Parsed::Frame {
                    reply: Reply::Integer(n),
                    consumed,
                }),
                None => Some(Parsed::Malformed {
                    error: ProtocolError::InvalidInteger(lossy(content)),
                    consumed,
                }),
            },
            prefix::BULK => self.parse_bulk(buf, content, consumed),
            prefix::ARRAY => self.parse_array(buf, content, consumed),
            _ => Some(Parsed::Frame {
                reply: parse_inline(line),
                consumed,
            }),
        }
    }

    /// Parses `$<length>\r\n<data>\r\n`; the header line is already split off.
    fn parse_bulk(&self, buf: &[u8], header: &[u8], header_len: usize) -> Option<Parsed> {
        let length = match parse_i64(header) {
            Some(n) if n >= -1 => n,
            _ => {
                return Some(fatal(
                    ProtocolError::InvalidBulkLength(lossy(header)),
                    buf,
                ))
            }
        };

        if length == -1 {
            return Some(Parsed::Frame {
                reply: Reply::Bulk(None),
                consumed: header_len,
            });
        }

        match read_body(buf, header_len, length as usize) {
            Ok(Some((data, consumed))) => Some(Parsed::Frame {
                reply: Reply::Bulk(Some(data)),
                consumed,
            }),
            Ok(None) => None,
            Err(error) => Some(fatal(error, buf)),
        }
    }

    /// Parses `*<count>\r\n` followed by `count` bulk strings.
    fn parse_array(&self, buf: &[u8], header: &[u8], header_len: usize) -> Option<Parsed> {
        let count = match parse_i64(header) {
            Some(n) if n >= -1 => n,
            _ => {
                return Some(fatal(
                    ProtocolError::InvalidArrayLength(lossy(header)),
                    buf,
                ))
            }
        };

        if count == -1 {
            return Some(Parsed::Frame {
                reply: Reply::Array(None),
                consumed: header_len,
            });
        }

        let count = count as usize;

        // Walk the element headers first; a partial array is neither
        // allocated nor copied.
        let mut pos = header_len;
        for _ in 0..count {
            match element_at(buf, pos) {
                Ok(Some((_, next))) => pos = next,
                Ok(None) => return None,
                Err(error) => return Some(fatal(error, buf)),
            }
        }
        let consumed = pos;

        let mut items = Vec::with_capacity(count.min(MAX_PREALLOCATED_ELEMENTS));
        let mut pos = header_len;
        while pos < consumed {
            let (body, next) = element_at(buf, pos).ok().flatten()?;
            items.push(match body {
                Some(range) => Bytes::copy_from_slice(&buf[range]),
                None => Bytes::new(),
            });
            pos = next;
        }

        Some(Parsed::Frame {
            reply: Reply::Array(Some(items)),
            consumed,
        })
    }
}

/// Locates the array element starting at `pos` without copying it.
///
/// Returns the byte range of its data (`None` for a null bulk string) and
/// the offset just past it, or `Ok(None)` if the element is incomplete.
fn element_at(
    buf: &[u8],
    pos: usize,
) -> Result<Option<(Option<Range<usize>>, usize)>, ProtocolError> {
    let rest = &buf[pos..];
    let line_end = match find_lf(rest) {
        Some(line_end) => line_end,
        None => return Ok(None),
    };
    if line_end < 2 || rest[line_end - 1] != b'\r' || rest[0] != prefix::BULK {
        let line = &rest[..line_end.saturating_sub(1)];
        return Err(ProtocolError::InvalidArrayElement(lossy(line)));
    }

    let header = &rest[1..line_end - 1];
    let length = match parse_i64(header) {
        Some(n) if n >= -1 => n,
        _ => return Err(ProtocolError::InvalidBulkLength(lossy(header))),
    };

    let start = pos + line_end + 1;
    if length == -1 {
        return Ok(Some((None, start)));
    }
    Ok(body_at(buf, start, length as usize)?.map(|(range, next)| (Some(range), next)))
}

/// Finds `length` bytes of bulk data starting at `start`, plus the trailing
/// CRLF. Returns the data range and the offset just past the CRLF.
fn body_at(
    buf: &[u8],
    start: usize,
    length: usize,
) -> Result<Option<(Range<usize>, usize)>, ProtocolError> {
    if length > MAX_BULK_SIZE {
        return Err(ProtocolError::MessageTooLarge {
            size: length,
            max: MAX_BULK_SIZE,
        });
    }

    let end = start + length;
    if buf.len() < end + CRLF.len() {
        return Ok(None);
    }
    if &buf[end..end + CRLF.len()] != CRLF {
        return Err(ProtocolError::MissingBulkTerminator);
    }

    Ok(Some((start..end, end + CRLF.len())))
}

/// Copies out `length` bytes of bulk data starting at `start`.
fn read_body(
    buf: &[u8],
    start: usize,
    length: usize,
) -> Result<Option<(Bytes, usize)>, ProtocolError> {
    Ok(body_at(buf, start, length)?
        .map(|(range, next)| (Bytes::copy_from_slice(&buf[range]), next)))
}

/// Legacy inline commands: arguments separated by single spaces.
fn parse_inline(line: &[u8]) -> Reply {
    let args = line
        .split(|&b| b == b' ')
        .map(Bytes::copy_from_slice)
        .collect();
    Reply::Array(Some(args))
}

fn fatal(error: ProtocolError, buf: &[u8]) -> Parsed {
    Parsed::Malformed {
        error,
        consumed: buf.len(),
    }
}

#[inline]
fn find_lf(buf: &[u8]) -> Option<usize> {
    buf.iter().position(|&b| b == b'\n')
}

/// Parses a decimal i64; the whole field must be consumed.
fn parse_i64(field: &[u8]) -> Option<i64> {
    std::str::from_utf8(field).ok()?.parse().ok()
}

fn lossy(field: &[u8]) -> String {
    String::from_utf8_lossy(field).into_owned()
}
