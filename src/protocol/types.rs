//! RESP Reply Types
//!
//! Every value that crosses the wire is a [`Reply`]. Requests arrive as
//! arrays of bulk strings and responses leave as any of the variants below.
//!
//! ## Protocol Format
//!
//! Each frame starts with a type prefix byte:
//! - `+` Status
//! - `-` Error
//! - `:` Integer
//! - `$` Bulk string (`$-1` is the null bulk string)
//! - `*` Array of bulk strings (`*-1` is the null array)
//!
//! All header lines are terminated with CRLF (`\r\n`).
//!
//! ## Examples
//!
//! Status: `+OK\r\n`
//! Error: `-ERR unknown command 'foo'\r\n`
//! Integer: `:1000\r\n`
//! Bulk: `$5\r\nhello\r\n`
//! Array: `*2\r\n$3\r\nGET\r\n$4\r\nname\r\n`

use bytes::Bytes;
use std::fmt;

/// The CRLF terminator used in RESP protocol
pub const CRLF: &[u8] = b"\r\n";

/// RESP protocol type prefixes
pub mod prefix {
    pub const STATUS: u8 = b'+';
    pub const ERROR: u8 = b'-';
    pub const INTEGER: u8 = b':';
    pub const BULK: u8 = b'$';
    pub const ARRAY: u8 = b'*';
}

/// A protocol value.
///
/// Replies are immutable once built; the only thing to do with one is to
/// serialize it onto the wire (or inspect it in tests).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// Simple status line such as `OK` or `PONG`. Must not contain CRLF.
    Status(String),

    /// Error line. By convention the first word is a category token
    /// (`ERR`, `WRONGTYPE`) so clients can match on it.
    Error(String),

    /// 64-bit signed integer.
    Integer(i64),

    /// Binary-safe string; `None` is the null bulk string.
    Bulk(Option<Bytes>),

    /// Array of binary-safe strings; `None` is the null array.
    Array(Option<Vec<Bytes>>),

    /// Nothing is written back for this reply.
    NoReply,
}

impl Reply {
    pub fn status(s: impl Into<String>) -> Self {
        Reply::Status(s.into())
    }

    pub fn error(s: impl Into<String>) -> Self {
        Reply::Error(s.into())
    }

    pub fn integer(n: i64) -> Self {
        Reply::Integer(n)
    }

    /// Creates a non-null bulk reply.
    ///
    /// # Example
    /// ```
    /// use ferrokv::protocol::Reply;
    /// use bytes::Bytes;
    /// let bulk = Reply::bulk(Bytes::from("hello"));
    /// assert_eq!(bulk.to_bytes(), b"$5\r\nhello\r\n");
    /// ```
    pub fn bulk(data: impl Into<Bytes>) -> Self {
        Reply::Bulk(Some(data.into()))
    }

    /// `$-1\r\n`
    pub fn null_bulk() -> Self {
        Reply::Bulk(None)
    }

    pub fn array(items: Vec<Bytes>) -> Self {
        Reply::Array(Some(items))
    }

    /// `*0\r\n`
    pub fn empty_array() -> Self {
        Reply::Array(Some(Vec::new()))
    }

    /// `*-1\r\n`
    pub fn null_array() -> Self {
        Reply::Array(None)
    }

    pub fn ok() -> Self {
        Reply::Status("OK".to_string())
    }

    pub fn pong() -> Self {
        Reply::Status("PONG".to_string())
    }

    /// Serializes the reply into a fresh buffer.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        self.serialize_into(&mut buf);
        buf
    }

    /// Serializes the reply into an existing buffer, so connections can
    /// reuse one write buffer for their whole lifetime.
    pub fn serialize_into(&self, buf: &mut Vec<u8>) {
        match self {
            Reply::Status(s) => write_simple(buf, prefix::STATUS, s),
            Reply::Error(s) => write_simple(buf, prefix::ERROR, s),
            Reply::Integer(n) => write_line(buf, prefix::INTEGER, n.to_string().as_bytes()),
            Reply::Bulk(Some(data)) => write_bulk(buf, data),
            Reply::Bulk(None) => write_line(buf, prefix::BULK, b"-1"),
            Reply::Array(Some(items)) => {
                write_line(buf, prefix::ARRAY, items.len().to_string().as_bytes());
                for item in items {
                    write_bulk(buf, item);
                }
            }
            Reply::Array(None) => write_line(buf, prefix::ARRAY, b"-1"),
            Reply::NoReply => {}
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Reply::Error(_))
    }
}

/// Status and error lines cannot carry CR or LF, so any that slipped in
/// (an echoed command name, say) are written as spaces.
fn write_simple(buf: &mut Vec<u8>, prefix: u8, content: &str) {
    buf.push(prefix);
    buf.extend(
        content
            .bytes()
            .map(|b| if b == b'\r' || b == b'\n' { b' ' } else { b }),
    );
    buf.extend_from_slice(CRLF);
}

fn write_line(buf: &mut Vec<u8>, prefix: u8, content: &[u8]) {
    buf.push(prefix);
    buf.extend_from_slice(content);
    buf.extend_from_slice(CRLF);
}

fn write_bulk(buf: &mut Vec<u8>, data: &[u8]) {
    write_line(buf, prefix::BULK, data.len().to_string().as_bytes());
    buf.extend_from_slice(data);
    buf.extend_from_slice(CRLF);
}

impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reply::Status(s) => write!(f, "{}", s),
            Reply::Error(s) => write!(f, "(error) {}", s),
            Reply::Integer(n) => write!(f, "(integer) {}", n),
            Reply::Bulk(Some(data)) => write!(f, "\"{}\"", String::from_utf8_lossy(data)),
            Reply::Bulk(None) | Reply::Array(None) => write!(f, "(nil)"),
            Reply::Array(Some(items)) if items.is_empty() => write!(f, "(empty array)"),
            Reply::Array(Some(items)) => write!(f, "(array of {})", items.len()),
            Reply::NoReply => write!(f, "(no reply)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_serialize() {
        assert_eq!(Reply::ok().to_bytes(), b"+OK\r\n");
        assert_eq!(Reply::pong().to_bytes(), b"+PONG\r\n");
    }

    #[test]
    fn test_simple_lines_stay_one_line() {
        let reply = Reply::error("ERR unknown command 'foo\r\n+OK'");
        assert_eq!(reply.to_bytes(), b"-ERR unknown command 'foo  +OK'\r\n");
        assert_eq!(Reply::status("a\nb").to_bytes(), b"+a b\r\n");
    }

    #[test]
    fn test_error_serialize() {
        let reply = Reply::error("ERR unknown command 'foo'");
        assert_eq!(reply.to_bytes(), b"-ERR unknown command 'foo'\r\n");
    }

    #[test]
    fn test_integer_serialize() {
        assert_eq!(Reply::integer(1000).to_bytes(), b":1000\r\n");
        assert_eq!(Reply::integer(-42).to_bytes(), b":-42\r\n");
    }

    #[test]
    fn test_bulk_serialize() {
        assert_eq!(Reply::bulk(Bytes::from("hello")).to_bytes(), b"$5\r\nhello\r\n");
        assert_eq!(Reply::bulk(Bytes::new()).to_bytes(), b"$0\r\n\r\n");
        assert_eq!(Reply::null_bulk().to_bytes(), b"$-1\r\n");
    }

    #[test]
    fn test_array_serialize() {
        let reply = Reply::array(vec![Bytes::from("GET"), Bytes::from("name")]);
        assert_eq!(reply.to_bytes(), b"*2\r\n$3\r\nGET\r\n$4\r\nname\r\n");
        assert_eq!(Reply::empty_array().to_bytes(), b"*0\r\n");
        assert_eq!(Reply::null_array().to_bytes(), b"*-1\r\n");
    }

    #[test]
    fn test_no_reply_writes_nothing() {
        let mut buf = b"+OK\r\n".to_vec();
        Reply::NoReply.serialize_into(&mut buf);
        assert_eq!(buf, b"+OK\r\n");
    }

    #[test]
    fn test_binary_bulk_is_length_prefixed() {
        let reply = Reply::bulk(Bytes::from_static(b"a\r\nb\x00"));
        assert_eq!(reply.to_bytes(), b"$5\r\na\r\nb\x00\r\n");
    }
}
