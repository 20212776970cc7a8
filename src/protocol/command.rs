//! Client commands.

use crate::protocol::types::Reply;
use bytes::Bytes;

/// A request: a command name followed by its arguments.
///
/// The name keeps the client's casing in `args[0]`; [`Command::name`] is the
/// lowercased lookup key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    name: String,
    args: Vec<Bytes>,
}

impl Command {
    /// Builds a command from its full argument vector (name first).
    ///
    /// Returns `None` for an empty vector.
    pub fn new(args: Vec<Bytes>) -> Option<Self> {
        let first = args.first()?;
        let name = String::from_utf8_lossy(first).to_ascii_lowercase();
        Some(Self { name, args })
    }

    /// Converts a decoded frame into a command.
    ///
    /// Only non-empty arrays are commands.
    pub fn from_reply(reply: Reply) -> Option<Self> {
        match reply {
            Reply::Array(Some(args)) => Self::new(args),
            _ => None,
        }
    }

    /// Convenience constructor used by tests and benches.
    pub fn from_strs(parts: &[&str]) -> Self {
        Self {
            name: parts.first().map(|s| s.to_ascii_lowercase()).unwrap_or_default(),
            args: parts.iter().map(|s| Bytes::copy_from_slice(s.as_bytes())).collect(),
        }
    }

    /// Lowercased command name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// All arguments, including the command name at index 0.
    pub fn args(&self) -> &[Bytes] {
        &self.args
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_name_is_lowercased() {
        let cmd = Command::new(vec![Bytes::from("SeT"), Bytes::from("k")]).unwrap();
        assert_eq!(cmd.name(), "set");
        assert_eq!(cmd.args()[0], Bytes::from("SeT"));
        assert_eq!(cmd.args().len(), 2);
    }

    #[test]
    fn test_command_from_reply() {
        let reply = Reply::array(vec![Bytes::from("PING")]);
        assert_eq!(Command::from_reply(reply).unwrap().name(), "ping");

        assert!(Command::from_reply(Reply::empty_array()).is_none());
        assert!(Command::from_reply(Reply::null_array()).is_none());
        assert!(Command::from_reply(Reply::ok()).is_none());
    }
}
