//! Stored values.

use crate::storage::sorted_set::SortedSet;
use bytes::Bytes;
use std::collections::VecDeque;

/// The value stored under a key.
#[derive(Debug, Clone)]
pub enum Value {
    Str(Bytes),
    List(VecDeque<Bytes>),
    SortedSet(SortedSet),
}

impl Value {
    /// Name reported by the TYPE command.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Str(_) => "string",
            Value::List(_) => "list",
            Value::SortedSet(_) => "zset",
        }
    }

    /// Containers left empty by a mutation are deleted with their key.
    pub fn is_empty_container(&self) -> bool {
        match self {
            Value::Str(_) => false,
            Value::List(list) => list.is_empty(),
            Value::SortedSet(set) => set.is_empty(),
        }
    }
}

impl From<Bytes> for Value {
    fn from(b: Bytes) -> Self {
        Value::Str(b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_names() {
        assert_eq!(Value::Str(Bytes::new()).type_name(), "string");
        assert_eq!(Value::List(VecDeque::new()).type_name(), "list");
        assert_eq!(Value::SortedSet(SortedSet::new()).type_name(), "zset");
    }

    #[test]
    fn test_empty_container() {
        assert!(!Value::Str(Bytes::new()).is_empty_container());
        assert!(Value::List(VecDeque::new()).is_empty_container());

        let mut set = SortedSet::new();
        set.add("m".into(), 1.0);
        assert!(!Value::SortedSet(set).is_empty_container());
    }
}
