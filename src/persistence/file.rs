//! Snapshot file format.
//!
//! The file is a sequence of RESP arrays, one per key:
//!
//! ```text
//! *4\r\n$6\r\nstring\r\n$3\r\nkey\r\n$2\r\n-1\r\n$5\r\nvalue\r\n
//!        type              key        expire-at      payload ...
//! ```
//!
//! | type     | payload                        |
//! |----------|--------------------------------|
//! | `string` | the value                      |
//! | `list`   | the items, head first          |
//! | `zset`   | member, score, member, score.. |
//!
//! `expire-at` is a unix timestamp in milliseconds, or `-1`.
//!
//! Saving writes to `<path>.tmp` and renames it over `<path>`, so a crash
//! mid-save leaves the previous snapshot intact.

use super::{PersistError, Persister, Snapshot, SnapshotEntry};
use crate::protocol::{Parsed, Reply, RespParser};
use crate::storage::{SortedSet, Value};
use bytes::Bytes;
use std::collections::VecDeque;
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::debug;

const TYPE_STRING: &[u8] = b"string";
const TYPE_LIST: &[u8] = b"list";
const TYPE_ZSET: &[u8] = b"zset";

/// Persists snapshots to a single file.
#[derive(Debug, Clone)]
pub struct FilePersister {
    path: PathBuf,
}

impl FilePersister {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn tmp_path(&self) -> PathBuf {
        let mut name = self.path.clone().into_os_string();
        name.push(".tmp");
        PathBuf::from(name)
    }
}

impl Persister for FilePersister {
    fn save(&self, snapshot: &Snapshot) -> Result<(), PersistError> {
        let tmp = self.tmp_path();
        let file = File::create(&tmp)?;
        let mut writer = BufWriter::new(file);

        let mut buf = Vec::with_capacity(256);
        for entry in &snapshot.entries {
            buf.clear();
            encode_entry(entry).serialize_into(&mut buf);
            writer.write_all(&buf)?;
        }

        let file = writer.into_inner().map_err(|e| e.into_error())?;
        file.sync_all()?;
        drop(file);
        fs::rename(&tmp, &self.path)?;

        debug!(path = %self.path.display(), keys = snapshot.len(), "Snapshot written");
        Ok(())
    }

    fn load(&self) -> Result<Snapshot, PersistError> {
        let data = match fs::read(&self.path) {
            Ok(data) => data,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Snapshot::new()),
            Err(e) => return Err(e.into()),
        };

        let parser = RespParser::new();
        let mut snapshot = Snapshot::new();
        let mut pos = 0;

        while pos < data.len() {
            match parser.parse(&data[pos..]) {
                Some(Parsed::Frame { reply, consumed }) => {
                    snapshot.entries.push(decode_entry(reply)?);
                    pos += consumed;
                }
                Some(Parsed::Blank { consumed }) => pos += consumed,
                Some(Parsed::Malformed { error, .. }) => {
                    return Err(PersistError::Format(format!("at byte {pos}: {error}")));
                }
                None => {
                    return Err(PersistError::Format(format!(
                        "truncated record at byte {pos}"
                    )));
                }
            }
        }

        debug!(path = %self.path.display(), keys = snapshot.len(), "Snapshot read");
        Ok(snapshot)
    }
}

fn encode_entry(entry: &SnapshotEntry) -> Reply {
    let expire_at = match entry.expires_at {
        Some(at) => {
            let ms = at
                .duration_since(UNIX_EPOCH)
                .map(|d| i64::try_from(d.as_millis()).unwrap_or(i64::MAX))
                .unwrap_or(0);
            Bytes::from(ms.to_string())
        }
        None => Bytes::from_static(b"-1"),
    };

    let mut items = Vec::with_capacity(4);
    match &entry.value {
        Value::Str(s) => {
            items.extend([Bytes::from_static(TYPE_STRING), entry.key.clone(), expire_at]);
            items.push(s.clone());
        }
        Value::List(list) => {
            items.extend([Bytes::from_static(TYPE_LIST), entry.key.clone(), expire_at]);
            items.extend(list.iter().cloned());
        }
        Value::SortedSet(set) => {
            items.extend([Bytes::from_static(TYPE_ZSET), entry.key.clone(), expire_at]);
            for e in set.iter() {
                items.push(Bytes::copy_from_slice(e.member.as_bytes()));
                items.push(Bytes::from(e.score.to_string()));
            }
        }
    }
    Reply::array(items)
}

fn decode_entry(reply: Reply) -> Result<SnapshotEntry, PersistError> {
    let items = match reply {
        Reply::Array(Some(items)) if items.len() >= 3 => items,
        other => return Err(PersistError::Format(format!("unexpected record {other}"))),
    };
    let mut items = items.into_iter();
    let (kind, key, expire_at) = match (items.next(), items.next(), items.next()) {
        (Some(kind), Some(key), Some(expire_at)) => (kind, key, expire_at),
        _ => return Err(PersistError::Format("short record".to_string())),
    };

    let expire_ms: i64 = std::str::from_utf8(&expire_at)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| PersistError::Format("bad expire-at field".to_string()))?;
    let expires_at = match expire_ms {
        ms if ms < 0 => None,
        ms => Some(
            UNIX_EPOCH
                .checked_add(Duration::from_millis(ms as u64))
                .ok_or_else(|| PersistError::Format("expire-at out of range".to_string()))?,
        ),
    };

    let payload: Vec<Bytes> = items.collect();
    let value = match &kind[..] {
        b"string" => match <[Bytes; 1]>::try_from(payload) {
            Ok([s]) => Value::Str(s),
            Err(_) => return Err(PersistError::Format("string record needs one value".into())),
        },
        b"list" => Value::List(VecDeque::from(payload)),
        b"zset" => {
            if payload.len() % 2 != 0 {
                return Err(PersistError::Format("zset record has odd payload".into()));
            }
            let mut set = SortedSet::new();
            for pair in payload.chunks_exact(2) {
                let score: f64 = std::str::from_utf8(&pair[1])
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .ok_or_else(|| PersistError::Format("bad zset score".to_string()))?;
                set.add(String::from_utf8_lossy(&pair[0]).into_owned(), score);
            }
            Value::SortedSet(set)
        }
        other => {
            return Err(PersistError::Format(format!(
                "unknown type '{}'",
                String::from_utf8_lossy(other)
            )))
        }
    };

    Ok(SnapshotEntry {
        key,
        value,
        expires_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    static COUNTER: AtomicUsize = AtomicUsize::new(0);

    /// Wall-clock time truncated to the millisecond, as stored on disk.
    fn millis_precision(t: SystemTime) -> SystemTime {
        let ms = t.duration_since(UNIX_EPOCH).unwrap().as_millis();
        UNIX_EPOCH + Duration::from_millis(ms as u64)
    }

    fn temp_path() -> PathBuf {
        let n = COUNTER.fetch_add(1, Ordering::Relaxed);
        std::env::temp_dir().join(format!("ferrokv-test-{}-{n}.snap", std::process::id()))
    }

    fn sample() -> Snapshot {
        let mut zset = SortedSet::new();
        zset.add("alice".into(), 1.5);
        zset.add("bob".into(), -3.0);

        let expires = millis_precision(SystemTime::now() + Duration::from_secs(3600));

        Snapshot {
            entries: vec![
                SnapshotEntry {
                    key: Bytes::from("greeting"),
                    value: Value::Str(Bytes::from_static(b"hi\r\nthere\x00")),
                    expires_at: Some(expires),
                },
                SnapshotEntry {
                    key: Bytes::from("queue"),
                    value: Value::List(VecDeque::from(vec![Bytes::from("a"), Bytes::from("b")])),
                    expires_at: None,
                },
                SnapshotEntry {
                    key: Bytes::from("board"),
                    value: Value::SortedSet(zset),
                    expires_at: None,
                },
            ],
        }
    }

    #[test]
    fn test_missing_file_is_empty() {
        let persister = FilePersister::new(temp_path());
        let snapshot = persister.load().unwrap();
        assert!(snapshot.is_empty());
    }

    #[test]
    fn test_save_and_load() {
        let path = temp_path();
        let persister = FilePersister::new(&path);
        let original = sample();
        persister.save(&original).unwrap();
        assert!(!persister.tmp_path().exists());

        let loaded = persister.load().unwrap();
        assert_eq!(loaded.len(), 3);

        let greeting = &loaded.entries[0];
        assert_eq!(greeting.key, Bytes::from("greeting"));
        assert_eq!(greeting.expires_at, original.entries[0].expires_at);
        match &greeting.value {
            Value::Str(s) => assert_eq!(s, &Bytes::from_static(b"hi\r\nthere\x00")),
            other => panic!("unexpected value {other:?}"),
        }

        match &loaded.entries[1].value {
            Value::List(list) => {
                assert_eq!(list, &VecDeque::from(vec![Bytes::from("a"), Bytes::from("b")]))
            }
            other => panic!("unexpected value {other:?}"),
        }

        match &loaded.entries[2].value {
            Value::SortedSet(set) => {
                assert_eq!(set.len(), 2);
                assert_eq!(set.score("alice"), Some(1.5));
                assert_eq!(set.score("bob"), Some(-3.0));
            }
            other => panic!("unexpected value {other:?}"),
        }

        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_save_replaces_previous_snapshot() {
        let path = temp_path();
        let persister = FilePersister::new(&path);
        persister.save(&sample()).unwrap();
        persister.save(&Snapshot::new()).unwrap();
        assert!(persister.load().unwrap().is_empty());
        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_far_expire_at_loads() {
        use crate::storage::{ConcurrentDb, Keyspace};

        let path = temp_path();
        fs::write(
            &path,
            b"*4\r\n$6\r\nstring\r\n$1\r\nk\r\n$19\r\n9223372036854775807\r\n$1\r\nv\r\n",
        )
        .unwrap();
        let persister = FilePersister::new(&path);
        match persister.load() {
            Ok(snapshot) => {
                let mut db = ConcurrentDb::new(4);
                assert_eq!(snapshot.restore(&mut db), 1);
                assert!(db.exists(&Bytes::from("k")));
            }
            Err(e) => assert!(matches!(e, PersistError::Format(_))),
        }
        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_corrupt_file() {
        let path = temp_path();
        fs::write(&path, b"*3\r\n$6\r\nstring\r\n$1\r\nk\r\n").unwrap();
        let persister = FilePersister::new(&path);
        assert!(matches!(persister.load(), Err(PersistError::Format(_))));

        fs::write(&path, b"*3\r\n$4\r\nblob\r\n$1\r\nk\r\n$2\r\n-1\r\n").unwrap();
        assert!(matches!(persister.load(), Err(PersistError::Format(_))));
        fs::remove_file(&path).unwrap();
    }
}
