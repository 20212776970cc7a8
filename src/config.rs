//! Server configuration parsed from command-line flags.

use crate::cache::EvictionPolicy;
use crate::database::serialized::DEFAULT_QUEUE_SIZE;
use crate::storage::DEFAULT_SHARD_COUNT;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Which execution strategy serves commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StoreKind {
    /// Handlers run on connection tasks against sharded dictionaries
    #[default]
    Concurrent,
    /// One worker task owns a bounded LRU/LFU keyspace
    Serialized,
}

impl FromStr for StoreKind {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "concurrent" => Ok(StoreKind::Concurrent),
            "serialized" => Ok(StoreKind::Serialized),
            _ => Err(()),
        }
    }
}

impl fmt::Display for StoreKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreKind::Concurrent => write!(f, "concurrent"),
            StoreKind::Serialized => write!(f, "serialized"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("{0} requires a value")]
    MissingValue(String),

    #[error("invalid value '{value}' for {flag}")]
    InvalidValue { flag: String, value: String },

    #[error("unknown option '{0}' (see --help)")]
    UnknownFlag(String),

    /// `--help` was given; the caller prints usage and exits
    #[error("help requested")]
    Help,

    /// `--version` was given
    #[error("version requested")]
    Version,
}

/// Server configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Host to bind to
    pub host: String,
    /// Port to listen on (0 picks a free port)
    pub port: u16,
    pub store: StoreKind,
    /// Shard count for the concurrent store
    pub shards: usize,
    /// Key limit for the serialized store, 0 for unbounded
    pub max_keys: usize,
    pub eviction: EvictionPolicy,
    /// Request queue capacity for the serialized store
    pub queue_size: usize,
    /// Snapshot file; persistence is off when unset
    pub dbfilename: Option<PathBuf>,
    /// How long a closing connection waits for in-flight writes
    pub drain_timeout: Duration,
    /// Default log filter when `RUST_LOG` is not set
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 6379,
            store: StoreKind::default(),
            shards: DEFAULT_SHARD_COUNT,
            max_keys: 0,
            eviction: EvictionPolicy::default(),
            queue_size: DEFAULT_QUEUE_SIZE,
            dbfilename: None,
            drain_timeout: Duration::from_secs(10),
            log_level: "info".to_string(),
        }
    }
}

impl Config {
    /// Parses the process arguments, skipping the program name.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_args(std::env::args().skip(1))
    }

    /// Parses flags into a configuration.
    ///
    /// # Arguments
    ///
    /// * `args` - Flags and their values, without the program name
    ///
    /// # Returns
    ///
    /// The configuration, or [`ConfigError::Help`] / [`ConfigError::Version`]
    /// when the caller should print something and exit.
    pub fn from_args<I, S>(args: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut config = Config::default();
        let mut args = args.into_iter().map(Into::into);

        while let Some(flag) = args.next() {
            match flag.as_str() {
                "--help" => return Err(ConfigError::Help),
                "--version" | "-v" => return Err(ConfigError::Version),
                "--host" | "-h" => config.host = value(&flag, args.next())?,
                "--port" | "-p" => config.port = parse(&flag, args.next())?,
                "--store" => config.store = parse(&flag, args.next())?,
                "--shards" => {
                    config.shards = parse(&flag, args.next())?;
                    if config.shards == 0 {
                        return Err(invalid(&flag, "0"));
                    }
                }
                "--max-keys" => config.max_keys = parse(&flag, args.next())?,
                "--eviction" => config.eviction = parse(&flag, args.next())?,
                "--queue-size" => {
                    config.queue_size = parse(&flag, args.next())?;
                    if config.queue_size == 0 {
                        return Err(invalid(&flag, "0"));
                    }
                }
                "--dbfilename" => config.dbfilename = Some(value(&flag, args.next())?.into()),
                "--drain-timeout-ms" => {
                    config.drain_timeout = Duration::from_millis(parse(&flag, args.next())?)
                }
                "--log-level" => config.log_level = value(&flag, args.next())?,
                _ => return Err(ConfigError::UnknownFlag(flag)),
            }
        }

        Ok(config)
    }

    /// Returns the bind address as a string
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn value(flag: &str, value: Option<String>) -> Result<String, ConfigError> {
    value.ok_or_else(|| ConfigError::MissingValue(flag.to_string()))
}

fn parse<T: FromStr>(flag: &str, raw: Option<String>) -> Result<T, ConfigError> {
    let raw = value(flag, raw)?;
    raw.parse().map_err(|_| invalid(flag, &raw))
}

fn invalid(flag: &str, value: &str) -> ConfigError {
    ConfigError::InvalidValue {
        flag: flag.to_string(),
        value: value.to_string(),
    }
}

/// Usage text printed for `--help`.
pub const USAGE: &str = r#"
USAGE:
    ferrokv [OPTIONS]

OPTIONS:
    -h, --host <HOST>             Host to bind to (default: 127.0.0.1)
    -p, --port <PORT>             Port to listen on (default: 6379)
        --store <STRATEGY>        concurrent or serialized (default: concurrent)
        --shards <N>              Shards in the concurrent store (default: 64)
        --max-keys <N>            Key limit of the serialized store, 0 = unbounded
        --eviction <POLICY>       lru or lfu (default: lru)
        --queue-size <N>          Serialized store request queue (default: 1024)
        --dbfilename <PATH>       Snapshot file loaded at startup and written on SAVE
        --drain-timeout-ms <MS>   Wait for in-flight writes on close (default: 10000)
        --log-level <FILTER>      Log filter when RUST_LOG is unset (default: info)
    -v, --version                 Print version information
        --help                    Print this help message

EXAMPLES:
    ferrokv                                   # Start on 127.0.0.1:6379
    ferrokv --store serialized --max-keys 1000 --eviction lfu
    ferrokv --dbfilename dump.resp            # Persist across restarts
"#;
