use crate::compaction::CompactionPolicy;
use crate::error::{Error, Result};
use std::env;
use std::path::PathBuf;
use std::str::FromStr;

/// Default number of appended records after which `compact_if_necessary` rewrites the log.
pub const DEFAULT_COMPACT_AFTER_RECORDS: u64 = 10_000;

/// Default upper bound on a single record's payload (16 MiB).
pub const DEFAULT_MAX_RECORD_SIZE: u64 = 16 * 1024 * 1024;

/// Configuration for an operation log
#[derive(Debug, Clone)]
pub struct Config {
    /// Log file path (default: `.oplog/ops.log` in current directory)
    pub log_path: PathBuf,

    /// When `compact_if_necessary` rewrites the log
    pub compaction: CompactionPolicy,

    /// Records longer than this are treated as corrupt instead of allocated
    pub max_record_size: u64,

    /// Truncate a torn final record at open instead of failing
    pub repair_torn_tail: bool,

    /// Log level: "info", "debug", "warn", "error" (default: "info")
    pub log_level: String,
}

impl Config {
    /// Create a new config with defaults
    pub fn new() -> Self {
        let log_path = env::current_dir()
            .unwrap_or_else(|_| PathBuf::from("."))
            .join(".oplog")
            .join("ops.log");

        Config {
            log_path,
            compaction: CompactionPolicy::records(DEFAULT_COMPACT_AFTER_RECORDS),
            max_record_size: DEFAULT_MAX_RECORD_SIZE,
            repair_torn_tail: false,
            log_level: "info".to_string(),
        }
    }

    /// Create config with custom log path
    pub fn with_log_path(log_path: impl Into<PathBuf>) -> Self {
        Config {
            log_path: log_path.into(),
            ..Config::new()
        }
    }

    pub fn get_log_path(&self) -> &PathBuf {
        &self.log_path
    }

    pub fn set_log_path(&mut self, path: PathBuf) {
        self.log_path = path;
    }

    pub fn get_compaction(&self) -> CompactionPolicy {
        self.compaction
    }

    pub fn set_compaction(&mut self, policy: CompactionPolicy) {
        self.compaction = policy;
    }

    pub fn get_log_level(&self) -> &str {
        &self.log_level
    }

    pub fn set_log_level(&mut self, level: String) {
        self.log_level = level;
    }

    /// Load config from environment variables
    ///
    /// Environment variables:
    /// - `OPLOG_PATH`: log file path
    /// - `OPLOG_COMPACT_AFTER_RECORDS`: record threshold, `0` or `off` to disable
    /// - `OPLOG_COMPACT_AFTER_BYTES`: byte threshold, `0` or `off` to disable
    /// - `OPLOG_MAX_RECORD_SIZE`: largest accepted record payload in bytes
    /// - `OPLOG_REPAIR_TORN_TAIL`: `true` or `false`
    /// - `OPLOG_LOG_LEVEL`: log level
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Config::new();

        if let Some(path) = lookup("OPLOG_PATH") {
            config.log_path = PathBuf::from(path);
        }

        if let Some(raw) = lookup("OPLOG_COMPACT_AFTER_RECORDS") {
            config.compaction.max_records = parse_limit("OPLOG_COMPACT_AFTER_RECORDS", &raw)?;
        }

        if let Some(raw) = lookup("OPLOG_COMPACT_AFTER_BYTES") {
            config.compaction.max_bytes = parse_limit("OPLOG_COMPACT_AFTER_BYTES", &raw)?;
        }

        if let Some(raw) = lookup("OPLOG_MAX_RECORD_SIZE") {
            config.max_record_size = parse("OPLOG_MAX_RECORD_SIZE", &raw)?;
        }

        if let Some(raw) = lookup("OPLOG_REPAIR_TORN_TAIL") {
            config.repair_torn_tail = parse("OPLOG_REPAIR_TORN_TAIL", &raw)?;
        }

        if let Some(level) = lookup("OPLOG_LOG_LEVEL") {
            config.log_level = level;
        }

        Ok(config)
    }
}

impl Default for Config {
    fn default() -> Self {
        Config::new()
    }
}

fn parse<T: FromStr>(name: &str, raw: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse()
        .map_err(|e| Error::Config(format!("Invalid {} value {:?}: {}", name, raw, e)))
}

fn parse_limit(name: &str, raw: &str) -> Result<Option<u64>> {
    if raw.trim().eq_ignore_ascii_case("off") {
        return Ok(None);
    }
    let limit: u64 = parse(name, raw)?;
    Ok((limit > 0).then_some(limit))
}
