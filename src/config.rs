use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Engine settings. Defaults, then an optional JSON file named by
/// `STAYBOOK_CONFIG`, then `STAYBOOK_*` environment overrides.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub data_dir: PathBuf,
    pub wal_file: String,
    /// WAL appends before the compactor rewrites the log.
    pub compact_threshold: u64,
    /// How long a writer waits for a stay's lock before giving up.
    pub lock_timeout_ms: u64,
    /// Prometheus endpoint port; disabled when unset.
    pub metrics_port: Option<u16>,
    /// Days to keep elapsed reservations; kept forever when unset.
    pub retention_days: Option<u32>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            wal_file: "staybook.wal".into(),
            compact_threshold: 1000,
            lock_timeout_ms: 5_000,
            metrics_port: None,
            retention_days: None,
        }
    }
}

fn parse<T: std::str::FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    lookup(key).and_then(|s| s.parse().ok())
}

impl Config {
    pub fn load() -> io::Result<Self> {
        let mut config = match std::env::var("STAYBOOK_CONFIG") {
            Ok(path) => Self::from_file(Path::new(&path))?,
            Err(_) => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn from_file(path: &Path) -> io::Result<Self> {
        let raw = fs::read_to_string(path)?;
        serde_json::from_str(&raw).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }

    /// Override fields from `STAYBOOK_*` variables. Unparseable values are ignored.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(dir) = lookup("STAYBOOK_DATA_DIR") {
            self.data_dir = PathBuf::from(dir);
        }
        if let Some(file) = lookup("STAYBOOK_WAL_FILE") {
            self.wal_file = file;
        }
        if let Some(n) = parse(&lookup, "STAYBOOK_COMPACT_THRESHOLD") {
            self.compact_threshold = n;
        }
        if let Some(ms) = parse(&lookup, "STAYBOOK_LOCK_TIMEOUT_MS") {
            self.lock_timeout_ms = ms;
        }
        if let Some(port) = parse(&lookup, "STAYBOOK_METRICS_PORT") {
            self.metrics_port = Some(port);
        }
        if let Some(days) = parse(&lookup, "STAYBOOK_RETENTION_DAYS") {
            self.retention_days = Some(days);
        }
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join(&self.wal_file)
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }
}
