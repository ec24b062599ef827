use std::path::PathBuf;
use std::sync::Arc;

use crate::clock::SystemClock;
use crate::engine::EngineOptions;

/// Daemon settings, read from `SLOTBOOK_*` environment variables.
/// Unparseable values fall back to their defaults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub data_dir: PathBuf,
    pub metrics_port: Option<u16>,
    /// WAL appends since the last compaction before the compactor runs.
    pub compact_threshold: u64,
    pub require_approval: bool,
    pub owner_may_reschedule: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            metrics_port: None,
            compact_threshold: 1000,
            require_approval: false,
            owner_may_reschedule: false,
        }
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            data_dir: lookup("SLOTBOOK_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            metrics_port: lookup("SLOTBOOK_METRICS_PORT").and_then(|s| s.parse().ok()),
            compact_threshold: lookup("SLOTBOOK_COMPACT_THRESHOLD")
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.compact_threshold),
            require_approval: lookup("SLOTBOOK_REQUIRE_APPROVAL")
                .and_then(|s| parse_bool(&s))
                .unwrap_or(defaults.require_approval),
            owner_may_reschedule: lookup("SLOTBOOK_OWNER_MAY_RESCHEDULE")
                .and_then(|s| parse_bool(&s))
                .unwrap_or(defaults.owner_may_reschedule),
        }
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("slotbook.wal")
    }

    pub fn engine_options(&self) -> EngineOptions {
        EngineOptions {
            require_approval: self.require_approval,
            owner_may_reschedule: self.owner_may_reschedule,
            clock: Arc::new(SystemClock),
        }
    }
}
