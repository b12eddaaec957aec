use std::path::PathBuf;
use std::time::Duration;

/// Process settings, read from `SEATWISE_*` environment variables.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Journal directory. `None` keeps everything in memory.
    pub data_dir: Option<PathBuf>,
    /// Journal appends before a tenant is compacted.
    pub compact_threshold: u64,
    /// How often the compactor checks.
    pub compact_interval: Duration,
    pub metrics_port: Option<u16>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: None,
            compact_threshold: 1000,
            compact_interval: Duration::from_secs(30),
            metrics_port: None,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup. Unparsable values fall back to defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let data_dir = lookup("SEATWISE_DATA_DIR")
            .filter(|s| !s.is_empty())
            .map(PathBuf::from);
        let compact_threshold: u64 = lookup("SEATWISE_COMPACT_THRESHOLD")
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.compact_threshold);
        let compact_interval = lookup("SEATWISE_COMPACT_INTERVAL_SECS")
            .and_then(|s| s.parse().ok())
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
            .unwrap_or(defaults.compact_interval);
        let metrics_port: Option<u16> = lookup("SEATWISE_METRICS_PORT").and_then(|s| s.parse().ok());

        Self {
            data_dir,
            compact_threshold,
            compact_interval,
            metrics_port,
        }
    }
}
