//! Record Log Configuration
//!
//! - **directory**: where the log file lives (created on open)
//! - **file_name**: log file name inside `directory` (default: `run.tblog`)
//! - **sync_policy**: when appends are synced to disk (default: every 100ms)
//!
//! ## Usage
//!
//! ```ignore
//! use tributary_log::{LogConfig, SyncPolicy};
//!
//! let config = LogConfig {
//!     directory: run_dir.join("log"),
//!     sync_policy: SyncPolicy::Always,
//!     ..Default::default()
//! };
//! ```

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Directory holding the log file
    #[serde(default = "default_directory")]
    pub directory: PathBuf,

    /// Log file name
    #[serde(default = "default_file_name")]
    pub file_name: String,

    /// Sync policy for appends
    #[serde(default)]
    pub sync_policy: SyncPolicy,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            directory: default_directory(),
            file_name: default_file_name(),
            sync_policy: SyncPolicy::default(),
        }
    }
}

impl LogConfig {
    /// Full path of the log file.
    pub fn path(&self) -> PathBuf {
        self.directory.join(&self.file_name)
    }
}

fn default_directory() -> PathBuf {
    PathBuf::from("./data/log")
}

fn default_file_name() -> String {
    "run.tblog".to_string()
}

/// Sync policy for log appends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SyncPolicy {
    /// Sync after every append
    Always,

    /// Sync on the first append after `interval` has elapsed
    Interval {
        #[serde(with = "duration_ms")]
        interval: Duration,
    },

    /// Leave syncing to the OS (tests only)
    Never,
}

impl Default for SyncPolicy {
    fn default() -> Self {
        SyncPolicy::Interval {
            interval: Duration::from_millis(100),
        }
    }
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let ms = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_fill_missing_fields() {
        let config: LogConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.file_name, "run.tblog");
        assert_eq!(config.path(), PathBuf::from("./data/log/run.tblog"));
        assert_eq!(
            config.sync_policy,
            SyncPolicy::Interval {
                interval: Duration::from_millis(100)
            }
        );
    }

    #[test]
    fn test_sync_policy_interval_in_millis() {
        let config: LogConfig = serde_json::from_str(
            r#"{"directory": "/tmp/run", "sync_policy": {"type": "interval", "interval": 250}}"#,
        )
        .unwrap();
        assert_eq!(
            config.sync_policy,
            SyncPolicy::Interval {
                interval: Duration::from_millis(250)
            }
        );

        let json = serde_json::to_string(&config.sync_policy).unwrap();
        assert_eq!(json, r#"{"type":"interval","interval":250}"#);
    }

    #[test]
    fn test_sync_policy_unit_variants() {
        let always: SyncPolicy = serde_json::from_str(r#"{"type": "always"}"#).unwrap();
        assert_eq!(always, SyncPolicy::Always);
        let never: SyncPolicy = serde_json::from_str(r#"{"type": "never"}"#).unwrap();
        assert_eq!(never, SyncPolicy::Never);
    }
}
