//! Flow Control and Router Configuration
//!
//! ## Thresholds
//!
//! All thresholds are measured in bytes the sender is behind, i.e.
//! `forwarded - reported`:
//!
//! - **threshold_high_bytes**: stop live forwarding (default: 4 MiB)
//! - **threshold_mid_bytes**: replay buffered data while still paused (default: 2 MiB)
//! - **threshold_low_bytes**: resume live forwarding (default: 1 MiB)
//! - **mark_granularity_bytes**: forwarded bytes between progress marks (default: 64 KiB)
//! - **recover_min_bytes**: smallest buffered range worth a partial replay (default: 32 KiB)
//!
//! Setting **ram_buffer_bytes** replaces the three thresholds with
//! `high = ram_buffer`, `mid = ram_buffer / 2`, `low = ram_buffer / 4`.
//!
//! ## Environment
//!
//! `FlowControlConfig::from_env()` applies these overrides on top of the defaults:
//!
//! | Variable | Field |
//! |---|---|
//! | `TRIBUTARY_RAM_BUFFER` | `ram_buffer_bytes` |
//! | `TRIBUTARY_FLOW_HIGH` | `threshold_high_bytes` |
//! | `TRIBUTARY_FLOW_MID` | `threshold_mid_bytes` |
//! | `TRIBUTARY_FLOW_LOW` | `threshold_low_bytes` |
//! | `TRIBUTARY_MARK_GRANULARITY` | `mark_granularity_bytes` |

use crate::error::{FlowError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

const KIB: u64 = 1024;
const MIB: u64 = 1024 * KIB;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowControlConfig {
    #[serde(default = "default_threshold_high")]
    pub threshold_high_bytes: u64,

    #[serde(default = "default_threshold_mid")]
    pub threshold_mid_bytes: u64,

    #[serde(default = "default_threshold_low")]
    pub threshold_low_bytes: u64,

    #[serde(default = "default_mark_granularity")]
    pub mark_granularity_bytes: u64,

    #[serde(default = "default_recover_min")]
    pub recover_min_bytes: u64,

    /// Overrides the three thresholds when set
    #[serde(default)]
    pub ram_buffer_bytes: Option<u64>,
}

impl Default for FlowControlConfig {
    fn default() -> Self {
        Self {
            threshold_high_bytes: default_threshold_high(),
            threshold_mid_bytes: default_threshold_mid(),
            threshold_low_bytes: default_threshold_low(),
            mark_granularity_bytes: default_mark_granularity(),
            recover_min_bytes: default_recover_min(),
            ram_buffer_bytes: None,
        }
    }
}

fn default_threshold_high() -> u64 {
    4 * MIB
}

fn default_threshold_mid() -> u64 {
    2 * MIB
}

fn default_threshold_low() -> u64 {
    MIB
}

fn default_mark_granularity() -> u64 {
    64 * KIB
}

fn default_recover_min() -> u64 {
    32 * KIB
}

impl FlowControlConfig {
    /// Defaults overridden by `TRIBUTARY_*` environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as `from_env` with a caller-supplied variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let parse = |key: &'static str| -> Result<Option<u64>> {
            match lookup(key) {
                Some(raw) => raw
                    .trim()
                    .parse::<u64>()
                    .map(Some)
                    .map_err(|e| FlowError::Config(format!("{}={:?}: {}", key, raw, e))),
                None => Ok(None),
            }
        };

        let mut config = Self::default();
        if let Some(value) = parse("TRIBUTARY_FLOW_HIGH")? {
            config.threshold_high_bytes = value;
        }
        if let Some(value) = parse("TRIBUTARY_FLOW_MID")? {
            config.threshold_mid_bytes = value;
        }
        if let Some(value) = parse("TRIBUTARY_FLOW_LOW")? {
            config.threshold_low_bytes = value;
        }
        if let Some(value) = parse("TRIBUTARY_MARK_GRANULARITY")? {
            config.mark_granularity_bytes = value;
        }
        config.ram_buffer_bytes = parse("TRIBUTARY_RAM_BUFFER")?;
        Ok(config)
    }

    /// Resolve the effective thresholds and validate them.
    pub fn thresholds(&self) -> Result<Thresholds> {
        let (high, mid, low) = match self.ram_buffer_bytes {
            Some(ram_buffer) => (ram_buffer, ram_buffer / 2, ram_buffer / 4),
            None => (
                self.threshold_high_bytes,
                self.threshold_mid_bytes,
                self.threshold_low_bytes,
            ),
        };
        Thresholds::new(
            high,
            mid,
            low,
            self.mark_granularity_bytes,
            self.recover_min_bytes,
        )
    }
}

/// Validated byte thresholds, fixed for the lifetime of an engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Thresholds {
    pub high: u64,
    pub mid: u64,
    pub low: u64,
    pub mark_granularity: u64,
    pub recover_min: u64,
}

impl Thresholds {
    pub fn new(
        high: u64,
        mid: u64,
        low: u64,
        mark_granularity: u64,
        recover_min: u64,
    ) -> Result<Self> {
        if !(low < mid && mid < high) {
            return Err(FlowError::InvalidThresholds { low, mid, high });
        }
        if mark_granularity == 0 {
            return Err(FlowError::Config(
                "mark granularity must be greater than zero".to_string(),
            ));
        }
        Ok(Self {
            high,
            mid,
            low,
            mark_granularity,
            recover_min,
        })
    }
}

/// Router configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterConfig {
    /// Bounded wait for one poll of the response channel
    #[serde(default = "default_poll_interval", with = "duration_ms")]
    pub poll_interval: Duration,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            poll_interval: default_poll_interval(),
        }
    }
}

fn default_poll_interval() -> Duration {
    Duration::from_secs(1)
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
    use std::collections::HashMap;

    #[test]
    fn test_default_thresholds() {
        let thresholds = FlowControlConfig::default().thresholds().unwrap();
        assert_eq!(thresholds.high, 4 * MIB);
        assert_eq!(thresholds.mid, 2 * MIB);
        assert_eq!(thresholds.low, MIB);
        assert_eq!(thresholds.mark_granularity, 64 * KIB);
        assert_eq!(thresholds.recover_min, 32 * KIB);
    }

    #[test]
    fn test_ram_buffer_overrides_thresholds() {
        let config = FlowControlConfig {
            threshold_high_bytes: 1,
            ram_buffer_bytes: Some(8 * MIB),
            ..Default::default()
        };
        let thresholds = config.thresholds().unwrap();
        assert_eq!(thresholds.high, 8 * MIB);
        assert_eq!(thresholds.mid, 4 * MIB);
        assert_eq!(thresholds.low, 2 * MIB);
    }

    #[test]
    fn test_threshold_ordering_is_enforced() {
        let config = FlowControlConfig {
            threshold_high_bytes: 100,
            threshold_mid_bytes: 100,
            threshold_low_bytes: 10,
            ..Default::default()
        };
        assert!(matches!(
            config.thresholds(),
            Err(FlowError::InvalidThresholds {
                low: 10,
                mid: 100,
                high: 100
            })
        ));

        assert!(Thresholds::new(100, 50, 50, 1, 0).is_err());
        // A one-byte ram buffer collapses mid and low to zero
        let config = FlowControlConfig {
            ram_buffer_bytes: Some(1),
            ..Default::default()
        };
        assert!(config.thresholds().is_err());

        // Two bytes is the smallest buffer with distinct thresholds
        let config = FlowControlConfig {
            ram_buffer_bytes: Some(2),
            ..Default::default()
        };
        let thresholds = config.thresholds().unwrap();
        assert_eq!((thresholds.high, thresholds.mid, thresholds.low), (2, 1, 0));
    }

    #[test]
    fn test_zero_mark_granularity_rejected() {
        assert!(matches!(
            Thresholds::new(100, 50, 10, 0, 0),
            Err(FlowError::Config(_))
        ));
    }

    #[test]
    fn test_from_lookup() {
        let vars: HashMap<&str, &str> = [
            ("TRIBUTARY_FLOW_HIGH", "1000"),
            ("TRIBUTARY_FLOW_MID", "500"),
            ("TRIBUTARY_FLOW_LOW", " 100 "),
        ]
        .into_iter()
        .collect();
        let config =
            FlowControlConfig::from_lookup(|key| vars.get(key).map(|v| v.to_string())).unwrap();

        assert_eq!(config.threshold_high_bytes, 1000);
        assert_eq!(config.threshold_mid_bytes, 500);
        assert_eq!(config.threshold_low_bytes, 100);
        assert_eq!(config.mark_granularity_bytes, 64 * KIB);
        assert_eq!(config.ram_buffer_bytes, None);
    }

    #[test]
    fn test_from_lookup_rejects_garbage() {
        let result = FlowControlConfig::from_lookup(|key| {
            (key == "TRIBUTARY_RAM_BUFFER").then(|| "lots".to_string())
        });
        assert!(matches!(result, Err(FlowError::Config(_))));
    }

    #[test]
    fn test_serde_defaults() {
        let config: FlowControlConfig =
            serde_json::from_str(r#"{"ram_buffer_bytes": 4096}"#).unwrap();
        assert_eq!(config.ram_buffer_bytes, Some(4096));
        assert_eq!(config.threshold_high_bytes, 4 * MIB);

        let router: RouterConfig = serde_json::from_str(r#"{"poll_interval": 250}"#).unwrap();
        assert_eq!(router.poll_interval, Duration::from_millis(250));
        let router: RouterConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(router.poll_interval, Duration::from_secs(1));
    }
}
