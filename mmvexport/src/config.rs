//! Configuration types for writers and the update bridge.
//!
//! [`WriterConfig`] describes a metrics file and its metrics and can be
//! loaded from JSON:
//!
//! ```json
//! {
//!   "path": "/tmp/app.mmv",
//!   "variant": "mmv",
//!   "queue_capacity": 1024,
//!   "overflow_warning_interval": 10.0,
//!   "metrics": [
//!     { "name": "app.requests", "unit": "count", "semantics": "counter",
//!       "initial": { "kind": "i64", "value": 0 } },
//!     { "name": "app.io", "unit": "byte/second", "semantics": "instant",
//!       "initial": { "kind": "f64", "value": 0.0 } }
//!   ]
//! }
//! ```
//!
//! Durations are stored as seconds (`f64`).

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigFileError, ConfigurationError, Result};
use crate::unit::Unit;
use crate::value::{MetricValue, Semantics};

pub use crate::format::FormatVariant;

/// Default capacity of the update queue.
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

/// Default minimum time between queue overflow warnings.
pub const DEFAULT_OVERFLOW_WARNING_INTERVAL: Duration = Duration::from_secs(10);

/// Default name of the bridge's writer thread.
pub const DEFAULT_THREAD_NAME: &str = "mmv-writer";

/// One metric in a [`WriterConfig`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricConfig {
    /// Dotted metric name.
    pub name: String,

    /// Unit text such as `"byte/second"` or `"count"`. Parsed with
    /// [`Unit::from_str`](std::str::FromStr::from_str).
    #[serde(default = "default_unit")]
    pub unit: String,

    /// Value semantics.
    #[serde(default)]
    pub semantics: Semantics,

    /// Value written at `start()`; its kind selects the type handler.
    pub initial: MetricValue,
}

fn default_unit() -> String {
    "count".to_string()
}

/// A metrics file and the metrics it carries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WriterConfig {
    /// Path of the data file.
    pub path: PathBuf,

    /// Wire format.
    #[serde(default)]
    pub variant: FormatVariant,

    /// Capacity of the update queue.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Minimum time between queue overflow warnings.
    #[serde(
        with = "duration_serde",
        default = "default_overflow_warning_interval"
    )]
    pub overflow_warning_interval: Duration,

    /// Metrics in registration order.
    #[serde(default)]
    pub metrics: Vec<MetricConfig>,
}

fn default_queue_capacity() -> usize {
    DEFAULT_QUEUE_CAPACITY
}

fn default_overflow_warning_interval() -> Duration {
    DEFAULT_OVERFLOW_WARNING_INTERVAL
}

impl WriterConfig {
    /// Creates an empty configuration for `path`.
    pub fn new<P: AsRef<Path>>(path: P, variant: FormatVariant) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            variant,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            overflow_warning_interval: DEFAULT_OVERFLOW_WARNING_INTERVAL,
            metrics: Vec::new(),
        }
    }

    /// Loads and validates a configuration from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigFileError`] if the file cannot be read or parsed, or
    /// a [`ConfigurationError`] if it fails validation.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|e| ConfigFileError::Read {
            path: path.to_path_buf(),
            source: e,
        })?;
        let config: Self = serde_json::from_str(&text).map_err(|e| ConfigFileError::Parse {
            path: path.to_path_buf(),
            source: e,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Checks queue settings, name uniqueness and limits, and that every
    /// unit parses.
    ///
    /// # Errors
    ///
    /// Returns the first [`ConfigurationError`] found.
    pub fn validate(&self) -> Result<()> {
        if self.queue_capacity == 0 {
            return Err(ConfigurationError::InvalidConfig {
                reason: "queue_capacity must be at least 1".to_string(),
            }
            .into());
        }

        let format = self.variant.format();
        let mut seen = std::collections::HashSet::new();
        for metric in &self.metrics {
            format.validate_name(&metric.name)?;
            if !seen.insert(metric.name.as_str()) {
                return Err(ConfigurationError::DuplicateMetric {
                    name: metric.name.clone(),
                }
                .into());
            }
            metric.unit.parse::<Unit>()?;
        }
        Ok(())
    }

    /// Bridge settings derived from this configuration.
    pub fn bridge_config(&self) -> BridgeConfig {
        BridgeConfig {
            capacity: self.queue_capacity,
            overflow_warning_interval: self.overflow_warning_interval,
            ..BridgeConfig::default()
        }
    }
}

/// Settings for an [`UpdateBridge`](crate::bridge::UpdateBridge).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeConfig {
    /// Queue capacity; signals beyond it are dropped.
    pub capacity: usize,
    /// Minimum time between overflow warnings.
    pub overflow_warning_interval: Duration,
    /// Name given to the writer thread.
    pub thread_name: String,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_QUEUE_CAPACITY,
            overflow_warning_interval: DEFAULT_OVERFLOW_WARNING_INTERVAL,
            thread_name: DEFAULT_THREAD_NAME.to_string(),
        }
    }
}

/// Serde helper storing a `Duration` as fractional seconds.
mod duration_serde {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serialize, Serializer, de};

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_secs_f64().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let seconds = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(seconds).map_err(de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MmvError;

    fn sample() -> WriterConfig {
        let mut config = WriterConfig::new("/tmp/app.mmv", FormatVariant::Mmv);
        config.metrics.push(MetricConfig {
            name: "app.requests".to_string(),
            unit: "count".to_string(),
            semantics: Semantics::Counter,
            initial: MetricValue::I64(0),
        });
        config
    }

    #[test]
    fn test_json_round_trip() {
        let config = sample();
        let json = serde_json::to_string(&config).unwrap();
        assert!(json.contains("\"overflow_warning_interval\":10.0"));
        assert!(json.contains("\"variant\":\"mmv\""));
        let back: WriterConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, config);
    }

    #[test]
    fn test_defaults_fill_missing_fields() {
        let json = r#"{
            "path": "/tmp/x.mmv",
            "metrics": [{ "name": "a", "initial": { "kind": "i32", "value": 3 } }]
        }"#;
        let config: WriterConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.variant, FormatVariant::Mmv);
        assert_eq!(config.queue_capacity, DEFAULT_QUEUE_CAPACITY);
        assert_eq!(config.metrics[0].unit, "count");
        assert_eq!(config.metrics[0].semantics, Semantics::Unspecified);
        config.validate().unwrap();
    }

    #[test]
    fn test_negative_interval_rejected() {
        let json = r#"{ "path": "/tmp/x.mmv", "overflow_warning_interval": -1.0 }"#;
        assert!(serde_json::from_str::<WriterConfig>(json).is_err());
    }

    #[test]
    fn test_validate_rejects_bad_entries() {
        let mut config = sample();
        config.queue_capacity = 0;
        assert!(config.validate().is_err());

        let mut config = sample();
        config.metrics.push(config.metrics[0].clone());
        assert!(matches!(
            config.validate().unwrap_err(),
            MmvError::Configuration(ConfigurationError::DuplicateMetric { .. })
        ));

        let mut config = sample();
        config.metrics[0].unit = "furlong".to_string();
        assert!(matches!(
            config.validate().unwrap_err(),
            MmvError::Configuration(ConfigurationError::InvalidUnit { .. })
        ));

        let mut config = sample();
        config.metrics[0].name = "n".repeat(64);
        assert!(config.validate().is_err());
        config.variant = FormatVariant::Legacy;
        config.validate().unwrap();
    }

    #[test]
    fn test_from_json_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("writer.json");
        fs::write(&path, serde_json::to_string_pretty(&sample()).unwrap()).unwrap();
        assert_eq!(WriterConfig::from_json_file(&path).unwrap(), sample());

        fs::write(&path, "{ not json").unwrap();
        assert!(matches!(
            WriterConfig::from_json_file(&path).unwrap_err(),
            MmvError::ConfigFile(ConfigFileError::Parse { .. })
        ));
        assert!(matches!(
            WriterConfig::from_json_file(dir.path().join("missing.json")).unwrap_err(),
            MmvError::ConfigFile(ConfigFileError::Read { .. })
        ));
    }

    #[test]
    fn test_bridge_config_follows_writer_config() {
        let mut config = sample();
        config.queue_capacity = 8;
        let bridge = config.bridge_config();
        assert_eq!(bridge.capacity, 8);
        assert_eq!(bridge.thread_name, DEFAULT_THREAD_NAME);
    }
}
