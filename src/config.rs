//! Runtime settings
//!
//! Settings are layered: built-in defaults, then `ONVIF_RECORDER_*`
//! environment overrides, then command line flags applied by the binary.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

const ENV_PREFIX: &str = "ONVIF_RECORDER_";

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("invalid value {value:?} for {key}: {reason}")]
    InvalidValue {
        key: String,
        value: String,
        reason: String,
    },

    #[error("{0} must be greater than zero")]
    Zero(&'static str),
}

/// Settings shared by the recorder, the log sink and the HTTP proxy
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Settings {
    /// Length of one recording segment
    #[serde(with = "duration_secs")]
    pub rotation_interval: Duration,

    /// Wait between a failed segment attempt and the next one
    #[serde(with = "duration_secs")]
    pub retry_backoff: Duration,

    /// How long ffmpeg gets to finalize a file after being asked to quit
    #[serde(with = "duration_secs")]
    pub stop_grace: Duration,

    /// File extension of recorded segments
    pub segment_extension: String,

    /// Interval between log flushes
    #[serde(with = "duration_secs")]
    pub log_flush_interval: Duration,

    /// Root directory for log files
    pub log_dir: PathBuf,

    /// Application folder created under `log_dir`
    pub log_app_name: String,

    /// Force Trace/Debug entries into the log file. `None` follows the build profile.
    pub log_verbose: Option<bool>,

    /// ffmpeg executable
    pub ffmpeg_path: PathBuf,

    /// Listen address of the HTTP proxy, or `auto` for a free loopback port
    pub http_bind: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            rotation_interval: Duration::from_secs(15 * 60),
            retry_backoff: Duration::from_secs(5),
            stop_grace: Duration::from_secs(10),
            segment_extension: "mp4".to_string(),
            log_flush_interval: Duration::from_secs(5),
            log_dir: std::env::temp_dir(),
            log_app_name: "OnvifRecorder".to_string(),
            log_verbose: None,
            ffmpeg_path: PathBuf::from("ffmpeg"),
            http_bind: "127.0.0.1:8080".to_string(),
        }
    }
}

impl Settings {
    /// Defaults overlaid with the process environment
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut settings = Self::default();
        settings.apply_env(|key| std::env::var(key).ok())?;
        Ok(settings)
    }

    /// Apply overrides from an arbitrary variable lookup
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(&format!("{}{}", ENV_PREFIX, name));

        if let Some(v) = get("ROTATION_SECS") {
            self.rotation_interval = parse_secs("ROTATION_SECS", &v)?;
        }
        if let Some(v) = get("RETRY_BACKOFF_SECS") {
            self.retry_backoff = parse_secs("RETRY_BACKOFF_SECS", &v)?;
        }
        if let Some(v) = get("STOP_GRACE_SECS") {
            self.stop_grace = parse_secs("STOP_GRACE_SECS", &v)?;
        }
        if let Some(v) = get("LOG_FLUSH_SECS") {
            self.log_flush_interval = parse_secs("LOG_FLUSH_SECS", &v)?;
        }
        if let Some(v) = get("EXTENSION") {
            self.segment_extension = v.trim_start_matches('.').to_string();
        }
        if let Some(v) = get("LOG_DIR") {
            self.log_dir = PathBuf::from(v);
        }
        if let Some(v) = get("LOG_VERBOSE") {
            self.log_verbose = Some(parse_bool("LOG_VERBOSE", &v)?);
        }
        if let Some(v) = get("FFMPEG") {
            self.ffmpeg_path = PathBuf::from(v);
        }
        if let Some(v) = get("HTTP_BIND") {
            self.http_bind = v;
        }

        self.validate()
    }

    /// Reject settings the recorder cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.rotation_interval.is_zero() {
            return Err(ConfigError::Zero("rotation interval"));
        }
        if self.log_flush_interval.is_zero() {
            return Err(ConfigError::Zero("log flush interval"));
        }
        if self.segment_extension.is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "segment_extension".to_string(),
                value: String::new(),
                reason: "extension is empty".to_string(),
            });
        }
        Ok(())
    }
}

fn parse_secs(key: &str, value: &str) -> Result<Duration, ConfigError> {
    value
        .trim()
        .parse::<u64>()
        .map(Duration::from_secs)
        .map_err(|e| ConfigError::InvalidValue {
            key: format!("{}{}", ENV_PREFIX, key),
            value: value.to_string(),
            reason: e.to_string(),
        })
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key: format!("{}{}", ENV_PREFIX, key),
            value: value.to_string(),
            reason: "expected a boolean".to_string(),
        }),
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}
