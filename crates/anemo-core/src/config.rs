//! Station configuration
//!
//! Every section carries its own defaults so a partial JSON document (or none
//! at all) still produces a usable configuration.

use alloc::string::String;

use serde::Deserialize;
use thiserror_no_std::Error;

use crate::time::{PosixZone, ZoneError};

/// Seconds in one calendar day; bucket sizes must divide it evenly.
pub const SECONDS_PER_DAY: u32 = 86_400;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("bucket_seconds must be non-zero and divide 86400 (got {0})")]
    BucketSeconds(u32),
    #[error("days_history must be at least 1")]
    DaysHistory,
    #[error("wind window must be non-zero")]
    WindWindow,
    #[error("utc offset of {0} minutes is out of range")]
    UtcOffset(i32),
    #[error("invalid posix_tz: {0}")]
    TimeZone(ZoneError),
    #[error("auth max_failures must be at least 1")]
    AuthFailures,
    #[error("directory names must be non-empty relative names")]
    Directory,
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct StationConfig {
    /// Password for the privileged endpoints
    pub api_password: String,
    pub log: LogConfig,
    pub wind: WindConfig,
    pub sensors: SensorConfig,
    pub time: TimeConfig,
    pub auth: AuthConfig,
    pub ui: UiConfig,
    pub archive: ArchiveConfig,
}

impl Default for StationConfig {
    fn default() -> Self {
        Self {
            api_password: String::from("ChangeMe"),
            log: LogConfig::default(),
            wind: WindConfig::default(),
            sensors: SensorConfig::default(),
            time: TimeConfig::default(),
            auth: AuthConfig::default(),
            ui: UiConfig::default(),
            archive: ArchiveConfig::default(),
        }
    }
}

impl StationConfig {
    /// Check the cross-field constraints that serde defaults cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let bucket = self.log.bucket_seconds;
        if bucket == 0 || SECONDS_PER_DAY % bucket != 0 {
            return Err(ConfigError::BucketSeconds(bucket));
        }
        if self.log.days_history == 0 {
            return Err(ConfigError::DaysHistory);
        }
        if self.wind.window_ms == 0 {
            return Err(ConfigError::WindWindow);
        }
        // chrono accepts strictly less than a day in either direction
        if self.time.utc_offset_minutes.abs() >= 24 * 60 {
            return Err(ConfigError::UtcOffset(self.time.utc_offset_minutes));
        }
        if let Some(tz) = self.time.posix_tz.as_deref().filter(|tz| !tz.trim().is_empty()) {
            PosixZone::parse(tz).map_err(ConfigError::TimeZone)?;
        }
        if self.auth.max_failures == 0 {
            return Err(ConfigError::AuthFailures);
        }
        for dir in [&self.log.data_dir, &self.ui.ui_dir] {
            if dir.is_empty() || dir.starts_with('/') || dir.contains("..") {
                return Err(ConfigError::Directory);
            }
        }
        Ok(())
    }
}

/// Bucket and retention settings for the durable logs
#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct LogConfig {
    /// Bucket length (60 = one row per minute)
    pub bucket_seconds: u32,
    /// Days of CSV logs kept on the volume, 0 keeps everything
    pub retention_days: u32,
    /// Daily summaries kept in RAM
    pub days_history: usize,
    /// Directory holding the per-day CSV files
    pub data_dir: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            bucket_seconds: 60,
            retention_days: 0,
            days_history: 30,
            data_dir: String::from("data"),
        }
    }
}

impl LogConfig {
    /// Number of buckets that cover 24 hours.
    pub const fn buckets_per_day(&self) -> usize {
        (SECONDS_PER_DAY / self.bucket_seconds) as usize
    }
}

/// Pulse anemometer calibration
#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct WindConfig {
    /// Metres per second produced by one pulse per second
    pub pps_to_ms: f32,
    /// Length of the pulse-rate window
    pub window_ms: u64,
    /// Pulses closer together than this are contact bounce
    pub debounce_us: u64,
}

impl Default for WindConfig {
    fn default() -> Self {
        Self {
            // 20 pulses per second = 1.75 m/s
            pps_to_ms: 1.75 / 20.0,
            window_ms: 1000,
            debounce_us: 2000,
        }
    }
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct SensorConfig {
    pub environment_enabled: bool,
    pub environment_poll_ms: u64,
    pub particulate_enabled: bool,
    pub particulate_poll_ms: u64,
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            environment_enabled: true,
            environment_poll_ms: 2000,
            particulate_enabled: true,
            particulate_poll_ms: 2000,
        }
    }
}

#[derive(Deserialize, Debug, Clone, PartialEq, Default)]
#[serde(default)]
pub struct TimeConfig {
    /// Local offset east of UTC, used for day boundaries and labels
    pub utc_offset_minutes: i32,
    /// POSIX `TZ` rule with daylight saving; replaces the fixed offset when set
    pub posix_tz: Option<String>,
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct AuthConfig {
    pub max_failures: u32,
    pub window_secs: u64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            max_failures: 10,
            window_secs: 3600,
        }
    }
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct UiConfig {
    /// Directory that receives uploaded dashboard assets
    pub ui_dir: String,
}

impl Default for UiConfig {
    fn default() -> Self {
        Self {
            ui_dir: String::from("web"),
        }
    }
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct ArchiveConfig {
    pub default_days: usize,
    pub max_days: usize,
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            default_days: 7,
            max_days: 31,
        }
    }
}
