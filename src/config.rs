//! Session configuration
//!
//! [`HidServicesConfig`] can be built in code or loaded from TOML:
//!
//! ```toml
//! scan_mode = "fixed_interval_with_pause_after_write"
//! scan_interval_ms = 500
//! pause_interval_ms = 5000
//! auto_start = false
//! ```
//!
//! Intervals are signed so that a negative value in a file is reported as
//! [`HidError::InvalidConfig`] instead of a parse error.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::HidError;
use hidwatch_transport::protocol::DEFAULT_REPORT_LEN;

/// Scanning strategy as written in configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanModeKind {
    /// Scan once at start, then only on request
    NoScan,
    /// Scan continuously at the scan interval
    #[default]
    FixedInterval,
    /// Scan continuously, pausing after every write
    FixedIntervalWithPauseAfterWrite,
}

/// Resolved scanning strategy with its parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanMode {
    /// Single scan at start; further scans only through `scan()`
    NoScan,
    /// Wait `interval`, scan, repeat
    FixedInterval(Duration),
    /// Wait `pause` once, then behave as `FixedInterval(interval)`.
    /// A completed write restarts the schedule from the pause.
    FixedIntervalWithPauseAfterWrite { interval: Duration, pause: Duration },
}

impl ScanMode {
    /// Replace the scan interval, keeping the variant
    pub fn with_interval(self, interval: Duration) -> Self {
        match self {
            ScanMode::NoScan => ScanMode::NoScan,
            ScanMode::FixedInterval(_) => ScanMode::FixedInterval(interval),
            ScanMode::FixedIntervalWithPauseAfterWrite { pause, .. } => {
                ScanMode::FixedIntervalWithPauseAfterWrite { interval, pause }
            }
        }
    }

    pub fn pauses_after_write(&self) -> bool {
        matches!(self, ScanMode::FixedIntervalWithPauseAfterWrite { .. })
    }
}

fn default_scan_interval() -> i64 {
    500
}

fn default_pause_interval() -> i64 {
    5000
}

fn default_data_read_interval() -> i64 {
    500
}

fn default_report_len() -> usize {
    DEFAULT_REPORT_LEN
}

fn default_true() -> bool {
    true
}

/// Parameters for a HID session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HidServicesConfig {
    /// Scanning strategy for attach/detach detection
    #[serde(default)]
    pub scan_mode: ScanModeKind,
    /// Milliseconds between enumeration scans (0 disables scanning)
    #[serde(default = "default_scan_interval")]
    pub scan_interval_ms: i64,
    /// Milliseconds scanning is paused after a write
    #[serde(default = "default_pause_interval")]
    pub pause_interval_ms: i64,
    /// Start scanning when the session is created
    #[serde(default = "default_true")]
    pub auto_start: bool,
    /// Shut the session down (and release the library) when it is dropped
    #[serde(default = "default_true")]
    pub auto_shutdown: bool,
    /// Poll opened devices for input reports and fire `DataReceived`
    #[serde(default)]
    pub auto_data_read: bool,
    /// Milliseconds between automatic input report reads
    #[serde(default = "default_data_read_interval")]
    pub data_read_interval_ms: i64,
    /// Input/feature report length, excluding the report ID
    #[serde(default = "default_report_len")]
    pub report_len: usize,
    /// Log every report buffer at trace level
    #[serde(default)]
    pub log_traffic: bool,
}

impl Default for HidServicesConfig {
    fn default() -> Self {
        Self {
            scan_mode: ScanModeKind::default(),
            scan_interval_ms: default_scan_interval(),
            pause_interval_ms: default_pause_interval(),
            auto_start: true,
            auto_shutdown: true,
            auto_data_read: false,
            data_read_interval_ms: default_data_read_interval(),
            report_len: default_report_len(),
            log_traffic: false,
        }
    }
}

fn non_negative(name: &str, value: i64) -> Result<u64, HidError> {
    u64::try_from(value).map_err(|_| {
        HidError::InvalidConfig(format!("'{name}' must be greater than or equal to zero"))
    })
}

impl HidServicesConfig {
    /// Parse a TOML document and validate it
    pub fn from_toml_str(s: &str) -> Result<Self, HidError> {
        let config: Self = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML configuration file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, HidError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| HidError::Config(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&content)
    }

    /// Check every interval is non-negative and the report length is usable
    pub fn validate(&self) -> Result<(), HidError> {
        non_negative("scan_interval_ms", self.scan_interval_ms)?;
        non_negative("pause_interval_ms", self.pause_interval_ms)?;
        non_negative("data_read_interval_ms", self.data_read_interval_ms)?;
        if self.report_len == 0 {
            return Err(HidError::InvalidConfig(
                "'report_len' must be greater than zero".into(),
            ));
        }
        Ok(())
    }

    pub fn with_scan_mode(mut self, scan_mode: ScanModeKind) -> Self {
        self.scan_mode = scan_mode;
        self
    }

    pub fn with_auto_start(mut self, auto_start: bool) -> Self {
        self.auto_start = auto_start;
        self
    }

    pub fn with_auto_shutdown(mut self, auto_shutdown: bool) -> Self {
        self.auto_shutdown = auto_shutdown;
        self
    }

    pub fn with_auto_data_read(mut self, auto_data_read: bool) -> Self {
        self.auto_data_read = auto_data_read;
        self
    }

    pub fn set_scan_interval_ms(&mut self, ms: i64) -> Result<(), HidError> {
        non_negative("scan_interval_ms", ms)?;
        self.scan_interval_ms = ms;
        Ok(())
    }

    pub fn set_pause_interval_ms(&mut self, ms: i64) -> Result<(), HidError> {
        non_negative("pause_interval_ms", ms)?;
        self.pause_interval_ms = ms;
        Ok(())
    }

    pub fn set_data_read_interval_ms(&mut self, ms: i64) -> Result<(), HidError> {
        non_negative("data_read_interval_ms", ms)?;
        self.data_read_interval_ms = ms;
        Ok(())
    }

    /// Resolve the configured scanning strategy
    ///
    /// A zero scan interval disables background scanning.
    pub fn resolve_scan_mode(&self) -> Result<ScanMode, HidError> {
        let interval = Duration::from_millis(non_negative("scan_interval_ms", self.scan_interval_ms)?);
        let pause = Duration::from_millis(non_negative("pause_interval_ms", self.pause_interval_ms)?);

        if interval.is_zero() {
            return Ok(ScanMode::NoScan);
        }
        Ok(match self.scan_mode {
            ScanModeKind::NoScan => ScanMode::NoScan,
            ScanModeKind::FixedInterval => ScanMode::FixedInterval(interval),
            ScanModeKind::FixedIntervalWithPauseAfterWrite => {
                ScanMode::FixedIntervalWithPauseAfterWrite { interval, pause }
            }
        })
    }

    /// Interval between automatic reads, if automatic reading is enabled
    pub fn data_read_interval(&self) -> Result<Option<Duration>, HidError> {
        if !self.auto_data_read {
            return Ok(None);
        }
        let ms = non_negative("data_read_interval_ms", self.data_read_interval_ms)?;
        Ok(Some(Duration::from_millis(ms)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = HidServicesConfig::default();
        assert_eq!(config.scan_mode, ScanModeKind::FixedInterval);
        assert_eq!(config.scan_interval_ms, 500);
        assert_eq!(config.pause_interval_ms, 5000);
        assert!(config.auto_start);
        assert!(config.auto_shutdown);
        assert!(!config.auto_data_read);
        assert_eq!(
            config.resolve_scan_mode().unwrap(),
            ScanMode::FixedInterval(Duration::from_millis(500))
        );
        assert_eq!(config.data_read_interval().unwrap(), None);
    }

    #[test]
    fn test_negative_intervals_rejected() {
        let mut config = HidServicesConfig::default();
        assert!(matches!(
            config.set_scan_interval_ms(-1),
            Err(HidError::InvalidConfig(_))
        ));
        assert!(config.set_pause_interval_ms(-5).is_err());
        assert!(config.set_data_read_interval_ms(-5).is_err());
        assert_eq!(config.scan_interval_ms, 500);

        config.scan_interval_ms = -10;
        assert!(config.validate().is_err());
        assert!(config.resolve_scan_mode().is_err());
    }

    #[test]
    fn test_zero_interval_disables_scanning() {
        let mut config = HidServicesConfig::default();
        config.set_scan_interval_ms(0).unwrap();
        assert_eq!(config.resolve_scan_mode().unwrap(), ScanMode::NoScan);
    }

    #[test]
    fn test_pause_mode_resolution() {
        let config = HidServicesConfig::default()
            .with_scan_mode(ScanModeKind::FixedIntervalWithPauseAfterWrite);
        let mode = config.resolve_scan_mode().unwrap();
        assert_eq!(
            mode,
            ScanMode::FixedIntervalWithPauseAfterWrite {
                interval: Duration::from_millis(500),
                pause: Duration::from_millis(5000),
            }
        );
        assert!(mode.pauses_after_write());
    }

    #[test]
    fn test_with_interval_keeps_variant() {
        let mode = ScanMode::FixedIntervalWithPauseAfterWrite {
            interval: Duration::from_millis(500),
            pause: Duration::from_millis(100),
        };
        assert_eq!(
            mode.with_interval(Duration::from_millis(50)),
            ScanMode::FixedIntervalWithPauseAfterWrite {
                interval: Duration::from_millis(50),
                pause: Duration::from_millis(100),
            }
        );
        assert_eq!(
            ScanMode::NoScan.with_interval(Duration::from_millis(50)),
            ScanMode::NoScan
        );
    }

    #[test]
    fn test_from_toml() {
        let config = HidServicesConfig::from_toml_str(
            r#"
            scan_mode = "fixed_interval_with_pause_after_write"
            scan_interval_ms = 250
            pause_interval_ms = 1000
            auto_start = false
            auto_data_read = true
            data_read_interval_ms = 20
            "#,
        )
        .unwrap();
        assert_eq!(
            config.scan_mode,
            ScanModeKind::FixedIntervalWithPauseAfterWrite
        );
        assert_eq!(config.scan_interval_ms, 250);
        assert!(!config.auto_start);
        assert!(config.auto_shutdown);
        assert_eq!(
            config.data_read_interval().unwrap(),
            Some(Duration::from_millis(20))
        );
    }

    #[test]
    fn test_toml_negative_interval_is_invalid_config() {
        let err = HidServicesConfig::from_toml_str("pause_interval_ms = -1").unwrap_err();
        assert!(matches!(err, HidError::InvalidConfig(_)));
    }

    #[test]
    fn test_toml_unknown_mode_is_config_error() {
        let err = HidServicesConfig::from_toml_str("scan_mode = \"sometimes\"").unwrap_err();
        assert!(matches!(err, HidError::Config(_)));
    }

    #[test]
    fn test_toml_round_trip_of_defaults() {
        let text = toml::to_string(&HidServicesConfig::default()).unwrap();
        assert_eq!(
            HidServicesConfig::from_toml_str(&text).unwrap(),
            HidServicesConfig::default()
        );
    }
}
