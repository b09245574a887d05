//! Device bridge contract
//!
//! Every device interaction the app performs goes through [`DeviceBridge`].
//! Implementations are stateless per call; calls to one device are
//! serialized by the implementation.

use std::path::{Path, PathBuf};
use std::time::Duration;

use flowfuzz_core::crash::LogDialect;
use flowfuzz_core::prelude::*;
use flowfuzz_core::Point;
use serde::{Deserialize, Serialize};

use crate::devices::DeviceEntry;

/// Android `KEYCODE_HOME`
pub const KEYCODE_HOME: u32 = 3;

/// Android `KEYCODE_BACK`
pub const KEYCODE_BACK: u32 = 4;

/// Default bounded wait for a log dump
pub const DEFAULT_LOG_TIMEOUT: Duration = Duration::from_secs(10);

/// Default bounded wait for a screen capture
pub const DEFAULT_CAPTURE_TIMEOUT: Duration = Duration::from_secs(30);

/// Default bounded wait for every other command
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(15);

/// Operations on one attached device
///
/// Every call fails with [`Error::BridgeUnavailable`] when the bridge cannot
/// be invoked or exits non-zero, and with [`Error::Timeout`] when it does not
/// answer within its bounded wait. Key codes are Android key codes; other
/// platforms translate them.
#[trait_variant::make(DeviceBridge: Send)]
pub trait LocalDeviceBridge {
    /// Start the app through its launcher intent, or a specific activity
    async fn launch(&self, package: &str, activity: Option<&str>) -> Result<()>;

    /// Force-stop the app
    async fn stop(&self, package: &str) -> Result<()>;

    async fn tap(&self, at: Point) -> Result<()>;

    async fn swipe(&self, from: Point, to: Point, duration: Duration) -> Result<()>;

    async fn type_text(&self, text: &str) -> Result<()>;

    async fn key_event(&self, code: u32) -> Result<()>;

    /// Dump the device log; with `clear` the log buffer is cleared first
    async fn dump_log(&self, clear: bool) -> Result<String>;

    /// Write a screenshot to `path` and return the written path
    async fn capture(&self, path: &Path) -> Result<PathBuf>;

    /// Whether the app currently has a live process
    async fn is_running(&self, package: &str) -> Result<bool>;

    async fn list_devices(&self) -> Result<Vec<DeviceEntry>>;

    /// Format of the dumps returned by `dump_log`
    fn log_dialect(&self) -> LogDialect {
        LogDialect::Logcat
    }
}

/// Device platform, selecting the bridge CLI
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    /// Android through `adb`
    #[default]
    Android,
    /// HarmonyOS through `hdc`
    Harmony,
}

impl Platform {
    /// Name of the bridge CLI for this platform
    pub fn tool(&self) -> &'static str {
        match self {
            Platform::Android => "adb",
            Platform::Harmony => "hdc",
        }
    }
}

/// Bridge settings (`[bridge]` section of the config file)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    pub platform: Platform,

    /// Explicit adb program; looked up on PATH and the SDK when unset
    pub adb_path: Option<PathBuf>,

    /// Explicit hdc program; looked up on PATH and the OpenHarmony SDK when unset
    pub hdc_path: Option<PathBuf>,

    /// Device id passed as `adb -s` / `hdc -t`; the only attached device when unset
    pub serial: Option<String>,

    pub log_timeout_ms: u64,
    pub capture_timeout_ms: u64,
    pub command_timeout_ms: u64,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            platform: Platform::default(),
            adb_path: None,
            hdc_path: None,
            serial: None,
            log_timeout_ms: DEFAULT_LOG_TIMEOUT.as_millis() as u64,
            capture_timeout_ms: DEFAULT_CAPTURE_TIMEOUT.as_millis() as u64,
            command_timeout_ms: DEFAULT_COMMAND_TIMEOUT.as_millis() as u64,
        }
    }
}

impl BridgeConfig {
    pub fn log_timeout(&self) -> Duration {
        Duration::from_millis(self.log_timeout_ms)
    }

    pub fn capture_timeout(&self) -> Duration {
        Duration::from_millis(self.capture_timeout_ms)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }

    /// Configured program for the selected platform
    pub fn program_path(&self) -> Option<&Path> {
        match self.platform {
            Platform::Android => self.adb_path.as_deref(),
            Platform::Harmony => self.hdc_path.as_deref(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = BridgeConfig::default();
        assert_eq!(config.platform, Platform::Android);
        assert_eq!(config.log_timeout(), Duration::from_secs(10));
        assert_eq!(config.capture_timeout(), Duration::from_secs(30));
        assert_eq!(config.command_timeout(), Duration::from_secs(15));
        assert!(config.serial.is_none());
    }

    #[test]
    fn test_config_parses_partial_values() {
        let config: BridgeConfig =
            serde_json::from_str(r#"{"serial": "emulator-5554", "log_timeout_ms": 2000}"#).unwrap();
        assert_eq!(config.serial.as_deref(), Some("emulator-5554"));
        assert_eq!(config.log_timeout(), Duration::from_secs(2));
        assert_eq!(config.command_timeout(), DEFAULT_COMMAND_TIMEOUT);
    }

    #[test]
    fn test_platform_selects_program_path() {
        let config: BridgeConfig = serde_json::from_str(
            r#"{"platform": "harmony", "adb_path": "/sdk/adb", "hdc_path": "/ohos/hdc"}"#,
        )
        .unwrap();
        assert_eq!(config.platform, Platform::Harmony);
        assert_eq!(config.platform.tool(), "hdc");
        assert_eq!(config.program_path(), Some(Path::new("/ohos/hdc")));

        let android = BridgeConfig {
            platform: Platform::Android,
            ..config
        };
        assert_eq!(android.program_path(), Some(Path::new("/sdk/adb")));
    }
}
