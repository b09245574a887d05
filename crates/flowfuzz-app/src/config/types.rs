//! Configuration types for flowfuzz
//!
//! Defines `Settings` (`.flowfuzz/config.toml`) and its sections.

use std::path::PathBuf;
use std::time::Duration;

use flowfuzz_bridge::BridgeConfig;
use flowfuzz_core::types::DEFAULT_TEST_DEPTH;
use serde::{Deserialize, Serialize};

/// Application settings (.flowfuzz/config.toml)
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct Settings {
    #[serde(default)]
    pub bridge: BridgeConfig,

    #[serde(default)]
    pub detector: DetectorSettings,

    #[serde(default)]
    pub runner: RunnerSettings,

    #[serde(default)]
    pub bus: BusSettings,

    #[serde(default)]
    pub output: OutputSettings,
}

/// Crash detector settings
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct DetectorSettings {
    /// Poll interval in milliseconds (clamped to [`MIN_POLL_INTERVAL_MS`])
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Trailing log bytes kept on a crash report
    #[serde(default = "default_log_tail_bytes")]
    pub log_tail_bytes: usize,

    /// Stack characters compared when suppressing a repeated report
    #[serde(default = "default_dedup_prefix_chars")]
    pub dedup_prefix_chars: usize,
}

/// Lower bound for the detector poll interval
pub const MIN_POLL_INTERVAL_MS: u64 = 250;

impl Default for DetectorSettings {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            log_tail_bytes: default_log_tail_bytes(),
            dedup_prefix_chars: default_dedup_prefix_chars(),
        }
    }
}

impl DetectorSettings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(MIN_POLL_INTERVAL_MS))
    }
}

fn default_poll_interval_ms() -> u64 {
    2000
}

fn default_log_tail_bytes() -> usize {
    flowfuzz_core::crash::LOG_TAIL_BYTES
}

fn default_dedup_prefix_chars() -> usize {
    200
}

/// Run sequencing settings
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct RunnerSettings {
    /// Pause between force-stop and relaunch, in milliseconds
    #[serde(default = "default_relaunch_delay_ms")]
    pub relaunch_delay_ms: u64,

    /// Wait the per-action settle delay before each screenshot
    #[serde(default = "default_true")]
    pub settle_delays: bool,

    /// Test cases requested when a task does not say
    #[serde(default = "default_test_depth")]
    pub test_depth: usize,
}

impl Default for RunnerSettings {
    fn default() -> Self {
        Self {
            relaunch_delay_ms: default_relaunch_delay_ms(),
            settle_delays: true,
            test_depth: default_test_depth(),
        }
    }
}

impl RunnerSettings {
    pub fn relaunch_delay(&self) -> Duration {
        Duration::from_millis(self.relaunch_delay_ms)
    }
}

fn default_relaunch_delay_ms() -> u64 {
    1000
}

fn default_test_depth() -> usize {
    DEFAULT_TEST_DEPTH
}

fn default_true() -> bool {
    true
}

/// Event bus settings
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct BusSettings {
    /// Events buffered per subscriber before it is disconnected
    #[serde(default = "default_subscriber_capacity")]
    pub subscriber_capacity: usize,
}

impl Default for BusSettings {
    fn default() -> Self {
        Self {
            subscriber_capacity: default_subscriber_capacity(),
        }
    }
}

fn default_subscriber_capacity() -> usize {
    256
}

/// Output locations
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct OutputSettings {
    /// Screenshots are written to `<screenshots_dir>/<task>/`
    #[serde(default = "default_screenshots_dir")]
    pub screenshots_dir: PathBuf,

    /// Persisted records are written to `<records_dir>/<task>/`
    #[serde(default = "default_records_dir")]
    pub records_dir: PathBuf,

    /// Prefix of the screenshot references carried on events
    #[serde(default = "default_screenshot_url_prefix")]
    pub screenshot_url_prefix: String,
}

impl Default for OutputSettings {
    fn default() -> Self {
        Self {
            screenshots_dir: default_screenshots_dir(),
            records_dir: default_records_dir(),
            screenshot_url_prefix: default_screenshot_url_prefix(),
        }
    }
}

fn default_screenshots_dir() -> PathBuf {
    PathBuf::from(".flowfuzz/screenshots")
}

fn default_records_dir() -> PathBuf {
    PathBuf::from(".flowfuzz/records")
}

fn default_screenshot_url_prefix() -> String {
    "/screenshots".to_string()
}
