//! Tool availability checking for the device bridge
//!
//! Locates the bridge executable for the configured platform: an explicitly
//! configured program first, then `PATH`, then the SDK directory named by the
//! environment. For `adb` that is `platform-tools` under `ANDROID_HOME` or
//! `ANDROID_SDK_ROOT`; for `hdc` it is `toolchains` under `OHOS_SDK_HOME`.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::LazyLock;

use flowfuzz_core::prelude::*;
use regex::Regex;
use tokio::process::Command;

use crate::bridge::{BridgeConfig, Platform};

/// Version line printed by `adb version`
static ADB_VERSION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"Android Debug Bridge version (\d+(?:\.\d+)*)").expect("Invalid version regex")
});

/// Version printed by `hdc -v` (`Ver: 3.1.0e`)
static HDC_VERSION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Ver:\s*(\S+)").expect("Invalid hdc version regex"));

#[cfg(windows)]
const ADB_FILE: &str = "adb.exe";
#[cfg(not(windows))]
const ADB_FILE: &str = "adb";

#[cfg(windows)]
const HDC_FILE: &str = "hdc.exe";
#[cfg(not(windows))]
const HDC_FILE: &str = "hdc";

/// Cached availability of the bridge executable
#[derive(Debug, Clone, Default)]
pub struct ToolAvailability {
    pub platform: Platform,

    /// Whether the version command ran successfully
    pub available: bool,

    /// Path to the executable if found
    pub path: Option<PathBuf>,

    /// Version it reported
    pub version: Option<String>,
}

impl ToolAvailability {
    /// Check tool availability for the configured platform (run once at startup)
    pub async fn check(config: &BridgeConfig) -> Self {
        let platform = config.platform;
        let located = match platform {
            Platform::Android => locate_adb(config.program_path()),
            Platform::Harmony => locate_hdc(config.program_path()),
        };
        let Ok(path) = located else {
            return Self {
                platform,
                ..Self::default()
            };
        };

        let version_args: &[&str] = match platform {
            Platform::Android => &["version"],
            Platform::Harmony => &["-v"],
        };
        let output = Command::new(&path)
            .args(version_args)
            .stdin(Stdio::null())
            .stderr(Stdio::null())
            .output()
            .await
            .inspect_err(|e| debug!("{} version check failed for {}: {}", platform.tool(), path.display(), e))
            .ok()
            .filter(|o| o.status.success());

        let version = output.as_ref().and_then(|o| {
            let stdout = String::from_utf8_lossy(&o.stdout);
            match platform {
                Platform::Android => parse_adb_version(&stdout),
                Platform::Harmony => parse_hdc_version(&stdout),
            }
        });
        if let Some(version) = &version {
            debug!("Found {} {} at {}", platform.tool(), version, path.display());
        }

        Self {
            platform,
            available: output.is_some(),
            path: Some(path),
            version,
        }
    }

    /// Get user-friendly message for an unavailable bridge
    pub fn unavailable_message(&self) -> Option<&'static str> {
        if self.available {
            return None;
        }
        Some(match self.platform {
            Platform::Android => "adb not found. Install Android platform-tools or set ANDROID_HOME.",
            Platform::Harmony => "hdc not found. Install the OpenHarmony SDK toolchains or set OHOS_SDK_HOME.",
        })
    }
}

/// Extract the version from `adb version` output
pub fn parse_adb_version(output: &str) -> Option<String> {
    ADB_VERSION
        .captures(output)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

/// Extract the version from `hdc -v` output
pub fn parse_hdc_version(output: &str) -> Option<String> {
    HDC_VERSION
        .captures(output)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

/// Resolve the adb executable, failing with [`Error::BridgeNotFound`]
pub fn locate_adb(configured: Option<&Path>) -> Result<PathBuf> {
    let sdk_roots = [
        std::env::var("ANDROID_HOME").ok(),
        std::env::var("ANDROID_SDK_ROOT").ok(),
    ];
    first_existing(candidate_paths(configured, ADB_FILE, "platform-tools", sdk_roots))
}

/// Resolve the hdc executable, failing with [`Error::BridgeNotFound`]
pub fn locate_hdc(configured: Option<&Path>) -> Result<PathBuf> {
    let sdk_roots = [std::env::var("OHOS_SDK_HOME").ok()];
    first_existing(candidate_paths(configured, HDC_FILE, "toolchains", sdk_roots))
}

fn first_existing(candidates: Vec<PathBuf>) -> Result<PathBuf> {
    for candidate in candidates {
        // Bare names go through PATH lookup, paths must exist
        if candidate.components().count() == 1 {
            if let Ok(found) = which::which(&candidate) {
                return Ok(found);
            }
        } else if candidate.is_file() {
            return Ok(candidate);
        }
    }

    Err(Error::BridgeNotFound)
}

/// Get list of paths to try for the bridge command, in priority order
fn candidate_paths(
    configured: Option<&Path>,
    file: &str,
    sdk_subdir: &str,
    sdk_roots: impl IntoIterator<Item = Option<String>>,
) -> Vec<PathBuf> {
    let mut paths = Vec::new();

    if let Some(path) = configured {
        paths.push(path.to_path_buf());
    }

    paths.push(PathBuf::from(file));

    for root in sdk_roots.into_iter().flatten() {
        paths.push(Path::new(&root).join(sdk_subdir).join(file));
    }

    paths
}
