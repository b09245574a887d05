//! Settings parser for .flowfuzz/config.toml

use super::types::Settings;
use flowfuzz_core::prelude::*;
use std::path::{Path, PathBuf};

const CONFIG_FILENAME: &str = "config.toml";
const FLOWFUZZ_DIR: &str = ".flowfuzz";

const DEFAULT_CONFIG: &str = r#"# flowfuzz Configuration

[bridge]
platform = "android"        # "android" (adb, logcat) or "harmony" (hdc, hilog)
# adb_path = "/opt/android-sdk/platform-tools/adb"   # Default: PATH, then $ANDROID_HOME
# hdc_path = "/opt/ohos-sdk/toolchains/hdc"          # Default: PATH, then $OHOS_SDK_HOME
# serial = "emulator-5554"                           # Default: the only attached device
log_timeout_ms = 10000
capture_timeout_ms = 30000
command_timeout_ms = 15000

[detector]
poll_interval_ms = 2000     # Minimum 250
log_tail_bytes = 5000
dedup_prefix_chars = 200

[runner]
relaunch_delay_ms = 1000    # Pause between force-stop and relaunch
settle_delays = true        # Wait for the UI to settle before each screenshot
test_depth = 10

[bus]
subscriber_capacity = 256   # Events buffered per subscriber

[output]
screenshots_dir = ".flowfuzz/screenshots"
records_dir = ".flowfuzz/records"
screenshot_url_prefix = "/screenshots"
"#;

/// Path of the config file for a project
pub fn config_path(project_path: &Path) -> PathBuf {
    project_path.join(FLOWFUZZ_DIR).join(CONFIG_FILENAME)
}

/// Load settings from .flowfuzz/config.toml
///
/// Returns default settings if file doesn't exist or can't be parsed.
pub fn load_settings(project_path: &Path) -> Settings {
    let config_path = config_path(project_path);

    if !config_path.exists() {
        debug!("No config file at {:?}, using defaults", config_path);
        return Settings::default();
    }

    match std::fs::read_to_string(&config_path) {
        Ok(content) => match toml::from_str(&content) {
            Ok(settings) => {
                debug!("Loaded settings from {:?}", config_path);
                settings
            }
            Err(e) => {
                warn!("Failed to parse {:?}: {}", config_path, e);
                Settings::default()
            }
        },
        Err(e) => {
            warn!("Failed to read {:?}: {}", config_path, e);
            Settings::default()
        }
    }
}

/// Create the default config file in .flowfuzz/
///
/// An existing file is left untouched. Returns the config file path.
pub fn init_config_dir(project_path: &Path) -> Result<PathBuf> {
    let flowfuzz_dir = project_path.join(FLOWFUZZ_DIR);

    if !flowfuzz_dir.exists() {
        std::fs::create_dir_all(&flowfuzz_dir)
            .map_err(|e| Error::config(format!("Failed to create .flowfuzz dir: {}", e)))?;
    }

    let config_path = flowfuzz_dir.join(CONFIG_FILENAME);
    if config_path.exists() {
        info!("Config already exists at {:?}", config_path);
    } else {
        std::fs::write(&config_path, DEFAULT_CONFIG)
            .map_err(|e| Error::config(format!("Failed to write config.toml: {}", e)))?;
        info!("Wrote default config to {:?}", config_path);
    }

    Ok(config_path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_load_settings_defaults() {
        let temp = tempdir().unwrap();
        let settings = load_settings(temp.path());

        assert_eq!(settings, Settings::default());
    }

    #[test]
    fn test_load_settings_custom() {
        let temp = tempdir().unwrap();
        let flowfuzz_dir = temp.path().join(".flowfuzz");
        std::fs::create_dir_all(&flowfuzz_dir).unwrap();

        let config = r#"
[bridge]
platform = "harmony"
serial = "R58M123ABC"

[runner]
relaunch_delay_ms = 250
"#;
        std::fs::write(flowfuzz_dir.join("config.toml"), config).unwrap();

        let settings = load_settings(temp.path());

        assert_eq!(settings.bridge.serial.as_deref(), Some("R58M123ABC"));
        assert_eq!(settings.bridge.platform, flowfuzz_bridge::Platform::Harmony);
        assert_eq!(settings.runner.relaunch_delay_ms, 250);
        assert_eq!(settings.detector.poll_interval_ms, 2000);
    }

    #[test]
    fn test_load_settings_invalid_toml() {
        let temp = tempdir().unwrap();
        let flowfuzz_dir = temp.path().join(".flowfuzz");
        std::fs::create_dir_all(&flowfuzz_dir).unwrap();

        // Invalid TOML
        std::fs::write(flowfuzz_dir.join("config.toml"), "not valid toml {{{{").unwrap();

        // Should return defaults
        let settings = load_settings(temp.path());
        assert_eq!(settings, Settings::default());
    }

    #[test]
    fn test_init_config_dir() {
        let temp = tempdir().unwrap();

        let path = init_config_dir(temp.path()).unwrap();

        assert!(temp.path().join(".flowfuzz").exists());
        assert_eq!(path, temp.path().join(".flowfuzz/config.toml"));
    }

    #[test]
    fn test_default_config_matches_defaults() {
        let temp = tempdir().unwrap();
        init_config_dir(temp.path()).unwrap();

        assert_eq!(load_settings(temp.path()), Settings::default());
    }

    #[test]
    fn test_init_config_dir_keeps_existing_file() {
        let temp = tempdir().unwrap();
        let flowfuzz_dir = temp.path().join(".flowfuzz");
        std::fs::create_dir_all(&flowfuzz_dir).unwrap();
        std::fs::write(flowfuzz_dir.join("config.toml"), "[bus]\nsubscriber_capacity = 8\n").unwrap();

        init_config_dir(temp.path()).unwrap();

        assert_eq!(load_settings(temp.path()).bus.subscriber_capacity, 8);
    }
}
