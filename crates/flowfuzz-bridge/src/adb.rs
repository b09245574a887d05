//! `adb` implementation of the device bridge
//!
//! Every operation is one short-lived `adb` invocation through a
//! [`ToolRunner`], so calls are bounded and serialized per device.

use std::path::{Path, PathBuf};
use std::time::Duration;

use flowfuzz_core::prelude::*;
use flowfuzz_core::Point;

use crate::bridge::{BridgeConfig, DeviceBridge};
use crate::devices::{parse_device_list, DeviceEntry};
use crate::process::{strings, ToolRunner};
use crate::tool_availability::locate_adb;

/// Device bridge driving one device through the `adb` CLI
#[derive(Debug)]
pub struct AdbBridge {
    runner: ToolRunner,
    config: BridgeConfig,
}

impl AdbBridge {
    /// Create a bridge, locating the adb program
    pub fn new(config: BridgeConfig) -> Result<Self> {
        let program = locate_adb(config.adb_path.as_deref())?;
        info!("Using adb at {}", program.display());
        Ok(Self::with_program(program, config))
    }

    /// Create a bridge around an already resolved program
    pub fn with_program(program: impl Into<PathBuf>, config: BridgeConfig) -> Self {
        Self {
            runner: ToolRunner::new("adb", program, "-s", config.serial.clone()),
            config,
        }
    }

    async fn run(&self, args: Vec<String>, wait: Duration) -> Result<std::process::Output> {
        self.runner.run(args, wait).await
    }

    async fn shell(&self, args: Vec<String>) -> Result<()> {
        let mut full = vec!["shell".to_string()];
        full.extend(args);
        self.run(full, self.config.command_timeout()).await?;
        Ok(())
    }
}

impl DeviceBridge for AdbBridge {
    async fn launch(&self, package: &str, activity: Option<&str>) -> Result<()> {
        debug!("Launching {}", package);
        self.run(launch_args(package, activity), self.config.command_timeout())
            .await?;
        Ok(())
    }

    async fn stop(&self, package: &str) -> Result<()> {
        debug!("Force-stopping {}", package);
        self.shell(strings(&["am", "force-stop", package])).await
    }

    async fn tap(&self, at: Point) -> Result<()> {
        self.shell(vec![
            "input".into(),
            "tap".into(),
            at.x.to_string(),
            at.y.to_string(),
        ])
        .await
    }

    async fn swipe(&self, from: Point, to: Point, duration: Duration) -> Result<()> {
        self.shell(swipe_args(from, to, duration)).await
    }

    async fn type_text(&self, text: &str) -> Result<()> {
        self.shell(vec![
            "input".into(),
            "text".into(),
            escape_input_text(text),
        ])
        .await
    }

    async fn key_event(&self, code: u32) -> Result<()> {
        self.shell(vec!["input".into(), "keyevent".into(), code.to_string()])
            .await
    }

    async fn dump_log(&self, clear: bool) -> Result<String> {
        let wait = self.config.log_timeout();
        if clear {
            self.run(strings(&["logcat", "-c"]), wait).await?;
        }
        let output = self.run(strings(&["logcat", "-d", "-v", "time"]), wait).await?;
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    async fn capture(&self, path: &Path) -> Result<PathBuf> {
        let output = self
            .run(
                strings(&["exec-out", "screencap", "-p"]),
                self.config.capture_timeout(),
            )
            .await?;

        if output.stdout.is_empty() {
            return Err(Error::bridge("screencap returned no image data"));
        }

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(path, &output.stdout).await?;
        Ok(path.to_path_buf())
    }

    async fn is_running(&self, package: &str) -> Result<bool> {
        // pidof exits 1 with no output when the process is gone
        let args = strings(&["shell", "pidof", package]);
        let output = self
            .runner
            .invoke(&args, self.config.command_timeout(), true)
            .await?;
        Ok(output.status.success() && !String::from_utf8_lossy(&output.stdout).trim().is_empty())
    }

    async fn list_devices(&self) -> Result<Vec<DeviceEntry>> {
        let args = strings(&["devices", "-l"]);
        let output = self
            .runner
            .invoke(&args, self.config.command_timeout(), false)
            .await?;
        let output = self.runner.check_status(&args, output)?;
        Ok(parse_device_list(&String::from_utf8_lossy(&output.stdout)))
    }
}

fn launch_args(package: &str, activity: Option<&str>) -> Vec<String> {
    match activity {
        Some(activity) => {
            let component = if activity.contains('/') {
                activity.to_string()
            } else {
                format!("{}/{}", package, activity)
            };
            strings(&["shell", "am", "start", "-n", &component])
        }
        None => strings(&[
            "shell",
            "monkey",
            "-p",
            package,
            "-c",
            "android.intent.category.LAUNCHER",
            "1",
        ]),
    }
}

fn swipe_args(from: Point, to: Point, duration: Duration) -> Vec<String> {
    vec![
        "input".into(),
        "swipe".into(),
        from.x.to_string(),
        from.y.to_string(),
        to.x.to_string(),
        to.y.to_string(),
        duration.as_millis().to_string(),
    ]
}

/// Escape text for `adb shell input text`
///
/// Spaces become `%s`; shell metacharacters are backslash-escaped.
pub fn escape_input_text(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len() * 2);
    for c in text.chars() {
        match c {
            ' ' => escaped.push_str("%s"),
            '\\' | '"' | '\'' | '(' | ')' | '<' | '>' | '|' | ';' | '&' | '*' | '~' | '$'
            | '`' | '!' | '?' | '#' | '[' | ']' | '{' | '}' => {
                escaped.push('\\');
                escaped.push(c);
            }
            _ => escaped.push(c),
        }
    }
    escaped
}
