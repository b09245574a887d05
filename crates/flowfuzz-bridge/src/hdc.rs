//! `hdc` implementation of the device bridge (HarmonyOS)
//!
//! Same shape as the adb bridge: one bounded `hdc` invocation per call through
//! a [`ToolRunner`], scoped with `-t <id>`. Input goes through `uinput`, the
//! log through `hilog`, and screenshots are taken on the device with
//! `snapshot_display` and pulled with `file recv`.

use std::path::{Path, PathBuf};
use std::process::Output;
use std::time::Duration;

use flowfuzz_core::crash::LogDialect;
use flowfuzz_core::prelude::*;
use flowfuzz_core::Point;

use crate::bridge::{BridgeConfig, DeviceBridge, KEYCODE_BACK, KEYCODE_HOME};
use crate::devices::{parse_target_list, DeviceEntry};
use crate::process::{strings, ToolRunner};
use crate::tool_availability::locate_hdc;

/// Ability started when no activity is configured
pub const DEFAULT_ABILITY: &str = "EntryAbility";

/// Device-side scratch file for screenshots
const REMOTE_SNAPSHOT: &str = "/data/local/tmp/flowfuzz_snapshot.png";

/// HarmonyOS key code for `Home`
const HARMONY_KEY_HOME: u32 = 1;

/// HarmonyOS key code for `Back`
const HARMONY_KEY_BACK: u32 = 2;

/// Device bridge driving one HarmonyOS device through the `hdc` CLI
#[derive(Debug)]
pub struct HdcBridge {
    runner: ToolRunner,
    config: BridgeConfig,
}

impl HdcBridge {
    /// Create a bridge, locating the hdc program
    pub fn new(config: BridgeConfig) -> Result<Self> {
        let program = locate_hdc(config.hdc_path.as_deref())?;
        info!("Using hdc at {}", program.display());
        Ok(Self::with_program(program, config))
    }

    /// Create a bridge around an already resolved program
    pub fn with_program(program: impl Into<PathBuf>, config: BridgeConfig) -> Self {
        Self {
            runner: ToolRunner::new("hdc", program, "-t", config.serial.clone()),
            config,
        }
    }

    async fn shell(&self, args: Vec<String>, wait: Duration) -> Result<Output> {
        let mut full = vec!["shell".to_string()];
        full.extend(args);
        self.runner.run(full, wait).await
    }

    async fn command(&self, args: Vec<String>) -> Result<()> {
        self.shell(args, self.config.command_timeout()).await?;
        Ok(())
    }
}

impl DeviceBridge for HdcBridge {
    async fn launch(&self, package: &str, activity: Option<&str>) -> Result<()> {
        debug!("Launching {}", package);
        let output = self
            .shell(launch_args(package, activity), self.config.command_timeout())
            .await?;
        // aa reports a failed start on stdout with a zero exit status
        let stdout = String::from_utf8_lossy(&output.stdout);
        if stdout.to_lowercase().contains("error") {
            return Err(Error::bridge(format!("aa start failed: {}", stdout.trim())));
        }
        Ok(())
    }

    async fn stop(&self, package: &str) -> Result<()> {
        debug!("Force-stopping {}", package);
        self.command(strings(&["aa", "force-stop", package])).await
    }

    async fn tap(&self, at: Point) -> Result<()> {
        self.command(tap_args(at)).await
    }

    async fn swipe(&self, from: Point, to: Point, duration: Duration) -> Result<()> {
        self.command(swipe_args(from, to, duration)).await
    }

    async fn type_text(&self, text: &str) -> Result<()> {
        self.command(vec![
            "uinput".into(),
            "-K".into(),
            "-t".into(),
            quote_input_text(text),
        ])
        .await
    }

    async fn key_event(&self, code: u32) -> Result<()> {
        let key = harmony_key(code)?.to_string();
        self.command(vec![
            "uinput".into(),
            "-K".into(),
            "-d".into(),
            key.clone(),
            "-u".into(),
            key,
        ])
        .await
    }

    async fn dump_log(&self, clear: bool) -> Result<String> {
        let wait = self.config.log_timeout();
        if clear {
            self.shell(strings(&["hilog", "-r"]), wait).await?;
        }
        let output = self.shell(strings(&["hilog", "-x"]), wait).await?;
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    async fn capture(&self, path: &Path) -> Result<PathBuf> {
        let wait = self.config.capture_timeout();
        self.shell(strings(&["snapshot_display", "-f", REMOTE_SNAPSHOT]), wait)
            .await?;

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let local = path.display().to_string();
        self.runner
            .run(strings(&["file", "recv", REMOTE_SNAPSHOT, &local]), wait)
            .await?;

        if !tokio::fs::try_exists(path).await? {
            return Err(Error::bridge("snapshot_display produced no image"));
        }
        Ok(path.to_path_buf())
    }

    async fn is_running(&self, package: &str) -> Result<bool> {
        let args = strings(&["shell", "pidof", package]);
        let output = self
            .runner
            .invoke(&args, self.config.command_timeout(), true)
            .await?;
        Ok(output.status.success() && !String::from_utf8_lossy(&output.stdout).trim().is_empty())
    }

    async fn list_devices(&self) -> Result<Vec<DeviceEntry>> {
        let args = strings(&["list", "targets", "-v"]);
        let output = self
            .runner
            .invoke(&args, self.config.command_timeout(), false)
            .await?;
        let output = self.runner.check_status(&args, output)?;
        Ok(parse_target_list(&String::from_utf8_lossy(&output.stdout)))
    }

    fn log_dialect(&self) -> LogDialect {
        LogDialect::Hilog
    }
}

fn launch_args(bundle: &str, ability: Option<&str>) -> Vec<String> {
    strings(&[
        "aa",
        "start",
        "-b",
        bundle,
        "-a",
        ability.unwrap_or(DEFAULT_ABILITY),
    ])
}

fn tap_args(at: Point) -> Vec<String> {
    let (x, y) = (at.x.to_string(), at.y.to_string());
    vec![
        "uinput".into(),
        "-T".into(),
        "-d".into(),
        x.clone(),
        y.clone(),
        "-u".into(),
        x,
        y,
    ]
}

fn swipe_args(from: Point, to: Point, duration: Duration) -> Vec<String> {
    vec![
        "uinput".into(),
        "-S".into(),
        from.x.to_string(),
        from.y.to_string(),
        to.x.to_string(),
        to.y.to_string(),
        duration.as_millis().to_string(),
    ]
}

/// Translate an Android key code to its HarmonyOS counterpart
fn harmony_key(code: u32) -> Result<u32> {
    match code {
        KEYCODE_BACK => Ok(HARMONY_KEY_BACK),
        KEYCODE_HOME => Ok(HARMONY_KEY_HOME),
        other => Err(Error::unsupported_action(format!("key event {other} on hdc"))),
    }
}

/// Quote text for `uinput -K -t` in the device shell
pub fn quote_input_text(text: &str) -> String {
    let mut quoted = String::with_capacity(text.len() + 2);
    quoted.push('"');
    for c in text.chars() {
        if matches!(c, '"' | '\\' | '$' | '`') {
            quoted.push('\\');
        }
        quoted.push(c);
    }
    quoted.push('"');
    quoted
}
