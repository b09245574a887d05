//! Bounded invocations of a device-bridge CLI
//!
//! [`ToolRunner`] is the process layer shared by the `adb` and `hdc` bridges:
//! one short-lived child per call, killed on drop, with a bounded wait.
//! Calls on one runner are serialized by an async mutex, so a bridge shared
//! between the orchestrator and the crash detector never interleaves commands
//! on the same device.

use std::path::PathBuf;
use std::process::{Output, Stdio};
use std::time::Duration;

use flowfuzz_core::prelude::*;
use tokio::process::Command;
use tokio::sync::Mutex;
use tokio::time::timeout;

/// One bridge executable bound to an optional device id
#[derive(Debug)]
pub struct ToolRunner {
    /// Short name used in errors (`adb`, `hdc`)
    tool: &'static str,
    program: PathBuf,
    /// Flag that scopes a call to one device (`-s` for adb, `-t` for hdc)
    target_flag: &'static str,
    target: Option<String>,
    /// Serializes invocations against the device
    lock: Mutex<()>,
}

impl ToolRunner {
    pub fn new(
        tool: &'static str,
        program: impl Into<PathBuf>,
        target_flag: &'static str,
        target: Option<String>,
    ) -> Self {
        Self {
            tool,
            program: program.into(),
            target_flag,
            target,
            lock: Mutex::new(()),
        }
    }

    /// Run the tool and return its raw output, whatever the exit status
    pub async fn invoke(&self, args: &[String], wait: Duration, device_scoped: bool) -> Result<Output> {
        let operation = operation_name(self.tool, args);
        let _guard = self.lock.lock().await;

        let mut cmd = Command::new(&self.program);
        if device_scoped {
            if let Some(target) = &self.target {
                cmd.args([self.target_flag, target.as_str()]);
            }
        }
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        trace!("{} {}", self.tool, args.join(" "));

        timeout(wait, cmd.output())
            .await
            .map_err(|_| Error::timeout(&operation, wait))?
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    Error::BridgeNotFound
                } else {
                    Error::bridge(format!("Failed to run {}: {}", operation, e))
                }
            })
    }

    /// Run the tool against the device and require a zero exit status
    pub async fn run(&self, args: Vec<String>, wait: Duration) -> Result<Output> {
        let output = self.invoke(&args, wait, true).await?;
        self.check_status(&args, output)
    }

    pub fn check_status(&self, args: &[String], output: Output) -> Result<Output> {
        if output.status.success() {
            return Ok(output);
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        Err(Error::bridge(format!(
            "{} exited with code {:?}: {}",
            operation_name(self.tool, args),
            output.status.code(),
            stderr.trim()
        )))
    }
}

pub(crate) fn strings(args: &[&str]) -> Vec<String> {
    args.iter().map(|s| s.to_string()).collect()
}

/// Short name of an invocation for errors and timeouts (`adb shell input`, `hdc file`)
pub(crate) fn operation_name(tool: &str, args: &[String]) -> String {
    match args {
        [first, second, ..] if first == "shell" => format!("{} shell {}", tool, second),
        [first, ..] => format!("{} {}", tool, first),
        [] => tool.to_string(),
    }
}
