//! Test utilities for bridge consumers
//!
//! [`FakeBridge`] is a scripted in-memory device: it records every call and
//! simulates the app process, the device log and a small set of faults.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use flowfuzz_core::crash::LogDialect;
use flowfuzz_core::prelude::*;
use flowfuzz_core::Point;

use crate::bridge::DeviceBridge;
use crate::devices::{DeviceEntry, DeviceStatus};

/// A call observed by [`FakeBridge`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BridgeCall {
    Launch {
        package: String,
        activity: Option<String>,
    },
    Stop(String),
    Tap(Point),
    Swipe {
        from: Point,
        to: Point,
        duration: Duration,
    },
    TypeText(String),
    KeyEvent(u32),
    DumpLog {
        clear: bool,
    },
    Capture(PathBuf),
    IsRunning(String),
    ListDevices,
}

#[derive(Debug)]
struct FakeState {
    calls: Vec<BridgeCall>,
    log: String,
    running: bool,
    devices: Vec<DeviceEntry>,
    crash_on_tap: Option<(Point, String)>,
    fail_on_tap: Option<Point>,
    fail_captures: bool,
    fail_launches: bool,
    lose_bridge_on_stop: bool,
    dialect: LogDialect,
}

/// Scripted in-memory device bridge
#[derive(Debug)]
pub struct FakeBridge {
    state: Mutex<FakeState>,
}

impl Default for FakeBridge {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeBridge {
    /// A bridge with one ready device and a clean log
    pub fn new() -> Self {
        Self {
            state: Mutex::new(FakeState {
                calls: Vec::new(),
                log: String::new(),
                running: false,
                devices: vec![test_device("emulator-5554")],
                crash_on_tap: None,
                fail_on_tap: None,
                fail_captures: false,
                fail_launches: false,
                lose_bridge_on_stop: false,
                dialect: LogDialect::Logcat,
            }),
        }
    }

    pub fn with_devices(self, devices: Vec<DeviceEntry>) -> Self {
        self.lock().devices = devices;
        self
    }

    /// Tapping `at` writes `crash_log` to the device log and kills the app
    pub fn crash_on_tap(self, at: Point, crash_log: impl Into<String>) -> Self {
        self.lock().crash_on_tap = Some((at, crash_log.into()));
        self
    }

    /// Tapping `at` fails with `BridgeUnavailable`
    pub fn fail_on_tap(self, at: Point) -> Self {
        self.lock().fail_on_tap = Some(at);
        self
    }

    /// Every capture fails with `BridgeUnavailable`
    pub fn fail_captures(self) -> Self {
        self.lock().fail_captures = true;
        self
    }

    /// Every launch fails with `BridgeUnavailable`
    pub fn fail_launches(self) -> Self {
        self.lock().fail_launches = true;
        self
    }

    /// Every stop fails with `BridgeNotFound`, as if the tool vanished
    pub fn lose_bridge_on_stop(self) -> Self {
        self.lock().lose_bridge_on_stop = true;
        self
    }

    /// Report a different device log format
    pub fn with_log_dialect(self, dialect: LogDialect) -> Self {
        self.lock().dialect = dialect;
        self
    }

    pub fn set_log(&self, log: impl Into<String>) {
        self.lock().log = log.into();
    }

    pub fn set_running(&self, running: bool) {
        self.lock().running = running;
    }

    /// Every call made so far, in order
    pub fn calls(&self) -> Vec<BridgeCall> {
        self.lock().calls.clone()
    }

    pub fn count_calls(&self, predicate: impl Fn(&BridgeCall) -> bool) -> usize {
        self.lock().calls.iter().filter(|c| predicate(c)).count()
    }

    fn lock(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn record(&self, call: BridgeCall) -> MutexGuard<'_, FakeState> {
        let mut state = self.lock();
        state.calls.push(call);
        state
    }
}

impl DeviceBridge for FakeBridge {
    async fn launch(&self, package: &str, activity: Option<&str>) -> Result<()> {
        let mut state = self.record(BridgeCall::Launch {
            package: package.to_string(),
            activity: activity.map(str::to_string),
        });
        if state.fail_launches {
            return Err(Error::bridge("monkey aborted"));
        }
        state.running = true;
        Ok(())
    }

    async fn stop(&self, package: &str) -> Result<()> {
        let mut state = self.record(BridgeCall::Stop(package.to_string()));
        if state.lose_bridge_on_stop {
            return Err(Error::BridgeNotFound);
        }
        state.running = false;
        Ok(())
    }

    async fn tap(&self, at: Point) -> Result<()> {
        let mut state = self.record(BridgeCall::Tap(at));
        if state.fail_on_tap == Some(at) {
            return Err(Error::bridge("input tap failed"));
        }
        if let Some((point, log)) = state.crash_on_tap.clone() {
            if point == at {
                state.log.push_str(&log);
                state.running = false;
            }
        }
        Ok(())
    }

    async fn swipe(&self, from: Point, to: Point, duration: Duration) -> Result<()> {
        self.record(BridgeCall::Swipe { from, to, duration });
        Ok(())
    }

    async fn type_text(&self, text: &str) -> Result<()> {
        self.record(BridgeCall::TypeText(text.to_string()));
        Ok(())
    }

    async fn key_event(&self, code: u32) -> Result<()> {
        self.record(BridgeCall::KeyEvent(code));
        Ok(())
    }

    async fn dump_log(&self, clear: bool) -> Result<String> {
        let mut state = self.record(BridgeCall::DumpLog { clear });
        if clear {
            state.log.clear();
        }
        Ok(state.log.clone())
    }

    async fn capture(&self, path: &Path) -> Result<PathBuf> {
        let state = self.record(BridgeCall::Capture(path.to_path_buf()));
        if state.fail_captures {
            return Err(Error::bridge("screencap failed"));
        }
        Ok(path.to_path_buf())
    }

    async fn is_running(&self, package: &str) -> Result<bool> {
        let state = self.record(BridgeCall::IsRunning(package.to_string()));
        Ok(state.running)
    }

    async fn list_devices(&self) -> Result<Vec<DeviceEntry>> {
        let state = self.record(BridgeCall::ListDevices);
        Ok(state.devices.clone())
    }

    fn log_dialect(&self) -> LogDialect {
        self.lock().dialect
    }
}

/// Creates a ready test device with the given serial
pub fn test_device(id: &str) -> DeviceEntry {
    DeviceEntry::new(id, DeviceStatus::Device)
}

/// A managed-runtime crash block for `package`, in `-v time` format
pub fn managed_crash_log(package: &str) -> String {
    format!(
        "01-02 03:04:06.200 E/AndroidRuntime( 4242): FATAL EXCEPTION: main\n\
         01-02 03:04:06.200 E/AndroidRuntime( 4242): Process: {package}, PID: 4242\n\
         01-02 03:04:06.200 E/AndroidRuntime( 4242): java.lang.IllegalStateException: boom\n\
         01-02 03:04:06.200 E/AndroidRuntime( 4242): \tat {package}.MainActivity.onClick(MainActivity.kt:7)\n\n"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fake_bridge_tracks_process_state() {
        let bridge = FakeBridge::new();
        assert!(!bridge.is_running("com.example").await.unwrap());

        bridge.launch("com.example", None).await.unwrap();
        assert!(bridge.is_running("com.example").await.unwrap());

        bridge.stop("com.example").await.unwrap();
        assert!(!bridge.is_running("com.example").await.unwrap());
    }

    #[tokio::test]
    async fn test_crash_on_tap_writes_log_and_kills_app() {
        let crash_at = Point::new(10, 20);
        let bridge = FakeBridge::new().crash_on_tap(crash_at, managed_crash_log("com.example"));
        bridge.launch("com.example", None).await.unwrap();

        bridge.tap(Point::new(1, 1)).await.unwrap();
        assert!(bridge.dump_log(false).await.unwrap().is_empty());

        bridge.tap(crash_at).await.unwrap();
        assert!(bridge.dump_log(false).await.unwrap().contains("FATAL EXCEPTION"));
        assert!(!bridge.is_running("com.example").await.unwrap());

        // Clearing empties the log
        assert!(bridge.dump_log(true).await.unwrap().is_empty());
    }

    #[test]
    fn test_fail_on_tap_and_captures() {
        let bridge = FakeBridge::new()
            .fail_on_tap(Point::new(5, 5))
            .fail_captures();
        tokio_test::assert_err!(tokio_test::block_on(bridge.tap(Point::new(5, 5))));
        tokio_test::assert_err!(tokio_test::block_on(bridge.capture(Path::new("/tmp/x.png"))));
        tokio_test::assert_ok!(tokio_test::block_on(bridge.tap(Point::new(6, 6))));
        assert_eq!(bridge.count_calls(|c| matches!(c, BridgeCall::Tap(_))), 2);
    }

    #[tokio::test]
    async fn test_lost_bridge_and_failed_launch() {
        let bridge = FakeBridge::new().fail_launches().lose_bridge_on_stop();
        let err = bridge.launch("com.example", None).await.unwrap_err();
        assert!(err.is_recoverable());
        let err = bridge.stop("com.example").await.unwrap_err();
        assert!(err.is_fatal());
        assert!(!bridge.is_running("com.example").await.unwrap());
        assert_eq!(bridge.log_dialect(), LogDialect::Logcat);
    }

    #[tokio::test]
    async fn test_calls_are_recorded_in_order() {
        let bridge = FakeBridge::new();
        bridge.key_event(4).await.unwrap();
        bridge.type_text("hi").await.unwrap();
        assert_eq!(
            bridge.calls(),
            vec![BridgeCall::KeyEvent(4), BridgeCall::TypeText("hi".to_string())]
        );
    }
}
