//! Platform-selected device bridge
//!
//! [`PlatformBridge`] picks `adb` or `hdc` from `[bridge] platform` and
//! forwards every call, so the rest of the app holds one concrete bridge type.

use std::path::{Path, PathBuf};
use std::time::Duration;

use flowfuzz_core::crash::LogDialect;
use flowfuzz_core::prelude::*;
use flowfuzz_core::Point;

use crate::adb::AdbBridge;
use crate::bridge::{BridgeConfig, DeviceBridge, Platform};
use crate::devices::DeviceEntry;
use crate::hdc::HdcBridge;

#[derive(Debug)]
pub enum PlatformBridge {
    Adb(AdbBridge),
    Hdc(HdcBridge),
}

impl PlatformBridge {
    /// Locate the bridge program for the configured platform
    pub fn connect(config: BridgeConfig) -> Result<Self> {
        match config.platform {
            Platform::Android => AdbBridge::new(config).map(Self::Adb),
            Platform::Harmony => HdcBridge::new(config).map(Self::Hdc),
        }
    }

    pub fn platform(&self) -> Platform {
        match self {
            Self::Adb(_) => Platform::Android,
            Self::Hdc(_) => Platform::Harmony,
        }
    }
}

impl DeviceBridge for PlatformBridge {
    async fn launch(&self, package: &str, activity: Option<&str>) -> Result<()> {
        match self {
            Self::Adb(b) => b.launch(package, activity).await,
            Self::Hdc(b) => b.launch(package, activity).await,
        }
    }

    async fn stop(&self, package: &str) -> Result<()> {
        match self {
            Self::Adb(b) => b.stop(package).await,
            Self::Hdc(b) => b.stop(package).await,
        }
    }

    async fn tap(&self, at: Point) -> Result<()> {
        match self {
            Self::Adb(b) => b.tap(at).await,
            Self::Hdc(b) => b.tap(at).await,
        }
    }

    async fn swipe(&self, from: Point, to: Point, duration: Duration) -> Result<()> {
        match self {
            Self::Adb(b) => b.swipe(from, to, duration).await,
            Self::Hdc(b) => b.swipe(from, to, duration).await,
        }
    }

    async fn type_text(&self, text: &str) -> Result<()> {
        match self {
            Self::Adb(b) => b.type_text(text).await,
            Self::Hdc(b) => b.type_text(text).await,
        }
    }

    async fn key_event(&self, code: u32) -> Result<()> {
        match self {
            Self::Adb(b) => b.key_event(code).await,
            Self::Hdc(b) => b.key_event(code).await,
        }
    }

    async fn dump_log(&self, clear: bool) -> Result<String> {
        match self {
            Self::Adb(b) => b.dump_log(clear).await,
            Self::Hdc(b) => b.dump_log(clear).await,
        }
    }

    async fn capture(&self, path: &Path) -> Result<PathBuf> {
        match self {
            Self::Adb(b) => b.capture(path).await,
            Self::Hdc(b) => b.capture(path).await,
        }
    }

    async fn is_running(&self, package: &str) -> Result<bool> {
        match self {
            Self::Adb(b) => b.is_running(package).await,
            Self::Hdc(b) => b.is_running(package).await,
        }
    }

    async fn list_devices(&self) -> Result<Vec<DeviceEntry>> {
        match self {
            Self::Adb(b) => b.list_devices().await,
            Self::Hdc(b) => b.list_devices().await,
        }
    }

    fn log_dialect(&self) -> LogDialect {
        match self {
            Self::Adb(b) => b.log_dialect(),
            Self::Hdc(b) => b.log_dialect(),
        }
    }
}
