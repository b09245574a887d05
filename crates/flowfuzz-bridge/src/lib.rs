//! # flowfuzz-bridge - Device Bridge Client
//!
//! Issues device commands (launch, stop, input, log dump, screen capture,
//! liveness, device listing) over the `adb` command-line bridge for Android,
//! or the `hdc` bridge for HarmonyOS.
//!
//! Depends on [`flowfuzz_core`] for domain types and error handling.
//!
//! ## Public API
//!
//! ### Bridge Contract
//! - [`DeviceBridge`] - Async operations on one attached device
//! - [`BridgeConfig`], [`Platform`] - Platform, programs, device id and timeouts
//!
//! ### Implementations
//! - [`AdbBridge`] - One bounded `adb` invocation per call, serialized per device
//! - [`HdcBridge`] - The same over `hdc`, `uinput` and `hilog`
//! - [`PlatformBridge`] - Either of the above, chosen by [`Platform`]
//!
//! ### Device Listing
//! - [`DeviceEntry`], [`DeviceStatus`] - Parsed `adb devices -l` / `hdc list targets` output
//!
//! ### Platform Utilities
//! - [`ToolAvailability`], [`locate_adb()`], [`locate_hdc()`] - Find the bridge executable

pub mod adb;
pub mod bridge;
pub mod devices;
pub mod hdc;
pub mod platform;
pub mod process;
#[cfg(any(test, feature = "test-helpers"))]
pub mod test_utils;
pub mod tool_availability;

// Public API re-exports
pub use adb::AdbBridge;
pub use bridge::{
    BridgeConfig, DeviceBridge, LocalDeviceBridge, Platform, KEYCODE_BACK, KEYCODE_HOME,
};
pub use devices::{first_ready, parse_device_list, parse_target_list, DeviceEntry, DeviceStatus};
pub use hdc::HdcBridge;
pub use platform::PlatformBridge;
pub use tool_availability::{
    locate_adb, locate_hdc, parse_adb_version, parse_hdc_version, ToolAvailability,
};
