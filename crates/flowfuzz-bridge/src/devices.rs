//! Attached device listing
//!
//! Parses the output of `adb devices -l`:
//!
//! ```text
//! List of devices attached
//! emulator-5554          device product:sdk_gphone64 model:Pixel_8 device:emu64a transport_id:1
//! R58M123ABC             unauthorized usb:1-1 transport_id:2
//! ```
//!
//! and of `hdc list targets -v`:
//!
//! ```text
//! 7001005458323933328a01fd        USB     Connected       localhost       hdc
//! 192.168.1.20:5555               TCP     Offline         localhost       hdc
//! ```

use serde::{Deserialize, Serialize};

/// Connection state reported for a device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceStatus {
    /// Online and accepting commands
    Device,
    Offline,
    Unauthorized,
    /// Any other state (`bootloader`, `recovery`, `no permissions`, ...)
    #[serde(untagged)]
    Other(String),
}

impl DeviceStatus {
    pub fn parse(s: &str) -> Self {
        match s {
            "device" => DeviceStatus::Device,
            "offline" => DeviceStatus::Offline,
            "unauthorized" => DeviceStatus::Unauthorized,
            other => DeviceStatus::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            DeviceStatus::Device => "device",
            DeviceStatus::Offline => "offline",
            DeviceStatus::Unauthorized => "unauthorized",
            DeviceStatus::Other(s) => s,
        }
    }
}

impl std::fmt::Display for DeviceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One line of the device list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceEntry {
    /// Serial used with `adb -s`
    pub id: String,

    pub status: DeviceStatus,

    /// `model:` property, when adb reports one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

impl DeviceEntry {
    pub fn new(id: impl Into<String>, status: DeviceStatus) -> Self {
        Self {
            id: id.into(),
            status,
            model: None,
        }
    }

    pub fn is_ready(&self) -> bool {
        self.status == DeviceStatus::Device
    }

    /// Model name with underscores shown as spaces, falling back to the serial
    pub fn display_name(&self) -> String {
        self.model
            .as_deref()
            .map(|m| m.replace('_', " "))
            .unwrap_or_else(|| self.id.clone())
    }
}

/// Parse `adb devices -l` output
pub fn parse_device_list(output: &str) -> Vec<DeviceEntry> {
    output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter(|line| !line.starts_with("List of devices") && !line.starts_with('*'))
        .filter_map(parse_device_line)
        .collect()
}

fn parse_device_line(line: &str) -> Option<DeviceEntry> {
    let mut parts = line.split_whitespace();
    let id = parts.next()?;

    // "no permissions" spans two tokens; keep the rest of the status words
    let rest: Vec<&str> = parts.collect();
    let status_words: Vec<&str> = rest
        .iter()
        .take_while(|w| !w.contains(':'))
        .copied()
        .collect();
    if status_words.is_empty() {
        return None;
    }

    let model = rest
        .iter()
        .find_map(|w| w.strip_prefix("model:"))
        .map(str::to_string);

    Some(DeviceEntry {
        id: id.to_string(),
        status: DeviceStatus::parse(&status_words.join(" ")),
        model,
    })
}

/// Parse `hdc list targets` output, with or without `-v`
///
/// `[Empty]` means no target; a bare id is a connected target.
pub fn parse_target_list(output: &str) -> Vec<DeviceEntry> {
    output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && *line != "[Empty]")
        .filter_map(|line| {
            let mut parts = line.split_whitespace();
            let id = parts.next()?;
            let status = match parts.nth(1) {
                None | Some("Connected") => DeviceStatus::Device,
                Some("Offline") => DeviceStatus::Offline,
                Some("Unauthorized") => DeviceStatus::Unauthorized,
                Some(other) => DeviceStatus::Other(other.to_lowercase()),
            };
            Some(DeviceEntry::new(id, status))
        })
        .collect()
}

/// First device that is online and accepting commands
pub fn first_ready(devices: &[DeviceEntry]) -> Option<&DeviceEntry> {
    devices.iter().find(|d| d.is_ready())
}
