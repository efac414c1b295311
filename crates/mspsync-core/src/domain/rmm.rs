use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::UtcDateTime;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceType {
    Workstation,
    Server,
    Laptop,
    Network,
    Mobile,
    Virtual,
    Unknown,
}

impl DeviceType {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Workstation => "workstation",
            Self::Server => "server",
            Self::Laptop => "laptop",
            Self::Network => "network",
            Self::Mobile => "mobile",
            Self::Virtual => "virtual",
            Self::Unknown => "unknown",
        }
    }

    /// Infer a device class from a provider's free-text type or role.
    pub fn from_label(label: &str) -> Self {
        let label = label.trim().to_ascii_lowercase();
        let has = |needle: &str| label.contains(needle);

        if has("server") {
            Self::Server
        } else if has("laptop") || has("notebook") {
            Self::Laptop
        } else if has("vm") || has("virtual") || has("hyper-v") || has("hypervisor") {
            Self::Virtual
        } else if has("mobile") || has("phone") || has("tablet") || has("ios") || has("android") {
            Self::Mobile
        } else if has("network") || has("router") || has("switch") || has("firewall") || has("printer") || has("nms") || has("snmp") {
            Self::Network
        } else if has("workstation") || has("desktop") || has("work station") || has("pc") {
            Self::Workstation
        } else {
            Self::Unknown
        }
    }
}

impl Display for DeviceType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OsType {
    Windows,
    Macos,
    Linux,
    Ios,
    Android,
    Other,
}

impl OsType {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Windows => "windows",
            Self::Macos => "macos",
            Self::Linux => "linux",
            Self::Ios => "ios",
            Self::Android => "android",
            Self::Other => "other",
        }
    }

    pub fn from_label(label: &str) -> Self {
        let label = label.trim().to_ascii_lowercase();
        let has = |needle: &str| label.contains(needle);

        if has("windows") || label == "win" {
            Self::Windows
        } else if has("mac") || has("darwin") || has("os x") {
            Self::Macos
        } else if has("ios") || has("ipados") || has("iphone") {
            Self::Ios
        } else if has("android") {
            Self::Android
        } else if has("linux") || has("ubuntu") || has("debian") || has("centos") || has("red hat") || has("rhel") {
            Self::Linux
        } else {
            Self::Other
        }
    }
}

impl Display for OsType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertSeverity {
    Info,
    Warning,
    Error,
    Critical,
}

impl AlertSeverity {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Error => "error",
            Self::Critical => "critical",
        }
    }

    /// Unknown severities become `Info`.
    pub fn from_label(label: &str) -> Self {
        let label = label.trim().to_ascii_lowercase();
        let has = |needle: &str| label.contains(needle);

        if has("critical") || has("emergency") {
            Self::Critical
        } else if has("error") || has("major") || has("high") || has("fail") {
            Self::Error
        } else if has("warn") || has("moderate") || has("minor") || has("medium") {
            Self::Warning
        } else {
            Self::Info
        }
    }
}

impl Display for AlertSeverity {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertStatus {
    Active,
    Acknowledged,
    Resolved,
    Closed,
}

impl AlertStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Acknowledged => "acknowledged",
            Self::Resolved => "resolved",
            Self::Closed => "closed",
        }
    }

    /// Unknown statuses become `Active`.
    pub fn from_label(label: &str) -> Self {
        let label = label.trim().to_ascii_lowercase();
        let has = |needle: &str| label.contains(needle);

        if has("closed") || has("archived") || has("dismissed") {
            Self::Closed
        } else if has("resolved") || has("cleared") {
            Self::Resolved
        } else if has("ack") || has("snoozed") {
            Self::Acknowledged
        } else {
            Self::Active
        }
    }
}

impl Display for AlertStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Canonical managed device. `organization_external_id`/`organization_name`
/// describe the RMM's client or site grouping the device belongs to.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Device {
    pub external_id: String,
    pub device_name: String,
    pub device_type: DeviceType,
    pub manufacturer: Option<String>,
    pub model: Option<String>,
    pub serial_number: Option<String>,
    pub os_type: OsType,
    pub os_version: Option<String>,
    pub hostname: Option<String>,
    pub ip_address: Option<String>,
    pub mac_address: Option<String>,
    pub is_online: bool,
    pub last_seen: Option<UtcDateTime>,
    pub organization_external_id: Option<String>,
    pub organization_name: Option<String>,
    pub raw_data: Value,
}

/// Canonical monitoring alert. `device_id` is the provider's device id.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Alert {
    pub external_id: String,
    pub device_id: Option<String>,
    pub alert_type: Option<String>,
    pub message: Option<String>,
    pub severity: AlertSeverity,
    pub status: AlertStatus,
    pub triggered_at: Option<UtcDateTime>,
    pub resolved_at: Option<UtcDateTime>,
    pub raw_data: Value,
}

/// One installed application on a device.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SoftwareItem {
    pub external_id: Option<String>,
    pub name: String,
    pub version: Option<String>,
    pub vendor: Option<String>,
    pub install_date: Option<UtcDateTime>,
    pub raw_data: Value,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_labels_map_to_classes() {
        assert_eq!(DeviceType::from_label("WINDOWS_SERVER"), DeviceType::Server);
        assert_eq!(DeviceType::from_label("Laptop"), DeviceType::Laptop);
        assert_eq!(DeviceType::from_label("VMWARE_VM_GUEST"), DeviceType::Virtual);
        assert_eq!(DeviceType::from_label("Desktop"), DeviceType::Workstation);
        assert_eq!(DeviceType::from_label("toaster"), DeviceType::Unknown);
    }

    #[test]
    fn os_labels_map_to_families() {
        assert_eq!(OsType::from_label("Microsoft Windows 11 Pro"), OsType::Windows);
        assert_eq!(OsType::from_label("darwin"), OsType::Macos);
        assert_eq!(OsType::from_label("Ubuntu 22.04"), OsType::Linux);
        assert_eq!(OsType::from_label("Solaris"), OsType::Other);
    }

    #[test]
    fn unknown_alert_vocabulary_is_neutral() {
        assert_eq!(AlertSeverity::from_label("NONE"), AlertSeverity::Info);
        assert_eq!(AlertSeverity::from_label("MAJOR"), AlertSeverity::Error);
        assert_eq!(AlertStatus::from_label("whatever"), AlertStatus::Active);
    }
}
