// ── Device-level types ──

use serde::{Deserialize, Serialize};

/// Identity and capabilities reported by the device after login.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    /// Node name; also the instance name it advertises over mDNS.
    pub name: String,
    #[serde(default)]
    pub friendly_name: Option<String>,
    pub mac_address: String,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub firmware_version: String,
    #[serde(default)]
    pub compilation_time: Option<String>,
    /// Deep-sleeping nodes are unreachable by design; their entities stay
    /// available while disconnected.
    #[serde(default)]
    pub has_deep_sleep: bool,
    #[serde(default)]
    pub uses_password: bool,
}

impl DeviceInfo {
    pub fn new(name: impl Into<String>, mac_address: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            friendly_name: None,
            mac_address: mac_address.into(),
            model: String::new(),
            firmware_version: String::new(),
            compilation_time: None,
            has_deep_sleep: false,
            uses_password: false,
        }
    }

    /// Firmware version with the compilation time appended when known.
    pub fn sw_version(&self) -> String {
        match &self.compilation_time {
            Some(t) => format!("{} ({t})", self.firmware_version),
            None => self.firmware_version.clone(),
        }
    }

    /// Prefix used for host-side action names (`-` is not allowed there).
    pub fn action_prefix(&self) -> String {
        self.name.replace('-', "_")
    }
}

/// A call the device asks the host to perform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceActionCall {
    /// `"domain.name"`.
    pub service: String,
    #[serde(default)]
    pub data: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    pub is_event: bool,
}

impl DeviceActionCall {
    /// Split `service` into `(domain, name)`.
    pub fn split_service(&self) -> Option<(&str, &str)> {
        self.service.split_once('.')
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sw_version_appends_compilation_time() {
        let mut info = DeviceInfo::new("garage-door", "aa:bb:cc:dd:ee:ff");
        info.firmware_version = "1.20.0".into();
        assert_eq!(info.sw_version(), "1.20.0");
        info.compilation_time = Some("Jun 1 2021".into());
        assert_eq!(info.sw_version(), "1.20.0 (Jun 1 2021)");
        assert_eq!(info.action_prefix(), "garage_door");
    }

    #[test]
    fn service_split() {
        let call = DeviceActionCall {
            service: "light.turn_on".into(),
            data: serde_json::Map::new(),
            is_event: false,
        };
        assert_eq!(call.split_service(), Some(("light", "turn_on")));
    }
}
