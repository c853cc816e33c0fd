//! Device records reported by the ADB server

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::list::ListWithErrors;

/// Connection state of a device as reported by `host:devices`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeviceState {
    /// "device": connected and usable
    Online,
    Offline,
    Unauthorized,
    Authorizing,
    Connecting,
    Recovery,
    Rescue,
    Sideload,
    Bootloader,
    Host,
    NoPermissions,
    Disconnected,
    Unknown,
}

impl DeviceState {
    /// Map the raw state string; unmapped strings become [`DeviceState::Unknown`]
    pub fn parse(raw: &str) -> Self {
        match raw {
            "device" => DeviceState::Online,
            "offline" => DeviceState::Offline,
            "unauthorized" => DeviceState::Unauthorized,
            "authorizing" => DeviceState::Authorizing,
            "connecting" => DeviceState::Connecting,
            "recovery" => DeviceState::Recovery,
            "rescue" => DeviceState::Rescue,
            "sideload" => DeviceState::Sideload,
            "bootloader" => DeviceState::Bootloader,
            "host" => DeviceState::Host,
            "no permissions" => DeviceState::NoPermissions,
            "disconnected" => DeviceState::Disconnected,
            _ => DeviceState::Unknown,
        }
    }

    /// Wire representation of the state
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceState::Online => "device",
            DeviceState::Offline => "offline",
            DeviceState::Unauthorized => "unauthorized",
            DeviceState::Authorizing => "authorizing",
            DeviceState::Connecting => "connecting",
            DeviceState::Recovery => "recovery",
            DeviceState::Rescue => "rescue",
            DeviceState::Sideload => "sideload",
            DeviceState::Bootloader => "bootloader",
            DeviceState::Host => "host",
            DeviceState::NoPermissions => "no permissions",
            DeviceState::Disconnected => "disconnected",
            DeviceState::Unknown => "unknown",
        }
    }
}

impl fmt::Display for DeviceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One entry of the device list
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub serial_number: String,
    pub device_state: DeviceState,
    /// State exactly as the server sent it, kept even when unmapped
    pub device_state_string: String,
    pub product: Option<String>,
    pub model: Option<String>,
    pub device: Option<String>,
    pub transport_id: Option<u64>,
    /// Remaining `key:value` pairs, in wire order
    pub additional_fields: Vec<(String, String)>,
}

impl DeviceInfo {
    pub fn new(serial_number: impl Into<String>, state: &str) -> Self {
        Self {
            serial_number: serial_number.into(),
            device_state: DeviceState::parse(state),
            device_state_string: state.to_string(),
            product: None,
            model: None,
            device: None,
            transport_id: None,
            additional_fields: Vec::new(),
        }
    }

    pub fn with_product(mut self, product: impl Into<String>) -> Self {
        self.product = Some(product.into());
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_device(mut self, device: impl Into<String>) -> Self {
        self.device = Some(device.into());
        self
    }

    pub fn with_transport_id(mut self, transport_id: u64) -> Self {
        self.transport_id = Some(transport_id);
        self
    }

    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.additional_fields.push((key.into(), value.into()));
        self
    }

    pub fn is_online(&self) -> bool {
        self.device_state == DeviceState::Online
    }

    /// Look up an additional field by key
    pub fn field(&self, key: &str) -> Option<&str> {
        self.additional_fields
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// Device list with per-line decode errors
pub type DeviceList = ListWithErrors<DeviceInfo>;

/// Snapshot published by the device tracker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackedDeviceList {
    pub devices: DeviceList,
    /// Identifies the tracking connection (or transient state) that produced
    /// this snapshot
    pub connection_id: u32,
    pub is_tracker_connecting: bool,
    pub is_tracker_disconnected: bool,
}

impl TrackedDeviceList {
    /// Snapshot decoded from an established tracking connection
    pub fn connected(connection_id: u32, devices: DeviceList) -> Self {
        Self {
            devices,
            connection_id,
            is_tracker_connecting: false,
            is_tracker_disconnected: false,
        }
    }

    /// Empty snapshot published while the tracker (re)connects
    pub fn connecting(connection_id: u32) -> Self {
        Self {
            devices: DeviceList::new(),
            connection_id,
            is_tracker_connecting: true,
            is_tracker_disconnected: false,
        }
    }

    /// Empty snapshot published after the tracking connection was lost
    pub fn disconnected(connection_id: u32) -> Self {
        Self {
            devices: DeviceList::new(),
            connection_id,
            is_tracker_connecting: false,
            is_tracker_disconnected: true,
        }
    }

    /// True when the snapshot reflects a live tracking connection
    pub fn is_live(&self) -> bool {
        !self.is_tracker_connecting && !self.is_tracker_disconnected
    }

    pub fn find(&self, serial_number: &str) -> Option<&DeviceInfo> {
        self.devices
            .iter()
            .find(|d| d.serial_number == serial_number)
    }
}
