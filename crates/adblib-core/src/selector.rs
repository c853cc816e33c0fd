//! Device selection for host and device requests

use std::fmt;
use std::sync::{Arc, Mutex};

/// What a [`DeviceSelector`] matches
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DeviceSelectorKind {
    SerialNumber(String),
    TransportId(u64),
    /// The single device connected over USB
    Usb,
    /// The single device connected over TCP (emulators, `adb connect`)
    Local,
    /// The single connected device
    Any,
}

/// Identifies the device a request is addressed to
///
/// Selectors built with the plain factories discard the transport id the
/// server reports. [`DeviceSelector::with_transport_id_tracking`] returns a
/// selector with its own id slot: device connections opened with it use the
/// `host:tport:` prefix and remember the id, so later requests can be pinned
/// to the same transport.
#[derive(Clone)]
pub struct DeviceSelector {
    kind: DeviceSelectorKind,
    tracked_transport_id: Option<Arc<Mutex<Option<u64>>>>,
}

impl DeviceSelector {
    fn new(kind: DeviceSelectorKind) -> Self {
        Self {
            kind,
            tracked_transport_id: None,
        }
    }

    pub fn from_serial_number(serial_number: impl Into<String>) -> Self {
        Self::new(DeviceSelectorKind::SerialNumber(serial_number.into()))
    }

    pub fn from_transport_id(transport_id: u64) -> Self {
        Self::new(DeviceSelectorKind::TransportId(transport_id))
    }

    pub fn usb() -> Self {
        Self::new(DeviceSelectorKind::Usb)
    }

    pub fn local() -> Self {
        Self::new(DeviceSelectorKind::Local)
    }

    pub fn any() -> Self {
        Self::new(DeviceSelectorKind::Any)
    }

    /// Copy of this selector that retains the transport id reported by the
    /// server. The slot is freshly allocated and shared with no other selector.
    pub fn with_transport_id_tracking(&self) -> Self {
        Self {
            kind: self.kind.clone(),
            tracked_transport_id: Some(Arc::new(Mutex::new(None))),
        }
    }

    pub fn kind(&self) -> &DeviceSelectorKind {
        &self.kind
    }

    pub fn serial_number(&self) -> Option<&str> {
        match &self.kind {
            DeviceSelectorKind::SerialNumber(serial) => Some(serial),
            _ => None,
        }
    }

    pub fn is_tracking_transport_id(&self) -> bool {
        self.tracked_transport_id.is_some()
    }

    /// Explicit transport id, or the one retained by a tracking selector
    pub fn transport_id(&self) -> Option<u64> {
        if let DeviceSelectorKind::TransportId(id) = self.kind {
            return Some(id);
        }
        self.tracked_transport_id
            .as_ref()
            .and_then(|slot| *slot.lock().unwrap_or_else(|e| e.into_inner()))
    }

    /// Prefix for host requests about the device (`host-serial:S`, ...)
    pub fn host_prefix(&self) -> String {
        match &self.kind {
            DeviceSelectorKind::SerialNumber(serial) => format!("host-serial:{}", serial),
            DeviceSelectorKind::TransportId(id) => format!("host-transport-id:{}", id),
            DeviceSelectorKind::Usb => "host-usb".to_string(),
            DeviceSelectorKind::Local => "host-local".to_string(),
            DeviceSelectorKind::Any => "host".to_string(),
        }
    }

    /// Request that switches a host connection to the device transport
    pub fn transport_prefix(&self) -> String {
        if self.expects_transport_id() {
            return self.tracking_transport_prefix();
        }
        match &self.kind {
            DeviceSelectorKind::SerialNumber(serial) => format!("host:transport:{}", serial),
            DeviceSelectorKind::TransportId(id) => format!("host:transport-id:{}", id),
            DeviceSelectorKind::Usb => "host:transport-usb".to_string(),
            DeviceSelectorKind::Local => "host:transport-local".to_string(),
            DeviceSelectorKind::Any => "host:transport-any".to_string(),
        }
    }

    fn tracking_transport_prefix(&self) -> String {
        match &self.kind {
            DeviceSelectorKind::SerialNumber(serial) => format!("host:tport:serial:{}", serial),
            DeviceSelectorKind::TransportId(id) => format!("host:transport-id:{}", id),
            DeviceSelectorKind::Usb => "host:tport:usb".to_string(),
            DeviceSelectorKind::Local => "host:tport:local".to_string(),
            DeviceSelectorKind::Any => "host:tport:any".to_string(),
        }
    }

    /// True if the server answers the transport request with an 8-byte
    /// transport id after `OKAY`
    pub fn expects_transport_id(&self) -> bool {
        self.tracked_transport_id.is_some()
            && !matches!(self.kind, DeviceSelectorKind::TransportId(_))
    }

    /// Record the transport id read back from a `host:tport:` request
    pub fn set_transport_id(&self, transport_id: u64) {
        if let Some(slot) = &self.tracked_transport_id {
            *slot.lock().unwrap_or_else(|e| e.into_inner()) = Some(transport_id);
        }
    }
}

impl PartialEq for DeviceSelector {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind
    }
}

impl Eq for DeviceSelector {}

impl fmt::Debug for DeviceSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceSelector")
            .field("kind", &self.kind)
            .field("transport_id", &self.transport_id())
            .finish()
    }
}

impl fmt::Display for DeviceSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            DeviceSelectorKind::SerialNumber(serial) => write!(f, "serial:{}", serial),
            DeviceSelectorKind::TransportId(id) => write!(f, "transport-id:{}", id),
            DeviceSelectorKind::Usb => f.write_str("usb"),
            DeviceSelectorKind::Local => f.write_str("local"),
            DeviceSelectorKind::Any => f.write_str("any"),
        }
    }
}
