//! Device tracking
//!
//! [`DeviceTracker`] owns the only `host:track-devices` connection of a
//! session. A single producer task reads device lists and publishes them as
//! [`TrackedDeviceList`] snapshots in a `watch` cell, so any number of
//! consumers observe the same connection and a slow or failing consumer never
//! affects the others. When the connection drops the tracker publishes a
//! disconnected snapshot, waits the retry delay, publishes a connecting
//! snapshot and reconnects.

pub mod cache;
pub mod connected;
pub mod scope;

use std::time::Duration;

use futures_util::stream::{self, Stream};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use adblib_core::prelude::*;
use adblib_core::{DeviceInfo, DeviceSelector, DeviceSelectorKind, TrackedDeviceList};

use crate::host::services::{AdbHostServices, DeviceListFormat};

pub use cache::{CacheKey, CacheValue, DeviceCache};
pub use connected::{ConnectedDevice, ConnectedDevicesManager};
pub use scope::DeviceScope;

/// Shared, reconnecting view of the server's device list
pub struct DeviceTracker {
    state: watch::Receiver<TrackedDeviceList>,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl DeviceTracker {
    /// Start tracking right away; the first snapshot is `connecting(0)`
    pub fn start(host: AdbHostServices, format: DeviceListFormat, retry_delay: Duration) -> Self {
        let (state_tx, state) = watch::channel(TrackedDeviceList::connecting(0));
        let (shutdown, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(run_tracker(host, format, retry_delay, state_tx, shutdown_rx));
        Self {
            state,
            shutdown,
            task,
        }
    }

    /// Receiver positioned on the latest snapshot
    pub fn subscribe(&self) -> watch::Receiver<TrackedDeviceList> {
        self.state.clone()
    }

    pub fn current(&self) -> TrackedDeviceList {
        self.state.borrow().clone()
    }

    /// Latest snapshot, then every later one
    ///
    /// Snapshots published faster than the consumer reads are coalesced into
    /// the most recent one. The stream ends when the tracker is closed.
    pub fn track_devices(&self) -> impl Stream<Item = TrackedDeviceList> + Send + 'static {
        stream::unfold((self.subscribe(), true), |(mut rx, first)| async move {
            if !first {
                rx.changed().await.ok()?;
            }
            let snapshot = rx.borrow_and_update().clone();
            Some((snapshot, (rx, false)))
        })
    }

    /// Info of the device `selector` matches, each time it changes
    ///
    /// Transient snapshots before the first live one are skipped. The stream
    /// ends without error once the device is absent, the tracker loses its
    /// connection, or a new tracking connection replaces the first one seen.
    pub fn track_device_info(
        &self,
        selector: DeviceSelector,
    ) -> impl Stream<Item = DeviceInfo> + Send + 'static {
        let state = DeviceInfoState {
            rx: self.subscribe(),
            selector,
            connection_id: None,
            last: None,
            started: false,
        };
        stream::unfold(state, |mut state| async move {
            let info = state.next().await?;
            Some((info, state))
        })
    }

    pub fn is_closed(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Stop tracking. The last published snapshot is a disconnected one.
    pub fn close(&self) {
        self.shutdown.send_replace(true);
    }
}

impl Drop for DeviceTracker {
    fn drop(&mut self) {
        self.shutdown.send_replace(true);
        self.task.abort();
    }
}

struct DeviceInfoState {
    rx: watch::Receiver<TrackedDeviceList>,
    selector: DeviceSelector,
    connection_id: Option<u32>,
    last: Option<DeviceInfo>,
    started: bool,
}

impl DeviceInfoState {
    async fn next(&mut self) -> Option<DeviceInfo> {
        loop {
            if self.started {
                self.rx.changed().await.ok()?;
            }
            self.started = true;
            let snapshot = self.rx.borrow_and_update().clone();

            if !snapshot.is_live() {
                if self.connection_id.is_none() {
                    continue;
                }
                return None;
            }
            match self.connection_id {
                Some(id) if id != snapshot.connection_id => return None,
                _ => self.connection_id = Some(snapshot.connection_id),
            }

            let device = select_device(snapshot.devices.entries(), &self.selector)?.clone();
            if self.last.as_ref() != Some(&device) {
                self.last = Some(device.clone());
                return Some(device);
            }
        }
    }
}

/// Device among `devices` addressed by `selector`
///
/// `usb`, `local` and `any` selectors only match when exactly one device
/// qualifies, mirroring how the server resolves them.
pub fn select_device<'a>(
    devices: &'a [DeviceInfo],
    selector: &DeviceSelector,
) -> Option<&'a DeviceInfo> {
    let single = |filter: &dyn Fn(&DeviceInfo) -> bool| {
        let mut matching = devices.iter().filter(|d| filter(d));
        match (matching.next(), matching.next()) {
            (Some(device), None) => Some(device),
            _ => None,
        }
    };
    match selector.kind() {
        DeviceSelectorKind::SerialNumber(serial) => {
            devices.iter().find(|d| &d.serial_number == serial)
        }
        DeviceSelectorKind::TransportId(id) => {
            devices.iter().find(|d| d.transport_id == Some(*id))
        }
        DeviceSelectorKind::Usb => single(&|d| !is_local_serial(&d.serial_number)),
        DeviceSelectorKind::Local => single(&|d| is_local_serial(&d.serial_number)),
        DeviceSelectorKind::Any => single(&|_| true),
    }
}

/// Emulators and `adb connect` targets
fn is_local_serial(serial: &str) -> bool {
    serial.starts_with("emulator-") || serial.contains(':')
}

// ---------------------------------------------------------------------------
// Producer
// ---------------------------------------------------------------------------

async fn run_tracker(
    host: AdbHostServices,
    format: DeviceListFormat,
    retry_delay: Duration,
    state: watch::Sender<TrackedDeviceList>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut next_id = 1u32;
    let mut allocate_id = move || {
        let id = next_id;
        next_id = next_id.wrapping_add(1);
        id
    };

    loop {
        let result = tokio::select! {
            biased;
            _ = shutdown.wait_for(|stop| *stop) => break,
            result = track_once(&host, format, &state, &mut allocate_id) => result,
        };
        match result {
            Ok(()) => debug!("Device tracking connection closed by the server"),
            Err(e) => debug!("Device tracking connection failed: {}", e),
        }

        state.send_replace(TrackedDeviceList::disconnected(allocate_id()));
        tokio::select! {
            biased;
            _ = shutdown.wait_for(|stop| *stop) => break,
            _ = tokio::time::sleep(retry_delay) => {}
        }
        state.send_replace(TrackedDeviceList::connecting(allocate_id()));
        trace!("Reconnecting device tracker");
    }

    state.send_replace(TrackedDeviceList::disconnected(allocate_id()));
    debug!("Device tracker stopped");
}

async fn track_once(
    host: &AdbHostServices,
    format: DeviceListFormat,
    state: &watch::Sender<TrackedDeviceList>,
    allocate_id: &mut (impl FnMut() -> u32 + Send),
) -> Result<()> {
    let mut connection = host.track_devices(format).await?;
    let connection_id = allocate_id();
    info!("Device tracker connected (connection {})", connection_id);

    while let Some(devices) = connection.next().await? {
        if !devices.errors().is_empty() {
            tracing::warn!(
                connection_id,
                "Device list contained {} undecodable lines",
                devices.errors().len()
            );
        }
        state.send_replace(TrackedDeviceList::connected(connection_id, devices));
    }
    Ok(())
}
