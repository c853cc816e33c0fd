//! Session: the entry point tying services, tracking and device lifetimes
//! together

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures_util::Stream;
use tokio::sync::watch;

use adblib_core::prelude::*;
use adblib_core::{AdbSessionConfig, DeviceInfo, DeviceSelector, TrackedDeviceList};

use crate::device::services::AdbDeviceServices;
use crate::device::shell_command::ShellCommand;
use crate::device::sync::NoProgress;
use crate::host::services::{AdbHostServices, DeviceListFormat};
use crate::provider::{AdbChannelProvider, TcpChannelProvider};
use crate::tracker::{ConnectedDevice, ConnectedDevicesManager, DeviceCache, DeviceScope, DeviceTracker};

/// Handle to an ADB session. Clones share the same session.
///
/// Creating a session starts device tracking immediately, so it must happen
/// inside a tokio runtime. Dropping the last handle stops tracking and
/// disconnects every tracked device.
#[derive(Clone)]
pub struct AdbSession {
    inner: Arc<SessionInner>,
}

struct SessionInner {
    config: AdbSessionConfig,
    host: AdbHostServices,
    device: AdbDeviceServices,
    tracker: DeviceTracker,
    devices: ConnectedDevicesManager,
    scope: DeviceScope,
    closed: AtomicBool,
}

impl Drop for SessionInner {
    fn drop(&mut self) {
        self.scope.cancel();
        self.tracker.close();
    }
}

impl AdbSession {
    /// Session talking to the ADB server over TCP
    pub fn create(config: AdbSessionConfig) -> Self {
        let provider = Arc::new(TcpChannelProvider::from_config(&config));
        Self::with_provider(provider, config)
    }

    /// Session reaching the server through `provider`
    pub fn with_provider(provider: Arc<dyn AdbChannelProvider>, config: AdbSessionConfig) -> Self {
        let timeout = config.connect_timeout();
        let host = AdbHostServices::new(Arc::clone(&provider), timeout);
        let device = AdbDeviceServices::new(provider, timeout);

        let format = if config.tracker_long_format {
            DeviceListFormat::Long
        } else {
            DeviceListFormat::Short
        };
        let tracker = DeviceTracker::start(host.clone(), format, config.track_devices_retry_delay());
        let scope = DeviceScope::new();
        let devices = ConnectedDevicesManager::start(tracker.subscribe(), scope.clone());

        info!("ADB session started ({})", config.server_address());
        Self {
            inner: Arc::new(SessionInner {
                config,
                host,
                device,
                tracker,
                devices,
                scope,
                closed: AtomicBool::new(false),
            }),
        }
    }

    pub fn config(&self) -> &AdbSessionConfig {
        &self.inner.config
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(Error::SessionClosed);
        }
        Ok(())
    }

    pub fn host_services(&self) -> Result<&AdbHostServices> {
        self.ensure_open()?;
        Ok(&self.inner.host)
    }

    pub fn device_services(&self) -> Result<&AdbDeviceServices> {
        self.ensure_open()?;
        Ok(&self.inner.device)
    }

    // -----------------------------------------------------------------------
    // Tracking
    // -----------------------------------------------------------------------

    /// Shared device list stream; see [`DeviceTracker::track_devices`]
    pub fn track_devices(&self) -> Result<impl Stream<Item = TrackedDeviceList> + Send + 'static> {
        self.ensure_open()?;
        Ok(self.inner.tracker.track_devices())
    }

    /// See [`DeviceTracker::track_device_info`]
    pub fn track_device_info(
        &self,
        selector: DeviceSelector,
    ) -> Result<impl Stream<Item = DeviceInfo> + Send + 'static> {
        self.ensure_open()?;
        Ok(self.inner.tracker.track_device_info(selector))
    }

    /// Latest tracker snapshot
    pub fn tracked_devices(&self) -> TrackedDeviceList {
        self.inner.tracker.current()
    }

    pub fn tracked_devices_watch(&self) -> watch::Receiver<TrackedDeviceList> {
        self.inner.tracker.subscribe()
    }

    pub fn connected_devices(&self) -> Vec<Arc<ConnectedDevice>> {
        self.inner.devices.devices()
    }

    pub fn connected_devices_watch(&self) -> watch::Receiver<Vec<Arc<ConnectedDevice>>> {
        self.inner.devices.subscribe()
    }

    pub fn connected_device(&self, serial_number: &str) -> Option<Arc<ConnectedDevice>> {
        self.inner.devices.device(serial_number)
    }

    // -----------------------------------------------------------------------
    // Device lifetimes
    // -----------------------------------------------------------------------

    /// Cache of a connected device, or the no-op cache for unknown devices
    pub fn device_cache(&self, serial_number: &str) -> DeviceCache {
        match self.connected_device(serial_number) {
            Some(device) => device.cache().clone(),
            None => DeviceCache::no_op(),
        }
    }

    /// Scope cancelled when the device `selector` resolves to disconnects
    ///
    /// Unknown devices get a scope that is already cancelled.
    pub fn create_device_scope(&self, selector: &DeviceSelector) -> DeviceScope {
        if self.is_closed() {
            return DeviceScope::cancelled_scope();
        }
        match self.inner.devices.select(selector) {
            Some(device) => device.scope().child(),
            None => {
                debug!("No connected device for {}, scope starts cancelled", selector);
                DeviceScope::cancelled_scope()
            }
        }
    }

    /// Shell command builder picking the best protocol the device supports
    pub fn shell_command(&self, device: &DeviceSelector, command: impl Into<String>) -> ShellCommand {
        ShellCommand::new(self.clone(), device.clone(), command.into())
    }

    // -----------------------------------------------------------------------
    // File transfer
    // -----------------------------------------------------------------------

    /// Copy a local file to the device over its own sync connection, in
    /// chunks of the configured `sync_buffer_size`
    pub async fn push_file(
        &self,
        device: &DeviceSelector,
        local_path: &Path,
        remote_path: &str,
    ) -> Result<()> {
        let buffer_size = self.inner.config.sync_buffer_size;
        self.device_services()?
            .sync_send_file(device, local_path, remote_path, &mut NoProgress, buffer_size)
            .await
    }

    /// Copy a device file to `local_path`; see [`push_file`](Self::push_file)
    pub async fn pull_file(
        &self,
        device: &DeviceSelector,
        remote_path: &str,
        local_path: &Path,
    ) -> Result<()> {
        let buffer_size = self.inner.config.sync_buffer_size;
        self.device_services()?
            .sync_recv_file(device, remote_path, local_path, &mut NoProgress, buffer_size)
            .await
    }

    /// Stop tracking and disconnect every device. Later service lookups fail
    /// with [`Error::SessionClosed`]. Idempotent.
    pub fn close(&self) {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        info!("Closing ADB session");
        self.inner.scope.cancel();
        self.inner.tracker.close();
    }
}

impl std::fmt::Debug for AdbSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdbSession")
            .field("server", &self.inner.config.server_address())
            .field("closed", &self.is_closed())
            .finish()
    }
}
