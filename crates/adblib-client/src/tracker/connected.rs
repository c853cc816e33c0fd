//! Connected devices and their lifetime-bound resources

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use adblib_core::prelude::*;
use adblib_core::{DeviceInfo, DeviceSelector, TrackedDeviceList};

use super::cache::DeviceCache;
use super::scope::DeviceScope;
use super::select_device;

/// A device present in the tracked device list
///
/// Lives from the first snapshot listing the serial number until the first
/// snapshot that no longer does. Its scope is then cancelled and its cache
/// closed.
#[derive(Debug)]
pub struct ConnectedDevice {
    serial_number: String,
    scope: DeviceScope,
    info: watch::Sender<DeviceInfo>,
    cache: DeviceCache,
}

impl ConnectedDevice {
    fn new(info: DeviceInfo, scope: DeviceScope) -> Self {
        let (tx, _rx) = watch::channel(info.clone());
        Self {
            serial_number: info.serial_number,
            scope,
            info: tx,
            cache: DeviceCache::new(),
        }
    }

    pub fn serial_number(&self) -> &str {
        &self.serial_number
    }

    pub fn scope(&self) -> &DeviceScope {
        &self.scope
    }

    pub fn cache(&self) -> &DeviceCache {
        &self.cache
    }

    pub fn device_info(&self) -> DeviceInfo {
        self.info.borrow().clone()
    }

    /// Receiver updated whenever the device's list entry changes
    pub fn device_info_watch(&self) -> watch::Receiver<DeviceInfo> {
        self.info.subscribe()
    }

    pub fn is_connected(&self) -> bool {
        !self.scope.is_cancelled()
    }

    fn update_info(&self, info: &DeviceInfo) {
        self.info.send_if_modified(|current| {
            if current == info {
                return false;
            }
            *current = info.clone();
            true
        });
    }

    fn disconnect(&self) {
        debug!("Device {} disconnected", self.serial_number);
        self.scope.cancel();
        self.cache.close();
    }
}

/// Keeps one [`ConnectedDevice`] per serial number in the tracked device list
pub struct ConnectedDevicesManager {
    devices: watch::Receiver<Vec<Arc<ConnectedDevice>>>,
    task: JoinHandle<()>,
}

impl ConnectedDevicesManager {
    /// Follow `snapshots` until `scope` is cancelled. Device scopes are
    /// children of `scope`.
    pub fn start(snapshots: watch::Receiver<TrackedDeviceList>, scope: DeviceScope) -> Self {
        let (tx, devices) = watch::channel(Vec::new());
        let task = tokio::spawn(run_manager(snapshots, scope, tx));
        Self { devices, task }
    }

    pub fn subscribe(&self) -> watch::Receiver<Vec<Arc<ConnectedDevice>>> {
        self.devices.clone()
    }

    pub fn devices(&self) -> Vec<Arc<ConnectedDevice>> {
        self.devices.borrow().clone()
    }

    pub fn device(&self, serial_number: &str) -> Option<Arc<ConnectedDevice>> {
        self.devices
            .borrow()
            .iter()
            .find(|d| d.serial_number == serial_number)
            .cloned()
    }

    /// Connected device `selector` currently resolves to
    pub fn select(&self, selector: &DeviceSelector) -> Option<Arc<ConnectedDevice>> {
        let devices = self.devices();
        let infos: Vec<DeviceInfo> = devices.iter().map(|d| d.device_info()).collect();
        let info = select_device(&infos, selector)?;
        devices
            .iter()
            .find(|d| d.serial_number == info.serial_number)
            .cloned()
    }
}

impl Drop for ConnectedDevicesManager {
    fn drop(&mut self) {
        self.task.abort();
        for device in self.devices.borrow().iter() {
            device.disconnect();
        }
    }
}

async fn run_manager(
    mut snapshots: watch::Receiver<TrackedDeviceList>,
    scope: DeviceScope,
    devices: watch::Sender<Vec<Arc<ConnectedDevice>>>,
) {
    loop {
        let snapshot = snapshots.borrow_and_update().clone();
        apply_snapshot(&devices, &snapshot, &scope);

        tokio::select! {
            changed = snapshots.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            _ = scope.cancelled() => break,
        }
    }

    devices.send_modify(|devices| {
        for device in devices.drain(..) {
            device.disconnect();
        }
    });
    trace!("Connected devices manager stopped");
}

/// Reconcile the device set with a snapshot. Transient snapshots carry no
/// devices, so every device is torn down while the tracker reconnects.
fn apply_snapshot(
    devices: &watch::Sender<Vec<Arc<ConnectedDevice>>>,
    snapshot: &TrackedDeviceList,
    scope: &DeviceScope,
) {
    let entries: &[DeviceInfo] = if snapshot.is_live() {
        snapshot.devices.entries()
    } else {
        &[]
    };

    devices.send_if_modified(|current| {
        let mut changed = false;
        current.retain(|device| {
            let present = entries
                .iter()
                .any(|info| info.serial_number == device.serial_number);
            if !present {
                device.disconnect();
                changed = true;
            }
            present
        });

        for info in entries {
            match current
                .iter()
                .find(|d| d.serial_number == info.serial_number)
            {
                Some(device) => device.update_info(info),
                None => {
                    debug!("Device {} connected", info.serial_number);
                    current.push(Arc::new(ConnectedDevice::new(info.clone(), scope.child())));
                    changed = true;
                }
            }
        }
        changed
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracker::cache::CacheKey;
    use adblib_core::DeviceList;
    use std::time::Duration;

    fn snapshot(id: u32, serials: &[&str]) -> TrackedDeviceList {
        let devices = serials
            .iter()
            .map(|s| DeviceInfo::new(*s, "device"))
            .collect();
        TrackedDeviceList::connected(id, DeviceList::from_entries(devices))
    }

    async fn wait_for_count(
        rx: &mut watch::Receiver<Vec<Arc<ConnectedDevice>>>,
        count: usize,
    ) -> Vec<Arc<ConnectedDevice>> {
        tokio::time::timeout(Duration::from_secs(5), rx.wait_for(|d| d.len() == count))
            .await
            .unwrap()
            .unwrap()
            .clone()
    }

    #[tokio::test]
    async fn test_devices_follow_snapshots() {
        let (tx, rx) = watch::channel(TrackedDeviceList::connecting(0));
        let manager = ConnectedDevicesManager::start(rx, DeviceScope::new());
        let mut devices = manager.subscribe();

        tx.send_replace(snapshot(1, &["a", "b"]));
        let connected = wait_for_count(&mut devices, 2).await;
        let a = Arc::clone(&connected[0]);
        assert_eq!(a.serial_number(), "a");

        tx.send_replace(snapshot(1, &["b"]));
        wait_for_count(&mut devices, 1).await;
        assert!(!a.is_connected());
        assert!(a.cache().is_closed());
        assert!(manager.device("a").is_none());
        assert!(manager.device("b").is_some());
    }

    #[tokio::test]
    async fn test_device_info_updates_keep_identity() {
        let (tx, rx) = watch::channel(TrackedDeviceList::connecting(0));
        let manager = ConnectedDevicesManager::start(rx, DeviceScope::new());
        let mut devices = manager.subscribe();

        tx.send_replace(TrackedDeviceList::connected(
            1,
            DeviceList::from_entries(vec![DeviceInfo::new("a", "offline")]),
        ));
        let first = wait_for_count(&mut devices, 1).await.remove(0);
        let mut info = first.device_info_watch();

        tx.send_replace(TrackedDeviceList::connected(
            1,
            DeviceList::from_entries(vec![DeviceInfo::new("a", "device")]),
        ));
        let updated = tokio::time::timeout(Duration::from_secs(5), info.wait_for(|i| i.is_online()))
            .await
            .unwrap()
            .unwrap()
            .clone();
        assert!(updated.is_online());
        assert!(Arc::ptr_eq(&first, &manager.device("a").unwrap()));
    }

    #[tokio::test]
    async fn test_transient_snapshot_disconnects_everything() {
        const KEY: CacheKey<u32> = CacheKey::new("key");
        let (tx, rx) = watch::channel(TrackedDeviceList::connecting(0));
        let manager = ConnectedDevicesManager::start(rx, DeviceScope::new());
        let mut devices = manager.subscribe();

        tx.send_replace(snapshot(1, &["a"]));
        let a = wait_for_count(&mut devices, 1).await.remove(0);
        assert_eq!(a.cache().get_or_put(&KEY, || 1), 1);

        tx.send_replace(TrackedDeviceList::disconnected(2));
        wait_for_count(&mut devices, 0).await;
        assert_eq!(a.cache().get_or_put(&KEY, || 2), 2);
    }

    #[tokio::test]
    async fn test_cancelling_parent_scope_disconnects_devices() {
        let (tx, rx) = watch::channel(TrackedDeviceList::connecting(0));
        let scope = DeviceScope::new();
        let manager = ConnectedDevicesManager::start(rx, scope.clone());
        let mut devices = manager.subscribe();

        tx.send_replace(snapshot(1, &["a"]));
        let a = wait_for_count(&mut devices, 1).await.remove(0);

        scope.cancel();
        wait_for_count(&mut devices, 0).await;
        assert!(!a.is_connected());
    }
}
