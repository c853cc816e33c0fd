//! Session lifetime integration tests
//!
//! Device caches, device scopes and session close.

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use adblib::client::CacheKey;
use adblib::{DeviceSelector, Error};

use crate::{connected_session, wait_for_device, wait_for_no_device, WAIT};

const SERIAL: &str = "emulator-5554";
const COUNTER: CacheKey<u32> = CacheKey::new("test.counter");

// ─────────────────────────────────────────────────────────
// Device Cache
// ─────────────────────────────────────────────────────────

#[tokio::test]
async fn test_device_cache_lives_while_connected() {
    let (server, session, device) = connected_session(SERIAL).await;
    let next = AtomicU32::new(10);
    let compute = || next.fetch_add(1, Ordering::SeqCst);

    let cache = session.device_cache(SERIAL);
    assert_eq!(cache.get_or_put(&COUNTER, compute), 10);
    assert_eq!(cache.get_or_put(&COUNTER, compute), 10);
    assert_eq!(device.cache().get_or_put(&COUNTER, compute), 10);

    server.remove_device(SERIAL);
    wait_for_no_device(&session, SERIAL).await;
    assert!(cache.is_closed());
    assert!(!device.is_connected());

    // A closed cache computes on every lookup
    assert_eq!(cache.get_or_put(&COUNTER, compute), 11);
    assert_eq!(cache.get_or_put(&COUNTER, compute), 12);
    assert_eq!(session.device_cache(SERIAL).get_or_put(&COUNTER, compute), 13);
}

#[tokio::test]
async fn test_reconnected_device_gets_fresh_cache() {
    let (server, session, _device) = connected_session(SERIAL).await;
    session.device_cache(SERIAL).get_or_put(&COUNTER, || 1);

    server.remove_device(SERIAL);
    wait_for_no_device(&session, SERIAL).await;
    server.add_device(adblib::client::test_utils::FakeDevice::new(SERIAL));
    wait_for_device(&session, SERIAL).await;

    assert_eq!(session.device_cache(SERIAL).get_or_put(&COUNTER, || 2), 2);
}

// ─────────────────────────────────────────────────────────
// Device Scope
// ─────────────────────────────────────────────────────────

#[tokio::test]
async fn test_device_scope_cancelled_on_disconnect() {
    let (server, session, _device) = connected_session(SERIAL).await;
    let scope = session.create_device_scope(&DeviceSelector::from_serial_number(SERIAL));
    assert!(!scope.is_cancelled());

    let task = scope.spawn(async {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        "finished"
    });

    server.remove_device(SERIAL);
    tokio::time::timeout(WAIT, scope.cancelled()).await.unwrap();
    let outcome = tokio::time::timeout(WAIT, task).await.unwrap().unwrap();
    assert_eq!(outcome, None);
}

#[tokio::test]
async fn test_scope_for_unknown_device_starts_cancelled() {
    let (_server, session, _device) = connected_session(SERIAL).await;
    let scope = session.create_device_scope(&DeviceSelector::from_serial_number("missing"));
    assert!(scope.is_cancelled());

    let scope = session.create_device_scope(&DeviceSelector::any());
    assert!(!scope.is_cancelled());
}

// ─────────────────────────────────────────────────────────
// Close
// ─────────────────────────────────────────────────────────

#[tokio::test]
async fn test_close_rejects_later_requests() {
    let (_server, session, device) = connected_session(SERIAL).await;
    let scope = session.create_device_scope(&DeviceSelector::from_serial_number(SERIAL));

    session.close();
    session.close();
    assert!(session.is_closed());

    assert!(matches!(session.host_services(), Err(Error::SessionClosed)));
    assert!(matches!(session.device_services(), Err(Error::SessionClosed)));
    assert!(matches!(session.track_devices(), Err(Error::SessionClosed)));

    tokio::time::timeout(WAIT, scope.cancelled()).await.unwrap();
    assert!(!device.is_connected());
    assert!(session
        .create_device_scope(&DeviceSelector::from_serial_number(SERIAL))
        .is_cancelled());
}

#[tokio::test]
async fn test_close_ends_tracking_streams() {
    let (_server, session, _device) = connected_session(SERIAL).await;
    let mut snapshots = session.tracked_devices_watch();

    session.close();
    tokio::time::timeout(WAIT, snapshots.wait_for(|s| s.is_tracker_disconnected))
        .await
        .unwrap()
        .unwrap();
}
