//! Device tracking integration tests

use adblib::client::test_utils::{test_session, FakeDevice};
use adblib::DeviceSelector;
use futures_util::StreamExt;

use crate::{server_with_devices, wait_for_device, WAIT};

// ─────────────────────────────────────────────────────────
// Shared Connection
// ─────────────────────────────────────────────────────────

#[tokio::test]
async fn test_many_consumers_share_one_connection() {
    let server = server_with_devices(&["emulator-5554"]);
    let session = test_session(&server);

    let mut consumers = Vec::new();
    for _ in 0..10 {
        let stream = session.track_devices().unwrap();
        consumers.push(tokio::spawn(async move {
            let mut stream = Box::pin(stream);
            while let Some(snapshot) = stream.next().await {
                if snapshot.find("emulator-5554").is_some() {
                    return true;
                }
            }
            false
        }));
    }
    for consumer in consumers {
        let saw_device = tokio::time::timeout(WAIT, consumer).await.unwrap().unwrap();
        assert!(saw_device);
    }

    assert_eq!(server.channels_created(), 1);
}

#[tokio::test]
async fn test_snapshots_follow_device_changes() {
    let server = server_with_devices(&["emulator-5554"]);
    let session = test_session(&server);
    let mut snapshots = session.tracked_devices_watch();

    tokio::time::timeout(WAIT, snapshots.wait_for(|s| s.is_live() && s.devices.len() == 1))
        .await
        .unwrap()
        .unwrap();

    server.add_device(FakeDevice::new("R58M123"));
    let snapshot = tokio::time::timeout(WAIT, snapshots.wait_for(|s| s.devices.len() == 2))
        .await
        .unwrap()
        .unwrap()
        .clone();
    assert!(snapshot.find("R58M123").is_some());
    assert!(snapshot.is_live());
}

#[tokio::test]
async fn test_failing_consumer_does_not_end_tracking_for_others() {
    let server = server_with_devices(&["emulator-5554"]);
    let session = test_session(&server);

    let mut survivors = Vec::new();
    for _ in 0..3 {
        let stream = session.track_devices().unwrap();
        survivors.push(tokio::spawn(async move {
            let mut stream = Box::pin(stream);
            while let Some(snapshot) = stream.next().await {
                if snapshot.find("R58M123").is_some() {
                    return true;
                }
            }
            false
        }));
    }

    let stream = session.track_devices().unwrap();
    let panicking = tokio::spawn(async move {
        let mut stream = Box::pin(stream);
        stream.next().await;
        panic!("consumer failed on its first snapshot");
    });
    let stream = session.track_devices().unwrap();
    let quitter = tokio::spawn(async move {
        let mut stream = Box::pin(stream);
        stream.next().await.is_some()
    });

    let failure = tokio::time::timeout(WAIT, panicking).await.unwrap().unwrap_err();
    assert!(failure.is_panic());
    assert!(tokio::time::timeout(WAIT, quitter).await.unwrap().unwrap());

    server.add_device(FakeDevice::new("R58M123"));
    for survivor in survivors {
        let saw_device = tokio::time::timeout(WAIT, survivor).await.unwrap().unwrap();
        assert!(saw_device);
    }
    assert!(session.tracked_devices().find("R58M123").is_some());
    assert_eq!(server.channels_created(), 1);
}

// ─────────────────────────────────────────────────────────
// Reconnection
// ─────────────────────────────────────────────────────────

#[tokio::test]
async fn test_tracker_reconnects_after_server_restart() {
    let server = server_with_devices(&["emulator-5554"]);
    let session = test_session(&server);
    let mut snapshots = session.tracked_devices_watch();

    let first_id = tokio::time::timeout(WAIT, snapshots.wait_for(|s| s.is_live()))
        .await
        .unwrap()
        .unwrap()
        .connection_id;

    server.stop();
    tokio::time::timeout(WAIT, snapshots.wait_for(|s| s.is_tracker_disconnected))
        .await
        .unwrap()
        .unwrap();
    assert!(session.tracked_devices().devices.is_empty());

    server.restart();
    let snapshot = tokio::time::timeout(
        WAIT,
        snapshots.wait_for(|s| s.is_live() && s.find("emulator-5554").is_some()),
    )
    .await
    .unwrap()
    .unwrap()
    .clone();
    assert!(snapshot.connection_id > first_id);
    assert!(server.channels_created() >= 2);
}

// ─────────────────────────────────────────────────────────
// Device Info
// ─────────────────────────────────────────────────────────

#[tokio::test]
async fn test_track_device_info_until_removed() {
    let server = server_with_devices(&["emulator-5554", "R58M123"]);
    let session = test_session(&server);

    let mut infos = Box::pin(
        session
            .track_device_info(DeviceSelector::from_serial_number("R58M123"))
            .unwrap(),
    );

    let first = tokio::time::timeout(WAIT, infos.next()).await.unwrap().unwrap();
    assert_eq!(first.serial_number, "R58M123");
    assert!(first.is_online());

    // Changes to other devices are not reported
    server.remove_device("emulator-5554");
    server.set_device_state("R58M123", "offline");
    let second = tokio::time::timeout(WAIT, infos.next()).await.unwrap().unwrap();
    assert_eq!(second.device_state_string, "offline");

    server.remove_device("R58M123");
    let end = tokio::time::timeout(WAIT, infos.next()).await.unwrap();
    assert!(end.is_none());
}

#[tokio::test]
async fn test_track_device_info_ends_on_disconnect() {
    let server = server_with_devices(&["emulator-5554"]);
    let session = test_session(&server);
    wait_for_device(&session, "emulator-5554").await;

    let mut infos = Box::pin(
        session
            .track_device_info(DeviceSelector::from_serial_number("emulator-5554"))
            .unwrap(),
    );
    tokio::time::timeout(WAIT, infos.next()).await.unwrap().unwrap();

    server.stop();
    let end = tokio::time::timeout(WAIT, infos.next()).await.unwrap();
    assert!(end.is_none());
}
