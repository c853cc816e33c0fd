//! Host request integration tests
//!
//! Requests answered by the server itself and device requests routed
//! through host prefixes.

use std::sync::Arc;
use std::time::Duration;

use adblib::client::test_utils::{FakeAdbServer, FakeDevice};
use adblib::client::{AdbHostServices, DeviceListFormat};
use adblib::{DeviceSelector, DeviceState, Error, SocketSpec};

use crate::server_with_devices;

fn host(server: &FakeAdbServer) -> AdbHostServices {
    AdbHostServices::new(Arc::new(server.clone()), Duration::from_secs(5))
}

// ─────────────────────────────────────────────────────────
// Server Queries
// ─────────────────────────────────────────────────────────

#[tokio::test]
async fn test_version_and_host_features() {
    let server = FakeAdbServer::new();
    let host = host(&server);

    assert_eq!(host.version().await.unwrap(), 41);
    let features = host.host_features().await.unwrap();
    assert!(features.iter().any(|f| f == "shell_v2"));
}

#[tokio::test]
async fn test_devices_short_and_long_format() {
    let server = server_with_devices(&["emulator-5554"]);
    server.add_device(FakeDevice::new("0123456789ABCDEF").with_state("unauthorized"));
    let host = host(&server);

    let short = host.devices(DeviceListFormat::Short).await.unwrap();
    assert_eq!(short.len(), 2);
    assert!(short.errors().is_empty());
    assert_eq!(short.entries()[0].model, None);
    assert_eq!(short.entries()[1].device_state, DeviceState::Unauthorized);

    let long = host.devices(DeviceListFormat::Long).await.unwrap();
    assert_eq!(long.entries()[0].model.as_deref(), Some("Pixel_7"));
    assert_eq!(long.entries()[0].transport_id, Some(1));
    assert_eq!(long.entries()[1].transport_id, Some(2));
}

#[tokio::test]
async fn test_device_queries_through_host_prefix() {
    let server = server_with_devices(&["emulator-5554"]);
    let host = host(&server);
    let device = DeviceSelector::from_serial_number("emulator-5554");

    assert_eq!(host.get_state(&device).await.unwrap(), DeviceState::Online);
    assert_eq!(host.get_serial_no(&device).await.unwrap(), "emulator-5554");
    assert_eq!(host.get_dev_path(&device).await.unwrap(), "usb:1");
    let features = host.features(&device).await.unwrap();
    assert_eq!(features, vec!["shell_v2", "cmd", "stat_v2"]);
}

#[tokio::test]
async fn test_single_device_selectors() {
    let server = server_with_devices(&["emulator-5554", "R58M123"]);
    let host = host(&server);

    let serial = host.get_serial_no(&DeviceSelector::local()).await.unwrap();
    assert_eq!(serial, "emulator-5554");
    let serial = host.get_serial_no(&DeviceSelector::usb()).await.unwrap();
    assert_eq!(serial, "R58M123");
    let serial = host
        .get_serial_no(&DeviceSelector::from_transport_id(2))
        .await
        .unwrap();
    assert_eq!(serial, "R58M123");

    let err = host.get_serial_no(&DeviceSelector::any()).await.unwrap_err();
    assert!(err.to_string().contains("more than one device"));
}

#[tokio::test]
async fn test_unknown_device_is_fail_response() {
    let server = FakeAdbServer::new();
    let err = host(&server)
        .features(&DeviceSelector::from_serial_number("missing"))
        .await
        .unwrap_err();
    match err {
        Error::FailResponse { message } => assert_eq!(message, "device 'missing' not found"),
        other => panic!("Expected FailResponse, got {:?}", other),
    }
}

#[tokio::test]
async fn test_kill_stops_server() {
    let server = FakeAdbServer::new();
    let host = host(&server);

    host.kill().await.unwrap();
    assert!(!server.is_running());
    assert!(matches!(host.version().await, Err(Error::Io(_))));
}

// ─────────────────────────────────────────────────────────
// Forwarding
// ─────────────────────────────────────────────────────────

#[tokio::test]
async fn test_forward_list_and_kill() {
    let server = server_with_devices(&["emulator-5554"]);
    let host = host(&server);
    let device = DeviceSelector::from_serial_number("emulator-5554");

    let port = host
        .forward(&device, &SocketSpec::Tcp(6000), &SocketSpec::Tcp(7000), true)
        .await
        .unwrap();
    assert_eq!(port, None);
    let allocated = host
        .forward(
            &device,
            &SocketSpec::Tcp(0),
            &SocketSpec::LocalAbstract("chrome_devtools_remote".to_string()),
            true,
        )
        .await
        .unwrap()
        .expect("allocated port");

    let list = host.list_forward().await.unwrap();
    assert_eq!(list.len(), 2);
    assert_eq!(list.entries()[0].device_serial, "emulator-5554");
    assert_eq!(list.entries()[0].local, SocketSpec::Tcp(6000));
    assert_eq!(
        list.entries()[1].local,
        SocketSpec::Tcp(allocated.parse().unwrap())
    );
    assert_eq!(
        list.entries()[1].remote,
        SocketSpec::LocalAbstract("chrome_devtools_remote".to_string())
    );

    host.kill_forward(&device, &SocketSpec::Tcp(6000)).await.unwrap();
    assert_eq!(host.list_forward().await.unwrap().len(), 1);

    host.kill_forward_all(&device).await.unwrap();
    assert!(host.list_forward().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_forward_norebind_conflict_fails() {
    let server = server_with_devices(&["emulator-5554"]);
    let host = host(&server);
    let device = DeviceSelector::from_serial_number("emulator-5554");

    host.forward(&device, &SocketSpec::Tcp(6000), &SocketSpec::Tcp(7000), true)
        .await
        .unwrap();
    let err = host
        .forward(&device, &SocketSpec::Tcp(6000), &SocketSpec::Tcp(7001), false)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::FailResponse { .. }));
}

#[tokio::test]
async fn test_kill_missing_forward_fails() {
    let server = server_with_devices(&["emulator-5554"]);
    let err = host(&server)
        .kill_forward(
            &DeviceSelector::from_serial_number("emulator-5554"),
            &SocketSpec::Tcp(1234),
        )
        .await
        .unwrap_err();
    assert!(err.to_string().contains("listener 'tcp:1234' not found"));
}
