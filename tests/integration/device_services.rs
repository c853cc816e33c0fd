//! Device service integration tests
//!
//! Transport switching, reverse forwarding and JDWP tracking.

use std::sync::Arc;
use std::time::Duration;

use adblib::client::test_utils::{FakeAdbServer, FakeDevice};
use adblib::client::AdbDeviceServices;
use adblib::core::ShellCommandOutput;
use adblib::{DeviceSelector, Error, SocketSpec};
use futures_util::StreamExt;

use crate::{server_with_devices, WAIT};

fn device_services(server: &FakeAdbServer) -> AdbDeviceServices {
    AdbDeviceServices::new(Arc::new(server.clone()), Duration::from_secs(5))
}

// ─────────────────────────────────────────────────────────
// Transport
// ─────────────────────────────────────────────────────────

#[tokio::test]
async fn test_tracking_selector_learns_transport_id() {
    let server = server_with_devices(&["R58M123"]);
    let id = server.add_device(FakeDevice::new("emulator-5554"));
    let services = device_services(&server);

    let selector = DeviceSelector::local().with_transport_id_tracking();
    assert_eq!(selector.transport_id(), None);
    let text = services.shell_as_text(&selector, "echo hi").await.unwrap();
    assert_eq!(text, "hi\n");
    assert_eq!(selector.transport_id(), Some(id));

    // Plain selectors leave nothing behind
    let plain = DeviceSelector::local();
    services.shell_as_text(&plain, "echo hi").await.unwrap();
    assert_eq!(plain.transport_id(), None);
}

#[tokio::test]
async fn test_offline_device_rejects_transport() {
    let server = FakeAdbServer::new();
    server.add_device(FakeDevice::new("emulator-5554").with_state("offline"));

    let err = device_services(&server)
        .shell_as_text(&DeviceSelector::from_serial_number("emulator-5554"), "echo hi")
        .await
        .unwrap_err();
    match err {
        Error::FailResponse { message } => assert_eq!(message, "device offline"),
        other => panic!("Expected FailResponse, got {:?}", other),
    }
}

#[tokio::test]
async fn test_unsupported_service_fails() {
    let server = server_with_devices(&["emulator-5554"]);
    let err = device_services(&server)
        .abb_exec(
            &DeviceSelector::from_serial_number("emulator-5554"),
            &["package", "list"],
            adblib::client::TextShellCollector::new(),
            Default::default(),
        )
        .single()
        .await
        .unwrap_err();
    assert!(matches!(err, Error::FailResponse { .. }));
}

#[tokio::test]
async fn test_shell_v2_as_text_separates_streams() {
    let server = server_with_devices(&["emulator-5554"]);
    let output = device_services(&server)
        .shell_v2_as_text(
            &DeviceSelector::from_serial_number("emulator-5554"),
            "echo out; echo err >&2; exit 3",
        )
        .await
        .unwrap();
    assert_eq!(
        output,
        ShellCommandOutput {
            stdout: "out\n".to_string(),
            stderr: "err\n".to_string(),
            exit_code: 3,
        }
    );
}

// ─────────────────────────────────────────────────────────
// Reverse Forwarding
// ─────────────────────────────────────────────────────────

#[tokio::test]
async fn test_reverse_forward_list_and_kill() {
    let server = server_with_devices(&["emulator-5554"]);
    let services = device_services(&server);
    let device = DeviceSelector::from_serial_number("emulator-5554");

    let port = services
        .reverse_forward(&device, &SocketSpec::Tcp(8081), &SocketSpec::Tcp(8081), true)
        .await
        .unwrap();
    assert_eq!(port, None);
    let allocated = services
        .reverse_forward(&device, &SocketSpec::Tcp(0), &SocketSpec::Tcp(9000), true)
        .await
        .unwrap();
    assert!(allocated.is_some());

    let list = services.reverse_list_forward(&device).await.unwrap();
    assert_eq!(list.len(), 2);
    assert_eq!(list.entries()[0].remote, SocketSpec::Tcp(8081));
    assert_eq!(list.entries()[1].local, SocketSpec::Tcp(9000));

    services
        .reverse_kill_forward(&device, &SocketSpec::Tcp(8081))
        .await
        .unwrap();
    assert_eq!(services.reverse_list_forward(&device).await.unwrap().len(), 1);

    services.reverse_kill_forward_all(&device).await.unwrap();
    assert!(services.reverse_list_forward(&device).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_reverse_kill_missing_rule_fails() {
    let server = server_with_devices(&["emulator-5554"]);
    let err = device_services(&server)
        .reverse_kill_forward(
            &DeviceSelector::from_serial_number("emulator-5554"),
            &SocketSpec::Tcp(1),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, Error::FailResponse { .. }));
}

// ─────────────────────────────────────────────────────────
// JDWP
// ─────────────────────────────────────────────────────────

#[tokio::test]
async fn test_track_jdwp_reports_changes() {
    let server = server_with_devices(&["emulator-5554"]);
    server.set_jdwp_pids("emulator-5554", &[1201, 1377]);
    let services = device_services(&server);

    let mut updates = services
        .track_jdwp(&DeviceSelector::from_serial_number("emulator-5554"))
        .await
        .unwrap()
        .into_stream()
        .boxed();

    let first = tokio::time::timeout(WAIT, updates.next()).await.unwrap();
    assert_eq!(first.unwrap().unwrap().entries(), &[1201, 1377]);

    server.set_jdwp_pids("emulator-5554", &[1201, 1377, 2048]);
    let second = tokio::time::timeout(WAIT, updates.next()).await.unwrap();
    assert_eq!(second.unwrap().unwrap().entries(), &[1201, 1377, 2048]);

    // The device going away ends the stream
    server.remove_device("emulator-5554");
    let end = tokio::time::timeout(WAIT, updates.next()).await.unwrap();
    assert!(end.is_none());
}
