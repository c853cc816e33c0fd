//! Shell integration tests
//!
//! Protocol selection, stdin forwarding, collectors and timeouts.

use std::sync::Arc;
use std::time::Duration;

use adblib::client::test_utils::{
    test_session, FailingInputChannel, FakeDevice, GatedInputChannel, ScriptStep,
    ScriptedChannelProvider, SteppedInputChannel,
};
use adblib::client::{
    AdbDeviceServices, ByteBufferInputChannel, LineShellCollector, LineShellV2Collector,
    ShellOptions, ShellProtocol, TextShellCollector, TextShellV2Collector,
};
use adblib::core::ShellCommandOutputElement;
use adblib::DeviceSelector;
use futures_util::StreamExt;

use crate::{connected_session, server_with_devices, wait_for_device, WAIT};

const SERIAL: &str = "emulator-5554";

fn device() -> DeviceSelector {
    DeviceSelector::from_serial_number(SERIAL)
}

// ─────────────────────────────────────────────────────────
// Protocol Selection
// ─────────────────────────────────────────────────────────

#[tokio::test]
async fn test_shell_v2_selected_when_supported() {
    let (_server, session, _device) = connected_session(SERIAL).await;

    let command = session.shell_command(&device(), "echo hi");
    assert_eq!(command.select_protocol().await.unwrap(), ShellProtocol::ShellV2);

    let disabled = session.shell_command(&device(), "echo hi").allow_shell_v2(false);
    assert_eq!(disabled.select_protocol().await.unwrap(), ShellProtocol::Shell);

    let exec = session
        .shell_command(&device(), "echo hi")
        .allow_shell_v2(false)
        .allow_legacy_exec(true);
    assert_eq!(exec.select_protocol().await.unwrap(), ShellProtocol::Exec);
}

#[tokio::test]
async fn test_legacy_fallback_reports_exit_code_zero() {
    let server = server_with_devices(&[]);
    server.add_device(FakeDevice::new(SERIAL).with_features(&["cmd"]));
    let session = test_session(&server);
    wait_for_device(&session, SERIAL).await;

    let command = session.shell_command(&device(), "echo out; echo err >&2; exit 5");
    assert_eq!(command.select_protocol().await.unwrap(), ShellProtocol::Shell);

    let elements = command
        .execute(LineShellV2Collector::new())
        .await
        .unwrap()
        .collect_all()
        .await
        .unwrap();
    assert_eq!(
        elements,
        vec![
            ShellCommandOutputElement::StdoutLine("out".to_string()),
            ShellCommandOutputElement::StdoutLine("err".to_string()),
            ShellCommandOutputElement::ExitCode(0),
        ]
    );
}

#[tokio::test]
async fn test_no_allowed_protocol_fails() {
    let server = server_with_devices(&[]);
    server.add_device(FakeDevice::new(SERIAL).with_features(&[]));
    let session = test_session(&server);
    wait_for_device(&session, SERIAL).await;

    let result = session
        .shell_command(&device(), "echo hi")
        .allow_legacy_shell(false)
        .select_protocol()
        .await;
    assert!(result.is_err());
}

#[tokio::test]
async fn test_device_features_are_cached_while_connected() {
    let (server, session, _device) = connected_session(SERIAL).await;

    session
        .shell_command(&device(), "echo hi")
        .select_protocol()
        .await
        .unwrap();
    let after_first = server.channels_created();
    session
        .shell_command(&device(), "echo hi")
        .select_protocol()
        .await
        .unwrap();
    assert_eq!(server.channels_created(), after_first);
}

// ─────────────────────────────────────────────────────────
// Output and Stdin
// ─────────────────────────────────────────────────────────

#[tokio::test]
async fn test_shell_v2_line_elements() {
    let (_server, session, _device) = connected_session(SERIAL).await;

    let mut stream = session
        .shell_command(&device(), "echo one; echo two >&2; exit 1")
        .execute(LineShellV2Collector::new())
        .await
        .unwrap();

    let mut elements = Vec::new();
    while let Some(element) = stream.next().await {
        elements.push(element.unwrap());
    }
    assert_eq!(
        elements,
        vec![
            ShellCommandOutputElement::StdoutLine("one".to_string()),
            ShellCommandOutputElement::StderrLine("two".to_string()),
            ShellCommandOutputElement::ExitCode(1),
        ]
    );
}

#[tokio::test]
async fn test_unknown_command_exit_code() {
    let (_server, session, _device) = connected_session(SERIAL).await;

    let output = session
        .shell_command(&device(), "frobnicate --now")
        .execute(TextShellV2Collector::new())
        .await
        .unwrap()
        .single()
        .await
        .unwrap();
    assert_eq!(output.exit_code, 127);
    assert!(output.stderr.contains("frobnicate: not found"));
    assert!(output.stdout.is_empty());
}

#[tokio::test]
async fn test_cat_waits_for_gated_stdin() {
    let (_server, session, _device) = connected_session(SERIAL).await;
    let (stdin, gate) = GatedInputChannel::new(b"hello ", b"world");

    let mut stream = session
        .shell_command(&device(), "cat")
        .with_stdin(Box::new(stdin))
        .execute(LineShellV2Collector::new())
        .await
        .unwrap();

    // Nothing completes while the gate is closed
    let pending = tokio::time::timeout(Duration::from_millis(100), stream.next()).await;
    assert!(pending.is_err());

    gate.open();
    let elements = stream.collect_all().await.unwrap();
    assert_eq!(
        elements,
        vec![
            ShellCommandOutputElement::StdoutLine("hello world".to_string()),
            ShellCommandOutputElement::ExitCode(0),
        ]
    );
}

#[tokio::test]
async fn test_cat_echoes_each_chunk_before_the_next_is_released() {
    let (_server, session, _device) = connected_session(SERIAL).await;
    let chunks = ["line 1\n", "line 2\n", "line 3\n"];
    let (stdin, signal) = SteppedInputChannel::new(chunks);

    let mut stream = session
        .shell_command(&device(), "cat")
        .with_stdin(Box::new(stdin))
        .execute(LineShellV2Collector::new())
        .await
        .unwrap();

    for chunk in chunks {
        // Nothing arrives until the device has the next chunk
        let early = tokio::time::timeout(Duration::from_millis(50), stream.next()).await;
        assert!(early.is_err());

        signal.release();
        let element = tokio::time::timeout(WAIT, stream.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(
            element,
            ShellCommandOutputElement::StdoutLine(chunk.trim_end().to_string())
        );
    }

    let rest = tokio::time::timeout(WAIT, stream.collect_all())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(rest, vec![ShellCommandOutputElement::ExitCode(0)]);
}

#[tokio::test]
async fn test_failing_stdin_ends_shell_v2_command_with_error() {
    let (_server, session, _device) = connected_session(SERIAL).await;

    let stream = session
        .shell_command(&device(), "cat")
        .with_stdin(Box::new(FailingInputChannel::new(b"hello\n", "disk gone")))
        .execute(TextShellV2Collector::new())
        .await
        .unwrap();
    let err = tokio::time::timeout(WAIT, stream.collect_all())
        .await
        .expect("command should not hang")
        .unwrap_err();
    assert!(err.to_string().contains("disk gone"));
}

#[tokio::test]
async fn test_failing_stdin_ends_legacy_command_with_error() {
    let (_server, session, _device) = connected_session(SERIAL).await;
    let options = ShellOptions {
        stdin: Some(Box::new(FailingInputChannel::new(b"hello\n", "disk gone"))),
        ..Default::default()
    };

    let stream = session
        .device_services()
        .unwrap()
        .shell(&device(), "cat", TextShellCollector::new(), options);
    let err = tokio::time::timeout(WAIT, stream.collect_all())
        .await
        .expect("command should not hang")
        .unwrap_err();
    assert!(err.to_string().contains("disk gone"));

    // The session stays usable
    let text = session
        .device_services()
        .unwrap()
        .shell_as_text(&device(), "echo ok")
        .await
        .unwrap();
    assert_eq!(text, "ok\n");
}

#[tokio::test]
async fn test_legacy_shell_forwards_stdin_and_shuts_down() {
    let (_server, session, _device) = connected_session(SERIAL).await;
    let options = ShellOptions {
        stdin: Some(Box::new(ByteBufferInputChannel::new(b"line 1\nline 2\n".to_vec()))),
        ..Default::default()
    };

    let lines = session
        .device_services()
        .unwrap()
        .shell(&device(), "cat", LineShellCollector::new(), options)
        .collect_all()
        .await
        .unwrap();
    assert_eq!(lines, vec!["line 1", "line 2"]);
}

#[tokio::test]
async fn test_execute_legacy_uses_text_collector() {
    let (_server, session, _device) = connected_session(SERIAL).await;

    let text = session
        .shell_command(&device(), "echo a; echo b")
        .execute_legacy(TextShellCollector::new())
        .unwrap()
        .single()
        .await
        .unwrap();
    assert_eq!(text, "a\nb\n");
}

#[tokio::test]
async fn test_dropping_stream_cancels_command() {
    let (_server, session, _device) = connected_session(SERIAL).await;
    let (stdin, _gate) = GatedInputChannel::new(b"first\n", b"");

    let mut stream = session
        .shell_command(&device(), "cat")
        .with_stdin(Box::new(stdin))
        .execute(LineShellV2Collector::new())
        .await
        .unwrap();
    let first = tokio::time::timeout(Duration::from_secs(5), stream.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(first, ShellCommandOutputElement::StdoutLine("first".to_string()));
    drop(stream);

    // The session stays usable
    let text = session
        .device_services()
        .unwrap()
        .shell_as_text(&device(), "echo still here")
        .await
        .unwrap();
    assert_eq!(text, "still here\n");
}

// ─────────────────────────────────────────────────────────
// Timeouts
// ─────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_command_timeout() {
    let (_server, session, _device) = connected_session(SERIAL).await;

    let err = session
        .shell_command(&device(), "sleep 10")
        .with_command_timeout(Duration::from_millis(100))
        .execute(TextShellV2Collector::new())
        .await
        .unwrap()
        .single()
        .await
        .unwrap_err();
    assert!(err.is_timeout());
}

fn scripted_services(provider: ScriptedChannelProvider) -> AdbDeviceServices {
    AdbDeviceServices::new(Arc::new(provider), Duration::from_secs(5))
}

#[tokio::test(start_paused = true)]
async fn test_idle_monitoring_allows_steady_output() {
    let services = scripted_services(ScriptedChannelProvider::lines_every(
        Duration::from_millis(10),
        20,
    ));

    let text = services
        .shell_with_idle_monitoring(&device(), "logcat", Duration::from_millis(100))
        .await
        .unwrap();
    assert_eq!(text, "a\nb\nc\nd\ne\nf\ng\nh\ni\nj\nk\nl\nm\nn\no\np\nq\nr\ns\nt\n");
}

#[tokio::test(start_paused = true)]
async fn test_idle_monitoring_times_out_on_stall() {
    let provider = ScriptedChannelProvider::lines_every(Duration::from_millis(10), 5)
        .then(ScriptStep::new(Duration::from_secs(10), "late\n"));
    let services = scripted_services(provider);

    let err = services
        .shell_with_idle_monitoring(&device(), "logcat", Duration::from_millis(100))
        .await
        .unwrap_err();
    assert!(err.is_timeout());
}
