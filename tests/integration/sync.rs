//! File transfer integration tests

use std::sync::Arc;

use chrono::{DateTime, Utc};

use adblib::client::test_utils::{test_config, FakeFile};
use adblib::client::{
    ByteBufferInputChannel, ByteBufferOutputChannel, NoProgress, SyncProgress,
};
use adblib::core::RemoteFileMode;
use adblib::{AdbSession, DeviceSelector, Error, Result};

use crate::{connected_session, server_with_devices, wait_for_device};

const SERIAL: &str = "emulator-5554";

fn device() -> DeviceSelector {
    DeviceSelector::from_serial_number(SERIAL)
}

/// Records every progress callback
#[derive(Default)]
struct RecordingProgress {
    events: Vec<String>,
}

impl SyncProgress for RecordingProgress {
    async fn transfer_started(&mut self, remote_path: &str) -> Result<()> {
        self.events.push(format!("started {}", remote_path));
        Ok(())
    }

    async fn transfer_progress(&mut self, _remote_path: &str, total_bytes: u64) -> Result<()> {
        self.events.push(format!("progress {}", total_bytes));
        Ok(())
    }

    async fn transfer_done(&mut self, _remote_path: &str, total_bytes: u64) -> Result<()> {
        self.events.push(format!("done {}", total_bytes));
        Ok(())
    }
}

fn test_content(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

// ─────────────────────────────────────────────────────────
// Send / Recv / Stat
// ─────────────────────────────────────────────────────────

#[tokio::test]
async fn test_send_recv_and_stat_in_one_session() {
    let (server, session, _device) = connected_session(SERIAL).await;
    let content = test_content(128_000);
    let mtime = DateTime::<Utc>::from_timestamp(1_700_000_000, 0).unwrap();
    let path = "/data/local/tmp/payload.bin";

    let mut sync = session.device_services().unwrap().sync(&device()).await.unwrap();

    let mut progress = RecordingProgress::default();
    let mut source = ByteBufferInputChannel::new(content.clone());
    sync.send(
        &mut source,
        path,
        RemoteFileMode::from_mode_bits(0o644),
        mtime,
        &mut progress,
        1024,
    )
    .await
    .unwrap();

    // 125 DATA packets of 1024 bytes
    assert_eq!(progress.events.first().unwrap(), &format!("started {}", path));
    assert_eq!(progress.events.len(), 1 + 125 + 1);
    assert_eq!(progress.events[1], "progress 1024");
    assert_eq!(progress.events.last().unwrap(), "done 128000");

    let stored = server.file(SERIAL, path).unwrap();
    assert_eq!(stored.bytes, content);
    assert_eq!(stored.mtime, 1_700_000_000);

    let mut destination = ByteBufferOutputChannel::new();
    sync.recv(path, &mut destination, &mut NoProgress, 4096)
        .await
        .unwrap();
    assert_eq!(destination.into_bytes(), content);

    let stat = sync.stat(path).await.unwrap();
    assert!(stat.exists());
    assert_eq!(stat.size, 128_000);
    assert_eq!(stat.mode.permission_bits(), 0o644);
    assert_eq!(stat.last_modified, mtime);

    sync.close().await.unwrap();
}

#[tokio::test]
async fn test_stat_missing_file() {
    let (_server, session, _device) = connected_session(SERIAL).await;
    let mut sync = session.device_services().unwrap().sync(&device()).await.unwrap();

    let stat = sync.stat("/does/not/exist").await.unwrap();
    assert!(!stat.exists());
    assert_eq!(stat.size, 0);
}

#[tokio::test]
async fn test_recv_missing_file_fails() {
    let (_server, session, _device) = connected_session(SERIAL).await;
    let mut sync = session.device_services().unwrap().sync(&device()).await.unwrap();

    let mut destination = ByteBufferOutputChannel::new();
    let err = sync
        .recv("/does/not/exist", &mut destination, &mut NoProgress, 4096)
        .await
        .unwrap_err();
    match err {
        Error::FailResponse { message } => assert_eq!(message, "No such file or directory"),
        other => panic!("Expected FailResponse, got {:?}", other),
    }
}

#[tokio::test]
async fn test_recv_reassembles_large_file() {
    let (server, session, _device) = connected_session(SERIAL).await;
    let content = test_content(200_000);
    server.put_file(
        SERIAL,
        "/sdcard/big.bin",
        FakeFile {
            bytes: content.clone(),
            mode: 0o100600,
            mtime: 0,
        },
    );

    let mut sync = session.device_services().unwrap().sync(&device()).await.unwrap();
    let mut progress = RecordingProgress::default();
    let mut destination = ByteBufferOutputChannel::new();
    sync.recv("/sdcard/big.bin", &mut destination, &mut progress, 64 * 1024)
        .await
        .unwrap();

    assert_eq!(destination.into_bytes(), content);
    assert_eq!(progress.events.last().unwrap(), "done 200000");
}

// ─────────────────────────────────────────────────────────
// Local Files
// ─────────────────────────────────────────────────────────

#[tokio::test]
async fn test_send_file_and_recv_file() {
    let (server, session, _device) = connected_session(SERIAL).await;
    let dir = tempfile::tempdir().unwrap();
    let local = dir.path().join("upload.txt");
    std::fs::write(&local, b"hello from the host\n").unwrap();

    let mut sync = session.device_services().unwrap().sync(&device()).await.unwrap();
    sync.send_file(&local, "/data/local/tmp/upload.txt", &mut NoProgress, 8192)
        .await
        .unwrap();
    assert_eq!(
        server.file(SERIAL, "/data/local/tmp/upload.txt").unwrap().bytes,
        b"hello from the host\n"
    );

    let copy = dir.path().join("copy.txt");
    sync.recv_file("/data/local/tmp/upload.txt", &copy, &mut NoProgress, 8192)
        .await
        .unwrap();
    assert_eq!(std::fs::read(&copy).unwrap(), b"hello from the host\n");
}

// ─────────────────────────────────────────────────────────
// One-shot Helpers
// ─────────────────────────────────────────────────────────

#[tokio::test]
async fn test_one_shot_helpers_open_their_own_session() {
    let (server, session, _device) = connected_session(SERIAL).await;
    let services = session.device_services().unwrap();
    let mtime = DateTime::<Utc>::from_timestamp(1_650_000_000, 0).unwrap();
    let before = server.channels_created();

    let mut source = ByteBufferInputChannel::new(b"one shot".to_vec());
    services
        .sync_send(
            &device(),
            &mut source,
            "/sdcard/one.txt",
            RemoteFileMode::DEFAULT,
            mtime,
            &mut NoProgress,
            4096,
        )
        .await
        .unwrap();

    let mut destination = ByteBufferOutputChannel::new();
    services
        .sync_recv(&device(), "/sdcard/one.txt", &mut destination, &mut NoProgress, 4096)
        .await
        .unwrap();
    assert_eq!(destination.into_bytes(), b"one shot");
    assert_eq!(server.channels_created(), before + 2);

    let dir = tempfile::tempdir().unwrap();
    let local = dir.path().join("one.txt");
    services
        .sync_recv_file(&device(), "/sdcard/one.txt", &local, &mut NoProgress, 4096)
        .await
        .unwrap();
    assert_eq!(std::fs::read(&local).unwrap(), b"one shot");

    services
        .sync_send_file(&device(), &local, "/sdcard/two.txt", &mut NoProgress, 4096)
        .await
        .unwrap();
    assert_eq!(server.file(SERIAL, "/sdcard/two.txt").unwrap().bytes, b"one shot");
}

#[tokio::test]
async fn test_session_push_and_pull_use_configured_buffer_size() {
    let server = server_with_devices(&[SERIAL]);
    let mut config = test_config();
    config.sync_buffer_size = 1_000;
    let session = AdbSession::with_provider(Arc::new(server.clone()), config);
    wait_for_device(&session, SERIAL).await;

    let dir = tempfile::tempdir().unwrap();
    let upload = dir.path().join("upload.bin");
    let content = test_content(5_500);
    std::fs::write(&upload, &content).unwrap();

    session
        .push_file(&device(), &upload, "/sdcard/upload.bin")
        .await
        .unwrap();
    assert_eq!(server.file(SERIAL, "/sdcard/upload.bin").unwrap().bytes, content);
    assert_eq!(server.largest_sync_data_packet(), 1_000);

    let download = dir.path().join("download.bin");
    session
        .pull_file(&device(), "/sdcard/upload.bin", &download)
        .await
        .unwrap();
    assert_eq!(std::fs::read(&download).unwrap(), content);
}
