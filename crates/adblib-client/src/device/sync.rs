//! File transfer over the `sync:` sub-protocol
//!
//! One [`AdbDeviceSyncServices`] owns one `sync:` connection and may run any
//! number of sequential transfers over it. Taking `&mut self` keeps transfers
//! from overlapping.

use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, Utc};

use adblib_core::prelude::*;
use adblib_core::{FileStat, RemoteFileMode};

use crate::channel::utils::{read_exactly, write_exactly};
use crate::channel::{AdbChannel, AdbInputChannel, AdbOutputChannel, AdbStreamChannel};
use crate::protocol::sync::{
    read_expected_header, write_header, write_request, SyncCommand, SyncHeader, SYNC_DATA_MAX,
    SYNC_HEADER_LENGTH,
};

/// Transfer progress callbacks
///
/// `transfer_progress` is only reported for transfers that move at least one
/// byte. An error returned by a callback aborts the transfer and is returned
/// unchanged.
#[trait_variant::make(SyncProgress: Send)]
pub trait LocalSyncProgress {
    async fn transfer_started(&mut self, remote_path: &str) -> Result<()>;

    async fn transfer_progress(&mut self, remote_path: &str, total_bytes: u64) -> Result<()>;

    async fn transfer_done(&mut self, remote_path: &str, total_bytes: u64) -> Result<()>;
}

/// Progress sink that ignores every event
#[derive(Debug, Default, Clone, Copy)]
pub struct NoProgress;

impl SyncProgress for NoProgress {
    async fn transfer_started(&mut self, _remote_path: &str) -> Result<()> {
        Ok(())
    }

    async fn transfer_progress(&mut self, _remote_path: &str, _total_bytes: u64) -> Result<()> {
        Ok(())
    }

    async fn transfer_done(&mut self, _remote_path: &str, _total_bytes: u64) -> Result<()> {
        Ok(())
    }
}

fn remote_timestamp(time: &DateTime<Utc>) -> Result<u32> {
    u32::try_from(time.timestamp())
        .map_err(|_| Error::protocol(format!("Modification time {} not representable", time)))
}

/// Session on a device `sync:` connection
pub struct AdbDeviceSyncServices {
    channel: Box<dyn AdbChannel>,
    timeout: Duration,
}

impl AdbDeviceSyncServices {
    pub(crate) fn new(channel: Box<dyn AdbChannel>, timeout: Duration) -> Self {
        Self { channel, timeout }
    }

    /// Upload `source` (read to EOF) to `remote_path`
    pub async fn send<S, P>(
        &mut self,
        source: &mut S,
        remote_path: &str,
        mode: RemoteFileMode,
        remote_time: DateTime<Utc>,
        progress: &mut P,
        buffer_size: usize,
    ) -> Result<()>
    where
        S: AdbInputChannel + ?Sized,
        P: SyncProgress,
    {
        let timeout = self.timeout;
        let mtime = remote_timestamp(&remote_time)?;
        let chunk_size = buffer_size.clamp(1, SYNC_DATA_MAX);

        SyncProgress::transfer_started(progress, remote_path).await?;
        let request = format!("{},{}", remote_path, mode.mode_bits());
        write_request(&mut *self.channel, SyncCommand::Send, request.as_bytes(), timeout).await?;

        // Header and payload go out in a single write
        let mut packet = vec![0u8; SYNC_HEADER_LENGTH + chunk_size];
        let mut total = 0u64;
        loop {
            let count = source.read(&mut packet[SYNC_HEADER_LENGTH..], timeout).await?;
            if count == 0 {
                break;
            }
            let header = SyncHeader::new(SyncCommand::Data, count as u32);
            packet[..SYNC_HEADER_LENGTH].copy_from_slice(&header.to_bytes());
            write_exactly(
                &mut *self.channel,
                &packet[..SYNC_HEADER_LENGTH + count],
                timeout,
            )
            .await?;
            total += count as u64;
            SyncProgress::transfer_progress(progress, remote_path, total).await?;
        }

        write_header(
            &mut *self.channel,
            SyncHeader::new(SyncCommand::Done, mtime),
            timeout,
        )
        .await?;
        read_expected_header(&mut *self.channel, &[SyncCommand::Okay], timeout).await?;

        debug!("Sent {} bytes to {}", total, remote_path);
        SyncProgress::transfer_done(progress, remote_path, total).await
    }

    /// Download `remote_path` into `destination`
    pub async fn recv<D, P>(
        &mut self,
        remote_path: &str,
        destination: &mut D,
        progress: &mut P,
        buffer_size: usize,
    ) -> Result<()>
    where
        D: AdbOutputChannel + ?Sized,
        P: SyncProgress,
    {
        let timeout = self.timeout;
        let chunk_size = buffer_size.clamp(1, SYNC_DATA_MAX);

        SyncProgress::transfer_started(progress, remote_path).await?;
        write_request(&mut *self.channel, SyncCommand::Recv, remote_path.as_bytes(), timeout).await?;

        let mut buf = vec![0u8; chunk_size];
        let mut total = 0u64;
        loop {
            let header = read_expected_header(
                &mut *self.channel,
                &[SyncCommand::Data, SyncCommand::Done, SyncCommand::Okay],
                timeout,
            )
            .await?;
            if matches!(header.command, SyncCommand::Done | SyncCommand::Okay) {
                break;
            }

            let mut remaining = header.value as usize;
            if remaining > SYNC_DATA_MAX {
                return Err(Error::protocol(format!(
                    "Sync DATA packet of {} bytes exceeds maximum {}",
                    remaining, SYNC_DATA_MAX
                )));
            }
            while remaining > 0 {
                let count = remaining.min(buf.len());
                read_exactly(&mut *self.channel, &mut buf[..count], timeout).await?;
                write_exactly(destination, &buf[..count], timeout).await?;
                remaining -= count;
            }
            total += u64::from(header.value);
            SyncProgress::transfer_progress(progress, remote_path, total).await?;
        }

        debug!("Received {} bytes from {}", total, remote_path);
        SyncProgress::transfer_done(progress, remote_path, total).await
    }

    /// Mode, size and modification time of `remote_path`
    ///
    /// Paths that do not exist report all-zero fields; see [`FileStat::exists`].
    pub async fn stat(&mut self, remote_path: &str) -> Result<FileStat> {
        let timeout = self.timeout;
        write_request(&mut *self.channel, SyncCommand::Stat, remote_path.as_bytes(), timeout).await?;
        let header = read_expected_header(&mut *self.channel, &[SyncCommand::Stat], timeout).await?;

        let mut rest = [0u8; 8];
        read_exactly(&mut *self.channel, &mut rest, timeout).await?;
        let size = u32::from_le_bytes([rest[0], rest[1], rest[2], rest[3]]);
        let mtime = u32::from_le_bytes([rest[4], rest[5], rest[6], rest[7]]);

        Ok(FileStat {
            mode: RemoteFileMode::from_mode_bits(header.value),
            size: u64::from(size),
            last_modified: DateTime::from_timestamp(i64::from(mtime), 0).unwrap_or_default(),
        })
    }

    /// Upload a local file, keeping its permissions and modification time
    pub async fn send_file<P>(
        &mut self,
        local_path: &Path,
        remote_path: &str,
        progress: &mut P,
        buffer_size: usize,
    ) -> Result<()>
    where
        P: SyncProgress,
    {
        let file = tokio::fs::File::open(local_path).await?;
        let metadata = file.metadata().await?;
        let mode = RemoteFileMode::from_path(local_path)?.unwrap_or(RemoteFileMode::DEFAULT);
        let modified = metadata
            .modified()
            .map(DateTime::<Utc>::from)
            .unwrap_or_else(|_| Utc::now());

        let mut source = AdbStreamChannel::new(file);
        self.send(&mut source, remote_path, mode, modified, progress, buffer_size)
            .await
    }

    /// Download into a local file, replacing it if present
    pub async fn recv_file<P>(
        &mut self,
        remote_path: &str,
        local_path: &Path,
        progress: &mut P,
        buffer_size: usize,
    ) -> Result<()>
    where
        P: SyncProgress,
    {
        let file = tokio::fs::File::create(local_path).await?;
        let mut destination = AdbStreamChannel::new(file);
        self.recv(remote_path, &mut destination, progress, buffer_size)
            .await?;
        destination.shutdown(self.timeout).await
    }

    /// End the session with `QUIT` and close the connection
    pub async fn close(mut self) -> Result<()> {
        let result = write_header(
            &mut *self.channel,
            SyncHeader::new(SyncCommand::Quit, 0),
            self.timeout,
        )
        .await;
        self.channel.close();
        result
    }
}
