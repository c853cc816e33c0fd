//! Requests sent to a device through the server's transport switch

use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::stream::{self, Stream};

use adblib_core::prelude::*;
use adblib_core::{
    DeviceSelector, ProcessIdList, RemoteFileMode, ReverseSocketList, ShellCommandOutput,
    ShellCommandOutputElement, SocketSpec,
};

use crate::channel::{AdbChannel, AdbInputChannel, AdbOutputChannel, INFINITE_DURATION};
use crate::host::connection::open_device_connection;
use crate::protocol::codec::{
    read_length_prefixed_string, read_next_length_prefixed, read_optional_length_prefixed_string,
    read_status,
};
use crate::protocol::device_list::{parse_process_id_list, parse_reverse_list};
use crate::provider::AdbChannelProvider;

use super::collectors::{
    LineShellCollector, LineShellV2Collector, ShellCollector, ShellV2Collector, TextShellCollector,
    TextShellV2Collector,
};
use super::shell::{run_shell, run_shell_v2, ShellOptions, ShellStream};
use super::sync::{AdbDeviceSyncServices, SyncProgress};

/// Device-level requests
#[derive(Clone)]
pub struct AdbDeviceServices {
    provider: Arc<dyn AdbChannelProvider>,
    timeout: Duration,
}

impl AdbDeviceServices {
    pub fn new(provider: Arc<dyn AdbChannelProvider>, timeout: Duration) -> Self {
        Self { provider, timeout }
    }

    /// Deferred connection, opened once the shell pipeline starts
    fn connect(
        &self,
        device: &DeviceSelector,
        command: String,
    ) -> impl Future<Output = Result<Box<dyn AdbChannel>>> + Send + 'static {
        let provider = Arc::clone(&self.provider);
        let device = device.clone();
        let timeout = self.timeout;
        async move { open_device_connection(&*provider, &device, &command, timeout).await }
    }

    async fn open(&self, device: &DeviceSelector, command: &str) -> Result<Box<dyn AdbChannel>> {
        open_device_connection(&*self.provider, device, command, self.timeout).await
    }

    // -----------------------------------------------------------------------
    // Shell
    // -----------------------------------------------------------------------

    /// `shell:<command>`, legacy protocol (stdout and stderr merged, no exit code)
    pub fn shell<C: ShellCollector>(
        &self,
        device: &DeviceSelector,
        command: &str,
        collector: C,
        options: ShellOptions,
    ) -> ShellStream<C::Output> {
        run_shell(self.connect(device, format!("shell:{}", command)), collector, options)
    }

    /// `exec:<command>`: raw, unbuffered output without a pty
    pub fn exec<C: ShellCollector>(
        &self,
        device: &DeviceSelector,
        command: &str,
        collector: C,
        options: ShellOptions,
    ) -> ShellStream<C::Output> {
        run_shell(self.connect(device, format!("exec:{}", command)), collector, options)
    }

    /// `shell,v2,raw:<command>`, separate stdout/stderr and an exit code
    pub fn shell_v2<C: ShellV2Collector>(
        &self,
        device: &DeviceSelector,
        command: &str,
        collector: C,
        options: ShellOptions,
    ) -> ShellStream<C::Output> {
        run_shell_v2(
            self.connect(device, format!("shell,v2,raw:{}", command)),
            collector,
            options,
        )
    }

    /// `abb_exec:<args>`: Android binder bridge, legacy framing
    pub fn abb_exec<C: ShellCollector>(
        &self,
        device: &DeviceSelector,
        args: &[&str],
        collector: C,
        options: ShellOptions,
    ) -> ShellStream<C::Output> {
        run_shell(
            self.connect(device, format!("abb_exec:{}", args.join("\0"))),
            collector,
            options,
        )
    }

    /// `abb:<args>`: Android binder bridge, shell v2 framing
    pub fn abb<C: ShellV2Collector>(
        &self,
        device: &DeviceSelector,
        args: &[&str],
        collector: C,
        options: ShellOptions,
    ) -> ShellStream<C::Output> {
        run_shell_v2(
            self.connect(device, format!("abb:{}", args.join("\0"))),
            collector,
            options,
        )
    }

    /// Whole output of a legacy shell command
    pub async fn shell_as_text(&self, device: &DeviceSelector, command: &str) -> Result<String> {
        self.shell(device, command, TextShellCollector::new(), ShellOptions::default())
            .single()
            .await
    }

    pub fn shell_as_lines(&self, device: &DeviceSelector, command: &str) -> ShellStream<String> {
        self.shell(device, command, LineShellCollector::new(), ShellOptions::default())
    }

    pub async fn shell_v2_as_text(
        &self,
        device: &DeviceSelector,
        command: &str,
    ) -> Result<ShellCommandOutput> {
        self.shell_v2(device, command, TextShellV2Collector::new(), ShellOptions::default())
            .single()
            .await
    }

    pub fn shell_v2_as_lines(
        &self,
        device: &DeviceSelector,
        command: &str,
    ) -> ShellStream<ShellCommandOutputElement> {
        self.shell_v2(device, command, LineShellV2Collector::new(), ShellOptions::default())
    }

    /// Legacy shell text output, failing with [`Error::Timeout`] once the
    /// command stays silent for `idle_timeout`
    pub async fn shell_with_idle_monitoring(
        &self,
        device: &DeviceSelector,
        command: &str,
        idle_timeout: Duration,
    ) -> Result<String> {
        let options = ShellOptions {
            command_output_timeout: idle_timeout,
            ..Default::default()
        };
        self.shell(device, command, TextShellCollector::new(), options)
            .single()
            .await
    }

    // -----------------------------------------------------------------------
    // Sync
    // -----------------------------------------------------------------------

    /// Open a file transfer session
    pub async fn sync(&self, device: &DeviceSelector) -> Result<AdbDeviceSyncServices> {
        let channel = self.open(device, "sync:").await?;
        Ok(AdbDeviceSyncServices::new(channel, self.timeout))
    }

    /// Upload `source` in a sync session of its own
    #[allow(clippy::too_many_arguments)]
    pub async fn sync_send<S, P>(
        &self,
        device: &DeviceSelector,
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
        let mut sync = self.sync(device).await?;
        sync.send(source, remote_path, mode, remote_time, progress, buffer_size)
            .await?;
        sync.close().await
    }

    /// Download `remote_path` in a sync session of its own
    pub async fn sync_recv<D, P>(
        &self,
        device: &DeviceSelector,
        remote_path: &str,
        destination: &mut D,
        progress: &mut P,
        buffer_size: usize,
    ) -> Result<()>
    where
        D: AdbOutputChannel + ?Sized,
        P: SyncProgress,
    {
        let mut sync = self.sync(device).await?;
        sync.recv(remote_path, destination, progress, buffer_size)
            .await?;
        sync.close().await
    }

    pub async fn sync_send_file<P: SyncProgress>(
        &self,
        device: &DeviceSelector,
        local_path: &Path,
        remote_path: &str,
        progress: &mut P,
        buffer_size: usize,
    ) -> Result<()> {
        let mut sync = self.sync(device).await?;
        sync.send_file(local_path, remote_path, progress, buffer_size)
            .await?;
        sync.close().await
    }

    pub async fn sync_recv_file<P: SyncProgress>(
        &self,
        device: &DeviceSelector,
        remote_path: &str,
        local_path: &Path,
        progress: &mut P,
        buffer_size: usize,
    ) -> Result<()> {
        let mut sync = self.sync(device).await?;
        sync.recv_file(remote_path, local_path, progress, buffer_size)
            .await?;
        sync.close().await
    }

    // -----------------------------------------------------------------------
    // Reverse forwarding
    // -----------------------------------------------------------------------

    /// Forward `remote` on the device to `local` on the host
    ///
    /// Returns the allocated device port when `remote` is `tcp:0`.
    pub async fn reverse_forward(
        &self,
        device: &DeviceSelector,
        remote: &SocketSpec,
        local: &SocketSpec,
        rebind: bool,
    ) -> Result<Option<String>> {
        let norebind = if rebind { "" } else { ":norebind" };
        let command = format!("reverse:forward{}:{};{}", norebind, remote, local);
        let mut channel = self.open(device, &command).await?;
        read_status(&mut *channel, self.timeout).await?;
        read_optional_length_prefixed_string(&mut *channel, self.timeout).await
    }

    pub async fn reverse_kill_forward(
        &self,
        device: &DeviceSelector,
        remote: &SocketSpec,
    ) -> Result<()> {
        let mut channel = self
            .open(device, &format!("reverse:killforward:{}", remote))
            .await?;
        read_status(&mut *channel, self.timeout).await
    }

    pub async fn reverse_kill_forward_all(&self, device: &DeviceSelector) -> Result<()> {
        let mut channel = self.open(device, "reverse:killforward-all").await?;
        read_status(&mut *channel, self.timeout).await
    }

    pub async fn reverse_list_forward(&self, device: &DeviceSelector) -> Result<ReverseSocketList> {
        let mut channel = self.open(device, "reverse:list-forward").await?;
        read_status(&mut *channel, self.timeout).await?;
        let reply = read_length_prefixed_string(&mut *channel, self.timeout).await?;
        Ok(parse_reverse_list(&reply))
    }

    // -----------------------------------------------------------------------
    // JDWP
    // -----------------------------------------------------------------------

    /// Follow the debuggable processes of the device
    pub async fn track_jdwp(&self, device: &DeviceSelector) -> Result<TrackJdwpConnection> {
        let channel = self.open(device, "track-jdwp").await?;
        Ok(TrackJdwpConnection { channel })
    }
}

/// Open `track-jdwp` connection producing the full pid list on every change
pub struct TrackJdwpConnection {
    channel: Box<dyn AdbChannel>,
}

impl TrackJdwpConnection {
    /// Wait for the next update. `Ok(None)` means the device closed the stream.
    pub async fn next(&mut self) -> Result<Option<ProcessIdList>> {
        let payload = read_next_length_prefixed(&mut *self.channel, INFINITE_DURATION).await?;
        Ok(payload.map(|bytes| parse_process_id_list(&String::from_utf8_lossy(&bytes))))
    }

    pub fn into_stream(self) -> impl Stream<Item = Result<ProcessIdList>> + Send {
        stream::unfold(Some(self), |state| async move {
            let mut connection = state?;
            match connection.next().await {
                Ok(Some(list)) => Some((Ok(list), Some(connection))),
                Ok(None) => None,
                Err(err) => Some((Err(err), None)),
            }
        })
    }
}
