//! Requests answered by the ADB server itself

use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::{self, Stream};

use adblib_core::prelude::*;
use adblib_core::{DeviceList, DeviceSelector, DeviceState, ForwardSocketList, SocketSpec};

use crate::channel::{AdbChannel, INFINITE_DURATION};
use crate::host::connection::open_host_connection;
use crate::protocol::codec::{
    read_length_prefixed_string, read_next_length_prefixed, read_optional_length_prefixed_string,
    read_status,
};
use crate::protocol::device_list::{parse_device_list, parse_forward_list};
use crate::provider::AdbChannelProvider;

/// Feature names reported by `host-features` and `<device>:features`
pub mod features {
    pub const SHELL_V2: &str = "shell_v2";
    pub const CMD: &str = "cmd";
    pub const STAT_V2: &str = "stat_v2";
    pub const ABB: &str = "abb";
    pub const ABB_EXEC: &str = "abb_exec";
    pub const FIXED_PUSH_MKDIR: &str = "fixed_push_mkdir";
    pub const PUSH_SYNC: &str = "push_sync";
    pub const TRACK_APP: &str = "track_app";
}

/// `host:devices` (short) vs `host:devices-l` (long) output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeviceListFormat {
    Short,
    #[default]
    Long,
}

impl DeviceListFormat {
    fn suffix(&self) -> &'static str {
        match self {
            DeviceListFormat::Short => "",
            DeviceListFormat::Long => "-l",
        }
    }
}

/// Host-level requests
#[derive(Clone)]
pub struct AdbHostServices {
    provider: Arc<dyn AdbChannelProvider>,
    timeout: Duration,
}

impl AdbHostServices {
    pub fn new(provider: Arc<dyn AdbChannelProvider>, timeout: Duration) -> Self {
        Self { provider, timeout }
    }

    pub fn provider(&self) -> &Arc<dyn AdbChannelProvider> {
        &self.provider
    }

    async fn open(&self, command: &str) -> Result<Box<dyn AdbChannel>> {
        open_host_connection(&*self.provider, command, self.timeout).await
    }

    /// Send a request whose `OKAY` carries a length-prefixed string
    async fn query_string(&self, command: &str) -> Result<String> {
        let mut channel = self.open(command).await?;
        read_length_prefixed_string(&mut *channel, self.timeout).await
    }

    /// Internal protocol version of the server, e.g. 41
    pub async fn version(&self) -> Result<u32> {
        let reply = self.query_string("host:version").await?;
        u32::from_str_radix(reply.trim(), 16)
            .map_err(|_| Error::protocol(format!("Invalid version reply {:?}", reply)))
    }

    /// Features supported by the server
    pub async fn host_features(&self) -> Result<Vec<String>> {
        let reply = self.query_string("host:host-features").await?;
        Ok(split_features(&reply))
    }

    /// Features supported by both the server and the device
    pub async fn features(&self, device: &DeviceSelector) -> Result<Vec<String>> {
        let reply = self
            .query_string(&format!("{}:features", device.host_prefix()))
            .await?;
        Ok(split_features(&reply))
    }

    pub async fn devices(&self, format: DeviceListFormat) -> Result<DeviceList> {
        let reply = self
            .query_string(&format!("host:devices{}", format.suffix()))
            .await?;
        Ok(parse_device_list(&reply))
    }

    /// Open a `host:track-devices` connection
    pub async fn track_devices(&self, format: DeviceListFormat) -> Result<TrackDevicesConnection> {
        let channel = self
            .open(&format!("host:track-devices{}", format.suffix()))
            .await?;
        Ok(TrackDevicesConnection { channel })
    }

    /// Ask the server to exit
    pub async fn kill(&self) -> Result<()> {
        self.open("host:kill").await?;
        Ok(())
    }

    pub async fn get_state(&self, device: &DeviceSelector) -> Result<DeviceState> {
        let reply = self
            .query_string(&format!("{}:get-state", device.host_prefix()))
            .await?;
        Ok(DeviceState::parse(reply.trim()))
    }

    pub async fn get_serial_no(&self, device: &DeviceSelector) -> Result<String> {
        self.query_string(&format!("{}:get-serialno", device.host_prefix()))
            .await
    }

    pub async fn get_dev_path(&self, device: &DeviceSelector) -> Result<String> {
        self.query_string(&format!("{}:get-devpath", device.host_prefix()))
            .await
    }

    /// Forward `local` on the host to `remote` on the device
    ///
    /// Returns the allocated port when `local` is `tcp:0`.
    pub async fn forward(
        &self,
        device: &DeviceSelector,
        local: &SocketSpec,
        remote: &SocketSpec,
        rebind: bool,
    ) -> Result<Option<String>> {
        let norebind = if rebind { "" } else { ":norebind" };
        let command = format!(
            "{}:forward{}:{};{}",
            device.host_prefix(),
            norebind,
            local,
            remote
        );
        let mut channel = self.open(&command).await?;
        read_status(&mut *channel, self.timeout).await?;
        read_optional_length_prefixed_string(&mut *channel, self.timeout).await
    }

    pub async fn kill_forward(&self, device: &DeviceSelector, local: &SocketSpec) -> Result<()> {
        let command = format!("{}:killforward:{}", device.host_prefix(), local);
        let mut channel = self.open(&command).await?;
        read_status(&mut *channel, self.timeout).await
    }

    pub async fn kill_forward_all(&self, device: &DeviceSelector) -> Result<()> {
        self.open(&format!("{}:killforward-all", device.host_prefix()))
            .await?;
        Ok(())
    }

    /// Forward rules of all devices
    pub async fn list_forward(&self) -> Result<ForwardSocketList> {
        let reply = self.query_string("host:list-forward").await?;
        Ok(parse_forward_list(&reply))
    }
}

fn split_features(reply: &str) -> Vec<String> {
    reply
        .split(',')
        .map(str::trim)
        .filter(|f| !f.is_empty())
        .map(str::to_string)
        .collect()
}

/// Open `host:track-devices` connection producing one device list per update
pub struct TrackDevicesConnection {
    channel: Box<dyn AdbChannel>,
}

impl TrackDevicesConnection {
    /// Wait for the next update. `Ok(None)` means the server closed the stream.
    pub async fn next(&mut self) -> Result<Option<DeviceList>> {
        let payload = read_next_length_prefixed(&mut *self.channel, INFINITE_DURATION).await?;
        Ok(payload.map(|bytes| parse_device_list(&String::from_utf8_lossy(&bytes))))
    }

    pub fn into_stream(self) -> impl Stream<Item = Result<DeviceList>> + Send {
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
