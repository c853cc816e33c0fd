//! Opening protocol-level connections to the server and to devices

use std::time::Duration;

use adblib_core::prelude::*;
use adblib_core::DeviceSelector;

use crate::channel::utils::read_exactly;
use crate::channel::AdbChannel;
use crate::protocol::codec::{read_status, write_request};
use crate::provider::AdbChannelProvider;

/// Open a connection and send a host request, leaving the channel positioned
/// right after the `OKAY` status
pub async fn open_host_connection(
    provider: &dyn AdbChannelProvider,
    command: &str,
    timeout: Duration,
) -> Result<Box<dyn AdbChannel>> {
    let mut channel = provider.create_channel(timeout).await?;
    write_request(&mut *channel, command, timeout).await?;
    read_status(&mut *channel, timeout).await?;
    Ok(channel)
}

/// Open a connection, switch it to the device transport, then send a device
/// request
///
/// Tracking selectors receive the transport id the server sends back.
pub async fn open_device_connection(
    provider: &dyn AdbChannelProvider,
    selector: &DeviceSelector,
    command: &str,
    timeout: Duration,
) -> Result<Box<dyn AdbChannel>> {
    let mut channel = provider.create_channel(timeout).await?;
    switch_to_transport(&mut *channel, selector, timeout).await?;
    write_request(&mut *channel, command, timeout).await?;
    read_status(&mut *channel, timeout).await?;
    Ok(channel)
}

async fn switch_to_transport(
    channel: &mut dyn AdbChannel,
    selector: &DeviceSelector,
    timeout: Duration,
) -> Result<()> {
    let prefix = selector.transport_prefix();
    write_request(channel, &prefix, timeout).await?;
    read_status(channel, timeout).await?;

    if selector.expects_transport_id() {
        let mut id = [0u8; 8];
        read_exactly(channel, &mut id, timeout).await?;
        let transport_id = u64::from_le_bytes(id);
        trace!("Selector {} resolved to transport {}", selector, transport_id);
        selector.set_transport_id(transport_id);
    }
    Ok(())
}
