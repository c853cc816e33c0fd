//! Shell v2 packet framing: `{id: u8}{length: u32 LE}{payload}`

use std::time::Duration;

use adblib_core::prelude::*;

use crate::channel::utils::{read_exactly, write_exactly};
use crate::channel::{AdbInputChannel, AdbOutputChannel};

pub const PACKET_HEADER_LENGTH: usize = 5;

/// Largest payload accepted from the device
pub const MAX_PACKET_PAYLOAD: usize = 1024 * 1024;

/// Shell v2 packet identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ShellV2PacketKind {
    Stdin = 0,
    Stdout = 1,
    Stderr = 2,
    /// Payload is a single exit code byte
    Exit = 3,
    CloseStdin = 4,
    WindowSizeChange = 5,
}

impl ShellV2PacketKind {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(ShellV2PacketKind::Stdin),
            1 => Some(ShellV2PacketKind::Stdout),
            2 => Some(ShellV2PacketKind::Stderr),
            3 => Some(ShellV2PacketKind::Exit),
            4 => Some(ShellV2PacketKind::CloseStdin),
            5 => Some(ShellV2PacketKind::WindowSizeChange),
            _ => None,
        }
    }
}

/// Encode a full packet
pub fn encode_packet(kind: ShellV2PacketKind, payload: &[u8]) -> Vec<u8> {
    let mut packet = Vec::with_capacity(PACKET_HEADER_LENGTH + payload.len());
    packet.push(kind as u8);
    packet.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    packet.extend_from_slice(payload);
    packet
}

pub async fn write_packet<C>(
    channel: &mut C,
    kind: ShellV2PacketKind,
    payload: &[u8],
    timeout: Duration,
) -> Result<()>
where
    C: AdbOutputChannel + ?Sized,
{
    write_exactly(channel, &encode_packet(kind, payload), timeout).await
}

/// Reads packets, reassembling payloads split across channel reads
///
/// The payload buffer is reused between packets.
pub struct ShellV2PacketReader {
    payload: Vec<u8>,
}

impl Default for ShellV2PacketReader {
    fn default() -> Self {
        Self::new()
    }
}

impl ShellV2PacketReader {
    pub fn new() -> Self {
        Self {
            payload: Vec::new(),
        }
    }

    /// Read the next packet. `Ok(None)` is a clean EOF between packets.
    ///
    /// `timeout` applies to each underlying read, so it acts as an
    /// inactivity window rather than a bound on the whole packet.
    pub async fn next_packet<C>(
        &mut self,
        channel: &mut C,
        timeout: Duration,
    ) -> Result<Option<(ShellV2PacketKind, &[u8])>>
    where
        C: AdbInputChannel + ?Sized,
    {
        let mut header = [0u8; PACKET_HEADER_LENGTH];
        let first = channel.read(&mut header, timeout).await?;
        if first == 0 {
            return Ok(None);
        }
        if first < header.len() {
            read_exactly(channel, &mut header[first..], timeout).await?;
        }

        let kind = ShellV2PacketKind::from_u8(header[0]).ok_or_else(|| {
            Error::protocol(format!("Unknown shell v2 packet id {}", header[0]))
        })?;
        let length = u32::from_le_bytes([header[1], header[2], header[3], header[4]]) as usize;
        if length > MAX_PACKET_PAYLOAD {
            return Err(Error::protocol(format!(
                "Shell v2 packet of {} bytes exceeds the {} byte limit",
                length, MAX_PACKET_PAYLOAD
            )));
        }

        self.payload.resize(length, 0);
        read_exactly(channel, &mut self.payload[..], timeout).await?;
        Ok(Some((kind, &self.payload[..])))
    }
}
