//! Sync protocol framing: `{4 byte ASCII id}{u32 LE length}{payload}`

use std::time::Duration;

use adblib_core::prelude::*;

use crate::channel::utils::{read_exactly, write_exactly};
use crate::channel::{AdbInputChannel, AdbOutputChannel};

/// Largest DATA payload accepted by the device
pub const SYNC_DATA_MAX: usize = 64 * 1024;

pub const SYNC_HEADER_LENGTH: usize = 8;

/// Sync protocol request and response ids
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum SyncCommand {
    Send = 0x444e4553, // "SEND"
    Recv = 0x56434552, // "RECV"
    Stat = 0x54415453, // "STAT"
    Data = 0x41544144, // "DATA"
    Done = 0x454e4f44, // "DONE"
    Okay = 0x59414b4f, // "OKAY"
    Fail = 0x4c494146, // "FAIL"
    Quit = 0x54495551, // "QUIT"
}

impl SyncCommand {
    pub fn from_u32(value: u32) -> Option<Self> {
        match value {
            0x444e4553 => Some(SyncCommand::Send),
            0x56434552 => Some(SyncCommand::Recv),
            0x54415453 => Some(SyncCommand::Stat),
            0x41544144 => Some(SyncCommand::Data),
            0x454e4f44 => Some(SyncCommand::Done),
            0x59414b4f => Some(SyncCommand::Okay),
            0x4c494146 => Some(SyncCommand::Fail),
            0x54495551 => Some(SyncCommand::Quit),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> [u8; 4] {
        (*self as u32).to_le_bytes()
    }
}

/// Id and length (or mtime/mode, depending on the id) of a sync message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncHeader {
    pub command: SyncCommand,
    pub value: u32,
}

impl SyncHeader {
    pub fn new(command: SyncCommand, value: u32) -> Self {
        Self { command, value }
    }

    pub fn to_bytes(&self) -> [u8; SYNC_HEADER_LENGTH] {
        let mut bytes = [0u8; SYNC_HEADER_LENGTH];
        bytes[..4].copy_from_slice(&self.command.as_bytes());
        bytes[4..].copy_from_slice(&self.value.to_le_bytes());
        bytes
    }

    pub fn from_bytes(bytes: &[u8; SYNC_HEADER_LENGTH]) -> Result<Self> {
        let id = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        let command = SyncCommand::from_u32(id).ok_or_else(|| {
            Error::protocol(format!(
                "Unknown sync response {:?}",
                String::from_utf8_lossy(&bytes[..4])
            ))
        })?;
        let value = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
        Ok(Self { command, value })
    }
}

/// Encode a request carrying a payload (`SEND`, `RECV`, `STAT`)
pub fn encode_request(command: SyncCommand, payload: &[u8]) -> Result<Vec<u8>> {
    let length = u32::try_from(payload.len())
        .map_err(|_| Error::protocol("Sync request payload too large"))?;
    let mut bytes = Vec::with_capacity(SYNC_HEADER_LENGTH + payload.len());
    bytes.extend_from_slice(&SyncHeader::new(command, length).to_bytes());
    bytes.extend_from_slice(payload);
    Ok(bytes)
}

pub async fn write_request<C>(
    channel: &mut C,
    command: SyncCommand,
    payload: &[u8],
    timeout: Duration,
) -> Result<()>
where
    C: AdbOutputChannel + ?Sized,
{
    write_exactly(channel, &encode_request(command, payload)?, timeout).await
}

pub async fn write_header<C>(channel: &mut C, header: SyncHeader, timeout: Duration) -> Result<()>
where
    C: AdbOutputChannel + ?Sized,
{
    write_exactly(channel, &header.to_bytes(), timeout).await
}

pub async fn read_header<C>(channel: &mut C, timeout: Duration) -> Result<SyncHeader>
where
    C: AdbInputChannel + ?Sized,
{
    let mut bytes = [0u8; SYNC_HEADER_LENGTH];
    read_exactly(channel, &mut bytes, timeout).await?;
    SyncHeader::from_bytes(&bytes)
}

/// Read the message following a `FAIL` header and turn it into an error
pub async fn read_fail_message<C>(channel: &mut C, length: u32, timeout: Duration) -> Error
where
    C: AdbInputChannel + ?Sized,
{
    let mut message = vec![0u8; length as usize];
    match read_exactly(channel, &mut message, timeout).await {
        Ok(()) => Error::fail_response(String::from_utf8_lossy(&message).into_owned()),
        Err(err) => err,
    }
}

/// Read a header, failing on `FAIL` or on any id other than `expected`
pub async fn read_expected_header<C>(
    channel: &mut C,
    expected: &[SyncCommand],
    timeout: Duration,
) -> Result<SyncHeader>
where
    C: AdbInputChannel + ?Sized,
{
    let header = read_header(channel, timeout).await?;
    if header.command == SyncCommand::Fail {
        return Err(read_fail_message(channel, header.value, timeout).await);
    }
    if !expected.contains(&header.command) {
        return Err(Error::protocol(format!(
            "Unexpected sync response {:?}, expected one of {:?}",
            header.command, expected
        )));
    }
    Ok(header)
}
