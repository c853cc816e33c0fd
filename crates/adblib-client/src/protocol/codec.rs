//! Host request/response framing
//!
//! Requests are `{4 hex digits length}{command}`. Replies start with a 4 byte
//! status, `OKAY` or `FAIL`; a `FAIL` is followed by a length-prefixed reason.

use std::time::Duration;

use adblib_core::prelude::*;

use crate::channel::utils::{read_exactly, read_remaining, write_exactly};
use crate::channel::{AdbInputChannel, AdbOutputChannel, ResizableBuffer};

pub const OKAY: &[u8; 4] = b"OKAY";
pub const FAIL: &[u8; 4] = b"FAIL";

/// Largest payload a 4 hex digit length can describe
pub const MAX_PAYLOAD_LENGTH: usize = 0xFFFF;

/// Encode a 4 hex digit length prefix
pub fn encode_length(length: usize) -> Result<[u8; 4]> {
    if length > MAX_PAYLOAD_LENGTH {
        return Err(Error::protocol(format!(
            "Payload of {} bytes exceeds the maximum of {}",
            length, MAX_PAYLOAD_LENGTH
        )));
    }
    let hex = format!("{:04x}", length);
    let mut prefix = [0u8; 4];
    prefix.copy_from_slice(hex.as_bytes());
    Ok(prefix)
}

/// Decode a 4 hex digit length prefix
pub fn decode_length(prefix: &[u8; 4]) -> Result<usize> {
    let text = std::str::from_utf8(prefix)
        .map_err(|_| Error::protocol(format!("Invalid length prefix {:?}", prefix)))?;
    usize::from_str_radix(text, 16)
        .map_err(|_| Error::protocol(format!("Invalid length prefix {:?}", text)))
}

/// Encode a host request: length prefix followed by the command
pub fn encode_request(command: &str) -> Result<Vec<u8>> {
    let mut request = Vec::with_capacity(command.len() + 4);
    request.extend_from_slice(&encode_length(command.len())?);
    request.extend_from_slice(command.as_bytes());
    Ok(request)
}

/// Encode a length-prefixed payload (used for informational replies)
pub fn encode_payload(payload: &[u8]) -> Result<Vec<u8>> {
    let mut bytes = Vec::with_capacity(payload.len() + 4);
    bytes.extend_from_slice(&encode_length(payload.len())?);
    bytes.extend_from_slice(payload);
    Ok(bytes)
}

pub async fn write_request<C>(channel: &mut C, command: &str, timeout: Duration) -> Result<()>
where
    C: AdbOutputChannel + ?Sized,
{
    trace!("Sending request {:?}", command);
    let request = encode_request(command)?;
    write_exactly(channel, &request, timeout).await
}

/// Read the `OKAY`/`FAIL` status, turning `FAIL` into [`Error::FailResponse`]
pub async fn read_status<C>(channel: &mut C, timeout: Duration) -> Result<()>
where
    C: AdbInputChannel + ?Sized,
{
    let mut status = [0u8; 4];
    read_exactly(channel, &mut status, timeout).await?;
    match &status {
        OKAY => Ok(()),
        FAIL => {
            let reason = read_length_prefixed_string(channel, timeout).await?;
            Err(Error::fail_response(reason))
        }
        other => Err(Error::protocol(format!(
            "Unexpected response status {:?}",
            String::from_utf8_lossy(other)
        ))),
    }
}

/// Read `{4 hex digits length}{payload}`
pub async fn read_length_prefixed<C>(channel: &mut C, timeout: Duration) -> Result<Vec<u8>>
where
    C: AdbInputChannel + ?Sized,
{
    let mut prefix = [0u8; 4];
    read_exactly(channel, &mut prefix, timeout).await?;
    let length = decode_length(&prefix)?;
    let mut payload = vec![0u8; length];
    read_exactly(channel, &mut payload, timeout).await?;
    Ok(payload)
}

pub async fn read_length_prefixed_string<C>(channel: &mut C, timeout: Duration) -> Result<String>
where
    C: AdbInputChannel + ?Sized,
{
    let payload = read_length_prefixed(channel, timeout).await?;
    Ok(String::from_utf8_lossy(&payload).into_owned())
}

/// Like [`read_length_prefixed`], but a clean EOF before the prefix yields `None`
pub async fn read_next_length_prefixed<C>(
    channel: &mut C,
    timeout: Duration,
) -> Result<Option<Vec<u8>>>
where
    C: AdbInputChannel + ?Sized,
{
    let mut prefix = [0u8; 4];
    let first = channel.read(&mut prefix, timeout).await?;
    if first == 0 {
        return Ok(None);
    }
    if first < prefix.len() {
        read_exactly(channel, &mut prefix[first..], timeout).await?;
    }
    let length = decode_length(&prefix)?;
    let mut payload = vec![0u8; length];
    read_exactly(channel, &mut payload, timeout).await?;
    Ok(Some(payload))
}

/// Read an optional length-prefixed string that may be omitted entirely
pub async fn read_optional_length_prefixed_string<C>(
    channel: &mut C,
    timeout: Duration,
) -> Result<Option<String>>
where
    C: AdbInputChannel + ?Sized,
{
    let mut buffer = ResizableBuffer::new();
    read_remaining(channel, &mut buffer, 256, timeout).await?;
    let bytes = buffer.as_slice();
    if bytes.is_empty() {
        return Ok(None);
    }
    if bytes.len() < 4 {
        return Err(Error::protocol(format!(
            "Truncated length prefix {:?}",
            String::from_utf8_lossy(bytes)
        )));
    }
    let mut prefix = [0u8; 4];
    prefix.copy_from_slice(&bytes[..4]);
    let length = decode_length(&prefix)?;
    let payload = bytes
        .get(4..4 + length)
        .ok_or_else(|| Error::protocol("Truncated length-prefixed payload"))?;
    Ok(Some(String::from_utf8_lossy(payload).into_owned()))
}
