//! Operations composed from the raw channel reads and writes

use std::time::Duration;

use adblib_core::prelude::*;

use super::{AdbInputChannel, AdbOutputChannel, ResizableBuffer};

/// Default chunk size for copy loops
pub const DEFAULT_CHUNK_SIZE: usize = 8 * 1024;

/// Fill `buf` completely; EOF before that is a protocol error
pub async fn read_exactly<C>(channel: &mut C, buf: &mut [u8], timeout: Duration) -> Result<()>
where
    C: AdbInputChannel + ?Sized,
{
    let mut filled = 0;
    while filled < buf.len() {
        let count = channel.read(&mut buf[filled..], timeout).await?;
        if count == 0 {
            return Err(Error::protocol(format!(
                "Unexpected end of stream after {} of {} bytes",
                filled,
                buf.len()
            )));
        }
        filled += count;
    }
    Ok(())
}

/// Append everything up to EOF to `buffer`, returning the byte count
pub async fn read_remaining<C>(
    channel: &mut C,
    buffer: &mut ResizableBuffer,
    chunk_size: usize,
    timeout: Duration,
) -> Result<usize>
where
    C: AdbInputChannel + ?Sized,
{
    let chunk_size = chunk_size.max(1);
    let mut total = 0;
    loop {
        buffer.ensure_spare(chunk_size);
        let count = channel
            .read(&mut buffer.spare_mut()[..chunk_size], timeout)
            .await?;
        if count == 0 {
            return Ok(total);
        }
        buffer.advance(count);
        total += count;
    }
}

/// Read and discard everything up to EOF
pub async fn skip_remaining<C>(channel: &mut C, timeout: Duration) -> Result<usize>
where
    C: AdbInputChannel + ?Sized,
{
    let mut buf = vec![0u8; DEFAULT_CHUNK_SIZE];
    let mut total = 0;
    loop {
        let count = channel.read(&mut buf, timeout).await?;
        if count == 0 {
            return Ok(total);
        }
        total += count;
    }
}

/// Write all of `buf`
pub async fn write_exactly<C>(channel: &mut C, buf: &[u8], timeout: Duration) -> Result<()>
where
    C: AdbOutputChannel + ?Sized,
{
    let mut written = 0;
    while written < buf.len() {
        let count = channel.write(&buf[written..], timeout).await?;
        if count == 0 {
            return Err(Error::ChannelClosed);
        }
        written += count;
    }
    Ok(())
}

/// Copy `input` into `output` until EOF, returning the byte count
pub async fn forward_to<I, O>(
    input: &mut I,
    output: &mut O,
    chunk_size: usize,
    timeout: Duration,
) -> Result<u64>
where
    I: AdbInputChannel + ?Sized,
    O: AdbOutputChannel + ?Sized,
{
    let mut buf = vec![0u8; chunk_size.max(1)];
    let mut total = 0u64;
    loop {
        let count = input.read(&mut buf, timeout).await?;
        if count == 0 {
            return Ok(total);
        }
        write_exactly(output, &buf[..count], timeout).await?;
        total += count as u64;
    }
}
