//! In-memory channels

use std::time::Duration;

use futures_util::future::BoxFuture;

use adblib_core::prelude::*;

use super::{AdbInputChannel, AdbOutputChannel, Closeable, ResizableBuffer};

/// Input channel reading from a byte vector, then EOF
#[derive(Debug, Default)]
pub struct ByteBufferInputChannel {
    data: Vec<u8>,
    position: usize,
    closed: bool,
}

impl ByteBufferInputChannel {
    pub fn new(data: impl Into<Vec<u8>>) -> Self {
        Self {
            data: data.into(),
            position: 0,
            closed: false,
        }
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.position
    }
}

impl Closeable for ByteBufferInputChannel {
    fn close(&mut self) {
        self.closed = true;
    }
}

impl AdbInputChannel for ByteBufferInputChannel {
    fn read<'a>(
        &'a mut self,
        buf: &'a mut [u8],
        _timeout: Duration,
    ) -> BoxFuture<'a, Result<usize>> {
        Box::pin(async move {
            if self.closed {
                return Err(Error::ChannelClosed);
            }
            let count = buf.len().min(self.remaining());
            buf[..count].copy_from_slice(&self.data[self.position..self.position + count]);
            self.position += count;
            Ok(count)
        })
    }
}

/// Output channel appending to a [`ResizableBuffer`]
#[derive(Debug, Default)]
pub struct ByteBufferOutputChannel {
    buffer: ResizableBuffer,
    closed: bool,
}

impl ByteBufferOutputChannel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn buffer(&self) -> &ResizableBuffer {
        &self.buffer
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buffer.into_vec()
    }
}

impl Closeable for ByteBufferOutputChannel {
    fn close(&mut self) {
        self.closed = true;
    }
}

impl AdbOutputChannel for ByteBufferOutputChannel {
    fn write<'a>(&'a mut self, buf: &'a [u8], _timeout: Duration) -> BoxFuture<'a, Result<usize>> {
        Box::pin(async move {
            if self.closed {
                return Err(Error::ChannelClosed);
            }
            self.buffer.append(buf);
            Ok(buf.len())
        })
    }

    fn shutdown(&mut self, _timeout: Duration) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            if self.closed {
                return Err(Error::ChannelClosed);
            }
            Ok(())
        })
    }
}
