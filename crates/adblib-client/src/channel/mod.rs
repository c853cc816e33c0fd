//! Byte channels with per-operation deadlines.
//!
//! Every read and write takes a timeout. When the deadline elapses the
//! operation fails with [`Error::Timeout`] and the channel closes itself. A
//! read or write whose future is dropped before completion leaves the channel
//! poisoned: the next operation closes it and fails with
//! [`Error::ChannelClosed`]. Half-read connections are never resumed.
//!
//! The traits are object safe; connections travel as `Box<dyn AdbChannel>`.

pub mod buffer;
pub mod memory;
pub mod slice;
pub mod stream;
pub mod utils;

use std::future::Future;
use std::time::Duration;

use futures_util::future::BoxFuture;

use adblib_core::prelude::*;

pub use buffer::ResizableBuffer;
pub use memory::{ByteBufferInputChannel, ByteBufferOutputChannel};
pub use slice::AdbInputChannelSlice;
pub use stream::AdbStreamChannel;

/// Timeout value that disables the deadline
pub const INFINITE_DURATION: Duration = Duration::MAX;

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

/// Shared close contract of input and output channels
pub trait Closeable: Send {
    /// Release the channel. Idempotent; later reads and writes fail with
    /// [`Error::ChannelClosed`].
    fn close(&mut self);
}

pub trait AdbInputChannel: Closeable {
    /// Read into `buf`, returning the number of bytes read. `Ok(0)` is EOF.
    fn read<'a>(&'a mut self, buf: &'a mut [u8], timeout: Duration)
        -> BoxFuture<'a, Result<usize>>;
}

pub trait AdbOutputChannel: Closeable {
    /// Write some of `buf`, returning the number of bytes written
    fn write<'a>(&'a mut self, buf: &'a [u8], timeout: Duration) -> BoxFuture<'a, Result<usize>>;

    /// Half-close: flush and signal EOF to the peer while reads stay open
    fn shutdown(&mut self, timeout: Duration) -> BoxFuture<'_, Result<()>>;
}

/// Independently owned read and write halves of an [`AdbChannel`]
pub type SplitChannel = (Box<dyn AdbInputChannel>, Box<dyn AdbOutputChannel>);

/// A duplex connection
pub trait AdbChannel: AdbInputChannel + AdbOutputChannel {
    fn split(self: Box<Self>) -> SplitChannel;
}

// ---------------------------------------------------------------------------
// Forwarding impls
// ---------------------------------------------------------------------------

impl<T: Closeable + ?Sized> Closeable for &mut T {
    fn close(&mut self) {
        (**self).close()
    }
}

impl<T: Closeable + ?Sized> Closeable for Box<T> {
    fn close(&mut self) {
        (**self).close()
    }
}

impl<T: AdbInputChannel + ?Sized> AdbInputChannel for &mut T {
    fn read<'a>(
        &'a mut self,
        buf: &'a mut [u8],
        timeout: Duration,
    ) -> BoxFuture<'a, Result<usize>> {
        (**self).read(buf, timeout)
    }
}

impl<T: AdbInputChannel + ?Sized> AdbInputChannel for Box<T> {
    fn read<'a>(
        &'a mut self,
        buf: &'a mut [u8],
        timeout: Duration,
    ) -> BoxFuture<'a, Result<usize>> {
        (**self).read(buf, timeout)
    }
}

impl<T: AdbOutputChannel + ?Sized> AdbOutputChannel for &mut T {
    fn write<'a>(&'a mut self, buf: &'a [u8], timeout: Duration) -> BoxFuture<'a, Result<usize>> {
        (**self).write(buf, timeout)
    }

    fn shutdown(&mut self, timeout: Duration) -> BoxFuture<'_, Result<()>> {
        (**self).shutdown(timeout)
    }
}

impl<T: AdbOutputChannel + ?Sized> AdbOutputChannel for Box<T> {
    fn write<'a>(&'a mut self, buf: &'a [u8], timeout: Duration) -> BoxFuture<'a, Result<usize>> {
        (**self).write(buf, timeout)
    }

    fn shutdown(&mut self, timeout: Duration) -> BoxFuture<'_, Result<()>> {
        (**self).shutdown(timeout)
    }
}

// ---------------------------------------------------------------------------
// Deadlines
// ---------------------------------------------------------------------------

/// Await `fut`, failing with [`Error::Timeout`] once `timeout` elapses
pub async fn with_deadline<F, T>(operation: &str, timeout: Duration, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    if timeout == INFINITE_DURATION {
        return fut.await;
    }
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => Err(Error::timeout_after(operation, timeout)),
    }
}
