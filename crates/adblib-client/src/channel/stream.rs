//! Channel over any tokio byte stream (TCP sockets, in-memory duplex pipes)

use std::time::Duration;

use futures_util::future::BoxFuture;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};

use adblib_core::prelude::*;

use super::{
    with_deadline, AdbChannel, AdbInputChannel, AdbOutputChannel, Closeable, SplitChannel,
};

/// [`AdbChannel`] implementation wrapping a tokio stream
pub struct AdbStreamChannel<S> {
    stream: Option<S>,
    /// Set while a read/write is running; still set on entry means the
    /// previous future was dropped mid-operation.
    in_flight: bool,
}

impl<S> AdbStreamChannel<S> {
    pub fn new(stream: S) -> Self {
        Self {
            stream: Some(stream),
            in_flight: false,
        }
    }

    fn closed() -> Self {
        Self {
            stream: None,
            in_flight: false,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.stream.is_none()
    }

    fn begin(&mut self) -> Result<&mut S> {
        if self.in_flight {
            debug!("Channel operation was cancelled, closing channel");
            self.stream = None;
            self.in_flight = false;
        }
        let stream = self.stream.as_mut().ok_or(Error::ChannelClosed)?;
        self.in_flight = true;
        Ok(stream)
    }

    fn finish<T>(&mut self, result: Result<T>) -> Result<T> {
        self.in_flight = false;
        if let Err(err) = &result {
            if err.is_timeout() {
                self.stream = None;
            }
        }
        result
    }
}

impl<S: Send> Closeable for AdbStreamChannel<S> {
    fn close(&mut self) {
        self.stream = None;
        self.in_flight = false;
    }
}

impl<S> AdbInputChannel for AdbStreamChannel<S>
where
    S: AsyncRead + Unpin + Send,
{
    fn read<'a>(
        &'a mut self,
        buf: &'a mut [u8],
        timeout: Duration,
    ) -> BoxFuture<'a, Result<usize>> {
        Box::pin(async move {
            let stream = self.begin()?;
            let result = with_deadline("channel read", timeout, async {
                Ok::<_, Error>(stream.read(buf).await?)
            })
            .await;
            self.finish(result)
        })
    }
}

impl<S> AdbOutputChannel for AdbStreamChannel<S>
where
    S: AsyncWrite + Unpin + Send,
{
    fn write<'a>(&'a mut self, buf: &'a [u8], timeout: Duration) -> BoxFuture<'a, Result<usize>> {
        Box::pin(async move {
            let stream = self.begin()?;
            let result = with_deadline("channel write", timeout, async {
                let written = stream.write(buf).await?;
                stream.flush().await?;
                Ok::<_, Error>(written)
            })
            .await;
            self.finish(result)
        })
    }

    fn shutdown(&mut self, timeout: Duration) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let stream = self.begin()?;
            let result = with_deadline("channel shutdown", timeout, async {
                Ok::<_, Error>(stream.shutdown().await?)
            })
            .await;
            self.finish(result)
        })
    }
}

impl<S> AdbChannel for AdbStreamChannel<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    fn split(self: Box<Self>) -> SplitChannel {
        let this = *self;
        match (this.stream, this.in_flight) {
            (Some(stream), false) => {
                let (reader, writer) = tokio::io::split(stream);
                (
                    Box::new(AdbStreamChannel::<ReadHalf<S>>::new(reader)),
                    Box::new(AdbStreamChannel::<WriteHalf<S>>::new(writer)),
                )
            }
            _ => (
                Box::new(AdbStreamChannel::<ReadHalf<S>>::closed()),
                Box::new(AdbStreamChannel::<WriteHalf<S>>::closed()),
            ),
        }
    }
}
