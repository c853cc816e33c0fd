//! Length-limited view of an input channel

use std::time::Duration;

use futures_util::future::BoxFuture;

use adblib_core::prelude::*;

use super::{AdbInputChannel, Closeable};

/// Reads at most `length` bytes from the wrapped channel, then reports EOF
/// even if the wrapped channel has more data. Closing the slice leaves the
/// wrapped channel open.
pub struct AdbInputChannelSlice<C> {
    inner: C,
    remaining: u64,
    closed: bool,
}

impl<C: AdbInputChannel> AdbInputChannelSlice<C> {
    pub fn new(inner: C, length: u64) -> Self {
        Self {
            inner,
            remaining: length,
            closed: false,
        }
    }

    pub fn remaining(&self) -> u64 {
        self.remaining
    }

    pub fn into_inner(self) -> C {
        self.inner
    }
}

impl<C: AdbInputChannel> Closeable for AdbInputChannelSlice<C> {
    fn close(&mut self) {
        self.closed = true;
    }
}

impl<C: AdbInputChannel> AdbInputChannel for AdbInputChannelSlice<C> {
    fn read<'a>(
        &'a mut self,
        buf: &'a mut [u8],
        timeout: Duration,
    ) -> BoxFuture<'a, Result<usize>> {
        Box::pin(async move {
            if self.closed {
                return Err(Error::ChannelClosed);
            }
            if self.remaining == 0 || buf.is_empty() {
                return Ok(0);
            }
            let limit = (buf.len() as u64).min(self.remaining) as usize;
            let count = self.inner.read(&mut buf[..limit], timeout).await?;
            self.remaining -= count as u64;
            Ok(count)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{ByteBufferInputChannel, INFINITE_DURATION};

    async fn read_all_with_pattern<C: AdbInputChannel>(channel: &mut C, sizes: &[usize]) -> Vec<u8> {
        let mut result = Vec::new();
        let mut index = 0;
        loop {
            let mut buf = vec![0u8; sizes[index % sizes.len()]];
            index += 1;
            let n = channel.read(&mut buf, INFINITE_DURATION).await.unwrap();
            if n == 0 {
                return result;
            }
            result.extend_from_slice(&buf[..n]);
        }
    }

    #[tokio::test]
    async fn test_slice_returns_exactly_n_bytes_for_any_read_pattern() {
        let data: Vec<u8> = (0..200u32).map(|i| i as u8).collect();
        for limit in [0usize, 1, 7, 100, 200] {
            for sizes in [vec![1], vec![3, 5], vec![64], vec![1000]] {
                let input = ByteBufferInputChannel::new(data.clone());
                let mut slice = AdbInputChannelSlice::new(input, limit as u64);

                let bytes = read_all_with_pattern(&mut slice, &sizes).await;
                assert_eq!(bytes, data[..limit], "limit {} sizes {:?}", limit, sizes);
            }
        }
    }

    #[tokio::test]
    async fn test_slice_leaves_rest_of_inner_channel() {
        let input = ByteBufferInputChannel::new(b"headerBODY".to_vec());
        let mut slice = AdbInputChannelSlice::new(input, 6);
        let header = read_all_with_pattern(&mut slice, &[4]).await;
        assert_eq!(header, b"header");

        let inner = slice.into_inner();
        assert_eq!(inner.remaining(), 4);
    }

    #[tokio::test]
    async fn test_slice_rejects_reads_after_close() {
        let input = ByteBufferInputChannel::new(b"abc".to_vec());
        let mut slice = AdbInputChannelSlice::new(input, 3);
        slice.close();

        let mut buf = [0u8; 2];
        assert!(matches!(
            slice.read(&mut buf, INFINITE_DURATION).await,
            Err(Error::ChannelClosed)
        ));
    }
}
