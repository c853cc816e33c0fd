//! Channels with scripted timing for shell and timeout tests

use std::collections::VecDeque;
use std::time::Duration;

use futures_util::future::BoxFuture;
use tokio::sync::{mpsc, oneshot};

use adblib_core::prelude::*;

use crate::channel::{
    with_deadline, AdbChannel, AdbInputChannel, AdbOutputChannel, ByteBufferOutputChannel,
    Closeable, SplitChannel,
};
use crate::provider::AdbChannelProvider;

/// Status replies to the transport switch and to the device request
pub const DEVICE_REQUEST_ACCEPTED: &[u8] = b"OKAYOKAY";

// ---------------------------------------------------------------------------
// Gated input
// ---------------------------------------------------------------------------

/// Input channel returning `first`, then blocking until its [`Gate`] opens,
/// then returning `rest` followed by EOF
pub struct GatedInputChannel {
    first: Option<Vec<u8>>,
    gate: Option<oneshot::Receiver<()>>,
    rest: VecDeque<u8>,
    closed: bool,
}

/// Opens a [`GatedInputChannel`]. Dropping it opens the gate as well.
pub struct Gate(oneshot::Sender<()>);

impl Gate {
    pub fn open(self) {
        let _ = self.0.send(());
    }
}

impl GatedInputChannel {
    pub fn new(first: &[u8], rest: &[u8]) -> (Self, Gate) {
        let (tx, rx) = oneshot::channel();
        let channel = Self {
            first: Some(first.to_vec()),
            gate: Some(rx),
            rest: rest.iter().copied().collect(),
            closed: false,
        };
        (channel, Gate(tx))
    }
}

impl Closeable for GatedInputChannel {
    fn close(&mut self) {
        self.closed = true;
    }
}

impl AdbInputChannel for GatedInputChannel {
    fn read<'a>(
        &'a mut self,
        buf: &'a mut [u8],
        timeout: Duration,
    ) -> BoxFuture<'a, Result<usize>> {
        Box::pin(async move {
            if self.closed {
                return Err(Error::ChannelClosed);
            }
            if let Some(first) = self.first.take() {
                let count = buf.len().min(first.len());
                buf[..count].copy_from_slice(&first[..count]);
                if count < first.len() {
                    self.first = Some(first[count..].to_vec());
                }
                return Ok(count);
            }
            if let Some(gate) = self.gate.as_mut() {
                with_deadline("gated read", timeout, async {
                    let _ = gate.await;
                    Ok(())
                })
                .await?;
                self.gate = None;
            }
            let count = buf.len().min(self.rest.len());
            for (slot, byte) in buf.iter_mut().zip(self.rest.drain(..count)) {
                *slot = byte;
            }
            Ok(count)
        })
    }
}

// ---------------------------------------------------------------------------
// Stepped input
// ---------------------------------------------------------------------------

/// Input channel releasing one chunk per [`StepSignal::release`], then EOF
/// once every chunk was read. Dropping the signal releases everything left.
pub struct SteppedInputChannel {
    chunks: VecDeque<Vec<u8>>,
    released: Vec<u8>,
    signals: mpsc::UnboundedReceiver<()>,
    closed: bool,
}

/// Releases the chunks of a [`SteppedInputChannel`]
pub struct StepSignal(mpsc::UnboundedSender<()>);

impl StepSignal {
    pub fn release(&self) {
        let _ = self.0.send(());
    }
}

impl SteppedInputChannel {
    pub fn new<I, B>(chunks: I) -> (Self, StepSignal)
    where
        I: IntoIterator<Item = B>,
        B: Into<Vec<u8>>,
    {
        let (tx, rx) = mpsc::unbounded_channel();
        let channel = Self {
            chunks: chunks.into_iter().map(Into::into).collect(),
            released: Vec::new(),
            signals: rx,
            closed: false,
        };
        (channel, StepSignal(tx))
    }
}

impl Closeable for SteppedInputChannel {
    fn close(&mut self) {
        self.closed = true;
    }
}

impl AdbInputChannel for SteppedInputChannel {
    fn read<'a>(
        &'a mut self,
        buf: &'a mut [u8],
        timeout: Duration,
    ) -> BoxFuture<'a, Result<usize>> {
        Box::pin(async move {
            if self.closed {
                return Err(Error::ChannelClosed);
            }
            if self.released.is_empty() {
                if self.chunks.is_empty() {
                    return Ok(0);
                }
                let signals = &mut self.signals;
                with_deadline("stepped read", timeout, async {
                    let _ = signals.recv().await;
                    Ok(())
                })
                .await?;
                self.released = self.chunks.pop_front().unwrap_or_default();
            }
            let count = buf.len().min(self.released.len());
            buf[..count].copy_from_slice(&self.released[..count]);
            self.released.drain(..count);
            Ok(count)
        })
    }
}

// ---------------------------------------------------------------------------
// Failing input
// ---------------------------------------------------------------------------

/// Input channel returning `first`, then failing every later read with an
/// I/O error
pub struct FailingInputChannel {
    first: Option<Vec<u8>>,
    message: String,
}

impl FailingInputChannel {
    pub fn new(first: &[u8], message: &str) -> Self {
        Self {
            first: Some(first.to_vec()),
            message: message.to_string(),
        }
    }
}

impl Closeable for FailingInputChannel {
    fn close(&mut self) {}
}

impl AdbInputChannel for FailingInputChannel {
    fn read<'a>(
        &'a mut self,
        buf: &'a mut [u8],
        _timeout: Duration,
    ) -> BoxFuture<'a, Result<usize>> {
        Box::pin(async move {
            match self.first.take() {
                Some(mut first) => {
                    let count = buf.len().min(first.len());
                    buf[..count].copy_from_slice(&first[..count]);
                    first.drain(..count);
                    if !first.is_empty() {
                        self.first = Some(first);
                    }
                    Ok(count)
                }
                None => Err(Error::Io(std::io::Error::other(self.message.clone()))),
            }
        })
    }
}

// ---------------------------------------------------------------------------
// Scripted duplex channel
// ---------------------------------------------------------------------------

/// One scripted read: wait `delay`, then deliver `bytes`
#[derive(Debug, Clone)]
pub struct ScriptStep {
    pub delay: Duration,
    pub bytes: Vec<u8>,
}

impl ScriptStep {
    pub fn new(delay: Duration, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            delay,
            bytes: bytes.into(),
        }
    }
}

/// Input side of a [`ScriptedChannel`]
///
/// Each step's delay runs under the read's deadline, so a long delay surfaces
/// as [`Error::Timeout`]. A step larger than the read buffer is delivered
/// across several reads without repeating its delay.
pub struct ScriptedInputChannel {
    steps: VecDeque<ScriptStep>,
    closed: bool,
}

impl ScriptedInputChannel {
    pub fn new(steps: Vec<ScriptStep>) -> Self {
        Self {
            steps: steps.into(),
            closed: false,
        }
    }
}

impl Closeable for ScriptedInputChannel {
    fn close(&mut self) {
        self.closed = true;
    }
}

impl AdbInputChannel for ScriptedInputChannel {
    fn read<'a>(
        &'a mut self,
        buf: &'a mut [u8],
        timeout: Duration,
    ) -> BoxFuture<'a, Result<usize>> {
        Box::pin(async move {
            if self.closed {
                return Err(Error::ChannelClosed);
            }
            let Some(step) = self.steps.front_mut() else {
                return Ok(0);
            };
            if !step.delay.is_zero() {
                let delay = step.delay;
                let result = with_deadline("scripted read", timeout, async {
                    tokio::time::sleep(delay).await;
                    Ok(())
                })
                .await;
                if let Err(err) = result {
                    self.closed = true;
                    return Err(err);
                }
                step.delay = Duration::ZERO;
            }
            let count = buf.len().min(step.bytes.len());
            buf[..count].copy_from_slice(&step.bytes[..count]);
            step.bytes.drain(..count);
            if step.bytes.is_empty() {
                self.steps.pop_front();
            }
            Ok(count)
        })
    }
}

/// Duplex channel replaying a fixed script; writes are accepted and kept
pub struct ScriptedChannel {
    input: ScriptedInputChannel,
    output: ByteBufferOutputChannel,
}

impl ScriptedChannel {
    pub fn new(steps: Vec<ScriptStep>) -> Self {
        Self {
            input: ScriptedInputChannel::new(steps),
            output: ByteBufferOutputChannel::new(),
        }
    }

    /// Script preceded by the two `OKAY`s of a device request
    pub fn device_request(steps: Vec<ScriptStep>) -> Self {
        let mut all = vec![ScriptStep::new(Duration::ZERO, DEVICE_REQUEST_ACCEPTED)];
        all.extend(steps);
        Self::new(all)
    }
}

impl Closeable for ScriptedChannel {
    fn close(&mut self) {
        self.input.close();
        self.output.close();
    }
}

impl AdbInputChannel for ScriptedChannel {
    fn read<'a>(
        &'a mut self,
        buf: &'a mut [u8],
        timeout: Duration,
    ) -> BoxFuture<'a, Result<usize>> {
        self.input.read(buf, timeout)
    }
}

impl AdbOutputChannel for ScriptedChannel {
    fn write<'a>(&'a mut self, buf: &'a [u8], timeout: Duration) -> BoxFuture<'a, Result<usize>> {
        self.output.write(buf, timeout)
    }

    fn shutdown(&mut self, timeout: Duration) -> BoxFuture<'_, Result<()>> {
        self.output.shutdown(timeout)
    }
}

impl AdbChannel for ScriptedChannel {
    fn split(self: Box<Self>) -> SplitChannel {
        let this = *self;
        (Box::new(this.input), Box::new(this.output))
    }
}

/// Provider handing out a fresh [`ScriptedChannel::device_request`] replay of
/// the same script for every connection
pub struct ScriptedChannelProvider {
    steps: Vec<ScriptStep>,
}

impl ScriptedChannelProvider {
    pub fn new(steps: Vec<ScriptStep>) -> Self {
        Self { steps }
    }

    /// `count` steps of `line` each, spaced `interval` apart; lines are
    /// `a\n`, `b\n`, ...
    pub fn lines_every(interval: Duration, count: usize) -> Self {
        let steps = (0..count)
            .map(|i| {
                let letter = (b'a' + (i % 26) as u8) as char;
                ScriptStep::new(interval, format!("{}\n", letter))
            })
            .collect();
        Self::new(steps)
    }

    pub fn then(mut self, step: ScriptStep) -> Self {
        self.steps.push(step);
        self
    }
}

impl AdbChannelProvider for ScriptedChannelProvider {
    fn create_channel(&self, _timeout: Duration) -> BoxFuture<'_, Result<Box<dyn AdbChannel>>> {
        let channel = ScriptedChannel::device_request(self.steps.clone());
        Box::pin(async move { Ok(Box::new(channel) as Box<dyn AdbChannel>) })
    }
}
