//! Shell execution pipeline
//!
//! A shell connection is split into its read and write halves. Forwarding
//! stdin to the device and collecting output run concurrently inside one
//! task, so a device that only produces output after consuming its input
//! (`cat`) cannot deadlock the pipeline. Collected elements flow to the
//! caller through a bounded [`ShellStream`]; dropping the stream cancels the
//! task and closes the connection.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use futures_util::Stream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use adblib_core::prelude::*;

use crate::channel::utils::{write_exactly, DEFAULT_CHUNK_SIZE};
use crate::channel::{with_deadline, AdbChannel, AdbInputChannel, AdbOutputChannel, INFINITE_DURATION};
use crate::protocol::shell_v2::{write_packet, ShellV2PacketKind, ShellV2PacketReader};

use super::collectors::{ShellCollector, ShellSink, ShellV2Collector};

/// Elements buffered between the pipeline task and the consumer
const OUTPUT_QUEUE_CAPACITY: usize = 16;

/// Settings of one shell invocation
pub struct ShellOptions {
    /// Forwarded to the device's stdin, then closed
    pub stdin: Option<Box<dyn AdbInputChannel>>,
    /// Bound on the whole operation, including opening the connection
    pub command_timeout: Duration,
    /// Longest silence tolerated between two reads of output
    pub command_output_timeout: Duration,
    pub buffer_size: usize,
    /// Half-close the connection once stdin is exhausted (legacy shell only)
    pub shutdown_output: bool,
}

impl Default for ShellOptions {
    fn default() -> Self {
        Self {
            stdin: None,
            command_timeout: INFINITE_DURATION,
            command_output_timeout: INFINITE_DURATION,
            buffer_size: DEFAULT_CHUNK_SIZE,
            shutdown_output: true,
        }
    }
}

impl std::fmt::Debug for ShellOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShellOptions")
            .field("stdin", &self.stdin.is_some())
            .field("command_timeout", &self.command_timeout)
            .field("command_output_timeout", &self.command_output_timeout)
            .field("buffer_size", &self.buffer_size)
            .field("shutdown_output", &self.shutdown_output)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// ShellStream
// ---------------------------------------------------------------------------

/// Single-pass stream of collector output
///
/// Ends after the last element, or after the first `Err`.
pub struct ShellStream<T> {
    rx: mpsc::Receiver<Result<T>>,
    task: JoinHandle<()>,
}

impl<T: Send + 'static> ShellStream<T> {
    pub async fn next(&mut self) -> Option<Result<T>> {
        self.rx.recv().await
    }

    /// Drain the stream, failing on the first error
    pub async fn collect_all(mut self) -> Result<Vec<T>> {
        let mut items = Vec::new();
        while let Some(item) = self.next().await {
            items.push(item?);
        }
        Ok(items)
    }

    /// First element of a collector that emits exactly one (text collectors)
    pub async fn single(mut self) -> Result<T> {
        match self.next().await {
            Some(item) => item,
            None => Err(Error::protocol("Shell command produced no output element")),
        }
    }

    /// Stop the pipeline and close the connection
    pub fn cancel(&self) {
        self.task.abort();
    }
}

impl<T> Stream for ShellStream<T> {
    type Item = Result<T>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

impl<T> Drop for ShellStream<T> {
    fn drop(&mut self) {
        self.task.abort();
    }
}

// ---------------------------------------------------------------------------
// Entry points
// ---------------------------------------------------------------------------

/// Run a legacy shell (`shell:`/`exec:`) over the channel `connect` yields
pub fn run_shell<C, F>(connect: F, collector: C, options: ShellOptions) -> ShellStream<C::Output>
where
    C: ShellCollector,
    F: Future<Output = Result<Box<dyn AdbChannel>>> + Send + 'static,
{
    spawn_pipeline(options.command_timeout, move |tx| async move {
        let channel = connect.await?;
        legacy_pipeline(channel, collector, options, &tx).await
    })
}

/// Run a shell v2 (`shell,v2,raw:`/`abb:`) over the channel `connect` yields
pub fn run_shell_v2<C, F>(connect: F, collector: C, options: ShellOptions) -> ShellStream<C::Output>
where
    C: ShellV2Collector,
    F: Future<Output = Result<Box<dyn AdbChannel>>> + Send + 'static,
{
    spawn_pipeline(options.command_timeout, move |tx| async move {
        let channel = connect.await?;
        v2_pipeline(channel, collector, options, &tx).await
    })
}

fn spawn_pipeline<T, B, Fut>(command_timeout: Duration, body: B) -> ShellStream<T>
where
    T: Send + 'static,
    B: FnOnce(mpsc::Sender<Result<T>>) -> Fut,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    let (tx, rx) = mpsc::channel(OUTPUT_QUEUE_CAPACITY);
    let error_tx = tx.clone();
    let pipeline = body(tx);
    let task = tokio::spawn(async move {
        if let Err(err) = with_deadline("shell command", command_timeout, pipeline).await {
            debug!("Shell command failed: {}", err);
            let _ = error_tx.send(Err(err)).await;
        }
    });
    ShellStream { rx, task }
}

/// Hand buffered elements to the consumer; false once it went away
async fn flush<T>(sink: &mut ShellSink<T>, tx: &mpsc::Sender<Result<T>>) -> bool {
    for item in sink.drain() {
        if tx.send(Ok(item)).await.is_err() {
            return false;
        }
    }
    true
}

// ---------------------------------------------------------------------------
// Pipelines
// ---------------------------------------------------------------------------

/// Why stdin forwarding stopped before the device read all of it
enum ForwardError {
    /// The caller's stdin channel failed
    Source(Error),
    /// Writing to the device failed
    Device(Error),
}

type ForwardResult = std::result::Result<(), ForwardError>;

/// Drive collection and stdin forwarding together until collection ends
///
/// A failed write to the device does not end the command: the device may
/// have exited without reading its input. A failed stdin source is reported
/// once collection ends, unless collection failed first.
async fn finish<C, F>(collect: C, forward: F) -> Result<()>
where
    C: Future<Output = Result<()>>,
    F: Future<Output = ForwardResult>,
{
    tokio::pin!(collect);
    tokio::pin!(forward);
    tokio::select! {
        biased;
        result = &mut collect => result,
        Err(err) = &mut forward => match err {
            ForwardError::Device(err) => {
                debug!("Writing shell stdin to the device failed: {}", err);
                collect.await
            }
            ForwardError::Source(err) => {
                debug!("Reading shell stdin failed: {}", err);
                collect.await?;
                Err(err)
            }
        },
    }
}

/// Copy `stdin` to the device, raw or wrapped in shell v2 STDIN packets
async fn pump_stdin(
    stdin: &mut dyn AdbInputChannel,
    output: &mut dyn AdbOutputChannel,
    buffer_size: usize,
    framed: bool,
) -> ForwardResult {
    let mut buf = vec![0u8; buffer_size];
    let mut total = 0u64;
    loop {
        let count = stdin
            .read(&mut buf, INFINITE_DURATION)
            .await
            .map_err(ForwardError::Source)?;
        if count == 0 {
            break;
        }
        let written = if framed {
            write_packet(&mut *output, ShellV2PacketKind::Stdin, &buf[..count], INFINITE_DURATION).await
        } else {
            write_exactly(&mut *output, &buf[..count], INFINITE_DURATION).await
        };
        written.map_err(ForwardError::Device)?;
        total += count as u64;
    }
    trace!("Forwarded {} bytes of stdin", total);
    Ok(())
}

async fn legacy_pipeline<C: ShellCollector>(
    channel: Box<dyn AdbChannel>,
    mut collector: C,
    options: ShellOptions,
    tx: &mpsc::Sender<Result<C::Output>>,
) -> Result<()> {
    let ShellOptions {
        stdin,
        command_output_timeout,
        buffer_size,
        shutdown_output,
        ..
    } = options;
    let buffer_size = buffer_size.max(1);
    let (mut input, mut output) = channel.split();

    let collect = async {
        let mut sink = ShellSink::new();
        collector.start(&mut sink)?;
        let mut buf = vec![0u8; buffer_size];
        loop {
            if !flush(&mut sink, tx).await {
                return Ok(());
            }
            let count = input.read(&mut buf, command_output_timeout).await?;
            if count == 0 {
                break;
            }
            collector.collect(&mut sink, &buf[..count])?;
        }
        collector.end(&mut sink)?;
        flush(&mut sink, tx).await;
        Ok::<_, Error>(())
    };

    let forward = async {
        if let Some(mut stdin) = stdin {
            let pumped = pump_stdin(&mut *stdin, &mut *output, buffer_size, false).await;
            stdin.close();
            // A device reading stdin only finishes once it sees EOF
            let failed_source = matches!(pumped, Err(ForwardError::Source(_)));
            if shutdown_output || failed_source {
                let shutdown = output.shutdown(INFINITE_DURATION).await;
                pumped?;
                shutdown.map_err(ForwardError::Device)?;
            } else {
                pumped?;
            }
        }
        std::future::pending::<ForwardResult>().await
    };

    finish(collect, forward).await
}

async fn v2_pipeline<C: ShellV2Collector>(
    channel: Box<dyn AdbChannel>,
    mut collector: C,
    options: ShellOptions,
    tx: &mpsc::Sender<Result<C::Output>>,
) -> Result<()> {
    let ShellOptions {
        stdin,
        command_output_timeout,
        buffer_size,
        ..
    } = options;
    let buffer_size = buffer_size.max(1);
    let (mut input, mut output) = channel.split();

    let collect = async {
        let mut sink = ShellSink::new();
        let mut reader = ShellV2PacketReader::new();
        collector.start(&mut sink)?;
        let exit_code = loop {
            if !flush(&mut sink, tx).await {
                return Ok(());
            }
            let (kind, payload) = match reader.next_packet(&mut *input, command_output_timeout).await? {
                Some(packet) => packet,
                None => return Err(Error::protocol("Shell v2 stream ended without an exit code")),
            };
            match kind {
                ShellV2PacketKind::Stdout => collector.collect_stdout(&mut sink, payload)?,
                ShellV2PacketKind::Stderr => collector.collect_stderr(&mut sink, payload)?,
                ShellV2PacketKind::Exit => {
                    let code = payload
                        .first()
                        .copied()
                        .ok_or_else(|| Error::protocol("Empty shell v2 exit packet"))?;
                    break i32::from(code);
                }
                other => trace!("Ignoring shell v2 packet {:?}", other),
            }
        };
        collector.end(&mut sink, exit_code)?;
        flush(&mut sink, tx).await;
        Ok::<_, Error>(())
    };

    let forward = async {
        let mut pumped = Ok(());
        if let Some(mut stdin) = stdin {
            pumped = pump_stdin(&mut *stdin, &mut *output, buffer_size, true).await;
            stdin.close();
        }
        // Sent even after a failed source so the device sees the end of its input
        let closed =
            write_packet(&mut *output, ShellV2PacketKind::CloseStdin, &[], INFINITE_DURATION).await;
        pumped?;
        closed.map_err(ForwardError::Device)?;
        std::future::pending::<ForwardResult>().await
    };

    finish(collect, forward).await
}
