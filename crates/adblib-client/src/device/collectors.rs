//! Shell output collectors
//!
//! A collector turns raw shell output into typed elements. It is driven by
//! the shell pipeline: `start`, then one `collect*` call per chunk as it
//! arrives, then `end`. Elements pushed to the [`ShellSink`] are delivered to
//! the caller's [`ShellStream`](super::shell::ShellStream) in order.

use adblib_core::prelude::*;
use adblib_core::{ShellCommandOutput, ShellCommandOutputElement};

/// Receives the elements produced by a collector
#[derive(Debug)]
pub struct ShellSink<T> {
    items: Vec<T>,
}

impl<T> Default for ShellSink<T> {
    fn default() -> Self {
        Self { items: Vec::new() }
    }
}

impl<T> ShellSink<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn emit(&mut self, item: T) {
        self.items.push(item);
    }

    pub(crate) fn drain(&mut self) -> std::vec::Drain<'_, T> {
        self.items.drain(..)
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Collector for the legacy shell protocol (one undifferentiated byte stream)
pub trait ShellCollector: Send + 'static {
    type Output: Send + 'static;

    fn start(&mut self, _sink: &mut ShellSink<Self::Output>) -> Result<()> {
        Ok(())
    }

    fn collect(&mut self, sink: &mut ShellSink<Self::Output>, chunk: &[u8]) -> Result<()>;

    fn end(&mut self, sink: &mut ShellSink<Self::Output>) -> Result<()>;
}

/// Collector for shell v2 (separate stdout/stderr, exit code)
pub trait ShellV2Collector: Send + 'static {
    type Output: Send + 'static;

    fn start(&mut self, _sink: &mut ShellSink<Self::Output>) -> Result<()> {
        Ok(())
    }

    fn collect_stdout(&mut self, sink: &mut ShellSink<Self::Output>, chunk: &[u8]) -> Result<()>;

    fn collect_stderr(&mut self, sink: &mut ShellSink<Self::Output>, chunk: &[u8]) -> Result<()>;

    fn end(&mut self, sink: &mut ShellSink<Self::Output>, exit_code: i32) -> Result<()>;
}

// ---------------------------------------------------------------------------
// Line splitting
// ---------------------------------------------------------------------------

/// Splits a byte stream into `\n`-terminated lines across chunk boundaries
#[derive(Debug, Default)]
pub struct LineSplitter {
    pending: Vec<u8>,
}

impl LineSplitter {
    /// Feed a chunk, returning every line it completes
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        let mut lines = Vec::new();
        let mut rest = chunk;
        while let Some(pos) = rest.iter().position(|b| *b == b'\n') {
            self.pending.extend_from_slice(&rest[..pos]);
            lines.push(Self::decode(&self.pending));
            self.pending.clear();
            rest = &rest[pos + 1..];
        }
        self.pending.extend_from_slice(rest);
        lines
    }

    /// Unterminated last line, if any
    pub fn finish(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        let line = Self::decode(&self.pending);
        self.pending.clear();
        Some(line)
    }

    fn decode(bytes: &[u8]) -> String {
        let bytes = bytes.strip_suffix(b"\r").unwrap_or(bytes);
        String::from_utf8_lossy(bytes).into_owned()
    }
}

// ---------------------------------------------------------------------------
// Legacy shell collectors
// ---------------------------------------------------------------------------

/// Collects the whole output as one string
#[derive(Debug, Default)]
pub struct TextShellCollector {
    bytes: Vec<u8>,
}

impl TextShellCollector {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ShellCollector for TextShellCollector {
    type Output = String;

    fn collect(&mut self, _sink: &mut ShellSink<String>, chunk: &[u8]) -> Result<()> {
        self.bytes.extend_from_slice(chunk);
        Ok(())
    }

    fn end(&mut self, sink: &mut ShellSink<String>) -> Result<()> {
        sink.emit(String::from_utf8_lossy(&self.bytes).into_owned());
        Ok(())
    }
}

/// Emits each output line as it completes
#[derive(Debug, Default)]
pub struct LineShellCollector {
    lines: LineSplitter,
}

impl LineShellCollector {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ShellCollector for LineShellCollector {
    type Output = String;

    fn collect(&mut self, sink: &mut ShellSink<String>, chunk: &[u8]) -> Result<()> {
        for line in self.lines.push(chunk) {
            sink.emit(line);
        }
        Ok(())
    }

    fn end(&mut self, sink: &mut ShellSink<String>) -> Result<()> {
        if let Some(line) = self.lines.finish() {
            sink.emit(line);
        }
        Ok(())
    }
}

/// Emits raw chunks unchanged
#[derive(Debug, Default)]
pub struct RawShellCollector;

impl ShellCollector for RawShellCollector {
    type Output = Vec<u8>;

    fn collect(&mut self, sink: &mut ShellSink<Vec<u8>>, chunk: &[u8]) -> Result<()> {
        sink.emit(chunk.to_vec());
        Ok(())
    }

    fn end(&mut self, _sink: &mut ShellSink<Vec<u8>>) -> Result<()> {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Shell v2 collectors
// ---------------------------------------------------------------------------

/// Collects stdout, stderr and the exit code into one [`ShellCommandOutput`]
#[derive(Debug, Default)]
pub struct TextShellV2Collector {
    stdout: Vec<u8>,
    stderr: Vec<u8>,
}

impl TextShellV2Collector {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ShellV2Collector for TextShellV2Collector {
    type Output = ShellCommandOutput;

    fn collect_stdout(&mut self, _sink: &mut ShellSink<Self::Output>, chunk: &[u8]) -> Result<()> {
        self.stdout.extend_from_slice(chunk);
        Ok(())
    }

    fn collect_stderr(&mut self, _sink: &mut ShellSink<Self::Output>, chunk: &[u8]) -> Result<()> {
        self.stderr.extend_from_slice(chunk);
        Ok(())
    }

    fn end(&mut self, sink: &mut ShellSink<Self::Output>, exit_code: i32) -> Result<()> {
        sink.emit(ShellCommandOutput {
            stdout: String::from_utf8_lossy(&self.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&self.stderr).into_owned(),
            exit_code,
        });
        Ok(())
    }
}

/// Emits stdout/stderr lines as they complete, then the exit code
#[derive(Debug, Default)]
pub struct LineShellV2Collector {
    stdout: LineSplitter,
    stderr: LineSplitter,
}

impl LineShellV2Collector {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ShellV2Collector for LineShellV2Collector {
    type Output = ShellCommandOutputElement;

    fn collect_stdout(&mut self, sink: &mut ShellSink<Self::Output>, chunk: &[u8]) -> Result<()> {
        for line in self.stdout.push(chunk) {
            sink.emit(ShellCommandOutputElement::StdoutLine(line));
        }
        Ok(())
    }

    fn collect_stderr(&mut self, sink: &mut ShellSink<Self::Output>, chunk: &[u8]) -> Result<()> {
        for line in self.stderr.push(chunk) {
            sink.emit(ShellCommandOutputElement::StderrLine(line));
        }
        Ok(())
    }

    fn end(&mut self, sink: &mut ShellSink<Self::Output>, exit_code: i32) -> Result<()> {
        if let Some(line) = self.stdout.finish() {
            sink.emit(ShellCommandOutputElement::StdoutLine(line));
        }
        if let Some(line) = self.stderr.finish() {
            sink.emit(ShellCommandOutputElement::StderrLine(line));
        }
        sink.emit(ShellCommandOutputElement::ExitCode(exit_code));
        Ok(())
    }
}

/// Runs a shell v2 collector over legacy shell output: everything is stdout
/// and the exit code is reported as 0
pub struct LegacyShellV2Adapter<C> {
    inner: C,
}

impl<C: ShellV2Collector> LegacyShellV2Adapter<C> {
    pub fn new(inner: C) -> Self {
        Self { inner }
    }
}

impl<C: ShellV2Collector> ShellCollector for LegacyShellV2Adapter<C> {
    type Output = C::Output;

    fn start(&mut self, sink: &mut ShellSink<Self::Output>) -> Result<()> {
        self.inner.start(sink)
    }

    fn collect(&mut self, sink: &mut ShellSink<Self::Output>, chunk: &[u8]) -> Result<()> {
        self.inner.collect_stdout(sink, chunk)
    }

    fn end(&mut self, sink: &mut ShellSink<Self::Output>) -> Result<()> {
        self.inner.end(sink, 0)
    }
}
