//! In-memory ADB server speaking the host, shell, sync, reverse and
//! track-jdwp protocols over `tokio::io::duplex` pipes

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures_util::future::BoxFuture;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, DuplexStream};
use tokio::sync::watch;

use adblib_core::prelude::*;
use adblib_core::DeviceInfo;

use crate::channel::{AdbChannel, AdbStreamChannel};
use crate::protocol::codec::{encode_payload, FAIL, OKAY};
use crate::protocol::device_list::format_device_list;
use crate::protocol::shell_v2::{encode_packet, ShellV2PacketKind, PACKET_HEADER_LENGTH};
use crate::protocol::sync::{SyncCommand, SyncHeader, SYNC_DATA_MAX, SYNC_HEADER_LENGTH};
use crate::provider::AdbChannelProvider;

const PIPE_CAPACITY: usize = 64 * 1024;
const REGULAR_FILE: u32 = 0o100000;

/// A device known to the [`FakeAdbServer`]
#[derive(Debug, Clone)]
pub struct FakeDevice {
    pub serial_number: String,
    pub state: String,
    pub product: Option<String>,
    pub model: Option<String>,
    pub device: Option<String>,
    pub features: Vec<String>,
}

impl FakeDevice {
    /// Online device supporting shell v2
    pub fn new(serial_number: impl Into<String>) -> Self {
        Self {
            serial_number: serial_number.into(),
            state: "device".to_string(),
            product: Some("sdk_phone64".to_string()),
            model: Some("Pixel_7".to_string()),
            device: Some("emu64a".to_string()),
            features: vec![
                "shell_v2".to_string(),
                "cmd".to_string(),
                "stat_v2".to_string(),
            ],
        }
    }

    pub fn with_state(mut self, state: &str) -> Self {
        self.state = state.to_string();
        self
    }

    pub fn with_features(mut self, features: &[&str]) -> Self {
        self.features = features.iter().map(|f| f.to_string()).collect();
        self
    }

    pub fn without_details(mut self) -> Self {
        self.product = None;
        self.model = None;
        self.device = None;
        self
    }
}

/// File stored on a fake device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FakeFile {
    pub bytes: Vec<u8>,
    pub mode: u32,
    pub mtime: u32,
}

struct DeviceEntry {
    device: FakeDevice,
    transport_id: u64,
    files: HashMap<String, FakeFile>,
    /// `(remote, local)` reverse rules
    reverses: Vec<(String, String)>,
    jdwp_pids: Vec<u32>,
}

impl DeviceEntry {
    fn info(&self) -> DeviceInfo {
        let mut info = DeviceInfo::new(&self.device.serial_number, &self.device.state);
        info.product = self.device.product.clone();
        info.model = self.device.model.clone();
        info.device = self.device.device.clone();
        info.with_transport_id(self.transport_id)
    }

    fn is_local(&self) -> bool {
        is_local_serial(&self.device.serial_number)
    }
}

fn is_local_serial(serial: &str) -> bool {
    serial.starts_with("emulator-") || serial.contains(':')
}

struct ForwardRule {
    serial: String,
    local: String,
    remote: String,
}

struct ServerState {
    devices: Vec<DeviceEntry>,
    forwards: Vec<ForwardRule>,
    next_transport_id: u64,
    next_port: u16,
}

struct Inner {
    state: Mutex<ServerState>,
    /// Bumped on every state change; long-lived connections re-render on it
    changes: watch::Sender<u64>,
    running: watch::Sender<bool>,
    channels_created: AtomicUsize,
    /// Largest sync DATA payload received
    largest_sync_data: AtomicUsize,
    version: u32,
    host_features: Vec<String>,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, ServerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn update<R>(&self, f: impl FnOnce(&mut ServerState) -> R) -> R {
        let result = f(&mut self.lock());
        self.changes.send_modify(|version| *version += 1);
        result
    }

    fn is_running(&self) -> bool {
        *self.running.borrow()
    }

    fn device_list(&self, long_format: bool) -> String {
        let state = self.lock();
        let infos: Vec<DeviceInfo> = state.devices.iter().map(DeviceEntry::info).collect();
        format_device_list(&infos, long_format)
    }

    fn jdwp_list(&self, serial: &str) -> Option<String> {
        let state = self.lock();
        let entry = state
            .devices
            .iter()
            .find(|d| d.device.serial_number == serial)?;
        Some(
            entry
                .jdwp_pids
                .iter()
                .map(|pid| format!("{}\n", pid))
                .collect(),
        )
    }

    fn with_device<R>(&self, serial: &str, f: impl FnOnce(&mut DeviceEntry) -> R) -> Option<R> {
        self.update(|state| {
            state
                .devices
                .iter_mut()
                .find(|d| d.device.serial_number == serial)
                .map(f)
        })
    }
}

/// In-memory ADB server implementing [`AdbChannelProvider`]
///
/// Every channel is one side of a duplex pipe whose other side is served by
/// a spawned task, so it must be used inside a tokio runtime.
#[derive(Clone)]
pub struct FakeAdbServer {
    inner: Arc<Inner>,
}

impl Default for FakeAdbServer {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeAdbServer {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(ServerState {
                    devices: Vec::new(),
                    forwards: Vec::new(),
                    next_transport_id: 1,
                    next_port: 40_000,
                }),
                changes: watch::Sender::new(0),
                running: watch::Sender::new(true),
                channels_created: AtomicUsize::new(0),
                largest_sync_data: AtomicUsize::new(0),
                version: 41,
                host_features: vec![
                    "shell_v2".to_string(),
                    "cmd".to_string(),
                    "stat_v2".to_string(),
                    "abb_exec".to_string(),
                    "push_sync".to_string(),
                ],
            }),
        }
    }

    /// Connect a device, returning its transport id
    pub fn add_device(&self, device: FakeDevice) -> u64 {
        self.inner.update(|state| {
            let transport_id = state.next_transport_id;
            state.next_transport_id += 1;
            state.devices.push(DeviceEntry {
                device,
                transport_id,
                files: HashMap::new(),
                reverses: Vec::new(),
                jdwp_pids: Vec::new(),
            });
            transport_id
        })
    }

    pub fn remove_device(&self, serial: &str) {
        self.inner.update(|state| {
            state.devices.retain(|d| d.device.serial_number != serial);
            state.forwards.retain(|f| f.serial != serial);
        });
    }

    pub fn set_device_state(&self, serial: &str, device_state: &str) {
        self.inner
            .with_device(serial, |entry| entry.device.state = device_state.to_string());
    }

    pub fn set_jdwp_pids(&self, serial: &str, pids: &[u32]) {
        self.inner
            .with_device(serial, |entry| entry.jdwp_pids = pids.to_vec());
    }

    pub fn put_file(&self, serial: &str, path: &str, file: FakeFile) {
        self.inner.with_device(serial, |entry| {
            entry.files.insert(path.to_string(), file);
        });
    }

    pub fn file(&self, serial: &str, path: &str) -> Option<FakeFile> {
        let state = self.inner.lock();
        state
            .devices
            .iter()
            .find(|d| d.device.serial_number == serial)
            .and_then(|entry| entry.files.get(path).cloned())
    }

    /// Host forward rules as `(serial, local, remote)`
    pub fn forwards(&self) -> Vec<(String, String, String)> {
        let state = self.inner.lock();
        state
            .forwards
            .iter()
            .map(|f| (f.serial.clone(), f.local.clone(), f.remote.clone()))
            .collect()
    }

    /// Number of connections opened so far
    pub fn channels_created(&self) -> usize {
        self.inner.channels_created.load(Ordering::SeqCst)
    }

    /// Size of the largest DATA packet any sync SEND carried
    pub fn largest_sync_data_packet(&self) -> usize {
        self.inner.largest_sync_data.load(Ordering::SeqCst)
    }

    pub fn is_running(&self) -> bool {
        self.inner.is_running()
    }

    /// Refuse new connections and end every tracking connection
    pub fn stop(&self) {
        self.inner.running.send_replace(false);
    }

    pub fn restart(&self) {
        self.inner.running.send_replace(true);
    }
}

impl AdbChannelProvider for FakeAdbServer {
    fn create_channel(&self, _timeout: Duration) -> BoxFuture<'_, Result<Box<dyn AdbChannel>>> {
        Box::pin(async move {
            if !self.inner.is_running() {
                return Err(Error::Io(std::io::Error::new(
                    std::io::ErrorKind::ConnectionRefused,
                    "fake ADB server is not running",
                )));
            }
            self.inner.channels_created.fetch_add(1, Ordering::SeqCst);
            let (client, server) = tokio::io::duplex(PIPE_CAPACITY);
            let inner = Arc::clone(&self.inner);
            tokio::spawn(async move {
                if let Err(err) = serve(&inner, server).await {
                    trace!("Fake ADB connection ended: {}", err);
                }
            });
            Ok(Box::new(AdbStreamChannel::new(client)) as Box<dyn AdbChannel>)
        })
    }
}

// ---------------------------------------------------------------------------
// Wire helpers
// ---------------------------------------------------------------------------

async fn read_request<S: AsyncRead + Unpin>(stream: &mut S) -> Result<String> {
    let mut prefix = [0u8; 4];
    stream.read_exact(&mut prefix).await?;
    let length = std::str::from_utf8(&prefix)
        .ok()
        .and_then(|text| usize::from_str_radix(text, 16).ok())
        .ok_or_else(|| Error::protocol(format!("Invalid request prefix {:?}", prefix)))?;
    let mut command = vec![0u8; length];
    stream.read_exact(&mut command).await?;
    Ok(String::from_utf8_lossy(&command).into_owned())
}

async fn write_okay<S: AsyncWrite + Unpin>(stream: &mut S) -> Result<()> {
    stream.write_all(OKAY).await?;
    Ok(())
}

async fn write_okay_payload<S: AsyncWrite + Unpin>(stream: &mut S, payload: &str) -> Result<()> {
    let mut reply = OKAY.to_vec();
    reply.extend_from_slice(&encode_payload(payload.as_bytes())?);
    stream.write_all(&reply).await?;
    Ok(())
}

async fn write_fail<S: AsyncWrite + Unpin>(stream: &mut S, message: &str) -> Result<()> {
    let mut reply = FAIL.to_vec();
    reply.extend_from_slice(&encode_payload(message.as_bytes())?);
    stream.write_all(&reply).await?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Host requests
// ---------------------------------------------------------------------------

async fn serve(inner: &Inner, mut stream: DuplexStream) -> Result<()> {
    let request = read_request(&mut stream).await?;
    let serial = match handle_host_request(inner, &mut stream, &request).await? {
        Some(serial) => serial,
        None => return Ok(()),
    };
    let request = read_request(&mut stream).await?;
    handle_device_request(inner, &mut stream, &serial, &request).await
}

/// Answer a host request. Returns the serial when the connection switched to
/// a device transport.
async fn handle_host_request(
    inner: &Inner,
    stream: &mut DuplexStream,
    request: &str,
) -> Result<Option<String>> {
    match request {
        "host:version" => {
            write_okay_payload(stream, &format!("{:04x}", inner.version)).await?;
        }
        "host:host-features" => {
            write_okay_payload(stream, &inner.host_features.join(",")).await?;
        }
        "host:devices" | "host:devices-l" => {
            let long_format = request.ends_with("-l");
            write_okay_payload(stream, &inner.device_list(long_format)).await?;
        }
        "host:track-devices" | "host:track-devices-l" => {
            write_okay(stream).await?;
            track_devices(inner, stream, request.ends_with("-l")).await?;
        }
        "host:kill" => {
            write_okay(stream).await?;
            inner.running.send_replace(false);
        }
        "host:list-forward" => {
            let payload: String = inner
                .lock()
                .forwards
                .iter()
                .map(|f| format!("{} {} {}\n", f.serial, f.local, f.remote))
                .collect();
            write_okay_payload(stream, &payload).await?;
        }
        _ => {
            if let Some(target) = request.strip_prefix("host:tport:") {
                return switch_transport(inner, stream, &transport_target(target), true).await;
            }
            if let Some(target) = request.strip_prefix("host:transport") {
                return switch_transport(inner, stream, &transport_target(target), false).await;
            }
            handle_device_host_request(inner, stream, request).await?;
        }
    }
    Ok(None)
}

/// Which device a request addresses
#[derive(Debug)]
enum Target {
    Serial(String),
    TransportId(String),
    Usb,
    Local,
    Any,
}

/// Decode the suffix of `host:transport...` / `host:tport:...`
fn transport_target(suffix: &str) -> Target {
    let suffix = suffix.trim_start_matches(':');
    match suffix {
        "usb" | "-usb" => Target::Usb,
        "local" | "-local" => Target::Local,
        "any" | "-any" => Target::Any,
        _ => {
            if let Some(id) = suffix.strip_prefix("-id:") {
                Target::TransportId(id.to_string())
            } else if let Some(serial) = suffix.strip_prefix("serial:") {
                Target::Serial(serial.to_string())
            } else {
                Target::Serial(suffix.to_string())
            }
        }
    }
}

fn resolve(state: &ServerState, target: &Target) -> std::result::Result<usize, String> {
    let matching: Vec<usize> = match target {
        Target::Serial(serial) => {
            return state
                .devices
                .iter()
                .position(|d| &d.device.serial_number == serial)
                .ok_or_else(|| format!("device '{}' not found", serial));
        }
        Target::TransportId(id) => {
            return state
                .devices
                .iter()
                .position(|d| d.transport_id.to_string() == *id)
                .ok_or_else(|| format!("no device with transport id '{}'", id));
        }
        Target::Usb => (0..state.devices.len())
            .filter(|&i| !state.devices[i].is_local())
            .collect(),
        Target::Local => (0..state.devices.len())
            .filter(|&i| state.devices[i].is_local())
            .collect(),
        Target::Any => (0..state.devices.len()).collect(),
    };
    match matching.as_slice() {
        [index] => Ok(*index),
        [] => Err("no devices/emulators found".to_string()),
        _ => Err("more than one device/emulator".to_string()),
    }
}

async fn switch_transport(
    inner: &Inner,
    stream: &mut DuplexStream,
    target: &Target,
    reply_transport_id: bool,
) -> Result<Option<String>> {
    let resolved = {
        let state = inner.lock();
        resolve(&state, target).and_then(|index| {
            let entry = &state.devices[index];
            if entry.device.state == "device" {
                Ok((entry.device.serial_number.clone(), entry.transport_id))
            } else {
                Err(format!("device {}", entry.device.state))
            }
        })
    };
    match resolved {
        Ok((serial, transport_id)) => {
            let mut reply = OKAY.to_vec();
            if reply_transport_id {
                reply.extend_from_slice(&transport_id.to_le_bytes());
            }
            stream.write_all(&reply).await?;
            Ok(Some(serial))
        }
        Err(message) => {
            write_fail(stream, &message).await?;
            Ok(None)
        }
    }
}

/// Split `host-serial:S:cmd`, `host-transport-id:N:cmd`, `host-usb:cmd`,
/// `host-local:cmd` or `host:cmd` into target and command
fn split_device_host_request(inner: &Inner, request: &str) -> Option<(Target, String)> {
    if let Some(rest) = request.strip_prefix("host-serial:") {
        // Serials may contain ':' (`127.0.0.1:5555`), so prefer known ones
        let known = inner
            .lock()
            .devices
            .iter()
            .map(|d| d.device.serial_number.clone())
            .find(|serial| rest.starts_with(&format!("{}:", serial)));
        let (serial, command) = match known {
            Some(serial) => {
                let command = rest[serial.len() + 1..].to_string();
                (serial, command)
            }
            None => {
                let (serial, command) = rest.rsplit_once(':')?;
                (serial.to_string(), command.to_string())
            }
        };
        return Some((Target::Serial(serial), command));
    }
    if let Some(rest) = request.strip_prefix("host-transport-id:") {
        let (id, command) = rest.split_once(':')?;
        return Some((Target::TransportId(id.to_string()), command.to_string()));
    }
    if let Some(command) = request.strip_prefix("host-usb:") {
        return Some((Target::Usb, command.to_string()));
    }
    if let Some(command) = request.strip_prefix("host-local:") {
        return Some((Target::Local, command.to_string()));
    }
    let command = request.strip_prefix("host:")?;
    Some((Target::Any, command.to_string()))
}

async fn handle_device_host_request(
    inner: &Inner,
    stream: &mut DuplexStream,
    request: &str,
) -> Result<()> {
    let Some((target, command)) = split_device_host_request(inner, request) else {
        return write_fail(stream, &format!("unknown host service '{}'", request)).await;
    };
    let index = {
        let state = inner.lock();
        resolve(&state, &target)
    };
    let index = match index {
        Ok(index) => index,
        Err(message) => return write_fail(stream, &message).await,
    };

    let (serial, device_state, features, transport_id) = {
        let state = inner.lock();
        let entry = &state.devices[index];
        (
            entry.device.serial_number.clone(),
            entry.device.state.clone(),
            entry.device.features.join(","),
            entry.transport_id,
        )
    };

    match command.as_str() {
        "features" => write_okay_payload(stream, &features).await,
        "get-state" => write_okay_payload(stream, &device_state).await,
        "get-serialno" => write_okay_payload(stream, &serial).await,
        "get-devpath" => write_okay_payload(stream, &format!("usb:{}", transport_id)).await,
        "killforward-all" => {
            inner.update(|state| state.forwards.retain(|f| f.serial != serial));
            write_okay(stream).await
        }
        _ => {
            if let Some(local) = command.strip_prefix("killforward:") {
                write_okay(stream).await?;
                let removed = inner.update(|state| {
                    let before = state.forwards.len();
                    state.forwards.retain(|f| !(f.serial == serial && f.local == local));
                    before != state.forwards.len()
                });
                return if removed {
                    write_okay(stream).await
                } else {
                    write_fail(stream, &format!("listener '{}' not found", local)).await
                };
            }
            if let Some(rule) = command.strip_prefix("forward:") {
                return forward(inner, stream, &serial, rule).await;
            }
            write_fail(stream, &format!("unknown host service '{}'", command)).await
        }
    }
}

async fn forward(inner: &Inner, stream: &mut DuplexStream, serial: &str, rule: &str) -> Result<()> {
    let (norebind, rule) = match rule.strip_prefix("norebind:") {
        Some(rule) => (true, rule),
        None => (false, rule),
    };
    let Some((local, remote)) = rule.split_once(';') else {
        return write_fail(stream, &format!("malformed forward spec '{}'", rule)).await;
    };
    write_okay(stream).await?;

    let outcome: std::result::Result<Option<String>, String> = inner.update(|state| {
        let existing = state.forwards.iter().position(|f| f.local == local);
        if norebind && existing.is_some() {
            return Err(format!("cannot rebind existing socket {}", local));
        }
        let (local, allocated) = if local == "tcp:0" {
            let port = state.next_port;
            state.next_port += 1;
            (format!("tcp:{}", port), Some(port.to_string()))
        } else {
            (local.to_string(), None)
        };
        if let Some(index) = existing {
            state.forwards.remove(index);
        }
        state.forwards.push(ForwardRule {
            serial: serial.to_string(),
            local,
            remote: remote.to_string(),
        });
        Ok(allocated)
    });

    match outcome {
        Ok(Some(port)) => write_okay_payload(stream, &port).await,
        Ok(None) => write_okay(stream).await,
        Err(message) => write_fail(stream, &message).await,
    }
}

/// Push the device list on every change until the client hangs up or the
/// server stops
async fn track_devices(inner: &Inner, stream: &mut DuplexStream, long_format: bool) -> Result<()> {
    let mut changes = inner.changes.subscribe();
    let mut running = inner.running.subscribe();
    let (mut reader, mut writer) = tokio::io::split(stream);
    let mut last_sent: Option<String> = None;
    loop {
        let payload = inner.device_list(long_format);
        if last_sent.as_deref() != Some(payload.as_str()) {
            writer.write_all(&encode_payload(payload.as_bytes())?).await?;
            last_sent = Some(payload);
        }
        let mut probe = [0u8; 1];
        tokio::select! {
            changed = changes.changed() => {
                if changed.is_err() {
                    return Ok(());
                }
            }
            _ = running.wait_for(|running| !*running) => return Ok(()),
            _ = reader.read(&mut probe) => return Ok(()),
        }
    }
}

// ---------------------------------------------------------------------------
// Device requests
// ---------------------------------------------------------------------------

async fn handle_device_request(
    inner: &Inner,
    stream: &mut DuplexStream,
    serial: &str,
    request: &str,
) -> Result<()> {
    if let Some(command) = request.strip_prefix("shell:") {
        write_okay(stream).await?;
        return legacy_shell(stream, command).await;
    }
    if let Some(command) = request.strip_prefix("exec:") {
        write_okay(stream).await?;
        return legacy_shell(stream, command).await;
    }
    if let Some(rest) = request.strip_prefix("shell,") {
        if let Some((args, command)) = rest.split_once(':') {
            if args.split(',').any(|arg| arg == "v2") {
                write_okay(stream).await?;
                return shell_v2(stream, command).await;
            }
        }
    }
    if request == "sync:" {
        write_okay(stream).await?;
        return sync(inner, stream, serial).await;
    }
    if request == "track-jdwp" {
        write_okay(stream).await?;
        return track_jdwp(inner, stream, serial).await;
    }
    if let Some(command) = request.strip_prefix("reverse:") {
        write_okay(stream).await?;
        return reverse(inner, stream, serial, command).await;
    }
    write_fail(stream, &format!("unknown service '{}'", request)).await
}

async fn reverse(inner: &Inner, stream: &mut DuplexStream, serial: &str, command: &str) -> Result<()> {
    if command == "list-forward" {
        let payload = inner
            .with_device(serial, |entry| {
                entry
                    .reverses
                    .iter()
                    .map(|(remote, local)| format!("{} {} {}\n", serial, remote, local))
                    .collect::<String>()
            })
            .unwrap_or_default();
        return write_okay_payload(stream, &payload).await;
    }
    if command == "killforward-all" {
        inner.with_device(serial, |entry| entry.reverses.clear());
        return write_okay(stream).await;
    }
    if let Some(remote) = command.strip_prefix("killforward:") {
        let removed = inner
            .with_device(serial, |entry| {
                let before = entry.reverses.len();
                entry.reverses.retain(|(r, _)| r != remote);
                before != entry.reverses.len()
            })
            .unwrap_or(false);
        return if removed {
            write_okay(stream).await
        } else {
            write_fail(stream, &format!("listener '{}' not found", remote)).await
        };
    }
    if let Some(rule) = command.strip_prefix("forward:") {
        let (norebind, rule) = match rule.strip_prefix("norebind:") {
            Some(rule) => (true, rule),
            None => (false, rule),
        };
        let Some((remote, local)) = rule.split_once(';') else {
            return write_fail(stream, &format!("malformed reverse spec '{}'", rule)).await;
        };
        let outcome: std::result::Result<Option<String>, String> = inner.update(|state| {
            let port = state.next_port;
            let entry = state
                .devices
                .iter_mut()
                .find(|d| d.device.serial_number == serial)
                .ok_or_else(|| format!("device '{}' not found", serial))?;
            let existing = entry.reverses.iter().position(|(r, _)| r == remote);
            if norebind && existing.is_some() {
                return Err(format!("cannot rebind existing socket {}", remote));
            }
            if let Some(index) = existing {
                entry.reverses.remove(index);
            }
            if remote == "tcp:0" {
                entry.reverses.push((format!("tcp:{}", port), local.to_string()));
                state.next_port += 1;
                Ok(Some(port.to_string()))
            } else {
                entry.reverses.push((remote.to_string(), local.to_string()));
                Ok(None)
            }
        });
        return match outcome {
            Ok(Some(port)) => write_okay_payload(stream, &port).await,
            Ok(None) => write_okay(stream).await,
            Err(message) => write_fail(stream, &message).await,
        };
    }
    write_fail(stream, &format!("unknown reverse service '{}'", command)).await
}

async fn track_jdwp(inner: &Inner, stream: &mut DuplexStream, serial: &str) -> Result<()> {
    let mut changes = inner.changes.subscribe();
    let (mut reader, mut writer) = tokio::io::split(stream);
    let mut last_sent: Option<String> = None;
    loop {
        let Some(payload) = inner.jdwp_list(serial) else {
            // Device went away
            return Ok(());
        };
        if last_sent.as_deref() != Some(payload.as_str()) {
            writer.write_all(&encode_payload(payload.as_bytes())?).await?;
            last_sent = Some(payload);
        }
        let mut probe = [0u8; 1];
        tokio::select! {
            changed = changes.changed() => {
                if changed.is_err() {
                    return Ok(());
                }
            }
            _ = reader.read(&mut probe) => return Ok(()),
        }
    }
}

// ---------------------------------------------------------------------------
// Shell
// ---------------------------------------------------------------------------

/// Output of one simulated shell step
enum Step {
    Stdout(Vec<u8>),
    Stderr(Vec<u8>),
    Cat,
    Sleep(Duration),
    Exit(u8),
}

/// Interpret `;`-separated commands: `echo` (with `>&2`), `cat`, `sleep`
/// and `exit`. Anything else is "not found" with exit code 127.
fn script(command: &str) -> Vec<Step> {
    let mut steps = Vec::new();
    for part in command.split(';').map(str::trim).filter(|p| !p.is_empty()) {
        let (name, args) = part.split_once(' ').unwrap_or((part, ""));
        match name {
            "echo" => match args.trim_end().strip_suffix(">&2") {
                Some(text) => steps.push(Step::Stderr(format!("{}\n", text.trim_end()).into_bytes())),
                None => steps.push(Step::Stdout(format!("{}\n", args).into_bytes())),
            },
            "cat" => steps.push(Step::Cat),
            "sleep" => {
                let seconds = args.trim().parse::<f64>().unwrap_or(0.0);
                steps.push(Step::Sleep(Duration::from_secs_f64(seconds.max(0.0))));
            }
            "exit" => {
                steps.push(Step::Exit(args.trim().parse().unwrap_or(0)));
                return steps;
            }
            _ => {
                steps.push(Step::Stderr(
                    format!("/system/bin/sh: {}: not found\n", name).into_bytes(),
                ));
                steps.push(Step::Exit(127));
                return steps;
            }
        }
    }
    steps
}

/// Legacy shell: stdout and stderr share the stream, the exit code is lost
async fn legacy_shell(stream: &mut DuplexStream, command: &str) -> Result<()> {
    for step in script(command) {
        match step {
            Step::Stdout(bytes) | Step::Stderr(bytes) => stream.write_all(&bytes).await?,
            Step::Cat => {
                let mut buf = vec![0u8; 4096];
                loop {
                    let count = stream.read(&mut buf).await?;
                    if count == 0 {
                        break;
                    }
                    stream.write_all(&buf[..count]).await?;
                }
            }
            Step::Sleep(duration) => tokio::time::sleep(duration).await,
            Step::Exit(_) => break,
        }
    }
    stream.shutdown().await?;
    Ok(())
}

async fn shell_v2(stream: &mut DuplexStream, command: &str) -> Result<()> {
    let mut exit_code = 0;
    let mut stdin_open = true;
    for step in script(command) {
        match step {
            Step::Stdout(bytes) => {
                stream
                    .write_all(&encode_packet(ShellV2PacketKind::Stdout, &bytes))
                    .await?
            }
            Step::Stderr(bytes) => {
                stream
                    .write_all(&encode_packet(ShellV2PacketKind::Stderr, &bytes))
                    .await?
            }
            Step::Cat => {
                while stdin_open {
                    match read_v2_packet(stream).await? {
                        Some((ShellV2PacketKind::Stdin, payload)) => {
                            stream
                                .write_all(&encode_packet(ShellV2PacketKind::Stdout, &payload))
                                .await?
                        }
                        Some((ShellV2PacketKind::CloseStdin, _)) | None => stdin_open = false,
                        Some(_) => {}
                    }
                }
            }
            Step::Sleep(duration) => tokio::time::sleep(duration).await,
            Step::Exit(code) => {
                exit_code = code;
                break;
            }
        }
    }
    stream
        .write_all(&encode_packet(ShellV2PacketKind::Exit, &[exit_code]))
        .await?;

    // Hold the connection until the client is done with it
    let mut buf = [0u8; 1024];
    while stream.read(&mut buf).await? > 0 {}
    Ok(())
}

async fn read_v2_packet(stream: &mut DuplexStream) -> Result<Option<(ShellV2PacketKind, Vec<u8>)>> {
    let mut header = [0u8; PACKET_HEADER_LENGTH];
    match stream.read_exact(&mut header).await {
        Ok(_) => {}
        Err(err) if err.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(err) => return Err(err.into()),
    }
    let kind = ShellV2PacketKind::from_u8(header[0])
        .ok_or_else(|| Error::protocol(format!("Unknown shell v2 packet id {}", header[0])))?;
    let length = u32::from_le_bytes([header[1], header[2], header[3], header[4]]) as usize;
    let mut payload = vec![0u8; length];
    stream.read_exact(&mut payload).await?;
    Ok(Some((kind, payload)))
}

// ---------------------------------------------------------------------------
// Sync
// ---------------------------------------------------------------------------

async fn read_sync_header(stream: &mut DuplexStream) -> Result<Option<(u32, u32)>> {
    let mut bytes = [0u8; SYNC_HEADER_LENGTH];
    match stream.read_exact(&mut bytes).await {
        Ok(_) => {}
        Err(err) if err.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(err) => return Err(err.into()),
    }
    let id = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
    let value = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
    Ok(Some((id, value)))
}

async fn write_sync_fail(stream: &mut DuplexStream, message: &str) -> Result<()> {
    let mut reply = SyncHeader::new(SyncCommand::Fail, message.len() as u32)
        .to_bytes()
        .to_vec();
    reply.extend_from_slice(message.as_bytes());
    stream.write_all(&reply).await?;
    Ok(())
}

async fn sync(inner: &Inner, stream: &mut DuplexStream, serial: &str) -> Result<()> {
    loop {
        let Some((id, length)) = read_sync_header(stream).await? else {
            return Ok(());
        };
        match SyncCommand::from_u32(id) {
            Some(SyncCommand::Quit) => return Ok(()),
            Some(SyncCommand::Stat) => {
                let path = read_sync_path(stream, length).await?;
                let file = inner
                    .with_device(serial, |entry| entry.files.get(&path).cloned())
                    .flatten();
                let (mode, size, mtime) = file
                    .map(|f| (f.mode, f.bytes.len() as u32, f.mtime))
                    .unwrap_or((0, 0, 0));
                let mut reply = SyncHeader::new(SyncCommand::Stat, mode).to_bytes().to_vec();
                reply.extend_from_slice(&size.to_le_bytes());
                reply.extend_from_slice(&mtime.to_le_bytes());
                stream.write_all(&reply).await?;
            }
            Some(SyncCommand::Send) => {
                let request = read_sync_path(stream, length).await?;
                let (path, mode) = match request.rsplit_once(',') {
                    Some((path, mode)) => (path.to_string(), mode.parse::<u32>().unwrap_or(0o644)),
                    None => (request.clone(), 0o644),
                };
                receive_file(inner, stream, serial, path, mode).await?;
            }
            Some(SyncCommand::Recv) => {
                let path = read_sync_path(stream, length).await?;
                let file = inner
                    .with_device(serial, |entry| entry.files.get(&path).cloned())
                    .flatten();
                match file {
                    Some(file) => {
                        for chunk in file.bytes.chunks(SYNC_DATA_MAX) {
                            let mut reply = SyncHeader::new(SyncCommand::Data, chunk.len() as u32)
                                .to_bytes()
                                .to_vec();
                            reply.extend_from_slice(chunk);
                            stream.write_all(&reply).await?;
                        }
                        stream
                            .write_all(&SyncHeader::new(SyncCommand::Done, 0).to_bytes())
                            .await?;
                    }
                    None => write_sync_fail(stream, "No such file or directory").await?,
                }
            }
            _ => {
                write_sync_fail(stream, "unknown sync request").await?;
                return Ok(());
            }
        }
    }
}

async fn read_sync_path(stream: &mut DuplexStream, length: u32) -> Result<String> {
    let mut path = vec![0u8; length as usize];
    stream.read_exact(&mut path).await?;
    Ok(String::from_utf8_lossy(&path).into_owned())
}

/// DATA packets until DONE, then store the file and answer OKAY
async fn receive_file(
    inner: &Inner,
    stream: &mut DuplexStream,
    serial: &str,
    path: String,
    mode: u32,
) -> Result<()> {
    let mut bytes = Vec::new();
    loop {
        let Some((id, value)) = read_sync_header(stream).await? else {
            return Err(Error::protocol("Sync connection closed during SEND"));
        };
        match SyncCommand::from_u32(id) {
            Some(SyncCommand::Data) => {
                if value as usize > SYNC_DATA_MAX {
                    write_sync_fail(stream, "DATA packet too large").await?;
                    return Err(Error::protocol("DATA packet too large"));
                }
                inner
                    .largest_sync_data
                    .fetch_max(value as usize, Ordering::SeqCst);
                let start = bytes.len();
                bytes.resize(start + value as usize, 0);
                stream.read_exact(&mut bytes[start..]).await?;
            }
            Some(SyncCommand::Done) => {
                let file = FakeFile {
                    bytes,
                    mode: REGULAR_FILE | (mode & 0o7777),
                    mtime: value,
                };
                inner.with_device(serial, |entry| {
                    entry.files.insert(path, file);
                });
                stream
                    .write_all(&SyncHeader::new(SyncCommand::Okay, 0).to_bytes())
                    .await?;
                return Ok(());
            }
            _ => {
                write_sync_fail(stream, "unexpected message during SEND").await?;
                return Err(Error::protocol("Unexpected message during SEND"));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::services::{AdbHostServices, DeviceListFormat};
    use adblib_core::{DeviceSelector, DeviceState, SocketSpec};

    fn host_services(server: &FakeAdbServer) -> AdbHostServices {
        AdbHostServices::new(Arc::new(server.clone()), Duration::from_secs(5))
    }

    #[test]
    fn test_script_parses_commands() {
        let steps = script("echo hi; echo oops >&2; exit 3");
        assert_eq!(steps.len(), 3);
        assert!(matches!(&steps[0], Step::Stdout(b) if b == b"hi\n"));
        assert!(matches!(&steps[1], Step::Stderr(b) if b == b"oops\n"));
        assert!(matches!(steps[2], Step::Exit(3)));
    }

    #[test]
    fn test_script_unknown_command() {
        let steps = script("frobnicate");
        assert!(matches!(steps.last(), Some(Step::Exit(127))));
    }

    #[tokio::test]
    async fn test_devices_lists_added_devices() {
        let server = FakeAdbServer::new();
        let id = server.add_device(FakeDevice::new("emulator-5554"));
        let list = host_services(&server)
            .devices(DeviceListFormat::Long)
            .await
            .unwrap();
        assert_eq!(list.len(), 1);
        assert_eq!(list.entries()[0].serial_number, "emulator-5554");
        assert_eq!(list.entries()[0].transport_id, Some(id));
        assert_eq!(list.entries()[0].model.as_deref(), Some("Pixel_7"));
    }

    #[tokio::test]
    async fn test_unknown_device_fails() {
        let server = FakeAdbServer::new();
        let err = host_services(&server)
            .get_state(&DeviceSelector::from_serial_number("nope"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::FailResponse { .. }));
        assert!(err.to_string().contains("device 'nope' not found"));
    }

    #[tokio::test]
    async fn test_serial_with_colon_resolves() {
        let server = FakeAdbServer::new();
        server.add_device(FakeDevice::new("127.0.0.1:5555"));
        let state = host_services(&server)
            .get_state(&DeviceSelector::from_serial_number("127.0.0.1:5555"))
            .await
            .unwrap();
        assert_eq!(state, DeviceState::Online);
    }

    #[tokio::test]
    async fn test_stopped_server_refuses_connections() {
        let server = FakeAdbServer::new();
        server.stop();
        let err = host_services(&server).version().await.unwrap_err();
        assert!(matches!(err, Error::Io(_)));
        assert_eq!(server.channels_created(), 0);

        server.restart();
        assert_eq!(host_services(&server).version().await.unwrap(), 41);
    }

    #[tokio::test]
    async fn test_forward_records_rule() {
        let server = FakeAdbServer::new();
        server.add_device(FakeDevice::new("R58M"));
        let device = DeviceSelector::from_serial_number("R58M");
        let port = host_services(&server)
            .forward(&device, &SocketSpec::Tcp(0), &SocketSpec::Tcp(8000), true)
            .await
            .unwrap();
        assert_eq!(port.as_deref(), Some("40000"));
        assert_eq!(
            server.forwards(),
            vec![(
                "R58M".to_string(),
                "tcp:40000".to_string(),
                "tcp:8000".to_string()
            )]
        );
    }
}
