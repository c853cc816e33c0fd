//! # adblib-client - ADB Protocol Client
//!
//! Talks to the ADB server over its host protocol: host requests, device
//! transports, shell (legacy and v2), file transfer (sync), reverse
//! forwarding, JDWP tracking and continuous device tracking.
//!
//! Depends on [`adblib_core`] for domain types, errors and configuration.
//!
//! ## Public API
//!
//! ### Channels (`channel`)
//! - [`AdbInputChannel`], [`AdbOutputChannel`], [`AdbChannel`] - Byte channels
//!   with per-operation deadlines
//! - [`AdbStreamChannel`] - Channel over any tokio stream
//! - [`AdbInputChannelSlice`] - Length-limited view of an input channel
//!
//! ### Connections (`provider`, `host`)
//! - [`AdbChannelProvider`], [`TcpChannelProvider`] - Sources of server connections
//! - [`AdbHostServices`] - Requests answered by the server (`host:devices`, forward, ...)
//!
//! ### Devices (`device`)
//! - [`AdbDeviceServices`] - Shell, exec, abb, sync, reverse and track-jdwp
//! - [`ShellCollector`], [`ShellV2Collector`] - Turn shell output into typed items
//! - [`ShellStream`] - Stream of collected items, cancelled on drop
//! - [`AdbDeviceSyncServices`] - Push, pull and stat over one sync connection
//! - [`ShellCommand`] - Builder picking shell v2, exec or legacy shell
//!
//! ### Tracking (`tracker`)
//! - [`DeviceTracker`] - Single shared `host:track-devices` connection with retry
//! - [`ConnectedDevice`] - Per-device [`DeviceScope`] and [`DeviceCache`]
//!
//! ### Session (`session`)
//! - [`AdbSession`] - Entry point tying services and device lifetimes together

pub mod channel;
pub mod device;
pub mod host;
pub mod protocol;
pub mod provider;
pub mod session;
#[cfg(any(test, feature = "test-helpers"))]
pub mod test_utils;
pub mod tracker;

// Public API re-exports
pub use channel::{
    AdbChannel, AdbInputChannel, AdbInputChannelSlice, AdbOutputChannel, AdbStreamChannel,
    ByteBufferInputChannel, ByteBufferOutputChannel, Closeable, ResizableBuffer, SplitChannel,
    INFINITE_DURATION,
};
pub use device::{
    AdbDeviceServices, AdbDeviceSyncServices, LineShellCollector, LineShellV2Collector,
    LocalSyncProgress, NoProgress, RawShellCollector, ShellCollector, ShellCommand, ShellOptions,
    ShellProtocol, ShellSink, ShellStream, ShellV2Collector, SyncProgress, TextShellCollector,
    TextShellV2Collector, TrackJdwpConnection,
};
pub use host::{AdbHostServices, DeviceListFormat, TrackDevicesConnection};
pub use provider::{AdbChannelProvider, TcpChannelProvider};
pub use session::AdbSession;
pub use tracker::{
    select_device, CacheKey, CacheValue, ConnectedDevice, ConnectedDevicesManager, DeviceCache,
    DeviceScope, DeviceTracker,
};
