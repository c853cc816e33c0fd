//! adblib
//!
//! Host-side client library for the ADB (Android Debug Bridge) protocol.
//! Re-exports the workspace crates under one name.

pub use adblib_client as client;
pub use adblib_core as core;

// Re-export main entry points
pub use adblib_client::{
    AdbChannelProvider, AdbDeviceServices, AdbHostServices, AdbSession, ShellCommand,
    TcpChannelProvider,
};
pub use adblib_core::{
    load_config, AdbSessionConfig, DeviceInfo, DeviceSelector, DeviceState, Error, Result,
    SocketSpec,
};
