//! # adblib-core - Core Domain Types
//!
//! Foundation crate for adblib. Provides the data model shared by the
//! protocol client, error handling, configuration and logging.
//!
//! This crate has **zero internal dependencies** -- it only depends on external
//! crates (serde, chrono, thiserror, toml, dirs, tracing).
//!
//! ## Public API
//!
//! ### Devices (`device`, `selector`)
//! - [`DeviceInfo`] - One device list entry, raw state string preserved
//! - [`DeviceState`] - Parsed connection state
//! - [`TrackedDeviceList`] - Snapshot published by the device tracker
//! - [`DeviceSelector`] - Host/transport prefixes for addressing a device
//!
//! ### Protocol Values
//! - [`SocketSpec`] - Forward/reverse endpoints (`tcp:1000`, `localabstract:x`)
//! - [`RemoteFileMode`], [`FileStat`] - Sync protocol file metadata
//! - [`ShellCommandOutput`], [`ShellCommandOutputElement`] - Shell v2 results
//! - [`ListWithErrors`] - Line-decoded lists with per-line [`ErrorLine`]s
//!
//! ### Error Handling (`error`)
//! - [`Error`] - Error enum with `recoverable` classification
//! - [`Result`] - Type alias for `std::result::Result<T, Error>`
//! - [`ResultExt`] - Extension trait for adding error context
//!
//! ### Configuration (`config`) and Logging (`logging`)
//! - [`AdbSessionConfig`], [`load_config()`], [`save_config()`]
//! - [`logging::init()`] - File logging controlled by `ADBLIB_LOG`
//!
//! ## Prelude
//!
//! Import commonly used types with:
//! ```rust
//! use adblib_core::prelude::*;
//! ```

pub mod config;
pub mod device;
pub mod error;
pub mod forward;
pub mod list;
pub mod logging;
pub mod prelude;
pub mod remote_file;
pub mod selector;
pub mod shell;
pub mod socket_spec;

// Re-export commonly used types at crate root for convenience
pub use config::{
    default_config_path, load_config, save_config, AdbSessionConfig, DEFAULT_ADB_SERVER_PORT,
};
pub use device::{DeviceInfo, DeviceList, DeviceState, TrackedDeviceList};
pub use error::{BoxError, Error, Result, ResultExt};
pub use forward::{ForwardSocketInfo, ForwardSocketList, ReverseSocketInfo, ReverseSocketList};
pub use list::{ErrorLine, ListWithErrors, ProcessIdList};
pub use remote_file::{FileStat, PosixPermission, RemoteFileMode};
pub use selector::{DeviceSelector, DeviceSelectorKind};
pub use shell::{ShellCommandOutput, ShellCommandOutputElement};
pub use socket_spec::SocketSpec;
