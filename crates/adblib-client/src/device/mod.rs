//! Device services: shell, file transfer, reverse forwarding, JDWP tracking

pub mod collectors;
pub mod services;
pub mod shell;
pub mod shell_command;
pub mod sync;

pub use collectors::{
    LegacyShellV2Adapter, LineShellCollector, LineShellV2Collector, RawShellCollector,
    ShellCollector, ShellSink, ShellV2Collector, TextShellCollector, TextShellV2Collector,
};
pub use services::{AdbDeviceServices, TrackJdwpConnection};
pub use shell::{run_shell, run_shell_v2, ShellOptions, ShellStream};
pub use shell_command::{ShellCommand, ShellProtocol};
pub use sync::{AdbDeviceSyncServices, LocalSyncProgress, NoProgress, SyncProgress};
