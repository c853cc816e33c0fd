//! Host connections and host-level services

pub mod connection;
pub mod services;

pub use connection::{open_device_connection, open_host_connection};
pub use services::{features, AdbHostServices, DeviceListFormat, TrackDevicesConnection};
