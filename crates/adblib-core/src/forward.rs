//! Port forwarding rules

use crate::list::ListWithErrors;
use crate::socket_spec::SocketSpec;

/// Entry of `host:list-forward`: `<serial> <local> <remote>`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForwardSocketInfo {
    pub device_serial: String,
    pub local: SocketSpec,
    pub remote: SocketSpec,
}

/// Entry of `reverse:list-forward`: `<transport> <remote> <local>`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReverseSocketInfo {
    pub transport_name: String,
    pub remote: SocketSpec,
    pub local: SocketSpec,
}

pub type ForwardSocketList = ListWithErrors<ForwardSocketInfo>;
pub type ReverseSocketList = ListWithErrors<ReverseSocketInfo>;
