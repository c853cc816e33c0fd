//! Wire formats of the ADB host protocol and its sub-protocols

pub mod codec;
pub mod device_list;
pub mod shell_v2;
pub mod sync;

pub use device_list::{
    format_device_list, parse_device_list, parse_forward_list, parse_process_id_list,
    parse_reverse_list,
};
pub use shell_v2::{ShellV2PacketKind, ShellV2PacketReader};
pub use sync::{SyncCommand, SyncHeader, SYNC_DATA_MAX};
