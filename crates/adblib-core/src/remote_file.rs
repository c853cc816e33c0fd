//! Remote file permissions and metadata for the sync protocol

use chrono::{DateTime, Utc};
use std::fmt;
use std::path::Path;

/// A single POSIX permission bit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PosixPermission {
    OwnerRead,
    OwnerWrite,
    OwnerExecute,
    GroupRead,
    GroupWrite,
    GroupExecute,
    OthersRead,
    OthersWrite,
    OthersExecute,
}

impl PosixPermission {
    /// All permissions, in `rwxrwxrwx` rendering order
    pub const ALL: [PosixPermission; 9] = [
        PosixPermission::OwnerRead,
        PosixPermission::OwnerWrite,
        PosixPermission::OwnerExecute,
        PosixPermission::GroupRead,
        PosixPermission::GroupWrite,
        PosixPermission::GroupExecute,
        PosixPermission::OthersRead,
        PosixPermission::OthersWrite,
        PosixPermission::OthersExecute,
    ];

    pub fn bit(&self) -> u32 {
        match self {
            PosixPermission::OwnerRead => 0o400,
            PosixPermission::OwnerWrite => 0o200,
            PosixPermission::OwnerExecute => 0o100,
            PosixPermission::GroupRead => 0o040,
            PosixPermission::GroupWrite => 0o020,
            PosixPermission::GroupExecute => 0o010,
            PosixPermission::OthersRead => 0o004,
            PosixPermission::OthersWrite => 0o002,
            PosixPermission::OthersExecute => 0o001,
        }
    }

    fn symbol(&self) -> char {
        match self {
            PosixPermission::OwnerRead | PosixPermission::GroupRead | PosixPermission::OthersRead => {
                'r'
            }
            PosixPermission::OwnerWrite
            | PosixPermission::GroupWrite
            | PosixPermission::OthersWrite => 'w',
            PosixPermission::OwnerExecute
            | PosixPermission::GroupExecute
            | PosixPermission::OthersExecute => 'x',
        }
    }
}

/// Mode sent with `SEND` and returned by `STAT`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RemoteFileMode {
    mode_bits: u32,
}

impl RemoteFileMode {
    /// Mode used when the local file system has no POSIX permissions
    pub const DEFAULT: RemoteFileMode = RemoteFileMode { mode_bits: 0o644 };

    pub fn from_mode_bits(mode_bits: u32) -> Self {
        Self { mode_bits }
    }

    pub fn from_permissions(permissions: &[PosixPermission]) -> Self {
        let mode_bits = permissions.iter().fold(0, |bits, p| bits | p.bit());
        Self { mode_bits }
    }

    /// Mode of a local file, or `None` if the path does not exist
    pub fn from_path(path: &Path) -> std::io::Result<Option<Self>> {
        match std::fs::metadata(path) {
            Ok(metadata) => Ok(Some(Self::from_metadata(&metadata))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    #[cfg(unix)]
    fn from_metadata(metadata: &std::fs::Metadata) -> Self {
        use std::os::unix::fs::PermissionsExt;
        Self::from_mode_bits(metadata.permissions().mode() & 0o777)
    }

    #[cfg(not(unix))]
    fn from_metadata(_metadata: &std::fs::Metadata) -> Self {
        Self::DEFAULT
    }

    /// Raw bits, including file type bits when they came from `STAT`
    pub fn mode_bits(&self) -> u32 {
        self.mode_bits
    }

    pub fn permission_bits(&self) -> u32 {
        self.mode_bits & 0o777
    }

    pub fn permissions(&self) -> Vec<PosixPermission> {
        PosixPermission::ALL
            .iter()
            .copied()
            .filter(|p| self.mode_bits & p.bit() != 0)
            .collect()
    }

    /// `rwxr-xr-x` style rendering of the permission bits
    pub fn to_posix_string(&self) -> String {
        PosixPermission::ALL
            .iter()
            .map(|p| {
                if self.mode_bits & p.bit() != 0 {
                    p.symbol()
                } else {
                    '-'
                }
            })
            .collect()
    }
}

impl Default for RemoteFileMode {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl fmt::Display for RemoteFileMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_posix_string())
    }
}

/// Result of a sync `STAT` request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileStat {
    pub mode: RemoteFileMode,
    pub size: u64,
    pub last_modified: DateTime<Utc>,
}

impl FileStat {
    /// The server reports all-zero fields for paths that do not exist
    pub fn exists(&self) -> bool {
        self.mode.mode_bits() != 0
    }
}
