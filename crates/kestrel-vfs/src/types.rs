//! Core VFS types.
//!
//! Flag values follow the Linux ABI so a syscall layer can pass user
//! arguments straight through.

use std::fmt;
use std::time::SystemTime;

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::error::{VfsError, VfsResult};

bitflags! {
    /// Open file flags (Linux `O_*` values).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct OpenFlags: u32 {
        const WRONLY = 0o1;
        const RDWR = 0o2;
        const CREAT = 0o100;
        const EXCL = 0o200;
        const TRUNC = 0o1000;
        const APPEND = 0o2000;
        const NONBLOCK = 0o4000;
        const DIRECTORY = 0o200000;
        const NOFOLLOW = 0o400000;
        const CLOEXEC = 0o2000000;
    }
}

impl OpenFlags {
    /// Read-only access (`O_RDONLY` is zero).
    pub const RDONLY: Self = Self::empty();

    const ACCMODE: u32 = 0o3;

    /// Flags a handle may change after open (via `F_SETFL`).
    pub const STATUS_MUTABLE: Self = Self::APPEND.union(Self::NONBLOCK);

    /// Returns true if this open may create the target.
    ///
    /// Creation can mutate directory structures across the filesystem, so
    /// the dispatcher takes the filesystem lock exclusively for it.
    pub fn creates(&self) -> bool {
        self.contains(Self::CREAT)
    }

    pub fn is_readable(&self) -> bool {
        self.bits() & Self::ACCMODE != Self::WRONLY.bits()
    }

    pub fn is_writable(&self) -> bool {
        let mode = self.bits() & Self::ACCMODE;
        mode == Self::WRONLY.bits() || mode == Self::RDWR.bits()
    }
}

/// Permission bits passed to `open` when creating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Mode(pub u32);

impl Mode {
    pub const DEFAULT_FILE: Mode = Mode(0o644);
    pub const DEFAULT_DIR: Mode = Mode(0o755);

    pub fn perm(&self) -> u32 {
        self.0 & 0o7777
    }
}

/// Seek origin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Whence {
    Set,
    Cur,
    End,
}

impl TryFrom<i32> for Whence {
    type Error = VfsError;

    fn try_from(value: i32) -> VfsResult<Self> {
        match value {
            0 => Ok(Whence::Set),
            1 => Ok(Whence::Cur),
            2 => Ok(Whence::End),
            other => Err(VfsError::invalid_argument(format!("whence {other}"))),
        }
    }
}

/// File type enumeration.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[strum(serialize_all = "snake_case")]
pub enum FileType {
    /// Regular file.
    File,
    /// Directory.
    Directory,
    /// Symbolic link.
    Symlink,
    /// Character device.
    CharDevice,
    /// Block device.
    BlockDevice,
    /// Named pipe.
    Fifo,
    /// Unix socket.
    Socket,
}

impl FileType {
    /// Returns true if this is a regular file.
    pub fn is_file(&self) -> bool {
        matches!(self, FileType::File)
    }

    /// Returns true if this is a directory.
    pub fn is_dir(&self) -> bool {
        matches!(self, FileType::Directory)
    }

    /// `S_IFMT` bits for `st_mode`.
    pub fn mode_bits(&self) -> u32 {
        match self {
            FileType::Fifo => 0o010000,
            FileType::CharDevice => 0o020000,
            FileType::Directory => 0o040000,
            FileType::BlockDevice => 0o060000,
            FileType::File => 0o100000,
            FileType::Symlink => 0o120000,
            FileType::Socket => 0o140000,
        }
    }

    /// `d_type` value for directory entries.
    pub fn dirent_type(&self) -> u8 {
        match self {
            FileType::Fifo => 1,
            FileType::CharDevice => 2,
            FileType::Directory => 4,
            FileType::BlockDevice => 6,
            FileType::File => 8,
            FileType::Symlink => 10,
            FileType::Socket => 12,
        }
    }

    /// Inverse of [`FileType::dirent_type`]. `DT_UNKNOWN` and unassigned
    /// values yield `None`.
    pub fn from_dirent_type(d_type: u8) -> Option<Self> {
        match d_type {
            1 => Some(FileType::Fifo),
            2 => Some(FileType::CharDevice),
            4 => Some(FileType::Directory),
            6 => Some(FileType::BlockDevice),
            8 => Some(FileType::File),
            10 => Some(FileType::Symlink),
            12 => Some(FileType::Socket),
            _ => None,
        }
    }
}

/// Identifier of a mounted filesystem or device.
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(pub u64);

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "dev:{}", self.0)
    }
}

/// Identifier of an open handle. Never reused.
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub struct HandleId(pub(crate) u64);

impl HandleId {
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for HandleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "h{}", self.0)
    }
}

/// File status, as reported by a backend's `stat`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stat {
    /// Device the file lives on.
    pub dev: DeviceId,
    /// Inode-like identifier, unique within `dev`.
    pub ino: u64,
    /// File type.
    pub kind: FileType,
    /// Permission bits (e.g., 0o644).
    pub perm: u32,
    /// Number of hard links.
    pub nlink: u32,
    pub uid: u32,
    pub gid: u32,
    /// Device number for character/block devices.
    pub rdev: u64,
    /// Size in bytes.
    pub size: u64,
    /// Preferred I/O block size.
    pub blksize: u32,
    /// Allocated 512-byte blocks.
    pub blocks: u64,
    pub atime: SystemTime,
    pub mtime: SystemTime,
    pub ctime: SystemTime,
}

impl Stat {
    /// Full `st_mode`: type bits plus permissions.
    pub fn mode(&self) -> u32 {
        self.kind.mode_bits() | (self.perm & 0o7777)
    }

    pub fn is_file(&self) -> bool {
        self.kind.is_file()
    }

    pub fn is_dir(&self) -> bool {
        self.kind.is_dir()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_flags_access_mode() {
        assert!(OpenFlags::RDONLY.is_readable());
        assert!(!OpenFlags::RDONLY.is_writable());
        assert!(!OpenFlags::WRONLY.is_readable());
        assert!(OpenFlags::WRONLY.is_writable());
        assert!(OpenFlags::RDWR.is_readable());
        assert!(OpenFlags::RDWR.is_writable());
    }

    #[test]
    fn test_open_flags_linux_values() {
        assert_eq!(OpenFlags::CREAT.bits(), 0o100);
        assert_eq!((OpenFlags::CREAT | OpenFlags::EXCL).bits(), 0o300);
        assert!((OpenFlags::RDWR | OpenFlags::CREAT).creates());
        assert!(!OpenFlags::RDWR.creates());
    }

    #[test]
    fn test_whence_from_raw() {
        assert_eq!(Whence::try_from(0).unwrap(), Whence::Set);
        assert_eq!(Whence::try_from(2).unwrap(), Whence::End);
        assert!(matches!(
            Whence::try_from(7),
            Err(VfsError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_file_type_bits() {
        assert_eq!(FileType::Directory.dirent_type(), 4);
        assert_eq!(FileType::from_dirent_type(8), Some(FileType::File));
        assert_eq!(FileType::from_dirent_type(0), None);
        assert_eq!(FileType::CharDevice.to_string(), "char_device");
        assert_eq!("directory".parse::<FileType>().unwrap(), FileType::Directory);
    }

    #[test]
    fn test_stat_mode() {
        let now = SystemTime::now();
        let st = Stat {
            dev: DeviceId(3),
            ino: 7,
            kind: FileType::File,
            perm: 0o644,
            nlink: 1,
            uid: 0,
            gid: 0,
            rdev: 0,
            size: 0,
            blksize: 4096,
            blocks: 0,
            atime: now,
            mtime: now,
            ctime: now,
        };
        assert_eq!(st.mode(), 0o100644);
        assert!(st.is_file());
    }
}
