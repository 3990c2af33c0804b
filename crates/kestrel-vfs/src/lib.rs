//! Kernel virtual filesystem dispatch layer.
//!
//! Routes absolute paths to mounted filesystems and file operations to the
//! backend that owns each open handle. Key components:
//!
//! - [`Vfs`] - Mount management, open-file table and operation dispatch
//! - [`MountTable`] - Longest-prefix mountpoint resolution
//! - [`FilesystemOps`] / [`HandleOps`] - Backend operation tables
//! - [`FsLock`] / [`LockPolicy`] - Two-tier shared/exclusive locking
//! - [`RamFs`] - In-memory filesystem (for scratch mounts, testing)
//!
//! ## Design Decisions
//!
//! - **Capability tables**: handles declare their optional operations up
//!   front; the dispatcher answers absent ones itself with a fixed default
//!   and never calls into the backend for them.
//! - **Lock tokens**: a held lock is a value. The token remembers which
//!   tier it came from, so a release can never reach the wrong lock.
//! - **Handle ids**: callers hold [`HandleId`]s, not pointers. A closed or
//!   unknown id is rejected with [`VfsError::BadHandle`].
//! - **Byte-wise prefix routing**: a mountpoint matches a path that extends
//!   it at a `/` boundary, or that equals it without the trailing slash.

pub mod backends;
pub mod config;
pub mod device;
pub mod dirent;
mod dispatch;
mod error;
pub mod lock;
pub mod mount;
pub mod ops;
mod types;
pub mod wait;

pub use backends::RamFs;
pub use config::{ConfigError, VfsConfig};
pub use device::DeviceIdAllocator;
pub use dispatch::Vfs;
pub use error::{VfsError, VfsResult, errno};
pub use lock::{FsLock, LockMode, LockPolicy, LockState, LockTier, LockToken};
pub use mount::{Filesystem, MountInfo, MountTable, Mountpoint, Resolved};
pub use ops::{Capabilities, FilesystemOps, HandleOps, ProcessHooks};
pub use types::{DeviceId, FileType, HandleId, Mode, OpenFlags, Stat, Whence};
pub use wait::WaitCondition;
