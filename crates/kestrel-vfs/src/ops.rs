//! Backend operation tables.
//!
//! A backend plugs into the dispatcher by implementing [`FilesystemOps`] once
//! per filesystem and [`HandleOps`] for the handles its `open` returns.
//!
//! Filesystem operations are all mandatory. Handle operations are optional
//! except `stat`: a handle lists what it implements in [`Capabilities`] and
//! the dispatcher consults that table before calling in. An absent entry
//! never reaches the backend:
//!
//! | entry | when absent |
//! |---|---|
//! | `read`, `write`, `ioctl` | `VfsError::NotSupported` |
//! | `seek` | `VfsError::NotSeekable` |
//! | `fcntl` | `VfsError::InvalidArgument` |
//! | `read_ready`, `write_ready` | `true` |
//! | `except_ready` | `false` |
//! | wait-condition getters | `None` |
//! | `SHARED_LOCK`, `EXCLUSIVE_LOCK` | the filesystem lock is used |

use std::any::Any;
use std::sync::Arc;

use bitflags::bitflags;

use crate::error::{VfsError, VfsResult};
use crate::lock::{FsLock, LockMode};
use crate::mount::Filesystem;
use crate::types::{HandleId, Mode, OpenFlags, Stat, Whence};
use crate::wait::WaitCondition;

bitflags! {
    /// The optional entries a handle implements.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Capabilities: u32 {
        const READ = 1 << 0;
        const WRITE = 1 << 1;
        const SEEK = 1 << 2;
        const IOCTL = 1 << 3;
        const FCNTL = 1 << 4;
        /// The handle supplies its own shared lock (and thus its unlock).
        const SHARED_LOCK = 1 << 5;
        /// The handle supplies its own exclusive lock (and thus its unlock).
        const EXCLUSIVE_LOCK = 1 << 6;
        const READ_READY = 1 << 7;
        const WRITE_READY = 1 << 8;
        const EXCEPT_READY = 1 << 9;
        const READ_WAIT = 1 << 10;
        const WRITE_WAIT = 1 << 11;
        const EXCEPT_WAIT = 1 << 12;
    }
}

impl Capabilities {
    /// Both handle-level lock overrides.
    pub const HANDLE_LOCKS: Self = Self::SHARED_LOCK.union(Self::EXCLUSIVE_LOCK);

    /// The lock override flag for `mode`.
    pub fn lock_flag(mode: LockMode) -> Self {
        match mode {
            LockMode::Shared => Self::SHARED_LOCK,
            LockMode::Exclusive => Self::EXCLUSIVE_LOCK,
        }
    }
}

/// Operations on an open handle.
///
/// Methods take `&self`: a handle may be used from several tasks at once
/// and keeps its mutable state (position, flags) behind interior locks.
/// Default bodies are only reached if a handle advertises a capability it
/// does not implement.
pub trait HandleOps: Send + Sync + 'static {
    /// Downcast hook, so the owning filesystem can recover its handle type
    /// in `close`, `dup` and `getdents`.
    fn as_any(&self) -> &dyn Any;

    /// The optional entries this handle implements.
    fn capabilities(&self) -> Capabilities;

    /// File status. Mandatory.
    fn stat(&self) -> VfsResult<Stat>;

    fn read(&self, _buf: &mut [u8]) -> VfsResult<usize> {
        Err(VfsError::NotSupported("read"))
    }

    fn write(&self, _buf: &[u8]) -> VfsResult<usize> {
        Err(VfsError::NotSupported("write"))
    }

    /// Move the handle position. The offset is always 64-bit here; a
    /// backend with a narrower native offset truncates on its own terms.
    fn seek(&self, _offset: i64, _whence: Whence) -> VfsResult<u64> {
        Err(VfsError::NotSeekable)
    }

    /// Device control. `arg` is opaque to the dispatcher.
    fn ioctl(&self, _request: usize, _arg: usize) -> VfsResult<i32> {
        Err(VfsError::NotSupported("ioctl"))
    }

    fn fcntl(&self, _cmd: i32, _arg: i32) -> VfsResult<i32> {
        Err(VfsError::invalid_argument("fcntl"))
    }

    /// Handle-level lock for `mode`, if this handle overrides the
    /// filesystem lock. Must return `Some` for every mode whose flag is in
    /// [`capabilities`](Self::capabilities).
    fn lock(&self, _mode: LockMode) -> Option<&FsLock> {
        None
    }

    fn read_ready(&self) -> bool {
        true
    }

    fn write_ready(&self) -> bool {
        true
    }

    fn except_ready(&self) -> bool {
        false
    }

    fn read_wait_condition(&self) -> Option<Arc<WaitCondition>> {
        None
    }

    fn write_wait_condition(&self) -> Option<Arc<WaitCondition>> {
        None
    }

    fn except_wait_condition(&self) -> Option<Arc<WaitCondition>> {
        None
    }
}

/// Operations every mounted filesystem implements.
pub trait FilesystemOps: Send + Sync + 'static {
    /// Short type name (e.g., "ramfs"), used in mount listings and logs.
    fn fs_type(&self) -> &'static str;

    /// The filesystem-level shared/exclusive lock.
    fn lock(&self) -> &FsLock;

    /// Open `path`, relative to this filesystem's root and always starting
    /// with `/`. `fs` is the mounted instance, for backends that record
    /// their device id in the handles they create.
    fn open(
        &self,
        fs: &Filesystem,
        path: &str,
        flags: OpenFlags,
        mode: Mode,
    ) -> VfsResult<Box<dyn HandleOps>>;

    /// Release the backend resources of a handle created by this
    /// filesystem. The handle value itself is dropped by the dispatcher once
    /// no in-flight operation still refers to it.
    fn close(&self, handle: &dyn HandleOps);

    /// Create an independent handle to the same underlying resource.
    fn dup(&self, handle: &dyn HandleOps) -> VfsResult<Box<dyn HandleOps>>;

    /// Fill `buf` with `linux_dirent64` records (see [`crate::dirent`]) and
    /// return the number of bytes written. Zero means end of directory.
    fn getdents(&self, handle: &dyn HandleOps, buf: &mut [u8]) -> VfsResult<usize>;
}

/// Process-layer integration, notified before a handle is closed so that
/// memory mappings backed by it can be torn down.
pub trait ProcessHooks: Send + Sync {
    fn notify_handle_closing(&self, handle: HandleId);
}
