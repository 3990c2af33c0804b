//! The VFS dispatcher.
//!
//! [`Vfs`] owns the mount table and the open-file table. `open` resolves a
//! path to its mountpoint and calls the backend under the filesystem lock;
//! every later operation names a [`HandleId`] and is routed to the handle's
//! operation table under the lock its [`LockPolicy`] selects.
//!
//! | operation | lock |
//! |---|---|
//! | `open` | filesystem, exclusive with `O_CREAT`, shared otherwise |
//! | `read`, `stat`, readiness queries | shared, per policy |
//! | `write`, `ioctl`, `fcntl` | exclusive, per policy |
//! | `getdents` | filesystem, shared |
//! | `seek`, `dup`, `close`, wait-condition getters | none |

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use parking_lot::RwLock;

use crate::config::VfsConfig;
use crate::device::DeviceIdAllocator;
use crate::error::{VfsError, VfsResult};
use crate::lock::{LockMode, LockPolicy, LockTier, LockToken};
use crate::mount::{Filesystem, MountInfo, MountTable, Mountpoint, Resolved};
use crate::ops::{Capabilities, FilesystemOps, HandleOps, ProcessHooks};
use crate::types::{DeviceId, HandleId, Mode, OpenFlags, Stat, Whence};
use crate::wait::WaitCondition;

/// An entry in the open-file table.
struct OpenFile {
    fs: Arc<Filesystem>,
    ops: Box<dyn HandleOps>,
    policy: LockPolicy,
}

impl OpenFile {
    fn supports(&self, cap: Capabilities) -> bool {
        self.ops.capabilities().contains(cap)
    }

    fn lock(&self, mode: LockMode) -> LockToken {
        self.policy.acquire(mode, self.ops.as_ref(), self.fs.lock())
    }
}

/// The VFS dispatch layer.
pub struct Vfs {
    config: VfsConfig,
    mounts: RwLock<MountTable>,
    files: DashMap<HandleId, Arc<OpenFile>>,
    next_handle: AtomicU64,
    device_ids: DeviceIdAllocator,
    hooks: Option<Arc<dyn ProcessHooks>>,
}

impl fmt::Debug for Vfs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Vfs")
            .field("config", &self.config)
            .field("mounts", &self.mounts.read().len())
            .field("open_handles", &self.files.len())
            .finish()
    }
}

impl Default for Vfs {
    fn default() -> Self {
        Self::new(VfsConfig::default())
    }
}

impl Vfs {
    pub fn new(config: VfsConfig) -> Self {
        Self {
            mounts: RwLock::new(MountTable::new(config.max_mountpoints)),
            files: DashMap::new(),
            next_handle: AtomicU64::new(1),
            device_ids: DeviceIdAllocator::new(config.first_device_id),
            hooks: None,
            config,
        }
    }

    /// Install the process-layer hooks notified on close.
    pub fn with_hooks(mut self, hooks: Arc<dyn ProcessHooks>) -> Self {
        self.hooks = Some(hooks);
        self
    }

    pub fn config(&self) -> &VfsConfig {
        &self.config
    }

    // ========================================================================
    // Mount management
    // ========================================================================

    /// Mount `backend` at `path` and return the new filesystem instance.
    ///
    /// # Panics
    ///
    /// If `path` does not end with `/`.
    #[tracing::instrument(skip(self, backend), fields(fs_type = backend.fs_type()), name = "vfs.mount")]
    pub fn mount(
        &self,
        path: &str,
        backend: Arc<dyn FilesystemOps>,
    ) -> VfsResult<Arc<Filesystem>> {
        if !path.starts_with('/') {
            return Err(VfsError::invalid_path(path));
        }

        let mut mounts = self.mounts.write();
        // Checked before allocating so a refused mount does not consume a
        // device id. `MountTable::add` repeats them under the same guard.
        if mounts.get(path).is_some() {
            return Err(VfsError::already_mounted(path));
        }
        if mounts.len() >= self.config.max_mountpoints {
            return Err(VfsError::TooManyMounts(self.config.max_mountpoints));
        }

        let fs = Arc::new(Filesystem::new(self.device_ids.allocate(), backend));
        mounts.add(Mountpoint::new(path, Arc::clone(&fs)))?;
        tracing::debug!(device = %fs.device_id(), "mounted");
        Ok(fs)
    }

    /// Unmount the filesystem at exactly `path`.
    ///
    /// Refused with `Busy` while any handle on it is still open.
    #[tracing::instrument(skip(self), name = "vfs.unmount")]
    pub fn unmount(&self, path: &str) -> VfsResult<Arc<Filesystem>> {
        let mut mounts = self.mounts.write();
        let fs = mounts
            .get(path)
            .map(|mp| Arc::clone(mp.filesystem()))
            .ok_or_else(|| VfsError::not_found(path))?;

        let refs = fs.ref_count();
        if refs > 1 {
            tracing::warn!(device = %fs.device_id(), open_handles = refs - 1, "unmount refused");
            return Err(VfsError::busy(path));
        }

        mounts.remove(path);
        tracing::debug!(device = %fs.device_id(), "unmounted");
        Ok(fs)
    }

    /// List all current mounts.
    pub fn mounts(&self) -> Vec<MountInfo> {
        self.mounts.read().list()
    }

    /// Resolve an absolute path to its mountpoint and residual path.
    pub fn resolve<'p>(&self, path: &'p str) -> Option<Resolved<'p>> {
        self.mounts.read().resolve(path)
    }

    /// Issue a new device id. Never fails, never repeats.
    pub fn allocate_device_id(&self) -> DeviceId {
        self.device_ids.allocate()
    }

    // ========================================================================
    // Handle lifecycle
    // ========================================================================

    /// Open `path` on the filesystem that owns it.
    ///
    /// The mount table's read side is held until the handle is registered,
    /// including while waiting for the filesystem lock. `parking_lot` locks
    /// are fair to writers, so a `mount` or `unmount` queued behind a slow
    /// open also holds back every later `open` and `resolve`, on any
    /// mountpoint, until it completes.
    ///
    /// # Panics
    ///
    /// If `path` is not absolute.
    #[tracing::instrument(skip(self), name = "vfs.open", level = "trace")]
    pub fn open(&self, path: &str, flags: OpenFlags, mode: Mode) -> VfsResult<HandleId> {
        assert!(
            path.starts_with('/'),
            "vfs open works only with absolute paths: {path:?}"
        );

        // Holding the table across the backend call keeps the filesystem
        // mounted until the new handle has taken its reference.
        let mounts = self.mounts.read();
        let resolved = mounts
            .resolve(path)
            .ok_or_else(|| VfsError::not_found(path))?;
        let fs = Arc::clone(resolved.filesystem());

        let lock_mode = if flags.creates() {
            LockMode::Exclusive
        } else {
            LockMode::Shared
        };
        let ops = {
            let _token = fs.lock().acquire(lock_mode);
            fs.backend().open(&fs, resolved.residual, flags, mode)?
        };
        fs.retain();
        drop(mounts);

        Ok(self.register(fs, ops))
    }

    /// Close a handle.
    ///
    /// The process hooks are notified first, then the backend releases the
    /// handle and the filesystem drops the handle's reference.
    pub fn close(&self, h: HandleId) -> VfsResult<()> {
        let (_, file) = self.files.remove(&h).ok_or(VfsError::BadHandle)?;

        if let Some(hooks) = &self.hooks {
            hooks.notify_handle_closing(h);
        }
        file.fs.backend().close(file.ops.as_ref());
        file.fs.release();

        tracing::trace!(handle = %h, device = %file.fs.device_id(), "closed");
        Ok(())
    }

    /// Duplicate a handle. Both handles must be closed independently.
    pub fn dup(&self, h: HandleId) -> VfsResult<HandleId> {
        let file = self.file(h)?;
        let ops = file.fs.backend().dup(file.ops.as_ref())?;
        file.fs.retain();

        let dup = self.register(Arc::clone(&file.fs), ops);
        tracing::trace!(handle = %h, dup = %dup, "duplicated");
        Ok(dup)
    }

    /// Number of handles currently open across all filesystems.
    pub fn open_handles(&self) -> usize {
        self.files.len()
    }

    /// The filesystem a handle belongs to.
    pub fn filesystem_of(&self, h: HandleId) -> VfsResult<Arc<Filesystem>> {
        Ok(Arc::clone(&self.file(h)?.fs))
    }

    fn register(&self, fs: Arc<Filesystem>, ops: Box<dyn HandleOps>) -> HandleId {
        let policy = LockPolicy::for_handle(ops.as_ref());
        let id = HandleId(self.next_handle.fetch_add(1, Ordering::Relaxed));
        self.files.insert(id, Arc::new(OpenFile { fs, ops, policy }));
        id
    }

    fn file(&self, h: HandleId) -> VfsResult<Arc<OpenFile>> {
        self.files
            .get(&h)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or(VfsError::BadHandle)
    }

    // ========================================================================
    // Handle operations
    // ========================================================================

    pub fn read(&self, h: HandleId, buf: &mut [u8]) -> VfsResult<usize> {
        let file = self.file(h)?;
        if !file.supports(Capabilities::READ) {
            return Err(VfsError::NotSupported("read"));
        }

        let _token = file.lock(LockMode::Shared);
        file.ops.read(buf)
    }

    pub fn write(&self, h: HandleId, buf: &[u8]) -> VfsResult<usize> {
        let file = self.file(h)?;
        if !file.supports(Capabilities::WRITE) {
            return Err(VfsError::NotSupported("write"));
        }

        let _token = file.lock(LockMode::Exclusive);
        file.ops.write(buf)
    }

    /// Reposition the handle. Not locked: the backend keeps its own cursor
    /// consistent.
    pub fn seek(&self, h: HandleId, offset: i64, whence: Whence) -> VfsResult<u64> {
        let file = self.file(h)?;
        if !file.supports(Capabilities::SEEK) {
            return Err(VfsError::NotSeekable);
        }

        file.ops.seek(offset, whence)
    }

    pub fn ioctl(&self, h: HandleId, request: usize, arg: usize) -> VfsResult<i32> {
        let file = self.file(h)?;
        if !file.supports(Capabilities::IOCTL) {
            return Err(VfsError::NotSupported("ioctl"));
        }

        let _token = file.lock(LockMode::Exclusive);
        file.ops.ioctl(request, arg)
    }

    pub fn fcntl(&self, h: HandleId, cmd: i32, arg: i32) -> VfsResult<i32> {
        let file = self.file(h)?;
        if !file.supports(Capabilities::FCNTL) {
            return Err(VfsError::invalid_argument(format!("fcntl {cmd} on {h}")));
        }

        let _token = file.lock(LockMode::Exclusive);
        file.ops.fcntl(cmd, arg)
    }

    pub fn stat(&self, h: HandleId) -> VfsResult<Stat> {
        let file = self.file(h)?;
        let _token = file.lock(LockMode::Shared);
        file.ops.stat()
    }

    /// Read directory entries into `buf` (see [`crate::dirent`]).
    ///
    /// Always taken under the filesystem lock, whatever the handle's policy.
    /// The buffer is passed through untouched; the backend decides what fits.
    pub fn getdents(&self, h: HandleId, buf: &mut [u8]) -> VfsResult<usize> {
        let file = self.file(h)?;
        let _token = file.fs.lock().shared();
        file.fs.backend().getdents(file.ops.as_ref(), buf)
    }

    // ========================================================================
    // Lock passthroughs
    // ========================================================================

    /// Take the handle's shared lock, for callers bracketing several
    /// operations. Dropping the token unlocks.
    ///
    /// Do not dispatch operations on the same handle while holding it: the
    /// locks are not reentrant.
    pub fn lock_shared(&self, h: HandleId) -> VfsResult<LockToken> {
        Ok(self.file(h)?.lock(LockMode::Shared))
    }

    /// Take the handle's exclusive lock. See [`lock_shared`](Self::lock_shared).
    pub fn lock_exclusive(&self, h: HandleId) -> VfsResult<LockToken> {
        Ok(self.file(h)?.lock(LockMode::Exclusive))
    }

    /// Which lock serves `mode` on this handle.
    pub fn lock_tier(&self, h: HandleId, mode: LockMode) -> VfsResult<LockTier> {
        Ok(self.file(h)?.policy.tier(mode))
    }

    // ========================================================================
    // Readiness
    // ========================================================================

    /// Defaults to `true` when the handle cannot tell.
    pub fn read_ready(&self, h: HandleId) -> VfsResult<bool> {
        let file = self.file(h)?;
        if !file.supports(Capabilities::READ_READY) {
            return Ok(true);
        }

        let _token = file.lock(LockMode::Shared);
        Ok(file.ops.read_ready())
    }

    /// Defaults to `true` when the handle cannot tell.
    pub fn write_ready(&self, h: HandleId) -> VfsResult<bool> {
        let file = self.file(h)?;
        if !file.supports(Capabilities::WRITE_READY) {
            return Ok(true);
        }

        let _token = file.lock(LockMode::Shared);
        Ok(file.ops.write_ready())
    }

    /// Defaults to `false` when the handle cannot tell.
    pub fn except_ready(&self, h: HandleId) -> VfsResult<bool> {
        let file = self.file(h)?;
        if !file.supports(Capabilities::EXCEPT_READY) {
            return Ok(false);
        }

        let _token = file.lock(LockMode::Shared);
        Ok(file.ops.except_ready())
    }

    pub fn read_wait_condition(&self, h: HandleId) -> VfsResult<Option<Arc<WaitCondition>>> {
        let file = self.file(h)?;
        if !file.supports(Capabilities::READ_WAIT) {
            return Ok(None);
        }
        Ok(file.ops.read_wait_condition())
    }

    pub fn write_wait_condition(&self, h: HandleId) -> VfsResult<Option<Arc<WaitCondition>>> {
        let file = self.file(h)?;
        if !file.supports(Capabilities::WRITE_WAIT) {
            return Ok(None);
        }
        Ok(file.ops.write_wait_condition())
    }

    pub fn except_wait_condition(&self, h: HandleId) -> VfsResult<Option<Arc<WaitCondition>>> {
        let file = self.file(h)?;
        if !file.supports(Capabilities::EXCEPT_WAIT) {
            return Ok(None);
        }
        Ok(file.ops.except_wait_condition())
    }
}
