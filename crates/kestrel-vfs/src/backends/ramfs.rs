//! In-memory filesystem backend.
//!
//! Used for scratch mounts and testing. All data is ephemeral.
//!
//! Each inode carries its own [`FsLock`], which its handles advertise as
//! their handle-level lock for both modes. Operations on different files of
//! the same ramfs therefore never contend.

use std::any::Any;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;

use parking_lot::{Mutex, RwLock};

use crate::dirent::{DirentWriter, record_len};
use crate::error::{VfsError, VfsResult, errno};
use crate::lock::{FsLock, LockMode};
use crate::mount::Filesystem;
use crate::ops::{Capabilities, FilesystemOps, HandleOps};
use crate::types::{DeviceId, FileType, Mode, OpenFlags, Stat, Whence};

/// `fcntl` command: get file status flags.
pub const F_GETFL: i32 = 3;
/// `fcntl` command: set file status flags.
pub const F_SETFL: i32 = 4;

/// Largest file a ramfs write may produce. Writes that would end past it
/// fail with `FileTooLarge`.
pub const MAX_FILE_SIZE: u64 = 1 << 30;

const ROOT_INO: u64 = 1;
const BLOCK_SIZE: u32 = 4096;

#[derive(Debug, Clone, Copy)]
struct Times {
    atime: SystemTime,
    mtime: SystemTime,
    ctime: SystemTime,
}

impl Times {
    fn now() -> Self {
        let now = SystemTime::now();
        Self {
            atime: now,
            mtime: now,
            ctime: now,
        }
    }
}

#[derive(Debug)]
struct Inode {
    ino: u64,
    kind: FileType,
    perm: u32,
    lock: FsLock,
    data: RwLock<Vec<u8>>,
    times: Mutex<Times>,
}

impl Inode {
    fn new(ino: u64, kind: FileType, mode: Mode) -> Self {
        Self {
            ino,
            kind,
            perm: mode.perm(),
            lock: FsLock::new(),
            data: RwLock::new(Vec::new()),
            times: Mutex::new(Times::now()),
        }
    }

    fn touch_modified(&self) {
        let now = SystemTime::now();
        let mut times = self.times.lock();
        times.mtime = now;
        times.ctime = now;
    }
}

/// In-memory filesystem backend.
#[derive(Debug)]
pub struct RamFs {
    lock: FsLock,
    /// Keyed by normalised absolute path; the root is `/`.
    tree: RwLock<BTreeMap<String, Arc<Inode>>>,
    next_ino: AtomicU64,
}

impl Default for RamFs {
    fn default() -> Self {
        Self::new()
    }
}

impl RamFs {
    /// Create an empty filesystem holding only its root directory.
    pub fn new() -> Self {
        let mut tree = BTreeMap::new();
        tree.insert(
            "/".to_string(),
            Arc::new(Inode::new(ROOT_INO, FileType::Directory, Mode::DEFAULT_DIR)),
        );
        Self {
            lock: FsLock::new(),
            tree: RwLock::new(tree),
            next_ino: AtomicU64::new(ROOT_INO + 1),
        }
    }

    /// Create a directory. The parent must already exist.
    pub fn mkdir(&self, path: &str, mode: Mode) -> VfsResult<()> {
        let path = normalize(path);
        let mut tree = self.tree.write();
        if tree.contains_key(&path) {
            return Err(VfsError::already_exists(path));
        }
        Self::check_parent(&tree, &path)?;

        let inode = Inode::new(self.alloc_ino(), FileType::Directory, mode);
        tree.insert(path, Arc::new(inode));
        Ok(())
    }

    fn alloc_ino(&self) -> u64 {
        self.next_ino.fetch_add(1, Ordering::Relaxed)
    }

    fn check_parent(tree: &BTreeMap<String, Arc<Inode>>, path: &str) -> VfsResult<()> {
        let parent = parent_of(path);
        match tree.get(parent) {
            Some(inode) if inode.kind.is_dir() => Ok(()),
            Some(_) => Err(VfsError::not_a_directory(parent)),
            None => Err(VfsError::not_found(parent)),
        }
    }

    /// Look up `path`, creating a regular file when `O_CREAT` allows it.
    fn lookup_or_create(&self, path: &str, flags: OpenFlags, mode: Mode) -> VfsResult<Arc<Inode>> {
        if let Some(inode) = self.tree.read().get(path) {
            if flags.contains(OpenFlags::CREAT | OpenFlags::EXCL) {
                return Err(VfsError::already_exists(path));
            }
            return Ok(Arc::clone(inode));
        }
        if !flags.creates() {
            return Err(VfsError::not_found(path));
        }

        let mut tree = self.tree.write();
        // Lost a race with another creator.
        if let Some(inode) = tree.get(path) {
            if flags.contains(OpenFlags::EXCL) {
                return Err(VfsError::already_exists(path));
            }
            return Ok(Arc::clone(inode));
        }
        Self::check_parent(&tree, path)?;

        let inode = Arc::new(Inode::new(self.alloc_ino(), FileType::File, mode));
        tree.insert(path.to_string(), Arc::clone(&inode));
        Ok(inode)
    }

    /// Sorted names and inodes of the direct children of `dir`.
    fn children(&self, dir: &str) -> Vec<(String, Arc<Inode>)> {
        let tree = self.tree.read();
        let mut children: Vec<_> = tree
            .iter()
            .filter(|(path, _)| path.as_str() != "/" && parent_of(path) == dir)
            .map(|(path, inode)| (file_name(path).to_string(), Arc::clone(inode)))
            .collect();
        children.sort_by(|a, b| a.0.cmp(&b.0));
        children
    }

    fn downcast(handle: &dyn HandleOps) -> VfsResult<&RamHandle> {
        handle
            .as_any()
            .downcast_ref::<RamHandle>()
            .ok_or(VfsError::BadHandle)
    }
}

impl FilesystemOps for RamFs {
    fn fs_type(&self) -> &'static str {
        "ramfs"
    }

    fn lock(&self) -> &FsLock {
        &self.lock
    }

    fn open(
        &self,
        fs: &Filesystem,
        path: &str,
        flags: OpenFlags,
        mode: Mode,
    ) -> VfsResult<Box<dyn HandleOps>> {
        let path = normalize(path);
        let inode = self.lookup_or_create(&path, flags, mode)?;

        if inode.kind.is_dir() {
            if flags.is_writable() {
                return Err(VfsError::is_a_directory(path));
            }
        } else if flags.contains(OpenFlags::DIRECTORY) {
            return Err(VfsError::not_a_directory(path));
        }

        if flags.contains(OpenFlags::TRUNC) && flags.is_writable() {
            let _token = inode.lock.exclusive();
            inode.data.write().clear();
            inode.touch_modified();
        }

        Ok(Box::new(RamHandle {
            dev: fs.device_id(),
            path,
            inode,
            state: Mutex::new(HandleState { pos: 0, flags }),
        }))
    }

    fn close(&self, handle: &dyn HandleOps) {
        if let Ok(handle) = Self::downcast(handle) {
            tracing::trace!(path = %handle.path, ino = handle.inode.ino, "ramfs handle released");
        }
    }

    fn dup(&self, handle: &dyn HandleOps) -> VfsResult<Box<dyn HandleOps>> {
        let handle = Self::downcast(handle)?;
        let state = *handle.state.lock();
        Ok(Box::new(RamHandle {
            dev: handle.dev,
            path: handle.path.clone(),
            inode: Arc::clone(&handle.inode),
            state: Mutex::new(state),
        }))
    }

    fn getdents(&self, handle: &dyn HandleOps, buf: &mut [u8]) -> VfsResult<usize> {
        let handle = Self::downcast(handle)?;
        if !handle.inode.kind.is_dir() {
            return Err(VfsError::not_a_directory(handle.path.clone()));
        }

        let children = self.children(&handle.path);
        let mut state = handle.state.lock();
        let start = usize::try_from(state.pos).unwrap_or(usize::MAX);
        let Some(pending) = children.get(start..) else {
            return Ok(0);
        };

        let Some((first, _)) = pending.first() else {
            return Ok(0);
        };
        if buf.len() < record_len(first.len()) {
            return Err(VfsError::invalid_argument(format!(
                "getdents buffer of {} bytes cannot hold a {} byte record",
                buf.len(),
                record_len(first.len())
            )));
        }

        let mut writer = DirentWriter::new(buf);
        let mut emitted = 0u64;
        for (name, inode) in pending {
            let next = state.pos + emitted + 1;
            if !writer.push(inode.ino, next as i64, inode.kind, name)? {
                break;
            }
            emitted += 1;
        }

        state.pos += emitted;
        Ok(writer.written())
    }
}

#[derive(Debug, Clone, Copy)]
struct HandleState {
    pos: u64,
    flags: OpenFlags,
}

/// An open ramfs file or directory.
#[derive(Debug)]
struct RamHandle {
    dev: DeviceId,
    path: String,
    inode: Arc<Inode>,
    state: Mutex<HandleState>,
}

impl HandleOps for RamHandle {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::READ
            | Capabilities::WRITE
            | Capabilities::SEEK
            | Capabilities::FCNTL
            | Capabilities::HANDLE_LOCKS
    }

    fn stat(&self) -> VfsResult<Stat> {
        let size = self.inode.data.read().len() as u64;
        let times = *self.inode.times.lock();
        Ok(Stat {
            dev: self.dev,
            ino: self.inode.ino,
            kind: self.inode.kind,
            perm: self.inode.perm,
            nlink: if self.inode.kind.is_dir() { 2 } else { 1 },
            uid: 0,
            gid: 0,
            rdev: 0,
            size,
            blksize: BLOCK_SIZE,
            blocks: size.div_ceil(512),
            atime: times.atime,
            mtime: times.mtime,
            ctime: times.ctime,
        })
    }

    fn read(&self, buf: &mut [u8]) -> VfsResult<usize> {
        if self.inode.kind.is_dir() {
            return Err(VfsError::is_a_directory(self.path.clone()));
        }
        let mut state = self.state.lock();
        if !state.flags.is_readable() {
            return Err(VfsError::permission_denied(format!(
                "{} not open for reading",
                self.path
            )));
        }

        let data = self.inode.data.read();
        let start = usize::try_from(state.pos).unwrap_or(usize::MAX).min(data.len());
        let n = buf.len().min(data.len() - start);
        buf[..n].copy_from_slice(&data[start..start + n]);
        state.pos += n as u64;
        self.inode.times.lock().atime = SystemTime::now();
        Ok(n)
    }

    fn write(&self, buf: &[u8]) -> VfsResult<usize> {
        let mut state = self.state.lock();
        if !state.flags.is_writable() {
            return Err(VfsError::permission_denied(format!(
                "{} not open for writing",
                self.path
            )));
        }

        let mut data = self.inode.data.write();
        let start = if state.flags.contains(OpenFlags::APPEND) {
            data.len() as u64
        } else {
            state.pos
        };
        let end = start
            .checked_add(buf.len() as u64)
            .filter(|end| *end <= MAX_FILE_SIZE)
            .ok_or_else(|| {
                VfsError::file_too_large(format!("{} (write at {start})", self.path))
            })?;
        // Both are at most MAX_FILE_SIZE.
        let (start, end) = (start as usize, end as usize);
        let len = data.len();
        if end > len {
            data.try_reserve(end - len)
                .map_err(|_| VfsError::Backend(errno::ENOMEM))?;
            data.resize(end, 0);
        }
        data[start..end].copy_from_slice(buf);
        state.pos = end as u64;
        drop(data);

        self.inode.touch_modified();
        Ok(buf.len())
    }

    fn seek(&self, offset: i64, whence: Whence) -> VfsResult<u64> {
        let mut state = self.state.lock();
        let base = match whence {
            Whence::Set => 0,
            Whence::Cur => state.pos as i64,
            Whence::End => self.inode.data.read().len() as i64,
        };
        let pos = base
            .checked_add(offset)
            .filter(|pos| *pos >= 0)
            .ok_or_else(|| {
                VfsError::invalid_argument(format!("seek {offset} from {whence:?} on {}", self.path))
            })?;
        state.pos = pos as u64;
        Ok(state.pos)
    }

    fn fcntl(&self, cmd: i32, arg: i32) -> VfsResult<i32> {
        let mut state = self.state.lock();
        match cmd {
            F_GETFL => Ok(state.flags.bits() as i32),
            F_SETFL => {
                let requested = OpenFlags::from_bits_truncate(arg as u32);
                state.flags = state.flags.difference(OpenFlags::STATUS_MUTABLE)
                    | requested.intersection(OpenFlags::STATUS_MUTABLE);
                Ok(0)
            }
            other => Err(VfsError::invalid_argument(format!("fcntl command {other}"))),
        }
    }

    fn lock(&self, _mode: LockMode) -> Option<&FsLock> {
        Some(&self.inode.lock)
    }
}

/// Normalise to an absolute path: collapse separators, resolve `.` and `..`.
fn normalize(path: &str) -> String {
    let mut parts: Vec<&str> = Vec::new();
    for part in path.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            name => parts.push(name),
        }
    }
    format!("/{}", parts.join("/"))
}

fn parent_of(path: &str) -> &str {
    match path.rfind('/') {
        Some(0) | None => "/",
        Some(idx) => &path[..idx],
    }
}

fn file_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}
