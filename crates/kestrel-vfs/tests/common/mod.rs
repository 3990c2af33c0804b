//! Shared fixtures for the dispatcher integration tests.
//!
//! [`SpyFs`] is a backend whose handles record, for every call that reaches
//! them, which locks were held at the time. Tests assert on that log instead
//! of on timing.

#![allow(dead_code)]

use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

use kestrel_vfs::dirent::DirentWriter;
use kestrel_vfs::{
    Capabilities, DeviceId, FileType, Filesystem, FilesystemOps, FsLock, HandleId, HandleOps,
    LockMode, LockState, Mode, OpenFlags, ProcessHooks, Stat, VfsError, VfsResult,
    WaitCondition, Whence,
};
use parking_lot::{Condvar, Mutex};

/// Route `tracing` output through the test harness. `RUST_LOG` selects what
/// is shown.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

// ============================================================================
// Call log
// ============================================================================

/// One call observed by a spy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Observed {
    pub op: &'static str,
    pub fs_lock: LockState,
    /// `None` when the spy has no handle-level lock.
    pub handle_lock: Option<LockState>,
}

#[derive(Debug, Default)]
pub struct CallLog {
    calls: Mutex<Vec<Observed>>,
}

impl CallLog {
    pub fn push(&self, observed: Observed) {
        self.calls.lock().push(observed);
    }

    pub fn ops(&self) -> Vec<&'static str> {
        self.calls.lock().iter().map(|o| o.op).collect()
    }

    pub fn count(&self, op: &str) -> usize {
        self.calls.lock().iter().filter(|o| o.op == op).count()
    }

    /// The most recent call to `op`.
    pub fn last(&self, op: &str) -> Option<Observed> {
        self.calls.lock().iter().rev().find(|o| o.op == op).copied()
    }

    pub fn clear(&self) {
        self.calls.lock().clear();
    }
}

// ============================================================================
// Spy backend
// ============================================================================

/// Blocks callers until `expected` of them have arrived, or a timeout.
#[derive(Debug)]
struct Rendezvous {
    expected: usize,
    arrived: Mutex<usize>,
    cond: Condvar,
}

impl Rendezvous {
    /// Returns true if every expected caller arrived in time.
    fn meet(&self, timeout: Duration) -> bool {
        let mut arrived = self.arrived.lock();
        *arrived += 1;
        if *arrived >= self.expected {
            self.cond.notify_all();
            return true;
        }
        let deadline = std::time::Instant::now() + timeout;
        while *arrived < self.expected {
            if self.cond.wait_until(&mut arrived, deadline).timed_out() {
                return *arrived >= self.expected;
            }
        }
        true
    }
}

#[derive(Debug)]
struct SpyShared {
    caps: Capabilities,
    fs_lock: FsLock,
    handle_lock: Option<FsLock>,
    log: Arc<CallLog>,
    data: Mutex<Vec<u8>>,
    wait: Arc<WaitCondition>,
    readers: Option<Rendezvous>,
    met: Mutex<Vec<bool>>,
    opened: Mutex<Vec<String>>,
}

impl SpyShared {
    fn record(&self, op: &'static str) {
        self.log.push(Observed {
            op,
            fs_lock: self.fs_lock.state(),
            handle_lock: self.handle_lock.as_ref().map(FsLock::state),
        });
    }
}

/// A backend that records lock state on every call.
#[derive(Debug)]
pub struct SpyFs {
    shared: Arc<SpyShared>,
}

impl SpyFs {
    /// A spy whose handles advertise `caps`. A handle-level lock is
    /// created when `caps` includes either lock override.
    pub fn new(caps: Capabilities) -> Self {
        let handle_lock = caps.intersects(Capabilities::HANDLE_LOCKS).then(FsLock::new);
        Self::build(caps, handle_lock, None)
    }

    /// A spy that advertises a lock override without supplying a lock.
    pub fn lying(caps: Capabilities) -> Self {
        Self::build(caps | Capabilities::EXCLUSIVE_LOCK, None, None)
    }

    /// A spy whose `read` waits until `readers` reads are inside it at once.
    pub fn with_reader_rendezvous(caps: Capabilities, readers: usize) -> Self {
        let rendezvous = Rendezvous {
            expected: readers,
            arrived: Mutex::new(0),
            cond: Condvar::new(),
        };
        Self::build(caps, None, Some(rendezvous))
    }

    fn build(caps: Capabilities, handle_lock: Option<FsLock>, readers: Option<Rendezvous>) -> Self {
        Self {
            shared: Arc::new(SpyShared {
                caps,
                fs_lock: FsLock::new(),
                handle_lock,
                log: Arc::new(CallLog::default()),
                data: Mutex::new(Vec::new()),
                wait: Arc::new(WaitCondition::new()),
                readers,
                met: Mutex::new(Vec::new()),
                opened: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn log(&self) -> Arc<CallLog> {
        Arc::clone(&self.shared.log)
    }

    pub fn fs_lock(&self) -> FsLock {
        self.shared.fs_lock.clone()
    }

    pub fn handle_lock(&self) -> Option<FsLock> {
        self.shared.handle_lock.clone()
    }

    /// Every path passed to `open`, in call order.
    pub fn opened_paths(&self) -> Vec<String> {
        self.shared.opened.lock().clone()
    }

    pub fn contents(&self) -> Vec<u8> {
        self.shared.data.lock().clone()
    }

    /// Rendezvous outcomes of every `read` so far.
    pub fn rendezvous_results(&self) -> Vec<bool> {
        self.shared.met.lock().clone()
    }

    pub fn wait_condition(&self) -> Arc<WaitCondition> {
        Arc::clone(&self.shared.wait)
    }
}

impl FilesystemOps for SpyFs {
    fn fs_type(&self) -> &'static str {
        "spy"
    }

    fn lock(&self) -> &FsLock {
        &self.shared.fs_lock
    }

    fn open(
        &self,
        fs: &Filesystem,
        path: &str,
        _flags: OpenFlags,
        _mode: Mode,
    ) -> VfsResult<Box<dyn HandleOps>> {
        self.shared.record("open");
        self.shared.opened.lock().push(path.to_string());
        if path == "/missing" {
            return Err(VfsError::not_found(path));
        }
        Ok(Box::new(SpyHandle {
            shared: Arc::clone(&self.shared),
            dev: fs.device_id(),
            path: path.to_string(),
        }))
    }

    fn close(&self, _handle: &dyn HandleOps) {
        self.shared.record("close");
    }

    fn dup(&self, handle: &dyn HandleOps) -> VfsResult<Box<dyn HandleOps>> {
        self.shared.record("dup");
        let handle = handle
            .as_any()
            .downcast_ref::<SpyHandle>()
            .ok_or(VfsError::BadHandle)?;
        Ok(Box::new(SpyHandle {
            shared: Arc::clone(&self.shared),
            dev: handle.dev,
            path: handle.path.clone(),
        }))
    }

    fn getdents(&self, _handle: &dyn HandleOps, buf: &mut [u8]) -> VfsResult<usize> {
        self.shared.record("getdents");
        let mut writer = DirentWriter::new(buf);
        writer.push(7, 1, FileType::File, "spy")?;
        Ok(writer.written())
    }
}

/// A handle on a [`SpyFs`]. Its path is what the backend was asked to open.
#[derive(Debug)]
pub struct SpyHandle {
    shared: Arc<SpyShared>,
    dev: DeviceId,
    pub path: String,
}

impl HandleOps for SpyHandle {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn capabilities(&self) -> Capabilities {
        self.shared.caps
    }

    fn stat(&self) -> VfsResult<Stat> {
        self.shared.record("stat");
        let now = std::time::SystemTime::now();
        Ok(Stat {
            dev: self.dev,
            ino: 7,
            kind: FileType::CharDevice,
            perm: 0o600,
            nlink: 1,
            uid: 0,
            gid: 0,
            rdev: 0,
            size: self.shared.data.lock().len() as u64,
            blksize: 512,
            blocks: 0,
            atime: now,
            mtime: now,
            ctime: now,
        })
    }

    fn read(&self, buf: &mut [u8]) -> VfsResult<usize> {
        self.shared.record("read");
        if let Some(readers) = &self.shared.readers {
            let met = readers.meet(Duration::from_secs(5));
            self.shared.met.lock().push(met);
        }
        let data = self.shared.data.lock();
        let n = buf.len().min(data.len());
        buf[..n].copy_from_slice(&data[..n]);
        Ok(n)
    }

    fn write(&self, buf: &[u8]) -> VfsResult<usize> {
        self.shared.record("write");
        self.shared.data.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn seek(&self, offset: i64, _whence: Whence) -> VfsResult<u64> {
        self.shared.record("seek");
        Ok(offset.max(0) as u64)
    }

    fn ioctl(&self, request: usize, arg: usize) -> VfsResult<i32> {
        self.shared.record("ioctl");
        Ok((request + arg) as i32)
    }

    fn fcntl(&self, cmd: i32, _arg: i32) -> VfsResult<i32> {
        self.shared.record("fcntl");
        Ok(cmd)
    }

    fn lock(&self, _mode: LockMode) -> Option<&FsLock> {
        self.shared.handle_lock.as_ref()
    }

    fn read_ready(&self) -> bool {
        self.shared.record("read_ready");
        false
    }

    fn write_ready(&self) -> bool {
        self.shared.record("write_ready");
        false
    }

    fn except_ready(&self) -> bool {
        self.shared.record("except_ready");
        true
    }

    fn read_wait_condition(&self) -> Option<Arc<WaitCondition>> {
        Some(Arc::clone(&self.shared.wait))
    }

    fn write_wait_condition(&self) -> Option<Arc<WaitCondition>> {
        Some(Arc::clone(&self.shared.wait))
    }

    fn except_wait_condition(&self) -> Option<Arc<WaitCondition>> {
        Some(Arc::clone(&self.shared.wait))
    }
}

// ============================================================================
// Process hooks
// ============================================================================

/// Records close notifications into a spy's log and keeps the ids.
#[derive(Debug)]
pub struct RecordingHooks {
    log: Arc<CallLog>,
    closed: Mutex<Vec<HandleId>>,
}

impl RecordingHooks {
    pub fn new(log: Arc<CallLog>) -> Self {
        Self {
            log,
            closed: Mutex::new(Vec::new()),
        }
    }

    pub fn closed(&self) -> Vec<HandleId> {
        self.closed.lock().clone()
    }
}

impl ProcessHooks for RecordingHooks {
    fn notify_handle_closing(&self, handle: HandleId) {
        self.log.push(Observed {
            op: "notify_closing",
            fs_lock: LockState::Unlocked,
            handle_lock: None,
        });
        self.closed.lock().push(handle);
    }
}
