//! Two-tier shared/exclusive locking.
//!
//! Every filesystem supplies an [`FsLock`]. A handle may supply its own lock
//! for either mode; where it does not, operations on it fall back to the
//! filesystem lock. Which tier serves each mode is decided once per handle
//! ([`LockPolicy::for_handle`]) and the resulting [`LockToken`] owns its
//! guard, so the release always goes to the lock that was acquired.
//!
//! Ordering rule: a task never requests the filesystem lock while holding a
//! handle lock of the same filesystem. The dispatcher takes exactly one
//! token per operation, which keeps that rule trivially.

use std::fmt;
use std::sync::Arc;

use parking_lot::{ArcRwLockReadGuard, ArcRwLockWriteGuard, RawRwLock, RwLock};

use crate::ops::{Capabilities, HandleOps};

/// Lock acquisition mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum LockMode {
    Shared,
    Exclusive,
}

/// Which lock serves a handle operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum LockTier {
    /// The handle's own lock.
    Handle,
    /// The owning filesystem's lock.
    Filesystem,
}

/// Observed state of an [`FsLock`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockState {
    Unlocked,
    Shared,
    Exclusive,
}

/// A shared/exclusive lock primitive supplied by a backend.
///
/// Cloning yields another reference to the same lock. Acquisition blocks
/// and cannot fail.
#[derive(Clone)]
pub struct FsLock {
    inner: Option<Arc<RwLock<()>>>,
}

impl Default for FsLock {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for FsLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FsLock")
            .field("state", &self.state())
            .field("nolock", &self.inner.is_none())
            .finish()
    }
}

impl FsLock {
    /// A reader/writer lock.
    pub fn new() -> Self {
        Self {
            inner: Some(Arc::new(RwLock::new(()))),
        }
    }

    /// A lock that never blocks, for backends with nothing to serialise.
    pub fn nolock() -> Self {
        Self { inner: None }
    }

    pub fn is_nolock(&self) -> bool {
        self.inner.is_none()
    }

    /// Acquire in `mode`, blocking until available.
    pub fn acquire(&self, mode: LockMode) -> LockToken {
        let guard = match (&self.inner, mode) {
            (None, _) => Guard::Unlocked,
            (Some(lock), LockMode::Shared) => Guard::Shared(lock.read_arc()),
            (Some(lock), LockMode::Exclusive) => Guard::Exclusive(lock.write_arc()),
        };
        LockToken {
            _guard: guard,
            mode,
            tier: None,
        }
    }

    pub fn shared(&self) -> LockToken {
        self.acquire(LockMode::Shared)
    }

    pub fn exclusive(&self) -> LockToken {
        self.acquire(LockMode::Exclusive)
    }

    /// Current state. Racy by nature; meant for assertions and diagnostics.
    pub fn state(&self) -> LockState {
        match &self.inner {
            None => LockState::Unlocked,
            Some(lock) if lock.is_locked_exclusive() => LockState::Exclusive,
            Some(lock) if lock.is_locked() => LockState::Shared,
            Some(_) => LockState::Unlocked,
        }
    }

    /// Whether two values refer to the same underlying lock.
    pub fn same_lock(&self, other: &FsLock) -> bool {
        match (&self.inner, &other.inner) {
            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

enum Guard {
    Shared(ArcRwLockReadGuard<RawRwLock, ()>),
    Exclusive(ArcRwLockWriteGuard<RawRwLock, ()>),
    Unlocked,
}

/// A held lock. Dropping it unlocks.
#[must_use = "the lock is released as soon as the token is dropped"]
pub struct LockToken {
    _guard: Guard,
    mode: LockMode,
    tier: Option<LockTier>,
}

impl LockToken {
    pub fn mode(&self) -> LockMode {
        self.mode
    }

    /// The tier this token was taken on, when acquired through a
    /// [`LockPolicy`].
    pub fn tier(&self) -> Option<LockTier> {
        self.tier
    }

    /// Release explicitly. Equivalent to dropping the token.
    pub fn unlock(self) {}

    fn in_tier(mut self, tier: LockTier) -> Self {
        self.tier = Some(tier);
        self
    }
}

impl fmt::Debug for LockToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockToken")
            .field("mode", &self.mode)
            .field("tier", &self.tier)
            .finish()
    }
}

/// Per-handle choice of lock tier for each mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockPolicy {
    shared: LockTier,
    exclusive: LockTier,
}

impl LockPolicy {
    /// Both modes served by the filesystem lock.
    pub const FILESYSTEM: LockPolicy = LockPolicy {
        shared: LockTier::Filesystem,
        exclusive: LockTier::Filesystem,
    };

    /// Derive the policy from a handle's capability table.
    ///
    /// # Panics
    ///
    /// If the handle advertises a lock override but does not supply the
    /// lock. That is a backend bug the dispatcher cannot work around.
    pub fn for_handle(handle: &dyn HandleOps) -> Self {
        let caps = handle.capabilities();
        Self {
            shared: Self::tier_for(handle, caps, LockMode::Shared),
            exclusive: Self::tier_for(handle, caps, LockMode::Exclusive),
        }
    }

    fn tier_for(handle: &dyn HandleOps, caps: Capabilities, mode: LockMode) -> LockTier {
        if !caps.contains(Capabilities::lock_flag(mode)) {
            return LockTier::Filesystem;
        }
        assert!(
            handle.lock(mode).is_some(),
            "handle advertises a {mode} lock override but supplies no lock"
        );
        LockTier::Handle
    }

    pub fn tier(&self, mode: LockMode) -> LockTier {
        match mode {
            LockMode::Shared => self.shared,
            LockMode::Exclusive => self.exclusive,
        }
    }

    /// Acquire `mode` on whichever tier this policy selects.
    pub fn acquire(&self, mode: LockMode, handle: &dyn HandleOps, fs_lock: &FsLock) -> LockToken {
        match self.tier(mode) {
            LockTier::Handle => {
                let lock = handle
                    .lock(mode)
                    .unwrap_or_else(|| panic!("handle withdrew its {mode} lock override"));
                lock.acquire(mode).in_tier(LockTier::Handle)
            }
            LockTier::Filesystem => fs_lock.acquire(mode).in_tier(LockTier::Filesystem),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::VfsResult;
    use crate::types::Stat;
    use std::any::Any;
    use std::sync::mpsc;
    use std::thread;
    use std::time::Duration;

    struct StubHandle {
        caps: Capabilities,
        lock: Option<FsLock>,
    }

    impl HandleOps for StubHandle {
        fn as_any(&self) -> &dyn Any {
            self
        }

        fn capabilities(&self) -> Capabilities {
            self.caps
        }

        fn stat(&self) -> VfsResult<Stat> {
            unreachable!("not used by lock tests")
        }

        fn lock(&self, _mode: LockMode) -> Option<&FsLock> {
            self.lock.as_ref()
        }
    }

    #[test]
    fn test_shared_holders_coexist() {
        let lock = FsLock::new();
        let first = lock.shared();
        let (tx, rx) = mpsc::channel();
        let other = lock.clone();
        let reader = thread::spawn(move || {
            let second = other.shared();
            tx.send(second.mode()).unwrap();
        });
        assert_eq!(
            rx.recv_timeout(Duration::from_secs(5)).unwrap(),
            LockMode::Shared
        );
        reader.join().unwrap();
        drop(first);
    }

    #[test]
    fn test_exclusive_waits_for_shared_release() {
        let lock = FsLock::new();
        let reader = lock.shared();
        assert_eq!(lock.state(), LockState::Shared);

        let (tx, rx) = mpsc::channel();
        let other = lock.clone();
        let writer = thread::spawn(move || {
            let _token = other.exclusive();
            tx.send(()).unwrap();
        });

        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
        reader.unlock();
        rx.recv_timeout(Duration::from_secs(5)).unwrap();
        writer.join().unwrap();
        assert_eq!(lock.state(), LockState::Unlocked);
    }

    #[test]
    fn test_nolock_never_blocks() {
        let lock = FsLock::nolock();
        let _a = lock.exclusive();
        let _b = lock.exclusive();
        assert_eq!(lock.state(), LockState::Unlocked);
    }

    #[test]
    fn test_policy_falls_back_to_filesystem() {
        let handle = StubHandle {
            caps: Capabilities::READ,
            lock: None,
        };
        assert_eq!(LockPolicy::for_handle(&handle), LockPolicy::FILESYSTEM);

        let fs_lock = FsLock::new();
        let token = LockPolicy::FILESYSTEM.acquire(LockMode::Exclusive, &handle, &fs_lock);
        assert_eq!(token.tier(), Some(LockTier::Filesystem));
        assert_eq!(fs_lock.state(), LockState::Exclusive);
    }

    #[test]
    fn test_policy_per_mode_override() {
        let handle_lock = FsLock::new();
        let handle = StubHandle {
            caps: Capabilities::SHARED_LOCK,
            lock: Some(handle_lock.clone()),
        };
        let policy = LockPolicy::for_handle(&handle);
        assert_eq!(policy.tier(LockMode::Shared), LockTier::Handle);
        assert_eq!(policy.tier(LockMode::Exclusive), LockTier::Filesystem);

        let fs_lock = FsLock::new();
        let token = policy.acquire(LockMode::Shared, &handle, &fs_lock);
        assert_eq!(token.tier(), Some(LockTier::Handle));
        assert_eq!(handle_lock.state(), LockState::Shared);
        assert_eq!(fs_lock.state(), LockState::Unlocked);
    }

    #[test]
    #[should_panic(expected = "supplies no lock")]
    fn test_advertised_override_without_lock_panics() {
        let handle = StubHandle {
            caps: Capabilities::EXCLUSIVE_LOCK,
            lock: None,
        };
        let _ = LockPolicy::for_handle(&handle);
    }
}
