//! Mount table with longest-prefix resolution.
//!
//! Mountpoint paths always end with `/`; the root mountpoint is exactly `/`.
//! A path resolves to the mountpoint with the longest prefix match that ends
//! on a component boundary, so `/dev/` serves `/dev/tty0` and `/dev` but not
//! `/device`.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use serde::Serialize;

use crate::error::{VfsError, VfsResult};
use crate::lock::FsLock;
use crate::ops::FilesystemOps;
use crate::types::DeviceId;

/// A mounted filesystem instance.
///
/// The reference count starts at 1 for the mount itself and moves by one
/// for every handle opened, duplicated or closed. While mounted it never
/// drops below 1; unmounting is only allowed once it is back to 1.
pub struct Filesystem {
    device_id: DeviceId,
    backend: Arc<dyn FilesystemOps>,
    ref_count: AtomicUsize,
}

impl fmt::Debug for Filesystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Filesystem")
            .field("device_id", &self.device_id)
            .field("fs_type", &self.fs_type())
            .field("ref_count", &self.ref_count())
            .finish()
    }
}

impl Filesystem {
    /// Wrap a backend. The new instance holds its mount reference.
    pub fn new(device_id: DeviceId, backend: Arc<dyn FilesystemOps>) -> Self {
        Self {
            device_id,
            backend,
            ref_count: AtomicUsize::new(1),
        }
    }

    pub fn device_id(&self) -> DeviceId {
        self.device_id
    }

    pub fn fs_type(&self) -> &'static str {
        self.backend.fs_type()
    }

    pub fn backend(&self) -> &dyn FilesystemOps {
        self.backend.as_ref()
    }

    /// Mount reference plus one per open handle.
    pub fn ref_count(&self) -> usize {
        self.ref_count.load(Ordering::Acquire)
    }

    /// The filesystem-level lock.
    pub fn lock(&self) -> &FsLock {
        self.backend.lock()
    }

    pub(crate) fn retain(&self) {
        self.ref_count.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn release(&self) {
        let prev = self.ref_count.fetch_sub(1, Ordering::AcqRel);
        assert!(
            prev > 1,
            "{} ref_count dropped to zero while mounted",
            self.device_id
        );
    }
}

/// A path prefix bound to a filesystem.
#[derive(Clone)]
pub struct Mountpoint {
    path: Arc<str>,
    filesystem: Arc<Filesystem>,
}

impl fmt::Debug for Mountpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mountpoint")
            .field("path", &self.path)
            .field("filesystem", &self.filesystem)
            .finish()
    }
}

impl Mountpoint {
    /// # Panics
    ///
    /// If `path` is not absolute or does not end with `/`.
    pub fn new(path: &str, filesystem: Arc<Filesystem>) -> Self {
        assert!(
            path.starts_with('/') && path.ends_with('/'),
            "mountpoint path must start and end with '/': {path:?}"
        );
        Self {
            path: Arc::from(path),
            filesystem,
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn filesystem(&self) -> &Arc<Filesystem> {
        &self.filesystem
    }
}

/// Information about a mount point.
#[derive(Debug, Clone, Serialize)]
pub struct MountInfo {
    /// The mount path (e.g., "/mnt/usb/").
    pub path: String,
    pub fs_type: &'static str,
    pub device_id: DeviceId,
    pub ref_count: usize,
}

/// Result of resolving an absolute path.
#[derive(Debug, Clone)]
pub struct Resolved<'p> {
    pub mountpoint: Mountpoint,
    /// Number of leading bytes of the path matched by the mountpoint.
    pub matched_len: usize,
    /// Path handed to the backend; always starts with `/`.
    pub residual: &'p str,
}

impl Resolved<'_> {
    pub fn filesystem(&self) -> &Arc<Filesystem> {
        self.mountpoint.filesystem()
    }
}

/// Length of the match between mountpoint `mp` and absolute `path`, or 0
/// for no match.
///
/// The match must cover the whole mountpoint, with one exception: `path`
/// may equal `mp` without its trailing slash (`/dev` against `/dev/`).
///
/// # Panics
///
/// If `mp` does not end with `/`.
pub fn match_len(mp: &str, path: &str) -> usize {
    let (mp, path) = (mp.as_bytes(), path.as_bytes());
    assert_eq!(mp.last(), Some(&b'/'), "mountpoint must end with '/'");

    let m = mp.iter().zip(path).take_while(|(a, b)| a == b).count();
    if m == 0 {
        return 0;
    }

    if m < mp.len() {
        if mp[m] == b'/' && m + 1 == mp.len() && m == path.len() {
            return m;
        }
        return 0;
    }

    // The whole mountpoint matched; its last byte is '/', so the match ends
    // on a component boundary of `path`.
    if path[m - 1] != b'/' {
        return 0;
    }
    m
}

/// Registry of mountpoints.
///
/// Iteration follows insertion order. Mutation must not race a resolution
/// pass; the dispatcher keeps the table behind a lock for that.
#[derive(Debug)]
pub struct MountTable {
    entries: Vec<Mountpoint>,
    capacity: usize,
}

impl MountTable {
    /// Create an empty table holding at most `capacity` mountpoints.
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Vec::with_capacity(capacity),
            capacity,
        }
    }

    pub fn add(&mut self, mountpoint: Mountpoint) -> VfsResult<()> {
        if self.get(mountpoint.path()).is_some() {
            return Err(VfsError::already_mounted(mountpoint.path()));
        }
        if self.entries.len() >= self.capacity {
            return Err(VfsError::TooManyMounts(self.capacity));
        }
        self.entries.push(mountpoint);
        Ok(())
    }

    /// Remove the mountpoint registered at exactly `path`.
    pub fn remove(&mut self, path: &str) -> Option<Mountpoint> {
        let idx = self.entries.iter().position(|mp| mp.path() == path)?;
        Some(self.entries.remove(idx))
    }

    pub fn get(&self, path: &str) -> Option<&Mountpoint> {
        self.entries.iter().find(|mp| mp.path() == path)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Mountpoint> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// List all current mounts.
    pub fn list(&self) -> Vec<MountInfo> {
        self.entries
            .iter()
            .map(|mp| MountInfo {
                path: mp.path().to_string(),
                fs_type: mp.filesystem().fs_type(),
                device_id: mp.filesystem().device_id(),
                ref_count: mp.filesystem().ref_count(),
            })
            .collect()
    }

    /// Find the mountpoint with the longest match for `path`.
    ///
    /// On equal lengths the first mountpoint in iteration order wins.
    pub fn resolve<'p>(&self, path: &'p str) -> Option<Resolved<'p>> {
        let mut best: Option<(&Mountpoint, usize)> = None;

        for mp in &self.entries {
            let len = match_len(mp.path(), path);
            if len > best.map_or(0, |(_, best_len)| best_len) {
                best = Some((mp, len));
            }
        }

        let (mp, matched_len) = best?;
        let residual = if matched_len < path.len() {
            &path[matched_len - 1..]
        } else {
            "/"
        };

        Some(Resolved {
            mountpoint: mp.clone(),
            matched_len,
            residual,
        })
    }
}
