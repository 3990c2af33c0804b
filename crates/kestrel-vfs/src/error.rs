//! VFS error types.
//!
//! Recoverable failures travel back to the caller as [`VfsError`]. Contract
//! violations (non-absolute paths handed to `open`, a filesystem reference
//! count reaching zero, malformed mountpoints) are not errors: they panic.

use std::io;
use thiserror::Error;

/// Linux errno values used by [`VfsError::errno`].
pub mod errno {
    pub const EPERM: i32 = 1;
    pub const ENOENT: i32 = 2;
    pub const EBADF: i32 = 9;
    pub const ENOMEM: i32 = 12;
    pub const EACCES: i32 = 13;
    pub const EBUSY: i32 = 16;
    pub const EEXIST: i32 = 17;
    pub const ENOTDIR: i32 = 20;
    pub const EISDIR: i32 = 21;
    pub const EINVAL: i32 = 22;
    pub const ENOTTY: i32 = 25;
    pub const EFBIG: i32 = 27;
    pub const ENOSPC: i32 = 28;
    pub const ESPIPE: i32 = 29;
    pub const ENOTEMPTY: i32 = 39;
    pub const EOPNOTSUPP: i32 = 95;
}

/// VFS error type.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum VfsError {
    /// No mountpoint or backend entry matches the path.
    #[error("not found: {0}")]
    NotFound(String),

    /// The handle is unknown or already closed.
    #[error("bad handle")]
    BadHandle,

    /// The handle's operation table has no entry for this operation.
    #[error("operation not supported: {0}")]
    NotSupported(&'static str),

    /// The handle does not support seeking.
    #[error("illegal seek")]
    NotSeekable,

    /// Invalid argument (also: fcntl on a handle without an fcntl entry).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Path already exists.
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// Expected a directory.
    #[error("not a directory: {0}")]
    NotADirectory(String),

    /// Expected a file.
    #[error("is a directory: {0}")]
    IsADirectory(String),

    /// Permission denied.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// Directory not empty.
    #[error("directory not empty: {0}")]
    DirectoryNotEmpty(String),

    /// A write would grow the file past the backend's size limit.
    #[error("file too large: {0}")]
    FileTooLarge(String),

    /// Mount path is not absolute.
    #[error("invalid path: {0}")]
    InvalidPath(String),

    /// A filesystem is already mounted at this path.
    #[error("already mounted: {0}")]
    AlreadyMounted(String),

    /// The mount table is full.
    #[error("too many mountpoints (limit {0})")]
    TooManyMounts(usize),

    /// The filesystem still has open handles.
    #[error("device or resource busy: {0}")]
    Busy(String),

    /// Raw status code reported by a backend, forwarded verbatim.
    #[error("backend error (errno {0})")]
    Backend(i32),
}

impl VfsError {
    /// Create a NotFound error.
    pub fn not_found(path: impl Into<String>) -> Self {
        Self::NotFound(path.into())
    }

    /// Create an InvalidArgument error.
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    /// Create an AlreadyExists error.
    pub fn already_exists(path: impl Into<String>) -> Self {
        Self::AlreadyExists(path.into())
    }

    /// Create a NotADirectory error.
    pub fn not_a_directory(path: impl Into<String>) -> Self {
        Self::NotADirectory(path.into())
    }

    /// Create an IsADirectory error.
    pub fn is_a_directory(path: impl Into<String>) -> Self {
        Self::IsADirectory(path.into())
    }

    /// Create a PermissionDenied error.
    pub fn permission_denied(path: impl Into<String>) -> Self {
        Self::PermissionDenied(path.into())
    }

    /// Create a DirectoryNotEmpty error.
    pub fn directory_not_empty(path: impl Into<String>) -> Self {
        Self::DirectoryNotEmpty(path.into())
    }

    /// Create a FileTooLarge error.
    pub fn file_too_large(path: impl Into<String>) -> Self {
        Self::FileTooLarge(path.into())
    }

    /// Create an InvalidPath error.
    pub fn invalid_path(path: impl Into<String>) -> Self {
        Self::InvalidPath(path.into())
    }

    /// Create an AlreadyMounted error.
    pub fn already_mounted(path: impl Into<String>) -> Self {
        Self::AlreadyMounted(path.into())
    }

    /// Create a Busy error.
    pub fn busy(path: impl Into<String>) -> Self {
        Self::Busy(path.into())
    }

    /// Positive Linux errno for this error.
    ///
    /// `NotSupported("ioctl")` maps to `ENOTTY`, which is what ioctl(2)
    /// reports for a descriptor without ioctl support.
    pub fn errno(&self) -> i32 {
        match self {
            VfsError::NotFound(_) => errno::ENOENT,
            VfsError::BadHandle => errno::EBADF,
            VfsError::NotSupported("ioctl") => errno::ENOTTY,
            VfsError::NotSupported(_) => errno::EOPNOTSUPP,
            VfsError::NotSeekable => errno::ESPIPE,
            VfsError::InvalidArgument(_) => errno::EINVAL,
            VfsError::AlreadyExists(_) => errno::EEXIST,
            VfsError::NotADirectory(_) => errno::ENOTDIR,
            VfsError::IsADirectory(_) => errno::EISDIR,
            VfsError::PermissionDenied(_) => errno::EACCES,
            VfsError::DirectoryNotEmpty(_) => errno::ENOTEMPTY,
            VfsError::FileTooLarge(_) => errno::EFBIG,
            VfsError::InvalidPath(_) => errno::EINVAL,
            VfsError::AlreadyMounted(_) => errno::EBUSY,
            VfsError::TooManyMounts(_) => errno::ENOSPC,
            VfsError::Busy(_) => errno::EBUSY,
            VfsError::Backend(code) => *code,
        }
    }

    /// Negative errno, as a syscall layer would return it.
    pub fn to_syscall_result(&self) -> isize {
        -(self.errno() as isize)
    }
}

/// Convert VfsError to std::io::Error for compatibility.
impl From<VfsError> for io::Error {
    fn from(e: VfsError) -> Self {
        match e {
            VfsError::NotFound(msg) => io::Error::new(io::ErrorKind::NotFound, msg),
            VfsError::AlreadyExists(msg) => io::Error::new(io::ErrorKind::AlreadyExists, msg),
            VfsError::PermissionDenied(msg) => {
                io::Error::new(io::ErrorKind::PermissionDenied, msg)
            }
            VfsError::NotADirectory(msg) => io::Error::new(io::ErrorKind::NotADirectory, msg),
            VfsError::IsADirectory(msg) => io::Error::new(io::ErrorKind::IsADirectory, msg),
            VfsError::DirectoryNotEmpty(msg) => {
                io::Error::new(io::ErrorKind::DirectoryNotEmpty, msg)
            }
            VfsError::FileTooLarge(msg) => io::Error::new(io::ErrorKind::FileTooLarge, msg),
            VfsError::InvalidArgument(msg) | VfsError::InvalidPath(msg) => {
                io::Error::new(io::ErrorKind::InvalidInput, msg)
            }
            VfsError::NotSupported(op) => io::Error::new(io::ErrorKind::Unsupported, op),
            VfsError::Busy(msg) | VfsError::AlreadyMounted(msg) => {
                io::Error::new(io::ErrorKind::ResourceBusy, msg)
            }
            VfsError::Backend(code) => io::Error::from_raw_os_error(code),
            other => io::Error::other(other.to_string()),
        }
    }
}

/// VFS result type.
pub type VfsResult<T> = Result<T, VfsError>;
