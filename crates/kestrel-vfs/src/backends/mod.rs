//! Filesystem backends.
//!
//! Backends implement [`FilesystemOps`](crate::ops::FilesystemOps) and hand
//! out [`HandleOps`](crate::ops::HandleOps) values from `open`.

mod ramfs;

pub use ramfs::{F_GETFL, F_SETFL, MAX_FILE_SIZE, RamFs};
