//! `linux_dirent64` records.
//!
//! Layout of one record (native endian):
//!
//! ```text
//! 0      8      16        18      19
//! d_ino  d_off  d_reclen  d_type  d_name... NUL [padding to 8]
//! ```
//!
//! Backends fill getdents buffers with [`DirentWriter`]; callers walk them
//! with [`DirentIter`].

use crate::error::{VfsError, VfsResult};
use crate::types::FileType;

/// Size of the fixed part of a record.
pub const DIRENT_HEADER_LEN: usize = 19;

/// Total record length for a name of `name_len` bytes.
pub fn record_len(name_len: usize) -> usize {
    (DIRENT_HEADER_LEN + name_len + 1).next_multiple_of(8)
}

/// Appends records to a caller-supplied buffer.
#[derive(Debug)]
pub struct DirentWriter<'a> {
    buf: &'a mut [u8],
    written: usize,
}

impl<'a> DirentWriter<'a> {
    pub fn new(buf: &'a mut [u8]) -> Self {
        Self { buf, written: 0 }
    }

    /// Append one record. Returns `Ok(false)`, leaving the buffer untouched,
    /// when the record does not fit.
    ///
    /// `off` is the position a later getdents resumes from after this entry.
    pub fn push(&mut self, ino: u64, off: i64, kind: FileType, name: &str) -> VfsResult<bool> {
        if name.contains('\0') {
            return Err(VfsError::invalid_argument(format!(
                "directory entry name contains NUL: {name:?}"
            )));
        }

        let reclen = record_len(name.len());
        let reclen_field = u16::try_from(reclen)
            .map_err(|_| VfsError::invalid_argument(format!("name too long: {name:?}")))?;
        if self.written + reclen > self.buf.len() {
            return Ok(false);
        }

        let rec = &mut self.buf[self.written..self.written + reclen];
        rec[0..8].copy_from_slice(&ino.to_ne_bytes());
        rec[8..16].copy_from_slice(&off.to_ne_bytes());
        rec[16..18].copy_from_slice(&reclen_field.to_ne_bytes());
        rec[18] = kind.dirent_type();
        let name_end = DIRENT_HEADER_LEN + name.len();
        rec[DIRENT_HEADER_LEN..name_end].copy_from_slice(name.as_bytes());
        rec[name_end..].fill(0);

        self.written += reclen;
        Ok(true)
    }

    /// Bytes written so far.
    pub fn written(&self) -> usize {
        self.written
    }

    pub fn is_empty(&self) -> bool {
        self.written == 0
    }
}

/// A decoded record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dirent {
    pub ino: u64,
    pub off: i64,
    /// `None` for `DT_UNKNOWN`.
    pub kind: Option<FileType>,
    pub name: String,
}

/// Walks the records in a filled getdents buffer.
///
/// Stops at the first truncated or malformed record.
#[derive(Debug, Clone)]
pub struct DirentIter<'a> {
    buf: &'a [u8],
}

impl<'a> DirentIter<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }
}

impl Iterator for DirentIter<'_> {
    type Item = Dirent;

    fn next(&mut self) -> Option<Dirent> {
        if self.buf.len() < DIRENT_HEADER_LEN {
            return None;
        }
        let ino = u64::from_ne_bytes(self.buf[0..8].try_into().ok()?);
        let off = i64::from_ne_bytes(self.buf[8..16].try_into().ok()?);
        let reclen = u16::from_ne_bytes(self.buf[16..18].try_into().ok()?) as usize;
        if reclen <= DIRENT_HEADER_LEN || reclen > self.buf.len() {
            return None;
        }

        let name_bytes = &self.buf[DIRENT_HEADER_LEN..reclen];
        let name_len = name_bytes.iter().position(|&b| b == 0)?;
        let name = String::from_utf8_lossy(&name_bytes[..name_len]).into_owned();
        let kind = FileType::from_dirent_type(self.buf[18]);

        self.buf = &self.buf[reclen..];
        Some(Dirent {
            ino,
            off,
            kind,
            name,
        })
    }
}
