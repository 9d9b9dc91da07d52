//! Directory stream owned by an opendir handle.

use std::ffi::CStr;
use std::os::fd::RawFd;

use super::{Errno, OpResult};

/// One entry as reported to the runtime. `kind` is the raw `DT_*` type
/// byte; `next_offset` is the stream position after this entry, suitable
/// for resuming a paged read.
#[derive(Debug, Clone)]
pub struct DirEntry {
    pub name: Vec<u8>,
    pub ino: u64,
    pub kind: u8,
    pub next_offset: i64,
}

/// An open directory stream. Owned by the file handle returned from
/// opendir and released on the matching releasedir; the underlying
/// descriptor is closed on drop.
#[derive(Debug)]
pub struct DirStream {
    dp: *mut libc::DIR,
    offset: i64,
    pending: Option<DirEntry>,
}

// The runtime serializes access to one open handle; the stream itself
// migrates freely between worker threads.
unsafe impl Send for DirStream {}

impl DirStream {
    pub(crate) fn from_fd(fd: RawFd) -> OpResult<Self> {
        let dp = unsafe { libc::fdopendir(fd) };
        if dp.is_null() {
            let err = Errno::last();
            unsafe { libc::close(fd) };
            return Err(err);
        }
        Ok(Self {
            dp,
            offset: 0,
            pending: None,
        })
    }

    /// Stream entries from `offset`, handing each to `fill` until the
    /// stream is exhausted or `fill` reports a full buffer by returning
    /// `false`. A rejected entry is kept pending for the next call.
    pub fn read(&mut self, offset: i64, mut fill: impl FnMut(&DirEntry) -> bool) {
        if offset != self.offset {
            unsafe { libc::seekdir(self.dp, offset as libc::c_long) };
            self.pending = None;
            self.offset = offset;
        }

        loop {
            let entry = match self.pending.take() {
                Some(entry) => entry,
                None => match self.next_entry() {
                    Some(entry) => entry,
                    None => break,
                },
            };
            if fill(&entry) {
                self.offset = entry.next_offset;
            } else {
                self.pending = Some(entry);
                break;
            }
        }
    }

    fn next_entry(&mut self) -> Option<DirEntry> {
        let raw = unsafe { libc::readdir(self.dp) };
        if raw.is_null() {
            return None;
        }
        let entry = unsafe { &*raw };
        let name = unsafe { CStr::from_ptr(entry.d_name.as_ptr()) }
            .to_bytes()
            .to_vec();
        let next_offset = unsafe { libc::telldir(self.dp) } as i64;
        Some(DirEntry {
            name,
            ino: entry.d_ino,
            kind: entry.d_type,
            next_offset,
        })
    }
}

impl Drop for DirStream {
    fn drop(&mut self) {
        unsafe {
            libc::closedir(self.dp);
        }
    }
}
