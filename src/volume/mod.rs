//! Pass-through operation layer: one thin handler per VFS call.
//!
//! Every path-taking operation follows the same contract: translate the
//! guest path through the rewrite engine, acquire the credential guard
//! (write side for anything that creates), issue the `*at` syscall against
//! the source directory descriptor, and map failure to an [`Errno`]. The
//! driver boundary negates errnos for the kernel.

pub mod dir;

use std::ffi::{CString, OsStr};
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};

use anyhow::Context as _;
use log::warn;

use crate::caller::Caller;
use crate::creds::{CredLock, Creds};
use crate::rewrite::Engine;
use dir::DirStream;

/// Mode handed to `openat` when the runtime requests `O_CREAT` through
/// plain open; the caller's umask applies under the write guard.
const DEFAULT_CREATE_MODE: libc::c_uint = 0o666;

/// A positive OS error code; negated at the driver boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Errno(pub i32);

impl Errno {
    /// The errno left by the syscall that just failed.
    fn last() -> Self {
        Self(
            std::io::Error::last_os_error()
                .raw_os_error()
                .unwrap_or(libc::EIO),
        )
    }

    /// The negative form handed back to the kernel runtime.
    pub const fn negated(self) -> i32 {
        -self.0
    }
}

pub type OpResult<T> = Result<T, Errno>;

/// Reply to a sized xattr query: the needed size when the caller passed
/// size 0, the data otherwise.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum XattrReply {
    Size(usize),
    Data(Vec<u8>),
}

/// Identity the kernel runtime attaches to each request.
#[derive(Debug, Clone, Copy)]
pub struct Request {
    pub pid: u32,
    pub uid: libc::uid_t,
    pub gid: libc::gid_t,
    pub umask: libc::mode_t,
}

impl Request {
    const fn creds(&self) -> Creds {
        Creds {
            uid: self.uid,
            gid: self.gid,
            umask: self.umask,
        }
    }
}

/// The mounted view: rewrite engine plus the host source directory.
#[derive(Debug)]
pub struct Volume {
    engine: Engine,
    source: OwnedFd,
    source_path: PathBuf,
    creds: CredLock,
    autocreate: bool,
}

impl Volume {
    /// Open `source` (held as an `O_PATH` descriptor for the life of the
    /// process) and bind the engine to it.
    ///
    /// # Errors
    ///
    /// Returns an error when the source directory cannot be opened.
    pub fn open_source(source: &Path, engine: Engine, autocreate: bool) -> anyhow::Result<Self> {
        let c_source = CString::new(source.as_os_str().as_bytes())
            .context("source path contains a NUL byte")?;
        let fd = unsafe {
            libc::open(
                c_source.as_ptr(),
                libc::O_PATH | libc::O_DIRECTORY | libc::O_CLOEXEC,
            )
        };
        if fd == -1 {
            return Err(std::io::Error::last_os_error()).with_context(|| {
                format!("cannot open source directory {}", source.display())
            });
        }
        let source_path = source.canonicalize().unwrap_or_else(|_| source.to_path_buf());
        Ok(Self {
            engine,
            source: unsafe { OwnedFd::from_raw_fd(fd) },
            source_path,
            creds: CredLock::new(),
            autocreate,
        })
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    pub fn source_path(&self) -> &Path {
        &self.source_path
    }

    fn source_fd(&self) -> RawFd {
        self.source.as_raw_fd()
    }

    fn rewrite(&self, req: &Request, guest: &Path) -> PathBuf {
        let mut caller = Caller::new(req.pid);
        self.engine.rewrite(guest, &mut caller)
    }

    fn resolve(&self, req: &Request, guest: &Path) -> OpResult<CString> {
        to_cstring(self.rewrite(req, guest).as_os_str())
    }

    // --- non-mutating operations ---

    pub fn getattr(&self, req: &Request, guest: &Path, fh: Option<RawFd>) -> OpResult<libc::stat> {
        let mut st: libc::stat = unsafe { std::mem::zeroed() };
        match fh {
            Some(fd) => {
                let _read = self.creds.read();
                check(unsafe { libc::fstat(fd, &raw mut st) })?;
            }
            None => {
                let path = self.resolve(req, guest)?;
                let _read = self.creds.read();
                check(unsafe {
                    libc::fstatat(
                        self.source_fd(),
                        path.as_ptr(),
                        &raw mut st,
                        libc::AT_SYMLINK_NOFOLLOW,
                    )
                })?;
            }
        }
        Ok(st)
    }

    pub fn access(&self, req: &Request, guest: &Path, mask: i32) -> OpResult<()> {
        let path = self.resolve(req, guest)?;
        let _read = self.creds.read();
        check(unsafe { libc::faccessat(self.source_fd(), path.as_ptr(), mask, 0) })
    }

    pub fn readlink(&self, req: &Request, guest: &Path) -> OpResult<Vec<u8>> {
        let path = self.resolve(req, guest)?;
        let mut buf = vec![0_u8; libc::PATH_MAX as usize];
        let len = {
            let _read = self.creds.read();
            let len = unsafe {
                libc::readlinkat(
                    self.source_fd(),
                    path.as_ptr(),
                    buf.as_mut_ptr().cast(),
                    buf.len(),
                )
            };
            if len == -1 {
                return Err(Errno::last());
            }
            len
        };
        buf.truncate(len as usize);
        Ok(buf)
    }

    pub fn opendir(&self, req: &Request, guest: &Path) -> OpResult<DirStream> {
        let path = self.resolve(req, guest)?;
        let fd = {
            let _read = self.creds.read();
            let fd = unsafe {
                libc::openat(
                    self.source_fd(),
                    path.as_ptr(),
                    libc::O_RDONLY | libc::O_DIRECTORY,
                )
            };
            if fd == -1 {
                return Err(Errno::last());
            }
            fd
        };
        let _read = self.creds.read();
        DirStream::from_fd(fd)
    }

    pub fn readdir(
        &self,
        stream: &mut DirStream,
        offset: i64,
        fill: impl FnMut(&dir::DirEntry) -> bool,
    ) {
        let _read = self.creds.read();
        stream.read(offset, fill);
    }

    pub fn releasedir(&self, stream: DirStream) {
        let _read = self.creds.read();
        drop(stream);
    }

    pub fn statfs(&self, req: &Request, guest: &Path) -> OpResult<libc::statvfs> {
        let fd = self.open_temp(req, guest, libc::O_RDONLY)?;
        let mut st: libc::statvfs = unsafe { std::mem::zeroed() };
        let _read = self.creds.read();
        check(unsafe { libc::fstatvfs(fd.as_raw_fd(), &raw mut st) })?;
        Ok(st)
    }

    // --- mutating operations ---

    pub fn mknod(
        &self,
        req: &Request,
        guest: &Path,
        mode: libc::mode_t,
        rdev: libc::dev_t,
    ) -> OpResult<()> {
        let rel = self.rewrite(req, guest);
        self.autocreate_parents(req, &rel);
        let path = to_cstring(rel.as_os_str())?;
        let _write = self.creds.impersonate(req.creds());
        check(unsafe { libc::mknodat(self.source_fd(), path.as_ptr(), mode, rdev) })
    }

    pub fn mkdir(&self, req: &Request, guest: &Path, mode: libc::mode_t) -> OpResult<()> {
        let rel = self.rewrite(req, guest);
        self.autocreate_parents(req, &rel);
        let path = to_cstring(rel.as_os_str())?;
        let _write = self.creds.impersonate(req.creds());
        check(unsafe { libc::mkdirat(self.source_fd(), path.as_ptr(), mode) })
    }

    pub fn unlink(&self, req: &Request, guest: &Path) -> OpResult<()> {
        let path = self.resolve(req, guest)?;
        let _read = self.creds.read();
        check(unsafe { libc::unlinkat(self.source_fd(), path.as_ptr(), 0) })
    }

    pub fn rmdir(&self, req: &Request, guest: &Path) -> OpResult<()> {
        let path = self.resolve(req, guest)?;
        let _read = self.creds.read();
        check(unsafe { libc::unlinkat(self.source_fd(), path.as_ptr(), libc::AT_REMOVEDIR) })
    }

    /// `target` is stored verbatim; only the link location is rewritten.
    pub fn symlink(&self, req: &Request, target: &OsStr, guest_link: &Path) -> OpResult<()> {
        let rel = self.rewrite(req, guest_link);
        self.autocreate_parents(req, &rel);
        let link = to_cstring(rel.as_os_str())?;
        let target = to_cstring(target)?;
        let _write = self.creds.impersonate(req.creds());
        check(unsafe { libc::symlinkat(target.as_ptr(), self.source_fd(), link.as_ptr()) })
    }

    pub fn rename(
        &self,
        req: &Request,
        guest_from: &Path,
        guest_to: &Path,
        flags: u32,
    ) -> OpResult<()> {
        if flags != 0 {
            return Err(Errno(libc::EINVAL));
        }
        let from = self.resolve(req, guest_from)?;
        let rel_to = self.rewrite(req, guest_to);
        self.autocreate_parents(req, &rel_to);
        let to = to_cstring(rel_to.as_os_str())?;
        let _read = self.creds.read();
        check(unsafe {
            libc::renameat(self.source_fd(), from.as_ptr(), self.source_fd(), to.as_ptr())
        })
    }

    pub fn link(&self, req: &Request, guest_from: &Path, guest_to: &Path) -> OpResult<()> {
        let from = self.resolve(req, guest_from)?;
        let rel_to = self.rewrite(req, guest_to);
        self.autocreate_parents(req, &rel_to);
        let to = to_cstring(rel_to.as_os_str())?;
        let _read = self.creds.read();
        check(unsafe {
            libc::linkat(
                self.source_fd(),
                from.as_ptr(),
                self.source_fd(),
                to.as_ptr(),
                0,
            )
        })
    }

    pub fn chmod(
        &self,
        req: &Request,
        guest: &Path,
        mode: libc::mode_t,
        fh: Option<RawFd>,
    ) -> OpResult<()> {
        match fh {
            Some(fd) => {
                let _read = self.creds.read();
                check(unsafe { libc::fchmod(fd, mode) })
            }
            None => {
                let path = self.resolve(req, guest)?;
                let _read = self.creds.read();
                // No AT_SYMLINK_NOFOLLOW here: glibc rejects it with
                // ENOTSUP, and the kernel resolves symlinks before a
                // path-based chmod ever reaches us.
                check(unsafe { libc::fchmodat(self.source_fd(), path.as_ptr(), mode, 0) })
            }
        }
    }

    pub fn chown(
        &self,
        req: &Request,
        guest: &Path,
        uid: libc::uid_t,
        gid: libc::gid_t,
        fh: Option<RawFd>,
    ) -> OpResult<()> {
        match fh {
            Some(fd) => {
                let _read = self.creds.read();
                check(unsafe { libc::fchown(fd, uid, gid) })
            }
            None => {
                let path = self.resolve(req, guest)?;
                let _read = self.creds.read();
                check(unsafe {
                    libc::fchownat(
                        self.source_fd(),
                        path.as_ptr(),
                        uid,
                        gid,
                        libc::AT_SYMLINK_NOFOLLOW,
                    )
                })
            }
        }
    }

    pub fn truncate(
        &self,
        req: &Request,
        guest: &Path,
        size: i64,
        fh: Option<RawFd>,
    ) -> OpResult<()> {
        match fh {
            Some(fd) => {
                let _read = self.creds.read();
                check(unsafe { libc::ftruncate(fd, size) })
            }
            None => {
                let fd = self.open_temp(req, guest, libc::O_WRONLY)?;
                let _read = self.creds.read();
                check(unsafe { libc::ftruncate(fd.as_raw_fd(), size) })
            }
        }
    }

    pub fn utimens(
        &self,
        req: &Request,
        guest: &Path,
        times: &[libc::timespec; 2],
        fh: Option<RawFd>,
    ) -> OpResult<()> {
        match fh {
            Some(fd) => {
                let _read = self.creds.read();
                check(unsafe { libc::futimens(fd, times.as_ptr()) })
            }
            None => {
                let path = self.resolve(req, guest)?;
                let _read = self.creds.read();
                check(unsafe {
                    libc::utimensat(
                        self.source_fd(),
                        path.as_ptr(),
                        times.as_ptr(),
                        libc::AT_SYMLINK_NOFOLLOW,
                    )
                })
            }
        }
    }

    /// Open a guest path. Takes the write side of the guard only when the
    /// flags ask for creation, so the new file belongs to the caller.
    pub fn open(&self, req: &Request, guest: &Path, flags: i32) -> OpResult<OwnedFd> {
        let creating = flags & libc::O_CREAT != 0;
        let rel = self.rewrite(req, guest);
        if creating {
            self.autocreate_parents(req, &rel);
        }
        let path = to_cstring(rel.as_os_str())?;
        let fd = if creating {
            let _write = self.creds.impersonate(req.creds());
            unsafe { libc::openat(self.source_fd(), path.as_ptr(), flags, DEFAULT_CREATE_MODE) }
        } else {
            let _read = self.creds.read();
            unsafe { libc::openat(self.source_fd(), path.as_ptr(), flags) }
        };
        if fd == -1 {
            return Err(Errno::last());
        }
        Ok(unsafe { OwnedFd::from_raw_fd(fd) })
    }

    pub fn create(
        &self,
        req: &Request,
        guest: &Path,
        mode: libc::mode_t,
        flags: i32,
    ) -> OpResult<OwnedFd> {
        let rel = self.rewrite(req, guest);
        self.autocreate_parents(req, &rel);
        let path = to_cstring(rel.as_os_str())?;
        let fd = {
            let _write = self.creds.impersonate(req.creds());
            unsafe {
                libc::openat(
                    self.source_fd(),
                    path.as_ptr(),
                    flags | libc::O_CREAT,
                    mode,
                )
            }
        };
        if fd == -1 {
            return Err(Errno::last());
        }
        Ok(unsafe { OwnedFd::from_raw_fd(fd) })
    }

    // --- descriptor operations ---

    pub fn read(&self, fh: RawFd, buf: &mut [u8], offset: i64) -> OpResult<usize> {
        let _read = self.creds.read();
        let len = unsafe { libc::pread(fh, buf.as_mut_ptr().cast(), buf.len(), offset) };
        if len == -1 {
            return Err(Errno::last());
        }
        Ok(len as usize)
    }

    pub fn write(&self, fh: RawFd, data: &[u8], offset: i64) -> OpResult<usize> {
        let _read = self.creds.read();
        let len = unsafe { libc::pwrite(fh, data.as_ptr().cast(), data.len(), offset) };
        if len == -1 {
            return Err(Errno::last());
        }
        Ok(len as usize)
    }

    pub fn flush(&self, fh: RawFd) -> OpResult<()> {
        let _read = self.creds.read();
        let duped = unsafe { libc::dup(fh) };
        if duped == -1 {
            return Err(Errno::last());
        }
        check(unsafe { libc::close(duped) })
    }

    pub fn release(&self, fh: OwnedFd) {
        let _read = self.creds.read();
        drop(fh);
    }

    pub fn fsync(&self, fh: RawFd, datasync: bool) -> OpResult<()> {
        let _read = self.creds.read();
        if datasync {
            check(unsafe { libc::fdatasync(fh) })
        } else {
            check(unsafe { libc::fsync(fh) })
        }
    }

    pub fn fallocate(&self, fh: RawFd, mode: i32, offset: i64, length: i64) -> OpResult<()> {
        if mode != 0 {
            return Err(Errno(libc::EOPNOTSUPP));
        }
        let err = unsafe { libc::posix_fallocate(fh, offset, length) };
        if err == 0 { Ok(()) } else { Err(Errno(err)) }
    }

    // --- extended attributes (reached by temporary descriptor) ---

    pub fn setxattr(
        &self,
        req: &Request,
        guest: &Path,
        name: &OsStr,
        value: &[u8],
        flags: i32,
    ) -> OpResult<()> {
        let fd = self.open_temp(req, guest, libc::O_RDONLY)?;
        let name = to_cstring(name)?;
        let _read = self.creds.read();
        check(unsafe {
            libc::fsetxattr(
                fd.as_raw_fd(),
                name.as_ptr(),
                value.as_ptr().cast(),
                value.len(),
                flags,
            )
        })
    }

    pub fn getxattr(
        &self,
        req: &Request,
        guest: &Path,
        name: &OsStr,
        size: usize,
    ) -> OpResult<XattrReply> {
        let fd = self.open_temp(req, guest, libc::O_RDONLY)?;
        let name = to_cstring(name)?;
        let _read = self.creds.read();
        if size == 0 {
            let len = unsafe {
                libc::fgetxattr(fd.as_raw_fd(), name.as_ptr(), std::ptr::null_mut(), 0)
            };
            if len == -1 {
                return Err(Errno::last());
            }
            return Ok(XattrReply::Size(len as usize));
        }
        let mut buf = vec![0_u8; size];
        let len = unsafe {
            libc::fgetxattr(
                fd.as_raw_fd(),
                name.as_ptr(),
                buf.as_mut_ptr().cast(),
                buf.len(),
            )
        };
        if len == -1 {
            return Err(Errno::last());
        }
        buf.truncate(len as usize);
        Ok(XattrReply::Data(buf))
    }

    pub fn listxattr(&self, req: &Request, guest: &Path, size: usize) -> OpResult<XattrReply> {
        let fd = self.open_temp(req, guest, libc::O_RDONLY)?;
        let _read = self.creds.read();
        if size == 0 {
            let len =
                unsafe { libc::flistxattr(fd.as_raw_fd(), std::ptr::null_mut(), 0) };
            if len == -1 {
                return Err(Errno::last());
            }
            return Ok(XattrReply::Size(len as usize));
        }
        let mut buf = vec![0_u8; size];
        let len = unsafe {
            libc::flistxattr(fd.as_raw_fd(), buf.as_mut_ptr().cast(), buf.len())
        };
        if len == -1 {
            return Err(Errno::last());
        }
        buf.truncate(len as usize);
        Ok(XattrReply::Data(buf))
    }

    pub fn removexattr(&self, req: &Request, guest: &Path, name: &OsStr) -> OpResult<()> {
        let fd = self.open_temp(req, guest, libc::O_RDONLY)?;
        let name = to_cstring(name)?;
        let _read = self.creds.read();
        check(unsafe { libc::fremovexattr(fd.as_raw_fd(), name.as_ptr()) })
    }

    // --- helpers ---

    /// A descriptor scoped to one operation; closed on drop, error paths
    /// included.
    fn open_temp(&self, req: &Request, guest: &Path, flags: i32) -> OpResult<OwnedFd> {
        let path = self.resolve(req, guest)?;
        let _read = self.creds.read();
        let fd = unsafe { libc::openat(self.source_fd(), path.as_ptr(), flags) };
        if fd == -1 {
            return Err(Errno::last());
        }
        Ok(unsafe { OwnedFd::from_raw_fd(fd) })
    }

    /// Best-effort creation of the rewritten path's missing parents,
    /// mode `0777 & ~umask`, owned by the caller. Failures are logged and
    /// the operation proceeds regardless.
    fn autocreate_parents(&self, req: &Request, rel: &Path) {
        if !self.autocreate {
            return;
        }
        let Some(parent) = rel.parent() else { return };
        if parent.as_os_str().is_empty() {
            return;
        }
        if let Err(err) = self.mkdir_recursive(req, parent) {
            warn!(
                "{}: autocreating parents failed: {}",
                rel.display(),
                std::io::Error::from_raw_os_error(err.0)
            );
        }
    }

    fn mkdir_recursive(&self, req: &Request, dir: &Path) -> OpResult<()> {
        let path = to_cstring(dir.as_os_str())?;
        let missing = {
            let mut st: libc::stat = unsafe { std::mem::zeroed() };
            let _read = self.creds.read();
            match check(unsafe { libc::fstatat(self.source_fd(), path.as_ptr(), &raw mut st, 0) })
            {
                Ok(()) => return Ok(()),
                Err(err) => err,
            }
        };
        if missing.0 != libc::ENOENT {
            return Err(missing);
        }

        if let Some(parent) = dir.parent()
            && !parent.as_os_str().is_empty()
        {
            self.mkdir_recursive(req, parent)?;
        }

        let made = {
            let _write = self.creds.impersonate(req.creds());
            check(unsafe { libc::mkdirat(self.source_fd(), path.as_ptr(), 0o777) })
        };
        match made {
            // Benign race with a concurrent request creating the same parent.
            Err(err) if err.0 == libc::EEXIST => Ok(()),
            other => other,
        }
    }
}

fn check(res: libc::c_int) -> OpResult<()> {
    if res == -1 { Err(Errno::last()) } else { Ok(()) }
}

fn to_cstring(path: &OsStr) -> OpResult<CString> {
    CString::new(path.as_bytes()).map_err(|_| Errno(libc::EINVAL))
}
