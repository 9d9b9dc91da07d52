//! Credential and umask guard.
//!
//! The host filesystem derives new-file ownership and mode from the
//! process's effective credentials at syscall time, so any operation that
//! creates on behalf of a caller must impersonate that caller. Effective
//! uid/gid and umask are process-global: a reader-writer lock serializes
//! them. Plain syscalls run under the shared read guard; creating syscalls
//! run under the exclusive write guard with the caller's identity
//! installed, restored on drop whatever the exit path.

use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Caller identity attached to a VFS request by the kernel runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Creds {
    pub uid: libc::uid_t,
    pub gid: libc::gid_t,
    pub umask: libc::mode_t,
}

/// The process-wide lock guarding effective credentials and umask.
#[derive(Debug, Default)]
pub struct CredLock {
    lock: RwLock<()>,
}

impl CredLock {
    pub const fn new() -> Self {
        Self {
            lock: RwLock::new(()),
        }
    }

    /// Shared access for operations that do not create anything.
    pub fn read(&self) -> RwLockReadGuard<'_, ()> {
        self.lock.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Exclusive access with `creds` installed as the effective identity.
    ///
    /// The previous euid/egid/umask are restored when the guard drops.
    pub fn impersonate(&self, creds: Creds) -> ImpersonationGuard<'_> {
        let guard = self.lock.write().unwrap_or_else(PoisonError::into_inner);
        let saved = Saved {
            umask: unsafe { libc::umask(creds.umask) },
            euid: unsafe { libc::geteuid() },
            egid: unsafe { libc::getegid() },
        };
        // gid first: once the euid drops, setegid may no longer be
        // permitted.
        unsafe {
            let _ = libc::setegid(creds.gid);
            let _ = libc::seteuid(creds.uid);
        }
        ImpersonationGuard {
            _guard: guard,
            saved,
        }
    }
}

#[derive(Debug)]
struct Saved {
    euid: libc::uid_t,
    egid: libc::gid_t,
    umask: libc::mode_t,
}

/// Write-side guard: holds the lock and the saved identity.
#[derive(Debug)]
pub struct ImpersonationGuard<'a> {
    _guard: RwLockWriteGuard<'a, ()>,
    saved: Saved,
}

impl Drop for ImpersonationGuard<'_> {
    fn drop(&mut self) {
        unsafe {
            let _ = libc::seteuid(self.saved.euid);
            let _ = libc::setegid(self.saved.egid);
            libc::umask(self.saved.umask);
        }
    }
}
