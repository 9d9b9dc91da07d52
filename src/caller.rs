//! Caller-process command-line probe.
//!
//! Context matching is keyed on the command line of the process issuing the
//! VFS request, as exposed by the kernel process table. The probe is lazy
//! (nothing is read until a non-default context needs it) and memoized per
//! request, failure included.

use std::fs;

use log::warn;

/// Read `/proc/<pid>/cmdline`: NUL-separated argv joined with single
/// spaces, terminal NUL dropped. Returns `None` on any I/O failure (caller
/// already gone, restricted procfs, ...).
pub fn cmdline(pid: u32) -> Option<Vec<u8>> {
    let mut raw = fs::read(format!("/proc/{pid}/cmdline")).ok()?;
    if raw.last() == Some(&0) {
        raw.pop();
    }
    for byte in &mut raw {
        if *byte == 0 {
            *byte = b' ';
        }
    }
    Some(raw)
}

/// One request's view of the calling process.
#[derive(Debug)]
pub struct Caller {
    pid: u32,
    probed: Option<Option<Vec<u8>>>,
}

impl Caller {
    /// A caller identified by pid; the command line is probed on first use.
    pub const fn new(pid: u32) -> Self {
        Self { pid, probed: None }
    }

    /// A caller with a fixed command line, bypassing the process table.
    pub const fn fixed(cmdline: Option<Vec<u8>>) -> Self {
        Self {
            pid: 0,
            probed: Some(cmdline),
        }
    }

    pub const fn pid(&self) -> u32 {
        self.pid
    }

    /// The caller's command line, or `None` when it cannot be obtained.
    ///
    /// The first probe is memoized for the lifetime of this value, so one
    /// request reads the process table at most once; a failed probe logs a
    /// warning once and stays failed.
    pub fn cmdline(&mut self) -> Option<&[u8]> {
        if self.probed.is_none() {
            let probed = cmdline(self.pid);
            if probed.is_none() {
                warn!("cannot obtain command line of caller {}", self.pid);
            }
            self.probed = Some(probed);
        }
        self.probed.as_ref().and_then(|c| c.as_deref())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn own_cmdline_is_readable() {
        let line = cmdline(std::process::id()).unwrap();
        assert!(!line.is_empty());
        assert!(!line.contains(&0), "NUL separators must become spaces");
    }

    #[test]
    fn unknown_pid_probes_none() {
        let mut caller = Caller::new(u32::MAX);
        assert_eq!(caller.cmdline(), None);
        // Memoized: the second call must not re-probe differently.
        assert_eq!(caller.cmdline(), None);
    }

    #[test]
    fn fixed_cmdline_is_returned_verbatim() {
        let mut caller = Caller::fixed(Some(b"vim notes.txt".to_vec()));
        assert_eq!(caller.cmdline(), Some(b"vim notes.txt".as_slice()));
    }
}
