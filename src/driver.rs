//! Contract with the kernel-side VFS runtime.
//!
//! The runtime owns the mount and the request loop: it receives each
//! kernel operation on a worker thread, builds a
//! [`Request`](crate::volume::Request) from the caller identity the
//! kernel reports, calls the matching [`Volume`] method, and replies
//! with the result, errors as the negated errno
//! ([`Errno::negated`](crate::volume::Errno::negated)). File and
//! directory handles returned by open/opendir are owned by the runtime
//! until the matching release/releasedir. The runtime is an external
//! collaborator; this module is the seam it links against.

use std::path::Path;

use anyhow::bail;
use log::info;

use crate::volume::Volume;

/// Options forwarded to the runtime at mount time.
#[derive(Debug, Clone, Default)]
pub struct MountOptions {
    /// Stay attached to the terminal (`-f`).
    pub foreground: bool,
    /// Runtime debug mode (`-d`).
    pub debug: bool,
    /// `-o` options this crate does not interpret, passed through
    /// verbatim (e.g. `allow_other`).
    pub passthrough: Vec<String>,
}

/// Hand the volume to the kernel dispatch runtime and serve until
/// unmount.
///
/// # Errors
///
/// Returns an error when the runtime cannot be initialized. No runtime
/// is linked into this build, so serving always reports initialization
/// failure; every component in front of the seam is fully operational
/// (see `--check` and `--rewrite`).
pub fn serve(volume: &Volume, mountpoint: &Path, options: &MountOptions) -> anyhow::Result<()> {
    info!(
        "mounting {} on {} ({} passthrough options)",
        volume.source_path().display(),
        mountpoint.display(),
        options.passthrough.len()
    );
    bail!(
        "no VFS runtime is linked into this build: cannot mount {}",
        mountpoint.display()
    )
}
