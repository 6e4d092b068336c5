// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Mount Table
//!
//! Seam over the operating system's mount table. Everything that probes or
//! mutates mounts goes through [`MountTable`], so lifecycle logic can be
//! exercised against an in-memory table.
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Purpose:** Implements mount probing and best-effort mount point cleanup

use std::io;
use std::path::Path;
use tracing::{debug, warn};

pub trait MountTable: Send + Sync {
    /// Whether `path` is the root of a mount.
    ///
    /// # Returns
    ///
    /// * `Err` with `NotFound` when the path does not exist
    /// * `Err` satisfying [`is_corrupted_mount`] for a dead FUSE mount
    fn is_mount_point(&self, path: &Path) -> io::Result<bool>;

    /// Stat `path/.`, failing when the mounted filesystem does not answer.
    fn probe(&self, path: &Path) -> io::Result<()>;

    /// Bind-mount `source` onto `target`, read-only if requested.
    fn bind_mount(&self, source: &Path, target: &Path, read_only: bool) -> io::Result<()>;

    fn unmount(&self, path: &Path) -> io::Result<()>;

    /// Detach the mount now and let the kernel finish once it is idle.
    fn unmount_lazy(&self, path: &Path) -> io::Result<()>;
}

/// Errors that indicate a mount whose backing filesystem has gone away.
pub fn is_corrupted_mount(err: &io::Error) -> bool {
    matches!(
        err.raw_os_error(),
        Some(libc::ENOTCONN) | Some(libc::ESTALE) | Some(libc::EIO) | Some(libc::EACCES)
    )
}

/// Whether `path` is worth cleaning up: it exists, or it is a dead mount that
/// can no longer be stat'ed.
pub fn path_present(path: &Path) -> bool {
    match std::fs::symlink_metadata(path) {
        Ok(_) => true,
        Err(e) => is_corrupted_mount(&e),
    }
}

/// Unmount `path` if it is (or was) a mount point, then remove the directory.
///
/// With `extensive` a failed unmount falls back to a lazy unmount. The
/// directory is never removed while something is still mounted on it.
pub fn cleanup_mount_point(table: &dyn MountTable, path: &Path, extensive: bool) -> io::Result<()> {
    if !path_present(path) {
        debug!("Mount point {:?} does not exist, nothing to clean up", path);
        return Ok(());
    }

    let mounted = match table.is_mount_point(path) {
        Ok(mounted) => mounted,
        Err(e) if is_corrupted_mount(&e) => {
            warn!("Mount point {:?} is corrupted: {}", path, e);
            true
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e),
    };

    if mounted {
        if let Err(e) = table.unmount(path) {
            if !extensive {
                return Err(e);
            }
            warn!("Unmount of {:?} failed ({}), falling back to lazy unmount", path, e);
            table.unmount_lazy(path)?;
        }
    }

    if matches!(table.is_mount_point(path), Ok(true)) {
        return Err(io::Error::other(format!("{:?} is still mounted", path)));
    }

    match std::fs::remove_dir(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

/// Run a cleanup step whose failure must not abort the caller.
///
/// Returns whether the step succeeded so callers and tests can tell that it
/// was attempted.
pub fn best_effort<E: std::fmt::Display>(what: &str, result: Result<(), E>) -> bool {
    match result {
        Ok(()) => true,
        Err(e) => {
            warn!("Best-effort {} failed: {}", what, e);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_corrupted_mount_errors() {
        assert!(is_corrupted_mount(&io::Error::from_raw_os_error(libc::ENOTCONN)));
        assert!(is_corrupted_mount(&io::Error::from_raw_os_error(libc::ESTALE)));
        assert!(!is_corrupted_mount(&io::Error::from_raw_os_error(libc::ENOENT)));
        assert!(!is_corrupted_mount(&io::Error::other("boom")));
    }

    #[test]
    fn test_best_effort_reports_outcome() {
        assert!(best_effort::<io::Error>("noop", Ok(())));
        assert!(!best_effort("remove", Err(io::Error::other("busy"))));
    }
}
