// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Mount Table Implementations
//!
//! [`LinuxMountTable`] talks to the kernel through `mount(2)`/`umount2(2)` and
//! reads `/proc/self/mountinfo`. [`InMemoryMountTable`] keeps mounts in a map
//! and is used by tests and local development.
//!
//! # Architecture
//!
//! - **Layer:** Infrastructure Layer
//! - **Purpose:** Implements the MountTable domain trait

use crate::domain::mount_table::{best_effort, MountTable};
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::ffi::CString;
use std::io;
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};
use tracing::debug;

const MOUNTINFO: &str = "/proc/self/mountinfo";

// ============================================================================
// Linux
// ============================================================================

#[derive(Debug, Default, Clone, Copy)]
pub struct LinuxMountTable;

impl LinuxMountTable {
    pub fn new() -> Self {
        Self
    }

    fn mount_points() -> io::Result<Vec<PathBuf>> {
        let content = std::fs::read_to_string(MOUNTINFO)?;
        Ok(parse_mountinfo(&content))
    }
}

fn c_path(path: &Path) -> io::Result<CString> {
    CString::new(path.as_os_str().as_bytes())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "path contains a NUL byte"))
}

fn check(ret: libc::c_int) -> io::Result<()> {
    if ret == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

impl MountTable for LinuxMountTable {
    fn is_mount_point(&self, path: &Path) -> io::Result<bool> {
        // Dead FUSE mounts surface here as ENOTCONN
        std::fs::metadata(path)?;
        let canonical = std::fs::canonicalize(path)?;
        Ok(Self::mount_points()?.iter().any(|p| *p == canonical))
    }

    fn probe(&self, path: &Path) -> io::Result<()> {
        std::fs::metadata(path.join(".")).map(|_| ())
    }

    fn bind_mount(&self, source: &Path, target: &Path, read_only: bool) -> io::Result<()> {
        let source = c_path(source)?;
        let target_c = c_path(target)?;
        // SAFETY: all pointers come from live CStrings; null fstype/data are allowed for bind mounts
        check(unsafe {
            libc::mount(
                source.as_ptr(),
                target_c.as_ptr(),
                std::ptr::null(),
                libc::MS_BIND,
                std::ptr::null(),
            )
        })?;

        if read_only {
            // MS_RDONLY is ignored on the initial bind and needs a remount
            let flags = libc::MS_BIND | libc::MS_REMOUNT | libc::MS_RDONLY;
            // SAFETY: as above
            let remount = check(unsafe {
                libc::mount(
                    std::ptr::null(),
                    target_c.as_ptr(),
                    std::ptr::null(),
                    flags,
                    std::ptr::null(),
                )
            });
            if let Err(e) = remount {
                best_effort("rollback of bind mount", self.unmount(target));
                return Err(e);
            }
        }
        debug!("Bind mounted {:?} (read_only={})", target, read_only);
        Ok(())
    }

    fn unmount(&self, path: &Path) -> io::Result<()> {
        let target = c_path(path)?;
        // SAFETY: target is a live CString
        check(unsafe { libc::umount2(target.as_ptr(), 0) })
    }

    fn unmount_lazy(&self, path: &Path) -> io::Result<()> {
        let target = c_path(path)?;
        // SAFETY: target is a live CString
        check(unsafe { libc::umount2(target.as_ptr(), libc::MNT_DETACH) })
    }
}

/// Mount points listed in a mountinfo document (field 5, octal-unescaped).
fn parse_mountinfo(content: &str) -> Vec<PathBuf> {
    content
        .lines()
        .filter_map(|line| line.split_whitespace().nth(4))
        .map(|field| PathBuf::from(unescape_octal(field)))
        .collect()
}

fn unescape_octal(field: &str) -> String {
    let bytes = field.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        let escaped = bytes[i] == b'\\'
            && i + 3 < bytes.len()
            && bytes[i + 1..i + 4].iter().all(|b| (b'0'..=b'7').contains(b));
        if escaped {
            let value = bytes[i + 1..i + 4]
                .iter()
                .fold(0u32, |acc, b| acc * 8 + u32::from(b - b'0'));
            out.push(value as u8);
            i += 4;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

// ============================================================================
// In-memory
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountRecord {
    pub source: Option<PathBuf>,
    pub read_only: bool,
}

/// Mount table held in memory.
///
/// Paths themselves live on the real filesystem (tests use temp dirs); only
/// the mounted/stale status is simulated. A stale path answers every probe
/// with `ENOTCONN`, like a FUSE mount whose helper died.
#[derive(Debug, Default)]
pub struct InMemoryMountTable {
    mounts: RwLock<HashMap<PathBuf, MountRecord>>,
    stale: RwLock<HashSet<PathBuf>>,
    fail_unmount: RwLock<HashSet<PathBuf>>,
}

impl InMemoryMountTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate a filesystem mount appearing at `path`.
    pub fn add_mount(&self, path: impl Into<PathBuf>) {
        self.mounts.write().insert(
            path.into(),
            MountRecord { source: None, read_only: false },
        );
    }

    /// Simulate the helper behind `path` dying without unmounting.
    pub fn mark_stale(&self, path: impl Into<PathBuf>) {
        let path = path.into();
        self.mounts.write().remove(&path);
        self.stale.write().insert(path);
    }

    /// Make every unmount of `path` fail with `EBUSY`.
    pub fn fail_unmount(&self, path: impl Into<PathBuf>) {
        self.fail_unmount.write().insert(path.into());
    }

    pub fn is_mounted(&self, path: &Path) -> bool {
        self.mounts.read().contains_key(path)
    }

    pub fn record(&self, path: &Path) -> Option<MountRecord> {
        self.mounts.read().get(path).cloned()
    }

    pub fn mounted_paths(&self) -> Vec<PathBuf> {
        self.mounts.read().keys().cloned().collect()
    }

    fn ensure_exists(path: &Path) -> io::Result<()> {
        std::fs::symlink_metadata(path).map(|_| ())
    }

    fn stale_error() -> io::Error {
        io::Error::from_raw_os_error(libc::ENOTCONN)
    }
}

impl MountTable for InMemoryMountTable {
    fn is_mount_point(&self, path: &Path) -> io::Result<bool> {
        if self.stale.read().contains(path) {
            return Err(Self::stale_error());
        }
        Self::ensure_exists(path)?;
        Ok(self.is_mounted(path))
    }

    fn probe(&self, path: &Path) -> io::Result<()> {
        if self.stale.read().contains(path) {
            return Err(Self::stale_error());
        }
        Self::ensure_exists(path)
    }

    fn bind_mount(&self, source: &Path, target: &Path, read_only: bool) -> io::Result<()> {
        Self::ensure_exists(source)?;
        Self::ensure_exists(target)?;
        self.mounts.write().insert(
            target.to_path_buf(),
            MountRecord { source: Some(source.to_path_buf()), read_only },
        );
        Ok(())
    }

    fn unmount(&self, path: &Path) -> io::Result<()> {
        if self.fail_unmount.read().contains(path) {
            return Err(io::Error::from_raw_os_error(libc::EBUSY));
        }
        let was_stale = self.stale.write().remove(path);
        if self.mounts.write().remove(path).is_some() || was_stale {
            Ok(())
        } else {
            Err(io::Error::from_raw_os_error(libc::EINVAL))
        }
    }

    fn unmount_lazy(&self, path: &Path) -> io::Result<()> {
        let was_stale = self.stale.write().remove(path);
        if self.mounts.write().remove(path).is_some() || was_stale {
            Ok(())
        } else {
            Err(io::Error::from_raw_os_error(libc::EINVAL))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::mount_table::{cleanup_mount_point, is_corrupted_mount};
    use tempfile::TempDir;

    #[test]
    fn test_parse_mountinfo() {
        let content = "\
22 1 8:1 / / rw,relatime shared:1 - ext4 /dev/sda1 rw
36 22 0:32 / /var/lib/kubelet/pods/x/volumes/my\\040vol rw shared:2 - fuse.seaweedfs filer:8888 rw
";
        let points = parse_mountinfo(content);
        assert_eq!(points.len(), 2);
        assert_eq!(points[0], PathBuf::from("/"));
        assert_eq!(points[1], PathBuf::from("/var/lib/kubelet/pods/x/volumes/my vol"));
    }

    #[test]
    fn test_unescape_leaves_plain_text() {
        assert_eq!(unescape_octal("/plain/path"), "/plain/path");
        assert_eq!(unescape_octal("/tab\\011here"), "/tab\there");
        assert_eq!(unescape_octal("/trailing\\04"), "/trailing\\04");
    }

    #[test]
    fn test_in_memory_mount_lifecycle() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("source");
        let target = dir.path().join("target");
        std::fs::create_dir_all(&source).unwrap();
        std::fs::create_dir_all(&target).unwrap();

        let table = InMemoryMountTable::new();
        assert!(!table.is_mount_point(&target).unwrap());
        table.bind_mount(&source, &target, true).unwrap();
        assert!(table.is_mount_point(&target).unwrap());
        assert!(table.record(&target).unwrap().read_only);

        table.unmount(&target).unwrap();
        assert!(!table.is_mount_point(&target).unwrap());
        assert!(table.unmount(&target).is_err());

        let missing = dir.path().join("missing");
        assert_eq!(
            table.is_mount_point(&missing).unwrap_err().kind(),
            io::ErrorKind::NotFound
        );
    }

    #[test]
    fn test_stale_mount_is_corrupted_and_cleanable() {
        let dir = TempDir::new().unwrap();
        let staging = dir.path().join("staging");
        std::fs::create_dir_all(&staging).unwrap();

        let table = InMemoryMountTable::new();
        table.add_mount(&staging);
        table.mark_stale(&staging);

        let err = table.is_mount_point(&staging).unwrap_err();
        assert!(is_corrupted_mount(&err));
        assert!(table.probe(&staging).is_err());

        cleanup_mount_point(&table, &staging, true).unwrap();
        assert!(!staging.exists());
        assert!(table.mounted_paths().is_empty());
    }

    #[test]
    fn test_cleanup_falls_back_to_lazy_unmount() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("target");
        std::fs::create_dir_all(&target).unwrap();

        let table = InMemoryMountTable::new();
        table.add_mount(&target);
        table.fail_unmount(&target);

        assert!(cleanup_mount_point(&table, &target, false).is_err());
        assert!(target.exists());

        cleanup_mount_point(&table, &target, true).unwrap();
        assert!(!target.exists());
        assert!(!table.is_mounted(&target));
    }
}
