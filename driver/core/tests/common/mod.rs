// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Shared fixtures: a fake `weed` helper script and a mount table that
//! treats a marker file as "mounted", so real helper processes can be
//! supervised without FUSE or root.

#![allow(dead_code)]

use parking_lot::RwLock;
use seaweedfs_csi_core::domain::mount_table::MountTable;
use std::collections::HashSet;
use std::io;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

pub const MARKER: &str = ".mounted";

/// Helper that "mounts" by dropping the marker into its `-dir=` target,
/// then idles until it is signalled. Targets containing "slow" take a
/// second to come up.
const FAKE_WEED: &str = r#"#!/bin/sh
for arg in "$@"; do
  case "$arg" in
    -dir=*) dir="${arg#-dir=}" ;;
  esac
done
echo "mounting $dir"
case "$dir" in
  *slow*) sleep 1 ;;
esac
touch "$dir/.mounted"
exec sleep 30
"#;

/// Helper that dies before mounting anything.
const FAILING_WEED: &str = r#"#!/bin/sh
echo "filer unreachable" >&2
exit 3
"#;

fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, body).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

pub fn fake_weed(dir: &Path) -> String {
    write_script(dir, "fake-weed", FAKE_WEED).to_string_lossy().into_owned()
}

pub fn failing_weed(dir: &Path) -> String {
    write_script(dir, "failing-weed", FAILING_WEED).to_string_lossy().into_owned()
}

#[derive(Debug, Default)]
pub struct MarkerMountTable {
    stale: RwLock<HashSet<PathBuf>>,
}

impl MarkerMountTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_mounted(&self, path: &Path) -> bool {
        path.join(MARKER).exists()
    }

    /// Simulate a helper that died and left a dead FUSE mount behind.
    pub fn mark_stale(&self, path: &Path) {
        let _ = std::fs::remove_file(path.join(MARKER));
        self.stale.write().insert(path.to_path_buf());
    }

    fn stale_error() -> io::Error {
        io::Error::from_raw_os_error(libc::ENOTCONN)
    }
}

impl MountTable for MarkerMountTable {
    fn is_mount_point(&self, path: &Path) -> io::Result<bool> {
        if self.stale.read().contains(path) {
            return Err(Self::stale_error());
        }
        std::fs::symlink_metadata(path)?;
        Ok(self.is_mounted(path))
    }

    fn probe(&self, path: &Path) -> io::Result<()> {
        if self.stale.read().contains(path) {
            return Err(Self::stale_error());
        }
        std::fs::metadata(path).map(|_| ())
    }

    fn bind_mount(&self, source: &Path, target: &Path, read_only: bool) -> io::Result<()> {
        std::fs::metadata(source)?;
        let mode = if read_only { "ro" } else { "rw" };
        std::fs::write(target.join(MARKER), format!("{} {}", source.display(), mode))
    }

    fn unmount(&self, path: &Path) -> io::Result<()> {
        if self.stale.write().remove(path) {
            return Ok(());
        }
        match std::fs::remove_file(path.join(MARKER)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                Err(io::Error::from_raw_os_error(libc::EINVAL))
            }
            Err(e) => Err(e),
        }
    }

    fn unmount_lazy(&self, path: &Path) -> io::Result<()> {
        self.unmount(path)
    }
}
