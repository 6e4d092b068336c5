// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Deterministic per-volume paths.
//!
//! Cache directories and control sockets are derived from a SHA-256 of the
//! volume ID, so they can be recomputed after a restart without persisted
//! state and never depend on the characters or length of the ID.

use sha2::{Digest, Sha256};
use std::io;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumePaths {
    cache_root: PathBuf,
    socket_dir: PathBuf,
}

impl VolumePaths {
    pub fn new(cache_root: impl Into<PathBuf>, socket_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_root: cache_root.into(),
            socket_dir: socket_dir.into(),
        }
    }

    pub fn cache_root(&self) -> &Path {
        &self.cache_root
    }

    /// `<cache_root>/<sha256 hex>`
    pub fn cache_dir(&self, volume_id: &str) -> PathBuf {
        self.cache_root.join(hex::encode(Sha256::digest(volume_id.as_bytes())))
    }

    /// `<socket_dir>/seaweedfs-mount-<first 64 bits of sha256, hex>.sock`
    pub fn control_socket(&self, volume_id: &str) -> PathBuf {
        let digest = Sha256::digest(volume_id.as_bytes());
        self.socket_dir
            .join(format!("seaweedfs-mount-{}.sock", hex::encode(&digest[..8])))
    }
}

/// Remove everything below the cache root left over from a previous run.
///
/// Skipped when the cache root is the OS temp dir, which other programs share.
pub fn purge_cache_root(cache_root: &Path) -> io::Result<usize> {
    if cache_root == std::env::temp_dir() {
        info!("Cache root {:?} is the system temp dir, not purging", cache_root);
        return Ok(0);
    }

    let entries = match std::fs::read_dir(cache_root) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e),
    };

    let mut removed = 0;
    for entry in entries {
        let path = entry?.path();
        let result = if path.is_dir() {
            std::fs::remove_dir_all(&path)
        } else {
            std::fs::remove_file(&path)
        };
        match result {
            Ok(()) => removed += 1,
            Err(e) => warn!("Failed to purge {:?}: {}", path, e),
        }
    }
    info!("Purged {} stale entries from cache root {:?}", removed, cache_root);
    Ok(removed)
}
