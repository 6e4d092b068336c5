// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use thiserror::Error;

// ============================================================================
// Value Objects
// ============================================================================

/// Orchestrator-assigned volume identifier.
///
/// Opaque to the node plugin; used as the lock key, registry key and as the
/// seed for the per-volume cache directory and control socket paths.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VolumeId(String);

impl VolumeId {
    pub fn new(id: impl Into<String>) -> Result<Self, VolumeError> {
        let id = id.into();
        if id.is_empty() {
            return Err(VolumeError::MissingField("volume ID"));
        }
        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for VolumeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for VolumeId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Access mode declared on a volume capability.
///
/// Mirrors the CSI `VolumeCapability.AccessMode.Mode` enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessMode {
    #[default]
    Unknown,
    SingleNodeWriter,
    SingleNodeReaderOnly,
    MultiNodeReaderOnly,
    MultiNodeSingleWriter,
    MultiNodeMultiWriter,
    SingleNodeSingleWriter,
    SingleNodeMultiWriter,
}

impl AccessMode {
    pub fn is_reader_only(&self) -> bool {
        matches!(self, Self::SingleNodeReaderOnly | Self::MultiNodeReaderOnly)
    }
}

/// Resolve the effective read-only flag.
///
/// Both the explicit request flag and the access mode are authoritative;
/// either one is enough to force a read-only mount.
pub fn is_read_only(readonly_flag: bool, access_mode: AccessMode) -> bool {
    readonly_flag || access_mode.is_reader_only()
}

/// Lifecycle position of a volume on this node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VolumeState {
    Unstaged,
    Staged,
    Published,
}

// ============================================================================
// Volume Aggregate
// ============================================================================

/// A volume staged on this node.
///
/// `staged_path` carries the real mount; every entry in `target_paths` is a
/// bind mount of it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Volume {
    pub id: VolumeId,
    pub staged_path: PathBuf,
    pub target_paths: BTreeSet<PathBuf>,
    pub control_socket: PathBuf,
    pub read_only: bool,
}

impl Volume {
    pub fn staged(
        id: VolumeId,
        staged_path: impl Into<PathBuf>,
        control_socket: impl Into<PathBuf>,
        read_only: bool,
    ) -> Self {
        Self {
            id,
            staged_path: staged_path.into(),
            target_paths: BTreeSet::new(),
            control_socket: control_socket.into(),
            read_only,
        }
    }

    pub fn state(&self) -> VolumeState {
        if self.staged_path.as_os_str().is_empty() {
            VolumeState::Unstaged
        } else if self.target_paths.is_empty() {
            VolumeState::Staged
        } else {
            VolumeState::Published
        }
    }

    /// Record a bind target. Returns false if it was already recorded.
    pub fn add_target(&mut self, target: impl Into<PathBuf>) -> bool {
        self.target_paths.insert(target.into())
    }

    pub fn remove_target(&mut self, target: &Path) -> bool {
        self.target_paths.remove(target)
    }
}

// ============================================================================
// Lifecycle Requests
// ============================================================================

#[derive(Debug, Clone)]
pub struct StageRequest {
    pub volume_id: String,
    pub staging_path: PathBuf,
    pub volume_context: HashMap<String, String>,
    pub readonly: bool,
    pub access_mode: AccessMode,
}

impl StageRequest {
    pub fn read_only(&self) -> bool {
        is_read_only(self.readonly, self.access_mode)
    }
}

#[derive(Debug, Clone)]
pub struct PublishRequest {
    pub volume_id: String,
    pub staging_path: PathBuf,
    pub target_path: PathBuf,
    pub volume_context: HashMap<String, String>,
    pub readonly: bool,
    pub access_mode: AccessMode,
}

impl PublishRequest {
    pub fn read_only(&self) -> bool {
        is_read_only(self.readonly, self.access_mode)
    }

    /// The stage request used when a publish has to re-establish staging.
    pub fn to_stage_request(&self) -> StageRequest {
        StageRequest {
            volume_id: self.volume_id.clone(),
            staging_path: self.staging_path.clone(),
            volume_context: self.volume_context.clone(),
            readonly: self.readonly,
            access_mode: self.access_mode,
        }
    }
}

#[derive(Debug, Clone)]
pub struct UnpublishRequest {
    pub volume_id: String,
    pub target_path: PathBuf,
}

#[derive(Debug, Clone)]
pub struct UnstageRequest {
    pub volume_id: String,
    pub staging_path: PathBuf,
}

#[derive(Debug, Clone)]
pub struct ExpandRequest {
    pub volume_id: String,
    pub volume_path: PathBuf,
    pub capacity_bytes: i64,
}

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, Error, PartialEq, Eq)]
pub enum VolumeError {
    #[error("{0} missing in request")]
    MissingField(&'static str),

    #[error("invalid capacity {0}: must not be negative")]
    InvalidCapacity(i64),
}

/// Reject empty paths with the matching request-field name.
pub fn require_path<'a>(path: &'a Path, field: &'static str) -> Result<&'a Path, VolumeError> {
    if path.as_os_str().is_empty() {
        Err(VolumeError::MissingField(field))
    } else {
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_volume_id_rejects_empty() {
        assert_eq!(VolumeId::new(""), Err(VolumeError::MissingField("volume ID")));
        assert_eq!(VolumeId::new("vol-1").unwrap().as_str(), "vol-1");
    }

    #[test]
    fn test_read_only_is_flag_or_access_mode() {
        assert!(!is_read_only(false, AccessMode::SingleNodeWriter));
        assert!(is_read_only(true, AccessMode::SingleNodeWriter));
        assert!(is_read_only(false, AccessMode::SingleNodeReaderOnly));
        assert!(is_read_only(false, AccessMode::MultiNodeReaderOnly));
        assert!(!is_read_only(false, AccessMode::MultiNodeMultiWriter));
    }

    #[test]
    fn test_state_follows_targets() {
        let mut volume = Volume::staged(
            VolumeId::new("vol-1").unwrap(),
            "/stage/vol-1",
            "/run/vol-1.sock",
            false,
        );
        assert_eq!(volume.state(), VolumeState::Staged);

        assert!(volume.add_target("/target/pod-a"));
        assert!(!volume.add_target("/target/pod-a"));
        assert_eq!(volume.state(), VolumeState::Published);

        assert!(volume.remove_target(Path::new("/target/pod-a")));
        assert_eq!(volume.state(), VolumeState::Staged);
    }

    #[test]
    fn test_require_path() {
        assert!(require_path(Path::new(""), "target path").is_err());
        assert!(require_path(Path::new("/t"), "target path").is_ok());
    }
}
