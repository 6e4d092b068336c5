// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Node Volume Lifecycle Application Service
//!
//! Implements stage, publish, unpublish, unstage and expand for volumes on
//! this node, serialized per volume through [`KeyedLock`]. Volume records
//! are reconciled against the mount table on every call, which is how the
//! plugin recovers after a restart:
//! - a healthy staging mount without a record is adopted as-is
//! - an unhealthy staging path is torn down and staged again
//!
//! A healthy mount is never restarted, since workloads may be using it
//! through their bind mounts.
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** Implements the CSI node volume lifecycle with self-healing

use crate::application::keyed_lock::KeyedLock;
use crate::domain::capacity::CapacitySource;
use crate::domain::mount::{
    declared_capacity, MountArgs, MountArgsError, MountDefaults, MountRequest, MountTarget,
    UnmountRequest,
};
use crate::domain::mount_service::{ControlError, MountControl, MountService, MountServiceError};
use crate::domain::mount_table::{
    best_effort, cleanup_mount_point, is_corrupted_mount, path_present, MountTable,
};
use crate::domain::volume::{
    is_read_only, require_path, ExpandRequest, PublishRequest, StageRequest, UnpublishRequest,
    UnstageRequest, Volume, VolumeError, VolumeId,
};
use crate::infrastructure::paths::VolumePaths;
use crate::infrastructure::seaweedfs::mount_argv;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::io;
use std::os::unix::fs::DirBuilderExt;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum NodeError {
    #[error("{0}")]
    InvalidArgument(String),

    #[error("{0}")]
    FailedPrecondition(String),

    #[error("{0}")]
    PermissionDenied(String),

    #[error("{0}")]
    Internal(String),
}

impl NodeError {
    fn io(context: impl std::fmt::Display, err: io::Error) -> Self {
        let message = format!("{}: {}", context, err);
        if err.kind() == io::ErrorKind::PermissionDenied {
            Self::PermissionDenied(message)
        } else {
            Self::Internal(message)
        }
    }
}

impl From<VolumeError> for NodeError {
    fn from(err: VolumeError) -> Self {
        Self::InvalidArgument(err.to_string())
    }
}

impl From<MountArgsError> for NodeError {
    fn from(err: MountArgsError) -> Self {
        Self::InvalidArgument(err.to_string())
    }
}

impl From<ControlError> for NodeError {
    fn from(err: ControlError) -> Self {
        Self::Internal(err.to_string())
    }
}

impl From<MountServiceError> for NodeError {
    fn from(err: MountServiceError) -> Self {
        match err {
            MountServiceError::InvalidRequest(_) => Self::InvalidArgument(err.to_string()),
            MountServiceError::Remote { status: 400, .. } => Self::InvalidArgument(err.to_string()),
            MountServiceError::AlreadyMounted { .. } => Self::FailedPrecondition(err.to_string()),
            MountServiceError::Io(e) => Self::io("mount service", e),
            other => Self::Internal(other.to_string()),
        }
    }
}

// ============================================================================
// Service Trait
// ============================================================================

#[async_trait]
pub trait VolumeLifecycle: Send + Sync {
    /// Establish the real mount of a volume at its staging path
    async fn stage(&self, request: StageRequest) -> Result<(), NodeError>;

    /// Bind-mount a staged volume onto a workload's target path
    async fn publish(&self, request: PublishRequest) -> Result<(), NodeError>;

    /// Remove one workload bind mount
    async fn unpublish(&self, request: UnpublishRequest) -> Result<(), NodeError>;

    /// Tear down the real mount and forget the volume
    async fn unstage(&self, request: UnstageRequest) -> Result<(), NodeError>;

    /// Push a new quota to a staged volume. Returns the applied capacity.
    async fn expand(&self, request: ExpandRequest) -> Result<i64, NodeError>;
}

// ============================================================================
// Standard Implementation
// ============================================================================

#[derive(Debug, Clone)]
pub struct NodeServiceConfig {
    pub defaults: MountDefaults,
    pub paths: VolumePaths,
}

pub struct NodeService {
    config: NodeServiceConfig,
    mounts: Arc<dyn MountService>,
    control: Arc<dyn MountControl>,
    capacity: Arc<dyn CapacitySource>,
    table: Arc<dyn MountTable>,
    volumes: RwLock<HashMap<String, Volume>>,
    locks: KeyedLock,
}

impl NodeService {
    pub fn new(
        config: NodeServiceConfig,
        mounts: Arc<dyn MountService>,
        control: Arc<dyn MountControl>,
        capacity: Arc<dyn CapacitySource>,
        table: Arc<dyn MountTable>,
    ) -> Self {
        Self {
            config,
            mounts,
            control,
            capacity,
            table,
            volumes: RwLock::new(HashMap::new()),
            locks: KeyedLock::new(),
        }
    }

    pub fn volume(&self, volume_id: &str) -> Option<Volume> {
        self.volumes.read().get(volume_id).cloned()
    }

    pub fn volume_count(&self) -> usize {
        self.volumes.read().len()
    }

    /// Number of live per-volume lock slots
    pub fn lock_count(&self) -> usize {
        self.locks.len()
    }

    /// Unstage every known volume. Used on shutdown in co-located mode so no
    /// mount helper outlives the plugin.
    pub async fn unstage_all(&self) {
        let staged: Vec<(String, std::path::PathBuf)> = self
            .volumes
            .read()
            .values()
            .map(|v| (v.id.to_string(), v.staged_path.clone()))
            .collect();

        let cleanups = staged.into_iter().map(|(volume_id, staging_path)| async move {
            info!("Cleaning up volume {} at {:?}", volume_id, staging_path);
            let request = UnstageRequest {
                volume_id: volume_id.clone(),
                staging_path,
            };
            if let Err(e) = self.unstage(request).await {
                warn!("Error cleaning up volume {}: {}", volume_id, e);
            }
        });
        futures::future::join_all(cleanups).await;
    }

    /// A staging path is healthy when it is a mount point that answers a stat.
    fn is_staging_healthy(&self, path: &Path) -> bool {
        match self.table.is_mount_point(path) {
            Ok(true) => match self.table.probe(path) {
                Ok(()) => true,
                Err(e) => {
                    debug!("Staging path {:?} is a stale mount: {}", path, e);
                    false
                }
            },
            Ok(false) => {
                debug!("Staging path {:?} is not a mount point", path);
                false
            }
            Err(e) => {
                debug!("Staging path {:?} cannot be checked: {}", path, e);
                false
            }
        }
    }

    /// Whether something (live or dead) is mounted at `path`.
    fn has_mount(&self, path: &Path) -> bool {
        match self.table.is_mount_point(path) {
            Ok(mounted) => mounted,
            Err(e) => is_corrupted_mount(&e),
        }
    }

    /// Adopt a live staging mount that has no record, e.g. after a restart.
    fn rebuild_from_staging(&self, id: &VolumeId, staging: &Path, read_only: bool) -> Volume {
        let volume = Volume::staged(
            id.clone(),
            staging,
            self.config.paths.control_socket(id.as_str()),
            read_only,
        );
        self.volumes.write().insert(id.to_string(), volume.clone());
        info!("Rebuilt record of volume {} from healthy staging path {:?}", id, staging);
        volume
    }

    /// Unmount (falling back to a lazy unmount), wipe and recreate `path`.
    fn cleanup_stale_mount(&self, path: &Path) -> io::Result<()> {
        if self.has_mount(path) {
            info!("Force unmounting stale mount point {:?}", path);
            if let Err(e) = self.table.unmount(path) {
                warn!("Unmount of {:?} failed ({}), trying lazy unmount", path, e);
                best_effort("lazy unmount", self.table.unmount_lazy(path));
            }
        }
        if matches!(self.table.is_mount_point(path), Ok(true)) {
            return Err(io::Error::other(format!("{:?} is still mounted", path)));
        }

        match std::fs::remove_dir_all(path) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => return Err(e),
            _ => {}
        }
        std::fs::DirBuilder::new().recursive(true).mode(0o750).create(path)?;
        debug!("Cleaned up stale mount at {:?}", path);
        Ok(())
    }

    async fn stage_locked(&self, id: &VolumeId, request: &StageRequest) -> Result<(), NodeError> {
        let staging = request.staging_path.as_path();
        let read_only = request.read_only();
        let existing = self.volume(id.as_str());

        if self.is_staging_healthy(staging) {
            if existing.is_some() {
                info!("Volume {} is already staged at {:?}", id, staging);
            } else {
                self.rebuild_from_staging(id, staging, read_only);
            }
            return Ok(());
        }

        if existing.is_some() || self.has_mount(staging) {
            warn!("Staging path {:?} of volume {} is unhealthy, restarting its mount", staging, id);
            let result = self
                .mounts
                .unmount(UnmountRequest { volume_id: id.to_string() })
                .await;
            best_effort("stop of the previous mount helper", result);
            self.volumes.write().remove(id.as_str());
        }
        if path_present(staging) {
            self.cleanup_stale_mount(staging)
                .map_err(|e| NodeError::io(format!("cleaning up staging path {:?}", staging), e))?;
        }

        let declared = declared_capacity(&request.volume_context)?;
        let target = MountTarget {
            volume_id: id.to_string(),
            target: staging.to_path_buf(),
            cache_dir: self.config.paths.cache_dir(id.as_str()),
            local_socket: self.config.paths.control_socket(id.as_str()),
            read_only,
        };
        let args = MountArgs::resolve(&self.config.defaults, target, &request.volume_context)?;

        let response = self
            .mounts
            .mount(MountRequest {
                volume_id: id.to_string(),
                target_path: staging.to_path_buf(),
                cache_dir: args.cache_dir.clone(),
                local_socket: args.local_socket.clone(),
                mount_args: mount_argv(&args),
            })
            .await?;

        let volume = Volume::staged(id.clone(), staging, response.local_socket, read_only);
        self.volumes.write().insert(id.to_string(), volume.clone());

        self.apply_initial_quota(&volume, declared).await;
        info!("Volume {} successfully staged to {:?}", id, staging);
        Ok(())
    }

    /// Quota is enforced per mount, so it is pushed after every fresh stage.
    /// A missing capacity record is not an error.
    async fn apply_initial_quota(&self, volume: &Volume, declared: Option<i64>) {
        let capacity = match self.capacity.capacity(volume.id.as_str()).await {
            Ok(bytes) => Some(bytes),
            Err(e) => {
                info!("No orchestrator capacity for volume {}: {}", volume.id, e);
                declared
            }
        };

        let Some(bytes) = capacity else {
            return;
        };
        match self.control.set_capacity(&volume.control_socket, bytes).await {
            Ok(()) => info!("Applied quota of {} bytes to volume {}", bytes, volume.id),
            Err(e) => warn!("Failed to apply initial quota to volume {}: {}", volume.id, e),
        }
    }

    fn bind_target(&self, staging: &Path, target: &Path, read_only: bool) -> Result<bool, NodeError> {
        match self.table.is_mount_point(target) {
            Ok(true) => return Ok(false),
            Ok(false) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) if is_corrupted_mount(&e) => {
                warn!("Target path {:?} is a corrupted mount, cleaning it up", target);
                cleanup_mount_point(self.table.as_ref(), target, true)
                    .map_err(|e| NodeError::io(format!("cleaning up target {:?}", target), e))?;
            }
            Err(e) => return Err(NodeError::io(format!("checking target {:?}", target), e)),
        }

        std::fs::DirBuilder::new()
            .recursive(true)
            .mode(0o750)
            .create(target)
            .map_err(|e| NodeError::io(format!("creating target {:?}", target), e))?;
        self.table
            .bind_mount(staging, target, read_only)
            .map_err(|e| NodeError::io(format!("bind mounting {:?} to {:?}", staging, target), e))?;
        Ok(true)
    }
}

#[async_trait]
impl VolumeLifecycle for NodeService {
    async fn stage(&self, request: StageRequest) -> Result<(), NodeError> {
        let id = VolumeId::new(request.volume_id.clone())?;
        require_path(&request.staging_path, "staging target path")?;
        info!("Node stage volume {} to {:?}", id, request.staging_path);

        let guard = self.locks.acquire(id.as_str()).await;
        match self.stage_locked(&id, &request).await {
            Ok(()) => Ok(()),
            Err(e) => {
                // a retry must start from a clean slate
                self.locks.release(guard);
                Err(e)
            }
        }
    }

    async fn publish(&self, request: PublishRequest) -> Result<(), NodeError> {
        let id = VolumeId::new(request.volume_id.clone())?;
        let target = require_path(&request.target_path, "target path")?;
        let staging = require_path(&request.staging_path, "staging target path")?;
        info!("Node publish volume {} to {:?}", id, target);

        let mut guard = self.locks.acquire(id.as_str()).await;

        if !self.is_staging_healthy(staging) {
            info!("Staging path {:?} is unhealthy, re-staging volume {}", staging, id);
            // stage takes the volume lock itself
            drop(guard);
            self.stage(request.to_stage_request()).await?;
            guard = self.locks.acquire(id.as_str()).await;

            if self.volume(id.as_str()).is_none() || !self.is_staging_healthy(staging) {
                return Err(NodeError::Internal(format!(
                    "volume {} is not staged at {:?} after re-staging",
                    id, staging
                )));
            }
            info!("Self-healing completed for volume {}", id);
        } else if self.volume(id.as_str()).is_none() {
            // the readonly flag is per target; only the access mode describes the volume
            self.rebuild_from_staging(&id, staging, is_read_only(false, request.access_mode));
        }

        let staged_read_only = self.volume(id.as_str()).is_some_and(|v| v.read_only);
        if let Some(volume) = self.volume(id.as_str()) {
            if volume.staged_path != staging {
                warn!(
                    "Volume {} is staged at {:?}, publish names {:?}",
                    id, volume.staged_path, staging
                );
            }
        }

        let read_only = request.read_only() || staged_read_only;
        if !self.bind_target(staging, target, read_only)? {
            info!("Target {:?} is already a mount point, volume {} already published", target, id);
        }
        if let Some(volume) = self.volumes.write().get_mut(id.as_str()) {
            volume.add_target(target);
        }

        drop(guard);
        info!("Volume {} successfully published to {:?}", id, target);
        Ok(())
    }

    async fn unpublish(&self, request: UnpublishRequest) -> Result<(), NodeError> {
        let id = VolumeId::new(request.volume_id.clone())?;
        let target = require_path(&request.target_path, "target path")?;
        info!("Node unpublish volume {} from {:?}", id, target);

        let _guard = self.locks.acquire(id.as_str()).await;

        if self.volume(id.as_str()).is_none() {
            warn!("Volume {} has not been published, cleaning {:?} anyway", id, target);
            best_effort(
                &format!("cleanup of {:?}", target),
                cleanup_mount_point(self.table.as_ref(), target, true),
            );
            return Ok(());
        }

        cleanup_mount_point(self.table.as_ref(), target, true)
            .map_err(|e| NodeError::io(format!("unmounting target {:?}", target), e))?;
        if let Some(volume) = self.volumes.write().get_mut(id.as_str()) {
            volume.remove_target(target);
        }

        info!("Volume {} successfully unpublished from {:?}", id, target);
        Ok(())
    }

    async fn unstage(&self, request: UnstageRequest) -> Result<(), NodeError> {
        let id = VolumeId::new(request.volume_id.clone())?;
        let staging = require_path(&request.staging_path, "staging target path")?;
        info!("Node unstage volume {} from {:?}", id, staging);

        let guard = self.locks.acquire(id.as_str()).await;

        match self.volume(id.as_str()) {
            None => {
                warn!("Volume {} has not been staged, cleaning {:?} anyway", id, staging);
                // a decoupled mount service may still run a helper for it
                let result = self
                    .mounts
                    .unmount(UnmountRequest { volume_id: id.to_string() })
                    .await;
                best_effort("stop of an untracked mount helper", result);
                best_effort(
                    &format!("cleanup of {:?}", staging),
                    cleanup_mount_point(self.table.as_ref(), staging, true),
                );
            }
            Some(volume) => {
                if volume.staged_path != staging {
                    warn!(
                        "Staging path {:?} differs from {:?} recorded for volume {}",
                        staging, volume.staged_path, id
                    );
                }
                let teardown = async {
                    self.mounts
                        .unmount(UnmountRequest { volume_id: id.to_string() })
                        .await?;
                    cleanup_mount_point(self.table.as_ref(), staging, true).map_err(|e| {
                        NodeError::io(format!("removing staging path {:?}", staging), e)
                    })
                };
                if let Err(e) = teardown.await {
                    self.locks.release(guard);
                    return Err(e);
                }
                self.volumes.write().remove(id.as_str());
            }
        }

        self.locks.release(guard);
        info!("Volume {} successfully unstaged from {:?}", id, staging);
        Ok(())
    }

    async fn expand(&self, request: ExpandRequest) -> Result<i64, NodeError> {
        let id = VolumeId::new(request.volume_id.clone())?;
        require_path(&request.volume_path, "volume path")?;
        if request.capacity_bytes < 0 {
            return Err(VolumeError::InvalidCapacity(request.capacity_bytes).into());
        }
        info!("Node expand volume {} to {} bytes", id, request.capacity_bytes);

        let _guard = self.locks.acquire(id.as_str()).await;

        match self.volume(id.as_str()) {
            Some(volume) => {
                self.control
                    .set_capacity(&volume.control_socket, request.capacity_bytes)
                    .await?;
                info!("Volume {} quota set to {} bytes", id, request.capacity_bytes);
            }
            None => debug!("Volume {} is not staged here, quota applies on next stage", id),
        }
        Ok(request.capacity_bytes)
    }
}
