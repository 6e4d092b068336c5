// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Mount Service Traits
//!
//! [`MountService`] is what the node lifecycle uses to start and stop mount
//! helpers. It is implemented in-process by the mount manager (co-located
//! mode) and by the client of the out-of-process mount manager (decoupled
//! mode). [`MountControl`] reaches a running helper's control channel.
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Purpose:** Defines the mount supervision and runtime control seams

use crate::domain::mount::{ConfigureRequest, MountRequest, MountResponse, UnmountRequest};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MountServiceError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("volume {volume_id} already mounted at {target:?}")]
    AlreadyMounted { volume_id: String, target: PathBuf },

    #[error("volume {0} is not mounted")]
    NotMounted(String),

    #[error("mount helper failed: {0}")]
    Supervisor(String),

    #[error("control channel: {0}")]
    Control(#[from] ControlError),

    #[error("mount service unreachable: {0}")]
    Transport(String),

    #[error("mount service error ({status}): {message}")]
    Remote { status: u16, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[async_trait]
pub trait MountService: Send + Sync {
    /// Start a mount helper for the request's volume and wait for the mount.
    ///
    /// # Returns
    ///
    /// * `Ok(MountResponse)` with the helper's control socket, also when the
    ///   volume is already mounted at the same target
    /// * `Err(MountServiceError::AlreadyMounted)` if mounted elsewhere
    async fn mount(&self, request: MountRequest) -> Result<MountResponse, MountServiceError>;

    /// Stop the volume's helper and reclaim its cache directory.
    /// Unmounting a volume that is not mounted succeeds.
    async fn unmount(&self, request: UnmountRequest) -> Result<(), MountServiceError>;

    /// Push a new quota to a mounted volume's helper.
    async fn configure(&self, request: ConfigureRequest) -> Result<(), MountServiceError>;
}

#[derive(Debug, Error)]
pub enum ControlError {
    #[error("failed to connect to {socket:?}: {message}")]
    Connect { socket: PathBuf, message: String },

    #[error("configure rejected: {0}")]
    Rpc(String),

    #[error("timed out after {0:?}")]
    Timeout(std::time::Duration),
}

/// Runtime reconfiguration of a running mount helper.
#[async_trait]
pub trait MountControl: Send + Sync {
    /// Set the collection capacity of the helper listening on `socket`.
    ///
    /// `capacity_bytes` is the declared volume capacity; the one-byte
    /// "no quota" sentinel is translated before it goes on the wire.
    async fn set_capacity(&self, socket: &Path, capacity_bytes: i64) -> Result<(), ControlError>;
}
