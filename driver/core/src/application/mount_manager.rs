// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Mount Manager Application Service
//!
//! Hosts the mount supervisor, the live mount registry and the per-volume
//! locks behind the [`MountService`] trait. Runs inside the node plugin in
//! co-located mode and inside the mount manager service in decoupled mode.

use crate::application::keyed_lock::KeyedLock;
use crate::application::mount_registry::{MountEntry, MountRegistry};
use crate::domain::mount::{ConfigureRequest, MountRequest, MountResponse, UnmountRequest};
use crate::domain::mount_service::{MountControl, MountService, MountServiceError};
use crate::domain::mount_table::{best_effort, is_corrupted_mount, MountTable};
use crate::infrastructure::supervisor::{MountSupervisor, SupervisorConfig};
use async_trait::async_trait;
use std::io;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

pub struct MountManager {
    weed_binary: String,
    supervisor: MountSupervisor,
    registry: MountRegistry,
    locks: KeyedLock,
    table: Arc<dyn MountTable>,
    control: Arc<dyn MountControl>,
}

impl MountManager {
    pub fn new(
        weed_binary: impl Into<String>,
        table: Arc<dyn MountTable>,
        control: Arc<dyn MountControl>,
        config: SupervisorConfig,
    ) -> Self {
        Self {
            weed_binary: weed_binary.into(),
            supervisor: MountSupervisor::new(Arc::clone(&table), config),
            registry: MountRegistry::new(),
            locks: KeyedLock::new(),
            table,
            control,
        }
    }

    pub fn registry(&self) -> &MountRegistry {
        &self.registry
    }

    /// Number of live per-volume lock slots
    pub fn lock_count(&self) -> usize {
        self.locks.len()
    }

    /// Stop every supervised helper. Used when the hosting process exits.
    pub async fn shutdown(&self) {
        let volume_ids = self.registry.volume_ids();
        info!("Stopping {} mount helper(s)", volume_ids.len());
        for volume_id in volume_ids {
            let result = self.unmount(UnmountRequest { volume_id: volume_id.clone() }).await;
            best_effort(&format!("unmount of volume {}", volume_id), result);
        }
    }

    /// Unmount whatever is at `target` and make sure it is an existing directory.
    fn ensure_target_clean(&self, target: &Path) -> Result<(), MountServiceError> {
        match self.table.is_mount_point(target) {
            Ok(false) => {}
            Ok(true) => {
                info!("Target path {:?} is an existing mount, unmounting", target);
                self.table.unmount(target)?;
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) if is_corrupted_mount(&e) => {
                warn!("Target path {:?} is a corrupted mount, unmounting", target);
                self.table.unmount(target)?;
            }
            Err(e) => return Err(e.into()),
        }
        std::fs::create_dir_all(target)?;
        Ok(())
    }

    async fn start_mount(&self, request: &MountRequest) -> Result<MountEntry, MountServiceError> {
        self.ensure_target_clean(&request.target_path)?;
        std::fs::create_dir_all(&request.cache_dir)?;
        if let Some(socket_dir) = request.local_socket.parent() {
            std::fs::create_dir_all(socket_dir)?;
        }
        // no live helper owns this volume, so a leftover socket file is stale
        remove_file_if_exists(&request.local_socket)?;

        let process = self
            .supervisor
            .start(
                &request.volume_id,
                &self.weed_binary,
                &request.mount_args,
                &request.target_path,
            )
            .await
            .map_err(|e| MountServiceError::Supervisor(e.to_string()))?;

        Ok(MountEntry {
            volume_id: request.volume_id.clone(),
            target_path: request.target_path.clone(),
            cache_dir: request.cache_dir.clone(),
            local_socket: request.local_socket.clone(),
            process,
        })
    }
}

fn remove_file_if_exists(path: &Path) -> io::Result<()> {
    match std::fs::remove_file(path) {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

fn require_volume_id(volume_id: &str) -> Result<(), MountServiceError> {
    if volume_id.is_empty() {
        return Err(MountServiceError::InvalidRequest("volumeId is required".to_string()));
    }
    Ok(())
}

#[async_trait]
impl MountService for MountManager {
    async fn mount(&self, request: MountRequest) -> Result<MountResponse, MountServiceError> {
        request.validate().map_err(MountServiceError::InvalidRequest)?;
        let guard = self.locks.acquire(&request.volume_id).await;

        if let Some(entry) = self.registry.get(&request.volume_id) {
            if entry.target_path != request.target_path {
                return Err(MountServiceError::AlreadyMounted {
                    volume_id: request.volume_id,
                    target: entry.target_path,
                });
            }
            if !entry.process.has_exited() {
                info!("Volume {} already mounted at {:?}", request.volume_id, request.target_path);
                return Ok(MountResponse { local_socket: entry.local_socket });
            }
            warn!(
                "Mount helper for volume {} exited on its own, starting a new one",
                request.volume_id
            );
            self.registry.remove(&request.volume_id);
        }

        let entry = match self.start_mount(&request).await {
            Ok(entry) => entry,
            Err(e) => {
                // nothing is registered, so a retry starts from a fresh slot
                self.locks.release(guard);
                return Err(e);
            }
        };
        let local_socket = entry.local_socket.clone();
        info!(
            "Started mount helper (pid {}) for volume {} at {:?}",
            entry.process.pid(),
            request.volume_id,
            request.target_path
        );
        self.registry.put(entry);

        Ok(MountResponse { local_socket })
    }

    async fn unmount(&self, request: UnmountRequest) -> Result<(), MountServiceError> {
        require_volume_id(&request.volume_id)?;
        let guard = self.locks.acquire(&request.volume_id).await;

        let Some(entry) = self.registry.get(&request.volume_id) else {
            info!("Volume {} not mounted", request.volume_id);
            self.locks.release(guard);
            return Ok(());
        };

        // the reaper unmounts the target once the helper is gone
        if let Err(e) = entry.process.stop(self.supervisor.config().graceful_stop).await {
            self.locks.release(guard);
            return Err(MountServiceError::Supervisor(e.to_string()));
        }

        best_effort(
            &format!("removal of cache dir {:?}", entry.cache_dir),
            std::fs::remove_dir_all(&entry.cache_dir),
        );
        best_effort(
            &format!("removal of control socket {:?}", entry.local_socket),
            remove_file_if_exists(&entry.local_socket),
        );

        self.registry.remove(&request.volume_id);
        self.locks.release(guard);
        info!("Stopped mount helper for volume {} at {:?}", request.volume_id, entry.target_path);
        Ok(())
    }

    async fn configure(&self, request: ConfigureRequest) -> Result<(), MountServiceError> {
        require_volume_id(&request.volume_id)?;
        let _guard = self.locks.acquire(&request.volume_id).await;

        let entry = self
            .registry
            .get(&request.volume_id)
            .ok_or_else(|| MountServiceError::NotMounted(request.volume_id.clone()))?;

        self.control
            .set_capacity(&entry.local_socket, request.collection_capacity)
            .await?;
        info!(
            "Configured volume {} with capacity {}",
            request.volume_id, request.collection_capacity
        );
        Ok(())
    }
}
