// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! `seaweedfs-csi node` - the CSI node plugin
//!
//! Serves Identity and Node on the CSI endpoint. Depending on the
//! deployment mode, mount helpers are supervised in-process or by the mount
//! manager service.

use anyhow::{Context, Result};
use clap::Args;
use std::sync::Arc;
use tracing::{info, warn};

use seaweedfs_csi_core::application::{MountManager, NodeService, NodeServiceConfig};
use seaweedfs_csi_core::domain::mount_service::{MountControl, MountService};
use seaweedfs_csi_core::domain::mount_table::MountTable;
use seaweedfs_csi_core::domain::node_config::{
    parse_endpoint, DeploymentMode, DriverConfigManifest, Endpoint,
};
use seaweedfs_csi_core::infrastructure::capacity;
use seaweedfs_csi_core::infrastructure::control_client::GrpcMountControl;
use seaweedfs_csi_core::infrastructure::mount_service_client::MountServiceClient;
use seaweedfs_csi_core::infrastructure::paths::{purge_cache_root, VolumePaths};
use seaweedfs_csi_core::infrastructure::{LinuxMountTable, SupervisorConfig};
use seaweedfs_csi_core::presentation::csi::{self, IdentityService, NodeServer};

use super::shutdown_signal;

#[derive(Args, Debug, Default, Clone)]
pub struct NodeArgs {
    /// CSI endpoint (unix:///path or tcp://host:port)
    #[arg(long, env = "CSI_ENDPOINT")]
    pub endpoint: Option<String>,

    /// Node identifier reported to the orchestrator
    #[arg(long = "node-id", env = "NODE_ID")]
    pub node_id: Option<String>,

    /// Filer addresses, comma separated
    #[arg(long, value_delimiter = ',')]
    pub filer: Vec<String>,

    /// co-located or decoupled
    #[arg(long)]
    pub deployment_mode: Option<DeploymentMode>,
}

impl NodeArgs {
    pub fn apply(&self, config: &mut DriverConfigManifest) {
        if let Some(endpoint) = &self.endpoint {
            config.spec.driver.endpoint = endpoint.clone();
        }
        if let Some(node_id) = &self.node_id {
            config.spec.driver.node_id = node_id.clone();
        }
        if !self.filer.is_empty() {
            config.spec.filer.addresses = self.filer.clone();
        }
        if let Some(mode) = self.deployment_mode {
            config.spec.mount.deployment_mode = mode;
        }
    }
}

pub async fn run(mut config: DriverConfigManifest, args: NodeArgs) -> Result<()> {
    args.apply(&mut config);
    config.validate().context("Configuration validation failed")?;

    let spec = &config.spec;
    let endpoint = parse_endpoint(&spec.driver.endpoint)?;
    info!(
        "Node {} serving driver {} in {:?} mode with filers {:?}",
        spec.driver.node_id, spec.driver.name, spec.mount.deployment_mode, spec.filer.addresses
    );

    let table: Arc<dyn MountTable> = Arc::new(LinuxMountTable::new());
    let control: Arc<dyn MountControl> =
        Arc::new(GrpcMountControl::new(spec.mount.timeouts.control_rpc()));
    let capacity = capacity::from_config(spec.capacity.source);
    let paths = VolumePaths::new(spec.mount.cache_dir.clone(), spec.mount.socket_dir.clone());

    let mut local_manager = None;
    let mounts: Arc<dyn MountService> = match spec.mount.deployment_mode {
        DeploymentMode::CoLocated => {
            // no helper survives a restart, so nothing in the cache is in use
            match purge_cache_root(paths.cache_root()) {
                Ok(0) => {}
                Ok(removed) => info!("Purged {} stale cache entries from {:?}", removed, paths.cache_root()),
                Err(e) => warn!("Failed to purge cache root {:?}: {}", paths.cache_root(), e),
            }
            let manager = Arc::new(MountManager::new(
                spec.mount.weed_binary.clone(),
                Arc::clone(&table),
                Arc::clone(&control),
                SupervisorConfig::from_timeouts(&spec.mount.timeouts),
            ));
            local_manager = Some(Arc::clone(&manager));
            manager
        }
        DeploymentMode::Decoupled => {
            let Endpoint::Unix(socket) = parse_endpoint(&spec.mount.mount_service_endpoint)? else {
                anyhow::bail!("mount service endpoint must be a unix socket");
            };
            let client = MountServiceClient::new(socket, spec.mount.timeouts.mount_service());
            match client.health().await {
                Ok(()) => info!("Mount service reachable at {:?}", client.socket()),
                Err(e) => warn!("Mount service not reachable yet: {}", e),
            }
            Arc::new(client)
        }
    };

    let node_service = Arc::new(NodeService::new(
        NodeServiceConfig {
            defaults: config.mount_defaults(),
            paths,
        },
        mounts,
        control,
        capacity,
        table,
    ));

    let identity = IdentityService::new(spec.driver.name.clone(), env!("CARGO_PKG_VERSION"));
    let node = NodeServer::new(spec.driver.node_id.clone(), node_service.clone());
    csi::serve(&endpoint, identity, node, shutdown_signal())
        .await
        .context("CSI server failed")?;

    if let Some(manager) = local_manager {
        info!("Unstaging {} volume(s) before exit", node_service.volume_count());
        node_service.unstage_all().await;
        manager.shutdown().await;
    }

    info!("Node plugin shutting down");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_override_config() {
        let mut config = DriverConfigManifest::default();
        let args = NodeArgs {
            endpoint: Some("tcp://127.0.0.1:10000".to_string()),
            node_id: Some("node-7".to_string()),
            filer: vec!["a:8888".to_string(), "b:8888".to_string()],
            deployment_mode: Some(DeploymentMode::CoLocated),
        };
        args.apply(&mut config);

        assert_eq!(config.spec.driver.endpoint, "tcp://127.0.0.1:10000");
        assert_eq!(config.spec.driver.node_id, "node-7");
        assert_eq!(config.spec.filer.addresses.len(), 2);
        assert_eq!(config.spec.mount.deployment_mode, DeploymentMode::CoLocated);
        config.validate().unwrap();
    }

    #[test]
    fn test_empty_flags_keep_config() {
        let mut config = DriverConfigManifest::default();
        let before = config.spec.driver.endpoint.clone();
        NodeArgs::default().apply(&mut config);
        assert_eq!(config.spec.driver.endpoint, before);
    }
}
