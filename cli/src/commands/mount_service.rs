// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! `seaweedfs-csi mount-service` - the mount manager service
//!
//! Owns every mount helper on the host and serves the mount API on a unix
//! socket shared with the node plugin.

use anyhow::{Context, Result};
use clap::Args;
use std::sync::Arc;
use tracing::info;

use seaweedfs_csi_core::application::MountManager;
use seaweedfs_csi_core::domain::mount_service::MountControl;
use seaweedfs_csi_core::domain::node_config::{parse_endpoint, DriverConfigManifest, Endpoint};
use seaweedfs_csi_core::infrastructure::control_client::GrpcMountControl;
use seaweedfs_csi_core::infrastructure::{LinuxMountTable, SupervisorConfig};
use seaweedfs_csi_core::presentation::mount_api;

use super::shutdown_signal;

#[derive(Args, Debug, Default, Clone)]
pub struct MountServiceArgs {
    /// Listen endpoint (unix:///path)
    #[arg(long, env = "MOUNT_SERVICE_ENDPOINT")]
    pub endpoint: Option<String>,

    /// Mount helper executable
    #[arg(long)]
    pub weed_binary: Option<String>,
}

impl MountServiceArgs {
    pub fn apply(&self, config: &mut DriverConfigManifest) {
        if let Some(endpoint) = &self.endpoint {
            config.spec.mount.mount_service_endpoint = endpoint.clone();
        }
        if let Some(binary) = &self.weed_binary {
            config.spec.mount.weed_binary = binary.clone();
        }
    }
}

pub async fn run(mut config: DriverConfigManifest, args: MountServiceArgs) -> Result<()> {
    args.apply(&mut config);
    config.validate().context("Configuration validation failed")?;

    let mount = &config.spec.mount;
    let socket = match parse_endpoint(&mount.mount_service_endpoint)? {
        Endpoint::Unix(socket) => socket,
        Endpoint::Tcp(address) => {
            anyhow::bail!("mount service only listens on unix sockets, got tcp://{}", address)
        }
    };

    let control: Arc<dyn MountControl> = Arc::new(GrpcMountControl::new(mount.timeouts.control_rpc()));
    let manager = Arc::new(MountManager::new(
        mount.weed_binary.clone(),
        Arc::new(LinuxMountTable::new()),
        control,
        SupervisorConfig::from_timeouts(&mount.timeouts),
    ));

    mount_api::serve(&socket, manager.clone(), shutdown_signal())
        .await
        .context("Mount service failed")?;

    manager.shutdown().await;
    info!("Mount service shutting down");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_override_endpoint() {
        let mut config = DriverConfigManifest::default();
        let args = MountServiceArgs {
            endpoint: Some("unix:///tmp/mount.sock".to_string()),
            weed_binary: Some("/usr/local/bin/weed".to_string()),
        };
        args.apply(&mut config);
        assert_eq!(config.spec.mount.mount_service_endpoint, "unix:///tmp/mount.sock");
        assert_eq!(config.spec.mount.weed_binary, "/usr/local/bin/weed");
    }
}
