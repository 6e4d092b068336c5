// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Configuration management commands
//!
//! Commands: show, validate, generate

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::Colorize;
use std::path::PathBuf;

use seaweedfs_csi_core::domain::node_config::{DeploymentMode, DriverConfigManifest};

#[derive(Subcommand)]
pub enum ConfigCommand {
    /// Show current configuration
    Show {
        /// Show config file paths checked
        #[arg(long)]
        paths: bool,
    },

    /// Validate configuration file
    Validate {
        /// Path to config file (default: discover)
        #[arg(value_name = "FILE")]
        file: Option<PathBuf>,
    },

    /// Generate sample configuration with every default spelled out
    Generate {
        /// Output path (default: ./seaweedfs-csi.yaml)
        #[arg(short, long, default_value = "./seaweedfs-csi.yaml")]
        output: PathBuf,
    },
}

pub async fn handle_command(
    command: ConfigCommand,
    config_override: Option<PathBuf>,
) -> Result<()> {
    match command {
        ConfigCommand::Show { paths } => show(config_override, paths).await,
        ConfigCommand::Validate { file } => validate(file.or(config_override)).await,
        ConfigCommand::Generate { output } => generate(output).await,
    }
}

async fn show(config_override: Option<PathBuf>, show_paths: bool) -> Result<()> {
    let config = DriverConfigManifest::load_or_default(config_override.clone())
        .context("Failed to load configuration")?;

    if show_paths {
        println!("{}", "Configuration discovery paths:".bold());
        if let Some(path) = &config_override {
            println!("  1. --config flag: {}", path.display());
        } else {
            println!("  1. --config flag: {}", "(not set)".dimmed());
        }
        println!(
            "  2. SEAWEEDFS_CSI_CONFIG: {}",
            std::env::var("SEAWEEDFS_CSI_CONFIG")
                .unwrap_or_else(|_| "(not set)".to_string())
                .dimmed()
        );
        println!("  3. ./seaweedfs-csi.yaml");
        println!("  4. ~/.seaweedfs-csi/config.yaml");
        println!("  5. /etc/seaweedfs-csi/config.yaml");
        println!();
    }

    let spec = &config.spec;
    println!("{}", "Current configuration:".bold());
    println!();

    println!("{}", "Driver:".bold());
    println!("  Name: {}", spec.driver.name);
    println!("  Node ID: {}", spec.driver.node_id);
    println!("  Endpoint: {}", spec.driver.endpoint);
    println!();

    println!("{}", "Filers:".bold());
    for address in &spec.filer.addresses {
        println!("  - {}", address);
    }
    println!();

    println!("{}", "Mount:".bold());
    println!("  Helper: {}", spec.mount.weed_binary);
    println!("  Deployment mode: {:?}", spec.mount.deployment_mode);
    if spec.mount.deployment_mode == DeploymentMode::Decoupled {
        println!("  Mount service: {}", spec.mount.mount_service_endpoint);
    }
    println!("  Cache root: {}", spec.mount.cache_dir.display());
    println!("  Cache capacity: {} MB", spec.mount.cache_capacity_mb);
    println!("  Socket dir: {}", spec.mount.socket_dir.display());
    println!("  Data locality: {}", spec.mount.data_locality);
    if let Some(dc) = &spec.mount.data_center {
        println!("  Data center: {}", dc);
    }
    println!();

    println!("{}", "Capacity:".bold());
    println!("  Source: {:?}", spec.capacity.source);
    println!();

    Ok(())
}

async fn validate(config_path: Option<PathBuf>) -> Result<()> {
    println!("Validating configuration...");

    let config = DriverConfigManifest::load_or_default(config_path)
        .context("Failed to load configuration")?;

    config
        .validate()
        .context("Configuration validation failed")?;

    println!("{}", "✓ Configuration is valid".green());

    Ok(())
}

async fn generate(output: PathBuf) -> Result<()> {
    DriverConfigManifest::default()
        .to_yaml_file(&output)
        .with_context(|| format!("Failed to write config to {:?}", output))?;

    println!(
        "{}",
        format!("✓ Configuration generated: {}", output.display()).green()
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_generated_config_validates() {
        let dir = tempfile::TempDir::new().unwrap();
        let output = dir.path().join("seaweedfs-csi.yaml");

        generate(output.clone()).await.unwrap();
        validate(Some(output.clone())).await.unwrap();

        let loaded = DriverConfigManifest::from_yaml_file(&output).unwrap();
        assert_eq!(loaded.spec.mount.weed_binary, "weed");
    }

    #[tokio::test]
    async fn test_validate_rejects_wrong_kind() {
        let dir = tempfile::TempDir::new().unwrap();
        let output = dir.path().join("bad.yaml");
        std::fs::write(
            &output,
            "apiVersion: seaweedfs-csi/v1\nkind: Something\nmetadata:\n  name: x\nspec: {}\n",
        )
        .unwrap();
        assert!(validate(Some(output)).await.is_err());
    }
}
