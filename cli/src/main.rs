// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! # SeaweedFS CSI
//!
//! The `seaweedfs-csi` binary hosts both node-side processes of the driver.
//!
//! ## Commands
//!
//! - `seaweedfs-csi node` - Run the CSI node plugin (Identity + Node gRPC)
//! - `seaweedfs-csi mount-service` - Run the mount manager service
//! - `seaweedfs-csi config show|validate|generate` - Configuration management
//!
//! In decoupled mode the mount manager runs in its own container so FUSE
//! mounts survive restarts of the node plugin.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;
use tracing::info;

use seaweedfs_csi::commands::{self, ConfigCommand, MountServiceArgs, NodeArgs};
use seaweedfs_csi_core::domain::node_config::DriverConfigManifest;

/// SeaweedFS CSI driver - node plugin and mount manager
#[derive(Parser)]
#[command(name = "seaweedfs-csi")]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Path to configuration file (overrides discovery)
    #[arg(
        short,
        long,
        global = true,
        env = "SEAWEEDFS_CSI_CONFIG",
        value_name = "FILE"
    )]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error); defaults to the config value
    #[arg(long, global = true, env = "SEAWEEDFS_CSI_LOG_LEVEL")]
    log_level: Option<String>,

    /// Log format (text, json); defaults to the config value
    #[arg(long, global = true, env = "SEAWEEDFS_CSI_LOG_FORMAT")]
    log_format: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the CSI node plugin
    #[command(name = "node")]
    Node(NodeArgs),

    /// Run the mount manager service
    #[command(name = "mount-service")]
    MountService(MountServiceArgs),

    /// Configuration management
    #[command(name = "config")]
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Node(args)) => {
            let config = load_config(cli.config)?;
            init_logging_from(&config, cli.log_level, cli.log_format)?;
            info!("SeaweedFS CSI node plugin {} starting", env!("CARGO_PKG_VERSION"));
            commands::node::run(config, args).await
        }
        Some(Commands::MountService(args)) => {
            let config = load_config(cli.config)?;
            init_logging_from(&config, cli.log_level, cli.log_format)?;
            info!("SeaweedFS mount service {} starting", env!("CARGO_PKG_VERSION"));
            commands::mount_service::run(config, args).await
        }
        Some(Commands::Config { command }) => {
            commands::init_logging(
                cli.log_level.as_deref().unwrap_or("warn"),
                cli.log_format.as_deref().unwrap_or("text"),
            )?;
            commands::config::handle_command(command, cli.config).await
        }
        None => {
            // No command provided - show help
            eprintln!("{}", "No command specified. Use --help for usage.".yellow());
            std::process::exit(1);
        }
    }
}

/// Validation happens in the command, after its flags are applied.
fn load_config(path: Option<PathBuf>) -> Result<DriverConfigManifest> {
    DriverConfigManifest::load_or_default(path).context("Failed to load configuration")
}

fn init_logging_from(
    config: &DriverConfigManifest,
    level: Option<String>,
    format: Option<String>,
) -> Result<()> {
    let logging = &config.spec.observability.logging;
    commands::init_logging(
        level.as_deref().unwrap_or(&logging.level),
        format.as_deref().unwrap_or(&logging.format),
    )
}
