// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Driver Configuration Types
//
// Defines the configuration schema for the SeaweedFS CSI node plugin and the
// mount manager service, including:
// - Kubernetes-style manifest format (apiVersion/kind/metadata/spec)
// - Driver identity and CSI endpoint
// - Filer addresses and mount-helper defaults
// - Deployment mode (co-located or decoupled mount supervision)
// - Capacity source and logging settings

use crate::domain::mount::{DataLocality, MountDefaults};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const API_VERSION: &str = "seaweedfs-csi/v1";
pub const KIND: &str = "DriverConfig";

/// Top-level Kubernetes-style driver configuration manifest
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriverConfigManifest {
    /// API version (must be "seaweedfs-csi/v1")
    #[serde(rename = "apiVersion")]
    pub api_version: String,

    /// Resource kind (must be "DriverConfig")
    pub kind: String,

    pub metadata: ManifestMetadata,

    pub spec: DriverConfigSpec,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestMetadata {
    pub name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub labels: Option<HashMap<String, String>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DriverConfigSpec {
    #[serde(default)]
    pub driver: DriverIdentity,

    #[serde(default)]
    pub filer: FilerConfig,

    #[serde(default)]
    pub mount: MountConfig,

    #[serde(default)]
    pub capacity: CapacityConfig,

    #[serde(default)]
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriverIdentity {
    /// CSI driver name reported by GetPluginInfo
    #[serde(default = "default_driver_name")]
    pub name: String,

    /// Node identifier reported by NodeGetInfo (defaults to the hostname)
    #[serde(default = "default_node_id")]
    pub node_id: String,

    /// CSI gRPC endpoint, `unix:///path` or `tcp://host:port`
    #[serde(default = "default_csi_endpoint")]
    pub endpoint: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilerConfig {
    /// One or more filer addresses (host:port)
    #[serde(default = "default_filers")]
    pub addresses: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DeploymentMode {
    /// Mount helpers are children of the node plugin and die with it
    CoLocated,
    /// Mount helpers live in the mount manager service and survive plugin restarts
    #[default]
    Decoupled,
}

impl std::str::FromStr for DeploymentMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "co-located" | "colocated" => Ok(Self::CoLocated),
            "decoupled" => Ok(Self::Decoupled),
            _ => anyhow::bail!("Invalid deployment mode '{}'. Expected co-located or decoupled", s),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MountConfig {
    /// Mount helper executable
    #[serde(default = "default_weed_binary")]
    pub weed_binary: String,

    /// Root of the per-volume cache directories
    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,

    #[serde(default = "default_cache_capacity_mb")]
    pub cache_capacity_mb: u64,

    #[serde(default = "default_concurrent_writers")]
    pub concurrent_writers: u32,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub uid_map: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub gid_map: Option<String>,

    /// Data center this node belongs to
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_center: Option<String>,

    #[serde(default)]
    pub data_locality: DataLocality,

    /// Directory holding the per-volume control sockets
    #[serde(default = "default_socket_dir")]
    pub socket_dir: PathBuf,

    #[serde(default)]
    pub deployment_mode: DeploymentMode,

    /// Mount manager endpoint used in decoupled mode
    #[serde(default = "default_mount_service_endpoint")]
    pub mount_service_endpoint: String,

    #[serde(default)]
    pub timeouts: MountTimeouts,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MountTimeouts {
    #[serde(default = "default_mount_wait_secs")]
    pub mount_wait_secs: u64,

    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    #[serde(default = "default_graceful_stop_secs")]
    pub graceful_stop_secs: u64,

    #[serde(default = "default_forceful_stop_secs")]
    pub forceful_stop_secs: u64,

    #[serde(default = "default_control_rpc_secs")]
    pub control_rpc_secs: u64,

    #[serde(default = "default_mount_service_secs")]
    pub mount_service_secs: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CapacitySourceKind {
    /// Read `spec.capacity.storage` of the PersistentVolume
    #[default]
    Kubernetes,
    None,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CapacityConfig {
    #[serde(default)]
    pub source: CapacitySourceKind,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (e.g., "info", "debug", "trace")
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format ("json" or "text")
    #[serde(default = "default_log_format")]
    pub format: String,
}

/// Listen/dial address of a local service
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    Unix(PathBuf),
    Tcp(String),
}

/// Parse `unix:///path/to.sock` or `tcp://host:port`.
pub fn parse_endpoint(endpoint: &str) -> anyhow::Result<Endpoint> {
    let (scheme, address) = endpoint
        .split_once("://")
        .filter(|(_, address)| !address.is_empty())
        .ok_or_else(|| anyhow::anyhow!("Invalid endpoint: {}", endpoint))?;

    match scheme.to_ascii_lowercase().as_str() {
        "unix" => Ok(Endpoint::Unix(PathBuf::from(address))),
        "tcp" => Ok(Endpoint::Tcp(address.to_string())),
        other => anyhow::bail!("Unsupported endpoint scheme: {}", other),
    }
}

// Default value functions
fn default_driver_name() -> String {
    "seaweedfs-csi-driver".to_string()
}

fn default_node_id() -> String {
    hostname::get()
        .map(|h| h.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn default_csi_endpoint() -> String {
    "unix:///csi/csi.sock".to_string()
}

fn default_filers() -> Vec<String> {
    vec!["localhost:8888".to_string()]
}

fn default_weed_binary() -> String {
    "weed".to_string()
}

fn default_cache_dir() -> PathBuf {
    std::env::temp_dir()
}

fn default_cache_capacity_mb() -> u64 {
    1000
}

fn default_concurrent_writers() -> u32 {
    32
}

fn default_socket_dir() -> PathBuf {
    PathBuf::from("/var/lib/seaweedfs-mount")
}

fn default_mount_service_endpoint() -> String {
    "unix:///var/lib/seaweedfs-mount/seaweedfs-mount.sock".to_string()
}

fn default_mount_wait_secs() -> u64 {
    10
}

fn default_poll_interval_ms() -> u64 {
    10
}

fn default_graceful_stop_secs() -> u64 {
    5
}

fn default_forceful_stop_secs() -> u64 {
    1
}

fn default_control_rpc_secs() -> u64 {
    10
}

fn default_mount_service_secs() -> u64 {
    30
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

impl Default for DriverIdentity {
    fn default() -> Self {
        Self {
            name: default_driver_name(),
            node_id: default_node_id(),
            endpoint: default_csi_endpoint(),
        }
    }
}

impl Default for FilerConfig {
    fn default() -> Self {
        Self { addresses: default_filers() }
    }
}

impl Default for MountConfig {
    fn default() -> Self {
        Self {
            weed_binary: default_weed_binary(),
            cache_dir: default_cache_dir(),
            cache_capacity_mb: default_cache_capacity_mb(),
            concurrent_writers: default_concurrent_writers(),
            uid_map: None,
            gid_map: None,
            data_center: None,
            data_locality: DataLocality::None,
            socket_dir: default_socket_dir(),
            deployment_mode: DeploymentMode::default(),
            mount_service_endpoint: default_mount_service_endpoint(),
            timeouts: MountTimeouts::default(),
        }
    }
}

impl Default for MountTimeouts {
    fn default() -> Self {
        Self {
            mount_wait_secs: default_mount_wait_secs(),
            poll_interval_ms: default_poll_interval_ms(),
            graceful_stop_secs: default_graceful_stop_secs(),
            forceful_stop_secs: default_forceful_stop_secs(),
            control_rpc_secs: default_control_rpc_secs(),
            mount_service_secs: default_mount_service_secs(),
        }
    }
}

impl MountTimeouts {
    pub fn mount_wait(&self) -> Duration {
        Duration::from_secs(self.mount_wait_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn graceful_stop(&self) -> Duration {
        Duration::from_secs(self.graceful_stop_secs)
    }

    pub fn forceful_stop(&self) -> Duration {
        Duration::from_secs(self.forceful_stop_secs)
    }

    pub fn control_rpc(&self) -> Duration {
        Duration::from_secs(self.control_rpc_secs)
    }

    pub fn mount_service(&self) -> Duration {
        Duration::from_secs(self.mount_service_secs)
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl Default for DriverConfigManifest {
    fn default() -> Self {
        Self {
            api_version: API_VERSION.to_string(),
            kind: KIND.to_string(),
            metadata: ManifestMetadata {
                name: "seaweedfs-csi".to_string(),
                labels: None,
            },
            spec: DriverConfigSpec::default(),
        }
    }
}

impl DriverConfigManifest {
    /// Load configuration from YAML file
    pub fn from_yaml_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    pub fn to_yaml_file(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        let yaml = serde_yaml::to_string(self)?;
        std::fs::write(path, yaml)?;
        Ok(())
    }

    pub fn from_yaml_str(yaml: &str) -> anyhow::Result<Self> {
        let config = serde_yaml::from_str(yaml)?;
        Ok(config)
    }

    /// Discover configuration file using precedence order
    /// 1. SEAWEEDFS_CSI_CONFIG environment variable
    /// 2. ./seaweedfs-csi.yaml (working directory)
    /// 3. ~/.seaweedfs-csi/config.yaml (user home)
    /// 4. /etc/seaweedfs-csi/config.yaml
    pub fn discover_config() -> Option<PathBuf> {
        if let Ok(path) = std::env::var("SEAWEEDFS_CSI_CONFIG") {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
        }

        let cwd = PathBuf::from("./seaweedfs-csi.yaml");
        if cwd.exists() {
            return Some(cwd);
        }

        if let Some(home) = dirs::home_dir() {
            let user_config = Self::user_config_path(&home);
            if user_config.exists() {
                return Some(user_config);
            }
        }

        let system_config = PathBuf::from("/etc/seaweedfs-csi/config.yaml");
        if system_config.exists() {
            return Some(system_config);
        }

        None
    }

    fn user_config_path(home: &Path) -> PathBuf {
        home.join(".seaweedfs-csi").join("config.yaml")
    }

    /// Load configuration with the standard precedence, falling back to defaults
    pub fn load_or_default(cli_path: Option<PathBuf>) -> anyhow::Result<Self> {
        // Explicit path must exist and parse
        if let Some(path) = cli_path {
            tracing::info!("Loading configuration from explicit path: {:?}", path);
            let mut config = Self::from_yaml_file(&path).map_err(|e| {
                anyhow::anyhow!("Failed to load config at {:?}: {}", path, e)
            })?;
            config.apply_env_overrides();
            return Ok(config);
        }

        if let Some(config_path) = Self::discover_config() {
            tracing::info!("Loading configuration from discovered path: {:?}", config_path);
            let mut config = Self::from_yaml_file(config_path)?;
            config.apply_env_overrides();
            Ok(config)
        } else {
            tracing::warn!("No configuration file found in standard locations. Using defaults.");
            let mut config = Self::default();
            config.apply_env_overrides();
            Ok(config)
        }
    }

    /// Apply environment variable overrides to configuration
    /// This allows DaemonSet manifests to override config via env vars
    pub fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("SEAWEEDFS_CSI_FILER") {
            let filers: Vec<String> = val
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect();
            if filers.is_empty() {
                tracing::warn!("Ignoring empty SEAWEEDFS_CSI_FILER");
            } else {
                tracing::info!("Environment override: SEAWEEDFS_CSI_FILER={}", val);
                self.spec.filer.addresses = filers;
            }
        }

        if let Ok(val) = std::env::var("SEAWEEDFS_CSI_NODE_ID") {
            tracing::info!("Environment override: SEAWEEDFS_CSI_NODE_ID={}", val);
            self.spec.driver.node_id = val;
        }

        if let Ok(val) = std::env::var("SEAWEEDFS_CSI_DEPLOYMENT_MODE") {
            match val.parse::<DeploymentMode>() {
                Ok(mode) => {
                    tracing::info!("Environment override: SEAWEEDFS_CSI_DEPLOYMENT_MODE={}", val);
                    self.spec.mount.deployment_mode = mode;
                }
                Err(e) => {
                    tracing::warn!("{}. Ignoring SEAWEEDFS_CSI_DEPLOYMENT_MODE.", e);
                }
            }
        }

        if let Ok(val) = std::env::var("SEAWEEDFS_CSI_CACHE_DIR") {
            tracing::info!("Environment override: SEAWEEDFS_CSI_CACHE_DIR={}", val);
            self.spec.mount.cache_dir = PathBuf::from(val);
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.api_version != API_VERSION {
            anyhow::bail!(
                "Invalid apiVersion: '{}'. Must be '{}'",
                self.api_version,
                API_VERSION
            );
        }

        if self.kind != KIND {
            anyhow::bail!("Invalid kind: '{}'. Must be '{}'", self.kind, KIND);
        }

        if self.spec.driver.node_id.is_empty() {
            anyhow::bail!("spec.driver.node_id cannot be empty");
        }

        parse_endpoint(&self.spec.driver.endpoint)
            .map_err(|e| anyhow::anyhow!("spec.driver.endpoint: {}", e))?;

        if self.spec.filer.addresses.iter().all(|a| a.trim().is_empty()) {
            anyhow::bail!("spec.filer.addresses must contain at least one filer");
        }

        let mount = &self.spec.mount;
        if mount.data_locality != DataLocality::None
            && mount.data_center.as_deref().unwrap_or("").is_empty()
        {
            anyhow::bail!(
                "spec.mount.data_locality {} requires spec.mount.data_center",
                mount.data_locality
            );
        }

        if mount.deployment_mode == DeploymentMode::Decoupled {
            match parse_endpoint(&mount.mount_service_endpoint) {
                Ok(Endpoint::Unix(_)) => {}
                Ok(Endpoint::Tcp(_)) => anyhow::bail!(
                    "spec.mount.mount_service_endpoint must be a unix socket, the mount service is host-local"
                ),
                Err(e) => anyhow::bail!("spec.mount.mount_service_endpoint: {}", e),
            }
        }

        if mount.timeouts.mount_wait_secs == 0 || mount.timeouts.poll_interval_ms == 0 {
            anyhow::bail!("spec.mount.timeouts must be non-zero");
        }

        Ok(())
    }

    /// Node-wide inputs to mount-argument resolution
    pub fn mount_defaults(&self) -> MountDefaults {
        let mount = &self.spec.mount;
        MountDefaults {
            filers: self.spec.filer.addresses.clone(),
            cache_capacity_mb: mount.cache_capacity_mb,
            concurrent_writers: mount.concurrent_writers,
            uid_map: mount.uid_map.clone(),
            gid_map: mount.gid_map.clone(),
            data_center: mount.data_center.clone(),
            data_locality: mount.data_locality,
        }
    }
}
