// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Mount Arguments
//!
//! Resolves the options a `weed mount` helper is launched with by merging
//! process-wide defaults, the orchestrator-supplied volume context and the
//! data-locality policy. Also defines the wire types exchanged with the
//! mount manager.
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Purpose:** Implements mount-argument construction and validation

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::str::FromStr;
use thiserror::Error;
use tracing::warn;

/// Context keys honoured when building mount arguments.
pub const ALLOWED_CONTEXT_KEYS: &[&str] = &[
    "path",
    "collection",
    "replication",
    "diskType",
    "dataCenter",
    "dataLocality",
    "concurrentWriters",
    "cacheCapacityMB",
    "map.uid",
    "map.gid",
    "volumeCapacity",
];

/// Prefix of keys the orchestrator injects on its own (pod name, namespace...).
const ORCHESTRATOR_KEY_PREFIX: &str = "csi.storage.k8s.io/";

/// Capacity value meaning "no quota". Zero-sized volumes cannot be
/// provisioned, so one byte is used as the marker instead.
pub const NO_QUOTA_SENTINEL: i64 = 1;

/// Translate a declared volume capacity into the quota sent to the helper.
pub fn quota_for_capacity(capacity_bytes: i64) -> i64 {
    if capacity_bytes == NO_QUOTA_SENTINEL {
        0
    } else {
        capacity_bytes
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MountArgsError {
    #[error("invalid value {value:?} for volume context key {key}")]
    InvalidValue { key: String, value: String },

    #[error("invalid data locality {0:?}")]
    InvalidDataLocality(String),

    #[error("data locality {0} requires a data center")]
    MissingDataCenter(DataLocality),

    #[error("no filer addresses configured")]
    NoFilers,
}

/// Placement preference for newly written chunks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DataLocality {
    #[default]
    #[serde(rename = "none")]
    None,
    #[serde(rename = "write_preferLocalDc", alias = "write_preferlocaldc")]
    WritePreferLocalDc,
}

impl FromStr for DataLocality {
    type Err = MountArgsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "none" => Ok(Self::None),
            "write_preferlocaldc" => Ok(Self::WritePreferLocalDc),
            _ => Err(MountArgsError::InvalidDataLocality(s.to_string())),
        }
    }
}

impl std::fmt::Display for DataLocality {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::None => f.write_str("none"),
            Self::WritePreferLocalDc => f.write_str("write_preferLocalDc"),
        }
    }
}

/// Node-wide mount settings, taken from the driver configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountDefaults {
    pub filers: Vec<String>,
    pub cache_capacity_mb: u64,
    pub concurrent_writers: u32,
    pub uid_map: Option<String>,
    pub gid_map: Option<String>,
    pub data_center: Option<String>,
    pub data_locality: DataLocality,
}

impl Default for MountDefaults {
    fn default() -> Self {
        Self {
            filers: vec!["localhost:8888".to_string()],
            cache_capacity_mb: 1000,
            concurrent_writers: 32,
            uid_map: None,
            gid_map: None,
            data_center: None,
            data_locality: DataLocality::None,
        }
    }
}

/// Fully resolved options for one mount-helper process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountArgs {
    pub target: PathBuf,
    pub filers: Vec<String>,
    pub filer_path: String,
    pub collection: String,
    pub cache_dir: PathBuf,
    pub cache_capacity_mb: u64,
    pub local_socket: PathBuf,
    pub concurrent_writers: u32,
    pub replication: Option<String>,
    pub disk_type: Option<String>,
    pub uid_map: Option<String>,
    pub gid_map: Option<String>,
    pub data_center: Option<String>,
    pub read_only: bool,
}

/// Per-volume inputs to [`MountArgs::resolve`].
#[derive(Debug, Clone)]
pub struct MountTarget {
    pub volume_id: String,
    pub target: PathBuf,
    pub cache_dir: PathBuf,
    pub local_socket: PathBuf,
    pub read_only: bool,
}

impl MountArgs {
    pub fn resolve(
        defaults: &MountDefaults,
        target: MountTarget,
        context: &HashMap<String, String>,
    ) -> Result<Self, MountArgsError> {
        if defaults.filers.is_empty() {
            return Err(MountArgsError::NoFilers);
        }

        let context = filter_context(context);
        let get = |key: &str| context.get(key).map(|v| v.to_string());

        let locality = match context.get("dataLocality") {
            Some(value) => value.parse()?,
            None => defaults.data_locality,
        };
        let data_center = get("dataCenter").or_else(|| defaults.data_center.clone());
        let data_center = match locality {
            DataLocality::None => None,
            DataLocality::WritePreferLocalDc => match data_center {
                Some(dc) if !dc.is_empty() => Some(dc),
                _ => return Err(MountArgsError::MissingDataCenter(locality)),
            },
        };

        Ok(Self {
            filer_path: get("path").unwrap_or_else(|| format!("/buckets/{}", target.volume_id)),
            collection: get("collection").unwrap_or_else(|| target.volume_id.clone()),
            target: target.target,
            filers: defaults.filers.clone(),
            cache_dir: target.cache_dir,
            cache_capacity_mb: parse_number("cacheCapacityMB", context.get("cacheCapacityMB").copied())?
                .unwrap_or(defaults.cache_capacity_mb),
            local_socket: target.local_socket,
            concurrent_writers: parse_number("concurrentWriters", context.get("concurrentWriters").copied())?
                .unwrap_or(defaults.concurrent_writers),
            replication: get("replication"),
            disk_type: get("diskType"),
            uid_map: get("map.uid").or_else(|| defaults.uid_map.clone()),
            gid_map: get("map.gid").or_else(|| defaults.gid_map.clone()),
            data_center,
            read_only: target.read_only,
        })
    }
}

/// Capacity declared through the `volumeCapacity` context key, if any.
pub fn declared_capacity(context: &HashMap<String, String>) -> Result<Option<i64>, MountArgsError> {
    parse_number("volumeCapacity", context.get("volumeCapacity").map(String::as_str))
}

/// Keep only allow-listed keys. Orchestrator-injected keys are dropped
/// silently, anything else is logged.
fn filter_context(context: &HashMap<String, String>) -> HashMap<&str, &str> {
    let mut kept = HashMap::new();
    for (key, value) in context {
        if ALLOWED_CONTEXT_KEYS.contains(&key.as_str()) {
            kept.insert(key.as_str(), value.as_str());
        } else if !key.starts_with(ORCHESTRATOR_KEY_PREFIX) {
            warn!("Ignoring unsupported volume context key {}", key);
        }
    }
    kept
}

fn parse_number<T: FromStr>(key: &str, value: Option<&str>) -> Result<Option<T>, MountArgsError> {
    value
        .map(|value| {
            value.trim().parse::<T>().map_err(|_| MountArgsError::InvalidValue {
                key: key.to_string(),
                value: value.to_string(),
            })
        })
        .transpose()
}

// ============================================================================
// Mount Manager Wire Types
// ============================================================================

/// Start a mount helper for a volume.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MountRequest {
    pub volume_id: String,
    pub target_path: PathBuf,
    pub cache_dir: PathBuf,
    pub local_socket: PathBuf,
    pub mount_args: Vec<String>,
}

impl MountRequest {
    /// Every field is required.
    pub fn validate(&self) -> Result<(), String> {
        if self.volume_id.is_empty() {
            return Err("volumeId is required".to_string());
        }
        if self.target_path.as_os_str().is_empty() {
            return Err("targetPath is required".to_string());
        }
        if self.cache_dir.as_os_str().is_empty() {
            return Err("cacheDir is required".to_string());
        }
        if self.local_socket.as_os_str().is_empty() {
            return Err("localSocket is required".to_string());
        }
        if self.mount_args.is_empty() {
            return Err("mountArgs is required".to_string());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MountResponse {
    pub local_socket: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnmountRequest {
    pub volume_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigureRequest {
    pub volume_id: String,
    pub collection_capacity: i64,
}

/// Body returned by the mount manager on failure.
///
/// `target` is set on a conflict and names where the volume is mounted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<PathBuf>,
}
