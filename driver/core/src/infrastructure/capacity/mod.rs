// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Capacity Sources
//!
//! Where the node plugin learns a volume's declared size when staging it.
//!
//! # Architecture
//!
//! - **Layer:** Infrastructure Layer
//! - **Purpose:** Implements the CapacitySource domain trait

pub mod kubernetes;
pub mod quantity;

pub use kubernetes::KubernetesCapacitySource;
pub use quantity::parse_quantity;

use crate::domain::capacity::{CapacitySource, NoCapacitySource};
use crate::domain::node_config::CapacitySourceKind;
use std::sync::Arc;
use tracing::warn;

/// Build the configured capacity source.
///
/// Falls back to [`NoCapacitySource`] when the plugin is not running inside
/// a cluster, so staging still works with the `volumeCapacity` context value.
pub fn from_config(kind: CapacitySourceKind) -> Arc<dyn CapacitySource> {
    match kind {
        CapacitySourceKind::None => Arc::new(NoCapacitySource),
        CapacitySourceKind::Kubernetes => match KubernetesCapacitySource::in_cluster() {
            Ok(source) => Arc::new(source),
            Err(e) => {
                warn!("Kubernetes capacity source unavailable, quotas come from volume context only: {}", e);
                Arc::new(NoCapacitySource)
            }
        },
    }
}
