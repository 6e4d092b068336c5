// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Application
//!
//! Per-volume locking, the live mount registry, the mount manager and the
//! node volume lifecycle.
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** Implements the use cases behind the CSI node service and the mount manager

pub mod keyed_lock;
pub mod mount_manager;
pub mod mount_registry;
pub mod node_service;

pub use keyed_lock::{KeyGuard, KeyedLock};
pub use mount_manager::MountManager;
pub use mount_registry::{MountEntry, MountRegistry};
pub use node_service::{NodeError, NodeService, NodeServiceConfig, VolumeLifecycle};
