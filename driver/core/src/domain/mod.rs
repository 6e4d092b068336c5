// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Domain
//!
//! Volume model, mount arguments, configuration and the traits the
//! application layer drives (mount table, mount service, control channel,
//! capacity source).
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Purpose:** Implements the node plugin's vocabulary and seams

pub mod capacity;
pub mod mount;
pub mod mount_service;
pub mod mount_table;
pub mod node_config;
pub mod volume;
