// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! SeaweedFS CSI Node Core
//!
//! Node-side volume lifecycle, mount-helper supervision and the optional
//! out-of-process mount manager for the SeaweedFS CSI driver.
//!
//! # Architecture
//!
//! - **Layer:** Core System
//! - **Purpose:** Wires the domain, application, infrastructure and presentation layers

pub mod domain;
pub mod application;
pub mod infrastructure;
pub mod presentation;

pub use domain::*;
