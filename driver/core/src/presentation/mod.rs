// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Presentation Layer (`seaweedfs-csi-core`)
//!
//! Wire surfaces that translate external requests into application service
//! calls. No lifecycle logic lives here.
//!
//! | Module | Transport | Description |
//! |--------|-----------|-------------|
//! | [`csi`] | gRPC (Tonic) | CSI Identity and Node services for the kubelet |
//! | [`mount_api`] | HTTP/JSON (Axum) over a unix socket | Mount manager service endpoints |

pub mod csi;
pub mod mount_api;
