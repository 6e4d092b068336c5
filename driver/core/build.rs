// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Build Script for seaweedfs-csi-core
//!
//! Compiles the Protocol Buffer definitions for both gRPC surfaces of the
//! node plugin.
//!
//! # Compilation Targets
//!
//! - **CSI v1**: Identity and Node services served to the kubelet
//! - **SeaweedMount**: control service of a running `weed mount` helper
//!
//! # Code Generation
//!
//! Uses `tonic-prost-build` to generate Rust code from `.proto` files located in:
//! - `../../proto/csi.proto`
//! - `../../proto/mount.proto`
//!
//! Generated code is placed in `OUT_DIR` and included via `tonic::include_proto!`
//! in `src/presentation/csi/mod.rs` and `src/infrastructure/control_client.rs`.
//!
//! # Dependencies
//!
//! - **protoc**: Protocol buffer compiler (vendored via `protoc-bin-vendored`)
//! - **tonic-prost-build**: Code generator for Rust gRPC stubs

use std::path::PathBuf;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Set PROTOC environment variable to point to the vendored protoc binary
    std::env::set_var("PROTOC", protoc_bin_vendored::protoc_bin_path()?);

    let protos = [
        PathBuf::from("../../proto/csi.proto"),
        PathBuf::from("../../proto/mount.proto"),
    ];
    // google/protobuf/wrappers.proto ships with the vendored protoc
    let includes = [PathBuf::from("../../proto"), protoc_bin_vendored::include_path()?];

    tonic_prost_build::configure()
        .build_server(true)
        .build_client(true)
        .compile_protos(&protos, &includes)?;

    for proto in &protos {
        println!("cargo:rerun-if-changed={}", proto.display());
    }

    Ok(())
}
