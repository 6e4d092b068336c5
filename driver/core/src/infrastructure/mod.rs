// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod capacity;
pub mod control_client;
pub mod mount_service_client;
pub mod mount_table;
pub mod paths;
pub mod seaweedfs;
pub mod supervisor;

pub use mount_table::{InMemoryMountTable, LinuxMountTable};
pub use supervisor::{MountProcess, MountSupervisor, ProcessState, SupervisorConfig, SupervisorError};
