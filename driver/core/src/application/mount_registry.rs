// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Live mount table of the mount manager.
//!
//! Operations are individually atomic. Check-then-act sequences (get, then
//! put) are only safe while the caller holds the volume's [`KeyedLock`] slot.
//!
//! [`KeyedLock`]: crate::application::KeyedLock

use crate::infrastructure::supervisor::MountProcess;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::debug;

/// A running helper and the paths it owns.
#[derive(Debug, Clone)]
pub struct MountEntry {
    pub volume_id: String,
    pub target_path: PathBuf,
    pub cache_dir: PathBuf,
    pub local_socket: PathBuf,
    pub process: Arc<MountProcess>,
}

#[derive(Debug, Default)]
pub struct MountRegistry {
    entries: RwLock<HashMap<String, MountEntry>>,
}

impl MountRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, volume_id: &str) -> Option<MountEntry> {
        self.entries.read().get(volume_id).cloned()
    }

    /// Insert or replace, returning the previous entry.
    pub fn put(&self, entry: MountEntry) -> Option<MountEntry> {
        debug!("Registered mount: volume_id={}, target={:?}", entry.volume_id, entry.target_path);
        self.entries.write().insert(entry.volume_id.clone(), entry)
    }

    pub fn remove(&self, volume_id: &str) -> Option<MountEntry> {
        let removed = self.entries.write().remove(volume_id);
        if removed.is_some() {
            debug!("Deregistered mount: volume_id={}", volume_id);
        }
        removed
    }

    pub fn volume_ids(&self) -> Vec<String> {
        self.entries.read().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}
