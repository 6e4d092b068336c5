// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Mutually exclusive locks keyed by volume ID.
//!
//! Locks are created on first use. Different keys never contend; the same
//! key always resolves to the same mutex until the key is released.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

type Slot = Arc<AsyncMutex<()>>;

#[derive(Debug, Default)]
pub struct KeyedLock {
    slots: Mutex<HashMap<String, Slot>>,
}

/// Exclusive hold on one key. Dropping it unlocks.
#[derive(Debug)]
pub struct KeyGuard {
    key: String,
    _guard: OwnedMutexGuard<()>,
}

impl KeyGuard {
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl KeyedLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// The mutex behind `key`, created if missing.
    pub fn handle(&self, key: &str) -> Arc<AsyncMutex<()>> {
        let mut slots = self.slots.lock();
        Arc::clone(slots.entry(key.to_string()).or_default())
    }

    pub async fn acquire(&self, key: &str) -> KeyGuard {
        let guard = self.handle(key).lock_owned().await;
        KeyGuard {
            key: key.to_string(),
            _guard: guard,
        }
    }

    /// Unlock and drop the key's slot from the table.
    ///
    /// This bounds the table size once a volume is fully torn down. The slot
    /// is kept while other tasks hold or wait on it, otherwise a later
    /// `acquire` would hand out a second, unrelated mutex for the same key.
    pub fn release(&self, guard: KeyGuard) {
        let mut slots = self.slots.lock();
        if let Some(slot) = slots.get(&guard.key) {
            // one reference in the table, one inside `guard`
            if Arc::strong_count(slot) <= 2 {
                slots.remove(&guard.key);
            }
        }
        drop(slots);
        drop(guard);
    }

    pub fn len(&self) -> usize {
        self.slots.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.lock().is_empty()
    }
}
