// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CapacityError {
    #[error("capacity source unavailable: {0}")]
    Unavailable(String),

    #[error("volume {0} not found")]
    NotFound(String),

    #[error("invalid quantity {0:?}")]
    InvalidQuantity(String),

    #[error("request failed: {0}")]
    Request(String),
}

/// Orchestrator-side record of a volume's declared size.
#[async_trait]
pub trait CapacitySource: Send + Sync {
    /// Declared capacity in bytes for `volume_id`.
    async fn capacity(&self, volume_id: &str) -> Result<i64, CapacityError>;
}

/// Used outside an orchestrator that exposes volume objects.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoCapacitySource;

#[async_trait]
impl CapacitySource for NoCapacitySource {
    async fn capacity(&self, _volume_id: &str) -> Result<i64, CapacityError> {
        Err(CapacityError::Unavailable("no capacity source configured".to_string()))
    }
}
