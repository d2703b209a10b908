//! Aggregate snapshots.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::error::DomainError;

/// Serialized aggregate state at a known version.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    /// Aggregate type name.
    pub aggregate_type: String,
    /// Aggregate identifier.
    pub aggregate_id: String,
    /// Version of the last event folded into `state`.
    pub version: i64,
    /// Serialized aggregate state.
    pub state: Value,
    /// When the snapshot was taken.
    pub created_at: DateTime<Utc>,
}

/// Storage of the latest snapshot per aggregate instance.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Loads the latest snapshot, if any.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Infrastructure` on backend failure.
    async fn load(
        &self,
        aggregate_type: &str,
        aggregate_id: &str,
    ) -> Result<Option<Snapshot>, DomainError>;

    /// Stores `snapshot`, replacing any older one for the same instance.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Infrastructure` on backend failure.
    async fn save(&self, snapshot: Snapshot) -> Result<(), DomainError>;
}
