//! Projection checkpoints and the store that persists them.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::DomainError;

/// Last processed position per source stream.
pub type StreamPositions = BTreeMap<String, i64>;

/// Persisted projection status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProjectionStatus {
    /// Not currently running.
    #[default]
    Idle,
    /// A run holds the lock.
    Running,
    /// An operator asked the projection to halt.
    Stopping,
    /// An operator asked the projection to rebuild from scratch.
    Resetting,
    /// An operator asked the projection to be removed.
    Deleting,
    /// Like `Deleting`, and the projection's output stream goes too.
    DeletingIncludingEmittedEvents,
}

impl ProjectionStatus {
    /// The persisted spelling.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Stopping => "stopping",
            Self::Resetting => "resetting",
            Self::Deleting => "deleting",
            Self::DeletingIncludingEmittedEvents => "deleting_including_emitted_events",
        }
    }
}

impl fmt::Display for ProjectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProjectionStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "idle" => Ok(Self::Idle),
            "running" => Ok(Self::Running),
            "stopping" => Ok(Self::Stopping),
            "resetting" => Ok(Self::Resetting),
            "deleting" => Ok(Self::Deleting),
            "deleting_including_emitted_events" => Ok(Self::DeletingIncludingEmittedEvents),
            other => Err(DomainError::Serialization(format!(
                "unknown projection status {other:?}"
            ))),
        }
    }
}

/// Persisted run-time state of one projection.
#[derive(Debug, Clone, PartialEq)]
pub struct Checkpoint {
    /// Projection name.
    pub name: String,
    /// Current status.
    pub status: ProjectionStatus,
    /// Last processed position per source stream.
    pub positions: StreamPositions,
    /// Accumulated read-model state; `Null` unless the projection keeps state.
    pub state: Value,
    /// End of the advisory lock held by a running executor.
    pub locked_until: Option<DateTime<Utc>>,
}

impl Checkpoint {
    /// A fresh, idle checkpoint with no positions.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: ProjectionStatus::Idle,
            positions: StreamPositions::new(),
            state: Value::Null,
            locked_until: None,
        }
    }

    /// Whether the advisory lock is held at `now`.
    #[must_use]
    pub fn is_locked_at(&self, now: DateTime<Utc>) -> bool {
        self.locked_until.is_some_and(|until| until > now)
    }
}

/// Durable storage of projection checkpoints.
///
/// Status changes requested by operators go through
/// [`ProjectionStore::update_status`]; a running executor only writes
/// positions and state through [`ProjectionStore::persist`], so a concurrent
/// stop/reset/delete request is never overwritten by a run in flight.
#[async_trait]
pub trait ProjectionStore: Send + Sync {
    /// Creates an idle checkpoint if none exists. Returns whether one was
    /// created.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Infrastructure` on backend failure.
    async fn create_projection(&self, name: &str) -> Result<bool, DomainError>;

    /// Returns the checkpoint, or `None` if the projection does not exist.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Infrastructure` on backend failure.
    async fn fetch_checkpoint(&self, name: &str) -> Result<Option<Checkpoint>, DomainError>;

    /// Takes the advisory lock until `until` if it is free or expired at
    /// `now`. Returns the locked checkpoint, or `None` if another run holds
    /// the lock.
    ///
    /// # Errors
    ///
    /// `ProjectionNotFound` if the projection does not exist.
    async fn acquire_lock(
        &self,
        name: &str,
        now: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Option<Checkpoint>, DomainError>;

    /// Writes positions and state and extends the lock to `locked_until`.
    /// Never touches the status.
    ///
    /// # Errors
    ///
    /// `ProjectionNotFound` if the projection does not exist.
    async fn persist(
        &self,
        name: &str,
        positions: &StreamPositions,
        state: &Value,
        locked_until: DateTime<Utc>,
    ) -> Result<(), DomainError>;

    /// Sets the status.
    ///
    /// # Errors
    ///
    /// `ProjectionNotFound` if the projection does not exist.
    async fn update_status(&self, name: &str, status: ProjectionStatus) -> Result<(), DomainError>;

    /// Clears the lock and turns `running` back into `idle`.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Infrastructure` on backend failure.
    async fn release_lock(&self, name: &str) -> Result<(), DomainError>;

    /// Removes the checkpoint.
    ///
    /// # Errors
    ///
    /// `ProjectionNotFound` if the projection does not exist.
    async fn delete_projection(&self, name: &str) -> Result<(), DomainError>;

    /// Lists projection names in ascending order.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Infrastructure` on backend failure.
    async fn fetch_projection_names(
        &self,
        prefix: Option<&str>,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<String>, DomainError>;
}
