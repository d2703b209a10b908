//! Event-sourced repository abstraction.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::DomainError;
use crate::event::{Metadata, PendingEvent, RecordedEvent, scalar_text};
use crate::snapshot::Snapshot;

/// Ordered identifier properties of one aggregate instance.
///
/// The first identifier names the instance in streams and metadata.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct AggregateIdentifiers(Vec<(String, Value)>);

impl AggregateIdentifiers {
    /// A single identifier property.
    #[must_use]
    pub fn single(name: impl Into<String>, value: impl Into<Value>) -> Self {
        Self(vec![(name.into(), value.into())])
    }

    /// Adds another identifier property.
    #[must_use]
    pub fn and(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.push((name.into(), value.into()));
        self
    }

    /// The primary identifier in scalar text form.
    ///
    /// # Errors
    ///
    /// `Configuration` if there is no identifier or it is not a scalar.
    pub fn primary(&self) -> Result<String, DomainError> {
        let (name, value) = self.0.first().ok_or_else(|| {
            DomainError::Configuration("aggregate has no identifier".to_owned())
        })?;
        scalar_text(value).ok_or_else(|| {
            DomainError::Configuration(format!("identifier {name} is not a scalar value"))
        })
    }
}

/// One element of a replayable history.
#[derive(Debug, Clone, PartialEq)]
pub enum ReplayEvent {
    /// Aggregate state captured at a version; always first when present.
    Snapshot(Snapshot),
    /// An event recorded after that version.
    Recorded(RecordedEvent),
}

/// An aggregate's loaded history, paired with its current version.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct EventStream {
    version: i64,
    events: Vec<ReplayEvent>,
}

impl EventStream {
    /// Version 0 with no events; the new-aggregate case.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Pairs `version` with `events`.
    #[must_use]
    pub fn new(version: i64, events: Vec<ReplayEvent>) -> Self {
        Self { version, events }
    }

    /// Aggregate version after replaying every event.
    #[must_use]
    pub fn version(&self) -> i64 {
        self.version
    }

    /// The history in replay order.
    #[must_use]
    pub fn events(&self) -> &[ReplayEvent] {
        &self.events
    }

    /// Whether nothing was loaded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Consumes the stream, yielding the history.
    #[must_use]
    pub fn into_events(self) -> Vec<ReplayEvent> {
        self.events
    }
}

/// Loads and saves aggregates as event histories.
#[async_trait]
pub trait EventSourcedRepository: Send + Sync {
    /// Whether this repository is responsible for `aggregate_type`.
    fn can_handle(&self, aggregate_type: &str) -> bool;

    /// Loads the history of one aggregate instance.
    ///
    /// A missing stream yields [`EventStream::empty`].
    ///
    /// # Errors
    ///
    /// Returns backend and conversion failures.
    async fn find_by(
        &self,
        aggregate_type: &str,
        identifiers: &AggregateIdentifiers,
    ) -> Result<EventStream, DomainError>;

    /// Appends `events`, stamped with versions following
    /// `version_before_handling`.
    ///
    /// # Errors
    ///
    /// `ConcurrencyConflict` if another writer recorded any of those
    /// versions first.
    async fn save(
        &self,
        identifiers: &AggregateIdentifiers,
        aggregate_type: &str,
        events: Vec<PendingEvent>,
        metadata: Metadata,
        version_before_handling: i64,
    ) -> Result<(), DomainError>;
}
