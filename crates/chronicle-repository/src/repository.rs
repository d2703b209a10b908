//! Event-sourcing repository on top of the event store.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use uuid::Uuid;

use chronicle_core::clock::Clock;
use chronicle_core::config::EventSourcingConfig;
use chronicle_core::error::DomainError;
use chronicle_core::event::{
    AGGREGATE_ID, AGGREGATE_TYPE, AGGREGATE_VERSION, Event, Metadata, PendingEvent,
};
use chronicle_core::matcher::{MetadataMatcher, Operator};
use chronicle_core::naming::StreamNamingStrategy;
use chronicle_core::repository::{
    AggregateIdentifiers, EventSourcedRepository, EventStream, ReplayEvent,
};
use chronicle_core::snapshot::{Snapshot, SnapshotStore};
use chronicle_core::store::{ConvertingEventStore, LoadOptions};

/// Metadata key prefixes that belong to message transport and never reach
/// the log.
pub const TRANSIENT_METADATA_PREFIXES: [&str; 3] = ["transport.", "distribution.", "projection."];

#[derive(Clone)]
struct Snapshots {
    store: Arc<dyn SnapshotStore>,
    aggregate_types: HashSet<String>,
}

/// Loads and saves aggregates of the configured types as event histories.
#[derive(Clone)]
pub struct EventSourcingRepository {
    store: ConvertingEventStore,
    naming: StreamNamingStrategy,
    clock: Arc<dyn Clock>,
    aggregate_types: HashSet<String>,
    snapshots: Option<Snapshots>,
}

impl std::fmt::Debug for EventSourcingRepository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventSourcingRepository")
            .field("naming", &self.naming)
            .field("aggregate_types", &self.aggregate_types)
            .finish_non_exhaustive()
    }
}

impl EventSourcingRepository {
    /// Creates a repository for `aggregate_types`, naming streams per
    /// `config`.
    #[must_use]
    pub fn new<I, S>(
        store: ConvertingEventStore,
        config: &EventSourcingConfig,
        clock: Arc<dyn Clock>,
        aggregate_types: I,
    ) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            store,
            naming: config.naming().clone(),
            clock,
            aggregate_types: aggregate_types.into_iter().map(Into::into).collect(),
            snapshots: None,
        }
    }

    /// Starts `find_by` of `aggregate_types` from their latest snapshot.
    #[must_use]
    pub fn with_snapshots<I, S>(mut self, store: Arc<dyn SnapshotStore>, aggregate_types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.snapshots = Some(Snapshots {
            store,
            aggregate_types: aggregate_types.into_iter().map(Into::into).collect(),
        });
        self
    }

    /// Stores `state` as the snapshot of an instance at `version`.
    ///
    /// # Errors
    ///
    /// `Configuration` if snapshots are not enabled for `aggregate_type`.
    pub async fn save_snapshot(
        &self,
        aggregate_type: &str,
        identifiers: &AggregateIdentifiers,
        version: i64,
        state: Value,
    ) -> Result<(), DomainError> {
        let snapshots = self.snapshots_for(aggregate_type).ok_or_else(|| {
            DomainError::Configuration(format!("snapshots are not enabled for {aggregate_type}"))
        })?;
        snapshots
            .save(Snapshot {
                aggregate_type: aggregate_type.to_owned(),
                aggregate_id: identifiers.primary()?,
                version,
                state,
                created_at: self.clock.now(),
            })
            .await
    }

    fn snapshots_for(&self, aggregate_type: &str) -> Option<&Arc<dyn SnapshotStore>> {
        self.snapshots
            .as_ref()
            .filter(|s| s.aggregate_types.contains(aggregate_type))
            .map(|s| &s.store)
    }

    fn build_events(
        &self,
        aggregate_type: &str,
        aggregate_id: &str,
        events: Vec<PendingEvent>,
        metadata: &Metadata,
        version_before_handling: i64,
    ) -> Vec<Event> {
        let now = self.clock.now();
        let base: Metadata = metadata
            .iter()
            .filter(|(key, _)| {
                !TRANSIENT_METADATA_PREFIXES
                    .iter()
                    .any(|prefix| key.starts_with(prefix))
            })
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();

        (version_before_handling + 1..)
            .zip(events)
            .map(|(version, pending)| {
                let mut metadata = base.clone();
                metadata.extend(pending.metadata);
                metadata.insert(AGGREGATE_ID.to_owned(), aggregate_id.into());
                metadata.insert(AGGREGATE_TYPE.to_owned(), aggregate_type.into());
                metadata.insert(AGGREGATE_VERSION.to_owned(), version.into());
                Event {
                    event_id: Uuid::new_v4(),
                    event_type: pending.event_type,
                    payload: pending.payload,
                    metadata,
                    created_at: now,
                }
            })
            .collect()
    }
}

#[async_trait]
impl EventSourcedRepository for EventSourcingRepository {
    fn can_handle(&self, aggregate_type: &str) -> bool {
        self.aggregate_types.contains(aggregate_type)
    }

    #[tracing::instrument(skip(self, identifiers))]
    async fn find_by(
        &self,
        aggregate_type: &str,
        identifiers: &AggregateIdentifiers,
    ) -> Result<EventStream, DomainError> {
        let aggregate_id = identifiers.primary()?;
        let stream = self.naming.compute_stream_name(aggregate_type, &aggregate_id);

        let snapshot = match self.snapshots_for(aggregate_type) {
            Some(snapshots) => snapshots.load(aggregate_type, &aggregate_id).await?,
            None => None,
        };
        let mut version = snapshot.as_ref().map_or(0, |s| s.version);

        let mut matcher = MetadataMatcher::new()
            .with_metadata_match(AGGREGATE_TYPE, Operator::Equals, aggregate_type)
            .with_metadata_match(AGGREGATE_ID, Operator::Equals, aggregate_id.as_str());
        let mut options = LoadOptions::default();
        if self.naming.is_exclusive_stream(aggregate_type) {
            options = options.from(version + 1);
        } else if version > 0 {
            matcher = matcher.with_metadata_match(AGGREGATE_VERSION, Operator::GreaterThan, version);
        }

        let events = match self.store.load(&stream, options.matching(matcher)).await {
            Ok(events) => events,
            Err(DomainError::StreamNotFound(_)) => {
                tracing::debug!(%stream, "no stream yet");
                Vec::new()
            }
            Err(err) => return Err(err),
        };
        if let Some(last) = events.last() {
            version = last.event.aggregate_version().unwrap_or(version);
        }

        let history = snapshot
            .map(ReplayEvent::Snapshot)
            .into_iter()
            .chain(events.into_iter().map(ReplayEvent::Recorded))
            .collect();
        Ok(EventStream::new(version, history))
    }

    #[tracing::instrument(
        skip(self, identifiers, events, metadata),
        fields(event_count = events.len())
    )]
    async fn save(
        &self,
        identifiers: &AggregateIdentifiers,
        aggregate_type: &str,
        events: Vec<PendingEvent>,
        metadata: Metadata,
        version_before_handling: i64,
    ) -> Result<(), DomainError> {
        if events.is_empty() {
            return Ok(());
        }
        let aggregate_id = identifiers.primary()?;
        let stream = self.naming.compute_stream_name(aggregate_type, &aggregate_id);
        let events = self.build_events(
            aggregate_type,
            &aggregate_id,
            events,
            &metadata,
            version_before_handling,
        );

        if self.store.has_stream(&stream).await? {
            return self.store.append_to(&stream, events).await;
        }
        match self
            .store
            .create(&stream, events.clone(), stream_metadata(aggregate_type))
            .await
        {
            Err(DomainError::StreamAlreadyExists(_)) => {
                tracing::debug!(%stream, "stream created concurrently, appending");
                self.store.append_to(&stream, events).await
            }
            other => other,
        }
    }
}

fn stream_metadata(aggregate_type: &str) -> Metadata {
    let mut metadata = Metadata::new();
    metadata.insert(AGGREGATE_TYPE.to_owned(), aggregate_type.into());
    metadata
}
