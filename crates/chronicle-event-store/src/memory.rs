//! In-memory persistence strategy.
//!
//! Streams live in a shared map behind an `RwLock`. A store-wide counter
//! assigns global positions so multi-stream reads interleave in append
//! order. Every mutating call holds the write lock for its whole duration,
//! which serializes writers the way the explicit write lock does for the
//! relational store.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;

use chronicle_core::checkpoint::{Checkpoint, ProjectionStatus, ProjectionStore, StreamPositions};
use chronicle_core::error::DomainError;
use chronicle_core::event::{Event, Metadata, RecordedEvent};
use chronicle_core::matcher::MetadataMatcher;
use chronicle_core::snapshot::{Snapshot, SnapshotStore};
use chronicle_core::store::{EventStore, NameFilter, ReadDirection, ReadQuery};
use chronicle_core::stream::StreamName;

fn read_guard<T>(lock: &RwLock<T>) -> Result<RwLockReadGuard<'_, T>, DomainError> {
    lock.read().map_err(poisoned)
}

fn write_guard<T>(lock: &RwLock<T>) -> Result<RwLockWriteGuard<'_, T>, DomainError> {
    lock.write().map_err(poisoned)
}

fn poisoned<T>(_: PoisonError<T>) -> DomainError {
    DomainError::Infrastructure("in-memory store lock poisoned".to_owned())
}

fn page<T>(items: impl Iterator<Item = T>, limit: usize, offset: usize) -> Vec<T> {
    items.skip(offset).take(limit).collect()
}

/// `(aggregate type, aggregate id, aggregate version)` of a stamped event.
type VersionKey = (String, String, i64);

fn version_key(event: &Event) -> Option<VersionKey> {
    Some((
        event.aggregate_type()?.to_owned(),
        event.aggregate_id()?,
        event.aggregate_version()?,
    ))
}

#[derive(Debug, Default)]
struct StoredStream {
    metadata: Metadata,
    events: Vec<RecordedEvent>,
    versions: HashSet<VersionKey>,
}

#[derive(Debug, Default)]
struct Inner {
    streams: BTreeMap<StreamName, StoredStream>,
    next_global_position: i64,
}

impl Inner {
    fn append(&mut self, stream: &StreamName, events: Vec<Event>) -> Result<(), DomainError> {
        let Some(stored) = self.streams.get_mut(stream) else {
            return Err(DomainError::StreamNotFound(stream.to_string()));
        };

        let mut claimed = HashSet::new();
        for event in &events {
            if let Some(key) = version_key(event) {
                if stored.versions.contains(&key) || !claimed.insert(key.clone()) {
                    return Err(DomainError::ConcurrencyConflict {
                        stream: stream.to_string(),
                        reason: format!(
                            "aggregate {} {} already has version {}",
                            key.0, key.1, key.2
                        ),
                    });
                }
            }
        }

        let mut position = stored.events.last().map_or(0, |e| e.position);
        for event in events {
            position += 1;
            self.next_global_position += 1;
            stored.events.push(RecordedEvent {
                stream: stream.clone(),
                position,
                global_position: self.next_global_position,
                event,
            });
        }
        stored.versions.extend(claimed);
        Ok(())
    }
}

/// Event store kept entirely in process memory.
#[derive(Debug, Clone, Default)]
pub struct InMemoryEventStore {
    inner: Arc<RwLock<Inner>>,
}

impl InMemoryEventStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    #[tracing::instrument(skip(self, events, metadata), fields(stream = %stream, event_count = events.len()))]
    async fn create(
        &self,
        stream: &StreamName,
        events: Vec<Event>,
        metadata: Metadata,
    ) -> Result<(), DomainError> {
        let mut inner = write_guard(&self.inner)?;
        if inner.streams.contains_key(stream) {
            return Err(DomainError::StreamAlreadyExists(stream.to_string()));
        }
        inner.streams.insert(
            stream.clone(),
            StoredStream {
                metadata,
                ..StoredStream::default()
            },
        );
        if let Err(err) = inner.append(stream, events) {
            inner.streams.remove(stream);
            return Err(err);
        }
        tracing::info!("stream created");
        Ok(())
    }

    #[tracing::instrument(skip(self, events), fields(stream = %stream, event_count = events.len()))]
    async fn append_to(&self, stream: &StreamName, events: Vec<Event>) -> Result<(), DomainError> {
        write_guard(&self.inner)?.append(stream, events)?;
        tracing::debug!("events appended");
        Ok(())
    }

    async fn read(
        &self,
        stream: &StreamName,
        query: &ReadQuery,
    ) -> Result<Vec<RecordedEvent>, DomainError> {
        let inner = read_guard(&self.inner)?;
        let stored = inner
            .streams
            .get(stream)
            .ok_or_else(|| DomainError::StreamNotFound(stream.to_string()))?;

        let selected = |e: &&RecordedEvent| {
            query.admits(e.position)
                && query
                    .matcher
                    .as_ref()
                    .is_none_or(|m| m.matches(&e.event))
        };
        let batch = match query.direction {
            ReadDirection::Forward => stored
                .events
                .iter()
                .filter(selected)
                .take(query.count)
                .cloned()
                .collect(),
            ReadDirection::Backward => stored
                .events
                .iter()
                .rev()
                .filter(selected)
                .take(query.count)
                .cloned()
                .collect(),
        };
        Ok(batch)
    }

    async fn has_stream(&self, stream: &StreamName) -> Result<bool, DomainError> {
        Ok(read_guard(&self.inner)?.streams.contains_key(stream))
    }

    #[tracing::instrument(skip(self), fields(stream = %stream))]
    async fn delete(&self, stream: &StreamName) -> Result<(), DomainError> {
        write_guard(&self.inner)?
            .streams
            .remove(stream)
            .ok_or_else(|| DomainError::StreamNotFound(stream.to_string()))?;
        tracing::info!("stream deleted");
        Ok(())
    }

    async fn update_stream_metadata(
        &self,
        stream: &StreamName,
        metadata: Metadata,
    ) -> Result<(), DomainError> {
        let mut inner = write_guard(&self.inner)?;
        let stored = inner
            .streams
            .get_mut(stream)
            .ok_or_else(|| DomainError::StreamNotFound(stream.to_string()))?;
        stored.metadata = metadata;
        Ok(())
    }

    async fn fetch_stream_metadata(&self, stream: &StreamName) -> Result<Metadata, DomainError> {
        read_guard(&self.inner)?
            .streams
            .get(stream)
            .map(|s| s.metadata.clone())
            .ok_or_else(|| DomainError::StreamNotFound(stream.to_string()))
    }

    async fn fetch_stream_names(
        &self,
        filter: Option<&NameFilter>,
        matcher: Option<&MetadataMatcher>,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<StreamName>, DomainError> {
        let inner = read_guard(&self.inner)?;
        let names = inner
            .streams
            .iter()
            .filter(|(name, _)| filter.is_none_or(|f| f.accepts(name.as_str())))
            .filter(|(_, stored)| matcher.is_none_or(|m| m.matches_metadata(&stored.metadata)))
            .map(|(name, _)| name.clone());
        Ok(page(names, limit, offset))
    }

    async fn fetch_category_names(
        &self,
        filter: Option<&NameFilter>,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<String>, DomainError> {
        let inner = read_guard(&self.inner)?;
        let categories: BTreeSet<&str> = inner
            .streams
            .keys()
            .filter_map(StreamName::category)
            .filter(|c| filter.is_none_or(|f| f.accepts(c)))
            .collect();
        Ok(page(categories.into_iter().map(str::to_owned), limit, offset))
    }
}

/// Projection checkpoints kept in process memory.
#[derive(Debug, Clone, Default)]
pub struct InMemoryProjectionStore {
    checkpoints: Arc<RwLock<BTreeMap<String, Checkpoint>>>,
}

impl InMemoryProjectionStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

fn not_found(name: &str) -> DomainError {
    DomainError::ProjectionNotFound(name.to_owned())
}

#[async_trait]
impl ProjectionStore for InMemoryProjectionStore {
    async fn create_projection(&self, name: &str) -> Result<bool, DomainError> {
        let mut checkpoints = write_guard(&self.checkpoints)?;
        if checkpoints.contains_key(name) {
            return Ok(false);
        }
        checkpoints.insert(name.to_owned(), Checkpoint::new(name));
        Ok(true)
    }

    async fn fetch_checkpoint(&self, name: &str) -> Result<Option<Checkpoint>, DomainError> {
        Ok(read_guard(&self.checkpoints)?.get(name).cloned())
    }

    async fn acquire_lock(
        &self,
        name: &str,
        now: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Option<Checkpoint>, DomainError> {
        let mut checkpoints = write_guard(&self.checkpoints)?;
        let checkpoint = checkpoints.get_mut(name).ok_or_else(|| not_found(name))?;
        if checkpoint.is_locked_at(now) {
            return Ok(None);
        }
        checkpoint.locked_until = Some(until);
        if checkpoint.status == ProjectionStatus::Idle {
            checkpoint.status = ProjectionStatus::Running;
        }
        Ok(Some(checkpoint.clone()))
    }

    async fn persist(
        &self,
        name: &str,
        positions: &StreamPositions,
        state: &Value,
        locked_until: DateTime<Utc>,
    ) -> Result<(), DomainError> {
        let mut checkpoints = write_guard(&self.checkpoints)?;
        let checkpoint = checkpoints.get_mut(name).ok_or_else(|| not_found(name))?;
        checkpoint.positions.clone_from(positions);
        checkpoint.state = state.clone();
        checkpoint.locked_until = Some(locked_until);
        Ok(())
    }

    async fn update_status(&self, name: &str, status: ProjectionStatus) -> Result<(), DomainError> {
        let mut checkpoints = write_guard(&self.checkpoints)?;
        checkpoints.get_mut(name).ok_or_else(|| not_found(name))?.status = status;
        Ok(())
    }

    async fn release_lock(&self, name: &str) -> Result<(), DomainError> {
        if let Some(checkpoint) = write_guard(&self.checkpoints)?.get_mut(name) {
            checkpoint.locked_until = None;
            if checkpoint.status == ProjectionStatus::Running {
                checkpoint.status = ProjectionStatus::Idle;
            }
        }
        Ok(())
    }

    async fn delete_projection(&self, name: &str) -> Result<(), DomainError> {
        write_guard(&self.checkpoints)?
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| not_found(name))
    }

    async fn fetch_projection_names(
        &self,
        prefix: Option<&str>,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<String>, DomainError> {
        let checkpoints = read_guard(&self.checkpoints)?;
        let names = checkpoints
            .keys()
            .filter(|name| prefix.is_none_or(|p| name.starts_with(p)))
            .cloned();
        Ok(page(names, limit, offset))
    }
}

/// Latest snapshot per aggregate instance, kept in process memory.
#[derive(Debug, Clone, Default)]
pub struct InMemorySnapshotStore {
    snapshots: Arc<RwLock<HashMap<(String, String), Snapshot>>>,
}

impl InMemorySnapshotStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SnapshotStore for InMemorySnapshotStore {
    async fn load(
        &self,
        aggregate_type: &str,
        aggregate_id: &str,
    ) -> Result<Option<Snapshot>, DomainError> {
        Ok(read_guard(&self.snapshots)?
            .get(&(aggregate_type.to_owned(), aggregate_id.to_owned()))
            .cloned())
    }

    async fn save(&self, snapshot: Snapshot) -> Result<(), DomainError> {
        let mut snapshots = write_guard(&self.snapshots)?;
        let key = (snapshot.aggregate_type.clone(), snapshot.aggregate_id.clone());
        if snapshots.get(&key).is_none_or(|s| s.version <= snapshot.version) {
            snapshots.insert(key, snapshot);
        }
        Ok(())
    }
}
