//! Failing `EventStore` / `ProjectionStore` implementations.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use chronicle_core::checkpoint::{Checkpoint, ProjectionStatus, ProjectionStore, StreamPositions};
use chronicle_core::error::DomainError;
use chronicle_core::event::{Event, Metadata, RecordedEvent};
use chronicle_core::matcher::MetadataMatcher;
use chronicle_core::store::{EventStore, NameFilter, ReadQuery};
use chronicle_core::stream::StreamName;
use serde_json::Value;

fn unavailable() -> DomainError {
    DomainError::Infrastructure("connection refused".into())
}

/// An event store that fails every operation with an infrastructure error.
#[derive(Debug, Default)]
pub struct FailingEventStore;

#[async_trait]
impl EventStore for FailingEventStore {
    async fn create(
        &self,
        _stream: &StreamName,
        _events: Vec<Event>,
        _metadata: Metadata,
    ) -> Result<(), DomainError> {
        Err(unavailable())
    }

    async fn append_to(&self, _stream: &StreamName, _events: Vec<Event>) -> Result<(), DomainError> {
        Err(unavailable())
    }

    async fn read(
        &self,
        _stream: &StreamName,
        _query: &ReadQuery,
    ) -> Result<Vec<RecordedEvent>, DomainError> {
        Err(unavailable())
    }

    async fn has_stream(&self, _stream: &StreamName) -> Result<bool, DomainError> {
        Err(unavailable())
    }

    async fn delete(&self, _stream: &StreamName) -> Result<(), DomainError> {
        Err(unavailable())
    }

    async fn update_stream_metadata(
        &self,
        _stream: &StreamName,
        _metadata: Metadata,
    ) -> Result<(), DomainError> {
        Err(unavailable())
    }

    async fn fetch_stream_metadata(&self, _stream: &StreamName) -> Result<Metadata, DomainError> {
        Err(unavailable())
    }

    async fn fetch_stream_names(
        &self,
        _filter: Option<&NameFilter>,
        _matcher: Option<&MetadataMatcher>,
        _limit: usize,
        _offset: usize,
    ) -> Result<Vec<StreamName>, DomainError> {
        Err(unavailable())
    }

    async fn fetch_category_names(
        &self,
        _filter: Option<&NameFilter>,
        _limit: usize,
        _offset: usize,
    ) -> Result<Vec<String>, DomainError> {
        Err(unavailable())
    }
}

/// A projection store that fails every operation with an infrastructure error.
#[derive(Debug, Default)]
pub struct FailingProjectionStore;

#[async_trait]
impl ProjectionStore for FailingProjectionStore {
    async fn create_projection(&self, _name: &str) -> Result<bool, DomainError> {
        Err(unavailable())
    }

    async fn fetch_checkpoint(&self, _name: &str) -> Result<Option<Checkpoint>, DomainError> {
        Err(unavailable())
    }

    async fn acquire_lock(
        &self,
        _name: &str,
        _now: DateTime<Utc>,
        _until: DateTime<Utc>,
    ) -> Result<Option<Checkpoint>, DomainError> {
        Err(unavailable())
    }

    async fn persist(
        &self,
        _name: &str,
        _positions: &StreamPositions,
        _state: &Value,
        _locked_until: DateTime<Utc>,
    ) -> Result<(), DomainError> {
        Err(unavailable())
    }

    async fn update_status(&self, _name: &str, _status: ProjectionStatus) -> Result<(), DomainError> {
        Err(unavailable())
    }

    async fn release_lock(&self, _name: &str) -> Result<(), DomainError> {
        Err(unavailable())
    }

    async fn delete_projection(&self, _name: &str) -> Result<(), DomainError> {
        Err(unavailable())
    }

    async fn fetch_projection_names(
        &self,
        _prefix: Option<&str>,
        _limit: usize,
        _offset: usize,
    ) -> Result<Vec<String>, DomainError> {
        Err(unavailable())
    }
}
