//! Administrative façade over projection checkpoints.
//!
//! Stop, reset and delete only record the request in the checkpoint; the
//! owning executor carries it out on its next run.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use chronicle_core::checkpoint::{Checkpoint, ProjectionStatus, ProjectionStore, StreamPositions};
use chronicle_core::clock::Clock;
use chronicle_core::error::DomainError;
use chronicle_core::store::ConvertingEventStore;
use serde_json::Value;

use crate::config::{ProjectionRunningConfiguration, ProjectionSetupConfiguration};
use crate::executor::ProjectionExecutor;

/// Registers projections and administers their checkpoints.
pub struct ProjectionManager {
    events: ConvertingEventStore,
    projections: Arc<dyn ProjectionStore>,
    clock: Arc<dyn Clock>,
    executors: BTreeMap<String, Arc<ProjectionExecutor>>,
}

impl fmt::Debug for ProjectionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProjectionManager")
            .field("events", &self.events)
            .field("executors", &self.executors.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl ProjectionManager {
    #[must_use]
    pub fn new(
        events: ConvertingEventStore,
        projections: Arc<dyn ProjectionStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            events,
            projections,
            clock,
            executors: BTreeMap::new(),
        }
    }

    /// Builds the executor for a projection and keeps it for lookup.
    ///
    /// # Errors
    ///
    /// `Configuration` if a projection with the same name is registered.
    pub fn register(
        &mut self,
        setup: ProjectionSetupConfiguration,
        running: ProjectionRunningConfiguration,
    ) -> Result<Arc<ProjectionExecutor>, DomainError> {
        if self.executors.contains_key(setup.name()) {
            return Err(DomainError::Configuration(format!(
                "projection {} is registered twice",
                setup.name()
            )));
        }
        let name = setup.name().to_owned();
        let executor = Arc::new(ProjectionExecutor::new(
            setup,
            running,
            self.events.clone(),
            Arc::clone(&self.projections),
            Arc::clone(&self.clock),
        ));
        self.executors.insert(name, Arc::clone(&executor));
        Ok(executor)
    }

    /// The registered executor named `name`.
    #[must_use]
    pub fn executor(&self, name: &str) -> Option<&Arc<ProjectionExecutor>> {
        self.executors.get(name)
    }

    /// Every registered executor, by name.
    pub fn executors(&self) -> impl Iterator<Item = &Arc<ProjectionExecutor>> {
        self.executors.values()
    }

    /// Creates an idle checkpoint ahead of the first run. Returns whether one
    /// was created.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Infrastructure` on backend failure.
    pub async fn create_projection(&self, name: &str) -> Result<bool, DomainError> {
        self.projections.create_projection(name).await
    }

    /// Requests deletion, optionally of the projection's output stream too.
    ///
    /// # Errors
    ///
    /// `ProjectionNotFound` if the projection has no checkpoint.
    #[tracing::instrument(skip(self))]
    pub async fn delete_projection(
        &self,
        name: &str,
        delete_emitted_events: bool,
    ) -> Result<(), DomainError> {
        let status = if delete_emitted_events {
            ProjectionStatus::DeletingIncludingEmittedEvents
        } else {
            ProjectionStatus::Deleting
        };
        self.request(name, status).await
    }

    /// Requests a rebuild from the first event.
    ///
    /// # Errors
    ///
    /// `ProjectionNotFound` if the projection has no checkpoint.
    #[tracing::instrument(skip(self))]
    pub async fn reset_projection(&self, name: &str) -> Result<(), DomainError> {
        self.request(name, ProjectionStatus::Resetting).await
    }

    /// Requests a stop.
    ///
    /// # Errors
    ///
    /// `ProjectionNotFound` if the projection has no checkpoint.
    #[tracing::instrument(skip(self))]
    pub async fn stop_projection(&self, name: &str) -> Result<(), DomainError> {
        self.request(name, ProjectionStatus::Stopping).await
    }

    /// Lists projection names with an optional prefix filter.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Infrastructure` on backend failure.
    pub async fn fetch_projection_names(
        &self,
        prefix: Option<&str>,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<String>, DomainError> {
        self.projections
            .fetch_projection_names(prefix, limit, offset)
            .await
    }

    /// # Errors
    ///
    /// `ProjectionNotFound` if the projection has no checkpoint.
    pub async fn fetch_projection_status(&self, name: &str) -> Result<ProjectionStatus, DomainError> {
        Ok(self.checkpoint(name).await?.status)
    }

    /// # Errors
    ///
    /// `ProjectionNotFound` if the projection has no checkpoint.
    pub async fn fetch_projection_stream_positions(
        &self,
        name: &str,
    ) -> Result<StreamPositions, DomainError> {
        Ok(self.checkpoint(name).await?.positions)
    }

    /// # Errors
    ///
    /// `ProjectionNotFound` if the projection has no checkpoint.
    pub async fn fetch_projection_state(&self, name: &str) -> Result<Value, DomainError> {
        Ok(self.checkpoint(name).await?.state)
    }

    async fn checkpoint(&self, name: &str) -> Result<Checkpoint, DomainError> {
        self.projections
            .fetch_checkpoint(name)
            .await?
            .ok_or_else(|| DomainError::ProjectionNotFound(name.to_owned()))
    }

    async fn request(&self, name: &str, status: ProjectionStatus) -> Result<(), DomainError> {
        self.projections.update_status(name, status).await?;
        tracing::info!(projection = name, %status, "projection status requested");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::HandlerRegistry;
    use crate::executor::ExecutionOutcome;
    use chronicle_core::event::{Event, Metadata};
    use chronicle_core::stream::StreamName;
    use chronicle_event_store::{InMemoryEventStore, InMemoryProjectionStore};
    use chronicle_test_support::{FixedClock, RecordingHandler};
    use serde_json::json;

    fn manager() -> ProjectionManager {
        ProjectionManager::new(
            ConvertingEventStore::new(Arc::new(InMemoryEventStore::new())),
            Arc::new(InMemoryProjectionStore::new()),
            Arc::new(FixedClock::default()),
        )
    }

    fn ticket_list() -> ProjectionSetupConfiguration {
        ProjectionSetupConfiguration::from_stream("ticket_list", "ticket_stream")
            .with_handler("TicketWasRegistered", "ticket_list.on_registered")
            .unwrap()
    }

    #[test]
    fn test_registering_two_projections_with_one_name_is_rejected() {
        // Arrange
        let mut manager = manager();
        manager
            .register(ticket_list(), ProjectionRunningConfiguration::event_driven())
            .unwrap();

        // Act
        let result = manager.register(
            ProjectionSetupConfiguration::from_all("ticket_list"),
            ProjectionRunningConfiguration::polling(),
        );

        // Assert
        assert!(matches!(result, Err(DomainError::Configuration(_))));
        assert!(manager.executor("ticket_list").is_some());
        assert_eq!(manager.executors().count(), 1);
    }

    #[tokio::test]
    async fn test_admin_requests_on_unknown_projection_fail() {
        let manager = manager();

        assert!(matches!(
            manager.stop_projection("missing").await,
            Err(DomainError::ProjectionNotFound(_))
        ));
        assert!(matches!(
            manager.fetch_projection_status("missing").await,
            Err(DomainError::ProjectionNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_requests_only_record_status_until_next_run() {
        // Arrange
        let mut manager = manager();
        let executor = manager
            .register(ticket_list(), ProjectionRunningConfiguration::polling())
            .unwrap();
        manager.create_projection("ticket_list").await.unwrap();

        // Act
        manager.reset_projection("ticket_list").await.unwrap();
        let requested = manager.fetch_projection_status("ticket_list").await.unwrap();
        manager.stop_projection("ticket_list").await.unwrap();
        let outcome = executor.execute(&HandlerRegistry::new()).await.unwrap();

        // Assert
        assert_eq!(requested, ProjectionStatus::Resetting);
        assert_eq!(outcome, ExecutionOutcome::Stopped);
        assert_eq!(
            manager.fetch_projection_status("ticket_list").await.unwrap(),
            ProjectionStatus::Idle
        );
    }

    #[tokio::test]
    async fn test_introspection_reflects_last_run() {
        // Arrange
        let mut manager = manager();
        let stream = StreamName::new("ticket_stream");
        let events = (1..=2)
            .map(|n| Event::new("TicketWasRegistered", json!({"n": n}), FixedClock::default().0))
            .collect();
        manager
            .events
            .create(&stream, events, Metadata::new())
            .await
            .unwrap();
        let handler = Arc::new(RecordingHandler::replying(|payload, _, _| payload["n"].clone()));
        let channel = HandlerRegistry::new()
            .with_handler("ticket_list.on_registered", handler)
            .unwrap();
        let executor = manager
            .register(
                ticket_list().with_keeping_state(true),
                ProjectionRunningConfiguration::polling(),
            )
            .unwrap();

        // Act
        executor.execute(&channel).await.unwrap();

        // Assert
        assert_eq!(
            manager.fetch_projection_names(None, 10, 0).await.unwrap(),
            vec!["ticket_list".to_owned()]
        );
        assert_eq!(
            manager.fetch_projection_names(Some("order"), 10, 0).await.unwrap(),
            Vec::<String>::new()
        );
        let positions = manager
            .fetch_projection_stream_positions("ticket_list")
            .await
            .unwrap();
        assert_eq!(positions.get("ticket_stream"), Some(&2));
        assert_eq!(
            manager.fetch_projection_state("ticket_list").await.unwrap(),
            json!(2)
        );
    }

    #[tokio::test]
    async fn test_delete_request_is_carried_out_by_executor() {
        // Arrange
        let mut manager = manager();
        let executor = manager
            .register(ticket_list(), ProjectionRunningConfiguration::polling())
            .unwrap();
        let channel = HandlerRegistry::new();
        executor.execute(&channel).await.unwrap();

        // Act
        manager.delete_projection("ticket_list", true).await.unwrap();
        let requested = manager.fetch_projection_status("ticket_list").await.unwrap();
        let outcome = executor.execute(&channel).await.unwrap();

        // Assert
        assert_eq!(requested, ProjectionStatus::DeletingIncludingEmittedEvents);
        assert_eq!(outcome, ExecutionOutcome::Deleted);
        assert!(
            manager
                .fetch_projection_names(None, 10, 0)
                .await
                .unwrap()
                .is_empty()
        );
    }
}
