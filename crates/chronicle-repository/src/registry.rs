//! Routing of aggregate types to repositories.

use std::sync::Arc;

use async_trait::async_trait;

use chronicle_core::error::DomainError;
use chronicle_core::event::{Metadata, PendingEvent};
use chronicle_core::repository::{AggregateIdentifiers, EventSourcedRepository, EventStream};

/// Delegates each call to the first registered repository that handles the
/// aggregate type.
#[derive(Clone, Default)]
pub struct RepositoryRegistry {
    repositories: Vec<Arc<dyn EventSourcedRepository>>,
}

impl std::fmt::Debug for RepositoryRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RepositoryRegistry")
            .field("repositories", &self.repositories.len())
            .finish()
    }
}

impl RepositoryRegistry {
    /// An empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `repository`; earlier registrations win.
    #[must_use]
    pub fn with_repository(mut self, repository: Arc<dyn EventSourcedRepository>) -> Self {
        self.repositories.push(repository);
        self
    }

    /// The repository responsible for `aggregate_type`.
    ///
    /// # Errors
    ///
    /// `Configuration` if no registered repository handles it.
    pub fn repository_for(
        &self,
        aggregate_type: &str,
    ) -> Result<&Arc<dyn EventSourcedRepository>, DomainError> {
        self.repositories
            .iter()
            .find(|r| r.can_handle(aggregate_type))
            .ok_or_else(|| {
                DomainError::Configuration(format!(
                    "no repository handles aggregate type {aggregate_type}"
                ))
            })
    }
}

#[async_trait]
impl EventSourcedRepository for RepositoryRegistry {
    fn can_handle(&self, aggregate_type: &str) -> bool {
        self.repositories.iter().any(|r| r.can_handle(aggregate_type))
    }

    async fn find_by(
        &self,
        aggregate_type: &str,
        identifiers: &AggregateIdentifiers,
    ) -> Result<EventStream, DomainError> {
        self.repository_for(aggregate_type)?
            .find_by(aggregate_type, identifiers)
            .await
    }

    async fn save(
        &self,
        identifiers: &AggregateIdentifiers,
        aggregate_type: &str,
        events: Vec<PendingEvent>,
        metadata: Metadata,
        version_before_handling: i64,
    ) -> Result<(), DomainError> {
        self.repository_for(aggregate_type)?
            .save(
                identifiers,
                aggregate_type,
                events,
                metadata,
                version_before_handling,
            )
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::EventSourcingRepository;
    use chronicle_core::config::EventSourcingConfig;
    use chronicle_core::naming::PersistenceStrategy;
    use chronicle_core::store::{ConvertingEventStore, LoadOptions};
    use chronicle_event_store::InMemoryEventStore;
    use chronicle_test_support::FixedClock;
    use serde_json::json;

    fn repository(
        store: &ConvertingEventStore,
        strategy: PersistenceStrategy,
        types: &[&str],
    ) -> Arc<dyn EventSourcedRepository> {
        let config = EventSourcingConfig::default().with_persistence_strategy(strategy);
        Arc::new(EventSourcingRepository::new(
            store.clone(),
            &config,
            Arc::new(FixedClock::default()),
            types.iter().copied(),
        ))
    }

    #[tokio::test]
    async fn test_routes_by_aggregate_type() {
        // Arrange
        let store = ConvertingEventStore::new(Arc::new(InMemoryEventStore::new()));
        let registry = RepositoryRegistry::new()
            .with_repository(repository(&store, PersistenceStrategy::AggregateStream, &["Ticket"]))
            .with_repository(repository(&store, PersistenceStrategy::SingleStream, &["Invoice"]));
        let event = PendingEvent::new("Registered", json!({}));

        // Act
        registry
            .save(
                &AggregateIdentifiers::single("id", "1"),
                "Ticket",
                vec![event.clone()],
                Metadata::new(),
                0,
            )
            .await
            .unwrap();
        registry
            .save(
                &AggregateIdentifiers::single("id", "1"),
                "Invoice",
                vec![event],
                Metadata::new(),
                0,
            )
            .await
            .unwrap();

        // Assert
        assert!(store.has_stream(&"Ticket-1".into()).await.unwrap());
        assert!(store.has_stream(&"Invoice".into()).await.unwrap());
        assert_eq!(
            store
                .load(&"Invoice".into(), LoadOptions::default())
                .await
                .unwrap()
                .len(),
            1
        );
    }

    #[tokio::test]
    async fn test_unhandled_type_is_configuration_error() {
        let registry = RepositoryRegistry::new();

        let result = registry
            .find_by("Ticket", &AggregateIdentifiers::single("id", "1"))
            .await;

        assert!(!registry.can_handle("Ticket"));
        assert!(matches!(result, Err(DomainError::Configuration(_))));
    }
}
