//! Chronicle admin: operator commands for a PostgreSQL-backed event store.

pub mod cli;
pub mod error;

use std::io::{self, Write};
use std::sync::Arc;

use chronicle_core::checkpoint::ProjectionStore;
use chronicle_core::clock::SystemClock;
use chronicle_core::config::EventSourcingConfig;
use chronicle_core::error::DomainError;
use chronicle_core::matcher::Pattern;
use chronicle_core::store::{ConvertingEventStore, EventStore, NameFilter};
use chronicle_event_store::{PgEventStore, PgProjectionStore, schema};
use chronicle_projection::ProjectionManager;
use sqlx::postgres::PgPoolOptions;

use crate::cli::{Cli, Command, Page, ProjectionCommand};
use crate::error::AppError;

/// Connects to the database and runs one command, printing to stdout.
///
/// # Errors
///
/// Returns `AppError` on invalid configuration, connection failure or a
/// rejected command.
pub async fn run(cli: Cli) -> Result<(), AppError> {
    let config = cli.config()?;
    let pool = PgPoolOptions::new()
        .max_connections(2)
        .connect(&cli.database_url)
        .await?;
    tracing::info!(command = ?cli.command, "running admin command");

    if matches!(cli.command, Command::Init) {
        schema::initialize(&pool, &config).await?;
        writeln!(io::stdout().lock(), "schema initialized")?;
        return Ok(());
    }

    let events = PgEventStore::from_config(pool.clone(), &config).await?;
    let admin = Admin::new(
        Arc::new(events),
        Arc::new(PgProjectionStore::new(pool, &config)),
        &config,
    );
    admin.execute(cli.command, &mut io::stdout().lock()).await
}

/// Store-agnostic command execution.
#[derive(Debug)]
pub struct Admin {
    events: ConvertingEventStore,
    projections: ProjectionManager,
}

impl Admin {
    #[must_use]
    pub fn new(
        events: Arc<dyn EventStore>,
        projections: Arc<dyn ProjectionStore>,
        config: &EventSourcingConfig,
    ) -> Self {
        let events = ConvertingEventStore::from_config(events, config);
        let projections = ProjectionManager::new(events.clone(), projections, Arc::new(SystemClock));
        Self {
            events,
            projections,
        }
    }

    /// Runs `command`, writing one result per line to `out`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` for `init`, which needs a database
    /// connection, and propagates store and output failures.
    pub async fn execute(&self, command: Command, out: &mut dyn Write) -> Result<(), AppError> {
        match command {
            Command::Init => Err(AppError::Config(
                "init needs a database connection".to_owned(),
            )),
            Command::Streams {
                prefix,
                regex,
                page,
            } => {
                let filter = name_filter(prefix, regex)?;
                let names = self
                    .events
                    .fetch_stream_names(filter.as_ref(), None, page.limit, page.offset)
                    .await?;
                for name in names {
                    writeln!(out, "{name}")?;
                }
                Ok(())
            }
            Command::Categories {
                prefix,
                regex,
                page,
            } => {
                let filter = name_filter(prefix, regex)?;
                let names = self
                    .events
                    .fetch_category_names(filter.as_ref(), page.limit, page.offset)
                    .await?;
                for name in names {
                    writeln!(out, "{name}")?;
                }
                Ok(())
            }
            Command::Projections(command) => self.execute_projection(command, out).await,
        }
    }

    async fn execute_projection(
        &self,
        command: ProjectionCommand,
        out: &mut dyn Write,
    ) -> Result<(), AppError> {
        let manager = &self.projections;
        match command {
            ProjectionCommand::List {
                prefix,
                page: Page { limit, offset },
            } => {
                for name in manager
                    .fetch_projection_names(prefix.as_deref(), limit, offset)
                    .await?
                {
                    writeln!(out, "{name}")?;
                }
            }
            ProjectionCommand::Status { name } => {
                writeln!(out, "{}", manager.fetch_projection_status(&name).await?)?;
            }
            ProjectionCommand::Positions { name } => {
                let positions = manager.fetch_projection_stream_positions(&name).await?;
                let positions = serde_json::to_string(&positions).map_err(DomainError::from)?;
                writeln!(out, "{positions}")?;
            }
            ProjectionCommand::State { name } => {
                writeln!(out, "{}", manager.fetch_projection_state(&name).await?)?;
            }
            ProjectionCommand::Reset { name } => {
                manager.reset_projection(&name).await?;
                writeln!(out, "reset requested for {name}")?;
            }
            ProjectionCommand::Stop { name } => {
                manager.stop_projection(&name).await?;
                writeln!(out, "stop requested for {name}")?;
            }
            ProjectionCommand::Delete {
                name,
                with_emitted_events,
            } => {
                manager.delete_projection(&name, with_emitted_events).await?;
                writeln!(out, "delete requested for {name}")?;
            }
        }
        Ok(())
    }
}

fn name_filter(prefix: Option<String>, regex: Option<String>) -> Result<Option<NameFilter>, AppError> {
    if let Some(source) = regex {
        return Ok(Some(NameFilter::Regex(Pattern::new(&source)?)));
    }
    Ok(prefix.map(NameFilter::Prefix))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chronicle_core::checkpoint::{ProjectionStatus, StreamPositions};
    use chronicle_core::event::{Event, Metadata};
    use chronicle_core::stream::StreamName;
    use chronicle_event_store::{InMemoryEventStore, InMemoryProjectionStore};
    use chronicle_test_support::FixedClock;
    use clap::Parser;
    use serde_json::json;

    struct Fixture {
        admin: Admin,
        events: Arc<InMemoryEventStore>,
        projections: Arc<InMemoryProjectionStore>,
    }

    fn fixture() -> Fixture {
        let events = Arc::new(InMemoryEventStore::new());
        let projections = Arc::new(InMemoryProjectionStore::new());
        Fixture {
            admin: Admin::new(
                events.clone(),
                projections.clone(),
                &EventSourcingConfig::default().with_load_batch_size(7),
            ),
            events,
            projections,
        }
    }

    async fn run(admin: &Admin, args: &[&str]) -> Result<String, AppError> {
        let argv = ["chronicle-admin", "--database-url", "postgres://unused"]
            .iter()
            .chain(args);
        let cli = Cli::try_parse_from(argv).unwrap();
        let mut out = Vec::new();
        admin.execute(cli.command, &mut out).await?;
        Ok(String::from_utf8(out).unwrap())
    }

    async fn seed(events: &InMemoryEventStore, stream: &str) {
        events
            .create(
                &StreamName::new(stream),
                vec![Event::new("OrderPlaced", json!({}), FixedClock::default().0)],
                Metadata::new(),
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_streams_and_categories_are_listed() {
        // Arrange
        let fixture = fixture();
        for stream in ["order-1", "order-2", "invoice-1"] {
            seed(&fixture.events, stream).await;
        }

        // Act
        let streams = run(&fixture.admin, &["streams", "--prefix", "order-"]).await.unwrap();
        let categories = run(&fixture.admin, &["categories"]).await.unwrap();

        // Assert
        assert_eq!(streams, "order-1\norder-2\n");
        assert_eq!(categories, "invoice\norder\n");
    }

    #[tokio::test]
    async fn test_streams_are_filtered_by_regex() {
        // Arrange
        let fixture = fixture();
        for stream in ["order-1", "order-x", "invoice-1"] {
            seed(&fixture.events, stream).await;
        }

        // Act
        let streams = run(&fixture.admin, &["streams", "--regex", "[0-9]$"]).await.unwrap();
        let invalid = run(&fixture.admin, &["categories", "--regex", "("]).await;

        // Assert
        assert_eq!(streams, "invoice-1\norder-1\n");
        assert!(matches!(
            invalid,
            Err(AppError::Domain(DomainError::Configuration(_)))
        ));
    }

    #[tokio::test]
    async fn test_projection_commands_record_requests() {
        // Arrange
        let fixture = fixture();
        fixture.projections.create_projection("ticket_list").await.unwrap();
        let mut positions = StreamPositions::new();
        positions.insert("ticket_stream".to_owned(), 3);
        fixture
            .projections
            .persist("ticket_list", &positions, &json!({"count": 3}), FixedClock::default().0)
            .await
            .unwrap();

        // Act
        let listed = run(&fixture.admin, &["projections", "list"]).await.unwrap();
        let shown = run(&fixture.admin, &["projections", "positions", "ticket_list"]).await.unwrap();
        let state = run(&fixture.admin, &["projections", "state", "ticket_list"]).await.unwrap();
        run(&fixture.admin, &["projections", "delete", "ticket_list", "--with-emitted-events"])
            .await
            .unwrap();
        let status = run(&fixture.admin, &["projections", "status", "ticket_list"]).await.unwrap();

        // Assert
        assert_eq!(listed, "ticket_list\n");
        assert_eq!(shown, "{\"ticket_stream\":3}\n");
        assert_eq!(state, "{\"count\":3}\n");
        assert_eq!(
            status.trim(),
            ProjectionStatus::DeletingIncludingEmittedEvents.as_str()
        );
    }

    #[tokio::test]
    async fn test_unknown_projection_is_reported() {
        let fixture = fixture();

        let result = run(&fixture.admin, &["projections", "stop", "missing"]).await;

        assert!(matches!(
            result,
            Err(AppError::Domain(DomainError::ProjectionNotFound(_)))
        ));
    }

    #[test]
    fn test_reads_use_configured_batch_size() {
        let fixture = fixture();

        assert_eq!(fixture.admin.events.load_batch_size(), 7);
    }

    #[tokio::test]
    async fn test_init_requires_database() {
        let fixture = fixture();

        let result = run(&fixture.admin, &["init"]).await;

        assert!(matches!(result, Err(AppError::Config(_))));
    }
}
