//! Projection executor.
//!
//! One [`ProjectionExecutor`] is bound to one projection. Every call to
//! [`ProjectionExecutor::execute`] is a single, non-blocking catch-up pass:
//! take the advisory lock, act on the status an operator may have requested,
//! feed every event that is currently available through the handler table,
//! write the checkpoint after each block of successful handler calls and
//! release the lock. Waiting for new events is the caller's job.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use chronicle_core::checkpoint::{Checkpoint, ProjectionStatus, ProjectionStore, StreamPositions};
use chronicle_core::clock::{Clock, deadline};
use chronicle_core::error::DomainError;
use chronicle_core::event::{Metadata, RecordedEvent};
use chronicle_core::handler::{HandlerChannel, HandlerRef};
use chronicle_core::store::{ConvertingEventStore, NameFilter};
use chronicle_core::stream::{CATEGORY_SEPARATOR, StreamName, StreamSource};
use serde_json::Value;

use crate::channel::{
    PROJECTION_IS_POLLING, PROJECTION_IS_RESETTING, PROJECTION_NAME, PROJECTION_STATE,
};
use crate::config::{ProjectionRunningConfiguration, ProjectionSetupConfiguration};

/// Result of one [`ProjectionExecutor::execute`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionOutcome {
    /// The pass ran; `events` is how far the checkpoint advanced.
    Processed { events: usize },
    /// Another run holds the lock; nothing was done.
    Locked,
    /// A stop request was honoured.
    Stopped,
    /// A delete request was honoured and the checkpoint removed.
    Deleted,
}

/// Runs one projection.
pub struct ProjectionExecutor {
    setup: ProjectionSetupConfiguration,
    running: ProjectionRunningConfiguration,
    events: ConvertingEventStore,
    projections: Arc<dyn ProjectionStore>,
    clock: Arc<dyn Clock>,
    initialized: AtomicBool,
}

impl fmt::Debug for ProjectionExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProjectionExecutor")
            .field("setup", &self.setup)
            .field("running", &self.running)
            .field("initialized", &self.initialized)
            .finish_non_exhaustive()
    }
}

impl ProjectionExecutor {
    #[must_use]
    pub fn new(
        setup: ProjectionSetupConfiguration,
        running: ProjectionRunningConfiguration,
        events: ConvertingEventStore,
        projections: Arc<dyn ProjectionStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            setup,
            running,
            events,
            projections,
            clock,
            initialized: AtomicBool::new(false),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        self.setup.name()
    }

    #[must_use]
    pub fn setup(&self) -> &ProjectionSetupConfiguration {
        &self.setup
    }

    #[must_use]
    pub fn running(&self) -> &ProjectionRunningConfiguration {
        &self.running
    }

    /// Runs the initialization hook unless this executor already did.
    ///
    /// # Errors
    ///
    /// Propagates a failing hook; the guard stays unset so the next call
    /// retries.
    #[tracing::instrument(skip(self, channel), fields(projection = %self.setup.name()))]
    pub async fn initialize(&self, channel: &dyn HandlerChannel) -> Result<(), DomainError> {
        if self.initialized.load(Ordering::Acquire) {
            return Ok(());
        }
        if let Some(hook) = self.setup.lifecycle().initialization() {
            self.run_hook(channel, hook).await?;
            tracing::info!("projection read model initialized");
        }
        self.initialized.store(true, Ordering::Release);
        Ok(())
    }

    /// Performs one catch-up pass.
    ///
    /// # Errors
    ///
    /// Hook, handler and store failures abort the pass. Positions of events
    /// whose block did not complete are not written, and the lock is
    /// released either way.
    #[tracing::instrument(skip(self, channel), fields(projection = %self.setup.name()))]
    pub async fn execute(
        &self,
        channel: &dyn HandlerChannel,
    ) -> Result<ExecutionOutcome, DomainError> {
        self.initialize(channel).await?;
        if self.projections.create_projection(self.name()).await? {
            tracing::info!("projection created");
        }

        let now = self.clock.now();
        let Some(checkpoint) = self
            .projections
            .acquire_lock(self.name(), now, self.lock_deadline(now)?)
            .await?
        else {
            tracing::warn!("projection is locked by another run");
            return Ok(ExecutionOutcome::Locked);
        };

        let outcome = self.run_locked(channel, checkpoint).await;
        match (outcome, self.projections.release_lock(self.name()).await) {
            (outcome, Ok(())) => outcome,
            (Ok(_), Err(release)) => Err(release),
            (Err(run), Err(release)) => {
                tracing::error!(error = %release, "failed to release projection lock");
                Err(run)
            }
        }
    }

    async fn run_locked(
        &self,
        channel: &dyn HandlerChannel,
        checkpoint: Checkpoint,
    ) -> Result<ExecutionOutcome, DomainError> {
        match checkpoint.status {
            ProjectionStatus::Stopping => {
                self.projections
                    .update_status(self.name(), ProjectionStatus::Idle)
                    .await?;
                tracing::info!("projection stopped");
                Ok(ExecutionOutcome::Stopped)
            }
            ProjectionStatus::Deleting => {
                self.delete(channel, false).await?;
                Ok(ExecutionOutcome::Deleted)
            }
            ProjectionStatus::DeletingIncludingEmittedEvents => {
                self.delete(channel, true).await?;
                Ok(ExecutionOutcome::Deleted)
            }
            ProjectionStatus::Resetting => {
                self.reset(channel).await?;
                self.catch_up(channel, StreamPositions::new(), Value::Null, true)
                    .await
            }
            ProjectionStatus::Idle | ProjectionStatus::Running => {
                let state = if self.setup.keeps_state() {
                    checkpoint.state
                } else {
                    Value::Null
                };
                self.catch_up(channel, checkpoint.positions, state, false)
                    .await
            }
        }
    }

    async fn catch_up(
        &self,
        channel: &dyn HandlerChannel,
        mut positions: StreamPositions,
        mut state: Value,
        resetting: bool,
    ) -> Result<ExecutionOutcome, DomainError> {
        let streams = self.resolve_streams().await?;
        let block_size = self.setup.options().persist_block_size();
        let mut processed = 0;
        let mut unsaved = 0;

        loop {
            let round = self.next_round(&streams, &positions).await?;
            if round.is_empty() {
                break;
            }
            tracing::debug!(events = round.len(), "catch-up round");

            for recorded in &round {
                if let Some(target) = self.handler_for(&recorded.event.event_type) {
                    let result = self
                        .dispatch_event(channel, target, recorded, state, resetting)
                        .await?;
                    state = if self.setup.keeps_state() {
                        result
                    } else {
                        Value::Null
                    };
                }
                positions.insert(recorded.stream.to_string(), recorded.position);
                processed += 1;
                unsaved += 1;
                if unsaved >= block_size {
                    self.persist(&positions, &state).await?;
                    unsaved = 0;
                }
            }
            if unsaved > 0 {
                self.persist(&positions, &state).await?;
                unsaved = 0;
            }

            if self.interrupted().await? {
                tracing::info!("status changed during run, stopping early");
                break;
            }
        }

        Ok(ExecutionOutcome::Processed { events: processed })
    }

    /// Handlers may be registered under the in-process or the stored name.
    fn handler_for(&self, event_type: &str) -> Option<&HandlerRef> {
        self.setup.handler_for(event_type).or_else(|| {
            self.setup
                .handler_for(self.events.mapper().to_wire_name(event_type))
        })
    }

    async fn dispatch_event(
        &self,
        channel: &dyn HandlerChannel,
        target: &HandlerRef,
        recorded: &RecordedEvent,
        state: Value,
        resetting: bool,
    ) -> Result<Value, DomainError> {
        let mut metadata = recorded.event.metadata.clone();
        metadata.insert(PROJECTION_STATE.to_owned(), state);
        metadata.insert(PROJECTION_NAME.to_owned(), Value::from(self.name()));
        metadata.insert(PROJECTION_IS_RESETTING.to_owned(), Value::Bool(resetting));
        metadata.insert(PROJECTION_IS_POLLING.to_owned(), Value::Bool(true));
        channel
            .dispatch(target, recorded.event.payload.clone(), metadata)
            .await
    }

    /// Reads the next batch of every source and merges them in global order.
    ///
    /// Only events up to the smallest last global position among full
    /// batches are returned, since a stream with a full batch may still hold
    /// earlier events than another stream's tail.
    async fn next_round(
        &self,
        streams: &[StreamName],
        positions: &StreamPositions,
    ) -> Result<Vec<RecordedEvent>, DomainError> {
        let batch_size = self.setup.options().load_batch_size();
        let mut round = Vec::new();
        let mut horizon: Option<i64> = None;

        for stream in streams {
            let from = positions.get(stream.as_str()).map_or(1, |p| p + 1);
            let batch = match self.events.read_batch(stream, from, batch_size, true).await {
                Ok(batch) => batch,
                Err(e) if e.is_stream_not_found() => {
                    self.skip_missing(stream);
                    continue;
                }
                Err(e) => return Err(e),
            };
            if let Some(last) = batch.last().filter(|_| batch.len() >= batch_size) {
                horizon = Some(horizon.map_or(last.global_position, |h| h.min(last.global_position)));
            }
            round.extend(batch);
        }

        round.sort_by_key(|e| e.global_position);
        if let Some(horizon) = horizon {
            round.retain(|e| e.global_position <= horizon);
        }
        Ok(round)
    }

    fn skip_missing(&self, stream: &StreamName) {
        if matches!(self.setup.source(), StreamSource::Streams(_)) {
            tracing::debug!(%stream, "source stream does not exist yet");
        } else {
            tracing::warn!(%stream, "source stream vanished during catch-up");
        }
    }

    async fn resolve_streams(&self) -> Result<Vec<StreamName>, DomainError> {
        match self.setup.source() {
            StreamSource::Streams(names) => Ok(names.clone()),
            StreamSource::All => self.discover(None).await,
            StreamSource::Categories(categories) => {
                let mut streams = Vec::new();
                for category in categories {
                    let prefix = NameFilter::Prefix(format!("{category}{CATEGORY_SEPARATOR}"));
                    streams.extend(self.discover(Some(&prefix)).await?);
                }
                Ok(streams)
            }
        }
    }

    async fn discover(&self, filter: Option<&NameFilter>) -> Result<Vec<StreamName>, DomainError> {
        let page_size = self.setup.options().cache_size();
        let mut streams = Vec::new();
        let mut offset = 0;
        loop {
            let page = self
                .events
                .fetch_stream_names(filter, None, page_size, offset)
                .await?;
            let exhausted = page.len() < page_size;
            offset += page.len();
            streams.extend(page.into_iter().filter(|s| self.setup.source().includes(s)));
            if exhausted {
                return Ok(streams);
            }
        }
    }

    async fn interrupted(&self) -> Result<bool, DomainError> {
        Ok(self
            .projections
            .fetch_checkpoint(self.name())
            .await?
            .is_none_or(|c| !matches!(c.status, ProjectionStatus::Idle | ProjectionStatus::Running)))
    }

    async fn persist(&self, positions: &StreamPositions, state: &Value) -> Result<(), DomainError> {
        let until = self.lock_deadline(self.clock.now())?;
        self.projections
            .persist(self.name(), positions, state, until)
            .await
    }

    async fn reset(&self, channel: &dyn HandlerChannel) -> Result<(), DomainError> {
        if let Some(hook) = self.setup.lifecycle().reset() {
            self.run_hook(channel, hook).await?;
        }
        self.delete_output_stream().await?;
        self.persist(&StreamPositions::new(), &Value::Null).await?;
        self.projections
            .update_status(self.name(), ProjectionStatus::Running)
            .await?;
        tracing::info!("projection reset, replaying from the start");
        Ok(())
    }

    async fn delete(
        &self,
        channel: &dyn HandlerChannel,
        including_emitted_events: bool,
    ) -> Result<(), DomainError> {
        if let Some(hook) = self.setup.lifecycle().delete() {
            self.run_hook(channel, hook).await?;
        }
        if including_emitted_events {
            self.delete_output_stream().await?;
        }
        self.projections.delete_projection(self.name()).await?;
        self.initialized.store(false, Ordering::Release);
        tracing::info!(including_emitted_events, "projection deleted");
        Ok(())
    }

    async fn delete_output_stream(&self) -> Result<(), DomainError> {
        let output = self.setup.output_stream();
        match self.events.delete(&output).await {
            Ok(()) => {
                tracing::info!(stream = %output, "projection output stream deleted");
                Ok(())
            }
            Err(e) if e.is_stream_not_found() => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn run_hook(&self, channel: &dyn HandlerChannel, hook: &HandlerRef) -> Result<(), DomainError> {
        let mut metadata = Metadata::new();
        metadata.insert(PROJECTION_NAME.to_owned(), Value::from(self.name()));
        channel
            .dispatch(hook, Value::Object(Metadata::new()), metadata)
            .await
            .map(|_| ())
    }

    fn lock_deadline(&self, now: DateTime<Utc>) -> Result<DateTime<Utc>, DomainError> {
        deadline(now, self.setup.options().lock_timeout()).ok_or_else(|| {
            DomainError::Configuration(format!(
                "lock timeout of projection {} is out of range",
                self.name()
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::HandlerRegistry;
    use crate::config::{ProjectionLifeCycle, ProjectionOptions};
    use chronicle_core::event::Event;
    use chronicle_event_store::{InMemoryEventStore, InMemoryProjectionStore};
    use chronicle_test_support::{
        FailingEventStore, FailingHandler, FailingProjectionStore, ManualClock, RecordingHandler,
    };
    use serde_json::json;

    struct Fixture {
        events: ConvertingEventStore,
        projections: Arc<InMemoryProjectionStore>,
        clock: Arc<ManualClock>,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                events: ConvertingEventStore::new(Arc::new(InMemoryEventStore::new())),
                projections: Arc::new(InMemoryProjectionStore::new()),
                clock: Arc::new(ManualClock::default()),
            }
        }

        fn executor(&self, setup: ProjectionSetupConfiguration) -> ProjectionExecutor {
            ProjectionExecutor::new(
                setup,
                ProjectionRunningConfiguration::polling(),
                self.events.clone(),
                self.projections.clone(),
                self.clock.clone(),
            )
        }

        async fn append(&self, stream: &str, event_type: &str, payload: Value) {
            let stream = StreamName::new(stream);
            let event = Event::new(event_type, payload, self.clock.now());
            if self.events.has_stream(&stream).await.unwrap() {
                self.events.append_to(&stream, vec![event]).await.unwrap();
            } else {
                self.events
                    .create(&stream, vec![event], Metadata::new())
                    .await
                    .unwrap();
            }
        }

        async fn checkpoint(&self, name: &str) -> Option<Checkpoint> {
            self.projections.fetch_checkpoint(name).await.unwrap()
        }

        async fn request(&self, name: &str, status: ProjectionStatus) {
            self.projections.update_status(name, status).await.unwrap();
        }
    }

    fn ticket_list() -> ProjectionSetupConfiguration {
        ProjectionSetupConfiguration::from_stream("ticket_list", "ticket_stream")
            .with_handler("TicketWasRegistered", "ticket_list.on_registered")
            .unwrap()
    }

    fn registry(target: &str, handler: Arc<RecordingHandler>) -> HandlerRegistry {
        HandlerRegistry::new().with_handler(target, handler).unwrap()
    }

    fn payload_field(handler: &RecordingHandler, field: &str) -> Vec<Value> {
        handler
            .invocations()
            .iter()
            .map(|i| i.payload[field].clone())
            .collect()
    }

    #[tokio::test]
    async fn test_state_is_threaded_between_events_when_kept() {
        // Arrange
        let fixture = Fixture::new();
        for n in 1..=3 {
            fixture
                .append("ticket_stream", "TicketWasRegistered", json!({"n": n}))
                .await;
        }
        let handler = Arc::new(RecordingHandler::replying(|_, _, call| json!(call * 10)));
        let channel = registry("ticket_list.on_registered", handler.clone());
        let executor = fixture.executor(ticket_list().with_keeping_state(true));

        // Act
        executor.execute(&channel).await.unwrap();

        // Assert
        let states: Vec<Value> = handler
            .invocations()
            .iter()
            .map(|i| i.meta(PROJECTION_STATE))
            .collect();
        assert_eq!(states, vec![Value::Null, json!(10), json!(20)]);
        assert_eq!(fixture.checkpoint("ticket_list").await.unwrap().state, json!(30));
    }

    #[tokio::test]
    async fn test_state_is_null_for_every_event_when_not_kept() {
        // Arrange
        let fixture = Fixture::new();
        for n in 1..=3 {
            fixture
                .append("ticket_stream", "TicketWasRegistered", json!({"n": n}))
                .await;
        }
        let handler = Arc::new(RecordingHandler::replying(|_, _, call| json!(call * 10)));
        let channel = registry("ticket_list.on_registered", handler.clone());
        let executor = fixture.executor(ticket_list());

        // Act
        executor.execute(&channel).await.unwrap();

        // Assert
        assert_eq!(handler.count(), 3);
        assert!(
            handler
                .invocations()
                .iter()
                .all(|i| i.meta(PROJECTION_STATE).is_null())
        );
        assert_eq!(fixture.checkpoint("ticket_list").await.unwrap().state, Value::Null);
    }

    #[tokio::test]
    async fn test_dispatch_metadata_carries_projection_markers() {
        // Arrange
        let fixture = Fixture::new();
        fixture
            .append("ticket_stream", "TicketWasRegistered", json!({"n": 1}))
            .await;
        let handler = Arc::new(RecordingHandler::new());
        let channel = registry("ticket_list.on_registered", handler.clone());

        // Act
        fixture.executor(ticket_list()).execute(&channel).await.unwrap();

        // Assert
        let invocation = &handler.invocations()[0];
        assert_eq!(invocation.payload, json!({"n": 1}));
        assert_eq!(invocation.meta(PROJECTION_NAME), json!("ticket_list"));
        assert_eq!(invocation.meta(PROJECTION_IS_POLLING), json!(true));
        assert_eq!(invocation.meta(PROJECTION_IS_RESETTING), json!(false));
    }

    #[tokio::test]
    async fn test_initialization_hook_runs_once_per_executor() {
        // Arrange
        let fixture = Fixture::new();
        let init = Arc::new(RecordingHandler::new());
        let channel = registry("ticket_list.init", init.clone());
        let setup = ticket_list()
            .with_lifecycle(ProjectionLifeCycle::new().with_initialization("ticket_list.init"));
        let executor = fixture.executor(setup.clone());

        // Act
        executor.execute(&channel).await.unwrap();
        executor.execute(&channel).await.unwrap();
        let restarted = fixture.executor(setup);
        restarted.execute(&channel).await.unwrap();

        // Assert
        assert_eq!(init.count(), 2);
        assert_eq!(init.invocations()[0].meta(PROJECTION_NAME), json!("ticket_list"));
    }

    #[tokio::test]
    async fn test_failing_initialization_aborts_and_is_retried() {
        // Arrange
        let fixture = Fixture::new();
        fixture
            .append("ticket_stream", "TicketWasRegistered", json!({"n": 1}))
            .await;
        let channel = HandlerRegistry::new()
            .with_handler("ticket_list.init", Arc::new(FailingHandler::on_call(1)))
            .unwrap();
        let setup = ticket_list()
            .with_lifecycle(ProjectionLifeCycle::new().with_initialization("ticket_list.init"));
        let executor = fixture.executor(setup);

        // Act
        let result = executor.execute(&channel).await;

        // Assert
        assert!(matches!(result, Err(DomainError::HandlerFailed { .. })));
        assert!(fixture.checkpoint("ticket_list").await.is_none());
    }

    #[tokio::test]
    async fn test_category_projection_reads_only_its_category() {
        // Arrange
        let fixture = Fixture::new();
        fixture.append("order-1", "OrderPlaced", json!({"from": "order-1"})).await;
        fixture.append("invoice-1", "OrderPlaced", json!({"from": "invoice-1"})).await;
        fixture.append("order-2", "OrderPlaced", json!({"from": "order-2"})).await;
        fixture.append("order-1", "OrderPlaced", json!({"from": "order-1"})).await;
        let handler = Arc::new(RecordingHandler::new());
        let channel = registry("orders.on_placed", handler.clone());
        let setup = ProjectionSetupConfiguration::from_categories("orders", ["order"])
            .with_handler("OrderPlaced", "orders.on_placed")
            .unwrap();

        // Act
        let outcome = fixture.executor(setup).execute(&channel).await.unwrap();

        // Assert
        assert_eq!(outcome, ExecutionOutcome::Processed { events: 3 });
        assert_eq!(
            payload_field(&handler, "from"),
            vec![json!("order-1"), json!("order-2"), json!("order-1")]
        );
        let positions = fixture.checkpoint("orders").await.unwrap().positions;
        assert_eq!(positions.get("order-1"), Some(&2));
        assert_eq!(positions.get("order-2"), Some(&1));
        assert!(!positions.contains_key("invoice-1"));
    }

    #[tokio::test]
    async fn test_multi_stream_rounds_keep_global_order() {
        // Arrange
        let fixture = Fixture::new();
        for (stream, n) in [("a-1", 1), ("b-1", 2), ("b-1", 3), ("a-1", 4), ("b-1", 5), ("a-1", 6)] {
            fixture.append(stream, "Tick", json!({"n": n})).await;
        }
        let handler = Arc::new(RecordingHandler::new());
        let channel = registry("ticks.on_tick", handler.clone());
        let setup = ProjectionSetupConfiguration::from_all("ticks")
            .with_handler("Tick", "ticks.on_tick")
            .unwrap()
            .with_options(ProjectionOptions::default().with_load_batch_size(2).with_cache_size(1));

        // Act
        let outcome = fixture.executor(setup).execute(&channel).await.unwrap();

        // Assert
        assert_eq!(outcome, ExecutionOutcome::Processed { events: 6 });
        assert_eq!(
            payload_field(&handler, "n"),
            (1..=6).map(|n| json!(n)).collect::<Vec<_>>()
        );
    }

    #[tokio::test]
    async fn test_all_streams_source_skips_internal_streams() {
        // Arrange
        let fixture = Fixture::new();
        fixture.append("$internal", "Tick", json!({"n": 1})).await;
        fixture.append("ticket_stream", "Tick", json!({"n": 2})).await;
        let handler = Arc::new(RecordingHandler::new());
        let channel = registry("ticks.on_tick", handler.clone());
        let setup = ProjectionSetupConfiguration::from_all("ticks")
            .with_handler("Tick", "ticks.on_tick")
            .unwrap();

        // Act
        fixture.executor(setup).execute(&channel).await.unwrap();

        // Assert
        assert_eq!(payload_field(&handler, "n"), vec![json!(2)]);
    }

    #[tokio::test]
    async fn test_next_run_resumes_from_checkpoint() {
        // Arrange
        let fixture = Fixture::new();
        for n in 1..=3 {
            fixture
                .append("ticket_stream", "TicketWasRegistered", json!({"n": n}))
                .await;
        }
        let handler = Arc::new(RecordingHandler::new());
        let channel = registry("ticket_list.on_registered", handler.clone());
        let executor = fixture.executor(ticket_list());
        let first = executor.execute(&channel).await.unwrap();
        for n in 4..=5 {
            fixture
                .append("ticket_stream", "TicketWasRegistered", json!({"n": n}))
                .await;
        }

        // Act
        let second = executor.execute(&channel).await.unwrap();
        let third = executor.execute(&channel).await.unwrap();

        // Assert
        assert_eq!(first, ExecutionOutcome::Processed { events: 3 });
        assert_eq!(second, ExecutionOutcome::Processed { events: 2 });
        assert_eq!(third, ExecutionOutcome::Processed { events: 0 });
        assert_eq!(handler.count(), 5);
        let checkpoint = fixture.checkpoint("ticket_list").await.unwrap();
        assert_eq!(checkpoint.positions.get("ticket_stream"), Some(&5));
        assert_eq!(checkpoint.status, ProjectionStatus::Idle);
        assert!(checkpoint.locked_until.is_none());
    }

    #[tokio::test]
    async fn test_events_without_handler_still_advance_position() {
        // Arrange
        let fixture = Fixture::new();
        fixture.append("ticket_stream", "TicketWasClosed", json!({})).await;
        fixture
            .append("ticket_stream", "TicketWasRegistered", json!({"n": 2}))
            .await;
        let handler = Arc::new(RecordingHandler::new());
        let channel = registry("ticket_list.on_registered", handler.clone());

        // Act
        let outcome = fixture.executor(ticket_list()).execute(&channel).await.unwrap();

        // Assert
        assert_eq!(outcome, ExecutionOutcome::Processed { events: 2 });
        assert_eq!(handler.count(), 1);
        let positions = fixture.checkpoint("ticket_list").await.unwrap().positions;
        assert_eq!(positions.get("ticket_stream"), Some(&2));
    }

    #[tokio::test]
    async fn test_missing_source_stream_is_nothing_to_do() {
        // Arrange
        let fixture = Fixture::new();
        let channel = registry("ticket_list.on_registered", Arc::new(RecordingHandler::new()));

        // Act
        let outcome = fixture.executor(ticket_list()).execute(&channel).await.unwrap();

        // Assert
        assert_eq!(outcome, ExecutionOutcome::Processed { events: 0 });
    }

    #[tokio::test]
    async fn test_handler_failure_leaves_checkpoint_unchanged() {
        // Arrange
        let fixture = Fixture::new();
        for n in 1..=3 {
            fixture
                .append("ticket_stream", "TicketWasRegistered", json!({"n": n}))
                .await;
        }
        let channel = HandlerRegistry::new()
            .with_handler("ticket_list.on_registered", Arc::new(FailingHandler::on_call(2)))
            .unwrap();

        // Act
        let result = fixture.executor(ticket_list()).execute(&channel).await;

        // Assert
        match result {
            Err(DomainError::HandlerFailed { target, .. }) => {
                assert_eq!(target, "ticket_list.on_registered");
            }
            other => panic!("expected handler failure, got {other:?}"),
        }
        let checkpoint = fixture.checkpoint("ticket_list").await.unwrap();
        assert!(checkpoint.positions.is_empty());
        assert_eq!(checkpoint.status, ProjectionStatus::Idle);
        assert!(checkpoint.locked_until.is_none());
    }

    #[tokio::test]
    async fn test_completed_blocks_are_kept_when_a_later_block_fails() {
        // Arrange
        let fixture = Fixture::new();
        for n in 1..=5 {
            fixture
                .append("ticket_stream", "TicketWasRegistered", json!({"n": n}))
                .await;
        }
        let channel = HandlerRegistry::new()
            .with_handler("ticket_list.on_registered", Arc::new(FailingHandler::on_call(4)))
            .unwrap();
        let setup = ticket_list()
            .with_options(ProjectionOptions::default().with_persist_block_size(2));

        // Act
        let result = fixture.executor(setup).execute(&channel).await;

        // Assert
        assert!(result.is_err());
        let positions = fixture.checkpoint("ticket_list").await.unwrap().positions;
        assert_eq!(positions.get("ticket_stream"), Some(&2));
    }

    #[tokio::test]
    async fn test_read_failure_aborts_run_and_releases_lock() {
        // Arrange
        let projections = Arc::new(InMemoryProjectionStore::new());
        let handler = Arc::new(RecordingHandler::new());
        let channel = registry("ticket_list.on_registered", handler.clone());
        let executor = ProjectionExecutor::new(
            ticket_list(),
            ProjectionRunningConfiguration::polling(),
            ConvertingEventStore::new(Arc::new(FailingEventStore)),
            projections.clone(),
            Arc::new(ManualClock::default()),
        );

        // Act
        let result = executor.execute(&channel).await;

        // Assert
        assert!(matches!(result, Err(DomainError::Infrastructure(_))));
        assert_eq!(handler.count(), 0);
        let checkpoint = projections.fetch_checkpoint("ticket_list").await.unwrap().unwrap();
        assert!(checkpoint.locked_until.is_none());
        assert_eq!(checkpoint.status, ProjectionStatus::Idle);
    }

    #[tokio::test]
    async fn test_checkpoint_store_failure_propagates() {
        // Arrange
        let fixture = Fixture::new();
        fixture
            .append("ticket_stream", "TicketWasRegistered", json!({"n": 1}))
            .await;
        let handler = Arc::new(RecordingHandler::new());
        let channel = registry("ticket_list.on_registered", handler.clone());
        let executor = ProjectionExecutor::new(
            ticket_list(),
            ProjectionRunningConfiguration::polling(),
            fixture.events.clone(),
            Arc::new(FailingProjectionStore),
            fixture.clock.clone(),
        );

        // Act
        let result = executor.execute(&channel).await;

        // Assert
        assert!(matches!(result, Err(DomainError::Infrastructure(_))));
        assert_eq!(handler.count(), 0);
    }

    #[tokio::test]
    async fn test_out_of_range_lock_timeout_is_configuration_error() {
        // Arrange
        let fixture = Fixture::new();
        let executor = fixture.executor(
            ticket_list()
                .with_options(ProjectionOptions::default().with_lock_timeout(std::time::Duration::MAX)),
        );

        // Act
        let result = executor.execute(&HandlerRegistry::new()).await;

        // Assert
        assert!(matches!(result, Err(DomainError::Configuration(_))));
    }

    #[tokio::test]
    async fn test_locked_projection_is_skipped_until_lock_expires() {
        // Arrange
        let fixture = Fixture::new();
        fixture
            .append("ticket_stream", "TicketWasRegistered", json!({"n": 1}))
            .await;
        let handler = Arc::new(RecordingHandler::new());
        let channel = registry("ticket_list.on_registered", handler.clone());
        let now = fixture.clock.now();
        fixture.projections.create_projection("ticket_list").await.unwrap();
        fixture
            .projections
            .acquire_lock("ticket_list", now, now + chrono::Duration::seconds(10))
            .await
            .unwrap();
        let executor = fixture.executor(ticket_list());

        // Act
        let locked = executor.execute(&channel).await.unwrap();
        fixture.clock.advance(chrono::Duration::seconds(11));
        let after_expiry = executor.execute(&channel).await.unwrap();

        // Assert
        assert_eq!(locked, ExecutionOutcome::Locked);
        assert_eq!(after_expiry, ExecutionOutcome::Processed { events: 1 });
        assert_eq!(handler.count(), 1);
    }

    #[tokio::test]
    async fn test_stop_request_is_honoured_on_next_run() {
        // Arrange
        let fixture = Fixture::new();
        fixture
            .append("ticket_stream", "TicketWasRegistered", json!({"n": 1}))
            .await;
        let handler = Arc::new(RecordingHandler::new());
        let channel = registry("ticket_list.on_registered", handler.clone());
        fixture.projections.create_projection("ticket_list").await.unwrap();
        fixture.request("ticket_list", ProjectionStatus::Stopping).await;
        let executor = fixture.executor(ticket_list());

        // Act
        let outcome = executor.execute(&channel).await.unwrap();

        // Assert
        assert_eq!(outcome, ExecutionOutcome::Stopped);
        assert_eq!(handler.count(), 0);
        let checkpoint = fixture.checkpoint("ticket_list").await.unwrap();
        assert_eq!(checkpoint.status, ProjectionStatus::Idle);
    }

    #[tokio::test]
    async fn test_reset_replays_from_start_flagged_as_resetting() {
        // Arrange
        let fixture = Fixture::new();
        for n in 1..=2 {
            fixture
                .append("ticket_stream", "TicketWasRegistered", json!({"n": n}))
                .await;
        }
        fixture.append("ticket_list", "TicketCounted", json!({})).await;
        let handler = Arc::new(RecordingHandler::new());
        let reset = Arc::new(RecordingHandler::new());
        let channel = registry("ticket_list.on_registered", handler.clone())
            .with_handler("ticket_list.reset", reset.clone())
            .unwrap();
        let setup =
            ticket_list().with_lifecycle(ProjectionLifeCycle::new().with_reset("ticket_list.reset"));
        let executor = fixture.executor(setup);
        executor.execute(&channel).await.unwrap();
        fixture.request("ticket_list", ProjectionStatus::Resetting).await;

        // Act
        let outcome = executor.execute(&channel).await.unwrap();

        // Assert
        assert_eq!(outcome, ExecutionOutcome::Processed { events: 2 });
        assert_eq!(reset.count(), 1);
        let flags: Vec<Value> = handler
            .invocations()
            .iter()
            .map(|i| i.meta(PROJECTION_IS_RESETTING))
            .collect();
        assert_eq!(flags, vec![json!(false), json!(false), json!(true), json!(true)]);
        assert!(
            !fixture
                .events
                .has_stream(&"ticket_list".into())
                .await
                .unwrap()
        );
        let checkpoint = fixture.checkpoint("ticket_list").await.unwrap();
        assert_eq!(checkpoint.status, ProjectionStatus::Idle);
        assert_eq!(checkpoint.positions.get("ticket_stream"), Some(&2));
    }

    #[tokio::test]
    async fn test_delete_keeps_output_stream_unless_requested() {
        // Arrange
        let fixture = Fixture::new();
        fixture.append("ticket_list", "TicketCounted", json!({})).await;
        let delete = Arc::new(RecordingHandler::new());
        let channel = registry("ticket_list.delete", delete.clone());
        let setup =
            ticket_list().with_lifecycle(ProjectionLifeCycle::new().with_delete("ticket_list.delete"));
        let executor = fixture.executor(setup);
        executor.execute(&channel).await.unwrap();
        fixture.request("ticket_list", ProjectionStatus::Deleting).await;

        // Act
        let outcome = executor.execute(&channel).await.unwrap();

        // Assert
        assert_eq!(outcome, ExecutionOutcome::Deleted);
        assert_eq!(delete.count(), 1);
        assert!(fixture.checkpoint("ticket_list").await.is_none());
        assert!(
            fixture
                .events
                .has_stream(&"ticket_list".into())
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn test_delete_including_emitted_events_removes_output_stream() {
        // Arrange
        let fixture = Fixture::new();
        fixture.append("ticket_list", "TicketCounted", json!({})).await;
        let channel = HandlerRegistry::new();
        let executor = fixture.executor(ticket_list());
        executor.execute(&channel).await.unwrap();
        fixture
            .request("ticket_list", ProjectionStatus::DeletingIncludingEmittedEvents)
            .await;

        // Act
        let outcome = executor.execute(&channel).await.unwrap();

        // Assert
        assert_eq!(outcome, ExecutionOutcome::Deleted);
        assert!(fixture.checkpoint("ticket_list").await.is_none());
        assert!(
            !fixture
                .events
                .has_stream(&"ticket_list".into())
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn test_deleted_projection_reinitializes_on_next_run() {
        // Arrange
        let fixture = Fixture::new();
        fixture
            .append("ticket_stream", "TicketWasRegistered", json!({"n": 1}))
            .await;
        let init = Arc::new(RecordingHandler::new());
        let handler = Arc::new(RecordingHandler::new());
        let channel = registry("ticket_list.init", init.clone())
            .with_handler("ticket_list.on_registered", handler.clone())
            .unwrap();
        let setup = ticket_list()
            .with_lifecycle(ProjectionLifeCycle::new().with_initialization("ticket_list.init"));
        let executor = fixture.executor(setup);
        executor.execute(&channel).await.unwrap();
        fixture.request("ticket_list", ProjectionStatus::Deleting).await;
        executor.execute(&channel).await.unwrap();

        // Act
        let outcome = executor.execute(&channel).await.unwrap();

        // Assert
        assert_eq!(outcome, ExecutionOutcome::Processed { events: 1 });
        assert_eq!(init.count(), 2);
        assert_eq!(handler.count(), 2);
    }
}
