//! Writing events from inside a projection.

use std::fmt;
use std::sync::Arc;

use chronicle_core::clock::Clock;
use chronicle_core::error::DomainError;
use chronicle_core::event::{Event, Metadata, PendingEvent};
use chronicle_core::store::ConvertingEventStore;
use chronicle_core::stream::StreamName;

/// Appends events on behalf of one projection.
///
/// [`EventStreamEmitter::emit`] targets the projection's own output stream,
/// which reset and delete-including-emitted-events remove again.
#[derive(Clone)]
pub struct EventStreamEmitter {
    events: ConvertingEventStore,
    clock: Arc<dyn Clock>,
    output: StreamName,
}

impl fmt::Debug for EventStreamEmitter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventStreamEmitter")
            .field("output", &self.output)
            .finish_non_exhaustive()
    }
}

impl EventStreamEmitter {
    #[must_use]
    pub fn new(events: ConvertingEventStore, clock: Arc<dyn Clock>, projection_name: &str) -> Self {
        Self {
            events,
            clock,
            output: StreamName::new(projection_name),
        }
    }

    #[must_use]
    pub fn output_stream(&self) -> &StreamName {
        &self.output
    }

    /// Appends `events` to the projection's output stream.
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    pub async fn emit(&self, events: Vec<PendingEvent>) -> Result<(), DomainError> {
        self.link_to(&self.output, events).await
    }

    /// Appends `events` to `stream`, creating it on first use.
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    #[tracing::instrument(skip(self, events), fields(event_count = events.len()))]
    pub async fn link_to(&self, stream: &StreamName, events: Vec<PendingEvent>) -> Result<(), DomainError> {
        if events.is_empty() {
            return Ok(());
        }
        let now = self.clock.now();
        let events: Vec<Event> = events
            .into_iter()
            .map(|pending| Event::new(pending.event_type, pending.payload, now).with_metadata(pending.metadata))
            .collect();

        if self.events.has_stream(stream).await? {
            return self.events.append_to(stream, events).await;
        }
        match self.events.create(stream, events.clone(), Metadata::new()).await {
            Err(DomainError::StreamAlreadyExists(_)) => self.events.append_to(stream, events).await,
            other => other,
        }
    }
}
