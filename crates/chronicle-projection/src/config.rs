//! Static projection configuration.
//!
//! A projection is described by three immutable value structs: what it reads
//! and which handler receives each event ([`ProjectionSetupConfiguration`]),
//! which lifecycle hooks it exposes ([`ProjectionLifeCycle`]) and how it is
//! driven ([`ProjectionRunningConfiguration`]).

use std::collections::BTreeMap;
use std::time::Duration;

use chronicle_core::error::DomainError;
use chronicle_core::handler::HandlerRef;
use chronicle_core::store::DEFAULT_LOAD_BATCH_SIZE;
use chronicle_core::stream::{StreamName, StreamSource};

/// Tuning knobs of a projection run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProjectionOptions {
    cache_size: usize,
    sleep: Duration,
    persist_block_size: usize,
    lock_timeout: Duration,
    load_batch_size: usize,
}

impl Default for ProjectionOptions {
    fn default() -> Self {
        Self {
            cache_size: 1000,
            sleep: Duration::from_millis(100),
            persist_block_size: 1000,
            lock_timeout: Duration::from_millis(1000),
            load_batch_size: DEFAULT_LOAD_BATCH_SIZE,
        }
    }
}

impl ProjectionOptions {
    /// Page size used when discovering source stream names.
    #[must_use]
    pub fn with_cache_size(mut self, cache_size: usize) -> Self {
        self.cache_size = cache_size.max(1);
        self
    }

    /// Pause of the polling scheduler when no events were found.
    #[must_use]
    pub fn with_sleep(mut self, sleep: Duration) -> Self {
        self.sleep = sleep;
        self
    }

    /// Number of handled events after which the checkpoint is written.
    #[must_use]
    pub fn with_persist_block_size(mut self, persist_block_size: usize) -> Self {
        self.persist_block_size = persist_block_size.max(1);
        self
    }

    /// Lifetime of the advisory lock taken for each run.
    #[must_use]
    pub fn with_lock_timeout(mut self, lock_timeout: Duration) -> Self {
        self.lock_timeout = lock_timeout;
        self
    }

    /// Events read per stream per round trip.
    #[must_use]
    pub fn with_load_batch_size(mut self, load_batch_size: usize) -> Self {
        self.load_batch_size = load_batch_size.max(1);
        self
    }

    #[must_use]
    pub fn cache_size(&self) -> usize {
        self.cache_size
    }

    #[must_use]
    pub fn sleep(&self) -> Duration {
        self.sleep
    }

    #[must_use]
    pub fn persist_block_size(&self) -> usize {
        self.persist_block_size
    }

    #[must_use]
    pub fn lock_timeout(&self) -> Duration {
        self.lock_timeout
    }

    #[must_use]
    pub fn load_batch_size(&self) -> usize {
        self.load_batch_size
    }
}

/// Lifecycle hooks, each dispatched with an empty payload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProjectionLifeCycle {
    initialization: Option<HandlerRef>,
    reset: Option<HandlerRef>,
    delete: Option<HandlerRef>,
}

impl ProjectionLifeCycle {
    /// No hooks.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Hook that prepares the read model. Must tolerate repeated calls.
    #[must_use]
    pub fn with_initialization(mut self, target: impl Into<HandlerRef>) -> Self {
        self.initialization = Some(target.into());
        self
    }

    /// Hook that empties the read model before a rebuild.
    #[must_use]
    pub fn with_reset(mut self, target: impl Into<HandlerRef>) -> Self {
        self.reset = Some(target.into());
        self
    }

    /// Hook that drops the read model.
    #[must_use]
    pub fn with_delete(mut self, target: impl Into<HandlerRef>) -> Self {
        self.delete = Some(target.into());
        self
    }

    #[must_use]
    pub fn initialization(&self) -> Option<&HandlerRef> {
        self.initialization.as_ref()
    }

    #[must_use]
    pub fn reset(&self) -> Option<&HandlerRef> {
        self.reset.as_ref()
    }

    #[must_use]
    pub fn delete(&self) -> Option<&HandlerRef> {
        self.delete.as_ref()
    }
}

/// How a projection is triggered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunningMode {
    /// Runs a catch-up pass whenever one of its handlers is messaged.
    EventDriven,
    /// Runs on a timer.
    Polling,
}

/// Runtime mode of one projection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProjectionRunningConfiguration {
    mode: RunningMode,
    initialize_on_startup: bool,
}

impl Default for ProjectionRunningConfiguration {
    fn default() -> Self {
        Self::event_driven()
    }
}

impl ProjectionRunningConfiguration {
    #[must_use]
    pub fn event_driven() -> Self {
        Self {
            mode: RunningMode::EventDriven,
            initialize_on_startup: true,
        }
    }

    #[must_use]
    pub fn polling() -> Self {
        Self {
            mode: RunningMode::Polling,
            initialize_on_startup: true,
        }
    }

    /// Whether the initialization hook runs before the first poll instead of
    /// lazily on the first execution.
    #[must_use]
    pub fn with_initialize_on_startup(mut self, initialize_on_startup: bool) -> Self {
        self.initialize_on_startup = initialize_on_startup;
        self
    }

    #[must_use]
    pub fn mode(&self) -> RunningMode {
        self.mode
    }

    #[must_use]
    pub fn is_polling(&self) -> bool {
        self.mode == RunningMode::Polling
    }

    #[must_use]
    pub fn is_event_driven(&self) -> bool {
        self.mode == RunningMode::EventDriven
    }

    #[must_use]
    pub fn initializes_on_startup(&self) -> bool {
        self.initialize_on_startup
    }
}

/// What a projection reads and where each event goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectionSetupConfiguration {
    name: String,
    source: StreamSource,
    handlers: BTreeMap<String, HandlerRef>,
    keep_state: bool,
    options: ProjectionOptions,
    lifecycle: ProjectionLifeCycle,
}

impl ProjectionSetupConfiguration {
    fn new(name: impl Into<String>, source: StreamSource) -> Self {
        Self {
            name: name.into(),
            source,
            handlers: BTreeMap::new(),
            keep_state: false,
            options: ProjectionOptions::default(),
            lifecycle: ProjectionLifeCycle::default(),
        }
    }

    /// Reads every non-internal stream.
    #[must_use]
    pub fn from_all(name: impl Into<String>) -> Self {
        Self::new(name, StreamSource::All)
    }

    #[must_use]
    pub fn from_stream(name: impl Into<String>, stream: impl Into<StreamName>) -> Self {
        Self::new(name, StreamSource::Streams(vec![stream.into()]))
    }

    #[must_use]
    pub fn from_streams<I, S>(name: impl Into<String>, streams: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<StreamName>,
    {
        Self::new(
            name,
            StreamSource::Streams(streams.into_iter().map(Into::into).collect()),
        )
    }

    #[must_use]
    pub fn from_category(name: impl Into<String>, category: impl Into<String>) -> Self {
        Self::new(name, StreamSource::Categories(vec![category.into()]))
    }

    #[must_use]
    pub fn from_categories<I, S>(name: impl Into<String>, categories: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(
            name,
            StreamSource::Categories(categories.into_iter().map(Into::into).collect()),
        )
    }

    /// Routes events named `event_name` to `target`.
    ///
    /// # Errors
    ///
    /// `Configuration` if a handler is already registered for `event_name`.
    pub fn with_handler(
        mut self,
        event_name: impl Into<String>,
        target: impl Into<HandlerRef>,
    ) -> Result<Self, DomainError> {
        let event_name = event_name.into();
        if self.handlers.contains_key(&event_name) {
            return Err(DomainError::Configuration(format!(
                "projection {} registers two handlers for event {event_name}",
                self.name
            )));
        }
        self.handlers.insert(event_name, target.into());
        Ok(self)
    }

    /// Feeds each handler's result to the next handler as `projection.state`.
    #[must_use]
    pub fn with_keeping_state(mut self, keep_state: bool) -> Self {
        self.keep_state = keep_state;
        self
    }

    #[must_use]
    pub fn with_options(mut self, options: ProjectionOptions) -> Self {
        self.options = options;
        self
    }

    #[must_use]
    pub fn with_lifecycle(mut self, lifecycle: ProjectionLifeCycle) -> Self {
        self.lifecycle = lifecycle;
        self
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn source(&self) -> &StreamSource {
        &self.source
    }

    #[must_use]
    pub fn handlers(&self) -> &BTreeMap<String, HandlerRef> {
        &self.handlers
    }

    /// The handler registered for `event_name`, if any.
    #[must_use]
    pub fn handler_for(&self, event_name: &str) -> Option<&HandlerRef> {
        self.handlers.get(event_name)
    }

    /// Whether `target` receives events of this projection.
    #[must_use]
    pub fn routes_to(&self, target: &HandlerRef) -> bool {
        self.handlers.values().any(|h| h == target)
    }

    #[must_use]
    pub fn keeps_state(&self) -> bool {
        self.keep_state
    }

    #[must_use]
    pub fn options(&self) -> &ProjectionOptions {
        &self.options
    }

    #[must_use]
    pub fn lifecycle(&self) -> &ProjectionLifeCycle {
        &self.lifecycle
    }

    /// The stream the projection emits into.
    #[must_use]
    pub fn output_stream(&self) -> StreamName {
        StreamName::new(self.name.as_str())
    }
}
