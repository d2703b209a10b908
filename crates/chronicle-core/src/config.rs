//! Event-sourcing configuration.

use crate::error::DomainError;
use crate::naming::{PersistenceStrategy, StreamNamingStrategy};
use crate::store::DEFAULT_LOAD_BATCH_SIZE;

/// Default events table.
pub const DEFAULT_EVENTS_TABLE: &str = "event_streams";
/// Default stream registry table.
pub const DEFAULT_STREAMS_TABLE: &str = "event_stream_registry";
/// Default projections table.
pub const DEFAULT_PROJECTIONS_TABLE: &str = "projections";
/// Default snapshots table.
pub const DEFAULT_SNAPSHOTS_TABLE: &str = "aggregate_snapshots";

/// Store-wide configuration, resolved once at startup.
#[derive(Debug, Clone)]
pub struct EventSourcingConfig {
    naming: StreamNamingStrategy,
    load_batch_size: usize,
    write_lock_strategy: bool,
    initialize_on_start: bool,
    events_table: String,
    streams_table: String,
    projections_table: String,
    snapshots_table: String,
}

impl Default for EventSourcingConfig {
    fn default() -> Self {
        Self {
            naming: StreamNamingStrategy::default(),
            load_batch_size: DEFAULT_LOAD_BATCH_SIZE,
            write_lock_strategy: true,
            initialize_on_start: true,
            events_table: DEFAULT_EVENTS_TABLE.to_owned(),
            streams_table: DEFAULT_STREAMS_TABLE.to_owned(),
            projections_table: DEFAULT_PROJECTIONS_TABLE.to_owned(),
            snapshots_table: DEFAULT_SNAPSHOTS_TABLE.to_owned(),
        }
    }
}

impl EventSourcingConfig {
    /// Uses `strategy`; overrides registered before this call are dropped.
    #[must_use]
    pub fn with_persistence_strategy(mut self, strategy: PersistenceStrategy) -> Self {
        self.naming = StreamNamingStrategy::new(strategy);
        self
    }

    /// Routes `aggregate_type` to a shared `stream_name`.
    #[must_use]
    pub fn with_stream_override(
        mut self,
        aggregate_type: impl Into<String>,
        stream_name: impl Into<String>,
    ) -> Self {
        self.naming = self.naming.with_stream_override(aggregate_type, stream_name);
        self
    }

    /// Sets the read batch size (minimum 1).
    #[must_use]
    pub fn with_load_batch_size(mut self, load_batch_size: usize) -> Self {
        self.load_batch_size = load_batch_size.max(1);
        self
    }

    /// Enables or disables the explicit per-stream write lock.
    #[must_use]
    pub fn with_write_lock_strategy(mut self, enabled: bool) -> Self {
        self.write_lock_strategy = enabled;
        self
    }

    /// Whether the schema is created when the store starts.
    #[must_use]
    pub fn with_initialize_on_start(mut self, enabled: bool) -> Self {
        self.initialize_on_start = enabled;
        self
    }

    /// Uses `name` for the events table.
    ///
    /// # Errors
    ///
    /// `Configuration` if `name` is not a plain SQL identifier.
    pub fn with_events_table(mut self, name: &str) -> Result<Self, DomainError> {
        self.events_table = validate_table_name(name)?;
        Ok(self)
    }

    /// Uses `name` for the stream registry table.
    ///
    /// # Errors
    ///
    /// `Configuration` if `name` is not a plain SQL identifier.
    pub fn with_streams_table(mut self, name: &str) -> Result<Self, DomainError> {
        self.streams_table = validate_table_name(name)?;
        Ok(self)
    }

    /// Uses `name` for the projections table.
    ///
    /// # Errors
    ///
    /// `Configuration` if `name` is not a plain SQL identifier.
    pub fn with_projections_table(mut self, name: &str) -> Result<Self, DomainError> {
        self.projections_table = validate_table_name(name)?;
        Ok(self)
    }

    /// Uses `name` for the snapshots table.
    ///
    /// # Errors
    ///
    /// `Configuration` if `name` is not a plain SQL identifier.
    pub fn with_snapshots_table(mut self, name: &str) -> Result<Self, DomainError> {
        self.snapshots_table = validate_table_name(name)?;
        Ok(self)
    }

    /// Aggregate-to-stream naming.
    #[must_use]
    pub fn naming(&self) -> &StreamNamingStrategy {
        &self.naming
    }

    /// Read batch size.
    #[must_use]
    pub fn load_batch_size(&self) -> usize {
        self.load_batch_size
    }

    /// Whether appends take an explicit per-stream lock.
    #[must_use]
    pub fn write_lock_strategy(&self) -> bool {
        self.write_lock_strategy
    }

    /// Whether the schema is created when the store starts.
    #[must_use]
    pub fn initialize_on_start(&self) -> bool {
        self.initialize_on_start
    }

    /// Events table name.
    #[must_use]
    pub fn events_table(&self) -> &str {
        &self.events_table
    }

    /// Stream registry table name.
    #[must_use]
    pub fn streams_table(&self) -> &str {
        &self.streams_table
    }

    /// Projections table name.
    #[must_use]
    pub fn projections_table(&self) -> &str {
        &self.projections_table
    }

    /// Snapshots table name.
    #[must_use]
    pub fn snapshots_table(&self) -> &str {
        &self.snapshots_table
    }
}

/// Accepts `[A-Za-z_][A-Za-z0-9_]*` up to 63 bytes.
///
/// # Errors
///
/// `Configuration` for anything else.
pub fn validate_table_name(name: &str) -> Result<String, DomainError> {
    let mut chars = name.chars();
    let valid_start = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
    let valid_rest = chars.all(|c| c.is_ascii_alphanumeric() || c == '_');

    if valid_start && valid_rest && name.len() <= 63 {
        Ok(name.to_owned())
    } else {
        Err(DomainError::Configuration(format!(
            "invalid table name {name:?}"
        )))
    }
}
