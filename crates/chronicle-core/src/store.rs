//! Event store abstraction.
//!
//! [`EventStore`] is the persistence-strategy seam: it stores and returns
//! events exactly as written (wire type names, stored payloads) and reads at
//! most one bounded batch per call. [`ConvertingEventStore`] layers the
//! [`EventMapper`] and [`PayloadConverter`] on top and turns single batches
//! into full loads through a [`StreamReader`].

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::EventSourcingConfig;
use crate::converter::{JsonPassthrough, PayloadConverter};
use crate::error::DomainError;
use crate::event::{Event, Metadata, RecordedEvent};
use crate::mapper::EventMapper;
use crate::matcher::{MetadataMatcher, Pattern};
use crate::stream::StreamName;

/// Default number of events fetched per round trip.
pub const DEFAULT_LOAD_BATCH_SIZE: usize = 1000;

/// Direction of a stream read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReadDirection {
    /// Ascending positions.
    #[default]
    Forward,
    /// Descending positions.
    Backward,
}

/// One bounded read against a single stream.
#[derive(Debug, Clone, PartialEq)]
pub struct ReadQuery {
    /// Inclusive start position. For backward reads `None` means the head.
    pub from: Option<i64>,
    /// Maximum number of matching events to return.
    pub count: usize,
    /// Optional metadata filter.
    pub matcher: Option<MetadataMatcher>,
    /// Read direction.
    pub direction: ReadDirection,
}

impl ReadQuery {
    /// Forward read of up to `count` events starting at `from`.
    #[must_use]
    pub fn forward(from: i64, count: usize) -> Self {
        Self {
            from: Some(from),
            count,
            matcher: None,
            direction: ReadDirection::Forward,
        }
    }

    /// Backward read of up to `count` events starting at `from` (or the head).
    #[must_use]
    pub fn backward(from: Option<i64>, count: usize) -> Self {
        Self {
            from,
            count,
            matcher: None,
            direction: ReadDirection::Backward,
        }
    }

    /// Restricts the read to events satisfying `matcher`.
    #[must_use]
    pub fn with_matcher(mut self, matcher: Option<MetadataMatcher>) -> Self {
        self.matcher = matcher.filter(|m| !m.is_empty());
        self
    }

    /// Whether `position` lies on the requested side of `from`.
    #[must_use]
    pub fn admits(&self, position: i64) -> bool {
        match (self.direction, self.from) {
            (ReadDirection::Forward, Some(from)) => position >= from,
            (ReadDirection::Backward, Some(from)) => position <= from,
            (_, None) => true,
        }
    }
}

/// Filter applied to stream or category names during discovery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NameFilter {
    /// Exactly this name.
    Exact(String),
    /// Names starting with this prefix.
    Prefix(String),
    /// Names matching this regular expression anywhere.
    Regex(Pattern),
}

impl NameFilter {
    /// Whether `name` passes the filter.
    #[must_use]
    pub fn accepts(&self, name: &str) -> bool {
        match self {
            Self::Exact(expected) => name == expected,
            Self::Prefix(prefix) => name.starts_with(prefix.as_str()),
            Self::Regex(pattern) => pattern.is_match(name),
        }
    }
}

/// Durable, ordered, append-only log partitioned into named streams.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Creates `stream` holding `events`.
    ///
    /// # Errors
    ///
    /// `StreamAlreadyExists` if the stream is present; `ConcurrencyConflict`
    /// if the events collide on aggregate version.
    async fn create(
        &self,
        stream: &StreamName,
        events: Vec<Event>,
        metadata: Metadata,
    ) -> Result<(), DomainError>;

    /// Appends `events` atomically to the end of `stream`.
    ///
    /// # Errors
    ///
    /// `StreamNotFound` if the stream does not exist; `ConcurrencyConflict`
    /// if another writer claimed the same position or aggregate version.
    async fn append_to(&self, stream: &StreamName, events: Vec<Event>) -> Result<(), DomainError>;

    /// Reads one batch of at most `query.count` matching events.
    ///
    /// An existing stream with no matching events yields an empty batch.
    ///
    /// # Errors
    ///
    /// `StreamNotFound` if the stream does not exist.
    async fn read(
        &self,
        stream: &StreamName,
        query: &ReadQuery,
    ) -> Result<Vec<RecordedEvent>, DomainError>;

    /// Whether `stream` exists.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Infrastructure` on backend failure.
    async fn has_stream(&self, stream: &StreamName) -> Result<bool, DomainError>;

    /// Removes `stream` and all of its events.
    ///
    /// # Errors
    ///
    /// `StreamNotFound` if the stream does not exist.
    async fn delete(&self, stream: &StreamName) -> Result<(), DomainError>;

    /// Replaces the free-form metadata of `stream`.
    ///
    /// # Errors
    ///
    /// `StreamNotFound` if the stream does not exist.
    async fn update_stream_metadata(
        &self,
        stream: &StreamName,
        metadata: Metadata,
    ) -> Result<(), DomainError>;

    /// Returns the free-form metadata of `stream`.
    ///
    /// # Errors
    ///
    /// `StreamNotFound` if the stream does not exist.
    async fn fetch_stream_metadata(&self, stream: &StreamName) -> Result<Metadata, DomainError>;

    /// Lists stream names in ascending order; `matcher` applies to stream
    /// metadata.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Infrastructure` on backend failure.
    async fn fetch_stream_names(
        &self,
        filter: Option<&NameFilter>,
        matcher: Option<&MetadataMatcher>,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<StreamName>, DomainError>;

    /// Lists distinct category names in ascending order.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Infrastructure` on backend failure.
    async fn fetch_category_names(
        &self,
        filter: Option<&NameFilter>,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<String>, DomainError>;
}

/// Options for a full (multi-batch) load.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadOptions {
    /// Inclusive start position; `None` means 1 forward or the head backward.
    pub from: Option<i64>,
    /// Upper bound on the number of events returned.
    pub max_count: Option<usize>,
    /// Optional metadata filter.
    pub matcher: Option<MetadataMatcher>,
    /// Whether payloads pass through the converter and type names through
    /// the mapper.
    pub deserialize: bool,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            from: None,
            max_count: None,
            matcher: None,
            deserialize: true,
        }
    }
}

impl LoadOptions {
    /// Starts the load at `position`.
    #[must_use]
    pub fn from(mut self, position: i64) -> Self {
        self.from = Some(position);
        self
    }

    /// Caps the number of returned events.
    #[must_use]
    pub fn max_count(mut self, count: usize) -> Self {
        self.max_count = Some(count);
        self
    }

    /// Filters by metadata.
    #[must_use]
    pub fn matching(mut self, matcher: MetadataMatcher) -> Self {
        self.matcher = Some(matcher);
        self
    }

    /// Returns raw stored payloads and wire type names.
    #[must_use]
    pub fn raw(mut self) -> Self {
        self.deserialize = false;
        self
    }
}

/// Event store front that maps type names, converts payloads and batches
/// reads.
#[derive(Debug, Clone)]
pub struct ConvertingEventStore {
    inner: Arc<dyn EventStore>,
    mapper: Arc<EventMapper>,
    converter: Arc<dyn PayloadConverter>,
    load_batch_size: usize,
}

impl std::fmt::Debug for dyn EventStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("dyn EventStore")
    }
}

impl ConvertingEventStore {
    /// Wraps `inner` with identity mapping and pass-through conversion.
    #[must_use]
    pub fn new(inner: Arc<dyn EventStore>) -> Self {
        Self {
            inner,
            mapper: Arc::new(EventMapper::empty()),
            converter: Arc::new(JsonPassthrough),
            load_batch_size: DEFAULT_LOAD_BATCH_SIZE,
        }
    }

    /// Wraps `inner`, reading in batches of `config.load_batch_size()`.
    #[must_use]
    pub fn from_config(inner: Arc<dyn EventStore>, config: &EventSourcingConfig) -> Self {
        Self::new(inner).with_load_batch_size(config.load_batch_size())
    }

    /// Uses `mapper` for type names.
    #[must_use]
    pub fn with_mapper(mut self, mapper: Arc<EventMapper>) -> Self {
        self.mapper = mapper;
        self
    }

    /// Uses `converter` for payloads.
    #[must_use]
    pub fn with_converter(mut self, converter: Arc<dyn PayloadConverter>) -> Self {
        self.converter = converter;
        self
    }

    /// Sets the number of events fetched per round trip (minimum 1).
    #[must_use]
    pub fn with_load_batch_size(mut self, load_batch_size: usize) -> Self {
        self.load_batch_size = load_batch_size.max(1);
        self
    }

    /// The wrapped persistence strategy.
    #[must_use]
    pub fn inner(&self) -> &Arc<dyn EventStore> {
        &self.inner
    }

    /// The type-name mapper.
    #[must_use]
    pub fn mapper(&self) -> &EventMapper {
        &self.mapper
    }

    /// Events fetched per round trip.
    #[must_use]
    pub fn load_batch_size(&self) -> usize {
        self.load_batch_size
    }

    /// Creates `stream` holding `events` (in-process type names).
    ///
    /// # Errors
    ///
    /// See [`EventStore::create`]; also `Serialization` from the converter.
    pub async fn create(
        &self,
        stream: &StreamName,
        events: Vec<Event>,
        metadata: Metadata,
    ) -> Result<(), DomainError> {
        let events = self.to_stored(events)?;
        self.inner.create(stream, events, metadata).await
    }

    /// Appends `events` (in-process type names) to `stream`.
    ///
    /// # Errors
    ///
    /// See [`EventStore::append_to`]; also `Serialization` from the converter.
    pub async fn append_to(&self, stream: &StreamName, events: Vec<Event>) -> Result<(), DomainError> {
        let events = self.to_stored(events)?;
        self.inner.append_to(stream, events).await
    }

    /// Loads matching events in ascending position order.
    ///
    /// # Errors
    ///
    /// `StreamNotFound` if the stream does not exist.
    pub async fn load(
        &self,
        stream: &StreamName,
        options: LoadOptions,
    ) -> Result<Vec<RecordedEvent>, DomainError> {
        self.reader(stream, ReadDirection::Forward, options)
            .collect()
            .await
    }

    /// Loads matching events in descending position order.
    ///
    /// # Errors
    ///
    /// `StreamNotFound` if the stream does not exist.
    pub async fn load_reverse(
        &self,
        stream: &StreamName,
        options: LoadOptions,
    ) -> Result<Vec<RecordedEvent>, DomainError> {
        self.reader(stream, ReadDirection::Backward, options)
            .collect()
            .await
    }

    /// Returns a lazy reader over `stream`.
    #[must_use]
    pub fn reader(
        &self,
        stream: &StreamName,
        direction: ReadDirection,
        options: LoadOptions,
    ) -> StreamReader<'_> {
        let next_from = match direction {
            ReadDirection::Forward => Some(options.from.unwrap_or(1).max(1)),
            ReadDirection::Backward => options.from,
        };
        StreamReader {
            store: self,
            stream: stream.clone(),
            direction,
            next_from,
            remaining: options.max_count,
            matcher: options.matcher,
            deserialize: options.deserialize,
            exhausted: false,
        }
    }

    /// Reads a single forward batch of up to `count` events from `from`.
    ///
    /// # Errors
    ///
    /// `StreamNotFound` if the stream does not exist.
    pub async fn read_batch(
        &self,
        stream: &StreamName,
        from: i64,
        count: usize,
        deserialize: bool,
    ) -> Result<Vec<RecordedEvent>, DomainError> {
        let batch = self
            .inner
            .read(stream, &ReadQuery::forward(from, count))
            .await?;
        if deserialize {
            batch.into_iter().map(|e| self.to_in_process(e)).collect()
        } else {
            Ok(batch)
        }
    }

    /// See [`EventStore::has_stream`].
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Infrastructure` on backend failure.
    pub async fn has_stream(&self, stream: &StreamName) -> Result<bool, DomainError> {
        self.inner.has_stream(stream).await
    }

    /// See [`EventStore::delete`].
    ///
    /// # Errors
    ///
    /// `StreamNotFound` if the stream does not exist.
    pub async fn delete(&self, stream: &StreamName) -> Result<(), DomainError> {
        self.inner.delete(stream).await
    }

    /// See [`EventStore::update_stream_metadata`].
    ///
    /// # Errors
    ///
    /// `StreamNotFound` if the stream does not exist.
    pub async fn update_stream_metadata(
        &self,
        stream: &StreamName,
        metadata: Metadata,
    ) -> Result<(), DomainError> {
        self.inner.update_stream_metadata(stream, metadata).await
    }

    /// See [`EventStore::fetch_stream_metadata`].
    ///
    /// # Errors
    ///
    /// `StreamNotFound` if the stream does not exist.
    pub async fn fetch_stream_metadata(&self, stream: &StreamName) -> Result<Metadata, DomainError> {
        self.inner.fetch_stream_metadata(stream).await
    }

    /// See [`EventStore::fetch_stream_names`].
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Infrastructure` on backend failure.
    pub async fn fetch_stream_names(
        &self,
        filter: Option<&NameFilter>,
        matcher: Option<&MetadataMatcher>,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<StreamName>, DomainError> {
        self.inner
            .fetch_stream_names(filter, matcher, limit, offset)
            .await
    }

    /// See [`EventStore::fetch_category_names`].
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Infrastructure` on backend failure.
    pub async fn fetch_category_names(
        &self,
        filter: Option<&NameFilter>,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<String>, DomainError> {
        self.inner.fetch_category_names(filter, limit, offset).await
    }

    fn to_stored(&self, events: Vec<Event>) -> Result<Vec<Event>, DomainError> {
        events
            .into_iter()
            .map(|mut event| {
                event.payload = self.converter.serialize(&event.event_type, event.payload)?;
                event.event_type = self.mapper.to_wire_name(&event.event_type).to_owned();
                Ok(event)
            })
            .collect()
    }

    fn to_in_process(&self, mut recorded: RecordedEvent) -> Result<RecordedEvent, DomainError> {
        let event_type = self
            .mapper
            .to_in_process_type(&recorded.event.event_type)
            .to_owned();
        recorded.event.payload = self
            .converter
            .deserialize(&event_type, recorded.event.payload)?;
        recorded.event.event_type = event_type;
        Ok(recorded)
    }
}

/// Lazily paginated read over one stream.
///
/// Each [`StreamReader::next_batch`] call performs at most one round trip of
/// at most `load_batch_size` events.
#[derive(Debug)]
pub struct StreamReader<'a> {
    store: &'a ConvertingEventStore,
    stream: StreamName,
    direction: ReadDirection,
    next_from: Option<i64>,
    remaining: Option<usize>,
    matcher: Option<MetadataMatcher>,
    deserialize: bool,
    exhausted: bool,
}

impl StreamReader<'_> {
    /// Fetches the next batch, or `None` once the stream is exhausted.
    ///
    /// # Errors
    ///
    /// `StreamNotFound` if the stream does not exist.
    pub async fn next_batch(&mut self) -> Result<Option<Vec<RecordedEvent>>, DomainError> {
        if self.exhausted || self.remaining == Some(0) {
            return Ok(None);
        }
        if self.direction == ReadDirection::Backward && self.next_from.is_some_and(|f| f < 1) {
            self.exhausted = true;
            return Ok(None);
        }

        let count = self
            .remaining
            .map_or(self.store.load_batch_size, |r| r.min(self.store.load_batch_size));
        let query = ReadQuery {
            from: self.next_from,
            count,
            matcher: self.matcher.clone(),
            direction: self.direction,
        };
        let batch = self.store.inner.read(&self.stream, &query).await?;
        tracing::debug!(
            stream = %self.stream,
            from = ?self.next_from,
            loaded = batch.len(),
            "loaded event batch"
        );

        if batch.len() < count {
            self.exhausted = true;
        }
        if let Some(last) = batch.last() {
            self.next_from = Some(match self.direction {
                ReadDirection::Forward => last.position + 1,
                ReadDirection::Backward => last.position - 1,
            });
        }
        if let Some(remaining) = self.remaining.as_mut() {
            *remaining -= batch.len();
        }
        if batch.is_empty() {
            return Ok(None);
        }

        let batch = if self.deserialize {
            batch
                .into_iter()
                .map(|e| self.store.to_in_process(e))
                .collect::<Result<Vec<_>, _>>()?
        } else {
            batch
        };
        Ok(Some(batch))
    }

    /// Drains the reader.
    ///
    /// # Errors
    ///
    /// `StreamNotFound` if the stream does not exist.
    pub async fn collect(mut self) -> Result<Vec<RecordedEvent>, DomainError> {
        let mut events = Vec::new();
        while let Some(batch) = self.next_batch().await? {
            events.extend(batch);
        }
        Ok(events)
    }
}
