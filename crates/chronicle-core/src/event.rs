//! Event abstractions.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::DomainError;
use crate::stream::StreamName;

/// Ordered key-value metadata carried by every event.
pub type Metadata = serde_json::Map<String, Value>;

/// Metadata key holding the identifier of the aggregate that recorded the event.
pub const AGGREGATE_ID: &str = "_aggregate_id";
/// Metadata key holding the aggregate type name.
pub const AGGREGATE_TYPE: &str = "_aggregate_type";
/// Metadata key holding the aggregate version; the optimistic-concurrency token.
pub const AGGREGATE_VERSION: &str = "_aggregate_version";

/// Immutable unit of the log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Globally unique event identifier.
    pub event_id: Uuid,
    /// Type name as written to the log (or the in-process name once mapped).
    pub event_type: String,
    /// Serialized event payload.
    pub payload: Value,
    /// User metadata plus the reserved aggregate keys.
    pub metadata: Metadata,
    /// Timestamp of event creation.
    pub created_at: DateTime<Utc>,
}

impl Event {
    /// Creates an event with a fresh identifier and empty metadata.
    #[must_use]
    pub fn new(event_type: impl Into<String>, payload: Value, created_at: DateTime<Utc>) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            event_type: event_type.into(),
            payload,
            metadata: Metadata::new(),
            created_at,
        }
    }

    /// Replaces the metadata.
    #[must_use]
    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// Adds or overwrites a single metadata entry.
    #[must_use]
    pub fn with_metadata_entry(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// The aggregate identifier in its scalar text form, if stamped.
    #[must_use]
    pub fn aggregate_id(&self) -> Option<String> {
        self.metadata.get(AGGREGATE_ID).and_then(scalar_text)
    }

    /// The aggregate type, if stamped.
    #[must_use]
    pub fn aggregate_type(&self) -> Option<&str> {
        self.metadata.get(AGGREGATE_TYPE).and_then(Value::as_str)
    }

    /// The aggregate version, if stamped.
    #[must_use]
    pub fn aggregate_version(&self) -> Option<i64> {
        match self.metadata.get(AGGREGATE_VERSION)? {
            Value::Number(n) => n.as_i64(),
            Value::String(s) => s.parse().ok(),
            _ => None,
        }
    }

    /// Deserializes the payload into a concrete event type.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Serialization` if the payload does not match `T`.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, DomainError> {
        serde_json::from_value(self.payload.clone()).map_err(|e| {
            DomainError::Serialization(format!(
                "event {} ({}) deserialization failed: {e}",
                self.event_id, self.event_type
            ))
        })
    }
}

/// An event as read back from a stream.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedEvent {
    /// The stream the event was appended to.
    pub stream: StreamName,
    /// 1-based position within `stream`.
    pub position: i64,
    /// Store-wide insertion order across all streams.
    pub global_position: i64,
    /// The event itself.
    pub event: Event,
}

/// An event produced by command handling that has not been persisted yet.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingEvent {
    /// In-process type name.
    pub event_type: String,
    /// Event payload.
    pub payload: Value,
    /// Event-specific metadata, merged over the caller's metadata on save.
    pub metadata: Metadata,
}

impl PendingEvent {
    /// Creates a pending event with no event-specific metadata.
    #[must_use]
    pub fn new(event_type: impl Into<String>, payload: Value) -> Self {
        Self {
            event_type: event_type.into(),
            payload,
            metadata: Metadata::new(),
        }
    }

    /// Builds a pending event from a typed domain event.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Serialization` if the payload cannot be encoded.
    pub fn from_domain(event: &dyn DomainEvent) -> Result<Self, DomainError> {
        Ok(Self::new(event.event_type(), event.to_payload()?))
    }

    /// Adds or overwrites a single metadata entry.
    #[must_use]
    pub fn with_metadata_entry(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// Renders a scalar JSON value as text, the way metadata is compared.
///
/// Strings are returned as-is, numbers and booleans in their JSON spelling.
/// Null, arrays and objects have no scalar form.
#[must_use]
pub fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Null | Value::Array(_) | Value::Object(_) => None,
    }
}
