//! Domain error types.

use thiserror::Error;

/// Boxed error returned verbatim from a handler invocation.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Top-level error type shared by the event store, repository and projections.
#[derive(Debug, Error)]
pub enum DomainError {
    /// The named stream does not exist.
    #[error("stream not found: {0}")]
    StreamNotFound(String),

    /// A stream with this name already exists.
    #[error("stream already exists: {0}")]
    StreamAlreadyExists(String),

    /// Two writers produced overlapping positions or aggregate versions.
    #[error("concurrency conflict on stream {stream}: {reason}")]
    ConcurrencyConflict {
        /// The stream that had the conflict.
        stream: String,
        /// What collided, as reported by the persistence strategy.
        reason: String,
    },

    /// No checkpoint exists for the named projection.
    #[error("projection not found: {0}")]
    ProjectionNotFound(String),

    /// Invalid static configuration, detected at startup.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A projection handler or lifecycle hook failed.
    #[error("handler {target} failed: {source}")]
    HandlerFailed {
        /// The handler reference that was invoked.
        target: String,
        /// The error raised by the handler.
        #[source]
        source: HandlerError,
    },

    /// A payload or metadata value could not be converted.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// An infrastructure/persistence error.
    #[error("infrastructure error: {0}")]
    Infrastructure(String),
}

impl DomainError {
    /// Returns `true` for [`DomainError::StreamNotFound`].
    #[must_use]
    pub fn is_stream_not_found(&self) -> bool {
        matches!(self, Self::StreamNotFound(_))
    }
}

impl From<serde_json::Error> for DomainError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handler_failed_keeps_source_error() {
        let source: HandlerError = "read model table missing".into();
        let err = DomainError::HandlerFailed {
            target: "ticket_list.add".to_owned(),
            source,
        };

        assert_eq!(
            err.to_string(),
            "handler ticket_list.add failed: read model table missing"
        );
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_is_stream_not_found() {
        assert!(DomainError::StreamNotFound("Ticket-1".into()).is_stream_not_found());
        assert!(!DomainError::StreamAlreadyExists("Ticket-1".into()).is_stream_not_found());
    }
}
