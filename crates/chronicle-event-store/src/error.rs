//! Translation of `sqlx` errors into domain errors.

use chronicle_core::error::DomainError;

const UNIQUE_VIOLATION: &str = "23505";

/// Whether `err` is a `PostgreSQL` unique-constraint violation.
pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.code().as_deref() == Some(UNIQUE_VIOLATION))
}

/// Any backend failure.
pub(crate) fn database_error(err: sqlx::Error) -> DomainError {
    DomainError::Infrastructure(err.to_string())
}

/// A failed event insert: colliding writers become a concurrency conflict.
pub(crate) fn append_error(stream: &str, err: sqlx::Error) -> DomainError {
    if is_unique_violation(&err) {
        DomainError::ConcurrencyConflict {
            stream: stream.to_owned(),
            reason: err.to_string(),
        }
    } else {
        database_error(err)
    }
}

/// A failed registry insert: the stream was created by someone else.
pub(crate) fn create_error(stream: &str, err: sqlx::Error) -> DomainError {
    if is_unique_violation(&err) {
        DomainError::StreamAlreadyExists(stream.to_owned())
    } else {
        database_error(err)
    }
}
