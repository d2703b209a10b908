//! Chronicle admin: error types.

use chronicle_core::error::DomainError;
use thiserror::Error;

/// Startup and command errors of the admin binary.
#[derive(Debug, Error)]
pub enum AppError {
    /// An argument or environment variable is missing or invalid.
    #[error("configuration error: {0}")]
    Config(String),

    /// Database connection or pool error.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// The event store or projection store rejected the command.
    #[error(transparent)]
    Domain(#[from] DomainError),

    /// Writing command output failed.
    #[error("output error: {0}")]
    Output(#[from] std::io::Error),
}
