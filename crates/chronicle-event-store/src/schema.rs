//! Event store database schema.
//!
//! Table names come from [`EventSourcingConfig`], where they are validated
//! as plain identifiers before they are spliced into DDL.

use sqlx::PgPool;

use chronicle_core::config::EventSourcingConfig;
use chronicle_core::error::DomainError;

use crate::error::database_error;

/// DDL for the events table: one row per event, `no` is the global order.
#[must_use]
pub fn create_events_table(table: &str) -> Vec<String> {
    vec![
        format!(
            r"
CREATE TABLE IF NOT EXISTS {table} (
    no               BIGSERIAL PRIMARY KEY,
    stream_id        CHAR(64) NOT NULL,
    real_stream_name TEXT NOT NULL,
    category         TEXT NULL,
    position         BIGINT NOT NULL,
    event_id         UUID NOT NULL UNIQUE,
    event_name       TEXT NOT NULL,
    payload          JSONB NOT NULL,
    metadata         JSONB NOT NULL,
    created_at       TIMESTAMPTZ NOT NULL,
    UNIQUE (stream_id, position)
)"
        ),
        format!(
            r"
CREATE UNIQUE INDEX IF NOT EXISTS {table}_aggregate_version_idx
    ON {table} (
        stream_id,
        (metadata->>'_aggregate_type'),
        (metadata->>'_aggregate_id'),
        (metadata->>'_aggregate_version')
    )
    WHERE metadata ? '_aggregate_version'"
        ),
        format!("CREATE INDEX IF NOT EXISTS {table}_category_idx ON {table} (category, no)"),
    ]
}

/// DDL for the stream registry: one row per stream with its metadata.
#[must_use]
pub fn create_streams_table(table: &str) -> Vec<String> {
    vec![
        format!(
            r"
CREATE TABLE IF NOT EXISTS {table} (
    stream_name TEXT PRIMARY KEY,
    stream_id   CHAR(64) NOT NULL UNIQUE,
    category    TEXT NULL,
    metadata    JSONB NOT NULL DEFAULT '{{}}'::jsonb,
    created_at  TIMESTAMPTZ NOT NULL DEFAULT NOW()
)"
        ),
        format!("CREATE INDEX IF NOT EXISTS {table}_category_idx ON {table} (category)"),
    ]
}

/// DDL for projection checkpoints.
#[must_use]
pub fn create_projections_table(table: &str) -> Vec<String> {
    vec![format!(
        r"
CREATE TABLE IF NOT EXISTS {table} (
    no           BIGSERIAL PRIMARY KEY,
    name         TEXT NOT NULL UNIQUE,
    status       TEXT NOT NULL,
    positions    JSONB NOT NULL DEFAULT '{{}}'::jsonb,
    state        JSONB NOT NULL DEFAULT 'null'::jsonb,
    locked_until TIMESTAMPTZ NULL
)"
    )]
}

/// DDL for aggregate snapshots.
#[must_use]
pub fn create_snapshots_table(table: &str) -> Vec<String> {
    vec![format!(
        r"
CREATE TABLE IF NOT EXISTS {table} (
    aggregate_type TEXT NOT NULL,
    aggregate_id   TEXT NOT NULL,
    version        BIGINT NOT NULL,
    state          JSONB NOT NULL,
    created_at     TIMESTAMPTZ NOT NULL,
    PRIMARY KEY (aggregate_type, aggregate_id)
)"
    )]
}

/// Runs `statements` in order.
///
/// # Errors
///
/// Returns `DomainError::Infrastructure` if any statement fails.
pub async fn execute_all(pool: &PgPool, statements: Vec<String>) -> Result<(), DomainError> {
    for statement in statements {
        sqlx::query(&statement)
            .execute(pool)
            .await
            .map_err(database_error)?;
    }
    Ok(())
}

/// Creates every table named by `config` (idempotent).
///
/// # Errors
///
/// Returns `DomainError::Infrastructure` if any statement fails.
#[tracing::instrument(skip_all)]
pub async fn initialize(pool: &PgPool, config: &EventSourcingConfig) -> Result<(), DomainError> {
    let statements = [
        create_streams_table(config.streams_table()),
        create_events_table(config.events_table()),
        create_projections_table(config.projections_table()),
        create_snapshots_table(config.snapshots_table()),
    ]
    .concat();
    execute_all(pool, statements).await?;
    tracing::info!("event store schema initialized");
    Ok(())
}
