//! `PostgreSQL` implementation of the `ProjectionStore` trait.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};

use chronicle_core::checkpoint::{Checkpoint, ProjectionStatus, ProjectionStore, StreamPositions};
use chronicle_core::config::EventSourcingConfig;
use chronicle_core::error::DomainError;

use crate::error::database_error;
use crate::schema;

/// PostgreSQL-backed projection checkpoints.
#[derive(Debug, Clone)]
pub struct PgProjectionStore {
    pool: PgPool,
    table: String,
}

impl PgProjectionStore {
    /// Creates a new `PgProjectionStore` using the table named in `config`.
    #[must_use]
    pub fn new(pool: PgPool, config: &EventSourcingConfig) -> Self {
        Self {
            pool,
            table: config.projections_table().to_owned(),
        }
    }

    /// Creates the projections table (idempotent).
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Infrastructure` if the DDL fails.
    pub async fn initialize(&self) -> Result<(), DomainError> {
        schema::execute_all(&self.pool, schema::create_projections_table(&self.table)).await
    }

    fn decode_row(row: &PgRow) -> Result<Checkpoint, DomainError> {
        let decode = |e: sqlx::Error| DomainError::Serialization(e.to_string());
        let status: String = row.try_get("status").map_err(decode)?;
        let positions: sqlx::types::Json<StreamPositions> =
            row.try_get("positions").map_err(decode)?;
        let state: sqlx::types::Json<Value> = row.try_get("state").map_err(decode)?;
        Ok(Checkpoint {
            name: row.try_get("name").map_err(decode)?,
            status: status.parse()?,
            positions: positions.0,
            state: state.0,
            locked_until: row.try_get("locked_until").map_err(decode)?,
        })
    }

    fn ensure_found(name: &str, rows_affected: u64) -> Result<(), DomainError> {
        if rows_affected == 0 {
            Err(DomainError::ProjectionNotFound(name.to_owned()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl ProjectionStore for PgProjectionStore {
    async fn create_projection(&self, name: &str) -> Result<bool, DomainError> {
        let inserted = sqlx::query(&format!(
            "INSERT INTO {} (name, status) VALUES ($1, $2) ON CONFLICT (name) DO NOTHING",
            self.table
        ))
        .bind(name)
        .bind(ProjectionStatus::Idle.as_str())
        .execute(&self.pool)
        .await
        .map_err(database_error)?
        .rows_affected();
        Ok(inserted > 0)
    }

    async fn fetch_checkpoint(&self, name: &str) -> Result<Option<Checkpoint>, DomainError> {
        let row = sqlx::query(&format!(
            "SELECT name, status, positions, state, locked_until FROM {} WHERE name = $1",
            self.table
        ))
        .bind(name)
        .fetch_optional(&self.pool)
        .await
        .map_err(database_error)?;
        row.as_ref().map(Self::decode_row).transpose()
    }

    #[tracing::instrument(skip(self))]
    async fn acquire_lock(
        &self,
        name: &str,
        now: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Option<Checkpoint>, DomainError> {
        let row = sqlx::query(&format!(
            "UPDATE {} SET locked_until = $3, \
             status = CASE WHEN status = 'idle' THEN 'running' ELSE status END \
             WHERE name = $1 AND (locked_until IS NULL OR locked_until <= $2) \
             RETURNING name, status, positions, state, locked_until",
            self.table
        ))
        .bind(name)
        .bind(now)
        .bind(until)
        .fetch_optional(&self.pool)
        .await
        .map_err(database_error)?;

        match row {
            Some(row) => Self::decode_row(&row).map(Some),
            None if self.fetch_checkpoint(name).await?.is_some() => {
                tracing::debug!("projection lock held elsewhere");
                Ok(None)
            }
            None => Err(DomainError::ProjectionNotFound(name.to_owned())),
        }
    }

    async fn persist(
        &self,
        name: &str,
        positions: &StreamPositions,
        state: &Value,
        locked_until: DateTime<Utc>,
    ) -> Result<(), DomainError> {
        let updated = sqlx::query(&format!(
            "UPDATE {} SET positions = $2, state = $3, locked_until = $4 WHERE name = $1",
            self.table
        ))
        .bind(name)
        .bind(sqlx::types::Json(positions))
        .bind(sqlx::types::Json(state))
        .bind(locked_until)
        .execute(&self.pool)
        .await
        .map_err(database_error)?
        .rows_affected();
        Self::ensure_found(name, updated)
    }

    #[tracing::instrument(skip(self))]
    async fn update_status(&self, name: &str, status: ProjectionStatus) -> Result<(), DomainError> {
        let updated = sqlx::query(&format!(
            "UPDATE {} SET status = $2 WHERE name = $1",
            self.table
        ))
        .bind(name)
        .bind(status.as_str())
        .execute(&self.pool)
        .await
        .map_err(database_error)?
        .rows_affected();
        Self::ensure_found(name, updated)
    }

    async fn release_lock(&self, name: &str) -> Result<(), DomainError> {
        sqlx::query(&format!(
            "UPDATE {} SET locked_until = NULL, \
             status = CASE WHEN status = 'running' THEN 'idle' ELSE status END \
             WHERE name = $1",
            self.table
        ))
        .bind(name)
        .execute(&self.pool)
        .await
        .map_err(database_error)?;
        Ok(())
    }

    async fn delete_projection(&self, name: &str) -> Result<(), DomainError> {
        let deleted = sqlx::query(&format!("DELETE FROM {} WHERE name = $1", self.table))
            .bind(name)
            .execute(&self.pool)
            .await
            .map_err(database_error)?
            .rows_affected();
        Self::ensure_found(name, deleted)
    }

    async fn fetch_projection_names(
        &self,
        prefix: Option<&str>,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<String>, DomainError> {
        sqlx::query_scalar(&format!(
            "SELECT name FROM {} WHERE ($1::text IS NULL OR left(name, length($1)) = $1) \
             ORDER BY name COLLATE \"C\" LIMIT $2 OFFSET $3",
            self.table
        ))
        .bind(prefix)
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .bind(i64::try_from(offset).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await
        .map_err(database_error)
    }
}
