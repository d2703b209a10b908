//! `PostgreSQL` implementation of the `SnapshotStore` trait.

use async_trait::async_trait;
use sqlx::{PgPool, Row};

use chronicle_core::config::EventSourcingConfig;
use chronicle_core::error::DomainError;
use chronicle_core::snapshot::{Snapshot, SnapshotStore};

use crate::error::database_error;
use crate::schema;

/// PostgreSQL-backed snapshot store keeping the latest snapshot per instance.
#[derive(Debug, Clone)]
pub struct PgSnapshotStore {
    pool: PgPool,
    table: String,
}

impl PgSnapshotStore {
    /// Creates a new `PgSnapshotStore` using the table named in `config`.
    #[must_use]
    pub fn new(pool: PgPool, config: &EventSourcingConfig) -> Self {
        Self {
            pool,
            table: config.snapshots_table().to_owned(),
        }
    }

    /// Creates the snapshots table (idempotent).
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Infrastructure` if the DDL fails.
    pub async fn initialize(&self) -> Result<(), DomainError> {
        schema::execute_all(&self.pool, schema::create_snapshots_table(&self.table)).await
    }
}

#[async_trait]
impl SnapshotStore for PgSnapshotStore {
    async fn load(
        &self,
        aggregate_type: &str,
        aggregate_id: &str,
    ) -> Result<Option<Snapshot>, DomainError> {
        let row = sqlx::query(&format!(
            "SELECT version, state, created_at FROM {} \
             WHERE aggregate_type = $1 AND aggregate_id = $2",
            self.table
        ))
        .bind(aggregate_type)
        .bind(aggregate_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(database_error)?;

        let Some(row) = row else {
            return Ok(None);
        };
        let decode = |e: sqlx::Error| DomainError::Serialization(e.to_string());
        let state: sqlx::types::Json<serde_json::Value> = row.try_get("state").map_err(decode)?;
        Ok(Some(Snapshot {
            aggregate_type: aggregate_type.to_owned(),
            aggregate_id: aggregate_id.to_owned(),
            version: row.try_get("version").map_err(decode)?,
            state: state.0,
            created_at: row.try_get("created_at").map_err(decode)?,
        }))
    }

    #[tracing::instrument(skip(self, snapshot), fields(aggregate_type = %snapshot.aggregate_type, version = snapshot.version))]
    async fn save(&self, snapshot: Snapshot) -> Result<(), DomainError> {
        sqlx::query(&format!(
            "INSERT INTO {} (aggregate_type, aggregate_id, version, state, created_at) \
             VALUES ($1, $2, $3, $4, $5) \
             ON CONFLICT (aggregate_type, aggregate_id) DO UPDATE \
             SET version = EXCLUDED.version, state = EXCLUDED.state, created_at = EXCLUDED.created_at \
             WHERE {}.version <= EXCLUDED.version",
            self.table, self.table
        ))
        .bind(&snapshot.aggregate_type)
        .bind(&snapshot.aggregate_id)
        .bind(snapshot.version)
        .bind(sqlx::types::Json(&snapshot.state))
        .bind(snapshot.created_at)
        .execute(&self.pool)
        .await
        .map_err(database_error)?;
        Ok(())
    }
}
