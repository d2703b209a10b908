//! `PostgreSQL` implementation of the `EventStore` trait.
//!
//! Events of all streams share one table; a registry table holds one row per
//! stream with its free-form metadata. Positions are assigned inside the
//! appending transaction as `head + 1..`, and the `(stream_id, position)`
//! and aggregate-version unique indexes turn racing writers into
//! `ConcurrencyConflict`. With the write-lock strategy enabled, appends to
//! one stream are additionally serialized by a transaction-scoped advisory
//! lock.

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, QueryBuilder, Row, Transaction};

use chronicle_core::config::EventSourcingConfig;
use chronicle_core::error::DomainError;
use chronicle_core::event::{Event, Metadata, RecordedEvent};
use chronicle_core::matcher::MetadataMatcher;
use chronicle_core::store::{EventStore, NameFilter, ReadDirection, ReadQuery};
use chronicle_core::stream::StreamName;

use crate::error::{append_error, create_error, database_error};
use crate::filter::{push_matcher, push_name_filter};
use crate::schema;

/// Fixed-width internal identifier of a stream name.
#[must_use]
pub fn stream_id(stream: &StreamName) -> String {
    Sha256::digest(stream.as_str().as_bytes())
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}

fn to_limit(n: usize) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}

/// PostgreSQL-backed event store.
#[derive(Debug, Clone)]
pub struct PgEventStore {
    pool: PgPool,
    events_table: String,
    streams_table: String,
    write_lock_strategy: bool,
}

impl PgEventStore {
    /// Creates a new `PgEventStore` using the tables named in `config`.
    #[must_use]
    pub fn new(pool: PgPool, config: &EventSourcingConfig) -> Self {
        Self {
            pool,
            events_table: config.events_table().to_owned(),
            streams_table: config.streams_table().to_owned(),
            write_lock_strategy: config.write_lock_strategy(),
        }
    }

    /// Creates a store from `config`, creating the full schema first when
    /// `config.initialize_on_start()` is set.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Infrastructure` if the DDL fails.
    pub async fn from_config(pool: PgPool, config: &EventSourcingConfig) -> Result<Self, DomainError> {
        if config.initialize_on_start() {
            schema::initialize(&pool, config).await?;
        }
        Ok(Self::new(pool, config))
    }

    /// Creates the events and registry tables (idempotent).
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Infrastructure` if the DDL fails.
    pub async fn initialize(&self) -> Result<(), DomainError> {
        let statements = [
            schema::create_streams_table(&self.streams_table),
            schema::create_events_table(&self.events_table),
        ]
        .concat();
        schema::execute_all(&self.pool, statements).await
    }

    async fn lock_stream(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        stream: &StreamName,
    ) -> Result<(), DomainError> {
        if self.write_lock_strategy {
            sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
                .bind(stream.as_str())
                .execute(&mut **tx)
                .await
                .map_err(database_error)?;
        }
        Ok(())
    }

    async fn insert_events(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        stream: &StreamName,
        head: i64,
        events: Vec<Event>,
    ) -> Result<(), DomainError> {
        if events.is_empty() {
            return Ok(());
        }
        let id = stream_id(stream);
        let category = stream.category().map(str::to_owned);

        let mut qb = QueryBuilder::<Postgres>::new(format!(
            "INSERT INTO {} (stream_id, real_stream_name, category, position, event_id, \
             event_name, payload, metadata, created_at) ",
            self.events_table
        ));
        qb.push_values(
            events.into_iter().zip(head + 1..),
            |mut b, (event, position)| {
                b.push_bind(id.clone());
                b.push_bind(stream.as_str().to_owned());
                b.push_bind(category.clone());
                b.push_bind(position);
                b.push_bind(event.event_id);
                b.push_bind(event.event_type);
                b.push_bind(sqlx::types::Json(event.payload));
                b.push_bind(sqlx::types::Json(event.metadata));
                b.push_bind(event.created_at);
            },
        );
        qb.build()
            .execute(&mut **tx)
            .await
            .map_err(|e| append_error(stream.as_str(), e))?;
        Ok(())
    }

    fn decode_row(stream: &StreamName, row: &PgRow) -> Result<RecordedEvent, sqlx::Error> {
        let payload: sqlx::types::Json<serde_json::Value> = row.try_get("payload")?;
        let metadata: sqlx::types::Json<Metadata> = row.try_get("metadata")?;
        Ok(RecordedEvent {
            stream: stream.clone(),
            position: row.try_get("position")?,
            global_position: row.try_get("no")?,
            event: Event {
                event_id: row.try_get("event_id")?,
                event_type: row.try_get("event_name")?,
                payload: payload.0,
                metadata: metadata.0,
                created_at: row.try_get("created_at")?,
            },
        })
    }
}

#[async_trait]
impl EventStore for PgEventStore {
    #[tracing::instrument(skip(self, events, metadata), fields(stream = %stream, event_count = events.len()))]
    async fn create(
        &self,
        stream: &StreamName,
        events: Vec<Event>,
        metadata: Metadata,
    ) -> Result<(), DomainError> {
        let mut tx = self.pool.begin().await.map_err(database_error)?;
        self.lock_stream(&mut tx, stream).await?;

        sqlx::query(&format!(
            "INSERT INTO {} (stream_name, stream_id, category, metadata) VALUES ($1, $2, $3, $4)",
            self.streams_table
        ))
        .bind(stream.as_str())
        .bind(stream_id(stream))
        .bind(stream.category())
        .bind(sqlx::types::Json(metadata))
        .execute(&mut *tx)
        .await
        .map_err(|e| create_error(stream.as_str(), e))?;

        self.insert_events(&mut tx, stream, 0, events).await?;
        tx.commit().await.map_err(database_error)?;
        tracing::info!("stream created");
        Ok(())
    }

    #[tracing::instrument(skip(self, events), fields(stream = %stream, event_count = events.len()))]
    async fn append_to(&self, stream: &StreamName, events: Vec<Event>) -> Result<(), DomainError> {
        let mut tx = self.pool.begin().await.map_err(database_error)?;
        self.lock_stream(&mut tx, stream).await?;

        let exists: Option<i32> = sqlx::query_scalar(&format!(
            "SELECT 1 FROM {} WHERE stream_name = $1",
            self.streams_table
        ))
        .bind(stream.as_str())
        .fetch_optional(&mut *tx)
        .await
        .map_err(database_error)?;
        if exists.is_none() {
            return Err(DomainError::StreamNotFound(stream.to_string()));
        }

        let head: i64 = sqlx::query_scalar(&format!(
            "SELECT COALESCE(MAX(position), 0) FROM {} WHERE stream_id = $1",
            self.events_table
        ))
        .bind(stream_id(stream))
        .fetch_one(&mut *tx)
        .await
        .map_err(database_error)?;

        self.insert_events(&mut tx, stream, head, events).await?;
        tx.commit()
            .await
            .map_err(|e| append_error(stream.as_str(), e))?;
        tracing::debug!(head, "events appended");
        Ok(())
    }

    async fn read(
        &self,
        stream: &StreamName,
        query: &ReadQuery,
    ) -> Result<Vec<RecordedEvent>, DomainError> {
        let mut qb = QueryBuilder::<Postgres>::new(format!(
            "SELECT no, position, event_id, event_name, payload, metadata, created_at FROM {} \
             WHERE stream_id = ",
            self.events_table
        ));
        qb.push_bind(stream_id(stream));
        let (comparison, order) = match query.direction {
            ReadDirection::Forward => (" AND position >= ", " ORDER BY position ASC"),
            ReadDirection::Backward => (" AND position <= ", " ORDER BY position DESC"),
        };
        if let Some(from) = query.from {
            qb.push(comparison).push_bind(from);
        }
        if let Some(matcher) = &query.matcher {
            push_matcher(&mut qb, matcher, "metadata", true);
        }
        qb.push(order).push(" LIMIT ").push_bind(to_limit(query.count));

        let rows = qb
            .build()
            .fetch_all(&self.pool)
            .await
            .map_err(database_error)?;
        if rows.is_empty() && !self.has_stream(stream).await? {
            return Err(DomainError::StreamNotFound(stream.to_string()));
        }

        rows.iter()
            .map(|row| Self::decode_row(stream, row))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| DomainError::Serialization(e.to_string()))
    }

    async fn has_stream(&self, stream: &StreamName) -> Result<bool, DomainError> {
        sqlx::query_scalar(&format!(
            "SELECT EXISTS (SELECT 1 FROM {} WHERE stream_name = $1)",
            self.streams_table
        ))
        .bind(stream.as_str())
        .fetch_one(&self.pool)
        .await
        .map_err(database_error)
    }

    #[tracing::instrument(skip(self), fields(stream = %stream))]
    async fn delete(&self, stream: &StreamName) -> Result<(), DomainError> {
        let mut tx = self.pool.begin().await.map_err(database_error)?;
        self.lock_stream(&mut tx, stream).await?;

        let removed = sqlx::query(&format!(
            "DELETE FROM {} WHERE stream_name = $1",
            self.streams_table
        ))
        .bind(stream.as_str())
        .execute(&mut *tx)
        .await
        .map_err(database_error)?
        .rows_affected();
        if removed == 0 {
            return Err(DomainError::StreamNotFound(stream.to_string()));
        }

        sqlx::query(&format!("DELETE FROM {} WHERE stream_id = $1", self.events_table))
            .bind(stream_id(stream))
            .execute(&mut *tx)
            .await
            .map_err(database_error)?;
        tx.commit().await.map_err(database_error)?;
        tracing::info!("stream deleted");
        Ok(())
    }

    async fn update_stream_metadata(
        &self,
        stream: &StreamName,
        metadata: Metadata,
    ) -> Result<(), DomainError> {
        let updated = sqlx::query(&format!(
            "UPDATE {} SET metadata = $2 WHERE stream_name = $1",
            self.streams_table
        ))
        .bind(stream.as_str())
        .bind(sqlx::types::Json(metadata))
        .execute(&self.pool)
        .await
        .map_err(database_error)?
        .rows_affected();
        if updated == 0 {
            return Err(DomainError::StreamNotFound(stream.to_string()));
        }
        Ok(())
    }

    async fn fetch_stream_metadata(&self, stream: &StreamName) -> Result<Metadata, DomainError> {
        let metadata: Option<sqlx::types::Json<Metadata>> = sqlx::query_scalar(&format!(
            "SELECT metadata FROM {} WHERE stream_name = $1",
            self.streams_table
        ))
        .bind(stream.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(database_error)?;
        metadata
            .map(|m| m.0)
            .ok_or_else(|| DomainError::StreamNotFound(stream.to_string()))
    }

    async fn fetch_stream_names(
        &self,
        filter: Option<&NameFilter>,
        matcher: Option<&MetadataMatcher>,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<StreamName>, DomainError> {
        let mut qb = QueryBuilder::<Postgres>::new(format!(
            "SELECT stream_name FROM {} WHERE TRUE",
            self.streams_table
        ));
        if let Some(filter) = filter {
            push_name_filter(&mut qb, filter, "stream_name");
        }
        if let Some(matcher) = matcher {
            push_matcher(&mut qb, matcher, "metadata", false);
        }
        qb.push(" ORDER BY stream_name COLLATE \"C\" LIMIT ")
            .push_bind(to_limit(limit))
            .push(" OFFSET ")
            .push_bind(to_limit(offset));

        let names: Vec<String> = qb
            .build_query_scalar()
            .fetch_all(&self.pool)
            .await
            .map_err(database_error)?;
        Ok(names.into_iter().map(StreamName::from).collect())
    }

    async fn fetch_category_names(
        &self,
        filter: Option<&NameFilter>,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<String>, DomainError> {
        let mut qb = QueryBuilder::<Postgres>::new(format!(
            "SELECT DISTINCT category COLLATE \"C\" AS category FROM {} WHERE category IS NOT NULL",
            self.streams_table
        ));
        if let Some(filter) = filter {
            push_name_filter(&mut qb, filter, "category");
        }
        qb.push(" ORDER BY category LIMIT ")
            .push_bind(to_limit(limit))
            .push(" OFFSET ")
            .push_bind(to_limit(offset));

        qb.build_query_scalar()
            .fetch_all(&self.pool)
            .await
            .map_err(database_error)
    }
}
