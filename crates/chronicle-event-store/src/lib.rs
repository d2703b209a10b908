//! Chronicle Event Store: persistence strategies.
//!
//! `PostgreSQL` stores built on `sqlx` for production, in-memory stores for
//! tests and embedded use.

mod error;
mod filter;
pub mod memory;
pub mod pg_event_store;
pub mod pg_projection_store;
pub mod pg_snapshot_store;
pub mod schema;

pub use memory::{InMemoryEventStore, InMemoryProjectionStore, InMemorySnapshotStore};
pub use pg_event_store::PgEventStore;
pub use pg_projection_store::PgProjectionStore;
pub use pg_snapshot_store::PgSnapshotStore;
