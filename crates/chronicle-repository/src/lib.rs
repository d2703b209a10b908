//! Chronicle Repository: event-sourced aggregate persistence.
//!
//! [`EventSourcingRepository`] computes an aggregate's stream, replays its
//! history (optionally from a snapshot) and appends version-stamped events.
//! [`RepositoryRegistry`] routes aggregate types between several
//! repositories.

pub mod registry;
pub mod repository;

pub use registry::RepositoryRegistry;
pub use repository::EventSourcingRepository;
