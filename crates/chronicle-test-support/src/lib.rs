//! Shared test mocks and utilities for the Chronicle event-sourcing engine.

mod clock;
mod handler;
mod store;

pub use clock::{FixedClock, ManualClock};
pub use handler::{FailingHandler, Invocation, RecordingHandler};
pub use store::{FailingEventStore, FailingProjectionStore};
