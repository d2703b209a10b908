//! Chronicle Projection: read models built from the event log.
//!
//! A projection is configured once ([`config`]), driven by a
//! [`ProjectionExecutor`] either from an [`EventDrivenChannel`] or a
//! [`PollingScheduler`], and administered through the [`ProjectionManager`].

pub mod channel;
pub mod config;
pub mod emitter;
pub mod executor;
pub mod manager;
pub mod scheduler;

pub use channel::{EventDrivenChannel, HandlerRegistry};
pub use config::{
    ProjectionLifeCycle, ProjectionOptions, ProjectionRunningConfiguration,
    ProjectionSetupConfiguration, RunningMode,
};
pub use emitter::EventStreamEmitter;
pub use executor::{ExecutionOutcome, ProjectionExecutor};
pub use manager::ProjectionManager;
pub use scheduler::PollingScheduler;
