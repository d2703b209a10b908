//! Chronicle Core: event-sourcing domain abstractions.
//!
//! Events, streams, metadata matching, stream naming and the store seams the
//! persistence strategies, repository and projection engine build on. It
//! contains no infrastructure code.

pub mod checkpoint;
pub mod clock;
pub mod config;
pub mod converter;
pub mod error;
pub mod event;
pub mod handler;
pub mod mapper;
pub mod matcher;
pub mod naming;
pub mod repository;
pub mod snapshot;
pub mod store;
pub mod stream;
