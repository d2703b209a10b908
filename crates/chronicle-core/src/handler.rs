//! Handler invocation boundary.
//!
//! Projections never call read-model code directly: every event and every
//! lifecycle hook is dispatched by name through a [`HandlerChannel`]
//! supplied by the host.

use std::fmt;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::{DomainError, HandlerError};
use crate::event::Metadata;

/// Reference to an invocable target, resolved by a [`HandlerChannel`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandlerRef(String);

impl HandlerRef {
    /// Wraps a target name.
    #[must_use]
    pub fn new(target: impl Into<String>) -> Self {
        Self(target.into())
    }

    /// The target name.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for HandlerRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for HandlerRef {
    fn from(target: &str) -> Self {
        Self::new(target)
    }
}

impl From<String> for HandlerRef {
    fn from(target: String) -> Self {
        Self(target)
    }
}

/// Routes a payload and its metadata to a named handler and returns the
/// handler's result.
#[async_trait]
pub trait HandlerChannel: Send + Sync {
    /// Invokes `target`.
    ///
    /// # Errors
    ///
    /// `Configuration` if `target` is unknown; `HandlerFailed` carrying the
    /// handler's own error otherwise.
    async fn dispatch(
        &self,
        target: &HandlerRef,
        payload: Value,
        metadata: Metadata,
    ) -> Result<Value, DomainError>;
}

/// A single read-model or side-effect handler.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Handles one message. The returned value becomes the next
    /// `projection.state` when the projection keeps state.
    ///
    /// # Errors
    ///
    /// Any error aborts the current projection batch.
    async fn handle(&self, payload: Value, metadata: &Metadata) -> Result<Value, HandlerError>;
}
