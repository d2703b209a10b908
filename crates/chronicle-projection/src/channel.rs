//! Handler channels: the in-process registry and the event-driven
//! interceptor.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chronicle_core::error::DomainError;
use chronicle_core::event::Metadata;
use chronicle_core::handler::{EventHandler, HandlerChannel, HandlerRef};
use serde_json::Value;

use crate::executor::ProjectionExecutor;

/// Handler result of the previous event when the projection keeps state.
pub const PROJECTION_STATE: &str = "projection.state";
/// Name of the projection dispatching the event.
pub const PROJECTION_NAME: &str = "projection.name";
/// Set while the projection rebuilds after a reset.
pub const PROJECTION_IS_RESETTING: &str = "projection.is_resetting";
/// Marks a dispatch synthesized by a catch-up pass.
pub const PROJECTION_IS_POLLING: &str = "projection.is_polling";

/// Resolves targets to in-process [`EventHandler`]s.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<HandlerRef, Arc<dyn EventHandler>>,
}

impl fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut targets: Vec<&str> = self.handlers.keys().map(HandlerRef::as_str).collect();
        targets.sort_unstable();
        f.debug_struct("HandlerRegistry")
            .field("targets", &targets)
            .finish()
    }
}

impl HandlerRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` under `target`.
    ///
    /// # Errors
    ///
    /// `Configuration` if `target` is already registered.
    pub fn with_handler(
        mut self,
        target: impl Into<HandlerRef>,
        handler: Arc<dyn EventHandler>,
    ) -> Result<Self, DomainError> {
        let target = target.into();
        if self.handlers.contains_key(&target) {
            return Err(DomainError::Configuration(format!(
                "handler {target} is registered twice"
            )));
        }
        self.handlers.insert(target, handler);
        Ok(self)
    }

    #[must_use]
    pub fn contains(&self, target: &HandlerRef) -> bool {
        self.handlers.contains_key(target)
    }
}

#[async_trait]
impl HandlerChannel for HandlerRegistry {
    async fn dispatch(
        &self,
        target: &HandlerRef,
        payload: Value,
        metadata: Metadata,
    ) -> Result<Value, DomainError> {
        let handler = self.handlers.get(target).ok_or_else(|| {
            DomainError::Configuration(format!("no handler registered for {target}"))
        })?;
        handler
            .handle(payload, &metadata)
            .await
            .map_err(|source| DomainError::HandlerFailed {
                target: target.to_string(),
                source,
            })
    }
}

/// Whether `metadata` carries the catch-up marker.
#[must_use]
pub fn is_catch_up_dispatch(metadata: &Metadata) -> bool {
    metadata
        .get(PROJECTION_IS_POLLING)
        .and_then(Value::as_bool)
        .unwrap_or(false)
}

/// Intercepts messages addressed to projection handlers.
///
/// A message carrying the catch-up marker passes through to the inner
/// channel. Any other message for a projection handler is swallowed: an
/// event-driven projection runs a catch-up pass instead, which re-delivers
/// the event from the log, and a polling projection leaves it to its next
/// scheduled run. Targets owned by no projection pass through untouched.
pub struct EventDrivenChannel {
    inner: Arc<dyn HandlerChannel>,
    projections: Vec<Arc<ProjectionExecutor>>,
}

impl fmt::Debug for EventDrivenChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.projections.iter().map(|p| p.name()).collect();
        f.debug_struct("EventDrivenChannel")
            .field("projections", &names)
            .finish_non_exhaustive()
    }
}

impl EventDrivenChannel {
    #[must_use]
    pub fn new(inner: Arc<dyn HandlerChannel>) -> Self {
        Self {
            inner,
            projections: Vec::new(),
        }
    }

    /// Intercepts the handlers of `projection`.
    #[must_use]
    pub fn with_projection(mut self, projection: Arc<ProjectionExecutor>) -> Self {
        self.projections.push(projection);
        self
    }
}

#[async_trait]
impl HandlerChannel for EventDrivenChannel {
    async fn dispatch(
        &self,
        target: &HandlerRef,
        payload: Value,
        metadata: Metadata,
    ) -> Result<Value, DomainError> {
        if is_catch_up_dispatch(&metadata) {
            return self.inner.dispatch(target, payload, metadata).await;
        }

        let owners: Vec<Arc<ProjectionExecutor>> = self
            .projections
            .iter()
            .filter(|p| p.setup().routes_to(target))
            .cloned()
            .collect();
        if owners.is_empty() {
            return self.inner.dispatch(target, payload, metadata).await;
        }

        for projection in &owners {
            if projection.running().is_event_driven() {
                tracing::debug!(projection = projection.name(), %target, "direct delivery triggers catch-up");
                projection.execute(self.inner.as_ref()).await?;
            }
        }
        Ok(Value::Null)
    }
}
