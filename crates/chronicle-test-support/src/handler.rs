//! Recording and failing `EventHandler` implementations for tests.

use std::sync::Mutex;

use async_trait::async_trait;
use chronicle_core::error::HandlerError;
use chronicle_core::event::Metadata;
use chronicle_core::handler::EventHandler;
use serde_json::Value;

/// One recorded handler invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct Invocation {
    /// Payload handed to the handler.
    pub payload: Value,
    /// Metadata handed to the handler.
    pub metadata: Metadata,
}

impl Invocation {
    /// The metadata entry under `key`, or `Null` when absent.
    #[must_use]
    pub fn meta(&self, key: &str) -> Value {
        self.metadata.get(key).cloned().unwrap_or(Value::Null)
    }
}

type Reply = Box<dyn Fn(&Value, &Metadata, usize) -> Value + Send + Sync>;

/// A handler that records every invocation and answers with a configurable
/// reply (`Null` by default).
pub struct RecordingHandler {
    invocations: Mutex<Vec<Invocation>>,
    reply: Reply,
}

impl std::fmt::Debug for RecordingHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordingHandler")
            .field("invocations", &self.invocations)
            .finish_non_exhaustive()
    }
}

impl Default for RecordingHandler {
    fn default() -> Self {
        Self::replying(|_, _, _| Value::Null)
    }
}

impl RecordingHandler {
    /// A recording handler that returns `Null`.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A recording handler whose result is computed from the payload, the
    /// metadata and the 1-based invocation number.
    #[must_use]
    pub fn replying(
        reply: impl Fn(&Value, &Metadata, usize) -> Value + Send + Sync + 'static,
    ) -> Self {
        Self {
            invocations: Mutex::new(Vec::new()),
            reply: Box::new(reply),
        }
    }

    /// Returns a snapshot of all invocations so far.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn invocations(&self) -> Vec<Invocation> {
        self.invocations.lock().unwrap().clone()
    }

    /// Number of invocations so far.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn count(&self) -> usize {
        self.invocations.lock().unwrap().len()
    }
}

#[async_trait]
impl EventHandler for RecordingHandler {
    async fn handle(&self, payload: Value, metadata: &Metadata) -> Result<Value, HandlerError> {
        let mut invocations = self.invocations.lock().unwrap();
        invocations.push(Invocation {
            payload: payload.clone(),
            metadata: metadata.clone(),
        });
        Ok((self.reply)(&payload, metadata, invocations.len()))
    }
}

/// A handler that fails on its `fail_on`-th invocation (1-based) and every
/// one after, succeeding with `Null` before that.
#[derive(Debug)]
pub struct FailingHandler {
    fail_on: usize,
    calls: Mutex<usize>,
}

impl FailingHandler {
    /// Fails on every invocation.
    #[must_use]
    pub fn always() -> Self {
        Self::on_call(1)
    }

    /// Fails from the `fail_on`-th invocation on.
    #[must_use]
    pub fn on_call(fail_on: usize) -> Self {
        Self {
            fail_on,
            calls: Mutex::new(0),
        }
    }

    /// Number of invocations so far, failed ones included.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn calls(&self) -> usize {
        *self.calls.lock().unwrap()
    }
}

#[async_trait]
impl EventHandler for FailingHandler {
    async fn handle(&self, _payload: Value, _metadata: &Metadata) -> Result<Value, HandlerError> {
        let mut calls = self.calls.lock().unwrap();
        *calls += 1;
        if *calls >= self.fail_on {
            Err(format!("read model unavailable (call {})", *calls).into())
        } else {
            Ok(Value::Null)
        }
    }
}
