//! Payload serialization boundary.
//!
//! The store hands payloads to a [`PayloadConverter`] on the way in and,
//! when asked to deserialize, on the way out. The default converter passes
//! JSON through untouched; hosts plug in upcasters or schema validation here.

use serde_json::Value;

use crate::error::DomainError;

/// Converts event payloads between their in-process and stored forms.
pub trait PayloadConverter: Send + Sync + std::fmt::Debug {
    /// Converts an in-process payload of `event_type` into its stored form.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Serialization` if the payload cannot be encoded.
    fn serialize(&self, event_type: &str, payload: Value) -> Result<Value, DomainError>;

    /// Converts a stored payload into the in-process form of `event_type`.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Serialization` if the payload cannot be decoded.
    fn deserialize(&self, event_type: &str, payload: Value) -> Result<Value, DomainError>;
}

/// Converter that leaves payloads unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonPassthrough;

impl PayloadConverter for JsonPassthrough {
    fn serialize(&self, _event_type: &str, payload: Value) -> Result<Value, DomainError> {
        Ok(payload)
    }

    fn deserialize(&self, _event_type: &str, payload: Value) -> Result<Value, DomainError> {
        Ok(payload)
    }
}
