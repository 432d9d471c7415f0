pub mod agent;
pub mod library;
pub mod reservations;

use serde::de::DeserializeOwned;
use serde_json::Value;

use mf_core::DomainError;

/// Deserialize a request body into a typed input, mapping shape errors
/// onto the validation taxonomy.
pub(crate) fn parse<T: DeserializeOwned>(body: &Value) -> Result<T, DomainError> {
    serde_json::from_value(body.clone())
        .map_err(|e| DomainError::invalid("BODY_INVALID", format!("invalid request body: {e}")))
}

/// Serialize a handler result into envelope data.
pub(crate) fn to_value<T: serde::Serialize>(value: T) -> Result<Value, DomainError> {
    serde_json::to_value(value)
        .map_err(|e| DomainError::internal(format!("response encode failed: {e}")))
}
