//! Shared error taxonomy.
//!
//! Domain code raises [`DomainError`] values carrying a `_SNAKE_CASE`
//! reason identifier; the gateway maps each variant onto the transport
//! taxonomy ([`ErrorCode`] + HTTP status) when shaping the response
//! envelope.

use serde_json::Value;
use std::fmt;
use thiserror::Error;

// ---------------------------------------------------------------------------
// ErrorCode
// ---------------------------------------------------------------------------

/// Machine-readable top-level error codes exposed on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    InvalidArgument,
    Unauthenticated,
    Forbidden,
    NotFound,
    MethodNotAllowed,
    Conflict,
    Gone,
    FailedPrecondition,
    RateLimited,
    Internal,
    Unavailable,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::InvalidArgument => "INVALID_ARGUMENT",
            ErrorCode::Unauthenticated => "UNAUTHENTICATED",
            ErrorCode::Forbidden => "FORBIDDEN",
            ErrorCode::NotFound => "NOT_FOUND",
            ErrorCode::MethodNotAllowed => "METHOD_NOT_ALLOWED",
            ErrorCode::Conflict => "CONFLICT",
            ErrorCode::Gone => "GONE",
            ErrorCode::FailedPrecondition => "FAILED_PRECONDITION",
            ErrorCode::RateLimited => "RATE_LIMITED",
            ErrorCode::Internal => "INTERNAL",
            ErrorCode::Unavailable => "UNAVAILABLE",
        }
    }

    pub fn http_status(&self) -> u16 {
        match self {
            ErrorCode::InvalidArgument => 400,
            ErrorCode::Unauthenticated => 401,
            ErrorCode::Forbidden => 403,
            ErrorCode::NotFound => 404,
            ErrorCode::MethodNotAllowed => 405,
            ErrorCode::Conflict => 409,
            ErrorCode::Gone => 410,
            ErrorCode::FailedPrecondition => 412,
            ErrorCode::RateLimited => 429,
            ErrorCode::Internal => 500,
            ErrorCode::Unavailable => 503,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// DomainError
// ---------------------------------------------------------------------------

/// Typed domain failure.
///
/// `reason` fields are stable `_SNAKE_CASE` identifiers such as
/// `STATION_CAPACITY_EXCEEDED` or `IDEMPOTENCY_KEY_CONFLICT`; the
/// human-readable `message` is free text for operators and clients.
#[derive(Debug, Error)]
pub enum DomainError {
    #[error("{reason}: {message}")]
    Invalid {
        reason: String,
        message: String,
        details: Option<Value>,
    },

    #[error("{message}")]
    Unauthenticated { message: String },

    #[error("{reason}: {message}")]
    Forbidden {
        reason: String,
        message: String,
        details: Option<Value>,
    },

    #[error("{message}")]
    NotFound { message: String },

    #[error("{reason}: {message}")]
    Conflict {
        reason: String,
        message: String,
        details: Option<Value>,
    },

    #[error("{reason}: {message}")]
    Gone { reason: String, message: String },

    /// `http_status` is 412 for ordinary preconditions and 428 for the
    /// terms-of-service gate.
    #[error("{reason}: {message}")]
    Precondition {
        reason: String,
        message: String,
        http_status: u16,
    },

    #[error("rate limited, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    #[error("{message}")]
    Internal { message: String },

    #[error("{message}")]
    Unavailable { message: String },
}

impl DomainError {
    pub fn invalid(reason: impl Into<String>, message: impl Into<String>) -> Self {
        DomainError::Invalid {
            reason: reason.into(),
            message: message.into(),
            details: None,
        }
    }

    pub fn invalid_with(
        reason: impl Into<String>,
        message: impl Into<String>,
        details: Value,
    ) -> Self {
        DomainError::Invalid {
            reason: reason.into(),
            message: message.into(),
            details: Some(details),
        }
    }

    pub fn unauthenticated(message: impl Into<String>) -> Self {
        DomainError::Unauthenticated {
            message: message.into(),
        }
    }

    pub fn forbidden(reason: impl Into<String>, message: impl Into<String>) -> Self {
        DomainError::Forbidden {
            reason: reason.into(),
            message: message.into(),
            details: None,
        }
    }

    pub fn forbidden_with(
        reason: impl Into<String>,
        message: impl Into<String>,
        details: Value,
    ) -> Self {
        DomainError::Forbidden {
            reason: reason.into(),
            message: message.into(),
            details: Some(details),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        DomainError::NotFound {
            message: message.into(),
        }
    }

    pub fn conflict(reason: impl Into<String>, message: impl Into<String>) -> Self {
        DomainError::Conflict {
            reason: reason.into(),
            message: message.into(),
            details: None,
        }
    }

    pub fn conflict_with(
        reason: impl Into<String>,
        message: impl Into<String>,
        details: Value,
    ) -> Self {
        DomainError::Conflict {
            reason: reason.into(),
            message: message.into(),
            details: Some(details),
        }
    }

    pub fn gone(reason: impl Into<String>, message: impl Into<String>) -> Self {
        DomainError::Gone {
            reason: reason.into(),
            message: message.into(),
        }
    }

    pub fn precondition(reason: impl Into<String>, message: impl Into<String>) -> Self {
        DomainError::Precondition {
            reason: reason.into(),
            message: message.into(),
            http_status: 412,
        }
    }

    pub fn terms_required(message: impl Into<String>) -> Self {
        DomainError::Precondition {
            reason: "TERMS_ACCEPTANCE_REQUIRED".to_string(),
            message: message.into(),
            http_status: 428,
        }
    }

    pub fn rate_limited(retry_after_ms: u64) -> Self {
        DomainError::RateLimited { retry_after_ms }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        DomainError::Internal {
            message: message.into(),
        }
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        DomainError::Unavailable {
            message: message.into(),
        }
    }

    /// Top-level taxonomy code for this error.
    pub fn code(&self) -> ErrorCode {
        match self {
            DomainError::Invalid { .. } => ErrorCode::InvalidArgument,
            DomainError::Unauthenticated { .. } => ErrorCode::Unauthenticated,
            DomainError::Forbidden { .. } => ErrorCode::Forbidden,
            DomainError::NotFound { .. } => ErrorCode::NotFound,
            DomainError::Conflict { .. } => ErrorCode::Conflict,
            DomainError::Gone { .. } => ErrorCode::Gone,
            DomainError::Precondition { .. } => ErrorCode::FailedPrecondition,
            DomainError::RateLimited { .. } => ErrorCode::RateLimited,
            DomainError::Internal { .. } => ErrorCode::Internal,
            DomainError::Unavailable { .. } => ErrorCode::Unavailable,
        }
    }

    pub fn http_status(&self) -> u16 {
        match self {
            DomainError::Precondition { http_status, .. } => *http_status,
            other => other.code().http_status(),
        }
    }

    /// Stable `_SNAKE_CASE` reason identifier, when one applies.
    pub fn reason(&self) -> Option<&str> {
        match self {
            DomainError::Invalid { reason, .. }
            | DomainError::Forbidden { reason, .. }
            | DomainError::Conflict { reason, .. }
            | DomainError::Gone { reason, .. }
            | DomainError::Precondition { reason, .. } => Some(reason),
            _ => None,
        }
    }

    /// Structured recovery context for the response envelope: the reason
    /// identifier merged with any variant-specific details.
    pub fn detail_value(&self) -> Option<Value> {
        let mut map = serde_json::Map::new();
        if let Some(reason) = self.reason() {
            map.insert("reason".to_string(), Value::String(reason.to_string()));
        }
        match self {
            DomainError::Invalid {
                details: Some(d), ..
            }
            | DomainError::Forbidden {
                details: Some(d), ..
            }
            | DomainError::Conflict {
                details: Some(d), ..
            } => {
                if let Value::Object(extra) = d {
                    for (k, v) in extra {
                        map.insert(k.clone(), v.clone());
                    }
                }
            }
            DomainError::RateLimited { retry_after_ms } => {
                map.insert(
                    "retryAfterMs".to_string(),
                    Value::Number((*retry_after_ms).into()),
                );
            }
            _ => {}
        }
        if map.is_empty() {
            None
        } else {
            Some(Value::Object(map))
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn code_to_status_mapping() {
        assert_eq!(ErrorCode::InvalidArgument.http_status(), 400);
        assert_eq!(ErrorCode::Conflict.http_status(), 409);
        assert_eq!(ErrorCode::FailedPrecondition.http_status(), 412);
        assert_eq!(ErrorCode::RateLimited.http_status(), 429);
    }

    #[test]
    fn terms_required_uses_428() {
        let err = DomainError::terms_required("accept the current terms first");
        assert_eq!(err.http_status(), 428);
        assert_eq!(err.code(), ErrorCode::FailedPrecondition);
    }

    #[test]
    fn conflict_detail_includes_reason_and_context() {
        let err = DomainError::conflict_with(
            "IDEMPOTENCY_KEY_CONFLICT",
            "key was used with a different payload",
            serde_json::json!({"duplicateItemId": "item-1"}),
        );
        let details = err.detail_value().expect("details");
        assert_eq!(details["reason"], "IDEMPOTENCY_KEY_CONFLICT");
        assert_eq!(details["duplicateItemId"], "item-1");
    }

    #[test]
    fn rate_limited_detail_carries_retry_ms() {
        let err = DomainError::rate_limited(1500);
        let details = err.detail_value().expect("details");
        assert_eq!(details["retryAfterMs"], 1500);
    }
}
