//! Uniform response envelope.
//!
//! Success: `{ok: true, requestId, data}`. Error: `{ok: false,
//! requestId, code, message, details|null}`. Every response carries
//! `x-request-id`; rate-limit errors add `Retry-After`.

use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::{json, Value};

use mf_core::DomainError;

pub fn ok_envelope(request_id: &str, data: Value) -> Response {
    let body = json!({
        "ok": true,
        "requestId": request_id,
        "data": data,
    });
    with_request_id(request_id, (StatusCode::OK, Json(body)).into_response())
}

pub fn err_envelope(request_id: &str, err: &DomainError) -> Response {
    let status =
        StatusCode::from_u16(err.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let body = json!({
        "ok": false,
        "requestId": request_id,
        "code": err.code().as_str(),
        "message": err.to_string(),
        "details": err.detail_value(),
    });
    let mut response = (status, Json(body)).into_response();
    if let DomainError::RateLimited { retry_after_ms } = err {
        let secs = (retry_after_ms / 1000).max(1);
        if let Ok(value) = HeaderValue::from_str(&secs.to_string()) {
            response.headers_mut().insert("Retry-After", value);
        }
    }
    with_request_id(request_id, response)
}

fn with_request_id(request_id: &str, mut response: Response) -> Response {
    if let Ok(value) = HeaderValue::from_str(request_id) {
        response.headers_mut().insert("x-request-id", value);
    }
    response
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    async fn body_json(response: Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn ok_envelope_shape() {
        let response = ok_envelope("req_1", json!({"x": 1}));
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers().get("x-request-id").unwrap(), "req_1");
        let body = body_json(response).await;
        assert_eq!(body["ok"], true);
        assert_eq!(body["requestId"], "req_1");
        assert_eq!(body["data"]["x"], 1);
    }

    #[tokio::test]
    async fn error_envelope_shape() {
        let err = DomainError::conflict("STATION_CAPACITY_EXCEEDED", "Station is at capacity");
        let response = err_envelope("req_2", &err);
        assert_eq!(response.status(), StatusCode::CONFLICT);
        let body = body_json(response).await;
        assert_eq!(body["ok"], false);
        assert_eq!(body["code"], "CONFLICT");
        assert_eq!(body["details"]["reason"], "STATION_CAPACITY_EXCEEDED");
    }

    #[tokio::test]
    async fn rate_limit_gets_retry_after() {
        let err = DomainError::rate_limited(2500);
        let response = err_envelope("req_3", &err);
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers().get("Retry-After").unwrap(), "2");
        let body = body_json(response).await;
        assert_eq!(body["details"]["retryAfterMs"], 2500);
    }

    #[tokio::test]
    async fn terms_error_is_428() {
        let err = DomainError::terms_required("accept the terms");
        let response = err_envelope("req_4", &err);
        assert_eq!(response.status(), StatusCode::PRECONDITION_REQUIRED);
    }
}
