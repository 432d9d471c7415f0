use axum::{body::Body, extract::Request, middleware::Next, response::Response};

use mf_core::ids::generate_request_id;

/// Inbound request ids longer than this are replaced with a generated one.
pub const MAX_REQUEST_ID_LEN: usize = 128;

/// Axum middleware that propagates `x-request-id` and opens a tracing
/// span for the request.
///
/// An acceptable inbound id is reused; anything missing, oversized, or
/// non-ASCII is replaced with a generated `req_…` id. The response
/// always carries the header.
pub async fn request_id_middleware(mut request: Request<Body>, next: Next) -> Response {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .filter(|s| !s.is_empty() && s.len() <= MAX_REQUEST_ID_LEN)
        .map(|s| s.to_string())
        .unwrap_or_else(generate_request_id);

    // Overwrite so downstream handlers read the sanitized value.
    if let Ok(value) = request_id.parse() {
        request.headers_mut().insert("x-request-id", value);
    }

    let method = request.method().to_string();
    let path = request.uri().path().to_string();
    let span = tracing::info_span!(
        "http_request",
        request_id = %request_id,
        method = %method,
        path = %path,
    );
    let _guard = span.enter();
    tracing::debug!(request_id = %request_id, "processing request");

    let mut response = next.run(request).await;

    if let Ok(value) = request_id.parse() {
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
    use axum::{middleware, routing::post, Router};
    use tower::ServiceExt;

    fn app() -> Router {
        Router::new()
            .route("/echo", post(|| async { "ok" }))
            .layer(middleware::from_fn(request_id_middleware))
    }

    #[tokio::test]
    async fn generates_request_id_when_missing() {
        let resp = app()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/echo")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let id = resp
            .headers()
            .get("x-request-id")
            .and_then(|v| v.to_str().ok())
            .unwrap()
            .to_string();
        assert!(id.starts_with("req_"));
    }

    #[tokio::test]
    async fn reuses_inbound_request_id() {
        let resp = app()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/echo")
                    .header("x-request-id", "req_inbound1234")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(
            resp.headers().get("x-request-id").unwrap(),
            "req_inbound1234"
        );
    }

    #[tokio::test]
    async fn oversized_inbound_id_is_replaced() {
        let oversized = "x".repeat(200);
        let resp = app()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/echo")
                    .header("x-request-id", &oversized)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let id = resp
            .headers()
            .get("x-request-id")
            .and_then(|v| v.to_str().ok())
            .unwrap();
        assert!(id.starts_with("req_"));
        assert!(id.len() <= MAX_REQUEST_ID_LEN);
    }
}
