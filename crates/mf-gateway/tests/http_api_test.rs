//! In-process HTTP tests for the route surface and envelope.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tower::ServiceExt;

use mf_core::actor::RolloutPhase;
use mf_core::station::StationRegistry;
use mf_gateway::{build_router, ApiState};
use mf_store::DocStore;

async fn app() -> Router {
    let store = Arc::new(DocStore::open_in_memory().await.unwrap());
    let state = Arc::new(ApiState::new(store, StationRegistry::studio_default()));
    build_router(state)
}

async fn app_with_phase(phase: RolloutPhase) -> Router {
    let store = Arc::new(DocStore::open_in_memory().await.unwrap());
    let state = Arc::new(
        ApiState::new(store, StationRegistry::studio_default()).with_rollout_phase(phase),
    );
    build_router(state)
}

fn post(path: &str, headers: &[(&str, &str)], body: Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri(path)
        .header("content-type", "application/json");
    for (name, value) in headers {
        builder = builder.header(*name, *value);
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn healthz_is_open() {
    let app = app().await;
    let response = app
        .oneshot(
            Request::builder()
                .uri("/healthz")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn unknown_route_is_404_enveloped() {
    let app = app().await;
    let response = app
        .oneshot(post("/v1/reservations.doesNotExist", &[("x-uid", "u1")], json!({})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert!(response.headers().contains_key("x-request-id"));
    let body = body_json(response).await;
    assert_eq!(body["ok"], false);
    assert_eq!(body["code"], "NOT_FOUND");
}

#[tokio::test]
async fn non_post_methods_are_rejected() {
    let app = app().await;
    let response = app
        .oneshot(
            Request::builder()
                .method("GET")
                .uri("/v1/reservations.create")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    let body = body_json(response).await;
    assert_eq!(body["code"], "METHOD_NOT_ALLOWED");
}

#[tokio::test]
async fn missing_identity_is_401() {
    let app = app().await;
    let response = app
        .oneshot(post("/v1/reservations.create", &[], json!({"firing_type": "bisque"})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body = body_json(response).await;
    assert_eq!(body["code"], "UNAUTHENTICATED");
}

#[tokio::test]
async fn pat_without_scope_is_403() {
    let app = app().await;
    let response = app
        .oneshot(post(
            "/v1/reservations.create",
            &[
                ("x-uid", "u1"),
                ("x-auth-mode", "personal-access-token"),
                ("x-token-id", "tok1"),
                ("x-scopes", "reservations:read"),
            ],
            json!({"firing_type": "bisque"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let body = body_json(response).await;
    assert_eq!(body["details"]["reason"], "MISSING_SCOPE");
}

#[tokio::test]
async fn create_reservation_end_to_end() {
    let app = app().await;
    let request_body = json!({
        "client_request_id": "abc",
        "firing_type": "bisque",
        "shelf_equivalent": 2.0,
        "intake_mode": "SHELF_PURCHASE",
    });

    let response = app
        .clone()
        .oneshot(post(
            "/v1/reservations.create",
            &[("x-uid", "u1"), ("x-request-id", "req_e2e_1")],
            request_body.clone(),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get("x-request-id").unwrap(),
        "req_e2e_1"
    );
    let body = body_json(response).await;
    assert_eq!(body["ok"], true);
    assert_eq!(body["requestId"], "req_e2e_1");
    assert_eq!(body["data"]["reservation"]["status"], "REQUESTED");
    assert_eq!(body["data"]["idempotent_replay"], false);
    let id = body["data"]["reservation"]["id"].as_str().unwrap().to_string();

    // The identical call replays the same reservation.
    let response = app
        .oneshot(post(
            "/v1/reservations.create",
            &[("x-uid", "u1")],
            request_body,
        ))
        .await
        .unwrap();
    let body = body_json(response).await;
    assert_eq!(body["data"]["idempotent_replay"], true);
    assert_eq!(body["data"]["reservation"]["id"], id.as_str());
}

#[tokio::test]
async fn staff_routes_reject_members() {
    let app = app().await;
    let response = app
        .oneshot(post(
            "/v1/reservations.queueFairness",
            &[("x-uid", "u1")],
            json!({
                "reservation_id": "res-x",
                "action": "record_no_show",
                "reason": "missed drop-off",
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let body = body_json(response).await;
    assert_eq!(body["details"]["reason"], "STAFF_ONLY");
}

#[tokio::test]
async fn library_phase_gate_blocks_member_writes() {
    let app = app_with_phase(RolloutPhase::Phase1ReadOnly).await;

    // Reads are open in phase 1.
    let response = app
        .clone()
        .oneshot(post(
            "/v1/library.loans.listMine",
            &[("x-uid", "u1")],
            json!({}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    // Writes are not.
    let response = app
        .oneshot(post(
            "/v1/library.loans.checkout",
            &[("x-uid", "u1")],
            json!({"item_id": "book-1"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let body = body_json(response).await;
    assert_eq!(body["details"]["reason"], "ROLLOUT_PHASE_BLOCKED");
    assert_eq!(body["details"]["requiredPhase"], "phase_2_member_writes");
}

#[tokio::test]
async fn agent_routes_require_terms_for_tokens() {
    let app = app().await;
    let pat_headers: &[(&str, &str)] = &[
        ("x-uid", "u1"),
        ("x-auth-mode", "personal-access-token"),
        ("x-token-id", "tok1"),
        ("x-scopes", "agent:read,agent:commerce"),
    ];

    // terms.get is exempt.
    let response = app
        .clone()
        .oneshot(post("/v1/agent.terms.get", pat_headers, json!({})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    // quote is gated until acceptance.
    let response = app
        .clone()
        .oneshot(post(
            "/v1/agent.quote",
            pat_headers,
            json!({"service_id": "shelf-firing"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::PRECONDITION_REQUIRED);

    let response = app
        .clone()
        .oneshot(post("/v1/agent.terms.accept", pat_headers, json!({})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .oneshot(post(
            "/v1/agent.quote",
            pat_headers,
            json!({"service_id": "shelf-firing"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["data"]["subtotal_cents"], 1_800);
}

#[tokio::test]
async fn invalid_json_body_is_400() {
    let app = app().await;
    let request = Request::builder()
        .method("POST")
        .uri("/v1/reservations.create")
        .header("content-type", "application/json")
        .header("x-uid", "u1")
        .body(Body::from("{not json"))
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["code"], "INVALID_ARGUMENT");
}

#[tokio::test]
async fn sessions_carry_every_scope() {
    let app = app().await;
    // Session actors hit agent routes without explicit scopes.
    let response = app
        .oneshot(post("/v1/agent.catalog", &[("x-uid", "u1")], json!({})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert!(body["data"].as_array().unwrap().len() >= 3);
}
