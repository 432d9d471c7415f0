//! Route whitelist and dispatch.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{OriginalUri, State};
use axum::http::HeaderMap;
use axum::middleware;
use axum::response::Response;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde_json::{json, Value};
use tower_http::limit::RequestBodyLimitLayer;
use tracing::warn;

use mf_core::actor::{ActorContext, ActorMode, RolloutPhase};
use mf_core::ids::generate_request_id;
use mf_core::DomainError;
use mf_store::{collections, DocKeys};
use mf_telemetry::audit::{AuditEvent, RouteFamily};
use mf_telemetry::request_id::request_id_middleware;

use crate::auth_layer::actor_from_headers;
use crate::envelope::{err_envelope, ok_envelope};
use crate::event_bus::StudioEvent;
use crate::handlers;
use crate::state::ApiState;

const MAX_BODY_BYTES: usize = 256 * 1024;

// ---------------------------------------------------------------------------
// Route table
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
pub struct RouteSpec {
    pub path: &'static str,
    pub scope: Option<&'static str>,
    pub admin_only: bool,
    pub phase: Option<RolloutPhase>,
    pub agent_route: bool,
    pub terms_exempt: bool,
}

const fn route(path: &'static str, scope: &'static str) -> RouteSpec {
    RouteSpec {
        path,
        scope: Some(scope),
        admin_only: false,
        phase: None,
        agent_route: false,
        terms_exempt: false,
    }
}

const fn admin(mut spec: RouteSpec) -> RouteSpec {
    spec.admin_only = true;
    spec
}

const fn agent(mut spec: RouteSpec) -> RouteSpec {
    spec.agent_route = true;
    spec
}

const fn exempt(mut spec: RouteSpec) -> RouteSpec {
    spec.terms_exempt = true;
    spec
}

const fn phase(mut spec: RouteSpec, phase: RolloutPhase) -> RouteSpec {
    spec.phase = Some(phase);
    spec
}

/// The POST whitelist. Anything else is NOT_FOUND.
pub const ROUTES: &[RouteSpec] = &[
    // -- Reservations -------------------------------------------------------
    route("/v1/reservations.create", "reservations:write"),
    route("/v1/reservations.get", "reservations:read"),
    route("/v1/reservations.list", "reservations:read"),
    route("/v1/reservations.checkIn", "reservations:write"),
    route("/v1/reservations.lookupArrival", "reservations:read"),
    admin(route("/v1/reservations.rotateArrivalToken", "reservations:write")),
    route("/v1/reservations.pickupWindow", "reservations:write"),
    admin(route("/v1/reservations.queueFairness", "reservations:write")),
    route("/v1/reservations.update", "reservations:write"),
    route("/v1/reservations.assignStation", "reservations:write"),
    route("/v1/reservations.exportContinuity", "reservations:export"),
    // -- Agent commerce -----------------------------------------------------
    exempt(agent(route("/v1/agent.catalog", "agent:read"))),
    agent(route("/v1/agent.quote", "agent:commerce")),
    agent(route("/v1/agent.reserve", "agent:commerce")),
    agent(route("/v1/agent.pay", "agent:commerce")),
    agent(route("/v1/agent.status", "agent:read")),
    agent(route("/v1/agent.order.get", "agent:read")),
    agent(route("/v1/agent.orders.list", "agent:read")),
    agent(route("/v1/agent.revenue.summary", "agent:read")),
    agent(route("/v1/agent.requests.commission.create", "agent:requests")),
    agent(route("/v1/agent.requests.x1c.create", "agent:requests")),
    admin(agent(route("/v1/agent.requests.decide", "agent:requests"))),
    agent(route("/v1/agent.requests.get", "agent:read")),
    agent(route("/v1/agent.requests.list", "agent:read")),
    exempt(agent(route("/v1/agent.terms.get", "agent:read"))),
    exempt(agent(route("/v1/agent.terms.accept", "agent:read"))),
    agent(route("/v1/agent.account.get", "agent:read")),
    admin(agent(route("/v1/agent.account.update", "agent:admin"))),
    // -- Library ------------------------------------------------------------
    phase(
        route("/v1/library.loans.checkout", "library:write"),
        RolloutPhase::Phase2MemberWrites,
    ),
    phase(
        route("/v1/library.loans.checkIn", "library:write"),
        RolloutPhase::Phase2MemberWrites,
    ),
    phase(
        admin(route("/v1/library.loans.markLost", "library:write")),
        RolloutPhase::Phase3AdminFull,
    ),
    phase(
        admin(route("/v1/library.loans.assessReplacementFee", "library:write")),
        RolloutPhase::Phase3AdminFull,
    ),
    phase(
        route("/v1/library.loans.listMine", "library:read"),
        RolloutPhase::Phase1ReadOnly,
    ),
    phase(
        admin(route("/v1/library.items.overrideStatus", "library:write")),
        RolloutPhase::Phase3AdminFull,
    ),
];

pub fn route_spec(path: &str) -> Option<&'static RouteSpec> {
    ROUTES.iter().find(|spec| spec.path == path)
}

pub fn route_family(path: &str) -> RouteFamily {
    if path.starts_with("/v1/") {
        RouteFamily::V1
    } else {
        RouteFamily::Legacy
    }
}

// ---------------------------------------------------------------------------
// Router assembly
// ---------------------------------------------------------------------------

pub fn build_router(state: Arc<ApiState>) -> Router {
    let mut router = Router::new().route("/healthz", get(healthz));
    for spec in ROUTES {
        router = router.route(spec.path, post(dispatch).fallback(method_not_allowed));
    }
    router
        .fallback(unknown_route)
        .layer(middleware::from_fn(request_id_middleware))
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .with_state(state)
}

async fn healthz() -> Json<Value> {
    Json(json!({ "ok": true, "service": "monsoonfire", "at": Utc::now().to_rfc3339() }))
}

async fn unknown_route(headers: HeaderMap) -> Response {
    let request_id = request_id_from(&headers);
    err_envelope(
        &request_id,
        &DomainError::not_found("unknown route"),
    )
}

async fn method_not_allowed(headers: HeaderMap) -> Response {
    use axum::http::{HeaderValue, StatusCode};
    use axum::response::IntoResponse;

    let request_id = request_id_from(&headers);
    let body = json!({
        "ok": false,
        "requestId": request_id,
        "code": "METHOD_NOT_ALLOWED",
        "message": "all API routes are POST",
        "details": null,
    });
    let mut response = (StatusCode::METHOD_NOT_ALLOWED, Json(body)).into_response();
    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert("x-request-id", value);
    }
    response
}

fn request_id_from(headers: &HeaderMap) -> String {
    headers
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .unwrap_or_else(generate_request_id)
}

// ---------------------------------------------------------------------------
// Dispatch
// ---------------------------------------------------------------------------

async fn dispatch(
    State(state): State<Arc<ApiState>>,
    OriginalUri(uri): OriginalUri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let request_id = request_id_from(&headers);
    let path = uri.path().to_string();
    let Some(spec) = route_spec(&path) else {
        return err_envelope(&request_id, &DomainError::not_found("unknown route"));
    };

    match handle(&state, spec, &request_id, &headers, &body).await {
        Ok(data) => ok_envelope(&request_id, data),
        Err(err) => {
            audit_failure(&state, spec, &request_id, &headers, &err);
            err_envelope(&request_id, &err)
        }
    }
}

async fn handle(
    state: &Arc<ApiState>,
    spec: &RouteSpec,
    request_id: &str,
    headers: &HeaderMap,
    body: &Bytes,
) -> Result<Value, DomainError> {
    let actor = actor_from_headers(headers)?;

    if let Some(scope) = spec.scope {
        if !actor.has_scopes(&[scope]) {
            return Err(DomainError::forbidden(
                "MISSING_SCOPE",
                format!("scope `{scope}` is required"),
            ));
        }
    }
    if spec.admin_only && !actor.staff {
        return Err(DomainError::forbidden(
            "STAFF_ONLY",
            "this route requires a staff actor",
        ));
    }
    if let Some(required) = spec.phase {
        if !state.rollout_phase.allows(required) {
            return Err(DomainError::forbidden_with(
                "ROLLOUT_PHASE_BLOCKED",
                format!(
                    "this route opens in {}; the deployment is at {}",
                    required.as_str(),
                    state.rollout_phase.as_str()
                ),
                json!({ "requiredPhase": required.as_str() }),
            ));
        }
    }

    enforce_rate_limits(state, spec, request_id, &actor).await?;

    if spec.agent_route && !spec.terms_exempt {
        state.commerce.terms_gate(&actor).await?;
    }

    let body: Value = if body.is_empty() {
        json!({})
    } else {
        serde_json::from_slice(body).map_err(|e| {
            DomainError::invalid("BODY_INVALID", format!("request body is not valid JSON: {e}"))
        })?
    };

    let op = spec.path.trim_start_matches("/v1/");
    if op.starts_with("reservations.") {
        handlers::reservations::dispatch(state, &actor, request_id, op, body).await
    } else if op.starts_with("agent.") {
        handlers::agent::dispatch(state, &actor, request_id, op, body).await
    } else if op.starts_with("library.") {
        handlers::library::dispatch(state, &actor, request_id, headers, op, body).await
    } else {
        Err(DomainError::not_found("unknown route"))
    }
}

/// Per-route and (for agent traffic) per-actor buckets. Delegated-agent
/// exhaustion is audited and may auto-suspend the client.
async fn enforce_rate_limits(
    state: &Arc<ApiState>,
    spec: &RouteSpec,
    request_id: &str,
    actor: &ActorContext,
) -> Result<(), DomainError> {
    let actor_key = actor
        .agent_client_id
        .clone()
        .unwrap_or_else(|| actor.uid.clone());

    if let Err(exceeded) = state.guard.check_route(spec.path, &actor_key) {
        return Err(DomainError::rate_limited(exceeded.retry_after_ms()));
    }
    if spec.agent_route {
        if let Err(exceeded) = state.guard.check_agent(&actor_key) {
            if actor.mode == ActorMode::DelegatedAgent {
                record_agent_exhaustion(state, request_id, actor).await;
            }
            return Err(DomainError::rate_limited(exceeded.retry_after_ms()));
        }
    }
    Ok(())
}

async fn record_agent_exhaustion(state: &Arc<ApiState>, request_id: &str, actor: &ActorContext) {
    let Some(client_id) = actor.agent_client_id.clone() else {
        return;
    };
    let now = Utc::now();
    let audit = json!({
        "agent_client_id": client_id,
        "uid": actor.uid,
        "reason_code": "rate_bucket_exhausted",
        "request_id": request_id,
        "at": now.to_rfc3339(),
    });
    let audit_id = format!("{client_id}:rate:{}", now.timestamp_millis());
    let cooldown_until = state.cooldown.cooldown_until(now);
    let keys = DocKeys::owner(actor.uid.clone())
        .with_scope(client_id.clone())
        .with_lookup("rate_bucket_exhausted".to_string());
    let result = state
        .store
        .with_tx(move |tx| {
            tx.put(collections::AGENT_AUDIT_LOGS, &audit_id, &keys, &audit)?;
            if let Some(until) = cooldown_until {
                let mut client: mf_commerce::AgentClient = tx
                    .get(collections::AGENT_CLIENTS, &client_id)?
                    .unwrap_or_else(|| mf_commerce::AgentClient::fresh(&client_id, now));
                client.status = mf_commerce::AgentClientStatus::Suspended;
                client.cooldown_until = Some(until);
                client.updated_at = now;
                tx.put(
                    collections::AGENT_CLIENTS,
                    &client.agent_client_id.clone(),
                    &DocKeys::default().with_scope(client.agent_client_id.clone()),
                    &client,
                )?;
            }
            Ok(())
        })
        .await;
    if let Err(err) = result {
        warn!(error = %err, "failed to record agent rate exhaustion");
    }
}

fn audit_failure(
    state: &Arc<ApiState>,
    spec: &RouteSpec,
    request_id: &str,
    headers: &HeaderMap,
    err: &DomainError,
) {
    let reason = err
        .reason()
        .map(str::to_string)
        .unwrap_or_else(|| err.code().as_str().to_string());
    let mut event = AuditEvent::new(
        reason.clone(),
        "route",
        spec.path,
        route_family(spec.path),
        request_id,
    );
    if let Ok(actor) = actor_from_headers(headers) {
        event = event.actor(actor.uid);
    }
    event.emit();
    state.event_bus.publish(StudioEvent::AuditRecorded {
        reason_code: reason,
        resource_id: spec.path.to_string(),
    });
}
