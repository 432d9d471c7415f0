//! Structured audit events.
//!
//! Every deny and error path, and every fairness/commerce decision,
//! emits one [`AuditEvent`]. The event is logged through `tracing`
//! here; the owning component persists the same value as a document in
//! its audit collection.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteFamily {
    V1,
    Legacy,
}

impl RouteFamily {
    pub fn as_str(&self) -> &'static str {
        match self {
            RouteFamily::V1 => "v1",
            RouteFamily::Legacy => "legacy",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEvent {
    pub reason_code: String,
    pub resource_type: String,
    pub resource_id: String,
    pub owner_uid: Option<String>,
    pub actor_uid: Option<String>,
    pub route_family: RouteFamily,
    pub request_id: String,
    pub at: DateTime<Utc>,
    #[serde(default)]
    pub detail: Option<Value>,
}

impl AuditEvent {
    pub fn new(
        reason_code: impl Into<String>,
        resource_type: impl Into<String>,
        resource_id: impl Into<String>,
        route_family: RouteFamily,
        request_id: impl Into<String>,
    ) -> Self {
        Self {
            reason_code: reason_code.into(),
            resource_type: resource_type.into(),
            resource_id: resource_id.into(),
            owner_uid: None,
            actor_uid: None,
            route_family,
            request_id: request_id.into(),
            at: Utc::now(),
            detail: None,
        }
    }

    pub fn owner(mut self, owner_uid: impl Into<String>) -> Self {
        self.owner_uid = Some(owner_uid.into());
        self
    }

    pub fn actor(mut self, actor_uid: impl Into<String>) -> Self {
        self.actor_uid = Some(actor_uid.into());
        self
    }

    pub fn detail(mut self, detail: Value) -> Self {
        self.detail = Some(detail);
        self
    }

    /// Log the event. Persistence is the owning component's job.
    pub fn emit(&self) {
        tracing::info!(
            reason_code = %self.reason_code,
            resource_type = %self.resource_type,
            resource_id = %self.resource_id,
            owner_uid = self.owner_uid.as_deref().unwrap_or("-"),
            route_family = %self.route_family.as_str(),
            request_id = %self.request_id,
            "audit"
        );
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_camel_case() {
        let event = AuditEvent::new(
            "risk_denied",
            "agentOrder",
            "ord-1",
            RouteFamily::V1,
            "req_x",
        )
        .owner("u1");
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["reasonCode"], "risk_denied");
        assert_eq!(value["resourceType"], "agentOrder");
        assert_eq!(value["ownerUid"], "u1");
        assert_eq!(value["routeFamily"], "v1");
    }

    #[test]
    fn route_family_names() {
        assert_eq!(RouteFamily::V1.as_str(), "v1");
        assert_eq!(RouteFamily::Legacy.as_str(), "legacy");
    }
}
