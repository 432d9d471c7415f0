//! Commission and X1C print request intake.

use chrono::Utc;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use mf_core::actor::ActorContext;
use mf_core::types::POLICY_VERSION;
use mf_core::DomainError;
use mf_store::{collections, DocKeys};

use crate::pipeline::CommercePipeline;
use crate::types::{AgentRequest, AgentRequestKind, AgentRequestStatus};

// ---------------------------------------------------------------------------
// Prohibited-content screening
// ---------------------------------------------------------------------------

pub struct ProhibitedContent {
    rules: Vec<(&'static str, Regex)>,
    weapon_like: Regex,
}

impl ProhibitedContent {
    pub fn new() -> Self {
        let compile = |pattern: &str| {
            Regex::new(pattern).unwrap_or_else(|_| Regex::new("$^").expect("empty regex"))
        };
        Self {
            rules: vec![
                (
                    "weapons",
                    compile(
                        r"(?i)\b(gun|firearm|rifle|pistol|silencer|suppressor|explosive|ammunition|ammo)\b",
                    ),
                ),
                (
                    "counterfeit",
                    compile(r"(?i)\b(counterfeit|knock[- ]?off|fake (?:designer|brand)|replica (?:logo|brand))\b"),
                ),
                (
                    "copyright_bypass",
                    compile(r"(?i)\b(bypass (?:drm|copyright)|pirated|crack(?:ed)? (?:software|game)|bootleg)\b"),
                ),
                (
                    "hate_harassment",
                    compile(r"(?i)\b(hate (?:symbol|speech)|harass(?:ment)?|racial slur|doxx?)\b"),
                ),
            ],
            weapon_like: compile(
                r"(?i)\b(gun|firearm|rifle|pistol|receiver|silencer|suppressor|trigger assembly)\b",
            ),
        }
    }

    /// First matching category, if any.
    pub fn screen(&self, text: &str) -> Option<&'static str> {
        self.rules
            .iter()
            .find(|(_, rule)| rule.is_match(text))
            .map(|(code, _)| *code)
    }

    pub fn is_weapon_like(&self, text: &str) -> bool {
        self.weapon_like.is_match(text)
    }
}

impl Default for ProhibitedContent {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Decision reason codes
// ---------------------------------------------------------------------------

pub const ACCEPT_REASON_CODES: &[&str] = &["capacity_available", "standard_scope", "repeat_client"];
pub const REJECT_REASON_CODES: &[&str] = &[
    "out_of_scope",
    "capacity_unavailable",
    "policy_violation",
    "insufficient_detail",
];

// ---------------------------------------------------------------------------
// Inputs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct CommissionCreateInput {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RequestDecideInput {
    pub request_id: String,
    pub decision: Decision,
    pub reason_code: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Accept,
    Reject,
}

pub const X1C_FILE_TYPES: &[&str] = &["3mf", "stl", "step"];
pub const X1C_MATERIALS: &[&str] = &["pla", "petg", "abs", "asa", "pa_cf", "tpu"];
pub const X1C_MAX_DIMENSION_MM: f64 = 256.0;

#[derive(Debug, Clone, Deserialize)]
pub struct X1cCreateInput {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    pub file_type: String,
    pub material_profile: String,
    pub dimensions_mm: [f64; 3],
    pub quantity: u32,
}

// ---------------------------------------------------------------------------
// Operations
// ---------------------------------------------------------------------------

impl CommercePipeline {
    pub async fn commission_create(
        &self,
        actor: &ActorContext,
        input: CommissionCreateInput,
    ) -> Result<AgentRequest, DomainError> {
        if input.title.trim().is_empty() {
            return Err(DomainError::invalid(
                "TITLE_REQUIRED",
                "commission requests need a title",
            ));
        }
        let now = Utc::now();
        let haystack = format!(
            "{} {}",
            input.title,
            input.description.as_deref().unwrap_or_default()
        );
        let violation = self.prohibited.screen(&haystack);

        let request = AgentRequest {
            request_id: format!("areq-{}", Uuid::new_v4().as_simple()),
            uid: actor.uid.clone(),
            kind: AgentRequestKind::Commission,
            title: input.title.clone(),
            description: input.description.clone(),
            status: if violation.is_some() {
                AgentRequestStatus::Rejected
            } else {
                AgentRequestStatus::Triaged
            },
            policy_version: POLICY_VERSION.to_string(),
            reason_code: violation.map(|_| "policy_violation".to_string()),
            detail: violation.map(|category| json!({ "prohibited_category": category })),
            created_at: now,
            updated_at: now,
        };
        self.persist_request(&request, violation).await?;
        Ok(request)
    }

    pub async fn x1c_create(
        &self,
        actor: &ActorContext,
        input: X1cCreateInput,
    ) -> Result<AgentRequest, DomainError> {
        let file_type = input.file_type.to_ascii_lowercase();
        if !X1C_FILE_TYPES.contains(&file_type.as_str()) {
            return Err(DomainError::precondition(
                "X1C_FILE_TYPE_UNSUPPORTED",
                format!("file_type must be one of {X1C_FILE_TYPES:?}"),
            ));
        }
        let material = input.material_profile.to_ascii_lowercase();
        if !X1C_MATERIALS.contains(&material.as_str()) {
            return Err(DomainError::precondition(
                "X1C_MATERIAL_UNSUPPORTED",
                format!("material_profile must be one of {X1C_MATERIALS:?}"),
            ));
        }
        if input
            .dimensions_mm
            .iter()
            .any(|d| *d <= 0.0 || *d > X1C_MAX_DIMENSION_MM)
        {
            return Err(DomainError::precondition(
                "X1C_DIMENSIONS_OUT_OF_RANGE",
                format!("each dimension must be within (0, {X1C_MAX_DIMENSION_MM}] mm"),
            ));
        }
        if input.quantity < 1 || input.quantity > 20 {
            return Err(DomainError::precondition(
                "X1C_QUANTITY_OUT_OF_RANGE",
                "quantity must be between 1 and 20",
            ));
        }
        let haystack = format!(
            "{} {}",
            input.title,
            input.description.as_deref().unwrap_or_default()
        );
        if self.prohibited.is_weapon_like(&haystack) {
            return Err(DomainError::precondition(
                "x1c_prohibited_use",
                "the request text describes a prohibited use",
            ));
        }

        let now = Utc::now();
        let request = AgentRequest {
            request_id: format!("areq-{}", Uuid::new_v4().as_simple()),
            uid: actor.uid.clone(),
            kind: AgentRequestKind::X1cPrint,
            title: input.title.clone(),
            description: input.description.clone(),
            status: AgentRequestStatus::Triaged,
            policy_version: POLICY_VERSION.to_string(),
            reason_code: None,
            detail: Some(json!({
                "file_type": file_type,
                "material_profile": material,
                "dimensions_mm": input.dimensions_mm,
                "quantity": input.quantity,
            })),
            created_at: now,
            updated_at: now,
        };
        self.persist_request(&request, None).await?;
        Ok(request)
    }

    /// Staff decision on a triaged request.
    pub async fn request_decide(
        &self,
        actor: &ActorContext,
        input: RequestDecideInput,
    ) -> Result<AgentRequest, DomainError> {
        actor.require_staff("request decisions")?;
        let allowed: &[&str] = match input.decision {
            Decision::Accept => ACCEPT_REASON_CODES,
            Decision::Reject => REJECT_REASON_CODES,
        };
        if !allowed.contains(&input.reason_code.as_str()) {
            return Err(DomainError::invalid(
                "REASON_CODE_UNKNOWN",
                format!("reason_code must be one of {allowed:?}"),
            ));
        }
        let actor_uid = actor.uid.clone();

        self.store
            .with_tx(move |tx| {
                let now = Utc::now();
                let mut request: AgentRequest = tx
                    .get(collections::AGENT_REQUESTS, &input.request_id)?
                    .ok_or_else(|| DomainError::not_found("request not found"))?;
                if request.status != AgentRequestStatus::Triaged {
                    return Err(DomainError::conflict(
                        "REQUEST_ALREADY_DECIDED",
                        "only triaged requests can be decided",
                    ));
                }
                request.status = match input.decision {
                    Decision::Accept => AgentRequestStatus::Accepted,
                    Decision::Reject => AgentRequestStatus::Rejected,
                };
                request.reason_code = Some(input.reason_code.clone());
                request.updated_at = now;
                tx.put(
                    collections::AGENT_REQUESTS,
                    &request.request_id,
                    &DocKeys::owner(request.uid.clone()),
                    &request,
                )?;

                let audit = json!({
                    "request_id": request.request_id,
                    "decision": input.decision,
                    "reason_code": input.reason_code,
                    "actor_uid": actor_uid,
                    "at": now.to_rfc3339(),
                });
                tx.put(
                    &collections::agent_request_audit(&request.request_id),
                    &format!("decision:{}", now.timestamp_millis()),
                    &DocKeys::owner(request.uid.clone()),
                    &audit,
                )?;
                Ok(request)
            })
            .await
    }

    pub async fn request_get(
        &self,
        actor: &ActorContext,
        request_id: &str,
    ) -> Result<AgentRequest, DomainError> {
        let request: AgentRequest = self
            .store
            .get_doc(collections::AGENT_REQUESTS, request_id)
            .await?
            .ok_or_else(|| DomainError::not_found("request not found"))?;
        if request.uid != actor.uid && !actor.staff {
            return Err(DomainError::forbidden(
                "NOT_RESOURCE_OWNER",
                "the request belongs to another actor",
            ));
        }
        Ok(request)
    }

    pub async fn request_list(
        &self,
        actor: &ActorContext,
        limit: Option<u32>,
    ) -> Result<Vec<AgentRequest>, DomainError> {
        let limit = limit.unwrap_or(50).clamp(1, 200);
        self.store
            .list_by_owner(collections::AGENT_REQUESTS, actor.uid.clone(), Some(limit))
            .await
    }

    async fn persist_request(
        &self,
        request: &AgentRequest,
        violation: Option<&'static str>,
    ) -> Result<(), DomainError> {
        let request = request.clone();
        self.store
            .with_tx(move |tx| {
                tx.put(
                    collections::AGENT_REQUESTS,
                    &request.request_id,
                    &DocKeys::owner(request.uid.clone()),
                    &request,
                )?;
                if let Some(category) = violation {
                    let audit = json!({
                        "request_id": request.request_id,
                        "event": "auto_rejected",
                        "prohibited_category": category,
                        "at": request.created_at.to_rfc3339(),
                    });
                    tx.put(
                        &collections::agent_request_audit(&request.request_id),
                        "auto_reject",
                        &DocKeys::owner(request.uid.clone()),
                        &audit,
                    )?;
                }
                Ok(())
            })
            .await
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn screening_catches_each_category() {
        let screen = ProhibitedContent::new();
        assert_eq!(screen.screen("a ceramic gun holder"), Some("weapons"));
        assert_eq!(
            screen.screen("counterfeit designer mugs"),
            Some("counterfeit")
        );
        assert_eq!(
            screen.screen("help me bypass drm on this model"),
            Some("copyright_bypass")
        );
        assert_eq!(
            screen.screen("a hate symbol planter"),
            Some("hate_harassment")
        );
        assert_eq!(screen.screen("a simple bud vase"), None);
    }

    #[test]
    fn weapon_like_detection() {
        let screen = ProhibitedContent::new();
        assert!(screen.is_weapon_like("lower receiver bracket"));
        assert!(!screen.is_weapon_like("a garden gnome"));
    }

    #[test]
    fn reason_code_sets_are_disjoint() {
        for code in ACCEPT_REASON_CODES {
            assert!(!REJECT_REASON_CODES.contains(code));
        }
    }
}
