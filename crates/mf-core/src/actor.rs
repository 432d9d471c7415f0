//! Actor context and authorization predicates.
//!
//! The identity provider itself is an external collaborator; by the time
//! a request reaches domain code it has been reduced to an
//! [`ActorContext`]: who is acting, in which mode, with which scopes,
//! and whether they carry the staff flag.

use serde::{Deserialize, Serialize};

use crate::error::DomainError;

// ---------------------------------------------------------------------------
// ActorMode
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ActorMode {
    Session,
    DelegatedAgent,
    PersonalAccessToken,
}

impl ActorMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActorMode::Session => "session",
            ActorMode::DelegatedAgent => "delegated-agent",
            ActorMode::PersonalAccessToken => "personal-access-token",
        }
    }
}

// ---------------------------------------------------------------------------
// Delegation
// ---------------------------------------------------------------------------

/// A grant allowing a delegated agent to act on an owner's resources
/// within the listed scopes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Delegation {
    pub owner_uid: String,
    pub scopes: Vec<String>,
}

// ---------------------------------------------------------------------------
// ActorContext
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct ActorContext {
    pub mode: ActorMode,
    pub uid: String,
    pub scopes: Vec<String>,
    pub agent_client_id: Option<String>,
    pub token_id: Option<String>,
    pub staff: bool,
    pub delegations: Vec<Delegation>,
}

impl ActorContext {
    pub fn session(uid: impl Into<String>) -> Self {
        Self {
            mode: ActorMode::Session,
            uid: uid.into(),
            scopes: Vec::new(),
            agent_client_id: None,
            token_id: None,
            staff: false,
            delegations: Vec::new(),
        }
    }

    pub fn staff_session(uid: impl Into<String>) -> Self {
        let mut ctx = Self::session(uid);
        ctx.staff = true;
        ctx
    }

    pub fn personal_token(
        uid: impl Into<String>,
        token_id: impl Into<String>,
        scopes: Vec<String>,
    ) -> Self {
        Self {
            mode: ActorMode::PersonalAccessToken,
            uid: uid.into(),
            scopes,
            agent_client_id: None,
            token_id: Some(token_id.into()),
            staff: false,
            delegations: Vec::new(),
        }
    }

    pub fn delegated(
        uid: impl Into<String>,
        agent_client_id: impl Into<String>,
        scopes: Vec<String>,
        delegations: Vec<Delegation>,
    ) -> Self {
        Self {
            mode: ActorMode::DelegatedAgent,
            uid: uid.into(),
            scopes,
            agent_client_id: Some(agent_client_id.into()),
            token_id: None,
            staff: false,
            delegations,
        }
    }

    /// Scope possession. Session actors implicitly carry every scope;
    /// token and delegated actors must hold each required scope (or the
    /// `*` wildcard) explicitly.
    pub fn has_scopes(&self, required: &[&str]) -> bool {
        if self.mode == ActorMode::Session {
            return true;
        }
        required
            .iter()
            .all(|need| self.scopes.iter().any(|have| have == need || have == "*"))
    }

    /// Authorize an operation against a resource owned by `owner_uid`.
    ///
    /// Staff actors pass when `allow_staff` is set. Otherwise the actor
    /// must hold the scope and either be the owner or, for delegated
    /// agents, carry a delegation that grants the scope for that owner.
    pub fn authorize(
        &self,
        owner_uid: &str,
        scope: &str,
        resource: &str,
        allow_staff: bool,
    ) -> Result<(), DomainError> {
        if self.uid.is_empty() {
            return Err(DomainError::unauthenticated("authentication required"));
        }
        if self.staff && allow_staff {
            return Ok(());
        }
        if !self.has_scopes(&[scope]) {
            return Err(DomainError::forbidden(
                "MISSING_SCOPE",
                format!("scope `{scope}` is required for {resource}"),
            ));
        }
        match self.mode {
            ActorMode::Session | ActorMode::PersonalAccessToken => {
                if self.uid == owner_uid {
                    Ok(())
                } else {
                    Err(DomainError::forbidden(
                        "NOT_RESOURCE_OWNER",
                        format!("{resource} belongs to another member"),
                    ))
                }
            }
            ActorMode::DelegatedAgent => {
                let granted = self.delegations.iter().any(|d| {
                    d.owner_uid == owner_uid
                        && d.scopes.iter().any(|s| s == scope || s == "*")
                });
                if granted {
                    Ok(())
                } else {
                    Err(DomainError::forbidden(
                        "DELEGATION_INSUFFICIENT",
                        format!("delegation does not grant `{scope}` on {resource}"),
                    ))
                }
            }
        }
    }

    pub fn require_staff(&self, resource: &str) -> Result<(), DomainError> {
        if self.uid.is_empty() {
            return Err(DomainError::unauthenticated("authentication required"));
        }
        if self.staff {
            Ok(())
        } else {
            Err(DomainError::forbidden(
                "STAFF_ONLY",
                format!("{resource} requires a staff actor"),
            ))
        }
    }
}

// ---------------------------------------------------------------------------
// RolloutPhase
// ---------------------------------------------------------------------------

/// Library rollout gate. Routes declare the minimum phase they need;
/// the deployment-wide current phase must be at least that.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RolloutPhase {
    #[serde(rename = "phase_1_read_only")]
    Phase1ReadOnly,
    #[serde(rename = "phase_2_member_writes")]
    Phase2MemberWrites,
    #[serde(rename = "phase_3_admin_full")]
    Phase3AdminFull,
}

impl RolloutPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            RolloutPhase::Phase1ReadOnly => "phase_1_read_only",
            RolloutPhase::Phase2MemberWrites => "phase_2_member_writes",
            RolloutPhase::Phase3AdminFull => "phase_3_admin_full",
        }
    }

    pub fn allows(&self, required: RolloutPhase) -> bool {
        *self >= required
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
