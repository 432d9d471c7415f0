//! Risk policy for delegated-agent orders.
//!
//! Policy lives on `agentClients/{id}`: a trust tier with default
//! limits, optional per-client overrides, and a cooldown that suspends
//! ordering. Denials are audited; six denials inside 24 hours
//! auto-suspend the client for 30 minutes.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use mf_core::DomainError;
use mf_store::{collections, DocKeys, DocStore, TxContext};

use crate::types::{AgentClient, AgentClientStatus};

/// Denials inside the rolling window that trigger auto-suspension.
pub const DENY_SUSPEND_THRESHOLD: u32 = 6;
pub const DENY_WINDOW_HOURS: i64 = 24;
pub const AUTO_SUSPEND_MINUTES: i64 = 30;

pub const RISK_DENIED: &str = "risk_denied";

#[derive(Debug, Serialize, Deserialize)]
pub struct RiskAuditRow {
    pub agent_client_id: String,
    pub uid: String,
    pub reason_code: String,
    pub detail: String,
    pub request_id: String,
    pub at: DateTime<Utc>,
}

/// A policy denial carried out of the bookkeeping transaction.
#[derive(Debug, Clone)]
struct RiskDenial {
    reason_code: String,
    detail: String,
}

/// Load the client policy, honoring cooldowns. An elapsed cooldown
/// auto-resumes the client in place.
pub fn load_client(
    tx: &mut TxContext<'_>,
    agent_client_id: &str,
    now: DateTime<Utc>,
) -> Result<AgentClient, DomainError> {
    let mut client: AgentClient = tx
        .get(collections::AGENT_CLIENTS, agent_client_id)?
        .unwrap_or_else(|| AgentClient::fresh(agent_client_id, now));
    if client.status == AgentClientStatus::Suspended {
        match client.cooldown_until {
            Some(until) if until <= now => {
                client.status = AgentClientStatus::Active;
                client.cooldown_until = None;
                client.updated_at = now;
                save_client(tx, &client)?;
            }
            _ => {}
        }
    }
    Ok(client)
}

pub fn save_client(tx: &mut TxContext<'_>, client: &AgentClient) -> Result<(), DomainError> {
    tx.put(
        collections::AGENT_CLIENTS,
        &client.agent_client_id,
        &DocKeys::default().with_scope(client.agent_client_id.clone()),
        client,
    )
}

/// Enforce the order-level risk policy for a delegated client.
///
/// Runs in its own transaction, committed before any deny is returned:
/// the audit row, the rolling deny count, and a threshold suspension
/// must all survive the rejection they accompany. Callers therefore
/// invoke this before opening the order transaction.
pub async fn enforce_order_policy(
    store: &DocStore,
    agent_client_id: &str,
    uid: &str,
    order_cents: i64,
    request_id: &str,
) -> Result<(), DomainError> {
    let client_id = agent_client_id.to_string();
    let uid = uid.to_string();
    let request_id = request_id.to_string();

    let denial: Option<RiskDenial> = store
        .with_tx(move |tx| {
            let now = Utc::now();
            let mut client = load_client(tx, &client_id, now)?;

            let denial = evaluate(tx, &client, order_cents, now)?;
            if let Some(denied) = &denial {
                record_denial(tx, &mut client, &uid, denied, &request_id, now)?;
            }
            Ok(denial)
        })
        .await?;

    match denial {
        Some(denied) => Err(DomainError::forbidden(
            denied.reason_code,
            format!("risk policy denied the order: {}", denied.detail),
        )),
        None => Ok(()),
    }
}

/// Pure policy evaluation: suspension, tier ceiling, hourly order rate.
fn evaluate(
    tx: &TxContext<'_>,
    client: &AgentClient,
    order_cents: i64,
    now: DateTime<Utc>,
) -> Result<Option<RiskDenial>, DomainError> {
    if client.status == AgentClientStatus::Suspended {
        let detail = match client.cooldown_until {
            Some(until) => format!("suspended until {until}"),
            None => "suspended".to_string(),
        };
        return Ok(Some(RiskDenial {
            reason_code: "AGENT_CLIENT_SUSPENDED".to_string(),
            detail,
        }));
    }

    let (max_order_cents, max_orders_per_hour) = client.effective_limits();
    if order_cents > max_order_cents {
        return Ok(Some(RiskDenial {
            reason_code: "ORDER_EXCEEDS_TIER_LIMIT".to_string(),
            detail: format!("{order_cents} cents exceeds the {max_order_cents} cent ceiling"),
        }));
    }

    let recent_orders = tx.count_by_scope_since(
        collections::AGENT_ORDERS,
        &client.agent_client_id,
        now - Duration::hours(1),
    )?;
    if recent_orders >= max_orders_per_hour {
        return Ok(Some(RiskDenial {
            reason_code: "ORDER_RATE_EXCEEDED".to_string(),
            detail: format!(
                "{recent_orders} orders in the last hour (limit {max_orders_per_hour})"
            ),
        }));
    }

    Ok(None)
}

/// Write the deny audit row, then suspend the client once the rolling
/// window crosses the threshold. The count includes the row written
/// here, so the sixth denial is the one that suspends.
fn record_denial(
    tx: &mut TxContext<'_>,
    client: &mut AgentClient,
    uid: &str,
    denied: &RiskDenial,
    request_id: &str,
    now: DateTime<Utc>,
) -> Result<(), DomainError> {
    let row = RiskAuditRow {
        agent_client_id: client.agent_client_id.clone(),
        uid: uid.to_string(),
        reason_code: denied.reason_code.clone(),
        detail: denied.detail.clone(),
        request_id: request_id.to_string(),
        at: now,
    };
    // Keyed by request so rapid denials never collapse into one row.
    let audit_id = format!(
        "{}:{}:{}",
        client.agent_client_id, denied.reason_code, request_id
    );
    tx.put(
        collections::AGENT_AUDIT_LOGS,
        &audit_id,
        &DocKeys::owner(uid.to_string())
            .with_scope(client.agent_client_id.clone())
            .with_lookup(RISK_DENIED.to_string()),
        &row,
    )?;

    let recent_denies = tx.count_by_scope_lookup_since(
        collections::AGENT_AUDIT_LOGS,
        &client.agent_client_id,
        RISK_DENIED,
        now - Duration::hours(DENY_WINDOW_HOURS),
    )?;
    if recent_denies >= DENY_SUSPEND_THRESHOLD && client.status != AgentClientStatus::Suspended {
        client.status = AgentClientStatus::Suspended;
        client.cooldown_until = Some(now + Duration::minutes(AUTO_SUSPEND_MINUTES));
        client.updated_at = now;
        save_client(tx, client)?;
        tracing::warn!(
            agent_client_id = %client.agent_client_id,
            recent_denies,
            "agent client auto-suspended after repeated risk denials"
        );
    }
    Ok(())
}
