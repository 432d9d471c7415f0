use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Quotes
// ---------------------------------------------------------------------------

/// How long a quote (and the reservation hold taken on it) stays valid.
pub const HOLD_MINUTES: i64 = 15;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuoteStatus {
    Quoted,
    Reserved,
    Expired,
    Consumed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Quote {
    pub quote_id: String,
    pub service_id: String,
    pub uid: String,
    pub auth_mode: String,
    #[serde(default)]
    pub agent_client_id: Option<String>,
    pub quantity: u32,
    pub unit_price_cents: i64,
    pub subtotal_cents: i64,
    pub currency: String,
    pub risk_level: RiskLevel,
    pub requires_manual_review: bool,
    pub status: QuoteStatus,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Agent reservations
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentReservationStatus {
    Reserved,
    PendingReview,
    Paid,
    PaymentRequired,
    Cancelled,
    Expired,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentReservation {
    pub reservation_id: String,
    pub quote_id: String,
    pub uid: String,
    pub service_id: String,
    pub category: String,
    pub quantity: u32,
    pub amount_cents: i64,
    pub currency: String,
    pub status: AgentReservationStatus,
    pub hold_expires_at: DateTime<Utc>,
    pub requires_manual_review: bool,
    #[serde(default)]
    pub agent_client_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Orders
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    PaymentRequired,
    Paid,
    Refunded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentProvider {
    Stripe,
    InternalPrepay,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FulfillmentStatus {
    Queued,
    InProgress,
    Fulfilled,
    Cancelled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub order_id: String,
    pub uid: String,
    pub reservation_id: String,
    pub amount_cents: i64,
    pub currency: String,
    pub status: OrderStatus,
    pub payment_status: String,
    pub fulfillment_status: FulfillmentStatus,
    pub payment_provider: PaymentProvider,
    #[serde(default)]
    pub price_id: Option<String>,
    #[serde(default)]
    pub stripe_checkout_session_id: Option<String>,
    #[serde(default)]
    pub stripe_payment_intent_id: Option<String>,
    /// False until a Stripe price is configured for the service.
    pub checkout_ready: bool,
    pub category: String,
    #[serde(default)]
    pub agent_client_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Agent clients (risk policy)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TrustTier {
    #[default]
    Low,
    Medium,
    High,
}

impl TrustTier {
    /// Default per-tier limits: max order cents and orders per hour.
    pub fn default_limits(&self) -> (i64, u32) {
        match self {
            TrustTier::Low => (25_000, 10),
            TrustTier::Medium => (75_000, 30),
            TrustTier::High => (200_000, 80),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AgentClientStatus {
    #[default]
    Active,
    Suspended,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SpendingLimits {
    #[serde(default)]
    pub max_order_cents: Option<i64>,
    #[serde(default)]
    pub max_orders_per_hour: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentClient {
    pub agent_client_id: String,
    #[serde(default)]
    pub trust_tier: TrustTier,
    #[serde(default)]
    pub status: AgentClientStatus,
    #[serde(default)]
    pub cooldown_until: Option<DateTime<Utc>>,
    #[serde(default)]
    pub spending_limits: Option<SpendingLimits>,
    pub updated_at: DateTime<Utc>,
}

impl AgentClient {
    pub fn fresh(agent_client_id: &str, now: DateTime<Utc>) -> Self {
        Self {
            agent_client_id: agent_client_id.to_string(),
            trust_tier: TrustTier::default(),
            status: AgentClientStatus::Active,
            cooldown_until: None,
            spending_limits: None,
            updated_at: now,
        }
    }

    /// Effective order ceiling and hourly budget, with per-client
    /// overrides applied over the tier defaults.
    pub fn effective_limits(&self) -> (i64, u32) {
        let (mut max_cents, mut per_hour) = self.trust_tier.default_limits();
        if let Some(limits) = &self.spending_limits {
            if let Some(cents) = limits.max_order_cents {
                max_cents = cents;
            }
            if let Some(count) = limits.max_orders_per_hour {
                per_hour = count;
            }
        }
        (max_cents, per_hour)
    }
}

// ---------------------------------------------------------------------------
// Agent accounts (independent-agent ledger)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AgentAccountStatus {
    #[default]
    Active,
    OnHold,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentAccount {
    pub agent_client_id: String,
    #[serde(default)]
    pub status: AgentAccountStatus,
    #[serde(default)]
    pub independent_enabled: bool,
    #[serde(default)]
    pub prepay_required: bool,
    #[serde(default)]
    pub prepaid_balance_cents: i64,
    #[serde(default)]
    pub daily_spend_cap_cents: Option<i64>,
    /// UTC day the daily counters belong to (yyyy-mm-dd).
    pub spend_day_key: String,
    #[serde(default)]
    pub spent_today_cents: i64,
    /// Per-category spend; `cap:{category}` entries carry the caps.
    #[serde(default)]
    pub spent_by_category_cents: BTreeMap<String, i64>,
}

impl AgentAccount {
    pub fn fresh(agent_client_id: &str, now: DateTime<Utc>) -> Self {
        Self {
            agent_client_id: agent_client_id.to_string(),
            status: AgentAccountStatus::Active,
            independent_enabled: false,
            prepay_required: true,
            prepaid_balance_cents: 0,
            daily_spend_cap_cents: None,
            spend_day_key: day_key(now),
            spent_today_cents: 0,
            spent_by_category_cents: BTreeMap::new(),
        }
    }
}

pub fn day_key(now: DateTime<Utc>) -> String {
    now.format("%Y-%m-%d").to_string()
}

// ---------------------------------------------------------------------------
// Agent requests (commission / X1C)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentRequestKind {
    Commission,
    X1cPrint,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentRequestStatus {
    Triaged,
    Accepted,
    Rejected,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentRequest {
    pub request_id: String,
    pub uid: String,
    pub kind: AgentRequestKind,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    pub status: AgentRequestStatus,
    pub policy_version: String,
    #[serde(default)]
    pub reason_code: Option<String>,
    #[serde(default)]
    pub detail: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
