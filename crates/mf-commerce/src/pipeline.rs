//! Quote → reserve → pay → order.

use std::sync::Arc;

use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

use mf_core::actor::{ActorContext, ActorMode};
use mf_core::ids;
use mf_core::DomainError;
use mf_store::{collections, DocKeys, DocStore};

use crate::catalog::{CatalogCache, CatalogService};
use crate::ledger;
use crate::requests::ProhibitedContent;
use crate::risk;
use crate::terms::TermsCache;
use crate::types::*;

// ---------------------------------------------------------------------------
// CommercePipeline
// ---------------------------------------------------------------------------

pub struct CommercePipeline {
    pub(crate) store: Arc<DocStore>,
    pub(crate) catalog: CatalogCache,
    pub(crate) terms: TermsCache,
    pub(crate) prohibited: ProhibitedContent,
}

impl CommercePipeline {
    pub fn new(store: Arc<DocStore>) -> Self {
        Self {
            catalog: CatalogCache::new(store.clone()),
            terms: TermsCache::new(store.clone()),
            prohibited: ProhibitedContent::new(),
            store,
        }
    }

    pub async fn catalog_services(&self) -> Result<Vec<CatalogService>, DomainError> {
        Ok(self.catalog.services().await?.as_ref().clone())
    }
}

// ---------------------------------------------------------------------------
// Quote
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct QuoteInput {
    pub service_id: String,
    #[serde(default)]
    pub quantity: Option<u32>,
}

fn risk_level_for(subtotal_cents: i64) -> RiskLevel {
    if subtotal_cents < 25_000 {
        RiskLevel::Low
    } else if subtotal_cents < 75_000 {
        RiskLevel::Medium
    } else {
        RiskLevel::High
    }
}

impl CommercePipeline {
    pub async fn quote(
        &self,
        actor: &ActorContext,
        input: QuoteInput,
    ) -> Result<Quote, DomainError> {
        let quantity = input.quantity.unwrap_or(1);
        if quantity < 1 || quantity > 100 {
            return Err(DomainError::invalid(
                "QUANTITY_OUT_OF_RANGE",
                "quantity must be between 1 and 100",
            ));
        }
        let service = self.catalog.service(&input.service_id).await?;
        let now = Utc::now();
        let subtotal = service.unit_price_cents * i64::from(quantity);
        let risk_level = risk_level_for(subtotal);
        let quote = Quote {
            quote_id: format!("aq-{}", Uuid::new_v4().as_simple()),
            service_id: service.service_id.clone(),
            uid: actor.uid.clone(),
            auth_mode: actor.mode.as_str().to_string(),
            agent_client_id: actor.agent_client_id.clone(),
            quantity,
            unit_price_cents: service.unit_price_cents,
            subtotal_cents: subtotal,
            currency: service.currency.clone(),
            risk_level,
            requires_manual_review: risk_level == RiskLevel::High,
            status: QuoteStatus::Quoted,
            expires_at: now + Duration::minutes(HOLD_MINUTES),
            created_at: now,
        };
        self.store
            .put_doc(
                collections::AGENT_QUOTES,
                quote.quote_id.clone(),
                DocKeys::owner(actor.uid.clone()),
                quote.clone(),
            )
            .await?;
        Ok(quote)
    }
}

// ---------------------------------------------------------------------------
// Reserve
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct ReserveInput {
    pub quote_id: String,
}

#[derive(Debug, Serialize)]
pub struct ReserveOutput {
    pub reservation: AgentReservation,
    pub idempotent_replay: bool,
}

impl CommercePipeline {
    pub async fn reserve(
        &self,
        actor: &ActorContext,
        input: ReserveInput,
    ) -> Result<ReserveOutput, DomainError> {
        let uid = actor.uid.clone();
        let quote_id = input.quote_id.clone();
        let category = {
            // Resolved outside the transaction; the catalog is a config cache.
            let services = self.catalog.services().await?;
            move |service_id: &str| {
                services
                    .iter()
                    .find(|s| s.service_id == service_id)
                    .map(|s| s.category.clone())
                    .unwrap_or_else(|| "general".to_string())
            }
        };
        let agent_client_id = actor.agent_client_id.clone();

        self.store
            .with_tx(move |tx| {
                let now = Utc::now();
                let mut quote: Quote = tx
                    .get(collections::AGENT_QUOTES, &quote_id)?
                    .ok_or_else(|| DomainError::not_found("quote not found"))?;
                if quote.uid != uid {
                    return Err(DomainError::forbidden(
                        "NOT_RESOURCE_OWNER",
                        "the quote belongs to another actor",
                    ));
                }
                if !matches!(quote.status, QuoteStatus::Quoted | QuoteStatus::Reserved)
                    || quote.expires_at <= now
                {
                    return Err(DomainError::gone(
                        "QUOTE_EXPIRED",
                        "the quote is no longer reservable",
                    ));
                }

                let reservation_id = ids::agent_reservation_id(&quote.uid, &quote.quote_id);
                if let Some(existing) =
                    tx.get::<AgentReservation>(collections::AGENT_RESERVATIONS, &reservation_id)?
                {
                    return Ok(ReserveOutput {
                        reservation: existing,
                        idempotent_replay: true,
                    });
                }

                let reservation = AgentReservation {
                    reservation_id: reservation_id.clone(),
                    quote_id: quote.quote_id.clone(),
                    uid: quote.uid.clone(),
                    service_id: quote.service_id.clone(),
                    category: category(&quote.service_id),
                    quantity: quote.quantity,
                    amount_cents: quote.subtotal_cents,
                    currency: quote.currency.clone(),
                    status: if quote.requires_manual_review {
                        AgentReservationStatus::PendingReview
                    } else {
                        AgentReservationStatus::Reserved
                    },
                    hold_expires_at: now + Duration::minutes(HOLD_MINUTES),
                    requires_manual_review: quote.requires_manual_review,
                    agent_client_id,
                    created_at: now,
                    updated_at: now,
                };
                tx.put(
                    collections::AGENT_RESERVATIONS,
                    &reservation_id,
                    &DocKeys::owner(reservation.uid.clone()),
                    &reservation,
                )?;
                quote.status = QuoteStatus::Reserved;
                tx.put(
                    collections::AGENT_QUOTES,
                    &quote.quote_id,
                    &DocKeys::owner(quote.uid.clone()),
                    &quote,
                )?;
                Ok(ReserveOutput {
                    reservation,
                    idempotent_replay: false,
                })
            })
            .await
    }
}

// ---------------------------------------------------------------------------
// Pay
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct PayInput {
    pub reservation_id: String,
    #[serde(default)]
    pub idempotency_key: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct PayOutput {
    pub order: Order,
    pub reservation: AgentReservation,
    pub idempotent_replay: bool,
}

#[derive(Debug, Serialize, Deserialize)]
struct LedgerEntry {
    order_id: String,
    agent_client_id: String,
    amount_cents: i64,
    category: String,
    balance_after_cents: i64,
    at: chrono::DateTime<Utc>,
}

impl CommercePipeline {
    pub async fn pay(
        &self,
        actor: &ActorContext,
        request_id: &str,
        input: PayInput,
    ) -> Result<PayOutput, DomainError> {
        let uid = actor.uid.clone();
        let agent_client_id = actor.agent_client_id.clone();
        let price_lookup = {
            let services = self.catalog.services().await?;
            move |service_id: &str| {
                services
                    .iter()
                    .find(|s| s.service_id == service_id)
                    .and_then(|s| s.price_id.clone())
            }
        };

        // Pre-read for the replay fast-path and the risk gate. The
        // order transaction re-reads everything it writes against.
        let preview: AgentReservation = self
            .store
            .get_doc(collections::AGENT_RESERVATIONS, input.reservation_id.clone())
            .await?
            .ok_or_else(|| DomainError::not_found("agent reservation not found"))?;
        if preview.uid != uid {
            return Err(DomainError::forbidden(
                "NOT_RESOURCE_OWNER",
                "the reservation belongs to another actor",
            ));
        }
        let order_key = input
            .idempotency_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .unwrap_or_else(|| preview.reservation_id.clone());
        let order_id = ids::agent_order_id(&uid, &order_key);
        let existing_order: Option<Order> = self
            .store
            .get_doc(collections::AGENT_ORDERS, order_id.clone())
            .await?;
        if let Some(existing) = existing_order {
            return Ok(PayOutput {
                order: existing,
                reservation: preview,
                idempotent_replay: true,
            });
        }

        // Delegated traffic goes through the risk policy. The gate
        // commits its own bookkeeping (audit row, deny count,
        // threshold suspension) before any deny comes back, so a
        // rejected order still leaves its evidence behind.
        if actor.mode == ActorMode::DelegatedAgent {
            let client_id = agent_client_id.as_deref().ok_or_else(|| {
                DomainError::unauthenticated("delegated actors carry an agent client id")
            })?;
            risk::enforce_order_policy(
                &self.store,
                client_id,
                &uid,
                preview.amount_cents,
                request_id,
            )
            .await?;
        }

        self.store
            .with_tx(move |tx| {
                let now = Utc::now();
                let mut reservation: AgentReservation = tx
                    .get(collections::AGENT_RESERVATIONS, &input.reservation_id)?
                    .ok_or_else(|| DomainError::not_found("agent reservation not found"))?;
                if reservation.uid != uid {
                    return Err(DomainError::forbidden(
                        "NOT_RESOURCE_OWNER",
                        "the reservation belongs to another actor",
                    ));
                }

                // A concurrent duplicate may have landed since the
                // pre-read; replay it rather than double-writing.
                if let Some(existing) = tx.get::<Order>(collections::AGENT_ORDERS, &order_id)? {
                    return Ok(PayOutput {
                        order: existing,
                        reservation,
                        idempotent_replay: true,
                    });
                }

                match reservation.status {
                    AgentReservationStatus::Reserved => {}
                    AgentReservationStatus::PendingReview => {
                        return Err(DomainError::precondition(
                            "MANUAL_REVIEW_PENDING",
                            "the reservation is held for manual review",
                        ));
                    }
                    AgentReservationStatus::Expired | AgentReservationStatus::Cancelled => {
                        return Err(DomainError::gone(
                            "RESERVATION_UNAVAILABLE",
                            "the reservation can no longer be paid",
                        ));
                    }
                    AgentReservationStatus::Paid
                    | AgentReservationStatus::PaymentRequired => {
                        return Err(DomainError::conflict(
                            "RESERVATION_ALREADY_PROCESSED",
                            "the reservation already has an order",
                        ));
                    }
                }
                if reservation.hold_expires_at <= now {
                    return Err(DomainError::gone(
                        "RESERVATION_HOLD_EXPIRED",
                        "the reservation hold lapsed before payment",
                    ));
                }

                // Independent-agent accounts pay from prepaid balance in
                // the same transaction as the order write.
                let mut paid_via_prepay = false;
                if let Some(client_id) = agent_client_id.as_deref() {
                    if let Some(mut account) =
                        tx.get::<AgentAccount>(collections::AGENT_ACCOUNTS, client_id)?
                    {
                        if account.independent_enabled {
                            ledger::apply_spend(
                                &mut account,
                                reservation.amount_cents,
                                &reservation.category,
                                now,
                            )?;
                            tx.put(
                                collections::AGENT_ACCOUNTS,
                                client_id,
                                &DocKeys::default().with_scope(client_id.to_string()),
                                &account,
                            )?;
                            let entry = LedgerEntry {
                                order_id: order_id.clone(),
                                agent_client_id: client_id.to_string(),
                                amount_cents: reservation.amount_cents,
                                category: reservation.category.clone(),
                                balance_after_cents: account.prepaid_balance_cents,
                                at: now,
                            };
                            tx.put(
                                &collections::account_ledger(client_id),
                                &order_id,
                                &DocKeys::owner(uid.clone()).with_scope(client_id.to_string()),
                                &entry,
                            )?;
                            paid_via_prepay = true;
                        }
                    }
                }

                let price_id = price_lookup(&reservation.service_id);
                let (order_status, payment_provider, reservation_status) = if paid_via_prepay {
                    (
                        OrderStatus::Paid,
                        PaymentProvider::InternalPrepay,
                        AgentReservationStatus::Paid,
                    )
                } else {
                    (
                        OrderStatus::PaymentRequired,
                        PaymentProvider::Stripe,
                        AgentReservationStatus::PaymentRequired,
                    )
                };

                let order = Order {
                    order_id: order_id.clone(),
                    uid: uid.clone(),
                    reservation_id: reservation.reservation_id.clone(),
                    amount_cents: reservation.amount_cents,
                    currency: reservation.currency.clone(),
                    status: order_status,
                    payment_status: match order_status {
                        OrderStatus::Paid => "paid".to_string(),
                        _ => "awaiting_payment".to_string(),
                    },
                    fulfillment_status: FulfillmentStatus::Queued,
                    payment_provider,
                    checkout_ready: payment_provider == PaymentProvider::InternalPrepay
                        || price_id.is_some(),
                    price_id,
                    stripe_checkout_session_id: None,
                    stripe_payment_intent_id: None,
                    category: reservation.category.clone(),
                    agent_client_id: agent_client_id.clone(),
                    created_at: now,
                    updated_at: now,
                };
                let mut order_keys = DocKeys::owner(uid.clone());
                if let Some(client_id) = &agent_client_id {
                    order_keys = order_keys.with_scope(client_id.clone());
                }
                tx.put(collections::AGENT_ORDERS, &order_id, &order_keys, &order)?;

                reservation.status = reservation_status;
                reservation.updated_at = now;
                tx.put(
                    collections::AGENT_RESERVATIONS,
                    &reservation.reservation_id,
                    &DocKeys::owner(reservation.uid.clone()),
                    &reservation,
                )?;

                // Consume the quote once an order exists.
                if let Some(mut quote) =
                    tx.get::<Quote>(collections::AGENT_QUOTES, &reservation.quote_id)?
                {
                    quote.status = QuoteStatus::Consumed;
                    tx.put(
                        collections::AGENT_QUOTES,
                        &quote.quote_id,
                        &DocKeys::owner(quote.uid.clone()),
                        &quote,
                    )?;
                }

                Ok(PayOutput {
                    order,
                    reservation,
                    idempotent_replay: false,
                })
            })
            .await
    }
}

// ---------------------------------------------------------------------------
// Status / orders / revenue
// ---------------------------------------------------------------------------

impl CommercePipeline {
    pub async fn status(
        &self,
        actor: &ActorContext,
        reservation_id: &str,
    ) -> Result<Value, DomainError> {
        let reservation: AgentReservation = self
            .store
            .get_doc(collections::AGENT_RESERVATIONS, reservation_id)
            .await?
            .ok_or_else(|| DomainError::not_found("agent reservation not found"))?;
        if reservation.uid != actor.uid && !actor.staff {
            return Err(DomainError::forbidden(
                "NOT_RESOURCE_OWNER",
                "the reservation belongs to another actor",
            ));
        }
        // Orders may be keyed by an idempotency key rather than the
        // reservation id, so match on the stored linkage.
        let orders: Vec<Order> = self
            .store
            .list_by_owner(collections::AGENT_ORDERS, reservation.uid.clone(), None)
            .await?;
        let order = orders
            .into_iter()
            .find(|o| o.reservation_id == reservation.reservation_id);
        Ok(json!({ "reservation": reservation, "order": order }))
    }

    pub async fn get_order(
        &self,
        actor: &ActorContext,
        order_id: &str,
    ) -> Result<Order, DomainError> {
        let order: Order = self
            .store
            .get_doc(collections::AGENT_ORDERS, order_id)
            .await?
            .ok_or_else(|| DomainError::not_found("order not found"))?;
        if order.uid != actor.uid && !actor.staff {
            return Err(DomainError::forbidden(
                "NOT_RESOURCE_OWNER",
                "the order belongs to another actor",
            ));
        }
        Ok(order)
    }

    pub async fn list_orders(
        &self,
        actor: &ActorContext,
        limit: Option<u32>,
    ) -> Result<Vec<Order>, DomainError> {
        let limit = limit.unwrap_or(50).clamp(1, 200);
        self.store
            .list_by_owner(collections::AGENT_ORDERS, actor.uid.clone(), Some(limit))
            .await
    }

    pub async fn revenue_summary(&self, actor: &ActorContext) -> Result<Value, DomainError> {
        let orders: Vec<Order> = if actor.staff {
            self.store
                .with_tx(|tx| tx.list(collections::AGENT_ORDERS))
                .await?
        } else {
            self.store
                .list_by_owner(collections::AGENT_ORDERS, actor.uid.clone(), None)
                .await?
        };
        let mut paid = 0i64;
        let mut awaiting = 0i64;
        let mut refunded = 0i64;
        for order in &orders {
            match order.status {
                OrderStatus::Paid => paid += order.amount_cents,
                OrderStatus::PaymentRequired => awaiting += order.amount_cents,
                OrderStatus::Refunded => refunded += order.amount_cents,
            }
        }
        Ok(json!({
            "order_count": orders.len(),
            "paid_cents": paid,
            "payment_required_cents": awaiting,
            "refunded_cents": refunded,
        }))
    }
}

// ---------------------------------------------------------------------------
// Accounts
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize, Default)]
pub struct AccountUpdateInput {
    pub agent_client_id: String,
    #[serde(default)]
    pub status: Option<AgentAccountStatus>,
    #[serde(default)]
    pub independent_enabled: Option<bool>,
    #[serde(default)]
    pub prepay_required: Option<bool>,
    #[serde(default)]
    pub daily_spend_cap_cents: Option<i64>,
    #[serde(default)]
    pub top_up_cents: Option<i64>,
    #[serde(default)]
    pub category_caps: Option<std::collections::BTreeMap<String, Option<i64>>>,
}

impl CommercePipeline {
    pub async fn account_get(
        &self,
        actor: &ActorContext,
        agent_client_id: Option<&str>,
    ) -> Result<AgentAccount, DomainError> {
        let client_id = match agent_client_id {
            Some(id) if actor.staff => id.to_string(),
            _ => actor.agent_client_id.clone().ok_or_else(|| {
                DomainError::forbidden(
                    "AGENT_CLIENT_REQUIRED",
                    "account reads need an agent client context",
                )
            })?,
        };
        let account = self
            .store
            .get_doc(collections::AGENT_ACCOUNTS, client_id.clone())
            .await?
            .unwrap_or_else(|| AgentAccount::fresh(&client_id, Utc::now()));
        Ok(account)
    }

    pub async fn account_update(
        &self,
        actor: &ActorContext,
        input: AccountUpdateInput,
    ) -> Result<AgentAccount, DomainError> {
        actor.require_staff("agent account administration")?;
        let client_id = input.agent_client_id.clone();
        if client_id.trim().is_empty() {
            return Err(DomainError::invalid(
                "AGENT_CLIENT_REQUIRED",
                "agent_client_id is required",
            ));
        }
        if let Some(top_up) = input.top_up_cents {
            if top_up < 0 {
                return Err(DomainError::invalid(
                    "TOP_UP_NEGATIVE",
                    "top ups must be non-negative",
                ));
            }
        }

        self.store
            .with_tx(move |tx| {
                let now = Utc::now();
                let mut account: AgentAccount = tx
                    .get(collections::AGENT_ACCOUNTS, &client_id)?
                    .unwrap_or_else(|| AgentAccount::fresh(&client_id, now));
                ledger::roll_day(&mut account, now);
                if let Some(status) = input.status {
                    account.status = status;
                }
                if let Some(enabled) = input.independent_enabled {
                    account.independent_enabled = enabled;
                }
                if let Some(prepay) = input.prepay_required {
                    account.prepay_required = prepay;
                }
                if input.daily_spend_cap_cents.is_some() {
                    account.daily_spend_cap_cents =
                        input.daily_spend_cap_cents.filter(|cap| *cap > 0);
                }
                if let Some(top_up) = input.top_up_cents {
                    account.prepaid_balance_cents += top_up;
                }
                if let Some(caps) = &input.category_caps {
                    for (category, cap) in caps {
                        ledger::set_category_cap(&mut account, category, *cap);
                    }
                }
                tx.put(
                    collections::AGENT_ACCOUNTS,
                    &client_id,
                    &DocKeys::default().with_scope(client_id.clone()),
                    &account,
                )?;
                Ok(account)
            })
            .await
    }
}
