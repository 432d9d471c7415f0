//! Loan operations with the shared idempotency discipline.

use std::sync::Arc;

use chrono::{Duration, Utc};
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use mf_core::actor::ActorContext;
use mf_core::fingerprint::operation_fingerprint;
use mf_core::ids;
use mf_core::DomainError;
use mf_store::idempotency::{normalize_idempotency_key, overlay_replay_flag};
use mf_store::{collections, DocKeys, DocStore, IdempotencyLedger, IdempotencyOutcome, TxContext};

use crate::types::{
    ItemStatus, LibraryItem, Loan, LoanStatus, ReplacementFee, LOAN_TERM_DAYS, RENEWAL_LIMIT,
};

// ---------------------------------------------------------------------------
// Inputs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct CheckoutInput {
    pub item_id: String,
    #[serde(default)]
    pub borrower_uid: Option<String>,
    #[serde(default)]
    pub idempotency_key: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CheckInInput {
    pub loan_id: String,
    #[serde(default)]
    pub idempotency_key: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MarkLostInput {
    pub loan_id: String,
    #[serde(default)]
    pub idempotency_key: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AssessFeeInput {
    pub loan_id: String,
    #[serde(default)]
    pub amount_cents: Option<i64>,
    #[serde(default)]
    pub idempotency_key: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OverrideStatusInput {
    pub item_id: String,
    pub status: ItemStatus,
}

// ---------------------------------------------------------------------------
// LibraryService
// ---------------------------------------------------------------------------

pub struct LibraryService {
    store: Arc<DocStore>,
    ledger: IdempotencyLedger,
}

impl LibraryService {
    pub fn new(store: Arc<DocStore>) -> Self {
        let ledger = IdempotencyLedger::new(
            store.clone(),
            collections::LIBRARY_LOAN_IDEMPOTENCY,
            "library-loan",
        );
        Self { store, ledger }
    }

    /// Shared idempotency wrapper: consult the ledger, run the business
    /// transaction, then record the response opportunistically.
    async fn idempotent<F, Fut>(
        &self,
        operation: &str,
        actor_uid: &str,
        key: Option<String>,
        fingerprint: String,
        channel: &str,
        request_id: &str,
        business: F,
    ) -> Result<Value, DomainError>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<Value, DomainError>>,
    {
        if let Some(key) = &key {
            match self
                .ledger
                .begin(operation, actor_uid, key, &fingerprint)
                .await?
            {
                IdempotencyOutcome::Replay(record) => {
                    return Ok(overlay_replay_flag(record.response_data, Some(channel)));
                }
                IdempotencyOutcome::Conflict => {
                    return Err(DomainError::conflict(
                        "IDEMPOTENCY_KEY_CONFLICT",
                        "this idempotency key was used with a different payload",
                    ));
                }
                IdempotencyOutcome::Absent => {}
            }
        }
        let response = business().await?;
        if let Some(key) = &key {
            self.ledger
                .record(
                    operation,
                    actor_uid,
                    key,
                    &fingerprint,
                    response.clone(),
                    request_id,
                )
                .await;
        }
        Ok(response)
    }

    // -- Checkout -----------------------------------------------------------

    pub async fn checkout(
        &self,
        actor: &ActorContext,
        request_id: &str,
        header_key: Option<&str>,
        input: CheckoutInput,
    ) -> Result<Value, DomainError> {
        let borrower_uid = input
            .borrower_uid
            .clone()
            .filter(|uid| !uid.trim().is_empty())
            .unwrap_or_else(|| actor.uid.clone());
        actor.authorize(&borrower_uid, "library:write", "library checkout", true)?;

        let key = normalize_idempotency_key(input.idempotency_key.as_deref(), header_key)?;
        let fingerprint = operation_fingerprint(
            "checkout",
            &json!({ "item_id": input.item_id, "borrower_uid": borrower_uid }),
        );
        let store = self.store.clone();
        let item_id = input.item_id.clone();
        let loan_id = match &key {
            Some(k) => ids::deterministic_id(
                "library-loan-doc",
                &[borrower_uid.as_str(), item_id.as_str(), k.as_str()],
            ),
            None => format!("loan-{}", Uuid::new_v4().as_simple()),
        };
        let borrower = borrower_uid.clone();

        self.idempotent(
            "checkout",
            &actor.uid,
            key,
            fingerprint,
            "loan",
            request_id,
            move || async move {
                store
                    .with_tx(move |tx| {
                        // A lost ledger row must not double-borrow a copy.
                        if let Some(existing) =
                            tx.get::<Loan>(collections::LIBRARY_LOANS, &loan_id)?
                        {
                            return Ok(json!({ "loan": existing }));
                        }

                        let now = Utc::now();
                        let mut item: LibraryItem = tx
                            .get(collections::LIBRARY_ITEMS, &item_id)?
                            .ok_or_else(|| DomainError::not_found("library item not found"))?;
                        if item.deleted_at.is_some() {
                            return Err(DomainError::not_found("library item not found"));
                        }
                        if !item.media_type.is_lendable() {
                            return Err(DomainError::precondition(
                                "ITEM_NOT_LENDABLE",
                                "this media type cannot be checked out",
                            ));
                        }
                        if matches!(
                            item.status,
                            ItemStatus::Lost | ItemStatus::Archived | ItemStatus::Unavailable
                        ) {
                            return Err(DomainError::conflict(
                                "ITEM_UNAVAILABLE",
                                format!("the item is {:?}", item.status),
                            ));
                        }
                        if item.available_copies < 1 {
                            return Err(DomainError::conflict(
                                "NO_COPIES_AVAILABLE",
                                "every copy is already checked out",
                            ));
                        }

                        item.available_copies -= 1;
                        item.status = if item.available_copies > 0 {
                            ItemStatus::Available
                        } else {
                            ItemStatus::CheckedOut
                        };
                        tx.put(
                            collections::LIBRARY_ITEMS,
                            &item.item_id,
                            &DocKeys::default(),
                            &item,
                        )?;

                        let loan = Loan {
                            loan_id: loan_id.clone(),
                            item_id: item.item_id.clone(),
                            borrower_uid: borrower.clone(),
                            status: LoanStatus::CheckedOut,
                            loaned_at: now,
                            due_at: now + Duration::days(LOAN_TERM_DAYS),
                            returned_at: None,
                            renewal_limit: RENEWAL_LIMIT,
                            renewal_count: 0,
                            replacement_value_cents: item.replacement_value_cents,
                            replacement_fee_id: None,
                            replacement_fee_status: None,
                            replacement_fee_amount_cents: None,
                        };
                        tx.put(
                            collections::LIBRARY_LOANS,
                            &loan.loan_id,
                            &DocKeys::owner(loan.borrower_uid.clone())
                                .with_scope(loan.item_id.clone()),
                            &loan,
                        )?;
                        Ok(json!({ "loan": loan, "idempotent_replay": false }))
                    })
                    .await
            },
        )
        .await
    }

    // -- Check-in -----------------------------------------------------------

    pub async fn check_in(
        &self,
        actor: &ActorContext,
        request_id: &str,
        header_key: Option<&str>,
        input: CheckInInput,
    ) -> Result<Value, DomainError> {
        let key = normalize_idempotency_key(input.idempotency_key.as_deref(), header_key)?;
        let fingerprint =
            operation_fingerprint("checkIn", &json!({ "loan_id": input.loan_id }));
        let store = self.store.clone();
        let loan_id = input.loan_id.clone();
        let actor_tx = actor.clone();

        self.idempotent(
            "checkIn",
            &actor.uid,
            key,
            fingerprint,
            "loan",
            request_id,
            move || async move {
                store
                    .with_tx(move |tx| {
                        let now = Utc::now();
                        let mut loan: Loan = tx
                            .get(collections::LIBRARY_LOANS, &loan_id)?
                            .ok_or_else(|| DomainError::not_found("loan not found"))?;
                        actor_tx.authorize(
                            &loan.borrower_uid,
                            "library:write",
                            "loan check-in",
                            true,
                        )?;

                        match loan.status {
                            LoanStatus::Returned => {
                                return Ok(json!({
                                    "loan": loan,
                                    "idempotent_replay": true,
                                }));
                            }
                            LoanStatus::CheckedOut
                            | LoanStatus::Overdue
                            | LoanStatus::ReturnRequested => {}
                            other => {
                                return Err(DomainError::conflict(
                                    "LOAN_NOT_RETURNABLE",
                                    format!("a {other:?} loan cannot be checked in"),
                                ));
                            }
                        }

                        loan.status = LoanStatus::Returned;
                        loan.returned_at = Some(now);
                        save_loan(tx, &loan)?;

                        if let Some(mut item) =
                            tx.get::<LibraryItem>(collections::LIBRARY_ITEMS, &loan.item_id)?
                        {
                            item.available_copies =
                                (item.available_copies + 1).min(item.total_copies);
                            item.status = ItemStatus::Available;
                            tx.put(
                                collections::LIBRARY_ITEMS,
                                &item.item_id,
                                &DocKeys::default(),
                                &item,
                            )?;
                        }
                        Ok(json!({ "loan": loan, "idempotent_replay": false }))
                    })
                    .await
            },
        )
        .await
    }

    // -- Mark lost ----------------------------------------------------------

    pub async fn mark_lost(
        &self,
        actor: &ActorContext,
        request_id: &str,
        header_key: Option<&str>,
        input: MarkLostInput,
    ) -> Result<Value, DomainError> {
        actor.require_staff("marking loans lost")?;
        let key = normalize_idempotency_key(input.idempotency_key.as_deref(), header_key)?;
        let fingerprint =
            operation_fingerprint("markLost", &json!({ "loan_id": input.loan_id }));
        let store = self.store.clone();
        let loan_id = input.loan_id.clone();

        self.idempotent(
            "markLost",
            &actor.uid,
            key,
            fingerprint,
            "loan",
            request_id,
            move || async move {
                store
                    .with_tx(move |tx| {
                        let mut loan: Loan = tx
                            .get(collections::LIBRARY_LOANS, &loan_id)?
                            .ok_or_else(|| DomainError::not_found("loan not found"))?;
                        match loan.status {
                            LoanStatus::Lost => {
                                return Ok(json!({
                                    "loan": loan,
                                    "idempotent_replay": true,
                                }));
                            }
                            LoanStatus::Returned => {
                                return Err(DomainError::conflict(
                                    "LOAN_ALREADY_RETURNED",
                                    "a returned loan cannot be marked lost",
                                ));
                            }
                            LoanStatus::CheckedOut
                            | LoanStatus::Overdue
                            | LoanStatus::ReturnRequested => {}
                            other => {
                                return Err(DomainError::conflict(
                                    "LOAN_NOT_LOSABLE",
                                    format!("a {other:?} loan cannot be marked lost"),
                                ));
                            }
                        }
                        loan.status = LoanStatus::Lost;
                        save_loan(tx, &loan)?;
                        Ok(json!({ "loan": loan, "idempotent_replay": false }))
                    })
                    .await
            },
        )
        .await
    }

    // -- Assess replacement fee ---------------------------------------------

    pub async fn assess_replacement_fee(
        &self,
        actor: &ActorContext,
        request_id: &str,
        header_key: Option<&str>,
        input: AssessFeeInput,
    ) -> Result<Value, DomainError> {
        actor.require_staff("replacement fee assessment")?;
        let key = normalize_idempotency_key(input.idempotency_key.as_deref(), header_key)?;
        let fingerprint = operation_fingerprint(
            "assessReplacementFee",
            &json!({ "loan_id": input.loan_id, "amount_cents": input.amount_cents }),
        );
        let store = self.store.clone();
        let loan_id = input.loan_id.clone();
        let explicit_amount = input.amount_cents;
        let staff_uid = actor.uid.clone();

        self.idempotent(
            "assessReplacementFee",
            &actor.uid,
            key,
            fingerprint,
            "fee",
            request_id,
            move || async move {
                store
                    .with_tx(move |tx| {
                        let now = Utc::now();
                        let mut loan: Loan = tx
                            .get(collections::LIBRARY_LOANS, &loan_id)?
                            .ok_or_else(|| DomainError::not_found("loan not found"))?;
                        if loan.status != LoanStatus::Lost {
                            return Err(DomainError::precondition(
                                "LOAN_NOT_LOST",
                                "fees are assessed on lost loans only",
                            ));
                        }
                        if let Some(existing_id) = &loan.replacement_fee_id {
                            if let Some(existing) = tx
                                .get::<ReplacementFee>(
                                    collections::LIBRARY_REPLACEMENT_FEES,
                                    existing_id,
                                )?
                            {
                                return Ok(json!({
                                    "fee": existing,
                                    "loan": loan,
                                    "idempotent_replay": true,
                                }));
                            }
                        }

                        let item: Option<LibraryItem> =
                            tx.get(collections::LIBRARY_ITEMS, &loan.item_id)?;
                        let fallback = loan
                            .replacement_value_cents
                            .max(item.map(|i| i.replacement_value_cents).unwrap_or(0));
                        let amount_cents = explicit_amount.unwrap_or(fallback);
                        if amount_cents < 1 {
                            return Err(DomainError::precondition(
                                "FEE_AMOUNT_REQUIRED",
                                "the replacement fee must be at least one cent",
                            ));
                        }

                        let fee = ReplacementFee {
                            fee_id: ids::deterministic_id("library-fee", &[&loan.loan_id]),
                            loan_id: loan.loan_id.clone(),
                            item_id: loan.item_id.clone(),
                            borrower_uid: loan.borrower_uid.clone(),
                            amount_cents,
                            status: "pending_charge".to_string(),
                            assessed_by_uid: staff_uid.clone(),
                            assessed_at: now,
                        };
                        tx.put(
                            collections::LIBRARY_REPLACEMENT_FEES,
                            &fee.fee_id,
                            &DocKeys::owner(fee.borrower_uid.clone()),
                            &fee,
                        )?;

                        loan.replacement_fee_id = Some(fee.fee_id.clone());
                        loan.replacement_fee_status = Some("assessed".to_string());
                        loan.replacement_fee_amount_cents = Some(amount_cents);
                        save_loan(tx, &loan)?;
                        Ok(json!({ "fee": fee, "loan": loan, "idempotent_replay": false }))
                    })
                    .await
            },
        )
        .await
    }

    // -- Reads & staff overrides --------------------------------------------

    pub async fn list_mine(
        &self,
        actor: &ActorContext,
        limit: Option<u32>,
    ) -> Result<Vec<Loan>, DomainError> {
        let limit = limit.unwrap_or(50).clamp(1, 200);
        self.store
            .list_by_owner(collections::LIBRARY_LOANS, actor.uid.clone(), Some(limit))
            .await
    }

    pub async fn override_item_status(
        &self,
        actor: &ActorContext,
        input: OverrideStatusInput,
    ) -> Result<LibraryItem, DomainError> {
        actor.require_staff("item status overrides")?;
        let item_id = input.item_id.clone();
        self.store
            .with_tx(move |tx| {
                let mut item: LibraryItem = tx
                    .get(collections::LIBRARY_ITEMS, &item_id)?
                    .ok_or_else(|| DomainError::not_found("library item not found"))?;
                item.status = input.status;
                tx.put(
                    collections::LIBRARY_ITEMS,
                    &item.item_id,
                    &DocKeys::default(),
                    &item,
                )?;
                Ok(item)
            })
            .await
    }

    /// Seed or replace an item record (used by fixtures and staff tooling).
    pub async fn upsert_item(&self, item: LibraryItem) -> Result<(), DomainError> {
        self.store
            .put_doc(
                collections::LIBRARY_ITEMS,
                item.item_id.clone(),
                DocKeys::default(),
                item,
            )
            .await
    }
}

fn save_loan(tx: &mut TxContext<'_>, loan: &Loan) -> Result<(), DomainError> {
    tx.put(
        collections::LIBRARY_LOANS,
        &loan.loan_id,
        &DocKeys::owner(loan.borrower_uid.clone()).with_scope(loan.item_id.clone()),
        loan,
    )
}
