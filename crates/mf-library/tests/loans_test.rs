//! Loan lifecycle and idempotency discipline.

use std::sync::Arc;

use chrono::{Duration, Utc};
use mf_core::actor::ActorContext;
use mf_library::loans::{
    AssessFeeInput, CheckInInput, CheckoutInput, MarkLostInput, OverrideStatusInput,
};
use mf_library::{ItemStatus, LibraryItem, LibraryService, MediaType};
use mf_store::DocStore;

async fn service() -> LibraryService {
    let store = Arc::new(DocStore::open_in_memory().await.unwrap());
    LibraryService::new(store)
}

fn item(item_id: &str, copies: u32) -> LibraryItem {
    LibraryItem {
        item_id: item_id.to_string(),
        title: "Glazes of the Southwest".to_string(),
        isbn10: None,
        isbn13: Some("9780000000000".to_string()),
        media_type: MediaType::Book,
        total_copies: copies,
        available_copies: copies,
        status: ItemStatus::Available,
        replacement_value_cents: 4_500,
        deleted_at: None,
    }
}

fn member(uid: &str) -> ActorContext {
    ActorContext::session(uid)
}

fn staff() -> ActorContext {
    ActorContext::staff_session("staff1")
}

fn checkout_input(item_id: &str, key: Option<&str>) -> CheckoutInput {
    serde_json::from_value(serde_json::json!({
        "item_id": item_id,
        "idempotency_key": key,
    }))
    .unwrap()
}

#[tokio::test]
async fn checkout_decrements_copies_and_sets_due_date() {
    let service = service().await;
    service.upsert_item(item("book-1", 2)).await.unwrap();

    let response = service
        .checkout(&member("u1"), "req_1", None, checkout_input("book-1", None))
        .await
        .unwrap();
    let loan = &response["loan"];
    assert_eq!(loan["status"], "checked_out");
    assert_eq!(loan["borrower_uid"], "u1");

    let due = chrono::DateTime::parse_from_rfc3339(loan["due_at"].as_str().unwrap()).unwrap();
    let loaned = chrono::DateTime::parse_from_rfc3339(loan["loaned_at"].as_str().unwrap()).unwrap();
    assert_eq!(due - loaned, Duration::days(28));
}

#[tokio::test]
async fn last_copy_marks_item_checked_out() {
    let service = service().await;
    service.upsert_item(item("book-1", 1)).await.unwrap();

    service
        .checkout(&member("u1"), "req_1", None, checkout_input("book-1", None))
        .await
        .unwrap();
    let err = service
        .checkout(&member("u2"), "req_2", None, checkout_input("book-1", None))
        .await
        .unwrap_err();
    assert_eq!(err.reason(), Some("NO_COPIES_AVAILABLE"));
}

#[tokio::test]
async fn idempotency_replay_and_conflict() {
    let service = service().await;
    service.upsert_item(item("book-1", 3)).await.unwrap();
    service.upsert_item(item("book-2", 3)).await.unwrap();
    let actor = member("u1");

    let first = service
        .checkout(&actor, "req_1", None, checkout_input("book-1", Some("k1")))
        .await
        .unwrap();
    assert_eq!(first["idempotent_replay"], false);
    let loan_id = first["loan"]["loan_id"].as_str().unwrap().to_string();

    // Same key, same payload: replayed, flag overlaid on the loan.
    let replay = service
        .checkout(&actor, "req_2", None, checkout_input("book-1", Some("k1")))
        .await
        .unwrap();
    assert_eq!(replay["loan"]["loan_id"], loan_id.as_str());
    assert_eq!(replay["loan"]["idempotent_replay"], true);

    // Same key, different item: conflict.
    let err = service
        .checkout(&actor, "req_3", None, checkout_input("book-2", Some("k1")))
        .await
        .unwrap_err();
    assert_eq!(err.http_status(), 409);
    assert_eq!(err.reason(), Some("IDEMPOTENCY_KEY_CONFLICT"));
}

#[tokio::test]
async fn header_and_body_keys_must_agree() {
    let service = service().await;
    service.upsert_item(item("book-1", 1)).await.unwrap();
    let err = service
        .checkout(
            &member("u1"),
            "req_1",
            Some("other"),
            checkout_input("book-1", Some("k1")),
        )
        .await
        .unwrap_err();
    assert_eq!(err.reason(), Some("IDEMPOTENCY_KEY_MISMATCH"));
}

#[tokio::test]
async fn check_in_restores_copies_and_is_idempotent() {
    let service = service().await;
    service.upsert_item(item("book-1", 1)).await.unwrap();
    let actor = member("u1");

    let out = service
        .checkout(&actor, "req_1", None, checkout_input("book-1", None))
        .await
        .unwrap();
    let loan_id = out["loan"]["loan_id"].as_str().unwrap().to_string();

    let input: CheckInInput =
        serde_json::from_value(serde_json::json!({ "loan_id": &loan_id })).unwrap();
    let returned = service
        .check_in(&actor, "req_2", None, input.clone())
        .await
        .unwrap();
    assert_eq!(returned["loan"]["status"], "returned");
    assert_eq!(returned["idempotent_replay"], false);

    // A second check-in of a returned loan replays.
    let replay = service.check_in(&actor, "req_3", None, input).await.unwrap();
    assert_eq!(replay["idempotent_replay"], true);

    // The copy is available again.
    service
        .checkout(&member("u2"), "req_4", None, checkout_input("book-1", None))
        .await
        .unwrap();
}

#[tokio::test]
async fn only_borrower_or_staff_can_check_in() {
    let service = service().await;
    service.upsert_item(item("book-1", 1)).await.unwrap();
    let out = service
        .checkout(&member("u1"), "req_1", None, checkout_input("book-1", None))
        .await
        .unwrap();
    let loan_id = out["loan"]["loan_id"].as_str().unwrap().to_string();
    let input: CheckInInput =
        serde_json::from_value(serde_json::json!({ "loan_id": &loan_id })).unwrap();

    let err = service
        .check_in(&member("u2"), "req_2", None, input.clone())
        .await
        .unwrap_err();
    assert_eq!(err.http_status(), 403);

    service.check_in(&staff(), "req_3", None, input).await.unwrap();
}

#[tokio::test]
async fn mark_lost_flow_and_fee_assessment() {
    let service = service().await;
    service.upsert_item(item("book-1", 1)).await.unwrap();
    let out = service
        .checkout(&member("u1"), "req_1", None, checkout_input("book-1", None))
        .await
        .unwrap();
    let loan_id = out["loan"]["loan_id"].as_str().unwrap().to_string();

    // Members cannot mark loans lost.
    let lost_input: MarkLostInput =
        serde_json::from_value(serde_json::json!({ "loan_id": &loan_id })).unwrap();
    let err = service
        .mark_lost(&member("u1"), "req_2", None, lost_input.clone())
        .await
        .unwrap_err();
    assert_eq!(err.reason(), Some("STAFF_ONLY"));

    // Fee before lost: precondition.
    let fee_input: AssessFeeInput =
        serde_json::from_value(serde_json::json!({ "loan_id": &loan_id })).unwrap();
    let err = service
        .assess_replacement_fee(&staff(), "req_3", None, fee_input.clone())
        .await
        .unwrap_err();
    assert_eq!(err.http_status(), 412);
    assert_eq!(err.reason(), Some("LOAN_NOT_LOST"));

    let lost = service
        .mark_lost(&staff(), "req_4", None, lost_input.clone())
        .await
        .unwrap();
    assert_eq!(lost["loan"]["status"], "lost");

    // Marking lost twice replays.
    let replay = service
        .mark_lost(&staff(), "req_5", None, lost_input)
        .await
        .unwrap();
    assert_eq!(replay["idempotent_replay"], true);

    // Fee defaults to the larger replacement value.
    let assessed = service
        .assess_replacement_fee(&staff(), "req_6", None, fee_input)
        .await
        .unwrap();
    assert_eq!(assessed["fee"]["amount_cents"], 4_500);
    assert_eq!(assessed["fee"]["status"], "pending_charge");
    assert_eq!(assessed["loan"]["replacement_fee_status"], "assessed");
}

#[tokio::test]
async fn explicit_fee_amount_must_be_positive() {
    let service = service().await;
    let mut zero_value = item("book-1", 1);
    zero_value.replacement_value_cents = 0;
    service.upsert_item(zero_value).await.unwrap();
    let out = service
        .checkout(&member("u1"), "req_1", None, checkout_input("book-1", None))
        .await
        .unwrap();
    let loan_id = out["loan"]["loan_id"].as_str().unwrap().to_string();

    let lost_input: MarkLostInput =
        serde_json::from_value(serde_json::json!({ "loan_id": &loan_id })).unwrap();
    service
        .mark_lost(&staff(), "req_2", None, lost_input)
        .await
        .unwrap();

    let fee_input: AssessFeeInput =
        serde_json::from_value(serde_json::json!({ "loan_id": &loan_id })).unwrap();
    let err = service
        .assess_replacement_fee(&staff(), "req_3", None, fee_input)
        .await
        .unwrap_err();
    assert_eq!(err.reason(), Some("FEE_AMOUNT_REQUIRED"));
}

#[tokio::test]
async fn returned_loans_cannot_be_marked_lost() {
    let service = service().await;
    service.upsert_item(item("book-1", 1)).await.unwrap();
    let out = service
        .checkout(&member("u1"), "req_1", None, checkout_input("book-1", None))
        .await
        .unwrap();
    let loan_id = out["loan"]["loan_id"].as_str().unwrap().to_string();
    let check_in: CheckInInput =
        serde_json::from_value(serde_json::json!({ "loan_id": &loan_id })).unwrap();
    service
        .check_in(&member("u1"), "req_2", None, check_in)
        .await
        .unwrap();

    let lost_input: MarkLostInput =
        serde_json::from_value(serde_json::json!({ "loan_id": &loan_id })).unwrap();
    let err = service
        .mark_lost(&staff(), "req_3", None, lost_input)
        .await
        .unwrap_err();
    assert_eq!(err.reason(), Some("LOAN_ALREADY_RETURNED"));
}

#[tokio::test]
async fn unlendable_and_unavailable_items_are_refused() {
    let service = service().await;
    let mut digital = item("digital-1", 1);
    digital.media_type = MediaType::Digital;
    service.upsert_item(digital).await.unwrap();
    let err = service
        .checkout(
            &member("u1"),
            "req_1",
            None,
            checkout_input("digital-1", None),
        )
        .await
        .unwrap_err();
    assert_eq!(err.reason(), Some("ITEM_NOT_LENDABLE"));

    let mut archived = item("arch-1", 1);
    archived.status = ItemStatus::Archived;
    service.upsert_item(archived).await.unwrap();
    let err = service
        .checkout(&member("u1"), "req_2", None, checkout_input("arch-1", None))
        .await
        .unwrap_err();
    assert_eq!(err.reason(), Some("ITEM_UNAVAILABLE"));

    let mut deleted = item("gone-1", 1);
    deleted.deleted_at = Some(Utc::now());
    service.upsert_item(deleted).await.unwrap();
    let err = service
        .checkout(&member("u1"), "req_3", None, checkout_input("gone-1", None))
        .await
        .unwrap_err();
    assert_eq!(err.http_status(), 404);
}

#[tokio::test]
async fn list_mine_and_override_status() {
    let service = service().await;
    service.upsert_item(item("book-1", 2)).await.unwrap();
    service
        .checkout(&member("u1"), "req_1", None, checkout_input("book-1", None))
        .await
        .unwrap();
    service
        .checkout(&member("u2"), "req_2", None, checkout_input("book-1", None))
        .await
        .unwrap();

    let mine = service.list_mine(&member("u1"), None).await.unwrap();
    assert_eq!(mine.len(), 1);
    assert_eq!(mine[0].borrower_uid, "u1");

    let overridden = service
        .override_item_status(
            &staff(),
            OverrideStatusInput {
                item_id: "book-1".to_string(),
                status: ItemStatus::Unavailable,
            },
        )
        .await
        .unwrap();
    assert_eq!(overridden.status, ItemStatus::Unavailable);

    let err = service
        .override_item_status(
            &member("u1"),
            OverrideStatusInput {
                item_id: "book-1".to_string(),
                status: ItemStatus::Available,
            },
        )
        .await
        .unwrap_err();
    assert_eq!(err.reason(), Some("STAFF_ONLY"));
}
