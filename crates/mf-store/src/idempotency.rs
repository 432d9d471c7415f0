//! Idempotency ledger.
//!
//! One slot per `(actor, operation, key)`. A reader sees exactly one of
//! absent / replay / conflict; writers use create semantics and treat an
//! already-existing row as success. Recording a response after the
//! business transaction is opportunistic: a lost ledger row only costs
//! replay protection, never correctness.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use mf_core::{ids, DomainError};

use crate::doc_store::{DocKeys, DocStore};

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

pub const MAX_IDEMPOTENCY_KEY_LEN: usize = 120;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdempotencyRecord {
    pub actor_uid: String,
    pub operation: String,
    pub idempotency_key: String,
    pub request_fingerprint: String,
    pub response_data: Value,
    pub response_version: u32,
    pub request_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug)]
pub enum IdempotencyOutcome {
    /// No prior record; execute the operation.
    Absent,
    /// Same fingerprint seen before; return the stored response.
    Replay(IdempotencyRecord),
    /// Key reused with a different payload.
    Conflict,
}

// ---------------------------------------------------------------------------
// Ledger
// ---------------------------------------------------------------------------

pub struct IdempotencyLedger {
    store: Arc<DocStore>,
    collection: &'static str,
    operation_prefix: &'static str,
}

impl IdempotencyLedger {
    pub fn new(
        store: Arc<DocStore>,
        collection: &'static str,
        operation_prefix: &'static str,
    ) -> Self {
        Self {
            store,
            collection,
            operation_prefix,
        }
    }

    fn slot_id(&self, operation: &str, actor_uid: &str, key: &str) -> String {
        ids::idempotency_id(
            &format!("{}-{}", self.operation_prefix, operation),
            actor_uid,
            key,
        )
    }

    /// Consult the ledger before executing an operation.
    pub async fn begin(
        &self,
        operation: &str,
        actor_uid: &str,
        key: &str,
        fingerprint: &str,
    ) -> Result<IdempotencyOutcome, DomainError> {
        let id = self.slot_id(operation, actor_uid, key);
        let existing: Option<IdempotencyRecord> =
            self.store.get_doc(self.collection, id).await?;
        match existing {
            None => Ok(IdempotencyOutcome::Absent),
            Some(record) if record.request_fingerprint == fingerprint => {
                Ok(IdempotencyOutcome::Replay(record))
            }
            Some(_) => Ok(IdempotencyOutcome::Conflict),
        }
    }

    /// Persist the response for future replays. Best-effort: failures
    /// are logged and swallowed; the business write already committed.
    pub async fn record(
        &self,
        operation: &str,
        actor_uid: &str,
        key: &str,
        fingerprint: &str,
        response_data: Value,
        request_id: &str,
    ) {
        let id = self.slot_id(operation, actor_uid, key);
        let now = Utc::now();
        let record = IdempotencyRecord {
            actor_uid: actor_uid.to_string(),
            operation: operation.to_string(),
            idempotency_key: key.to_string(),
            request_fingerprint: fingerprint.to_string(),
            response_data,
            response_version: 1,
            request_id: request_id.to_string(),
            created_at: now,
            updated_at: now,
        };
        let collection = self.collection;
        let keys = DocKeys::owner(actor_uid.to_string());
        let result = self
            .store
            .with_tx(move |tx| tx.create(collection, &id, &keys, &record))
            .await;
        match result {
            Ok(_inserted) => {}
            Err(err) => {
                warn!(operation, actor_uid, error = %err, "idempotency record write failed");
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Normalize an optional idempotency key from body and header forms.
/// Both must agree when both are present; keys are capped at 120 chars.
pub fn normalize_idempotency_key(
    body_key: Option<&str>,
    header_key: Option<&str>,
) -> Result<Option<String>, DomainError> {
    let key = match (body_key, header_key) {
        (Some(b), Some(h)) if b != h => {
            return Err(DomainError::invalid(
                "IDEMPOTENCY_KEY_MISMATCH",
                "body idempotencyKey and x-idempotency-key header disagree",
            ));
        }
        (Some(b), _) => Some(b),
        (None, Some(h)) => Some(h),
        (None, None) => None,
    };
    match key {
        None => Ok(None),
        Some(k) => {
            let trimmed = k.trim();
            if trimmed.is_empty() {
                return Ok(None);
            }
            if trimmed.len() > MAX_IDEMPOTENCY_KEY_LEN {
                return Err(DomainError::invalid(
                    "IDEMPOTENCY_KEY_TOO_LONG",
                    format!("idempotency keys are capped at {MAX_IDEMPOTENCY_KEY_LEN} characters"),
                ));
            }
            Ok(Some(trimmed.to_string()))
        }
    }
}

/// Overlay the channel-specific replay flag onto a stored response.
/// With a channel (`"loan"`, `"fee"`) the flag lands inside that object;
/// otherwise it goes on the top level.
pub fn overlay_replay_flag(mut response: Value, channel: Option<&str>) -> Value {
    if let Some(name) = channel {
        if let Some(inner) = response.get_mut(name).and_then(Value::as_object_mut) {
            inner.insert("idempotent_replay".to_string(), Value::Bool(true));
        }
    }
    if let Some(top) = response.as_object_mut() {
        top.insert("idempotent_replay".to_string(), Value::Bool(true));
    }
    response
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ledger(store: Arc<DocStore>) -> IdempotencyLedger {
        IdempotencyLedger::new(store, "libraryLoanIdempotency", "library-loan")
    }

    #[tokio::test]
    async fn absent_then_replay() {
        let store = Arc::new(DocStore::open_in_memory().await.unwrap());
        let ledger = ledger(store);

        let outcome = ledger.begin("checkout", "u1", "k1", "fp1").await.unwrap();
        assert!(matches!(outcome, IdempotencyOutcome::Absent));

        ledger
            .record("checkout", "u1", "k1", "fp1", json!({"loan": {"id": "l1"}}), "req_x")
            .await;

        match ledger.begin("checkout", "u1", "k1", "fp1").await.unwrap() {
            IdempotencyOutcome::Replay(record) => {
                assert_eq!(record.response_data["loan"]["id"], "l1");
                assert_eq!(record.request_id, "req_x");
            }
            other => panic!("expected replay, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn fingerprint_mismatch_is_conflict() {
        let store = Arc::new(DocStore::open_in_memory().await.unwrap());
        let ledger = ledger(store);
        ledger
            .record("checkout", "u1", "k1", "fp1", json!({}), "req_x")
            .await;
        let outcome = ledger.begin("checkout", "u1", "k1", "fp2").await.unwrap();
        assert!(matches!(outcome, IdempotencyOutcome::Conflict));
    }

    #[tokio::test]
    async fn slots_are_namespaced_by_actor_and_operation() {
        let store = Arc::new(DocStore::open_in_memory().await.unwrap());
        let ledger = ledger(store);
        ledger
            .record("checkout", "u1", "k1", "fp1", json!({}), "req_x")
            .await;

        // Same key, different actor: fresh slot.
        assert!(matches!(
            ledger.begin("checkout", "u2", "k1", "fp1").await.unwrap(),
            IdempotencyOutcome::Absent
        ));
        // Same key, different operation: fresh slot.
        assert!(matches!(
            ledger.begin("checkIn", "u1", "k1", "fp1").await.unwrap(),
            IdempotencyOutcome::Absent
        ));
    }

    #[test]
    fn key_normalization_rules() {
        assert_eq!(
            normalize_idempotency_key(Some("k1"), Some("k1")).unwrap(),
            Some("k1".to_string())
        );
        assert_eq!(
            normalize_idempotency_key(None, Some("k2")).unwrap(),
            Some("k2".to_string())
        );
        assert_eq!(normalize_idempotency_key(None, None).unwrap(), None);
        assert!(normalize_idempotency_key(Some("a"), Some("b")).is_err());
        let long = "x".repeat(121);
        assert!(normalize_idempotency_key(Some(&long), None).is_err());
    }

    #[test]
    fn replay_flag_lands_in_channel() {
        let resp = json!({"loan": {"id": "l1"}});
        let flagged = overlay_replay_flag(resp, Some("loan"));
        assert_eq!(flagged["loan"]["idempotent_replay"], true);

        let top = overlay_replay_flag(json!({"ok": 1}), None);
        assert_eq!(top["idempotent_replay"], true);
    }
}
