//! Continuity export.
//!
//! Aggregates a member's reservation-lifecycle evidence into one
//! versioned, signed bundle. Every source read is independently
//! failure-tolerant: a failed read surfaces under `warnings[]` and
//! never aborts the export.

use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};

use mf_core::actor::ActorContext;
use mf_core::fingerprint::canonical_json;
use mf_core::ids;
use mf_core::token::fnv1a32;
use mf_core::types::{Reservation, EXPORT_SCHEMA_VERSION};
use mf_core::DomainError;
use mf_store::collections;

use crate::engine::{ReservationEngine, StorageAuditRow};

const EXPORT_ROW_CAP: u32 = 1000;

// ---------------------------------------------------------------------------
// Input
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize, Default)]
pub struct ExportContinuityInput {
    #[serde(default)]
    pub owner_uid: Option<String>,
    #[serde(default)]
    pub limit: Option<u32>,
    #[serde(default)]
    pub include_csv: Option<bool>,
}

// ---------------------------------------------------------------------------
// Operation
// ---------------------------------------------------------------------------

impl ReservationEngine {
    pub async fn export_continuity(
        &self,
        actor: &ActorContext,
        request_id: &str,
        input: ExportContinuityInput,
    ) -> Result<Value, DomainError> {
        let owner_uid = input
            .owner_uid
            .clone()
            .filter(|uid| !uid.trim().is_empty())
            .unwrap_or_else(|| actor.uid.clone());
        actor.authorize(&owner_uid, "reservations:export", "continuity export", true)?;

        let limit = input.limit.unwrap_or(EXPORT_ROW_CAP).clamp(1, EXPORT_ROW_CAP);
        let include_csv = input.include_csv.unwrap_or(true);
        let generated_at = Utc::now();
        let mut warnings: Vec<String> = Vec::new();

        let reservations: Vec<Reservation> = match self
            .store
            .list_by_owner(collections::RESERVATIONS, owner_uid.clone(), Some(limit))
            .await
        {
            Ok(rows) => rows,
            Err(err) => {
                warnings.push(format!("reservations read failed: {err}"));
                Vec::new()
            }
        };

        let storage_audit: Vec<StorageAuditRow> = match self
            .store
            .list_by_owner(
                collections::RESERVATION_STORAGE_AUDIT,
                owner_uid.clone(),
                Some(limit),
            )
            .await
        {
            Ok(rows) => rows,
            Err(err) => {
                warnings.push(format!("storage audit read failed: {err}"));
                Vec::new()
            }
        };

        let fairness_audit: Vec<Value> = match self
            .store
            .list_by_owner(
                collections::RESERVATION_QUEUE_FAIRNESS_AUDIT,
                owner_uid.clone(),
                Some(limit),
            )
            .await
        {
            Ok(rows) => rows,
            Err(err) => {
                warnings.push(format!("fairness audit read failed: {err}"));
                Vec::new()
            }
        };

        let notifications: Vec<Value> = match self
            .store
            .list_by_owner(collections::NOTIFICATIONS, owner_uid.clone(), Some(limit))
            .await
        {
            Ok(rows) => rows,
            Err(err) => {
                warnings.push(format!("notifications read failed: {err}"));
                Vec::new()
            }
        };

        // Batch timelines are read per batch; a failed batch read only
        // warns.
        let mut batch_timelines = serde_json::Map::new();
        let mut batch_ids: Vec<String> = reservations
            .iter()
            .filter_map(|r| r.batch_id.clone())
            .collect();
        batch_ids.sort();
        batch_ids.dedup();
        for batch_id in batch_ids {
            let timeline: Result<Vec<Value>, DomainError> = self
                .store
                .list_by_scope(collections::batch_timeline(&batch_id), batch_id.clone())
                .await;
            match timeline {
                Ok(rows) => {
                    batch_timelines.insert(batch_id, Value::Array(rows));
                }
                Err(err) => {
                    warnings.push(format!("batch {batch_id} timeline read failed: {err}"));
                }
            }
        }

        // Summary feeds the signature, so it is computed before signing.
        let mut status_counts = serde_json::Map::new();
        for reservation in &reservations {
            let key = reservation.status.as_str().to_string();
            let count = status_counts
                .get(&key)
                .and_then(Value::as_u64)
                .unwrap_or(0);
            status_counts.insert(key, Value::from(count + 1));
        }
        let summary = json!({
            "reservation_count": reservations.len(),
            "storage_action_count": storage_audit.len(),
            "fairness_action_count": fairness_audit.len(),
            "notification_count": notifications.len(),
            "status_counts": Value::Object(status_counts),
        });

        let generated_at_text = generated_at.to_rfc3339();
        let signature_payload = canonical_json(&json!({
            "request_id": request_id,
            "owner_uid": owner_uid,
            "generated_at": generated_at_text,
            "schema_version": EXPORT_SCHEMA_VERSION,
            "summary": summary,
        }));
        let signature = format!("mfexp_{:08x}", fnv1a32(&signature_payload));

        let redacted: Vec<Value> = reservations.iter().map(redact_reservation).collect();

        let mut formats = vec!["json".to_string()];
        let csv_bundle = if include_csv {
            formats.push("csv".to_string());
            Some(json!({
                "reservations.csv": reservations_csv(&reservations),
                "stage_history.csv": stage_history_csv(&reservations),
                "pieces.csv": pieces_csv(&reservations),
            }))
        } else {
            None
        };

        Ok(json!({
            "header": {
                "artifact_id": ids::deterministic_id("continuity-export", &[owner_uid.as_str(), request_id]),
                "owner_uid": owner_uid,
                "generated_at": generated_at_text,
                "schema_version": EXPORT_SCHEMA_VERSION,
                "format": formats,
                "signature": signature,
                "request_id": request_id,
            },
            "redactions": [
                "pieces[].piece_photo_url",
                "staff_notes",
                "arrival_token",
                "arrival_token_lookup",
            ],
            "summary": summary,
            "bundle": {
                "reservations": redacted,
                "storage_actions": storage_audit,
                "fairness_actions": fairness_audit,
                "notifications": notifications,
                "batch_timelines": Value::Object(batch_timelines),
            },
            "csv": csv_bundle,
            "warnings": warnings,
        }))
    }
}

// ---------------------------------------------------------------------------
// Redaction & CSV rendering
// ---------------------------------------------------------------------------

fn redact_reservation(reservation: &Reservation) -> Value {
    let mut value = serde_json::to_value(reservation).unwrap_or_else(|_| json!({}));
    if let Some(object) = value.as_object_mut() {
        object.remove("arrival_token");
        object.remove("arrival_token_lookup");
        if object.get("staff_notes").is_some_and(|v| !v.is_null()) {
            object.insert("staff_notes".to_string(), Value::String("[redacted]".into()));
        }
        if let Some(pieces) = object.get_mut("pieces").and_then(Value::as_array_mut) {
            for piece in pieces {
                if let Some(piece_obj) = piece.as_object_mut() {
                    if piece_obj
                        .get("piece_photo_url")
                        .is_some_and(|v| !v.is_null())
                    {
                        piece_obj.insert(
                            "piece_photo_url".to_string(),
                            Value::String("[redacted]".into()),
                        );
                    }
                }
            }
        }
    }
    value
}

fn csv_escape(field: &str) -> String {
    if field.contains(',') || field.contains('"') || field.contains('\n') {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

fn csv_row(fields: &[String]) -> String {
    fields
        .iter()
        .map(|f| csv_escape(f))
        .collect::<Vec<_>>()
        .join(",")
}

fn reservations_csv(rows: &[Reservation]) -> String {
    let mut out = String::from(
        "id,status,load_status,intake_mode,firing_type,assigned_station_id,queue_position_hint,estimated_half_shelves,storage_status,created_at\n",
    );
    for r in rows {
        out.push_str(&csv_row(&[
            r.id.clone(),
            r.status.as_str().to_string(),
            r.load_status
                .map(|l| format!("{l:?}").to_ascii_lowercase())
                .unwrap_or_default(),
            format!("{:?}", r.intake_mode),
            format!("{:?}", r.firing_type).to_ascii_lowercase(),
            r.assigned_station_id.clone().unwrap_or_default(),
            r.queue_position_hint
                .map(|p| p.to_string())
                .unwrap_or_default(),
            format!("{:.2}", r.estimate_half_shelves()),
            format!("{:?}", r.storage_status),
            r.created_at.to_rfc3339(),
        ]));
        out.push('\n');
    }
    out
}

fn stage_history_csv(rows: &[Reservation]) -> String {
    let mut out = String::from("reservation_id,stage,at,reason,source\n");
    for r in rows {
        for entry in &r.stage_history {
            out.push_str(&csv_row(&[
                r.id.clone(),
                format!("{:?}", entry.stage).to_ascii_lowercase(),
                entry.at.to_rfc3339(),
                entry.reason.clone(),
                entry.source.clone(),
            ]));
            out.push('\n');
        }
    }
    out
}

fn pieces_csv(rows: &[Reservation]) -> String {
    let mut out = String::from("reservation_id,piece_id,piece_count,piece_status\n");
    for r in rows {
        for piece in &r.pieces {
            out.push_str(&csv_row(&[
                r.id.clone(),
                piece.piece_id.clone(),
                piece.piece_count.to_string(),
                format!("{:?}", piece.piece_status),
            ]));
            out.push('\n');
        }
    }
    out
}
