use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::warn;

use mf_core::actor::ActorContext;
use mf_core::station::StationRegistry;
use mf_core::token;
use mf_core::types::{Reservation, Stage, StageEntry, StorageNotice};
use mf_core::DomainError;
use mf_store::collections;
use mf_store::{DocKeys, DocStore, TxContext};

// ---------------------------------------------------------------------------
// ReservationEngine
// ---------------------------------------------------------------------------

/// The reservation engine. Cheap to clone; all state lives behind Arcs.
#[derive(Clone)]
pub struct ReservationEngine {
    pub(crate) store: Arc<DocStore>,
    pub(crate) stations: Arc<StationRegistry>,
}

impl ReservationEngine {
    pub fn new(store: Arc<DocStore>, stations: Arc<StationRegistry>) -> Self {
        Self { store, stations }
    }

    pub fn stations(&self) -> &StationRegistry {
        &self.stations
    }

    // -- Reads --------------------------------------------------------------

    /// Fetch one reservation, authorized for its owner (staff may read any).
    pub async fn get(
        &self,
        actor: &ActorContext,
        reservation_id: &str,
    ) -> Result<Reservation, DomainError> {
        let reservation: Reservation = self
            .store
            .get_doc(collections::RESERVATIONS, reservation_id)
            .await?
            .ok_or_else(|| DomainError::not_found("reservation not found"))?;
        actor.authorize(
            &reservation.owner_uid,
            "reservations:read",
            "reservation",
            true,
        )?;
        Ok(reservation)
    }

    /// List reservations for an owner, most recent first.
    pub async fn list(
        &self,
        actor: &ActorContext,
        owner_uid: Option<&str>,
        limit: Option<u32>,
    ) -> Result<Vec<Reservation>, DomainError> {
        let owner = owner_uid.unwrap_or(&actor.uid).to_string();
        actor.authorize(&owner, "reservations:read", "reservation list", true)?;
        let limit = limit.unwrap_or(50).clamp(1, 200);
        self.store
            .list_by_owner(collections::RESERVATIONS, owner, Some(limit))
            .await
    }

    // -- Shared helpers -----------------------------------------------------

    /// Queue-hint recompute, detached from the calling request. A
    /// failed recompute logs a warning and is retried by the next write
    /// that touches the station.
    pub(crate) fn spawn_queue_recompute(&self, station_id: Option<String>) {
        let Some(station_id) = station_id else {
            return;
        };
        let engine = self.clone();
        tokio::spawn(async move {
            if let Err(err) = engine.recompute_station_queue(&station_id).await {
                warn!(station = %station_id, error = %err, "queue recompute failed");
            }
        });
    }
}

// ---------------------------------------------------------------------------
// Transaction-side helpers (free functions used by the op modules)
// ---------------------------------------------------------------------------

pub(crate) fn reservation_keys(reservation: &Reservation) -> DocKeys {
    let mut keys = DocKeys::owner(reservation.owner_uid.clone());
    if let Some(station) = &reservation.assigned_station_id {
        keys = keys.with_scope(station.clone());
    }
    if let Some(lookup) = &reservation.arrival_token_lookup {
        keys = keys.with_lookup(lookup.clone());
    }
    keys
}

pub(crate) fn load_reservation(
    tx: &TxContext<'_>,
    reservation_id: &str,
) -> Result<Reservation, DomainError> {
    tx.get(collections::RESERVATIONS, reservation_id)?
        .ok_or_else(|| DomainError::not_found("reservation not found"))
}

pub(crate) fn save_reservation(
    tx: &mut TxContext<'_>,
    reservation: &Reservation,
) -> Result<(), DomainError> {
    tx.put(
        collections::RESERVATIONS,
        &reservation.id,
        &reservation_keys(reservation),
        reservation,
    )
}

pub(crate) fn stage_entry(
    stage: Stage,
    reason: impl Into<String>,
    notes: Option<String>,
    actor: &ActorContext,
    now: DateTime<Utc>,
) -> StageEntry {
    StageEntry {
        stage,
        at: now,
        source: "api".to_string(),
        reason: reason.into(),
        notes,
        actor_uid: Some(actor.uid.clone()),
        actor_role: Some(if actor.staff { "staff" } else { "member" }.to_string()),
    }
}

/// Mint (or rotate) the arrival token for a reservation.
pub(crate) fn mint_arrival_token(reservation: &mut Reservation, now: DateTime<Utc>) {
    reservation.arrival_token_version += 1;
    let token_value = token::format_arrival_token(&reservation.id, reservation.arrival_token_version);
    reservation.arrival_token_lookup = Some(token::normalize_lookup_key(&token_value));
    reservation.arrival_token = Some(token_value);
    reservation.arrival_token_issued_at = Some(now);
    reservation.arrival_token_expires_at = Some(token::arrival_token_expiry(
        now,
        reservation
            .preferred_window
            .as_ref()
            .and_then(|w| w.latest),
    ));
}

/// Append a storage notice on the reservation and mirror it into the
/// storage audit collection.
pub(crate) fn record_storage_notice(
    tx: &mut TxContext<'_>,
    reservation: &mut Reservation,
    kind: &str,
    notes: Option<String>,
    actor: &ActorContext,
    request_id: &str,
    now: DateTime<Utc>,
) -> Result<(), DomainError> {
    reservation.push_storage_notice(StorageNotice {
        kind: kind.to_string(),
        at: now,
        notes: notes.clone(),
        actor_uid: Some(actor.uid.clone()),
    });
    let audit = StorageAuditRow {
        reservation_id: reservation.id.clone(),
        owner_uid: reservation.owner_uid.clone(),
        kind: kind.to_string(),
        notes,
        actor_uid: actor.uid.clone(),
        request_id: request_id.to_string(),
        at: now,
    };
    let audit_id = format!("{}:{}:{}", reservation.id, kind, reservation.storage_notice_history.len());
    tx.put(
        collections::RESERVATION_STORAGE_AUDIT,
        &audit_id,
        &DocKeys::owner(reservation.owner_uid.clone())
            .with_scope(reservation.id.clone())
            .with_lookup(kind.to_string()),
        &audit,
    )
}

#[derive(Debug, Clone, Serialize, serde::Deserialize)]
pub(crate) struct StorageAuditRow {
    pub reservation_id: String,
    pub owner_uid: String,
    pub kind: String,
    pub notes: Option<String>,
    pub actor_uid: String,
    pub request_id: String,
    pub at: DateTime<Utc>,
}
