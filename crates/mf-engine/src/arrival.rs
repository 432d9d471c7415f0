//! Arrival check-in, token lookup, and token rotation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use mf_core::actor::ActorContext;
use mf_core::token;
use mf_core::types::{ArrivalStatus, Reservation, ReservationStatus, Stage};
use mf_core::DomainError;
use mf_store::collections;
use mf_store::TxContext;

use crate::engine::{
    load_reservation, mint_arrival_token, record_storage_notice, save_reservation, stage_entry,
    ReservationEngine,
};

// ---------------------------------------------------------------------------
// Inputs / outputs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize, Default)]
pub struct CheckInInput {
    #[serde(default)]
    pub reservation_id: Option<String>,
    #[serde(default)]
    pub arrival_token: Option<String>,
    #[serde(default)]
    pub note: Option<String>,
    #[serde(default)]
    pub photo_url: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CheckInOutput {
    pub reservation: Reservation,
    pub idempotent_replay: bool,
}

#[derive(Debug, Serialize)]
pub struct LookupArrivalOutput {
    pub reservation_id: String,
    pub owner_uid: String,
    pub status: ReservationStatus,
    pub arrival_status: ArrivalStatus,
    pub assigned_station_id: Option<String>,
    pub arrival_token_expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
pub struct RotateTokenOutput {
    pub reservation_id: String,
    pub arrival_token: String,
    pub arrival_token_version: u32,
    pub arrival_token_expires_at: Option<DateTime<Utc>>,
}

// ---------------------------------------------------------------------------
// Operations
// ---------------------------------------------------------------------------

impl ReservationEngine {
    /// Door check-in by reservation id or arrival token.
    pub async fn check_in(
        &self,
        actor: &ActorContext,
        request_id: &str,
        input: CheckInInput,
    ) -> Result<CheckInOutput, DomainError> {
        if input.reservation_id.is_none() && input.arrival_token.is_none() {
            return Err(DomainError::invalid(
                "ARRIVAL_TARGET_REQUIRED",
                "provide a reservation_id or an arrival_token",
            ));
        }
        let actor_tx = actor.clone();
        let request_id = request_id.to_string();

        self.store
            .with_tx(move |tx| {
                let now = Utc::now();
                let mut reservation = resolve_reservation(tx, &input)?;
                actor_tx.authorize(
                    &reservation.owner_uid,
                    "reservations:write",
                    "reservation check-in",
                    true,
                )?;

                match reservation.status {
                    ReservationStatus::Cancelled => {
                        return Err(DomainError::conflict(
                            "RESERVATION_CANCELLED",
                            "cancelled reservations cannot check in",
                        ));
                    }
                    ReservationStatus::Confirmed
                    | ReservationStatus::ConfirmedArrived
                    | ReservationStatus::Loaded => {}
                    other => {
                        return Err(DomainError::conflict(
                            "ARRIVAL_NOT_READY",
                            format!(
                                "a reservation in {} is not ready for arrival check-in",
                                other.as_str()
                            ),
                        ));
                    }
                }

                // Re-presenting the token without new evidence is a replay.
                if reservation.arrival_status == ArrivalStatus::Arrived
                    && input.note.is_none()
                    && input.photo_url.is_none()
                {
                    return Ok(CheckInOutput {
                        reservation,
                        idempotent_replay: true,
                    });
                }

                if reservation.arrival_status != ArrivalStatus::Arrived {
                    reservation.arrival_status = ArrivalStatus::Arrived;
                    reservation.arrived_at = Some(now);
                }
                reservation.push_stage(stage_entry(
                    Stage::Queued,
                    "arrival_checked_in",
                    input.note.clone(),
                    &actor_tx,
                    now,
                ));
                record_storage_notice(
                    tx,
                    &mut reservation,
                    "arrival_recorded",
                    input.note.clone(),
                    &actor_tx,
                    &request_id,
                    now,
                )?;
                reservation.updated_at = now;
                save_reservation(tx, &reservation)?;
                Ok(CheckInOutput {
                    reservation,
                    idempotent_replay: false,
                })
            })
            .await
    }

    /// Resolve an arrival token to its reservation without mutating it.
    pub async fn lookup_arrival(
        &self,
        actor: &ActorContext,
        arrival_token: &str,
    ) -> Result<LookupArrivalOutput, DomainError> {
        if !actor.has_scopes(&["reservations:read"]) {
            return Err(DomainError::forbidden(
                "MISSING_SCOPE",
                "scope `reservations:read` is required for arrival lookup",
            ));
        }
        let token_value = arrival_token.to_string();
        self.store
            .with_tx(move |tx| {
                let reservation = lookup_by_token(tx, &token_value)?
                    .ok_or_else(|| DomainError::not_found("no reservation for that token"))?;
                Ok(LookupArrivalOutput {
                    reservation_id: reservation.id,
                    owner_uid: reservation.owner_uid,
                    status: reservation.status,
                    arrival_status: reservation.arrival_status,
                    assigned_station_id: reservation.assigned_station_id,
                    arrival_token_expires_at: reservation.arrival_token_expires_at,
                })
            })
            .await
    }

    /// Rotate a reservation's arrival token (staff only).
    pub async fn rotate_arrival_token(
        &self,
        actor: &ActorContext,
        reservation_id: &str,
    ) -> Result<RotateTokenOutput, DomainError> {
        actor.require_staff("arrival token rotation")?;
        let actor_tx = actor.clone();
        let reservation_id = reservation_id.to_string();

        self.store
            .with_tx(move |tx| {
                let now = Utc::now();
                let mut reservation = load_reservation(tx, &reservation_id)?;
                let was_arrived = reservation.arrival_status == ArrivalStatus::Arrived;
                mint_arrival_token(&mut reservation, now);
                reservation.arrival_status = if was_arrived {
                    ArrivalStatus::Arrived
                } else {
                    ArrivalStatus::Expected
                };
                reservation.push_stage(stage_entry(
                    reservation.stage_status.stage,
                    "arrival_token_rotated",
                    None,
                    &actor_tx,
                    now,
                ));
                reservation.updated_at = now;
                save_reservation(tx, &reservation)?;
                Ok(RotateTokenOutput {
                    reservation_id: reservation.id.clone(),
                    arrival_token: reservation
                        .arrival_token
                        .clone()
                        .unwrap_or_default(),
                    arrival_token_version: reservation.arrival_token_version,
                    arrival_token_expires_at: reservation.arrival_token_expires_at,
                })
            })
            .await
    }
}

// ---------------------------------------------------------------------------
// Resolution helpers
// ---------------------------------------------------------------------------

fn resolve_reservation(
    tx: &TxContext<'_>,
    input: &CheckInInput,
) -> Result<Reservation, DomainError> {
    if let Some(id) = &input.reservation_id {
        return load_reservation(tx, id);
    }
    let token_value = input
        .arrival_token
        .as_deref()
        .unwrap_or_default();
    lookup_by_token(tx, token_value)?
        .ok_or_else(|| DomainError::not_found("no reservation for that token"))
}

/// Normalized-key lookup with an exact-token scan fallback for rows
/// written before the lookup column existed.
fn lookup_by_token(
    tx: &TxContext<'_>,
    presented: &str,
) -> Result<Option<Reservation>, DomainError> {
    let key = token::normalize_lookup_key(presented);
    if key.is_empty() {
        return Ok(None);
    }
    if let Some((_, reservation)) =
        tx.get_by_lookup::<Reservation>(collections::RESERVATIONS, &key)?
    {
        return Ok(Some(reservation));
    }
    let rows: Vec<Reservation> = tx.list(collections::RESERVATIONS)?;
    Ok(rows.into_iter().find(|r| {
        r.arrival_token
            .as_deref()
            .is_some_and(|stored| token::tokens_match(presented, stored))
    }))
}
