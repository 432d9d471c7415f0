//! Status and load-status updates.

use chrono::Utc;
use serde::{Deserialize, Serialize};

use mf_core::actor::ActorContext;
use mf_core::types::{
    IntakeMode, LoadStatus, Reservation, ReservationStatus, Stage,
};
use mf_core::DomainError;
use mf_store::collections;
use mf_store::{DocKeys, TxContext};

use crate::engine::{
    load_reservation, mint_arrival_token, record_storage_notice, save_reservation, stage_entry,
    ReservationEngine,
};

// ---------------------------------------------------------------------------
// Input / output
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct UpdateReservationInput {
    pub reservation_id: String,
    #[serde(default)]
    pub status: Option<ReservationStatus>,
    #[serde(default)]
    pub load_status: Option<LoadStatus>,
    #[serde(default)]
    pub staff_notes: Option<String>,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub batch_id: Option<String>,
    #[serde(default)]
    pub force: bool,
}

#[derive(Debug, Serialize)]
pub struct UpdateReservationOutput {
    pub reservation: Reservation,
}

// ---------------------------------------------------------------------------
// Operation
// ---------------------------------------------------------------------------

impl ReservationEngine {
    pub async fn update(
        &self,
        actor: &ActorContext,
        request_id: &str,
        input: UpdateReservationInput,
    ) -> Result<UpdateReservationOutput, DomainError> {
        if input.force && !actor.staff {
            return Err(DomainError::forbidden(
                "FORCE_REQUIRES_STAFF",
                "force transitions are restricted to staff",
            ));
        }
        if input.staff_notes.is_some() && !actor.staff {
            return Err(DomainError::forbidden(
                "STAFF_ONLY",
                "staff notes are restricted to staff",
            ));
        }

        let actor_tx = actor.clone();
        let request_id = request_id.to_string();
        let stations = self.stations.clone();

        let output = self
            .store
            .with_tx(move |tx| {
                let now = Utc::now();
                let mut reservation = load_reservation(tx, &input.reservation_id)?;
                actor_tx.authorize(
                    &reservation.owner_uid,
                    "reservations:write",
                    "reservation",
                    true,
                )?;

                let from = reservation.status;
                let mut reasons: Vec<String> = Vec::new();

                if let Some(target) = input.status {
                    if !from.can_transition_to(&target) && !input.force {
                        return Err(DomainError::conflict(
                            format!(
                                "INVALID_STATUS_TRANSITION:{}->{}",
                                from.as_str(),
                                target.as_str()
                            ),
                            format!(
                                "a reservation in {} cannot move to {}",
                                from.as_str(),
                                target.as_str()
                            ),
                        ));
                    }

                    // Confirmation mints a fresh arrival token.
                    if target == ReservationStatus::Confirmed
                        && (from != ReservationStatus::Confirmed
                            || reservation.arrival_token_version == 0)
                    {
                        mint_arrival_token(&mut reservation, now);
                        reservation.arrival_status =
                            mf_core::types::ArrivalStatus::Expected;
                        reservation.arrived_at = None;
                        reasons.push("arrival_token_issued".to_string());
                    }
                    if target == ReservationStatus::Cancelled
                        && from != ReservationStatus::Cancelled
                    {
                        reservation.cancelled_at = Some(now);
                    }
                    reservation.status = target;
                }

                if let Some(new_load) = input.load_status {
                    apply_load_transition(
                        tx,
                        &stations,
                        &mut reservation,
                        new_load,
                        input.force,
                        &actor_tx,
                        &request_id,
                    )?;
                }

                if let Some(batch_id) = &input.batch_id {
                    reservation.batch_id = Some(batch_id.clone());
                }
                if let Some(notes) = &input.staff_notes {
                    reservation.append_staff_note(notes);
                }

                let stage = stage_for(&reservation);
                let reason = input.reason.clone().unwrap_or_else(|| {
                    format!(
                        "status_changed:{}->{}",
                        from.as_str(),
                        reservation.status.as_str()
                    )
                });
                reasons.insert(0, reason);
                reservation.push_stage(stage_entry(
                    stage,
                    reasons.join(","),
                    input.notes.clone(),
                    &actor_tx,
                    now,
                ));
                reservation.updated_at = now;

                save_reservation(tx, &reservation)?;
                Ok(UpdateReservationOutput { reservation })
            })
            .await?;

        self.spawn_queue_recompute(output.reservation.assigned_station_id.clone());
        Ok(output)
    }
}

/// Stage bucket implied by the current status/load pair.
fn stage_for(reservation: &Reservation) -> Stage {
    if reservation.status == ReservationStatus::Cancelled {
        Stage::Canceled
    } else if matches!(reservation.load_status, Some(LoadStatus::Loaded))
        || reservation.status == ReservationStatus::Loaded
    {
        Stage::Loaded
    } else {
        Stage::Queued
    }
}

/// Apply a load-status change, enforcing station capacity and running
/// the first-load side effects.
fn apply_load_transition(
    tx: &mut TxContext<'_>,
    stations: &mf_core::station::StationRegistry,
    reservation: &mut Reservation,
    new_load: LoadStatus,
    force: bool,
    actor: &ActorContext,
    request_id: &str,
) -> Result<(), DomainError> {
    let now = Utc::now();
    let was_relevant = reservation.is_capacity_relevant();

    // Entering the capacity-relevant set must not overflow the station.
    if !was_relevant
        && reservation.intake_mode != IntakeMode::CommunityShelf
        && reservation.status != ReservationStatus::Cancelled
    {
        if let Some(station_id) = reservation.assigned_station_id.clone() {
            let capacity = stations
                .capacity_of(&station_id)
                .ok_or_else(|| DomainError::invalid("STATION_UNKNOWN", "station not registered"))?;
            let rows: Vec<Reservation> =
                tx.list_by_scope(collections::RESERVATIONS, &station_id)?;
            let used: f64 = rows
                .iter()
                .filter(|r| r.id != reservation.id && r.is_capacity_relevant())
                .map(Reservation::estimate_half_shelves)
                .sum();
            if !force && used + reservation.estimate_half_shelves() > f64::from(capacity) {
                return Err(DomainError::conflict_with(
                    "STATION_CAPACITY_EXCEEDED",
                    "Station is at capacity",
                    serde_json::json!({
                        "stationId": station_id,
                        "capacityHalfShelves": capacity,
                        "usedHalfShelves": used,
                    }),
                ));
            }
        }
    }

    let first_load = new_load == LoadStatus::Loaded && reservation.ready_for_pickup_at.is_none();
    reservation.load_status = Some(new_load);

    if first_load {
        reservation.ready_for_pickup_at = Some(now);
        reservation.pickup_reminder_count = 0;
        // Make sure the pickup window has a concrete confirmed range.
        if reservation.pickup_window.confirmed_start.is_none() {
            reservation.pickup_window.confirmed_start = reservation.pickup_window.requested_start;
        }
        if reservation.pickup_window.confirmed_end.is_none() {
            reservation.pickup_window.confirmed_end = reservation.pickup_window.requested_end;
        }
        record_storage_notice(
            tx,
            reservation,
            "pickup_ready",
            None,
            actor,
            request_id,
            now,
        )?;
        if let Some(batch_id) = reservation.batch_id.clone() {
            append_batch_timeline(tx, &batch_id, reservation, now)?;
        }
    }
    Ok(())
}

#[derive(Debug, Serialize, Deserialize)]
struct BatchTimelineEntry {
    reservation_id: String,
    event: String,
    at: chrono::DateTime<Utc>,
}

fn append_batch_timeline(
    tx: &mut TxContext<'_>,
    batch_id: &str,
    reservation: &Reservation,
    now: chrono::DateTime<Utc>,
) -> Result<(), DomainError> {
    let entry = BatchTimelineEntry {
        reservation_id: reservation.id.clone(),
        event: "reservation_loaded".to_string(),
        at: now,
    };
    let id = format!("{}:{}", reservation.id, now.timestamp_millis());
    tx.put(
        &collections::batch_timeline(batch_id),
        &id,
        &DocKeys::owner(reservation.owner_uid.clone()).with_scope(batch_id.to_string()),
        &entry,
    )
}
