//! Station assignment and capacity enforcement.

use chrono::Utc;
use serde::{Deserialize, Serialize};

use mf_core::actor::ActorContext;
use mf_core::station::StationRegistry;
use mf_core::types::{IntakeMode, Reservation};
use mf_core::DomainError;
use mf_store::collections;

use crate::engine::{load_reservation, save_reservation, stage_entry, ReservationEngine};

// ---------------------------------------------------------------------------
// Input / output
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct AssignStationInput {
    pub reservation_id: String,
    pub assigned_station_id: String,
    #[serde(default)]
    pub queue_class: Option<String>,
    #[serde(default)]
    pub required_resources: Option<Vec<String>>,
}

#[derive(Debug, Serialize)]
pub struct AssignStationOutput {
    pub reservation: Reservation,
    pub idempotent_replay: bool,
    #[serde(skip)]
    pub previous_station: Option<String>,
}

// ---------------------------------------------------------------------------
// Operation
// ---------------------------------------------------------------------------

impl ReservationEngine {
    pub async fn assign_station(
        &self,
        actor: &ActorContext,
        input: AssignStationInput,
    ) -> Result<AssignStationOutput, DomainError> {
        let station_id = StationRegistry::normalize_id(&input.assigned_station_id);
        let capacity = self.stations.capacity_of(&station_id).ok_or_else(|| {
            DomainError::invalid(
                "STATION_UNKNOWN",
                format!("station `{station_id}` is not registered"),
            )
        })?;
        let actor_tx = actor.clone();

        let output = self
            .store
            .with_tx(move |tx| {
                let now = Utc::now();
                let mut reservation = load_reservation(tx, &input.reservation_id)?;
                actor_tx.authorize(
                    &reservation.owner_uid,
                    "reservations:write",
                    "station assignment",
                    true,
                )?;

                let previous_station = reservation.assigned_station_id.clone();
                let queue_class = input
                    .queue_class
                    .clone()
                    .map(|c| c.trim().to_ascii_lowercase())
                    .filter(|c| !c.is_empty());

                let unchanged = previous_station.as_deref() == Some(station_id.as_str())
                    && (queue_class.is_none() || queue_class == reservation.queue_class)
                    && input.required_resources.is_none();
                if unchanged {
                    return Ok(AssignStationOutput {
                        reservation,
                        idempotent_replay: true,
                        previous_station,
                    });
                }

                let station_changed =
                    previous_station.as_deref() != Some(station_id.as_str());
                if station_changed && reservation.intake_mode != IntakeMode::CommunityShelf {
                    let rows: Vec<Reservation> =
                        tx.list_by_scope(collections::RESERVATIONS, &station_id)?;
                    let used: f64 = rows
                        .iter()
                        .filter(|r| r.id != reservation.id && r.is_capacity_relevant())
                        .map(Reservation::estimate_half_shelves)
                        .sum();
                    let prospective = used + reservation.estimate_half_shelves();
                    if prospective > f64::from(capacity) {
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

                reservation.assigned_station_id = Some(station_id.clone());
                if let Some(class) = queue_class {
                    reservation.queue_class = Some(class);
                }
                if let Some(resources) = input.required_resources.clone() {
                    reservation.required_resources = resources;
                }
                reservation.push_stage(stage_entry(
                    reservation.stage_status.stage,
                    format!("station_assigned:{station_id}"),
                    None,
                    &actor_tx,
                    now,
                ));
                reservation.updated_at = now;
                save_reservation(tx, &reservation)?;
                Ok(AssignStationOutput {
                    reservation,
                    idempotent_replay: false,
                    previous_station,
                })
            })
            .await?;

        if !output.idempotent_replay {
            if output.previous_station.as_deref()
                != output.reservation.assigned_station_id.as_deref()
            {
                self.spawn_queue_recompute(output.previous_station.clone());
            }
            self.spawn_queue_recompute(output.reservation.assigned_station_id.clone());
        }
        Ok(output)
    }
}
