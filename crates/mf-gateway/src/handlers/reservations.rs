use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value;

use mf_core::actor::ActorContext;
use mf_core::DomainError;
use mf_engine::{
    AssignStationInput, CheckInInput, CreateReservationInput, ExportContinuityInput,
    PickupWindowInput, QueueFairnessInput, UpdateReservationInput,
};

use crate::event_bus::StudioEvent;
use crate::state::ApiState;

use super::{parse, to_value};

#[derive(Debug, Deserialize)]
struct GetInput {
    reservation_id: String,
}

#[derive(Debug, Deserialize, Default)]
struct ListInput {
    #[serde(default)]
    owner_uid: Option<String>,
    #[serde(default)]
    limit: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct LookupInput {
    arrival_token: String,
}

pub(crate) async fn dispatch(
    state: &Arc<ApiState>,
    actor: &ActorContext,
    request_id: &str,
    op: &str,
    body: Value,
) -> Result<Value, DomainError> {
    match op {
        "reservations.create" => {
            let input: CreateReservationInput = parse(&body)?;
            let output = state.engine.create(actor, input).await?;
            state.event_bus.publish(StudioEvent::ReservationChanged {
                reservation_id: output.reservation.id.clone(),
                owner_uid: output.reservation.owner_uid.clone(),
                status: output.reservation.status.as_str().to_string(),
            });
            to_value(output)
        }
        "reservations.get" => {
            let input: GetInput = parse(&body)?;
            let reservation = state.engine.get(actor, &input.reservation_id).await?;
            to_value(reservation)
        }
        "reservations.list" => {
            let input: ListInput = parse(&body)?;
            let rows = state
                .engine
                .list(actor, input.owner_uid.as_deref(), input.limit)
                .await?;
            to_value(rows)
        }
        "reservations.checkIn" => {
            let input: CheckInInput = parse(&body)?;
            let output = state.engine.check_in(actor, request_id, input).await?;
            state.event_bus.publish(StudioEvent::StorageNotice {
                reservation_id: output.reservation.id.clone(),
                owner_uid: output.reservation.owner_uid.clone(),
                notice: "arrival_recorded".to_string(),
            });
            to_value(output)
        }
        "reservations.lookupArrival" => {
            let input: LookupInput = parse(&body)?;
            let output = state.engine.lookup_arrival(actor, &input.arrival_token).await?;
            to_value(output)
        }
        "reservations.rotateArrivalToken" => {
            let input: GetInput = parse(&body)?;
            let output = state
                .engine
                .rotate_arrival_token(actor, &input.reservation_id)
                .await?;
            to_value(output)
        }
        "reservations.pickupWindow" => {
            let input: PickupWindowInput = parse(&body)?;
            let output = state.engine.pickup_window(actor, request_id, input).await?;
            state.event_bus.publish(StudioEvent::StorageNotice {
                reservation_id: output.reservation.id.clone(),
                owner_uid: output.reservation.owner_uid.clone(),
                notice: format!("{:?}", output.reservation.pickup_window.status),
            });
            to_value(output)
        }
        "reservations.queueFairness" => {
            let input: QueueFairnessInput = parse(&body)?;
            let output = state.engine.queue_fairness(actor, request_id, input).await?;
            to_value(output)
        }
        "reservations.update" => {
            let input: UpdateReservationInput = parse(&body)?;
            let output = state.engine.update(actor, request_id, input).await?;
            state.event_bus.publish(StudioEvent::ReservationChanged {
                reservation_id: output.reservation.id.clone(),
                owner_uid: output.reservation.owner_uid.clone(),
                status: output.reservation.status.as_str().to_string(),
            });
            to_value(output)
        }
        "reservations.assignStation" => {
            let input: AssignStationInput = parse(&body)?;
            let output = state.engine.assign_station(actor, input).await?;
            to_value(output)
        }
        "reservations.exportContinuity" => {
            let input: ExportContinuityInput = parse(&body)?;
            state.engine.export_continuity(actor, request_id, input).await
        }
        _ => Err(DomainError::not_found("unknown route")),
    }
}
