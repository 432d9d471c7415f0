//! Pickup-window state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use mf_core::actor::ActorContext;
use mf_core::types::{LoadStatus, PickupWindowStatus, Reservation, StorageStatus};
use mf_core::DomainError;

use crate::engine::{
    load_reservation, record_storage_notice, save_reservation, stage_entry, ReservationEngine,
};

// ---------------------------------------------------------------------------
// Input / output
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum PickupWindowAction {
    StaffSetOpenWindow {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        #[serde(default)]
        force: bool,
    },
    MemberConfirmWindow,
    MemberRequestReschedule {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        #[serde(default)]
        force: bool,
    },
    StaffMarkMissed {
        #[serde(default)]
        force: bool,
    },
    StaffMarkCompleted,
}

impl PickupWindowAction {
    fn is_staff_action(&self) -> bool {
        matches!(
            self,
            PickupWindowAction::StaffSetOpenWindow { .. }
                | PickupWindowAction::StaffMarkMissed { .. }
                | PickupWindowAction::StaffMarkCompleted
        )
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PickupWindowInput {
    pub reservation_id: String,
    #[serde(flatten)]
    pub action: PickupWindowAction,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct PickupWindowOutput {
    pub reservation: Reservation,
    #[serde(skip)]
    pub expired: bool,
}

// ---------------------------------------------------------------------------
// Operation
// ---------------------------------------------------------------------------

impl ReservationEngine {
    pub async fn pickup_window(
        &self,
        actor: &ActorContext,
        request_id: &str,
        input: PickupWindowInput,
    ) -> Result<PickupWindowOutput, DomainError> {
        if input.action.is_staff_action() {
            actor.require_staff("pickup window administration")?;
        }
        let actor_tx = actor.clone();
        let request_id = request_id.to_string();

        let output = self
            .store
            .with_tx(move |tx| {
                let now = Utc::now();
                let mut reservation = load_reservation(tx, &input.reservation_id)?;
                actor_tx.authorize(
                    &reservation.owner_uid,
                    "reservations:write",
                    "pickup window",
                    true,
                )?;

                let mut expired = false;
                let reason = match &input.action {
                    PickupWindowAction::StaffSetOpenWindow { start, end, force } => {
                        if *end <= *start {
                            return Err(DomainError::invalid(
                                "PICKUP_WINDOW_INVERTED",
                                "the window end must be after its start",
                            ));
                        }
                        let loaded =
                            matches!(reservation.load_status, Some(LoadStatus::Loaded));
                        if !loaded && !force {
                            return Err(DomainError::conflict(
                                "PICKUP_NOT_READY",
                                "pickup windows open once the reservation is loaded",
                            ));
                        }
                        let window = &mut reservation.pickup_window;
                        window.status = PickupWindowStatus::Open;
                        window.confirmed_start = Some(*start);
                        window.confirmed_end = Some(*end);
                        if window.requested_start.is_none() {
                            window.requested_start = Some(*start);
                            window.requested_end = Some(*end);
                        }
                        window.confirmed_at = None;
                        "pickup_window_opened"
                    }
                    PickupWindowAction::MemberConfirmWindow => {
                        let window = &mut reservation.pickup_window;
                        if window.status != PickupWindowStatus::Open {
                            return Err(DomainError::conflict(
                                "PICKUP_WINDOW_NOT_OPEN",
                                "only an open window can be confirmed",
                            ));
                        }
                        let Some(end) = window.confirmed_end else {
                            return Err(DomainError::conflict(
                                "PICKUP_WINDOW_NOT_SCHEDULED",
                                "the window has no confirmed range yet",
                            ));
                        };
                        if end < now {
                            // The offered range lapsed before confirmation.
                            window.status = PickupWindowStatus::Expired;
                            expired = true;
                            "pickup_window_expired"
                        } else {
                            window.status = PickupWindowStatus::Confirmed;
                            window.confirmed_at = Some(now);
                            "pickup_window_confirmed"
                        }
                    }
                    PickupWindowAction::MemberRequestReschedule { start, end, force } => {
                        if *end <= *start {
                            return Err(DomainError::invalid(
                                "PICKUP_WINDOW_INVERTED",
                                "the window end must be after its start",
                            ));
                        }
                        if *force && !actor_tx.staff {
                            return Err(DomainError::forbidden(
                                "FORCE_REQUIRES_STAFF",
                                "force reschedules are restricted to staff",
                            ));
                        }
                        let window = &mut reservation.pickup_window;
                        if window.reschedule_count >= 1 && !force {
                            return Err(DomainError::conflict(
                                "RESCHEDULE_LIMIT_REACHED",
                                "pickup windows may be rescheduled once",
                            ));
                        }
                        window.requested_start = Some(*start);
                        window.requested_end = Some(*end);
                        window.confirmed_start = None;
                        window.confirmed_end = None;
                        window.confirmed_at = None;
                        window.status = PickupWindowStatus::Open;
                        window.reschedule_count += 1;
                        window.last_reschedule_requested_at = Some(now);
                        "pickup_window_reschedule_requested"
                    }
                    PickupWindowAction::StaffMarkMissed { force } => {
                        let window = &mut reservation.pickup_window;
                        let past_due = window.confirmed_end.is_some_and(|end| end < now);
                        if !past_due && !force {
                            return Err(DomainError::conflict(
                                "PICKUP_WINDOW_NOT_ELAPSED",
                                "the window has not ended yet",
                            ));
                        }
                        window.status = PickupWindowStatus::Missed;
                        window.missed_count += 1;
                        window.last_missed_at = Some(now);
                        reservation.storage_status = if reservation.pickup_window.missed_count >= 2
                        {
                            StorageStatus::StoredByPolicy
                        } else {
                            StorageStatus::HoldPending
                        };
                        "pickup_window_missed"
                    }
                    PickupWindowAction::StaffMarkCompleted => {
                        let window = &mut reservation.pickup_window;
                        window.status = PickupWindowStatus::Completed;
                        window.completed_at = Some(now);
                        reservation.storage_status = StorageStatus::Active;
                        reservation.pickup_reminder_count = 0;
                        "pickup_window_completed"
                    }
                };

                record_storage_notice(
                    tx,
                    &mut reservation,
                    reason,
                    input.notes.clone(),
                    &actor_tx,
                    &request_id,
                    now,
                )?;
                reservation.push_stage(stage_entry(
                    reservation.stage_status.stage,
                    reason,
                    input.notes.clone(),
                    &actor_tx,
                    now,
                ));
                reservation.updated_at = now;
                save_reservation(tx, &reservation)?;
                Ok(PickupWindowOutput {
                    reservation,
                    expired,
                })
            })
            .await?;

        if output.expired {
            // The expiry was persisted; surface it to the caller.
            return Err(DomainError::conflict(
                "PICKUP_WINDOW_EXPIRED",
                "the offered pickup window lapsed before confirmation",
            ));
        }
        Ok(output)
    }
}
