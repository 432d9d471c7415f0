//! Queue-fairness administration (staff only).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use mf_core::actor::ActorContext;
use mf_core::ids;
use mf_core::types::{
    FairnessRole, QueueFairness, QueueFairnessPolicy, MAX_OVERRIDE_BOOST,
};
use mf_core::DomainError;
use mf_store::collections;
use mf_store::DocKeys;

use crate::engine::{load_reservation, save_reservation, stage_entry, ReservationEngine};

// ---------------------------------------------------------------------------
// Input / output
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum FairnessAction {
    RecordNoShow,
    RecordLateArrival,
    SetOverrideBoost {
        boost_points: u32,
        #[serde(default)]
        override_until: Option<DateTime<Utc>>,
    },
    ClearOverride,
}

impl FairnessAction {
    fn name(&self) -> &'static str {
        match self {
            FairnessAction::RecordNoShow => "record_no_show",
            FairnessAction::RecordLateArrival => "record_late_arrival",
            FairnessAction::SetOverrideBoost { .. } => "set_override_boost",
            FairnessAction::ClearOverride => "clear_override",
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct QueueFairnessInput {
    pub reservation_id: String,
    #[serde(flatten)]
    pub action: FairnessAction,
    pub reason: String,
}

#[derive(Debug, Serialize)]
pub struct QueueFairnessOutput {
    pub reservation_id: String,
    pub queue_fairness: QueueFairness,
    pub queue_fairness_policy: QueueFairnessPolicy,
    pub evidence_id: String,
    #[serde(skip)]
    pub assigned_station_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct FairnessEvidence {
    reservation_id: String,
    owner_uid: String,
    action: String,
    reason: String,
    no_show_count: u32,
    late_arrival_count: u32,
    override_boost: u32,
    policy: QueueFairnessPolicy,
    actor_uid: String,
    request_id: String,
    at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Operation
// ---------------------------------------------------------------------------

impl ReservationEngine {
    pub async fn queue_fairness(
        &self,
        actor: &ActorContext,
        request_id: &str,
        input: QueueFairnessInput,
    ) -> Result<QueueFairnessOutput, DomainError> {
        actor.require_staff("queue fairness administration")?;
        if input.reason.trim().is_empty() {
            return Err(DomainError::invalid(
                "FAIRNESS_REASON_REQUIRED",
                "every fairness action needs a reason",
            ));
        }
        if let FairnessAction::SetOverrideBoost { boost_points, .. } = &input.action {
            if *boost_points > MAX_OVERRIDE_BOOST {
                return Err(DomainError::invalid(
                    "OVERRIDE_BOOST_OUT_OF_RANGE",
                    format!("boost_points must be between 0 and {MAX_OVERRIDE_BOOST}"),
                ));
            }
        }

        let actor_tx = actor.clone();
        let request_id = request_id.to_string();

        let output = self
            .store
            .with_tx(move |tx| {
                let now = Utc::now();
                let mut reservation = load_reservation(tx, &input.reservation_id)?;
                let action_name = input.action.name();

                {
                    let fairness = &mut reservation.queue_fairness;
                    match &input.action {
                        FairnessAction::RecordNoShow => fairness.no_show_count += 1,
                        FairnessAction::RecordLateArrival => fairness.late_arrival_count += 1,
                        FairnessAction::SetOverrideBoost {
                            boost_points,
                            override_until,
                        } => {
                            fairness.override_boost = *boost_points;
                            fairness.override_until = *override_until;
                            fairness.override_reason = Some(input.reason.clone());
                        }
                        FairnessAction::ClearOverride => {
                            fairness.override_boost = 0;
                            fairness.override_until = None;
                            fairness.override_reason = None;
                        }
                    }
                    fairness.updated_at = Some(now);
                    fairness.updated_by_uid = Some(actor_tx.uid.clone());
                    fairness.updated_by_role = Some(FairnessRole::Staff);
                    fairness.last_policy_note = Some(input.reason.clone());
                }

                let evidence_id = ids::fairness_evidence_id(
                    &reservation.id,
                    action_name,
                    &request_id,
                );
                reservation.queue_fairness.last_evidence_id = Some(evidence_id.clone());
                let policy = reservation.queue_fairness.compute_policy(now);
                reservation.queue_fairness_policy = policy.clone();

                let evidence = FairnessEvidence {
                    reservation_id: reservation.id.clone(),
                    owner_uid: reservation.owner_uid.clone(),
                    action: action_name.to_string(),
                    reason: input.reason.clone(),
                    no_show_count: reservation.queue_fairness.no_show_count,
                    late_arrival_count: reservation.queue_fairness.late_arrival_count,
                    override_boost: reservation.queue_fairness.override_boost,
                    policy: policy.clone(),
                    actor_uid: actor_tx.uid.clone(),
                    request_id: request_id.clone(),
                    at: now,
                };
                tx.put(
                    collections::RESERVATION_QUEUE_FAIRNESS_AUDIT,
                    &evidence_id,
                    &DocKeys::owner(reservation.owner_uid.clone())
                        .with_scope(reservation.id.clone())
                        .with_lookup(action_name.to_string()),
                    &evidence,
                )?;

                reservation
                    .append_staff_note(&format!("[fairness:{action_name}] {}", input.reason));
                reservation.push_stage(stage_entry(
                    reservation.stage_status.stage,
                    format!("fairness_{action_name}"),
                    None,
                    &actor_tx,
                    now,
                ));
                reservation.updated_at = now;
                save_reservation(tx, &reservation)?;

                Ok(QueueFairnessOutput {
                    reservation_id: reservation.id.clone(),
                    queue_fairness: reservation.queue_fairness.clone(),
                    queue_fairness_policy: policy,
                    evidence_id,
                    assigned_station_id: reservation.assigned_station_id.clone(),
                })
            })
            .await?;

        // Penalty changes move the row in its station queue.
        self.spawn_queue_recompute(output.assigned_station_id.clone());
        Ok(output)
    }
}
