//! Queue-position recompute.
//!
//! For a station, every non-cancelled reservation gets a 1-based rank
//! from a six-factor tuple (community fill-in last, confirmed first,
//! rush and whole-kiln ahead, fairness penalty and footprint pushing
//! back), with creation time and id as final tie-breakers. Ranks feed
//! a coarse two-day slotting estimate.

use chrono::{Duration, Utc};

use mf_core::types::{
    EstimatedWindow, IntakeMode, QueueConfidence, Reservation, ReservationStatus, SlaState,
};
use mf_core::DomainError;
use mf_store::collections;

use crate::engine::{save_reservation, ReservationEngine};

const SLOT_DAYS: i64 = 2;

// ---------------------------------------------------------------------------
// Rank key
// ---------------------------------------------------------------------------

/// Sort key; lower sorts earlier. Size is scaled to centi-half-shelves
/// so the tuple stays totally ordered.
pub(crate) fn rank_key(r: &Reservation) -> (u8, u8, u8, u8, u32, i64, i64, String) {
    let community = u8::from(r.intake_mode == IntakeMode::CommunityShelf);
    let status_priority = match r.status {
        ReservationStatus::Confirmed => 0,
        ReservationStatus::Requested => 1,
        ReservationStatus::Waitlisted => 2,
        _ => 3,
    };
    let rush_priority = u8::from(!r.add_ons.rush_requested);
    let whole_kiln_priority = u8::from(r.intake_mode != IntakeMode::WholeKiln);
    let fairness_penalty = r.queue_fairness_policy.effective_penalty_points;
    let size_penalty = (r.estimate_half_shelves() * 100.0).round() as i64;
    (
        community,
        status_priority,
        rush_priority,
        whole_kiln_priority,
        fairness_penalty,
        size_penalty,
        r.created_at.timestamp_millis(),
        r.id.clone(),
    )
}

fn estimated_window_for(position: u32, now: chrono::DateTime<Utc>) -> EstimatedWindow {
    let slot_index = i64::from((position - 1) / 2);
    let start = now + Duration::days(slot_index * SLOT_DAYS);
    let end = start + Duration::days(SLOT_DAYS);
    let confidence = if position <= 2 {
        QueueConfidence::High
    } else if position <= 5 {
        QueueConfidence::Medium
    } else {
        QueueConfidence::Low
    };
    let sla_state = match confidence {
        QueueConfidence::High => SlaState::OnTrack,
        QueueConfidence::Medium => SlaState::AtRisk,
        QueueConfidence::Low => SlaState::Delayed,
    };
    EstimatedWindow {
        start: Some(start),
        end: Some(end),
        confidence: Some(confidence),
        sla_state,
    }
}

// ---------------------------------------------------------------------------
// Operation
// ---------------------------------------------------------------------------

impl ReservationEngine {
    /// Recompute queue-position hints for one station. Returns the
    /// number of ranked rows. Best-effort: callers spawn this and only
    /// log failures.
    pub async fn recompute_station_queue(&self, station_id: &str) -> Result<u32, DomainError> {
        let station_id = station_id.to_string();
        self.store
            .with_tx(move |tx| {
                let now = Utc::now();
                let mut rows: Vec<Reservation> =
                    tx.list_by_scope(collections::RESERVATIONS, &station_id)?;

                let mut ranked: Vec<&mut Reservation> = Vec::new();
                let mut cancelled: Vec<&mut Reservation> = Vec::new();
                for row in rows.iter_mut() {
                    if row.status == ReservationStatus::Cancelled {
                        cancelled.push(row);
                    } else {
                        ranked.push(row);
                    }
                }
                ranked.sort_by_key(|r| rank_key(&**r));

                let count = ranked.len() as u32;
                for (index, row) in ranked.iter_mut().enumerate() {
                    let position = index as u32 + 1;
                    row.queue_position_hint = Some(position);
                    row.estimated_window = Some(estimated_window_for(position, now));
                }
                for row in cancelled.iter_mut() {
                    row.queue_position_hint = None;
                    row.estimated_window = Some(EstimatedWindow {
                        start: None,
                        end: None,
                        confidence: None,
                        sla_state: SlaState::Unknown,
                    });
                }

                for row in rows.iter() {
                    save_reservation(tx, row)?;
                }
                Ok(count)
            })
            .await
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
