use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Version stamp attached to fairness policy computations and the
/// continuity-export schema.
pub const POLICY_VERSION: &str = "2026-02-24.v1";
pub const EXPORT_SCHEMA_VERSION: &str = "2026-02-24.v1";

/// Bounded-history caps; both sequences truncate from the head.
pub const STAGE_HISTORY_CAP: usize = 120;
pub const STORAGE_NOTICE_CAP: usize = 80;

/// Staff notes keep only this many trailing characters.
pub const STAFF_NOTES_CAP: usize = 1500;

// ---------------------------------------------------------------------------
// ReservationStatus
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReservationStatus {
    Requested,
    Confirmed,
    Waitlisted,
    #[serde(alias = "CANCELED")]
    Cancelled,
    ConfirmedArrived,
    Loaded,
}

impl ReservationStatus {
    /// Returns `true` when a transition from `self` to `target` is valid.
    ///
    /// `CONFIRMED_ARRIVED` is accepted for input compatibility; nothing
    /// in the state-setter set produces it.
    pub fn can_transition_to(&self, target: &ReservationStatus) -> bool {
        if self == target {
            return true;
        }
        matches!(
            (self, target),
            (ReservationStatus::Requested, ReservationStatus::Confirmed)
                | (ReservationStatus::Requested, ReservationStatus::Waitlisted)
                | (ReservationStatus::Requested, ReservationStatus::Cancelled)
                | (ReservationStatus::Confirmed, ReservationStatus::Waitlisted)
                | (ReservationStatus::Confirmed, ReservationStatus::Cancelled)
                | (ReservationStatus::Confirmed, ReservationStatus::Loaded)
                | (ReservationStatus::Waitlisted, ReservationStatus::Confirmed)
                | (ReservationStatus::Waitlisted, ReservationStatus::Cancelled)
                | (ReservationStatus::Loaded, ReservationStatus::Cancelled)
                | (ReservationStatus::ConfirmedArrived, ReservationStatus::Cancelled)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ReservationStatus::Requested => "REQUESTED",
            ReservationStatus::Confirmed => "CONFIRMED",
            ReservationStatus::Waitlisted => "WAITLISTED",
            ReservationStatus::Cancelled => "CANCELLED",
            ReservationStatus::ConfirmedArrived => "CONFIRMED_ARRIVED",
            ReservationStatus::Loaded => "LOADED",
        }
    }
}

// ---------------------------------------------------------------------------
// LoadStatus / IntakeMode / FiringType
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadStatus {
    Queued,
    Loading,
    Loaded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IntakeMode {
    ShelfPurchase,
    WholeKiln,
    CommunityShelf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FiringType {
    Bisque,
    Glaze,
    Other,
}

// ---------------------------------------------------------------------------
// Arrival / pickup / storage enums
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ArrivalStatus {
    #[default]
    Expected,
    Arrived,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PickupWindowStatus {
    #[default]
    Open,
    Confirmed,
    Missed,
    Expired,
    Completed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StorageStatus {
    #[default]
    Active,
    ReminderPending,
    HoldPending,
    StoredByPolicy,
}

// ---------------------------------------------------------------------------
// Stage
// ---------------------------------------------------------------------------

/// Coarse lifecycle bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Intake,
    Queued,
    Loaded,
    Canceled,
}

/// One stage-status record; the current one plus a bounded history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageEntry {
    pub stage: Stage,
    pub at: DateTime<Utc>,
    pub source: String,
    pub reason: String,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub actor_uid: Option<String>,
    #[serde(default)]
    pub actor_role: Option<String>,
}

// ---------------------------------------------------------------------------
// Storage notices
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageNotice {
    pub kind: String,
    pub at: DateTime<Utc>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub actor_uid: Option<String>,
}

// ---------------------------------------------------------------------------
// Pieces
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PieceStatus {
    #[default]
    AwaitingPlacement,
    Loaded,
    Fired,
    Ready,
    PickedUp,
}

pub const MAX_PIECES: usize = 250;
pub const MAX_PIECE_COUNT: u32 = 500;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Piece {
    pub piece_id: String,
    #[serde(default)]
    pub piece_label: Option<String>,
    pub piece_count: u32,
    #[serde(default)]
    pub piece_photo_url: Option<String>,
    #[serde(default)]
    pub piece_status: PieceStatus,
}

// ---------------------------------------------------------------------------
// Pickup window
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PickupWindow {
    #[serde(default)]
    pub requested_start: Option<DateTime<Utc>>,
    #[serde(default)]
    pub requested_end: Option<DateTime<Utc>>,
    #[serde(default)]
    pub confirmed_start: Option<DateTime<Utc>>,
    #[serde(default)]
    pub confirmed_end: Option<DateTime<Utc>>,
    #[serde(default)]
    pub status: PickupWindowStatus,
    #[serde(default)]
    pub confirmed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub missed_count: u32,
    #[serde(default)]
    pub reschedule_count: u32,
    #[serde(default)]
    pub last_missed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_reschedule_requested_at: Option<DateTime<Utc>>,
}

// ---------------------------------------------------------------------------
// Queue fairness
// ---------------------------------------------------------------------------

pub const MAX_OVERRIDE_BOOST: u32 = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FairnessRole {
    Staff,
    Dev,
    System,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct QueueFairness {
    #[serde(default)]
    pub no_show_count: u32,
    #[serde(default)]
    pub late_arrival_count: u32,
    #[serde(default)]
    pub override_boost: u32,
    #[serde(default)]
    pub override_reason: Option<String>,
    #[serde(default)]
    pub override_until: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_by_uid: Option<String>,
    #[serde(default)]
    pub updated_by_role: Option<FairnessRole>,
    #[serde(default)]
    pub last_policy_note: Option<String>,
    #[serde(default)]
    pub last_evidence_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueFairnessPolicy {
    pub no_show_count: u32,
    pub late_arrival_count: u32,
    pub penalty_points: u32,
    pub effective_penalty_points: u32,
    pub override_boost_applied: u32,
    pub reason_codes: Vec<String>,
    pub policy_version: String,
    pub computed_at: DateTime<Utc>,
}

impl QueueFairness {
    /// Recompute the derived policy record.
    ///
    /// `effective = max(0, 2·no_show + late − boost)` where the boost
    /// only counts while `override_until` has not passed.
    pub fn compute_policy(&self, now: DateTime<Utc>) -> QueueFairnessPolicy {
        let penalty_points = 2 * self.no_show_count + self.late_arrival_count;
        let boost_active = match self.override_until {
            Some(until) if until < now => 0,
            _ => self.override_boost.min(MAX_OVERRIDE_BOOST),
        };
        let effective = penalty_points.saturating_sub(boost_active);

        let mut reason_codes = Vec::new();
        if self.no_show_count >= 2 {
            reason_codes.push("repeat_no_show".to_string());
        } else if self.no_show_count == 1 {
            reason_codes.push("no_show".to_string());
        }
        if self.late_arrival_count >= 1 {
            reason_codes.push("late_arrival".to_string());
        }
        if boost_active > 0 {
            reason_codes.push("staff_override_boost".to_string());
        }

        QueueFairnessPolicy {
            no_show_count: self.no_show_count,
            late_arrival_count: self.late_arrival_count,
            penalty_points,
            effective_penalty_points: effective,
            override_boost_applied: boost_active,
            reason_codes,
            policy_version: POLICY_VERSION.to_string(),
            computed_at: now,
        }
    }
}

// ---------------------------------------------------------------------------
// Windows & add-ons
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PreferredWindow {
    #[serde(default)]
    pub earliest: Option<DateTime<Utc>>,
    #[serde(default)]
    pub latest: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AddOns {
    #[serde(default)]
    pub rush_requested: bool,
    #[serde(default)]
    pub delivery_requested: bool,
    #[serde(default)]
    pub delivery_address: Option<String>,
    #[serde(default)]
    pub delivery_instructions: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DropOffProfile {
    #[serde(default)]
    pub bisque_only: bool,
    #[serde(default)]
    pub special_handling: bool,
    #[serde(default)]
    pub photo_path: Option<String>,
}

// ---------------------------------------------------------------------------
// Queue estimates
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueConfidence {
    High,
    Medium,
    Low,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlaState {
    OnTrack,
    AtRisk,
    Delayed,
    Unknown,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EstimatedWindow {
    #[serde(default)]
    pub start: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end: Option<DateTime<Utc>>,
    #[serde(default)]
    pub confidence: Option<QueueConfidence>,
    pub sla_state: SlaState,
}

// ---------------------------------------------------------------------------
// Roles
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CreatedByRole {
    Client,
    Staff,
    Dev,
}

// ---------------------------------------------------------------------------
// Reservation
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reservation {
    pub id: String,
    pub owner_uid: String,
    pub created_by_uid: String,
    pub created_by_role: CreatedByRole,
    pub intake_mode: IntakeMode,
    pub firing_type: FiringType,

    #[serde(default)]
    pub footprint_half_shelves: Option<u32>,
    #[serde(default)]
    pub tiers: Option<u32>,
    #[serde(default)]
    pub height_in: Option<f64>,
    #[serde(default)]
    pub estimated_half_shelves: Option<f64>,
    pub shelf_equivalent: f64,

    pub status: ReservationStatus,
    #[serde(default)]
    pub load_status: Option<LoadStatus>,
    #[serde(default)]
    pub assigned_station_id: Option<String>,
    #[serde(default)]
    pub queue_class: Option<String>,
    #[serde(default)]
    pub queue_position_hint: Option<u32>,
    #[serde(default)]
    pub required_resources: Vec<String>,

    #[serde(default)]
    pub preferred_window: Option<PreferredWindow>,
    #[serde(default)]
    pub estimated_window: Option<EstimatedWindow>,

    #[serde(default)]
    pub pieces: Vec<Piece>,
    #[serde(default)]
    pub add_ons: AddOns,
    #[serde(default)]
    pub drop_off_profile: Option<DropOffProfile>,
    #[serde(default)]
    pub cost_cents: i64,

    #[serde(default)]
    pub arrival_token: Option<String>,
    #[serde(default)]
    pub arrival_token_lookup: Option<String>,
    #[serde(default)]
    pub arrival_token_version: u32,
    #[serde(default)]
    pub arrival_token_issued_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub arrival_token_expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub arrival_status: ArrivalStatus,
    #[serde(default)]
    pub arrived_at: Option<DateTime<Utc>>,

    #[serde(default)]
    pub ready_for_pickup_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub pickup_window: PickupWindow,
    #[serde(default)]
    pub pickup_reminder_count: u32,
    #[serde(default)]
    pub storage_status: StorageStatus,

    pub stage_status: StageEntry,
    #[serde(default)]
    pub stage_history: Vec<StageEntry>,
    #[serde(default)]
    pub storage_notice_history: Vec<StorageNotice>,

    #[serde(default)]
    pub queue_fairness: QueueFairness,
    pub queue_fairness_policy: QueueFairnessPolicy,

    #[serde(default)]
    pub staff_notes: Option<String>,
    #[serde(default)]
    pub client_request_id: Option<String>,
    #[serde(default)]
    pub batch_id: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub cancelled_at: Option<DateTime<Utc>>,
}

impl Reservation {
    /// Half-shelf footprint used for capacity accounting.
    ///
    /// Falls back from the explicit estimate to `footprint × tiers`,
    /// then `shelf_equivalent · 2`, then one half-shelf.
    pub fn estimate_half_shelves(&self) -> f64 {
        if let Some(estimate) = self.estimated_half_shelves {
            if estimate > 0.0 {
                return estimate;
            }
        }
        if let (Some(footprint), Some(tiers)) = (self.footprint_half_shelves, self.tiers) {
            if footprint > 0 && tiers > 0 {
                return f64::from(footprint) * f64::from(tiers);
            }
        }
        if self.shelf_equivalent > 0.0 {
            return self.shelf_equivalent * 2.0;
        }
        1.0
    }

    /// Whether this row counts against its station's capacity.
    pub fn is_capacity_relevant(&self) -> bool {
        self.status != ReservationStatus::Cancelled
            && matches!(
                self.load_status,
                Some(LoadStatus::Queued) | Some(LoadStatus::Loading) | Some(LoadStatus::Loaded)
            )
            && self.intake_mode != IntakeMode::CommunityShelf
    }

    /// Set the current stage and append it to the bounded history.
    pub fn push_stage(&mut self, entry: StageEntry) {
        self.stage_history.push(entry.clone());
        if self.stage_history.len() > STAGE_HISTORY_CAP {
            let excess = self.stage_history.len() - STAGE_HISTORY_CAP;
            self.stage_history.drain(..excess);
        }
        self.stage_status = entry;
    }

    /// Append a storage notice, truncating from the head past the cap.
    pub fn push_storage_notice(&mut self, notice: StorageNotice) {
        self.storage_notice_history.push(notice);
        if self.storage_notice_history.len() > STORAGE_NOTICE_CAP {
            let excess = self.storage_notice_history.len() - STORAGE_NOTICE_CAP;
            self.storage_notice_history.drain(..excess);
        }
    }

    /// Append to staff notes, keeping only the trailing window.
    pub fn append_staff_note(&mut self, note: &str) {
        let mut combined = match self.staff_notes.take() {
            Some(existing) if !existing.is_empty() => format!("{existing}\n{note}"),
            _ => note.to_string(),
        };
        if combined.chars().count() > STAFF_NOTES_CAP {
            let chars: Vec<char> = combined.chars().collect();
            combined = chars[chars.len() - STAFF_NOTES_CAP..].iter().collect();
        }
        self.staff_notes = Some(combined);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
