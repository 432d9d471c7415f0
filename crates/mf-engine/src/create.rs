//! Reservation intake.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use mf_core::actor::ActorContext;
use mf_core::ids;
use mf_core::types::{
    AddOns, ArrivalStatus, CreatedByRole, DropOffProfile, FiringType, IntakeMode, Piece,
    PickupWindow, PieceStatus, PreferredWindow, QueueFairness, Reservation, ReservationStatus,
    Stage, StorageStatus, MAX_PIECES, MAX_PIECE_COUNT,
};
use mf_core::DomainError;

use crate::engine::{save_reservation, stage_entry, ReservationEngine};

const SHELF_EQUIVALENT_MIN: f64 = 0.25;
const SHELF_EQUIVALENT_MAX: f64 = 32.0;
const MAX_PIECE_ID_LEN: usize = 120;

// ---------------------------------------------------------------------------
// Input / output
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize, Default)]
pub struct PieceInput {
    #[serde(default)]
    pub piece_id: Option<String>,
    #[serde(default)]
    pub piece_label: Option<String>,
    #[serde(default)]
    pub piece_count: Option<u32>,
    #[serde(default)]
    pub piece_photo_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateReservationInput {
    #[serde(default)]
    pub owner_uid: Option<String>,
    #[serde(default)]
    pub client_request_id: Option<String>,
    #[serde(default)]
    pub intake_mode: Option<IntakeMode>,
    pub firing_type: FiringType,
    #[serde(default)]
    pub footprint_half_shelves: Option<u32>,
    #[serde(default)]
    pub tiers: Option<u32>,
    #[serde(default)]
    pub height_in: Option<f64>,
    #[serde(default)]
    pub estimated_half_shelves: Option<f64>,
    #[serde(default)]
    pub shelf_equivalent: Option<f64>,
    #[serde(default)]
    pub preferred_window: Option<PreferredWindow>,
    #[serde(default)]
    pub pieces: Option<Vec<PieceInput>>,
    #[serde(default)]
    pub add_ons: Option<AddOns>,
    #[serde(default)]
    pub drop_off_profile: Option<DropOffProfile>,
    #[serde(default)]
    pub assigned_station_id: Option<String>,
    #[serde(default)]
    pub queue_class: Option<String>,
    #[serde(default)]
    pub staff_notes: Option<String>,
    #[serde(default)]
    pub cost_cents: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct CreateReservationOutput {
    pub reservation: Reservation,
    pub idempotent_replay: bool,
}

// ---------------------------------------------------------------------------
// Operation
// ---------------------------------------------------------------------------

impl ReservationEngine {
    pub async fn create(
        &self,
        actor: &ActorContext,
        input: CreateReservationInput,
    ) -> Result<CreateReservationOutput, DomainError> {
        let now = Utc::now();
        let owner_uid = input
            .owner_uid
            .clone()
            .filter(|uid| !uid.trim().is_empty())
            .unwrap_or_else(|| actor.uid.clone());
        actor.authorize(&owner_uid, "reservations:write", "reservation", true)?;

        if let Some(station) = &input.assigned_station_id {
            if !self.stations.is_known(station) {
                return Err(DomainError::invalid(
                    "STATION_UNKNOWN",
                    format!("station `{station}` is not registered"),
                ));
            }
        }

        let reservation = normalize_create(actor, &owner_uid, input, now)?;
        let station = reservation.assigned_station_id.clone();

        let output = self
            .store
            .with_tx(move |tx| {
                // Deterministic-id creates replay the prior write.
                if reservation.client_request_id.is_some() {
                    if let Some(existing) = tx.get::<Reservation>(
                        mf_store::collections::RESERVATIONS,
                        &reservation.id,
                    )? {
                        if existing.owner_uid != reservation.owner_uid {
                            return Err(DomainError::conflict(
                                "CLIENT_REQUEST_ID_CONFLICT",
                                "client_request_id was already used by another member",
                            ));
                        }
                        return Ok(CreateReservationOutput {
                            reservation: existing,
                            idempotent_replay: true,
                        });
                    }
                }
                save_reservation(tx, &reservation)?;
                Ok(CreateReservationOutput {
                    reservation,
                    idempotent_replay: false,
                })
            })
            .await?;

        if !output.idempotent_replay {
            self.spawn_queue_recompute(station);
        }
        Ok(output)
    }
}

// ---------------------------------------------------------------------------
// Normalization
// ---------------------------------------------------------------------------

/// Validate and normalize the intake payload into a full reservation.
pub(crate) fn normalize_create(
    actor: &ActorContext,
    owner_uid: &str,
    input: CreateReservationInput,
    now: DateTime<Utc>,
) -> Result<Reservation, DomainError> {
    let intake_mode = input.intake_mode.unwrap_or(IntakeMode::ShelfPurchase);

    if let Some(window) = &input.preferred_window {
        if let (Some(earliest), Some(latest)) = (window.earliest, window.latest) {
            if earliest > latest {
                return Err(DomainError::invalid(
                    "PREFERRED_WINDOW_INVERTED",
                    "preferred_window.earliest must not be after latest",
                ));
            }
        }
    }

    let drop_off_profile = input.drop_off_profile;
    if let Some(profile) = &drop_off_profile {
        if profile.bisque_only && input.firing_type != FiringType::Bisque {
            return Err(DomainError::invalid(
                "BISQUE_ONLY_PROFILE",
                "a bisque-only drop-off profile requires firing_type=bisque",
            ));
        }
        if let Some(path) = &profile.photo_path {
            validate_photo_path(path, owner_uid)?;
        }
    }

    let mut add_ons = input.add_ons.unwrap_or_default();
    if add_ons.delivery_requested
        && (add_ons.delivery_address.as_deref().unwrap_or("").is_empty()
            || add_ons
                .delivery_instructions
                .as_deref()
                .unwrap_or("")
                .is_empty())
    {
        return Err(DomainError::invalid(
            "DELIVERY_DETAILS_REQUIRED",
            "delivery add-ons require an address and instructions",
        ));
    }

    let mut cost_cents = input.cost_cents.unwrap_or(0).max(0);
    if intake_mode == IntakeMode::CommunityShelf {
        // Community shelf is free and carries no paid add-ons.
        cost_cents = 0;
        add_ons = AddOns::default();
    }

    // Size normalization.
    let tiers = input.tiers.or_else(|| {
        input
            .height_in
            .map(|height| 1 + (((height - 1.0).max(0.0) / 10.0).floor() as u32))
    });
    let shelf_equivalent = input
        .shelf_equivalent
        .unwrap_or(0.5)
        .clamp(SHELF_EQUIVALENT_MIN, SHELF_EQUIVALENT_MAX);
    let estimated_half_shelves = match input.estimated_half_shelves {
        Some(estimate) if estimate > 0.0 => estimate,
        _ => match (input.footprint_half_shelves, tiers) {
            (Some(footprint), Some(t)) if footprint > 0 && t > 0 => {
                f64::from(footprint) * f64::from(t)
            }
            _ => {
                if input.shelf_equivalent.is_some() {
                    shelf_equivalent * 2.0
                } else {
                    1.0
                }
            }
        },
    };

    let id = match &input.client_request_id {
        Some(key) if !key.trim().is_empty() => ids::reservation_id(owner_uid, key.trim()),
        _ => format!("res-{}", Uuid::new_v4().as_simple()),
    };

    let pieces = normalize_pieces(&id, owner_uid, input.pieces.unwrap_or_default())?;

    let fairness = QueueFairness::default();
    let policy = fairness.compute_policy(now);
    let initial_stage = stage_entry(
        Stage::Intake,
        "Reservation created",
        None,
        actor,
        now,
    );

    Ok(Reservation {
        id,
        owner_uid: owner_uid.to_string(),
        created_by_uid: actor.uid.clone(),
        created_by_role: if actor.staff {
            CreatedByRole::Staff
        } else {
            CreatedByRole::Client
        },
        intake_mode,
        firing_type: input.firing_type,
        footprint_half_shelves: input.footprint_half_shelves,
        tiers,
        height_in: input.height_in,
        estimated_half_shelves: Some(estimated_half_shelves),
        shelf_equivalent,
        status: ReservationStatus::Requested,
        load_status: None,
        assigned_station_id: input
            .assigned_station_id
            .map(|s| mf_core::station::StationRegistry::normalize_id(&s)),
        queue_class: input
            .queue_class
            .map(|c| c.trim().to_ascii_lowercase())
            .filter(|c| !c.is_empty()),
        queue_position_hint: None,
        required_resources: Vec::new(),
        preferred_window: input.preferred_window,
        estimated_window: None,
        pieces,
        add_ons,
        drop_off_profile,
        cost_cents,
        arrival_token: None,
        arrival_token_lookup: None,
        arrival_token_version: 0,
        arrival_token_issued_at: None,
        arrival_token_expires_at: None,
        arrival_status: ArrivalStatus::Expected,
        arrived_at: None,
        ready_for_pickup_at: None,
        pickup_window: PickupWindow::default(),
        pickup_reminder_count: 0,
        storage_status: StorageStatus::Active,
        stage_status: initial_stage,
        stage_history: Vec::new(),
        storage_notice_history: Vec::new(),
        queue_fairness: fairness,
        queue_fairness_policy: policy,
        staff_notes: if actor.staff { input.staff_notes } else { None },
        client_request_id: input.client_request_id.map(|k| k.trim().to_string()),
        batch_id: None,
        created_at: now,
        updated_at: now,
        cancelled_at: None,
    })
}

fn validate_photo_path(path: &str, owner_uid: &str) -> Result<(), DomainError> {
    let prefix = format!("checkins/{owner_uid}/");
    if path.starts_with(&prefix) {
        Ok(())
    } else {
        Err(DomainError::invalid(
            "PHOTO_PATH_OUT_OF_BOUNDS",
            format!("photo paths must live under {prefix}"),
        ))
    }
}

fn normalize_pieces(
    reservation_id: &str,
    owner_uid: &str,
    inputs: Vec<PieceInput>,
) -> Result<Vec<Piece>, DomainError> {
    if inputs.len() > MAX_PIECES {
        return Err(DomainError::invalid(
            "TOO_MANY_PIECES",
            format!("a reservation holds at most {MAX_PIECES} pieces"),
        ));
    }
    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::with_capacity(inputs.len());
    for (ordinal, piece) in inputs.into_iter().enumerate() {
        let count = piece.piece_count.unwrap_or(1);
        if count < 1 || count > MAX_PIECE_COUNT {
            return Err(DomainError::invalid(
                "PIECE_COUNT_OUT_OF_RANGE",
                format!("piece_count must be between 1 and {MAX_PIECE_COUNT}"),
            ));
        }
        let piece_id = match piece.piece_id {
            Some(supplied) => {
                validate_piece_id(&supplied)?;
                supplied
            }
            None => ids::generate_piece_id(reservation_id, ordinal + 1),
        };
        if !seen.insert(piece_id.clone()) {
            return Err(DomainError::invalid_with(
                "DUPLICATE_PIECE_ID",
                "piece ids must be unique within a reservation",
                serde_json::json!({ "duplicateItemId": piece_id }),
            ));
        }
        if let Some(url) = &piece.piece_photo_url {
            validate_photo_path(url, owner_uid)?;
        }
        out.push(Piece {
            piece_id,
            piece_label: piece.piece_label,
            piece_count: count,
            piece_photo_url: piece.piece_photo_url,
            piece_status: PieceStatus::AwaitingPlacement,
        });
    }
    Ok(out)
}

fn validate_piece_id(piece_id: &str) -> Result<(), DomainError> {
    let valid_chars = piece_id
        .chars()
        .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '-' || c == '_');
    if piece_id.is_empty() || piece_id.len() > MAX_PIECE_ID_LEN || !valid_chars {
        return Err(DomainError::invalid(
            "PIECE_ID_INVALID",
            "piece ids are uppercase alphanumerics, dashes, and underscores, at most 120 chars",
        ));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn base_input() -> CreateReservationInput {
        serde_json::from_value(serde_json::json!({ "firing_type": "bisque" })).unwrap()
    }

    fn member() -> ActorContext {
        ActorContext::session("u1")
    }

    #[test]
    fn defaults_are_applied() {
        let r = normalize_create(&member(), "u1", base_input(), Utc::now()).unwrap();
        assert_eq!(r.status, ReservationStatus::Requested);
        assert_eq!(r.intake_mode, IntakeMode::ShelfPurchase);
        assert_eq!(r.estimated_half_shelves, Some(1.0));
        assert_eq!(r.arrival_token_version, 0);
        assert_eq!(r.storage_status, StorageStatus::Active);
        assert_eq!(r.stage_status.reason, "Reservation created");
        assert!(r.stage_history.is_empty());
        assert!(r.id.starts_with("res-"));
    }

    #[test]
    fn deterministic_id_from_client_request_id() {
        let mut input = base_input();
        input.client_request_id = Some("abc".to_string());
        let a = normalize_create(&member(), "u1", input.clone(), Utc::now()).unwrap();
        let b = normalize_create(&member(), "u1", input, Utc::now()).unwrap();
        assert_eq!(a.id, b.id);
        assert_eq!(a.id, mf_core::ids::reservation_id("u1", "abc"));
    }

    #[test]
    fn estimate_from_footprint_and_tiers() {
        let mut input = base_input();
        input.footprint_half_shelves = Some(2);
        input.tiers = Some(3);
        let r = normalize_create(&member(), "u1", input, Utc::now()).unwrap();
        assert_eq!(r.estimated_half_shelves, Some(6.0));
    }

    #[test]
    fn estimate_from_shelf_equivalent() {
        let mut input = base_input();
        input.shelf_equivalent = Some(2.0);
        let r = normalize_create(&member(), "u1", input, Utc::now()).unwrap();
        assert_eq!(r.estimated_half_shelves, Some(4.0));
    }

    #[test]
    fn shelf_equivalent_is_clamped() {
        let mut input = base_input();
        input.shelf_equivalent = Some(100.0);
        let r = normalize_create(&member(), "u1", input, Utc::now()).unwrap();
        assert_eq!(r.shelf_equivalent, 32.0);

        let mut input = base_input();
        input.shelf_equivalent = Some(0.1);
        let r = normalize_create(&member(), "u1", input, Utc::now()).unwrap();
        assert_eq!(r.shelf_equivalent, 0.25);
    }

    #[test]
    fn tiers_default_from_height() {
        let mut input = base_input();
        input.height_in = Some(21.0);
        let r = normalize_create(&member(), "u1", input, Utc::now()).unwrap();
        assert_eq!(r.tiers, Some(3));

        let mut input = base_input();
        input.height_in = Some(5.0);
        let r = normalize_create(&member(), "u1", input, Utc::now()).unwrap();
        assert_eq!(r.tiers, Some(1));
    }

    #[test]
    fn inverted_window_rejected() {
        let mut input = base_input();
        let now = Utc::now();
        input.preferred_window = Some(PreferredWindow {
            earliest: Some(now + chrono::Duration::days(2)),
            latest: Some(now),
        });
        let err = normalize_create(&member(), "u1", input, now).unwrap_err();
        assert_eq!(err.reason(), Some("PREFERRED_WINDOW_INVERTED"));
    }

    #[test]
    fn bisque_only_profile_requires_bisque() {
        let mut input = base_input();
        input.firing_type = FiringType::Glaze;
        input.drop_off_profile = Some(DropOffProfile {
            bisque_only: true,
            ..Default::default()
        });
        let err = normalize_create(&member(), "u1", input, Utc::now()).unwrap_err();
        assert_eq!(err.reason(), Some("BISQUE_ONLY_PROFILE"));
    }

    #[test]
    fn delivery_requires_address_and_instructions() {
        let mut input = base_input();
        input.add_ons = Some(AddOns {
            delivery_requested: true,
            ..Default::default()
        });
        let err = normalize_create(&member(), "u1", input, Utc::now()).unwrap_err();
        assert_eq!(err.reason(), Some("DELIVERY_DETAILS_REQUIRED"));
    }

    #[test]
    fn photo_path_must_be_owner_scoped() {
        let mut input = base_input();
        input.drop_off_profile = Some(DropOffProfile {
            photo_path: Some("checkins/other/shot.jpg".to_string()),
            ..Default::default()
        });
        let err = normalize_create(&member(), "u1", input, Utc::now()).unwrap_err();
        assert_eq!(err.reason(), Some("PHOTO_PATH_OUT_OF_BOUNDS"));

        let mut input = base_input();
        input.drop_off_profile = Some(DropOffProfile {
            photo_path: Some("checkins/u1/shot.jpg".to_string()),
            ..Default::default()
        });
        assert!(normalize_create(&member(), "u1", input, Utc::now()).is_ok());
    }

    #[test]
    fn community_shelf_is_free_and_unpaid() {
        let mut input = base_input();
        input.intake_mode = Some(IntakeMode::CommunityShelf);
        input.cost_cents = Some(4200);
        input.add_ons = Some(AddOns {
            rush_requested: true,
            ..Default::default()
        });
        let r = normalize_create(&member(), "u1", input, Utc::now()).unwrap();
        assert_eq!(r.cost_cents, 0);
        assert!(!r.add_ons.rush_requested);
    }

    #[test]
    fn duplicate_piece_ids_rejected() {
        let mut input = base_input();
        input.pieces = Some(vec![
            PieceInput {
                piece_id: Some("BOWL-1".to_string()),
                ..Default::default()
            },
            PieceInput {
                piece_id: Some("BOWL-1".to_string()),
                ..Default::default()
            },
        ]);
        let err = normalize_create(&member(), "u1", input, Utc::now()).unwrap_err();
        assert_eq!(err.reason(), Some("DUPLICATE_PIECE_ID"));
        assert_eq!(err.detail_value().unwrap()["duplicateItemId"], "BOWL-1");
    }

    #[test]
    fn lowercase_piece_id_rejected_generated_ids_accepted() {
        let mut input = base_input();
        input.pieces = Some(vec![PieceInput {
            piece_id: Some("bowl-1".to_string()),
            ..Default::default()
        }]);
        let err = normalize_create(&member(), "u1", input, Utc::now()).unwrap_err();
        assert_eq!(err.reason(), Some("PIECE_ID_INVALID"));

        let mut input = base_input();
        input.pieces = Some(vec![PieceInput::default(), PieceInput::default()]);
        let r = normalize_create(&member(), "u1", input, Utc::now()).unwrap();
        assert_eq!(r.pieces.len(), 2);
        assert!(r.pieces[0].piece_id.starts_with("MF-RES-"));
        assert_ne!(r.pieces[0].piece_id, r.pieces[1].piece_id);
    }

    #[test]
    fn piece_count_bounds() {
        let mut input = base_input();
        input.pieces = Some(vec![PieceInput {
            piece_count: Some(501),
            ..Default::default()
        }]);
        let err = normalize_create(&member(), "u1", input, Utc::now()).unwrap_err();
        assert_eq!(err.reason(), Some("PIECE_COUNT_OUT_OF_RANGE"));
    }

    #[test]
    fn non_staff_notes_are_dropped() {
        let mut input = base_input();
        input.staff_notes = Some("handled at desk".to_string());
        let r = normalize_create(&member(), "u1", input.clone(), Utc::now()).unwrap();
        assert!(r.staff_notes.is_none());

        let staff = ActorContext::staff_session("staff1");
        let r = normalize_create(&staff, "u1", input, Utc::now()).unwrap();
        assert_eq!(r.staff_notes.as_deref(), Some("handled at desk"));
    }
}
