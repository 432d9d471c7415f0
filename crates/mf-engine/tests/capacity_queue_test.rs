//! Station capacity enforcement and queue-hint recompute.

use std::sync::Arc;

use mf_core::actor::ActorContext;
use mf_core::station::StationRegistry;
use mf_core::types::{LoadStatus, Reservation, ReservationStatus};
use mf_engine::{
    AssignStationInput, CreateReservationInput, FairnessAction, QueueFairnessInput,
    ReservationEngine, UpdateReservationInput,
};
use mf_store::{collections, DocStore};

async fn engine_with_store() -> (ReservationEngine, Arc<DocStore>) {
    let store = Arc::new(DocStore::open_in_memory().await.unwrap());
    let engine = ReservationEngine::new(store.clone(), Arc::new(StationRegistry::studio_default()));
    (engine, store)
}

fn member(uid: &str) -> ActorContext {
    ActorContext::session(uid)
}

fn staff() -> ActorContext {
    ActorContext::staff_session("staff1")
}

async fn seed(
    engine: &ReservationEngine,
    uid: &str,
    estimated_half_shelves: f64,
) -> Reservation {
    let input: CreateReservationInput = serde_json::from_value(serde_json::json!({
        "firing_type": "bisque",
        "estimated_half_shelves": estimated_half_shelves,
    }))
    .unwrap();
    engine
        .create(&member(uid), input)
        .await
        .unwrap()
        .reservation
}

async fn assign(engine: &ReservationEngine, reservation_id: &str, station: &str) {
    engine
        .assign_station(
            &staff(),
            AssignStationInput {
                reservation_id: reservation_id.to_string(),
                assigned_station_id: station.to_string(),
                queue_class: None,
                required_resources: None,
            },
        )
        .await
        .unwrap();
}

async fn set_load(engine: &ReservationEngine, reservation_id: &str, load: LoadStatus) {
    engine
        .update(
            &staff(),
            "req_load",
            UpdateReservationInput {
                reservation_id: reservation_id.to_string(),
                status: None,
                load_status: Some(load),
                staff_notes: None,
                reason: None,
                notes: None,
                batch_id: None,
                force: false,
            },
        )
        .await
        .unwrap();
}

#[tokio::test]
async fn third_assignment_over_capacity_is_denied() {
    let (engine, store) = engine_with_store().await;

    // kiln-test has capacity 4; two queued rows at 2.0 each fill it.
    let a = seed(&engine, "u1", 2.0).await;
    let b = seed(&engine, "u2", 2.0).await;
    assign(&engine, &a.id, "kiln-test").await;
    assign(&engine, &b.id, "kiln-test").await;
    set_load(&engine, &a.id, LoadStatus::Queued).await;
    set_load(&engine, &b.id, LoadStatus::Queued).await;

    let c = seed(&engine, "u3", 1.0).await;
    let err = engine
        .assign_station(
            &staff(),
            AssignStationInput {
                reservation_id: c.id.clone(),
                assigned_station_id: "kiln-test".to_string(),
                queue_class: None,
                required_resources: None,
            },
        )
        .await
        .unwrap_err();
    assert_eq!(err.http_status(), 409);
    assert_eq!(err.reason(), Some("STATION_CAPACITY_EXCEEDED"));
    assert!(err.to_string().contains("Station is at capacity"));

    // The denied row stays unassigned and the incumbents are untouched.
    let c_after: Reservation = store
        .get_doc(collections::RESERVATIONS, c.id.clone())
        .await
        .unwrap()
        .unwrap();
    assert!(c_after.assigned_station_id.is_none());
    let a_after: Reservation = store
        .get_doc(collections::RESERVATIONS, a.id.clone())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(a_after.assigned_station_id.as_deref(), Some("kiln-test"));
}

#[tokio::test]
async fn community_shelf_rows_do_not_consume_capacity() {
    let (engine, _store) = engine_with_store().await;

    let a = seed(&engine, "u1", 2.0).await;
    let b = seed(&engine, "u2", 2.0).await;
    assign(&engine, &a.id, "kiln-test").await;
    assign(&engine, &b.id, "kiln-test").await;
    set_load(&engine, &a.id, LoadStatus::Queued).await;
    set_load(&engine, &b.id, LoadStatus::Queued).await;

    let input: CreateReservationInput = serde_json::from_value(serde_json::json!({
        "firing_type": "glaze",
        "intake_mode": "COMMUNITY_SHELF",
        "estimated_half_shelves": 3.0,
    }))
    .unwrap();
    let community = engine
        .create(&member("u3"), input)
        .await
        .unwrap()
        .reservation;

    // Fills past nominal capacity because community shelf is fill-in.
    engine
        .assign_station(
            &staff(),
            AssignStationInput {
                reservation_id: community.id,
                assigned_station_id: "kiln-test".to_string(),
                queue_class: None,
                required_resources: None,
            },
        )
        .await
        .unwrap();
}

#[tokio::test]
async fn load_transition_respects_capacity() {
    let (engine, _store) = engine_with_store().await;

    // Both rows can sit on the station while idle: capacity only counts
    // queued/loading/loaded rows.
    let a = seed(&engine, "u1", 3.0).await;
    let b = seed(&engine, "u2", 3.0).await;
    assign(&engine, &a.id, "kiln-test").await;
    assign(&engine, &b.id, "kiln-test").await;
    set_load(&engine, &a.id, LoadStatus::Queued).await;

    // Queueing the second row would put 6 half-shelves on a 4-capacity
    // station.
    let err = engine
        .update(
            &staff(),
            "req_load2",
            UpdateReservationInput {
                reservation_id: b.id.clone(),
                status: None,
                load_status: Some(LoadStatus::Queued),
                staff_notes: None,
                reason: None,
                notes: None,
                batch_id: None,
                force: false,
            },
        )
        .await
        .unwrap_err();
    assert_eq!(err.reason(), Some("STATION_CAPACITY_EXCEEDED"));
}

#[tokio::test]
async fn no_op_assignment_replays() {
    let (engine, _store) = engine_with_store().await;
    let a = seed(&engine, "u1", 1.0).await;
    assign(&engine, &a.id, "kiln-main").await;

    let replay = engine
        .assign_station(
            &staff(),
            AssignStationInput {
                reservation_id: a.id,
                assigned_station_id: "kiln-main".to_string(),
                queue_class: None,
                required_resources: None,
            },
        )
        .await
        .unwrap();
    assert!(replay.idempotent_replay);
}

#[tokio::test]
async fn unknown_station_is_rejected() {
    let (engine, _store) = engine_with_store().await;
    let a = seed(&engine, "u1", 1.0).await;
    let err = engine
        .assign_station(
            &staff(),
            AssignStationInput {
                reservation_id: a.id,
                assigned_station_id: "kiln-ghost".to_string(),
                queue_class: None,
                required_resources: None,
            },
        )
        .await
        .unwrap_err();
    assert_eq!(err.reason(), Some("STATION_UNKNOWN"));
}

#[tokio::test]
async fn queue_recompute_ranks_and_estimates() {
    let (engine, store) = engine_with_store().await;

    let plain = seed(&engine, "u1", 1.0).await;
    let confirmed = seed(&engine, "u2", 1.0).await;
    let cancelled = seed(&engine, "u3", 1.0).await;
    for r in [&plain, &confirmed, &cancelled] {
        assign(&engine, &r.id, "kiln-main").await;
    }

    engine
        .update(
            &staff(),
            "req_c",
            UpdateReservationInput {
                reservation_id: confirmed.id.clone(),
                status: Some(ReservationStatus::Confirmed),
                load_status: None,
                staff_notes: None,
                reason: None,
                notes: None,
                batch_id: None,
                force: false,
            },
        )
        .await
        .unwrap();
    engine
        .update(
            &staff(),
            "req_x",
            UpdateReservationInput {
                reservation_id: cancelled.id.clone(),
                status: Some(ReservationStatus::Cancelled),
                load_status: None,
                staff_notes: None,
                reason: None,
                notes: None,
                batch_id: None,
                force: false,
            },
        )
        .await
        .unwrap();

    let ranked = engine.recompute_station_queue("kiln-main").await.unwrap();
    assert_eq!(ranked, 2);

    let confirmed_after: Reservation = store
        .get_doc(collections::RESERVATIONS, confirmed.id.clone())
        .await
        .unwrap()
        .unwrap();
    let plain_after: Reservation = store
        .get_doc(collections::RESERVATIONS, plain.id.clone())
        .await
        .unwrap()
        .unwrap();
    let cancelled_after: Reservation = store
        .get_doc(collections::RESERVATIONS, cancelled.id.clone())
        .await
        .unwrap()
        .unwrap();

    assert_eq!(confirmed_after.queue_position_hint, Some(1));
    assert_eq!(plain_after.queue_position_hint, Some(2));
    assert_eq!(cancelled_after.queue_position_hint, None);

    let window = confirmed_after.estimated_window.unwrap();
    assert_eq!(window.sla_state, mf_core::types::SlaState::OnTrack);
    assert_eq!(
        cancelled_after.estimated_window.unwrap().sla_state,
        mf_core::types::SlaState::Unknown
    );
}

#[tokio::test]
async fn fairness_penalty_reorders_the_queue() {
    let (engine, store) = engine_with_store().await;

    let early = seed(&engine, "u1", 1.0).await;
    let late = seed(&engine, "u2", 1.0).await;
    assign(&engine, &early.id, "kiln-annex").await;
    assign(&engine, &late.id, "kiln-annex").await;

    // Without penalties the earlier row ranks first.
    engine.recompute_station_queue("kiln-annex").await.unwrap();
    let early_before: Reservation = store
        .get_doc(collections::RESERVATIONS, early.id.clone())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(early_before.queue_position_hint, Some(1));

    engine
        .queue_fairness(
            &staff(),
            "req_f1",
            QueueFairnessInput {
                reservation_id: early.id.clone(),
                action: FairnessAction::RecordNoShow,
                reason: "missed the friday drop-off".to_string(),
            },
        )
        .await
        .unwrap();

    engine.recompute_station_queue("kiln-annex").await.unwrap();
    let early_after: Reservation = store
        .get_doc(collections::RESERVATIONS, early.id.clone())
        .await
        .unwrap()
        .unwrap();
    let late_after: Reservation = store
        .get_doc(collections::RESERVATIONS, late.id.clone())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(late_after.queue_position_hint, Some(1));
    assert_eq!(early_after.queue_position_hint, Some(2));
}
