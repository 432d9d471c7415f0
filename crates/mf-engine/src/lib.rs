//! Reservation lifecycle and queue-fairness engine.
//!
//! Owns reservation state, queue ordering, station capacity, the
//! fairness policy, arrival tokens, pickup windows, storage escalation,
//! and continuity export. Every mutating operation runs inside one
//! store transaction, is authorized by owner or staff, and emits one
//! audit record.

pub mod arrival;
pub mod assign;
pub mod create;
pub mod engine;
pub mod export;
pub mod fairness;
pub mod pickup;
pub mod queue;
pub mod status;

pub use arrival::{CheckInInput, CheckInOutput, LookupArrivalOutput, RotateTokenOutput};
pub use assign::{AssignStationInput, AssignStationOutput};
pub use create::{CreateReservationInput, CreateReservationOutput, PieceInput};
pub use engine::ReservationEngine;
pub use export::ExportContinuityInput;
pub use fairness::{FairnessAction, QueueFairnessInput, QueueFairnessOutput};
pub use pickup::{PickupWindowAction, PickupWindowInput, PickupWindowOutput};
pub use status::{UpdateReservationInput, UpdateReservationOutput};
