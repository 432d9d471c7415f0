//! Domain core for the Monsoonfire studio control plane.
//!
//! Holds the reservation/commerce/library domain model, the station
//! registry, arrival-token codec, deterministic document ids, the actor
//! and authorization model, and the shared error taxonomy. Everything
//! here is persistence- and transport-agnostic; the store and gateway
//! crates sit on top.

pub mod actor;
pub mod error;
pub mod fingerprint;
pub mod ids;
pub mod station;
pub mod token;
pub mod types;

pub use error::{DomainError, ErrorCode};
