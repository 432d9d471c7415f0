//! HTTP gateway: route whitelist, response envelope, actor extraction,
//! rate guarding, terms gating, and dispatch into the domain services.

pub mod auth_layer;
pub mod envelope;
pub mod event_bus;
pub mod handlers;
pub mod router;
pub mod state;

pub use router::build_router;
pub use state::ApiState;
