//! Logging, request-id propagation, and structured audit emission.

pub mod audit;
pub mod logging;
pub mod request_id;

pub use audit::{AuditEvent, RouteFamily};
