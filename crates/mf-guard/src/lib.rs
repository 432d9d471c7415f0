//! Request guards: token-bucket rate limiting, the delegated-agent
//! auto-cooldown policy, and the graceful-shutdown coordinator.

pub mod cooldown;
pub mod rate_limiter;
pub mod shutdown;

pub use cooldown::CooldownPolicy;
pub use rate_limiter::{RateGuard, RateLimitExceeded};
pub use shutdown::ShutdownSignal;
