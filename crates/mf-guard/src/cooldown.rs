//! Auto-cooldown policy for abusive delegated agents.
//!
//! When the ops flag is set, a delegated agent that exhausts its rate
//! bucket is suspended for a configurable number of minutes. The policy
//! itself is pure configuration; the gateway performs the suspension
//! write.

use chrono::{DateTime, Duration, Utc};

pub const ENV_AUTO_COOLDOWN: &str = "AUTO_COOLDOWN_ON_RATE_LIMIT";
pub const ENV_COOLDOWN_MINUTES: &str = "AUTO_COOLDOWN_MINUTES";

const DEFAULT_MINUTES: u32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CooldownPolicy {
    pub auto_cooldown: bool,
    pub minutes: u32,
}

impl Default for CooldownPolicy {
    fn default() -> Self {
        Self {
            auto_cooldown: false,
            minutes: DEFAULT_MINUTES,
        }
    }
}

impl CooldownPolicy {
    /// Read the policy from the process environment, falling back to
    /// defaults (disabled, 5 minutes). Minutes are clamped to at least 1.
    pub fn from_env() -> Self {
        let auto_cooldown = std::env::var(ENV_AUTO_COOLDOWN)
            .map(|raw| parse_bool(&raw))
            .unwrap_or(false);
        let minutes = std::env::var(ENV_COOLDOWN_MINUTES)
            .ok()
            .and_then(|raw| raw.trim().parse::<u32>().ok())
            .unwrap_or(DEFAULT_MINUTES)
            .max(1);
        Self {
            auto_cooldown,
            minutes,
        }
    }

    /// Suspension horizon when the policy fires, `None` when disabled.
    pub fn cooldown_until(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        if self.auto_cooldown {
            Some(now + Duration::minutes(i64::from(self.minutes)))
        } else {
            None
        }
    }
}

fn parse_bool(raw: &str) -> bool {
    matches!(
        raw.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
