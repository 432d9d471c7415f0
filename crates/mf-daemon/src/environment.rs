//! Process configuration: the TOML config file and the environment
//! variables the guard layer honors.

use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::info;

use mf_core::actor::RolloutPhase;
use mf_core::station::StationRegistry;
use mf_guard::CooldownPolicy;

// ---------------------------------------------------------------------------
// Config file
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8787,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct StoreConfig {
    /// SQLite path; empty means the default data directory.
    pub path: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StationConfig {
    pub station_id: String,
    pub capacity_half_shelves: u32,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct LibraryConfig {
    pub rollout_phase: Option<RolloutPhase>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub store: StoreConfig,
    pub stations: Vec<StationConfig>,
    pub library: LibraryConfig,
}

impl Config {
    /// Load `~/.monsoonfire/config.toml`, falling back to defaults.
    pub fn load() -> Result<Self> {
        let path = config_dir().join("config.toml");
        if path.exists() {
            let raw = std::fs::read_to_string(&path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            let config: Config = toml::from_str(&raw).context("failed to parse config.toml")?;
            Ok(config)
        } else {
            info!(path = %path.display(), "no config file found, using defaults");
            Ok(Config::default())
        }
    }

    pub fn station_registry(&self) -> StationRegistry {
        if self.stations.is_empty() {
            StationRegistry::studio_default()
        } else {
            StationRegistry::new(
                self.stations
                    .iter()
                    .map(|s| (s.station_id.clone(), s.capacity_half_shelves)),
            )
        }
    }

    pub fn store_path(&self) -> PathBuf {
        if self.store.path.is_empty() {
            config_dir().join("studio.db")
        } else {
            PathBuf::from(&self.store.path)
        }
    }

    pub fn rollout_phase(&self) -> RolloutPhase {
        self.library
            .rollout_phase
            .unwrap_or(RolloutPhase::Phase3AdminFull)
    }
}

fn config_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".monsoonfire")
}

// ---------------------------------------------------------------------------
// Environment
// ---------------------------------------------------------------------------

/// Resolve the guard cooldown policy from the environment and log what
/// was picked up.
pub fn cooldown_policy() -> CooldownPolicy {
    let policy = CooldownPolicy::from_env();
    info!(
        auto_cooldown = policy.auto_cooldown,
        minutes = policy.minutes,
        "cooldown policy resolved"
    );
    policy
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
