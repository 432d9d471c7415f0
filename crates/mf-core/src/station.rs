//! Kiln station registry.
//!
//! Stations are static configuration: an id and a capacity in
//! half-shelf units. The registry is immutable once built and shared
//! across handlers.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Station {
    pub station_id: String,
    pub capacity_half_shelves: u32,
}

#[derive(Debug, Clone)]
pub struct StationRegistry {
    capacities: HashMap<String, u32>,
}

impl StationRegistry {
    /// Build a registry from `(id, capacity)` pairs. Entries with zero
    /// capacity are rejected by skipping them.
    pub fn new<I>(stations: I) -> Self
    where
        I: IntoIterator<Item = (String, u32)>,
    {
        let capacities = stations
            .into_iter()
            .filter(|(_, cap)| *cap >= 1)
            .map(|(id, cap)| (Self::normalize_id(&id), cap))
            .collect();
        Self { capacities }
    }

    /// The default studio floor plan.
    pub fn studio_default() -> Self {
        Self::new([
            ("kiln-main".to_string(), 8),
            ("kiln-annex".to_string(), 6),
            ("kiln-test".to_string(), 4),
        ])
    }

    /// Canonical station-id form: trimmed, lowercase.
    pub fn normalize_id(raw: &str) -> String {
        raw.trim().to_ascii_lowercase()
    }

    pub fn is_known(&self, station_id: &str) -> bool {
        self.capacities.contains_key(&Self::normalize_id(station_id))
    }

    pub fn capacity_of(&self, station_id: &str) -> Option<u32> {
        self.capacities.get(&Self::normalize_id(station_id)).copied()
    }

    pub fn stations(&self) -> Vec<Station> {
        let mut out: Vec<Station> = self
            .capacities
            .iter()
            .map(|(id, cap)| Station {
                station_id: id.clone(),
                capacity_half_shelves: *cap,
            })
            .collect();
        out.sort_by(|a, b| a.station_id.cmp(&b.station_id));
        out
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
