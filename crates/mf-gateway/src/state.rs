use std::sync::Arc;

use mf_commerce::CommercePipeline;
use mf_core::actor::RolloutPhase;
use mf_core::station::StationRegistry;
use mf_engine::ReservationEngine;
use mf_guard::{CooldownPolicy, RateGuard};
use mf_library::LibraryService;
use mf_store::DocStore;

use crate::event_bus::EventBus;

/// Shared application state for every handler.
pub struct ApiState {
    pub store: Arc<DocStore>,
    pub engine: ReservationEngine,
    pub commerce: Arc<CommercePipeline>,
    pub library: Arc<LibraryService>,
    pub guard: Arc<RateGuard>,
    pub cooldown: CooldownPolicy,
    pub stations: Arc<StationRegistry>,
    pub event_bus: EventBus,
    /// Library rollout phase for this deployment.
    pub rollout_phase: RolloutPhase,
}

impl ApiState {
    pub fn new(store: Arc<DocStore>, stations: StationRegistry) -> Self {
        let stations = Arc::new(stations);
        Self {
            engine: ReservationEngine::new(store.clone(), stations.clone()),
            commerce: Arc::new(CommercePipeline::new(store.clone())),
            library: Arc::new(LibraryService::new(store.clone())),
            guard: Arc::new(RateGuard::new()),
            cooldown: CooldownPolicy::default(),
            stations,
            event_bus: EventBus::new(),
            rollout_phase: RolloutPhase::Phase3AdminFull,
            store,
        }
    }

    pub fn with_cooldown(mut self, cooldown: CooldownPolicy) -> Self {
        self.cooldown = cooldown;
        self
    }

    pub fn with_rollout_phase(mut self, phase: RolloutPhase) -> Self {
        self.rollout_phase = phase;
        self
    }
}
