//! Application state shared across routes

use std::sync::Arc;

use dashmap::DashMap;

use crate::config::Config;
use crate::peer::{PeerStatus, SharedStatus};
use crate::transport::LoopbackHub;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub hub: LoopbackHub,
    /// Status handles keyed by peer label
    pub peers: Arc<DashMap<String, SharedStatus>>,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        let hub = LoopbackHub::new(config.game_version.clone());
        Self {
            config: Arc::new(config),
            hub,
            peers: Arc::new(DashMap::new()),
        }
    }

    pub fn register_peer(&self, status: SharedStatus) {
        let label = status.read().label.clone();
        self.peers.insert(label, status);
    }

    /// Copy of every peer's status, ordered by label
    pub fn peer_statuses(&self) -> Vec<PeerStatus> {
        let mut statuses: Vec<PeerStatus> = self
            .peers
            .iter()
            .map(|entry| entry.value().read().clone())
            .collect();
        statuses.sort_by(|a, b| a.label.cmp(&b.label));
        statuses
    }

    pub fn peer_status(&self, label: &str) -> Option<PeerStatus> {
        self.peers.get(label).map(|entry| entry.value().read().clone())
    }
}
