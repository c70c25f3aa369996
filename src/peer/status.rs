//! Read-only view of a peer, shared with the status endpoints

use std::sync::Arc;

use glam::Vec3;
use parking_lot::RwLock;
use serde::Serialize;

use crate::replica::{AvatarReplica, Ownership, SnapshotStats};
use crate::session::ConnectionState;
use crate::transport::{EntityHandle, ParticipantId};

/// Status handle written by the peer task and read by HTTP handlers
pub type SharedStatus = Arc<RwLock<PeerStatus>>;

#[derive(Debug, Clone, Serialize)]
pub struct PeerStatus {
    pub label: String,
    pub participant: Option<ParticipantId>,
    pub state: ConnectionState,
    pub room: Option<String>,
    pub members: Vec<ParticipantId>,
    pub last_error: Option<String>,
    pub replicas: Vec<ReplicaStatus>,
    pub pending_respawns: usize,
    pub snapshots: SnapshotStats,
    /// Unix millis of the last refresh
    pub updated_at: u64,
}

impl PeerStatus {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            participant: None,
            state: ConnectionState::Disconnected,
            room: None,
            members: Vec::new(),
            last_error: None,
            replicas: Vec::new(),
            pending_respawns: 0,
            snapshots: SnapshotStats::default(),
            updated_at: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ReplicaStatus {
    pub entity: EntityHandle,
    pub owner: ParticipantId,
    pub display_name: String,
    pub ownership: Ownership,
    pub health: i32,
    pub kill_count: i32,
    pub dead: bool,
    pub head: Vec3,
}

impl From<&AvatarReplica> for ReplicaStatus {
    fn from(replica: &AvatarReplica) -> Self {
        Self {
            entity: replica.entity(),
            owner: replica.owner(),
            display_name: replica.display_name().to_string(),
            ownership: replica.ownership(),
            health: replica.health(),
            kill_count: replica.kill_count(),
            dead: replica.is_dead(),
            head: replica.pose().head.position,
        }
    }
}
