//! Session coordinator: connect → lobby → room → spawn
//!
//! Transitions are driven only by transport notifications. The coordinator
//! issues the next request when a notification arrives and, once in a room,
//! instantiates the local avatar after a short delay.

pub mod spawn;

use std::time::Duration;

use glam::{Quat, Vec3};
use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::transport::{
    EntityHandle, JoinFailure, ParticipantId, PrefabKind, Transport, TransportError,
    TransportEvent,
};

pub use spawn::{random_spawn_point, spawn_slot};

/// Connection lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    ConnectingToServer,
    ConnectedToMaster,
    InLobby,
    InRoom,
}

/// Fixed parameters of a session
#[derive(Debug, Clone)]
pub struct SessionSettings {
    /// Protocol/version tag announced on connect
    pub version_tag: String,
    pub room_name: String,
    pub room_capacity: usize,
    /// Radius of the spawn circle around the room origin
    pub spawn_radius: f32,
    /// Delay between joining the room and spawning the avatar
    pub spawn_delay: Duration,
}

impl SessionSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            version_tag: config.game_version.clone(),
            room_name: config.room_name.clone(),
            room_capacity: config.room_capacity,
            spawn_radius: config.spawn_radius,
            spawn_delay: config.spawn_delay,
        }
    }
}

/// Failures surfaced by the session (never retried here)
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error("connection failed: {0}")]
    ConnectFailed(String),

    #[error("room full ({capacity} players)")]
    RoomFull { capacity: usize },

    #[error("join failed: {0}")]
    JoinFailed(String),

    #[error("transport error: {0}")]
    Transport(String),
}

impl From<TransportError> for SessionError {
    fn from(err: TransportError) -> Self {
        SessionError::Transport(err.to_string())
    }
}

/// The local avatar, once instantiated
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpawnedAvatar {
    pub entity: EntityHandle,
    pub position: Vec3,
    /// Index of our join slot
    pub slot: usize,
}

/// Process-scoped session state
pub struct Session {
    settings: SessionSettings,
    state: ConnectionState,
    local_id: Option<ParticipantId>,
    room: Option<String>,
    /// Room members in join order
    members: Vec<ParticipantId>,
    spawn_due: Option<Instant>,
    last_error: Option<SessionError>,
}

impl Session {
    pub fn new(settings: SessionSettings) -> Self {
        Self {
            settings,
            state: ConnectionState::Disconnected,
            local_id: None,
            room: None,
            members: Vec::new(),
            spawn_due: None,
            last_error: None,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn local_id(&self) -> Option<ParticipantId> {
        self.local_id
    }

    pub fn room(&self) -> Option<&str> {
        self.room.as_deref()
    }

    pub fn members(&self) -> &[ParticipantId] {
        &self.members
    }

    pub fn last_error(&self) -> Option<&SessionError> {
        self.last_error.as_ref()
    }

    /// Start connecting; a no-op unless disconnected
    pub fn connect(&mut self, transport: &mut dyn Transport) {
        if self.state != ConnectionState::Disconnected || transport.is_connected() {
            debug!(state = ?self.state, "Connect ignored, already connecting or connected");
            return;
        }

        self.state = ConnectionState::ConnectingToServer;
        self.last_error = None;
        info!(version = %self.settings.version_tag, "Connecting to master server");

        if let Err(e) = transport.connect(&self.settings.version_tag) {
            self.fail_connect(e.to_string());
        }
    }

    /// Leave the room and tear the session down
    pub fn disconnect(&mut self, transport: &mut dyn Transport) {
        if self.state == ConnectionState::Disconnected {
            return;
        }
        transport.disconnect();
        self.teardown();
    }

    /// Advance the state machine on a transport notification
    pub fn handle_event(
        &mut self,
        event: &TransportEvent,
        transport: &mut dyn Transport,
        now: Instant,
    ) {
        match event {
            TransportEvent::ConnectedToMaster { local_id } => {
                if self.state != ConnectionState::ConnectingToServer {
                    warn!(state = ?self.state, "Unexpected connected-to-master notification");
                    return;
                }
                self.local_id = Some(*local_id);
                self.state = ConnectionState::ConnectedToMaster;
                info!(participant = %local_id, "Connected to master server");

                if let Err(e) = transport.join_lobby() {
                    self.surface(SessionError::from(e));
                }
            }
            TransportEvent::ConnectFailed { reason } => {
                self.fail_connect(reason.clone());
            }
            TransportEvent::JoinedLobby => {
                if self.state != ConnectionState::ConnectedToMaster {
                    warn!(state = ?self.state, "Unexpected joined-lobby notification");
                    return;
                }
                self.state = ConnectionState::InLobby;
                info!("Joined lobby");

                if let Err(e) = transport
                    .join_or_create_room(&self.settings.room_name, self.settings.room_capacity)
                {
                    self.state = ConnectionState::ConnectedToMaster;
                    self.surface(SessionError::from(e));
                }
            }
            TransportEvent::JoinedRoom {
                local_id,
                room,
                members,
            } => {
                self.local_id = Some(*local_id);
                self.state = ConnectionState::InRoom;
                self.room = Some(room.clone());
                self.members = members.clone();
                self.members.truncate(self.settings.room_capacity);
                self.spawn_due = Some(now + self.settings.spawn_delay);

                info!(
                    participant = %local_id,
                    room = %room,
                    player_count = self.members.len(),
                    "Joined room"
                );
            }
            TransportEvent::JoinFailed { reason } => {
                self.state = ConnectionState::ConnectedToMaster;
                let err = match reason {
                    JoinFailure::RoomFull { capacity } => SessionError::RoomFull {
                        capacity: *capacity,
                    },
                    other => SessionError::JoinFailed(other.to_string()),
                };
                self.surface(err);
            }
            TransportEvent::MemberJoined(id) => {
                if self.members.contains(id) {
                    return;
                }
                if self.members.len() >= self.settings.room_capacity {
                    warn!(participant = %id, "Member joined a room we believe is full");
                    return;
                }
                self.members.push(*id);
                info!(
                    participant = %id,
                    player_count = self.members.len(),
                    "Player joined room"
                );
            }
            TransportEvent::MemberLeft(id) => {
                self.members.retain(|m| m != id);
                info!(
                    participant = %id,
                    player_count = self.members.len(),
                    "Player left room"
                );
            }
            TransportEvent::Disconnected { reason } => {
                if self.state == ConnectionState::Disconnected {
                    debug!(reason = %reason, "Disconnect notification after teardown ignored");
                    return;
                }
                info!(reason = %reason, "Disconnected from master server");
                self.teardown();
            }
            TransportEvent::EntityInstantiated { .. }
            | TransportEvent::EntityDestroyed { .. }
            | TransportEvent::Snapshot { .. }
            | TransportEvent::Rpc { .. } => {}
        }
    }

    /// Instantiate the local avatar once the post-join delay has elapsed
    pub fn poll_spawn(
        &mut self,
        transport: &mut dyn Transport,
        now: Instant,
    ) -> Option<SpawnedAvatar> {
        let due = self.spawn_due?;
        if now < due || self.state != ConnectionState::InRoom {
            return None;
        }
        self.spawn_due = None;

        let slot = self.members.len().saturating_sub(1);
        let position = spawn_slot(slot, self.settings.room_capacity, self.settings.spawn_radius);

        match transport.instantiate_entity(PrefabKind::Avatar, position, Quat::IDENTITY) {
            Ok(entity) => {
                let avatar = SpawnedAvatar {
                    entity,
                    position,
                    slot,
                };
                info!(
                    entity = %entity,
                    slot,
                    x = position.x,
                    z = position.z,
                    "Spawned local avatar"
                );
                Some(avatar)
            }
            Err(e) => {
                self.surface(SessionError::from(e));
                None
            }
        }
    }

    fn fail_connect(&mut self, reason: String) {
        self.state = ConnectionState::Disconnected;
        self.local_id = None;
        self.surface(SessionError::ConnectFailed(reason));
    }

    fn surface(&mut self, err: SessionError) {
        warn!(error = %err, "Session failure");
        self.last_error = Some(err);
    }

    fn teardown(&mut self) {
        self.state = ConnectionState::Disconnected;
        self.local_id = None;
        self.room = None;
        self.members.clear();
        self.spawn_due = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::LoopbackHub;

    fn settings(capacity: usize) -> SessionSettings {
        SessionSettings {
            version_tag: "1.0".to_string(),
            room_name: "VRArena".to_string(),
            room_capacity: capacity,
            spawn_radius: 5.0,
            spawn_delay: Duration::from_millis(500),
        }
    }

    /// Feed every pending notification to the session
    fn pump(session: &mut Session, transport: &mut dyn Transport, now: Instant) {
        while let Some(event) = transport.poll_event() {
            session.handle_event(&event, transport, now);
        }
    }

    #[test]
    fn test_lifecycle_reaches_room() {
        let hub = LoopbackHub::new("1.0");
        let mut transport = hub.endpoint();
        let mut session = Session::new(settings(4));
        let now = Instant::now();

        assert_eq!(session.state(), ConnectionState::Disconnected);
        session.connect(&mut transport);
        assert_eq!(session.state(), ConnectionState::ConnectingToServer);

        pump(&mut session, &mut transport, now);
        assert_eq!(session.state(), ConnectionState::InRoom);
        assert_eq!(session.room(), Some("VRArena"));
        assert_eq!(session.members(), &[ParticipantId(1)]);
    }

    #[test]
    fn test_connect_twice_is_noop() {
        let hub = LoopbackHub::new("1.0");
        let mut transport = hub.endpoint();
        let mut session = Session::new(settings(4));

        session.connect(&mut transport);
        session.connect(&mut transport);
        pump(&mut session, &mut transport, Instant::now());
        assert_eq!(hub.connected_peers(), 1);
        assert!(session.last_error().is_none());
    }

    #[test]
    fn test_spawn_waits_for_delay() {
        let hub = LoopbackHub::new("1.0");
        let mut transport = hub.endpoint();
        let mut session = Session::new(settings(4));
        let t0 = Instant::now();

        session.connect(&mut transport);
        pump(&mut session, &mut transport, t0);

        assert!(session.poll_spawn(&mut transport, t0).is_none());
        assert!(session
            .poll_spawn(&mut transport, t0 + Duration::from_millis(499))
            .is_none());

        let avatar = session
            .poll_spawn(&mut transport, t0 + Duration::from_millis(500))
            .expect("avatar spawned after delay");
        assert_eq!(avatar.slot, 0);
        assert!(avatar.position.abs_diff_eq(Vec3::new(5.0, 0.0, 0.0), 1e-4));

        assert!(session
            .poll_spawn(&mut transport, t0 + Duration::from_secs(5))
            .is_none());
    }

    #[test]
    fn test_second_joiner_takes_next_slot() {
        let hub = LoopbackHub::new("1.0");
        let t0 = Instant::now();
        let later = t0 + Duration::from_secs(1);

        let mut first_t = hub.endpoint();
        let mut first = Session::new(settings(4));
        first.connect(&mut first_t);
        pump(&mut first, &mut first_t, t0);
        first.poll_spawn(&mut first_t, later);

        let mut second_t = hub.endpoint();
        let mut second = Session::new(settings(4));
        second.connect(&mut second_t);
        pump(&mut second, &mut second_t, t0);
        let avatar = second.poll_spawn(&mut second_t, later).unwrap();

        assert_eq!(avatar.slot, 1);
        assert!(avatar.position.abs_diff_eq(Vec3::new(0.0, 0.0, 5.0), 1e-4));

        pump(&mut first, &mut first_t, later);
        assert_eq!(first.members(), &[ParticipantId(1), ParticipantId(2)]);
    }

    #[test]
    fn test_room_full_is_surfaced() {
        let hub = LoopbackHub::new("1.0");
        let now = Instant::now();
        let mut endpoints = Vec::new();

        for _ in 0..2 {
            let mut t = hub.endpoint();
            let mut s = Session::new(settings(2));
            s.connect(&mut t);
            pump(&mut s, &mut t, now);
            endpoints.push((t, s));
        }

        let mut t = hub.endpoint();
        let mut s = Session::new(settings(2));
        s.connect(&mut t);
        pump(&mut s, &mut t, now);

        assert_eq!(s.state(), ConnectionState::ConnectedToMaster);
        assert_eq!(s.last_error(), Some(&SessionError::RoomFull { capacity: 2 }));
        assert!(s.poll_spawn(&mut t, now + Duration::from_secs(1)).is_none());
    }

    #[test]
    fn test_connect_failure_is_surfaced_not_retried() {
        let hub = LoopbackHub::new("2.0");
        let mut transport = hub.endpoint();
        let mut session = Session::new(settings(4));

        session.connect(&mut transport);
        pump(&mut session, &mut transport, Instant::now());

        assert_eq!(session.state(), ConnectionState::Disconnected);
        assert!(matches!(
            session.last_error(),
            Some(SessionError::ConnectFailed(_))
        ));
        assert!(transport.poll_event().is_none());
    }

    #[test]
    fn test_disconnect_cancels_pending_spawn() {
        let hub = LoopbackHub::new("1.0");
        let mut transport = hub.endpoint();
        let mut session = Session::new(settings(4));
        let t0 = Instant::now();

        session.connect(&mut transport);
        pump(&mut session, &mut transport, t0);
        session.disconnect(&mut transport);

        assert_eq!(session.state(), ConnectionState::Disconnected);
        assert!(session.members().is_empty());
        assert!(session
            .poll_spawn(&mut transport, t0 + Duration::from_secs(1))
            .is_none());
        assert_eq!(hub.active_rooms(), 0);
    }

    #[test]
    fn test_reconnect_after_disconnect() {
        let hub = LoopbackHub::new("1.0");
        let mut transport = hub.endpoint();
        let mut session = Session::new(settings(4));
        let t0 = Instant::now();

        session.connect(&mut transport);
        pump(&mut session, &mut transport, t0);
        session.poll_spawn(&mut transport, t0 + Duration::from_millis(500));
        session.disconnect(&mut transport);

        session.connect(&mut transport);
        pump(&mut session, &mut transport, t0);
        assert_eq!(session.state(), ConnectionState::InRoom);
        assert_eq!(session.local_id(), Some(ParticipantId(2)));
        assert_eq!(session.members(), &[ParticipantId(2)]);
        assert!(session
            .poll_spawn(&mut transport, t0 + Duration::from_millis(500))
            .is_some());
    }

    #[test]
    fn test_server_drop_tears_down_and_allows_reconnect() {
        let hub = LoopbackHub::new("1.0");
        let mut transport = hub.endpoint();
        let mut session = Session::new(settings(4));
        let now = Instant::now();

        session.connect(&mut transport);
        pump(&mut session, &mut transport, now);
        assert!(hub.kick(ParticipantId(1), "server maintenance"));
        pump(&mut session, &mut transport, now);

        assert_eq!(session.state(), ConnectionState::Disconnected);
        assert!(session.room().is_none());
        assert!(!transport.is_connected());

        session.connect(&mut transport);
        pump(&mut session, &mut transport, now);
        assert_eq!(session.state(), ConnectionState::InRoom);
    }
}
