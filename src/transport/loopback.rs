//! In-process transport: every endpoint shares one hub
//!
//! The hub plays the role of the master server and room host for peers that
//! live in the same OS process. Delivery is through one unbounded channel per
//! endpoint, so messages from a single sender arrive in send order.

use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU32, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use dashmap::DashMap;
use glam::{Quat, Vec3};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::protocol::{
    EntityHandle, JoinFailure, ParticipantId, PrefabKind, RpcCall, RpcTarget, TransportEvent,
};
use super::{Transport, TransportError};

/// First participant id handed out
const FIRST_PARTICIPANT_ID: i32 = 1;
/// First entity handle handed out
const FIRST_ENTITY_HANDLE: u32 = 1001;

struct PeerLink {
    tx: mpsc::UnboundedSender<TransportEvent>,
    room: Option<String>,
}

#[derive(Debug, Clone)]
struct EntityRecord {
    handle: EntityHandle,
    owner: ParticipantId,
    kind: PrefabKind,
    position: Vec3,
    orientation: Quat,
    /// Replayed to late joiners
    last_snapshot: Option<Bytes>,
}

#[derive(Debug)]
struct Room {
    capacity: usize,
    members: Vec<ParticipantId>,
    entities: Vec<EntityRecord>,
}

struct HubInner {
    version: String,
    reachable: AtomicBool,
    next_participant: AtomicI32,
    next_entity: AtomicU32,
    peers: DashMap<ParticipantId, PeerLink>,
    rooms: DashMap<String, Room>,
}

impl HubInner {
    fn deliver(&self, to: ParticipantId, event: TransportEvent) {
        if let Some(link) = self.peers.get(&to) {
            if link.tx.send(event).is_err() {
                debug!(participant = %to, "Dropped event for closed endpoint");
            }
        }
    }

    fn deliver_all(&self, recipients: &[ParticipantId], event: TransportEvent) {
        for id in recipients {
            self.deliver(*id, event.clone());
        }
    }

    /// Remove a participant from its room and tell the others
    fn leave_room(&self, id: ParticipantId) {
        let room_name = match self.peers.get_mut(&id) {
            Some(mut link) => link.room.take(),
            None => None,
        };
        let Some(room_name) = room_name else {
            return;
        };

        let mut removed_entities = Vec::new();
        let mut remaining = Vec::new();
        let mut now_empty = false;

        if let Some(mut room) = self.rooms.get_mut(&room_name) {
            room.members.retain(|m| *m != id);
            room.entities.retain(|e| {
                if e.owner == id {
                    removed_entities.push(e.handle);
                    false
                } else {
                    true
                }
            });
            remaining = room.members.clone();
            now_empty = room.members.is_empty();
        }

        if now_empty {
            self.rooms.remove(&room_name);
            info!(room = %room_name, "Room closed");
        }

        self.deliver_all(&remaining, TransportEvent::MemberLeft(id));
        for entity in removed_entities {
            self.deliver_all(&remaining, TransportEvent::EntityDestroyed { entity });
        }

        info!(participant = %id, room = %room_name, "Participant left room");
    }
}

/// Shared in-process room host
#[derive(Clone)]
pub struct LoopbackHub {
    inner: Arc<HubInner>,
}

impl LoopbackHub {
    /// Create a hub that only accepts clients announcing `version`
    pub fn new(version: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(HubInner {
                version: version.into(),
                reachable: AtomicBool::new(true),
                next_participant: AtomicI32::new(FIRST_PARTICIPANT_ID),
                next_entity: AtomicU32::new(FIRST_ENTITY_HANDLE),
                peers: DashMap::new(),
                rooms: DashMap::new(),
            }),
        }
    }

    /// Create a new, unconnected endpoint
    pub fn endpoint(&self) -> LoopbackTransport {
        let (tx, rx) = mpsc::unbounded_channel();
        LoopbackTransport {
            hub: self.inner.clone(),
            local_id: None,
            tx,
            rx,
        }
    }

    /// Simulate the master server going away (or coming back)
    #[cfg(test)]
    pub fn set_reachable(&self, reachable: bool) {
        self.inner.reachable.store(reachable, Ordering::Relaxed);
    }

    /// Members of a room in join order
    pub fn room_members(&self, name: &str) -> Option<Vec<ParticipantId>> {
        self.inner.rooms.get(name).map(|r| r.members.clone())
    }

    pub fn active_rooms(&self) -> usize {
        self.inner.rooms.len()
    }

    /// Drop a participant from the server side; false if it was not connected
    #[cfg(test)]
    pub fn kick(&self, id: ParticipantId, reason: &str) -> bool {
        self.inner.leave_room(id);
        let Some((_, link)) = self.inner.peers.remove(&id) else {
            return false;
        };
        warn!(participant = %id, reason = %reason, "Participant dropped by hub");
        let _ = link.tx.send(TransportEvent::Disconnected {
            reason: reason.to_string(),
        });
        true
    }

    pub fn connected_peers(&self) -> usize {
        self.inner.peers.len()
    }
}

/// One participant's connection to a [`LoopbackHub`]
pub struct LoopbackTransport {
    hub: Arc<HubInner>,
    local_id: Option<ParticipantId>,
    /// Loopback sender for notifications about our own requests
    tx: mpsc::UnboundedSender<TransportEvent>,
    rx: mpsc::UnboundedReceiver<TransportEvent>,
}

impl LoopbackTransport {
    fn notify_self(&self, event: TransportEvent) {
        // Receiver lives in self, so this cannot fail while we exist
        let _ = self.tx.send(event);
    }

    #[cfg(test)]
    fn local_id(&self) -> Option<ParticipantId> {
        self.local_id
    }

    fn require_connected(&self) -> Result<ParticipantId, TransportError> {
        self.local_id.ok_or(TransportError::NotConnected)
    }

    fn current_room(&self, id: ParticipantId) -> Result<String, TransportError> {
        self.hub
            .peers
            .get(&id)
            .and_then(|link| link.room.clone())
            .ok_or(TransportError::NotInRoom)
    }
}

impl Transport for LoopbackTransport {
    fn is_connected(&self) -> bool {
        self.local_id.is_some()
    }

    fn connect(&mut self, version: &str) -> Result<(), TransportError> {
        if self.local_id.is_some() {
            return Ok(());
        }

        if !self.hub.reachable.load(Ordering::Relaxed) {
            self.notify_self(TransportEvent::ConnectFailed {
                reason: "master server unreachable".to_string(),
            });
            return Ok(());
        }

        if version != self.hub.version {
            self.notify_self(TransportEvent::ConnectFailed {
                reason: format!(
                    "version mismatch: client {} server {}",
                    version, self.hub.version
                ),
            });
            return Ok(());
        }

        let id = ParticipantId(self.hub.next_participant.fetch_add(1, Ordering::Relaxed));
        self.hub.peers.insert(
            id,
            PeerLink {
                tx: self.tx.clone(),
                room: None,
            },
        );
        self.local_id = Some(id);

        debug!(participant = %id, "Endpoint connected to hub");
        self.notify_self(TransportEvent::ConnectedToMaster { local_id: id });
        Ok(())
    }

    fn join_lobby(&mut self) -> Result<(), TransportError> {
        self.require_connected()?;
        self.notify_self(TransportEvent::JoinedLobby);
        Ok(())
    }

    fn join_or_create_room(&mut self, name: &str, capacity: usize) -> Result<(), TransportError> {
        let id = self.require_connected()?;

        if self.current_room(id).is_ok() {
            self.hub.leave_room(id);
        }

        let joined = {
            let mut room = self.hub.rooms.entry(name.to_string()).or_insert_with(|| {
                info!(room = %name, capacity, "Room created");
                Room {
                    capacity,
                    members: Vec::new(),
                    entities: Vec::new(),
                }
            });

            if room.members.len() >= room.capacity {
                Err(room.capacity)
            } else {
                let others = room.members.clone();
                room.members.push(id);
                Ok((others, room.members.clone(), room.entities.clone()))
            }
        };

        let (others, members, entities) = match joined {
            Ok(joined) => joined,
            Err(capacity) => {
                warn!(participant = %id, room = %name, "Join rejected, room full");
                self.notify_self(TransportEvent::JoinFailed {
                    reason: JoinFailure::RoomFull { capacity },
                });
                return Ok(());
            }
        };

        if let Some(mut link) = self.hub.peers.get_mut(&id) {
            link.room = Some(name.to_string());
        }

        self.notify_self(TransportEvent::JoinedRoom {
            local_id: id,
            room: name.to_string(),
            members,
        });

        for record in entities {
            self.notify_self(TransportEvent::EntityInstantiated {
                entity: record.handle,
                owner: record.owner,
                kind: record.kind,
                position: record.position,
                orientation: record.orientation,
            });
            if let Some(payload) = record.last_snapshot {
                self.notify_self(TransportEvent::Snapshot {
                    entity: record.handle,
                    payload,
                });
            }
        }

        self.hub.deliver_all(&others, TransportEvent::MemberJoined(id));
        Ok(())
    }

    fn instantiate_entity(
        &mut self,
        kind: PrefabKind,
        position: Vec3,
        orientation: Quat,
    ) -> Result<EntityHandle, TransportError> {
        let id = self.require_connected()?;
        let room_name = self.current_room(id)?;
        let handle = EntityHandle(self.hub.next_entity.fetch_add(1, Ordering::Relaxed));

        let others: Vec<ParticipantId> = {
            let mut room = self
                .hub
                .rooms
                .get_mut(&room_name)
                .ok_or(TransportError::NotInRoom)?;
            room.entities.push(EntityRecord {
                handle,
                owner: id,
                kind,
                position,
                orientation,
                last_snapshot: None,
            });
            room.members.iter().copied().filter(|m| *m != id).collect()
        };

        self.hub.deliver_all(
            &others,
            TransportEvent::EntityInstantiated {
                entity: handle,
                owner: id,
                kind,
                position,
                orientation,
            },
        );
        Ok(handle)
    }

    fn send_snapshot(&mut self, entity: EntityHandle, payload: Bytes) -> Result<(), TransportError> {
        let id = self.require_connected()?;
        let room_name = self.current_room(id)?;

        let others: Vec<ParticipantId> = {
            let mut room = self
                .hub
                .rooms
                .get_mut(&room_name)
                .ok_or(TransportError::NotInRoom)?;
            let record = room
                .entities
                .iter_mut()
                .find(|e| e.handle == entity && e.owner == id)
                .ok_or(TransportError::UnknownEntity(entity))?;
            record.last_snapshot = Some(payload.clone());
            room.members.iter().copied().filter(|m| *m != id).collect()
        };

        self.hub
            .deliver_all(&others, TransportEvent::Snapshot { entity, payload });
        Ok(())
    }

    fn send_rpc(
        &mut self,
        entity: EntityHandle,
        target: RpcTarget,
        call: RpcCall,
    ) -> Result<(), TransportError> {
        let id = self.require_connected()?;
        let room_name = self.current_room(id)?;

        let recipients: Vec<ParticipantId> = {
            let room = self
                .hub
                .rooms
                .get(&room_name)
                .ok_or(TransportError::NotInRoom)?;
            let owner = room
                .entities
                .iter()
                .find(|e| e.handle == entity)
                .map(|e| e.owner)
                .ok_or(TransportError::UnknownEntity(entity))?;
            match target {
                RpcTarget::Owner => vec![owner],
                RpcTarget::All => room.members.clone(),
            }
        };

        self.hub
            .deliver_all(&recipients, TransportEvent::Rpc { entity, call });
        Ok(())
    }

    fn disconnect(&mut self) {
        let Some(id) = self.local_id.take() else {
            return;
        };
        self.hub.leave_room(id);
        self.hub.peers.remove(&id);

        // Nothing queued for the old connection may reach a new one
        while self.rx.try_recv().is_ok() {}
        debug!(participant = %id, "Endpoint disconnected from hub");
    }

    fn poll_event(&mut self) -> Option<TransportEvent> {
        let event = self.rx.try_recv().ok()?;
        if let TransportEvent::Disconnected { .. } = event {
            self.local_id = None;
        }
        Some(event)
    }
}

impl Drop for LoopbackTransport {
    fn drop(&mut self) {
        if let Some(id) = self.local_id.take() {
            self.hub.leave_room(id);
            self.hub.peers.remove(&id);
        }
    }
}
