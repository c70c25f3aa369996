//! Wire types shared by every transport implementation
//! These are the envelopes exchanged between participants in a room

use std::fmt;

use glam::{Quat, Vec3};
use serde::{Deserialize, Serialize};

/// Participant identifier assigned by the transport on connect
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParticipantId(pub i32);

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Handle of a replicated entity, unique within a room
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityHandle(pub u32);

impl fmt::Display for EntityHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Kinds of entity a participant can instantiate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrefabKind {
    /// Head and two hands of a participant
    Avatar,
}

/// Who receives a reliable RPC
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RpcTarget {
    /// Only the process owning the addressed entity
    Owner,
    /// Every process in the room, the sender included
    All,
}

/// Identity of one kill: the victim and which of its lives ended.
/// Receivers apply a given credit at most once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct KillCredit {
    pub victim: EntityHandle,
    pub life: u32,
}

/// Reliable calls addressed to one replica
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RpcCall {
    /// Damage dealt by `attacker_id`; only the owner applies it
    TakeDamage {
        damage: i32,
        attacker_id: ParticipantId,
    },

    /// Kill credit for the addressed attacker replica
    AddKill { credit: KillCredit },
}

/// Why a join request did not place us in a room
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JoinFailure {
    RoomFull { capacity: usize },
    NotInLobby,
    Other { message: String },
}

impl fmt::Display for JoinFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JoinFailure::RoomFull { capacity } => write!(f, "room full ({} players)", capacity),
            JoinFailure::NotInLobby => write!(f, "not in lobby"),
            JoinFailure::Other { message } => write!(f, "{}", message),
        }
    }
}

/// Notifications delivered by the transport, in delivery order
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    ConnectedToMaster {
        local_id: ParticipantId,
    },
    ConnectFailed {
        reason: String,
    },
    JoinedLobby,
    JoinedRoom {
        local_id: ParticipantId,
        room: String,
        /// Current members in join order, ourselves last
        members: Vec<ParticipantId>,
    },
    JoinFailed {
        reason: JoinFailure,
    },
    MemberJoined(ParticipantId),
    MemberLeft(ParticipantId),
    EntityInstantiated {
        entity: EntityHandle,
        owner: ParticipantId,
        kind: PrefabKind,
        position: Vec3,
        orientation: Quat,
    },
    EntityDestroyed {
        entity: EntityHandle,
    },
    Snapshot {
        entity: EntityHandle,
        payload: bytes::Bytes,
    },
    Rpc {
        entity: EntityHandle,
        call: RpcCall,
    },
    Disconnected {
        reason: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rpc_calls_are_tagged_json() {
        let call = RpcCall::TakeDamage {
            damage: 25,
            attacker_id: ParticipantId(2),
        };
        let json = serde_json::to_string(&call).unwrap();
        assert_eq!(json, r#"{"type":"take_damage","damage":25,"attacker_id":2}"#);

        let kill: RpcCall =
            serde_json::from_str(r#"{"type":"add_kill","credit":{"victim":1001,"life":0}}"#)
                .unwrap();
        assert_eq!(
            kill,
            RpcCall::AddKill {
                credit: KillCredit {
                    victim: EntityHandle(1001),
                    life: 0
                }
            }
        );
    }

    #[test]
    fn test_room_full_reason_is_readable() {
        let reason = JoinFailure::RoomFull { capacity: 4 };
        assert_eq!(reason.to_string(), "room full (4 players)");
    }
}
