//! Transport facade: the substrate that discovers peers and moves messages
//!
//! Everything above this module talks to a [`Transport`]; the only
//! implementation shipped here is the in-process [`loopback::LoopbackHub`].

pub mod loopback;
pub mod protocol;

use bytes::Bytes;
use glam::{Quat, Vec3};

pub use loopback::{LoopbackHub, LoopbackTransport};
pub use protocol::{
    EntityHandle, JoinFailure, KillCredit, ParticipantId, PrefabKind, RpcCall, RpcTarget,
    TransportEvent,
};

/// Requests a participant process can make of its transport.
///
/// Requests are non-blocking; their outcome arrives later as a
/// [`TransportEvent`] drained through [`Transport::poll_event`].
pub trait Transport: Send {
    /// True between a successful connect and a disconnect from either side
    fn is_connected(&self) -> bool;

    fn connect(&mut self, version: &str) -> Result<(), TransportError>;

    fn join_lobby(&mut self) -> Result<(), TransportError>;

    fn join_or_create_room(&mut self, name: &str, capacity: usize) -> Result<(), TransportError>;

    /// Create an entity owned by this participant and announce it to the room
    fn instantiate_entity(
        &mut self,
        kind: PrefabKind,
        position: Vec3,
        orientation: Quat,
    ) -> Result<EntityHandle, TransportError>;

    /// Unreliable, fire-and-forget state for one entity
    fn send_snapshot(&mut self, entity: EntityHandle, payload: Bytes) -> Result<(), TransportError>;

    /// Reliable call addressed to one entity
    fn send_rpc(
        &mut self,
        entity: EntityHandle,
        target: RpcTarget,
        call: RpcCall,
    ) -> Result<(), TransportError>;

    /// Leave the room and drop the connection. Events still queued for the
    /// old connection are discarded and no `Disconnected` is reported.
    fn disconnect(&mut self);

    /// Next pending notification, without waiting
    fn poll_event(&mut self) -> Option<TransportEvent>;
}

/// Transport request errors
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("not connected to the master server")]
    NotConnected,

    #[error("not in a room")]
    NotInRoom,

    #[error("unknown entity {0}")]
    UnknownEntity(EntityHandle),
}
