//! Avatar replicas: one per participant, on every process
//!
//! A replica is `Local` on the process that owns it and `Remote` everywhere
//! else. Local replicas publish snapshots; remote replicas consume them and
//! smooth their rendered pose toward the latest target.

pub mod interpolation;
pub mod pose_source;
pub mod registry;
pub mod snapshot;

use std::collections::HashSet;

use bytes::BytesMut;
use glam::{Quat, Vec3};
use serde::Serialize;
use tracing::debug;

use crate::transport::{EntityHandle, KillCredit, ParticipantId};

pub use pose_source::{IdleMotion, PoseSource, StaticPose};
pub use registry::ReplicaRegistry;
pub use snapshot::{AvatarSnapshot, SnapshotError, SnapshotStats, SNAPSHOT_LEN};

/// Which process may originate authoritative changes to a replica
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Ownership {
    Local,
    Remote,
}

impl Ownership {
    pub fn resolve(owner: ParticipantId, local: ParticipantId) -> Self {
        if owner == local {
            Ownership::Local
        } else {
            Ownership::Remote
        }
    }
}

/// Position and orientation
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Transform {
    pub position: Vec3,
    pub rotation: Quat,
}

impl Transform {
    pub fn at(position: Vec3) -> Self {
        Self {
            position,
            rotation: Quat::IDENTITY,
        }
    }
}

/// Head and both hands
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct AvatarPose {
    pub head: Transform,
    pub left_hand: Transform,
    pub right_hand: Transform,
}

impl AvatarPose {
    /// Every tracked point collapsed onto `position`
    pub fn at(position: Vec3) -> Self {
        let t = Transform::at(position);
        Self {
            head: t,
            left_hand: t,
            right_hand: t,
        }
    }

    pub fn translated(&self, offset: Vec3) -> Self {
        let shift = |t: Transform| Transform {
            position: t.position + offset,
            rotation: t.rotation,
        };
        Self {
            head: shift(self.head),
            left_hand: shift(self.left_hand),
            right_hand: shift(self.right_hand),
        }
    }
}

/// Direction of one sync tick
pub enum SyncStream<'a> {
    /// Owner side: append our snapshot
    Write(&'a mut BytesMut),
    /// Receiver side: decode a snapshot from the owner
    Read(&'a [u8]),
}

/// Replicated state of one participant's avatar
#[derive(Debug, Clone)]
pub struct AvatarReplica {
    entity: EntityHandle,
    owner: ParticipantId,
    ownership: Ownership,
    display_name: String,

    /// Rig origin in room space (drives the local pose)
    root: Vec3,
    /// Local: latest sampled world pose. Remote: rendered pose.
    pose: AvatarPose,
    /// Remote: latest pose received from the owner
    target_pose: AvatarPose,

    health: i32,
    kill_count: i32,

    /// Incremented on every respawn
    life: u32,
    /// Local: death triggered, respawn pending. Remote: last snapshot had no health.
    dead: bool,
    credited: HashSet<KillCredit>,
}

impl AvatarReplica {
    pub fn new(
        entity: EntityHandle,
        owner: ParticipantId,
        local: ParticipantId,
        position: Vec3,
        max_health: i32,
    ) -> Self {
        let pose = AvatarPose::at(position);
        Self {
            entity,
            owner,
            ownership: Ownership::resolve(owner, local),
            display_name: format!("Player_{}", owner),
            root: position,
            pose,
            target_pose: pose,
            health: max_health,
            kill_count: 0,
            life: 0,
            dead: false,
            credited: HashSet::new(),
        }
    }

    pub fn entity(&self) -> EntityHandle {
        self.entity
    }

    pub fn owner(&self) -> ParticipantId {
        self.owner
    }

    pub fn ownership(&self) -> Ownership {
        self.ownership
    }

    pub fn is_local(&self) -> bool {
        self.ownership == Ownership::Local
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    #[cfg(test)]
    pub fn root(&self) -> Vec3 {
        self.root
    }

    pub fn pose(&self) -> &AvatarPose {
        &self.pose
    }

    #[cfg(test)]
    pub fn target_pose(&self) -> &AvatarPose {
        &self.target_pose
    }

    pub fn health(&self) -> i32 {
        self.health
    }

    pub fn kill_count(&self) -> i32 {
        self.kill_count
    }

    pub fn life(&self) -> u32 {
        self.life
    }

    pub fn is_dead(&self) -> bool {
        self.dead
    }

    /// Refresh the local pose from tracking input (rig space)
    pub fn set_tracked_pose(&mut self, tracked: AvatarPose) {
        if self.is_local() {
            self.pose = tracked.translated(self.root);
        }
    }

    /// One sync tick. Mismatched direction and ownership is a no-op.
    pub fn serialize(&mut self, stream: SyncStream<'_>) -> Result<(), SnapshotError> {
        match (self.ownership, stream) {
            (Ownership::Local, SyncStream::Write(buf)) => {
                self.snapshot().encode_into(buf);
                Ok(())
            }
            (Ownership::Remote, SyncStream::Read(bytes)) => {
                let snap = AvatarSnapshot::decode(bytes)?;
                self.target_pose = snap.pose;
                self.health = snap.health;
                self.kill_count = snap.kill_count;
                self.dead = snap.health <= 0;
                Ok(())
            }
            (Ownership::Local, SyncStream::Read(_)) => {
                debug!(entity = %self.entity, "Ignoring snapshot for locally owned replica");
                Ok(())
            }
            (Ownership::Remote, SyncStream::Write(_)) => Ok(()),
        }
    }

    pub fn snapshot(&self) -> AvatarSnapshot {
        AvatarSnapshot {
            pose: self.pose,
            health: self.health,
            kill_count: self.kill_count,
        }
    }

    /// Move the rendered pose toward the target; remote replicas only
    pub fn step(&mut self, dt_secs: f32, gain: f32) {
        if self.is_local() {
            return;
        }
        let f = interpolation::smoothing_factor(gain, dt_secs);
        self.pose = interpolation::step_pose(&self.pose, &self.target_pose, f);
    }

    // Combat state primitives; the authority rules live in `combat`.

    pub(crate) fn set_health(&mut self, health: i32) {
        self.health = health;
    }

    /// Enter the dead state; false if already dead this life
    pub(crate) fn mark_dead(&mut self) -> bool {
        if self.dead {
            return false;
        }
        self.dead = true;
        true
    }

    /// Start a new life at `root` with `health`
    pub(crate) fn revive(&mut self, root: Vec3, health: i32) {
        let offset = root - self.root;
        self.root = root;
        self.pose = self.pose.translated(offset);
        self.health = health;
        self.dead = false;
        self.life += 1;
    }

    /// Drop remembered credits for a victim that left the room
    pub(crate) fn forget_victim(&mut self, victim: EntityHandle) {
        self.credited.retain(|credit| credit.victim != victim);
    }

    #[cfg(test)]
    pub(crate) fn credits_held(&self) -> usize {
        self.credited.len()
    }

    /// Apply a kill credit once; false if already applied
    pub(crate) fn credit_kill(&mut self, credit: KillCredit) -> bool {
        if !self.credited.insert(credit) {
            return false;
        }
        self.kill_count = self.kill_count.saturating_add(1);
        true
    }
}
