//! One participant process: session, replicas and combat behind one loop
//!
//! Everything a peer owns is mutated from a single task. The loop drains
//! transport notifications and steps interpolation every frame, and publishes
//! the local snapshot on a separate, slower sync tick.

pub mod status;

use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use parking_lot::RwLock;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tokio::sync::watch;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::combat::{CombatAuthority, CombatEvent, CombatSettings, DamageOutcome};
use crate::config::Config;
use crate::replica::{AvatarReplica, PoseSource, ReplicaRegistry, SnapshotStats, SyncStream};
use crate::session::{Session, SessionSettings};
use crate::transport::{
    EntityHandle, ParticipantId, PrefabKind, RpcCall, RpcTarget, Transport, TransportError,
    TransportEvent,
};
use crate::util::time::{period_from_hz, unix_millis};

pub use status::{PeerStatus, ReplicaStatus, SharedStatus};

/// Loop timing and demo behaviour
#[derive(Debug, Clone)]
pub struct PeerSettings {
    pub frame_period: Duration,
    pub sync_period: Duration,
    pub interpolation_gain: f32,
    pub max_health: i32,
    /// Demo only: hit a random remote avatar this often
    pub auto_fire: Option<Duration>,
}

impl PeerSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            frame_period: period_from_hz(config.frame_rate_hz),
            sync_period: period_from_hz(config.sync_rate_hz),
            interpolation_gain: config.interpolation_gain,
            max_health: config.max_health,
            auto_fire: None,
        }
    }
}

/// A participant process
pub struct Peer<T: Transport> {
    label: String,
    transport: T,
    session: Session,
    replicas: ReplicaRegistry,
    combat: CombatAuthority,
    pose_source: Box<dyn PoseSource>,
    settings: PeerSettings,
    rng: ChaCha8Rng,

    started_at: Instant,
    last_frame: Option<Instant>,
    next_fire: Option<Instant>,

    snapshot_buf: BytesMut,
    stats: SnapshotStats,
    status: SharedStatus,
}

impl<T: Transport> Peer<T> {
    pub fn new(
        label: impl Into<String>,
        transport: T,
        config: &Config,
        pose_source: Box<dyn PoseSource>,
        seed: u64,
    ) -> Self {
        let label = label.into();
        Self {
            status: Arc::new(RwLock::new(PeerStatus::new(label.clone()))),
            label,
            transport,
            session: Session::new(SessionSettings::from_config(config)),
            replicas: ReplicaRegistry::new(),
            combat: CombatAuthority::new(CombatSettings::from_config(config), seed),
            pose_source,
            settings: PeerSettings::from_config(config),
            rng: ChaCha8Rng::seed_from_u64(seed.wrapping_add(1)),
            started_at: Instant::now(),
            last_frame: None,
            next_fire: None,
            snapshot_buf: BytesMut::with_capacity(crate::replica::SNAPSHOT_LEN),
            stats: SnapshotStats::default(),
        }
    }

    pub fn with_auto_fire(mut self, every: Duration) -> Self {
        self.settings.auto_fire = Some(every);
        self
    }

    #[cfg(test)]
    pub fn session(&self) -> &Session {
        &self.session
    }

    #[cfg(test)]
    pub fn replicas(&self) -> &ReplicaRegistry {
        &self.replicas
    }

    #[cfg(test)]
    pub fn combat(&self) -> &CombatAuthority {
        &self.combat
    }

    #[cfg(test)]
    pub fn local_id(&self) -> Option<ParticipantId> {
        self.session.local_id()
    }

    pub fn status_handle(&self) -> SharedStatus {
        self.status.clone()
    }

    pub fn connect(&mut self) {
        self.session.connect(&mut self.transport);
    }

    /// Leave the room; pending respawns die with the session
    pub fn disconnect(&mut self) {
        self.session.disconnect(&mut self.transport);
        self.drop_room_state();
        self.publish_status();
    }

    /// Drain and apply every pending transport notification
    pub fn pump_events(&mut self, now: Instant) {
        while let Some(event) = self.transport.poll_event() {
            self.session.handle_event(&event, &mut self.transport, now);
            self.handle_event(event, now);
        }
    }

    fn handle_event(&mut self, event: TransportEvent, now: Instant) {
        match event {
            TransportEvent::EntityInstantiated {
                entity,
                owner,
                kind: PrefabKind::Avatar,
                position,
                ..
            } => {
                let Some(local_id) = self.session.local_id() else {
                    return;
                };
                if self.replicas.contains(entity) {
                    return;
                }
                let replica =
                    AvatarReplica::new(entity, owner, local_id, position, self.settings.max_health);
                info!(
                    peer = %self.label,
                    entity = %entity,
                    owner = %owner,
                    ownership = ?replica.ownership(),
                    "Avatar replica created"
                );
                if let Some(stale) = self.replicas.insert(replica) {
                    self.combat.cancel_respawn(stale);
                }
            }
            TransportEvent::EntityDestroyed { entity } => {
                if self.replicas.remove(entity).is_some() {
                    info!(peer = %self.label, entity = %entity, "Avatar replica destroyed");
                }
                self.combat.cancel_respawn(entity);
            }
            TransportEvent::Snapshot { entity, payload } => {
                let Some(replica) = self.replicas.get_mut(entity) else {
                    debug!(peer = %self.label, entity = %entity, "Snapshot for unknown replica");
                    return;
                };
                match replica.serialize(SyncStream::Read(&payload)) {
                    Ok(()) => self.stats.record_received(),
                    Err(e) => {
                        self.stats.record_rejected();
                        warn!(peer = %self.label, entity = %entity, error = %e, "Rejected snapshot");
                    }
                }
            }
            TransportEvent::Rpc {
                entity,
                call:
                    RpcCall::TakeDamage {
                        damage,
                        attacker_id,
                    },
            } => {
                let outcome = self.combat.apply_damage(
                    &mut self.replicas,
                    entity,
                    CombatEvent {
                        damage,
                        attacker_id,
                    },
                    &mut self.transport,
                    now,
                );
                if let DamageOutcome::Died { .. } = outcome {
                    self.publish_status();
                }
            }
            TransportEvent::Rpc {
                entity,
                call: RpcCall::AddKill { credit },
            } => {
                self.combat
                    .apply_kill_credit(&mut self.replicas, entity, credit);
            }
            TransportEvent::Disconnected { .. } => {
                self.drop_room_state();
            }
            _ => {}
        }
    }

    /// Per-frame work: spawn, respawn, local sampling, remote smoothing
    pub fn frame(&mut self, now: Instant) {
        if let (Some(avatar), Some(local_id)) = (
            self.session.poll_spawn(&mut self.transport, now),
            self.session.local_id(),
        ) {
            self.replicas.insert(AvatarReplica::new(
                avatar.entity,
                local_id,
                local_id,
                avatar.position,
                self.settings.max_health,
            ));
            debug!(peer = %self.label, entity = %avatar.entity, slot = avatar.slot, "Local replica created");
        }

        self.combat.poll_respawns(&mut self.replicas, now);

        let tracked = self.pose_source.sample(now.duration_since(self.started_at));
        if let Some(local) = self.replicas.local_mut() {
            local.set_tracked_pose(tracked);
        }

        let dt = self
            .last_frame
            .map(|last| now.saturating_duration_since(last).as_secs_f32())
            .unwrap_or(0.0);
        self.last_frame = Some(now);
        for replica in self.replicas.iter_mut() {
            replica.step(dt, self.settings.interpolation_gain);
        }

        self.maybe_auto_fire(now);
    }

    /// Write-direction sync tick: publish the local snapshot
    pub fn sync_tick(&mut self) {
        if let Some(local) = self.replicas.local_mut() {
            self.snapshot_buf.clear();
            let entity = local.entity();
            if local
                .serialize(SyncStream::Write(&mut self.snapshot_buf))
                .is_ok()
            {
                let payload = self.snapshot_buf.split().freeze();
                let len = payload.len();
                match self.transport.send_snapshot(entity, payload) {
                    Ok(()) => self.stats.record_sent(len),
                    Err(e) => debug!(peer = %self.label, error = %e, "Snapshot not sent"),
                }
            }
        }
        self.publish_status();
    }

    /// Send damage to `target`'s avatar; returns the addressed entity
    pub fn fire_at(
        &mut self,
        target: ParticipantId,
        damage: i32,
    ) -> Result<Option<EntityHandle>, TransportError> {
        let attacker_id = self.session.local_id().ok_or(TransportError::NotConnected)?;
        let Some(entity) = self.replicas.find_by_owner(target).map(|r| r.entity()) else {
            return Ok(None);
        };
        self.transport.send_rpc(
            entity,
            RpcTarget::Owner,
            RpcCall::TakeDamage {
                damage,
                attacker_id,
            },
        )?;
        debug!(peer = %self.label, target = %target, damage, "Fired");
        Ok(Some(entity))
    }

    fn maybe_auto_fire(&mut self, now: Instant) {
        let Some(every) = self.settings.auto_fire else {
            return;
        };
        let due = *self.next_fire.get_or_insert(now + every);
        if now < due {
            return;
        }
        self.next_fire = Some(now + every);

        let targets: Vec<ParticipantId> = self
            .replicas
            .iter()
            .filter(|r| !r.is_local())
            .map(|r| r.owner())
            .collect();
        if targets.is_empty() {
            return;
        }
        let target = targets[self.rng.gen_range(0..targets.len())];
        let damage = self.rng.gen_range(10..=40);
        if let Err(e) = self.fire_at(target, damage) {
            warn!(peer = %self.label, error = %e, "Auto-fire failed");
        }
    }

    fn drop_room_state(&mut self) {
        self.replicas.clear();
        self.combat.cancel_all();
        self.last_frame = None;
    }

    pub fn status(&self) -> PeerStatus {
        let mut replicas: Vec<ReplicaStatus> =
            self.replicas.iter().map(ReplicaStatus::from).collect();
        replicas.sort_by_key(|r| r.entity);

        PeerStatus {
            label: self.label.clone(),
            participant: self.session.local_id(),
            state: self.session.state(),
            room: self.session.room().map(str::to_string),
            members: self.session.members().to_vec(),
            last_error: self.session.last_error().map(|e| e.to_string()),
            replicas,
            pending_respawns: self.combat.respawns().len(),
            snapshots: self.stats.clone(),
            updated_at: unix_millis(),
        }
    }

    fn publish_status(&self) {
        *self.status.write() = self.status();
    }

    /// Run until `shutdown` flips to true
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(peer = %self.label, "Peer started");
        self.connect();

        let mut frame = interval(self.settings.frame_period);
        frame.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut sync = interval(self.settings.sync_period);
        sync.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                now = frame.tick() => {
                    self.pump_events(now);
                    self.frame(now);
                }
                _ = sync.tick() => {
                    self.sync_tick();
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        self.disconnect();
        info!(peer = %self.label, "Peer stopped");
    }
}
