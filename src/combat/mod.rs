//! Combat authority - damage, death, kill credit, respawn
//!
//! Health has a single writer: the process that owns the replica. Damage
//! RPCs arriving anywhere else are dropped at the receiver.

pub mod respawn;

use std::time::Duration;

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::replica::ReplicaRegistry;
use crate::session::random_spawn_point;
use crate::transport::{EntityHandle, KillCredit, ParticipantId, RpcCall, RpcTarget, Transport};

pub use respawn::RespawnScheduler;

/// Combat tuning
#[derive(Debug, Clone)]
pub struct CombatSettings {
    pub max_health: i32,
    pub respawn_delay: Duration,
    /// Radius of the circle respawns land on
    pub spawn_radius: f32,
}

impl CombatSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_health: config.max_health,
            respawn_delay: config.respawn_delay,
            spawn_radius: config.spawn_radius,
        }
    }
}

/// Damage addressed to one replica
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CombatEvent {
    pub damage: i32,
    pub attacker_id: ParticipantId,
}

/// Why a damage event changed nothing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    /// Target no longer exists on this process
    UnknownTarget,
    /// Target is owned by another process
    NotOwner,
    /// Damage must be positive
    InvalidDamage,
    /// Death already triggered, respawn pending
    AlreadyDead,
}

/// Result of applying one damage event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DamageOutcome {
    Ignored(IgnoreReason),
    Applied {
        health: i32,
    },
    /// Death triggered; `credited` is the attacker replica, if it was found
    Died {
        health: i32,
        credited: Option<EntityHandle>,
    },
}

/// Apply damage to a health value, returns (new_health, is_dead)
pub fn apply_damage(current_health: i32, damage: i32) -> (i32, bool) {
    let new_health = current_health.saturating_sub(damage);
    (new_health, new_health <= 0)
}

/// Enforces the single-writer rule and sequences death and respawn
pub struct CombatAuthority {
    settings: CombatSettings,
    respawns: RespawnScheduler,
    rng: ChaCha8Rng,
}

impl CombatAuthority {
    pub fn new(settings: CombatSettings, seed: u64) -> Self {
        Self {
            settings,
            respawns: RespawnScheduler::new(),
            rng: ChaCha8Rng::seed_from_u64(seed),
        }
    }

    pub fn respawns(&self) -> &RespawnScheduler {
        &self.respawns
    }

    /// Handle a `TakeDamage` RPC delivered to `target`
    pub fn apply_damage(
        &mut self,
        replicas: &mut ReplicaRegistry,
        target: EntityHandle,
        event: CombatEvent,
        transport: &mut dyn Transport,
        now: Instant,
    ) -> DamageOutcome {
        let Some(replica) = replicas.get_mut(target) else {
            debug!(entity = %target, "Damage for unknown replica dropped");
            return DamageOutcome::Ignored(IgnoreReason::UnknownTarget);
        };

        if !replica.is_local() {
            debug!(entity = %target, "Damage for remote replica dropped");
            return DamageOutcome::Ignored(IgnoreReason::NotOwner);
        }

        if event.damage <= 0 {
            warn!(
                entity = %target,
                damage = event.damage,
                attacker = %event.attacker_id,
                "Rejected non-positive damage"
            );
            return DamageOutcome::Ignored(IgnoreReason::InvalidDamage);
        }

        if replica.is_dead() {
            debug!(entity = %target, "Damage while respawn pending ignored");
            return DamageOutcome::Ignored(IgnoreReason::AlreadyDead);
        }

        let (health, killed) = apply_damage(replica.health(), event.damage);
        replica.set_health(health);
        info!(
            entity = %target,
            damage = event.damage,
            attacker = %event.attacker_id,
            health,
            "Took damage"
        );

        if !killed || !replica.mark_dead() {
            return DamageOutcome::Applied { health };
        }

        let credit = KillCredit {
            victim: target,
            life: replica.life(),
        };
        info!(entity = %target, life = credit.life, "Player died");

        let credited = replicas
            .find_by_owner(event.attacker_id)
            .map(|attacker| attacker.entity());

        match credited {
            Some(attacker) => {
                if let Err(e) =
                    transport.send_rpc(attacker, RpcTarget::All, RpcCall::AddKill { credit })
                {
                    warn!(attacker = %attacker, error = %e, "Failed to broadcast kill credit");
                }
            }
            None => {
                debug!(
                    attacker = %event.attacker_id,
                    "Attacker replica not found, kill credit skipped"
                );
            }
        }

        self.respawns
            .schedule(target, now + self.settings.respawn_delay);

        DamageOutcome::Died { health, credited }
    }

    /// Handle an `AddKill` RPC delivered to `attacker`; true if applied
    pub fn apply_kill_credit(
        &mut self,
        replicas: &mut ReplicaRegistry,
        attacker: EntityHandle,
        credit: KillCredit,
    ) -> bool {
        let Some(replica) = replicas.get_mut(attacker) else {
            debug!(entity = %attacker, "Kill credit for unknown replica dropped");
            return false;
        };

        if !replica.credit_kill(credit) {
            debug!(entity = %attacker, victim = %credit.victim, "Duplicate kill credit ignored");
            return false;
        }

        info!(
            entity = %attacker,
            victim = %credit.victim,
            kill_count = replica.kill_count(),
            "Kill credited"
        );
        true
    }

    /// Revive every local replica whose respawn is due
    pub fn poll_respawns(&mut self, replicas: &mut ReplicaRegistry, now: Instant) -> Vec<EntityHandle> {
        let mut revived = Vec::new();

        for entity in self.respawns.take_due(now) {
            let Some(replica) = replicas.get_mut(entity) else {
                continue;
            };
            if !replica.is_local() || !replica.is_dead() {
                continue;
            }

            let root = random_spawn_point(&mut self.rng, self.settings.spawn_radius);
            replica.revive(root, self.settings.max_health);
            info!(
                entity = %entity,
                life = replica.life(),
                x = root.x,
                z = root.z,
                "Respawned"
            );
            revived.push(entity);
        }

        revived
    }

    /// Drop the pending respawn of a replica that went away
    pub fn cancel_respawn(&mut self, entity: EntityHandle) {
        if self.respawns.cancel(entity) {
            debug!(entity = %entity, "Pending respawn cancelled");
        }
    }

    pub fn cancel_all(&mut self) {
        self.respawns.cancel_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::replica::AvatarReplica;
    use crate::transport::{LoopbackHub, LoopbackTransport, PrefabKind, TransportEvent};
    use glam::{Quat, Vec3};

    const VICTIM_OWNER: ParticipantId = ParticipantId(1);
    const ATTACKER: ParticipantId = ParticipantId(2);

    fn settings() -> CombatSettings {
        CombatSettings {
            max_health: 100,
            respawn_delay: Duration::from_secs(3),
            spawn_radius: 5.0,
        }
    }

    /// One connected endpoint in a room plus a registry holding our avatar
    /// and the attacker's
    struct Fixture {
        _hub: LoopbackHub,
        transport: LoopbackTransport,
        _attacker_transport: LoopbackTransport,
        replicas: ReplicaRegistry,
        victim: EntityHandle,
        attacker: EntityHandle,
    }

    fn fixture() -> Fixture {
        let hub = LoopbackHub::new("1.0");
        let mut transport = hub.endpoint();
        transport.connect("1.0").unwrap();
        transport.join_or_create_room("VRArena", 4).unwrap();
        let victim = transport
            .instantiate_entity(PrefabKind::Avatar, Vec3::X * 5.0, Quat::IDENTITY)
            .unwrap();

        let mut attacker_transport = hub.endpoint();
        attacker_transport.connect("1.0").unwrap();
        attacker_transport.join_or_create_room("VRArena", 4).unwrap();
        let attacker = attacker_transport
            .instantiate_entity(PrefabKind::Avatar, Vec3::Z * 5.0, Quat::IDENTITY)
            .unwrap();
        while transport.poll_event().is_some() {}

        let mut replicas = ReplicaRegistry::new();
        replicas.insert(AvatarReplica::new(
            victim,
            VICTIM_OWNER,
            VICTIM_OWNER,
            Vec3::X * 5.0,
            100,
        ));
        replicas.insert(AvatarReplica::new(
            attacker,
            ATTACKER,
            VICTIM_OWNER,
            Vec3::Z * 5.0,
            100,
        ));

        Fixture {
            _hub: hub,
            transport,
            _attacker_transport: attacker_transport,
            replicas,
            victim,
            attacker,
        }
    }

    fn hit(damage: i32) -> CombatEvent {
        CombatEvent {
            damage,
            attacker_id: ATTACKER,
        }
    }

    fn kill_credits(transport: &mut LoopbackTransport) -> Vec<KillCredit> {
        std::iter::from_fn(|| transport.poll_event())
            .filter_map(|e| match e {
                TransportEvent::Rpc {
                    call: RpcCall::AddKill { credit },
                    ..
                } => Some(credit),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_damage_accumulates_until_death() {
        let mut f = fixture();
        let mut combat = CombatAuthority::new(settings(), 1);
        let now = Instant::now();

        for (damage, expected) in [(10, 90), (25, 65), (40, 25)] {
            let outcome = combat.apply_damage(
                &mut f.replicas,
                f.victim,
                hit(damage),
                &mut f.transport,
                now,
            );
            assert_eq!(outcome, DamageOutcome::Applied { health: expected });
        }
        assert!(kill_credits(&mut f.transport).is_empty());
    }

    #[test]
    fn test_death_triggers_once() {
        let mut f = fixture();
        let mut combat = CombatAuthority::new(settings(), 1);
        let now = Instant::now();

        let outcome =
            combat.apply_damage(&mut f.replicas, f.victim, hit(150), &mut f.transport, now);
        assert_eq!(
            outcome,
            DamageOutcome::Died {
                health: -50,
                credited: Some(f.attacker)
            }
        );

        for _ in 0..5 {
            let outcome =
                combat.apply_damage(&mut f.replicas, f.victim, hit(30), &mut f.transport, now);
            assert_eq!(outcome, DamageOutcome::Ignored(IgnoreReason::AlreadyDead));
        }

        assert_eq!(f.replicas.get(f.victim).unwrap().health(), -50);
        assert_eq!(
            kill_credits(&mut f.transport),
            vec![KillCredit {
                victim: f.victim,
                life: 0
            }]
        );
        assert_eq!(combat.respawns().len(), 1);
    }

    #[test]
    fn test_remote_replica_health_is_untouched() {
        let mut f = fixture();
        let mut combat = CombatAuthority::new(settings(), 1);

        let outcome = combat.apply_damage(
            &mut f.replicas,
            f.attacker,
            hit(500),
            &mut f.transport,
            Instant::now(),
        );
        assert_eq!(outcome, DamageOutcome::Ignored(IgnoreReason::NotOwner));
        assert_eq!(f.replicas.get(f.attacker).unwrap().health(), 100);
    }

    #[test]
    fn test_stale_and_invalid_damage_are_noops() {
        let mut f = fixture();
        let mut combat = CombatAuthority::new(settings(), 1);
        let now = Instant::now();

        assert_eq!(
            combat.apply_damage(
                &mut f.replicas,
                EntityHandle(77),
                hit(10),
                &mut f.transport,
                now
            ),
            DamageOutcome::Ignored(IgnoreReason::UnknownTarget)
        );
        assert_eq!(
            combat.apply_damage(&mut f.replicas, f.victim, hit(0), &mut f.transport, now),
            DamageOutcome::Ignored(IgnoreReason::InvalidDamage)
        );
        assert_eq!(f.replicas.get(f.victim).unwrap().health(), 100);
    }

    #[test]
    fn test_missing_attacker_still_respawns() {
        let mut f = fixture();
        f.replicas.remove(f.attacker);
        let mut combat = CombatAuthority::new(settings(), 1);
        let t0 = Instant::now();

        let outcome =
            combat.apply_damage(&mut f.replicas, f.victim, hit(100), &mut f.transport, t0);
        assert_eq!(
            outcome,
            DamageOutcome::Died {
                health: 0,
                credited: None
            }
        );
        assert!(kill_credits(&mut f.transport).is_empty());

        assert!(combat
            .poll_respawns(&mut f.replicas, t0 + Duration::from_millis(2999))
            .is_empty());
        assert_eq!(
            combat.poll_respawns(&mut f.replicas, t0 + Duration::from_secs(3)),
            vec![f.victim]
        );

        let victim = f.replicas.get(f.victim).unwrap();
        assert_eq!(victim.health(), 100);
        assert!(!victim.is_dead());
        assert!((victim.root().length() - 5.0).abs() < 1e-4);
        assert_eq!(victim.root().y, 0.0);
    }

    #[test]
    fn test_new_life_can_die_again() {
        let mut f = fixture();
        let mut combat = CombatAuthority::new(settings(), 1);
        let t0 = Instant::now();

        combat.apply_damage(&mut f.replicas, f.victim, hit(100), &mut f.transport, t0);
        let t1 = t0 + Duration::from_secs(3);
        combat.poll_respawns(&mut f.replicas, t1);
        combat.apply_damage(&mut f.replicas, f.victim, hit(100), &mut f.transport, t1);

        assert_eq!(
            kill_credits(&mut f.transport),
            vec![
                KillCredit {
                    victim: f.victim,
                    life: 0
                },
                KillCredit {
                    victim: f.victim,
                    life: 1
                },
            ]
        );
    }

    #[test]
    fn test_cancelled_respawn_never_fires() {
        let mut f = fixture();
        let mut combat = CombatAuthority::new(settings(), 1);
        let t0 = Instant::now();

        combat.apply_damage(&mut f.replicas, f.victim, hit(100), &mut f.transport, t0);
        combat.cancel_respawn(f.victim);

        assert!(combat
            .poll_respawns(&mut f.replicas, t0 + Duration::from_secs(10))
            .is_empty());
        assert!(f.replicas.get(f.victim).unwrap().is_dead());
    }

    #[test]
    fn test_kill_credit_is_idempotent() {
        let mut f = fixture();
        let mut combat = CombatAuthority::new(settings(), 1);
        let credit = KillCredit {
            victim: f.victim,
            life: 0,
        };

        assert!(combat.apply_kill_credit(&mut f.replicas, f.attacker, credit));
        assert!(!combat.apply_kill_credit(&mut f.replicas, f.attacker, credit));
        assert!(!combat.apply_kill_credit(&mut f.replicas, EntityHandle(5), credit));
        assert_eq!(f.replicas.get(f.attacker).unwrap().kill_count(), 1);
    }

    #[test]
    fn test_respawn_restores_configured_max_health() {
        let mut f = fixture();
        let mut combat = CombatAuthority::new(
            CombatSettings {
                max_health: 80,
                ..settings()
            },
            1,
        );
        let t0 = Instant::now();

        let outcome =
            combat.apply_damage(&mut f.replicas, f.victim, hit(130), &mut f.transport, t0);
        assert!(matches!(outcome, DamageOutcome::Died { health: -30, .. }));
        assert_eq!(f.replicas.get(f.victim).unwrap().health(), -30);

        combat.poll_respawns(&mut f.replicas, t0 + Duration::from_secs(3));
        assert_eq!(f.replicas.get(f.victim).unwrap().health(), 80);
    }
}
