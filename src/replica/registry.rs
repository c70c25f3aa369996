//! Replicas known to one process, keyed by entity handle

use std::collections::HashMap;

use tracing::warn;

use super::AvatarReplica;
use crate::transport::{EntityHandle, ParticipantId};

/// At most one replica per participant
#[derive(Debug, Default)]
pub struct ReplicaRegistry {
    replicas: HashMap<EntityHandle, AvatarReplica>,
}

impl ReplicaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a replica, evicting any older replica of the same participant.
    /// Returns the evicted handle.
    pub fn insert(&mut self, replica: AvatarReplica) -> Option<EntityHandle> {
        let stale = self
            .replicas
            .values()
            .find(|r| r.owner() == replica.owner() && r.entity() != replica.entity())
            .map(|r| r.entity());

        if let Some(handle) = stale {
            warn!(
                participant = %replica.owner(),
                old = %handle,
                new = %replica.entity(),
                "Replacing stale replica"
            );
            self.replicas.remove(&handle);
        }

        self.replicas.insert(replica.entity(), replica);
        stale
    }

    /// Remove a departed entity and every kill credit naming it as victim
    pub fn remove(&mut self, entity: EntityHandle) -> Option<AvatarReplica> {
        let removed = self.replicas.remove(&entity);
        for replica in self.replicas.values_mut() {
            replica.forget_victim(entity);
        }
        removed
    }

    pub fn contains(&self, entity: EntityHandle) -> bool {
        self.replicas.contains_key(&entity)
    }

    #[cfg(test)]
    pub fn get(&self, entity: EntityHandle) -> Option<&AvatarReplica> {
        self.replicas.get(&entity)
    }

    pub fn get_mut(&mut self, entity: EntityHandle) -> Option<&mut AvatarReplica> {
        self.replicas.get_mut(&entity)
    }

    pub fn find_by_owner(&self, owner: ParticipantId) -> Option<&AvatarReplica> {
        self.replicas.values().find(|r| r.owner() == owner)
    }

    /// The replica representing this process's participant
    #[cfg(test)]
    pub fn local(&self) -> Option<&AvatarReplica> {
        self.replicas.values().find(|r| r.is_local())
    }

    pub fn local_mut(&mut self) -> Option<&mut AvatarReplica> {
        self.replicas.values_mut().find(|r| r.is_local())
    }

    pub fn iter(&self) -> impl Iterator<Item = &AvatarReplica> {
        self.replicas.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut AvatarReplica> {
        self.replicas.values_mut()
    }

    pub fn len(&self) -> usize {
        self.replicas.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.replicas.is_empty()
    }

    pub fn clear(&mut self) {
        self.replicas.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::KillCredit;
    use glam::Vec3;

    fn replica(entity: u32, owner: i32) -> AvatarReplica {
        AvatarReplica::new(
            EntityHandle(entity),
            ParticipantId(owner),
            ParticipantId(1),
            Vec3::ZERO,
            100,
        )
    }

    #[test]
    fn test_one_replica_per_participant() {
        let mut registry = ReplicaRegistry::new();
        assert_eq!(registry.insert(replica(1001, 2)), None);
        assert_eq!(registry.insert(replica(1002, 3)), None);
        assert_eq!(registry.insert(replica(1005, 2)), Some(EntityHandle(1001)));

        assert_eq!(registry.len(), 2);
        assert_eq!(
            registry.find_by_owner(ParticipantId(2)).map(|r| r.entity()),
            Some(EntityHandle(1005))
        );
    }

    #[test]
    fn test_local_lookup() {
        let mut registry = ReplicaRegistry::new();
        registry.insert(replica(1001, 2));
        assert!(registry.local().is_none());

        registry.insert(replica(1002, 1));
        assert_eq!(registry.local().map(|r| r.entity()), Some(EntityHandle(1002)));
    }

    #[test]
    fn test_remove_prunes_credits_for_victim() {
        let mut registry = ReplicaRegistry::new();
        registry.insert(replica(1001, 2));
        registry.insert(replica(1002, 3));
        registry.insert(replica(1003, 4));

        let attacker = registry.get_mut(EntityHandle(1001)).unwrap();
        for (victim, life) in [(1002, 0), (1002, 1), (1003, 0)] {
            assert!(attacker.credit_kill(KillCredit {
                victim: EntityHandle(victim),
                life,
            }));
        }
        assert_eq!(attacker.credits_held(), 3);

        registry.remove(EntityHandle(1002));
        let attacker = registry.get(EntityHandle(1001)).unwrap();
        assert_eq!(attacker.credits_held(), 1);
        assert_eq!(attacker.kill_count(), 3);
    }
}
