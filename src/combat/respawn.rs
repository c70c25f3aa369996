//! Pending respawns, keyed by entity handle

use std::collections::HashMap;

use tokio::time::Instant;

use crate::transport::EntityHandle;

/// One-shot deadlines that can be cancelled or replaced
#[derive(Debug, Default)]
pub struct RespawnScheduler {
    pending: HashMap<EntityHandle, Instant>,
}

impl RespawnScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedule a respawn, replacing any earlier one for the same entity
    pub fn schedule(&mut self, entity: EntityHandle, at: Instant) {
        self.pending.insert(entity, at);
    }

    /// Returns true if something was pending
    pub fn cancel(&mut self, entity: EntityHandle) -> bool {
        self.pending.remove(&entity).is_some()
    }

    pub fn cancel_all(&mut self) {
        self.pending.clear();
    }

    #[cfg(test)]
    pub fn pending(&self, entity: EntityHandle) -> Option<Instant> {
        self.pending.get(&entity).copied()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Remove and return every entity due at `now`, earliest first
    pub fn take_due(&mut self, now: Instant) -> Vec<EntityHandle> {
        let mut due: Vec<(Instant, EntityHandle)> = self
            .pending
            .iter()
            .filter(|(_, at)| **at <= now)
            .map(|(entity, at)| (*at, *entity))
            .collect();
        due.sort();

        for (_, entity) in &due {
            self.pending.remove(entity);
        }
        due.into_iter().map(|(_, entity)| entity).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_due_entries_fire_once_in_order() {
        let t0 = Instant::now();
        let mut scheduler = RespawnScheduler::new();
        scheduler.schedule(EntityHandle(2), t0 + Duration::from_secs(2));
        scheduler.schedule(EntityHandle(1), t0 + Duration::from_secs(1));
        scheduler.schedule(EntityHandle(3), t0 + Duration::from_secs(9));

        assert!(scheduler.take_due(t0).is_empty());
        assert_eq!(
            scheduler.take_due(t0 + Duration::from_secs(3)),
            vec![EntityHandle(1), EntityHandle(2)]
        );
        assert!(scheduler.take_due(t0 + Duration::from_secs(3)).is_empty());
        assert_eq!(scheduler.len(), 1);
    }

    #[test]
    fn test_cancel_and_replace() {
        let t0 = Instant::now();
        let mut scheduler = RespawnScheduler::new();
        scheduler.schedule(EntityHandle(1), t0 + Duration::from_secs(1));
        scheduler.schedule(EntityHandle(1), t0 + Duration::from_secs(5));
        assert_eq!(
            scheduler.pending(EntityHandle(1)),
            Some(t0 + Duration::from_secs(5))
        );

        assert!(scheduler.cancel(EntityHandle(1)));
        assert!(!scheduler.cancel(EntityHandle(1)));
        assert!(scheduler.take_due(t0 + Duration::from_secs(10)).is_empty());
    }
}
