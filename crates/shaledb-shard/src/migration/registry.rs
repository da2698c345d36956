//! Registry enforcing at-most-one inbound and outbound migration per shard.

use std::sync::Arc;

use parking_lot::Mutex;

use shaledb_routing::{ChunkRange, NamespaceIdentity, ShardId};

use crate::error::ShardError;

/// Description of an in-flight migration this shard participates in.
#[derive(Clone, Debug)]
pub struct ActiveMigration {
    /// The collection being migrated.
    pub ns: NamespaceIdentity,
    /// The chunk range in flight.
    pub range: ChunkRange,
    /// The other shard: donor for a receive, destination for a donation.
    pub peer: ShardId,
}

#[derive(Default, Debug)]
struct Slots {
    inbound: Option<ActiveMigration>,
    outbound: Option<ActiveMigration>,
}

/// Process-wide migration registration. A registration must be released
/// by dropping the guard its holder received.
#[derive(Debug)]
pub struct MigrationRegistry {
    slots: Mutex<Slots>,
}

impl MigrationRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        MigrationRegistry {
            slots: Mutex::new(Slots::default()),
        }
    }

    /// Registers intent to receive a chunk. Fails if this shard is already
    /// receiving any chunk, or donating from the same collection.
    pub fn register_receive(
        self: &Arc<Self>,
        migration: ActiveMigration,
    ) -> Result<ReceiveGuard, ShardError> {
        let mut slots = self.slots.lock();
        if let Some(active) = &slots.inbound {
            return Err(ShardError::ConflictingOperation(format!(
                "already receiving chunk {} of {}",
                active.range, active.ns
            )));
        }
        if let Some(active) = &slots.outbound {
            if active.ns == migration.ns {
                return Err(ShardError::ConflictingOperation(format!(
                    "already donating chunk {} of {}",
                    active.range, active.ns
                )));
            }
        }
        tracing::debug!(
            ns = %migration.ns,
            range = %migration.range,
            from = %migration.peer,
            "registered chunk receive"
        );
        slots.inbound = Some(migration);
        Ok(ReceiveGuard {
            registry: self.clone(),
        })
    }

    /// Registers intent to donate a chunk. Fails if this shard is already
    /// donating any chunk, or receiving into the same collection.
    pub fn register_donate(
        self: &Arc<Self>,
        migration: ActiveMigration,
    ) -> Result<DonateGuard, ShardError> {
        let mut slots = self.slots.lock();
        if let Some(active) = &slots.outbound {
            return Err(ShardError::ConflictingOperation(format!(
                "already donating chunk {} of {}",
                active.range, active.ns
            )));
        }
        if let Some(active) = &slots.inbound {
            if active.ns == migration.ns {
                return Err(ShardError::ConflictingOperation(format!(
                    "already receiving chunk {} of {}",
                    active.range, active.ns
                )));
            }
        }
        tracing::debug!(
            ns = %migration.ns,
            range = %migration.range,
            to = %migration.peer,
            "registered chunk donation"
        );
        slots.outbound = Some(migration);
        Ok(DonateGuard {
            registry: self.clone(),
        })
    }

    /// Returns the in-flight receive, if any.
    pub fn active_receive(&self) -> Option<ActiveMigration> {
        self.slots.lock().inbound.clone()
    }

    /// Returns the in-flight donation, if any.
    pub fn active_donate(&self) -> Option<ActiveMigration> {
        self.slots.lock().outbound.clone()
    }
}

impl Default for MigrationRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Releases the inbound slot on drop.
#[derive(Debug)]
pub struct ReceiveGuard {
    registry: Arc<MigrationRegistry>,
}

impl Drop for ReceiveGuard {
    fn drop(&mut self) {
        self.registry.slots.lock().inbound = None;
    }
}

/// Releases the outbound slot on drop.
#[derive(Debug)]
pub struct DonateGuard {
    registry: Arc<MigrationRegistry>,
}

impl Drop for DonateGuard {
    fn drop(&mut self) {
        self.registry.slots.lock().outbound = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shaledb_routing::RouteKey;

    fn migration(db: &str, coll: &str, min: i64, max: i64) -> ActiveMigration {
        ActiveMigration {
            ns: NamespaceIdentity::new(None, db, coll).unwrap(),
            range: ChunkRange::new(RouteKey::number(min), RouteKey::number(max)).unwrap(),
            peer: ShardId::new("shard-b"),
        }
    }

    #[test]
    fn test_at_most_one_inbound() {
        let registry = Arc::new(MigrationRegistry::new());
        let guard = registry.register_receive(migration("db", "a", 0, 10)).unwrap();

        // Even a non-overlapping range on another collection conflicts:
        // the destination handles one chunk receive at a time.
        let err = registry
            .register_receive(migration("db", "b", 50, 60))
            .unwrap_err();
        assert!(matches!(err, ShardError::ConflictingOperation(_)));

        drop(guard);
        registry.register_receive(migration("db", "b", 50, 60)).unwrap();
    }

    #[test]
    fn test_at_most_one_outbound() {
        let registry = Arc::new(MigrationRegistry::new());
        let _guard = registry.register_donate(migration("db", "a", 0, 10)).unwrap();
        assert!(registry.register_donate(migration("db", "b", 0, 10)).is_err());
    }

    #[test]
    fn test_same_collection_send_and_receive_conflict() {
        let registry = Arc::new(MigrationRegistry::new());
        let _out = registry.register_donate(migration("db", "a", 0, 10)).unwrap();
        assert!(registry.register_receive(migration("db", "a", 20, 30)).is_err());
        // A different collection may be received while donating.
        let _in = registry.register_receive(migration("db", "b", 0, 10)).unwrap();
    }

    #[test]
    fn test_guard_release_on_drop() {
        let registry = Arc::new(MigrationRegistry::new());
        {
            let _guard = registry.register_receive(migration("db", "a", 0, 10)).unwrap();
            assert!(registry.active_receive().is_some());
        }
        assert!(registry.active_receive().is_none());
    }
}
