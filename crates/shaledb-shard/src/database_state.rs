//! Per-database sharding runtime.
//!
//! One entry per database name, held in a process-wide registry. Entries
//! are never removed once created: their lock identity must stay stable
//! for the lifetime of the process so that concurrent acquirers always
//! contend on the same lock. Shared acquisition suffices for version
//! assertions; any mutation (install/clear cached info, critical-section
//! transitions) requires exclusive acquisition.

use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::lock_api::{ArcRwLockReadGuard, ArcRwLockWriteGuard};
use parking_lot::{RawRwLock, RwLock};
use tokio::task::JoinHandle;

use shaledb_routing::{DatabaseVersion, NamespaceIdentity, ShardId, VersionRelation};

use crate::critical_section::{CriticalSection, CriticalSectionSignal};
use crate::error::ShardError;

/// Cached authoritative facts about one database.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DatabaseInfo {
    /// The shard hosting the database's unsharded collections.
    pub primary_shard: ShardId,
    /// The database's placement version.
    pub version: DatabaseVersion,
}

/// Sharding state for a single database on this shard.
pub struct DatabaseShardingState {
    db: NamespaceIdentity,
    info: Option<DatabaseInfo>,
    critical_section: CriticalSection,
    refresh: Option<JoinHandle<()>>,
}

impl DatabaseShardingState {
    fn new(db: NamespaceIdentity) -> Self {
        DatabaseShardingState {
            db,
            info: None,
            critical_section: CriticalSection::new(),
            refresh: None,
        }
    }

    /// The database this entry belongs to.
    pub fn db(&self) -> &NamespaceIdentity {
        &self.db
    }

    /// Returns the cached database info, if any.
    pub fn info(&self) -> Option<&DatabaseInfo> {
        self.info.as_ref()
    }

    /// Installs refreshed database info.
    pub fn set_info(&mut self, info: DatabaseInfo) {
        tracing::debug!(db = %self.db, version = %info.version, "installed database info");
        self.info = Some(info);
    }

    /// Clears the cached info so the next access forces a refresh.
    pub fn clear_info(&mut self) {
        self.info = None;
    }

    /// Fails with a staleness error when a critical section is active,
    /// when no version is cached, or when the received version differs
    /// from the cached one.
    pub fn assert_matching_db_version(&self, received: &DatabaseVersion) -> Result<(), ShardError> {
        let wanted = self.info.as_ref().map(|i| i.version);
        if let Some(phase) = self.critical_section.phase() {
            return Err(ShardError::StaleDbVersion {
                db: self.db.clone(),
                received: *received,
                wanted,
                crit_sec: Some(phase),
            });
        }
        let Some(wanted_version) = wanted else {
            return Err(ShardError::StaleDbVersion {
                db: self.db.clone(),
                received: *received,
                wanted: None,
                crit_sec: None,
            });
        };
        if received.compare_to(&wanted_version) != VersionRelation::Equal {
            return Err(ShardError::StaleDbVersion {
                db: self.db.clone(),
                received: *received,
                wanted,
                crit_sec: None,
            });
        }
        Ok(())
    }

    /// Returns a signal for the active critical section, if any.
    pub fn critical_section_signal(&self) -> Option<CriticalSectionSignal> {
        self.critical_section.signal()
    }

    /// Enters the catch-up phase of the critical section, cancelling any
    /// in-flight metadata refresh for this entry.
    pub fn enter_critical_section_catch_up(
        &mut self,
        reason: serde_json::Value,
    ) -> Result<(), ShardError> {
        self.cancel_refresh();
        let db = self.db.clone();
        self.critical_section.enter_catch_up(&db, reason)
    }

    /// Advances the critical section to the commit phase.
    pub fn enter_critical_section_commit(
        &mut self,
        reason: serde_json::Value,
    ) -> Result<(), ShardError> {
        let db = self.db.clone();
        self.critical_section.enter_commit(&db, reason)
    }

    /// Exits the critical section, waking blocked operations.
    pub fn exit_critical_section(&mut self, reason: &serde_json::Value) -> Result<(), ShardError> {
        let db = self.db.clone();
        self.critical_section.exit(&db, reason)
    }

    /// Exits the critical section and clears the cached info, forcing the
    /// next access down the refresh path.
    pub fn exit_critical_section_with_clear(
        &mut self,
        reason: &serde_json::Value,
    ) -> Result<(), ShardError> {
        self.exit_critical_section(reason)?;
        self.clear_info();
        Ok(())
    }

    /// Records the in-flight refresh task for this entry.
    pub fn set_refresh(&mut self, handle: JoinHandle<()>) {
        self.cancel_refresh();
        self.refresh = Some(handle);
    }

    /// Aborts and forgets the in-flight refresh task, if any.
    pub fn cancel_refresh(&mut self) {
        if let Some(handle) = self.refresh.take() {
            handle.abort();
        }
    }
}

/// Shared (read) access to one database entry: holds both the resource
/// lock and the entry pointer; dropping it releases the lock.
pub struct SharedDatabaseState {
    guard: ArcRwLockReadGuard<RawRwLock, DatabaseShardingState>,
}

impl Deref for SharedDatabaseState {
    type Target = DatabaseShardingState;

    fn deref(&self) -> &DatabaseShardingState {
        &self.guard
    }
}

/// Exclusive (write) access to one database entry.
pub struct ExclusiveDatabaseState {
    guard: ArcRwLockWriteGuard<RawRwLock, DatabaseShardingState>,
}

impl Deref for ExclusiveDatabaseState {
    type Target = DatabaseShardingState;

    fn deref(&self) -> &DatabaseShardingState {
        &self.guard
    }
}

impl DerefMut for ExclusiveDatabaseState {
    fn deref_mut(&mut self) -> &mut DatabaseShardingState {
        &mut self.guard
    }
}

/// Process-wide registry of database sharding state.
///
/// Entries are created on first acquisition and retained forever; only
/// their contents are swapped. No raw map access is exposed.
pub struct DatabaseShardingRegistry {
    entries: DashMap<NamespaceIdentity, Arc<RwLock<DatabaseShardingState>>>,
}

impl DatabaseShardingRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        DatabaseShardingRegistry {
            entries: DashMap::new(),
        }
    }

    fn entry(&self, db: &NamespaceIdentity) -> Arc<RwLock<DatabaseShardingState>> {
        let db = db.db_identity();
        self.entries
            .entry(db.clone())
            .or_insert_with(|| Arc::new(RwLock::new(DatabaseShardingState::new(db))))
            .clone()
    }

    /// Acquires shared access to the database's entry, creating it on
    /// first use.
    pub fn acquire_shared(&self, db: &NamespaceIdentity) -> SharedDatabaseState {
        SharedDatabaseState {
            guard: self.entry(db).read_arc(),
        }
    }

    /// Acquires exclusive access to the database's entry, creating it on
    /// first use.
    pub fn acquire_exclusive(&self, db: &NamespaceIdentity) -> ExclusiveDatabaseState {
        ExclusiveDatabaseState {
            guard: self.entry(db).write_arc(),
        }
    }

    /// Number of entries ever created (entries are never removed).
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if no entry has been created yet.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for DatabaseShardingRegistry {
    fn default() -> Self {
        Self::new()
    }
}
