//! Per-collection sharding runtime.
//!
//! The collection-level analog of the database sharding state: one entry
//! per namespace, retained forever, holding the cached
//! [`CollectionMetadata`] snapshot, the collection critical section, the
//! in-flight refresh handle and the sharding index catalog.

use std::collections::BTreeMap;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::lock_api::{ArcRwLockReadGuard, ArcRwLockWriteGuard};
use parking_lot::{RawRwLock, RwLock};
use tokio::task::JoinHandle;

use shaledb_routing::{ClusterTime, CollectionMetadata, NamespaceIdentity, ShardVersion, VersionRelation};

use crate::critical_section::{CriticalSection, CriticalSectionSignal};
use crate::error::ShardError;

/// One entry in this shard's sharding index catalog.
#[derive(Clone, Debug, PartialEq)]
pub struct IndexCatalogEntry {
    /// The index name.
    pub name: String,
    /// The index specification, opaque to this layer.
    pub spec: serde_json::Value,
}

/// The sharding index catalog for one collection: global-index entries
/// plus the catalog version they were committed at.
#[derive(Clone, Debug, Default)]
pub struct ShardingIndexCatalog {
    /// Version of the last committed index catalog mutation.
    pub version: Option<ClusterTime>,
    /// Committed entries by index name.
    pub entries: BTreeMap<String, IndexCatalogEntry>,
}

/// Sharding state for a single collection on this shard.
pub struct CollectionShardingState {
    ns: NamespaceIdentity,
    metadata: Option<Arc<CollectionMetadata>>,
    critical_section: CriticalSection,
    refresh: Option<JoinHandle<()>>,
    index_catalog: ShardingIndexCatalog,
}

impl CollectionShardingState {
    fn new(ns: NamespaceIdentity) -> Self {
        CollectionShardingState {
            ns,
            metadata: None,
            critical_section: CriticalSection::new(),
            refresh: None,
            index_catalog: ShardingIndexCatalog::default(),
        }
    }

    /// The collection this entry belongs to.
    pub fn ns(&self) -> &NamespaceIdentity {
        &self.ns
    }

    /// Returns the cached metadata snapshot, if any.
    pub fn metadata(&self) -> Option<Arc<CollectionMetadata>> {
        self.metadata.clone()
    }

    /// Installs a refreshed metadata snapshot, replacing the previous one
    /// wholesale.
    pub fn set_metadata(&mut self, metadata: Arc<CollectionMetadata>) {
        tracing::debug!(
            ns = %self.ns,
            version = %metadata.shard_version(),
            chunks = metadata.chunk_count(),
            "installed collection metadata"
        );
        self.metadata = Some(metadata);
    }

    /// Clears the cached snapshot so the next access forces a refresh.
    pub fn clear_metadata(&mut self) {
        self.metadata = None;
    }

    /// Fails with a staleness error when a critical section is active,
    /// when no metadata is cached, or when the received version differs
    /// from the cached shard version.
    ///
    /// An [`ShardVersion::ignored`] received version means the caller does
    /// not track a version at its layer: only the critical-section check
    /// applies and the placement comparison is skipped.
    pub fn assert_matching_shard_version(&self, received: &ShardVersion) -> Result<(), ShardError> {
        let wanted = self.metadata.as_ref().map(|m| m.shard_version());
        if let Some(phase) = self.critical_section.phase() {
            return Err(ShardError::StaleShardVersion {
                ns: self.ns.clone(),
                received: *received,
                wanted,
                crit_sec: Some(phase),
            });
        }
        if received.is_ignored() {
            return Ok(());
        }
        let Some(wanted_version) = wanted else {
            return Err(ShardError::StaleShardVersion {
                ns: self.ns.clone(),
                received: *received,
                wanted: None,
                crit_sec: None,
            });
        };
        if received.compare_to(&wanted_version) != VersionRelation::Equal {
            return Err(ShardError::StaleShardVersion {
                ns: self.ns.clone(),
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

    /// Enters the catch-up phase, cancelling any in-flight refresh.
    pub fn enter_critical_section_catch_up(
        &mut self,
        reason: serde_json::Value,
    ) -> Result<(), ShardError> {
        self.cancel_refresh();
        let ns = self.ns.clone();
        self.critical_section.enter_catch_up(&ns, reason)
    }

    /// Advances the critical section to the commit phase.
    pub fn enter_critical_section_commit(
        &mut self,
        reason: serde_json::Value,
    ) -> Result<(), ShardError> {
        let ns = self.ns.clone();
        self.critical_section.enter_commit(&ns, reason)
    }

    /// Exits the critical section, waking blocked operations.
    pub fn exit_critical_section(&mut self, reason: &serde_json::Value) -> Result<(), ShardError> {
        let ns = self.ns.clone();
        self.critical_section.exit(&ns, reason)
    }

    /// Exits the critical section and clears the cached metadata.
    pub fn exit_critical_section_with_clear(
        &mut self,
        reason: &serde_json::Value,
    ) -> Result<(), ShardError> {
        self.exit_critical_section(reason)?;
        self.clear_metadata();
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

    /// Returns the sharding index catalog.
    pub fn index_catalog(&self) -> &ShardingIndexCatalog {
        &self.index_catalog
    }

    /// Inserts or replaces an index catalog entry at `version`.
    pub fn upsert_index(&mut self, entry: IndexCatalogEntry, version: ClusterTime) {
        self.index_catalog.entries.insert(entry.name.clone(), entry);
        self.index_catalog.version = Some(version);
    }

    /// Removes an index catalog entry at `version`. Removing an absent
    /// entry still advances the catalog version (idempotent retries).
    pub fn drop_index(&mut self, name: &str, version: ClusterTime) {
        self.index_catalog.entries.remove(name);
        self.index_catalog.version = Some(version);
    }

    /// Drops the whole sharding index catalog for this collection.
    pub fn clear_index_catalog(&mut self) {
        self.index_catalog = ShardingIndexCatalog::default();
    }
}

/// Shared (read) access to one collection entry.
pub struct SharedCollectionState {
    guard: ArcRwLockReadGuard<RawRwLock, CollectionShardingState>,
}

impl Deref for SharedCollectionState {
    type Target = CollectionShardingState;

    fn deref(&self) -> &CollectionShardingState {
        &self.guard
    }
}

/// Exclusive (write) access to one collection entry.
pub struct ExclusiveCollectionState {
    guard: ArcRwLockWriteGuard<RawRwLock, CollectionShardingState>,
}

impl Deref for ExclusiveCollectionState {
    type Target = CollectionShardingState;

    fn deref(&self) -> &CollectionShardingState {
        &self.guard
    }
}

impl DerefMut for ExclusiveCollectionState {
    fn deref_mut(&mut self) -> &mut CollectionShardingState {
        &mut self.guard
    }
}

/// Process-wide registry of collection sharding state. Entries are
/// append-only; only their contents are swapped.
pub struct CollectionShardingRegistry {
    entries: DashMap<NamespaceIdentity, Arc<RwLock<CollectionShardingState>>>,
}

impl CollectionShardingRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        CollectionShardingRegistry {
            entries: DashMap::new(),
        }
    }

    fn entry(&self, ns: &NamespaceIdentity) -> Arc<RwLock<CollectionShardingState>> {
        self.entries
            .entry(ns.clone())
            .or_insert_with(|| Arc::new(RwLock::new(CollectionShardingState::new(ns.clone()))))
            .clone()
    }

    /// Acquires shared access to the collection's entry.
    pub fn acquire_shared(&self, ns: &NamespaceIdentity) -> SharedCollectionState {
        SharedCollectionState {
            guard: self.entry(ns).read_arc(),
        }
    }

    /// Acquires exclusive access to the collection's entry.
    pub fn acquire_exclusive(&self, ns: &NamespaceIdentity) -> ExclusiveCollectionState {
        ExclusiveCollectionState {
            guard: self.entry(ns).write_arc(),
        }
    }

    /// Number of entries ever created.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if no entry has been created yet.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for CollectionShardingRegistry {
    fn default() -> Self {
        Self::new()
    }
}
