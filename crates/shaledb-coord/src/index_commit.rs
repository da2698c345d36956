//! Commit-index and drop-index-catalog-entry participant operations.
//!
//! Both require the collection critical section to already be held (the
//! coordinating side enters it before fanning out) and a retryable-write
//! session whose durable marker makes re-sent requests recognizable.

use serde::{Deserialize, Serialize};

use shaledb_routing::{ClusterTime, NamespaceIdentity};
use shaledb_shard::collection_state::{CollectionShardingRegistry, IndexCatalogEntry};
use shaledb_shard::error::ShardError;
use shaledb_shard::store::DocumentStore;

use crate::document::RetryableSession;
use crate::participant::{persist_session_marker, session_marker_exists};

/// Arguments of a commit-index participant request.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CommitIndexArgs {
    /// The collection the index belongs to.
    pub ns: NamespaceIdentity,
    /// The index name.
    pub name: String,
    /// The index specification, opaque to this layer.
    pub spec: serde_json::Value,
    /// The catalog version this commit happens at.
    pub index_version: ClusterTime,
    /// The coordinator's retryable session.
    pub session: RetryableSession,
}

/// Commits a global-index catalog entry on the local shard.
pub fn commit_index_participant(
    collections: &CollectionShardingRegistry,
    store: &dyn DocumentStore,
    args: &CommitIndexArgs,
) -> Result<(), ShardError> {
    if session_marker_exists(store, &args.session)? {
        tracing::debug!(ns = %args.ns, session = %args.session, "commit index already applied");
        return Ok(());
    }
    {
        let mut entry = collections.acquire_exclusive(&args.ns);
        if entry.critical_section_signal().is_none() {
            return Err(ShardError::CriticalSectionNotHeld(args.ns.clone()));
        }
        entry.upsert_index(
            IndexCatalogEntry {
                name: args.name.clone(),
                spec: args.spec.clone(),
            },
            args.index_version,
        );
    }
    persist_session_marker(store, &args.session)?;
    tracing::info!(ns = %args.ns, index = %args.name, "committed index catalog entry");
    Ok(())
}

/// Arguments of a drop-index-catalog-entry participant request.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DropIndexEntryArgs {
    /// The collection the index belongs to.
    pub ns: NamespaceIdentity,
    /// The index name.
    pub name: String,
    /// The catalog version this removal happens at.
    pub index_version: ClusterTime,
    /// The coordinator's retryable session.
    pub session: RetryableSession,
}

/// Removes a global-index catalog entry on the local shard.
pub fn drop_index_catalog_entry_participant(
    collections: &CollectionShardingRegistry,
    store: &dyn DocumentStore,
    args: &DropIndexEntryArgs,
) -> Result<(), ShardError> {
    if session_marker_exists(store, &args.session)? {
        tracing::debug!(ns = %args.ns, session = %args.session, "drop index entry already applied");
        return Ok(());
    }
    {
        let mut entry = collections.acquire_exclusive(&args.ns);
        if entry.critical_section_signal().is_none() {
            return Err(ShardError::CriticalSectionNotHeld(args.ns.clone()));
        }
        entry.drop_index(&args.name, args.index_version);
    }
    persist_session_marker(store, &args.session)?;
    tracing::info!(ns = %args.ns, index = %args.name, "dropped index catalog entry");
    Ok(())
}
