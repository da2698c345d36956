//! Participant-side helpers executed on each shard a coordinator drives.

use std::sync::Arc;

use uuid::Uuid;

use shaledb_routing::NamespaceIdentity;
use shaledb_shard::collection_state::CollectionShardingRegistry;
use shaledb_shard::error::ShardError;
use shaledb_shard::migration::RoutingCache;
use shaledb_shard::range_deletion::RangeDeletionStore;
use shaledb_shard::store::DocumentStore;

use crate::clients::LocalCatalog;
use crate::document::RetryableSession;

const SESSION_PREFIX: &str = "sessions/";

/// Everything a participant operation needs on the local shard.
pub struct ParticipantContext {
    /// The shard's collection sharding registry.
    pub collections: Arc<CollectionShardingRegistry>,
    /// The shard's local storage catalog.
    pub local: Arc<dyn LocalCatalog>,
    /// The shard's routing cache.
    pub routing: Arc<dyn RoutingCache>,
    /// Durable range-deletion bookkeeping.
    pub range_deletions: RangeDeletionStore,
    /// Durable store for retryable-session markers.
    pub store: Arc<dyn DocumentStore>,
}

/// Writes the durable no-op marker that persists a retryable write's
/// session state, so a re-sent participant request is recognizable as
/// already applied.
pub fn persist_session_marker(
    store: &dyn DocumentStore,
    session: &RetryableSession,
) -> Result<(), ShardError> {
    let key = format!(
        "{}{}/{}",
        SESSION_PREFIX, session.session_id, session.txn_number
    );
    store.put(key.into_bytes(), Vec::new())
}

/// Returns true if the session marker for this request was already
/// persisted by an earlier attempt.
pub fn session_marker_exists(
    store: &dyn DocumentStore,
    session: &RetryableSession,
) -> Result<bool, ShardError> {
    let key = format!(
        "{}{}/{}",
        SESSION_PREFIX, session.session_id, session.txn_number
    );
    Ok(store.get(key.as_bytes())?.is_some())
}

/// Drops a collection on the local shard as part of a coordinated drop.
///
/// Clears the collection-sharding entry and its index catalog under an
/// exclusive collection guard, removes pending range-deletion tasks for
/// the uuid (failures are logged and still raised), performs the local
/// drop tolerating an already-absent collection, then forces a routing
/// refresh and waits for it to flush before returning.
pub async fn drop_collection_locally(
    ctx: &ParticipantContext,
    ns: &NamespaceIdentity,
    collection_uuid: &Uuid,
    from_migrate: bool,
) -> Result<(), ShardError> {
    {
        let mut entry = ctx.collections.acquire_exclusive(ns);
        entry.clear_metadata();
        entry.clear_index_catalog();
    }

    match ctx.range_deletions.delete_tasks_for_collection(collection_uuid) {
        Ok(removed) => {
            if removed > 0 {
                tracing::debug!(ns = %ns, removed, "removed pending range deletion tasks");
            }
        }
        Err(e) => {
            tracing::warn!(ns = %ns, error = %e, "failed to remove pending range deletion tasks");
            return Err(e);
        }
    }

    match ctx.local.drop_collection(ns, from_migrate).await {
        Ok(()) => {}
        Err(ShardError::NamespaceNotFound(_)) => {
            tracing::debug!(ns = %ns, "collection already absent locally");
        }
        Err(e) => return Err(e),
    }

    ctx.routing.force_refresh(ns).await?;
    ctx.routing.wait_flushed(ns).await?;
    tracing::info!(ns = %ns, from_migrate, "dropped collection locally");
    Ok(())
}
