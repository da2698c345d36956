//! Collaborator interfaces consumed by the DDL coordinators.
//!
//! These are the narrow seams to the rest of the server: the authoritative
//! sharding catalog, per-shard participant requests, the cluster's causal
//! clock and the participant's local catalog. Coordinators never
//! reimplement what sits behind them.

use async_trait::async_trait;
use uuid::Uuid;

use shaledb_routing::{ClusterTime, NamespaceIdentity, ShardId};
use shaledb_shard::error::ShardError;

use crate::document::RetryableSession;

/// Sends participant requests to individual shards. All requests are
/// retryable writes tagged with the coordinator's session and are applied
/// under majority write concern by the receiving shard.
#[async_trait]
pub trait ShardClient: Send + Sync {
    /// Blocks reads and writes for `ns` on `shard` (critical section
    /// enter), tagged with the coordinator's reason document.
    async fn block_reads_and_writes(
        &self,
        shard: &ShardId,
        ns: &NamespaceIdentity,
        reason: &serde_json::Value,
        session: &RetryableSession,
    ) -> Result<(), ShardError>;

    /// Unblocks reads and writes for `ns` on `shard` (critical section
    /// exit).
    async fn unblock_reads_and_writes(
        &self,
        shard: &ShardId,
        ns: &NamespaceIdentity,
        reason: &serde_json::Value,
        session: &RetryableSession,
    ) -> Result<(), ShardError>;

    /// Drops the collection locally on `shard`. `from_migrate` marks the
    /// drop as coordination-driven so the participant does not trigger
    /// its own cross-shard notifications.
    async fn drop_collection_locally(
        &self,
        shard: &ShardId,
        ns: &NamespaceIdentity,
        from_migrate: bool,
        session: &RetryableSession,
    ) -> Result<(), ShardError>;

    /// Drops the database locally on `shard`.
    async fn drop_database_locally(
        &self,
        shard: &ShardId,
        db: &NamespaceIdentity,
        session: &RetryableSession,
    ) -> Result<(), ShardError>;

    /// Submits a compaction request for `ns` on `shard`.
    async fn compact_collection(
        &self,
        shard: &ShardId,
        ns: &NamespaceIdentity,
    ) -> Result<(), ShardError>;
}

/// Reads and writes the authoritative sharding catalog under majority
/// write concern.
#[async_trait]
pub trait CatalogClient: Send + Sync {
    /// Lists the sharded collections of a database with their uuids.
    async fn list_collections(
        &self,
        db: &NamespaceIdentity,
    ) -> Result<Vec<(NamespaceIdentity, Uuid)>, ShardError>;

    /// Stops the balancer from starting new migrations for `ns`.
    async fn stop_migrations(&self, ns: &NamespaceIdentity) -> Result<(), ShardError>;

    /// Removes the query-sampling configuration for `ns`.
    async fn remove_query_sampling_config(&self, ns: &NamespaceIdentity)
        -> Result<(), ShardError>;

    /// Removes the collection's catalog metadata (collection document,
    /// chunks and tags) in one cluster transaction.
    async fn remove_collection_metadata(&self, ns: &NamespaceIdentity) -> Result<(), ShardError>;

    /// Removes the database's catalog entry and version metadata.
    async fn remove_database_metadata(&self, db: &NamespaceIdentity) -> Result<(), ShardError>;

    /// Returns every shard in the cluster.
    async fn all_shards(&self) -> Result<Vec<ShardId>, ShardError>;

    /// Returns the primary shard of a database.
    async fn primary_shard(&self, db: &NamespaceIdentity) -> Result<ShardId, ShardError>;
}

/// The cluster's causal clock, used to checkpoint metadata mutations.
#[async_trait]
pub trait ClusterClock: Send + Sync {
    /// Advances and returns the local component of the cluster time.
    fn tick(&self) -> ClusterTime;

    /// Waits until the config time reflecting prior catalog writes is
    /// durable on a majority.
    async fn wait_config_time_durable(&self) -> Result<(), ShardError>;
}

/// The participant's local storage catalog.
#[async_trait]
pub trait LocalCatalog: Send + Sync {
    /// Drops the collection's local data. `from_migrate` marks the drop
    /// as coordination-driven so no independent cross-shard notification
    /// fires. Returns [`ShardError::NamespaceNotFound`] if the collection
    /// does not exist locally; callers tolerate that.
    async fn drop_collection(
        &self,
        ns: &NamespaceIdentity,
        from_migrate: bool,
    ) -> Result<(), ShardError>;

    /// Drops the database's local data.
    async fn drop_database(&self, db: &NamespaceIdentity) -> Result<(), ShardError>;
}
