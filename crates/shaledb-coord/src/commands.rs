//! Participant command surface for the DDL coordinators.
//!
//! The `shardsvr_*` commands are the server-to-server requests a
//! coordinator fans out to its participants. They share the shard crate's
//! command registry and require internal authorization.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use shaledb_routing::NamespaceIdentity;
use shaledb_shard::collection_state::CollectionShardingRegistry;
use shaledb_shard::commands::{
    parse_request, require_internal, Command, CommandContext, CommandRegistry,
};
use shaledb_shard::error::ShardError;
use shaledb_shard::store::DocumentStore;

use crate::clients::{CatalogClient, ShardClient};
use crate::compact::{CompactArgs, CompactCoordinator};
use crate::document::{CoordinatorStore, RetryableSession};
use crate::index_commit::{
    commit_index_participant, drop_index_catalog_entry_participant, CommitIndexArgs,
    DropIndexEntryArgs,
};
use crate::participant::{
    drop_collection_locally, persist_session_marker, session_marker_exists, ParticipantContext,
};
use crate::runner::{CoordinatorRunner, RetryPolicy};

/// Arguments of the drop-collection participant request.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DropCollectionParticipantArgs {
    /// The collection to drop locally.
    pub ns: NamespaceIdentity,
    /// The collection's uuid.
    pub collection_uuid: Uuid,
    /// Coordination-driven drop marker.
    #[serde(default)]
    pub from_migrate: bool,
    /// The coordinator's retryable session.
    pub session: RetryableSession,
}

/// `shardsvr_drop_collection_participant`: drops the collection locally
/// and writes the durable session marker making the retryable write
/// recognizable.
pub struct ShardsvrDropCollectionParticipantCommand {
    ctx: Arc<ParticipantContext>,
}

#[async_trait]
impl Command for ShardsvrDropCollectionParticipantCommand {
    fn name(&self) -> &'static str {
        "shardsvr_drop_collection_participant"
    }

    fn authorize(&self, ctx: &CommandContext) -> Result<(), ShardError> {
        require_internal(ctx, self.name())
    }

    async fn execute(
        &self,
        _ctx: &CommandContext,
        request: serde_json::Value,
    ) -> Result<serde_json::Value, ShardError> {
        let args: DropCollectionParticipantArgs = parse_request(self.name(), request)?;
        if session_marker_exists(self.ctx.store.as_ref(), &args.session)? {
            tracing::debug!(ns = %args.ns, session = %args.session, "drop already applied");
            return Ok(json!({ "ok": true }));
        }
        drop_collection_locally(&self.ctx, &args.ns, &args.collection_uuid, args.from_migrate)
            .await?;
        persist_session_marker(self.ctx.store.as_ref(), &args.session)?;
        Ok(json!({ "ok": true }))
    }
}

/// `shardsvr_commit_index_participant`: commits a global-index catalog
/// entry under the held critical section.
pub struct ShardsvrCommitIndexParticipantCommand {
    collections: Arc<CollectionShardingRegistry>,
    store: Arc<dyn DocumentStore>,
}

#[async_trait]
impl Command for ShardsvrCommitIndexParticipantCommand {
    fn name(&self) -> &'static str {
        "shardsvr_commit_index_participant"
    }

    fn authorize(&self, ctx: &CommandContext) -> Result<(), ShardError> {
        require_internal(ctx, self.name())
    }

    async fn execute(
        &self,
        _ctx: &CommandContext,
        request: serde_json::Value,
    ) -> Result<serde_json::Value, ShardError> {
        let args: CommitIndexArgs = parse_request(self.name(), request)?;
        commit_index_participant(&self.collections, self.store.as_ref(), &args)?;
        Ok(json!({ "ok": true }))
    }
}

/// `shardsvr_drop_index_catalog_entry_participant`: removes a global-index
/// catalog entry under the held critical section.
pub struct ShardsvrDropIndexEntryParticipantCommand {
    collections: Arc<CollectionShardingRegistry>,
    store: Arc<dyn DocumentStore>,
}

#[async_trait]
impl Command for ShardsvrDropIndexEntryParticipantCommand {
    fn name(&self) -> &'static str {
        "shardsvr_drop_index_catalog_entry_participant"
    }

    fn authorize(&self, ctx: &CommandContext) -> Result<(), ShardError> {
        require_internal(ctx, self.name())
    }

    async fn execute(
        &self,
        _ctx: &CommandContext,
        request: serde_json::Value,
    ) -> Result<serde_json::Value, ShardError> {
        let args: DropIndexEntryArgs = parse_request(self.name(), request)?;
        drop_index_catalog_entry_participant(&self.collections, self.store.as_ref(), &args)?;
        Ok(json!({ "ok": true }))
    }
}

/// `shardsvr_compact_participant`: drives a dedicated compact coordinator
/// for the target collection and its auxiliary state namespaces.
pub struct ShardsvrCompactCommand {
    store: CoordinatorStore,
    shards: Arc<dyn ShardClient>,
    catalog: Arc<dyn CatalogClient>,
}

#[async_trait]
impl Command for ShardsvrCompactCommand {
    fn name(&self) -> &'static str {
        "shardsvr_compact_participant"
    }

    fn authorize(&self, ctx: &CommandContext) -> Result<(), ShardError> {
        require_internal(ctx, self.name())
    }

    async fn execute(
        &self,
        _ctx: &CommandContext,
        request: serde_json::Value,
    ) -> Result<serde_json::Value, ShardError> {
        let args: CompactArgs = parse_request(self.name(), request)?;
        let cancel = CancellationToken::new();
        let mut coordinator = CompactCoordinator::new(
            args,
            self.store.clone(),
            self.shards.clone(),
            self.catalog.clone(),
            cancel.clone(),
        )?;
        CoordinatorRunner::new(RetryPolicy::default(), cancel)
            .drive(&mut coordinator)
            .await?;
        Ok(json!({ "ok": true }))
    }
}

/// Registers the participant command surface.
pub fn register_participant_commands(
    registry: &mut CommandRegistry,
    participant: Arc<ParticipantContext>,
    collections: Arc<CollectionShardingRegistry>,
    session_store: Arc<dyn DocumentStore>,
    coordinator_store: CoordinatorStore,
    shards: Arc<dyn ShardClient>,
    catalog: Arc<dyn CatalogClient>,
) {
    registry.register(Arc::new(ShardsvrDropCollectionParticipantCommand {
        ctx: participant,
    }));
    registry.register(Arc::new(ShardsvrCommitIndexParticipantCommand {
        collections: collections.clone(),
        store: session_store.clone(),
    }));
    registry.register(Arc::new(ShardsvrDropIndexEntryParticipantCommand {
        collections,
        store: session_store,
    }));
    registry.register(Arc::new(ShardsvrCompactCommand {
        store: coordinator_store,
        shards,
        catalog,
    }));
}
