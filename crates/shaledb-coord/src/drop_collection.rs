//! The drop-collection coordinator.
//!
//! Drives a cluster-wide collection drop through durable phases:
//! freeze migrations, enter the critical section on every shard, remove
//! the catalog metadata and the local data, release the critical section.
//! Each phase is persisted after its side effects complete, so a resumed
//! coordinator skips completed phases instead of repeating their
//! broadcasts.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use shaledb_routing::NamespaceIdentity;
use shaledb_shard::error::ShardError;

use crate::clients::{CatalogClient, ClusterClock, ShardClient};
use crate::document::{CoordinatorDocument, CoordinatorStore};
use crate::runner::Coordinator;

/// Phases of a coordinated collection drop, in execution order. The
/// persisted phase records the last *completed* phase.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum DropCollectionPhase {
    /// Nothing durable has happened yet.
    Unset,
    /// Balancer migrations for the collection are stopped.
    FreezeCollection,
    /// Every shard holds the collection critical section.
    EnterCriticalSection,
    /// Catalog metadata and local data are gone everywhere.
    DropCollection,
    /// Critical sections are released.
    ReleaseCriticalSection,
}

/// Arguments of a coordinated collection drop.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DropCollectionArgs {
    /// The collection to drop.
    pub ns: NamespaceIdentity,
    /// The collection's uuid at coordination start.
    pub collection_uuid: Uuid,
}

/// The coordinator. Construct with [`DropCollectionCoordinator::new`] for
/// a fresh drop or [`DropCollectionCoordinator::resume`] after a restart.
pub struct DropCollectionCoordinator {
    doc: CoordinatorDocument<DropCollectionPhase, DropCollectionArgs>,
    store: CoordinatorStore,
    shards: Arc<dyn ShardClient>,
    catalog: Arc<dyn CatalogClient>,
    clock: Arc<dyn ClusterClock>,
    cancel: CancellationToken,
}

/// Coordinator type name recorded in the durable document.
pub const DROP_COLLECTION_KIND: &str = "dropCollection";

impl DropCollectionCoordinator {
    /// Starts a fresh coordinated drop, persisting its initial document.
    pub fn new(
        args: DropCollectionArgs,
        store: CoordinatorStore,
        shards: Arc<dyn ShardClient>,
        catalog: Arc<dyn CatalogClient>,
        clock: Arc<dyn ClusterClock>,
        cancel: CancellationToken,
    ) -> Result<Self, ShardError> {
        let doc = CoordinatorDocument::new(DROP_COLLECTION_KIND, DropCollectionPhase::Unset, args);
        store.persist(&doc)?;
        Ok(DropCollectionCoordinator {
            doc,
            store,
            shards,
            catalog,
            clock,
            cancel,
        })
    }

    /// Resumes a coordinator from its persisted document.
    pub fn resume(
        doc: CoordinatorDocument<DropCollectionPhase, DropCollectionArgs>,
        store: CoordinatorStore,
        shards: Arc<dyn ShardClient>,
        catalog: Arc<dyn CatalogClient>,
        clock: Arc<dyn ClusterClock>,
        cancel: CancellationToken,
    ) -> Self {
        DropCollectionCoordinator {
            doc,
            store,
            shards,
            catalog,
            clock,
            cancel,
        }
    }

    /// The coordinator id (for document lookup).
    pub fn id(&self) -> Uuid {
        self.doc.id()
    }

    /// The last completed phase.
    pub fn phase(&self) -> DropCollectionPhase {
        self.doc.phase()
    }

    fn reason(&self) -> serde_json::Value {
        json!({
            "command": DROP_COLLECTION_KIND,
            "ns": self.doc.args().ns.full_name_with_tenant(),
            "coordinatorId": self.doc.id().to_string(),
        })
    }

    fn check_cancelled(&self) -> Result<(), ShardError> {
        if self.cancel.is_cancelled() {
            return Err(ShardError::Interrupted);
        }
        Ok(())
    }

    fn complete(&mut self, phase: DropCollectionPhase) -> Result<(), ShardError> {
        self.doc.complete_phase(phase)?;
        self.store.persist(&self.doc)?;
        tracing::debug!(
            ns = %self.doc.args().ns,
            coordinator = %self.doc.id(),
            phase = ?phase,
            "drop collection phase complete"
        );
        Ok(())
    }
}

#[async_trait]
impl Coordinator for DropCollectionCoordinator {
    fn label(&self) -> &'static str {
        DROP_COLLECTION_KIND
    }

    fn must_always_make_progress(&self) -> bool {
        self.doc.phase() > DropCollectionPhase::Unset
    }

    async fn run(&mut self) -> Result<(), ShardError> {
        let ns = self.doc.args().ns.clone();
        let reason = self.reason();

        if self.doc.phase() < DropCollectionPhase::FreezeCollection {
            self.check_cancelled()?;
            self.catalog.stop_migrations(&ns).await?;
            self.complete(DropCollectionPhase::FreezeCollection)?;
        }

        if self.doc.phase() < DropCollectionPhase::EnterCriticalSection {
            self.check_cancelled()?;
            let session = self.doc.session().clone();
            for shard in self.catalog.all_shards().await? {
                self.shards
                    .block_reads_and_writes(&shard, &ns, &reason, &session)
                    .await?;
            }
            self.complete(DropCollectionPhase::EnterCriticalSection)?;
        }

        if self.doc.phase() < DropCollectionPhase::DropCollection {
            self.check_cancelled()?;
            let session = self.doc.session().clone();
            self.catalog.remove_query_sampling_config(&ns).await?;
            self.catalog.remove_collection_metadata(&ns).await?;
            let config_time = self.clock.tick();
            self.clock.wait_config_time_durable().await?;
            tracing::debug!(ns = %ns, config_time = %config_time, "catalog removal checkpointed");

            let primary = self.catalog.primary_shard(&ns.db_identity()).await?;
            let shards = self.catalog.all_shards().await?;
            for shard in shards.iter().filter(|s| **s != primary) {
                self.shards
                    .drop_collection_locally(shard, &ns, true, &session)
                    .await?;
            }
            // The primary is dropped strictly last so a re-creation of the
            // namespace as unsharded cannot race ahead of the drops.
            self.shards
                .drop_collection_locally(&primary, &ns, false, &session)
                .await?;
            self.complete(DropCollectionPhase::DropCollection)?;
        }

        if self.doc.phase() < DropCollectionPhase::ReleaseCriticalSection {
            self.check_cancelled()?;
            let session = self.doc.session().clone();
            for shard in self.catalog.all_shards().await? {
                self.shards
                    .unblock_reads_and_writes(&shard, &ns, &reason, &session)
                    .await?;
            }
            self.complete(DropCollectionPhase::ReleaseCriticalSection)?;
        }

        self.store.remove(&self.doc.id())?;
        tracing::info!(ns = %ns, coordinator = %self.doc.id(), "collection dropped");
        Ok(())
    }
}
