//! The drop-database coordinator.
//!
//! Refuses protected system databases, drops every sharded collection of
//! the database through the drop-collection path, then removes the
//! database's catalog entry under its critical section.

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
use crate::drop_collection::{DropCollectionArgs, DropCollectionCoordinator};
use crate::runner::Coordinator;

/// Databases that may never be dropped through this coordinator.
pub const PROTECTED_DATABASES: &[&str] = &["admin", "config", "local"];

/// Phases of a coordinated database drop.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum DropDatabasePhase {
    /// Nothing durable has happened yet.
    Unset,
    /// Every sharded collection of the database is dropped.
    DropCollections,
    /// Every shard holds the database critical section.
    EnterCriticalSection,
    /// Database catalog metadata and local data are gone everywhere.
    DropDatabase,
    /// Critical sections are released.
    ReleaseCriticalSection,
}

/// Arguments of a coordinated database drop.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DropDatabaseArgs {
    /// The database to drop.
    pub db: NamespaceIdentity,
}

/// Coordinator type name recorded in the durable document.
pub const DROP_DATABASE_KIND: &str = "dropDatabase";

/// The drop-database coordinator.
pub struct DropDatabaseCoordinator {
    doc: CoordinatorDocument<DropDatabasePhase, DropDatabaseArgs>,
    store: CoordinatorStore,
    shards: Arc<dyn ShardClient>,
    catalog: Arc<dyn CatalogClient>,
    clock: Arc<dyn ClusterClock>,
    cancel: CancellationToken,
}

impl DropDatabaseCoordinator {
    /// Starts a fresh coordinated drop. Refuses protected databases
    /// before persisting anything.
    pub fn new(
        args: DropDatabaseArgs,
        store: CoordinatorStore,
        shards: Arc<dyn ShardClient>,
        catalog: Arc<dyn CatalogClient>,
        clock: Arc<dyn ClusterClock>,
        cancel: CancellationToken,
    ) -> Result<Self, ShardError> {
        let db_name = args.db.db_name().to_string();
        if PROTECTED_DATABASES.contains(&db_name.as_str()) {
            return Err(ShardError::IllegalOperation(format!(
                "cannot drop protected database '{}'",
                db_name
            )));
        }
        if !args.db.is_db_only() {
            return Err(ShardError::InvalidOptions(format!(
                "'{}' is not a database identity",
                args.db
            )));
        }
        let doc = CoordinatorDocument::new(DROP_DATABASE_KIND, DropDatabasePhase::Unset, args);
        store.persist(&doc)?;
        Ok(DropDatabaseCoordinator {
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
        doc: CoordinatorDocument<DropDatabasePhase, DropDatabaseArgs>,
        store: CoordinatorStore,
        shards: Arc<dyn ShardClient>,
        catalog: Arc<dyn CatalogClient>,
        clock: Arc<dyn ClusterClock>,
        cancel: CancellationToken,
    ) -> Self {
        DropDatabaseCoordinator {
            doc,
            store,
            shards,
            catalog,
            clock,
            cancel,
        }
    }

    /// The coordinator id.
    pub fn id(&self) -> Uuid {
        self.doc.id()
    }

    /// The last completed phase.
    pub fn phase(&self) -> DropDatabasePhase {
        self.doc.phase()
    }

    fn reason(&self) -> serde_json::Value {
        json!({
            "command": DROP_DATABASE_KIND,
            "db": self.doc.args().db.full_name_with_tenant(),
            "coordinatorId": self.doc.id().to_string(),
        })
    }

    fn check_cancelled(&self) -> Result<(), ShardError> {
        if self.cancel.is_cancelled() {
            return Err(ShardError::Interrupted);
        }
        Ok(())
    }

    fn complete(&mut self, phase: DropDatabasePhase) -> Result<(), ShardError> {
        self.doc.complete_phase(phase)?;
        self.store.persist(&self.doc)?;
        tracing::debug!(
            db = %self.doc.args().db,
            coordinator = %self.doc.id(),
            phase = ?phase,
            "drop database phase complete"
        );
        Ok(())
    }
}

#[async_trait]
impl Coordinator for DropDatabaseCoordinator {
    fn label(&self) -> &'static str {
        DROP_DATABASE_KIND
    }

    fn must_always_make_progress(&self) -> bool {
        self.doc.phase() > DropDatabasePhase::Unset
    }

    async fn run(&mut self) -> Result<(), ShardError> {
        let db = self.doc.args().db.clone();
        let reason = self.reason();

        if self.doc.phase() < DropDatabasePhase::DropCollections {
            // Each collection drop runs the full drop-collection protocol.
            // Re-driving this phase after a crash is safe: already-dropped
            // collections are no longer listed, and the per-collection
            // phases are idempotent against absent namespaces.
            for (ns, collection_uuid) in self.catalog.list_collections(&db).await? {
                self.check_cancelled()?;
                let mut coordinator = DropCollectionCoordinator::new(
                    DropCollectionArgs {
                        ns,
                        collection_uuid,
                    },
                    self.store.clone(),
                    self.shards.clone(),
                    self.catalog.clone(),
                    self.clock.clone(),
                    self.cancel.clone(),
                )?;
                coordinator.run().await?;
            }
            self.complete(DropDatabasePhase::DropCollections)?;
        }

        if self.doc.phase() < DropDatabasePhase::EnterCriticalSection {
            self.check_cancelled()?;
            let session = self.doc.session().clone();
            for shard in self.catalog.all_shards().await? {
                self.shards
                    .block_reads_and_writes(&shard, &db, &reason, &session)
                    .await?;
            }
            self.complete(DropDatabasePhase::EnterCriticalSection)?;
        }

        if self.doc.phase() < DropDatabasePhase::DropDatabase {
            self.check_cancelled()?;
            let session = self.doc.session().clone();
            self.catalog.remove_database_metadata(&db).await?;
            let config_time = self.clock.tick();
            self.clock.wait_config_time_durable().await?;
            tracing::debug!(db = %db, config_time = %config_time, "catalog removal checkpointed");
            let primary = self.catalog.primary_shard(&db).await?;
            self.shards
                .drop_database_locally(&primary, &db, &session)
                .await?;
            self.complete(DropDatabasePhase::DropDatabase)?;
        }

        if self.doc.phase() < DropDatabasePhase::ReleaseCriticalSection {
            self.check_cancelled()?;
            let session = self.doc.session().clone();
            for shard in self.catalog.all_shards().await? {
                self.shards
                    .unblock_reads_and_writes(&shard, &db, &reason, &session)
                    .await?;
            }
            self.complete(DropDatabasePhase::ReleaseCriticalSection)?;
        }

        self.store.remove(&self.doc.id())?;
        tracing::info!(db = %db, coordinator = %self.doc.id(), "database dropped");
        Ok(())
    }
}
