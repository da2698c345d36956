//! The compact coordinator.
//!
//! Resolves the auxiliary state namespaces kept alongside a collection and
//! submits a compaction request for each of them (and the collection
//! itself) to every shard. Single DDL phase, but still durable so a crash
//! mid-fan-out resumes instead of silently stopping.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use shaledb_routing::NamespaceIdentity;
use shaledb_shard::error::ShardError;

use crate::clients::{CatalogClient, ShardClient};
use crate::document::{CoordinatorDocument, CoordinatorStore};
use crate::runner::Coordinator;

/// Suffixes of the auxiliary state collections compacted together with
/// their parent collection.
const AUX_STATE_SUFFIXES: &[&str] = &[".state", ".changes"];

/// Phases of a coordinated compaction.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum CompactPhase {
    /// Nothing durable has happened yet.
    Unset,
    /// Compaction requests submitted everywhere.
    Compact,
}

/// Arguments of a coordinated compaction.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CompactArgs {
    /// The collection whose state to compact.
    pub ns: NamespaceIdentity,
}

/// Coordinator type name recorded in the durable document.
pub const COMPACT_KIND: &str = "compactCollection";

/// Resolves the namespaces a compaction of `ns` must cover: the collection
/// itself plus its auxiliary state collections.
pub fn resolve_compaction_namespaces(
    ns: &NamespaceIdentity,
) -> Result<Vec<NamespaceIdentity>, ShardError> {
    let mut namespaces = vec![ns.clone()];
    for suffix in AUX_STATE_SUFFIXES {
        namespaces.push(ns.with_collection_suffix(suffix)?);
    }
    Ok(namespaces)
}

/// The compact coordinator.
pub struct CompactCoordinator {
    doc: CoordinatorDocument<CompactPhase, CompactArgs>,
    store: CoordinatorStore,
    shards: Arc<dyn ShardClient>,
    catalog: Arc<dyn CatalogClient>,
    cancel: CancellationToken,
}

impl CompactCoordinator {
    /// Starts a fresh coordinated compaction, persisting its document.
    pub fn new(
        args: CompactArgs,
        store: CoordinatorStore,
        shards: Arc<dyn ShardClient>,
        catalog: Arc<dyn CatalogClient>,
        cancel: CancellationToken,
    ) -> Result<Self, ShardError> {
        if args.ns.is_db_only() {
            return Err(ShardError::InvalidOptions(format!(
                "'{}' is not a collection namespace",
                args.ns
            )));
        }
        let doc = CoordinatorDocument::new(COMPACT_KIND, CompactPhase::Unset, args);
        store.persist(&doc)?;
        Ok(CompactCoordinator {
            doc,
            store,
            shards,
            catalog,
            cancel,
        })
    }

    /// Resumes a coordinator from its persisted document.
    pub fn resume(
        doc: CoordinatorDocument<CompactPhase, CompactArgs>,
        store: CoordinatorStore,
        shards: Arc<dyn ShardClient>,
        catalog: Arc<dyn CatalogClient>,
        cancel: CancellationToken,
    ) -> Self {
        CompactCoordinator {
            doc,
            store,
            shards,
            catalog,
            cancel,
        }
    }

    /// The coordinator id.
    pub fn id(&self) -> Uuid {
        self.doc.id()
    }
}

#[async_trait]
impl Coordinator for CompactCoordinator {
    fn label(&self) -> &'static str {
        COMPACT_KIND
    }

    fn must_always_make_progress(&self) -> bool {
        self.doc.phase() > CompactPhase::Unset
    }

    async fn run(&mut self) -> Result<(), ShardError> {
        let ns = self.doc.args().ns.clone();

        if self.doc.phase() < CompactPhase::Compact {
            if self.cancel.is_cancelled() {
                return Err(ShardError::Interrupted);
            }
            let namespaces = resolve_compaction_namespaces(&ns)?;
            for shard in self.catalog.all_shards().await? {
                for target in &namespaces {
                    self.shards.compact_collection(&shard, target).await?;
                }
            }
            self.doc.complete_phase(CompactPhase::Compact)?;
            self.store.persist(&self.doc)?;
        }

        self.store.remove(&self.doc.id())?;
        tracing::info!(ns = %ns, coordinator = %self.doc.id(), "compaction submitted");
        Ok(())
    }
}
