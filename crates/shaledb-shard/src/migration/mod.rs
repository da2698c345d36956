//! Chunk migration: the receiving-shard side of the protocol.
//!
//! A migration moves one chunk from a donor shard to this shard. The
//! destination registers exclusive intent in the [`MigrationRegistry`],
//! clones the range, reaches steady state, and then commits or aborts on
//! the donor's instruction, holding the destination critical section from
//! commit until the donor releases it.

pub mod commands;
pub mod destination;
pub mod registry;

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use shaledb_routing::{ChunkRange, NamespaceIdentity, ShardId};

use crate::error::ShardError;

pub use commands::register_migration_commands;
pub use destination::{MigrationDestinationManager, MigrationProgress, ReceivePhase};
pub use registry::{ActiveMigration, DonateGuard, MigrationRegistry, ReceiveGuard};

/// Identifier shared by donor and destination for one chunk migration.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MigrationSessionId(Uuid);

impl MigrationSessionId {
    /// Creates a fresh session id.
    pub fn new() -> Self {
        MigrationSessionId(Uuid::new_v4())
    }

    /// Wraps an existing uuid.
    pub fn from_uuid(id: Uuid) -> Self {
        MigrationSessionId(id)
    }
}

impl Default for MigrationSessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for MigrationSessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "migration-{}", self.0)
    }
}

/// Clones the documents of a chunk range from the donor shard into local
/// storage. The data plane behind this trait is the storage engine's
/// concern, not this subsystem's.
#[async_trait]
pub trait ChunkCloner: Send + Sync {
    /// Copies all documents in `range` from `from`, returning the count.
    async fn clone_range(
        &self,
        ns: &NamespaceIdentity,
        range: &ChunkRange,
        from: &ShardId,
    ) -> Result<u64, ShardError>;
}

/// The shard's routing/catalog cache, consumed as a collaborator.
#[async_trait]
pub trait RoutingCache: Send + Sync {
    /// Forces an immediate refresh of the routing metadata for `ns`.
    async fn force_refresh(&self, ns: &NamespaceIdentity) -> Result<(), ShardError>;

    /// Waits until a previously forced refresh is visible to routing.
    async fn wait_flushed(&self, ns: &NamespaceIdentity) -> Result<(), ShardError>;
}
