//! Per-process sharding state.
//!
//! Records whether this node has been initialized as a shard server and,
//! once it has, under which shard and cluster identity. Owned by the
//! process composition root and shared by reference; initialization is
//! write-once and post-initialization reads take no lock beyond the
//! internal RwLock's uncontended read path.

use parking_lot::RwLock;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use shaledb_routing::ShardId;

use crate::error::ShardError;

/// The role this process was started with.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ShardRole {
    /// Not a shard server; sharded commands are always rejected.
    None,
    /// A shard server awaiting (or holding) its identity.
    ShardServer,
}

/// Identity assigned to this node when it joined the cluster.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ShardIdentity {
    /// This node's shard id.
    pub shard_id: ShardId,
    /// The cluster id of the cluster that owns this shard.
    pub cluster_id: Uuid,
}

#[derive(Clone, Debug)]
enum Readiness {
    New,
    Initialized(ShardIdentity),
    Failed(String),
}

/// Write-once sharding readiness for this process.
pub struct ShardingState {
    role: ShardRole,
    readiness: RwLock<Readiness>,
    enabled: Notify,
}

impl ShardingState {
    /// Creates the state for a process started with `role`.
    pub fn new(role: ShardRole) -> Self {
        ShardingState {
            role,
            readiness: RwLock::new(Readiness::New),
            enabled: Notify::new(),
        }
    }

    /// Records successful initialization. First write wins; re-recording
    /// the same identity is a no-op, a different identity is a conflict.
    pub fn set_initialized(&self, identity: ShardIdentity) -> Result<(), ShardError> {
        let mut readiness = self.readiness.write();
        match &*readiness {
            Readiness::New => {
                tracing::info!(
                    shard_id = %identity.shard_id,
                    cluster_id = %identity.cluster_id,
                    "sharding state initialized"
                );
                *readiness = Readiness::Initialized(identity);
                drop(readiness);
                self.enabled.notify_waiters();
                Ok(())
            }
            Readiness::Initialized(existing) if *existing == identity => Ok(()),
            Readiness::Initialized(existing) => Err(ShardError::ConflictingOperation(format!(
                "sharding already initialized as {}",
                existing.shard_id
            ))),
            Readiness::Failed(msg) => Err(ShardError::ShardingStateFailed(msg.clone())),
        }
    }

    /// Records a failed initialization attempt. Only transitions out of
    /// the new state.
    pub fn set_failed(&self, message: String) {
        let mut readiness = self.readiness.write();
        if matches!(*readiness, Readiness::New) {
            tracing::warn!(error = %message, "sharding state failed to initialize");
            *readiness = Readiness::Failed(message);
            drop(readiness);
            self.enabled.notify_waiters();
        }
    }

    /// Returns Ok only when this node is an initialized shard server.
    /// Distinguishes "not yet initialized" from "not a shard server".
    pub fn can_accept_sharded_commands(&self) -> Result<(), ShardError> {
        if self.role == ShardRole::None {
            return Err(ShardError::NotRunningAsShard);
        }
        match &*self.readiness.read() {
            Readiness::New => Err(ShardError::ShardingStateNotInitialized),
            Readiness::Failed(msg) => Err(ShardError::ShardingStateFailed(msg.clone())),
            Readiness::Initialized(_) => Ok(()),
        }
    }

    /// Returns this node's shard id once initialized.
    pub fn shard_id(&self) -> Option<ShardId> {
        match &*self.readiness.read() {
            Readiness::Initialized(identity) => Some(identity.shard_id.clone()),
            _ => None,
        }
    }

    /// Returns the cluster id once initialized.
    pub fn cluster_id(&self) -> Option<Uuid> {
        match &*self.readiness.read() {
            Readiness::Initialized(identity) => Some(identity.cluster_id),
            _ => None,
        }
    }

    /// Blocks the calling task until the state leaves `New`, honoring the
    /// cancellation token. Returns the readiness outcome at that point.
    pub async fn wait_until_initialized(
        &self,
        cancel: &CancellationToken,
    ) -> Result<(), ShardError> {
        if self.role == ShardRole::None {
            return Err(ShardError::NotRunningAsShard);
        }
        loop {
            let notified = self.enabled.notified();
            match &*self.readiness.read() {
                Readiness::Initialized(_) => return Ok(()),
                Readiness::Failed(msg) => return Err(ShardError::ShardingStateFailed(msg.clone())),
                Readiness::New => {}
            }
            tokio::select! {
                _ = notified => {}
                _ = cancel.cancelled() => return Err(ShardError::Interrupted),
            }
        }
    }
}
