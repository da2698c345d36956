//! Subsystem-wide error taxonomy.
//!
//! All expected failures are values: staleness, precondition violations,
//! protocol violations, transient infrastructure failures and authorization
//! rejections each map to a distinct variant so callers can classify
//! without string matching. The command boundary converts these into a
//! structured reply; nothing in this subsystem panics on an expected path.

use shaledb_routing::{DatabaseVersion, NamespaceIdentity, RoutingError, ShardVersion};

use crate::critical_section::CriticalSectionPhase;

/// Errors produced by the sharding runtime, migration protocol and DDL
/// coordinators.
#[derive(Debug, thiserror::Error)]
pub enum ShardError {
    /// The caller's cached shard version disagrees with this shard's state.
    /// Recoverable by refreshing the catalog cache and retrying.
    #[error("stale shard version for {ns}: received {received}, wanted {wanted:?}, critical section {crit_sec:?}")]
    StaleShardVersion {
        /// The collection namespace.
        ns: NamespaceIdentity,
        /// The version the caller operated with. May be the
        /// [`ShardVersion::ignored`] sentinel when the true received
        /// version is not tracked at the failing layer.
        received: ShardVersion,
        /// The version this shard holds, if any metadata is cached.
        wanted: Option<ShardVersion>,
        /// The critical-section phase active at failure time, if any.
        crit_sec: Option<CriticalSectionPhase>,
    },

    /// The caller's cached database version disagrees with this shard's
    /// state.
    #[error("stale database version for {db}: received {received}, wanted {wanted:?}, critical section {crit_sec:?}")]
    StaleDbVersion {
        /// The database identity.
        db: NamespaceIdentity,
        /// The version the caller operated with.
        received: DatabaseVersion,
        /// The version this shard holds, if any.
        wanted: Option<DatabaseVersion>,
        /// The critical-section phase active at failure time, if any.
        crit_sec: Option<CriticalSectionPhase>,
    },

    /// The namespace does not exist in the relevant catalog.
    #[error("namespace {0} not found")]
    NamespaceNotFound(NamespaceIdentity),

    /// The request carried invalid or inconsistent options.
    #[error("invalid options: {0}")]
    InvalidOptions(String),

    /// The operation cannot be performed against the current cluster state.
    #[error("illegal operation: {0}")]
    IllegalOperation(String),

    /// A migration session id did not match the active session.
    #[error("migration session mismatch: expected {expected}, received {received}")]
    SessionMismatch {
        /// The session the receiving side holds ("<none>" when idle).
        expected: String,
        /// The session the caller supplied.
        received: String,
    },

    /// An operation that requires the collection critical section found it
    /// not held.
    #[error("critical section not held for {0}")]
    CriticalSectionNotHeld(NamespaceIdentity),

    /// A conflicting sharded operation is already in progress.
    #[error("conflicting operation in progress: {0}")]
    ConflictingOperation(String),

    /// Sharding has not been initialized on this node yet.
    #[error("sharding state not yet initialized")]
    ShardingStateNotInitialized,

    /// Sharding initialization failed earlier in this process's lifetime.
    #[error("sharding state failed to initialize: {0}")]
    ShardingStateFailed(String),

    /// This node is not running as a shard server at all.
    #[error("node is not running as a shard server")]
    NotRunningAsShard,

    /// Cached collection metadata was cleared by a concurrent operation
    /// between registration and use.
    #[error("collection metadata for {0} was cleared by a concurrent operation")]
    ConcurrentMetadataClear(NamespaceIdentity),

    /// This node can no longer accept writes for the namespace (stepdown).
    #[error("not writable primary for {0}")]
    NotWritablePrimary(NamespaceIdentity),

    /// An internal-only command was invoked without internal authorization.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// A remote call failed before completing.
    #[error("network error: {0}")]
    Network(String),

    /// A write completed locally but its write concern was not satisfied
    /// in time.
    #[error("write concern timeout: {0}")]
    WriteConcernTimeout(String),

    /// The embedded document store failed.
    #[error("document store error: {0}")]
    Store(String),

    /// The operation was interrupted by cancellation or stepdown.
    #[error("operation interrupted")]
    Interrupted,

    /// A routing value type rejected its input.
    #[error(transparent)]
    Routing(#[from] RoutingError),
}

impl ShardError {
    /// Returns true for errors a coordinator may retry against its intact
    /// phase document: transient infrastructure failures, and staleness
    /// (recoverable by refreshing the catalog cache).
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ShardError::Network(_)
                | ShardError::WriteConcernTimeout(_)
                | ShardError::StaleShardVersion { .. }
                | ShardError::StaleDbVersion { .. }
        )
    }

    /// Returns true for the staleness class of errors.
    pub fn is_stale(&self) -> bool {
        matches!(
            self,
            ShardError::StaleShardVersion { .. } | ShardError::StaleDbVersion { .. }
        )
    }
}
