//! Shared harness for migration destination tests.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::watch;

use shaledb_routing::{
    Chunk, ChunkRange, ClusterTime, CollectionGeneration, CollectionMetadata, KeyPattern,
    NamespaceIdentity, PlacementVersion, RouteKey, ShardId,
};
use shaledb_shard::collection_state::CollectionShardingRegistry;
use shaledb_shard::error::ShardError;
use shaledb_shard::migration::destination::StartReceiveRequest;
use shaledb_shard::migration::{
    ChunkCloner, MigrationDestinationManager, MigrationRegistry, MigrationSessionId, RoutingCache,
};
use shaledb_shard::state::{ShardIdentity, ShardRole, ShardingState};

/// Cloner whose completion is gated by the test.
pub struct ControlledCloner {
    gate_tx: watch::Sender<bool>,
    docs: u64,
    fail_with: Option<String>,
}

impl ControlledCloner {
    pub fn released(docs: u64) -> Arc<Self> {
        let (gate_tx, _) = watch::channel(true);
        Arc::new(ControlledCloner {
            gate_tx,
            docs,
            fail_with: None,
        })
    }

    pub fn gated(docs: u64) -> Arc<Self> {
        let (gate_tx, _) = watch::channel(false);
        Arc::new(ControlledCloner {
            gate_tx,
            docs,
            fail_with: None,
        })
    }

    pub fn failing(message: &str) -> Arc<Self> {
        let (gate_tx, _) = watch::channel(true);
        Arc::new(ControlledCloner {
            gate_tx,
            docs: 0,
            fail_with: Some(message.to_string()),
        })
    }

    pub fn open_gate(&self) {
        let _ = self.gate_tx.send(true);
    }
}

#[async_trait]
impl ChunkCloner for ControlledCloner {
    async fn clone_range(
        &self,
        _ns: &NamespaceIdentity,
        _range: &ChunkRange,
        _from: &ShardId,
    ) -> Result<u64, ShardError> {
        let mut rx = self.gate_tx.subscribe();
        loop {
            if *rx.borrow_and_update() {
                break;
            }
            if rx.changed().await.is_err() {
                break;
            }
        }
        match &self.fail_with {
            Some(message) => Err(ShardError::Network(message.clone())),
            None => Ok(self.docs),
        }
    }
}

/// Routing cache fake counting forced refreshes.
pub struct RecordingRoutingCache {
    refreshes: AtomicU64,
}

impl RecordingRoutingCache {
    pub fn new() -> Arc<Self> {
        Arc::new(RecordingRoutingCache {
            refreshes: AtomicU64::new(0),
        })
    }

    pub fn refresh_count(&self) -> u64 {
        self.refreshes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RoutingCache for RecordingRoutingCache {
    async fn force_refresh(&self, _ns: &NamespaceIdentity) -> Result<(), ShardError> {
        self.refreshes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn wait_flushed(&self, _ns: &NamespaceIdentity) -> Result<(), ShardError> {
        Ok(())
    }
}

/// One receiving shard with seeded collection metadata.
pub struct TestShard {
    pub sharding_state: Arc<ShardingState>,
    pub registry: Arc<MigrationRegistry>,
    pub collections: Arc<CollectionShardingRegistry>,
    pub routing: Arc<RecordingRoutingCache>,
    pub manager: Arc<MigrationDestinationManager>,
    pub generation: CollectionGeneration,
}

impl TestShard {
    pub fn new(cloner: Arc<dyn ChunkCloner>) -> Self {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();

        let sharding_state = Arc::new(ShardingState::new(ShardRole::ShardServer));
        sharding_state
            .set_initialized(ShardIdentity {
                shard_id: ShardId::new("shard-dst"),
                cluster_id: uuid::Uuid::new_v4(),
            })
            .unwrap();

        let registry = Arc::new(MigrationRegistry::new());
        let collections = Arc::new(CollectionShardingRegistry::new());
        let routing = RecordingRoutingCache::new();

        let generation = CollectionGeneration::new(ClusterTime::new(12, 0));
        let metadata = CollectionMetadata::new(
            KeyPattern::single("user").unwrap(),
            generation,
            PlacementVersion::new(3, 0),
            vec![Chunk::new(
                ChunkRange::new(RouteKey::number(100), RouteKey::number(200)).unwrap(),
                PlacementVersion::new(3, 0),
            )],
        )
        .unwrap();
        collections
            .acquire_exclusive(&test_ns())
            .set_metadata(Arc::new(metadata));

        let manager = MigrationDestinationManager::new(
            sharding_state.clone(),
            registry.clone(),
            collections.clone(),
            routing.clone(),
            cloner,
        );

        TestShard {
            sharding_state,
            registry,
            collections,
            routing,
            manager,
            generation,
        }
    }
}

pub fn test_ns() -> NamespaceIdentity {
    NamespaceIdentity::new(None, "db", "orders").unwrap()
}

pub fn start_request(session_id: MigrationSessionId) -> StartReceiveRequest {
    StartReceiveRequest {
        ns: test_ns(),
        session_id,
        range: ChunkRange::new(RouteKey::number(0), RouteKey::number(100)).unwrap(),
        from_shard: ShardId::new("shard-src"),
        secondary_throttle: false,
    }
}
