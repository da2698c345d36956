//! Recording fakes for coordinator tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use uuid::Uuid;

use shaledb_routing::{ClusterTime, NamespaceIdentity, ShardId};
use shaledb_coord::clients::{CatalogClient, ClusterClock, LocalCatalog, ShardClient};
use shaledb_coord::document::RetryableSession;
use shaledb_shard::error::ShardError;
use shaledb_shard::migration::RoutingCache;

/// One participant request observed by the recording shard client.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Call {
    Block { shard: String, ns: String },
    Unblock { shard: String, ns: String },
    DropCollection { shard: String, ns: String, from_migrate: bool },
    DropDatabase { shard: String, db: String },
    Compact { shard: String, ns: String },
}

/// Failure injection shared by the recording fakes: a method fails with a
/// network error while its counter is positive.
#[derive(Default)]
pub struct FailureInjector {
    counters: Mutex<HashMap<&'static str, u32>>,
}

impl FailureInjector {
    pub fn fail_times(&self, method: &'static str, times: u32) {
        self.counters.lock().unwrap().insert(method, times);
    }

    pub fn maybe_fail(&self, method: &'static str) -> Result<(), ShardError> {
        let mut counters = self.counters.lock().unwrap();
        if let Some(left) = counters.get_mut(method) {
            if *left > 0 {
                *left -= 1;
                return Err(ShardError::Network(format!("injected {} failure", method)));
            }
        }
        Ok(())
    }
}

/// Shard client recording every participant request.
#[derive(Default)]
pub struct RecordingShardClient {
    calls: Mutex<Vec<Call>>,
    pub failures: FailureInjector,
}

impl RecordingShardClient {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, matcher: impl Fn(&Call) -> bool) -> usize {
        self.calls().iter().filter(|c| matcher(c)).count()
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl ShardClient for RecordingShardClient {
    async fn block_reads_and_writes(
        &self,
        shard: &ShardId,
        ns: &NamespaceIdentity,
        _reason: &serde_json::Value,
        _session: &RetryableSession,
    ) -> Result<(), ShardError> {
        self.failures.maybe_fail("block")?;
        self.record(Call::Block {
            shard: shard.to_string(),
            ns: ns.to_string(),
        });
        Ok(())
    }

    async fn unblock_reads_and_writes(
        &self,
        shard: &ShardId,
        ns: &NamespaceIdentity,
        _reason: &serde_json::Value,
        _session: &RetryableSession,
    ) -> Result<(), ShardError> {
        self.failures.maybe_fail("unblock")?;
        self.record(Call::Unblock {
            shard: shard.to_string(),
            ns: ns.to_string(),
        });
        Ok(())
    }

    async fn drop_collection_locally(
        &self,
        shard: &ShardId,
        ns: &NamespaceIdentity,
        from_migrate: bool,
        _session: &RetryableSession,
    ) -> Result<(), ShardError> {
        self.failures.maybe_fail("drop_collection")?;
        self.record(Call::DropCollection {
            shard: shard.to_string(),
            ns: ns.to_string(),
            from_migrate,
        });
        Ok(())
    }

    async fn drop_database_locally(
        &self,
        shard: &ShardId,
        db: &NamespaceIdentity,
        _session: &RetryableSession,
    ) -> Result<(), ShardError> {
        self.failures.maybe_fail("drop_database")?;
        self.record(Call::DropDatabase {
            shard: shard.to_string(),
            db: db.to_string(),
        });
        Ok(())
    }

    async fn compact_collection(
        &self,
        shard: &ShardId,
        ns: &NamespaceIdentity,
    ) -> Result<(), ShardError> {
        self.failures.maybe_fail("compact")?;
        self.record(Call::Compact {
            shard: shard.to_string(),
            ns: ns.to_string(),
        });
        Ok(())
    }
}

/// Catalog client over a fixed topology, recording catalog mutations.
pub struct RecordingCatalogClient {
    pub shard_ids: Vec<ShardId>,
    pub primary: ShardId,
    pub collections: Vec<(NamespaceIdentity, Uuid)>,
    events: Mutex<Vec<String>>,
    pub failures: FailureInjector,
}

impl RecordingCatalogClient {
    pub fn new(collections: Vec<(NamespaceIdentity, Uuid)>) -> Arc<Self> {
        Arc::new(RecordingCatalogClient {
            shard_ids: vec![
                ShardId::new("shard-a"),
                ShardId::new("shard-b"),
                ShardId::new("shard-c"),
            ],
            primary: ShardId::new("shard-b"),
            collections,
            events: Mutex::new(Vec::new()),
            failures: FailureInjector::default(),
        })
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    fn record(&self, event: String) {
        self.events.lock().unwrap().push(event);
    }
}

#[async_trait]
impl CatalogClient for RecordingCatalogClient {
    async fn list_collections(
        &self,
        db: &NamespaceIdentity,
    ) -> Result<Vec<(NamespaceIdentity, Uuid)>, ShardError> {
        Ok(self
            .collections
            .iter()
            .filter(|(ns, _)| ns.db_name() == db.db_name())
            .cloned()
            .collect())
    }

    async fn stop_migrations(&self, ns: &NamespaceIdentity) -> Result<(), ShardError> {
        self.failures.maybe_fail("stop_migrations")?;
        self.record(format!("stop_migrations {}", ns));
        Ok(())
    }

    async fn remove_query_sampling_config(
        &self,
        ns: &NamespaceIdentity,
    ) -> Result<(), ShardError> {
        self.failures.maybe_fail("remove_query_sampling_config")?;
        self.record(format!("remove_query_sampling_config {}", ns));
        Ok(())
    }

    async fn remove_collection_metadata(&self, ns: &NamespaceIdentity) -> Result<(), ShardError> {
        self.failures.maybe_fail("remove_collection_metadata")?;
        self.record(format!("remove_collection_metadata {}", ns));
        Ok(())
    }

    async fn remove_database_metadata(&self, db: &NamespaceIdentity) -> Result<(), ShardError> {
        self.failures.maybe_fail("remove_database_metadata")?;
        self.record(format!("remove_database_metadata {}", db));
        Ok(())
    }

    async fn all_shards(&self) -> Result<Vec<ShardId>, ShardError> {
        Ok(self.shard_ids.clone())
    }

    async fn primary_shard(&self, _db: &NamespaceIdentity) -> Result<ShardId, ShardError> {
        Ok(self.primary.clone())
    }
}

/// Clock counting durability waits.
#[derive(Default)]
pub struct FakeClock {
    ticks: AtomicU32,
    pub waits: AtomicU32,
}

impl FakeClock {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

#[async_trait]
impl ClusterClock for FakeClock {
    fn tick(&self) -> ClusterTime {
        let increment = self.ticks.fetch_add(1, Ordering::SeqCst) + 1;
        ClusterTime::new(1, increment)
    }

    async fn wait_config_time_durable(&self) -> Result<(), ShardError> {
        self.waits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Local catalog over an in-memory set of existing collections.
pub struct FakeLocalCatalog {
    existing: Mutex<Vec<String>>,
}

impl FakeLocalCatalog {
    pub fn with_collections(names: &[&str]) -> Arc<Self> {
        Arc::new(FakeLocalCatalog {
            existing: Mutex::new(names.iter().map(|s| s.to_string()).collect()),
        })
    }

    pub fn contains(&self, ns: &NamespaceIdentity) -> bool {
        self.existing
            .lock()
            .unwrap()
            .contains(&ns.full_name().to_string())
    }
}

#[async_trait]
impl LocalCatalog for FakeLocalCatalog {
    async fn drop_collection(
        &self,
        ns: &NamespaceIdentity,
        _from_migrate: bool,
    ) -> Result<(), ShardError> {
        let mut existing = self.existing.lock().unwrap();
        let name = ns.full_name().to_string();
        if let Some(pos) = existing.iter().position(|n| *n == name) {
            existing.remove(pos);
            Ok(())
        } else {
            Err(ShardError::NamespaceNotFound(ns.clone()))
        }
    }

    async fn drop_database(&self, db: &NamespaceIdentity) -> Result<(), ShardError> {
        let prefix = format!("{}.", db.db_name());
        self.existing.lock().unwrap().retain(|n| !n.starts_with(&prefix));
        Ok(())
    }
}

/// Routing cache fake counting refreshes and flush waits.
#[derive(Default)]
pub struct CountingRoutingCache {
    pub refreshes: AtomicU32,
    pub flushes: AtomicU32,
}

impl CountingRoutingCache {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

#[async_trait]
impl RoutingCache for CountingRoutingCache {
    async fn force_refresh(&self, _ns: &NamespaceIdentity) -> Result<(), ShardError> {
        self.refreshes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn wait_flushed(&self, _ns: &NamespaceIdentity) -> Result<(), ShardError> {
        self.flushes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

pub fn coll_ns(db: &str, coll: &str) -> NamespaceIdentity {
    NamespaceIdentity::new(None, db, coll).unwrap()
}

pub fn db_ns(db: &str) -> NamespaceIdentity {
    NamespaceIdentity::database(None, db).unwrap()
}
