//! Drop-collection coordinator: phase ordering, crash resume, idempotence.

mod common;

use std::sync::Arc;

use common::{coll_ns, Call, FakeClock, RecordingCatalogClient, RecordingShardClient};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use shaledb_coord::document::CoordinatorStore;
use shaledb_coord::drop_collection::{
    DropCollectionArgs, DropCollectionCoordinator, DropCollectionPhase,
};
use shaledb_coord::runner::{Coordinator, CoordinatorRunner, RetryPolicy};
use shaledb_shard::error::ShardError;
use shaledb_shard::store::MemoryDocumentStore;

fn args() -> DropCollectionArgs {
    DropCollectionArgs {
        ns: coll_ns("db", "orders"),
        collection_uuid: Uuid::new_v4(),
    }
}

fn store() -> CoordinatorStore {
    CoordinatorStore::new(Arc::new(MemoryDocumentStore::new()))
}

fn one_shot_runner() -> CoordinatorRunner {
    CoordinatorRunner::new(
        RetryPolicy {
            max_attempts: 1,
            base_delay: std::time::Duration::from_millis(1),
            max_delay: std::time::Duration::from_millis(2),
        },
        CancellationToken::new(),
    )
}

#[tokio::test]
async fn test_phases_execute_in_protocol_order() -> anyhow::Result<()> {
    let shards = RecordingShardClient::new();
    let catalog = RecordingCatalogClient::new(vec![]);
    let clock = FakeClock::new();
    let store = store();

    let mut coordinator = DropCollectionCoordinator::new(
        args(),
        store.clone(),
        shards.clone(),
        catalog.clone(),
        clock.clone(),
        CancellationToken::new(),
    )?;
    assert!(!coordinator.must_always_make_progress());
    let id = coordinator.id();
    assert!(store.contains(&id)?);

    coordinator.run().await?;

    let calls = shards.calls();
    // Three blocks, three drops, three unblocks.
    assert_eq!(calls.len(), 9);
    assert!(calls[..3].iter().all(|c| matches!(c, Call::Block { .. })));
    assert!(calls[3..6]
        .iter()
        .all(|c| matches!(c, Call::DropCollection { .. })));
    assert!(calls[6..].iter().all(|c| matches!(c, Call::Unblock { .. })));

    // Non-primary shards are dropped first (marked from_migrate); the
    // primary is strictly last.
    let drops: Vec<&Call> = calls
        .iter()
        .filter(|c| matches!(c, Call::DropCollection { .. }))
        .collect();
    match drops.last().unwrap() {
        Call::DropCollection {
            shard,
            from_migrate,
            ..
        } => {
            assert_eq!(shard, "shard-b");
            assert!(!from_migrate);
        }
        _ => unreachable!(),
    }
    for call in &drops[..drops.len() - 1] {
        match call {
            Call::DropCollection {
                shard,
                from_migrate,
                ..
            } => {
                assert_ne!(shard, "shard-b");
                assert!(*from_migrate);
            }
            _ => unreachable!(),
        }
    }

    // Catalog mutations happened, in order, with a durability checkpoint.
    let events = catalog.events();
    let events: Vec<&str> = events.iter().map(|s| s.as_str()).collect();
    assert_eq!(
        events,
        vec![
            "stop_migrations db.orders",
            "remove_query_sampling_config db.orders",
            "remove_collection_metadata db.orders",
        ]
    );
    assert_eq!(clock.waits.load(std::sync::atomic::Ordering::SeqCst), 1);

    // The document is gone on completion.
    assert!(!store.contains(&id)?);
    Ok(())
}

#[tokio::test]
async fn test_resume_after_crash_does_not_rebroadcast_block() -> anyhow::Result<()> {
    let store = store();
    let clock = FakeClock::new();

    // First incarnation: the catalog fails persistently inside the drop
    // phase body, after the critical-section phase has been durably
    // recorded.
    let shards_before = RecordingShardClient::new();
    let catalog_before = RecordingCatalogClient::new(vec![]);
    catalog_before
        .failures
        .fail_times("remove_collection_metadata", u32::MAX);

    let mut coordinator = DropCollectionCoordinator::new(
        args(),
        store.clone(),
        shards_before.clone(),
        catalog_before.clone(),
        clock.clone(),
        CancellationToken::new(),
    )?;
    let id = coordinator.id();

    let err = one_shot_runner().drive(&mut coordinator).await.unwrap_err();
    assert!(matches!(err, ShardError::Network(_)));
    assert_eq!(coordinator.phase(), DropCollectionPhase::EnterCriticalSection);
    assert!(coordinator.must_always_make_progress());
    assert!(store.contains(&id)?);
    assert_eq!(shards_before.count(|c| matches!(c, Call::Block { .. })), 3);

    // "Crash": drop the coordinator, reload its document, resume with a
    // fresh recording client.
    drop(coordinator);
    let shards_after = RecordingShardClient::new();
    let catalog_after = RecordingCatalogClient::new(vec![]);
    let doc = store.load(&id)?.expect("document survives the crash");
    let mut resumed = DropCollectionCoordinator::resume(
        doc,
        store.clone(),
        shards_after.clone(),
        catalog_after.clone(),
        clock.clone(),
        CancellationToken::new(),
    );
    one_shot_runner().drive(&mut resumed).await?;

    // Resumed directly at the drop phase: the block broadcast was not
    // repeated, the remaining phases ran.
    assert_eq!(shards_after.count(|c| matches!(c, Call::Block { .. })), 0);
    assert_eq!(
        shards_after.count(|c| matches!(c, Call::DropCollection { .. })),
        3
    );
    assert_eq!(shards_after.count(|c| matches!(c, Call::Unblock { .. })), 3);
    assert!(!store.contains(&id)?);
    Ok(())
}

#[tokio::test]
async fn test_redriving_from_persisted_phase_skips_completed_work() -> anyhow::Result<()> {
    let store = store();
    let clock = FakeClock::new();

    // Run to completion once.
    let shards = RecordingShardClient::new();
    let catalog = RecordingCatalogClient::new(vec![]);
    let mut coordinator = DropCollectionCoordinator::new(
        args(),
        store.clone(),
        shards.clone(),
        catalog.clone(),
        clock.clone(),
        CancellationToken::new(),
    )?;
    let id = coordinator.id();
    coordinator.run().await?;
    let first_run_calls = shards.calls().len();

    // Re-driving the same coordinator after completion must not repeat
    // any externally visible side effect.
    coordinator.run().await?;
    assert_eq!(shards.calls().len(), first_run_calls);
    assert!(!store.contains(&id)?);
    Ok(())
}

#[tokio::test]
async fn test_transient_failure_within_phase_is_retried_by_runner() -> anyhow::Result<()> {
    let store = store();
    let shards = RecordingShardClient::new();
    // Two injected failures, then success: the runner absorbs them.
    shards.failures.fail_times("block", 2);
    let catalog = RecordingCatalogClient::new(vec![]);

    let mut coordinator = DropCollectionCoordinator::new(
        args(),
        store.clone(),
        shards.clone(),
        catalog.clone(),
        FakeClock::new(),
        CancellationToken::new(),
    )?;
    let id = coordinator.id();

    CoordinatorRunner::new(
        RetryPolicy {
            max_attempts: 5,
            base_delay: std::time::Duration::from_millis(1),
            max_delay: std::time::Duration::from_millis(2),
        },
        CancellationToken::new(),
    )
    .drive(&mut coordinator)
    .await?;

    assert!(!store.contains(&id)?);
    // The drop fan-out itself ran exactly once per shard.
    assert_eq!(
        shards.count(|c| matches!(c, Call::DropCollection { .. })),
        3
    );
    Ok(())
}

#[tokio::test]
async fn test_cancellation_leaves_document_for_resume() -> anyhow::Result<()> {
    let store = store();
    let shards = RecordingShardClient::new();
    let catalog = RecordingCatalogClient::new(vec![]);
    let cancel = CancellationToken::new();

    let mut coordinator = DropCollectionCoordinator::new(
        args(),
        store.clone(),
        shards.clone(),
        catalog.clone(),
        FakeClock::new(),
        cancel.clone(),
    )?;
    let id = coordinator.id();

    cancel.cancel();
    let err = coordinator.run().await.unwrap_err();
    assert!(matches!(err, ShardError::Interrupted));
    assert!(store.contains(&id)?);
    assert!(shards.calls().is_empty());
    Ok(())
}
