//! Destination-side chunk receive state machine.
//!
//! One manager instance exists per process, enforcing at-most-one
//! concurrent chunk receive per shard. A receive moves through
//! `Registered -> Cloning -> SteadyState -> (Committing | Aborting) ->
//! Done`; from commit until the donor's release request the destination
//! holds its migration critical section so no read can observe the chunk
//! half-arrived.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use shaledb_routing::{ChunkRange, CollectionGeneration, NamespaceIdentity, ShardId};

use crate::collection_state::CollectionShardingRegistry;
use crate::error::ShardError;
use crate::migration::registry::{ActiveMigration, MigrationRegistry, ReceiveGuard};
use crate::migration::{ChunkCloner, MigrationSessionId, RoutingCache};
use crate::state::ShardingState;

/// Phase of an in-flight chunk receive. Ordering follows protocol order;
/// `Aborting` and `Done` are terminal-side phases.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ReceivePhase {
    /// Registered with the migration registry; clone not started.
    Registered,
    /// Copying documents from the donor.
    Cloning,
    /// Clone complete; waiting for the donor's commit or abort.
    SteadyState,
    /// Commit received; entering the destination critical section.
    Committing,
    /// Abort received or clone failed; tearing down.
    Aborting,
    /// Terminal.
    Done,
}

/// Request to begin receiving a chunk.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StartReceiveRequest {
    /// The collection the chunk belongs to.
    pub ns: NamespaceIdentity,
    /// Session id agreed with the donor.
    pub session_id: MigrationSessionId,
    /// The chunk range to receive.
    pub range: ChunkRange,
    /// The donor shard.
    pub from_shard: ShardId,
    /// Whether secondary replication should be throttled during the clone.
    #[serde(default)]
    pub secondary_throttle: bool,
}

/// Progress report for the in-flight (or absent) chunk receive.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MigrationProgress {
    /// Whether a receive is active.
    pub active: bool,
    /// Phase of the active receive.
    pub phase: Option<ReceivePhase>,
    /// Session of the active receive.
    pub session_id: Option<MigrationSessionId>,
    /// Namespace of the active receive.
    pub ns: Option<NamespaceIdentity>,
    /// Range of the active receive.
    pub range: Option<ChunkRange>,
    /// Donor shard of the active receive.
    pub from_shard: Option<ShardId>,
    /// Documents cloned so far.
    pub cloned_docs: u64,
    /// Whether the destination critical section is held.
    pub crit_sec_held: bool,
    /// Failure recorded by the most recent receive, if it failed.
    pub failure: Option<String>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum ReceiveDecision {
    Commit,
    Abort,
}

struct ActiveReceive {
    session_id: MigrationSessionId,
    ns: NamespaceIdentity,
    range: ChunkRange,
    from_shard: ShardId,
    generation: CollectionGeneration,
    phase: ReceivePhase,
    cloned_docs: u64,
    crit_sec_held: bool,
    decision_tx: watch::Sender<Option<ReceiveDecision>>,
    _guard: Option<ReceiveGuard>,
}

/// The per-process chunk receive manager.
pub struct MigrationDestinationManager {
    sharding_state: Arc<ShardingState>,
    registry: Arc<MigrationRegistry>,
    collections: Arc<CollectionShardingRegistry>,
    routing: Arc<dyn RoutingCache>,
    cloner: Arc<dyn ChunkCloner>,
    active: Mutex<Option<ActiveReceive>>,
    last_failure: Mutex<Option<String>>,
    changed_tx: watch::Sender<u64>,
    change_epoch: AtomicU64,
}

impl MigrationDestinationManager {
    /// Creates the manager for this process.
    pub fn new(
        sharding_state: Arc<ShardingState>,
        registry: Arc<MigrationRegistry>,
        collections: Arc<CollectionShardingRegistry>,
        routing: Arc<dyn RoutingCache>,
        cloner: Arc<dyn ChunkCloner>,
    ) -> Arc<Self> {
        let (changed_tx, _) = watch::channel(0);
        Arc::new(MigrationDestinationManager {
            sharding_state,
            registry,
            collections,
            routing,
            cloner,
            active: Mutex::new(None),
            last_failure: Mutex::new(None),
            changed_tx,
            change_epoch: AtomicU64::new(0),
        })
    }

    fn notify_changed(&self) {
        let epoch = self.change_epoch.fetch_add(1, Ordering::SeqCst) + 1;
        let _ = self.changed_tx.send(epoch);
    }

    fn set_phase(&self, phase: ReceivePhase) {
        {
            let mut active = self.active.lock();
            if let Some(receive) = active.as_mut() {
                tracing::debug!(
                    ns = %receive.ns,
                    session = %receive.session_id,
                    from = ?receive.phase,
                    to = ?phase,
                    "chunk receive phase change"
                );
                receive.phase = phase;
            }
        }
        self.notify_changed();
    }

    fn clear_active(&self, failure: Option<String>) {
        {
            let mut active = self.active.lock();
            *active = None;
            *self.last_failure.lock() = failure;
        }
        self.notify_changed();
    }

    /// Begins receiving a chunk. Registers exclusive intent, forces a
    /// routing refresh so no further chunk can be routed here before the
    /// registration is visible, captures the collection generation under
    /// a shared collection guard, and spawns the receive task.
    pub async fn start(self: &Arc<Self>, req: StartReceiveRequest) -> Result<(), ShardError> {
        self.sharding_state.can_accept_sharded_commands()?;
        if self.active.lock().is_some() {
            return Err(ShardError::ConflictingOperation(
                "a chunk receive is already in progress".to_string(),
            ));
        }
        let guard = self.registry.register_receive(ActiveMigration {
            ns: req.ns.clone(),
            range: req.range.clone(),
            peer: req.from_shard.clone(),
        })?;

        self.routing.force_refresh(&req.ns).await?;

        let generation = {
            let entry = self.collections.acquire_shared(&req.ns);
            let Some(metadata) = entry.metadata() else {
                return Err(ShardError::ConcurrentMetadataClear(req.ns.clone()));
            };
            *metadata.generation()
        };

        let (decision_tx, decision_rx) = watch::channel(None);
        {
            let mut active = self.active.lock();
            if active.is_some() {
                return Err(ShardError::ConflictingOperation(
                    "a chunk receive is already in progress".to_string(),
                ));
            }
            *active = Some(ActiveReceive {
                session_id: req.session_id,
                ns: req.ns.clone(),
                range: req.range.clone(),
                from_shard: req.from_shard.clone(),
                generation,
                phase: ReceivePhase::Registered,
                cloned_docs: 0,
                crit_sec_held: false,
                decision_tx,
                _guard: Some(guard),
            });
            *self.last_failure.lock() = None;
        }
        self.notify_changed();

        tracing::info!(
            ns = %req.ns,
            range = %req.range,
            from = %req.from_shard,
            session = %req.session_id,
            "chunk receive started"
        );

        let manager = Arc::clone(self);
        tokio::spawn(async move {
            manager.run_receive(decision_rx).await;
        });
        Ok(())
    }

    async fn run_receive(self: Arc<Self>, mut decision_rx: watch::Receiver<Option<ReceiveDecision>>) {
        let (ns, range, from_shard) = {
            let active = self.active.lock();
            match active.as_ref() {
                Some(receive) => (
                    receive.ns.clone(),
                    receive.range.clone(),
                    receive.from_shard.clone(),
                ),
                None => return,
            }
        };

        self.set_phase(ReceivePhase::Cloning);
        let clone_result = tokio::select! {
            result = self.cloner.clone_range(&ns, &range, &from_shard) => Some(result),
            _ = wait_for_abort(&mut decision_rx) => None,
        };
        match clone_result {
            Some(Ok(count)) => {
                {
                    let mut active = self.active.lock();
                    if let Some(receive) = active.as_mut() {
                        receive.cloned_docs = count;
                    }
                }
                self.set_phase(ReceivePhase::SteadyState);
            }
            Some(Err(e)) => {
                tracing::warn!(ns = %ns, error = %e, "chunk clone failed, aborting receive");
                self.set_phase(ReceivePhase::Aborting);
                self.clear_active(Some(e.to_string()));
                return;
            }
            None => {
                self.set_phase(ReceivePhase::Aborting);
                self.clear_active(None);
                return;
            }
        }

        loop {
            let decision = *decision_rx.borrow_and_update();
            match decision {
                Some(ReceiveDecision::Commit) => {
                    self.set_phase(ReceivePhase::Committing);
                    {
                        let mut active = self.active.lock();
                        if let Some(receive) = active.as_mut() {
                            receive.crit_sec_held = true;
                        }
                    }
                    self.set_phase(ReceivePhase::Done);
                    return;
                }
                Some(ReceiveDecision::Abort) => {
                    self.set_phase(ReceivePhase::Aborting);
                    self.clear_active(None);
                    return;
                }
                None => {
                    if decision_rx.changed().await.is_err() {
                        self.set_phase(ReceivePhase::Aborting);
                        self.clear_active(None);
                        return;
                    }
                }
            }
        }
    }

    /// Builds the current progress report.
    pub fn progress(&self) -> MigrationProgress {
        let active = self.active.lock();
        match active.as_ref() {
            Some(receive) => MigrationProgress {
                active: true,
                phase: Some(receive.phase),
                session_id: Some(receive.session_id),
                ns: Some(receive.ns.clone()),
                range: Some(receive.range.clone()),
                from_shard: Some(receive.from_shard.clone()),
                cloned_docs: receive.cloned_docs,
                crit_sec_held: receive.crit_sec_held,
                failure: None,
            },
            None => MigrationProgress {
                active: false,
                phase: None,
                session_id: None,
                ns: None,
                range: None,
                from_shard: None,
                cloned_docs: 0,
                crit_sec_held: false,
                failure: self.last_failure.lock().clone(),
            },
        }
    }

    /// Returns the generation captured at start, if a receive is active.
    pub fn captured_generation(&self) -> Option<CollectionGeneration> {
        self.active.lock().as_ref().map(|r| r.generation)
    }

    /// Reports progress, optionally waiting until the receive reaches
    /// steady state or finishes.
    pub async fn status(&self, wait_for_steady_or_done: bool) -> MigrationProgress {
        if wait_for_steady_or_done {
            loop {
                let mut rx = self.changed_tx.subscribe();
                let progress = self.progress();
                match progress.phase {
                    None => break,
                    Some(phase) if phase >= ReceivePhase::SteadyState => break,
                    Some(_) => {}
                }
                if rx.changed().await.is_err() {
                    break;
                }
            }
        }
        self.progress()
    }

    fn check_session(
        receive: &ActiveReceive,
        session_id: &MigrationSessionId,
    ) -> Result<(), ShardError> {
        if receive.session_id != *session_id {
            return Err(ShardError::SessionMismatch {
                expected: receive.session_id.to_string(),
                received: session_id.to_string(),
            });
        }
        Ok(())
    }

    /// Commits the in-flight receive. Requires a matching session id and
    /// the receive to have reached steady state; waits for the critical
    /// section to be taken before returning.
    pub async fn commit(&self, session_id: MigrationSessionId) -> Result<MigrationProgress, ShardError> {
        {
            let active = self.active.lock();
            let Some(receive) = active.as_ref() else {
                return Err(ShardError::SessionMismatch {
                    expected: "<none>".to_string(),
                    received: session_id.to_string(),
                });
            };
            Self::check_session(receive, &session_id)?;
            if receive.phase < ReceivePhase::SteadyState {
                return Err(ShardError::ConflictingOperation(
                    "chunk receive has not reached steady state".to_string(),
                ));
            }
            let _ = receive.decision_tx.send(Some(ReceiveDecision::Commit));
        }

        loop {
            let mut rx = self.changed_tx.subscribe();
            let progress = self.progress();
            if !progress.active {
                return Err(ShardError::ConflictingOperation(
                    "chunk receive aborted during commit".to_string(),
                ));
            }
            if progress.phase == Some(ReceivePhase::Done) && progress.crit_sec_held {
                return Ok(progress);
            }
            if rx.changed().await.is_err() {
                return Ok(self.progress());
            }
        }
    }

    /// Aborts the in-flight receive. A matching session id aborts that
    /// receive; an absent session id force-aborts unconditionally, and is
    /// a clean no-op when nothing is active.
    pub async fn abort(
        &self,
        session_id: Option<MigrationSessionId>,
    ) -> Result<MigrationProgress, ShardError> {
        {
            let active = self.active.lock();
            match (active.as_ref(), session_id) {
                (None, None) => return Ok(self.idle_progress()),
                (None, Some(session)) => {
                    return Err(ShardError::SessionMismatch {
                        expected: "<none>".to_string(),
                        received: session.to_string(),
                    });
                }
                (Some(receive), maybe_session) => {
                    if let Some(session) = maybe_session {
                        Self::check_session(receive, &session)?;
                    } else {
                        tracing::warn!(
                            ns = %receive.ns,
                            session = %receive.session_id,
                            "force-aborting chunk receive without session id"
                        );
                    }
                    let _ = receive.decision_tx.send(Some(ReceiveDecision::Abort));
                }
            }
        }

        loop {
            let mut rx = self.changed_tx.subscribe();
            let progress = self.progress();
            if !progress.active {
                return Ok(progress);
            }
            if rx.changed().await.is_err() {
                return Ok(self.progress());
            }
        }
    }

    fn idle_progress(&self) -> MigrationProgress {
        MigrationProgress {
            active: false,
            phase: None,
            session_id: None,
            ns: None,
            range: None,
            from_shard: None,
            cloned_docs: 0,
            crit_sec_held: false,
            failure: self.last_failure.lock().clone(),
        }
    }

    /// Releases the destination-side critical section held since commit,
    /// completing the migration on this shard.
    pub fn release_critical_section(
        &self,
        session_id: MigrationSessionId,
    ) -> Result<(), ShardError> {
        let ns = {
            let mut active = self.active.lock();
            let Some(receive) = active.take() else {
                return Err(ShardError::SessionMismatch {
                    expected: "<none>".to_string(),
                    received: session_id.to_string(),
                });
            };
            if let Err(e) = Self::check_session(&receive, &session_id) {
                *active = Some(receive);
                return Err(e);
            }
            if !receive.crit_sec_held {
                let ns = receive.ns.clone();
                *active = Some(receive);
                return Err(ShardError::CriticalSectionNotHeld(ns));
            }
            receive.ns
        };
        *self.last_failure.lock() = None;
        self.notify_changed();
        tracing::info!(ns = %ns, session = %session_id, "released destination critical section");
        Ok(())
    }
}

async fn wait_for_abort(rx: &mut watch::Receiver<Option<ReceiveDecision>>) {
    loop {
        if *rx.borrow_and_update() == Some(ReceiveDecision::Abort) {
            return;
        }
        if rx.changed().await.is_err() {
            return;
        }
    }
}
