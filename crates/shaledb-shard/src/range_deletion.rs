//! Post-migration range deletion.
//!
//! When a chunk is donated away, its documents become orphans on the donor
//! and are deleted in the background, in bounded batches, with a durable
//! task document per range so a restart resumes cleanup. Tasks survive a
//! collection rename through a three-step staging protocol so cleanup
//! neither vanishes nor double-applies across the rename.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use shaledb_routing::{ChunkRange, NamespaceIdentity};

use crate::error::ShardError;
use crate::store::{decode_doc, encode_doc, BatchOp, DocumentStore};

const TASK_PREFIX: &str = "rangeDeletions/";
const RENAME_PREFIX: &str = "rangeDeletionsForRename/";

/// A durable record of one orphaned range awaiting deletion.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RangeDeletionTask {
    /// Task id.
    pub id: Uuid,
    /// UUID of the collection the range belongs to.
    pub collection_uuid: Uuid,
    /// The collection namespace at task creation time.
    pub ns: NamespaceIdentity,
    /// The orphaned range.
    pub range: ChunkRange,
    /// Best-effort count of orphaned documents still in the range.
    pub num_orphans: u64,
    /// True while the donating migration has not yet committed; pending
    /// tasks must not be processed.
    pub pending: bool,
}

impl RangeDeletionTask {
    /// Creates a new pending task for a donated range.
    pub fn new(
        collection_uuid: Uuid,
        ns: NamespaceIdentity,
        range: ChunkRange,
        num_orphans: u64,
    ) -> Self {
        RangeDeletionTask {
            id: Uuid::new_v4(),
            collection_uuid,
            ns,
            range,
            num_orphans,
            pending: true,
        }
    }
}

/// The namespace holding range-deletion bookkeeping documents.
pub fn bookkeeping_namespace() -> NamespaceIdentity {
    NamespaceIdentity::new(None, "config", "rangeDeletions")
        .expect("static bookkeeping namespace is valid")
}

fn task_key(collection_uuid: &Uuid, id: &Uuid) -> Vec<u8> {
    format!("{}{}/{}", TASK_PREFIX, collection_uuid, id).into_bytes()
}

fn collection_prefix(collection_uuid: &Uuid) -> Vec<u8> {
    format!("{}{}/", TASK_PREFIX, collection_uuid).into_bytes()
}

fn rename_key(id: &Uuid) -> Vec<u8> {
    format!("{}{}", RENAME_PREFIX, id).into_bytes()
}

/// Checks, immediately before a unit of work, that this node still accepts
/// writes for a namespace. Catches a primary stepdown mid-flight.
pub trait WriteGate: Send + Sync {
    /// Returns [`ShardError::NotWritablePrimary`] once the node has
    /// stepped down for `ns`.
    fn assert_can_write(&self, ns: &NamespaceIdentity) -> Result<(), ShardError>;
}

/// Deletes documents within a range, a bounded batch at a time. The
/// storage engine sits behind this trait.
#[async_trait]
pub trait RangeDeleter: Send + Sync {
    /// Deletes up to `limit` documents of `collection_uuid` inside
    /// `range`, returning how many were removed.
    async fn delete_batch(
        &self,
        collection_uuid: &Uuid,
        range: &ChunkRange,
        limit: u64,
    ) -> Result<u64, ShardError>;
}

/// Durable storage for range-deletion tasks.
pub struct RangeDeletionStore {
    store: Arc<dyn DocumentStore>,
}

impl RangeDeletionStore {
    /// Wraps a document store.
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        RangeDeletionStore { store }
    }

    /// Persists a task document.
    pub fn persist_task(&self, task: &RangeDeletionTask) -> Result<(), ShardError> {
        self.store
            .put(task_key(&task.collection_uuid, &task.id), encode_doc(task)?)
    }

    /// Loads one task document.
    pub fn get_task(
        &self,
        collection_uuid: &Uuid,
        id: &Uuid,
    ) -> Result<Option<RangeDeletionTask>, ShardError> {
        match self.store.get(&task_key(collection_uuid, id))? {
            Some(bytes) => Ok(Some(decode_doc(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Marks a task ready for processing once its migration committed.
    pub fn clear_pending(&self, collection_uuid: &Uuid, id: &Uuid) -> Result<(), ShardError> {
        let Some(mut task) = self.get_task(collection_uuid, id)? else {
            return Err(ShardError::Store(format!(
                "range deletion task {} not found",
                id
            )));
        };
        task.pending = false;
        self.persist_task(&task)
    }

    /// Returns all tasks for a collection.
    pub fn tasks_for_collection(
        &self,
        collection_uuid: &Uuid,
    ) -> Result<Vec<RangeDeletionTask>, ShardError> {
        self.store
            .scan_prefix(&collection_prefix(collection_uuid))?
            .iter()
            .map(|(_, v)| decode_doc(v))
            .collect()
    }

    /// Deletes every task for a collection, returning how many were
    /// removed. Used when the collection itself is dropped.
    pub fn delete_tasks_for_collection(&self, collection_uuid: &Uuid) -> Result<usize, ShardError> {
        let entries = self.store.scan_prefix(&collection_prefix(collection_uuid))?;
        let count = entries.len();
        let ops = entries
            .into_iter()
            .map(|(key, _)| BatchOp::Delete { key })
            .collect();
        self.store.write_batch(ops)?;
        Ok(count)
    }

    /// Adjusts a task's orphan counter by `delta`, flooring at zero.
    /// Returns the new count. Concurrent adjustments are applied in some
    /// serial order by the store.
    pub fn persist_updated_num_orphans(
        &self,
        collection_uuid: &Uuid,
        id: &Uuid,
        delta: i64,
    ) -> Result<u64, ShardError> {
        let Some(mut task) = self.get_task(collection_uuid, id)? else {
            return Err(ShardError::Store(format!(
                "range deletion task {} not found",
                id
            )));
        };
        task.num_orphans = if delta >= 0 {
            task.num_orphans.saturating_add(delta as u64)
        } else {
            task.num_orphans.saturating_sub(delta.unsigned_abs())
        };
        self.persist_task(&task)?;
        Ok(task.num_orphans)
    }

    /// Copies the pending deletion tasks of `from` into the rename staging
    /// area, retargeted at `to`. Step one of the rename protocol, run
    /// before the rename commits.
    pub fn snapshot_tasks_for_rename(
        &self,
        from: &NamespaceIdentity,
        to: &NamespaceIdentity,
    ) -> Result<usize, ShardError> {
        let mut ops = Vec::new();
        for (_, value) in self.store.scan_prefix(TASK_PREFIX.as_bytes())? {
            let task: RangeDeletionTask = decode_doc(&value)?;
            if task.ns != *from {
                continue;
            }
            let staged = RangeDeletionTask {
                ns: to.clone(),
                ..task
            };
            ops.push(BatchOp::Put {
                key: rename_key(&staged.id),
                value: encode_doc(&staged)?,
            });
        }
        let count = ops.len();
        self.store.write_batch(ops)?;
        Ok(count)
    }

    /// Copies staged tasks targeting `to` back into the main task
    /// collection. Step two, run after the rename commits.
    pub fn restore_tasks_for_rename(&self, to: &NamespaceIdentity) -> Result<usize, ShardError> {
        let mut ops = Vec::new();
        for (_, value) in self.store.scan_prefix(RENAME_PREFIX.as_bytes())? {
            let task: RangeDeletionTask = decode_doc(&value)?;
            if task.ns != *to {
                continue;
            }
            ops.push(BatchOp::Put {
                key: task_key(&task.collection_uuid, &task.id),
                value: encode_doc(&task)?,
            });
        }
        let count = ops.len();
        self.store.write_batch(ops)?;
        Ok(count)
    }

    /// Purges both the source-side tasks and the rename staging entries.
    /// Step three, once the rename is fully settled.
    pub fn delete_tasks_for_rename(
        &self,
        from: &NamespaceIdentity,
        to: &NamespaceIdentity,
    ) -> Result<usize, ShardError> {
        let mut ops = Vec::new();
        for (key, value) in self.store.scan_prefix(TASK_PREFIX.as_bytes())? {
            let task: RangeDeletionTask = decode_doc(&value)?;
            if task.ns == *from {
                ops.push(BatchOp::Delete { key });
            }
        }
        for (key, value) in self.store.scan_prefix(RENAME_PREFIX.as_bytes())? {
            let task: RangeDeletionTask = decode_doc(&value)?;
            if task.ns == *to {
                ops.push(BatchOp::Delete { key });
            }
        }
        let count = ops.len();
        self.store.write_batch(ops)?;
        Ok(count)
    }
}

/// Deletes the documents of one orphaned range in bounded batches until
/// none remain, keeping the task's orphan counter current.
///
/// Before every batch the write gate is re-checked for the data namespace,
/// and again for the bookkeeping namespace before updating the counter: a
/// node that stepped down mid-flight stops instead of continuing to apply
/// deletions it no longer has the authority for. Returns the total number
/// of documents deleted.
pub async fn delete_range_in_batches(
    deleter: &dyn RangeDeleter,
    gate: &dyn WriteGate,
    store: &RangeDeletionStore,
    task: &RangeDeletionTask,
    batch_size: u64,
    cancel: &CancellationToken,
) -> Result<u64, ShardError> {
    if task.pending {
        return Err(ShardError::ConflictingOperation(format!(
            "range deletion task {} is still pending migration commit",
            task.id
        )));
    }
    let mut total = 0u64;
    loop {
        if cancel.is_cancelled() {
            return Err(ShardError::Interrupted);
        }
        gate.assert_can_write(&task.ns)?;
        let deleted = deleter
            .delete_batch(&task.collection_uuid, &task.range, batch_size)
            .await?;
        if deleted == 0 {
            break;
        }
        total += deleted;
        gate.assert_can_write(&bookkeeping_namespace())?;
        store.persist_updated_num_orphans(&task.collection_uuid, &task.id, -(deleted as i64))?;
        tracing::debug!(
            ns = %task.ns,
            range = %task.range,
            deleted,
            total,
            "range deletion batch applied"
        );
    }
    Ok(total)
}
