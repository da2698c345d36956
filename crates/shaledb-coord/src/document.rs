//! Durable coordinator state documents.
//!
//! Every DDL coordinator persists a document recording its arguments and
//! the last *completed* phase. A crash/restart reloads the document and
//! resumes with completed phases skipped; the phase field only ever moves
//! forward.

use std::fmt;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use shaledb_shard::error::ShardError;
use shaledb_shard::store::{decode_doc, encode_doc, DocumentStore};

const COORDINATOR_PREFIX: &str = "coordinators/";

/// Retryable-write session a coordinator tags its participant requests
/// with. The transaction number advances once per completed phase, so
/// retries of an incomplete phase reuse the same number and participants
/// can deduplicate.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryableSession {
    /// The logical session id.
    pub session_id: Uuid,
    /// The current transaction number within the session.
    pub txn_number: u64,
}

impl RetryableSession {
    /// Creates a fresh session.
    pub fn new() -> Self {
        RetryableSession {
            session_id: Uuid::new_v4(),
            txn_number: 0,
        }
    }
}

impl Default for RetryableSession {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RetryableSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.session_id, self.txn_number)
    }
}

/// A durable, versioned coordinator state record.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CoordinatorDocument<P, A> {
    id: Uuid,
    kind: String,
    phase: P,
    args: A,
    session: RetryableSession,
}

impl<P, A> CoordinatorDocument<P, A>
where
    P: Copy + Ord + fmt::Debug,
{
    /// Creates a document in the initial phase.
    pub fn new(kind: &str, initial_phase: P, args: A) -> Self {
        CoordinatorDocument {
            id: Uuid::new_v4(),
            kind: kind.to_string(),
            phase: initial_phase,
            args,
            session: RetryableSession::new(),
        }
    }

    /// The coordinator id.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// The coordinator type name.
    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// The last completed phase.
    pub fn phase(&self) -> P {
        self.phase
    }

    /// The coordinator's arguments.
    pub fn args(&self) -> &A {
        &self.args
    }

    /// The retryable session for the phase currently executing.
    pub fn session(&self) -> &RetryableSession {
        &self.session
    }

    /// Records completion of `phase`. Phases only move forward; the
    /// session's transaction number advances with the phase so the next
    /// phase's participant requests are distinguishable.
    pub fn complete_phase(&mut self, phase: P) -> Result<(), ShardError> {
        if phase <= self.phase {
            return Err(ShardError::IllegalOperation(format!(
                "coordinator {} phase may not move backwards ({:?} -> {:?})",
                self.id, self.phase, phase
            )));
        }
        self.phase = phase;
        self.session.txn_number += 1;
        Ok(())
    }
}

/// Persistence for coordinator documents.
#[derive(Clone)]
pub struct CoordinatorStore {
    store: Arc<dyn DocumentStore>,
}

impl CoordinatorStore {
    /// Wraps a document store.
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        CoordinatorStore { store }
    }

    fn key(id: &Uuid) -> Vec<u8> {
        format!("{}{}", COORDINATOR_PREFIX, id).into_bytes()
    }

    /// Persists the document.
    pub fn persist<P, A>(&self, doc: &CoordinatorDocument<P, A>) -> Result<(), ShardError>
    where
        P: Serialize,
        A: Serialize,
    {
        self.store.put(Self::key(&doc.id), encode_doc(doc)?)
    }

    /// Loads a document by id.
    pub fn load<P, A>(&self, id: &Uuid) -> Result<Option<CoordinatorDocument<P, A>>, ShardError>
    where
        P: DeserializeOwned,
        A: DeserializeOwned,
    {
        match self.store.get(&Self::key(id))? {
            Some(bytes) => Ok(Some(decode_doc(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Removes a completed coordinator's document. Idempotent.
    pub fn remove(&self, id: &Uuid) -> Result<(), ShardError> {
        self.store.delete(&Self::key(id))
    }

    /// Returns true while the coordinator's document exists.
    pub fn contains(&self, id: &Uuid) -> Result<bool, ShardError> {
        Ok(self.store.get(&Self::key(id))?.is_some())
    }

    /// Lists the ids of all persisted coordinators, for resume on startup.
    pub fn list_ids(&self) -> Result<Vec<Uuid>, ShardError> {
        let mut ids = Vec::new();
        for (key, _) in self.store.scan_prefix(COORDINATOR_PREFIX.as_bytes())? {
            let suffix = &key[COORDINATOR_PREFIX.len()..];
            let text = std::str::from_utf8(suffix)
                .map_err(|e| ShardError::Store(format!("bad coordinator key: {}", e)))?;
            let id = Uuid::parse_str(text)
                .map_err(|e| ShardError::Store(format!("bad coordinator id: {}", e)))?;
            ids.push(id);
        }
        Ok(ids)
    }
}
