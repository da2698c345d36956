//! Embedded document store for sharding bookkeeping.
//!
//! Coordinator state documents, range-deletion tasks and retryable-session
//! markers are persisted through this trait. The in-memory implementation
//! backs tests; production wires the storage engine's record store behind
//! the same interface.

use std::collections::BTreeMap;
use std::sync::RwLock;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::ShardError;

/// Key type for the document store.
pub type Key = Vec<u8>;
/// Value type for the document store.
pub type Value = Vec<u8>;

/// A single operation in an atomic write batch.
pub enum BatchOp {
    /// Insert or overwrite a document.
    Put {
        /// The key to write.
        key: Key,
        /// The encoded document.
        value: Value,
    },
    /// Delete a document.
    Delete {
        /// The key to delete.
        key: Key,
    },
}

/// Durable keyed document storage with prefix scans and atomic batches.
pub trait DocumentStore: Send + Sync {
    /// Gets a document by key. Returns None if the key doesn't exist.
    fn get(&self, key: &[u8]) -> Result<Option<Value>, ShardError>;

    /// Puts a document, overwriting any existing value.
    fn put(&self, key: Key, value: Value) -> Result<(), ShardError>;

    /// Deletes a document. Ok even if the key didn't exist.
    fn delete(&self, key: &[u8]) -> Result<(), ShardError>;

    /// Scans all documents whose key starts with `prefix`, in key order.
    fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Key, Value)>, ShardError>;

    /// Atomically applies a batch of puts and deletes.
    fn write_batch(&self, ops: Vec<BatchOp>) -> Result<(), ShardError>;
}

/// Encodes a document value with bincode.
pub fn encode_doc<T: Serialize>(value: &T) -> Result<Vec<u8>, ShardError> {
    bincode::serialize(value).map_err(|e| ShardError::Store(e.to_string()))
}

/// Decodes a document value with bincode.
pub fn decode_doc<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, ShardError> {
    bincode::deserialize(bytes).map_err(|e| ShardError::Store(e.to_string()))
}

/// In-memory document store backed by a BTreeMap. Thread-safe via RwLock.
///
/// Does not persist across restarts; tests that exercise crash recovery
/// share one instance across "restarted" components instead.
pub struct MemoryDocumentStore {
    data: RwLock<BTreeMap<Key, Value>>,
}

impl MemoryDocumentStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self {
            data: RwLock::new(BTreeMap::new()),
        }
    }
}

impl Default for MemoryDocumentStore {
    fn default() -> Self {
        Self::new()
    }
}

impl DocumentStore for MemoryDocumentStore {
    fn get(&self, key: &[u8]) -> Result<Option<Value>, ShardError> {
        let data = self
            .data
            .read()
            .map_err(|e| ShardError::Store(e.to_string()))?;
        Ok(data.get(key).cloned())
    }

    fn put(&self, key: Key, value: Value) -> Result<(), ShardError> {
        let mut data = self
            .data
            .write()
            .map_err(|e| ShardError::Store(e.to_string()))?;
        data.insert(key, value);
        Ok(())
    }

    fn delete(&self, key: &[u8]) -> Result<(), ShardError> {
        let mut data = self
            .data
            .write()
            .map_err(|e| ShardError::Store(e.to_string()))?;
        data.remove(key);
        Ok(())
    }

    fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Key, Value)>, ShardError> {
        let data = self
            .data
            .read()
            .map_err(|e| ShardError::Store(e.to_string()))?;
        let mut result = Vec::new();
        for (k, v) in data.range(prefix.to_vec()..) {
            if !k.starts_with(prefix) {
                break;
            }
            result.push((k.clone(), v.clone()));
        }
        Ok(result)
    }

    fn write_batch(&self, ops: Vec<BatchOp>) -> Result<(), ShardError> {
        let mut data = self
            .data
            .write()
            .map_err(|e| ShardError::Store(e.to_string()))?;
        for op in ops {
            match op {
                BatchOp::Put { key, value } => {
                    data.insert(key, value);
                }
                BatchOp::Delete { key } => {
                    data.remove(&key);
                }
            }
        }
        Ok(())
    }
}
