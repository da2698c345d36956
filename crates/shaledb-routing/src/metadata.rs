//! Per-shard cached view of a sharded collection's routing metadata.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::chunk::{Chunk, ChunkRange};
use crate::error::RoutingError;
use crate::key::{KeyPattern, RouteKey};
use crate::version::{CollectionGeneration, PlacementVersion, ShardVersion};

/// Immutable snapshot of the chunks this shard owns for one collection.
///
/// Snapshots are replaced wholesale on every successful refresh from the
/// authoritative config; they are never mutated in place. Many snapshots
/// may exist over time for one namespace; only the latest installed in the
/// collection sharding runtime is authoritative.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CollectionMetadata {
    key_pattern: KeyPattern,
    generation: CollectionGeneration,
    shard_placement: PlacementVersion,
    collection_placement: PlacementVersion,
    /// Owned chunks keyed by their range's min key.
    chunks: BTreeMap<RouteKey, Chunk>,
}

impl CollectionMetadata {
    /// Builds a snapshot from the chunks this shard owns.
    ///
    /// Chunks must carry keys valid under `key_pattern` and must not
    /// overlap. The shard placement version is the maximum chunk version,
    /// or zero when the shard owns no chunks.
    pub fn new(
        key_pattern: KeyPattern,
        generation: CollectionGeneration,
        collection_placement: PlacementVersion,
        owned: Vec<Chunk>,
    ) -> Result<Self, RoutingError> {
        let mut chunks: BTreeMap<RouteKey, Chunk> = BTreeMap::new();
        let mut shard_placement = PlacementVersion::ZERO;
        for chunk in owned {
            if !key_pattern.is_valid_key(chunk.range.min())
                || !key_pattern.is_valid_key(chunk.range.max())
            {
                return Err(RoutingError::InvalidKey(format!(
                    "chunk {} does not match key pattern {}",
                    chunk.range, key_pattern
                )));
            }
            shard_placement = shard_placement.max(chunk.version);
            if let Some(prev) = chunks.insert(chunk.range.min().clone(), chunk) {
                return Err(RoutingError::InvalidChunkRange(format!(
                    "duplicate chunk min {}",
                    prev.range.min()
                )));
            }
        }
        let mut iter = chunks.values();
        if let Some(first) = iter.next() {
            let mut prev = first;
            for chunk in iter {
                if chunk.range.overlaps(&prev.range) {
                    return Err(RoutingError::InvalidChunkRange(format!(
                        "owned chunks {} and {} overlap",
                        prev.range, chunk.range
                    )));
                }
                prev = chunk;
            }
        }
        Ok(CollectionMetadata {
            key_pattern,
            generation,
            shard_placement,
            collection_placement,
            chunks,
        })
    }

    /// Returns the collection's shard key pattern.
    pub fn key_pattern(&self) -> &KeyPattern {
        &self.key_pattern
    }

    /// Returns the collection generation this snapshot belongs to.
    pub fn generation(&self) -> &CollectionGeneration {
        &self.generation
    }

    /// Returns this shard's placement version for the collection.
    pub fn shard_placement(&self) -> PlacementVersion {
        self.shard_placement
    }

    /// Returns the collection-wide placement version.
    pub fn collection_placement(&self) -> PlacementVersion {
        self.collection_placement
    }

    /// Returns the shard version (generation + shard placement).
    pub fn shard_version(&self) -> ShardVersion {
        ShardVersion::new(self.generation, self.shard_placement)
    }

    /// Returns true if this shard owns at least one chunk.
    pub fn owns_chunks(&self) -> bool {
        !self.chunks.is_empty()
    }

    /// Number of chunks this shard owns.
    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    /// Returns the owned chunks ordered by min key.
    pub fn chunks(&self) -> impl Iterator<Item = &Chunk> {
        self.chunks.values()
    }

    /// Returns the owned chunk containing `key`, if any.
    pub fn chunk_containing(&self, key: &RouteKey) -> Option<&Chunk> {
        self.chunks
            .range(..=key.clone())
            .next_back()
            .map(|(_, chunk)| chunk)
            .filter(|chunk| chunk.range.contains(key))
    }

    /// Returns the owned chunk whose min key equals `min` exactly.
    pub fn chunk_with_min(&self, min: &RouteKey) -> Option<&Chunk> {
        self.chunks.get(min)
    }

    /// Returns true if this shard owns a chunk whose bounds exactly equal
    /// `range`.
    pub fn owns_exact_range(&self, range: &ChunkRange) -> bool {
        self.chunk_with_min(range.min())
            .map(|chunk| chunk.range.max() == range.max())
            .unwrap_or(false)
    }

    /// Returns true if `range` is fully covered by a single owned chunk.
    pub fn range_within_owned_chunk(&self, range: &ChunkRange) -> bool {
        self.chunk_containing(range.min())
            .map(|chunk| range.max() <= chunk.range.max())
            .unwrap_or(false)
    }
}
