//! Chunks: contiguous ranges of shard-key space assigned to one shard.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::RoutingError;
use crate::key::RouteKey;
use crate::version::PlacementVersion;

/// Identifier of a shard in the cluster.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ShardId(String);

impl ShardId {
    /// Creates a shard id from its string form.
    pub fn new<S: Into<String>>(id: S) -> Self {
        ShardId(id.into())
    }

    /// Returns the string form of this shard id.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ShardId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A half-open range `[min, max)` of shard-key space.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChunkRange {
    min: RouteKey,
    max: RouteKey,
}

impl ChunkRange {
    /// Creates a range, rejecting empty or inverted bounds.
    pub fn new(min: RouteKey, max: RouteKey) -> Result<Self, RoutingError> {
        if min >= max {
            return Err(RoutingError::InvalidChunkRange(format!(
                "min {} is not below max {}",
                min, max
            )));
        }
        Ok(ChunkRange { min, max })
    }

    /// Returns the inclusive lower bound.
    pub fn min(&self) -> &RouteKey {
        &self.min
    }

    /// Returns the exclusive upper bound.
    pub fn max(&self) -> &RouteKey {
        &self.max
    }

    /// Returns true if `key` falls within this range.
    pub fn contains(&self, key: &RouteKey) -> bool {
        &self.min <= key && key < &self.max
    }

    /// Returns true if the two ranges share any key.
    pub fn overlaps(&self, other: &ChunkRange) -> bool {
        self.min < other.max && other.min < self.max
    }

    /// Returns true if this range fully covers `other`.
    pub fn covers(&self, other: &ChunkRange) -> bool {
        self.min <= other.min && other.max <= self.max
    }
}

impl fmt::Display for ChunkRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.min, self.max)
    }
}

/// A chunk owned by this shard: its range and the placement version
/// recorded at the last committed mutation affecting it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    /// The key range this chunk spans.
    pub range: ChunkRange,
    /// Placement version at the chunk's last committed move/split/merge.
    pub version: PlacementVersion,
}

impl Chunk {
    /// Creates a chunk from a range and version.
    pub fn new(range: ChunkRange, version: PlacementVersion) -> Self {
        Chunk { range, version }
    }
}
