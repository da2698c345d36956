//! Placement and database versions.
//!
//! Versions are only ordered within a single collection generation. Two
//! versions from different generations (different epoch or timestamp) are
//! incomparable: the collection was dropped, recreated or resharded in
//! between, and the caller must take the full-refresh path instead of
//! comparing counters. Comparison is therefore exposed as
//! [`VersionRelation`], never as `Ord`.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A point in the cluster's causal history: seconds plus an increment
/// disambiguating events within the same second.
#[derive(
    Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct ClusterTime {
    /// Seconds component.
    pub secs: u32,
    /// Increment within the second.
    pub increment: u32,
}

impl ClusterTime {
    /// The zero cluster time.
    pub const ZERO: ClusterTime = ClusterTime {
        secs: 0,
        increment: 0,
    };

    /// Creates a cluster time from its components.
    pub fn new(secs: u32, increment: u32) -> Self {
        ClusterTime { secs, increment }
    }

    /// Returns the next cluster time within the same second.
    pub fn ticked(self) -> Self {
        ClusterTime {
            secs: self.secs,
            increment: self.increment + 1,
        }
    }
}

impl fmt::Display for ClusterTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.secs, self.increment)
    }
}

/// Generation identifier for a collection: changes whenever the collection
/// is dropped, recreated or resharded.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CollectionGeneration {
    /// Globally unique epoch id.
    pub epoch: Uuid,
    /// Cluster time at which this generation was created.
    pub timestamp: ClusterTime,
}

impl CollectionGeneration {
    /// Creates a fresh generation with a random epoch.
    pub fn new(timestamp: ClusterTime) -> Self {
        CollectionGeneration {
            epoch: Uuid::new_v4(),
            timestamp,
        }
    }

    /// Returns true if both the epoch and the timestamp match.
    pub fn matches(&self, other: &CollectionGeneration) -> bool {
        self == other
    }
}

impl fmt::Display for CollectionGeneration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.epoch, self.timestamp)
    }
}

/// Major/minor placement counters within one generation. Major advances on
/// chunk ownership changes, minor on splits/merges that do not move data.
#[derive(
    Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct PlacementVersion {
    /// Major counter: advanced when chunk ownership moves between shards.
    pub major: u32,
    /// Minor counter: advanced on same-shard boundary changes.
    pub minor: u32,
}

impl PlacementVersion {
    /// The zero placement version: the shard owns no chunks.
    pub const ZERO: PlacementVersion = PlacementVersion { major: 0, minor: 0 };

    /// Creates a placement version from its counters.
    pub fn new(major: u32, minor: u32) -> Self {
        PlacementVersion { major, minor }
    }

    /// Returns the version with the major counter advanced and minor reset.
    pub fn next_major(self) -> Self {
        PlacementVersion {
            major: self.major + 1,
            minor: 0,
        }
    }

    /// Returns the version with the minor counter advanced.
    pub fn next_minor(self) -> Self {
        PlacementVersion {
            major: self.major,
            minor: self.minor + 1,
        }
    }
}

impl fmt::Display for PlacementVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}|{}", self.major, self.minor)
    }
}

/// Result of comparing two versions.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum VersionRelation {
    /// Same generation, strictly older.
    Older,
    /// Same generation, equal counters.
    Equal,
    /// Same generation, strictly newer.
    Newer,
    /// Different generations (or an ignored sentinel): no numeric order
    /// exists and the caller must refresh.
    Incomparable,
}

/// A shard's placement version for one collection generation.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ShardVersion {
    /// The collection generation this version belongs to.
    pub generation: CollectionGeneration,
    /// The placement counters within that generation.
    pub placement: PlacementVersion,
}

impl ShardVersion {
    /// Creates a shard version from its parts.
    pub fn new(generation: CollectionGeneration, placement: PlacementVersion) -> Self {
        ShardVersion {
            generation,
            placement,
        }
    }

    /// The sentinel meaning "the true received version is not tracked at
    /// this layer". Incomparable to every version, including itself.
    pub fn ignored() -> Self {
        ShardVersion {
            generation: CollectionGeneration {
                epoch: Uuid::nil(),
                timestamp: ClusterTime::ZERO,
            },
            placement: PlacementVersion::ZERO,
        }
    }

    /// Returns true for the [`ShardVersion::ignored`] sentinel.
    pub fn is_ignored(&self) -> bool {
        self.generation.epoch.is_nil() && self.generation.timestamp == ClusterTime::ZERO
    }

    /// Compares against another version. Versions from different
    /// generations, and the ignored sentinel, are incomparable.
    pub fn compare_to(&self, other: &ShardVersion) -> VersionRelation {
        if self.is_ignored() || other.is_ignored() {
            return VersionRelation::Incomparable;
        }
        if !self.generation.matches(&other.generation) {
            return VersionRelation::Incomparable;
        }
        match self.placement.cmp(&other.placement) {
            std::cmp::Ordering::Less => VersionRelation::Older,
            std::cmp::Ordering::Equal => VersionRelation::Equal,
            std::cmp::Ordering::Greater => VersionRelation::Newer,
        }
    }
}

impl fmt::Display for ShardVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_ignored() {
            f.write_str("<ignored>")
        } else {
            write!(f, "{}/{}", self.generation, self.placement)
        }
    }
}

/// Version of a database's placement: which shard is primary, and how many
/// times that assignment has changed within the current generation.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DatabaseVersion {
    /// Generation id: changes when the database is dropped and recreated.
    pub uuid: Uuid,
    /// Cluster time at which this generation was created.
    pub timestamp: ClusterTime,
    /// Counter advanced on every primary-shard change within the generation.
    pub last_modified: u32,
}

impl DatabaseVersion {
    /// Creates a fresh database version with a random generation id.
    pub fn new(timestamp: ClusterTime) -> Self {
        DatabaseVersion {
            uuid: Uuid::new_v4(),
            timestamp,
            last_modified: 1,
        }
    }

    /// Returns the version advanced by one modification.
    pub fn bumped(self) -> Self {
        DatabaseVersion {
            last_modified: self.last_modified + 1,
            ..self
        }
    }

    /// Compares against another version. Versions from different database
    /// generations are incomparable.
    pub fn compare_to(&self, other: &DatabaseVersion) -> VersionRelation {
        if self.uuid != other.uuid || self.timestamp != other.timestamp {
            return VersionRelation::Incomparable;
        }
        match self.last_modified.cmp(&other.last_modified) {
            std::cmp::Ordering::Less => VersionRelation::Older,
            std::cmp::Ordering::Equal => VersionRelation::Equal,
            std::cmp::Ordering::Greater => VersionRelation::Newer,
        }
    }
}

impl fmt::Display for DatabaseVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}#{}", self.uuid, self.timestamp, self.last_modified)
    }
}
