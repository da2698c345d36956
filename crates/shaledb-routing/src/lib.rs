#![warn(missing_docs)]

//! ShaleDB routing subsystem: versioned namespace identity, placement versions, chunk routing metadata

pub mod chunk;
pub mod error;
pub mod key;
pub mod metadata;
pub mod namespace;
pub mod version;

pub use chunk::{Chunk, ChunkRange, ShardId};
pub use error::RoutingError;
pub use key::{KeyPattern, KeyValue, RouteKey};
pub use metadata::CollectionMetadata;
pub use namespace::{NamespaceIdentity, TenantId};
pub use version::{
    ClusterTime, CollectionGeneration, DatabaseVersion, PlacementVersion, ShardVersion,
    VersionRelation,
};
