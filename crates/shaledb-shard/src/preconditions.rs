//! Chunk-ownership precondition checks.
//!
//! Read-only validators asserting that this shard's cached metadata
//! matches what a mutating operation expects before it is allowed to
//! proceed. Callers must hold at least a shared collection guard for the
//! duration of the check; these functions issue no I/O.
//!
//! The true client-received version is not tracked at this layer, so
//! staleness errors carry the [`ShardVersion::ignored`] sentinel as the
//! received version rather than a guessed value.

use shaledb_routing::{
    ChunkRange, CollectionGeneration, CollectionMetadata, NamespaceIdentity, ShardVersion,
};

use crate::error::ShardError;

fn stale(ns: &NamespaceIdentity, metadata: Option<&CollectionMetadata>) -> ShardError {
    ShardError::StaleShardVersion {
        ns: ns.clone(),
        received: ShardVersion::ignored(),
        wanted: metadata.map(|m| m.shard_version()),
        crit_sec: None,
    }
}

/// Asserts that metadata is cached for the collection, that it belongs to
/// the expected generation, and that this shard owns at least one chunk.
pub fn check_collection_identity(
    ns: &NamespaceIdentity,
    metadata: Option<&CollectionMetadata>,
    expected: &CollectionGeneration,
) -> Result<(), ShardError> {
    let Some(metadata) = metadata else {
        return Err(stale(ns, None));
    };
    if !metadata.generation().matches(expected) {
        return Err(stale(ns, Some(metadata)));
    }
    if metadata.shard_placement().major == 0 {
        return Err(stale(ns, Some(metadata)));
    }
    Ok(())
}

/// Asserts that the range's bounds are valid keys under the collection's
/// shard key pattern.
pub fn check_shard_key_pattern(
    ns: &NamespaceIdentity,
    metadata: &CollectionMetadata,
    range: &ChunkRange,
) -> Result<(), ShardError> {
    let pattern = metadata.key_pattern();
    if !pattern.is_valid_key(range.min()) || !pattern.is_valid_key(range.max()) {
        return Err(stale(ns, Some(metadata)));
    }
    Ok(())
}

/// Asserts that this shard owns a chunk whose bounds exactly equal the
/// given range.
pub fn check_chunk_matches_range(
    ns: &NamespaceIdentity,
    metadata: &CollectionMetadata,
    range: &ChunkRange,
) -> Result<(), ShardError> {
    if !metadata.owns_exact_range(range) {
        return Err(stale(ns, Some(metadata)));
    }
    Ok(())
}

/// Asserts that the given range is fully covered by a single owned chunk.
pub fn check_range_within_chunk(
    ns: &NamespaceIdentity,
    metadata: &CollectionMetadata,
    range: &ChunkRange,
) -> Result<(), ShardError> {
    if !metadata.range_within_owned_chunk(range) {
        return Err(stale(ns, Some(metadata)));
    }
    Ok(())
}

/// Asserts that the given range is exactly and contiguously covered by a
/// run of owned chunks.
///
/// The walk starts at `range.min`, which must be the min key of an owned
/// chunk; each successive chunk must begin exactly where the previous one
/// ended; the final chunk's max must equal `range.max`. Mere coverage
/// with misaligned boundaries fails: split/merge style operations require
/// exact chunk-boundary alignment.
pub fn check_range_ownership(
    ns: &NamespaceIdentity,
    metadata: &CollectionMetadata,
    range: &ChunkRange,
) -> Result<(), ShardError> {
    let mut cursor = range.min().clone();
    loop {
        let Some(chunk) = metadata.chunk_with_min(&cursor) else {
            return Err(stale(ns, Some(metadata)));
        };
        if chunk.range.max() == range.max() {
            return Ok(());
        }
        if chunk.range.max() > range.max() {
            return Err(stale(ns, Some(metadata)));
        }
        cursor = chunk.range.max().clone();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shaledb_routing::{Chunk, ClusterTime, KeyPattern, PlacementVersion, RouteKey};

    fn ns() -> NamespaceIdentity {
        NamespaceIdentity::new(None, "db", "coll").unwrap()
    }

    fn chunk(min: i64, max: i64) -> Chunk {
        Chunk::new(
            ChunkRange::new(RouteKey::number(min), RouteKey::number(max)).unwrap(),
            PlacementVersion::new(1, 0),
        )
    }

    fn range(min: i64, max: i64) -> ChunkRange {
        ChunkRange::new(RouteKey::number(min), RouteKey::number(max)).unwrap()
    }

    fn metadata_with(owned: Vec<Chunk>) -> CollectionMetadata {
        CollectionMetadata::new(
            KeyPattern::single("user").unwrap(),
            CollectionGeneration::new(ClusterTime::new(4, 2)),
            PlacementVersion::new(8, 0),
            owned,
        )
        .unwrap()
    }

    fn assert_stale_with_ignored(result: Result<(), ShardError>) {
        match result {
            Err(ShardError::StaleShardVersion { received, .. }) => {
                assert!(received.is_ignored());
            }
            other => panic!("expected staleness, got {:?}", other.err()),
        }
    }

    #[test]
    fn test_collection_identity() {
        let md = metadata_with(vec![chunk(0, 10)]);
        let expected = *md.generation();

        check_collection_identity(&ns(), Some(&md), &expected).unwrap();

        // Unknown metadata.
        assert_stale_with_ignored(check_collection_identity(&ns(), None, &expected));

        // Wrong generation.
        let other = CollectionGeneration::new(ClusterTime::new(4, 2));
        assert_stale_with_ignored(check_collection_identity(&ns(), Some(&md), &other));

        // No owned chunks: major version is zero.
        let empty = metadata_with(vec![]);
        assert_stale_with_ignored(check_collection_identity(
            &ns(),
            Some(&empty),
            empty.generation(),
        ));
    }

    #[test]
    fn test_shard_key_pattern() {
        let md = metadata_with(vec![chunk(0, 10)]);
        check_shard_key_pattern(&ns(), &md, &range(0, 10)).unwrap();

        let compound = ChunkRange::new(
            RouteKey::new(vec![
                shaledb_routing::KeyValue::Number(0),
                shaledb_routing::KeyValue::Number(0),
            ]),
            RouteKey::new(vec![
                shaledb_routing::KeyValue::Number(1),
                shaledb_routing::KeyValue::Number(1),
            ]),
        )
        .unwrap();
        assert_stale_with_ignored(check_shard_key_pattern(&ns(), &md, &compound));
    }

    #[test]
    fn test_chunk_matches_range_requires_exact_bounds() {
        let md = metadata_with(vec![chunk(0, 10), chunk(10, 20)]);

        check_chunk_matches_range(&ns(), &md, &range(10, 20)).unwrap();

        assert_stale_with_ignored(check_chunk_matches_range(&ns(), &md, &range(10, 15)));
        assert_stale_with_ignored(check_chunk_matches_range(&ns(), &md, &range(0, 20)));
        assert_stale_with_ignored(check_chunk_matches_range(&ns(), &md, &range(30, 40)));
    }

    #[test]
    fn test_range_within_chunk() {
        let md = metadata_with(vec![chunk(0, 10), chunk(10, 20)]);

        check_range_within_chunk(&ns(), &md, &range(2, 8)).unwrap();
        check_range_within_chunk(&ns(), &md, &range(0, 10)).unwrap();

        // Spans two adjacent owned chunks.
        assert_stale_with_ignored(check_range_within_chunk(&ns(), &md, &range(5, 15)));
        // Entirely outside owned space.
        assert_stale_with_ignored(check_range_within_chunk(&ns(), &md, &range(50, 60)));
    }

    #[test]
    fn test_range_ownership_contiguous_run() {
        let md = metadata_with(vec![chunk(0, 10), chunk(10, 20), chunk(20, 30)]);

        check_range_ownership(&ns(), &md, &range(0, 30)).unwrap();
        check_range_ownership(&ns(), &md, &range(10, 20)).unwrap();
        check_range_ownership(&ns(), &md, &range(10, 30)).unwrap();
    }

    #[test]
    fn test_range_ownership_requires_boundary_alignment() {
        let md = metadata_with(vec![chunk(0, 10), chunk(10, 20), chunk(20, 30)]);

        // Covered by owned chunks, but neither bound is a chunk boundary:
        // split/merge operations require exact alignment, so this fails.
        assert_stale_with_ignored(check_range_ownership(&ns(), &md, &range(5, 25)));
        assert_stale_with_ignored(check_range_ownership(&ns(), &md, &range(0, 25)));
        assert_stale_with_ignored(check_range_ownership(&ns(), &md, &range(5, 30)));
    }

    #[test]
    fn test_range_ownership_detects_gap() {
        let md = metadata_with(vec![chunk(0, 10), chunk(20, 30)]);
        assert_stale_with_ignored(check_range_ownership(&ns(), &md, &range(0, 30)));
    }

    #[test]
    fn test_range_ownership_single_missing_chunk_fails() {
        let md = metadata_with(vec![chunk(0, 10), chunk(10, 20), chunk(20, 30)]);
        // The run would need a fourth chunk starting at 30.
        assert_stale_with_ignored(check_range_ownership(&ns(), &md, &range(0, 40)));
    }
}
