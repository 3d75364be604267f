use serde::{Deserialize, Serialize};

/// A contiguous range of shards, inclusive on both ends.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "camelCase")]
pub struct ShardRange {
    pub start: u64,
    pub end: u64,
}

impl ShardRange {
    pub fn new(start: u64, end: u64) -> ShardRange {
        ShardRange { start, end }
    }

    pub fn contains(&self, shard: u64) -> bool {
        self.start <= shard && shard <= self.end
    }
}

/// Split `[0, total_shards)` into `variation_count` contiguous ranges, in order.
///
/// Every range but the last is `total_shards / variation_count` wide; the last one absorbs the
/// remainder.
///
/// Returns an empty vector when `variation_count` is zero or there are fewer shards than
/// variations (some range would be empty).
pub fn partition_shard_ranges(variation_count: usize, total_shards: u64) -> Vec<ShardRange> {
    let count = variation_count as u64;
    if count == 0 || total_shards < count {
        return Vec::new();
    }

    let base = total_shards / count;
    (0..count)
        .map(|index| {
            let start = index * base;
            let width = if index == count - 1 {
                total_shards - start
            } else {
                base
            };
            ShardRange::new(start, start + width - 1)
        })
        .collect()
}

/// Check that `ranges` (in any order) partition `[0, total_shards)` exactly.
pub fn validate_shard_ranges<'a>(
    ranges: impl IntoIterator<Item = &'a ShardRange>,
    total_shards: u64,
) -> bool {
    let mut ranges: Vec<&ShardRange> = ranges.into_iter().collect();
    ranges.sort_by_key(|range| range.start);

    let mut next = 0;
    for range in ranges {
        if range.start != next || range.end < range.start {
            return false;
        }
        next = match range.end.checked_add(1) {
            Some(next) => next,
            None => return false,
        };
    }
    next == total_shards && total_shards > 0
}
