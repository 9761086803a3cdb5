//! Target partitioning
//!
//! Splits a target list into contiguous shards, one per worker unit. The
//! base shard size is `max(1, N / W)`. When that size would produce more
//! than `W` shards, the `N % W` leftover targets are spread one apiece over
//! the leading shards instead of being dropped or piled into a tail shard.

use std::ops::Range;

/// A contiguous, non-empty slice of the input assigned to one worker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetShard<T> {
    /// Position of this shard in input order
    pub index: usize,
    pub targets: Vec<T>,
}

impl<T> TargetShard<T> {
    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }
}

/// Compute the index ranges of each shard for `len` targets and `workers` workers.
///
/// `workers` below 1 is treated as 1.
pub fn shard_ranges(len: usize, workers: usize) -> Vec<Range<usize>> {
    if len == 0 {
        return Vec::new();
    }

    let workers = workers.max(1);
    let base = (len / workers).max(1);
    let natural_count = len.div_ceil(base);

    let (count, extra) = if natural_count > workers {
        (workers, len % workers)
    } else {
        (natural_count, 0)
    };

    let mut ranges = Vec::with_capacity(count);
    let mut start = 0;
    for index in 0..count {
        let size = base + usize::from(index < extra);
        let end = (start + size).min(len);
        ranges.push(start..end);
        start = end;
    }

    debug_assert_eq!(start, len);
    ranges
}

/// Split `targets` into shards in input order.
pub fn partition<T: Clone>(targets: &[T], workers: usize) -> Vec<TargetShard<T>> {
    shard_ranges(targets.len(), workers)
        .into_iter()
        .enumerate()
        .map(|(index, range)| TargetShard {
            index,
            targets: targets[range].to_vec(),
        })
        .collect()
}
