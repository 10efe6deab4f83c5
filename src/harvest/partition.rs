//! Work distribution
//!
//! The index is split into contiguous chunks, one per worker. Both the
//! thread and process models use the same split, so a partition number
//! always names the same identifiers for a given index and worker count.

use std::ops::Range;

/// A contiguous slice of the checkpoint index assigned to one worker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkPartition {
    /// 0-based worker id
    pub worker_id: usize,

    /// Positions in the index
    pub range: Range<usize>,
}

impl WorkPartition {
    pub fn len(&self) -> usize {
        self.range.len()
    }

    pub fn is_empty(&self) -> bool {
        self.range.is_empty()
    }

    /// The identifiers of this partition
    pub fn slice<'a, T>(&self, items: &'a [T]) -> &'a [T] {
        &items[self.range.clone()]
    }
}

/// Split `len` items among `worker_count` workers
///
/// Each of the first `k - 1` partitions gets `len / k` items and the last
/// one absorbs the remainder. A worker count of zero is treated as one.
pub fn partition(len: usize, worker_count: usize) -> Vec<WorkPartition> {
    let k = worker_count.max(1);
    let chunk = len / k;

    (0..k)
        .map(|worker_id| {
            let start = worker_id * chunk;
            let end = if worker_id + 1 == k { len } else { start + chunk };
            WorkPartition {
                worker_id,
                range: start..end,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reassemble(items: &[u32], parts: &[WorkPartition]) -> Vec<u32> {
        parts.iter().flat_map(|p| p.slice(items).iter().copied()).collect()
    }

    #[test]
    fn test_even_split() {
        let parts = partition(2500, 4);
        let sizes: Vec<_> = parts.iter().map(WorkPartition::len).collect();
        assert_eq!(sizes, vec![625, 625, 625, 625]);
    }

    #[test]
    fn test_last_absorbs_remainder() {
        let parts = partition(10, 3);
        let sizes: Vec<_> = parts.iter().map(WorkPartition::len).collect();
        assert_eq!(sizes, vec![3, 3, 4]);
    }

    #[test]
    fn test_round_trip_every_worker_count() {
        let items: Vec<u32> = (0..37).collect();
        for k in 1..=items.len() {
            let parts = partition(items.len(), k);
            assert_eq!(parts.len(), k);
            assert_eq!(reassemble(&items, &parts), items, "k = {}", k);
            for pair in parts.windows(2) {
                assert_eq!(pair[0].range.end, pair[1].range.start);
            }
        }
    }

    #[test]
    fn test_empty_and_singleton() {
        let parts = partition(0, 4);
        assert_eq!(parts.len(), 4);
        assert!(parts.iter().all(WorkPartition::is_empty));

        let parts = partition(1, 3);
        assert_eq!(reassemble(&[7], &parts), vec![7]);
        assert_eq!(parts[2].range, 0..1);
    }

    #[test]
    fn test_zero_workers_is_one() {
        let parts = partition(5, 0);
        assert_eq!(parts, vec![WorkPartition { worker_id: 0, range: 0..5 }]);
    }
}
