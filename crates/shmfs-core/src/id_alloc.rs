// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Range-based id allocator with reuse of released ids.

use std::collections::BTreeMap;

use tracing::warn;

/// Hands out the lowest free ids first and coalesces released ranges.
#[derive(Debug, Default, Clone)]
pub struct IdAllocator {
    /// Free runs keyed by start, value is the exclusive end.
    free: BTreeMap<u64, u64>,
}

impl IdAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `[min, max)` to the pool.
    pub fn register(&mut self, min: u64, max: u64) {
        if min < max {
            self.free_range(min, max - min);
        }
    }

    /// Allocate `count` consecutive ids, returning the first.
    pub fn alloc(&mut self, count: u64) -> Option<u64> {
        if count == 0 {
            return None;
        }
        let (&start, &end) = self.free.iter().find(|&(&start, &end)| end - start >= count)?;
        self.free.remove(&start);
        if start + count < end {
            self.free.insert(start + count, end);
        }
        Some(start)
    }

    pub fn free(&mut self, id: u64) {
        self.free_range(id, 1);
    }

    /// Return `[start, start + count)` to the pool. Runs that overlap ids
    /// already free are ignored.
    pub fn free_range(&mut self, start: u64, count: u64) {
        let Some(mut end) = start.checked_add(count) else {
            warn!(start, count, "id range overflows");
            return;
        };
        if count == 0 {
            return;
        }
        if self.overlaps(start, end) {
            warn!(start, count, "releasing ids that are already free");
            return;
        }
        let mut start = start;
        if let Some((&prev_start, &prev_end)) = self.free.range(..start).next_back() {
            if prev_end == start {
                self.free.remove(&prev_start);
                start = prev_start;
            }
        }
        if let Some(next_end) = self.free.remove(&end) {
            end = next_end;
        }
        self.free.insert(start, end);
    }

    /// Number of ids currently available.
    pub fn available(&self) -> u64 {
        self.free.iter().map(|(start, end)| end - start).sum()
    }

    pub fn is_free(&self, id: u64) -> bool {
        self.overlaps(id, id.saturating_add(1))
    }

    fn overlaps(&self, start: u64, end: u64) -> bool {
        if let Some((_, &prev_end)) = self.free.range(..=start).next_back() {
            if prev_end > start {
                return true;
            }
        }
        self.free.range(start..end).next().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn allocates_lowest_first() {
        let mut ids = IdAllocator::new();
        ids.register(1, 10);
        assert_eq!(ids.alloc(1), Some(1));
        assert_eq!(ids.alloc(1), Some(2));
        assert_eq!(ids.alloc(3), Some(3));
        assert_eq!(ids.available(), 4);
    }

    #[test]
    fn released_id_is_reused() {
        let mut ids = IdAllocator::new();
        ids.register(1, 100);
        let a = ids.alloc(1).unwrap();
        let b = ids.alloc(1).unwrap();
        ids.free(a);
        assert_eq!(ids.alloc(1), Some(a));
        assert_ne!(a, b);
    }

    #[test]
    fn exhaustion_returns_none() {
        let mut ids = IdAllocator::new();
        ids.register(1, 3);
        assert!(ids.alloc(1).is_some());
        assert!(ids.alloc(1).is_some());
        assert_eq!(ids.alloc(1), None);
        assert_eq!(ids.alloc(0), None);
    }

    #[test]
    fn adjacent_frees_coalesce() {
        let mut ids = IdAllocator::new();
        ids.register(1, 5);
        for _ in 0..4 {
            ids.alloc(1).unwrap();
        }
        ids.free(2);
        ids.free(4);
        ids.free(3);
        assert_eq!(ids.alloc(3), Some(2));
    }

    #[test]
    fn double_free_is_ignored() {
        let mut ids = IdAllocator::new();
        ids.register(1, 5);
        let id = ids.alloc(1).unwrap();
        ids.free(id);
        ids.free(id);
        assert_eq!(ids.available(), 4);
        assert!(ids.is_free(id));
    }

    proptest! {
        #[test]
        fn live_ids_stay_distinct(ops in proptest::collection::vec(any::<bool>(), 1..200)) {
            let mut ids = IdAllocator::new();
            ids.register(1, 64);
            let mut live: Vec<u64> = Vec::new();
            for alloc in ops {
                if alloc || live.is_empty() {
                    if let Some(id) = ids.alloc(1) {
                        prop_assert!(!live.contains(&id));
                        live.push(id);
                    }
                } else {
                    let id = live.swap_remove(live.len() / 2);
                    ids.free(id);
                }
            }
            prop_assert_eq!(ids.available() + live.len() as u64, 63);
        }
    }
}
