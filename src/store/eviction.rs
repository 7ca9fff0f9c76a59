//! The sampled eviction pool (spec.md §4.D "Eviction pool"): a fixed-size,
//! idle-sorted candidate list refreshed by sampling, from which the evictor
//! picks the rightmost (most-idle) still-existing key.

use bytes::Bytes;

use crate::store::value::idle_ticks;

pub const POOL_SIZE: usize = 16;

#[derive(Debug, Clone)]
struct Candidate {
    key: Bytes,
    idle: u32,
}

/// Candidates are kept sorted ascending by idle estimate, so the rightmost
/// entry is the most idle. Keys are stored by value copy, tolerating
/// deletions between refills (spec.md §4.D).
#[derive(Debug, Default)]
pub struct EvictionPool {
    candidates: Vec<Candidate>,
}

impl EvictionPool {
    pub fn new() -> Self {
        Self { candidates: Vec::with_capacity(POOL_SIZE) }
    }

    /// Samples `sample_size` entries via `sample_fn` (key, idle-ticks) and
    /// inserts each whose idle exceeds the pool's current minimum,
    /// displacing the leftmost (smallest idle) candidate on overflow.
    pub fn populate<F>(&mut self, sample_size: usize, now_lru: u32, mut sample_fn: F)
    where
        F: FnMut(usize) -> Vec<(Bytes, u32)>,
    {
        for (key, lru) in sample_fn(sample_size) {
            let idle = idle_ticks(now_lru, lru);
            self.offer(key, idle);
        }
    }

    fn offer(&mut self, key: Bytes, idle: u32) {
        if let Some(pos) = self.candidates.iter().position(|c| c.key == key) {
            self.candidates.remove(pos);
        }
        if self.candidates.len() < POOL_SIZE {
            let pos = self.candidates.partition_point(|c| c.idle < idle);
            self.candidates.insert(pos, Candidate { key, idle });
            return;
        }
        if idle > self.candidates[0].idle {
            self.candidates.remove(0);
            let pos = self.candidates.partition_point(|c| c.idle < idle);
            self.candidates.insert(pos, Candidate { key, idle });
        }
    }

    /// Pops the rightmost (most idle) candidate whose key still exists,
    /// skipping ghosts (keys deleted since the last refill).
    pub fn pop_best_existing<F: Fn(&Bytes) -> bool>(&mut self, exists: F) -> Option<Bytes> {
        while let Some(candidate) = self.candidates.pop() {
            if exists(&candidate.key) {
                return Some(candidate.key);
            }
        }
        None
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_most_idle_on_overflow() {
        let mut pool = EvictionPool::new();
        for i in 0..(POOL_SIZE as u32 + 4) {
            pool.offer(Bytes::from(format!("k{i}")), i);
        }
        // The pool should have discarded the smallest-idle entries.
        let best = pool.pop_best_existing(|_| true).unwrap();
        assert_eq!(best, Bytes::from(format!("k{}", POOL_SIZE as u32 + 3)));
    }

    #[test]
    fn refill_recovers_when_every_key_is_a_ghost() {
        let mut pool = EvictionPool::new();
        pool.offer(Bytes::from_static(b"ghost"), 5);
        assert!(pool.pop_best_existing(|_| false).is_none());
        pool.offer(Bytes::from_static(b"real"), 9);
        assert_eq!(pool.pop_best_existing(|k| k == "real"), Some(Bytes::from_static(b"real")));
    }
}
