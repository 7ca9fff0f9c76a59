//! The incremental hash map described in spec.md §4.B / §3.
//!
//! Two backing tables (`t0`, `t1`). Normal operation uses `t0` only; once a
//! growth threshold is crossed, `t1` is allocated and every mutating
//! operation migrates one bucket from `t0` into `t1` until the migration
//! completes, at which point `t1` becomes `t0`. Modeled directly on
//! `examples/original_source/src/dict.h`'s `dict`/`dictht` pair, with the
//! open `dictType` callback-pointer struct replaced by trait bounds on `K`
//! (spec.md §9 "callback-pointer data types").

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use rand::Rng;

/// Initial bucket count for a freshly created table (`DICT_HT_INITIAL_SIZE`).
const INITIAL_SIZE: usize = 4;
/// Growth is allowed unconditionally once `used / size` reaches this ratio,
/// even while a persistence child process is alive.
const FORCE_RESIZE_RATIO: usize = 5;

#[derive(Debug, thiserror::Error, PartialEq, Eq, Clone, Copy)]
pub enum DictError {
    #[error("key already exists")]
    Duplicate,
    #[error("key not found")]
    NotFound,
}

struct Table<K, V> {
    buckets: Vec<Vec<(K, V)>>,
    size: usize,
    used: usize,
}

impl<K, V> Table<K, V> {
    fn new(size: usize) -> Self {
        let mut buckets = Vec::with_capacity(size);
        buckets.resize_with(size, Vec::new);
        Self {
            buckets,
            size,
            used: 0,
        }
    }

    fn empty() -> Self {
        Self {
            buckets: Vec::new(),
            size: 0,
            used: 0,
        }
    }
}

fn hash_of<K: Hash>(key: &K) -> u64 {
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    hasher.finish()
}

fn next_pow_of_two(mut n: usize) -> usize {
    if n < INITIAL_SIZE {
        return INITIAL_SIZE;
    }
    n -= 1;
    let mut p = 1;
    while p <= n {
        p <<= 1;
    }
    p
}

/// An incrementally-rehashed hash map. `K` must be cheaply cloneable, the
/// way the original keyspace stores keys as shared, reference-counted
/// strings; here ownership is explicit per spec.md §9's redesign note.
pub struct IncrementalHashMap<K, V> {
    t0: Table<K, V>,
    t1: Table<K, V>,
    rehash_idx: i64,
    iterators: usize,
    resize_enabled: bool,
    child_process_alive: bool,
}

impl<K: Hash + Eq + Clone, V> Default for IncrementalHashMap<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Hash + Eq + Clone, V> IncrementalHashMap<K, V> {
    pub fn new() -> Self {
        Self {
            t0: Table::new(INITIAL_SIZE),
            t1: Table::empty(),
            rehash_idx: -1,
            iterators: 0,
            resize_enabled: true,
            child_process_alive: false,
        }
    }

    pub fn is_rehashing(&self) -> bool {
        self.rehash_idx != -1
    }

    pub fn len(&self) -> usize {
        self.t0.used + self.t1.used
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total bucket slots across both tables (`dictSlots`).
    pub fn slots(&self) -> usize {
        self.t0.size + self.t1.size
    }

    pub fn set_resize_enabled(&mut self, enabled: bool) {
        self.resize_enabled = enabled;
    }

    /// Suspends rehashing while a persistence child process exists, to
    /// preserve copy-on-write pages (spec.md §4.B).
    pub fn set_child_process_alive(&mut self, alive: bool) {
        self.child_process_alive = alive;
    }

    fn bucket_index(size: usize, h: u64) -> usize {
        if size == 0 { 0 } else { (h as usize) & (size - 1) }
    }

    /// One step of incremental rehashing: migrates a single non-empty
    /// bucket from `t0` to `t1`.
    fn rehash_step(&mut self) {
        if !self.is_rehashing() || self.child_process_alive || self.iterators > 0 {
            return;
        }
        let mut idx = self.rehash_idx as usize;
        while idx < self.t0.size && self.t0.buckets[idx].is_empty() {
            idx += 1;
        }
        if idx >= self.t0.size {
            // Migration complete: t1 becomes t0.
            self.t0 = std::mem::replace(&mut self.t1, Table::empty());
            self.rehash_idx = -1;
            return;
        }
        let bucket = std::mem::take(&mut self.t0.buckets[idx]);
        for (k, v) in bucket {
            let h = hash_of(&k);
            let dest = Self::bucket_index(self.t1.size, h);
            self.t1.buckets[dest].push((k, v));
            self.t1.used += 1;
            self.t0.used -= 1;
        }
        self.rehash_idx = (idx + 1) as i64;
    }

    /// Runs up to `n` rehash steps (`rehash_n_steps`).
    pub fn rehash_n_steps(&mut self, n: usize) {
        for _ in 0..n {
            if !self.is_rehashing() {
                break;
            }
            self.rehash_step();
        }
    }

    /// Runs rehash steps for up to `budget_ms` milliseconds
    /// (`rehash_for_ms`), checking elapsed time every 100 buckets.
    pub fn rehash_for_ms(&mut self, budget_ms: u64) {
        if !self.is_rehashing() {
            return;
        }
        let start = std::time::Instant::now();
        let budget = std::time::Duration::from_millis(budget_ms);
        let mut steps = 0u64;
        loop {
            if !self.is_rehashing() {
                break;
            }
            self.rehash_step();
            steps += 1;
            if steps.is_multiple_of(100) && start.elapsed() >= budget {
                break;
            }
        }
    }

    fn maybe_start_rehash(&mut self) {
        if self.is_rehashing() || !self.resize_enabled {
            return;
        }
        let should_grow = self.t0.used >= self.t0.size
            && (!self.child_process_alive || self.t0.used / self.t0.size.max(1) >= FORCE_RESIZE_RATIO);
        if should_grow {
            let new_size = next_pow_of_two(self.t0.used * 2);
            self.t1 = Table::new(new_size);
            self.rehash_idx = 0;
        }
    }

    /// Explicit shrink/grow-to-fit, never automatic (spec.md §4.B sizing
    /// policy: shrink is a deliberate call, not triggered by mutation).
    pub fn resize(&mut self, desired: usize) {
        if self.is_rehashing() || !self.resize_enabled {
            return;
        }
        let new_size = next_pow_of_two(desired.max(self.t0.used));
        if new_size == self.t0.size {
            return;
        }
        self.t1 = Table::new(new_size);
        self.rehash_idx = 0;
    }

    pub fn expand(&mut self, min_size: usize) {
        self.resize(min_size);
    }

    fn find_in(table: &Table<K, V>, key: &K) -> Option<usize> {
        if table.size == 0 {
            return None;
        }
        let h = hash_of(key);
        let idx = Self::bucket_index(table.size, h);
        if table.buckets[idx].iter().any(|(k, _)| k == key) {
            Some(idx)
        } else {
            None
        }
    }

    pub fn find(&self, key: &K) -> Option<&V> {
        if let Some(idx) = Self::find_in(&self.t0, key) {
            return self.t0.buckets[idx].iter().find(|(k, _)| k == key).map(|(_, v)| v);
        }
        if self.is_rehashing()
            && let Some(idx) = Self::find_in(&self.t1, key)
        {
            return self.t1.buckets[idx].iter().find(|(k, _)| k == key).map(|(_, v)| v);
        }
        None
    }

    pub fn find_mut(&mut self, key: &K) -> Option<&mut V> {
        if self.is_rehashing() {
            self.rehash_step();
        }
        if let Some(idx) = Self::find_in(&self.t0, key) {
            return self.t0.buckets[idx].iter_mut().find(|(k, _)| k == key).map(|(_, v)| v);
        }
        if self.is_rehashing()
            && let Some(idx) = Self::find_in(&self.t1, key)
        {
            return self.t1.buckets[idx].iter_mut().find(|(k, _)| k == key).map(|(_, v)| v);
        }
        None
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.find(key).is_some()
    }

    /// Inserts a new key. Fails with `Duplicate` if the key already exists.
    pub fn insert(&mut self, key: K, value: V) -> Result<(), DictError> {
        if self.contains_key(&key) {
            return Err(DictError::Duplicate);
        }
        self.insert_or_replace(key, value);
        Ok(())
    }

    /// Inserts or overwrites, returning the previous value if any.
    pub fn insert_or_replace(&mut self, key: K, value: V) -> Option<V> {
        if self.is_rehashing() {
            self.rehash_step();
        }
        if let Some(idx) = Self::find_in(&self.t0, &key)
            && let Some(slot) = self.t0.buckets[idx].iter_mut().find(|(k, _)| *k == key) {
                return Some(std::mem::replace(&mut slot.1, value));
            }
        if self.is_rehashing()
            && let Some(idx) = Self::find_in(&self.t1, &key)
            && let Some(slot) = self.t1.buckets[idx].iter_mut().find(|(k, _)| *k == key)
        {
            return Some(std::mem::replace(&mut slot.1, value));
        }

        if self.is_rehashing() {
            let h = hash_of(&key);
            let idx = Self::bucket_index(self.t1.size, h);
            self.t1.buckets[idx].push((key, value));
            self.t1.used += 1;
        } else {
            self.maybe_start_rehash();
            let table = if self.is_rehashing() { &mut self.t1 } else { &mut self.t0 };
            let h = hash_of(&key);
            let idx = Self::bucket_index(table.size, h);
            table.buckets[idx].push((key, value));
            table.used += 1;
        }
        None
    }

    pub fn delete(&mut self, key: &K) -> Result<V, DictError> {
        self.delete_no_free(key).ok_or(DictError::NotFound)
    }

    /// Deletes and returns the value, or `None` if absent. Named after
    /// `dictDeleteNoFree`: in this redesign there is no separate
    /// free-vs-no-free distinction since Rust drops values on scope exit,
    /// but the name is kept to match call sites that explicitly want the
    /// removed value back.
    pub fn delete_no_free(&mut self, key: &K) -> Option<V> {
        if self.is_rehashing() {
            self.rehash_step();
        }
        if let Some(idx) = Self::find_in(&self.t0, key)
            && let Some(pos) = self.t0.buckets[idx].iter().position(|(k, _)| k == key)
        {
            self.t0.used -= 1;
            return Some(self.t0.buckets[idx].remove(pos).1);
        }
        if self.is_rehashing()
            && let Some(idx) = Self::find_in(&self.t1, key)
            && let Some(pos) = self.t1.buckets[idx].iter().position(|(k, _)| k == key)
        {
            self.t1.used -= 1;
            return Some(self.t1.buckets[idx].remove(pos).1);
        }
        None
    }

    /// Draws a uniformly random live entry, proportional to each table's
    /// residual mass while rehashing (`dictGetRandomKey`).
    pub fn get_random_entry(&self) -> Option<(&K, &V)> {
        if self.is_empty() {
            return None;
        }
        let mut rng = rand::thread_rng();
        let from_t1 = self.is_rehashing() && {
            let total = self.t0.used + self.t1.used;
            total > 0 && rng.gen_range(0..total) < self.t1.used
        };
        let table = if from_t1 { &self.t1 } else { &self.t0 };
        if table.used == 0 {
            return self.get_random_entry_from(&self.t0).or_else(|| self.get_random_entry_from(&self.t1));
        }
        self.get_random_entry_from(table)
    }

    fn get_random_entry_from<'a>(&self, table: &'a Table<K, V>) -> Option<(&'a K, &'a V)> {
        if table.size == 0 || table.used == 0 {
            return None;
        }
        let mut rng = rand::thread_rng();
        for _ in 0..table.size * 2 {
            let idx = rng.gen_range(0..table.size);
            if let Some((k, v)) = table.buckets[idx].first() {
                return Some((k, v));
            }
        }
        table.buckets.iter().find_map(|b| b.first()).map(|(k, v)| (k, v))
    }

    /// Samples up to `n` entries by choosing random buckets and walking
    /// their chains; may return fewer than `n` (`dictGetSomeKeys`).
    pub fn get_some_entries(&self, n: usize) -> Vec<(&K, &V)> {
        let mut out = Vec::with_capacity(n);
        if self.is_empty() || n == 0 {
            return out;
        }
        let mut rng = rand::thread_rng();
        let mut attempts = 0;
        while out.len() < n && attempts < n * 10 + 32 {
            attempts += 1;
            let use_t1 = self.is_rehashing() && rng.gen_bool(0.5) && self.t1.size > 0;
            let table = if use_t1 { &self.t1 } else { &self.t0 };
            if table.size == 0 {
                continue;
            }
            let idx = rng.gen_range(0..table.size);
            for (k, v) in &table.buckets[idx] {
                if out.len() >= n {
                    break;
                }
                out.push((k, v));
            }
        }
        out
    }

    /// Safe iteration: disables rehash progress for the iterator's
    /// lifetime (rehash_step is a no-op while any safe iterator is live),
    /// so concurrent insert/delete against the dict cannot invalidate the
    /// table layout mid-walk.
    pub fn iter_safe(&mut self) -> SafeIter<'_, K, V>
    where
        K: Clone,
        V: Clone,
    {
        self.iterators += 1;
        SafeIter { map: self, table: 0, bucket: 0, slot: 0 }
    }

    /// Cursor-based scan using reverse-binary-increment stepping, so it
    /// stays correct across incremental resizes and reports every key
    /// present at the start of a non-concurrently-modified scan at least
    /// once (spec.md §8).
    pub fn scan<F: FnMut(&K, &V)>(&self, cursor: u64, mut visit: F) -> u64 {
        if self.t0.size == 0 {
            return 0;
        }
        if !self.is_rehashing() {
            let mask = (self.t0.size - 1) as u64;
            let idx = (cursor & mask) as usize;
            for (k, v) in &self.t0.buckets[idx] {
                visit(k, v);
            }
            reverse_binary_increment(cursor, mask)
        } else {
            let (small, large) = if self.t0.size < self.t1.size {
                (&self.t0, &self.t1)
            } else {
                (&self.t1, &self.t0)
            };
            let mask_small = (small.size - 1) as u64;
            let mask_large = (large.size - 1) as u64;
            let idx_small = (cursor & mask_small) as usize;
            for (k, v) in &small.buckets[idx_small] {
                visit(k, v);
            }
            let mut c = cursor;
            loop {
                let idx_large = (c & mask_large) as usize;
                for (k, v) in &large.buckets[idx_large] {
                    visit(k, v);
                }
                c = reverse_binary_increment(c, mask_large);
                if c & mask_small != cursor & mask_small {
                    break;
                }
            }
            reverse_binary_increment(cursor, mask_small)
        }
    }
}

/// Advances a cursor by incrementing its bits in reverse order, so that a
/// cursor visiting all buckets of a smaller table remains a valid (coarser)
/// cursor over a larger table reached via resize mid-scan.
fn reverse_binary_increment(mut cursor: u64, mask: u64) -> u64 {
    cursor |= !mask;
    cursor = cursor.reverse_bits();
    cursor = cursor.wrapping_add(1);
    cursor = cursor.reverse_bits();
    cursor & mask
}

pub struct SafeIter<'a, K, V> {
    map: &'a mut IncrementalHashMap<K, V>,
    table: usize,
    bucket: usize,
    slot: usize,
}

impl<'a, K: Hash + Eq + Clone, V: Clone> Iterator for SafeIter<'a, K, V> {
    type Item = (K, V);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let table = match self.table {
                0 => &self.map.t0,
                _ => &self.map.t1,
            };
            if table.size == 0 || self.bucket >= table.size {
                if self.table == 0 && self.map.is_rehashing() {
                    self.table = 1;
                    self.bucket = 0;
                    self.slot = 0;
                    continue;
                }
                return None;
            }
            if let Some((k, v)) = table.buckets[self.bucket].get(self.slot) {
                self.slot += 1;
                return Some((k.clone(), v.clone()));
            }
            self.bucket += 1;
            self.slot = 0;
        }
    }
}

impl<'a, K, V> Drop for SafeIter<'a, K, V> {
    fn drop(&mut self) {
        self.map.iterators = self.map.iterators.saturating_sub(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_find_delete_roundtrip() {
        let mut d: IncrementalHashMap<String, i32> = IncrementalHashMap::new();
        d.insert("a".into(), 1).unwrap();
        assert_eq!(d.find(&"a".to_string()), Some(&1));
        assert_eq!(d.delete(&"a".to_string()), Ok(1));
        assert!(d.find(&"a".to_string()).is_none());
    }

    #[test]
    fn insert_duplicate_fails() {
        let mut d: IncrementalHashMap<String, i32> = IncrementalHashMap::new();
        d.insert("a".into(), 1).unwrap();
        assert_eq!(d.insert("a".into(), 2), Err(DictError::Duplicate));
    }

    #[test]
    fn grows_and_preserves_count_under_rehash() {
        let mut d: IncrementalHashMap<u32, u32> = IncrementalHashMap::new();
        for i in 0..500 {
            d.insert_or_replace(i, i * 2);
        }
        assert_eq!(d.len(), 500);
        // Drive rehashing to completion.
        while d.is_rehashing() {
            d.rehash_n_steps(1);
        }
        for i in 0..500 {
            assert_eq!(d.find(&i), Some(&(i * 2)));
        }
        assert_eq!(d.len(), 500);
    }

    #[test]
    fn count_conserved_mid_rehash() {
        let mut d: IncrementalHashMap<u32, u32> = IncrementalHashMap::new();
        for i in 0..200 {
            d.insert_or_replace(i, i);
        }
        assert!(d.is_rehashing() || d.len() == 200);
        let total_before = d.len();
        d.rehash_n_steps(3);
        assert_eq!(d.len(), total_before);
    }

    #[test]
    fn scan_covers_all_keys_without_concurrent_mutation() {
        let mut d: IncrementalHashMap<u32, u32> = IncrementalHashMap::new();
        for i in 0..64 {
            d.insert_or_replace(i, i);
        }
        while d.is_rehashing() {
            d.rehash_n_steps(1);
        }
        let mut seen = std::collections::HashSet::new();
        let mut cursor = 0u64;
        loop {
            cursor = d.scan(cursor, |k, _| {
                seen.insert(*k);
            });
            if cursor == 0 {
                break;
            }
        }
        for i in 0..64 {
            assert!(seen.contains(&i), "missing key {i}");
        }
    }
}
