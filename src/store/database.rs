//! Per-database keyspace and expiration (spec.md §3 "Database", §4.C).

use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use bytes::Bytes;

use crate::store::dict::IncrementalHashMap;
use crate::store::eviction::EvictionPool;
use crate::store::value::{lru_clock_now, StoredValue};

pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before epoch")
        .as_millis() as u64
}

/// A database's expiration-cycle sampling budget and the dense-expiry
/// re-loop threshold (spec.md §4.C).
const EXPIRE_SAMPLE_SIZE: usize = 20;
const DENSE_EXPIRY_RELOOP_RATIO: f64 = 0.25;

#[derive(Default, Clone, Copy, Debug)]
pub struct ExpireCycleStats {
    pub sampled: u64,
    pub reaped: u64,
}

/// One logical database: `dict`, the parallel `expires` table, the
/// watched-key index, and the eviction candidate pool.
///
/// `blocking_keys`/`ready_keys` (spec.md §3) belong to the blocked-client
/// wakeup mechanism, an external collaborator; the core only needs to
/// invalidate on mutation, which is not exercised by this crate's in-scope
/// command surface and is therefore omitted rather than stubbed with dead
/// fields.
pub struct Database {
    pub id: usize,
    dict: IncrementalHashMap<Bytes, StoredValue>,
    /// Absolute expiry in milliseconds since the epoch. Strict subset of
    /// `dict` (spec.md §3 invariant): every key here exists in `dict`.
    expires: IncrementalHashMap<Bytes, u64>,
    /// Key -> client ids currently watching it (spec.md §3, §4.F).
    pub watched_keys: HashMap<Bytes, Vec<u64>>,
    pub eviction_pool: EvictionPool,
    /// Keys reaped by a lookup or the active-expire cycle since the last
    /// drain; the dispatcher/cron drains this to propagate synthetic
    /// deletions and fire keyspace-event notifications (spec.md §4.C).
    pub expired_events: Vec<Bytes>,
    /// Round-robin cursor into the `expires` table, carried across
    /// `active_expire_pass` invocations so each pass resumes where the
    /// last one (or the last one that hit its time budget) left off,
    /// rather than resampling the same hot buckets every tick (spec.md
    /// §4.C).
    expire_cursor: u64,
}

impl Database {
    pub fn new(id: usize) -> Self {
        Self {
            id,
            dict: IncrementalHashMap::new(),
            expires: IncrementalHashMap::new(),
            watched_keys: HashMap::new(),
            eviction_pool: EvictionPool::new(),
            expired_events: Vec::new(),
            expire_cursor: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.dict.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dict.is_empty()
    }

    pub fn expires_len(&self) -> usize {
        self.expires.len()
    }

    /// `now > t` strictly, per spec.md §9 Open Questions: a key whose
    /// expiry equals "now" is still live.
    fn is_expired(expiry: u64, now_ms: u64) -> bool {
        now_ms > expiry
    }

    /// Reaps the key if it is present in `expires` and past due. Returns
    /// `true` if a reap happened; the removed key is pushed to
    /// `expired_events` for the caller to propagate/notify/count.
    pub fn reap_if_expired(&mut self, key: &Bytes, now_ms: u64) -> bool {
        let Some(&expiry) = self.expires.find(key) else {
            return false;
        };
        if !Self::is_expired(expiry, now_ms) {
            return false;
        }
        self.dict.delete_no_free(key);
        self.expires.delete_no_free(key);
        self.expired_events.push(key.clone());
        true
    }

    /// `lookup_for_read` (spec.md §4.C): reaps an expired key before
    /// reporting it absent, and bumps the surviving key's LRU stamp the
    /// way `db.c`'s `lookupKey` does on every access.
    pub fn lookup_for_read(&mut self, key: &Bytes, now_ms: u64) -> Option<&StoredValue> {
        self.reap_if_expired(key, now_ms);
        let sv = self.dict.find_mut(key)?;
        sv.touch_lru(lru_clock_now(now_ms / 1000));
        Some(&*sv)
    }

    /// Same lazy-expiration and LRU-bump semantics as `lookup_for_read`,
    /// but returns a mutable reference for handlers that also mutate the
    /// value.
    pub fn lookup_for_write(&mut self, key: &Bytes, now_ms: u64) -> Option<&mut StoredValue> {
        self.reap_if_expired(key, now_ms);
        let sv = self.dict.find_mut(key)?;
        sv.touch_lru(lru_clock_now(now_ms / 1000));
        Some(sv)
    }

    /// A replica must not actively expire keys; it waits for the synthetic
    /// deletion propagated by its master (spec.md §4.C). Callers on a
    /// replica should use this instead of `lookup_for_read`/`_write`.
    pub fn lookup_passive(&self, key: &Bytes) -> Option<&StoredValue> {
        self.dict.find(key)
    }

    pub fn insert(&mut self, key: Bytes, value: StoredValue) -> Option<StoredValue> {
        self.dict.insert_or_replace(key, value)
    }

    pub fn remove(&mut self, key: &Bytes) -> Option<StoredValue> {
        self.expires.delete_no_free(key);
        self.dict.delete_no_free(key)
    }

    pub fn contains(&self, key: &Bytes) -> bool {
        self.dict.contains_key(key)
    }

    pub fn set_expiry(&mut self, key: &Bytes, at_ms: u64) -> bool {
        if !self.dict.contains_key(key) {
            return false;
        }
        self.expires.insert_or_replace(key.clone(), at_ms);
        true
    }

    pub fn persist(&mut self, key: &Bytes) -> bool {
        self.expires.delete_no_free(key).is_some()
    }

    pub fn ttl_ms(&self, key: &Bytes, now_ms: u64) -> Option<i64> {
        self.expires.find(key).map(|&at| (at as i64) - (now_ms as i64))
    }

    pub fn flush(&mut self) -> Vec<Bytes> {
        let capacity = self.dict.len();
        let keys: Vec<Bytes> = {
            let s = self.dict.iter_safe();
            let mut v = Vec::with_capacity(capacity);
            for (k, _) in s {
                v.push(k);
            }
            v
        };
        self.dict = IncrementalHashMap::new();
        self.expires = IncrementalHashMap::new();
        keys
    }

    /// Runs `rehash_for_ms` on both the keyspace and expire tables, and
    /// suspends while a persistence child is alive (spec.md §4.B, §4.G).
    pub fn incremental_rehash(&mut self, budget_ms: u64) {
        self.dict.rehash_for_ms(budget_ms);
        self.expires.rehash_for_ms(budget_ms);
    }

    pub fn set_child_process_alive(&mut self, alive: bool) {
        self.dict.set_child_process_alive(alive);
        self.expires.set_child_process_alive(alive);
    }

    /// Hashtable resize maintenance (spec.md §4.G): shrink when the load
    /// factor of the keyspace table drops below 10%.
    pub fn maybe_shrink(&mut self) {
        if self.dict.is_rehashing() || self.expires.is_rehashing() {
            return;
        }
        let slots = self.dict.slots();
        if slots > 4 && self.dict.len() * 100 / slots.max(1) < 10 {
            self.dict.resize(self.dict.len().max(1));
        }
    }

    /// One pass of the active expiration cycle over this database, per
    /// spec.md §4.C: skip if `expires` is empty or fewer than 1% of slots
    /// are occupied; sample up to `EXPIRE_SAMPLE_SIZE` keys by walking
    /// `expires` from `expire_cursor` (so consecutive passes cover fresh
    /// buckets instead of resampling the same hot ones); repeat while at
    /// least 25% of the sample was reaped (dense expiry region). Checks
    /// elapsed wall time every 16 rounds and aborts once `budget_us` is
    /// exceeded, bounding how long a dense, large expire table can hold
    /// the single reactor thread.
    pub fn active_expire_pass(&mut self, now_ms: u64, budget_us: u64) -> ExpireCycleStats {
        let mut stats = ExpireCycleStats::default();
        if self.expires.is_empty() {
            return stats;
        }
        let slots = self.expires.slots().max(1);
        if self.expires.len() * 100 / slots < 1 {
            return stats;
        }
        let start = std::time::Instant::now();
        let mut rounds: u64 = 0;
        loop {
            let start_cursor = self.expire_cursor;
            let mut sample: Vec<Bytes> = Vec::with_capacity(EXPIRE_SAMPLE_SIZE);
            loop {
                self.expire_cursor =
                    self.expires.scan(self.expire_cursor, |k, _| sample.push(k.clone()));
                if sample.len() >= EXPIRE_SAMPLE_SIZE || self.expire_cursor == start_cursor {
                    break;
                }
            }
            if sample.is_empty() {
                break;
            }
            let mut reaped_this_round = 0u64;
            for key in &sample {
                if self.reap_if_expired(key, now_ms) {
                    reaped_this_round += 1;
                }
            }
            stats.sampled += sample.len() as u64;
            stats.reaped += reaped_this_round;

            rounds += 1;
            if rounds.is_multiple_of(16) && start.elapsed().as_micros() as u64 > budget_us {
                break;
            }

            let density = reaped_this_round as f64 / sample.len() as f64;
            if density < DENSE_EXPIRY_RELOOP_RATIO {
                break;
            }
            if self.expire_cursor == 0 {
                break; // full cycle over the table completed
            }
        }
        stats
    }

    /// Samples `n` keys for the eviction pool's `populate` step, returning
    /// `(key, lru_stamp)` pairs drawn from the relevant table (all keys for
    /// `allkeys-*` policies, only `expires` for `volatile-*`).
    pub fn sample_for_eviction(&self, n: usize, volatile_only: bool) -> Vec<(Bytes, u32)> {
        if volatile_only {
            self.expires
                .get_some_entries(n)
                .into_iter()
                .filter_map(|(k, _)| self.dict.find(k).map(|sv| (k.clone(), sv.lru)))
                .collect()
        } else {
            self.dict
                .get_some_entries(n)
                .into_iter()
                .map(|(k, sv)| (k.clone(), sv.lru))
                .collect()
        }
    }

    pub fn random_key(&self) -> Option<Bytes> {
        self.dict.get_random_entry().map(|(k, _)| k.clone())
    }

    /// Refills the eviction pool from a fresh sample and evicts its most
    /// idle surviving candidate, returning the removed key if any (spec.md
    /// §4.D). Encapsulated here so the caller never needs to borrow `dict`
    /// and `eviction_pool` at once.
    pub fn evict_one(&mut self, now_lru: u32, volatile_only: bool) -> Option<Bytes> {
        let sample = self.sample_for_eviction(16, volatile_only);
        self.eviction_pool.populate(sample.len(), now_lru, |_| sample.clone());
        let dict = &self.dict;
        let key = self.eviction_pool.pop_best_existing(|k| dict.contains_key(k))?;
        self.remove(&key);
        Some(key)
    }

    pub fn nearest_expiry_key(&self, sample_size: usize) -> Option<Bytes> {
        self.expires
            .get_some_entries(sample_size)
            .into_iter()
            .min_by_key(|(_, exp)| **exp)
            .map(|(k, _)| k.clone())
    }

    /// `touch(D, K)`: marks every client watching key K in this DB dirty.
    /// Returns the list of watcher client ids for the caller to mark.
    pub fn watchers_of(&self, key: &Bytes) -> &[u64] {
        self.watched_keys.get(key).map(|v| v.as_slice()).unwrap_or(&[])
    }

    pub fn watch(&mut self, key: Bytes, client_id: u64) {
        let entry = self.watched_keys.entry(key).or_default();
        if !entry.contains(&client_id) {
            entry.push(client_id);
        }
    }

    pub fn unwatch(&mut self, key: &Bytes, client_id: u64) {
        if let Some(v) = self.watched_keys.get_mut(key) {
            v.retain(|&id| id != client_id);
            if v.is_empty() {
                self.watched_keys.remove(key);
            }
        }
    }

    pub fn drain_expired_events(&mut self) -> Vec<Bytes> {
        std::mem::take(&mut self.expired_events)
    }

    /// Memory accounting used by the eviction engine's ceiling check
    /// (spec.md §4.D). Walks every value via the safe iterator rather than
    /// tracking a running total, since this crate's scope does not include
    /// per-command incremental accounting.
    pub fn memory_usage(&mut self) -> usize {
        let mut iter = self.dict.iter_safe();
        let mut total = 0usize;
        for (_, sv) in &mut iter {
            total += sv.data.memory_usage();
        }
        total
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::value::Value;

    fn sv(s: &str) -> StoredValue {
        StoredValue::new(Value::String(Bytes::from(s.to_string())), lru_clock_now(now_ms() / 1000))
    }

    #[test]
    fn expires_subset_of_dict_invariant() {
        let mut db = Database::new(0);
        db.insert(Bytes::from_static(b"k"), sv("v"));
        db.set_expiry(&Bytes::from_static(b"k"), 100);
        assert!(db.contains(&Bytes::from_static(b"k")));
        assert_eq!(db.expires_len(), 1);
    }

    #[test]
    fn expired_key_reaped_on_read_is_idempotent() {
        let mut db = Database::new(0);
        db.insert(Bytes::from_static(b"k"), sv("v"));
        db.set_expiry(&Bytes::from_static(b"k"), 100);
        assert!(db.lookup_for_read(&Bytes::from_static(b"k"), 200).is_none());
        assert_eq!(db.drain_expired_events(), vec![Bytes::from_static(b"k")]);
        // Second read: already gone, no further event.
        assert!(db.lookup_for_read(&Bytes::from_static(b"k"), 200).is_none());
        assert!(db.drain_expired_events().is_empty());
    }

    #[test]
    fn expiry_equal_to_now_is_expired_strictly_greater_rule() {
        let mut db = Database::new(0);
        db.insert(Bytes::from_static(b"k"), sv("v"));
        db.set_expiry(&Bytes::from_static(b"k"), 100);
        // now == expiry: still live (now > t required).
        assert!(db.lookup_for_read(&Bytes::from_static(b"k"), 100).is_some());
        // now > expiry: expired.
        assert!(db.lookup_for_read(&Bytes::from_static(b"k"), 101).is_none());
    }
}
