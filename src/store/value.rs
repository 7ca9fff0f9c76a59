//! The polymorphic value cell (spec.md §3), reworked from the teacher's
//! reference-counted `DataValue`/`StoredValue` pair into an ownership-tagged
//! value (spec.md §9): the keyspace exclusively owns its values, and
//! sharing is expressed as an explicit `Shared` wrapper rather than an
//! open-ended refcount.

use bytes::Bytes;
use std::collections::{HashMap, HashSet, VecDeque};

/// Concrete data-type codecs (lists, sets, sorted sets, hashes) are out of
/// scope per spec.md §1: they are external collaborators referenced only by
/// this interface. `Value` still models all five tags so the keyspace,
/// eviction, and type-checking machinery exercise the same shape production
/// code would, but only `String` carries a full command surface; the other
/// variants are minimal containers sufficient for `TYPE`/`WRONGTYPE`
/// checking and memory accounting.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    String(Bytes),
    List(VecDeque<Bytes>),
    Set(HashSet<Bytes>),
    Hash(HashMap<Bytes, Bytes>),
    ZSet(Vec<(Bytes, f64)>),
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::String(_) => "string",
            Value::List(_) => "list",
            Value::Set(_) => "set",
            Value::Hash(_) => "hash",
            Value::ZSet(_) => "zset",
        }
    }

    /// Approximate in-memory footprint, used by the eviction engine's
    /// memory-ceiling check (spec.md §4.D).
    pub fn memory_usage(&self) -> usize {
        let base = std::mem::size_of::<Value>();
        base + match self {
            Value::String(b) => b.len(),
            Value::List(l) => l.iter().map(|b| b.len() + 8).sum(),
            Value::Set(s) => s.iter().map(|b| b.len() + 8).sum(),
            Value::Hash(h) => h.iter().map(|(k, v)| k.len() + v.len() + 16).sum(),
            Value::ZSet(z) => z.iter().map(|(m, _)| m.len() + 16).sum(),
        }
    }
}

/// The approximate-LRU clock is a 24-bit counter, incremented by cron
/// (spec.md §4.G "update approximate-LRU clock"), wrapping at `1 << 24`.
pub const LRU_CLOCK_BITS: u32 = 24;
pub const LRU_CLOCK_MAX: u32 = 1 << LRU_CLOCK_BITS;

/// A key's current LRU clock, in the same wrapped space as `StoredValue::lru`.
pub fn lru_clock_now(unix_seconds: u64) -> u32 {
    (unix_seconds as u32) & (LRU_CLOCK_MAX - 1)
}

/// Estimates how long (in clock ticks) a key has been idle, tolerating a
/// single wrap of the 24-bit counter via signed subtraction. spec.md §9
/// Open Questions: this is accepted as-is, not "fixed".
pub fn idle_ticks(now: u32, stamp: u32) -> u32 {
    if now >= stamp {
        now - stamp
    } else {
        (LRU_CLOCK_MAX - stamp) + now
    }
}

/// A value cell plus the metadata the keyspace and eviction engine need,
/// mirroring the teacher's `StoredValue` (spec.md §3 "Value").
#[derive(Debug, Clone)]
pub struct StoredValue {
    pub data: Value,
    /// 24-bit approximate-LRU stamp, updated on read/write.
    pub lru: u32,
    /// Optimistic-concurrency version, bumped on every mutation; not
    /// strictly required by WATCH (which is keyed off `touch`, not this
    /// counter) but kept for introspection parity with the teacher.
    pub version: u64,
}

impl StoredValue {
    pub fn new(data: Value, lru_now: u32) -> Self {
        Self { data, lru: lru_now, version: 1 }
    }

    pub fn touch_lru(&mut self, lru_now: u32) {
        self.lru = lru_now;
    }
}
