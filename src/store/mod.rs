mod database;
mod dict;
mod eviction;
mod value;

pub use database::{now_ms, Database, ExpireCycleStats};
pub use dict::{DictError, IncrementalHashMap};
pub use eviction::EvictionPool;
pub use value::{idle_ticks, lru_clock_now, StoredValue, Value, LRU_CLOCK_MAX};
