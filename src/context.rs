//! The process-wide server state (spec.md §3 "Server"), trimmed from the
//! teacher's `core::state::ServerState`: every database, the client table,
//! the background job executor, and the propagation/dirty-counter pair the
//! dispatcher's persistence gate reads. Single-threaded, so no `Arc`/lock
//! wrapping is needed — the reactor thread is the only owner.

use std::collections::HashMap;

use crate::client::Client;
use crate::config::Config;
use crate::jobs::JobExecutor;
use crate::propagation::{InMemorySink, PropagationSink, PropagationStatus};
use crate::stats::Stats;
use crate::store::Database;

pub struct ServerContext {
    pub config: Config,
    pub dbs: Vec<Database>,
    pub clients: HashMap<u64, Client>,
    pub stats: Stats,
    pub jobs: JobExecutor,
    pub propagation: Box<dyn PropagationSink>,
    /// Keys modified since the last AOF rewrite/save (spec.md §4.G "dirty
    /// counter"); cron and `BGSAVE`-equivalents read this.
    pub dirty: u64,
    /// Cleared by a successful propagation, set by a failed one; the
    /// dispatcher's persistence-health gate (spec.md §4.E step 7) rejects
    /// writes while this is `Failed`.
    pub persistence_health: PropagationStatus,
    pub next_client_id: u64,
    pub start_time: std::time::Instant,
    /// Wall-clock ms of the last `cron::before_sleep` fast-expire pass
    /// (spec.md §4.C: that pass must not re-enter more than once per 2 ms).
    pub last_fast_expire_ms: u64,
}

impl ServerContext {
    pub fn new(config: Config) -> Self {
        let dbs = (0..config.databases).map(Database::new).collect();
        Self {
            clients: HashMap::new(),
            stats: Stats::new(),
            jobs: JobExecutor::start(),
            propagation: Box::new(InMemorySink::default()),
            dirty: 0,
            persistence_health: PropagationStatus::Ok,
            next_client_id: 1,
            start_time: std::time::Instant::now(),
            last_fast_expire_ms: 0,
            dbs,
            config,
        }
    }

    pub fn new_client_id(&mut self) -> u64 {
        let id = self.next_client_id;
        self.next_client_id += 1;
        id
    }

    pub fn total_memory(&mut self) -> usize {
        self.dbs.iter_mut().map(Database::memory_usage).sum()
    }

    pub fn db(&self, index: usize) -> &Database {
        &self.dbs[index]
    }

    pub fn db_mut(&mut self, index: usize) -> &mut Database {
        &mut self.dbs[index]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initializes_one_database_per_config_entry() {
        let mut cfg = Config::default();
        cfg.databases = 4;
        let ctx = ServerContext::new(cfg);
        assert_eq!(ctx.dbs.len(), 4);
    }

    #[test]
    fn client_ids_are_monotonic() {
        let mut ctx = ServerContext::new(Config::default());
        let a = ctx.new_client_id();
        let b = ctx.new_client_id();
        assert!(b > a);
    }
}
