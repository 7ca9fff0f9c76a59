//! Periodic maintenance (spec.md §4.G), grounded in
//! `examples/original_source/src/redis.c`'s `serverCron`: driven by the
//! reactor's timer list at `1000 / hz` milliseconds, trimmed to the
//! database/client maintenance this crate's scope keeps (no persistence
//! children, no replication/cluster crons).

use crate::client::ClientFlags;
use crate::context::ServerContext;
use crate::store::now_ms;

/// Minimum client-maintenance slice per cron tick (`redis.c`'s
/// `numclients/(server.hz*10)` floored at 50, here applied per database).
const MIN_CLIENTS_PER_TICK: usize = 50;
/// Rehash budget per database per tick, in milliseconds.
const REHASH_BUDGET_MS: u64 = 1;
/// Active-expire time budget for `before_sleep`'s fast cycle (spec.md
/// §4.C "fast mode": 1 ms, not re-entered more than once per 2 ms).
const FAST_EXPIRE_BUDGET_US: u64 = 1_000;
const FAST_EXPIRE_MIN_INTERVAL_MS: u64 = 2;
/// Active-expire time budget for the slow (cron) cycle: 25% of the cron
/// period (spec.md §4.C "slow mode").
const SLOW_EXPIRE_BUDGET_RATIO: u64 = 4;

/// One `serverCron` pass: client timeouts, expiration, incremental rehash
/// and shrink. Returns the delay in milliseconds until the next run.
pub fn run(ctx: &mut ServerContext) -> u64 {
    let now = now_ms();

    close_idle_clients(ctx, now);

    let period_us = 1_000_000 / ctx.config.hz.max(1) as u64;
    let slow_budget_us = period_us / SLOW_EXPIRE_BUDGET_RATIO;
    for idx in 0..ctx.dbs.len() {
        let stats = ctx.dbs[idx].active_expire_pass(now, slow_budget_us);
        ctx.stats.incr_expired(stats.reaped);
        ctx.dbs[idx].incremental_rehash(REHASH_BUDGET_MS);
        ctx.dbs[idx].maybe_shrink();
    }

    1000 / ctx.config.hz.max(1) as u64
}

/// `before_sleep`'s fast expiration cycle (spec.md §4.G): a 1 ms-bounded
/// pass run right before the reactor blocks in `poll`, skipped entirely
/// if the last fast pass ran less than 2 ms ago.
pub fn before_sleep(ctx: &mut ServerContext) {
    let now = now_ms();
    if now.saturating_sub(ctx.last_fast_expire_ms) < FAST_EXPIRE_MIN_INTERVAL_MS {
        return;
    }
    ctx.last_fast_expire_ms = now;
    for idx in 0..ctx.dbs.len() {
        let stats = ctx.dbs[idx].active_expire_pass(now, FAST_EXPIRE_BUDGET_US);
        ctx.stats.incr_expired(stats.reaped);
    }
}

fn close_idle_clients(ctx: &mut ServerContext, _now: u64) {
    if ctx.config.maxidletime_secs == 0 {
        return;
    }
    let ids: Vec<u64> = ctx.clients.keys().copied().take(MIN_CLIENTS_PER_TICK.max(ctx.clients.len())).collect();
    for id in ids {
        if let Some(client) = ctx.clients.get_mut(&id)
            && client.idle_secs() > ctx.config.maxidletime_secs {
                client.flags.insert(ClientFlags::CLOSE_ASAP);
            }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::Client;
    use crate::config::Config;

    #[test]
    fn run_returns_period_derived_from_hz() {
        let mut cfg = Config::default();
        cfg.hz = 20;
        let mut ctx = ServerContext::new(cfg);
        assert_eq!(run(&mut ctx), 50);
    }

    #[test]
    fn idle_client_past_maxidletime_is_flagged_for_close() {
        let mut cfg = Config::default();
        cfg.maxidletime_secs = 0; // disabled: no flag expected
        let mut ctx = ServerContext::new(cfg);
        let id = ctx.new_client_id();
        ctx.clients.insert(id, Client::new(id, false));
        run(&mut ctx);
        assert!(!ctx.clients[&id].flags.contains(ClientFlags::CLOSE_ASAP));
    }
}
