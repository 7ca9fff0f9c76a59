//! The command dispatch pipeline (spec.md §4.E), grounded in the teacher's
//! `core::handler::command_router::Router::route`, trimmed to the gates
//! this crate's scope actually needs: lookup/arity, auth, OOM/eviction,
//! persistence health, and the transaction-queue-or-call branch.

pub mod spec;

use bytes::Bytes;

use crate::config::EvictionPolicy;
use crate::context::ServerContext;
use crate::error::SpinelError;
use crate::propagation::{PropagatedCommand, PropagationStatus};
use crate::protocol::Reply;
use crate::store::{lru_clock_now, now_ms, StoredValue, Value};
use crate::transaction::MultiState;
use spec::{lookup, CommandFlags, CommandSpec};

/// What a handler did to the keyspace; drives the dirty counter and the
/// propagation decision (spec.md §4.E "call").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    DidNotWrite,
    Wrote { keys_modified: u64 },
}

/// Top-level entry point: one full pass of the pipeline for a single
/// already-framed command. `client_id` must already exist in
/// `ctx.clients`.
pub fn dispatch(ctx: &mut ServerContext, client_id: u64, argv: Vec<Bytes>) -> Reply {
    let Some(name_bytes) = argv.first() else {
        return Reply::Error(SpinelError::SyntaxError.wire_message());
    };
    let name = String::from_utf8_lossy(name_bytes).to_ascii_lowercase();

    // Step 2: QUIT is special-cased before lookup.
    if name == "quit" {
        if let Some(client) = ctx.clients.get_mut(&client_id) {
            client.flags.insert(crate::client::ClientFlags::CLOSE_ASAP);
        }
        return Reply::Ok;
    }

    // Step 3: lookup + arity.
    let Some(command_spec) = lookup(&name) else {
        mark_dirty_exec_if_queueing(ctx, client_id);
        return Reply::Error(SpinelError::UnknownCommand(name).wire_message());
    };
    if !command_spec.arity_ok(argv.len()) {
        mark_dirty_exec_if_queueing(ctx, client_id);
        return Reply::Error(SpinelError::WrongArgumentCount(name).wire_message());
    }

    // Step 4: auth gate.
    let requires_auth = ctx.config.requirepass.is_some();
    if requires_auth && name != "auth" {
        let authenticated = ctx.clients.get(&client_id).map(|c| c.authenticated).unwrap_or(false);
        if !authenticated {
            return Reply::Error(SpinelError::NoAuth.wire_message());
        }
    }

    // Step 5: cluster redirect. Slot ownership/migration is a multi-node
    // concern this crate's scope keeps external (spec.md §1) — a single
    // instance of this core always owns every slot, so the redirect can
    // never actually fire, but the gate is wired so a future topology
    // layer has one insertion point instead of the step being silently
    // absent.
    if ctx.config.cluster_enabled && !command_spec.key_positions(argv.len()).is_empty() {
        let owns_every_slot = true; // no multi-node slot table is tracked
        if !owns_every_slot {
            return Reply::Error(SpinelError::ClusterMoved { slot: 0, addr: String::new() }.wire_message());
        }
    }

    // Step 6: memory ceiling + eviction (spec.md §4.D).
    if command_spec.flags.contains(CommandFlags::DENY_OOM)
        && let Some(maxmemory) = ctx.config.maxmemory {
            if ctx.config.maxmemory_policy == EvictionPolicy::NoEviction {
                if ctx.total_memory() as u64 > maxmemory {
                    return Reply::Error(SpinelError::OutOfMemory.wire_message());
                }
            } else {
                run_eviction_until_under_ceiling(ctx, maxmemory);
                if ctx.total_memory() as u64 > maxmemory {
                    return Reply::Error(SpinelError::OutOfMemory.wire_message());
                }
            }
        }

    // Step 7: persistence health gate.
    if command_spec.flags.contains(CommandFlags::WRITE)
        && ctx.persistence_health == PropagationStatus::Failed
    {
        return Reply::Error(
            SpinelError::BackgroundSaveFailed(
                "last write to the append-only log failed".to_string(),
            )
            .wire_message(),
        );
    }

    // Step 8: replica health gate. `min-slaves-to-write` requires N
    // low-lag replicas connected before a write is accepted; this core
    // tracks no replica connections at all (replication is an external
    // collaborator), so the good-replica count is always zero and any
    // non-zero threshold permanently blocks writes, exactly as a real
    // node with zero connected replicas would behave.
    if command_spec.flags.contains(CommandFlags::WRITE) && ctx.config.min_slaves_to_write > 0 {
        let good_replicas = 0usize;
        if good_replicas < ctx.config.min_slaves_to_write {
            return Reply::Error(SpinelError::NotEnoughReplicas.wire_message());
        }
    }

    // Step 9: read-only-replica / stale-replica / loading-snapshot gates.
    // Replication and RDB/AOF-load-on-boot are external collaborators
    // (spec.md §1); this node is therefore never a replica and never
    // mid-load, so these always evaluate false. Pub/sub-context and
    // slow-script gates are omitted: this crate implements no SUBSCRIBE
    // or scripting commands, so there is no context in which they could
    // ever be entered.
    if command_spec.flags.contains(CommandFlags::WRITE) {
        let is_read_only_replica = false; // this core never runs as a replica
        if is_read_only_replica {
            return Reply::Error(SpinelError::ReadOnlyReplica.wire_message());
        }
    }
    let loading_dataset = false; // no RDB/AOF load-on-boot phase exists
    if loading_dataset && !command_spec.flags.contains(CommandFlags::ADMIN) {
        return Reply::Error(SpinelError::Loading.wire_message());
    }

    // Step 10: transaction queueing.
    let in_transaction = ctx.clients.get(&client_id).map(|c| c.in_transaction()).unwrap_or(false);
    let is_transaction_control = command_spec.flags.contains(CommandFlags::TRANSACTION);
    if in_transaction && !is_transaction_control {
        if let Some(client) = ctx.clients.get_mut(&client_id)
            && let Some(multi) = client.multi.as_mut() {
                multi.queue_command(argv);
            }
        return Reply::Queued;
    }

    call(ctx, client_id, command_spec, argv)
}

/// The approximate-LRU stamp a freshly written key gets (spec.md §4.G
/// "update approximate-LRU clock"; `db.c`'s `lookupKey` stamps `robj->lru`
/// the same way on every write).
fn current_lru() -> u32 {
    lru_clock_now(now_ms() / 1000)
}

fn mark_dirty_exec_if_queueing(ctx: &mut ServerContext, client_id: u64) {
    if let Some(client) = ctx.clients.get_mut(&client_id)
        && let Some(multi) = client.multi.as_mut() {
            multi.mark_dirty_exec();
        }
}

/// `call` (spec.md §4.E): executes the handler, decides propagation.
fn call(ctx: &mut ServerContext, client_id: u64, command_spec: &CommandSpec, argv: Vec<Bytes>) -> Reply {
    ctx.stats.incr_commands();
    let db_index = ctx.clients.get(&client_id).map(|c| c.db_index).unwrap_or(0);

    let (reply, outcome) = execute(ctx, client_id, db_index, command_spec.name, &argv);

    if let WriteOutcome::Wrote { keys_modified } = outcome {
        ctx.dirty += keys_modified;
        if !command_spec.flags.contains(CommandFlags::NO_PROPAGATE) {
            let status = ctx.propagation.propagate(&PropagatedCommand { db_index, argv });
            ctx.persistence_health = status;
        }
    }
    reply
}

fn execute(
    ctx: &mut ServerContext,
    client_id: u64,
    db_index: usize,
    name: &str,
    argv: &[Bytes],
) -> (Reply, WriteOutcome) {
    use WriteOutcome::*;
    match name {
        "ping" => {
            let reply = match argv.get(1) {
                Some(msg) => Reply::bulk(msg.clone()),
                None => Reply::SimpleString("PONG".to_string()),
            };
            (reply, DidNotWrite)
        }
        "echo" => (Reply::bulk(argv[1].clone()), DidNotWrite),
        "auth" => {
            let reply = match &ctx.config.requirepass {
                None => Reply::Error(
                    SpinelError::Other("Client sent AUTH, but no password is set".into()).wire_message(),
                ),
                Some(expected) if expected.as_bytes() == &argv[1][..] => {
                    if let Some(client) = ctx.clients.get_mut(&client_id) {
                        client.authenticated = true;
                    }
                    Reply::Ok
                }
                Some(_) => Reply::Error(SpinelError::Other("WRONGPASS invalid password".into()).wire_message()),
            };
            (reply, DidNotWrite)
        }
        "select" => match std::str::from_utf8(&argv[1]).ok().and_then(|s| s.parse::<usize>().ok()) {
            Some(idx) if idx < ctx.dbs.len() => {
                if let Some(client) = ctx.clients.get_mut(&client_id) {
                    client.db_index = idx;
                }
                (Reply::Ok, DidNotWrite)
            }
            _ => (Reply::Error(SpinelError::Other("DB index is out of range".into()).wire_message()), DidNotWrite),
        },
        "get" => {
            let db = ctx.db_mut(db_index);
            let found = db.lookup_for_read(&argv[1], now_ms()).map(|sv| sv.data.clone());
            match found {
                Some(Value::String(b)) => {
                    ctx.stats.incr_hit();
                    (Reply::bulk(b), DidNotWrite)
                }
                Some(_) => (Reply::Error(SpinelError::WrongType.wire_message()), DidNotWrite),
                None => {
                    ctx.stats.incr_miss();
                    (Reply::Null, DidNotWrite)
                }
            }
        }
        "set" => {
            let key = argv[1].clone();
            let value = argv[2].clone();
            let db = ctx.db_mut(db_index);
            db.insert(key.clone(), StoredValue::new(Value::String(value), current_lru()));
            touch(ctx, db_index, &key);
            (Reply::Ok, Wrote { keys_modified: 1 })
        }
        "del" => {
            let mut deleted = 0u64;
            for key in &argv[1..] {
                let db = ctx.db_mut(db_index);
                if db.remove(key).is_some() {
                    deleted += 1;
                    touch(ctx, db_index, key);
                }
            }
            (Reply::Integer(deleted as i64), if deleted > 0 { Wrote { keys_modified: deleted } } else { DidNotWrite })
        }
        "exists" => {
            let db = ctx.db_mut(db_index);
            let now = now_ms();
            let count = argv[1..].iter().filter(|k| db.lookup_for_read(k, now).is_some()).count();
            (Reply::Integer(count as i64), DidNotWrite)
        }
        "expire" | "pexpire" => {
            let Ok(amount) = std::str::from_utf8(&argv[2]).unwrap_or("").parse::<i64>() else {
                return (Reply::Error(SpinelError::NotAnInteger.wire_message()), DidNotWrite);
            };
            let at_ms = if name == "expire" { now_ms() as i64 + amount * 1000 } else { now_ms() as i64 + amount };
            let db = ctx.db_mut(db_index);
            let ok = db.set_expiry(&argv[1], at_ms.max(0) as u64);
            if ok {
                touch(ctx, db_index, &argv[1]);
            }
            (Reply::Integer(ok as i64), if ok { Wrote { keys_modified: 1 } } else { DidNotWrite })
        }
        "ttl" | "pttl" => {
            let db = ctx.db_mut(db_index);
            let now = now_ms();
            if db.lookup_for_read(&argv[1], now).is_none() {
                return (Reply::Integer(-2), DidNotWrite);
            }
            match db.ttl_ms(&argv[1], now) {
                Some(ms) => {
                    let v = if name == "ttl" { ms / 1000 } else { ms };
                    (Reply::Integer(v), DidNotWrite)
                }
                None => (Reply::Integer(-1), DidNotWrite),
            }
        }
        "persist" => {
            let db = ctx.db_mut(db_index);
            let removed = db.persist(&argv[1]);
            if removed {
                touch(ctx, db_index, &argv[1]);
            }
            (Reply::Integer(removed as i64), if removed { Wrote { keys_modified: 1 } } else { DidNotWrite })
        }
        "incr" | "decr" => {
            let delta = if name == "incr" { 1i64 } else { -1i64 };
            let db = ctx.db_mut(db_index);
            let now = now_ms();
            let current = match db.lookup_for_read(&argv[1], now) {
                Some(sv) => match &sv.data {
                    Value::String(b) => match std::str::from_utf8(b).ok().and_then(|s| s.parse::<i64>().ok()) {
                        Some(n) => n,
                        None => return (Reply::Error(SpinelError::NotAnInteger.wire_message()), DidNotWrite),
                    },
                    _ => return (Reply::Error(SpinelError::WrongType.wire_message()), DidNotWrite),
                },
                None => 0,
            };
            let Some(new_value) = current.checked_add(delta) else {
                return (Reply::Error(SpinelError::Other("increment or decrement would overflow".into()).wire_message()), DidNotWrite);
            };
            db.insert(argv[1].clone(), StoredValue::new(Value::String(Bytes::from(new_value.to_string())), current_lru()));
            touch(ctx, db_index, &argv[1]);
            (Reply::Integer(new_value), Wrote { keys_modified: 1 })
        }
        "mset" => {
            let mut modified = 0u64;
            let mut i = 1;
            while i + 1 < argv.len() {
                let key = argv[i].clone();
                let db = ctx.db_mut(db_index);
                db.insert(key.clone(), StoredValue::new(Value::String(argv[i + 1].clone()), current_lru()));
                touch(ctx, db_index, &key);
                modified += 1;
                i += 2;
            }
            (Reply::Ok, Wrote { keys_modified: modified })
        }
        "mget" => {
            let db = ctx.db_mut(db_index);
            let now = now_ms();
            let replies = argv[1..]
                .iter()
                .map(|k| match db.lookup_for_read(k, now) {
                    Some(sv) => match &sv.data {
                        Value::String(b) => Reply::bulk(b.clone()),
                        _ => Reply::Null,
                    },
                    None => Reply::Null,
                })
                .collect();
            (Reply::Array(replies), DidNotWrite)
        }
        "type" => {
            let db = ctx.db_mut(db_index);
            match db.lookup_for_read(&argv[1], now_ms()) {
                Some(sv) => (Reply::SimpleString(sv.data.type_name().to_string()), DidNotWrite),
                None => (Reply::SimpleString("none".to_string()), DidNotWrite),
            }
        }
        "flushdb" => {
            let keys = ctx.db_mut(db_index).flush();
            touch_watched_keys_on_flush(ctx, &[db_index]);
            (Reply::Ok, if keys.is_empty() { DidNotWrite } else { Wrote { keys_modified: keys.len() as u64 } })
        }
        "flushall" => {
            let mut total = 0u64;
            for idx in 0..ctx.dbs.len() {
                total += ctx.dbs[idx].flush().len() as u64;
            }
            touch_watched_keys_on_flush(ctx, &(0..ctx.dbs.len()).collect::<Vec<_>>());
            (Reply::Ok, if total == 0 { DidNotWrite } else { Wrote { keys_modified: total } })
        }
        "multi" => {
            if let Some(client) = ctx.clients.get_mut(&client_id) {
                if client.in_transaction() {
                    return (Reply::Error(SpinelError::Other("MULTI calls can not be nested".into()).wire_message()), DidNotWrite);
                }
                client.multi = Some(MultiState::new());
            }
            (Reply::Ok, DidNotWrite)
        }
        "discard" => {
            if let Some(client) = ctx.clients.get_mut(&client_id)
                && client.multi.take().is_none() {
                    return (Reply::Error(SpinelError::Other("DISCARD without MULTI".into()).wire_message()), DidNotWrite);
                }
            unwatch_all(ctx, client_id);
            (Reply::Ok, DidNotWrite)
        }
        "watch" => {
            let in_tx = ctx.clients.get(&client_id).map(|c| c.in_transaction()).unwrap_or(false);
            if in_tx {
                return (Reply::Error(SpinelError::Other("WATCH inside MULTI is not allowed".into()).wire_message()), DidNotWrite);
            }
            for key in &argv[1..] {
                ctx.db_mut(db_index).watch(key.clone(), client_id);
                if let Some(client) = ctx.clients.get_mut(&client_id) {
                    client.watched_keys.insert((db_index, key.clone()));
                }
            }
            (Reply::Ok, DidNotWrite)
        }
        "unwatch" => {
            unwatch_all(ctx, client_id);
            (Reply::Ok, DidNotWrite)
        }
        "exec" => (exec_transaction(ctx, client_id), DidNotWrite),
        _ => (Reply::Error(SpinelError::UnknownCommand(name.to_string()).wire_message()), DidNotWrite),
    }
}

/// `touch(D, K)` (spec.md §4.F): marks every watcher of `key` dirty-CAS.
fn touch(ctx: &mut ServerContext, db_index: usize, key: &Bytes) {
    let watchers: Vec<u64> = ctx.db(db_index).watchers_of(key).to_vec();
    for watcher_id in watchers {
        if watcher_id == 0 {
            continue;
        }
        if let Some(client) = ctx.clients.get_mut(&watcher_id)
            && let Some(multi) = client.multi.as_mut() {
                multi.dirty_cas = true;
            }
    }
}

fn touch_watched_keys_on_flush(ctx: &mut ServerContext, db_indices: &[usize]) {
    let flushed: std::collections::HashSet<usize> = db_indices.iter().copied().collect();
    for client in ctx.clients.values_mut() {
        if client.watched_keys.iter().any(|(db, _)| flushed.contains(db))
            && let Some(multi) = client.multi.as_mut() {
                multi.dirty_cas = true;
            }
    }
}

/// Releases every watch this client holds; called both by `UNWATCH`/
/// `DISCARD`/`EXEC` and when a connection drops (spec.md §4.F).
pub fn unwatch_all(ctx: &mut ServerContext, client_id: u64) {
    let watched = ctx.clients.get_mut(&client_id).map(|c| std::mem::take(&mut c.watched_keys));
    if let Some(watched) = watched {
        for (db_index, key) in watched {
            ctx.db_mut(db_index).unwatch(&key, client_id);
        }
    }
    if let Some(client) = ctx.clients.get_mut(&client_id)
        && let Some(multi) = client.multi.as_mut() {
            multi.dirty_cas = false;
        }
}

/// `EXEC` (spec.md §4.F): validates dirty flags, then replays the queue
/// through `call`, and unwatches regardless of outcome.
fn exec_transaction(ctx: &mut ServerContext, client_id: u64) -> Reply {
    let Some(multi) = ctx.clients.get_mut(&client_id).and_then(|c| c.multi.take()) else {
        return Reply::Error(SpinelError::Other("EXEC without MULTI".into()).wire_message());
    };

    if multi.dirty_exec {
        unwatch_all(ctx, client_id);
        return Reply::Error(SpinelError::ExecAbort.wire_message());
    }
    if multi.dirty_cas {
        unwatch_all(ctx, client_id);
        return Reply::NullArray;
    }

    unwatch_all(ctx, client_id);

    let db_index = ctx.clients.get(&client_id).map(|c| c.db_index).unwrap_or(0);
    let has_write = multi.queue.iter().any(|queued| {
        queued
            .argv
            .first()
            .and_then(|n| lookup(&String::from_utf8_lossy(n).to_ascii_lowercase()))
            .is_some_and(|spec| spec.flags.contains(CommandFlags::WRITE))
    });

    // spec.md §4.F: a transaction with at least one write is bracketed by
    // synthetic MULTI/EXEC markers in the propagation stream, so AOF/
    // replication consumers see the block as atomic.
    if has_write {
        propagate_marker(ctx, db_index, "MULTI");
    }

    let mut replies = Vec::with_capacity(multi.queue.len());
    for queued in multi.queue {
        let Some(command_spec) = queued.argv.first().and_then(|n| lookup(&String::from_utf8_lossy(n).to_ascii_lowercase())) else {
            replies.push(Reply::Error(SpinelError::UnknownCommand("unknown".into()).wire_message()));
            continue;
        };
        replies.push(call(ctx, client_id, command_spec, queued.argv));
    }

    if has_write {
        propagate_marker(ctx, db_index, "EXEC");
    }

    Reply::Array(replies)
}

fn propagate_marker(ctx: &mut ServerContext, db_index: usize, marker: &'static str) {
    let status = ctx.propagation.propagate(&PropagatedCommand {
        db_index,
        argv: vec![Bytes::from_static(marker.as_bytes())],
    });
    ctx.persistence_health = status;
}

/// Runs the eviction engine until memory is back under the ceiling or a
/// pass reclaims nothing (spec.md §4.D, §4.E step 6).
fn run_eviction_until_under_ceiling(ctx: &mut ServerContext, maxmemory: u64) {
    const MAX_ATTEMPTS: usize = 16;
    let volatile_only = matches!(
        ctx.config.maxmemory_policy,
        EvictionPolicy::VolatileLru | EvictionPolicy::VolatileRandom | EvictionPolicy::VolatileTtl
    );
    for _ in 0..MAX_ATTEMPTS {
        if (ctx.total_memory() as u64) <= maxmemory {
            return;
        }
        let mut evicted_any = false;
        let now_lru = crate::store::lru_clock_now(now_ms() / 1000);
        for idx in 0..ctx.dbs.len() {
            if let Some(key) = ctx.dbs[idx].evict_one(now_lru, volatile_only) {
                touch(ctx, idx, &key);
                ctx.stats.incr_evicted(1);
                evicted_any = true;
            }
        }
        if !evicted_any {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::Client;
    use crate::config::Config;

    fn ctx_with_client() -> (ServerContext, u64) {
        let mut ctx = ServerContext::new(Config::default());
        let id = ctx.new_client_id();
        ctx.clients.insert(id, Client::new(id, false));
        (ctx, id)
    }

    fn argv(parts: &[&str]) -> Vec<Bytes> {
        parts.iter().map(|p| Bytes::from(p.to_string())).collect()
    }

    #[test]
    fn set_then_get_round_trips() {
        let (mut ctx, id) = ctx_with_client();
        assert_eq!(dispatch(&mut ctx, id, argv(&["SET", "k", "v"])), Reply::Ok);
        assert_eq!(dispatch(&mut ctx, id, argv(&["GET", "k"])), Reply::bulk(Bytes::from_static(b"v")));
    }

    #[test]
    fn get_missing_key_is_null() {
        let (mut ctx, id) = ctx_with_client();
        assert_eq!(dispatch(&mut ctx, id, argv(&["GET", "nope"])), Reply::Null);
    }

    #[test]
    fn auth_with_correct_password_unlocks_client() {
        let mut cfg = Config::default();
        cfg.requirepass = Some("s3cret".to_string());
        let mut ctx = ServerContext::new(cfg);
        let id = ctx.new_client_id();
        ctx.clients.insert(id, Client::new(id, true));

        match dispatch(&mut ctx, id, argv(&["GET", "k"])) {
            Reply::Error(msg) => assert!(msg.starts_with("NOAUTH")),
            other => panic!("expected NOAUTH, got {other:?}"),
        }
        assert_eq!(dispatch(&mut ctx, id, argv(&["AUTH", "wrong"])), Reply::Error(
            SpinelError::Other("WRONGPASS invalid password".into()).wire_message()
        ));
        assert_eq!(dispatch(&mut ctx, id, argv(&["AUTH", "s3cret"])), Reply::Ok);
        assert_eq!(dispatch(&mut ctx, id, argv(&["GET", "k"])), Reply::Null);
    }

    #[test]
    fn unknown_command_replies_error() {
        let (mut ctx, id) = ctx_with_client();
        match dispatch(&mut ctx, id, argv(&["NOSUCHCMD"])) {
            Reply::Error(msg) => assert!(msg.contains("unknown command")),
            other => panic!("expected error, got {other:?}"),
        }
    }

    #[test]
    fn wrong_arity_replies_error() {
        let (mut ctx, id) = ctx_with_client();
        match dispatch(&mut ctx, id, argv(&["GET"])) {
            Reply::Error(msg) => assert!(msg.contains("wrong number of arguments")),
            other => panic!("expected error, got {other:?}"),
        }
    }

    #[test]
    fn multi_queues_commands_and_exec_runs_them() {
        let (mut ctx, id) = ctx_with_client();
        assert_eq!(dispatch(&mut ctx, id, argv(&["MULTI"])), Reply::Ok);
        assert_eq!(dispatch(&mut ctx, id, argv(&["SET", "k", "1"])), Reply::Queued);
        assert_eq!(dispatch(&mut ctx, id, argv(&["INCR", "k"])), Reply::Queued);
        let result = dispatch(&mut ctx, id, argv(&["EXEC"]));
        assert_eq!(result, Reply::Array(vec![Reply::Ok, Reply::Integer(2)]));
        assert_eq!(dispatch(&mut ctx, id, argv(&["GET", "k"])), Reply::bulk(Bytes::from_static(b"2")));
    }

    #[test]
    fn exec_without_multi_errors() {
        let (mut ctx, id) = ctx_with_client();
        match dispatch(&mut ctx, id, argv(&["EXEC"])) {
            Reply::Error(_) => {}
            other => panic!("expected error, got {other:?}"),
        }
    }

    #[test]
    fn unknown_command_inside_multi_aborts_exec() {
        let (mut ctx, id) = ctx_with_client();
        dispatch(&mut ctx, id, argv(&["MULTI"]));
        match dispatch(&mut ctx, id, argv(&["NOSUCHCMD"])) {
            Reply::Error(_) => {}
            other => panic!("expected error, got {other:?}"),
        }
        match dispatch(&mut ctx, id, argv(&["EXEC"])) {
            Reply::Error(msg) => assert!(msg.contains("EXECABORT")),
            other => panic!("expected EXECABORT, got {other:?}"),
        }
    }

    #[test]
    fn watch_then_external_modification_aborts_exec_with_null_array() {
        let mut ctx = ServerContext::new(Config::default());
        let watcher = ctx.new_client_id();
        ctx.clients.insert(watcher, Client::new(watcher, false));
        let other = ctx.new_client_id();
        ctx.clients.insert(other, Client::new(other, false));

        dispatch(&mut ctx, watcher, argv(&["SET", "k", "1"]));
        dispatch(&mut ctx, watcher, argv(&["WATCH", "k"]));
        dispatch(&mut ctx, watcher, argv(&["MULTI"]));
        dispatch(&mut ctx, other, argv(&["SET", "k", "2"]));
        dispatch(&mut ctx, watcher, argv(&["GET", "k"]));
        assert_eq!(dispatch(&mut ctx, watcher, argv(&["EXEC"])), Reply::NullArray);
    }

    #[test]
    fn flushdb_removes_all_keys() {
        let (mut ctx, id) = ctx_with_client();
        dispatch(&mut ctx, id, argv(&["SET", "a", "1"]));
        dispatch(&mut ctx, id, argv(&["SET", "b", "2"]));
        assert_eq!(dispatch(&mut ctx, id, argv(&["FLUSHDB"])), Reply::Ok);
        assert_eq!(dispatch(&mut ctx, id, argv(&["EXISTS", "a", "b"])), Reply::Integer(0));
    }

    #[test]
    fn expire_then_ttl_reports_remaining_seconds() {
        let (mut ctx, id) = ctx_with_client();
        dispatch(&mut ctx, id, argv(&["SET", "k", "v"]));
        dispatch(&mut ctx, id, argv(&["EXPIRE", "k", "100"]));
        match dispatch(&mut ctx, id, argv(&["TTL", "k"])) {
            Reply::Integer(ttl) => assert!(ttl > 0 && ttl <= 100),
            other => panic!("expected integer ttl, got {other:?}"),
        }
    }
}
