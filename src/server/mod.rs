//! The listener/connection layer (spec.md §3 "Client" input buffer, §4.A):
//! owns the listening socket and every client's non-blocking stream,
//! driving them through the `Reactor`. Named `server::run` after the
//! teacher's `server::connection_loop::run` entry point, rebuilt around a
//! single-threaded event loop instead of a per-connection Tokio task.

use std::cell::RefCell;
use std::collections::HashMap;
use std::io::{ErrorKind, Read, Write};
use std::net::TcpListener;
use std::os::fd::{AsRawFd, RawFd};

use anyhow::Result;
use bytes::BytesMut;
use tracing::{info, warn};

use crate::client::{Client, ClientFlags};
use crate::command::{dispatch, unwatch_all};
use crate::config::Config;
use crate::context::ServerContext;
use crate::cron;
use crate::protocol::{try_parse_request, ParseOutcome, Reply};
use crate::reactor::{EpollPoller, Mask, Reactor, TimerOutcome};

const MAX_INPUT_BUFFER: usize = 1024 * 1024;

struct Connection {
    stream: std::net::TcpStream,
    client_id: u64,
    input: BytesMut,
    output: BytesMut,
}

/// Fds the reactor must (de)register after this tick; pushed by the I/O
/// callback and drained by the caller, since the callback cannot borrow
/// the reactor itself while the reactor is driving it.
#[derive(Default)]
struct FdChanges {
    add: Vec<(RawFd, Mask)>,
    remove: Vec<RawFd>,
}

pub fn run(config: Config) -> Result<()> {
    let addr = format!("{}:{}", config.bind, config.port);
    let listener = TcpListener::bind(&addr)?;
    listener.set_nonblocking(true)?;
    info!(%addr, "server listening");

    let ctx = RefCell::new(ServerContext::new(config));
    let conns: RefCell<HashMap<RawFd, Connection>> = RefCell::new(HashMap::new());
    let mut reactor = Reactor::new(EpollPoller::new()?);

    let listener_fd = listener.as_raw_fd();
    reactor.register_file(listener_fd, Mask::READABLE);

    let cron_id = {
        let hz = ctx.borrow().config.hz.max(1);
        reactor.create_time(1000 / hz as u64)
    };

    loop {
        let changes = RefCell::new(FdChanges::default());

        // The three callbacks below all share `ctx`/`conns`/`changes`
        // through `RefCell` rather than a direct `&mut` capture: `tick`
        // holds all three closures alive at once even though it only ever
        // invokes one at a time, and the borrow checker cannot see that
        // sequencing — only `RefCell`'s runtime check can.
        reactor.tick(
            || cron::before_sleep(&mut ctx.borrow_mut()),
            |fd, mask| {
                if fd == listener_fd {
                    accept_all(&listener, &mut ctx.borrow_mut(), &mut conns.borrow_mut(), &mut changes.borrow_mut());
                } else {
                    handle_ready(fd, mask, &mut ctx.borrow_mut(), &mut conns.borrow_mut(), &mut changes.borrow_mut());
                }
            },
            |id| {
                if id == cron_id {
                    TimerOutcome::Reschedule(cron::run(&mut ctx.borrow_mut()))
                } else {
                    TimerOutcome::Remove
                }
            },
        );

        let changes = changes.into_inner();
        for (fd, mask) in changes.add {
            reactor.register_file(fd, mask);
        }
        for fd in changes.remove {
            reactor.delete_file(fd, Mask::READABLE | Mask::WRITABLE);
        }
    }
}

fn accept_all(
    listener: &TcpListener,
    ctx: &mut ServerContext,
    conns: &mut HashMap<RawFd, Connection>,
    changes: &mut FdChanges,
) {
    loop {
        match listener.accept() {
            Ok((stream, addr)) => {
                if stream.set_nonblocking(true).is_err() {
                    continue;
                }
                let fd = stream.as_raw_fd();
                let client_id = ctx.new_client_id();
                ctx.clients.insert(client_id, Client::new(client_id, ctx.config.requirepass.is_some()));
                ctx.stats.incr_connections();
                conns.insert(fd, Connection { stream, client_id, input: BytesMut::new(), output: BytesMut::new() });
                changes.add.push((fd, Mask::READABLE));
                info!(%addr, client_id, "accepted connection");
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => break,
            Err(e) => {
                warn!("accept failed: {e}");
                break;
            }
        }
    }
}

fn handle_ready(
    fd: RawFd,
    mask: Mask,
    ctx: &mut ServerContext,
    conns: &mut HashMap<RawFd, Connection>,
    changes: &mut FdChanges,
) {
    if mask.contains(Mask::READABLE) {
        read_and_dispatch(fd, ctx, conns, changes);
    }
    if mask.contains(Mask::WRITABLE) && conns.contains_key(&fd) {
        flush_output(fd, conns);
    }
}

fn read_and_dispatch(
    fd: RawFd,
    ctx: &mut ServerContext,
    conns: &mut HashMap<RawFd, Connection>,
    changes: &mut FdChanges,
) {
    let Some(conn) = conns.get_mut(&fd) else { return };
    let mut buf = [0u8; 16 * 1024];
    loop {
        match conn.stream.read(&mut buf) {
            Ok(0) => {
                drop_connection(fd, ctx, conns, changes);
                return;
            }
            Ok(n) => {
                conn.input.extend_from_slice(&buf[..n]);
                if conn.input.len() > MAX_INPUT_BUFFER {
                    warn!(fd, "client input buffer exceeded limit, closing");
                    drop_connection(fd, ctx, conns, changes);
                    return;
                }
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => break,
            Err(_) => {
                drop_connection(fd, ctx, conns, changes);
                return;
            }
        }
    }

    loop {
        let Some(conn) = conns.get_mut(&fd) else { return };
        let client_id = conn.client_id;
        match try_parse_request(&mut conn.input) {
            Ok(ParseOutcome::Complete(argv)) => {
                if argv.is_empty() {
                    continue;
                }
                if let Some(client) = ctx.clients.get_mut(&client_id) {
                    client.touch();
                }
                let reply = dispatch(ctx, client_id, argv);
                let Some(conn) = conns.get_mut(&fd) else { return };
                reply.encode(&mut conn.output);
                let should_close = ctx
                    .clients
                    .get(&client_id)
                    .map(|c| c.flags.contains(ClientFlags::CLOSE_ASAP))
                    .unwrap_or(false);
                let _ = conn.stream.write_all(&conn.output);
                conn.output.clear();
                if should_close {
                    drop_connection(fd, ctx, conns, changes);
                    return;
                }
            }
            Ok(ParseOutcome::Incomplete) => break,
            Err(e) => {
                let mut out = BytesMut::new();
                Reply::Error(format!("ERR {e}")).encode(&mut out);
                let _ = conn.stream.write_all(&out);
                drop_connection(fd, ctx, conns, changes);
                return;
            }
        }
    }
}

fn flush_output(fd: RawFd, conns: &mut HashMap<RawFd, Connection>) {
    if let Some(conn) = conns.get_mut(&fd)
        && !conn.output.is_empty() {
            let _ = conn.stream.write_all(&conn.output);
            conn.output.clear();
        }
}

fn drop_connection(
    fd: RawFd,
    ctx: &mut ServerContext,
    conns: &mut HashMap<RawFd, Connection>,
    changes: &mut FdChanges,
) {
    if let Some(conn) = conns.remove(&fd) {
        unwatch_all(ctx, conn.client_id);
        ctx.clients.remove(&conn.client_id);
        changes.remove.push(fd);
    }
}
