//! End-to-end scenarios (spec.md §8) driven over a real TCP socket against
//! `server::run`, exercising the full listener/reactor/dispatch/protocol
//! stack rather than calling `command::dispatch` directly.

use std::io::{Read, Write};
use std::net::TcpStream;
use std::thread;
use std::time::Duration;

use kvcored::config::Config;

/// Spawns the server on a fixed port and waits until it accepts
/// connections. Each test picks its own port to avoid collisions since the
/// server never shuts down once started.
fn start_server(port: u16) {
    let mut config = Config::default();
    config.port = port;
    thread::spawn(move || {
        let _ = kvcored::server::run(config);
    });
    for _ in 0..200 {
        if TcpStream::connect(("127.0.0.1", port)).is_ok() {
            return;
        }
        thread::sleep(Duration::from_millis(10));
    }
    panic!("server on port {port} never accepted a connection");
}

fn connect(port: u16) -> TcpStream {
    let stream = TcpStream::connect(("127.0.0.1", port)).expect("connect");
    stream.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
    stream
}

/// Sends an inline command and reads back exactly as many bytes as are
/// immediately available after a short settle delay, decoded as UTF-8 for
/// easy substring assertions against the RESP wire format.
fn roundtrip(stream: &mut TcpStream, command: &str) -> String {
    stream.write_all(command.as_bytes()).unwrap();
    stream.write_all(b"\r\n").unwrap();
    let mut buf = [0u8; 4096];
    let n = stream.read(&mut buf).expect("read reply");
    String::from_utf8_lossy(&buf[..n]).to_string()
}

#[test]
fn set_get_del_round_trip_over_the_wire() {
    start_server(17301);
    let mut conn = connect(17301);

    assert_eq!(roundtrip(&mut conn, "PING"), "+PONG\r\n");
    assert_eq!(roundtrip(&mut conn, "SET greeting hello"), "+OK\r\n");
    assert_eq!(roundtrip(&mut conn, "GET greeting"), "$5\r\nhello\r\n");
    assert_eq!(roundtrip(&mut conn, "DEL greeting"), ":1\r\n");
    assert_eq!(roundtrip(&mut conn, "GET greeting"), "$-1\r\n");
}

#[test]
fn multibulk_request_is_framed_and_dispatched() {
    start_server(17302);
    let mut conn = connect(17302);

    conn.write_all(b"*3\r\n$3\r\nSET\r\n$1\r\nk\r\n$1\r\nv\r\n").unwrap();
    let mut buf = [0u8; 512];
    let n = conn.read(&mut buf).unwrap();
    assert_eq!(&buf[..n], b"+OK\r\n");

    assert_eq!(roundtrip(&mut conn, "GET k"), "$1\r\nv\r\n");
}

#[test]
fn expire_then_get_observes_logical_deletion() {
    start_server(17303);
    let mut conn = connect(17303);

    assert_eq!(roundtrip(&mut conn, "SET k v"), "+OK\r\n");
    assert_eq!(roundtrip(&mut conn, "PEXPIRE k 10"), ":1\r\n");
    thread::sleep(Duration::from_millis(50));
    assert_eq!(roundtrip(&mut conn, "GET k"), "$-1\r\n");
}

#[test]
fn watch_then_cross_connection_modify_aborts_exec() {
    start_server(17304);
    let mut watcher = connect(17304);
    let mut other = connect(17304);

    assert_eq!(roundtrip(&mut watcher, "SET balance 100"), "+OK\r\n");
    assert_eq!(roundtrip(&mut watcher, "WATCH balance"), "+OK\r\n");
    assert_eq!(roundtrip(&mut watcher, "MULTI"), "+OK\r\n");
    assert_eq!(roundtrip(&mut watcher, "SET balance 200"), "+QUEUED\r\n");

    assert_eq!(roundtrip(&mut other, "SET balance 999"), "+OK\r\n");

    assert_eq!(roundtrip(&mut watcher, "EXEC"), "*-1\r\n");
    assert_eq!(roundtrip(&mut other, "GET balance"), "$3\r\n999\r\n");
}

#[test]
fn multi_with_unknown_command_aborts_the_whole_transaction() {
    start_server(17305);
    let mut conn = connect(17305);

    assert_eq!(roundtrip(&mut conn, "MULTI"), "+OK\r\n");
    assert_eq!(roundtrip(&mut conn, "SET a 1"), "+QUEUED\r\n");
    let err = roundtrip(&mut conn, "NOSUCHCOMMAND");
    assert!(err.starts_with('-'), "expected an error reply, got {err:?}");

    let exec_reply = roundtrip(&mut conn, "EXEC");
    assert!(exec_reply.starts_with("-EXECABORT"), "got {exec_reply:?}");
    assert_eq!(roundtrip(&mut conn, "GET a"), "$-1\r\n");
}

#[test]
fn quit_closes_the_connection() {
    start_server(17306);
    let mut conn = connect(17306);

    assert_eq!(roundtrip(&mut conn, "QUIT"), "+OK\r\n");
    let mut buf = [0u8; 16];
    let n = conn.read(&mut buf).unwrap_or(0);
    assert_eq!(n, 0, "connection should be closed after QUIT");
}
