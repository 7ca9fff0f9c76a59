//! The primary error type for the server core.
//!
//! Mirrors the split the teacher uses between `anyhow` (process/ops glue:
//! config loading, startup) and a dedicated `thiserror` enum for domain
//! errors that must round-trip to a wire-protocol error code.

use std::sync::Arc;
use thiserror::Error;

/// All domain-level failures the core can produce, one variant per
/// sentinel-level error kind in spec.md §7.
#[derive(Error, Debug, Clone)]
pub enum SpinelError {
    #[error("IO error: {0}")]
    Io(Arc<std::io::Error>),

    #[error("ERR unknown command '{0}'")]
    UnknownCommand(String),

    #[error("ERR syntax error")]
    SyntaxError,

    #[error("ERR wrong number of arguments for '{0}' command")]
    WrongArgumentCount(String),

    #[error("WRONGTYPE Operation against a key holding the wrong kind of value")]
    WrongType,

    #[error("ERR value is not an integer or out of range")]
    NotAnInteger,

    #[error("ERR no such key")]
    NoSuchKey,

    #[error("ERR source and destination objects are the same")]
    SourceIsDestination,

    #[error("ERR index out of range")]
    IndexOutOfRange,

    #[error("LOADING server is loading the dataset in memory")]
    Loading,

    #[error("OOM command not allowed when used memory > 'maxmemory'")]
    OutOfMemory,

    #[error("NOAUTH Authentication required")]
    NoAuth,

    #[error("READONLY You can't write against a read only replica")]
    ReadOnlyReplica,

    #[error("MASTERDOWN Link with MASTER is down")]
    MasterDown,

    #[error("MISCONF {0}")]
    BackgroundSaveFailed(String),

    #[error("EXECABORT Transaction discarded because of previous errors.")]
    ExecAbort,

    #[error("NOREPLICAS Not enough good replicas to write.")]
    NotEnoughReplicas,

    #[error("BUSYKEY Target key name already exists.")]
    BusyKey,

    #[error("MOVED {slot} {addr}")]
    ClusterMoved { slot: u16, addr: String },

    #[error("ASK {slot} {addr}")]
    ClusterAsk { slot: u16, addr: String },

    #[error("TRYAGAIN {0}")]
    ClusterTryAgain(String),

    #[error("CLUSTERDOWN {0}")]
    ClusterDown(String),

    #[error("ERR {0}")]
    Other(String),
}

impl SpinelError {
    /// Renders the error the way it would appear on the wire, after the
    /// leading `-` and before the trailing CRLF.
    pub fn wire_message(&self) -> String {
        self.to_string()
    }
}

impl From<std::io::Error> for SpinelError {
    fn from(e: std::io::Error) -> Self {
        SpinelError::Io(Arc::new(e))
    }
}

impl From<std::num::ParseIntError> for SpinelError {
    fn from(_: std::num::ParseIntError) -> Self {
        SpinelError::NotAnInteger
    }
}
