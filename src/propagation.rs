//! The propagation sink (spec.md §4.I): a trait the dispatcher writes
//! completed commands to after a successful write, covering the interface
//! the core consumes from its AOF/replication collaborators (spec.md §1
//! names both as external subsystems; only the interface and the health
//! gate it feeds are in scope here).

use bytes::Bytes;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropagationStatus {
    Ok,
    /// The last propagation attempt failed; the dispatcher's persistence
    /// gate (spec.md §4.E step 7) must start rejecting writes until this
    /// clears.
    Failed,
}

/// A single propagated command, pre-encoded as its argv (mirrors the
/// teacher's `UnitOfWork::Command` shape, minus the script-rewrite case
/// since scripting is out of scope).
pub struct PropagatedCommand {
    pub db_index: usize,
    pub argv: Vec<Bytes>,
}

pub trait PropagationSink: Send {
    fn propagate(&mut self, cmd: &PropagatedCommand) -> PropagationStatus;
}

/// An in-memory sink: records every propagated command rather than
/// touching a real AOF file or replica link. Suitable as the default sink
/// for this crate's scope and for tests; a file-backed sink can implement
/// the same trait without the dispatcher changing.
#[derive(Default)]
pub struct InMemorySink {
    pub log: Vec<PropagatedCommand>,
}

impl PropagationSink for InMemorySink {
    fn propagate(&mut self, cmd: &PropagatedCommand) -> PropagationStatus {
        self.log.push(PropagatedCommand { db_index: cmd.db_index, argv: cmd.argv.clone() });
        PropagationStatus::Ok
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_memory_sink_records_commands() {
        let mut sink = InMemorySink::default();
        let status = sink.propagate(&PropagatedCommand {
            db_index: 0,
            argv: vec![Bytes::from_static(b"SET"), Bytes::from_static(b"k"), Bytes::from_static(b"v")],
        });
        assert_eq!(status, PropagationStatus::Ok);
        assert_eq!(sink.log.len(), 1);
    }
}
