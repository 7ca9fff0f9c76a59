//! MULTI/EXEC/WATCH (spec.md §4.F), grounded in
//! `examples/original_source/src/multi.c`'s `mstate`/`touchWatchedKey`
//! design and the teacher's `core::handler::actions::transaction` module.

use bytes::Bytes;

/// A command queued inside a `MULTI` block: the raw argv, ready for
/// re-dispatch at `EXEC` time.
pub struct QueuedCommand {
    pub argv: Vec<Bytes>,
}

/// Per-client transaction state (spec.md §3 "Client" `mstate`/dirty flags).
pub struct MultiState {
    pub queue: Vec<QueuedCommand>,
    /// Set when a queued command fails to parse/look up (unknown command,
    /// wrong arity): forces `EXEC` to abort without running anything
    /// (`multi.c`'s `REDIS_DIRTY_EXEC`).
    pub dirty_exec: bool,
    /// Set when a watched key was touched by another client while this one
    /// sat in `MULTI` (`multi.c`'s `REDIS_DIRTY_CAS`).
    pub dirty_cas: bool,
}

impl MultiState {
    pub fn new() -> Self {
        Self { queue: Vec::new(), dirty_exec: false, dirty_cas: false }
    }

    pub fn queue_command(&mut self, argv: Vec<Bytes>) {
        self.queue.push(QueuedCommand { argv });
    }

    pub fn mark_dirty_exec(&mut self) {
        self.dirty_exec = true;
    }

    /// `EXEC` must refuse to run if either dirty flag is set
    /// (`multi.c` line 133: `REDIS_DIRTY_CAS|REDIS_DIRTY_EXEC`).
    pub fn should_abort(&self) -> bool {
        self.dirty_exec || self.dirty_cas
    }
}

impl Default for MultiState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_state_does_not_abort() {
        assert!(!MultiState::new().should_abort());
    }

    #[test]
    fn dirty_cas_forces_abort() {
        let mut m = MultiState::new();
        m.dirty_cas = true;
        assert!(m.should_abort());
    }

    #[test]
    fn dirty_exec_forces_abort() {
        let mut m = MultiState::new();
        m.mark_dirty_exec();
        assert!(m.should_abort());
    }
}
