//! The per-connection client record (spec.md §3 "Client"), trimmed from
//! the teacher's `connection::SessionState`: no pub/sub or ACL fields here
//! since those are out of scope, but the same authentication/transaction/
//! database-selection shape.

use std::collections::HashSet;
use std::time::Instant;

use bytes::Bytes;

use crate::transaction::MultiState;

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ClientFlags: u32 {
        const MONITOR      = 1 << 0;
        const CLOSE_ASAP   = 1 << 1;
        const UNIX_SOCKET  = 1 << 2;
    }
}

/// One connected client (spec.md §3). `id` is assigned once at accept time
/// and never reused, matching the teacher's `session_id`.
pub struct Client {
    pub id: u64,
    pub db_index: usize,
    pub authenticated: bool,
    pub flags: ClientFlags,
    pub last_interaction: Instant,
    pub multi: Option<MultiState>,
    /// Keys this client is watching, `(db_index, key)` pairs (spec.md §4.F).
    pub watched_keys: HashSet<(usize, Bytes)>,
    pub name: Option<Bytes>,
}

impl Client {
    pub fn new(id: u64, requires_auth: bool) -> Self {
        Self {
            id,
            db_index: 0,
            authenticated: !requires_auth,
            flags: ClientFlags::empty(),
            last_interaction: Instant::now(),
            multi: None,
            watched_keys: HashSet::new(),
            name: None,
        }
    }

    pub fn touch(&mut self) {
        self.last_interaction = Instant::now();
    }

    pub fn in_transaction(&self) -> bool {
        self.multi.is_some()
    }

    pub fn idle_secs(&self) -> u64 {
        self.last_interaction.elapsed().as_secs()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_client_without_auth_requirement_starts_authenticated() {
        let c = Client::new(1, false);
        assert!(c.authenticated);
        assert!(!c.in_transaction());
    }

    #[test]
    fn new_client_with_auth_requirement_starts_unauthenticated() {
        let c = Client::new(1, true);
        assert!(!c.authenticated);
    }
}
