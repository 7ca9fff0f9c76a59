//! Static command metadata (spec.md §4.E): flags, arity, and the key-range
//! description used by the dispatcher. Grounded in the teacher's
//! `core::commands::command_trait::CommandFlags` / `command_spec.rs`, with
//! the flags trimmed to what this crate's gates actually check.

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct CommandFlags: u32 {
        const WRITE        = 1 << 0;
        const READONLY     = 1 << 1;
        const DENY_OOM     = 1 << 2;
        const ADMIN        = 1 << 3;
        const TRANSACTION  = 1 << 4;
        const NO_PROPAGATE = 1 << 5;
        const FAST         = 1 << 6;
    }
}

/// One row of the static command table (spec.md §4.E "Command metadata").
#[derive(Debug, Clone, Copy)]
pub struct CommandSpec {
    pub name: &'static str,
    /// Positive: exact argument count including the command name.
    /// Negative: minimum count (e.g. -2 means "at least 2").
    pub arity: i64,
    pub flags: CommandFlags,
    pub first_key: i64,
    pub last_key: i64,
    pub step: i64,
}

impl CommandSpec {
    pub const fn new(
        name: &'static str,
        arity: i64,
        flags: CommandFlags,
        first_key: i64,
        last_key: i64,
        step: i64,
    ) -> Self {
        Self { name, arity, flags, first_key, last_key, step }
    }

    /// Arity validation (spec.md §4.E step 3): positive means exact,
    /// negative means minimum.
    pub fn arity_ok(&self, argc: usize) -> bool {
        let argc = argc as i64;
        if self.arity >= 0 {
            argc == self.arity
        } else {
            argc >= -self.arity
        }
    }

    pub fn key_positions(&self, argc: usize) -> Vec<usize> {
        if self.first_key == 0 {
            return Vec::new();
        }
        let last = if self.last_key < 0 {
            (argc as i64 + self.last_key) as usize
        } else {
            self.last_key as usize
        };
        let mut keys = Vec::new();
        let mut pos = self.first_key as usize;
        while pos <= last && pos < argc {
            keys.push(pos);
            pos += self.step.max(1) as usize;
        }
        keys
    }
}

macro_rules! table {
    ($($name:expr => $arity:expr, $flags:expr, $fk:expr, $lk:expr, $step:expr;)*) => {
        pub const COMMAND_TABLE: &[CommandSpec] = &[
            $(CommandSpec::new($name, $arity, $flags, $fk, $lk, $step),)*
        ];
    };
}

table! {
    "auth"    => 2,  CommandFlags::FAST.union(CommandFlags::NO_PROPAGATE), 0, 0, 0;
    "ping"    => -1, CommandFlags::FAST.union(CommandFlags::READONLY), 0, 0, 0;
    "echo"    => 2,  CommandFlags::FAST.union(CommandFlags::READONLY), 0, 0, 0;
    "quit"    => -1, CommandFlags::FAST, 0, 0, 0;
    "select"  => 2,  CommandFlags::FAST, 0, 0, 0;
    "get"     => 2,  CommandFlags::READONLY.union(CommandFlags::FAST), 1, 1, 1;
    "set"     => -3, CommandFlags::WRITE.union(CommandFlags::DENY_OOM), 1, 1, 1;
    "del"     => -2, CommandFlags::WRITE, 1, -1, 1;
    "exists"  => -2, CommandFlags::READONLY.union(CommandFlags::FAST), 1, -1, 1;
    "expire"  => 3,  CommandFlags::WRITE.union(CommandFlags::FAST), 1, 1, 1;
    "pexpire" => 3,  CommandFlags::WRITE.union(CommandFlags::FAST), 1, 1, 1;
    "ttl"     => 2,  CommandFlags::READONLY.union(CommandFlags::FAST), 1, 1, 1;
    "pttl"    => 2,  CommandFlags::READONLY.union(CommandFlags::FAST), 1, 1, 1;
    "persist" => 2,  CommandFlags::WRITE.union(CommandFlags::FAST), 1, 1, 1;
    "incr"    => 2,  CommandFlags::WRITE.union(CommandFlags::DENY_OOM).union(CommandFlags::FAST), 1, 1, 1;
    "decr"    => 2,  CommandFlags::WRITE.union(CommandFlags::DENY_OOM).union(CommandFlags::FAST), 1, 1, 1;
    "mset"    => -3, CommandFlags::WRITE.union(CommandFlags::DENY_OOM), 1, -1, 2;
    "mget"    => -2, CommandFlags::READONLY.union(CommandFlags::FAST), 1, -1, 1;
    "type"    => 2,  CommandFlags::READONLY.union(CommandFlags::FAST), 1, 1, 1;
    "flushdb" => -1, CommandFlags::WRITE.union(CommandFlags::ADMIN), 0, 0, 0;
    "flushall"=> -1, CommandFlags::WRITE.union(CommandFlags::ADMIN), 0, 0, 0;
    "multi"   => 1,  CommandFlags::TRANSACTION.union(CommandFlags::FAST), 0, 0, 0;
    "exec"    => 1,  CommandFlags::TRANSACTION, 0, 0, 0;
    "discard" => 1,  CommandFlags::TRANSACTION.union(CommandFlags::FAST), 0, 0, 0;
    "watch"   => -2, CommandFlags::TRANSACTION.union(CommandFlags::FAST), 1, -1, 1;
    "unwatch" => 1,  CommandFlags::TRANSACTION.union(CommandFlags::FAST), 0, 0, 0;
}

pub fn lookup(name: &str) -> Option<&'static CommandSpec> {
    let lower = name.to_ascii_lowercase();
    COMMAND_TABLE.iter().find(|c| c.name == lower)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mset_key_positions_step_by_two() {
        let spec = lookup("mset").unwrap();
        assert_eq!(spec.key_positions(5), vec![1, 3]);
    }

    #[test]
    fn get_rejects_wrong_arity() {
        let spec = lookup("get").unwrap();
        assert!(!spec.arity_ok(3));
        assert!(spec.arity_ok(2));
    }

    #[test]
    fn del_accepts_variadic_arity() {
        let spec = lookup("del").unwrap();
        assert!(spec.arity_ok(2));
        assert!(spec.arity_ok(10));
        assert!(!spec.arity_ok(1));
    }

    #[test]
    fn unknown_command_not_found() {
        assert!(lookup("notacommand").is_none());
    }
}
