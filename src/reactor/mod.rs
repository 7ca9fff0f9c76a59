//! The event-driven execution core (spec.md §4.A): a single-threaded
//! cooperative reactor over file descriptors and a timer list. Named after
//! and grounded on `examples/original_source/src/ae.h`; the pluggable
//! `{add, delete, poll, resize}` backend is implemented concretely over
//! Linux epoll (`epoll.rs`) since none of the example repos in the pack
//! carry a portable reactor crate of their own (spec.md §9's redesign note
//! only asks that the backend be swappable, not multi-platform).

mod epoll;
mod timers;

use std::collections::HashMap;
use std::os::fd::RawFd;
use std::time::{Duration, Instant, SystemTime};

pub use epoll::EpollPoller;
pub use timers::{TimeEventId, TimerList};

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Mask: u8 {
        const READABLE = 0b01;
        const WRITABLE = 0b10;
    }
}

/// What a timer callback returns: reschedule after N more milliseconds, or
/// stop firing.
pub enum TimerOutcome {
    Reschedule(u64),
    Remove,
}

struct FileSlot {
    mask: Mask,
}

/// The pluggable readiness backend (spec.md §4.A: "a tiny API exposing
/// `add`, `delete`, `poll(timeout)`, `resize`").
pub trait Poller {
    fn add(&mut self, fd: RawFd, mask: Mask);
    fn modify(&mut self, fd: RawFd, mask: Mask);
    fn delete(&mut self, fd: RawFd);
    /// Blocks up to `timeout` (or forever if `None`), returning ready
    /// `(fd, mask)` pairs.
    fn poll(&mut self, timeout: Option<Duration>) -> Vec<(RawFd, Mask)>;
}

/// The reactor owns the file-event table, the timer list, and drives both
/// to completion each iteration. All callbacks run sequentially; none may
/// block (spec.md §4.A "Scheduling model & ordering").
pub struct Reactor<P: Poller> {
    poller: P,
    files: HashMap<RawFd, FileSlot>,
    timers: TimerList,
    /// Last observed wall-clock reading, used only to detect a backward
    /// jump (spec.md §4.A); scheduling itself still runs on `Instant`,
    /// which is guaranteed monotonic and so cannot exhibit the rollback
    /// this field watches for.
    last_wall_time: SystemTime,
    pub stop: bool,
}

impl<P: Poller> Reactor<P> {
    pub fn new(poller: P) -> Self {
        Self {
            poller,
            files: HashMap::new(),
            timers: TimerList::new(),
            last_wall_time: SystemTime::now(),
            stop: false,
        }
    }

    /// Idempotent: adding WRITABLE to a slot that already has READABLE
    /// leaves the read registration intact (spec.md §4.A).
    pub fn register_file(&mut self, fd: RawFd, mask: Mask) {
        let slot = self.files.entry(fd).or_insert(FileSlot { mask: Mask::empty() });
        let new_mask = slot.mask | mask;
        if new_mask != slot.mask {
            if slot.mask.is_empty() {
                self.poller.add(fd, new_mask);
            } else {
                self.poller.modify(fd, new_mask);
            }
            slot.mask = new_mask;
        }
    }

    pub fn delete_file(&mut self, fd: RawFd, mask: Mask) {
        if let Some(slot) = self.files.get_mut(&fd) {
            slot.mask -= mask;
            if slot.mask.is_empty() {
                self.poller.delete(fd);
                self.files.remove(&fd);
            } else {
                self.poller.modify(fd, slot.mask);
            }
        }
    }

    pub fn create_time(&mut self, delay_ms: u64) -> TimeEventId {
        self.timers.create(delay_ms)
    }

    pub fn cancel_time(&mut self, id: TimeEventId) {
        self.timers.cancel(id);
    }

    /// One iteration: run `before_sleep`, poll (sleeping up to the earliest
    /// timer deadline or until I/O readiness), then fire I/O callbacks
    /// (read before write per fd) followed by every timer past its
    /// deadline. `io_cb` and `timer_cb` are invoked by the caller-owned
    /// dispatch table rather than stored function pointers, matching
    /// spec.md §9's "globally mutable server struct" redesign note: the
    /// reactor carries no user-data, the caller's closures do.
    pub fn tick<F, T>(&mut self, mut before_sleep: F, mut on_ready: impl FnMut(RawFd, Mask), mut on_timer: T)
    where
        F: FnMut(),
        T: FnMut(TimeEventId) -> TimerOutcome,
    {
        before_sleep();

        self.detect_clock_rollback();

        let timeout = self.timers.next_deadline().map(|deadline| {
            let now = Instant::now();
            if deadline > now { deadline - now } else { Duration::ZERO }
        });

        let ready = self.poller.poll(timeout);
        // Read before write for each fd: split the readable pass from the
        // writable pass.
        for &(fd, mask) in &ready {
            if mask.contains(Mask::READABLE) {
                on_ready(fd, Mask::READABLE);
            }
        }
        for &(fd, mask) in &ready {
            if mask.contains(Mask::WRITABLE) {
                on_ready(fd, Mask::WRITABLE);
            }
        }

        let due = self.timers.due_ids();
        for id in due {
            match on_timer(id) {
                TimerOutcome::Reschedule(delay_ms) => self.timers.reschedule(id, delay_ms),
                TimerOutcome::Remove => self.timers.cancel(id),
            }
        }
    }

    /// If wall-clock has jumped backward relative to `last_wall_time`,
    /// advance every timer to fire now rather than stalling (spec.md
    /// §4.A). Uses `SystemTime`, the actual wall clock an admin-issued
    /// `date -s` or NTP step can move backward; `Instant` is monotonic by
    /// contract and could never observe this.
    fn detect_clock_rollback(&mut self) {
        let now = SystemTime::now();
        if now < self.last_wall_time {
            self.timers.force_all_due();
        }
        self.last_wall_time = now;
    }

    pub fn run<F, T>(&mut self, mut before_sleep: F, mut on_ready: impl FnMut(RawFd, Mask), mut on_timer: T)
    where
        F: FnMut(),
        T: FnMut(TimeEventId) -> TimerOutcome,
    {
        while !self.stop {
            self.tick(&mut before_sleep, &mut on_ready, &mut on_timer);
        }
    }
}
