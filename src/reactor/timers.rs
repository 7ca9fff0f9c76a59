//! The reactor's time-event list (spec.md §4.A). A `Vec` stands in for the
//! original singly-linked list (`examples/original_source/src/ae.h`'s
//! `aeTimeEvent`); cancellation by id is O(N), which the spec explicitly
//! accepts since N (the number of live timers: cron, client timeouts,
//! persistence triggers) is always small.

use std::time::{Duration, Instant};

pub type TimeEventId = u64;

struct TimeEvent {
    id: TimeEventId,
    deadline: Instant,
}

pub struct TimerList {
    events: Vec<TimeEvent>,
    next_id: TimeEventId,
}

impl TimerList {
    pub fn new() -> Self {
        Self { events: Vec::new(), next_id: 1 }
    }

    /// Returns a monotonically increasing id (spec.md §4.A).
    pub fn create(&mut self, delay_ms: u64) -> TimeEventId {
        let id = self.next_id;
        self.next_id += 1;
        self.events.push(TimeEvent {
            id,
            deadline: Instant::now() + Duration::from_millis(delay_ms),
        });
        id
    }

    pub fn cancel(&mut self, id: TimeEventId) {
        self.events.retain(|e| e.id != id);
    }

    pub fn reschedule(&mut self, id: TimeEventId, delay_ms: u64) {
        if let Some(e) = self.events.iter_mut().find(|e| e.id == id) {
            e.deadline = Instant::now() + Duration::from_millis(delay_ms);
        }
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.events.iter().map(|e| e.deadline).min()
    }

    /// Every timer whose deadline has passed, in arbitrary order (the
    /// reactor fires I/O before timers regardless of this order).
    pub fn due_ids(&self) -> Vec<TimeEventId> {
        let now = Instant::now();
        self.events
            .iter()
            .filter(|e| e.deadline <= now)
            .map(|e| e.id)
            .collect()
    }

    /// Clock-rollback recovery: pull every timer's deadline to now.
    pub fn force_all_due(&mut self) {
        let now = Instant::now();
        for e in &mut self.events {
            e.deadline = now;
        }
    }
}

impl Default for TimerList {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reschedule_moves_deadline_forward() {
        let mut timers = TimerList::new();
        let id = timers.create(0);
        assert!(timers.due_ids().contains(&id));
        timers.reschedule(id, 10_000);
        assert!(!timers.due_ids().contains(&id));
    }

    #[test]
    fn cancel_removes_timer() {
        let mut timers = TimerList::new();
        let id = timers.create(0);
        timers.cancel(id);
        assert!(!timers.due_ids().contains(&id));
    }
}
