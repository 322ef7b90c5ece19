//! Cooperative timer queue.
//!
//! Timers never fire on their own: the owner calls [`Scheduler::pop_due`]
//! with the current time and dispatches each returned event to completion
//! before asking for the next one. That keeps every tick, action and flush
//! atomic with respect to the others.

use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, HashSet};

/// Cancellation token for a scheduled timer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TimerId(u64);

#[derive(Debug)]
struct Entry<E> {
    due: i64,
    seq: u64,
    id: TimerId,
    period: Option<i64>,
    event: E,
}

// Ordering: (due ASC, seq ASC); the payload does not participate.
impl<E> PartialEq for Entry<E> {
    fn eq(&self, other: &Self) -> bool {
        self.due == other.due && self.seq == other.seq
    }
}

impl<E> Eq for Entry<E> {}

impl<E> PartialOrd for Entry<E> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<E> Ord for Entry<E> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.due
            .cmp(&other.due)
            .then_with(|| self.seq.cmp(&other.seq))
    }
}

#[derive(Debug)]
pub struct Scheduler<E> {
    queue: BinaryHeap<Reverse<Entry<E>>>,
    live: HashSet<TimerId>,
    next_id: u64,
    next_seq: u64,
    now: i64,
}

impl<E: Clone> Scheduler<E> {
    pub fn new(now_ms: i64) -> Self {
        Self {
            queue: BinaryHeap::new(),
            live: HashSet::new(),
            next_id: 0,
            next_seq: 0,
            now: now_ms,
        }
    }

    /// Time of the most recently dispatched event (or construction time).
    pub fn now(&self) -> i64 {
        self.now
    }

    pub fn schedule_after(&mut self, delay_ms: i64, event: E) -> TimerId {
        self.push(self.now + delay_ms.max(0), None, event)
    }

    /// Fire every `period_ms` until cancelled. The first firing is one
    /// period from now.
    pub fn schedule_every(&mut self, period_ms: i64, event: E) -> TimerId {
        let period = period_ms.max(1);
        self.push(self.now + period, Some(period), event)
    }

    /// Returns `false` if the timer already fired (one-shot) or was
    /// cancelled before.
    pub fn cancel(&mut self, id: TimerId) -> bool {
        self.live.remove(&id)
    }

    pub fn cancel_all(&mut self) {
        self.live.clear();
        self.queue.clear();
    }

    pub fn is_live(&self, id: TimerId) -> bool {
        self.live.contains(&id)
    }

    pub fn pending(&self) -> usize {
        self.live.len()
    }

    /// Earliest deadline among live timers.
    pub fn next_due(&mut self) -> Option<i64> {
        self.drop_cancelled_head();
        self.queue.peek().map(|Reverse(e)| e.due)
    }

    /// Pop the next timer whose deadline is `<= now_ms`, advancing the
    /// scheduler clock to that deadline. Periodic timers are re-armed.
    pub fn pop_due(&mut self, now_ms: i64) -> Option<(TimerId, E)> {
        self.drop_cancelled_head();
        let due = self.queue.peek().map(|Reverse(e)| e.due)?;
        if due > now_ms {
            self.now = self.now.max(now_ms);
            return None;
        }

        let Reverse(entry) = self.queue.pop()?;
        self.now = self.now.max(entry.due);
        match entry.period {
            Some(period) => {
                let seq = self.bump_seq();
                self.queue.push(Reverse(Entry {
                    due: entry.due + period,
                    seq,
                    id: entry.id,
                    period: entry.period,
                    event: entry.event.clone(),
                }));
            }
            None => {
                self.live.remove(&entry.id);
            }
        }
        Some((entry.id, entry.event))
    }

    fn push(&mut self, due: i64, period: Option<i64>, event: E) -> TimerId {
        let id = TimerId(self.next_id);
        self.next_id += 1;
        let seq = self.bump_seq();
        self.live.insert(id);
        self.queue.push(Reverse(Entry {
            due,
            seq,
            id,
            period,
            event,
        }));
        id
    }

    fn bump_seq(&mut self) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        seq
    }

    fn drop_cancelled_head(&mut self) {
        while let Some(Reverse(head)) = self.queue.peek() {
            if self.live.contains(&head.id) {
                break;
            }
            self.queue.pop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, Debug, PartialEq)]
    enum Ev {
        A,
        B,
        Tick,
    }

    fn drain(s: &mut Scheduler<Ev>, now: i64) -> Vec<Ev> {
        let mut out = Vec::new();
        while let Some((_, ev)) = s.pop_due(now) {
            out.push(ev);
        }
        out
    }

    #[test]
    fn fires_in_deadline_then_insertion_order() {
        let mut s = Scheduler::new(0);
        s.schedule_after(20, Ev::B);
        s.schedule_after(10, Ev::A);
        s.schedule_after(20, Ev::A);
        assert_eq!(drain(&mut s, 5), vec![]);
        assert_eq!(drain(&mut s, 25), vec![Ev::A, Ev::B, Ev::A]);
        assert_eq!(s.now(), 25);
        assert_eq!(s.pending(), 0);
    }

    #[test]
    fn cancelled_timers_never_fire() {
        let mut s = Scheduler::new(0);
        let id = s.schedule_after(10, Ev::A);
        s.schedule_after(15, Ev::B);
        assert!(s.cancel(id));
        assert!(!s.cancel(id));
        assert_eq!(s.next_due(), Some(15));
        assert_eq!(drain(&mut s, 100), vec![Ev::B]);
    }

    #[test]
    fn periodic_timer_rearms_until_cancelled() {
        let mut s = Scheduler::new(0);
        let id = s.schedule_every(30, Ev::Tick);
        assert_eq!(drain(&mut s, 95), vec![Ev::Tick, Ev::Tick, Ev::Tick]);
        assert_eq!(s.next_due(), Some(120));
        assert!(s.is_live(id));
        s.cancel(id);
        assert_eq!(drain(&mut s, 1_000), vec![]);
    }

    #[test]
    fn clock_advances_to_each_deadline() {
        let mut s = Scheduler::new(0);
        s.schedule_after(10, Ev::A);
        s.schedule_after(40, Ev::B);
        let (_, ev) = s.pop_due(100).unwrap();
        assert_eq!(ev, Ev::A);
        assert_eq!(s.now(), 10);
        // Scheduling from inside a dispatch is relative to the event time.
        s.schedule_after(5, Ev::Tick);
        assert_eq!(drain(&mut s, 100), vec![Ev::Tick, Ev::B]);
    }

    #[test]
    fn cancel_all_clears_everything() {
        let mut s = Scheduler::new(0);
        s.schedule_every(10, Ev::Tick);
        s.schedule_after(10, Ev::A);
        s.cancel_all();
        assert_eq!(s.pending(), 0);
        assert_eq!(s.next_due(), None);
    }
}
