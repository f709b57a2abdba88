use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, HashMap};
use std::fmt;
use std::time::{Duration, Instant};

use tracing::warn;

/// Handle of a registered timer; stays valid across periodic re-arming
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerHandle(u64);

impl fmt::Display for TimerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "timer#{}", self.0)
    }
}

/// How many times a timer fires
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Repeat {
    Once,
    Times(u32),
    Forever,
}

#[derive(Debug, PartialEq, Eq)]
struct Entry {
    at: Instant,
    seq: u64,
    id: u64,
}

impl Ord for Entry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.at.cmp(&other.at).then(self.seq.cmp(&other.seq))
    }
}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

struct Slot<T> {
    payload: T,
    interval: Duration,
    /// Fires left after the pending one; `None` repeats forever
    remaining: Option<u32>,
}

/// Timer heap with lazy cancellation.
///
/// Cancelling removes the timer's slot and leaves its heap entry behind.
/// Stale entries are skipped when they surface and the heap is rebuilt
/// once they outnumber live entries. Entries due at the same instant fire
/// in registration order.
///
/// The scheduler keeps its own notion of "now": the event loop sets it
/// from the wall clock, tests move it with [`Scheduler::advance`].
pub struct Scheduler<T> {
    heap: BinaryHeap<Reverse<Entry>>,
    slots: HashMap<u64, Slot<T>>,
    next_id: u64,
    next_seq: u64,
    wasted: usize,
    now: Instant,
}

impl<T: Clone> Scheduler<T> {
    pub fn new() -> Self {
        Scheduler {
            heap: BinaryHeap::new(),
            slots: HashMap::new(),
            next_id: 1,
            next_seq: 0,
            wasted: 0,
            now: Instant::now(),
        }
    }

    pub fn now(&self) -> Instant {
        self.now
    }

    /// Move the clock forward to `now`; going backwards is ignored
    pub fn set_now(&mut self, now: Instant) {
        if now > self.now {
            self.now = now;
        }
    }

    pub fn advance(&mut self, by: Duration) {
        self.now += by;
    }

    /// Fire `payload` after `delay`, then every `delay` while `repeat` allows.
    ///
    /// A periodic timer needs a non-zero `delay`; with a zero one it fires once.
    pub fn register(&mut self, delay: Duration, repeat: Repeat, payload: T) -> TimerHandle {
        let remaining = match repeat {
            Repeat::Once => Some(0),
            Repeat::Times(n) => Some(n.saturating_sub(1)),
            Repeat::Forever if delay.is_zero() => {
                warn!("periodic timer with zero interval fires once");
                Some(0)
            }
            Repeat::Forever => None,
        };
        let id = self.next_id;
        self.next_id += 1;
        self.slots.insert(id, Slot { payload, interval: delay, remaining });
        self.push(self.now + delay, id);
        TimerHandle(id)
    }

    /// One-shot timer at an absolute instant
    pub fn register_at(&mut self, at: Instant, payload: T) -> TimerHandle {
        let delay = at.saturating_duration_since(self.now);
        self.register(delay, Repeat::Once, payload)
    }

    /// Cancel a timer; cancelling twice or after it fired is a no-op
    pub fn cancel(&mut self, handle: TimerHandle) -> bool {
        if self.slots.remove(&handle.0).is_none() {
            return false;
        }
        self.wasted += 1;
        if self.wasted * 2 > self.heap.len() {
            self.compact();
        }
        true
    }

    pub fn is_armed(&self, handle: TimerHandle) -> bool {
        self.slots.contains_key(&handle.0)
    }

    /// Number of live timers
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Earliest live deadline
    pub fn next_deadline(&mut self) -> Option<Instant> {
        while let Some(Reverse(top)) = self.heap.peek() {
            if self.slots.contains_key(&top.id) {
                return Some(top.at);
            }
            self.heap.pop();
            self.wasted = self.wasted.saturating_sub(1);
        }
        None
    }

    /// Pop the next timer due at or before `now`, re-arming periodic ones
    pub fn pop_due(&mut self) -> Option<(TimerHandle, T)> {
        loop {
            let due = matches!(self.heap.peek(), Some(Reverse(top)) if top.at <= self.now);
            if !due {
                return None;
            }
            let Reverse(entry) = self.heap.pop()?;
            let Some(slot) = self.slots.get_mut(&entry.id) else {
                self.wasted = self.wasted.saturating_sub(1);
                continue;
            };
            let payload = slot.payload.clone();
            let interval = slot.interval;
            let rearm = match slot.remaining.as_mut() {
                Some(0) => false,
                Some(n) => {
                    *n -= 1;
                    true
                }
                None => true,
            };
            if rearm {
                self.push(entry.at + interval, entry.id);
            } else {
                self.slots.remove(&entry.id);
            }
            return Some((TimerHandle(entry.id), payload));
        }
    }

    fn push(&mut self, at: Instant, id: u64) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(Reverse(Entry { at, seq, id }));
    }

    fn compact(&mut self) {
        let slots = &self.slots;
        let live: Vec<_> = self
            .heap
            .drain()
            .filter(|Reverse(e)| slots.contains_key(&e.id))
            .collect();
        self.heap = live.into_iter().collect();
        self.wasted = 0;
    }

    #[cfg(test)]
    fn heap_len(&self) -> usize {
        self.heap.len()
    }
}

impl<T: Clone> Default for Scheduler<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(s: &mut Scheduler<&'static str>) -> Vec<&'static str> {
        std::iter::from_fn(|| s.pop_due().map(|(_, p)| p)).collect()
    }

    #[test]
    fn test_fires_in_deadline_then_registration_order() {
        let mut s = Scheduler::new();
        s.register(Duration::from_secs(2), Repeat::Once, "late");
        s.register(Duration::from_secs(1), Repeat::Once, "first");
        s.register(Duration::from_secs(1), Repeat::Once, "second");
        assert!(drain(&mut s).is_empty());
        s.advance(Duration::from_secs(1));
        assert_eq!(drain(&mut s), vec!["first", "second"]);
        s.advance(Duration::from_secs(1));
        assert_eq!(drain(&mut s), vec!["late"]);
        assert!(s.is_empty());
    }

    #[test]
    fn test_cancel_is_idempotent() {
        let mut s = Scheduler::new();
        let h = s.register(Duration::from_secs(1), Repeat::Once, "x");
        assert!(s.cancel(h));
        assert!(!s.cancel(h));
        s.advance(Duration::from_secs(5));
        assert!(drain(&mut s).is_empty());
    }

    #[test]
    fn test_counted_and_periodic() {
        let mut s = Scheduler::new();
        let counted = s.register(Duration::from_secs(1), Repeat::Times(2), "counted");
        let forever = s.register(Duration::from_secs(1), Repeat::Forever, "tick");
        let mut fired = Vec::new();
        for _ in 0..4 {
            s.advance(Duration::from_secs(1));
            fired.extend(drain(&mut s));
        }
        assert_eq!(fired.iter().filter(|p| **p == "counted").count(), 2);
        assert_eq!(fired.iter().filter(|p| **p == "tick").count(), 4);
        assert!(!s.is_armed(counted));
        assert!(s.is_armed(forever));
    }

    #[test]
    fn test_periodic_catches_up_after_long_gap() {
        let mut s = Scheduler::new();
        s.register(Duration::from_secs(1), Repeat::Forever, "tick");
        s.advance(Duration::from_secs(3));
        assert_eq!(drain(&mut s).len(), 3);
    }

    #[test]
    fn test_zero_interval_periodic_fires_once() {
        let mut s = Scheduler::new();
        s.register(Duration::ZERO, Repeat::Forever, "spin");
        assert_eq!(drain(&mut s), vec!["spin"]);
        assert!(s.is_empty());
    }

    #[test]
    fn test_compaction_after_mass_cancel() {
        let mut s = Scheduler::new();
        let handles: Vec<_> = (0..10)
            .map(|_| s.register(Duration::from_secs(1), Repeat::Once, "x"))
            .collect();
        let keep = s.register(Duration::from_secs(1), Repeat::Once, "keep");
        for h in handles {
            s.cancel(h);
        }
        assert!(s.heap_len() < 11);
        assert_eq!(s.len(), 1);
        s.advance(Duration::from_secs(1));
        assert_eq!(drain(&mut s), vec!["keep"]);
        assert!(!s.is_armed(keep));
    }

    #[test]
    fn test_next_deadline_skips_cancelled() {
        let mut s = Scheduler::new();
        let start = s.now();
        let a = s.register(Duration::from_secs(1), Repeat::Once, "a");
        s.register(Duration::from_secs(3), Repeat::Once, "b");
        s.register(Duration::from_secs(5), Repeat::Once, "c");
        s.cancel(a);
        assert_eq!(s.next_deadline(), Some(start + Duration::from_secs(3)));
    }
}
