//! Completion scheduler.
//!
//! A min-heap of due instants owned by the session actor. Cancelling a timer
//! marks it dead and the heap skips it on the way out, so an aborted
//! execution can never fire after teardown.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashSet};

use tokio::time::Instant;

/// Handle returned by [`Scheduler::schedule`], used to cancel a timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(u64);

#[derive(Debug, PartialEq, Eq, PartialOrd, Ord)]
struct Entry<K: Ord> {
    due: Instant,
    id: TimerId,
    key: K,
}

/// Min-heap of keyed timers with lazy cancellation.
#[derive(Debug)]
pub struct Scheduler<K: Ord> {
    heap: BinaryHeap<Reverse<Entry<K>>>,
    cancelled: HashSet<TimerId>,
    next_id: u64,
}

impl<K: Ord> Default for Scheduler<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Ord> Scheduler<K> {
    /// Creates an empty scheduler.
    #[must_use]
    pub fn new() -> Self {
        Self {
            heap: BinaryHeap::new(),
            cancelled: HashSet::new(),
            next_id: 0,
        }
    }

    /// Schedules `key` to fire at `due`.
    pub fn schedule(&mut self, due: Instant, key: K) -> TimerId {
        let id = TimerId(self.next_id);
        self.next_id += 1;
        self.heap.push(Reverse(Entry { due, id, key }));
        id
    }

    /// Cancels a pending timer. Returns `false` if it already fired or was cancelled.
    pub fn cancel(&mut self, id: TimerId) -> bool {
        let pending = self.heap.iter().any(|Reverse(e)| e.id == id);
        pending && self.cancelled.insert(id)
    }

    /// Earliest due instant among live timers.
    pub fn next_due(&mut self) -> Option<Instant> {
        self.discard_cancelled_head();
        self.heap.peek().map(|Reverse(e)| e.due)
    }

    /// Removes and returns every live timer due at or before `now`, earliest first.
    pub fn pop_due(&mut self, now: Instant) -> Vec<K> {
        let mut fired = Vec::new();
        loop {
            self.discard_cancelled_head();
            match self.heap.peek() {
                Some(Reverse(e)) if e.due <= now => {}
                _ => break,
            }
            if let Some(Reverse(entry)) = self.heap.pop() {
                fired.push(entry.key);
            }
        }
        fired
    }

    /// Drops every timer.
    pub fn clear(&mut self) {
        self.heap.clear();
        self.cancelled.clear();
    }

    /// Number of live timers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.heap.len() - self.cancelled.len()
    }

    /// Whether no live timers remain.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn discard_cancelled_head(&mut self) {
        while let Some(Reverse(head)) = self.heap.peek() {
            if !self.cancelled.remove(&head.id) {
                break;
            }
            self.heap.pop();
        }
    }
}
