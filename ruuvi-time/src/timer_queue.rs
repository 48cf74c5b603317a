//! A deadline ordered timer queue for the cooperative scheduler.

use core::cmp::Ordering;

use heapless::Vec;

use crate::{Instant, Ticks};

/// Identifies one armed entry in a [`TimerQueue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub struct TimerKey(u32);

/// A deadline and what to do when it passes.
#[derive(Debug)]
pub struct TimerEntry<T> {
    /// When the entry becomes due.
    pub deadline: Instant,
    /// The key returned by [`TimerQueue::insert`].
    pub key: TimerKey,
    /// The payload, for the scheduler a task id or a waker.
    pub value: T,
}

/// A fixed capacity queue of timer entries.
///
/// Entries are kept sorted by deadline, ascending, using the wraparound-safe comparison of
/// [`Ticks`]. Entries with equal deadlines keep their insertion order, so they expire FIFO.
///
/// There is no dynamic growth: [`insert`](TimerQueue::insert) hands the value back when all `N`
/// slots are taken and the caller decides how fatal that is.
pub struct TimerQueue<T, const N: usize> {
    entries: Vec<TimerEntry<T>, N>,
    next_key: u32,
}

impl<T, const N: usize> Default for TimerQueue<T, N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, const N: usize> TimerQueue<T, N> {
    /// Make a new queue.
    pub const fn new() -> Self {
        Self {
            entries: Vec::new(),
            next_key: 0,
        }
    }

    /// Insert a new entry, returns its key or the value if the queue is full.
    pub fn insert(&mut self, deadline: Instant, value: T) -> Result<TimerKey, T> {
        if self.entries.is_full() {
            return Err(value);
        }

        let key = TimerKey(self.next_key);
        self.next_key = self.next_key.wrapping_add(1);

        // Goes in front of the first entry that is strictly later, after any equal ones.
        let index = self
            .entries
            .iter()
            .position(|e| deadline.ticks().compare(e.deadline.ticks()) == Ordering::Less)
            .unwrap_or(self.entries.len());

        let entry = TimerEntry {
            deadline,
            key,
            value,
        };
        match self.entries.insert(index, entry) {
            Ok(()) => Ok(key),
            Err(entry) => Err(entry.value),
        }
    }

    /// The deadline of the head of the queue.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.entries.first().map(|e| e.deadline)
    }

    /// Pop the head of the queue if its deadline is at or before `now`.
    pub fn pop_expired(&mut self, now: Instant) -> Option<TimerEntry<T>> {
        let head = self.entries.first()?;
        if now.ticks().is_at_least(head.deadline.ticks()) {
            Some(self.entries.remove(0))
        } else {
            None
        }
    }

    /// Remove the entry with `key`, if it is still queued.
    pub fn remove(&mut self, key: TimerKey) -> Option<TimerEntry<T>> {
        let index = self.entries.iter().position(|e| e.key == key)?;
        Some(self.entries.remove(index))
    }

    /// Keep only the entries for which `f` returns true, preserving order.
    pub fn retain<F: FnMut(&TimerEntry<T>) -> bool>(&mut self, f: F) {
        self.entries.retain(f);
    }

    /// True if the entry with `key` has neither expired nor been removed.
    pub fn contains(&self, key: TimerKey) -> bool {
        self.entries.iter().any(|e| e.key == key)
    }

    /// Mutable access to the payload of a queued entry.
    pub fn get_mut(&mut self, key: TimerKey) -> Option<&mut T> {
        self.entries
            .iter_mut()
            .find(|e| e.key == key)
            .map(|e| &mut e.value)
    }

    /// Iterate over the entries in expiry order.
    pub fn iter(&self) -> impl Iterator<Item = &TimerEntry<T>> {
        self.entries.iter()
    }

    /// Number of armed entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if nothing is armed.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// True if another insert would fail.
    pub fn is_full(&self) -> bool {
        self.entries.is_full()
    }
}
