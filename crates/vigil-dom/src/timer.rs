//! Timer queue
//!
//! Logical single-threaded clock. Callbacks run when the embedder advances
//! time, in due-then-registration order; a callback may schedule or clear
//! other timers.

use std::cell::RefCell;

/// Timer handle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerId(u64);

struct TimerEntry {
    id: TimerId,
    due: u64,
    callback: Box<dyn FnOnce()>,
}

/// Timeout queue over a logical millisecond clock
#[derive(Default)]
pub struct TimerQueue {
    inner: RefCell<TimerState>,
}

#[derive(Default)]
struct TimerState {
    now: u64,
    next_id: u64,
    entries: Vec<TimerEntry>,
}

impl TimerQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current logical time in milliseconds
    pub fn now(&self) -> u64 {
        self.inner.borrow().now
    }

    /// Schedule `callback` to run `delay_ms` from now
    pub fn set_timeout(&self, delay_ms: u64, callback: Box<dyn FnOnce()>) -> TimerId {
        let mut inner = self.inner.borrow_mut();
        let id = TimerId(inner.next_id);
        inner.next_id += 1;
        let due = inner.now + delay_ms;
        inner.entries.push(TimerEntry { id, due, callback });
        id
    }

    /// Cancel a pending timer. Returns false if it already fired or was
    /// cleared.
    pub fn clear_timeout(&self, id: TimerId) -> bool {
        let mut inner = self.inner.borrow_mut();
        let before = inner.entries.len();
        inner.entries.retain(|e| e.id != id);
        before != inner.entries.len()
    }

    /// Number of pending timers
    pub fn pending(&self) -> usize {
        self.inner.borrow().entries.len()
    }

    /// Advance the clock, firing everything that comes due. Entries
    /// scheduled by callbacks fire too if they fall within the window.
    pub fn advance(&self, dt_ms: u64) {
        let target = self.inner.borrow().now + dt_ms;
        loop {
            let next = {
                let mut inner = self.inner.borrow_mut();
                // earliest due entry within the window; ties break on
                // registration order (TimerId is monotonic)
                let next_idx = inner
                    .entries
                    .iter()
                    .enumerate()
                    .filter(|(_, e)| e.due <= target)
                    .min_by_key(|(_, e)| (e.due, e.id.0))
                    .map(|(i, _)| i);
                match next_idx {
                    Some(i) => {
                        let entry = inner.entries.remove(i);
                        inner.now = inner.now.max(entry.due);
                        Some(entry.callback)
                    }
                    None => {
                        inner.now = target;
                        None
                    }
                }
            };
            match next {
                Some(callback) => callback(),
                None => break,
            }
        }
    }
}
