//! Wait conditions for readiness polling.
//!
//! Backends that can report "not ready" hand out a [`WaitCondition`] that
//! they signal when readiness may have changed. Waiters re-check readiness
//! after waking; a wakeup is a hint, not a guarantee.

use std::time::Duration;

use parking_lot::{Condvar, Mutex};

/// A broadcast condition with a generation counter.
#[derive(Debug, Default)]
pub struct WaitCondition {
    generation: Mutex<u64>,
    cond: Condvar,
}

impl WaitCondition {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wake every waiter.
    pub fn signal_all(&self) {
        let mut generation = self.generation.lock();
        *generation = generation.wrapping_add(1);
        self.cond.notify_all();
    }

    /// Block until the next [`signal_all`](Self::signal_all).
    pub fn wait(&self) {
        let mut generation = self.generation.lock();
        let start = *generation;
        while *generation == start {
            self.cond.wait(&mut generation);
        }
    }

    /// Block until signalled or until `timeout` elapses. Returns `true` if
    /// signalled.
    pub fn wait_for(&self, timeout: Duration) -> bool {
        let mut generation = self.generation.lock();
        let start = *generation;
        while *generation == start {
            if self.cond.wait_for(&mut generation, timeout).timed_out() {
                return *generation != start;
            }
        }
        true
    }
}
