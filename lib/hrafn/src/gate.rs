use std::sync::{Condvar, Mutex};

/// Single-writer, many-reader readiness signal: a monotone fill counter
/// with a blocking wait. The index builder publishes how many entries are
/// ready; sort leaves wait for their range before touching it.
#[derive(Default)]
pub struct ProgressGate {
    filled: Mutex<usize>,
    ready: Condvar,
}

impl ProgressGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Callers reset only between runs, never while readers are waiting.
    pub fn reset(&self) {
        *self.filled.lock().unwrap() = 0;
    }

    /// Monotone: never lowers the counter. Wakes all waiters.
    pub fn publish(&self, filled_now: usize) {
        {
            let mut filled = self.filled.lock().unwrap();
            if filled_now > *filled {
                *filled = filled_now;
            }
        }
        self.ready.notify_all();
    }

    /// Blocks until at least `need` entries have been published. Spurious
    /// wakeups are filtered by the predicate loop.
    pub fn wait_until(&self, need: usize) {
        let mut filled = self.filled.lock().unwrap();
        while *filled < need {
            filled = self.ready.wait(filled).unwrap();
        }
    }

    pub fn filled(&self) -> usize {
        *self.filled.lock().unwrap()
    }
}
