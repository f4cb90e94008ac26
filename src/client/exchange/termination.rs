use std::fmt;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

/// A counting barrier which releases once every expected signal has arrived.
///
/// Extra signals after release are ignored.
pub(super) struct Termination {
    remaining: Mutex<usize>,
    released: Condvar,
}

impl Termination {
    pub(super) fn new(signals: usize) -> Self {
        Self {
            remaining: Mutex::new(signals),
            released: Condvar::new(),
        }
    }

    pub(super) fn signal(&self) {
        let mut remaining = self.remaining.lock();
        if *remaining > 0 {
            *remaining -= 1;
            self.released.notify_all();
        }
    }

    pub(super) fn is_released(&self) -> bool {
        *self.remaining.lock() == 0
    }

    pub(super) fn wait(&self) {
        let mut remaining = self.remaining.lock();
        while *remaining > 0 {
            self.released.wait(&mut remaining);
        }
    }

    /// Wait at most `timeout`, returning `true` if the barrier released.
    pub(super) fn wait_for(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut remaining = self.remaining.lock();
        while *remaining > 0 {
            if self.released.wait_until(&mut remaining, deadline).timed_out() {
                return *remaining == 0;
            }
        }
        true
    }
}

impl fmt::Debug for Termination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Termination")
            .field("remaining", &*self.remaining.lock())
            .finish()
    }
}
