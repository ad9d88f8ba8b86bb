//! Wake-up channel between the code that stores transmissions and the
//! sender loop that drains them.

use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// Why a wait returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wake {
    /// A new record was stored.
    Stored,
    /// Stop was requested.
    Stopped,
    /// The timeout elapsed.
    TimedOut,
}

#[derive(Debug, Default)]
struct SignalState {
    stored: bool,
    stopped: bool,
}

/// Auto-reset "something was stored" flag plus a sticky stop flag.
#[derive(Debug, Default)]
pub struct StoreSignal {
    state: Mutex<SignalState>,
    cond: Condvar,
}

impl StoreSignal {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, SignalState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Record that a transmission was stored and wake an idle waiter.
    pub fn notify_stored(&self) {
        self.lock().stored = true;
        self.cond.notify_all();
    }

    /// Request stop and wake every waiter.
    pub fn stop(&self) {
        self.lock().stopped = true;
        self.cond.notify_all();
    }

    pub fn is_stopped(&self) -> bool {
        self.lock().stopped
    }

    /// Wait for a store notification or stop. Consumes the store flag.
    pub fn wait_for_store(&self, timeout: Duration) -> Wake {
        self.wait(timeout, true)
    }

    /// Wait for stop only; store notifications do not end the wait.
    pub fn wait_for_stop(&self, timeout: Duration) -> Wake {
        self.wait(timeout, false)
    }

    fn wait(&self, timeout: Duration, wake_on_store: bool) -> Wake {
        let deadline = Instant::now().checked_add(timeout);
        let mut state = self.lock();
        loop {
            if state.stopped {
                return Wake::Stopped;
            }
            if wake_on_store && state.stored {
                state.stored = false;
                return Wake::Stored;
            }

            let remaining = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Wake::TimedOut;
                    }
                    deadline - now
                }
                // Overflowing deadline: wait in long slices.
                None => Duration::from_secs(3600),
            };

            state = match self.cond.wait_timeout(state, remaining) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
    }
}
