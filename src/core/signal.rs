//! Cancellable timed wait for the tick loop.
//!
//! Pacing sleeps, the pause block, error backoff and recovery delays all wait
//! on one `Waker`. Any command (resume, next, stop...) calls `notify()` so the
//! waiting thread re-evaluates state immediately instead of finishing a stale
//! sleep.

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, bounded};
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct Waker {
    tx: Sender<()>,
    rx: Receiver<()>,
}

impl Default for Waker {
    fn default() -> Self {
        Self::new()
    }
}

impl Waker {
    pub fn new() -> Self {
        // One pending token is enough: waiters re-check state after waking
        let (tx, rx) = bounded(1);
        Self { tx, rx }
    }

    /// Wake the waiting thread, or make its next wait return at once.
    pub fn notify(&self) {
        let _ = self.tx.try_send(());
    }

    /// Block up to `timeout`. Returns true if woken by `notify()`.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        if timeout.is_zero() {
            return self.rx.try_recv().is_ok();
        }
        match self.rx.recv_timeout(timeout) {
            Ok(()) => true,
            Err(RecvTimeoutError::Timeout) => false,
            Err(RecvTimeoutError::Disconnected) => true,
        }
    }

    /// Sleep the full `duration` unless `keep_waiting` turns false after a wake.
    ///
    /// Returns false if the wait was cut short.
    pub fn sleep_while(&self, duration: Duration, keep_waiting: impl Fn() -> bool) -> bool {
        let deadline = Instant::now() + duration;
        loop {
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            if self.wait_timeout(deadline - now) && !keep_waiting() {
                return false;
            }
        }
    }
}
