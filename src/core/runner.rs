//! Dedicated playback thread with deterministic shutdown.
//!
//! The engine ticks on its own named thread. `stop()` clears the running flag,
//! wakes any wait the loop is blocked in, and joins with a deadline; a thread
//! that misses the deadline is logged and left to die with the process.

use log::{info, trace, warn};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use super::player::PlaybackEngine;

/// Join deadline used by `stop()` and `Drop`
pub const STOP_TIMEOUT: Duration = Duration::from_secs(5);

pub struct EngineHandle {
    engine: Arc<PlaybackEngine>,
    handle: Option<thread::JoinHandle<()>>,
}

impl EngineHandle {
    /// Bring the display up and start ticking on a new thread.
    pub fn spawn(engine: Arc<PlaybackEngine>) -> std::io::Result<Self> {
        let worker = Arc::clone(&engine);
        let handle = thread::Builder::new()
            .name("loopdeck-engine".into())
            .spawn(move || {
                if !worker.start_display() {
                    warn!("No display output, playback continues headless");
                }
                worker.run();
            })?;
        info!("Playback thread started");
        Ok(Self {
            engine,
            handle: Some(handle),
        })
    }

    pub fn engine(&self) -> &Arc<PlaybackEngine> {
        &self.engine
    }

    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().is_none_or(|h| h.is_finished())
    }

    /// Stop the loop and wait up to `STOP_TIMEOUT`. Returns true if the thread
    /// exited in time.
    pub fn stop(&mut self) -> bool {
        self.stop_within(STOP_TIMEOUT)
    }

    pub fn stop_within(&mut self, timeout: Duration) -> bool {
        let Some(handle) = self.handle.take() else {
            return true;
        };
        trace!("Stopping playback thread...");
        self.engine.stop();

        let deadline = Instant::now() + timeout;
        while !handle.is_finished() {
            if Instant::now() >= deadline {
                warn!(
                    "Playback thread did not stop within {:?}, leaving it behind",
                    timeout
                );
                return false;
            }
            thread::sleep(Duration::from_millis(5));
        }
        if handle.join().is_err() {
            warn!("Playback thread panicked during shutdown");
        }
        info!("Playback thread stopped");
        true
    }
}

impl Drop for EngineHandle {
    fn drop(&mut self) {
        self.stop();
    }
}
