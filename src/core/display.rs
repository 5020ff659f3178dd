//! Hardware write path with bounded failure recovery
//!
//! **Why**: the display sits on a flaky SPI/framebuffer link and nobody is
//! around to power-cycle it. Write failures are counted, a bounded number of
//! recovery sequences is tried, and after that the device runs headless: the
//! engine keeps advancing playback and answering status, it just stops
//! touching the hardware.
//!
//! # Protocol
//!
//! - Every failed write bumps `consecutive_failures`; a good write resets it.
//! - Reaching `max_consecutive_failures` runs one recovery sequence if
//!   attempts remain: cleanup (errors ignored) → delay → init → solid test frame.
//! - Recovery success resets both counters. After `max_recovery_attempts`
//!   failed sequences `available` goes false for the rest of the process.
//! - Startup: init → delayed retry → reset + init → minimal init → headless.

use log::{debug, error, info, warn};
use serde::Serialize;
use std::time::Duration;

use super::error::DisplayError;

/// Bytes per pixel (RGB565)
pub const BYTES_PER_PIXEL: usize = 2;

/// Driver for one physical display.
///
/// The caller guarantees `write_frame` receives exactly
/// `width * height * BYTES_PER_PIXEL` bytes.
pub trait DisplayDriver: Send {
    fn init(&mut self) -> Result<(), DisplayError>;

    fn write_frame(&mut self, frame: &[u8]) -> Result<(), DisplayError>;

    fn cleanup(&mut self) -> Result<(), DisplayError>;

    /// Hardware reset sequence, if the driver has one
    fn reset(&mut self) -> Result<(), DisplayError> {
        Err(DisplayError::Unsupported("reset"))
    }

    /// Bare-minimum bring-up used as the last startup fallback
    fn minimal_init(&mut self) -> Result<(), DisplayError> {
        Err(DisplayError::Unsupported("minimal_init"))
    }

    fn is_initialized(&self) -> bool;

    fn name(&self) -> &str {
        "display"
    }
}

/// Limits and delays for the failure/recovery protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecoveryPolicy {
    pub max_consecutive_failures: u32,
    pub max_recovery_attempts: u32,
    /// Settle time between cleanup and re-init
    pub recovery_delay: Duration,
    /// Wait before the second startup init attempt
    pub init_retry_delay: Duration,
    /// RGB565 color of the recovery test frame
    pub test_color: u16,
}

impl Default for RecoveryPolicy {
    fn default() -> Self {
        Self {
            max_consecutive_failures: 5,
            max_recovery_attempts: 3,
            recovery_delay: Duration::from_millis(500),
            init_retry_delay: Duration::from_secs(2),
            test_color: 0x0000,
        }
    }
}

/// Hardware reliability state, reported in status.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DisplayHealth {
    pub consecutive_failures: u32,
    pub recovery_attempts: u32,
    pub available: bool,
    pub total_failures: u64,
    pub recoveries: u64,
}

/// Result of one frame write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// Frame reached the hardware
    Written,
    /// Hardware write failed; retry the same frame
    Failed,
    /// Headless mode; nothing was written but playback may advance
    Headless,
    /// Buffer has the wrong size and was never sent
    Rejected,
}

/// Single owner of the hardware write path.
pub struct DisplayPort {
    driver: Box<dyn DisplayDriver>,
    policy: RecoveryPolicy,
    health: DisplayHealth,
    width: usize,
    height: usize,
}

impl std::fmt::Debug for DisplayPort {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DisplayPort")
            .field("driver", &self.driver.name())
            .field("width", &self.width)
            .field("height", &self.height)
            .field("health", &self.health)
            .finish()
    }
}

impl DisplayPort {
    /// Wrap a driver. The port is unavailable until `start()` succeeds.
    pub fn new(driver: Box<dyn DisplayDriver>, policy: RecoveryPolicy, width: usize, height: usize) -> Self {
        Self {
            driver,
            policy,
            health: DisplayHealth::default(),
            width,
            height,
        }
    }

    /// Expected frame buffer size in bytes
    pub fn frame_size(&self) -> usize {
        self.width * self.height * BYTES_PER_PIXEL
    }

    pub fn dimensions(&self) -> (usize, usize) {
        (self.width, self.height)
    }

    pub fn health(&self) -> &DisplayHealth {
        &self.health
    }

    pub fn is_available(&self) -> bool {
        self.health.available
    }

    /// Bring the display up through the startup fallback chain.
    ///
    /// `pause` performs the delays; the engine passes an interruptible wait.
    /// Returns false if the chain ends in headless mode.
    pub fn start(&mut self, pause: &dyn Fn(Duration)) -> bool {
        let name = self.driver.name().to_string();

        match self.driver.init() {
            Ok(()) => return self.mark_started(&name, "init"),
            Err(e) => warn!("Display '{}' init failed: {}", name, e),
        }

        pause(self.policy.init_retry_delay);
        match self.driver.init() {
            Ok(()) => return self.mark_started(&name, "delayed retry"),
            Err(e) => warn!("Display '{}' delayed init failed: {}", name, e),
        }

        match self.driver.reset().and_then(|()| self.driver.init()) {
            Ok(()) => return self.mark_started(&name, "reset sequence"),
            Err(e) => warn!("Display '{}' reset sequence failed: {}", name, e),
        }

        match self.driver.minimal_init() {
            Ok(()) => return self.mark_started(&name, "minimal init"),
            Err(e) => warn!("Display '{}' minimal init failed: {}", name, e),
        }

        error!("Display '{}' unavailable at startup, running headless", name);
        self.health.available = false;
        false
    }

    fn mark_started(&mut self, name: &str, via: &str) -> bool {
        info!(
            "Display '{}' ready via {} ({}x{})",
            name, via, self.width, self.height
        );
        self.health.available = true;
        self.health.consecutive_failures = 0;
        self.health.recovery_attempts = 0;
        true
    }

    /// Give up on the hardware for the rest of the process
    pub fn go_headless(&mut self) {
        if self.health.available {
            warn!("Display '{}' switched to headless mode", self.driver.name());
        }
        self.health.available = false;
    }

    /// Write one frame, running the recovery protocol on repeated failure.
    pub fn write(&mut self, frame: &[u8], pause: &dyn Fn(Duration)) -> WriteOutcome {
        let expected = self.frame_size();
        if frame.len() != expected {
            warn!(
                "Refusing frame of {} bytes (display expects {})",
                frame.len(),
                expected
            );
            return WriteOutcome::Rejected;
        }
        if !self.health.available {
            return WriteOutcome::Headless;
        }

        match self.driver.write_frame(frame) {
            Ok(()) => {
                if self.health.consecutive_failures > 0 {
                    debug!(
                        "Display write recovered after {} failures",
                        self.health.consecutive_failures
                    );
                }
                self.health.consecutive_failures = 0;
                WriteOutcome::Written
            }
            Err(e) => {
                self.health.consecutive_failures += 1;
                self.health.total_failures += 1;
                warn!(
                    "Display write failed ({}/{}): {}",
                    self.health.consecutive_failures, self.policy.max_consecutive_failures, e
                );
                if self.health.consecutive_failures >= self.policy.max_consecutive_failures {
                    self.recover(pause);
                }
                WriteOutcome::Failed
            }
        }
    }

    /// One recovery sequence: cleanup → delay → init → test frame.
    fn recover(&mut self, pause: &dyn Fn(Duration)) -> bool {
        if self.health.recovery_attempts >= self.policy.max_recovery_attempts {
            self.go_headless();
            return false;
        }
        self.health.recovery_attempts += 1;
        self.health.consecutive_failures = 0;
        info!(
            "Display recovery attempt {}/{}",
            self.health.recovery_attempts, self.policy.max_recovery_attempts
        );

        if let Err(e) = self.driver.cleanup() {
            debug!("Cleanup before recovery failed (ignored): {}", e);
        }
        pause(self.policy.recovery_delay);

        let test_frame = solid_frame(self.frame_size(), self.policy.test_color);
        let result = self
            .driver
            .init()
            .and_then(|()| self.driver.write_frame(&test_frame));

        match result {
            Ok(()) => {
                info!("Display recovered");
                self.health.recovery_attempts = 0;
                self.health.recoveries += 1;
                self.health.available = true;
                true
            }
            Err(e) => {
                warn!("Display recovery attempt failed: {}", e);
                if self.health.recovery_attempts >= self.policy.max_recovery_attempts {
                    error!(
                        "Display recovery exhausted after {} attempts, running headless",
                        self.health.recovery_attempts
                    );
                    self.health.available = false;
                }
                false
            }
        }
    }

    /// Release the hardware at shutdown
    pub fn shutdown(&mut self) {
        if self.driver.is_initialized()
            && let Err(e) = self.driver.cleanup()
        {
            warn!("Display cleanup failed: {}", e);
        }
    }
}

/// Frame filled with one RGB565 color (big-endian, as SPI panels expect)
pub fn solid_frame(size: usize, color: u16) -> Vec<u8> {
    let [hi, lo] = color.to_be_bytes();
    let mut frame = Vec::with_capacity(size);
    for i in 0..size {
        frame.push(if i % 2 == 0 { hi } else { lo });
    }
    frame
}
