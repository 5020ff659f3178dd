//! Memory telemetry that sizes the frame cache
//!
//! **Why**: the board has a few hundred MB of RAM shared with the web API and
//! conversion jobs. Cache capacity follows available memory instead of a fixed
//! number, shrinking under pressure and growing back when it subsides.
//!
//! **Used by**: FrameCache (capacity on every insert), PlaybackEngine (preload policy)

use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use sysinfo::System;

const MB: u64 = 1024 * 1024;

/// Source of memory pressure readings.
pub trait MemoryTelemetry: Send + Sync {
    /// Available memory is below the low-water mark
    fn is_low_memory(&self) -> bool;

    /// Cache capacity (in frames) for the current pressure, within `1..=max`
    fn suggest_cache_size(&self, base: usize, max: usize) -> usize;

    /// Enough headroom to decode frames ahead of the playhead
    fn should_preload(&self) -> bool;
}

/// Pressure thresholds in megabytes of available memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryThresholds {
    /// Below this the system is under pressure
    pub low_mb: u64,
    /// Preloading needs at least this much
    pub preload_min_mb: u64,
    /// At or above this the cache may use its maximum size
    pub comfortable_mb: u64,
}

impl Default for MemoryThresholds {
    fn default() -> Self {
        Self {
            low_mb: 48,
            preload_min_mb: 96,
            comfortable_mb: 256,
        }
    }
}

impl MemoryThresholds {
    pub fn is_low(&self, available_mb: u64) -> bool {
        available_mb < self.low_mb
    }

    pub fn should_preload(&self, available_mb: u64) -> bool {
        available_mb >= self.preload_min_mb
    }

    /// Capacity policy shared by every telemetry implementation.
    ///
    /// Low memory halves `base`; between low and comfortable the size scales
    /// linearly from `base` to `max`; comfortable gets `max`.
    pub fn suggest(&self, available_mb: u64, base: usize, max: usize) -> usize {
        let max = max.max(1);
        let base = base.clamp(1, max);

        if self.is_low(available_mb) {
            return (base / 2).max(1);
        }
        if available_mb >= self.comfortable_mb || self.comfortable_mb <= self.low_mb {
            return max;
        }

        let span = (self.comfortable_mb - self.low_mb) as f64;
        let t = (available_mb - self.low_mb) as f64 / span;
        base + ((max - base) as f64 * t) as usize
    }
}

/// Live readings from the OS via sysinfo.
///
/// Readings are refreshed at most once per `refresh_interval`; the tick loop
/// asks several times per frame.
#[derive(Debug)]
pub struct SystemMemory {
    thresholds: MemoryThresholds,
    refresh_interval: Duration,
    state: Mutex<Reading>,
}

#[derive(Debug)]
struct Reading {
    sys: System,
    available_mb: u64,
    taken_at: Option<Instant>,
}

impl SystemMemory {
    pub fn new(thresholds: MemoryThresholds) -> Self {
        let mut sys = System::new();
        sys.refresh_memory();
        let available_mb = sys.available_memory() / MB;

        info!(
            "Memory telemetry: available={} MB, total={} MB, low<{} MB, preload>={} MB",
            available_mb,
            sys.total_memory() / MB,
            thresholds.low_mb,
            thresholds.preload_min_mb
        );

        Self {
            thresholds,
            refresh_interval: Duration::from_millis(500),
            state: Mutex::new(Reading {
                sys,
                available_mb,
                taken_at: Some(Instant::now()),
            }),
        }
    }

    /// Current available memory in MB (possibly cached for `refresh_interval`)
    pub fn available_mb(&self) -> u64 {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let stale = state
            .taken_at
            .is_none_or(|t| t.elapsed() >= self.refresh_interval);
        if stale {
            state.sys.refresh_memory();
            let available_mb = state.sys.available_memory() / MB;
            if self.thresholds.is_low(available_mb) && !self.thresholds.is_low(state.available_mb) {
                debug!("Memory pressure: {} MB available", available_mb);
            }
            state.available_mb = available_mb;
            state.taken_at = Some(Instant::now());
        }
        state.available_mb
    }
}

impl MemoryTelemetry for SystemMemory {
    fn is_low_memory(&self) -> bool {
        self.thresholds.is_low(self.available_mb())
    }

    fn suggest_cache_size(&self, base: usize, max: usize) -> usize {
        self.thresholds.suggest(self.available_mb(), base, max)
    }

    fn should_preload(&self) -> bool {
        self.thresholds.should_preload(self.available_mb())
    }
}

/// Telemetry with a settable reading. For tests and boards without /proc.
#[derive(Debug)]
pub struct FixedMemory {
    thresholds: MemoryThresholds,
    available_mb: AtomicU64,
}

impl FixedMemory {
    pub fn new(available_mb: u64, thresholds: MemoryThresholds) -> Self {
        Self {
            thresholds,
            available_mb: AtomicU64::new(available_mb),
        }
    }

    /// Plenty of memory under default thresholds
    pub fn plenty() -> Self {
        Self::new(1024, MemoryThresholds::default())
    }

    pub fn set_available_mb(&self, mb: u64) {
        self.available_mb.store(mb, Ordering::Relaxed);
    }

    fn current(&self) -> u64 {
        self.available_mb.load(Ordering::Relaxed)
    }
}

impl MemoryTelemetry for FixedMemory {
    fn is_low_memory(&self) -> bool {
        self.thresholds.is_low(self.current())
    }

    fn suggest_cache_size(&self, base: usize, max: usize) -> usize {
        self.thresholds.suggest(self.current(), base, max)
    }

    fn should_preload(&self) -> bool {
        self.thresholds.should_preload(self.current())
    }
}
