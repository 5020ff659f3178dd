//! Player configuration: JSON file + CLI overrides
//!
//! Every field has a default so a missing or partial `loopdeck.json` still
//! yields a complete config. `sanitized()` applies the floors for rates,
//! repeat counts and limits before anything reaches the engine.

use anyhow::{Context, Result};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::core::display::RecoveryPolicy;
use crate::core::frame_source::FrameLayout;
use crate::core::player::{DEFAULT_FRAME_RATE, EngineSettings, LoopMode, frame_interval};
use crate::core::telemetry::MemoryThresholds;

pub use crate::paths::{PathConfig, config_file, data_dir, data_file, ensure_dirs};

/// Config file name inside the config dir
pub const CONFIG_FILE: &str = "loopdeck.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerConfig {
    pub width: usize,
    pub height: usize,
    pub frame_rate: f32,
    pub loop_mode: LoopMode,
    /// Default repeat count; media descriptors may override it
    pub repeat_count: i32,
    pub auto_advance: bool,
    /// How long a single-frame media stays up per pass
    pub static_hold_secs: u64,

    pub cache_base_frames: usize,
    pub cache_max_frames: usize,

    pub max_consecutive_failures: u32,
    pub max_recovery_attempts: u32,
    pub recovery_delay_ms: u64,
    pub init_retry_delay_ms: u64,

    pub overlay_poll_ms: u64,
    pub error_backoff_ms: u64,
    pub idle_poll_ms: u64,

    pub low_memory_mb: u64,
    pub preload_min_mb: u64,
    pub comfortable_memory_mb: u64,

    /// Root of `<slug>/` media directories; relative to the data dir if relative
    pub media_dir: PathBuf,
    /// Media index JSON; relative to the data dir if relative
    pub index_file: PathBuf,
    pub packed_file_name: String,
    pub legacy_frame_dir: String,
    pub legacy_frame_ext: String,

    /// Framebuffer device; `None` runs without display output
    pub framebuffer: Option<PathBuf>,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        let layout = FrameLayout::default();
        let thresholds = MemoryThresholds::default();
        Self {
            width: 320,
            height: 240,
            frame_rate: DEFAULT_FRAME_RATE,
            loop_mode: LoopMode::All,
            repeat_count: 1,
            auto_advance: true,
            static_hold_secs: 10,
            cache_base_frames: 8,
            cache_max_frames: 48,
            max_consecutive_failures: 5,
            max_recovery_attempts: 3,
            recovery_delay_ms: 500,
            init_retry_delay_ms: 2000,
            overlay_poll_ms: 100,
            error_backoff_ms: 1000,
            idle_poll_ms: 1000,
            low_memory_mb: thresholds.low_mb,
            preload_min_mb: thresholds.preload_min_mb,
            comfortable_memory_mb: thresholds.comfortable_mb,
            media_dir: PathBuf::from("media"),
            index_file: PathBuf::from("media_index.json"),
            packed_file_name: layout.packed_file_name,
            legacy_frame_dir: layout.legacy_frame_dir,
            legacy_frame_ext: layout.legacy_frame_ext,
            framebuffer: None,
        }
    }
}

impl PlayerConfig {
    /// Load from `path`; a missing file yields defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config: {}", path.display()))?;
        let config: Self = serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse config: {}", path.display()))?;
        info!("Config loaded from {}", path.display());
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write config: {}", path.display()))?;
        Ok(())
    }

    /// Copy with every value inside its valid range.
    pub fn sanitized(&self) -> Self {
        let mut c = self.clone();
        if !c.frame_rate.is_finite() || c.frame_rate <= 0.0 {
            warn!(
                "Invalid frame rate {}, using {}",
                c.frame_rate, DEFAULT_FRAME_RATE
            );
            c.frame_rate = DEFAULT_FRAME_RATE;
        }
        if c.width == 0 || c.height == 0 {
            warn!("Invalid display size {}x{}, using 320x240", c.width, c.height);
            c.width = 320;
            c.height = 240;
        }
        c.cache_max_frames = c.cache_max_frames.max(1);
        c.cache_base_frames = c.cache_base_frames.clamp(1, c.cache_max_frames);
        c.max_consecutive_failures = c.max_consecutive_failures.max(1);
        c.max_recovery_attempts = c.max_recovery_attempts.max(1);
        c.overlay_poll_ms = c.overlay_poll_ms.max(1);
        c.idle_poll_ms = c.idle_poll_ms.max(1);
        if c.comfortable_memory_mb < c.low_memory_mb {
            c.comfortable_memory_mb = c.low_memory_mb;
        }
        c
    }

    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            frame_rate: self.frame_rate,
            frame_interval: frame_interval(self.frame_rate),
            loop_mode: self.loop_mode,
            repeat_count: self.repeat_count,
            auto_advance: self.auto_advance,
            static_hold: Duration::from_secs(self.static_hold_secs),
            cache_base_frames: self.cache_base_frames,
            cache_max_frames: self.cache_max_frames,
            overlay_poll: Duration::from_millis(self.overlay_poll_ms),
            error_backoff: Duration::from_millis(self.error_backoff_ms),
            idle_poll: Duration::from_millis(self.idle_poll_ms),
        }
    }

    pub fn recovery_policy(&self) -> RecoveryPolicy {
        RecoveryPolicy {
            max_consecutive_failures: self.max_consecutive_failures,
            max_recovery_attempts: self.max_recovery_attempts,
            recovery_delay: Duration::from_millis(self.recovery_delay_ms),
            init_retry_delay: Duration::from_millis(self.init_retry_delay_ms),
            ..Default::default()
        }
    }

    pub fn memory_thresholds(&self) -> MemoryThresholds {
        MemoryThresholds {
            low_mb: self.low_memory_mb,
            preload_min_mb: self.preload_min_mb,
            comfortable_mb: self.comfortable_memory_mb,
        }
    }

    pub fn frame_layout(&self) -> FrameLayout {
        FrameLayout {
            packed_file_name: self.packed_file_name.clone(),
            legacy_frame_dir: self.legacy_frame_dir.clone(),
            legacy_frame_ext: self.legacy_frame_ext.clone(),
        }
    }

    /// `media_dir` resolved against `base` when relative
    pub fn media_dir_in(&self, base: &Path) -> PathBuf {
        resolve(base, &self.media_dir)
    }

    /// `index_file` resolved against `base` when relative
    pub fn index_file_in(&self, base: &Path) -> PathBuf {
        resolve(base, &self.index_file)
    }
}

fn resolve(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}
