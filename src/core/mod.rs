//! Core playback modules - display, media, cache, engine
//!
//! Nothing here knows about the CLI or config files; `main` wires it together.

pub mod display;
pub mod drivers;
pub mod error;
pub mod frame_cache;
pub mod frame_source;
pub mod overlay;
pub mod player;
pub mod playlist;
pub mod runner;
pub mod signal;
pub mod telemetry;

#[cfg(test)]
mod player_tests;
#[cfg(test)]
mod testing;

// Re-exports for convenience
pub use display::{DisplayDriver, DisplayPort, RecoveryPolicy};
pub use error::{DisplayError, EngineError, FrameSourceError, StoreError};
pub use frame_cache::{CacheStats, FrameCache};
pub use frame_source::{DiskLoader, FrameSource, SourceLoader};
pub use overlay::{JobBoard, JobMonitor};
pub use player::{EngineSettings, LoopMode, PlaybackEngine};
pub use playlist::{JsonPlaylistStore, PlaylistStore};
pub use runner::EngineHandle;
pub use telemetry::{MemoryTelemetry, SystemMemory};
