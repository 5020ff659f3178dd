//! LOOPDECK - looping frame player for small attached displays
//!
//! Re-exports all modules for use by the binary target.

// Core engine (frame sources, cache, display, playlist, player)
pub mod core;

// App modules
pub mod cli;
pub mod config;
pub mod paths;
pub mod shutdown;

// Re-export commonly used types from core
pub use crate::core::display::{DisplayDriver, DisplayPort};
pub use crate::core::player::{LoopMode, PlaybackEngine, PlayerStatus};
pub use crate::core::playlist::{JsonPlaylistStore, MediaDescriptor, PlaylistStore};
pub use crate::core::runner::EngineHandle;
