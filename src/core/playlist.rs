//! Media catalog + loop list + active pointer
//!
//! The engine consumes this through the `PlaylistStore` trait and never owns
//! it. The store is shared with the administrative API (uploads, reordering,
//! deletion), so every call is one atomic snapshot or one atomic
//! read-modify-write.
//!
//! Guarantee relied on: a non-null `active` names a slug present in both the
//! loop and the catalog. The engine self-heals if it ever sees otherwise.

use indexmap::IndexMap;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use super::error::StoreError;

/// Stable unique id of one catalog entry
pub type Slug = String;

/// Processing state of a catalog entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MediaStatus {
    Processing,
    #[default]
    Ready,
    Failed,
}

/// One catalog entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaDescriptor {
    pub slug: Slug,
    /// Original upload file name
    #[serde(default)]
    pub filename: String,
    /// Frame count recorded at ingest. Informational: disk is ground truth.
    #[serde(default)]
    pub frame_count: usize,
    /// Playback rate; non-positive means "use the configured rate"
    #[serde(default)]
    pub fps: f32,
    #[serde(default)]
    pub width: u32,
    #[serde(default)]
    pub height: u32,
    #[serde(default)]
    pub status: MediaStatus,
    /// Per-media repeat count, overrides the configured default
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repeat_count: Option<i32>,
}

impl MediaDescriptor {
    pub fn new(slug: impl Into<Slug>) -> Self {
        Self {
            slug: slug.into(),
            filename: String::new(),
            frame_count: 0,
            fps: 0.0,
            width: 0,
            height: 0,
            status: MediaStatus::Ready,
            repeat_count: None,
        }
    }

    pub fn with_repeat_count(mut self, repeat: i32) -> Self {
        self.repeat_count = Some(repeat);
        self
    }

    pub fn with_fps(mut self, fps: f32) -> Self {
        self.fps = fps;
        self
    }
}

/// Catalog ordered by insertion
pub type Catalog = IndexMap<Slug, MediaDescriptor>;

/// Durable playlist state consumed by the engine.
pub trait PlaylistStore: Send + Sync {
    fn get_active(&self) -> Result<Option<Slug>, StoreError>;

    /// Ordered, duplicate-free loop
    fn list_loop(&self) -> Result<Vec<Slug>, StoreError>;

    fn set_active(&self, slug: Option<&str>) -> Result<(), StoreError>;

    fn get_catalog(&self) -> Result<Catalog, StoreError>;

    /// Drop `slug` from the loop; clears `active` if it pointed there
    fn remove_from_loop(&self, slug: &str) -> Result<(), StoreError>;
}

/// Whole persisted document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaylistState {
    pub catalog: Catalog,
    #[serde(rename = "loop")]
    pub loop_slugs: Vec<Slug>,
    pub active: Option<Slug>,
}

impl PlaylistState {
    fn set_active(&mut self, slug: Option<&str>) -> Result<(), StoreError> {
        match slug {
            None => self.active = None,
            Some(s) => {
                if !self.catalog.contains_key(s) || !self.loop_slugs.iter().any(|l| l == s) {
                    return Err(StoreError::UnknownSlug(s.to_string()));
                }
                self.active = Some(s.to_string());
            }
        }
        Ok(())
    }

    fn remove_from_loop(&mut self, slug: &str) {
        self.loop_slugs.retain(|s| s != slug);
        if self.active.as_deref() == Some(slug) {
            self.active = None;
        }
    }

    fn add_to_loop(&mut self, slug: &str) -> Result<(), StoreError> {
        if !self.catalog.contains_key(slug) {
            return Err(StoreError::UnknownSlug(slug.to_string()));
        }
        if !self.loop_slugs.iter().any(|s| s == slug) {
            self.loop_slugs.push(slug.to_string());
        }
        Ok(())
    }

    fn remove_media(&mut self, slug: &str) -> Option<MediaDescriptor> {
        self.remove_from_loop(slug);
        self.catalog.shift_remove(slug)
    }

    /// Drop duplicate and uncatalogued loop entries, fix a dangling active
    fn normalize(&mut self) {
        let mut seen = std::collections::HashSet::new();
        let catalog = &self.catalog;
        self.loop_slugs
            .retain(|s| catalog.contains_key(s) && seen.insert(s.clone()));
        if let Some(active) = &self.active
            && !self.loop_slugs.contains(active)
        {
            warn!("Active media '{}' not in loop, clearing", active);
            self.active = None;
        }
    }
}

// ============================================================================
// JSON file store
// ============================================================================

/// Media index persisted as one JSON file.
///
/// Every operation runs under one in-process lock: read the file, apply,
/// write to a temp file, rename over the original. Readers never see a torn
/// document and read-modify-write cycles never interleave.
#[derive(Debug)]
pub struct JsonPlaylistStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl JsonPlaylistStore {
    /// Open (or create) the index at `path`.
    ///
    /// Fails if the file exists but cannot be read or parsed, or the directory
    /// cannot be created. This is the one startup failure that stops the process.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|source| StoreError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let store = Self {
            path,
            lock: Mutex::new(()),
        };
        let state = store.read_state()?;
        info!(
            "Media index {}: {} media, {} in loop, active={:?}",
            store.path.display(),
            state.catalog.len(),
            state.loop_slugs.len(),
            state.active
        );
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_state(&self) -> Result<PlaylistState, StoreError> {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("Media index {} missing, starting empty", self.path.display());
                return Ok(PlaylistState::default());
            }
            Err(source) => {
                return Err(StoreError::Io {
                    path: self.path.clone(),
                    source,
                });
            }
        };
        let mut state: PlaylistState =
            serde_json::from_str(&raw).map_err(|source| StoreError::Parse {
                path: self.path.clone(),
                source,
            })?;
        state.normalize();
        Ok(state)
    }

    fn write_state(&self, state: &PlaylistState) -> Result<(), StoreError> {
        let io_err = |source| StoreError::Io {
            path: self.path.clone(),
            source,
        };
        let json = serde_json::to_string_pretty(state).map_err(|source| StoreError::Parse {
            path: self.path.clone(),
            source,
        })?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json).map_err(io_err)?;
        std::fs::rename(&tmp, &self.path).map_err(io_err)?;
        Ok(())
    }

    fn read<T>(&self, f: impl FnOnce(&PlaylistState) -> T) -> Result<T, StoreError> {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        Ok(f(&self.read_state()?))
    }

    fn modify<T>(
        &self,
        f: impl FnOnce(&mut PlaylistState) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut state = self.read_state()?;
        let out = f(&mut state)?;
        self.write_state(&state)?;
        Ok(out)
    }

    /// Full snapshot
    pub fn snapshot(&self) -> Result<PlaylistState, StoreError> {
        self.read(|s| s.clone())
    }

    /// Insert or replace a catalog entry
    pub fn upsert_media(&self, media: MediaDescriptor) -> Result<(), StoreError> {
        self.modify(|s| {
            s.catalog.insert(media.slug.clone(), media);
            Ok(())
        })
    }

    /// Append to the loop (no-op if already present)
    pub fn add_to_loop(&self, slug: &str) -> Result<(), StoreError> {
        self.modify(|s| s.add_to_loop(slug))
    }

    /// Delete from catalog and loop
    pub fn remove_media(&self, slug: &str) -> Result<Option<MediaDescriptor>, StoreError> {
        self.modify(|s| Ok(s.remove_media(slug)))
    }
}

impl PlaylistStore for JsonPlaylistStore {
    fn get_active(&self) -> Result<Option<Slug>, StoreError> {
        self.read(|s| s.active.clone())
    }

    fn list_loop(&self) -> Result<Vec<Slug>, StoreError> {
        self.read(|s| s.loop_slugs.clone())
    }

    fn set_active(&self, slug: Option<&str>) -> Result<(), StoreError> {
        self.modify(|s| s.set_active(slug))
    }

    fn get_catalog(&self) -> Result<Catalog, StoreError> {
        self.read(|s| s.catalog.clone())
    }

    fn remove_from_loop(&self, slug: &str) -> Result<(), StoreError> {
        self.modify(|s| {
            s.remove_from_loop(slug);
            Ok(())
        })
    }
}

// ============================================================================
// In-memory store
// ============================================================================

/// Non-persistent store with the same semantics. Tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryPlaylistStore {
    state: Mutex<PlaylistState>,
}

impl MemoryPlaylistStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Catalog `slugs` and put them in the loop in order
    pub fn with_loop<S: AsRef<str>>(slugs: &[S]) -> Self {
        let store = Self::new();
        for slug in slugs {
            store.upsert_media(MediaDescriptor::new(slug.as_ref()));
            store.add_to_loop(slug.as_ref());
        }
        store
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut PlaylistState) -> T) -> T {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut state)
    }

    pub fn snapshot(&self) -> PlaylistState {
        self.with_state(|s| s.clone())
    }

    pub fn upsert_media(&self, media: MediaDescriptor) {
        self.with_state(|s| {
            s.catalog.insert(media.slug.clone(), media);
        })
    }

    pub fn add_to_loop(&self, slug: &str) -> bool {
        self.with_state(|s| s.add_to_loop(slug).is_ok())
    }

    pub fn remove_media(&self, slug: &str) -> Option<MediaDescriptor> {
        self.with_state(|s| s.remove_media(slug))
    }

    /// Overwrite the raw state, bypassing validation (to simulate corruption)
    pub fn replace_state(&self, state: PlaylistState) {
        self.with_state(|s| *s = state)
    }
}

impl PlaylistStore for MemoryPlaylistStore {
    fn get_active(&self) -> Result<Option<Slug>, StoreError> {
        Ok(self.with_state(|s| s.active.clone()))
    }

    fn list_loop(&self) -> Result<Vec<Slug>, StoreError> {
        Ok(self.with_state(|s| s.loop_slugs.clone()))
    }

    fn set_active(&self, slug: Option<&str>) -> Result<(), StoreError> {
        self.with_state(|s| s.set_active(slug))
    }

    fn get_catalog(&self) -> Result<Catalog, StoreError> {
        Ok(self.with_state(|s| s.catalog.clone()))
    }

    fn remove_from_loop(&self, slug: &str) -> Result<(), StoreError> {
        self.with_state(|s| s.remove_from_loop(slug));
        Ok(())
    }
}
