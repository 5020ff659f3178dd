//! Adaptive LRU cache of raw frames for the active media
//!
//! Structure: HashMap<usize, FrameData> + IndexSet<usize> LRU order
//! - O(1) lookup by frame index
//! - IndexSet front = least recently used, back = most recently used
//! - Capacity is not fixed: it is asked from MemoryTelemetry on every insert
//!
//! Invariant: the key set of `frames` equals the element set of `lru_order`,
//! and `len()` never exceeds the capacity last returned by telemetry.

use indexmap::IndexSet;
use log::{debug, trace};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use super::frame_source::{FrameData, FrameSource};
use super::telemetry::MemoryTelemetry;

/// Cache statistics for monitoring
#[derive(Debug, Default)]
pub struct CacheStats {
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl CacheStats {
    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_eviction(&self) {
        self.evictions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    pub fn evictions(&self) -> u64 {
        self.evictions.load(Ordering::Relaxed)
    }

    pub fn hit_rate(&self) -> f64 {
        let total = self.hits() + self.misses();
        if total == 0 { 0.0 } else { self.hits() as f64 / total as f64 }
    }
}

/// Frame cache for one FrameSource. Recreated whenever the source changes.
pub struct FrameCache {
    frames: HashMap<usize, FrameData>,
    lru_order: IndexSet<usize>,
    telemetry: Arc<dyn MemoryTelemetry>,
    base_capacity: usize,
    max_capacity: usize,
    /// Capacity last returned by telemetry
    capacity: usize,
    stats: Arc<CacheStats>,
}

impl std::fmt::Debug for FrameCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameCache")
            .field("len", &self.frames.len())
            .field("capacity", &self.capacity)
            .field("base_capacity", &self.base_capacity)
            .field("max_capacity", &self.max_capacity)
            .finish()
    }
}

impl FrameCache {
    /// Create empty cache.
    ///
    /// # Arguments
    /// * `telemetry` - memory readings used to size the cache
    /// * `base_capacity` - frames to keep under normal pressure
    /// * `max_capacity` - upper bound when memory is plentiful
    pub fn new(telemetry: Arc<dyn MemoryTelemetry>, base_capacity: usize, max_capacity: usize) -> Self {
        let max_capacity = max_capacity.max(1);
        let base_capacity = base_capacity.clamp(1, max_capacity);
        let capacity = telemetry.suggest_cache_size(base_capacity, max_capacity);

        debug!(
            "FrameCache created: base={}, max={}, initial capacity={}",
            base_capacity, max_capacity, capacity
        );

        Self {
            frames: HashMap::with_capacity(capacity),
            lru_order: IndexSet::with_capacity(capacity),
            telemetry,
            base_capacity,
            max_capacity,
            capacity,
            stats: Arc::new(CacheStats::default()),
        }
    }

    /// Get frame from cache, marking it most recently used.
    pub fn get(&mut self, index: usize) -> Option<FrameData> {
        match self.frames.get(&index) {
            Some(frame) => {
                self.stats.record_hit();
                let frame = Arc::clone(frame);
                self.touch(index);
                Some(frame)
            }
            None => {
                self.stats.record_miss();
                None
            }
        }
    }

    /// Check presence without touching LRU order or stats
    pub fn contains(&self, index: usize) -> bool {
        self.frames.contains_key(&index)
    }

    /// Insert frame, evicting least recently used entries to fit the
    /// capacity telemetry suggests right now.
    ///
    /// Returns false if the frame could not be kept.
    pub fn put(&mut self, index: usize, frame: FrameData) -> bool {
        self.refresh_capacity();

        if self.frames.contains_key(&index) {
            self.frames.insert(index, frame);
            self.touch(index);
            return true;
        }

        while self.frames.len() >= self.capacity {
            if !self.evict_oldest() {
                break;
            }
        }
        if self.frames.len() >= self.capacity {
            return false;
        }

        self.frames.insert(index, frame);
        self.lru_order.insert(index);
        trace!("Cached frame {} ({}/{})", index, self.frames.len(), self.capacity);
        true
    }

    /// Cache hit or read through from `source` and insert.
    pub fn fetch(&mut self, source: &dyn FrameSource, index: usize) -> Option<FrameData> {
        if let Some(frame) = self.get(index) {
            return Some(frame);
        }
        let frame = source.get_frame(index)?;
        self.put(index, Arc::clone(&frame));
        Some(frame)
    }

    /// Re-read capacity from telemetry and trim if it shrank.
    ///
    /// Called on every insert, and by the engine each tick while memory is low
    /// so the cache gives memory back without waiting for the next insert.
    pub fn refresh_capacity(&mut self) -> usize {
        let suggested = self
            .telemetry
            .suggest_cache_size(self.base_capacity, self.max_capacity);
        if suggested != self.capacity {
            debug!("FrameCache capacity {} -> {}", self.capacity, suggested);
            self.capacity = suggested;
        }
        self.trim();
        self.capacity
    }

    fn trim(&mut self) {
        let before = self.frames.len();
        while self.frames.len() > self.capacity {
            if !self.evict_oldest() {
                break;
            }
        }
        if self.frames.len() < before {
            debug!(
                "FrameCache trimmed {} -> {} frames",
                before,
                self.frames.len()
            );
        }
    }

    fn touch(&mut self, index: usize) {
        if let Some(pos) = self.lru_order.get_index_of(&index) {
            let last = self.lru_order.len() - 1;
            self.lru_order.move_index(pos, last);
        }
    }

    /// Evict least recently used frame. Returns false if empty.
    fn evict_oldest(&mut self) -> bool {
        let Some(index) = self.lru_order.shift_remove_index(0) else {
            return false;
        };
        self.frames.remove(&index);
        self.stats.record_eviction();
        trace!("LRU evicted frame {}", index);
        true
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Capacity last returned by telemetry
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Room for at least one more frame without evicting
    pub fn has_room(&self) -> bool {
        self.frames.len() < self.capacity
    }

    pub fn stats(&self) -> Arc<CacheStats> {
        Arc::clone(&self.stats)
    }

    /// Cached indices from least to most recently used
    pub fn lru_indices(&self) -> Vec<usize> {
        self.lru_order.iter().copied().collect()
    }

    #[cfg(test)]
    fn check_invariants(&self) {
        assert_eq!(self.frames.len(), self.lru_order.len());
        for index in &self.lru_order {
            assert!(self.frames.contains_key(index), "lru entry {} has no frame", index);
        }
        assert!(self.frames.len() <= self.capacity);
    }
}
