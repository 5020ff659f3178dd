//! Playback engine: media selection, frame pacing, loop policy
//!
//! **Why**: the panel runs unattended for months. The engine has to keep the
//! loop playing through broken uploads, memory pressure and a flaky display
//! link, and every external command (pause, next, delete...) has to take
//! effect on the next tick without racing a frame write.
//!
//! **Used by**: `runner::EngineHandle` (tick loop thread), the binary, and any
//! API layer that issues commands or reads `status()`.
//!
//! # States
//!
//! `Idle` → `Loading` → `Playing` ⇄ `Paused`, `Playing` → `ShowingOverlay` →
//! `Playing`. Any state drops to `Idle` when the loop is empty or nothing in it
//! is playable.
//!
//! # Tick
//!
//! One tick does one unit of work under the engine lock and returns a `Step`
//! telling the loop how long to wait:
//! - overlay jobs pending: poll jobs, render one progress frame
//! - paused: nothing
//! - nothing loaded: select + load media (wraparound search, self-healing)
//! - playing: fetch frame through the cache, write, advance, preload
//!
//! # Loop policy
//!
//! At sequence end, `one` mode replays the media `repeat` more times before
//! switching; `all` mode plays each media `repeat` times in total, then moves
//! to the next slug. A non-positive repeat loops forever when the loop holds a
//! single media and plays once per pass otherwise.

use log::{debug, error, info, trace, warn};
use serde::{Deserialize, Serialize};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use super::display::{DisplayHealth, DisplayPort, WriteOutcome};
use super::error::{EngineError, StoreError};
use super::frame_cache::{CacheStats, FrameCache};
use super::frame_source::{FrameSource, SourceLoader};
use super::overlay::{JobBoard, JobMonitor, OverlayRenderer, ProgressBarRenderer, any_active};
use super::playlist::{MediaDescriptor, PlaylistStore, Slug};
use super::signal::Waker;
use super::telemetry::MemoryTelemetry;

/// Fallback rate for non-positive or non-finite frame rates
pub const DEFAULT_FRAME_RATE: f32 = 30.0;

/// Floor for the frame interval
pub const MIN_FRAME_INTERVAL: Duration = Duration::from_millis(1);

/// Frames preloaded after each write
const PRELOAD_AHEAD: usize = 5;
const PRELOAD_AHEAD_LOW_MEMORY: usize = 3;

/// Target interval for `fps`, with the configuration floors applied
pub fn frame_interval(fps: f32) -> Duration {
    let fps = if fps.is_finite() && fps > 0.0 {
        fps
    } else {
        DEFAULT_FRAME_RATE
    };
    Duration::from_secs_f64(1.0 / fps as f64).max(MIN_FRAME_INTERVAL)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineState {
    Idle,
    Loading,
    Playing,
    Paused,
    ShowingOverlay,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoopMode {
    One,
    #[default]
    All,
}

impl LoopMode {
    pub fn toggled(self) -> Self {
        match self {
            LoopMode::One => LoopMode::All,
            LoopMode::All => LoopMode::One,
        }
    }
}

impl std::str::FromStr for LoopMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "one" => Ok(LoopMode::One),
            "all" => Ok(LoopMode::All),
            other => Err(format!("unknown loop mode '{}' (expected one|all)", other)),
        }
    }
}

/// Play position, mutated only under the engine lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PlaybackCursor {
    pub frame_index: usize,
    /// Passes completed on the current media
    pub loops_done: u32,
    pub loop_mode: LoopMode,
    pub paused: bool,
}

/// What the loop does after a tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Tick again right away
    Continue,
    /// Pacing wait, cut short by any command
    Sleep(Duration),
    Paused,
    Idle,
}

/// Decision taken at sequence end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassAction {
    Restart,
    Advance,
}

/// Count one finished pass and decide whether to replay or switch.
pub fn after_pass(
    cursor: &mut PlaybackCursor,
    repeat: i32,
    loop_len: usize,
    auto_advance: bool,
) -> PassAction {
    let multi = loop_len > 1;
    if cursor.loop_mode == LoopMode::All && multi {
        let passes = if repeat <= 0 { 1 } else { repeat as u32 };
        cursor.loops_done += 1;
        if cursor.loops_done < passes {
            return PassAction::Restart;
        }
        cursor.loops_done = 0;
        return if auto_advance {
            PassAction::Advance
        } else {
            PassAction::Restart
        };
    }

    // `one` mode, or `all` with a single media
    if repeat <= 0 {
        cursor.loops_done = 0;
        return if multi {
            PassAction::Advance
        } else {
            PassAction::Restart
        };
    }
    if (cursor.loops_done as i64) < repeat as i64 {
        cursor.loops_done += 1;
        return PassAction::Restart;
    }
    cursor.loops_done = 0;
    if multi {
        PassAction::Advance
    } else {
        PassAction::Restart
    }
}

/// Timing and policy knobs, already sanitized.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub frame_rate: f32,
    pub frame_interval: Duration,
    pub loop_mode: LoopMode,
    pub repeat_count: i32,
    pub auto_advance: bool,
    pub static_hold: Duration,
    pub cache_base_frames: usize,
    pub cache_max_frames: usize,
    pub overlay_poll: Duration,
    pub error_backoff: Duration,
    pub idle_poll: Duration,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            frame_rate: DEFAULT_FRAME_RATE,
            frame_interval: frame_interval(DEFAULT_FRAME_RATE),
            loop_mode: LoopMode::All,
            repeat_count: 1,
            auto_advance: true,
            static_hold: Duration::from_secs(10),
            cache_base_frames: 8,
            cache_max_frames: 48,
            overlay_poll: Duration::from_millis(100),
            error_backoff: Duration::from_secs(1),
            idle_poll: Duration::from_secs(1),
        }
    }
}

/// Snapshot for the status/API layer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlayerStatus {
    pub is_playing: bool,
    pub current_media: Option<Slug>,
    pub loop_index: usize,
    pub total_media: usize,
    pub frame_rate: f32,
    pub loop_mode: LoopMode,
    pub showing_progress: bool,
    pub frame_index: usize,
    pub display_available: bool,
    pub state: EngineState,
    pub cache_hit_rate: f64,
    pub display: DisplayHealth,
}

/// Media currently loaded for playback
struct LoadedMedia {
    slug: Slug,
    source: Arc<dyn FrameSource>,
    cache: FrameCache,
    repeat_count: i32,
    fps: f32,
    frame_interval: Duration,
    /// Some frame of this load has been read successfully
    read_any: bool,
}

struct EngineInner {
    state: EngineState,
    cursor: PlaybackCursor,
    display: DisplayPort,
    renderer: Box<dyn OverlayRenderer>,
    current: Option<LoadedMedia>,
    loop_index: usize,
    total_media: usize,
    overlay_jobs: Vec<String>,
}

impl EngineInner {
    fn unload(&mut self) {
        self.current = None;
        self.cursor.frame_index = 0;
        self.cursor.loops_done = 0;
    }
}

/// The playback state machine.
///
/// Every field the tick mutates sits behind one lock, which commands take too,
/// so a command never lands halfway through a frame write.
pub struct PlaybackEngine {
    inner: Mutex<EngineInner>,
    waker: Waker,
    running: AtomicBool,
    settings: EngineSettings,
    store: Arc<dyn PlaylistStore>,
    loader: Arc<dyn SourceLoader>,
    telemetry: Arc<dyn MemoryTelemetry>,
    jobs: Arc<dyn JobMonitor>,
}

impl std::fmt::Debug for PlaybackEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlaybackEngine")
            .field("settings", &self.settings)
            .field("running", &self.is_running())
            .finish()
    }
}

impl PlaybackEngine {
    pub fn new(
        settings: EngineSettings,
        display: DisplayPort,
        store: Arc<dyn PlaylistStore>,
        loader: Arc<dyn SourceLoader>,
        telemetry: Arc<dyn MemoryTelemetry>,
    ) -> Self {
        let cursor = PlaybackCursor {
            loop_mode: settings.loop_mode,
            ..Default::default()
        };
        Self {
            inner: Mutex::new(EngineInner {
                state: EngineState::Idle,
                cursor,
                display,
                renderer: Box::new(ProgressBarRenderer::default()),
                current: None,
                loop_index: 0,
                total_media: 0,
                overlay_jobs: Vec::new(),
            }),
            waker: Waker::new(),
            running: AtomicBool::new(true),
            settings,
            store,
            loader,
            telemetry,
            jobs: Arc::new(JobBoard::new()),
        }
    }

    /// Job monitor polled while the overlay is shown
    pub fn with_jobs(mut self, jobs: Arc<dyn JobMonitor>) -> Self {
        self.jobs = jobs;
        self
    }

    pub fn with_renderer(self, renderer: Box<dyn OverlayRenderer>) -> Self {
        self.lock().renderer = renderer;
        self
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    fn lock(&self) -> MutexGuard<'_, EngineInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Interruptible delay used by the display recovery protocol.
    ///
    /// Runs with the engine lock held, so a command issued meanwhile waits at
    /// most `recovery_delay` (`init_retry_delay` during startup). `stop()` ends
    /// the delay at once. Commands notify after releasing the lock, so a wake
    /// token consumed here is never one they still need.
    fn pause_for(&self, duration: Duration) {
        self.waker.sleep_while(duration, || self.is_running());
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Bring the display up. Returns false when starting headless.
    pub fn start_display(&self) -> bool {
        let pause = |d: Duration| self.pause_for(d);
        self.lock().display.start(&pause)
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Ask `run()` to return. Every pending wait wakes up.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.waker.notify();
    }

    /// Tick until `stop()`. Faults inside a tick are logged and followed by
    /// an interruptible backoff; they never end the loop.
    pub fn run(&self) {
        info!("Playback engine running");
        while self.is_running() {
            let result = panic::catch_unwind(AssertUnwindSafe(|| self.tick()))
                .unwrap_or_else(|payload| Err(EngineError::Panic(panic_message(payload.as_ref()))));
            match result {
                Ok(step) => self.wait(step),
                Err(e) => {
                    error!("Playback tick failed: {}", e);
                    self.waker
                        .sleep_while(self.settings.error_backoff, || self.is_running());
                }
            }
        }
        self.lock().display.shutdown();
        info!("Playback engine stopped");
    }

    fn wait(&self, step: Step) {
        match step {
            Step::Continue => {}
            Step::Sleep(d) => {
                self.waker.wait_timeout(d);
            }
            Step::Paused | Step::Idle => {
                self.waker.wait_timeout(self.settings.idle_poll);
            }
        }
    }

    // ------------------------------------------------------------------
    // Tick
    // ------------------------------------------------------------------

    /// Run one unit of work.
    pub fn tick(&self) -> Result<Step, EngineError> {
        let mut guard = self.lock();
        let inner = &mut *guard;

        if !inner.overlay_jobs.is_empty() {
            return Ok(self.tick_overlay(inner));
        }
        if inner.cursor.paused {
            inner.state = EngineState::Paused;
            return Ok(Step::Paused);
        }
        if inner.current.is_none() && !self.load(inner)? {
            return Ok(Step::Idle);
        }
        self.tick_playing(inner)
    }

    fn tick_overlay(&self, inner: &mut EngineInner) -> Step {
        if !any_active(self.jobs.as_ref(), &inner.overlay_jobs) {
            info!("Processing finished, resuming playback");
            inner.overlay_jobs.clear();
            inner.state = if inner.cursor.paused {
                EngineState::Paused
            } else if inner.current.is_some() {
                EngineState::Playing
            } else {
                EngineState::Idle
            };
            return Step::Continue;
        }
        inner.state = EngineState::ShowingOverlay;

        let progress: Vec<_> = inner
            .overlay_jobs
            .iter()
            .filter_map(|id| self.jobs.job_progress(id))
            .collect();
        let (width, height) = inner.display.dimensions();
        let frame = inner.renderer.render(&progress, width, height);
        let pause = |d: Duration| self.pause_for(d);
        inner.display.write(&frame, &pause);
        Step::Sleep(self.settings.overlay_poll)
    }

    fn tick_playing(&self, inner: &mut EngineInner) -> Result<Step, EngineError> {
        inner.state = EngineState::Playing;
        let low_memory = self.telemetry.is_low_memory();
        let pause = |d: Duration| self.pause_for(d);

        let EngineInner {
            current,
            display,
            cursor,
            ..
        } = &mut *inner;
        let Some(media) = current.as_mut() else {
            return Ok(Step::Continue);
        };

        if low_memory {
            let before = media.cache.len();
            let capacity = media.cache.refresh_capacity();
            if media.cache.len() < before {
                debug!(
                    "Low memory: cache trimmed {} -> {} (capacity {})",
                    before,
                    media.cache.len(),
                    capacity
                );
            }
        }

        let index = cursor.frame_index;
        let frame_count = media.source.frame_count();
        let Some(frame) = media.cache.fetch(media.source.as_ref(), index) else {
            let slug = media.slug.clone();
            if !media.read_any {
                self.discard_broken(inner, &slug)?;
                return Ok(Step::Continue);
            }
            // Media played before: a failed read is transient, not broken media
            debug!("Frame {} of '{}' unavailable, ending sequence", index, slug);
            let pace = media.frame_interval;
            self.end_of_sequence(inner)?;
            return Ok(Step::Sleep(pace));
        };
        media.read_any = true;

        let started = Instant::now();
        let outcome = display.write(&frame, &pause);
        let interval = media
            .source
            .frame_duration(index)
            .unwrap_or(media.frame_interval);
        let pace = interval.saturating_sub(started.elapsed());

        match outcome {
            WriteOutcome::Written | WriteOutcome::Headless => {}
            // Same frame again next tick
            WriteOutcome::Failed => return Ok(Step::Sleep(pace)),
            WriteOutcome::Rejected => {
                self.end_of_sequence(inner)?;
                return Ok(Step::Continue);
            }
        }
        trace!("'{}' frame {}/{} {:?}", media.slug, index + 1, frame_count, outcome);

        let next = index + 1;
        let finished = next >= frame_count;
        if !finished {
            cursor.frame_index = next;
            self.preload(media, next);
        }
        if finished {
            self.end_of_sequence(inner)?;
        }

        if frame_count == 1 {
            Ok(Step::Sleep(self.settings.static_hold))
        } else {
            Ok(Step::Sleep(pace))
        }
    }

    /// Warm the cache with the frames after `from`.
    fn preload(&self, media: &mut LoadedMedia, from: usize) {
        let low = self.telemetry.is_low_memory();
        if low && !self.telemetry.should_preload() {
            return;
        }
        let ahead = if low {
            PRELOAD_AHEAD_LOW_MEMORY
        } else {
            PRELOAD_AHEAD
        };
        let end = (from + ahead).min(media.source.frame_count());
        let mut loaded = 0;
        for index in from..end {
            if media.cache.contains(index) {
                continue;
            }
            if !media.cache.has_room() {
                break;
            }
            match media.source.get_frame(index) {
                Some(frame) => {
                    media.cache.put(index, frame);
                    loaded += 1;
                }
                None => break,
            }
        }
        if loaded > 0 {
            trace!("Preloaded {} frames of '{}' from {}", loaded, media.slug, from);
        }
    }

    // ------------------------------------------------------------------
    // Media selection
    // ------------------------------------------------------------------

    /// Select and load media, starting from the active slug (or the last loop
    /// position) with wraparound. Media that cannot be played leave the loop.
    fn load(&self, inner: &mut EngineInner) -> Result<bool, EngineError> {
        inner.state = EngineState::Loading;
        let loop_slugs = self.store.list_loop()?;
        inner.total_media = loop_slugs.len();

        if loop_slugs.is_empty() {
            if self.store.get_active()?.is_some() {
                self.store.set_active(None)?;
            }
            self.go_idle(inner, "loop is empty");
            return Ok(false);
        }

        let catalog = self.store.get_catalog()?;
        let active = self.store.get_active()?;
        let start = match active
            .as_ref()
            .and_then(|a| loop_slugs.iter().position(|s| s == a))
        {
            Some(pos) => pos,
            None => {
                if let Some(a) = &active {
                    warn!("Active media '{}' is not in the loop, clearing", a);
                    self.store.set_active(None)?;
                }
                inner.loop_index.min(loop_slugs.len() - 1)
            }
        };

        let frame_size = inner.display.frame_size();
        for offset in 0..loop_slugs.len() {
            let slug = &loop_slugs[(start + offset) % loop_slugs.len()];
            let Some(descriptor) = catalog.get(slug) else {
                warn!("'{}' is in the loop but not in the catalog, removing", slug);
                self.store.remove_from_loop(slug)?;
                continue;
            };
            let source = self
                .loader
                .open(slug, frame_size)
                .filter(|s| s.is_usable() && s.frame_size() == frame_size);
            let Some(source) = source else {
                warn!("'{}' has no usable frames, removing from loop", slug);
                self.store.remove_from_loop(slug)?;
                continue;
            };

            if active.as_deref() != Some(slug.as_str()) {
                self.store.set_active(Some(slug.as_str()))?;
            }
            self.install(inner, descriptor, source);
            let loop_slugs = self.store.list_loop()?;
            inner.total_media = loop_slugs.len();
            inner.loop_index = loop_slugs.iter().position(|s| s == slug).unwrap_or(0);
            return Ok(true);
        }

        self.store.set_active(None)?;
        inner.total_media = self.store.list_loop()?.len();
        self.go_idle(inner, "no playable media in the loop");
        Ok(false)
    }

    fn install(&self, inner: &mut EngineInner, descriptor: &MediaDescriptor, source: Arc<dyn FrameSource>) {
        let (fps, interval) = if descriptor.fps.is_finite() && descriptor.fps > 0.0 {
            (descriptor.fps, frame_interval(descriptor.fps))
        } else {
            (self.settings.frame_rate, self.settings.frame_interval)
        };
        let repeat_count = descriptor.repeat_count.unwrap_or(self.settings.repeat_count);
        info!(
            "Loaded '{}': {} frames ({}), {:.1} fps, repeat {}",
            descriptor.slug,
            source.frame_count(),
            source.kind(),
            fps,
            repeat_count
        );
        let cache = FrameCache::new(
            Arc::clone(&self.telemetry),
            self.settings.cache_base_frames,
            self.settings.cache_max_frames,
        );
        inner.current = Some(LoadedMedia {
            slug: descriptor.slug.clone(),
            source,
            cache,
            repeat_count,
            fps,
            frame_interval: interval,
            read_any: false,
        });
        inner.cursor.frame_index = 0;
        inner.cursor.loops_done = 0;
        inner.state = EngineState::Playing;
    }

    fn go_idle(&self, inner: &mut EngineInner, reason: &str) {
        if inner.state != EngineState::Idle {
            info!("Idle: {}", reason);
        }
        inner.unload();
        inner.state = EngineState::Idle;
    }

    /// Loaded media turned out unplayable: drop it and take it out of the loop
    fn discard_broken(&self, inner: &mut EngineInner, slug: &str) -> Result<(), StoreError> {
        warn!("'{}' has no readable frames, removing from loop", slug);
        inner.unload();
        self.store.remove_from_loop(slug)
    }

    fn end_of_sequence(&self, inner: &mut EngineInner) -> Result<(), EngineError> {
        let Some(media) = inner.current.as_ref() else {
            return Ok(());
        };
        let slug = media.slug.clone();
        let repeat = media.repeat_count;

        let loop_slugs = self.store.list_loop()?;
        inner.total_media = loop_slugs.len();
        if !loop_slugs.contains(&slug) {
            info!("'{}' left the loop, reselecting", slug);
            inner.unload();
            return Ok(());
        }

        match after_pass(
            &mut inner.cursor,
            repeat,
            loop_slugs.len(),
            self.settings.auto_advance,
        ) {
            PassAction::Restart => {
                debug!(
                    "'{}' pass done (loops_done={}), restarting",
                    slug, inner.cursor.loops_done
                );
                inner.cursor.frame_index = 0;
            }
            PassAction::Advance => self.switch_media(inner, 1)?,
        }
        Ok(())
    }

    /// Move `step` slots through the loop (wraparound) and unload current.
    fn switch_media(&self, inner: &mut EngineInner, step: isize) -> Result<(), StoreError> {
        let current_slug = inner.current.as_ref().map(|m| m.slug.clone());
        inner.unload();

        let loop_slugs = self.store.list_loop()?;
        inner.total_media = loop_slugs.len();
        if loop_slugs.is_empty() {
            self.store.set_active(None)?;
            return Ok(());
        }

        let reference = match current_slug {
            Some(slug) => Some(slug),
            None => self.store.get_active()?,
        };
        let len = loop_slugs.len();
        let pos = reference
            .and_then(|r| loop_slugs.iter().position(|s| *s == r))
            .unwrap_or(inner.loop_index.min(len - 1));
        let next = (pos as isize + step).rem_euclid(len as isize) as usize;
        let next_slug = &loop_slugs[next];

        inner.loop_index = next;
        if let Err(e) = self.store.set_active(Some(next_slug.as_str())) {
            warn!("Cannot activate '{}': {}", next_slug, e);
            self.store.set_active(None)?;
            return Ok(());
        }
        info!("Switching to '{}' ({}/{})", next_slug, next + 1, len);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Commands
    // ------------------------------------------------------------------

    pub fn pause(&self) {
        let mut inner = self.lock();
        if !inner.cursor.paused {
            info!("Paused at frame {}", inner.cursor.frame_index);
            inner.cursor.paused = true;
            inner.state = EngineState::Paused;
        }
        drop(inner);
        self.waker.notify();
    }

    pub fn resume(&self) {
        let mut inner = self.lock();
        if inner.cursor.paused {
            info!("Resumed at frame {}", inner.cursor.frame_index);
            inner.cursor.paused = false;
        }
        drop(inner);
        self.waker.notify();
    }

    /// Returns true if now paused
    pub fn toggle_pause(&self) -> bool {
        let paused = self.lock().cursor.paused;
        if paused {
            self.resume();
        } else {
            self.pause();
        }
        !paused
    }

    pub fn next_media(&self) -> Result<(), StoreError> {
        self.switch_command(1)
    }

    pub fn previous_media(&self) -> Result<(), StoreError> {
        self.switch_command(-1)
    }

    fn switch_command(&self, step: isize) -> Result<(), StoreError> {
        let result = self.switch_media(&mut self.lock(), step);
        self.waker.notify();
        result
    }

    /// Jump to `slug`; it must be in the loop and the catalog
    pub fn set_active(&self, slug: &str) -> Result<(), StoreError> {
        let mut inner = self.lock();
        self.store.set_active(Some(slug))?;
        if let Some(pos) = self.store.list_loop()?.iter().position(|s| s == slug) {
            inner.loop_index = pos;
        }
        inner.unload();
        info!("Active media set to '{}'", slug);
        drop(inner);
        self.waker.notify();
        Ok(())
    }

    pub fn loop_mode(&self) -> LoopMode {
        self.lock().cursor.loop_mode
    }

    pub fn set_loop_mode(&self, mode: LoopMode) {
        let mut inner = self.lock();
        if inner.cursor.loop_mode != mode {
            info!("Loop mode -> {:?}", mode);
            inner.cursor.loop_mode = mode;
            inner.cursor.loops_done = 0;
        }
    }

    pub fn toggle_loop_mode(&self) -> LoopMode {
        let mode = self.loop_mode().toggled();
        self.set_loop_mode(mode);
        mode
    }

    /// Suspend playback and show progress until none of `job_ids` is active
    pub fn start_processing_overlay(&self, job_ids: Vec<String>) {
        let mut inner = self.lock();
        for id in job_ids {
            if !inner.overlay_jobs.contains(&id) {
                inner.overlay_jobs.push(id);
            }
        }
        if !inner.overlay_jobs.is_empty() {
            info!("Showing processing overlay for {:?}", inner.overlay_jobs);
            inner.state = EngineState::ShowingOverlay;
        }
        drop(inner);
        self.waker.notify();
    }

    pub fn stop_processing_overlay(&self) {
        let mut inner = self.lock();
        if !inner.overlay_jobs.is_empty() {
            info!("Processing overlay dismissed");
            inner.overlay_jobs.clear();
        }
        drop(inner);
        self.waker.notify();
    }

    /// Reload the current media from disk on the next tick
    pub fn force_media_refresh(&self) {
        let mut inner = self.lock();
        if let Some(media) = &inner.current {
            info!("Refreshing '{}'", media.slug);
        }
        inner.unload();
        drop(inner);
        self.waker.notify();
    }

    /// Media was deleted: drop its frames now if they are loaded.
    pub fn handle_media_deletion(&self, slug: &str) -> Result<(), StoreError> {
        let mut inner = self.lock();
        if inner.current.as_ref().is_some_and(|m| m.slug == slug) {
            info!("'{}' deleted while playing, unloading", slug);
            inner.unload();
        }
        let result = self.store.remove_from_loop(slug);
        drop(inner);
        self.waker.notify();
        result
    }

    // ------------------------------------------------------------------
    // Status
    // ------------------------------------------------------------------

    pub fn status(&self) -> PlayerStatus {
        let inner = self.lock();
        let media = inner.current.as_ref();
        PlayerStatus {
            is_playing: inner.state == EngineState::Playing && !inner.cursor.paused,
            current_media: media.map(|m| m.slug.clone()),
            loop_index: inner.loop_index,
            total_media: inner.total_media,
            frame_rate: media.map_or(self.settings.frame_rate, |m| m.fps),
            loop_mode: inner.cursor.loop_mode,
            showing_progress: !inner.overlay_jobs.is_empty(),
            frame_index: inner.cursor.frame_index,
            display_available: inner.display.is_available(),
            state: inner.state,
            cache_hit_rate: media.map_or(0.0, |m| m.cache.stats().hit_rate()),
            display: inner.display.health().clone(),
        }
    }

    pub fn cursor(&self) -> PlaybackCursor {
        self.lock().cursor
    }

    pub fn state(&self) -> EngineState {
        self.lock().state
    }

    pub fn current_media(&self) -> Option<Slug> {
        self.lock().current.as_ref().map(|m| m.slug.clone())
    }

    /// Counters of the loaded media's cache
    pub fn cache_stats(&self) -> Option<Arc<CacheStats>> {
        self.lock().current.as_ref().map(|m| m.cache.stats())
    }

    /// Cached frame count and current capacity of the loaded media
    pub fn cache_usage(&self) -> Option<(usize, usize)> {
        self.lock()
            .current
            .as_ref()
            .map(|m| (m.cache.len(), m.cache.capacity()))
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
