//! Engine scenarios driven tick by tick against fakes.

use std::sync::Arc;
use std::time::{Duration, Instant};

use super::display::{DisplayPort, RecoveryPolicy};
use super::frame_source::{DiskLoader, FrameLayout, write_packed};
use super::overlay::{JobBoard, JobProgress};
use super::player::{EngineSettings, EngineState, LoopMode, PlaybackEngine, Step};
use super::playlist::{JsonPlaylistStore, MediaDescriptor, MemoryPlaylistStore, PlaylistStore};
use super::telemetry::{FixedMemory, MemoryThresholds};
use super::testing::{FakeDisplay, MemoryLoader, MemorySource, tagged_frames};

const W: usize = 4;
const H: usize = 2;
const FRAME_SIZE: usize = W * H * 2;

struct Rig {
    engine: PlaybackEngine,
    store: Arc<MemoryPlaylistStore>,
    loader: Arc<MemoryLoader>,
    display: FakeDisplay,
    telemetry: Arc<FixedMemory>,
    jobs: Arc<JobBoard>,
}

impl Rig {
    fn tick(&self) -> Step {
        self.engine.tick().expect("tick")
    }

    fn ticks(&self, n: usize) {
        for _ in 0..n {
            self.tick();
        }
    }

    fn active(&self) -> Option<String> {
        self.store.get_active().unwrap()
    }

    fn loop_slugs(&self) -> Vec<String> {
        self.store.list_loop().unwrap()
    }

    /// Media ids in write order, consecutive repeats collapsed
    fn media_sequence(&self) -> Vec<u8> {
        let mut seq: Vec<u8> = self
            .display
            .written_tags()
            .into_iter()
            .map(|(id, _)| id)
            .collect();
        seq.dedup();
        seq
    }
}

fn quick_policy() -> RecoveryPolicy {
    RecoveryPolicy {
        recovery_delay: Duration::ZERO,
        init_retry_delay: Duration::ZERO,
        ..Default::default()
    }
}

/// `media`: (slug, media id, frame count)
fn rig_with(media: &[(&str, u8, usize)], settings: EngineSettings, display: FakeDisplay) -> Rig {
    let slugs: Vec<&str> = media.iter().map(|(s, _, _)| *s).collect();
    let store = Arc::new(MemoryPlaylistStore::with_loop(&slugs));
    let loader = Arc::new(MemoryLoader::new());
    for (slug, id, count) in media {
        loader.insert(slug, MemorySource::tagged(*id, *count, FRAME_SIZE));
    }
    let telemetry = Arc::new(FixedMemory::plenty());
    let jobs = Arc::new(JobBoard::new());

    let port = DisplayPort::new(Box::new(display.clone()), quick_policy(), W, H);
    let engine = PlaybackEngine::new(
        settings,
        port,
        Arc::clone(&store) as Arc<dyn PlaylistStore>,
        Arc::clone(&loader) as _,
        Arc::clone(&telemetry) as _,
    )
    .with_jobs(Arc::clone(&jobs) as _);
    engine.start_display();

    Rig {
        engine,
        store,
        loader,
        display,
        telemetry,
        jobs,
    }
}

fn rig(media: &[(&str, u8, usize)], settings: EngineSettings) -> Rig {
    rig_with(media, settings, FakeDisplay::new())
}

fn abc() -> [(&'static str, u8, usize); 3] {
    [("a", 1, 2), ("b", 2, 2), ("c", 3, 2)]
}

#[test]
fn test_one_mode_repeat_two_then_switch() {
    let settings = EngineSettings {
        loop_mode: LoopMode::One,
        ..Default::default()
    };
    let rig = rig(&abc(), settings);
    rig.store
        .upsert_media(MediaDescriptor::new("a").with_repeat_count(2));

    // Two frames per pass: two sequence ends keep A
    rig.ticks(4);
    assert_eq!(rig.active().as_deref(), Some("a"));
    assert_eq!(rig.engine.cursor().loops_done, 2);

    // Third sequence end switches to B, counter reset
    rig.ticks(2);
    assert_eq!(rig.active().as_deref(), Some("b"));
    assert_eq!(rig.engine.cursor().loops_done, 0);
    assert_eq!(rig.engine.current_media(), None);

    rig.tick();
    assert_eq!(rig.engine.current_media().as_deref(), Some("b"));
}

#[test]
fn test_all_mode_plays_each_once_in_order() {
    let rig = rig(&abc(), EngineSettings::default());
    rig.ticks(8);
    assert_eq!(
        rig.display.written_tags(),
        vec![(1, 0), (1, 1), (2, 0), (2, 1), (3, 0), (3, 1), (1, 0), (1, 1)]
    );
}

#[test]
fn test_all_mode_without_auto_advance_restarts() {
    let settings = EngineSettings {
        auto_advance: false,
        ..Default::default()
    };
    let rig = rig(&abc(), settings);
    rig.ticks(6);
    assert_eq!(rig.media_sequence(), vec![1]);
}

#[test]
fn test_per_media_repeat_in_all_mode() {
    let rig = rig(&abc(), EngineSettings::default());
    rig.store
        .upsert_media(MediaDescriptor::new("b").with_repeat_count(2));
    rig.ticks(10);
    let ids: Vec<u8> = rig.display.written_tags().iter().map(|t| t.0).collect();
    assert_eq!(ids, vec![1, 1, 2, 2, 2, 2, 3, 3, 1, 1]);
}

#[test]
fn test_single_media_loops_forever() {
    for repeat in [-1, 0, 1, 3] {
        let settings = EngineSettings {
            repeat_count: repeat,
            ..Default::default()
        };
        let rig = rig(&[("solo", 7, 3)], settings);
        rig.ticks(30);
        assert_eq!(rig.media_sequence(), vec![7]);
        assert_eq!(rig.display.written_count(), 30);
        assert_eq!(rig.active().as_deref(), Some("solo"));
    }
}

#[test]
fn test_deleting_active_media_drops_it_immediately() {
    let rig = rig(&[("a", 1, 10), ("b", 2, 10)], EngineSettings::default());
    rig.ticks(3);
    assert_eq!(rig.engine.current_media().as_deref(), Some("a"));

    rig.engine.handle_media_deletion("a").unwrap();
    assert_eq!(rig.engine.current_media(), None);
    assert_eq!(rig.loop_slugs(), vec!["b"]);

    let before = rig.display.written_count();
    rig.ticks(5);
    let after: Vec<u8> = rig.display.written_tags()[before..]
        .iter()
        .map(|t| t.0)
        .collect();
    assert!(after.iter().all(|id| *id == 2), "{:?}", after);
    assert_eq!(rig.active().as_deref(), Some("b"));
}

#[test]
fn test_deleting_other_media_keeps_playing() {
    let rig = rig(&abc(), EngineSettings::default());
    rig.tick();
    rig.engine.handle_media_deletion("c").unwrap();
    assert_eq!(rig.engine.current_media().as_deref(), Some("a"));
    assert_eq!(rig.engine.cursor().frame_index, 1);
}

#[test]
fn test_pause_resume_keeps_frame_index() {
    let rig = rig(&[("a", 1, 10)], EngineSettings::default());
    rig.ticks(3);
    assert_eq!(rig.engine.cursor().frame_index, 3);

    rig.engine.pause();
    rig.engine.pause();
    let written = rig.display.written_count();
    for _ in 0..5 {
        assert_eq!(rig.tick(), Step::Paused);
    }
    assert_eq!(rig.engine.state(), EngineState::Paused);
    assert_eq!(rig.display.written_count(), written);
    assert_eq!(rig.engine.cursor().frame_index, 3);
    assert!(!rig.engine.status().is_playing);

    rig.engine.resume();
    rig.tick();
    assert_eq!(rig.display.written_tags().last(), Some(&(1, 3)));
    assert_eq!(rig.engine.cursor().frame_index, 4);
}

#[test]
fn test_toggle_pause() {
    let rig = rig(&[("a", 1, 4)], EngineSettings::default());
    assert!(rig.engine.toggle_pause());
    assert!(rig.engine.cursor().paused);
    assert!(!rig.engine.toggle_pause());
    assert!(!rig.engine.cursor().paused);
}

#[test]
fn test_headless_keeps_advancing() {
    let display = FakeDisplay::new();
    display.fail_init(true);
    let rig = rig_with(&abc(), EngineSettings::default(), display);

    rig.ticks(5);
    assert_eq!(rig.display.written_count(), 0);
    let status = rig.engine.status();
    assert!(!status.display_available);
    assert_eq!(status.current_media.as_deref(), Some("c"));
    assert_eq!(status.frame_index, 1);
}

#[test]
fn test_write_failure_retries_same_frame() {
    let rig = rig(&[("a", 1, 4)], EngineSettings::default());
    rig.display.fail_writes(true);
    rig.ticks(2);
    assert_eq!(rig.engine.cursor().frame_index, 0);
    assert_eq!(rig.engine.status().display.consecutive_failures, 2);

    rig.display.fail_writes(false);
    rig.tick();
    assert_eq!(rig.display.written_tags(), vec![(1, 0)]);
    assert_eq!(rig.engine.cursor().frame_index, 1);
}

#[test]
fn test_broken_media_leaves_loop() {
    let rig = rig(&[("a", 1, 2), ("c", 3, 2)], EngineSettings::default());
    // Catalogued and looped but nothing on "disk"
    rig.store.upsert_media(MediaDescriptor::new("broken"));
    rig.store.replace_state({
        let mut state = rig.store.snapshot();
        state.loop_slugs = vec!["a".into(), "broken".into(), "c".into()];
        state.active = Some("broken".into());
        state
    });

    rig.tick();
    assert_eq!(rig.loop_slugs(), vec!["a", "c"]);
    assert_eq!(rig.active().as_deref(), Some("c"));
    assert_eq!(rig.display.written_tags(), vec![(3, 0)]);
    assert_eq!(rig.loader.open_count("broken"), 1);

    // Never retried
    rig.ticks(10);
    assert_eq!(rig.loader.open_count("broken"), 1);
}

#[test]
fn test_zero_frame_and_uncatalogued_media_are_removed() {
    let rig = rig(&[("a", 1, 2)], EngineSettings::default());
    rig.loader.insert("empty", MemorySource::new(Vec::new(), FRAME_SIZE));
    rig.store.upsert_media(MediaDescriptor::new("empty"));
    rig.store.add_to_loop("empty");
    rig.store.replace_state({
        let mut state = rig.store.snapshot();
        state.loop_slugs.insert(0, "ghost".into());
        state
    });
    rig.store.set_active(Some("empty")).unwrap();

    rig.tick();
    assert_eq!(rig.loop_slugs(), vec!["a"]);
    assert_eq!(rig.active().as_deref(), Some("a"));
}

#[test]
fn test_wrong_frame_size_is_unusable() {
    let rig = rig(&[("a", 1, 2)], EngineSettings::default());
    rig.loader.insert("big", MemorySource::tagged(9, 3, FRAME_SIZE * 2));
    rig.store.upsert_media(MediaDescriptor::new("big"));
    rig.store.add_to_loop("big");
    rig.store.set_active(Some("big")).unwrap();

    rig.tick();
    assert_eq!(rig.loop_slugs(), vec!["a"]);
    assert_eq!(rig.display.written_tags(), vec![(1, 0)]);
}

#[test]
fn test_all_broken_goes_idle() {
    let rig = rig(&[("a", 1, 2), ("b", 2, 2)], EngineSettings::default());
    rig.loader.remove("a");
    rig.loader.remove("b");

    assert_eq!(rig.tick(), Step::Idle);
    assert_eq!(rig.engine.state(), EngineState::Idle);
    assert!(rig.loop_slugs().is_empty());
    assert_eq!(rig.active(), None);
    assert_eq!(rig.tick(), Step::Idle);
}

#[test]
fn test_empty_loop_is_idle() {
    let rig = rig(&[], EngineSettings::default());
    assert_eq!(rig.tick(), Step::Idle);
    let status = rig.engine.status();
    assert_eq!(status.state, EngineState::Idle);
    assert_eq!(status.total_media, 0);
    assert!(!status.is_playing);
}

#[test]
fn test_media_removed_from_loop_externally() {
    let rig = rig(&[("a", 1, 2), ("b", 2, 2)], EngineSettings::default());
    rig.tick();
    rig.store.remove_from_loop("a").unwrap();

    // Sequence end notices A left the loop and reselects
    rig.ticks(3);
    let ids: Vec<u8> = rig.display.written_tags().iter().map(|t| t.0).collect();
    assert_eq!(ids, vec![1, 1, 2, 2]);
}

#[test]
fn test_next_previous_wrap() {
    let rig = rig(&abc(), EngineSettings::default());
    rig.tick();

    rig.engine.next_media().unwrap();
    assert_eq!(rig.active().as_deref(), Some("b"));
    assert_eq!(rig.engine.current_media(), None);

    rig.engine.previous_media().unwrap();
    rig.engine.previous_media().unwrap();
    assert_eq!(rig.active().as_deref(), Some("c"));

    rig.tick();
    assert_eq!(rig.display.written_tags().last(), Some(&(3, 0)));
    assert_eq!(rig.engine.status().loop_index, 2);
}

#[test]
fn test_set_active_command() {
    let rig = rig(&abc(), EngineSettings::default());
    rig.tick();
    rig.engine.set_active("c").unwrap();
    rig.tick();
    assert_eq!(rig.display.written_tags().last(), Some(&(3, 0)));
    assert!(rig.engine.set_active("nope").is_err());
    assert_eq!(rig.engine.current_media().as_deref(), Some("c"));
}

#[test]
fn test_toggle_loop_mode() {
    let rig = rig(&abc(), EngineSettings::default());
    assert_eq!(rig.engine.toggle_loop_mode(), LoopMode::One);
    assert_eq!(rig.engine.status().loop_mode, LoopMode::One);

    // repeat 1 in `one` mode: two passes before switching
    rig.ticks(4);
    assert_eq!(rig.media_sequence(), vec![1]);
    rig.ticks(1);
    assert_eq!(rig.media_sequence(), vec![1, 2]);
}

#[test]
fn test_force_refresh_reloads_from_start() {
    let rig = rig(&[("a", 1, 5)], EngineSettings::default());
    rig.ticks(3);
    rig.engine.force_media_refresh();
    rig.tick();
    assert_eq!(rig.loader.open_count("a"), 2);
    assert_eq!(rig.display.written_tags().last(), Some(&(1, 0)));
}

#[test]
fn test_static_media_is_held() {
    let settings = EngineSettings {
        static_hold: Duration::from_secs(7),
        ..Default::default()
    };
    let rig = rig(&[("still", 4, 1)], settings);
    assert_eq!(rig.tick(), Step::Sleep(Duration::from_secs(7)));
    assert_eq!(rig.display.written_tags(), vec![(4, 0)]);
    assert_eq!(rig.engine.cursor().frame_index, 0);
}

#[test]
fn test_per_frame_duration_paces() {
    let rig = rig(&[("a", 1, 2)], EngineSettings::default());
    rig.loader.insert(
        "a",
        MemorySource::new(tagged_frames(1, 2, FRAME_SIZE), FRAME_SIZE)
            .with_durations(vec![Duration::from_millis(500), Duration::from_millis(20)]),
    );
    let Step::Sleep(pace) = rig.tick() else {
        panic!("expected a pacing sleep");
    };
    assert!(pace > Duration::from_millis(100), "{:?}", pace);
    assert!(pace <= Duration::from_millis(500));
}

#[test]
fn test_descriptor_fps_overrides_config() {
    let rig = rig(&[("a", 1, 4)], EngineSettings::default());
    rig.store
        .upsert_media(MediaDescriptor::new("a").with_fps(2.0));
    let Step::Sleep(pace) = rig.tick() else {
        panic!("expected a pacing sleep");
    };
    assert!(pace > Duration::from_millis(400), "{:?}", pace);
    assert_eq!(rig.engine.status().frame_rate, 2.0);
}

#[test]
fn test_preload_fills_cache_ahead() {
    let rig = rig(&[("a", 1, 20)], EngineSettings::default());
    rig.tick();
    // current frame + five ahead
    assert_eq!(rig.engine.cache_usage().map(|u| u.0), Some(6));
    rig.tick();
    // frame 1 was preloaded
    let stats = rig.engine.cache_stats().unwrap();
    assert_eq!(stats.hits(), 1);
    assert_eq!(stats.misses(), 1);
}

#[test]
fn test_low_memory_skips_preload_and_trims() {
    let rig = rig(&[("a", 1, 20)], EngineSettings::default());
    rig.ticks(2);
    let (len, _) = rig.engine.cache_usage().unwrap();
    assert!(len > 4);

    rig.telemetry.set_available_mb(10);
    rig.tick();
    let (len, capacity) = rig.engine.cache_usage().unwrap();
    assert_eq!(capacity, 4);
    assert!(len <= capacity);
}

#[test]
fn test_low_memory_with_preload_headroom_preloads_three() {
    let rig = rig(&[("a", 1, 20)], EngineSettings::default());
    // Low, but preloading still advised
    let thresholds = MemoryThresholds {
        low_mb: 48,
        preload_min_mb: 0,
        comfortable_mb: 256,
    };
    let telemetry = Arc::new(FixedMemory::new(10, thresholds));
    let port = DisplayPort::new(Box::new(FakeDisplay::new()), quick_policy(), W, H);
    let engine = PlaybackEngine::new(
        EngineSettings::default(),
        port,
        Arc::clone(&rig.store) as Arc<dyn PlaylistStore>,
        Arc::clone(&rig.loader) as _,
        telemetry as _,
    );
    engine.start_display();
    engine.tick().unwrap();
    // Capacity is 4 under pressure: frame 0 plus three ahead
    assert_eq!(engine.cache_usage(), Some((4, 4)));
}

#[test]
fn test_overlay_suspends_playback() {
    let rig = rig(&[("a", 1, 10)], EngineSettings::default());
    rig.ticks(2);

    rig.jobs.update("job-1", JobProgress::running(40));
    rig.engine.start_processing_overlay(vec!["job-1".into()]);
    assert!(rig.engine.status().showing_progress);

    for _ in 0..3 {
        assert_eq!(
            rig.tick(),
            Step::Sleep(rig.engine.settings().overlay_poll)
        );
    }
    assert_eq!(rig.engine.state(), EngineState::ShowingOverlay);
    assert_eq!(rig.engine.cursor().frame_index, 2);
    // Overlay frames are not media frames
    assert_eq!(rig.display.written_count(), 5);

    rig.jobs.update("job-1", JobProgress::completed());
    assert_eq!(rig.tick(), Step::Continue);
    assert!(!rig.engine.status().showing_progress);
    rig.tick();
    assert_eq!(rig.display.written_tags().last(), Some(&(1, 2)));
}

#[test]
fn test_stop_processing_overlay() {
    let rig = rig(&[("a", 1, 10)], EngineSettings::default());
    rig.jobs.update("job-1", JobProgress::running(0));
    rig.engine.start_processing_overlay(vec!["job-1".into()]);
    rig.tick();
    rig.engine.stop_processing_overlay();
    rig.tick();
    assert_eq!(rig.display.written_tags().last(), Some(&(1, 0)));
}

#[test]
fn test_status_snapshot() {
    let rig = rig(&abc(), EngineSettings::default());
    rig.tick();
    let status = rig.engine.status();
    assert!(status.is_playing);
    assert_eq!(status.current_media.as_deref(), Some("a"));
    assert_eq!(status.loop_index, 0);
    assert_eq!(status.total_media, 3);
    assert_eq!(status.loop_mode, LoopMode::All);
    assert!(!status.showing_progress);
    assert!(status.display_available);

    let json = serde_json::to_value(&status).unwrap();
    assert_eq!(json["loop_mode"], "all");
    assert_eq!(json["state"], "playing");
}

#[test]
fn test_plays_packed_media_from_disk() {
    let tmp = tempfile::TempDir::new().unwrap();
    let media_dir = tmp.path().join("media");
    let layout = FrameLayout::default();

    let frames = tagged_frames(5, 3, FRAME_SIZE);
    std::fs::create_dir_all(media_dir.join("clip")).unwrap();
    write_packed(
        &layout.packed_path(&media_dir, "clip"),
        FRAME_SIZE,
        frames.iter().map(|f| &f[..]),
    )
    .unwrap();

    let store = Arc::new(JsonPlaylistStore::open(tmp.path().join("index.json")).unwrap());
    store.upsert_media(MediaDescriptor::new("clip")).unwrap();
    store.upsert_media(MediaDescriptor::new("missing")).unwrap();
    store.add_to_loop("missing").unwrap();
    store.add_to_loop("clip").unwrap();

    let display = FakeDisplay::new();
    let port = DisplayPort::new(Box::new(display.clone()), quick_policy(), W, H);
    let engine = PlaybackEngine::new(
        EngineSettings::default(),
        port,
        Arc::clone(&store) as Arc<dyn PlaylistStore>,
        Arc::new(DiskLoader::new(&media_dir, layout)),
        Arc::new(FixedMemory::plenty()),
    );
    assert!(engine.start_display());
    for _ in 0..4 {
        engine.tick().unwrap();
    }
    assert_eq!(display.written_tags(), vec![(5, 0), (5, 1), (5, 2), (5, 0)]);

    let reopened = JsonPlaylistStore::open(tmp.path().join("index.json")).unwrap();
    assert_eq!(reopened.list_loop().unwrap(), vec!["clip"]);
    assert_eq!(reopened.get_active().unwrap().as_deref(), Some("clip"));
}

#[test]
fn test_failed_read_mid_sequence_ends_pass() {
    let rig = rig(&[("a", 1, 4), ("b", 2, 2)], EngineSettings::default());
    rig.loader
        .insert("a", MemorySource::tagged(1, 4, FRAME_SIZE).failing_at(2));

    rig.ticks(3);
    // Frame 2 unreadable: pass over, advance like a normal sequence end
    assert_eq!(rig.display.written_tags(), vec![(1, 0), (1, 1)]);
    assert_eq!(rig.active().as_deref(), Some("b"));

    rig.ticks(3);
    assert_eq!(
        rig.display.written_tags(),
        vec![(1, 0), (1, 1), (2, 0), (2, 1), (1, 0)]
    );
    assert_eq!(rig.loop_slugs(), vec!["a", "b"]);
}

#[test]
fn test_failed_read_mid_sequence_restarts_single_media() {
    let rig = rig(&[("a", 1, 4)], EngineSettings::default());
    rig.loader
        .insert("a", MemorySource::tagged(1, 4, FRAME_SIZE).failing_at(2));

    rig.ticks(4);
    assert_eq!(rig.display.written_tags(), vec![(1, 0), (1, 1), (1, 0)]);
    assert_eq!(rig.loop_slugs(), vec!["a"]);
    assert_eq!(rig.engine.cursor().frame_index, 1);
}

#[test]
fn test_transient_first_frame_failure_keeps_media_in_loop() {
    // One-frame cache: frame 0 is evicted and re-read on the replay
    let settings = EngineSettings {
        repeat_count: 2,
        cache_base_frames: 1,
        cache_max_frames: 1,
        ..Default::default()
    };
    let rig = rig(&[("a", 1, 3), ("b", 2, 2)], settings);
    rig.loader.insert(
        "a",
        MemorySource::tagged(1, 3, FRAME_SIZE).failing_once_at(0, 2),
    );

    rig.ticks(4);
    assert_eq!(rig.display.written_tags(), vec![(1, 0), (1, 1), (1, 2)]);
    assert_eq!(rig.loop_slugs(), vec!["a", "b"]);
    assert_eq!(rig.active().as_deref(), Some("b"));

    rig.tick();
    assert_eq!(rig.display.written_tags().last(), Some(&(2, 0)));
}

#[test]
fn test_unreadable_first_frame_on_fresh_load_leaves_loop() {
    let rig = rig(&[("a", 1, 3), ("b", 2, 2)], EngineSettings::default());
    rig.loader
        .insert("a", MemorySource::tagged(1, 3, FRAME_SIZE).failing_at(0));

    rig.tick();
    assert_eq!(rig.loop_slugs(), vec!["b"]);
    assert_eq!(rig.engine.current_media(), None);

    rig.tick();
    assert_eq!(rig.display.written_tags(), vec![(2, 0)]);
}

#[test]
fn test_legacy_media_with_bad_timing_file_plays() {
    let tmp = tempfile::TempDir::new().unwrap();
    let media_dir = tmp.path().join("media");
    let layout = FrameLayout::default();

    let frame_dir = layout.legacy_dir(&media_dir, "old");
    std::fs::create_dir_all(&frame_dir).unwrap();
    for (i, frame) in tagged_frames(6, 3, FRAME_SIZE).iter().enumerate() {
        std::fs::write(frame_dir.join(format!("{:06}.raw", i)), &frame[..]).unwrap();
    }
    std::fs::write(frame_dir.join("timing.json"), "[40, 40,").unwrap();

    let store = Arc::new(MemoryPlaylistStore::with_loop(&["old"]));
    let display = FakeDisplay::new();
    let port = DisplayPort::new(Box::new(display.clone()), quick_policy(), W, H);
    let engine = PlaybackEngine::new(
        EngineSettings::default(),
        port,
        Arc::clone(&store) as Arc<dyn PlaylistStore>,
        Arc::new(DiskLoader::new(&media_dir, layout)),
        Arc::new(FixedMemory::plenty()),
    );
    engine.start_display();
    for _ in 0..3 {
        engine.tick().unwrap();
    }
    assert_eq!(display.written_tags(), vec![(6, 0), (6, 1), (6, 2)]);
    assert_eq!(store.list_loop().unwrap(), vec!["old"]);
}

#[test]
fn test_removed_job_ends_overlay() {
    let rig = rig(&[("a", 1, 10)], EngineSettings::default());
    rig.jobs.update("job-1", JobProgress::running(10));
    rig.engine.start_processing_overlay(vec!["job-1".into()]);
    rig.tick();
    assert_eq!(rig.engine.state(), EngineState::ShowingOverlay);

    assert!(rig.jobs.remove("job-1").is_some());
    assert_eq!(rig.tick(), Step::Continue);
    assert!(!rig.engine.status().showing_progress);
}

fn engine_in_recovery(recovery_delay: Duration) -> (Arc<PlaybackEngine>, FakeDisplay) {
    let policy = RecoveryPolicy {
        max_consecutive_failures: 1,
        recovery_delay,
        ..quick_policy()
    };
    let display = FakeDisplay::new();
    let port = DisplayPort::new(Box::new(display.clone()), policy, W, H);
    let loader = Arc::new(MemoryLoader::new());
    loader.insert("a", MemorySource::tagged(1, 4, FRAME_SIZE));
    let engine = Arc::new(PlaybackEngine::new(
        EngineSettings::default(),
        port,
        Arc::new(MemoryPlaylistStore::with_loop(&["a"])),
        loader,
        Arc::new(FixedMemory::plenty()),
    ));
    assert!(engine.start_display());
    display.fail_writes(true);
    (engine, display)
}

#[test]
fn test_stop_cuts_recovery_delay_short() {
    let (engine, _display) = engine_in_recovery(Duration::from_secs(30));
    let worker = Arc::clone(&engine);
    let started = Instant::now();
    let ticking = std::thread::spawn(move || worker.tick().map(|_| ()));

    std::thread::sleep(Duration::from_millis(50));
    engine.stop();
    ticking.join().unwrap().unwrap();
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[test]
fn test_command_during_recovery_waits_at_most_the_delay() {
    let (engine, _display) = engine_in_recovery(Duration::from_millis(200));
    let worker = Arc::clone(&engine);
    let ticking = std::thread::spawn(move || worker.tick().map(|_| ()));

    std::thread::sleep(Duration::from_millis(50));
    let started = Instant::now();
    engine.pause();
    assert!(started.elapsed() < Duration::from_secs(2));
    ticking.join().unwrap().unwrap();

    assert_eq!(engine.tick().unwrap(), Step::Paused);
    assert_eq!(engine.cursor().frame_index, 0);
}
