//! Test doubles shared by the core test suites.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::display::DisplayDriver;
use super::error::DisplayError;
use super::frame_source::{FrameData, FrameSource, SourceLoader};

/// One recorded driver call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisplayCall {
    Init,
    /// Write attempt with the buffer length
    Write(usize),
    Cleanup,
    Reset,
    MinimalInit,
}

#[derive(Debug, Default)]
struct FakeState {
    calls: Vec<DisplayCall>,
    written: Vec<Vec<u8>>,
    initialized: bool,
    fail_writes: bool,
    heal_on_init: bool,
    fail_init: bool,
    minimal_init: bool,
}

/// Scriptable display. Clones share state so a test keeps a handle after
/// boxing one copy into a `DisplayPort`.
#[derive(Debug, Clone, Default)]
pub struct FakeDisplay {
    state: Arc<Mutex<FakeState>>,
}

impl FakeDisplay {
    pub fn new() -> Self {
        Self::default()
    }

    fn with<T>(&self, f: impl FnOnce(&mut FakeState) -> T) -> T {
        f(&mut self.state.lock().unwrap())
    }

    pub fn fail_writes(&self, fail: bool) {
        self.with(|s| s.fail_writes = fail);
    }

    /// Next successful `init()` clears the write failure
    pub fn heal_writes_on_init(&self) {
        self.with(|s| s.heal_on_init = true);
    }

    pub fn fail_init(&self, fail: bool) {
        self.with(|s| s.fail_init = fail);
    }

    pub fn support_minimal_init(&self, supported: bool) {
        self.with(|s| s.minimal_init = supported);
    }

    pub fn clear_calls(&self) {
        self.with(|s| s.calls.clear());
    }

    pub fn calls(&self) -> Vec<DisplayCall> {
        self.with(|s| s.calls.clone())
    }

    pub fn count(&self, call: DisplayCall) -> usize {
        self.with(|s| s.calls.iter().filter(|c| **c == call).count())
    }

    /// Calls from the last occurrence of `call` onward
    pub fn calls_since_last(&self, call: DisplayCall) -> Vec<DisplayCall> {
        self.with(|s| match s.calls.iter().rposition(|c| *c == call) {
            Some(pos) => s.calls[pos..].to_vec(),
            None => Vec::new(),
        })
    }

    /// Frames that reached the "hardware"
    pub fn written(&self) -> Vec<Vec<u8>> {
        self.with(|s| s.written.clone())
    }

    pub fn written_count(&self) -> usize {
        self.with(|s| s.written.len())
    }

    /// (media id, frame index) tags of written frames, see `tagged_frames`
    pub fn written_tags(&self) -> Vec<(u8, u8)> {
        self.with(|s| s.written.iter().map(|f| (f[0], f[1])).collect())
    }
}

impl DisplayDriver for FakeDisplay {
    fn init(&mut self) -> Result<(), DisplayError> {
        self.with(|s| {
            s.calls.push(DisplayCall::Init);
            if s.fail_init {
                return Err(DisplayError::Driver("scripted init failure".into()));
            }
            s.initialized = true;
            if s.heal_on_init {
                s.heal_on_init = false;
                s.fail_writes = false;
            }
            Ok(())
        })
    }

    fn write_frame(&mut self, frame: &[u8]) -> Result<(), DisplayError> {
        self.with(|s| {
            s.calls.push(DisplayCall::Write(frame.len()));
            if !s.initialized {
                return Err(DisplayError::NotInitialized);
            }
            if s.fail_writes {
                return Err(DisplayError::Driver("scripted write failure".into()));
            }
            s.written.push(frame.to_vec());
            Ok(())
        })
    }

    fn cleanup(&mut self) -> Result<(), DisplayError> {
        self.with(|s| {
            s.calls.push(DisplayCall::Cleanup);
            s.initialized = false;
            Ok(())
        })
    }

    fn reset(&mut self) -> Result<(), DisplayError> {
        self.with(|s| {
            s.calls.push(DisplayCall::Reset);
            Err(DisplayError::Unsupported("reset"))
        })
    }

    fn minimal_init(&mut self) -> Result<(), DisplayError> {
        self.with(|s| {
            s.calls.push(DisplayCall::MinimalInit);
            if !s.minimal_init {
                return Err(DisplayError::Unsupported("minimal_init"));
            }
            s.initialized = true;
            Ok(())
        })
    }

    fn is_initialized(&self) -> bool {
        self.with(|s| s.initialized)
    }

    fn name(&self) -> &str {
        "fake"
    }
}

/// `count` frames of `frame_size` bytes; byte 0 is `media_id`, byte 1 the
/// frame index, so written output can be traced back to its source.
pub fn tagged_frames(media_id: u8, count: usize, frame_size: usize) -> Vec<FrameData> {
    (0..count)
        .map(|i| {
            let mut buf = vec![0u8; frame_size];
            buf[0] = media_id;
            buf[1] = i as u8;
            FrameData::from(buf)
        })
        .collect()
}

/// Scripted read failure for one frame index
#[derive(Debug, Clone, Copy)]
enum ReadFailure {
    Always,
    /// Only the n-th read (1-based)
    Nth(usize),
}

/// In-memory frame source
#[derive(Debug)]
pub struct MemorySource {
    frames: Vec<FrameData>,
    frame_size: usize,
    durations: Option<Vec<Duration>>,
    failures: HashMap<usize, ReadFailure>,
    reads: Mutex<HashMap<usize, usize>>,
}

impl MemorySource {
    pub fn new(frames: Vec<FrameData>, frame_size: usize) -> Self {
        Self {
            frames,
            frame_size,
            durations: None,
            failures: HashMap::new(),
            reads: Mutex::new(HashMap::new()),
        }
    }

    /// Every read of `index` returns `None`
    pub fn failing_at(mut self, index: usize) -> Self {
        self.failures.insert(index, ReadFailure::Always);
        self
    }

    /// Only the `nth` read (1-based) of `index` returns `None`
    pub fn failing_once_at(mut self, index: usize, nth: usize) -> Self {
        self.failures.insert(index, ReadFailure::Nth(nth));
        self
    }

    pub fn tagged(media_id: u8, count: usize, frame_size: usize) -> Self {
        Self::new(tagged_frames(media_id, count, frame_size), frame_size)
    }

    pub fn with_durations(mut self, durations: Vec<Duration>) -> Self {
        self.durations = Some(durations);
        self
    }
}

impl FrameSource for MemorySource {
    fn frame_count(&self) -> usize {
        self.frames.len()
    }

    fn frame_size(&self) -> usize {
        self.frame_size
    }

    fn get_frame(&self, index: usize) -> Option<FrameData> {
        let read = {
            let mut reads = self.reads.lock().unwrap();
            let count = reads.entry(index).or_default();
            *count += 1;
            *count
        };
        match self.failures.get(&index) {
            Some(ReadFailure::Always) => None,
            Some(ReadFailure::Nth(n)) if *n == read => None,
            _ => self.frames.get(index).cloned(),
        }
    }

    fn frame_duration(&self, index: usize) -> Option<Duration> {
        self.durations.as_ref()?.get(index).copied()
    }

    fn kind(&self) -> &'static str {
        "memory"
    }
}

/// Loader over in-memory sources keyed by slug. Counts opens.
#[derive(Debug, Default)]
pub struct MemoryLoader {
    sources: Mutex<HashMap<String, Arc<MemorySource>>>,
    opens: Mutex<HashMap<String, usize>>,
}

impl MemoryLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, slug: &str, source: MemorySource) {
        self.sources
            .lock()
            .unwrap()
            .insert(slug.to_string(), Arc::new(source));
    }

    pub fn remove(&self, slug: &str) {
        self.sources.lock().unwrap().remove(slug);
    }

    pub fn open_count(&self, slug: &str) -> usize {
        self.opens.lock().unwrap().get(slug).copied().unwrap_or(0)
    }
}

impl SourceLoader for MemoryLoader {
    fn open(&self, slug: &str, _frame_size: usize) -> Option<Arc<dyn FrameSource>> {
        *self.opens.lock().unwrap().entry(slug.to_string()).or_default() += 1;
        let source = self.sources.lock().unwrap().get(slug).cloned()?;
        Some(source as Arc<dyn FrameSource>)
    }
}
