//! On-disk frame storage behind one `FrameSource` interface
//!
//! Two layouts exist on the device:
//!
//! - **Packed**: one file, 8-byte big-endian header `[frame_count][frame_size]`
//!   followed by `frame_count * frame_size` raw bytes. The file length must
//!   match the header exactly, otherwise the source reports zero frames.
//! - **Per-file** (legacy): `NNNNNN.<ext>` files in a subdirectory, one raw
//!   buffer each. The directory is scanned on load; stored frame counts in the
//!   catalog are never trusted.
//!
//! `open_media()` picks the layout once per load: packed first, per-file as a
//! fallback. Callers only ever see `Arc<dyn FrameSource>`.

use log::{debug, info, trace, warn};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::error::FrameSourceError;

/// Raw pixel buffer for one frame. Cheap to clone.
pub type FrameData = Arc<[u8]>;

/// Packed header length in bytes
pub const PACKED_HEADER_LEN: u64 = 8;

/// Legacy per-frame timing file (JSON array of milliseconds)
pub const TIMING_FILE: &str = "timing.json";

/// Random-access view of one media item's frames.
pub trait FrameSource: Send + Sync {
    /// Number of usable frames. Zero means the source is unusable.
    fn frame_count(&self) -> usize;

    /// Fixed size of every frame in bytes
    fn frame_size(&self) -> usize;

    /// Read frame `index`. `None` past the end or on a read failure.
    fn get_frame(&self, index: usize) -> Option<FrameData>;

    /// Per-frame display duration for variable-rate sources
    fn frame_duration(&self, _index: usize) -> Option<Duration> {
        None
    }

    /// Short layout name for logs and status
    fn kind(&self) -> &'static str;

    fn is_usable(&self) -> bool {
        self.frame_count() > 0
    }
}

/// Where a media item's frames live inside its directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FrameLayout {
    /// Packed file name inside `<media_dir>/<slug>/`
    pub packed_file_name: String,
    /// Legacy per-file subdirectory inside `<media_dir>/<slug>/`
    pub legacy_frame_dir: String,
    /// Legacy frame file extension (without dot)
    pub legacy_frame_ext: String,
}

impl Default for FrameLayout {
    fn default() -> Self {
        Self {
            packed_file_name: "frames.bin".to_string(),
            legacy_frame_dir: "frames".to_string(),
            legacy_frame_ext: "raw".to_string(),
        }
    }
}

impl FrameLayout {
    pub fn packed_path(&self, media_dir: &Path, slug: &str) -> PathBuf {
        media_dir.join(slug).join(&self.packed_file_name)
    }

    pub fn legacy_dir(&self, media_dir: &Path, slug: &str) -> PathBuf {
        media_dir.join(slug).join(&self.legacy_frame_dir)
    }
}

// ============================================================================
// Packed format
// ============================================================================

/// Single-file packed frame storage.
#[derive(Debug)]
pub struct PackedFrameSource {
    path: PathBuf,
    file: Mutex<Option<File>>,
    frame_count: usize,
    frame_size: usize,
}

impl PackedFrameSource {
    /// Open and validate a packed file.
    ///
    /// Never fails: a missing file, short header, length mismatch or a frame
    /// size different from `expected_frame_size` all produce a zero-frame source.
    pub fn open(path: &Path, expected_frame_size: Option<usize>) -> Self {
        match Self::try_open(path, expected_frame_size) {
            Ok(source) => source,
            Err(reason) => {
                debug!("Packed source {} unusable: {}", path.display(), reason);
                Self::empty(path)
            }
        }
    }

    fn empty(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            file: Mutex::new(None),
            frame_count: 0,
            frame_size: 0,
        }
    }

    fn try_open(path: &Path, expected_frame_size: Option<usize>) -> Result<Self, String> {
        let mut file = File::open(path).map_err(|e| e.to_string())?;
        let file_len = file.metadata().map_err(|e| e.to_string())?.len();

        let mut header = [0u8; PACKED_HEADER_LEN as usize];
        file.read_exact(&mut header).map_err(|e| format!("header: {}", e))?;
        let frame_count = u32::from_be_bytes([header[0], header[1], header[2], header[3]]) as u64;
        let frame_size = u32::from_be_bytes([header[4], header[5], header[6], header[7]]) as u64;

        if frame_count == 0 || frame_size == 0 {
            return Err(format!("empty header ({} x {})", frame_count, frame_size));
        }

        let expected_len = frame_count
            .checked_mul(frame_size)
            .and_then(|body| body.checked_add(PACKED_HEADER_LEN))
            .ok_or_else(|| "header overflows".to_string())?;
        if file_len != expected_len {
            warn!(
                "Packed file {} length mismatch: header says {} bytes, file has {}",
                path.display(),
                expected_len,
                file_len
            );
            return Err("length mismatch".to_string());
        }

        if let Some(expected) = expected_frame_size
            && expected as u64 != frame_size
        {
            warn!(
                "Packed file {} frame size {} does not match display ({} bytes)",
                path.display(),
                frame_size,
                expected
            );
            return Err("frame size mismatch".to_string());
        }

        Ok(Self {
            path: path.to_path_buf(),
            file: Mutex::new(Some(file)),
            frame_count: frame_count as usize,
            frame_size: frame_size as usize,
        })
    }
}

impl FrameSource for PackedFrameSource {
    fn frame_count(&self) -> usize {
        self.frame_count
    }

    fn frame_size(&self) -> usize {
        self.frame_size
    }

    fn get_frame(&self, index: usize) -> Option<FrameData> {
        if index >= self.frame_count {
            return None;
        }
        let offset = PACKED_HEADER_LEN + (index as u64) * (self.frame_size as u64);

        let mut guard = self.file.lock().unwrap_or_else(|e| e.into_inner());
        let file = guard.as_mut()?;
        let mut buf = vec![0u8; self.frame_size];
        let read = file
            .seek(SeekFrom::Start(offset))
            .and_then(|_| file.read_exact(&mut buf));
        match read {
            Ok(()) => {
                trace!("Packed read {}#{}", self.path.display(), index);
                Some(buf.into())
            }
            Err(e) => {
                warn!("Packed read failed {}#{}: {}", self.path.display(), index, e);
                None
            }
        }
    }

    fn kind(&self) -> &'static str {
        "packed"
    }
}

/// Write frames in packed layout. Every frame must be `frame_size` bytes.
pub fn write_packed<'a>(
    path: &Path,
    frame_size: usize,
    frames: impl IntoIterator<Item = &'a [u8]>,
) -> std::io::Result<usize> {
    let frames: Vec<&[u8]> = frames.into_iter().collect();
    if let Some(bad) = frames.iter().find(|f| f.len() != frame_size) {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("frame is {} bytes, expected {}", bad.len(), frame_size),
        ));
    }
    let count = u32::try_from(frames.len())
        .map_err(|_| std::io::Error::new(std::io::ErrorKind::InvalidInput, "too many frames"))?;
    let size = u32::try_from(frame_size)
        .map_err(|_| std::io::Error::new(std::io::ErrorKind::InvalidInput, "frame too large"))?;

    let mut out = std::io::BufWriter::new(File::create(path)?);
    out.write_all(&count.to_be_bytes())?;
    out.write_all(&size.to_be_bytes())?;
    for frame in &frames {
        out.write_all(frame)?;
    }
    out.flush()?;
    Ok(frames.len())
}

// ============================================================================
// Per-file (legacy) format
// ============================================================================

/// Legacy storage: one file per frame, named by zero-padded 6-digit index.
#[derive(Debug)]
pub struct PerFileFrameSource {
    frames: Vec<PathBuf>,
    frame_size: usize,
    durations: Vec<Duration>,
}

impl PerFileFrameSource {
    /// Scan `dir` for frames.
    ///
    /// Walks `000000.<ext>`, `000001.<ext>`, ... until the first gap. Only when
    /// not a single sequential file exists does it fall back to every
    /// 6-digit-named file in the directory, sorted by name.
    pub fn open(dir: &Path, ext: &str, frame_size: usize) -> Result<Self, FrameSourceError> {
        let mut frames = Vec::new();
        if dir.is_dir() {
            frames = scan_sequential(dir, ext);
            if frames.is_empty() {
                frames = scan_unordered(dir, ext)?;
                if !frames.is_empty() {
                    info!(
                        "Legacy frames in {} are not sequential from 0, using {} files by name",
                        dir.display(),
                        frames.len()
                    );
                }
            }
        }

        let durations = load_timing(dir).unwrap_or_else(|e| {
            warn!("Ignoring {} in {}: {}", TIMING_FILE, dir.display(), e);
            Vec::new()
        });

        debug!(
            "Per-file source {}: {} frames{}",
            dir.display(),
            frames.len(),
            if durations.is_empty() { "" } else { " (variable rate)" }
        );

        Ok(Self {
            frames,
            frame_size,
            durations,
        })
    }
}

fn frame_file_name(index: usize, ext: &str) -> String {
    format!("{:06}.{}", index, ext)
}

fn scan_sequential(dir: &Path, ext: &str) -> Vec<PathBuf> {
    let mut frames = Vec::new();
    loop {
        let path = dir.join(frame_file_name(frames.len(), ext));
        if !path.is_file() {
            break;
        }
        frames.push(path);
    }
    frames
}

fn scan_unordered(dir: &Path, ext: &str) -> Result<Vec<PathBuf>, FrameSourceError> {
    let pattern = format!(
        "{}/[0-9][0-9][0-9][0-9][0-9][0-9].{}",
        glob::Pattern::escape(&dir.to_string_lossy()),
        ext
    );
    let mut frames: Vec<PathBuf> = glob::glob(&pattern)?
        .filter_map(|entry| match entry {
            Ok(path) => Some(path),
            Err(e) => {
                warn!("Skipping unreadable frame entry: {}", e);
                None
            }
        })
        .filter(|path| path.is_file())
        .collect();
    frames.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    Ok(frames)
}

fn load_timing(dir: &Path) -> Result<Vec<Duration>, FrameSourceError> {
    let path = dir.join(TIMING_FILE);
    if !path.is_file() {
        return Ok(Vec::new());
    }
    let raw = std::fs::read_to_string(&path).map_err(|source| FrameSourceError::Io {
        path: path.clone(),
        source,
    })?;
    let millis: Vec<u64> =
        serde_json::from_str(&raw).map_err(|source| FrameSourceError::Timing { path, source })?;
    Ok(millis.into_iter().map(Duration::from_millis).collect())
}

impl FrameSource for PerFileFrameSource {
    fn frame_count(&self) -> usize {
        self.frames.len()
    }

    fn frame_size(&self) -> usize {
        self.frame_size
    }

    fn get_frame(&self, index: usize) -> Option<FrameData> {
        let path = self.frames.get(index)?;
        match std::fs::read(path) {
            Ok(buf) if buf.len() == self.frame_size => Some(buf.into()),
            Ok(buf) => {
                warn!(
                    "Frame {} is {} bytes, expected {}",
                    path.display(),
                    buf.len(),
                    self.frame_size
                );
                None
            }
            Err(e) => {
                warn!("Frame {} unreadable: {}", path.display(), e);
                None
            }
        }
    }

    fn frame_duration(&self, index: usize) -> Option<Duration> {
        self.durations.get(index).copied().filter(|d| !d.is_zero())
    }

    fn kind(&self) -> &'static str {
        "per-file"
    }
}

// ============================================================================
// Selection policy
// ============================================================================

/// Resolves a slug to a usable frame source.
///
/// The engine only talks to this seam, so it can be driven by in-memory
/// sources in tests.
pub trait SourceLoader: Send + Sync {
    /// `None` when the media has no usable frames in any layout
    fn open(&self, slug: &str, frame_size: usize) -> Option<Arc<dyn FrameSource>>;
}

/// Loads media from `<media_dir>/<slug>/` using `open_media()`.
#[derive(Debug, Clone)]
pub struct DiskLoader {
    pub media_dir: PathBuf,
    pub layout: FrameLayout,
}

impl DiskLoader {
    pub fn new(media_dir: impl Into<PathBuf>, layout: FrameLayout) -> Self {
        Self {
            media_dir: media_dir.into(),
            layout,
        }
    }
}

impl SourceLoader for DiskLoader {
    fn open(&self, slug: &str, frame_size: usize) -> Option<Arc<dyn FrameSource>> {
        open_media(&self.media_dir, slug, &self.layout, frame_size)
    }
}

/// Open a media item: packed layout first, per-file layout as fallback.
///
/// Returns `None` when neither layout yields a frame. The caller is expected to
/// drop the slug from the loop so a broken item is not retried forever.
pub fn open_media(
    media_dir: &Path,
    slug: &str,
    layout: &FrameLayout,
    frame_size: usize,
) -> Option<Arc<dyn FrameSource>> {
    let packed = PackedFrameSource::open(&layout.packed_path(media_dir, slug), Some(frame_size));
    if packed.is_usable() {
        info!("Loaded '{}' (packed, {} frames)", slug, packed.frame_count());
        return Some(Arc::new(packed));
    }

    let legacy_dir = layout.legacy_dir(media_dir, slug);
    match PerFileFrameSource::open(&legacy_dir, &layout.legacy_frame_ext, frame_size) {
        Ok(source) if source.is_usable() => {
            info!("Loaded '{}' (per-file, {} frames)", slug, source.frame_count());
            Some(Arc::new(source))
        }
        Ok(_) => {
            warn!("Media '{}' has no usable frames on disk", slug);
            None
        }
        Err(e) => {
            warn!("Media '{}' legacy scan failed: {}", slug, e);
            None
        }
    }
}
