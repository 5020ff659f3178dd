//! Processing overlay: job status source + progress frame renderer
//!
//! **Why**: while an upload is being converted the panel shows a progress bar
//! instead of the loop. The engine owns the write path, so the overlay is just
//! "ask the job monitor, render one frame, hand it to the display port".
//!
//! **Used by**: `PlaybackEngine` in the `ShowingOverlay` state.

use indexmap::IndexMap;
use log::debug;
use serde::{Deserialize, Serialize};
use std::sync::Mutex;

use super::display::BYTES_PER_PIXEL;

/// Lifecycle of one background job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Pending,
    Running,
    Completed,
    Failed,
}

impl JobState {
    pub fn is_active(self) -> bool {
        matches!(self, JobState::Pending | JobState::Running)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobProgress {
    pub state: JobState,
    /// 0..=100
    pub percent: u8,
    #[serde(default)]
    pub message: String,
}

impl JobProgress {
    pub fn running(percent: u8) -> Self {
        Self {
            state: JobState::Running,
            percent: percent.min(100),
            message: String::new(),
        }
    }

    pub fn completed() -> Self {
        Self {
            state: JobState::Completed,
            percent: 100,
            message: String::new(),
        }
    }
}

/// Read side of the processing pipeline's job table.
pub trait JobMonitor: Send + Sync {
    /// Current progress, `None` if the job is unknown
    fn job_progress(&self, job_id: &str) -> Option<JobProgress>;
}

/// In-process job table the upload pipeline writes and the engine polls.
#[derive(Debug, Default)]
pub struct JobBoard {
    jobs: Mutex<IndexMap<String, JobProgress>>,
}

impl JobBoard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&self, job_id: &str, progress: JobProgress) {
        debug!(
            "Job {}: {:?} {}% {}",
            job_id, progress.state, progress.percent, progress.message
        );
        self.jobs
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(job_id.to_string(), progress);
    }

    /// Forget a job; an overlay waiting on it treats it as done
    pub fn remove(&self, job_id: &str) -> Option<JobProgress> {
        self.jobs
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .shift_remove(job_id)
    }
}

impl JobMonitor for JobBoard {
    fn job_progress(&self, job_id: &str) -> Option<JobProgress> {
        self.jobs
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(job_id)
            .cloned()
    }
}

/// True while any listed job is pending or running. Unknown jobs count as done.
pub fn any_active(monitor: &dyn JobMonitor, job_ids: &[String]) -> bool {
    job_ids
        .iter()
        .filter_map(|id| monitor.job_progress(id))
        .any(|p| p.state.is_active())
}

/// Turns job progress into one full-screen frame.
pub trait OverlayRenderer: Send {
    /// Returns exactly `width * height * BYTES_PER_PIXEL` bytes
    fn render(&mut self, jobs: &[JobProgress], width: usize, height: usize) -> Vec<u8>;
}

/// Horizontal bar centred on a solid background, RGB565 big-endian.
///
/// Fill is the mean percent over the listed jobs; a failed job turns the bar
/// to `failed_color`.
#[derive(Debug, Clone)]
pub struct ProgressBarRenderer {
    pub background: u16,
    pub track: u16,
    pub fill: u16,
    pub failed_color: u16,
}

impl Default for ProgressBarRenderer {
    fn default() -> Self {
        Self {
            background: 0x0000,
            track: 0x4208,
            fill: 0x07E0,
            failed_color: 0xF800,
        }
    }
}

impl ProgressBarRenderer {
    fn mean_percent(jobs: &[JobProgress]) -> usize {
        if jobs.is_empty() {
            return 0;
        }
        jobs.iter().map(|j| j.percent.min(100) as usize).sum::<usize>() / jobs.len()
    }
}

impl OverlayRenderer for ProgressBarRenderer {
    fn render(&mut self, jobs: &[JobProgress], width: usize, height: usize) -> Vec<u8> {
        let mut frame = vec![0u8; width * height * BYTES_PER_PIXEL];
        let put = |frame: &mut [u8], x: usize, y: usize, color: u16| {
            let at = (y * width + x) * BYTES_PER_PIXEL;
            frame[at..at + 2].copy_from_slice(&color.to_be_bytes());
        };

        for y in 0..height {
            for x in 0..width {
                put(&mut frame, x, y, self.background);
            }
        }

        // Bar: 80% of width, 1/12 of height (at least one row), centred
        let bar_w = width * 4 / 5;
        let bar_h = (height / 12).max(1);
        if bar_w == 0 || height == 0 {
            return frame;
        }
        let x0 = (width - bar_w) / 2;
        let y0 = (height - bar_h) / 2;

        let failed = jobs.iter().any(|j| j.state == JobState::Failed);
        let filled = bar_w * Self::mean_percent(jobs) / 100;
        let fill = if failed { self.failed_color } else { self.fill };

        for y in y0..y0 + bar_h {
            for dx in 0..bar_w {
                let color = if dx < filled { fill } else { self.track };
                put(&mut frame, x0 + dx, y, color);
            }
        }
        frame
    }
}
