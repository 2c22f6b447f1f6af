//! Progress arithmetic for a running generation.
//!
//! The pipeline reports the index of the frame it just produced.
//! [`ProgressTracker`] turns that into a one-decimal percentage of the
//! job's `max_frames` and a linear countdown extrapolated from elapsed
//! wall-clock time.

use std::time::{Duration, Instant};

use serde::Serialize;

/// A progress update pushed out-of-band while a job runs.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressEvent {
    /// Completion in `0.0..=100.0`, one decimal place.
    pub progress: f64,
    /// Estimated milliseconds until completion.
    pub countdown_ms: u64,
    /// Encoded preview of the latest frame, when one was available.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preview_frame: Option<String>,
}

/// Percentage of `max_frames` reached at `frame_idx`, rounded to one
/// decimal and clamped to `0.0..=100.0`.
pub fn percent_complete(frame_idx: u32, max_frames: u32) -> f64 {
    if max_frames == 0 {
        return 0.0;
    }
    let raw = (f64::from(frame_idx) / f64::from(max_frames) * 100.0).clamp(0.0, 100.0);
    (raw * 10.0).round() / 10.0
}

/// Linear time-remaining estimate: `elapsed * (100 - percent) / percent`.
///
/// Returns 0 when no progress has been made yet.
pub fn countdown_ms(elapsed: Duration, percent: f64) -> u64 {
    if percent <= 0.0 {
        return 0;
    }
    let remaining = elapsed.as_secs_f64() * 1000.0 * (100.0 - percent) / percent;
    remaining.max(0.0).round() as u64
}

/// Tracks elapsed time for one job and builds [`ProgressEvent`]s.
#[derive(Debug, Clone, Copy)]
pub struct ProgressTracker {
    started: Instant,
    max_frames: u32,
}

impl ProgressTracker {
    /// Start the clock for a job targeting `max_frames` frames.
    pub fn start(max_frames: u32) -> Self {
        Self {
            started: Instant::now(),
            max_frames,
        }
    }

    pub fn max_frames(&self) -> u32 {
        self.max_frames
    }

    /// Build the event for `frame_idx` using the real elapsed time.
    pub fn observe(&self, frame_idx: u32, preview_frame: Option<String>) -> ProgressEvent {
        self.event_at(frame_idx, self.started.elapsed(), preview_frame)
    }

    /// Build the event for `frame_idx` at an explicit elapsed duration.
    pub fn event_at(
        &self,
        frame_idx: u32,
        elapsed: Duration,
        preview_frame: Option<String>,
    ) -> ProgressEvent {
        let progress = percent_complete(frame_idx, self.max_frames);
        ProgressEvent {
            progress,
            countdown_ms: countdown_ms(elapsed, progress),
            preview_frame,
        }
    }
}
