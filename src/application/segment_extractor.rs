// Segment extractor - Time-window subsets of frame logs and decoded tables
use crate::application::event_detector::{self, DetectorParams};
use crate::application::frame_decoder;
use crate::domain::catalog::Catalog;
use crate::domain::event::{BrakeEvent, NotFound};
use crate::domain::frame::FrameLog;
use crate::domain::sample::DecodedTable;
use serde::Serialize;
use std::ops::Range;
use thiserror::Error;

/// Window in seconds relative to the source log's base time. `stop: None` is unbounded.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TimeWindow {
    pub start: f64,
    pub stop: Option<f64>,
}

impl TimeWindow {
    pub fn new(start: f64, stop: Option<f64>) -> Self {
        Self { start, stop }
    }

    /// Window from a detected event, optionally extended past the peak.
    pub fn from_event(event: &BrakeEvent, tail: f64) -> Self {
        Self {
            start: event.start_time,
            stop: event.end_time.map(|end| end + tail),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Window {
    Explicit(TimeWindow),
    Auto,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ExtractError {
    #[error("no messages in range")]
    NoMessagesInRange,
}

#[derive(Debug, Clone)]
pub struct Extracted {
    pub log: FrameLog,
    pub written: usize,
}

/// Index range of the timestamps falling inside the window.
///
/// Timestamps must be non-decreasing: the scan stops at the first one past `stop`.
/// A timestamp exactly at `stop` is included.
pub fn window_range(
    timestamps: impl IntoIterator<Item = f64>,
    base_time: f64,
    window: TimeWindow,
) -> Range<usize> {
    let lower = base_time + window.start;
    let upper = window.stop.map_or(f64::INFINITY, |stop| base_time + stop);

    let mut first = None;
    let mut end = 0;
    for (i, t) in timestamps.into_iter().enumerate() {
        if t > upper {
            break;
        }
        if t >= lower {
            first.get_or_insert(i);
            end = i + 1;
        }
    }

    match first {
        Some(start) => start..end,
        None => 0..0,
    }
}

/// Frames inside the window, keeping the source base time.
pub fn extract(log: &FrameLog, window: TimeWindow) -> Result<Extracted, ExtractError> {
    let rows = window_range(log.frames.iter().map(|f| f.timestamp), log.base_time, window);
    if rows.is_empty() {
        return Err(ExtractError::NoMessagesInRange);
    }

    let frames = log.frames[rows].to_vec();
    let written = frames.len();
    tracing::debug!(
        "Extracted {} of {} frames for window [{}, {:?}]",
        written,
        log.len(),
        window.start,
        window.stop
    );

    Ok(Extracted {
        log: FrameLog::with_base_time(log.base_time, frames),
        written,
    })
}

/// Rows of a decoded table inside the window.
pub fn extract_table(table: &DecodedTable, window: TimeWindow) -> Result<DecodedTable, ExtractError> {
    let rows = window_range(table.timestamps.iter().copied(), table.base_time, window);
    if rows.is_empty() {
        return Err(ExtractError::NoMessagesInRange);
    }
    Ok(table.slice_rows(rows))
}

/// Detect the brake event on a preliminary full decode and derive the window from it.
pub fn auto_window(
    log: &FrameLog,
    catalog: &Catalog,
    channels: &[String],
    params: &DetectorParams,
    tail: f64,
) -> Result<(TimeWindow, BrakeEvent), NotFound> {
    let (table, _) = frame_decoder::decode_log(log, catalog);
    let event = event_detector::detect_in_table(&table, channels, params)?;
    Ok((TimeWindow::from_event(&event, tail), event))
}
