// Mapper from a finished run to the JSON report document
use crate::application::pipeline::RunSummary;
use crate::application::run_state::RunState;
use crate::application::segment_extractor::TimeWindow;
use crate::domain::event::{BrakeEvent, NotFound};
use anyhow::{Context, Result};
use serde::Serialize;
use std::path::Path;

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub state: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_step: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub frames: FrameCounts,
    pub window: Option<TimeWindow>,
    pub detection: Option<DetectionReport>,
    pub redetection: Option<DetectionReport>,
    pub decode: DecodeReport,
    pub merge: MergeReport,
    pub plots: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FrameCounts {
    pub log: usize,
    pub skipped_objects: usize,
    pub timestamp_transition: Option<usize>,
    pub inversions: usize,
    pub segment: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DetectionReport {
    Detected {
        start_time: f64,
        end_time: Option<f64>,
        position: String,
        channels: Vec<String>,
    },
    NotFound {
        reason: String,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct DecodeReport {
    pub decoded: usize,
    pub no_definition: usize,
    pub length_mismatch: usize,
    pub by_id: Vec<IdFailures>,
}

#[derive(Debug, Clone, Serialize)]
pub struct IdFailures {
    pub id: String,
    pub no_definition: usize,
    pub length_mismatch: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct MergeReport {
    pub rows: usize,
    pub matched: usize,
}

pub fn build_report(state: &RunState, summary: &RunSummary, plots: &[String]) -> RunReport {
    let (failed_step, reason) = match state {
        RunState::Aborted { step, reason } => (Some(step.to_string()), Some(reason.clone())),
        _ => (None, None),
    };

    RunReport {
        state: if state.is_complete() { "complete" } else { "aborted" },
        failed_step,
        reason,
        frames: FrameCounts {
            log: summary.log_frames,
            skipped_objects: summary.skipped_objects,
            timestamp_transition: summary.timestamp_transition,
            inversions: summary.inversions,
            segment: summary.segment_frames,
        },
        window: summary.window,
        detection: summary.detection.as_ref().map(detection_to_report),
        redetection: summary.redetection.as_ref().map(detection_to_report),
        decode: DecodeReport {
            decoded: summary.decode.decoded,
            no_definition: summary.decode.no_definition_total(),
            length_mismatch: summary.decode.length_mismatch_total(),
            by_id: summary
                .decode
                .failures
                .iter()
                .map(|(id, tally)| IdFailures {
                    id: format!("0x{:X}", id),
                    no_definition: tally.no_definition,
                    length_mismatch: tally.length_mismatch,
                })
                .collect(),
        },
        merge: MergeReport {
            rows: summary.merged_rows,
            matched: summary.matched_values,
        },
        plots: plots.to_vec(),
    }
}

fn detection_to_report(outcome: &Result<BrakeEvent, NotFound>) -> DetectionReport {
    match outcome {
        Ok(event) => DetectionReport::Detected {
            start_time: event.start_time,
            end_time: event.end_time,
            position: event.position.to_string(),
            channels: event.involved_channels.iter().cloned().collect(),
        },
        Err(reason) => DetectionReport::NotFound {
            reason: reason.to_string(),
        },
    }
}

pub fn write_report(path: &Path, report: &RunReport) -> Result<()> {
    let json = serde_json::to_string_pretty(report).context("Failed to serialize run report")?;
    std::fs::write(path, json).with_context(|| format!("Failed to write {}", path.display()))?;
    tracing::info!("Run report written to {}", path.display());
    Ok(())
}
