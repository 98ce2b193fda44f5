// Pipeline service - One brake analysis run from input files to the merged dataset
use crate::application::event_detector::{self, default_channels};
use crate::application::frame_decoder::{self, DecodeStats};
use crate::application::frame_repository::FrameRepository;
use crate::application::run_state::{RunError, RunState, RunTracker};
use crate::application::segment_extractor::{self, TimeWindow, Window};
use crate::application::series_aligner::{self, MergeError};
use crate::domain::catalog::Catalog;
use crate::domain::event::{BrakeEvent, NotFound};
use crate::domain::frame::{ensure_chronological, normalize_timestamps, FrameLog};
use crate::domain::sample::DecodedTable;
use crate::domain::series::AuxiliarySeries;
use crate::infrastructure::config::{save_remembered_paths, Settings};
use crate::infrastructure::{auxiliary_csv, dbc, report, table_writer};
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub const SEGMENT_FILE: &str = "segment.blf";
pub const MERGED_FILE: &str = "merged.csv";
pub const REPORT_FILE: &str = "report.json";

const TOP_OFFENDERS: usize = 5;

/// Counts and findings collected while a run progresses.
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub log_frames: usize,
    pub skipped_objects: usize,
    pub timestamp_transition: Option<usize>,
    pub inversions: usize,
    pub window: Option<TimeWindow>,
    /// Outcome of automatic window detection; `None` in manual mode.
    pub detection: Option<Result<BrakeEvent, NotFound>>,
    pub segment_frames: usize,
    pub decode: DecodeStats,
    pub merged_rows: usize,
    pub matched_values: usize,
    pub redetection: Option<Result<BrakeEvent, NotFound>>,
}

#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub state: RunState,
    pub summary: RunSummary,
    pub workspace: Option<PathBuf>,
}

impl RunOutcome {
    pub fn is_complete(&self) -> bool {
        self.state.is_complete()
    }
}

/// Everything the configure step validated before any frame is read.
struct RunInputs {
    log_path: PathBuf,
    catalog: Catalog,
    series: AuxiliarySeries,
    channels: Vec<String>,
    workspace: PathBuf,
}

pub struct PipelineService {
    repository: Arc<dyn FrameRepository>,
    settings: Settings,
}

impl PipelineService {
    pub fn new(repository: Arc<dyn FrameRepository>, settings: Settings) -> Self {
        Self { repository, settings }
    }

    /// Execute one run. Failures never escape: they end the run in `Aborted`.
    pub fn run(&self) -> RunOutcome {
        let mut tracker = RunTracker::new();
        let mut summary = RunSummary::default();
        let mut workspace = None;

        if let Err(error) = self.execute(&mut tracker, &mut summary, &mut workspace) {
            tracing::error!("Run aborted: {}", error);
            tracker.abort(&error);
        }

        let state = tracker.state().clone();
        if let Some(dir) = &workspace {
            let document = report::build_report(&state, &summary, &self.settings.options.plots);
            if let Err(e) = report::write_report(&dir.join(REPORT_FILE), &document) {
                tracing::error!("Failed to write run report: {:#}", e);
            }
        }

        if state.is_complete() && self.settings.options.remember_paths {
            if let Err(e) = save_remembered_paths(&self.settings.options.state_file, &self.settings.paths) {
                tracing::warn!("{:#}", e);
            }
        }

        RunOutcome {
            state,
            summary,
            workspace,
        }
    }

    fn execute(
        &self,
        tracker: &mut RunTracker,
        summary: &mut RunSummary,
        workspace: &mut Option<PathBuf>,
    ) -> Result<(), RunError> {
        tracker.advance(RunState::Configured)?;
        let inputs = self.configure().map_err(|e| tracker.fail(e))?;
        *workspace = Some(inputs.workspace.clone());

        tracker.advance(RunState::Extracting)?;
        let segment = self.extract_segment(&inputs, summary).map_err(|e| tracker.fail(e))?;

        tracker.advance(RunState::Decoding)?;
        let table = self.decode_segment(&inputs, &segment, summary).map_err(|e| tracker.fail(e))?;

        tracker.advance(RunState::Merging)?;
        self.merge_and_persist(&inputs, table, summary).map_err(|e| tracker.fail(e))?;

        tracker.advance(RunState::Complete)?;
        tracing::info!("Run complete: results in {}", inputs.workspace.display());
        Ok(())
    }

    fn configure(&self) -> Result<RunInputs> {
        let paths = &self.settings.paths;
        let log_path = required_file(paths.log.as_deref(), "log")?;
        let catalog_path = required_file(paths.catalog.as_deref(), "catalog")?;
        let auxiliary_path = required_file(paths.auxiliary.as_deref(), "auxiliary")?;

        let catalog = dbc::load_catalog(&catalog_path)?;
        let table = auxiliary_csv::load_auxiliary(&auxiliary_path)?;
        let mut series = series_aligner::validate_auxiliary(&table)?;

        let requested = self
            .settings
            .merge
            .key_signal
            .clone()
            .unwrap_or_else(|| series.key_name.clone());
        let key = catalog
            .resolve_signal(&requested)
            .ok_or(MergeError::MissingKeyColumn(requested))?;
        if key != series.key_name {
            tracing::info!("Auxiliary key column {} mapped to signal {}", series.key_name, key);
            series.key_name = key;
        }
        if catalog.has_signal(&series.value_name) {
            return Err(MergeError::ColumnConflict(series.value_name).into());
        }
        let names = catalog.signal_names();
        if let Some(name) = names.iter().find(|name| table_writer::RESERVED_COLUMNS.contains(&name.as_str())) {
            anyhow::bail!("catalog signal {} collides with a reserved merged column", name);
        }

        let channels = if self.settings.detection.channels.is_empty() {
            default_channels(&names)
        } else {
            self.settings.detection.channels.clone()
        };

        let workspace = create_workspace(&self.settings.paths.output_dir)?;
        tracing::info!(
            "Configured: {} auxiliary points keyed by {}, {} detection channels, workspace {}",
            series.points.len(),
            series.key_name,
            channels.len(),
            workspace.display()
        );

        Ok(RunInputs {
            log_path,
            catalog,
            series,
            channels,
            workspace,
        })
    }

    fn extract_segment(&self, inputs: &RunInputs, summary: &mut RunSummary) -> Result<FrameLog> {
        let (log, read) = self.repository.read_log(&inputs.log_path)?;
        summary.log_frames = log.len();
        summary.skipped_objects = read.skipped_objects;
        anyhow::ensure!(!log.is_empty(), "log {} contains no CAN frames", inputs.log_path.display());

        let mut frames = log.frames;
        summary.timestamp_transition = normalize_timestamps(&mut frames);
        if let Some(index) = summary.timestamp_transition {
            tracing::warn!("Relative timestamps before frame {} shifted onto absolute time", index);
        }
        summary.inversions = ensure_chronological(&mut frames);
        if summary.inversions > 0 {
            tracing::warn!("{} timestamp inversions found; frames re-sorted", summary.inversions);
        }
        let log = FrameLog::new(frames);

        let window = self.choose_window(&log, inputs, summary);
        let extracted = segment_extractor::extract(&log, window)?;

        let segment_path = inputs.workspace.join(SEGMENT_FILE);
        let partial = inputs.workspace.join(format!("{}.part", SEGMENT_FILE));
        self.repository.write_log(&partial, &extracted.log)?;
        std::fs::rename(&partial, &segment_path)
            .with_context(|| format!("Failed to move {} into place", partial.display()))?;

        summary.window = Some(window);
        summary.segment_frames = extracted.written;
        tracing::info!(
            "Extracted {} of {} frames into {}",
            extracted.written,
            log.len(),
            segment_path.display()
        );
        Ok(extracted.log)
    }

    fn choose_window(&self, log: &FrameLog, inputs: &RunInputs, summary: &mut RunSummary) -> TimeWindow {
        if let Window::Explicit(window) = self.settings.window.requested() {
            return window;
        }

        let detected = segment_extractor::auto_window(
            log,
            &inputs.catalog,
            &inputs.channels,
            &self.settings.detection.thresholds,
            self.settings.window.auto_tail,
        );
        let window = match &detected {
            Ok((window, event)) => {
                tracing::info!(
                    "Detected {} event starting at {:.3}s (peak {:?})",
                    event.position,
                    event.start_time,
                    event.end_time
                );
                *window
            }
            Err(reason) => {
                tracing::warn!("Automatic window detection failed ({}); using the manual window", reason);
                self.settings.window.manual()
            }
        };
        summary.detection = Some(detected.map(|(_, event)| event));
        window
    }

    fn decode_segment(&self, inputs: &RunInputs, segment: &FrameLog, summary: &mut RunSummary) -> Result<DecodedTable> {
        let (table, stats) = frame_decoder::decode_log(segment, &inputs.catalog);

        for (id, tally) in stats.top_offenders(TOP_OFFENDERS) {
            tracing::warn!(
                "Undecodable id 0x{:X}: {} without definition, {} with length mismatch",
                id,
                tally.no_definition,
                tally.length_mismatch
            );
        }
        tracing::debug!("Decode failures by id: {:?}", stats.failures);

        let decoded = stats.decoded;
        let failed = stats.failed_total();
        summary.decode = stats;
        anyhow::ensure!(decoded > 0, "none of {} frames could be decoded", failed);

        tracing::info!("Decoded {} frames ({} failed)", decoded, failed);
        Ok(table)
    }

    fn merge_and_persist(&self, inputs: &RunInputs, table: DecodedTable, summary: &mut RunSummary) -> Result<()> {
        let mut series = inputs.series.clone();
        if self.settings.options.calibrate_first_sample {
            series.calibrate_to_first();
            tracing::info!("{} calibrated against its first sample", series.value_name);
        }

        let key = series.key_name.clone();
        let merged = series_aligner::merge_series(&series, table, &key)?;
        summary.merged_rows = merged.len();
        summary.matched_values = merged.matched_count();

        table_writer::write_merged(&inputs.workspace.join(MERGED_FILE), &merged)?;
        tracing::info!(
            "Merged {} auxiliary values onto {} rows",
            summary.matched_values,
            summary.merged_rows
        );

        if self.settings.options.redetect {
            let outcome =
                event_detector::detect_in_table(&merged.table, &inputs.channels, &self.settings.detection.thresholds);
            match &outcome {
                Ok(event) => tracing::info!("Re-detection on merged data: {} at {:.3}s", event.position, event.start_time),
                Err(reason) => tracing::info!("Re-detection on merged data: {}", reason),
            }
            summary.redetection = Some(outcome);
        }
        Ok(())
    }
}

fn required_file(path: Option<&Path>, what: &str) -> Result<PathBuf> {
    let path = path.with_context(|| format!("no {} file configured", what))?;
    anyhow::ensure!(path.is_file(), "{} file {} not found", what, path.display());
    Ok(path.to_path_buf())
}

/// Create `run_<YYYYmmdd_HHMMSS>` under `output_dir`, suffixed when the name is taken.
fn create_workspace(output_dir: &Path) -> Result<PathBuf> {
    std::fs::create_dir_all(output_dir)
        .with_context(|| format!("Failed to create output directory {}", output_dir.display()))?;

    let stamp = chrono::Local::now().format("run_%Y%m%d_%H%M%S").to_string();
    let mut candidate = output_dir.join(&stamp);
    let mut suffix = 1;
    while candidate.exists() {
        candidate = output_dir.join(format!("{}_{}", stamp, suffix));
        suffix += 1;
    }

    std::fs::create_dir(&candidate)
        .with_context(|| format!("Failed to create workspace {}", candidate.display()))?;
    Ok(candidate)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::run_state::Step;
    use crate::domain::event::PositionLabel;
    use crate::domain::frame::Frame;
    use crate::infrastructure::blf_repository::BlfRepository;

    const CATALOG: &str = r#"
BO_ 256 WheelsFront: 4 ESP
 SG_ FL_Pressure : 0|16@1+ (0.1,0) [0|6553.5] "bar" ECU
 SG_ FR_Pressure : 16|16@1+ (0.1,0) [0|6553.5] "bar" ECU

BO_ 257 WheelsRear: 4 ESP
 SG_ RL_Pressure : 0|16@1+ (0.1,0) [0|6553.5] "bar" ECU
 SG_ RR_Pressure : 16|16@1+ (0.1,0) [0|6553.5] "bar" ECU

BO_ 512 Pedal: 2 ECU
 SG_ Travel : 0|16@1+ (1,0) [0|65535] "mm" ESP

BO_ 768 Speed: 2 ECU
 SG_ VehicleSpeed : 0|16@1+ (0.01,0) [0|655.35] "km/h" ESP

BO_ 1024 Status: 1 ECU
 SG_ Counter : 0|8@1+ (1,0) [0|255] "" ESP
"#;

    const IDS: [u32; 5] = [0x100, 0x101, 0x200, 0x300, 0x400];

    /// Frame `i` cycles through the five ids; pedal frames carry travel `i / 5`.
    fn synthetic_frames(count: usize) -> Vec<Frame> {
        (0..count)
            .map(|i| {
                let id = IDS[i % 5];
                let payload = match id {
                    0x100 | 0x101 => vec![0x10, 0x00, 0x20, 0x00],
                    0x200 => ((i / 5) as u16).to_le_bytes().to_vec(),
                    0x300 => vec![0x88, 0x13],
                    _ => vec![(i % 256) as u8],
                };
                Frame::new(i as f64 * 0.001, id, payload, 1)
            })
            .collect()
    }

    struct Fixture {
        dir: tempfile::TempDir,
        settings: Settings,
    }

    fn fixture(frames: Vec<Frame>, auxiliary: &str) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("input.blf");
        let catalog = dir.path().join("brakes.dbc");
        let aux = dir.path().join("force.csv");

        BlfRepository::new().write_log(&log, &FrameLog::new(frames)).unwrap();
        std::fs::write(&catalog, CATALOG).unwrap();
        std::fs::write(&aux, auxiliary).unwrap();

        let mut settings = Settings::default();
        settings.paths.log = Some(log);
        settings.paths.catalog = Some(catalog);
        settings.paths.auxiliary = Some(aux);
        settings.paths.output_dir = dir.path().join("out");
        settings.window.auto = false;
        Fixture { dir, settings }
    }

    fn force_table(rows: usize) -> String {
        let mut text = String::from("travel;Force\n");
        for k in 0..rows {
            text.push_str(&format!("{};{},5\n", k * 50, k + 1));
        }
        text
    }

    fn service(settings: Settings) -> PipelineService {
        PipelineService::new(Arc::new(BlfRepository::new()), settings)
    }

    #[test]
    fn test_end_to_end_run() {
        let fixture = fixture(synthetic_frames(10_000), &force_table(20));
        let outcome = service(fixture.settings.clone()).run();

        assert_eq!(outcome.state, RunState::Complete);
        assert_eq!(outcome.summary.log_frames, 10_000);
        assert_eq!(outcome.summary.segment_frames, 10_000);
        assert_eq!(outcome.summary.decode.decoded, 10_000);
        assert_eq!(outcome.summary.merged_rows, 10_000);
        assert_eq!(outcome.summary.matched_values, 20);

        let workspace = outcome.workspace.unwrap();
        assert!(workspace.join(SEGMENT_FILE).is_file());
        assert!(workspace.join(REPORT_FILE).is_file());

        let merged = std::fs::read_to_string(workspace.join(MERGED_FILE)).unwrap();
        let mut lines = merged.lines();
        let header = lines.next().unwrap();
        assert!(header.ends_with(",Travel,VehicleSpeed,Counter,Force"));

        let rows: Vec<&str> = lines.collect();
        assert_eq!(rows.len(), 10_000);
        let filled = rows.iter().filter(|row| !row.ends_with(',')).count();
        assert_eq!(filled, 20);
        assert!(fixture.dir.path().join("out").is_dir());
    }

    #[test]
    fn test_calibration_zeroes_first_value() {
        let mut fixture = fixture(synthetic_frames(500), &force_table(3));
        fixture.settings.options.calibrate_first_sample = true;
        let outcome = service(fixture.settings.clone()).run();
        assert!(outcome.is_complete());

        let merged = std::fs::read_to_string(outcome.workspace.unwrap().join(MERGED_FILE)).unwrap();
        let values: Vec<&str> = merged
            .lines()
            .skip(1)
            .filter_map(|row| row.rsplit(',').next())
            .filter(|v| !v.is_empty())
            .collect();
        assert_eq!(values, vec!["0", "1", "2"]);
    }

    #[test]
    fn test_three_column_auxiliary_aborts_before_extraction() {
        let fixture = fixture(synthetic_frames(50), "Travel;Force;Extra\n1;2;3\n");
        let outcome = service(fixture.settings.clone()).run();

        match outcome.state {
            RunState::Aborted { step, reason } => {
                assert_eq!(step, Step::Configured);
                assert!(reason.contains("exactly 2 columns"), "{}", reason);
            }
            other => panic!("unexpected state {:?}", other),
        }
        assert!(outcome.workspace.is_none());
        assert_eq!(outcome.summary.log_frames, 0);
    }

    #[test]
    fn test_unknown_key_column_aborts() {
        let fixture = fixture(synthetic_frames(50), "Stroke;Force\n1;2\n");
        let outcome = service(fixture.settings.clone()).run();
        assert!(matches!(outcome.state, RunState::Aborted { step: Step::Configured, .. }));
    }

    #[test]
    fn test_zero_decoded_frames_aborts_with_report() {
        let frames = (0..20).map(|i| Frame::new(i as f64 * 0.01, 0x7FF, vec![0u8; 8], 1)).collect();
        let fixture = fixture(frames, &force_table(2));
        let outcome = service(fixture.settings.clone()).run();

        assert!(matches!(outcome.state, RunState::Aborted { step: Step::Decoding, .. }));
        assert_eq!(outcome.summary.decode.no_definition_total(), 20);

        let workspace = outcome.workspace.unwrap();
        assert!(!workspace.join(MERGED_FILE).exists());
        let report = std::fs::read_to_string(workspace.join(REPORT_FILE)).unwrap();
        assert!(report.contains("\"aborted\""));
    }

    #[test]
    fn test_missing_log_aborts() {
        let mut fixture = fixture(synthetic_frames(10), &force_table(2));
        fixture.settings.paths.log = Some(fixture.dir.path().join("absent.blf"));
        let outcome = service(fixture.settings.clone()).run();

        match outcome.state {
            RunState::Aborted { step, reason } => {
                assert_eq!(step, Step::Configured);
                assert!(reason.contains("not found"));
            }
            other => panic!("unexpected state {:?}", other),
        }
    }

    #[test]
    fn test_reserved_signal_name_aborts_before_extraction() {
        let fixture = fixture(synthetic_frames(50), &force_table(2));
        let catalog = fixture.settings.paths.catalog.clone().unwrap();
        std::fs::write(&catalog, CATALOG.replace("SG_ Counter", "SG_ timestamp")).unwrap();
        let outcome = service(fixture.settings.clone()).run();

        match outcome.state {
            RunState::Aborted { step, reason } => {
                assert_eq!(step, Step::Configured);
                assert!(reason.contains("reserved"), "{}", reason);
            }
            other => panic!("unexpected state {:?}", other),
        }
        assert_eq!(outcome.summary.log_frames, 0);
    }

    #[test]
    fn test_auto_window_falls_back_to_manual() {
        let mut fixture = fixture(synthetic_frames(1_000), &force_table(2));
        fixture.settings.window.auto = true;
        let outcome = service(fixture.settings.clone()).run();

        assert!(outcome.is_complete());
        assert_eq!(outcome.summary.detection, Some(Err(NotFound::NoRisingChannels)));
        assert_eq!(outcome.summary.window, Some(TimeWindow::new(0.0, None)));
        assert_eq!(outcome.summary.segment_frames, 1_000);
    }

    /// Front wheels ramp from 20 to 120 bar around 18 s; rear wheels stay flat.
    fn front_brake_frames(count: usize) -> Vec<Frame> {
        let wheels = |front: u16, rear: u16| [front.to_le_bytes(), rear.to_le_bytes()].concat();
        (0..count)
            .map(|i| {
                let raw = 200 + (1000 * i.saturating_sub(1800) / 150).min(1000) as u16;
                let (id, payload) = match i % 3 {
                    0 => (0x100, wheels(raw, raw)),
                    1 => (0x101, wheels(200, 200)),
                    _ => (0x200, ((i / 3) as u16).to_le_bytes().to_vec()),
                };
                Frame::new(i as f64 * 0.01, id, payload, 1)
            })
            .collect()
    }

    #[test]
    fn test_auto_window_detects_front_axle_event() {
        let mut fixture = fixture(front_brake_frames(3_000), "Travel;Force\n600;1\n620;2\n");
        fixture.settings.window.auto = true;
        let outcome = service(fixture.settings.clone()).run();

        assert!(outcome.is_complete(), "{:?}", outcome.state);
        let event = match &outcome.summary.detection {
            Some(Ok(event)) => event.clone(),
            other => panic!("unexpected detection {:?}", other),
        };
        assert_eq!(event.position, PositionLabel::FrontAxle);
        assert!(event.start_time > 15.0 && event.start_time < 18.0, "start {}", event.start_time);
        assert_eq!(outcome.summary.window, Some(TimeWindow::from_event(&event, 0.0)));
        assert_eq!(outcome.summary.log_frames, 3_000);
        assert!(outcome.summary.segment_frames > 0);
        assert!(outcome.summary.segment_frames < outcome.summary.log_frames);
        assert_eq!(outcome.summary.matched_values, 2);
    }
}
