// Layered run settings: defaults, settings file, remembered paths, environment
use crate::application::event_detector::DetectorParams;
use crate::application::segment_extractor::{TimeWindow, Window};
use anyhow::{Context, Result};
use config::builder::DefaultState;
use config::{ConfigBuilder, Environment, FileFormat};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const DEFAULT_CONFIG_FILE: &str = "brake-telemetry.toml";
const ENV_PREFIX: &str = "BRAKE";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub paths: PathSettings,
    pub window: WindowSettings,
    pub options: OptionSettings,
    pub detection: DetectionSettings,
    pub merge: MergeSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathSettings {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub catalog: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auxiliary: Option<PathBuf>,
    pub output_dir: PathBuf,
}

impl Default for PathSettings {
    fn default() -> Self {
        Self {
            log: None,
            catalog: None,
            auxiliary: None,
            output_dir: PathBuf::from("output"),
        }
    }
}

/// Extraction window. `start`/`stop` are seconds from the log base time and
/// are used directly in manual mode and as the fallback in auto mode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WindowSettings {
    pub auto: bool,
    pub start: f64,
    pub stop: Option<f64>,
    /// Seconds kept after the detected peak.
    pub auto_tail: f64,
}

impl Default for WindowSettings {
    fn default() -> Self {
        Self {
            auto: true,
            start: 0.0,
            stop: None,
            auto_tail: 0.0,
        }
    }
}

impl WindowSettings {
    pub fn manual(&self) -> TimeWindow {
        TimeWindow::new(self.start, self.stop)
    }

    pub fn requested(&self) -> Window {
        if self.auto {
            Window::Auto
        } else {
            Window::Explicit(self.manual())
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OptionSettings {
    pub calibrate_first_sample: bool,
    pub remember_paths: bool,
    pub state_file: PathBuf,
    /// Plot names recorded in the report for a downstream renderer.
    pub plots: Vec<String>,
    pub redetect: bool,
}

impl Default for OptionSettings {
    fn default() -> Self {
        Self {
            calibrate_first_sample: false,
            remember_paths: false,
            state_file: PathBuf::from(".brake-telemetry-state.toml"),
            plots: Vec::new(),
            redetect: true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionSettings {
    /// Candidate channels; empty means every wheel-coded catalog signal.
    pub channels: Vec<String>,
    pub thresholds: DetectorParams,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MergeSettings {
    /// Catalog signal used as the merge key instead of the auxiliary header.
    pub key_signal: Option<String>,
}

#[derive(Debug, Serialize)]
struct RememberedState<'a> {
    paths: &'a PathSettings,
}

/// Load settings. A missing default settings file is fine; an explicitly
/// named one must exist.
pub fn load_settings(config_path: Option<&Path>) -> Result<Settings> {
    let file = config_path
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));
    let required = config_path.is_some();

    let settings: Settings = builder(&file, required, None)
        .build()
        .with_context(|| format!("Failed to load settings from {}", file.display()))?
        .try_deserialize()
        .context("Invalid settings")?;

    if !settings.options.remember_paths {
        return Ok(settings);
    }

    let state_file = settings.options.state_file.clone();
    tracing::debug!("Layering remembered paths from {}", state_file.display());
    builder(&file, required, Some(&state_file))
        .build()
        .with_context(|| format!("Failed to load remembered paths from {}", state_file.display()))?
        .try_deserialize()
        .context("Invalid remembered paths")
}

fn builder(file: &Path, required: bool, state_file: Option<&Path>) -> ConfigBuilder<DefaultState> {
    let mut builder = config::Config::builder()
        .add_source(config::File::from(file).format(FileFormat::Toml).required(required));

    if let Some(state_file) = state_file {
        builder = builder.add_source(config::File::from(state_file).format(FileFormat::Toml).required(false));
    }

    builder.add_source(
        Environment::with_prefix(ENV_PREFIX)
            .prefix_separator("_")
            .separator("__")
            .try_parsing(true),
    )
}

/// Persist the run's paths so the next run starts from them.
pub fn save_remembered_paths(state_file: &Path, paths: &PathSettings) -> Result<()> {
    let text = toml::to_string_pretty(&RememberedState { paths }).context("Failed to serialize remembered paths")?;
    std::fs::write(state_file, text)
        .with_context(|| format!("Failed to write remembered paths to {}", state_file.display()))?;
    tracing::debug!("Remembered paths saved to {}", state_file.display());
    Ok(())
}
