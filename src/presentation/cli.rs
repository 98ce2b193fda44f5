// Command-line surface
use crate::application::pipeline::RunOutcome;
use crate::application::run_state::RunState;
use crate::infrastructure::config::Settings;
use clap::Parser;
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "brake-telemetry")]
#[command(about = "Extract, decode and merge a brake event from a CAN bus log", long_about = None)]
pub struct Args {
    /// Settings file (TOML). Defaults to brake-telemetry.toml when present.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Binary CAN log (BLF)
    #[arg(long)]
    pub log: Option<PathBuf>,

    /// Message catalog (DBC)
    #[arg(long)]
    pub catalog: Option<PathBuf>,

    /// Two-column semicolon-delimited auxiliary file
    #[arg(long = "aux")]
    pub auxiliary: Option<PathBuf>,

    /// Directory that receives the run workspace
    #[arg(long = "out")]
    pub output_dir: Option<PathBuf>,

    /// Window start, seconds from the first frame
    #[arg(long)]
    pub start: Option<f64>,

    /// Window stop, seconds from the first frame
    #[arg(long)]
    pub stop: Option<f64>,

    /// Detect the window from the pressure channels
    #[arg(long, conflicts_with = "manual")]
    pub auto: bool,

    /// Use --start/--stop as given
    #[arg(long)]
    pub manual: bool,

    #[arg(short, long)]
    pub verbose: bool,
}

impl Args {
    /// Command-line values win over every other settings layer.
    pub fn apply(&self, settings: &mut Settings) {
        if let Some(log) = &self.log {
            settings.paths.log = Some(log.clone());
        }
        if let Some(catalog) = &self.catalog {
            settings.paths.catalog = Some(catalog.clone());
        }
        if let Some(auxiliary) = &self.auxiliary {
            settings.paths.auxiliary = Some(auxiliary.clone());
        }
        if let Some(output_dir) = &self.output_dir {
            settings.paths.output_dir = output_dir.clone();
        }
        if let Some(start) = self.start {
            settings.window.start = start;
        }
        if self.stop.is_some() {
            settings.window.stop = self.stop;
        }
        if self.auto {
            settings.window.auto = true;
        }
        if self.manual {
            settings.window.auto = false;
        }
    }
}

/// The final line of a run: success or the failing step, never implied.
pub fn outcome_line(outcome: &RunOutcome) -> String {
    match &outcome.state {
        RunState::Complete => match &outcome.workspace {
            Some(dir) => format!("SUCCESS: results written to {}", dir.display()),
            None => "SUCCESS".to_string(),
        },
        RunState::Aborted { step, reason } => format!("FAILED in {} step: {}", step, reason),
        other => format!("FAILED: run stopped in state {}", other.name()),
    }
}
