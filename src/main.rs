// Main entry point - Settings, dependency wiring and one run
use std::process::ExitCode;
use std::sync::Arc;

use brake_telemetry::application::pipeline::PipelineService;
use brake_telemetry::infrastructure::blf_repository::BlfRepository;
use brake_telemetry::infrastructure::config::load_settings;
use brake_telemetry::presentation::cli::{outcome_line, Args};
use clap::Parser;
use tracing_subscriber::EnvFilter;

fn main() -> ExitCode {
    let args = Args::parse();

    // RUST_LOG wins over --verbose
    let default_level = if args.verbose { "brake_telemetry=debug" } else { "brake_telemetry=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();

    let mut settings = match load_settings(args.config.as_deref()) {
        Ok(settings) => settings,
        Err(e) => {
            tracing::error!("{:#}", e);
            println!("FAILED: settings could not be loaded");
            return ExitCode::FAILURE;
        }
    };
    args.apply(&mut settings);

    // Create repository (infrastructure layer) and service (application layer)
    let repository = Arc::new(BlfRepository::new());
    let service = PipelineService::new(repository, settings);

    let outcome = service.run();
    println!("{}", outcome_line(&outcome));

    if outcome.is_complete() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}
