// Application layer - Core components and the run orchestration
pub mod event_detector;
pub mod frame_decoder;
pub mod frame_repository;
pub mod pipeline;
pub mod run_state;
pub mod segment_extractor;
pub mod series_aligner;
pub mod signal_processing;
