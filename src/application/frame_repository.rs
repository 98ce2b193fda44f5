// Repository trait for bus log access
use crate::domain::frame::FrameLog;
use std::path::Path;

/// Summary of what a repository read, beyond the frames themselves.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReadSummary {
    /// Objects in the log that were not classic CAN frames.
    pub skipped_objects: usize,
}

pub trait FrameRepository {
    /// Read every frame of a log in file order
    fn read_log(&self, path: &Path) -> anyhow::Result<(FrameLog, ReadSummary)>;

    /// Persist frames in the same container format; returns the number written
    fn write_log(&self, path: &Path, log: &FrameLog) -> anyhow::Result<usize>;
}
