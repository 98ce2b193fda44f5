// BLF file repository implementation
use crate::application::frame_repository::{FrameRepository, ReadSummary};
use crate::domain::frame::FrameLog;
use crate::infrastructure::blf::{BlfReader, BlfWriter};
use anyhow::{Context, Result};
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

#[derive(Debug, Clone, Default)]
pub struct BlfRepository;

impl BlfRepository {
    pub fn new() -> Self {
        Self
    }
}

impl FrameRepository for BlfRepository {
    fn read_log(&self, path: &Path) -> Result<(FrameLog, ReadSummary)> {
        let file = File::open(path).with_context(|| format!("Failed to open log {}", path.display()))?;
        let mut reader = BlfReader::new(BufReader::new(file))
            .with_context(|| format!("Failed to read BLF header of {}", path.display()))?;

        let declared = reader.header().object_count;
        let mut frames = Vec::with_capacity(declared as usize);
        for frame in reader.by_ref() {
            frames.push(frame.with_context(|| format!("Corrupt log {}", path.display()))?);
        }

        let summary = ReadSummary {
            skipped_objects: reader.skipped_objects(),
        };
        tracing::debug!(
            "Read {} frames from {} ({} objects declared, {} skipped)",
            frames.len(),
            path.display(),
            declared,
            summary.skipped_objects
        );

        Ok((FrameLog::new(frames), summary))
    }

    fn write_log(&self, path: &Path, log: &FrameLog) -> Result<usize> {
        let file = File::create(path).with_context(|| format!("Failed to create log {}", path.display()))?;
        let mut writer = BlfWriter::new(BufWriter::new(file))?;
        for frame in &log.frames {
            writer.write_frame(frame)?;
        }
        let written = writer
            .finish()
            .with_context(|| format!("Failed to finish log {}", path.display()))?;

        tracing::debug!("Wrote {} frames to {}", written, path.display());
        Ok(written as usize)
    }
}
