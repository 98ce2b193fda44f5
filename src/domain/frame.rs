// Bus frame domain model
use bytes::Bytes;

/// Timestamps at or above this value are taken to be Unix epoch seconds.
pub const ABSOLUTE_TIME_THRESHOLD: f64 = 1_000_000.0;

/// Largest payload of a classic CAN frame.
pub const MAX_CLASSIC_PAYLOAD: usize = 8;

#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub timestamp: f64,
    pub arbitration_id: u32,
    pub payload: Bytes,
    pub channel: u16,
    pub is_extended: bool,
}

impl Frame {
    /// Standard frame, or extended when the id does not fit in 11 bits.
    pub fn new(timestamp: f64, arbitration_id: u32, payload: impl Into<Bytes>, channel: u16) -> Self {
        Self {
            timestamp,
            arbitration_id,
            payload: payload.into(),
            channel,
            is_extended: arbitration_id > 0x7FF,
        }
    }

    /// Frame with a 29-bit identifier, whatever the id's magnitude.
    pub fn extended(timestamp: f64, arbitration_id: u32, payload: impl Into<Bytes>, channel: u16) -> Self {
        Self {
            is_extended: true,
            ..Self::new(timestamp, arbitration_id, payload, channel)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimestampDomain {
    Relative,
    Absolute,
}

impl TimestampDomain {
    pub fn classify(timestamp: f64) -> Self {
        if timestamp < ABSOLUTE_TIME_THRESHOLD {
            Self::Relative
        } else {
            Self::Absolute
        }
    }
}

/// An ordered frame sequence together with the base time of the log it was read from.
///
/// `base_time` is the first frame's timestamp in the *source* log and survives
/// extraction, so relative windows keep meaning the same thing on a trimmed segment.
#[derive(Debug, Clone, Default)]
pub struct FrameLog {
    pub base_time: f64,
    pub frames: Vec<Frame>,
}

impl FrameLog {
    pub fn new(frames: Vec<Frame>) -> Self {
        let base_time = frames.first().map(|f| f.timestamp).unwrap_or(0.0);
        Self { base_time, frames }
    }

    pub fn with_base_time(base_time: f64, frames: Vec<Frame>) -> Self {
        Self { base_time, frames }
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn domain(&self) -> TimestampDomain {
        TimestampDomain::classify(self.base_time)
    }
}

/// Repair a log that starts with relative timestamps and later switches to
/// absolute Unix time (logger clock synchronised mid-recording).
///
/// The relative prefix is shifted so that its last frame lands on the first
/// absolute frame. Returns the transition index when a shift was applied.
/// This is a magnitude heuristic; it cannot tell a very long relative log
/// from an absolute one.
pub fn normalize_timestamps(frames: &mut [Frame]) -> Option<usize> {
    let first = frames.first()?;
    if TimestampDomain::classify(first.timestamp) == TimestampDomain::Absolute {
        return None;
    }

    let transition = frames
        .iter()
        .position(|f| TimestampDomain::classify(f.timestamp) == TimestampDomain::Absolute)?;

    let shift = frames[transition].timestamp - frames[transition - 1].timestamp;
    for frame in &mut frames[..transition] {
        frame.timestamp += shift;
    }

    Some(transition)
}

/// Count timestamp inversions and stable-sort the frames if any were found.
pub fn ensure_chronological(frames: &mut [Frame]) -> usize {
    let inversions = frames
        .windows(2)
        .filter(|w| w[1].timestamp < w[0].timestamp)
        .count();

    if inversions > 0 {
        frames.sort_by(|a, b| a.timestamp.total_cmp(&b.timestamp));
    }

    inversions
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(ts: f64) -> Frame {
        Frame::new(ts, 0x100, vec![0u8; 8], 1)
    }

    #[test]
    fn test_extended_flag() {
        assert!(!Frame::new(0.0, 0x7FF, vec![0u8; 2], 1).is_extended);
        assert!(Frame::new(0.0, 0x800, vec![0u8; 2], 1).is_extended);
        assert!(Frame::extended(0.0, 0x100, vec![0u8; 2], 1).is_extended);
    }

    #[test]
    fn test_classify_domain() {
        assert_eq!(TimestampDomain::classify(12.5), TimestampDomain::Relative);
        assert_eq!(TimestampDomain::classify(1_700_000_000.0), TimestampDomain::Absolute);
        assert_eq!(TimestampDomain::classify(ABSOLUTE_TIME_THRESHOLD), TimestampDomain::Absolute);
    }

    #[test]
    fn test_normalize_mixed_log() {
        let mut frames = vec![frame(0.0), frame(0.5), frame(1.0), frame(1_700_000_000.0), frame(1_700_000_000.5)];
        let transition = normalize_timestamps(&mut frames);

        assert_eq!(transition, Some(3));
        assert_eq!(frames[2].timestamp, 1_700_000_000.0);
        assert_eq!(frames[0].timestamp, 1_699_999_999.0);
        assert!(frames.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
    }

    #[test]
    fn test_normalize_leaves_uniform_logs_alone() {
        let mut relative = vec![frame(0.0), frame(1.0)];
        assert_eq!(normalize_timestamps(&mut relative), None);
        assert_eq!(relative[1].timestamp, 1.0);

        let mut absolute = vec![frame(1_700_000_000.0), frame(1_700_000_001.0)];
        assert_eq!(normalize_timestamps(&mut absolute), None);
    }

    #[test]
    fn test_ensure_chronological_sorts_inversions() {
        let mut frames = vec![frame(0.0), frame(2.0), frame(1.0), frame(3.0)];
        assert_eq!(ensure_chronological(&mut frames), 1);
        let times: Vec<f64> = frames.iter().map(|f| f.timestamp).collect();
        assert_eq!(times, vec![0.0, 1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_frame_log_base_time() {
        let log = FrameLog::new(vec![frame(5.0), frame(6.0)]);
        assert_eq!(log.base_time, 5.0);
        assert_eq!(log.domain(), TimestampDomain::Relative);
        assert_eq!(FrameLog::new(Vec::new()).base_time, 0.0);
    }
}
