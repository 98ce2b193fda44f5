// Event detector - Brake actuation onset and peak from multi-channel pressure data
use crate::application::signal_processing::{
    argmax, baseline, centered_moving_average, fill_gaps, find_peaks, first_difference,
    mean_abs_slope, PeakFilter,
};
use crate::domain::event::{BrakeEvent, NotFound, PositionLabel, Wheel};
use crate::domain::sample::DecodedTable;
use serde::{Deserialize, Serialize};

/// Guards the relative rise against near-zero baselines.
const BASELINE_EPSILON: f64 = 1e-6;

/// Tunable detection policy.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorParams {
    /// Minimum rise above baseline, in signal units.
    pub min_rise_delta: f64,
    /// Minimum rise as a fraction of the baseline.
    pub min_relative_rise: f64,
    /// First-difference level of the aggregate that marks the start.
    pub rise_threshold: f64,
    /// Centered moving average width, in samples.
    pub smoothing_window: usize,
    pub peak_prominence: f64,
    /// Samples averaged for the baseline.
    pub baseline_window: usize,
    pub max_backoff: f64,
    /// Seconds after the start searched for the peak.
    pub max_search_window: f64,
    /// Seconds subtracted from the detected start, floored at zero.
    pub start_backoff: f64,
}

impl Default for DetectorParams {
    fn default() -> Self {
        Self {
            min_rise_delta: 50.0,
            min_relative_rise: 0.2,
            rise_threshold: 0.01,
            smoothing_window: 50,
            peak_prominence: 10.0,
            baseline_window: 1000,
            max_backoff: 20.0,
            max_search_window: 120.0,
            start_backoff: 1.0,
        }
    }
}

/// One candidate channel after baseline removal and smoothing.
#[derive(Debug, Clone)]
struct ChannelAnalysis {
    name: String,
    normalized: Vec<f64>,
}

/// Detect a brake event.
///
/// `times` are seconds relative to the log base time and must be non-decreasing;
/// every channel slice must be as long as `times`.
pub fn detect(
    times: &[f64],
    channels: &[(&str, &[f64])],
    params: &DetectorParams,
) -> Result<BrakeEvent, NotFound> {
    let qualifying: Vec<ChannelAnalysis> = channels
        .iter()
        .filter(|(_, values)| values.len() == times.len())
        .filter_map(|(name, values)| analyze_channel(name, values, params))
        .collect();

    if qualifying.is_empty() {
        tracing::debug!("No qualifying channel among {} candidates", channels.len());
        return Err(NotFound::NoRisingChannels);
    }

    let position = PositionLabel::from_channels(qualifying.iter().map(|c| c.name.as_str()));
    let aggregate = aggregate_signal(&qualifying, times.len());
    let diff = first_difference(&aggregate);

    let start_index = diff
        .iter()
        .position(|d| *d > params.rise_threshold)
        .ok_or(NotFound::NoStartDetected)?;

    let start_time = (times[start_index] - params.start_backoff).max(0.0);

    let search_samples = search_window_samples(times, params.max_search_window);
    let search_end = start_index.saturating_add(search_samples).min(aggregate.len());
    let end_time = argmax(&aggregate[start_index..search_end]).map(|i| times[start_index + i]);

    if end_time.is_none() {
        tracing::warn!("Empty peak search region after start at {:.3}s", start_time);
    }

    Ok(BrakeEvent {
        start_time,
        end_time,
        involved_channels: qualifying.into_iter().map(|c| c.name).collect(),
        position,
    })
}

/// Detect on named columns of a decoded table. Unknown names are skipped.
pub fn detect_in_table(
    table: &DecodedTable,
    channel_names: &[String],
    params: &DetectorParams,
) -> Result<BrakeEvent, NotFound> {
    let times = table.relative_times();
    let channels: Vec<(&str, &[f64])> = channel_names
        .iter()
        .filter_map(|name| match table.column(name) {
            Some(values) => Some((name.as_str(), values)),
            None => {
                tracing::warn!("Detection channel {} is not in the decoded table", name);
                None
            }
        })
        .collect();

    detect(&times, &channels, params)
}

/// Catalog signals named after a wheel code, e.g. `FL_Pressure`.
pub fn default_channels(signal_names: &[String]) -> Vec<String> {
    signal_names
        .iter()
        .filter(|name| Wheel::from_channel_name(name).is_some() && name.as_bytes().get(2) == Some(&b'_'))
        .cloned()
        .collect()
}

fn analyze_channel(name: &str, values: &[f64], params: &DetectorParams) -> Option<ChannelAnalysis> {
    let base = baseline(values, params.baseline_window)?;
    let filled = fill_gaps(values)?;
    let smoothed = centered_moving_average(&filled, params.smoothing_window);

    let max = smoothed.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let rise = max - base;
    let relative_rise = rise / (base.abs() + BASELINE_EPSILON);

    if rise < params.min_rise_delta || relative_rise < params.min_relative_rise {
        tracing::debug!(
            "Channel {} not rising (rise {:.3}, relative {:.3})",
            name,
            rise,
            relative_rise
        );
        return None;
    }

    let normalized: Vec<f64> = smoothed.iter().map(|v| v - base).collect();

    let slope = mean_abs_slope(&normalized);
    let min_distance = if slope > BASELINE_EPSILON {
        (params.max_backoff / slope).round().max(1.0) as usize
    } else {
        1
    };

    let filter = PeakFilter {
        min_height: params.min_rise_delta,
        min_prominence: params.peak_prominence,
        min_distance,
    };
    let peaks = find_peaks(&normalized, &filter);

    if peaks.is_empty() {
        tracing::debug!("Channel {} rises but has no qualifying peak", name);
        return None;
    }

    tracing::debug!(
        "Channel {} qualifies: rise {:.3}, {} peak(s), min distance {}",
        name,
        rise,
        peaks.len(),
        min_distance
    );

    Some(ChannelAnalysis {
        name: name.to_string(),
        normalized,
    })
}

fn aggregate_signal(channels: &[ChannelAnalysis], len: usize) -> Vec<f64> {
    let count = channels.len() as f64;
    (0..len)
        .map(|i| channels.iter().map(|c| c.normalized[i]).sum::<f64>() / count)
        .collect()
}

fn search_window_samples(times: &[f64], seconds: f64) -> usize {
    if times.len() < 2 {
        return times.len();
    }
    let mean_interval = (times[times.len() - 1] - times[0]) / (times.len() - 1) as f64;
    if mean_interval <= 0.0 {
        return times.len();
    }
    (seconds / mean_interval).floor().max(0.0) as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    const DT: f64 = 0.1;
    const BASE: f64 = 200.0;

    fn times(n: usize) -> Vec<f64> {
        (0..n).map(|i| i as f64 * DT).collect()
    }

    /// Flat for 1000 samples, linear ramp of `rise` over 50 samples, then held.
    fn ramp(rise: f64) -> Vec<f64> {
        let mut values = vec![BASE; 1000];
        values.extend((1..=50).map(|k| BASE + rise * k as f64 / 50.0));
        values.extend(std::iter::repeat_n(BASE + rise, 1000));
        values
    }

    #[test]
    fn test_ramp_start_and_peak() {
        let values = ramp(100.0);
        let t = times(values.len());
        let event = detect(&t, &[("FL_Pressure", values.as_slice())], &DetectorParams::default()).unwrap();

        let onset = 1000.0 * DT;
        let plateau = 1049.0 * DT;
        let smoothing = 50.0 * DT;

        assert!((event.start_time - onset).abs() <= smoothing, "start {}", event.start_time);
        let end = event.end_time.unwrap();
        assert!(end >= plateau, "end {}", end);
        assert_eq!(event.position, PositionLabel::SingleWheel(Wheel::FL));
        assert!(event.involved_channels.contains("FL_Pressure"));
    }

    #[test]
    fn test_front_axle_label() {
        let rising = ramp(100.0);
        let flat = vec![BASE; rising.len()];
        let t = times(rising.len());
        let channels: Vec<(&str, &[f64])> = vec![
            ("FL_x", rising.as_slice()),
            ("FR_x", rising.as_slice()),
            ("RL_x", flat.as_slice()),
            ("RR_x", flat.as_slice()),
        ];

        let event = detect(&t, &channels, &DetectorParams::default()).unwrap();
        assert_eq!(event.position, PositionLabel::FrontAxle);
        assert_eq!(event.involved_channels.len(), 2);
    }

    #[test]
    fn test_small_rise_is_not_rising() {
        let values = ramp(30.0);
        let t = times(values.len());
        assert_eq!(
            detect(&t, &[("FL_x", values.as_slice())], &DetectorParams::default()),
            Err(NotFound::NoRisingChannels)
        );
    }

    #[test]
    fn test_relative_rise_guard() {
        // 60 above a baseline of 1000 is only 6 percent.
        let values: Vec<f64> = ramp(60.0).iter().map(|v| v + 800.0).collect();
        let t = times(values.len());
        assert_eq!(
            detect(&t, &[("FL_x", values.as_slice())], &DetectorParams::default()),
            Err(NotFound::NoRisingChannels)
        );
    }

    #[test]
    fn test_no_start_detected() {
        let values = ramp(100.0);
        let t = times(values.len());
        let params = DetectorParams {
            rise_threshold: 1000.0,
            ..DetectorParams::default()
        };
        assert_eq!(detect(&t, &[("FL_x", values.as_slice())], &params), Err(NotFound::NoStartDetected));
    }

    #[test]
    fn test_empty_search_region_returns_start_only() {
        let values = ramp(100.0);
        let t = times(values.len());
        let params = DetectorParams {
            max_search_window: 0.0,
            ..DetectorParams::default()
        };

        let event = detect(&t, &[("FL_x", values.as_slice())], &params).unwrap();
        assert!(!event.has_peak());
        assert!(event.start_time > 0.0);
    }

    #[test]
    fn test_start_backoff_floors_at_zero() {
        let mut values = vec![BASE; 5];
        values.extend(std::iter::repeat_n(BASE + 100.0, 300));
        let t = times(values.len());
        let params = DetectorParams {
            smoothing_window: 1,
            baseline_window: 5,
            ..DetectorParams::default()
        };

        let event = detect(&t, &[("RR_x", values.as_slice())], &params).unwrap();
        assert_eq!(event.start_time, 0.0);
        assert_eq!(event.end_time, Some(5.0 * DT));
    }

    #[test]
    fn test_default_channels() {
        let names: Vec<String> = ["FL_Pressure", "fr_pressure", "RLX", "Master_Pressure", "RR_P"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(default_channels(&names), vec!["FL_Pressure", "fr_pressure", "RR_P"]);
    }
}
