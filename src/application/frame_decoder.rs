// Frame decoder - Raw frames to physical signal values
use crate::domain::catalog::{Catalog, Multiplex};
use crate::domain::frame::{Frame, FrameLog};
use crate::domain::sample::{DecodeFailure, DecodedSample, DecodedTable, SignalLatch};
use serde::Serialize;
use std::collections::BTreeMap;

/// Decode one frame against the catalog. Pure; holds no cross-frame state.
pub fn decode<'a>(frame: &Frame, catalog: &'a Catalog) -> Result<DecodedSample<'a>, DecodeFailure> {
    let message = catalog
        .message(frame.arbitration_id)
        .ok_or(DecodeFailure::NoDefinition {
            arbitration_id: frame.arbitration_id,
        })?;

    if message.length != frame.payload.len() {
        return Err(DecodeFailure::LengthMismatch {
            arbitration_id: frame.arbitration_id,
            expected: message.length,
            actual: frame.payload.len(),
        });
    }

    let mux_value = message.multiplexor().map(|m| m.extract_raw(&frame.payload));

    let signals = message
        .signals
        .iter()
        .filter(|s| match s.multiplex {
            Multiplex::Multiplexed(k) => mux_value == Some(k),
            _ => true,
        })
        .map(|s| (s.name.as_str(), s.decode(&frame.payload)))
        .collect();

    Ok(DecodedSample {
        timestamp: frame.timestamp,
        arbitration_id: frame.arbitration_id,
        signals,
    })
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FailureTally {
    pub no_definition: usize,
    pub length_mismatch: usize,
}

impl FailureTally {
    pub fn total(&self) -> usize {
        self.no_definition + self.length_mismatch
    }
}

/// Decode outcome counts, tallied per arbitration id.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DecodeStats {
    pub decoded: usize,
    pub failures: BTreeMap<u32, FailureTally>,
}

impl DecodeStats {
    pub fn record_failure(&mut self, failure: &DecodeFailure) {
        let tally = self.failures.entry(failure.arbitration_id()).or_default();
        match failure {
            DecodeFailure::NoDefinition { .. } => tally.no_definition += 1,
            DecodeFailure::LengthMismatch { .. } => tally.length_mismatch += 1,
        }
    }

    pub fn no_definition_total(&self) -> usize {
        self.failures.values().map(|t| t.no_definition).sum()
    }

    pub fn length_mismatch_total(&self) -> usize {
        self.failures.values().map(|t| t.length_mismatch).sum()
    }

    pub fn failed_total(&self) -> usize {
        self.failures.values().map(FailureTally::total).sum()
    }

    /// Ids with the most failures, highest first.
    pub fn top_offenders(&self, n: usize) -> Vec<(u32, FailureTally)> {
        let mut offenders: Vec<(u32, FailureTally)> =
            self.failures.iter().map(|(id, t)| (*id, *t)).collect();
        offenders.sort_by(|a, b| b.1.total().cmp(&a.1.total()).then(a.0.cmp(&b.0)));
        offenders.truncate(n);
        offenders
    }
}

/// Streaming decode of a whole log into a latched table.
///
/// Frames are consumed in order; each successful decode updates the latch and
/// appends one row, so the table never needs a separate fill-forward pass.
pub fn decode_log(log: &FrameLog, catalog: &Catalog) -> (DecodedTable, DecodeStats) {
    let names = catalog.signal_names();
    let mut latch = SignalLatch::new(&names);
    let mut table = DecodedTable::new(log.base_time, names);
    let mut stats = DecodeStats::default();

    for frame in &log.frames {
        match decode(frame, catalog) {
            Ok(sample) => {
                latch.update(&sample);
                table.push_row(sample.timestamp, sample.arbitration_id, &latch);
                stats.decoded += 1;
            }
            Err(failure) => stats.record_failure(&failure),
        }
    }

    tracing::debug!(
        "Decoded {} of {} frames ({} unknown id, {} length mismatch)",
        stats.decoded,
        log.len(),
        stats.no_definition_total(),
        stats.length_mismatch_total()
    );

    (table, stats)
}
