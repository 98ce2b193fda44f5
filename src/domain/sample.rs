// Decoded sample and decoded table domain models
use std::collections::HashMap;
use std::ops::Range;
use thiserror::Error;

/// One decoded frame. Signal names borrow from the catalog the frame was decoded with.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedSample<'a> {
    pub timestamp: f64,
    pub arbitration_id: u32,
    pub signals: Vec<(&'a str, f64)>,
}

impl<'a> DecodedSample<'a> {
    pub fn get(&self, name: &str) -> Option<f64> {
        self.signals
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, v)| *v)
    }
}

/// Per-frame decode outcome that is tallied, never fatal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DecodeFailure {
    #[error("no definition for arbitration id 0x{arbitration_id:X}")]
    NoDefinition { arbitration_id: u32 },
    #[error("arbitration id 0x{arbitration_id:X}: expected {expected} payload bytes, got {actual}")]
    LengthMismatch {
        arbitration_id: u32,
        expected: usize,
        actual: usize,
    },
}

impl DecodeFailure {
    pub fn arbitration_id(&self) -> u32 {
        match self {
            Self::NoDefinition { arbitration_id } | Self::LengthMismatch { arbitration_id, .. } => {
                *arbitration_id
            }
        }
    }
}

/// Last-known value of every signal, updated as samples stream past.
#[derive(Debug, Clone)]
pub struct SignalLatch {
    index: HashMap<String, usize>,
    values: Vec<f64>,
}

impl SignalLatch {
    pub fn new(names: &[String]) -> Self {
        let index = names
            .iter()
            .enumerate()
            .map(|(i, n)| (n.clone(), i))
            .collect();
        Self {
            index,
            values: vec![f64::NAN; names.len()],
        }
    }

    pub fn update(&mut self, sample: &DecodedSample<'_>) {
        for (name, value) in &sample.signals {
            if let Some(&i) = self.index.get(*name) {
                self.values[i] = *value;
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.index
            .get(name)
            .map(|&i| self.values[i])
            .filter(|v| !v.is_nan())
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }
}

/// Column-major decoded series, one row per successfully decoded frame.
///
/// Signal columns hold latched (forward-filled) values; a signal that has not
/// been seen yet is NaN.
#[derive(Debug, Clone, Default)]
pub struct DecodedTable {
    pub base_time: f64,
    pub timestamps: Vec<f64>,
    pub arbitration_ids: Vec<u32>,
    pub names: Vec<String>,
    pub columns: Vec<Vec<f64>>,
}

impl DecodedTable {
    pub fn new(base_time: f64, names: Vec<String>) -> Self {
        let columns = vec![Vec::new(); names.len()];
        Self {
            base_time,
            timestamps: Vec::new(),
            arbitration_ids: Vec::new(),
            names,
            columns,
        }
    }

    /// Append a row from the latch's current state.
    pub fn push_row(&mut self, timestamp: f64, arbitration_id: u32, latch: &SignalLatch) {
        self.timestamps.push(timestamp);
        self.arbitration_ids.push(arbitration_id);
        for (column, value) in self.columns.iter_mut().zip(latch.values()) {
            column.push(*value);
        }
    }

    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }

    pub fn column(&self, name: &str) -> Option<&[f64]> {
        self.names
            .iter()
            .position(|n| n == name)
            .map(|i| self.columns[i].as_slice())
    }

    /// Timestamps relative to the source log's base time.
    pub fn relative_times(&self) -> Vec<f64> {
        self.timestamps.iter().map(|t| t - self.base_time).collect()
    }

    pub fn slice_rows(&self, rows: Range<usize>) -> Self {
        Self {
            base_time: self.base_time,
            timestamps: self.timestamps[rows.clone()].to_vec(),
            arbitration_ids: self.arbitration_ids[rows.clone()].to_vec(),
            names: self.names.clone(),
            columns: self.columns.iter().map(|c| c[rows.clone()].to_vec()).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_latch_forward_fills() {
        let names = vec!["a".to_string(), "b".to_string()];
        let mut latch = SignalLatch::new(&names);
        let mut table = DecodedTable::new(0.0, names);

        latch.update(&DecodedSample { timestamp: 0.0, arbitration_id: 1, signals: vec![("a", 1.0)] });
        table.push_row(0.0, 1, &latch);
        latch.update(&DecodedSample { timestamp: 0.1, arbitration_id: 2, signals: vec![("b", 2.0)] });
        table.push_row(0.1, 2, &latch);

        let a = table.column("a").unwrap();
        let b = table.column("b").unwrap();
        assert_eq!(a, &[1.0, 1.0]);
        assert!(b[0].is_nan());
        assert_eq!(b[1], 2.0);
        assert_eq!(latch.get("b"), Some(2.0));
        assert_eq!(latch.get("missing"), None);
    }

    #[test]
    fn test_slice_rows_keeps_base_time() {
        let names = vec!["a".to_string()];
        let latch = SignalLatch::new(&names);
        let mut table = DecodedTable::new(10.0, names);
        for i in 0..5 {
            table.push_row(10.0 + i as f64, 1, &latch);
        }

        let slice = table.slice_rows(1..3);
        assert_eq!(slice.len(), 2);
        assert_eq!(slice.base_time, 10.0);
        assert_eq!(slice.relative_times(), vec![1.0, 2.0]);
    }

    #[test]
    fn test_failure_display() {
        let failure = DecodeFailure::LengthMismatch { arbitration_id: 0x1A0, expected: 8, actual: 4 };
        assert_eq!(failure.arbitration_id(), 0x1A0);
        assert!(failure.to_string().contains("0x1A0"));
    }
}
