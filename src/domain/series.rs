// Auxiliary series and merged dataset domain models
use super::sample::DecodedTable;

/// Parsed auxiliary file before its column contract is checked.
#[derive(Debug, Clone, Default)]
pub struct AuxiliaryTable {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<f64>>,
}

impl AuxiliaryTable {
    pub fn new(headers: Vec<String>, rows: Vec<Vec<f64>>) -> Self {
        Self { headers, rows }
    }

    pub fn column_count(&self) -> usize {
        self.headers.len()
    }
}

/// Key/value point of an auxiliary series. The key is a physical quantity, not time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AuxiliaryPoint {
    pub key: f64,
    pub value: f64,
}

impl AuxiliaryPoint {
    pub fn new(key: f64, value: f64) -> Self {
        Self { key, value }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AuxiliarySeries {
    pub key_name: String,
    pub value_name: String,
    pub points: Vec<AuxiliaryPoint>,
}

impl AuxiliarySeries {
    pub fn new(key_name: String, value_name: String, points: Vec<AuxiliaryPoint>) -> Self {
        Self {
            key_name,
            value_name,
            points,
        }
    }

    /// Zero the value column against its first point.
    pub fn calibrate_to_first(&mut self) {
        if let Some(reference) = self.points.first().map(|p| p.value) {
            for point in &mut self.points {
                point.value -= reference;
            }
        }
    }
}

/// Decoded table plus the nearest-matched auxiliary column.
#[derive(Debug, Clone)]
pub struct MergedTable {
    pub table: DecodedTable,
    pub value_name: String,
    pub values: Vec<f64>,
}

impl MergedTable {
    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    pub fn matched_count(&self) -> usize {
        self.values.iter().filter(|v| !v.is_nan()).count()
    }

    /// Signal column or the merged auxiliary column.
    pub fn column(&self, name: &str) -> Option<&[f64]> {
        if name == self.value_name {
            return Some(&self.values);
        }
        self.table.column(name)
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.table
            .names
            .iter()
            .map(String::as_str)
            .chain(std::iter::once(self.value_name.as_str()))
    }
}
