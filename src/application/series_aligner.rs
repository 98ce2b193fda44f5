// Series aligner - Nearest-key merge of an auxiliary series onto the decoded table
use crate::domain::sample::DecodedTable;
use crate::domain::series::{AuxiliaryPoint, AuxiliarySeries, AuxiliaryTable, MergedTable};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MergeError {
    #[error("auxiliary table must have exactly 2 columns (key, value), found {0}")]
    ColumnCount(usize),
    #[error("key column {0} is not present in the decoded table")]
    MissingKeyColumn(String),
    #[error("auxiliary value column {0} collides with a decoded signal")]
    ColumnConflict(String),
}

/// Check the two-column contract and turn the raw table into a key/value series.
pub fn validate_auxiliary(table: &AuxiliaryTable) -> Result<AuxiliarySeries, MergeError> {
    if table.column_count() != 2 {
        return Err(MergeError::ColumnCount(table.column_count()));
    }

    let points = table
        .rows
        .iter()
        .filter(|row| row.len() == 2)
        .map(|row| AuxiliaryPoint::new(row[0], row[1]))
        .collect();

    Ok(AuxiliarySeries::new(
        table.headers[0].clone(),
        table.headers[1].clone(),
        points,
    ))
}

/// Attach each auxiliary value to the primary row whose `key_column` is numerically closest.
///
/// Brute force O(n·m); the auxiliary series is expected to stay small. Rows
/// with a NaN key never match, ties go to the earliest row, and when several
/// auxiliary points pick the same row the last one wins. Unmatched rows hold NaN.
pub fn merge(
    auxiliary: &AuxiliaryTable,
    primary: DecodedTable,
    key_column: &str,
) -> Result<MergedTable, MergeError> {
    let series = validate_auxiliary(auxiliary)?;
    merge_series(&series, primary, key_column)
}

pub fn merge_series(
    series: &AuxiliarySeries,
    primary: DecodedTable,
    key_column: &str,
) -> Result<MergedTable, MergeError> {
    let keys = primary
        .column(key_column)
        .ok_or_else(|| MergeError::MissingKeyColumn(key_column.to_string()))?;

    if primary.names.iter().any(|n| *n == series.value_name) {
        return Err(MergeError::ColumnConflict(series.value_name.clone()));
    }

    let mut values = vec![f64::NAN; primary.len()];
    let mut matched = 0usize;

    for point in &series.points {
        if let Some(row) = nearest_row(keys, point.key) {
            values[row] = point.value;
            matched += 1;
        }
    }

    tracing::debug!(
        "Merged {} of {} auxiliary points onto {} rows by {}",
        matched,
        series.points.len(),
        primary.len(),
        key_column
    );

    Ok(MergedTable {
        table: primary,
        value_name: series.value_name.clone(),
        values,
    })
}

fn nearest_row(keys: &[f64], target: f64) -> Option<usize> {
    let mut best: Option<(usize, f64)> = None;
    for (i, key) in keys.iter().enumerate() {
        let distance = (key - target).abs();
        if distance.is_nan() {
            continue;
        }
        match best {
            Some((_, d)) if distance >= d => {}
            _ => best = Some((i, distance)),
        }
    }
    best.map(|(i, _)| i)
}
